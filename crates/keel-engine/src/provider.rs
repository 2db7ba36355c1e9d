use std::collections::HashMap;
use std::sync::Arc;

use keel_core::{PluginInfo, PropertyMap, Urn};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

pub use keel_storage::BoxFuture;

/// How a provider classifies the change between old and new inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    Same,
    UpdateInPlace,
    RequireReplacement,
}

/// Result of [`Provider::diff`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub kind: DiffKind,
    /// Properties that differ. For replacements, the ones forcing it.
    #[serde(default)]
    pub changed_keys: Vec<String>,
}

impl DiffResult {
    pub fn same() -> Self {
        Self {
            kind: DiffKind::Same,
            changed_keys: Vec::new(),
        }
    }

    pub fn update(changed_keys: Vec<String>) -> Self {
        Self {
            kind: DiffKind::UpdateInPlace,
            changed_keys,
        }
    }

    pub fn replace(changed_keys: Vec<String>) -> Self {
        Self {
            kind: DiffKind::RequireReplacement,
            changed_keys,
        }
    }
}

/// Result of a successful [`Provider::create`].
#[derive(Debug, Clone, PartialEq)]
pub struct CreateResult {
    pub id: String,
    pub outputs: PropertyMap,
}

/// CRUD capability for one family of resource types.
///
/// `preview` asks for a dry execution: the provider must not touch real
/// infrastructure and may answer with computed outputs. Deletes are never
/// issued during a preview. Methods return boxed futures for dyn
/// compatibility.
pub trait Provider: Send + Sync {
    /// Plugin name, recorded in the snapshot manifest.
    fn name(&self) -> &str;

    /// Plugin version, recorded in the snapshot manifest.
    fn version(&self) -> &str;

    fn diff<'a>(
        &'a self,
        urn: &'a Urn,
        id: &'a str,
        olds: &'a PropertyMap,
        news: &'a PropertyMap,
    ) -> BoxFuture<'a, Result<DiffResult, ProviderError>>;

    fn create<'a>(
        &'a self,
        urn: &'a Urn,
        inputs: &'a PropertyMap,
        preview: bool,
    ) -> BoxFuture<'a, Result<CreateResult, ProviderError>>;

    fn update<'a>(
        &'a self,
        urn: &'a Urn,
        id: &'a str,
        olds: &'a PropertyMap,
        news: &'a PropertyMap,
        preview: bool,
    ) -> BoxFuture<'a, Result<PropertyMap, ProviderError>>;

    fn delete<'a>(
        &'a self,
        urn: &'a Urn,
        id: &'a str,
        outputs: &'a PropertyMap,
    ) -> BoxFuture<'a, Result<(), ProviderError>>;

    /// Current outputs of the resource, or `None` if it no longer exists.
    fn read<'a>(
        &'a self,
        urn: &'a Urn,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<PropertyMap>, ProviderError>>;
}

/// Providers available to a run, keyed by reference.
///
/// A resource names its provider explicitly, or falls back to the default
/// provider for the package of its type token (`aws` for `aws:s3:Bucket`),
/// registered under `default_<package>`.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, reference: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(reference.into(), provider);
    }

    /// Register `provider` as the default for `package`.
    pub fn register_default(&mut self, package: &str, provider: Arc<dyn Provider>) {
        self.register(default_reference(package), provider);
    }

    pub fn with(mut self, reference: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.register(reference, provider);
        self
    }

    pub fn get(&self, reference: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(reference).cloned()
    }

    /// Manifest entries for the distinct plugins behind `references`,
    /// sorted by name. Unregistered references are ignored.
    pub fn plugins_for<'a>(
        &self,
        references: impl IntoIterator<Item = &'a str>,
    ) -> Vec<PluginInfo> {
        let mut plugins: Vec<PluginInfo> = references
            .into_iter()
            .filter_map(|reference| self.providers.get(reference))
            .map(|p| PluginInfo {
                name: p.name().to_string(),
                version: p.version().to_string(),
            })
            .collect();
        plugins.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        plugins.dedup();
        plugins
    }
}

/// The reference a resource of `type_token` uses when it names no provider.
pub fn resolve_reference(explicit: Option<&str>, type_token: &str) -> String {
    match explicit {
        Some(reference) => reference.to_string(),
        None => default_reference(type_token.split(':').next().unwrap_or(type_token)),
    }
}

fn default_reference(package: &str) -> String {
    format!("default_{package}")
}
