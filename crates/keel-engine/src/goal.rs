use keel_core::{PropertyMap, Urn};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::provider::BoxFuture;

/// Desired state of one resource, as produced by the external evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGoal {
    pub type_token: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Urn>,
    #[serde(default)]
    pub dependencies: Vec<Urn>,
    #[serde(default)]
    pub inputs: PropertyMap,
    /// Provider-managed (`true`) or a component grouping other resources.
    #[serde(default = "default_custom")]
    pub custom: bool,
    #[serde(default)]
    pub protect: bool,
    /// Explicit provider reference; defaults to the package's default provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Per-resource replacement ordering. `None` uses the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_before_replace: Option<bool>,
    /// Adopt an existing resource with this ID instead of managing it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_id: Option<String>,
}

fn default_custom() -> bool {
    true
}

impl ResourceGoal {
    pub fn new(type_token: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_token: type_token.into(),
            name: name.into(),
            parent: None,
            dependencies: Vec::new(),
            inputs: PropertyMap::new(),
            custom: true,
            protect: false,
            provider: None,
            delete_before_replace: None,
            read_id: None,
        }
    }

    pub fn component(type_token: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            custom: false,
            ..Self::new(type_token, name)
        }
    }

    pub fn parent(mut self, parent: &Urn) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn depends_on(mut self, dependency: &Urn) -> Self {
        self.dependencies.push(dependency.clone());
        self
    }

    pub fn input(
        mut self,
        key: impl Into<String>,
        value: impl Into<keel_core::PropertyValue>,
    ) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    pub fn protect(mut self) -> Self {
        self.protect = true;
        self
    }

    pub fn provider(mut self, reference: impl Into<String>) -> Self {
        self.provider = Some(reference.into());
        self
    }

    pub fn delete_before_replace(mut self, enabled: bool) -> Self {
        self.delete_before_replace = Some(enabled);
        self
    }

    pub fn read(mut self, id: impl Into<String>) -> Self {
        self.read_id = Some(id.into());
        self
    }
}

/// The full target configuration of a stack, in registration order.
///
/// Parents and dependencies must be registered before the resources that
/// reference them; planning rejects graphs that break this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredGraph {
    pub stack: String,
    pub project: String,
    pub resources: Vec<ResourceGoal>,
}

impl DesiredGraph {
    pub fn new(stack: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            project: project.into(),
            resources: Vec::new(),
        }
    }

    /// The URN `goal` will have in this graph.
    pub fn urn_of(&self, goal: &ResourceGoal) -> Urn {
        match &goal.parent {
            Some(parent) => Urn::child(parent, &goal.type_token, &goal.name),
            None => Urn::new(&self.stack, &self.project, None, &goal.type_token, &goal.name),
        }
    }

    /// Register `goal` and return its URN.
    pub fn add(&mut self, goal: ResourceGoal) -> Urn {
        let urn = self.urn_of(&goal);
        self.resources.push(goal);
        urn
    }
}

/// Evaluates the program or declarative file into a [`DesiredGraph`].
///
/// Evaluation may differ between calls, which is why the preview and the
/// real run each evaluate afresh.
pub trait DesiredSource: Send + Sync {
    fn evaluate(&self) -> BoxFuture<'_, Result<DesiredGraph, EngineError>>;
}

impl DesiredSource for DesiredGraph {
    fn evaluate(&self) -> BoxFuture<'_, Result<DesiredGraph, EngineError>> {
        Box::pin(async move { Ok(self.clone()) })
    }
}
