use serde::{Deserialize, Serialize};

use crate::property::PropertyMap;
use crate::urn::Urn;

/// Status of a resource record.
///
/// Only `Created` may remain in a persisted snapshot; the other two are
/// transient and flagged by the integrity verifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    #[default]
    Unspecified,
    Created,
    Deleted,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unspecified => "unspecified",
            Self::Created => "created",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Last known state of one managed resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub urn: Urn,
    /// Provider-assigned ID. Empty until the first successful create, and
    /// always empty for components.
    #[serde(default)]
    pub id: String,
    /// Managed by a provider (`true`) or a logical grouping (`false`).
    pub custom: bool,
    /// Adopted through a read; dropped from state without a provider delete.
    #[serde(default)]
    pub external: bool,
    pub status: ResourceStatus,
    #[serde(default)]
    pub inputs: PropertyMap,
    #[serde(default)]
    pub outputs: PropertyMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Urn>,
    #[serde(default)]
    pub dependencies: Vec<Urn>,
    #[serde(default)]
    pub protect: bool,
    /// Already deleted as the first half of a delete-before-create
    /// replacement; waiting for its successor.
    #[serde(default)]
    pub pending_replacement: bool,
    /// Superseded by a create-before-delete replacement; waiting to be deleted.
    #[serde(default)]
    pub pending_deletion: bool,
    /// Reference of the provider that manages this resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl ResourceState {
    /// A fresh, not yet created custom resource.
    pub fn new(urn: Urn, inputs: PropertyMap) -> Self {
        Self {
            urn,
            id: String::new(),
            custom: true,
            external: false,
            status: ResourceStatus::Unspecified,
            inputs,
            outputs: PropertyMap::new(),
            parent: None,
            dependencies: Vec::new(),
            protect: false,
            pending_replacement: false,
            pending_deletion: false,
            provider: None,
        }
    }

    /// Created or updated successfully and not superseded.
    pub fn is_live(&self) -> bool {
        self.status == ResourceStatus::Created
            && !self.pending_replacement
            && !self.pending_deletion
    }

    /// True if `urn` is this resource's parent or one of its dependencies.
    pub fn references(&self, urn: &Urn) -> bool {
        self.parent.as_ref() == Some(urn) || self.dependencies.contains(urn)
    }
}
