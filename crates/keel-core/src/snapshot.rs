use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::resource::ResourceState;
use crate::urn::Urn;

/// Version information for a provider plugin used to build a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
}

/// Provenance of a snapshot: when it was written, by which tooling, with
/// which plugins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub time: jiff::Timestamp,
    /// Tamper-detection cookie derived from `version`.
    pub magic: String,
    pub version: String,
    #[serde(default)]
    pub plugins: Vec<PluginInfo>,
}

impl Manifest {
    /// A manifest stamped now, with a freshly computed magic cookie.
    pub fn new(version: impl Into<String>, plugins: Vec<PluginInfo>) -> Self {
        let mut manifest = Self {
            time: jiff::Timestamp::now(),
            magic: String::new(),
            version: version.into(),
            plugins,
        };
        manifest.magic = manifest.compute_magic();
        manifest
    }

    /// Recompute the magic cookie, ignoring whatever is stored in `magic`.
    /// Empty when there is no version to derive it from.
    pub fn compute_magic(&self) -> String {
        if self.version.is_empty() {
            return String::new();
        }
        format!("{:x}", Sha256::digest(self.version.as_bytes()))
    }
}

/// A point-in-time view of every resource in a stack.
///
/// Resources are kept in topological order: parents and dependencies always
/// precede the resources that reference them. Construction does not check
/// this; see [`Snapshot::verify_integrity`].
///
/// `Clone` is a deep copy: the clone owns its resource list and no mutation
/// of one is visible through the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub stack: String,
    pub manifest: Manifest,
    pub resources: Vec<ResourceState>,
}

impl Snapshot {
    pub fn new(
        stack: impl Into<String>,
        manifest: Manifest,
        resources: Vec<ResourceState>,
    ) -> Self {
        Self {
            stack: stack.into(),
            manifest,
            resources,
        }
    }

    /// An empty snapshot for a stack that has never been deployed.
    pub fn empty(stack: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(stack, Manifest::new(version, Vec::new()), Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// The live record for `urn`, if any.
    pub fn live(&self, urn: &Urn) -> Option<&ResourceState> {
        self.resources.iter().find(|r| &r.urn == urn && r.is_live())
    }

    pub fn live_resources(&self) -> impl Iterator<Item = &ResourceState> {
        self.resources.iter().filter(|r| r.is_live())
    }

    /// Build a URN lookup over the live records.
    pub fn index(&self) -> UrnIndex {
        UrnIndex::build(&self.resources)
    }
}

/// URN to position lookup over the live records of a resource list.
///
/// Built once per plan or run so lookups and ancestor walks avoid scanning
/// the whole list.
#[derive(Debug, Clone, Default)]
pub struct UrnIndex {
    positions: HashMap<Urn, usize>,
}

impl UrnIndex {
    pub fn build(resources: &[ResourceState]) -> Self {
        Self::from_positions(resources.iter().enumerate().filter(|(_, r)| r.is_live()))
    }

    /// Index every record regardless of status, e.g. desired states that
    /// have not been created yet. The first record wins for a repeated URN.
    pub fn build_all(resources: &[ResourceState]) -> Self {
        Self::from_positions(resources.iter().enumerate())
    }

    fn from_positions<'a>(records: impl Iterator<Item = (usize, &'a ResourceState)>) -> Self {
        let mut positions = HashMap::new();
        for (i, r) in records {
            positions.entry(r.urn.clone()).or_insert(i);
        }
        Self { positions }
    }

    pub fn position(&self, urn: &Urn) -> Option<usize> {
        self.positions.get(urn).copied()
    }

    pub fn contains(&self, urn: &Urn) -> bool {
        self.positions.contains_key(urn)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Walk the parent chain of the resource at `urn` and report whether
    /// `ancestor` is on it.
    ///
    /// Parents must sit at strictly lower positions, so the walk stops at the
    /// first parent that does not; a corrupt list cannot loop it forever.
    pub fn is_descendant(&self, resources: &[ResourceState], urn: &Urn, ancestor: &Urn) -> bool {
        let Some(mut pos) = self.position(urn) else {
            return false;
        };
        while let Some(parent) = resources.get(pos).and_then(|r| r.parent.as_ref()) {
            if parent == ancestor {
                return true;
            }
            match self.position(parent) {
                Some(next) if next < pos => pos = next,
                _ => return false,
            }
        }
        false
    }
}
