//! On-demand structural verification of a [`Snapshot`].
//!
//! Not run on every mutation. The engine calls it before planning and,
//! when configured, before every checkpoint save.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::resource::ResourceStatus;
use crate::snapshot::Snapshot;
use crate::urn::Urn;

/// The first invariant a snapshot was found to violate.
///
/// Any of these means the snapshot is corrupt and needs manual repair; none
/// is recoverable automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("magic cookie mismatch; possible tampering or corruption detected")]
    MagicMismatch,

    #[error("child resource {urn}'s parent {parent} comes after it")]
    ParentAfterChild { urn: Urn, parent: Urn },

    #[error("child resource {urn} refers to missing parent {parent}")]
    MissingParent { urn: Urn, parent: Urn },

    #[error("resource {urn}'s dependency {dependency} comes after it")]
    DependencyAfterDependent { urn: Urn, dependency: Urn },

    #[error("resource {urn} dependency {dependency} refers to missing resource")]
    MissingDependency { urn: Urn, dependency: Urn },

    #[error("resource {urn} has status `{status}`")]
    InvalidStatus { urn: Urn, status: ResourceStatus },

    #[error("duplicate live resource {urn}")]
    DuplicateLive { urn: Urn },
}

impl Snapshot {
    /// Check every structural invariant, returning the first violation.
    ///
    /// 1. The manifest's magic cookie matches its recomputed value.
    /// 2. Parents come strictly before their children.
    /// 3. Dependencies come strictly before their dependents.
    /// 4. No resource is `Unspecified` or `Deleted`.
    /// 5. At most one record per URN is live.
    pub fn verify_integrity(&self) -> Result<(), IntegrityError> {
        if self.manifest.magic != self.manifest.compute_magic() {
            return Err(IntegrityError::MagicMismatch);
        }

        let mut seen: HashSet<&Urn> = HashSet::with_capacity(self.resources.len());
        let mut live: HashMap<&Urn, bool> = HashMap::with_capacity(self.resources.len());

        for (i, state) in self.resources.iter().enumerate() {
            let urn = &state.urn;
            let comes_later =
                |target: &Urn| self.resources[i + 1..].iter().any(|r| &r.urn == target);

            if let Some(parent) = &state.parent {
                if !seen.contains(parent) {
                    // Distinguish out-of-order from entirely missing for a
                    // better diagnostic; both are fatal.
                    return Err(if comes_later(parent) {
                        IntegrityError::ParentAfterChild {
                            urn: urn.clone(),
                            parent: parent.clone(),
                        }
                    } else {
                        IntegrityError::MissingParent {
                            urn: urn.clone(),
                            parent: parent.clone(),
                        }
                    });
                }
            }

            for dep in &state.dependencies {
                if !seen.contains(dep) {
                    return Err(if comes_later(dep) {
                        IntegrityError::DependencyAfterDependent {
                            urn: urn.clone(),
                            dependency: dep.clone(),
                        }
                    } else {
                        IntegrityError::MissingDependency {
                            urn: urn.clone(),
                            dependency: dep.clone(),
                        }
                    });
                }
            }

            if matches!(
                state.status,
                ResourceStatus::Unspecified | ResourceStatus::Deleted
            ) {
                return Err(IntegrityError::InvalidStatus {
                    urn: urn.clone(),
                    status: state.status,
                });
            }

            let is_live = state.is_live();
            let already_live = live.entry(urn).or_insert(false);
            if *already_live && is_live {
                return Err(IntegrityError::DuplicateLive { urn: urn.clone() });
            }
            *already_live |= is_live;

            seen.insert(urn);
        }

        Ok(())
    }
}
