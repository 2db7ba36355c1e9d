use std::fmt;

use keel_core::{ResourceState, Urn};
use serde::{Deserialize, Serialize};

/// Index of a step within its plan.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(pub usize);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a step does to its resource.
///
/// A replacement is scheduled as two steps, `CreateReplacement` and
/// `DeleteReplaced`, whose relative order follows the [`ReplaceStrategy`].
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOp {
    Same,
    Create,
    Update,
    Delete,
    CreateReplacement,
    DeleteReplaced,
    Read,
    Refresh,
}

impl StepOp {
    /// Steps that remove a resource record rather than produce one.
    pub fn is_delete(self) -> bool {
        matches!(self, Self::Delete | Self::DeleteReplaced)
    }

    pub fn is_replace(self) -> bool {
        matches!(self, Self::CreateReplacement | Self::DeleteReplaced)
    }

    /// Steps that leave a new state for the resource in the snapshot.
    pub fn produces_state(self) -> bool {
        matches!(
            self,
            Self::Same | Self::Create | Self::Update | Self::CreateReplacement | Self::Read
        )
    }
}

impl fmt::Display for StepOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Same => "same",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::CreateReplacement => "create-replacement",
            Self::DeleteReplaced => "delete-replaced",
            Self::Read => "read",
            Self::Refresh => "refresh",
        };
        f.write_str(s)
    }
}

/// Order of the two halves of a replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceStrategy {
    /// Create the successor, repoint dependents, then delete the original.
    #[default]
    CreateBeforeDelete,
    /// Delete the original first. Needed when both cannot coexist, e.g. a
    /// fixed physical name.
    DeleteBeforeCreate,
}

/// A unit of work against exactly one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub op: StepOp,
    pub urn: Urn,
    /// State the resource should have afterwards. `None` for deletes.
    pub new: Option<ResourceState>,
    /// State being superseded. `None` for creates.
    pub old: Option<ResourceState>,
    /// Provider reference. `None` for components.
    pub provider: Option<String>,
    /// Set on both halves of a replacement.
    pub strategy: Option<ReplaceStrategy>,
    /// Properties reported as changed by the provider's diff.
    #[serde(default)]
    pub changed_keys: Vec<String>,
    /// Steps that must succeed before this one may start.
    #[serde(default)]
    pub depends_on: Vec<StepId>,
}

impl Step {
    pub fn new(
        op: StepOp,
        urn: Urn,
        old: Option<ResourceState>,
        new: Option<ResourceState>,
    ) -> Self {
        Self {
            id: StepId(0),
            op,
            urn,
            new,
            old,
            provider: None,
            strategy: None,
            changed_keys: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    /// Either side of the step, preferring the new state.
    pub fn state(&self) -> Option<&ResourceState> {
        self.new.as_ref().or(self.old.as_ref())
    }

    pub fn is_custom(&self) -> bool {
        self.state().is_some_and(|s| s.custom)
    }
}

/// Lifecycle of a step within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Never ran: a prerequisite failed or was skipped, or the run was
    /// cancelled first.
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}
