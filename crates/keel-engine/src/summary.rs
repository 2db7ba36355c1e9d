use serde::{Deserialize, Serialize};

use crate::step::StepOp;

/// Per-operation resource counts for a plan or a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub same: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub replaced: usize,
    pub read: usize,
    pub refreshed: usize,
    pub failed: usize,
}

impl ChangeCounts {
    /// Count one step. The delete half of a replacement is not counted on
    /// its own; the create half stands for the whole replacement.
    pub fn record(&mut self, op: StepOp) {
        match op {
            StepOp::Same => self.same += 1,
            StepOp::Create => self.created += 1,
            StepOp::Update => self.updated += 1,
            StepOp::Delete => self.deleted += 1,
            StepOp::CreateReplacement => self.replaced += 1,
            StepOp::DeleteReplaced => {}
            StepOp::Read => self.read += 1,
            StepOp::Refresh => self.refreshed += 1,
        }
    }

    /// Resources that change in the real world.
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.deleted + self.replaced
    }

    pub fn has_changes(&self) -> bool {
        self.changes() > 0
    }
}
