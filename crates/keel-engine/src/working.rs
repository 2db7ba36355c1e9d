//! The snapshot under construction during a run.
//!
//! A run's snapshot is the states produced so far, in completion order,
//! followed by every base record not yet accounted for. Steps only complete
//! after the steps producing their parents and dependencies, and deletes only
//! after everything still referencing the deleted record, so materializing at
//! any point yields a snapshot that satisfies the integrity rules.

use keel_core::{Manifest, ResourceState, Snapshot, Urn, UrnIndex};

use crate::step::{ReplaceStrategy, Step, StepOp};

struct BaseEntry {
    /// The record as planned against; steps refer to it by value.
    original: ResourceState,
    current: ResourceState,
    consumed: bool,
}

pub(crate) struct WorkingSnapshot {
    stack: String,
    completed: Vec<ResourceState>,
    base: Vec<BaseEntry>,
    /// Positions of the live base records; indices into `base`.
    live: UrnIndex,
}

impl WorkingSnapshot {
    pub(crate) fn new(base: &Snapshot) -> Self {
        Self {
            stack: base.stack.clone(),
            completed: Vec::new(),
            base: base
                .resources
                .iter()
                .map(|r| BaseEntry {
                    original: r.clone(),
                    current: r.clone(),
                    consumed: false,
                })
                .collect(),
            live: base.index(),
        }
    }

    /// Record the outcome of a succeeded step. `result` is the state the step
    /// left behind: the new state for producing steps, the re-read state for
    /// a refresh (`None` if the resource is gone), nothing for deletes.
    pub(crate) fn apply(&mut self, step: &Step, result: Option<ResourceState>) {
        match step.op {
            StepOp::Same | StepOp::Create | StepOp::Update | StepOp::Read => {
                self.consume(step.old.as_ref());
                self.completed.extend(result);
            }
            StepOp::CreateReplacement => {
                match step.strategy.unwrap_or_default() {
                    ReplaceStrategy::CreateBeforeDelete => {
                        self.modify(step.old.as_ref(), |s| s.pending_deletion = true);
                    }
                    ReplaceStrategy::DeleteBeforeCreate => self.consume(step.old.as_ref()),
                }
                self.completed.extend(result);
            }
            StepOp::DeleteReplaced => match step.strategy.unwrap_or_default() {
                ReplaceStrategy::CreateBeforeDelete => self.consume(step.old.as_ref()),
                ReplaceStrategy::DeleteBeforeCreate => {
                    self.modify(step.old.as_ref(), |s| s.pending_replacement = true);
                }
            },
            StepOp::Delete => self.consume(step.old.as_ref()),
            StepOp::Refresh => match result {
                Some(refreshed) => {
                    self.modify(step.old.as_ref(), |s| s.outputs = refreshed.outputs);
                }
                None => {
                    self.consume(step.old.as_ref());
                    self.prune_references(&step.urn);
                }
            },
        }
    }

    /// The snapshot as of now, stamped with `manifest`.
    pub(crate) fn materialize(&self, manifest: Manifest) -> Snapshot {
        let resources = self
            .completed
            .iter()
            .cloned()
            .chain(
                self.base
                    .iter()
                    .filter(|e| !e.consumed)
                    .map(|e| e.current.clone()),
            )
            .collect();
        Snapshot::new(self.stack.clone(), manifest, resources)
    }

    /// The unconsumed base entry a step's old state was planned against.
    /// Live records are looked up by URN; superseded ones share their URN
    /// with a live record and are matched by value.
    fn find(&mut self, old: Option<&ResourceState>) -> Option<&mut BaseEntry> {
        let old = old?;
        if old.is_live() {
            let pos = self.live.position(&old.urn)?;
            return self.base.get_mut(pos).filter(|e| !e.consumed);
        }
        self.base
            .iter_mut()
            .find(|e| !e.consumed && !e.original.is_live() && e.original == *old)
    }

    fn consume(&mut self, old: Option<&ResourceState>) {
        if let Some(entry) = self.find(old) {
            entry.consumed = true;
        }
    }

    fn modify(&mut self, old: Option<&ResourceState>, f: impl FnOnce(&mut ResourceState)) {
        if let Some(entry) = self.find(old) {
            f(&mut entry.current);
        }
    }

    /// Drop references to a resource that vanished outside the engine, unless
    /// another record still carries its URN.
    fn prune_references(&mut self, urn: &Urn) {
        let still_present = self.completed.iter().any(|r| &r.urn == urn)
            || self.base.iter().any(|e| !e.consumed && &e.current.urn == urn);
        if still_present {
            return;
        }
        let states = self
            .completed
            .iter_mut()
            .chain(self.base.iter_mut().filter(|e| !e.consumed).map(|e| &mut e.current));
        for state in states {
            if state.parent.as_ref() == Some(urn) {
                state.parent = None;
            }
            state.dependencies.retain(|d| d != urn);
        }
    }
}

