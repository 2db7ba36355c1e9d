//! Progress events and the bounded channel that carries them.
//!
//! Events are the only way progress is observable outside the engine. The
//! executor writes through an [`EventSink`]; consumers read the paired
//! `mpsc::Receiver`. What happens when the consumer falls behind is the
//! sink's [`EventPolicy`]:
//!
//! - `Block` (default): the executor awaits channel capacity, so a slow
//!   consumer slows the run down but never loses an event.
//! - `DropWhenFull`: the executor never waits; events that do not fit are
//!   dropped and counted.
//!
//! A consumer that hangs up never fails a run. Later events are discarded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use keel_core::{PropertyMap, Urn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::executor::RunStatus;
use crate::plan::UpdateKind;
use crate::step::{StepId, StepOp};
use crate::summary::ChangeCounts;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Emitted once before any step, with the plan's step counts.
    PreludeSummary {
        kind: UpdateKind,
        dry_run: bool,
        planned: ChangeCounts,
    },
    StepPending {
        step: StepId,
        urn: Urn,
        op: StepOp,
    },
    StepRunning {
        step: StepId,
        urn: Urn,
        op: StepOp,
    },
    StepSucceeded {
        step: StepId,
        urn: Urn,
        op: StepOp,
        outputs: PropertyMap,
    },
    StepFailed {
        step: StepId,
        urn: Urn,
        op: StepOp,
        error: String,
    },
    StepSkipped {
        step: StepId,
        urn: Urn,
        op: StepOp,
        reason: String,
    },
    Finished {
        run_id: Uuid,
        dry_run: bool,
        changes: ChangeCounts,
        status: RunStatus,
    },
}

impl Event {
    pub fn urn(&self) -> Option<&Urn> {
        match self {
            Self::StepPending { urn, .. }
            | Self::StepRunning { urn, .. }
            | Self::StepSucceeded { urn, .. }
            | Self::StepFailed { urn, .. }
            | Self::StepSkipped { urn, .. } => Some(urn),
            Self::PreludeSummary { .. } | Self::Finished { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPolicy {
    #[default]
    Block,
    DropWhenFull,
}

/// Sending half of the event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<Event>>,
    policy: EventPolicy,
    dropped: Arc<AtomicU64>,
}

/// Create a bounded event channel holding at most `capacity` events.
pub fn channel(capacity: usize, policy: EventPolicy) -> (EventSink, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sink = EventSink {
        tx: Some(tx),
        policy,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (sink, rx)
}

impl EventSink {
    /// A sink nobody listens to.
    pub fn discard() -> Self {
        Self {
            tx: None,
            policy: EventPolicy::DropWhenFull,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn policy(&self) -> EventPolicy {
        self.policy
    }

    /// Events dropped because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub async fn emit(&self, event: Event) {
        let Some(tx) = &self.tx else {
            return;
        };
        match self.policy {
            EventPolicy::Block => {
                if tx.send(event).await.is_err() {
                    tracing::trace!("event receiver closed, discarding event");
                }
            }
            EventPolicy::DropWhenFull => match tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped == 1 {
                        tracing::warn!("event buffer full, dropping events");
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::trace!("event receiver closed, discarding event");
                }
            },
        }
    }
}
