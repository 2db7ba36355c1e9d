//! Step executor: runs a plan's steps with bounded parallelism, in dependency
//! order, checkpointing the snapshot after every completed step.
//!
//! A single driver loop owns all run state. Provider calls run as spawned
//! tasks in a `JoinSet` capped at `parallel`, so they keep making progress
//! while the driver saves a checkpoint or waits on the event channel. The
//! loop collects their outcomes one at a time, so snapshot mutation and
//! checkpointing are strictly sequential.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use jiff::{SignedDuration, Timestamp};
use keel_core::{
    Manifest, PluginInfo, PropertyMap, ResourceState, ResourceStatus, Snapshot, Urn,
    property::has_computed,
};
use keel_storage::CheckpointStore;
use serde::{Deserialize, Serialize};
use tokio::task::{Id, JoinSet};
use uuid::Uuid;

use crate::context::RunContext;
use crate::error::{EngineError, ProviderError, format_err_chain};
use crate::events::{Event, EventSink};
use crate::plan::{Plan, UpdateKind};
use crate::provider::Provider;
use crate::step::{Step, StepId, StepOp, StepStatus};
use crate::summary::ChangeCounts;
use crate::working::WorkingSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step succeeded and no resource was left out of the plan.
    Succeeded,
    /// At least one step failed or a resource could not be diffed.
    Failed,
    /// Cancelled before every step ran.
    Interrupted,
}

/// A step that ran and failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepFailure {
    pub step: StepId,
    pub urn: Urn,
    pub op: StepOp,
    pub error: ProviderError,
}

/// Outcome of one execution of a plan.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub kind: UpdateKind,
    pub dry_run: bool,
    pub status: RunStatus,
    pub changes: ChangeCounts,
    pub completed: Vec<StepId>,
    pub failed: Vec<StepFailure>,
    pub skipped: Vec<StepId>,
    /// The resulting snapshot. For a dry run, the unchanged base.
    pub snapshot: Snapshot,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn duration(&self) -> SignedDuration {
        self.finished_at.duration_since(self.started_at)
    }
}

type StepOutcome = (StepId, Result<Option<ResourceState>, ProviderError>);

/// Execute `plan` against `base`.
///
/// Step failures are recorded in the result and skip the failed step's
/// dependents; independent steps keep running. Only a checkpoint that cannot
/// be verified or saved aborts the run: no new steps are issued, in-flight
/// steps are drained, and the error is returned.
///
/// With `dry_run`, providers are asked for previews, deletes are not issued
/// and nothing is saved.
pub async fn execute(
    ctx: &RunContext,
    plan: &Plan,
    base: &Snapshot,
    dry_run: bool,
    events: &EventSink,
    store: &dyn CheckpointStore,
) -> Result<RunResult, EngineError> {
    let run_id = Uuid::new_v4();
    let started_at = Timestamp::now();
    let parallel = ctx.config.parallel.max(1);
    let cancel = ctx.cancel_signal();
    let plugins = ctx.providers.plugins_for(
        plan.steps
            .iter()
            .filter_map(|s| s.provider.as_deref())
            .chain(base.resources.iter().filter_map(|r| r.provider.as_deref())),
    );

    tracing::info!(
        run_id = %run_id,
        kind = %plan.kind,
        dry_run,
        steps = plan.steps.len(),
        parallel,
        "run started"
    );

    events
        .emit(Event::PreludeSummary {
            kind: plan.kind,
            dry_run,
            planned: plan.planned_changes(),
        })
        .await;
    for step in &plan.steps {
        events
            .emit(Event::StepPending {
                step: step.id,
                urn: step.urn.clone(),
                op: step.op,
            })
            .await;
    }

    let dependents = plan.dependents();
    let mut waiting_on: Vec<usize> = plan.steps.iter().map(|s| s.depends_on.len()).collect();
    let mut status = vec![StepStatus::Pending; plan.steps.len()];
    let mut ready: VecDeque<StepId> = plan
        .steps
        .iter()
        .filter(|s| s.depends_on.is_empty())
        .map(|s| s.id)
        .collect();
    let mut in_flight: JoinSet<StepOutcome> = JoinSet::new();
    let mut tasks: HashMap<Id, StepId> = HashMap::new();

    let mut working = WorkingSnapshot::new(base);
    let mut changes = ChangeCounts {
        failed: plan.diagnostics.len(),
        ..ChangeCounts::default()
    };
    let mut completed = Vec::new();
    let mut failed = Vec::new();
    let mut skipped = Vec::new();
    let mut interrupted = false;
    let mut halt: Option<EngineError> = None;

    loop {
        if !interrupted && halt.is_none() && cancel.is_cancelled() {
            interrupted = true;
        }
        let issuing = !interrupted && halt.is_none();

        if issuing {
            while in_flight.len() < parallel {
                let Some(id) = ready.pop_front() else {
                    break;
                };
                let Some(step) = plan.step(id) else {
                    continue;
                };
                status[id.0] = StepStatus::Running;
                tracing::debug!(step = %id, urn = %step.urn, op = %step.op, "step started");
                events
                    .emit(Event::StepRunning {
                        step: id,
                        urn: step.urn.clone(),
                        op: step.op,
                    })
                    .await;
                let provider = step.provider.as_deref().and_then(|r| ctx.providers.get(r));
                let task = in_flight.spawn(run_step(step.clone(), provider, dry_run));
                tasks.insert(task.id(), id);
            }
        }

        if in_flight.is_empty() {
            break;
        }

        let joined = if issuing {
            tokio::select! {
                Some(joined) = in_flight.join_next() => joined,
                _ = cancel.cancelled() => {
                    interrupted = true;
                    tracing::warn!(run_id = %run_id, "run interrupted, draining in-flight steps");
                    continue;
                }
            }
        } else {
            match in_flight.join_next().await {
                Some(joined) => joined,
                None => break,
            }
        };
        let (id, outcome) = match joined {
            Ok((id, outcome)) => {
                tasks.retain(|_, step| *step != id);
                (id, outcome)
            }
            Err(err) => {
                let Some(id) = tasks.remove(&err.id()) else {
                    continue;
                };
                let op = plan.step(id).map_or(StepOp::Same, |s| s.op);
                (id, Err(failure(op, format!("step task ended abnormally: {err}"))))
            }
        };
        let Some(step) = plan.step(id) else {
            continue;
        };

        match outcome {
            Ok(result) => {
                status[id.0] = StepStatus::Succeeded;
                changes.record(step.op);
                completed.push(id);
                tracing::info!(step = %id, urn = %step.urn, op = %step.op, "step succeeded");

                let outputs = result.as_ref().map(|s| s.outputs.clone()).unwrap_or_default();
                if !dry_run {
                    working.apply(step, result);
                    if halt.is_none() {
                        if let Err(err) = checkpoint(ctx, &working, &plugins, store).await {
                            tracing::error!(
                                run_id = %run_id,
                                error = %format_err_chain(&err),
                                "checkpoint failed, halting run"
                            );
                            halt = Some(err);
                        }
                    }
                }
                events
                    .emit(Event::StepSucceeded {
                        step: id,
                        urn: step.urn.clone(),
                        op: step.op,
                        outputs,
                    })
                    .await;

                for dependent in &dependents[id.0] {
                    let count = &mut waiting_on[dependent.0];
                    *count = count.saturating_sub(1);
                    if *count == 0 && status[dependent.0] == StepStatus::Pending {
                        ready.push_back(*dependent);
                    }
                }
            }
            Err(error) => {
                status[id.0] = StepStatus::Failed;
                changes.failed += 1;
                tracing::warn!(
                    step = %id,
                    urn = %step.urn,
                    op = %step.op,
                    error = %error,
                    "step failed"
                );
                events
                    .emit(Event::StepFailed {
                        step: id,
                        urn: step.urn.clone(),
                        op: step.op,
                        error: error.to_string(),
                    })
                    .await;
                failed.push(StepFailure {
                    step: id,
                    urn: step.urn.clone(),
                    op: step.op,
                    error,
                });

                let reason = format!("prerequisite {} {} failed", step.op, step.urn);
                let mut queue: VecDeque<StepId> = dependents[id.0].iter().copied().collect();
                while let Some(next) = queue.pop_front() {
                    if status[next.0] != StepStatus::Pending {
                        continue;
                    }
                    skip(plan, next, &reason, &mut status, &mut skipped, events).await;
                    queue.extend(dependents[next.0].iter().copied());
                }
            }
        }
    }

    let reason = if halt.is_some() {
        "run halted after a checkpoint failure"
    } else {
        "run interrupted"
    };
    for step in &plan.steps {
        if status[step.id.0] == StepStatus::Pending {
            skip(plan, step.id, reason, &mut status, &mut skipped, events).await;
        }
    }

    let run_status = if interrupted {
        RunStatus::Interrupted
    } else if halt.is_some() || changes.failed > 0 {
        RunStatus::Failed
    } else {
        RunStatus::Succeeded
    };

    events
        .emit(Event::Finished {
            run_id,
            dry_run,
            changes,
            status: run_status,
        })
        .await;
    if events.dropped() > 0 {
        tracing::warn!(
            run_id = %run_id,
            dropped = events.dropped(),
            "events dropped by a slow consumer"
        );
    }

    if let Some(err) = halt {
        return Err(err);
    }

    let snapshot = if dry_run {
        base.clone()
    } else {
        working.materialize(Manifest::new(ctx.version.clone(), plugins))
    };
    let finished_at = Timestamp::now();
    tracing::info!(
        run_id = %run_id,
        status = ?run_status,
        changes = changes.changes(),
        failed = changes.failed,
        skipped = skipped.len(),
        "run finished"
    );

    Ok(RunResult {
        run_id,
        kind: plan.kind,
        dry_run,
        status: run_status,
        changes,
        completed,
        failed,
        skipped,
        snapshot,
        started_at,
        finished_at,
    })
}

async fn skip(
    plan: &Plan,
    id: StepId,
    reason: &str,
    status: &mut [StepStatus],
    skipped: &mut Vec<StepId>,
    events: &EventSink,
) {
    let Some(step) = plan.step(id) else {
        return;
    };
    status[id.0] = StepStatus::Skipped;
    skipped.push(id);
    tracing::debug!(step = %id, urn = %step.urn, reason, "step skipped");
    events
        .emit(Event::StepSkipped {
            step: id,
            urn: step.urn.clone(),
            op: step.op,
            reason: reason.to_string(),
        })
        .await;
}

/// Stamp, optionally verify, and save the current snapshot.
async fn checkpoint(
    ctx: &RunContext,
    working: &WorkingSnapshot,
    plugins: &[PluginInfo],
    store: &dyn CheckpointStore,
) -> Result<(), EngineError> {
    let snapshot = working.materialize(Manifest::new(ctx.version.clone(), plugins.to_vec()));
    if ctx.config.verify_snapshots {
        snapshot.verify_integrity()?;
    }
    store.save(&snapshot).await?;
    Ok(())
}

/// Perform one step and return the state it leaves behind.
async fn run_step(step: Step, provider: Option<Arc<dyn Provider>>, dry_run: bool) -> StepOutcome {
    let id = step.id;
    let result = perform(&step, provider.as_deref(), dry_run).await;
    (id, result.map_err(|e| e.with_resource(&step.urn)))
}

async fn perform(
    step: &Step,
    provider: Option<&dyn Provider>,
    dry_run: bool,
) -> Result<Option<ResourceState>, ProviderError> {
    let needs_provider = step.is_custom()
        && match step.op {
            StepOp::Same => false,
            StepOp::Delete | StepOp::DeleteReplaced => !dry_run && deletes_remotely(step),
            _ => true,
        };
    let provider = match (needs_provider, provider) {
        (false, _) => None,
        (true, Some(provider)) => Some(provider),
        (true, None) => {
            let reference = step.provider.as_deref().unwrap_or("<none>");
            return Err(failure(step.op, format!("provider {reference} is not registered")));
        }
    };

    match step.op {
        StepOp::Same => {
            let (Some(old), Some(new)) = (&step.old, &step.new) else {
                return Err(failure(step.op, "step has no state"));
            };
            let mut state = new.clone();
            state.id = old.id.clone();
            state.outputs = old.outputs.clone();
            Ok(Some(created(state)))
        }
        StepOp::Create | StepOp::CreateReplacement => {
            let Some(new) = &step.new else {
                return Err(failure(step.op, "step has no desired state"));
            };
            let mut state = new.clone();
            if let Some(provider) = provider {
                let result = provider.create(&step.urn, &new.inputs, dry_run).await?;
                state.id = result.id;
                state.outputs = result.outputs;
            }
            settled(step.op, state, dry_run).map(Some)
        }
        StepOp::Update => {
            let (Some(old), Some(new)) = (&step.old, &step.new) else {
                return Err(failure(step.op, "step has no state"));
            };
            let mut state = new.clone();
            state.id = old.id.clone();
            state.outputs = match provider {
                Some(provider) => {
                    provider
                        .update(&step.urn, &old.id, &old.inputs, &new.inputs, dry_run)
                        .await?
                }
                None => old.outputs.clone(),
            };
            settled(step.op, state, dry_run).map(Some)
        }
        StepOp::Delete | StepOp::DeleteReplaced => {
            if let (Some(provider), Some(old)) = (provider, &step.old) {
                provider.delete(&step.urn, &old.id, &old.outputs).await?;
            }
            Ok(None)
        }
        StepOp::Read => {
            let Some(new) = &step.new else {
                return Err(failure(step.op, "step has no desired state"));
            };
            let mut state = new.clone();
            if let Some(provider) = provider {
                state.outputs = provider
                    .read(&step.urn, &new.id)
                    .await?
                    .ok_or_else(|| {
                        ProviderError::NotFound(format!("no resource with id {}", new.id))
                    })?;
            }
            settled(step.op, state, dry_run).map(Some)
        }
        StepOp::Refresh => {
            let Some(old) = &step.old else {
                return Err(failure(step.op, "step has no state"));
            };
            let Some(provider) = provider else {
                return Ok(Some(old.clone()));
            };
            let outputs: Option<PropertyMap> = provider.read(&step.urn, &old.id).await?;
            if outputs.is_none() {
                tracing::info!(
                    urn = %step.urn,
                    id = %old.id,
                    "resource no longer exists, dropping from state"
                );
            }
            Ok(outputs.map(|outputs| ResourceState {
                outputs,
                ..old.clone()
            }))
        }
    }
}

/// Whether deleting this record needs a provider call. Adopted resources are
/// only forgotten, and a record awaiting its successor is already gone.
fn deletes_remotely(step: &Step) -> bool {
    step.old
        .as_ref()
        .is_some_and(|old| !old.external && !old.pending_replacement)
}

fn created(mut state: ResourceState) -> ResourceState {
    state.status = ResourceStatus::Created;
    state
}

/// Mark `state` created. Outside a preview every output must be known.
fn settled(
    op: StepOp,
    state: ResourceState,
    dry_run: bool,
) -> Result<ResourceState, ProviderError> {
    if !dry_run && has_computed(&state.outputs) {
        return Err(failure(op, "provider returned unknown outputs outside a preview"));
    }
    Ok(created(state))
}

fn failure(op: StepOp, msg: impl Into<String>) -> ProviderError {
    let msg = msg.into();
    match op {
        StepOp::Create | StepOp::CreateReplacement => ProviderError::CreateFailed(msg),
        StepOp::Update | StepOp::Same => ProviderError::UpdateFailed(msg),
        StepOp::Delete | StepOp::DeleteReplaced => ProviderError::DeleteFailed(msg),
        StepOp::Read | StepOp::Refresh => ProviderError::ReadFailed(msg),
    }
}
