//! Update orchestration: preview, confirm, then execute.
//!
//! The preview and the real run are separate runs. Each evaluates the
//! desired state, loads the stored snapshot and plans afresh, so a
//! non-deterministic program can plan differently the second time. Pinning
//! the real run to earlier expectations (an explicit plan, or the preview's
//! own plan) turns such drift into a planning error instead.

use keel_core::Snapshot;
use keel_storage::{CheckpointStore, load_or_empty};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::context::RunContext;
use crate::error::EngineError;
use crate::events::{Event, EventSink};
use crate::executor::{RunResult, execute};
use crate::goal::{DesiredGraph, DesiredSource};
use crate::plan::{Plan, PlanExpectations, UpdateKind, plan};
use crate::provider::BoxFuture;
use crate::step::StepOp;
use crate::summary::ChangeCounts;

/// Human-readable label for a run, e.g. "Previewing update" or "Destroying".
pub fn action_label(kind: UpdateKind, dry_run: bool) -> String {
    if dry_run || kind == UpdateKind::Preview {
        let subject = match kind {
            UpdateKind::Preview | UpdateKind::Update => "update",
            UpdateKind::Refresh => "refresh",
            UpdateKind::Destroy => "destroy",
        };
        return format!("Previewing {subject}");
    }
    match kind {
        UpdateKind::Preview => "Previewing",
        UpdateKind::Update => "Updating",
        UpdateKind::Refresh => "Refreshing",
        UpdateKind::Destroy => "Destroying",
    }
    .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmChoice {
    Yes,
    No,
    /// Show the previewed changes, then ask again.
    Details,
}

/// What the user is asked before a real run.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmPrompt {
    pub kind: UpdateKind,
    pub question: String,
    /// Informational lines shown with the question.
    pub notes: Vec<String>,
    pub choices: Vec<ConfirmChoice>,
    /// Planned changes, when a preview ran.
    pub planned: Option<ChangeCounts>,
}

/// Asks whether to proceed. Implemented by the interactive front end.
pub trait Confirmer: Send + Sync {
    fn confirm<'a>(&'a self, prompt: &'a ConfirmPrompt)
    -> BoxFuture<'a, Result<ConfirmChoice, EngineError>>;

    /// Present the rendered preview details after a `Details` answer.
    fn show_details<'a>(&'a self, details: &'a str) -> BoxFuture<'a, ()>;
}

/// Approves everything without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl Confirmer for AutoApprove {
    fn confirm<'a>(
        &'a self,
        _prompt: &'a ConfirmPrompt,
    ) -> BoxFuture<'a, Result<ConfirmChoice, EngineError>> {
        Box::pin(async { Ok(ConfirmChoice::Yes) })
    }

    fn show_details<'a>(&'a self, _details: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    pub auto_approve: bool,
    pub skip_preview: bool,
    /// Constrain the real run to the plan the preview produced.
    pub reuse_preview_plan: bool,
    /// Expectations from an earlier plan that both runs must match.
    pub plan: Option<PlanExpectations>,
}

impl UpdateOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            auto_approve: config.auto_approve,
            skip_preview: config.skip_preview,
            reuse_preview_plan: config.reuse_preview_plan,
            plan: None,
        }
    }
}

/// A completed preview and the user's answer to it.
#[derive(Debug, Clone)]
pub struct Previewed {
    pub plan: Plan,
    pub result: RunResult,
    /// Whether the real run may proceed. Always `false` for a
    /// [`UpdateKind::Preview`], which never proceeds.
    pub approved: bool,
}

#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    /// A preview-only run finished.
    Previewed(RunResult),
    /// The user said no. Nothing was changed.
    Declined,
    Applied(RunResult),
}

/// Preview `kind` and ask for confirmation unless auto-approving.
///
/// Preview events are forwarded to `events` and also kept for rendering
/// details. The preview checks its own copy of `opts.plan`.
pub async fn preview_then_prompt(
    ctx: &RunContext,
    kind: UpdateKind,
    source: &dyn DesiredSource,
    store: &dyn CheckpointStore,
    events: &EventSink,
    confirmer: &dyn Confirmer,
    opts: &UpdateOptions,
) -> Result<Previewed, EngineError> {
    ctx.config.validate()?;
    let desired = source.evaluate().await?;
    let base = load_base(ctx, store, &desired).await?;
    let mut expectations = opts.plan.clone();
    let plan = plan(ctx, kind, &base, &desired, expectations.as_mut()).await?;

    let (sink, mut rx) = ctx.config.event_channel();
    let run = async {
        let result = execute(ctx, &plan, &base, true, &sink, store).await;
        drop(sink);
        result
    };
    let collect = async {
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            events.emit(event.clone()).await;
            seen.push(event);
        }
        seen
    };
    let (result, seen) = tokio::join!(run, collect);
    let result = result?;

    if kind == UpdateKind::Preview {
        return Ok(Previewed {
            plan,
            result,
            approved: false,
        });
    }
    if opts.auto_approve {
        return Ok(Previewed {
            plan,
            result,
            approved: true,
        });
    }

    let mut notes = Vec::new();
    if kind == UpdateKind::Update && plan.steps.is_empty() {
        notes.push("There are no resources in your stack.".to_string());
    }
    let prompt = confirm_prompt(kind, false, notes, Some(result.changes));
    let approved = ask(confirmer, &prompt, &seen).await?;
    Ok(Previewed {
        plan,
        result,
        approved,
    })
}

/// Preview, confirm, then run `kind` for real.
///
/// The real run is constrained by `opts.plan` when given (the original
/// expectations, not the copy the preview consumed); otherwise by the
/// preview's plan when `reuse_preview_plan` is set; otherwise it plans
/// freely.
pub async fn preview_then_prompt_then_execute(
    ctx: &RunContext,
    kind: UpdateKind,
    source: &dyn DesiredSource,
    store: &dyn CheckpointStore,
    events: &EventSink,
    confirmer: &dyn Confirmer,
    opts: UpdateOptions,
) -> Result<ApplyOutcome, EngineError> {
    let mut expectations = if !opts.skip_preview || kind == UpdateKind::Preview {
        let original = opts.plan.clone();
        let previewed =
            preview_then_prompt(ctx, kind, source, store, events, confirmer, &opts).await?;
        if kind == UpdateKind::Preview {
            return Ok(ApplyOutcome::Previewed(previewed.result));
        }
        if !previewed.approved {
            return Ok(ApplyOutcome::Declined);
        }
        match original {
            Some(original) => Some(original),
            None if opts.reuse_preview_plan => Some(previewed.plan.expectations()),
            None => None,
        }
    } else {
        if !opts.auto_approve {
            let prompt = confirm_prompt(kind, true, Vec::new(), None);
            if !ask(confirmer, &prompt, &[]).await? {
                return Ok(ApplyOutcome::Declined);
            }
        }
        opts.plan
    };

    let result = apply(ctx, kind, source, store, events, expectations.as_mut()).await?;
    Ok(ApplyOutcome::Applied(result))
}

/// Run `kind` for real without previewing or prompting.
pub async fn apply(
    ctx: &RunContext,
    kind: UpdateKind,
    source: &dyn DesiredSource,
    store: &dyn CheckpointStore,
    events: &EventSink,
    expectations: Option<&mut PlanExpectations>,
) -> Result<RunResult, EngineError> {
    ctx.config.validate()?;
    let desired = source.evaluate().await?;
    let base = load_base(ctx, store, &desired).await?;
    let plan = plan(ctx, kind, &base, &desired, expectations).await?;
    tracing::info!(label = %action_label(kind, false), stack = %desired.stack, "starting run");
    execute(ctx, &plan, &base, false, events, store).await
}

async fn load_base(
    ctx: &RunContext,
    store: &dyn CheckpointStore,
    desired: &DesiredGraph,
) -> Result<Snapshot, EngineError> {
    Ok(load_or_empty(store, &desired.stack, &ctx.version).await?)
}

fn confirm_prompt(
    kind: UpdateKind,
    skipped_preview: bool,
    mut notes: Vec<String>,
    planned: Option<ChangeCounts>,
) -> ConfirmPrompt {
    let warning = if skipped_preview { " without a preview" } else { "" };
    let subject = match kind {
        UpdateKind::Preview | UpdateKind::Update => "update",
        UpdateKind::Refresh => "refresh",
        UpdateKind::Destroy => "destroy",
    };
    if kind == UpdateKind::Refresh {
        notes.push(
            "No resources will be modified as part of this refresh; just your stack's state will be."
                .to_string(),
        );
    }
    let mut choices = vec![ConfirmChoice::Yes, ConfirmChoice::No];
    if !skipped_preview {
        choices.push(ConfirmChoice::Details);
    }
    ConfirmPrompt {
        kind,
        question: format!("Do you want to perform this {subject}{warning}?"),
        notes,
        choices,
        planned,
    }
}

async fn ask(
    confirmer: &dyn Confirmer,
    prompt: &ConfirmPrompt,
    seen: &[Event],
) -> Result<bool, EngineError> {
    loop {
        match confirmer.confirm(prompt).await? {
            ConfirmChoice::Yes => return Ok(true),
            ConfirmChoice::No => {
                tracing::info!(kind = %prompt.kind, "confirmation declined, not proceeding");
                return Ok(false);
            }
            ConfirmChoice::Details => {
                let details = render_details(seen);
                confirmer.show_details(&details).await;
            }
        }
    }
}

/// Render preview events as a change list, outputs last.
pub fn render_details(events: &[Event]) -> String {
    let mut changes = Vec::new();
    let mut outputs = Vec::new();

    for event in events {
        match event {
            Event::StepPending { urn, op, .. } if *op != StepOp::Same => {
                changes.push(format!("{} {op} {urn}", symbol(*op)));
            }
            Event::StepSucceeded {
                urn, op, outputs: props, ..
            } if *op != StepOp::Same && !props.is_empty() => {
                let mut block = format!("outputs of {urn}:");
                for (key, value) in props {
                    block.push_str(&format!("\n    {key}: {}", value.display()));
                }
                outputs.push(block);
            }
            _ => {}
        }
    }

    changes.extend(outputs);
    changes.join("\n").trim().to_string()
}

fn symbol(op: StepOp) -> &'static str {
    match op {
        StepOp::Same => " ",
        StepOp::Create => "+",
        StepOp::Update | StepOp::Refresh => "~",
        StepOp::Delete => "-",
        StepOp::CreateReplacement => "++",
        StepOp::DeleteReplaced => "--",
        StepOp::Read => ">",
    }
}
