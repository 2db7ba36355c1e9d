//! keel-engine
//!
//! Plans and executes infrastructure changes. Given the stored snapshot of a
//! stack and the desired graph from an evaluator, the engine computes a
//! dependency-ordered plan, runs it against providers with bounded
//! parallelism, and checkpoints a valid snapshot after every step.
//!
//! Public API:
//! - [`plan()`] - diff base against desired and link the steps
//! - [`execute()`] - run a plan, emitting [`Event`]s and saving checkpoints
//! - [`preview_then_prompt()`] - dry-run a plan and ask whether to proceed
//! - [`preview_then_prompt_then_execute()`] - the full update flow
//! - [`load_config()`] / [`save_config()`] - versioned engine settings

pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod goal;
pub mod orchestrate;
pub mod plan;
pub mod provider;
pub mod step;
pub mod summary;
mod working;

pub use crate::cancel::{CancelHandle, CancelSignal};
pub use crate::config::{CURRENT_VERSION, EngineConfig, load_config, parse_config, save_config};
pub use crate::context::{RunContext, TOOL_VERSION};
pub use crate::error::{ConfigError, EngineError, PlanError, ProviderError, format_err_chain};
pub use crate::events::{Event, EventPolicy, EventSink, channel};
pub use crate::executor::{RunResult, RunStatus, StepFailure, execute};
pub use crate::goal::{DesiredGraph, DesiredSource, ResourceGoal};
pub use crate::orchestrate::{
    ApplyOutcome, AutoApprove, ConfirmChoice, ConfirmPrompt, Confirmer, Previewed, UpdateOptions,
    action_label, apply, preview_then_prompt, preview_then_prompt_then_execute, render_details,
};
pub use crate::plan::{Plan, PlanDiagnostic, PlanExpectations, UpdateKind, plan};
pub use crate::provider::{
    BoxFuture, CreateResult, DiffKind, DiffResult, Provider, ProviderRegistry, resolve_reference,
};
pub use crate::step::{ReplaceStrategy, Step, StepId, StepOp, StepStatus};
pub use crate::summary::ChangeCounts;
