use keel_core::{IntegrityError, Urn};
use keel_storage::StorageError;
use serde::Serialize;
use thiserror::Error;

use crate::step::StepOp;

/// A provider operation failed. Always scoped to one resource: it fails that
/// resource's step and skips its dependents, never the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ProviderError {
    #[error("diff failed: {0}")]
    DiffFailed(String),

    #[error("resource creation failed: {0}")]
    CreateFailed(String),

    #[error("resource update failed: {0}")]
    UpdateFailed(String),

    #[error("resource deletion failed: {0}")]
    DeleteFailed(String),

    #[error("resource read failed: {0}")]
    ReadFailed(String),

    #[error("resource not found: {0}")]
    NotFound(String),
}

impl ProviderError {
    /// Prepend resource identity to the error message.
    pub fn with_resource(self, urn: &Urn) -> Self {
        let label = format!("{} ({})", urn.type_token(), urn.name());
        match self {
            Self::DiffFailed(msg) => Self::DiffFailed(format!("{label}: {msg}")),
            Self::CreateFailed(msg) => Self::CreateFailed(format!("{label}: {msg}")),
            Self::UpdateFailed(msg) => Self::UpdateFailed(format!("{label}: {msg}")),
            Self::DeleteFailed(msg) => Self::DeleteFailed(format!("{label}: {msg}")),
            Self::ReadFailed(msg) => Self::ReadFailed(format!("{label}: {msg}")),
            Self::NotFound(msg) => Self::NotFound(format!("{label}: {msg}")),
        }
    }
}

/// Planning cannot produce a valid plan. Nothing is executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("duplicate resource URN in desired state: {urn}")]
    DuplicateUrn { urn: Urn },

    #[error("resource {urn} refers to parent {parent} which is not declared before it")]
    MissingParent { urn: Urn, parent: Urn },

    #[error("resource {urn} depends on {dependency} which is not declared before it")]
    MissingDependency { urn: Urn, dependency: Urn },

    #[error("no provider registered for {reference} (needed by {urn})")]
    UnknownProvider { urn: Urn, reference: String },

    #[error("diff of {urn} failed and other resources depend on it: {source}")]
    DiffFailed { urn: Urn, source: ProviderError },

    #[error("resource {urn} is protected and cannot be {action}")]
    Protected { urn: Urn, action: &'static str },

    #[error("plan contains a dependency cycle through {urn}")]
    Cycle { urn: Urn },

    #[error("resource {urn}: planned {expected}, but the new plan wants {actual}")]
    Divergence {
        urn: Urn,
        expected: String,
        actual: StepOp,
    },

    #[error("resource {urn}: planned {expected} was not part of the new plan")]
    MissingPlannedStep { urn: Urn, expected: StepOp },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("config_version {found} is newer than this build supports ({supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("config is not a JSON object")]
    NotAnObject,

    #[error("invalid config value: {0}")]
    Invalid(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run-aborting failures. Step-level provider errors never surface here;
/// they are recorded in the run result instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("snapshot integrity check failed: {0}")]
    Corruption(#[from] IntegrityError),

    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("checkpoint error: {0}")]
    Storage(#[from] StorageError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("desired state evaluation failed: {0}")]
    Evaluation(String),

    #[error("confirmation cancelled, not proceeding: {0}")]
    Prompt(String),
}

/// Walk the full error chain and join all causes into one string.
///
/// Provider client errors often have terse `Display` impls but useful detail
/// in the source chain.
pub fn format_err_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}
