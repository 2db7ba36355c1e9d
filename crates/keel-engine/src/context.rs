use crate::cancel::{CancelHandle, CancelSignal};
use crate::config::EngineConfig;
use crate::provider::ProviderRegistry;

/// Tooling version stamped into every manifest this build writes.
pub const TOOL_VERSION: &str = concat!("keel/", env!("CARGO_PKG_VERSION"));

/// Everything a single run needs, passed explicitly to the planner and
/// executor. Build one per run and drop it when the run ends; nothing in the
/// engine is cached process-wide.
#[derive(Clone)]
pub struct RunContext {
    pub config: EngineConfig,
    pub providers: ProviderRegistry,
    /// Written into snapshot manifests; its hash is the magic cookie.
    pub version: String,
    cancel: CancelHandle,
}

impl RunContext {
    pub fn new(config: EngineConfig, providers: ProviderRegistry) -> Self {
        Self {
            config,
            providers,
            version: TOOL_VERSION.to_string(),
            cancel: CancelHandle::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Handle for interrupting this run, e.g. from a signal handler.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.signal()
    }
}
