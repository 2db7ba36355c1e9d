#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keel_core::{PropertyMap, Snapshot, Urn, property::changed_keys};
use keel_engine::{
    BoxFuture, CancelHandle, CreateResult, DesiredGraph, DiffResult, EngineConfig, Event,
    EventPolicy, EventSink, Plan, Provider, ProviderError, ProviderRegistry, ResourceGoal,
    RunContext, RunResult, UpdateKind, execute, plan,
};
use keel_storage::{CheckpointStore, MemoryStore, load_or_empty};
use tracing_subscriber::EnvFilter;

pub const THING: &str = "test:index:Thing";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// In-memory provider that records every call as `"<op>:<name>"`.
///
/// Inputs listed in `replace_on` force replacement; any other change is an
/// in-place update. Failures, delays and cancellation triggers are keyed by
/// `"<op>:<name>"` as well.
#[derive(Default)]
pub struct FakeProvider {
    calls: Mutex<Vec<String>>,
    replace_on: Mutex<HashSet<String>>,
    failures: Mutex<HashMap<String, String>>,
    delays: Mutex<HashMap<String, Duration>>,
    cancel_on: Mutex<HashMap<String, CancelHandle>>,
    live: Mutex<HashMap<String, PropertyMap>>,
    next_id: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn replace_on(&self, key: &str) {
        self.replace_on.lock().unwrap().insert(key.to_string());
    }

    pub fn fail(&self, call: &str, msg: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(call.to_string(), msg.to_string());
    }

    pub fn delay(&self, call: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(call.to_string(), delay);
    }

    /// Request cancellation of `handle`'s run when `call` completes.
    pub fn cancel_after(&self, call: &str, handle: CancelHandle) {
        self.cancel_on
            .lock()
            .unwrap()
            .insert(call.to_string(), handle);
    }

    /// Forget a resource so reads report it gone.
    pub fn vanish(&self, id: &str) {
        self.live.lock().unwrap().remove(id);
    }

    pub fn adopt(&self, id: &str, outputs: PropertyMap) {
        self.live.lock().unwrap().insert(id.to_string(), outputs);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: String) -> Result<(), String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delays.lock().unwrap().get(&call).copied();
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(call.clone());
        if let Some(handle) = self.cancel_on.lock().unwrap().get(&call) {
            handle.cancel();
        }
        match self.failures.lock().unwrap().get(&call) {
            Some(msg) => Err(msg.clone()),
            None => Ok(()),
        }
    }
}

impl Provider for FakeProvider {
    fn name(&self) -> &str {
        "test"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn diff<'a>(
        &'a self,
        urn: &'a Urn,
        _id: &'a str,
        olds: &'a PropertyMap,
        news: &'a PropertyMap,
    ) -> BoxFuture<'a, Result<DiffResult, ProviderError>> {
        Box::pin(async move {
            self.enter(format!("diff:{}", urn.name()))
                .await
                .map_err(ProviderError::DiffFailed)?;
            let changed = changed_keys(olds, news);
            if changed.is_empty() {
                return Ok(DiffResult::same());
            }
            let replace_on = self.replace_on.lock().unwrap().clone();
            if changed.iter().any(|k| replace_on.contains(k)) {
                Ok(DiffResult::replace(changed))
            } else {
                Ok(DiffResult::update(changed))
            }
        })
    }

    fn create<'a>(
        &'a self,
        urn: &'a Urn,
        inputs: &'a PropertyMap,
        preview: bool,
    ) -> BoxFuture<'a, Result<CreateResult, ProviderError>> {
        Box::pin(async move {
            let op = if preview { "preview-create" } else { "create" };
            self.enter(format!("{op}:{}", urn.name()))
                .await
                .map_err(ProviderError::CreateFailed)?;
            if preview {
                return Ok(CreateResult {
                    id: String::new(),
                    outputs: inputs.clone(),
                });
            }
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("{}-{n}", urn.name());
            let outputs = inputs.clone();
            self.live.lock().unwrap().insert(id.clone(), outputs.clone());
            Ok(CreateResult { id, outputs })
        })
    }

    fn update<'a>(
        &'a self,
        urn: &'a Urn,
        id: &'a str,
        _olds: &'a PropertyMap,
        news: &'a PropertyMap,
        preview: bool,
    ) -> BoxFuture<'a, Result<PropertyMap, ProviderError>> {
        Box::pin(async move {
            let op = if preview { "preview-update" } else { "update" };
            self.enter(format!("{op}:{}", urn.name()))
                .await
                .map_err(ProviderError::UpdateFailed)?;
            let outputs = news.clone();
            if !preview {
                self.live.lock().unwrap().insert(id.to_string(), outputs.clone());
            }
            Ok(outputs)
        })
    }

    fn delete<'a>(
        &'a self,
        urn: &'a Urn,
        id: &'a str,
        _outputs: &'a PropertyMap,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            self.enter(format!("delete:{}", urn.name()))
                .await
                .map_err(ProviderError::DeleteFailed)?;
            self.live.lock().unwrap().remove(id);
            Ok(())
        })
    }

    fn read<'a>(
        &'a self,
        urn: &'a Urn,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<PropertyMap>, ProviderError>> {
        Box::pin(async move {
            self.enter(format!("read:{}", urn.name()))
                .await
                .map_err(ProviderError::ReadFailed)?;
            Ok(self.live.lock().unwrap().get(id).cloned())
        })
    }
}

pub fn context(provider: &Arc<FakeProvider>) -> RunContext {
    context_with(provider, EngineConfig::default())
}

pub fn context_with(provider: &Arc<FakeProvider>, config: EngineConfig) -> RunContext {
    let mut providers = ProviderRegistry::new();
    providers.register_default("test", provider.clone());
    RunContext::new(config, providers).with_version("keel/test")
}

pub fn graph() -> DesiredGraph {
    DesiredGraph::new("dev", "app")
}

pub fn thing(name: &str) -> ResourceGoal {
    ResourceGoal::new(THING, name)
}

pub fn urn(name: &str) -> Urn {
    Urn::new("dev", "app", None, THING, name)
}

pub async fn base(ctx: &RunContext, store: &MemoryStore) -> Snapshot {
    load_or_empty(store, "dev", &ctx.version).await.unwrap()
}

pub async fn plan_update(ctx: &RunContext, store: &MemoryStore, desired: &DesiredGraph) -> Plan {
    let base = base(ctx, store).await;
    plan(ctx, UpdateKind::Update, &base, desired, None)
        .await
        .unwrap()
}

/// Plan and execute `desired` for real, discarding events.
pub async fn deploy(ctx: &RunContext, store: &MemoryStore, desired: &DesiredGraph) -> RunResult {
    let base = base(ctx, store).await;
    let plan = plan(ctx, UpdateKind::Update, &base, desired, None)
        .await
        .unwrap();
    execute(ctx, &plan, &base, false, &EventSink::discard(), store)
        .await
        .unwrap()
}

/// Execute `plan` against `base`, returning the result and every event.
pub async fn execute_collecting(
    ctx: &RunContext,
    plan: &Plan,
    base: &Snapshot,
    dry_run: bool,
    store: &dyn CheckpointStore,
) -> (RunResult, Vec<Event>) {
    let (sink, mut rx) = keel_engine::channel(1024, EventPolicy::Block);
    let result = execute(ctx, plan, base, dry_run, &sink, store)
        .await
        .unwrap();
    drop(sink);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (result, events)
}

pub fn names(snapshot: &Snapshot) -> Vec<String> {
    snapshot
        .resources
        .iter()
        .map(|r| r.urn.name().to_string())
        .collect()
}
