use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use keel_core::Snapshot;

use crate::error::StorageError;
use crate::store::{BoxFuture, CheckpointStore};

/// In-process store that remembers every snapshot saved to it.
///
/// Useful for embedding and for asserting exactly what a run persisted.
#[derive(Default)]
pub struct MemoryStore {
    latest: Mutex<Option<Snapshot>>,
    saved: Mutex<Vec<Snapshot>>,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose last checkpoint is `snapshot`. Seeding is not a save.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            latest: Mutex::new(Some(snapshot)),
            ..Self::default()
        }
    }

    /// Number of `save` calls that succeeded.
    pub fn save_count(&self) -> usize {
        self.saved.lock().map(|s| s.len()).unwrap_or_default()
    }

    /// Every saved snapshot, oldest first.
    pub fn history(&self) -> Vec<Snapshot> {
        self.saved.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn latest(&self) -> Option<Snapshot> {
        self.latest.lock().ok().and_then(|s| s.clone())
    }

    /// Make subsequent saves fail with `StorageError::Unavailable`.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    fn record(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("saves disabled".into()));
        }
        let poisoned = |e: String| StorageError::Unavailable(format!("lock poisoned: {e}"));
        *self.latest.lock().map_err(|e| poisoned(e.to_string()))? = Some(snapshot.clone());
        self.saved
            .lock()
            .map_err(|e| poisoned(e.to_string()))?
            .push(snapshot.clone());
        Ok(())
    }
}

impl CheckpointStore for MemoryStore {
    fn save<'a>(&'a self, snapshot: &'a Snapshot) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move { self.record(snapshot) })
    }

    fn load(&self) -> BoxFuture<'_, Result<Snapshot, StorageError>> {
        Box::pin(async move {
            self.latest().ok_or_else(|| StorageError::NotFound {
                location: "memory".into(),
            })
        })
    }
}
