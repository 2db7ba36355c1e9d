use std::future::Future;
use std::pin::Pin;

use keel_core::Snapshot;

use crate::error::StorageError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Durable home of a stack's snapshot.
///
/// The engine saves after every completed step of a real run, so a crash
/// loses at most the step that was in flight. Methods return boxed futures
/// for dyn compatibility.
pub trait CheckpointStore: Send + Sync {
    /// Persist `snapshot`, replacing whatever was stored before.
    fn save<'a>(&'a self, snapshot: &'a Snapshot) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Load the last saved snapshot. `StorageError::NotFound` means the stack
    /// has never been checkpointed.
    fn load(&self) -> BoxFuture<'_, Result<Snapshot, StorageError>>;
}

/// Load the stored snapshot, or start an empty one for a fresh stack.
pub async fn load_or_empty(
    store: &dyn CheckpointStore,
    stack: &str,
    version: &str,
) -> Result<Snapshot, StorageError> {
    match store.load().await {
        Ok(snapshot) => Ok(snapshot),
        Err(StorageError::NotFound { location }) => {
            tracing::debug!(%location, stack, "no checkpoint found, starting fresh");
            Ok(Snapshot::empty(stack, version))
        }
        Err(e) => Err(e),
    }
}
