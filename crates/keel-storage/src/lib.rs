//! keel-storage
//!
//! Checkpoint stores for stack snapshots. The engine only sees the
//! [`CheckpointStore`] trait; remote backends live behind it.

pub mod error;
pub mod file;
pub mod memory;
pub mod store;

pub use crate::error::StorageError;
pub use crate::file::FileStore;
pub use crate::memory::MemoryStore;
pub use crate::store::{BoxFuture, CheckpointStore, load_or_empty};
