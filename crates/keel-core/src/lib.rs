//! keel-core
//!
//! Pure domain types for deployed infrastructure: URNs, property values,
//! resource states, snapshots and their integrity rules. No I/O and no
//! provider knowledge; this is the shared vocabulary of the engine and the
//! checkpoint stores.

pub mod error;
pub mod integrity;
pub mod property;
pub mod resource;
pub mod snapshot;
pub mod urn;

pub use crate::error::CoreError;
pub use crate::integrity::IntegrityError;
pub use crate::property::{PropertyMap, PropertyValue};
pub use crate::resource::{ResourceState, ResourceStatus};
pub use crate::snapshot::{Manifest, PluginInfo, Snapshot, UrnIndex};
pub use crate::urn::Urn;
