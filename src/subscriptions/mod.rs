//! Per-channel subscription registries.
//!
//! [`SubRegistry`] owns what every backend shares:
//! - the per-channel subscription quota
//! - monotonic, never reused subscription IDs
//! - the live subscription count
//!
//! Backends compose it and implement [`SubStore`] for persistence;
//! [`SubTable`] is the record table the bundled backends keep.

mod registry;
mod table;

pub use registry::{SubCounters, SubRegistry, SubStore};
pub use table::SubTable;
