//! In-memory backend. Nothing survives a restart.

mod msgs;
mod store;
mod subs;

pub use msgs::MemoryMsgStore;
pub use store::{MemoryStore, MEMORY_STORE_NAME};
pub use subs::MemorySubStore;
