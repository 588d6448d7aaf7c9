//! # Channel Store
//!
//! Persistence for a streaming message server: channels of sequenced
//! messages, subscriptions with pending acknowledgements, and registered
//! clients, behind backend-agnostic traits.
//!
//! ## Core Concepts
//!
//! - **Limits**: global quotas plus per-channel overrides keyed by subject
//!   patterns (`orders.*`, `>`); the narrowest matching override wins
//! - **Channels**: a [`MsgStore`] and a [`SubStore`] per literal subject
//! - **Backends**: [`MemoryStore`] and [`FileStore`], both built on the
//!   shared [`GenericStore`], [`MsgLog`] and [`SubRegistry`] bookkeeping
//!
//! ## Example
//!
//! ```ignore
//! use channel_store::{MemoryStore, Store, StoreLimits};
//!
//! let limits = StoreLimits::from_json(r#"{
//!     "max_msgs": 1000,
//!     "per_channel": { "orders.*": { "max_msgs": 10 } }
//! }"#)?;
//! let store = MemoryStore::new(Some(&limits))?;
//!
//! let (channel, _) = store.create_channel("orders.created", None)?;
//! let seq = channel.msgs.store(b"hello")?;
//! assert_eq!(channel.msgs.lookup(seq)?.unwrap().data, b"hello");
//! ```

pub mod error;
pub mod file;
pub mod limits;
pub mod memory;
pub mod messages;
pub mod resolver;
pub mod store;
pub mod subject;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{ErrorKind, Result, StoreError};
pub use file::{FileMsgStore, FileStore, FileStoreConfig, FileSubStore, FILE_STORE_NAME};
pub use limits::{ChannelLimits, MsgStoreLimits, StoreLimits, SubStoreLimits};
pub use memory::{MemoryMsgStore, MemoryStore, MemorySubStore, MEMORY_STORE_NAME};
pub use messages::{MsgLog, MsgLogState, MsgStore, OldestFirst};
pub use resolver::LimitsResolver;
pub use store::{check_channel_name, ChannelEntry, GenericStore, Store, StoreState, ALL_CHANNELS};
pub use subject::Sublist;
pub use subscriptions::{SubCounters, SubRegistry, SubStore, SubTable};
pub use types::*;
