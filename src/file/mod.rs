//! File backend: channels, subscriptions and clients survive restarts.
//!
//! Layout under the root directory:
//!
//! ```text
//! LOCK            exclusive writer lock
//! server.dat      server information
//! clients.dat     client registrations
//! <hex(channel)>/
//!     msgs.dat    stored messages and eviction marks
//!     subs.dat    subscription changes
//! ```

mod framed;
mod msgs;
mod store;
mod subs;

pub use msgs::FileMsgStore;
pub use store::{FileStore, FileStoreConfig, FILE_STORE_NAME};
pub use subs::FileSubStore;
