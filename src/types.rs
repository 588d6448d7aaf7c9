//! Core types for the channel store.

use crate::store::ChannelEntry;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque data a caller attaches to a channel or client.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Source of wall-clock time, in nanoseconds since the Unix epoch.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_nanos(&self) -> i64;
}

/// The system wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> i64 {
        nanos_since_epoch(SystemTime::now())
    }
}

/// Nanoseconds from the Unix epoch to `time`, negative before it. Saturates
/// at the ends of the `i64` range.
fn nanos_since_epoch(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_nanos())
            .map(|n| -n)
            .unwrap_or(i64::MIN),
    }
}

/// A clock that only moves when told to. Can move backward.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(start: i64) -> Self {
        ManualClock(AtomicI64::new(start))
    }

    pub fn set(&self, nanos: i64) {
        self.0.store(nanos, Ordering::SeqCst);
    }

    pub fn advance(&self, nanos: i64) {
        self.0.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// A single message stored in a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Position in the channel (assigned by the backend).
    pub sequence: u64,

    /// Channel the message belongs to.
    pub subject: String,

    /// Application payload.
    pub data: Vec<u8>,

    /// Nanoseconds since the Unix epoch, never lower than the previous message's.
    pub timestamp: i64,
}

impl Message {
    /// Size accounted against the byte quota.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Identity of a connected client.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub hb_inbox: String,
}

/// A registered client.
#[derive(Clone)]
pub struct Client {
    pub info: ClientInfo,
    pub user_data: Option<UserData>,
}

impl Client {
    pub fn new(id: impl Into<String>, hb_inbox: impl Into<String>, user_data: Option<UserData>) -> Self {
        Self {
            info: ClientInfo {
                id: id.into(),
                hb_inbox: hb_inbox.into(),
            },
            user_data,
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.info.id)
            .field("hb_inbox", &self.info.hb_inbox)
            .field("user_data", &self.user_data.is_some())
            .finish()
    }
}

/// Persisted state of a subscription.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubState {
    /// Assigned by the subscription registry on creation.
    pub id: u64,
    pub client_id: String,
    pub inbox: String,
    pub ack_inbox: String,
    pub durable_name: String,
    pub queue_group: String,
    pub max_in_flight: u32,
    pub ack_wait_secs: u32,
    /// Sequence of the last message sent to this subscription.
    pub last_sent: u64,
}

/// Server information a durable store keeps across restarts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub cluster_id: String,
    pub discover_prefix: String,
    pub publish: String,
    pub subscribe: String,
    pub unsubscribe: String,
    pub close: String,
}

/// A subscription restored from durable storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveredSubscription {
    pub sub: SubState,
    /// Sequences sent but not yet acknowledged, in ascending order.
    pub pending: Vec<u64>,
}

/// A channel restored from durable storage.
#[derive(Clone, Debug)]
pub struct RecoveredChannel {
    pub channel: ChannelEntry,
    pub subscriptions: Vec<RecoveredSubscription>,
}

/// Everything a durable store restored on startup.
#[derive(Clone, Debug)]
pub struct RecoveredState {
    pub info: ServerInfo,
    pub clients: Vec<Arc<Client>>,
    pub channels: HashMap<String, RecoveredChannel>,
}
