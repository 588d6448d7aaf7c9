//! Subscription ID allocation and per-channel subscription quota.

use crate::error::{Result, StoreError};
use crate::limits::SubStoreLimits;
use crate::types::SubState;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Counters guarded by the registry lock.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubCounters {
    subs_count: usize,
    max_sub_id: u64,
}

impl SubCounters {
    pub fn subs_count(&self) -> usize {
        self.subs_count
    }

    pub fn max_sub_id(&self) -> u64 {
        self.max_sub_id
    }
}

/// Bookkeeping for the subscriptions of one channel.
#[derive(Debug)]
pub struct SubRegistry {
    subject: String,
    limits: SubStoreLimits,
    counters: RwLock<SubCounters>,
}

impl SubRegistry {
    pub fn new(subject: impl Into<String>, limits: SubStoreLimits) -> Self {
        Self {
            subject: subject.into(),
            limits,
            counters: RwLock::new(SubCounters::default()),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn limits(&self) -> &SubStoreLimits {
        &self.limits
    }

    pub fn read(&self) -> RwLockReadGuard<'_, SubCounters> {
        self.counters.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, SubCounters> {
        self.counters.write()
    }

    /// Assign the next subscription ID to `sub`.
    pub fn create_sub(&self, sub: &mut SubState) -> Result<()> {
        let mut counters = self.counters.write();
        self.create_sub_locked(&mut counters, sub)
    }

    /// [`SubRegistry::create_sub`] for callers already holding the write guard.
    pub fn create_sub_locked(&self, counters: &mut SubCounters, sub: &mut SubState) -> Result<()> {
        if matches!(self.limits.max_subscriptions(), Some(max) if counters.subs_count >= max) {
            return Err(StoreError::TooManySubscriptions);
        }
        counters.max_sub_id += 1;
        counters.subs_count += 1;
        sub.id = counters.max_sub_id;
        Ok(())
    }

    /// Account for a deleted subscription. IDs are never handed out again.
    pub fn delete_sub(&self, _sub_id: u64) {
        let mut counters = self.counters.write();
        self.delete_sub_locked(&mut counters);
    }

    pub fn delete_sub_locked(&self, counters: &mut SubCounters) {
        counters.subs_count = counters.subs_count.saturating_sub(1);
    }

    /// Account for a subscription replayed from durable storage. Its ID is
    /// kept and the allocator moves past it.
    pub fn restore_locked(&self, counters: &mut SubCounters, sub: &SubState) {
        counters.subs_count += 1;
        counters.max_sub_id = counters.max_sub_id.max(sub.id);
    }

    pub fn subs_count(&self) -> usize {
        self.counters.read().subs_count
    }

    pub fn max_sub_id(&self) -> u64 {
        self.counters.read().max_sub_id
    }
}

/// Physical subscription storage of one channel.
///
/// Implementations allocate IDs through [`SubRegistry::create_sub_locked`]
/// while holding [`SubRegistry::write`], and call
/// [`SubRegistry::delete_sub_locked`] for every deletion they accept.
pub trait SubStore: Send + Sync {
    /// The shared bookkeeping.
    fn registry(&self) -> &SubRegistry;

    /// Record a new subscription; its ID is written into `sub.id`.
    fn create_sub(&self, sub: &mut SubState) -> Result<()>;

    fn update_sub(&self, sub: &SubState) -> Result<()>;

    /// Invalidate a subscription.
    fn delete_sub(&self, sub_id: u64) -> Result<()>;

    /// Record that message `seq` was sent to the subscription.
    fn add_seq_pending(&self, sub_id: u64, seq: u64) -> Result<()>;

    /// Record that the subscription acknowledged message `seq`.
    fn ack_seq_pending(&self, sub_id: u64, seq: u64) -> Result<()>;

    fn flush(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn subs_count(&self) -> usize {
        self.registry().subs_count()
    }
}
