//! Message log bookkeeping shared by every backend.

use crate::error::{Result, StoreError};
use crate::limits::MsgStoreLimits;
use crate::types::{Clock, Message};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;
use tracing::warn;

/// Report emitted the first time a channel drops messages to stay within
/// its count or byte quota.
pub fn dropping_msgs_report(
    subject: &str,
    msgs: usize,
    max_msgs: i64,
    bytes: u64,
    max_bytes: i64,
) -> String {
    format!(
        "WARNING: Reached limits for store {:?} (msgs={}/{} bytes={}/{}), \
         dropping old messages to make room for new ones",
        subject, msgs, max_msgs, bytes, max_bytes
    )
}

/// Why the oldest message of a channel has to go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictReason {
    MaxMsgs,
    MaxBytes,
    MaxAge,
}

impl EvictReason {
    /// Count and byte quotas make room for new messages; age does not.
    pub fn is_quota(self) -> bool {
        matches!(self, EvictReason::MaxMsgs | EvictReason::MaxBytes)
    }
}

/// Access to the oldest end of a backend's message data, for eviction.
pub trait OldestFirst {
    /// Sequence, size and timestamp of the oldest message held.
    fn oldest(&self) -> Option<(u64, u64, i64)>;

    /// Drop the oldest message.
    fn remove_oldest(&mut self) -> Result<()>;
}

/// Counters guarded by the message log lock.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MsgLogState {
    first: u64,
    last: u64,
    last_timestamp: i64,
    total_count: usize,
    total_bytes: u64,
    hit_limit: bool,
}

impl MsgLogState {
    pub fn first(&self) -> u64 {
        self.first
    }

    pub fn last(&self) -> u64 {
        self.last
    }

    pub fn last_timestamp(&self) -> i64 {
        self.last_timestamp
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn hit_limit(&self) -> bool {
        self.hit_limit
    }

    /// Sequence the backend should assign to the next stored message.
    pub fn next_sequence(&self) -> u64 {
        self.last + 1
    }
}

/// Bookkeeping for the messages of one channel.
///
/// Backends take [`MsgLog::write`] for the whole of a store or eviction and
/// call the `record_*` primitives under it, so that counters and the
/// physical data change together.
#[derive(Debug)]
pub struct MsgLog {
    subject: String,
    limits: MsgStoreLimits,
    clock: Arc<dyn Clock>,
    state: RwLock<MsgLogState>,
}

impl MsgLog {
    pub fn new(subject: impl Into<String>, limits: MsgStoreLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            subject: subject.into(),
            limits,
            clock,
            state: RwLock::new(MsgLogState::default()),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn limits(&self) -> &MsgStoreLimits {
        &self.limits
    }

    pub fn now(&self) -> i64 {
        self.clock.now_nanos()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, MsgLogState> {
        self.state.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, MsgLogState> {
        self.state.write()
    }

    /// Build the message with sequence `seq`.
    ///
    /// The timestamp is never lower than the previous one, so for M1 created
    /// before M2: `M1.sequence < M2.sequence && M1.timestamp <= M2.timestamp`.
    pub fn create_msg(&self, state: &mut MsgLogState, seq: u64, data: Vec<u8>) -> Result<Message> {
        if seq <= state.last {
            return Err(StoreError::InvalidSequence(seq, state.last));
        }
        let mut timestamp = self.clock.now_nanos();
        if state.last_timestamp > 0 && timestamp < state.last_timestamp {
            timestamp = state.last_timestamp;
        }
        state.last_timestamp = timestamp;
        Ok(Message {
            sequence: seq,
            subject: self.subject.clone(),
            data,
            timestamp,
        })
    }

    /// Account for a message the backend has stored (or replayed).
    pub fn record_stored(&self, state: &mut MsgLogState, msg: &Message) {
        if state.first == 0 {
            state.first = msg.sequence;
        }
        state.last = msg.sequence;
        state.last_timestamp = state.last_timestamp.max(msg.timestamp);
        state.total_count += 1;
        state.total_bytes += msg.size();
    }

    /// Account for the removal of the oldest message, `seq`.
    pub fn record_removed(&self, state: &mut MsgLogState, seq: u64, size: u64) {
        state.total_count = state.total_count.saturating_sub(1);
        state.total_bytes = state.total_bytes.saturating_sub(size);
        state.first = seq + 1;
    }

    /// Whether the oldest message, stamped `oldest_timestamp`, must be evicted.
    ///
    /// Count is checked before bytes, bytes before age. Count and byte quotas
    /// never evict the only remaining message.
    pub fn eviction_reason(
        &self,
        state: &MsgLogState,
        oldest_timestamp: i64,
        now: i64,
    ) -> Option<EvictReason> {
        if state.total_count == 0 {
            return None;
        }
        if state.total_count > 1 {
            if matches!(self.limits.max_msgs(), Some(max) if state.total_count > max) {
                return Some(EvictReason::MaxMsgs);
            }
            if matches!(self.limits.max_bytes(), Some(max) if state.total_bytes > max) {
                return Some(EvictReason::MaxBytes);
            }
        }
        if let Some(max_age) = self.limits.max_age() {
            let age = now.saturating_sub(oldest_timestamp);
            let max_age = i64::try_from(max_age.as_nanos()).unwrap_or(i64::MAX);
            if age >= max_age {
                return Some(EvictReason::MaxAge);
            }
        }
        None
    }

    /// Evict oldest-first until no quota is exceeded.
    ///
    /// Returns the sequence of the last evicted message, if any.
    pub fn enforce_limits<E: OldestFirst + ?Sized>(
        &self,
        state: &mut MsgLogState,
        data: &mut E,
    ) -> Result<Option<u64>> {
        let now = self.clock.now_nanos();
        let mut removed_up_to = None;
        while let Some((seq, size, timestamp)) = data.oldest() {
            let Some(reason) = self.eviction_reason(state, timestamp, now) else {
                break;
            };
            data.remove_oldest()?;
            self.evicted(state, seq, size, Some(reason));
            removed_up_to = Some(seq);
        }
        Ok(removed_up_to)
    }

    /// Sequence of the last message [`MsgLog::enforce_limits`] would evict at
    /// `now`, without evicting anything.
    ///
    /// `held` yields `(sequence, size, timestamp)` oldest first. Backends that
    /// must record an eviction before applying it plan with this, then call
    /// [`MsgLog::evict_through`] with the same `now`.
    pub fn eviction_bound(
        &self,
        state: &MsgLogState,
        now: i64,
        held: impl Iterator<Item = (u64, u64, i64)>,
    ) -> Option<u64> {
        let mut remaining = state.clone();
        let mut up_to = None;
        for (seq, size, timestamp) in held {
            if self.eviction_reason(&remaining, timestamp, now).is_none() {
                break;
            }
            self.record_removed(&mut remaining, seq, size);
            up_to = Some(seq);
        }
        up_to
    }

    /// Evict every held message up to and including `up_to`.
    pub fn evict_through<E: OldestFirst + ?Sized>(
        &self,
        state: &mut MsgLogState,
        data: &mut E,
        up_to: u64,
        now: i64,
    ) -> Result<()> {
        while let Some((seq, size, timestamp)) = data.oldest() {
            if seq > up_to {
                break;
            }
            let reason = self.eviction_reason(state, timestamp, now);
            data.remove_oldest()?;
            self.evicted(state, seq, size, reason);
        }
        Ok(())
    }

    fn evicted(&self, state: &mut MsgLogState, seq: u64, size: u64, reason: Option<EvictReason>) {
        self.record_removed(state, seq, size);
        if matches!(reason, Some(r) if r.is_quota()) && !state.hit_limit {
            state.hit_limit = true;
            warn!(
                "{}",
                dropping_msgs_report(
                    &self.subject,
                    state.total_count,
                    self.limits.max_msgs,
                    state.total_bytes,
                    self.limits.max_bytes,
                )
            );
        }
    }

    /// Sequence of the first message stamped at or after `timestamp`.
    ///
    /// `messages` yields `(sequence, timestamp)` of the held messages in
    /// ascending order.
    pub fn sequence_from_timestamp(
        &self,
        state: &MsgLogState,
        timestamp: i64,
        mut messages: impl Iterator<Item = (u64, i64)>,
    ) -> u64 {
        if state.first == 0 {
            return 0;
        }
        if state.total_count == 0 || timestamp > state.last_timestamp {
            return state.last + 1;
        }
        messages
            .find(|(_, ts)| *ts >= timestamp)
            .map(|(seq, _)| seq)
            .unwrap_or(state.last + 1)
    }

    /// Number of messages and bytes held.
    pub fn state(&self) -> (usize, u64) {
        let state = self.state.read();
        (state.total_count, state.total_bytes)
    }

    pub fn first_sequence(&self) -> u64 {
        self.state.read().first
    }

    pub fn last_sequence(&self) -> u64 {
        self.state.read().last
    }

    pub fn first_and_last_sequence(&self) -> (u64, u64) {
        let state = self.state.read();
        (state.first, state.last)
    }

    /// Whether the channel ever had to drop messages for its quotas.
    pub fn hit_limit(&self) -> bool {
        self.state.read().hit_limit
    }
}

/// Physical message storage of one channel.
///
/// Implementations must keep the [`MsgLog`] counters in step with their data:
/// [`MsgLog::record_stored`] on every store, then [`MsgLog::enforce_limits`]
/// (or [`MsgLog::eviction_bound`] and [`MsgLog::evict_through`]) so that
/// every eviction goes through [`MsgLog::record_removed`].
pub trait MsgStore: Send + Sync {
    /// The shared bookkeeping.
    fn msg_log(&self) -> &MsgLog;

    /// Store `data` as a new message and return its sequence.
    fn store(&self, data: &[u8]) -> Result<u64>;

    /// The message with sequence `seq`, if still held.
    fn lookup(&self, seq: u64) -> Result<Option<Message>>;

    fn first_msg(&self) -> Result<Option<Message>>;

    fn last_msg(&self) -> Result<Option<Message>>;

    /// Sequence of the first message whose timestamp is `>= timestamp`.
    fn sequence_from_timestamp(&self, timestamp: i64) -> Result<u64>;

    /// Persist anything buffered.
    fn flush(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    /// Number of messages and bytes held.
    fn state(&self) -> Result<(usize, u64)> {
        Ok(self.msg_log().state())
    }

    fn first_sequence(&self) -> Result<u64> {
        Ok(self.msg_log().first_sequence())
    }

    fn last_sequence(&self) -> Result<u64> {
        Ok(self.msg_log().last_sequence())
    }

    fn first_and_last_sequence(&self) -> Result<(u64, u64)> {
        Ok(self.msg_log().first_and_last_sequence())
    }
}
