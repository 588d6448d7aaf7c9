//! In-memory message store.

use crate::error::{Result, StoreError};
use crate::messages::{MsgLog, MsgStore, OldestFirst};
use crate::types::Message;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Default)]
struct MemMsgs {
    msgs: BTreeMap<u64, Message>,
    closed: bool,
}

impl OldestFirst for MemMsgs {
    fn oldest(&self) -> Option<(u64, u64, i64)> {
        self.msgs
            .first_key_value()
            .map(|(seq, m)| (*seq, m.size(), m.timestamp))
    }

    fn remove_oldest(&mut self) -> Result<()> {
        self.msgs.pop_first();
        Ok(())
    }
}

/// Messages of one channel, held in a map ordered by sequence.
///
/// Lock order: the [`MsgLog`] guard, then the message map.
pub struct MemoryMsgStore {
    log: MsgLog,
    msgs: RwLock<MemMsgs>,
}

impl MemoryMsgStore {
    pub fn new(log: MsgLog) -> Self {
        Self {
            log,
            msgs: RwLock::new(MemMsgs::default()),
        }
    }

    /// Drop messages past the channel's maximum age. Returns how many went.
    pub fn expire(&self) -> Result<usize> {
        let mut state = self.log.write();
        let mut msgs = self.msgs.write();
        let before = state.total_count();
        self.log.enforce_limits(&mut state, &mut *msgs)?;
        Ok(before - state.total_count())
    }
}

impl MsgStore for MemoryMsgStore {
    fn msg_log(&self) -> &MsgLog {
        &self.log
    }

    fn store(&self, data: &[u8]) -> Result<u64> {
        let mut state = self.log.write();
        let mut msgs = self.msgs.write();
        if msgs.closed {
            return Err(StoreError::Closed);
        }
        let seq = state.next_sequence();
        let msg = self.log.create_msg(&mut state, seq, data.to_vec())?;
        self.log.record_stored(&mut state, &msg);
        msgs.msgs.insert(seq, msg);
        self.log.enforce_limits(&mut state, &mut *msgs)?;
        Ok(seq)
    }

    fn lookup(&self, seq: u64) -> Result<Option<Message>> {
        Ok(self.msgs.read().msgs.get(&seq).cloned())
    }

    fn first_msg(&self) -> Result<Option<Message>> {
        Ok(self.msgs.read().msgs.first_key_value().map(|(_, m)| m.clone()))
    }

    fn last_msg(&self) -> Result<Option<Message>> {
        Ok(self.msgs.read().msgs.last_key_value().map(|(_, m)| m.clone()))
    }

    fn sequence_from_timestamp(&self, timestamp: i64) -> Result<u64> {
        let state = self.log.read();
        let msgs = self.msgs.read();
        Ok(self.log.sequence_from_timestamp(
            &state,
            timestamp,
            msgs.msgs.values().map(|m| (m.sequence, m.timestamp)),
        ))
    }

    /// Nothing is buffered.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.msgs.write().closed = true;
        Ok(())
    }
}
