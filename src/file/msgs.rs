//! File-backed message store.

use super::framed::FramedLog;
use crate::error::{Result, StoreError};
use crate::messages::{MsgLog, MsgStore, OldestFirst};
use crate::types::Message;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::iter;
use std::num::NonZeroUsize;
use std::path::Path;
use tracing::debug;

pub(crate) const MSGS_MAGIC: &[u8; 4] = b"MSG\0";

#[derive(Debug, Serialize, Deserialize)]
enum MsgRecord {
    Stored(Message),
    /// Every message up to and including `up_to` was evicted.
    Removed { up_to: u64 },
}

/// Where a held message lives in the file.
#[derive(Clone, Copy, Debug)]
struct MsgEntry {
    offset: u64,
    size: u64,
    timestamp: i64,
}

struct FileMsgs {
    file: FramedLog,
    index: BTreeMap<u64, MsgEntry>,
    cache: LruCache<u64, Message>,
    closed: bool,
}

impl FileMsgs {
    /// `(sequence, size, timestamp)` of the held messages, oldest first.
    fn held(&self) -> impl Iterator<Item = (u64, u64, i64)> + '_ {
        self.index
            .iter()
            .map(|(seq, e)| (*seq, e.size, e.timestamp))
    }

    fn load(&mut self, seq: u64) -> Result<Option<Message>> {
        if let Some(msg) = self.cache.get(&seq) {
            return Ok(Some(msg.clone()));
        }
        let Some(entry) = self.index.get(&seq).copied() else {
            return Ok(None);
        };
        match self.file.read_at::<MsgRecord>(entry.offset)? {
            MsgRecord::Stored(msg) if msg.sequence == seq => {
                self.cache.put(seq, msg.clone());
                Ok(Some(msg))
            }
            _ => Err(StoreError::Corruption(format!(
                "no message {} at offset {} of {}",
                seq,
                entry.offset,
                self.file.path().display()
            ))),
        }
    }
}

impl OldestFirst for FileMsgs {
    fn oldest(&self) -> Option<(u64, u64, i64)> {
        self.index
            .first_key_value()
            .map(|(seq, e)| (*seq, e.size, e.timestamp))
    }

    fn remove_oldest(&mut self) -> Result<()> {
        if let Some((seq, _)) = self.index.pop_first() {
            self.cache.pop(&seq);
        }
        Ok(())
    }
}

/// Messages of one channel in an append-only file.
///
/// Only the sequence index stays in memory; payloads are read back through
/// an LRU cache. Lock order: the [`MsgLog`] guard, then the file data.
pub struct FileMsgStore {
    log: MsgLog,
    data: Mutex<FileMsgs>,
}

impl FileMsgStore {
    /// Open the message file at `path`, replaying what it holds.
    ///
    /// Limits are enforced once after the replay, since they may be tighter
    /// than when the messages were written.
    pub fn open(
        path: impl AsRef<Path>,
        log: MsgLog,
        sync_interval: u64,
        cache_size: usize,
    ) -> Result<Self> {
        let (file, records) = FramedLog::open::<MsgRecord>(path, MSGS_MAGIC, sync_interval)?;
        let cache_size = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        let store = Self {
            log,
            data: Mutex::new(FileMsgs {
                file,
                index: BTreeMap::new(),
                cache: LruCache::new(cache_size),
                closed: false,
            }),
        };

        {
            let mut state = store.log.write();
            let mut data = store.data.lock();
            for (offset, record) in records {
                match record {
                    MsgRecord::Stored(msg) => {
                        data.index.insert(
                            msg.sequence,
                            MsgEntry {
                                offset,
                                size: msg.size(),
                                timestamp: msg.timestamp,
                            },
                        );
                        store.log.record_stored(&mut state, &msg);
                    }
                    MsgRecord::Removed { up_to } => {
                        while let Some((seq, size, _)) = data.oldest() {
                            if seq > up_to {
                                break;
                            }
                            data.remove_oldest()?;
                            store.log.record_removed(&mut state, seq, size);
                        }
                    }
                }
            }
            let now = store.log.now();
            if let Some(up_to) = store.log.eviction_bound(&state, now, data.held()) {
                data.file.append(&MsgRecord::Removed { up_to })?;
                store.log.evict_through(&mut state, &mut *data, up_to, now)?;
            }
            debug!(
                channel = store.log.subject(),
                msgs = state.total_count(),
                bytes = state.total_bytes(),
                "message file opened"
            );
        }
        Ok(store)
    }

    /// Drop messages past the channel's maximum age. Returns how many went.
    pub fn expire(&self) -> Result<usize> {
        let mut state = self.log.write();
        let mut data = self.data.lock();
        let now = self.log.now();
        let Some(up_to) = self.log.eviction_bound(&state, now, data.held()) else {
            return Ok(0);
        };
        data.file.append(&MsgRecord::Removed { up_to })?;

        let before = state.total_count();
        self.log.evict_through(&mut state, &mut *data, up_to, now)?;
        Ok(before - state.total_count())
    }
}

impl MsgStore for FileMsgStore {
    fn msg_log(&self) -> &MsgLog {
        &self.log
    }

    fn store(&self, payload: &[u8]) -> Result<u64> {
        let mut state = self.log.write();
        let mut data = self.data.lock();
        if data.closed {
            return Err(StoreError::Closed);
        }

        // Counters and index only change once the message and its eviction
        // mark are both in the file.
        let mut stored = state.clone();
        let seq = stored.next_sequence();
        let msg = self.log.create_msg(&mut stored, seq, payload.to_vec())?;
        self.log.record_stored(&mut stored, &msg);
        let entry = MsgEntry {
            offset: 0,
            size: msg.size(),
            timestamp: msg.timestamp,
        };

        let now = self.log.now();
        let held = data
            .held()
            .chain(iter::once((seq, entry.size, entry.timestamp)));
        let evict_up_to = self.log.eviction_bound(&stored, now, held);

        let mut records = vec![MsgRecord::Stored(msg.clone())];
        if let Some(up_to) = evict_up_to {
            records.push(MsgRecord::Removed { up_to });
        }
        let offset = data.file.append_all(&records)?;

        *state = stored;
        data.index.insert(seq, MsgEntry { offset, ..entry });
        data.cache.put(seq, msg);
        if let Some(up_to) = evict_up_to {
            self.log.evict_through(&mut state, &mut *data, up_to, now)?;
        }
        Ok(seq)
    }

    fn lookup(&self, seq: u64) -> Result<Option<Message>> {
        self.data.lock().load(seq)
    }

    fn first_msg(&self) -> Result<Option<Message>> {
        let mut data = self.data.lock();
        match data.index.keys().next().copied() {
            Some(seq) => data.load(seq),
            None => Ok(None),
        }
    }

    fn last_msg(&self) -> Result<Option<Message>> {
        let mut data = self.data.lock();
        match data.index.keys().next_back().copied() {
            Some(seq) => data.load(seq),
            None => Ok(None),
        }
    }

    fn sequence_from_timestamp(&self, timestamp: i64) -> Result<u64> {
        let state = self.log.read();
        let data = self.data.lock();
        Ok(self.log.sequence_from_timestamp(
            &state,
            timestamp,
            data.index.iter().map(|(seq, e)| (*seq, e.timestamp)),
        ))
    }

    fn flush(&self) -> Result<()> {
        self.data.lock().file.sync()
    }

    fn close(&self) -> Result<()> {
        let mut data = self.data.lock();
        if data.closed {
            return Ok(());
        }
        data.closed = true;
        data.file.sync()
    }
}

impl fmt::Debug for FileMsgStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.lock();
        f.debug_struct("FileMsgStore")
            .field("path", &data.file.path())
            .field("file_size", &data.file.size())
            .field("msgs", &data.index.len())
            .field("cached", &data.cache.len())
            .finish()
    }
}
