//! File-backed subscription store.

use super::framed::FramedLog;
use crate::error::{Result, StoreError};
use crate::subscriptions::{SubRegistry, SubStore, SubTable};
use crate::types::{RecoveredSubscription, SubState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub(crate) const SUBS_MAGIC: &[u8; 4] = b"SUB\0";

#[derive(Debug, Serialize, Deserialize)]
enum SubRecord {
    Create(SubState),
    Update(SubState),
    Delete(u64),
    AddPending { sub_id: u64, seq: u64 },
    AckPending { sub_id: u64, seq: u64 },
}

struct FileSubs {
    file: FramedLog,
    table: SubTable,
    closed: bool,
}

impl FileSubs {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn ensure_known(&self, sub_id: u64) -> Result<()> {
        if self.table.contains(sub_id) {
            Ok(())
        } else {
            Err(StoreError::SubscriptionNotFound(sub_id))
        }
    }
}

/// Subscriptions of one channel, journaled to a file.
///
/// Every change is appended before it is applied in memory. Lock order: the
/// [`SubRegistry`] guard, then the file data.
pub struct FileSubStore {
    registry: SubRegistry,
    data: Mutex<FileSubs>,
}

impl FileSubStore {
    /// Open the subscription file at `path`, replaying what it holds.
    pub fn open(path: impl AsRef<Path>, registry: SubRegistry, sync_interval: u64) -> Result<Self> {
        let (file, records) = FramedLog::open::<SubRecord>(path, SUBS_MAGIC, sync_interval)?;
        let mut table = SubTable::new();
        {
            let mut counters = registry.write();
            for (offset, record) in records {
                let applied = match record {
                    SubRecord::Create(sub) => {
                        registry.restore_locked(&mut counters, &sub);
                        table.insert(sub);
                        Ok(())
                    }
                    SubRecord::Update(sub) => table.update(&sub),
                    SubRecord::Delete(sub_id) => table.remove(sub_id).map(|_| {
                        registry.delete_sub_locked(&mut counters);
                    }),
                    SubRecord::AddPending { sub_id, seq } => table.add_pending(sub_id, seq),
                    SubRecord::AckPending { sub_id, seq } => table.ack_pending(sub_id, seq),
                };
                applied.map_err(|e| {
                    StoreError::Corruption(format!(
                        "subscription record at offset {}: {}",
                        offset, e
                    ))
                })?;
            }
        }
        Ok(Self {
            registry,
            data: Mutex::new(FileSubs {
                file,
                table,
                closed: false,
            }),
        })
    }

    /// Snapshot of the live subscriptions with their pending sequences.
    pub fn subscriptions(&self) -> Vec<RecoveredSubscription> {
        self.data.lock().table.snapshot()
    }
}

impl SubStore for FileSubStore {
    fn registry(&self) -> &SubRegistry {
        &self.registry
    }

    fn create_sub(&self, sub: &mut SubState) -> Result<()> {
        let mut counters = self.registry.write();
        let mut data = self.data.lock();
        data.ensure_open()?;

        // Counters and the caller's record only change once the record is
        // on disk.
        let mut next = counters.clone();
        let mut created = sub.clone();
        self.registry.create_sub_locked(&mut next, &mut created)?;
        data.file.append(&SubRecord::Create(created.clone()))?;
        *counters = next;
        sub.id = created.id;
        data.table.insert(created);
        Ok(())
    }

    fn update_sub(&self, sub: &SubState) -> Result<()> {
        let mut data = self.data.lock();
        data.ensure_open()?;
        data.ensure_known(sub.id)?;
        data.file.append(&SubRecord::Update(sub.clone()))?;
        data.table.update(sub)
    }

    fn delete_sub(&self, sub_id: u64) -> Result<()> {
        let mut counters = self.registry.write();
        let mut data = self.data.lock();
        data.ensure_open()?;
        data.ensure_known(sub_id)?;
        data.file.append(&SubRecord::Delete(sub_id))?;
        data.table.remove(sub_id)?;
        self.registry.delete_sub_locked(&mut counters);
        Ok(())
    }

    fn add_seq_pending(&self, sub_id: u64, seq: u64) -> Result<()> {
        let mut data = self.data.lock();
        data.ensure_open()?;
        data.ensure_known(sub_id)?;
        data.file.append(&SubRecord::AddPending { sub_id, seq })?;
        data.table.add_pending(sub_id, seq)
    }

    fn ack_seq_pending(&self, sub_id: u64, seq: u64) -> Result<()> {
        let mut data = self.data.lock();
        data.ensure_open()?;
        data.ensure_known(sub_id)?;
        data.file.append(&SubRecord::AckPending { sub_id, seq })?;
        data.table.ack_pending(sub_id, seq)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::SubStoreLimits;
    use tempfile::TempDir;

    fn open(dir: &TempDir, max: i64) -> FileSubStore {
        let registry = SubRegistry::new(
            "foo",
            SubStoreLimits {
                max_subscriptions: max,
            },
        );
        FileSubStore::open(dir.path().join("subs.dat"), registry, 1).unwrap()
    }

    fn sub(client: &str) -> SubState {
        SubState {
            client_id: client.into(),
            inbox: format!("_INBOX.{}", client),
            ..Default::default()
        }
    }

    #[test]
    fn test_replay() {
        let dir = TempDir::new().unwrap();
        {
            let ss = open(&dir, 0);
            let mut a = sub("a");
            let mut b = sub("b");
            ss.create_sub(&mut a).unwrap();
            ss.create_sub(&mut b).unwrap();
            a.durable_name = "dur".into();
            ss.update_sub(&a).unwrap();
            ss.add_seq_pending(a.id, 1).unwrap();
            ss.add_seq_pending(a.id, 2).unwrap();
            ss.ack_seq_pending(a.id, 1).unwrap();
            ss.delete_sub(b.id).unwrap();
            ss.close().unwrap();
        }

        let ss = open(&dir, 0);
        assert_eq!(ss.subs_count(), 1);
        let subs = ss.subscriptions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].sub.durable_name, "dur");
        assert_eq!(subs[0].sub.last_sent, 2);
        assert_eq!(subs[0].pending, vec![2]);

        // The deleted subscription's ID is not handed out again.
        let mut c = sub("c");
        ss.create_sub(&mut c).unwrap();
        assert_eq!(c.id, 3);
    }

    #[test]
    fn test_quota_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let ss = open(&dir, 1);
            ss.create_sub(&mut sub("a")).unwrap();
        }
        let ss = open(&dir, 1);
        let mut b = sub("b");
        assert!(matches!(
            ss.create_sub(&mut b),
            Err(StoreError::TooManySubscriptions)
        ));
        assert_eq!(ss.registry().max_sub_id(), 1);
    }

    #[test]
    fn test_unknown_subscription_not_journaled() {
        let dir = TempDir::new().unwrap();
        {
            let ss = open(&dir, 0);
            assert!(matches!(
                ss.add_seq_pending(7, 1),
                Err(StoreError::SubscriptionNotFound(7))
            ));
            assert!(ss.delete_sub(7).is_err());
        }
        // Reopening would fail if the bad records had been written.
        let ss = open(&dir, 0);
        assert_eq!(ss.subs_count(), 0);
    }

    #[test]
    fn test_failed_create_keeps_id_unassigned() {
        let dir = TempDir::new().unwrap();
        {
            let ss = open(&dir, 0);
            ss.create_sub(&mut sub("a")).unwrap();

            ss.data.lock().file.set_read_only(true).unwrap();
            let mut b = sub("b");
            assert!(ss.create_sub(&mut b).is_err());
            assert_eq!(b.id, 0);
            assert_eq!(ss.subs_count(), 1);
            assert_eq!(ss.registry().max_sub_id(), 1);

            ss.data.lock().file.set_read_only(false).unwrap();
            ss.create_sub(&mut b).unwrap();
            assert_eq!(b.id, 2);
        }
        let ss = open(&dir, 0);
        let ids: Vec<u64> = ss.subscriptions().iter().map(|s| s.sub.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_closed() {
        let dir = TempDir::new().unwrap();
        let ss = open(&dir, 0);
        ss.close().unwrap();
        assert!(matches!(
            ss.create_sub(&mut sub("a")),
            Err(StoreError::Closed)
        ));
    }
}
