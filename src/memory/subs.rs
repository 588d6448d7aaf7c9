//! In-memory subscription store.

use crate::error::{Result, StoreError};
use crate::subscriptions::{SubRegistry, SubStore, SubTable};
use crate::types::{RecoveredSubscription, SubState};
use parking_lot::Mutex;

/// Subscriptions of one channel, held in a [`SubTable`].
///
/// Lock order: the [`SubRegistry`] guard, then the table.
pub struct MemorySubStore {
    registry: SubRegistry,
    subs: Mutex<MemorySubs>,
}

struct MemorySubs {
    table: SubTable,
    closed: bool,
}

impl MemorySubs {
    fn ensure_open(&mut self) -> Result<&mut SubTable> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        Ok(&mut self.table)
    }
}

impl MemorySubStore {
    pub fn new(registry: SubRegistry) -> Self {
        Self {
            registry,
            subs: Mutex::new(MemorySubs {
                table: SubTable::new(),
                closed: false,
            }),
        }
    }

    /// Snapshot of the live subscriptions, by ID.
    pub fn subscriptions(&self) -> Vec<RecoveredSubscription> {
        self.subs.lock().table.snapshot()
    }
}

impl SubStore for MemorySubStore {
    fn registry(&self) -> &SubRegistry {
        &self.registry
    }

    fn create_sub(&self, sub: &mut SubState) -> Result<()> {
        let mut counters = self.registry.write();
        let mut subs = self.subs.lock();
        let table = subs.ensure_open()?;
        self.registry.create_sub_locked(&mut counters, sub)?;
        table.insert(sub.clone());
        Ok(())
    }

    fn update_sub(&self, sub: &SubState) -> Result<()> {
        self.subs.lock().ensure_open()?.update(sub)
    }

    fn delete_sub(&self, sub_id: u64) -> Result<()> {
        let mut counters = self.registry.write();
        self.subs.lock().ensure_open()?.remove(sub_id)?;
        self.registry.delete_sub_locked(&mut counters);
        Ok(())
    }

    fn add_seq_pending(&self, sub_id: u64, seq: u64) -> Result<()> {
        self.subs.lock().ensure_open()?.add_pending(sub_id, seq)
    }

    fn ack_seq_pending(&self, sub_id: u64, seq: u64) -> Result<()> {
        self.subs.lock().ensure_open()?.ack_pending(sub_id, seq)
    }

    /// Nothing is buffered.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.subs.lock().closed = true;
        Ok(())
    }
}
