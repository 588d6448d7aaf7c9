//! In-memory store.

use super::{MemoryMsgStore, MemorySubStore};
use crate::error::Result;
use crate::limits::StoreLimits;
use crate::messages::MsgLog;
use crate::store::{check_channel_name, ChannelEntry, GenericStore, Store};
use crate::subscriptions::SubRegistry;
use crate::types::{Clock, RecoveredState, ServerInfo, UserData};
use std::sync::Arc;
use tracing::debug;

/// Display name of the in-memory store.
pub const MEMORY_STORE_NAME: &str = "MEMORY";

/// A store keeping everything in memory.
#[derive(Debug)]
pub struct MemoryStore {
    base: GenericStore,
}

impl MemoryStore {
    pub fn new(limits: Option<&StoreLimits>) -> Result<Self> {
        Ok(Self {
            base: GenericStore::new(MEMORY_STORE_NAME, limits)?,
        })
    }

    pub fn with_clock(limits: Option<&StoreLimits>, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            base: GenericStore::with_clock(MEMORY_STORE_NAME, limits, clock)?,
        })
    }
}

impl Store for MemoryStore {
    fn base(&self) -> &GenericStore {
        &self.base
    }

    fn init(&self, info: &ServerInfo) -> Result<()> {
        self.base.init(info)
    }

    fn recover(&self) -> Result<Option<RecoveredState>> {
        self.base.recover()
    }

    fn get_exclusive_lock(&self) -> Result<bool> {
        self.base.get_exclusive_lock()
    }

    fn create_channel(
        &self,
        channel: &str,
        user_data: Option<UserData>,
    ) -> Result<(ChannelEntry, bool)> {
        check_channel_name(channel)?;

        let mut state = self.base.write();
        state.ensure_open()?;
        if let Some(existing) = state.channel(channel) {
            return Ok((existing.clone(), false));
        }
        state.can_add_channel()?;

        let limits = state.channel_limits(channel);
        let msgs = MemoryMsgStore::new(MsgLog::new(
            channel,
            limits.msgs,
            Arc::clone(self.base.clock()),
        ));
        let subs = MemorySubStore::new(SubRegistry::new(channel, limits.subs));
        let entry = ChannelEntry::new(channel, Arc::new(msgs), Arc::new(subs), user_data);
        state.insert_channel(entry.clone());

        debug!(store = %self.base.name(), channel, "channel created");
        Ok((entry, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn test_create_channel() {
        let store = MemoryStore::new(None).unwrap();
        let (cs, new) = store.create_channel("foo", None).unwrap();
        assert!(new);
        assert_eq!(cs.subject(), "foo");

        let (again, new) = store.create_channel("foo", None).unwrap();
        assert!(!new);
        assert!(Arc::ptr_eq(&cs.msgs, &again.msgs));
        assert_eq!(store.get_channels_count(), 1);
        assert!(store.has_channel());
    }

    #[test]
    fn test_wildcard_channel_rejected() {
        let store = MemoryStore::new(None).unwrap();
        assert!(matches!(
            store.create_channel("foo.*", None),
            Err(StoreError::InvalidChannel(_))
        ));
        assert_eq!(store.get_channels_count(), 0);
    }

    #[test]
    fn test_no_exclusive_lock_or_recovery() {
        let store = MemoryStore::new(None).unwrap();
        assert!(matches!(
            store.get_exclusive_lock(),
            Err(StoreError::NotSupported(_))
        ));
        assert!(store.recover().unwrap().is_none());
        assert_eq!(store.name(), MEMORY_STORE_NAME);
    }
}
