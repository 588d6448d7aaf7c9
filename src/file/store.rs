//! File-backed store.

use super::framed::{read_single, write_single, FramedLog};
use super::{FileMsgStore, FileSubStore};
use crate::error::{Result, StoreError};
use crate::limits::StoreLimits;
use crate::messages::MsgLog;
use crate::store::{check_channel_name, ChannelEntry, GenericStore, StoreState, Store};
use crate::subscriptions::SubRegistry;
use crate::types::{
    Client, ClientInfo, Clock, RecoveredChannel, RecoveredState, RecoveredSubscription,
    ServerInfo, SystemClock, UserData,
};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Display name of the file store.
pub const FILE_STORE_NAME: &str = "FILE";

const SERVER_FILE: &str = "server.dat";
const CLIENTS_FILE: &str = "clients.dat";
const LOCK_FILE: &str = "LOCK";
const MSGS_FILE: &str = "msgs.dat";
const SUBS_FILE: &str = "subs.dat";

const SERVER_MAGIC: &[u8; 4] = b"SRV\0";
const CLIENTS_MAGIC: &[u8; 4] = b"CLI\0";

/// File store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStoreConfig {
    /// Root directory of the store.
    pub path: PathBuf,

    /// Sync files every N appends (0 = every append).
    pub sync_interval: u64,

    /// Messages kept in each channel's read cache.
    pub cache_size: usize,

    /// Whether to create the root directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./datastore"),
            sync_interval: 100,
            cache_size: 1000,
            create_if_missing: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
enum ClientRecord {
    Add(ClientInfo),
    Delete(String),
}

/// A store keeping channels and clients under one directory.
///
/// Every channel has its own directory, named after the hex encoding of
/// the channel name. Client registrations are journaled in `clients.dat`
/// and restored on open; channels come back through [`Store::recover`] or
/// on first [`Store::create_channel`].
pub struct FileStore {
    base: GenericStore,
    config: FileStoreConfig,
    /// Held while client changes are journaled; taken before the store lock.
    clients: Mutex<FramedLog>,
    lock_file: Mutex<Option<File>>,
}

impl FileStore {
    pub fn open(config: FileStoreConfig, limits: Option<&StoreLimits>) -> Result<Self> {
        Self::open_with_clock(config, limits, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        config: FileStoreConfig,
        limits: Option<&StoreLimits>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if !config.path.exists() {
            if !config.create_if_missing {
                return Err(StoreError::NotInitialized);
            }
            fs::create_dir_all(&config.path)?;
        }

        let base = GenericStore::with_clock(FILE_STORE_NAME, limits, clock)?;
        let (clients, records) = FramedLog::open::<ClientRecord>(
            config.path.join(CLIENTS_FILE),
            CLIENTS_MAGIC,
            config.sync_interval,
        )?;
        {
            let mut state = base.write();
            for (_, record) in records {
                match record {
                    ClientRecord::Add(info) => state.insert_client(Arc::new(Client {
                        info,
                        user_data: None,
                    })),
                    ClientRecord::Delete(id) => {
                        state.remove_client(&id);
                    }
                }
            }
        }
        info!(path = %config.path.display(), clients = base.get_clients_count(), "file store opened");

        Ok(Self {
            base,
            config,
            clients: Mutex::new(clients),
            lock_file: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &FileStoreConfig {
        &self.config
    }

    fn channel_dir(&self, channel: &str) -> PathBuf {
        self.config.path.join(hex::encode(channel))
    }

    /// Open (or create) the files of `channel` and register it.
    fn open_channel(
        &self,
        state: &mut StoreState,
        channel: &str,
        user_data: Option<UserData>,
    ) -> Result<(ChannelEntry, Vec<RecoveredSubscription>)> {
        let dir = self.channel_dir(channel);
        fs::create_dir_all(&dir)?;

        let limits = state.channel_limits(channel);
        let log = MsgLog::new(channel, limits.msgs, Arc::clone(self.base.clock()));
        let msgs = FileMsgStore::open(
            dir.join(MSGS_FILE),
            log,
            self.config.sync_interval,
            self.config.cache_size,
        )?;
        let subs = FileSubStore::open(
            dir.join(SUBS_FILE),
            SubRegistry::new(channel, limits.subs),
            self.config.sync_interval,
        )?;
        let subscriptions = subs.subscriptions();

        let entry = ChannelEntry::new(channel, Arc::new(msgs), Arc::new(subs), user_data);
        state.insert_channel(entry.clone());
        Ok((entry, subscriptions))
    }
}

/// Channel name a directory stands for, if it is one of ours.
fn channel_from_dir(name: &OsStr) -> Option<String> {
    let bytes = hex::decode(name.to_str()?).ok()?;
    let channel = String::from_utf8(bytes).ok()?;
    check_channel_name(&channel).ok()?;
    Some(channel)
}

fn lock_path(root: &Path) -> PathBuf {
    root.join(LOCK_FILE)
}

impl Store for FileStore {
    fn base(&self) -> &GenericStore {
        &self.base
    }

    fn init(&self, info: &ServerInfo) -> Result<()> {
        self.base.read().ensure_open()?;
        write_single(&self.config.path.join(SERVER_FILE), SERVER_MAGIC, info)
    }

    /// Channels already registered are left as they are and not reported.
    fn recover(&self) -> Result<Option<RecoveredState>> {
        let Some(info) = read_single::<ServerInfo>(&self.config.path.join(SERVER_FILE), SERVER_MAGIC)?
        else {
            return Ok(None);
        };

        let mut channels = HashMap::new();
        {
            let mut state = self.base.write();
            state.ensure_open()?;
            for dir_entry in fs::read_dir(&self.config.path)? {
                let dir_entry = dir_entry?;
                if !dir_entry.file_type()?.is_dir() {
                    continue;
                }
                let Some(channel) = channel_from_dir(&dir_entry.file_name()) else {
                    warn!(dir = ?dir_entry.file_name(), "skipping unknown directory");
                    continue;
                };
                if state.channel(&channel).is_some() {
                    continue;
                }
                let (entry, subscriptions) = self.open_channel(&mut state, &channel, None)?;
                debug!(channel = %channel, subscriptions = subscriptions.len(), "channel recovered");
                channels.insert(
                    channel,
                    RecoveredChannel {
                        channel: entry,
                        subscriptions,
                    },
                );
            }
        }

        let mut clients: Vec<Arc<Client>> = self.base.get_clients().into_values().collect();
        clients.sort_by(|a, b| a.info.id.cmp(&b.info.id));
        info!(
            store = %self.base.name(),
            channels = channels.len(),
            clients = clients.len(),
            "store recovered"
        );
        Ok(Some(RecoveredState {
            info,
            clients,
            channels,
        }))
    }

    fn get_exclusive_lock(&self) -> Result<bool> {
        let mut held = self.lock_file.lock();
        if held.is_some() {
            return Ok(true);
        }
        self.base.read().ensure_open()?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(lock_path(&self.config.path))?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                *held = Some(file);
                Ok(true)
            }
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(false),
            Err(e) => Err(e.into()),
        }
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

        let (entry, _) = self.open_channel(&mut state, channel, user_data)?;
        debug!(store = %self.base.name(), channel, "channel created");
        Ok((entry, true))
    }

    fn add_client(
        &self,
        client_id: &str,
        hb_inbox: &str,
        user_data: Option<UserData>,
    ) -> Result<(Arc<Client>, bool)> {
        let mut journal = self.clients.lock();
        self.base.read().ensure_open()?;
        if let Some(existing) = self.base.get_client(client_id) {
            return Ok((existing, false));
        }
        journal.append(&ClientRecord::Add(ClientInfo {
            id: client_id.to_string(),
            hb_inbox: hb_inbox.to_string(),
        }))?;
        self.base.add_client(client_id, hb_inbox, user_data)
    }

    fn delete_client(&self, client_id: &str) -> Result<Option<Arc<Client>>> {
        let mut journal = self.clients.lock();
        self.base.read().ensure_open()?;
        if self.base.get_client(client_id).is_none() {
            return Ok(None);
        }
        journal.append(&ClientRecord::Delete(client_id.to_string()))?;
        self.base.delete_client(client_id)
    }

    fn close(&self) -> Result<()> {
        let mut journal = self.clients.lock();
        let result = self.base.close();
        let synced = journal.sync();

        if let Some(file) = self.lock_file.lock().take() {
            if let Err(e) = file.unlock() {
                warn!(error = %e, "failed to release store lock");
            }
        }
        result.and(synced)
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.config.path)
            .field("base", &self.base)
            .finish()
    }
}
