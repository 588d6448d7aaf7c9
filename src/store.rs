//! Store coordinator tying channels, clients and limits together.

use crate::error::{Result, StoreError};
use crate::limits::{ChannelLimits, StoreLimits};
use crate::messages::MsgStore;
use crate::resolver::LimitsResolver;
use crate::subject;
use crate::subscriptions::SubStore;
use crate::types::{Client, Clock, RecoveredState, ServerInfo, SystemClock, UserData};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Channel name standing for every channel in [`GenericStore::msgs_state`].
pub const ALL_CHANNELS: &str = "*";

/// One channel: its message store, its subscription store and user data.
///
/// Clones are shallow and share the underlying stores.
#[derive(Clone)]
pub struct ChannelEntry {
    subject: String,
    pub msgs: Arc<dyn MsgStore>,
    pub subs: Arc<dyn SubStore>,
    pub user_data: Option<UserData>,
}

impl ChannelEntry {
    pub fn new(
        subject: impl Into<String>,
        msgs: Arc<dyn MsgStore>,
        subs: Arc<dyn SubStore>,
        user_data: Option<UserData>,
    ) -> Self {
        Self {
            subject: subject.into(),
            msgs,
            subs,
            user_data,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl fmt::Debug for ChannelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelEntry")
            .field("subject", &self.subject)
            .field("msgs", &self.msgs.msg_log().state())
            .field("subs", &self.subs.subs_count())
            .finish()
    }
}

/// Reject anything but a valid literal channel name.
pub fn check_channel_name(channel: &str) -> Result<()> {
    if subject::is_valid_channel_name(channel, false) {
        Ok(())
    } else {
        Err(StoreError::InvalidChannel(channel.to_string()))
    }
}

/// Registries and limits guarded by the store lock.
pub struct StoreState {
    closed: bool,
    resolver: LimitsResolver,
    channels: HashMap<String, ChannelEntry>,
    clients: HashMap<String, Arc<Client>>,
}

impl StoreState {
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    /// Fails with [`StoreError::TooManyChannels`] once the channel count
    /// reached the configured maximum. Check before allocating resources.
    pub fn can_add_channel(&self) -> Result<()> {
        match self.resolver.max_channels() {
            Some(max) if self.channels.len() >= max => Err(StoreError::TooManyChannels),
            _ => Ok(()),
        }
    }

    /// Effective limits of the literal `channel`.
    pub fn channel_limits(&self, channel: &str) -> ChannelLimits {
        self.resolver.resolve(channel)
    }

    pub fn limits(&self) -> &StoreLimits {
        self.resolver.limits()
    }

    pub fn channel(&self, channel: &str) -> Option<&ChannelEntry> {
        self.channels.get(channel)
    }

    pub fn insert_channel(&mut self, entry: ChannelEntry) {
        self.channels.insert(entry.subject.clone(), entry);
    }

    pub fn channels_count(&self) -> usize {
        self.channels.len()
    }

    pub fn client(&self, client_id: &str) -> Option<&Arc<Client>> {
        self.clients.get(client_id)
    }

    pub fn insert_client(&mut self, client: Arc<Client>) {
        self.clients.insert(client.info.id.clone(), client);
    }

    pub fn remove_client(&mut self, client_id: &str) -> Option<Arc<Client>> {
        self.clients.remove(client_id)
    }
}

/// The shared part of every store: name, limits, channel and client
/// registries, and close semantics.
///
/// Backends hold one of these and implement [`Store`] around it.
pub struct GenericStore {
    name: String,
    clock: Arc<dyn Clock>,
    state: RwLock<StoreState>,
}

impl GenericStore {
    /// Create a store named `name`, with the default limits if none are given.
    pub fn new(name: impl Into<String>, limits: Option<&StoreLimits>) -> Result<Self> {
        Self::with_clock(name, limits, Arc::new(SystemClock))
    }

    /// Like [`GenericStore::new`], minting message timestamps from `clock`.
    pub fn with_clock(
        name: impl Into<String>,
        limits: Option<&StoreLimits>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let name = name.into();
        let default_limits;
        let limits = match limits {
            Some(limits) => limits,
            None => {
                default_limits = StoreLimits::default();
                &default_limits
            }
        };
        let resolver = LimitsResolver::configure(limits)?;

        info!(store = %name, overrides = resolver.overrides_count(), "store initialized");
        for line in limits.summary() {
            debug!(store = %name, "{}", line);
        }

        Ok(Self {
            name,
            clock,
            state: RwLock::new(StoreState {
                closed: false,
                resolver,
                channels: HashMap::new(),
                clients: HashMap::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write()
    }

    /// Replace the limits. Validation happens before anything is swapped in.
    ///
    /// Existing channels keep the limits they were created with.
    pub fn set_limits(&self, limits: &StoreLimits) -> Result<()> {
        let resolver = LimitsResolver::configure(limits)?;
        let mut state = self.state.write();
        state.ensure_open()?;
        state.resolver = resolver;
        Ok(())
    }

    /// Global limits currently in force, without overrides.
    pub fn limits(&self) -> StoreLimits {
        self.state.read().limits().clone()
    }

    pub fn channel_limits(&self, channel: &str) -> ChannelLimits {
        self.state.read().channel_limits(channel)
    }

    /// Nothing to record for a store without durable state.
    pub fn init(&self, _info: &ServerInfo) -> Result<()> {
        Ok(())
    }

    /// A store without durable state has nothing to recover.
    pub fn recover(&self) -> Result<Option<RecoveredState>> {
        Ok(None)
    }

    pub fn get_exclusive_lock(&self) -> Result<bool> {
        Err(StoreError::NotSupported("generic store: exclusive lock"))
    }

    /// Physical channel creation belongs to backends.
    pub fn create_channel(
        &self,
        _channel: &str,
        _user_data: Option<UserData>,
    ) -> Result<(ChannelEntry, bool)> {
        Err(StoreError::NotImplemented("generic store: create channel"))
    }

    pub fn lookup_channel(&self, channel: &str) -> Option<ChannelEntry> {
        self.state.read().channels.get(channel).cloned()
    }

    /// Whether at least one channel exists.
    pub fn has_channel(&self) -> bool {
        !self.state.read().channels.is_empty()
    }

    /// Snapshot of the channel registry.
    pub fn get_channels(&self) -> HashMap<String, ChannelEntry> {
        self.state.read().channels.clone()
    }

    pub fn get_channels_count(&self) -> usize {
        self.state.read().channels.len()
    }

    /// Message count and bytes of `channel`, or of every channel for
    /// [`ALL_CHANNELS`]. Unknown channels count as empty.
    pub fn msgs_state(&self, channel: &str) -> Result<(usize, u64)> {
        if channel != ALL_CHANNELS {
            return match self.lookup_channel(channel) {
                Some(cs) => cs.msgs.state(),
                None => Ok((0, 0)),
            };
        }
        let channels: Vec<ChannelEntry> = self.state.read().channels.values().cloned().collect();
        let mut total = (0, 0);
        for cs in channels {
            let (count, bytes) = cs.msgs.state()?;
            total.0 += count;
            total.1 += bytes;
        }
        Ok(total)
    }

    /// Register a client. Returns the existing record and `false` if
    /// `client_id` is already registered.
    pub fn add_client(
        &self,
        client_id: &str,
        hb_inbox: &str,
        user_data: Option<UserData>,
    ) -> Result<(Arc<Client>, bool)> {
        let mut state = self.state.write();
        state.ensure_open()?;
        if let Some(existing) = state.clients.get(client_id) {
            return Ok((Arc::clone(existing), false));
        }
        let client = Arc::new(Client::new(client_id, hb_inbox, user_data));
        state.insert_client(Arc::clone(&client));
        Ok((client, true))
    }

    pub fn get_client(&self, client_id: &str) -> Option<Arc<Client>> {
        self.state.read().clients.get(client_id).cloned()
    }

    /// Snapshot of the client registry.
    pub fn get_clients(&self) -> HashMap<String, Arc<Client>> {
        self.state.read().clients.clone()
    }

    pub fn get_clients_count(&self) -> usize {
        self.state.read().clients.len()
    }

    /// Remove a client, returning its record if it was registered.
    pub fn delete_client(&self, client_id: &str) -> Result<Option<Arc<Client>>> {
        let mut state = self.state.write();
        state.ensure_open()?;
        Ok(state.remove_client(client_id))
    }

    /// Close every channel. Only the first call does anything.
    ///
    /// Every channel gets a close attempt; the first error is returned and
    /// the others are logged.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let mut first_err = None;
        for (channel, cs) in &state.channels {
            if let Err(e) = cs.subs.close() {
                keep_first(&mut first_err, channel, e);
            }
            if let Err(e) = cs.msgs.close() {
                keep_first(&mut first_err, channel, e);
            }
        }
        debug!(store = %self.name, channels = state.channels.len(), "store closed");
        first_err.map_or(Ok(()), Err)
    }
}

fn keep_first(first: &mut Option<StoreError>, channel: &str, err: StoreError) {
    if first.is_none() {
        *first = Some(err);
    } else {
        error!(channel, error = %err, "error closing channel store");
    }
}

impl fmt::Debug for GenericStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("GenericStore")
            .field("name", &self.name)
            .field("channels", &state.channels.len())
            .field("clients", &state.clients.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// A complete store backend.
///
/// Backends implement the storage-specific operations and expose their
/// [`GenericStore`] through [`Store::base`]; everything else is shared. A
/// backend without durable state can forward `init`, `recover` and
/// `get_exclusive_lock` to the generic answers.
pub trait Store: Send + Sync {
    fn base(&self) -> &GenericStore;

    /// Record the server's information.
    fn init(&self, info: &ServerInfo) -> Result<()>;

    /// Restore channels, clients and subscriptions from durable storage.
    fn recover(&self) -> Result<Option<RecoveredState>>;

    /// Try to become the single writer. `Ok(false)` when someone else is.
    fn get_exclusive_lock(&self) -> Result<bool>;

    /// Create `channel`, or return the existing one with `false`.
    fn create_channel(
        &self,
        channel: &str,
        user_data: Option<UserData>,
    ) -> Result<(ChannelEntry, bool)>;

    fn name(&self) -> &str {
        self.base().name()
    }

    fn set_limits(&self, limits: &StoreLimits) -> Result<()> {
        self.base().set_limits(limits)
    }

    fn lookup_channel(&self, channel: &str) -> Option<ChannelEntry> {
        self.base().lookup_channel(channel)
    }

    fn has_channel(&self) -> bool {
        self.base().has_channel()
    }

    fn get_channels(&self) -> HashMap<String, ChannelEntry> {
        self.base().get_channels()
    }

    fn get_channels_count(&self) -> usize {
        self.base().get_channels_count()
    }

    fn msgs_state(&self, channel: &str) -> Result<(usize, u64)> {
        self.base().msgs_state(channel)
    }

    fn add_client(
        &self,
        client_id: &str,
        hb_inbox: &str,
        user_data: Option<UserData>,
    ) -> Result<(Arc<Client>, bool)> {
        self.base().add_client(client_id, hb_inbox, user_data)
    }

    fn get_client(&self, client_id: &str) -> Option<Arc<Client>> {
        self.base().get_client(client_id)
    }

    fn get_clients(&self) -> HashMap<String, Arc<Client>> {
        self.base().get_clients()
    }

    fn get_clients_count(&self) -> usize {
        self.base().get_clients_count()
    }

    fn delete_client(&self, client_id: &str) -> Result<Option<Arc<Client>>> {
        self.base().delete_client(client_id)
    }

    fn close(&self) -> Result<()> {
        self.base().close()
    }
}
