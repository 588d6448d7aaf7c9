//! In-memory table of subscription records and their pending sequences.

use crate::error::{Result, StoreError};
use crate::types::{RecoveredSubscription, SubState};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug)]
struct SubEntry {
    state: SubState,
    pending: BTreeSet<u64>,
}

/// Live subscriptions of one channel, keyed by ID.
#[derive(Clone, Debug, Default)]
pub struct SubTable {
    subs: BTreeMap<u64, SubEntry>,
}

impl SubTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sub: SubState) {
        self.subs.insert(
            sub.id,
            SubEntry {
                state: sub,
                pending: BTreeSet::new(),
            },
        );
    }

    pub fn update(&mut self, sub: &SubState) -> Result<()> {
        let entry = self
            .subs
            .get_mut(&sub.id)
            .ok_or(StoreError::SubscriptionNotFound(sub.id))?;
        entry.state = sub.clone();
        Ok(())
    }

    pub fn remove(&mut self, sub_id: u64) -> Result<SubState> {
        self.subs
            .remove(&sub_id)
            .map(|e| e.state)
            .ok_or(StoreError::SubscriptionNotFound(sub_id))
    }

    pub fn add_pending(&mut self, sub_id: u64, seq: u64) -> Result<()> {
        let entry = self
            .subs
            .get_mut(&sub_id)
            .ok_or(StoreError::SubscriptionNotFound(sub_id))?;
        entry.pending.insert(seq);
        if seq > entry.state.last_sent {
            entry.state.last_sent = seq;
        }
        Ok(())
    }

    pub fn ack_pending(&mut self, sub_id: u64, seq: u64) -> Result<()> {
        let entry = self
            .subs
            .get_mut(&sub_id)
            .ok_or(StoreError::SubscriptionNotFound(sub_id))?;
        entry.pending.remove(&seq);
        Ok(())
    }

    pub fn contains(&self, sub_id: u64) -> bool {
        self.subs.contains_key(&sub_id)
    }

    pub fn get(&self, sub_id: u64) -> Option<&SubState> {
        self.subs.get(&sub_id).map(|e| &e.state)
    }

    /// Pending sequences of `sub_id`, ascending.
    pub fn pending(&self, sub_id: u64) -> Vec<u64> {
        self.subs
            .get(&sub_id)
            .map(|e| e.pending.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Snapshot of every subscription with its pending sequences, by ID.
    pub fn snapshot(&self) -> Vec<RecoveredSubscription> {
        self.subs
            .values()
            .map(|e| RecoveredSubscription {
                sub: e.state.clone(),
                pending: e.pending.iter().copied().collect(),
            })
            .collect()
    }
}
