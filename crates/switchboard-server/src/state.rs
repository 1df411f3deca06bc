//! Shared server state and its locking discipline.
//!
//! Lock order is fixed: roster, then the store map, then any single
//! history. Handlers never hold two history locks at once, and nothing
//! awaits while a lock is held — every outbound send is a channel push.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use switchboard_core::{ChannelKey, ChatHistory, Roster, GROUP_HISTORY_CAPACITY};

use crate::session::OutboundTx;

/// Everything the engine shares across connections.
pub struct ServerState {
    roster: Mutex<Roster<OutboundTx>>,
    chats: ChatStore,
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            roster: Mutex::new(Roster::new()),
            chats: ChatStore::new(),
        }
    }

    /// Lock the roster. A poisoned lock means a handler panicked mid-update;
    /// there is nothing to recover.
    pub(crate) fn roster(&self) -> MutexGuard<'_, Roster<OutboundTx>> {
        self.roster.lock().expect("roster lock poisoned")
    }

    pub(crate) fn chats(&self) -> &ChatStore {
        &self.chats
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Map of channel key to history. The map has its own lock; each history
/// carries its own, so appends to different channels never serialize.
pub struct ChatStore {
    histories: Mutex<HashMap<ChannelKey, Arc<Mutex<ChatHistory>>>>,
}

impl ChatStore {
    fn new() -> Self {
        let mut histories = HashMap::new();
        histories.insert(
            ChannelKey::group(),
            Arc::new(Mutex::new(ChatHistory::new(GROUP_HISTORY_CAPACITY))),
        );
        Self {
            histories: Mutex::new(histories),
        }
    }

    /// Fetch the history for `key`, creating it with `capacity` if absent.
    /// Callers keep the capacity constant per channel.
    pub(crate) fn get_or_create(
        &self,
        key: ChannelKey,
        capacity: usize,
    ) -> Arc<Mutex<ChatHistory>> {
        self.histories
            .lock()
            .expect("chat store lock poisoned")
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(ChatHistory::new(capacity))))
            .clone()
    }

    pub(crate) fn get(&self, key: &ChannelKey) -> Option<Arc<Mutex<ChatHistory>>> {
        self.histories
            .lock()
            .expect("chat store lock poisoned")
            .get(key)
            .cloned()
    }

    /// Drop every history whose key matches; used at disconnect to destroy
    /// the departing user's pair channels.
    pub(crate) fn remove_matching(&self, predicate: impl Fn(&ChannelKey) -> bool) {
        self.histories
            .lock()
            .expect("chat store lock poisoned")
            .retain(|key, _| !predicate(key));
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &ChannelKey) -> bool {
        self.histories
            .lock()
            .expect("chat store lock poisoned")
            .contains_key(key)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.histories.lock().expect("chat store lock poisoned").len()
    }
}
