//! Listener registry: which subscription ids want messages and which want data changes.
//! Multiset: an id registered twice is delivered to twice.

use serde::{Deserialize, Serialize};

/// Application-chosen subscription handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(pub i64);

#[derive(Debug, Default)]
pub struct ListenerRegistry {
    message: Vec<ListenerId>,
    data: Vec<ListenerId>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_message_listener(&mut self, id: ListenerId) {
        self.message.push(id);
    }

    pub fn register_data_listener(&mut self, id: ListenerId) {
        self.data.push(id);
    }

    /// Remove one registration of `id`. Returns false if it was not registered.
    pub fn deregister_message_listener(&mut self, id: ListenerId) -> bool {
        remove_one(&mut self.message, id)
    }

    pub fn deregister_data_listener(&mut self, id: ListenerId) -> bool {
        remove_one(&mut self.data, id)
    }

    /// Message listeners in registration order, duplicates included.
    pub fn message_listeners(&self) -> &[ListenerId] {
        &self.message
    }

    /// Data listeners in registration order, duplicates included.
    pub fn data_listeners(&self) -> &[ListenerId] {
        &self.data
    }
}

fn remove_one(ids: &mut Vec<ListenerId>, id: ListenerId) -> bool {
    match ids.iter().position(|&x| x == id) {
        Some(i) => {
            ids.remove(i);
            true
        }
        None => false,
    }
}
