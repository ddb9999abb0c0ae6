//! Host collaborators: peer discovery, transport, data layer and the application event sink.
//! The core never implements these; a host context bundles one of each.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::data::DataItem;
use crate::error::{DiscoveryError, TransportError};
use crate::node::{NodeId, PeerNode};
use crate::protocol::event;
use crate::registry::ListenerId;
use crate::value::{Dynamic, Payload};

/// Current set of reachable peers. Queried on every send, never cached.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn connected_nodes(&self) -> Result<Vec<PeerNode>, DiscoveryError>;
}

/// Point-to-point send on a named channel.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, node: &NodeId, channel: &str, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Shared data layer that propagates whole items to peers.
#[async_trait]
pub trait DataLayer: Send + Sync {
    async fn put_data_item(&self, item: DataItem) -> Result<(), TransportError>;
    async fn delete_data_item(&self, path: &str) -> Result<(), TransportError>;
}

/// Delivers events to the application layer. Called once per listener per event.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: Event);
}

/// Collaborators for one attached foreground context.
#[derive(Clone)]
pub struct HostContext {
    pub discovery: Arc<dyn Discovery>,
    pub transport: Arc<dyn Transport>,
    pub data_layer: Arc<dyn DataLayer>,
    pub sink: Arc<dyn EventSink>,
}

/// Event for the application layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Inbound message; `args` is the raw payload text as received.
    MessageReceived { id: ListenerId, args: String },
    /// Remote data item changed; `args` is the decoded item.
    DataChanged {
        id: ListenerId,
        path: String,
        args: Payload,
    },
}

impl Event {
    pub fn listener(&self) -> ListenerId {
        match self {
            Event::MessageReceived { id, .. } | Event::DataChanged { id, .. } => *id,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Event::MessageReceived { .. } => event::MESSAGE_RECEIVED,
            Event::DataChanged { .. } => event::DATA_RECEIVED,
        }
    }

    /// `{"method": ..., "arguments": {"id": ..., "args": ...}}` as sent to the application.
    pub fn to_json(&self) -> serde_json::Value {
        let arguments = match self {
            Event::MessageReceived { id, args } => serde_json::json!({
                "id": id.0,
                "args": args,
            }),
            Event::DataChanged { id, path, args } => serde_json::json!({
                "id": id.0,
                "path": path,
                "args": serde_json::Value::from(&Dynamic::Map(args.to_dynamic())),
            }),
        };
        serde_json::json!({ "method": self.method(), "arguments": arguments })
    }
}

/// Sink that buffers events until drained. Used by hosts that poll (C ABI) and in tests.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<Vec<Event>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for EventQueue {
    fn deliver(&self, event: Event) {
        self.events.lock().push(event);
    }
}
