//! Wearable companion relay.
//! Routes typed messages and key-value data items between the local application and
//! remote peer nodes. Host-provided collaborators do discovery, transport and delivery.

pub mod bridge;
pub mod codec;
pub mod data;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod value;
pub mod wire;

pub mod ffi;

#[cfg(test)]
mod testutil;

pub use bridge::{BridgeConfig, MethodCall, MethodResult, WearableBridge};
pub use data::{DataEvent, DataEventKind, DataItem, DataSyncStore};
pub use error::{
    BridgeError, CodecError, DataError, DiscoveryError, RelayError, TransportError,
};
pub use host::{DataLayer, Discovery, Event, EventQueue, EventSink, HostContext, Transport};
pub use lifecycle::AttachGuard;
pub use node::{NodeId, PeerNode};
pub use protocol::{Message, MESSAGE_CHANNEL, PROTOCOL_VERSION};
pub use registry::{ListenerId, ListenerRegistry};
pub use relay::{MessageRelay, PendingSend, SendReport};
pub use value::{Dynamic, DynamicMap, Payload, Value};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
