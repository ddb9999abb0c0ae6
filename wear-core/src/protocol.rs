//! Names on the application boundary and messages exchanged between host nodes.

use serde::{Deserialize, Serialize};

use crate::data::DataItem;
use crate::node::NodeId;

/// Node protocol version. Carried in beacons; mismatching peers are ignored.
pub const PROTOCOL_VERSION: u8 = 1;

/// Transport channel for application messages.
pub const MESSAGE_CHANNEL: &str = "/MessageChannel";

/// Method names accepted from the application.
pub mod method {
    pub const GET_PLATFORM_VERSION: &str = "getPlatformVersion";
    pub const SEND_MESSAGE: &str = "sendMessage";
    pub const SET_DATA: &str = "setData";
    pub const DELETE_DATA: &str = "deleteData";
    pub const LISTEN_MESSAGES: &str = "listenMessages";
    pub const LISTEN_DATA: &str = "listenData";
    pub const UNLISTEN_MESSAGES: &str = "unlistenMessages";
    pub const UNLISTEN_DATA: &str = "unlistenData";
}

/// Event names sent to the application.
pub mod event {
    pub const MESSAGE_RECEIVED: &str = "messageReceived";
    pub const DATA_RECEIVED: &str = "dataReceived";
}

/// Node-to-node messages. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Discovery: advertise presence and the transport port.
    Beacon {
        protocol_version: u8,
        node_id: NodeId,
        display_name: String,
        listen_port: u16,
    },
    /// Unicast reply to a beacon.
    DiscoveryResponse {
        protocol_version: u8,
        node_id: NodeId,
        display_name: String,
        listen_port: u16,
    },
    /// Graceful leave.
    Leave { node_id: NodeId },
    /// Encoded payload on a named channel.
    ChannelMessage {
        source: NodeId,
        channel: String,
        payload: Vec<u8>,
    },
    /// Full data item written on `source`.
    DataItemChanged { source: NodeId, item: DataItem },
    DataItemDeleted { source: NodeId, path: String },
}
