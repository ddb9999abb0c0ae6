//! Error types for each concern. Only discovery failures and argument problems reach the
//! application; everything else degrades per key or per peer.

use crate::node::NodeId;

/// Unsupported or malformed payload value.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unsupported value type {0}")]
    UnsupportedType(&'static str),
    #[error("unsupported array element type {0}")]
    UnsupportedElement(&'static str),
    #[error("array elements are not all of one type")]
    MixedArray,
    #[error("non-finite float")]
    NonFinite,
    #[error("payload too large")]
    TooLarge,
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Peer enumeration failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("peer enumeration failed: {0}")]
pub struct DiscoveryError(pub String);

/// A single send (or data layer write) failed. Never aborts sibling sends.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("node {0} is not reachable")]
    Unreachable(NodeId),
    #[error("send to {node} failed: {reason}")]
    Send { node: NodeId, reason: String },
    #[error("data layer write failed: {0}")]
    DataLayer(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("invalid data path {0:?}: must be non-empty and start with '/'")]
    InvalidPath(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("no async runtime to publish the data item on")]
    NoRuntime,
}

/// Error returned across the application boundary. Each variant maps to a stable code.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("no host context attached")]
    NotAttached,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl BridgeError {
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Relay(RelayError::Discovery(_)) => "DISCOVERY_FAILED",
            BridgeError::Relay(RelayError::Codec(_)) => "CODEC_ERROR",
            BridgeError::Data(DataError::InvalidPath(_)) => "INVALID_PATH",
            BridgeError::Data(DataError::Codec(_)) => "CODEC_ERROR",
            BridgeError::Data(DataError::NoRuntime) => "NO_RUNTIME",
            BridgeError::NotAttached => "NOT_ATTACHED",
            BridgeError::InvalidArgument(_) => "INVALID_ARGUMENT",
        }
    }
}
