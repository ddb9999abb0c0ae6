//! Peer node identity as reported by discovery.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Node identifier. Opaque string, unique per node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    /// Fresh random id (UUID v4) for a host that has no vendor-assigned one.
    pub fn generate() -> Self {
        NodeId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reachable peer: id plus human-readable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerNode {
    pub id: NodeId,
    pub display_name: String,
}

impl PeerNode {
    pub fn new(id: NodeId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = NodeId::generate();
        let b = NodeId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }
}
