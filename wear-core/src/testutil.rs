//! In-memory collaborators for unit tests.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::data::DataItem;
use crate::error::{DiscoveryError, TransportError};
use crate::host::{DataLayer, Discovery, Transport};
use crate::node::{NodeId, PeerNode};

pub struct MockDiscovery {
    result: Result<Vec<PeerNode>, DiscoveryError>,
}

impl MockDiscovery {
    pub fn with_nodes(ids: &[&str]) -> Self {
        let nodes = ids
            .iter()
            .map(|id| PeerNode::new(NodeId::new(*id), format!("watch {id}")))
            .collect();
        Self { result: Ok(nodes) }
    }

    pub fn failing(err: DiscoveryError) -> Self {
        Self { result: Err(err) }
    }
}

#[async_trait]
impl Discovery for MockDiscovery {
    async fn connected_nodes(&self) -> Result<Vec<PeerNode>, DiscoveryError> {
        self.result.clone()
    }
}

/// Records every successful send; fails sends to the configured nodes and never completes
/// sends to stalled ones.
#[derive(Default)]
pub struct MockTransport {
    failing: HashSet<NodeId>,
    stalled: HashSet<NodeId>,
    sent: Mutex<Vec<(NodeId, String, Vec<u8>)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(ids: &[&str]) -> Self {
        Self {
            failing: ids.iter().map(|id| NodeId::new(*id)).collect(),
            ..Self::default()
        }
    }

    /// Sends to these nodes hang like a peer that vanished without leaving.
    pub fn stalled_for(ids: &[&str]) -> Self {
        Self {
            stalled: ids.iter().map(|id| NodeId::new(*id)).collect(),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(NodeId, String, Vec<u8>)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, node: &NodeId, channel: &str, bytes: &[u8]) -> Result<(), TransportError> {
        if self.stalled.contains(node) {
            std::future::pending::<()>().await;
        }
        if self.failing.contains(node) {
            return Err(TransportError::Send {
                node: node.clone(),
                reason: "connection reset".into(),
            });
        }
        self.sent
            .lock()
            .push((node.clone(), channel.to_string(), bytes.to_vec()));
        Ok(())
    }
}

/// What the data layer was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum DataOp {
    Put(DataItem),
    Delete(String),
}

/// Forwards every operation to a channel so tests can await fire-and-forget writes.
pub struct MockDataLayer {
    ops: mpsc::UnboundedSender<DataOp>,
}

impl MockDataLayer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DataOp>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { ops: tx }, rx)
    }
}

#[async_trait]
impl DataLayer for MockDataLayer {
    async fn put_data_item(&self, item: DataItem) -> Result<(), TransportError> {
        let _ = self.ops.send(DataOp::Put(item));
        Ok(())
    }

    async fn delete_data_item(&self, path: &str) -> Result<(), TransportError> {
        let _ = self.ops.send(DataOp::Delete(path.to_string()));
        Ok(())
    }
}
