//! Message relay: fan one encoded payload out to every reachable peer, and fan inbound
//! messages out to every message listener.

use std::sync::Arc;

use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::codec;
use crate::error::{RelayError, TransportError};
use crate::host::{Discovery, Event, EventSink, Transport};
use crate::node::NodeId;
use crate::protocol::MESSAGE_CHANNEL;
use crate::registry::ListenerId;
use crate::value::{DynamicMap, Payload};

/// Per-peer outcome of one send. Failures here never fail the send call.
#[derive(Debug, Default)]
pub struct SendReport {
    pub delivered: Vec<NodeId>,
    pub failed: Vec<(NodeId, TransportError)>,
}

impl SendReport {
    pub fn peer_count(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

pub struct MessageRelay {
    discovery: Arc<dyn Discovery>,
    transport: Arc<dyn Transport>,
}

impl MessageRelay {
    pub fn new(discovery: Arc<dyn Discovery>, transport: Arc<dyn Transport>) -> Self {
        Self {
            discovery,
            transport,
        }
    }

    /// Send an application map to all connected nodes. See [`MessageRelay::send_payload`].
    pub async fn send_message(&self, map: &DynamicMap) -> Result<SendReport, RelayError> {
        self.send_payload(&Payload::from_dynamic(map)).await
    }

    /// Like [`MessageRelay::dispatch_payload`], then wait for every peer to finish.
    pub async fn send_payload(&self, payload: &Payload) -> Result<SendReport, RelayError> {
        Ok(self.dispatch_payload(payload).await?.report().await)
    }

    /// Enumerate peers and encode once, then send to each peer in its own background task.
    /// Returns as soon as the sends are started; only enumeration and encoding failures are
    /// errors.
    pub async fn dispatch_payload(&self, payload: &Payload) -> Result<PendingSend, RelayError> {
        let nodes = self.discovery.connected_nodes().await?;
        if nodes.is_empty() {
            debug!("no connected nodes; message not sent");
            return Ok(PendingSend::default());
        }
        let bytes: Arc<[u8]> = codec::encode(payload)?.into();
        let targets = nodes.iter().map(|n| n.id.clone()).collect();

        let mut sends = JoinSet::new();
        for node in nodes {
            let transport = self.transport.clone();
            let bytes = bytes.clone();
            sends.spawn(async move {
                let result = transport.send(&node.id, MESSAGE_CHANNEL, &bytes).await;
                (node, result)
            });
        }
        let len = bytes.len();
        let handle = tokio::spawn(async move {
            let mut report = SendReport::default();
            while let Some(joined) = sends.join_next().await {
                match joined {
                    Ok((node, Ok(()))) => {
                        debug!(node = %node.id, name = %node.display_name, len, "sent message");
                        report.delivered.push(node.id);
                    }
                    Ok((node, Err(e))) => {
                        warn!(node = %node.id, name = %node.display_name, error = %e, "message send failed");
                        report.failed.push((node.id, e));
                    }
                    Err(e) => warn!(error = %e, "message send task did not complete"),
                }
            }
            report
        });
        Ok(PendingSend {
            targets,
            handle: Some(handle),
        })
    }
}

/// Sends already in flight. Dropping it leaves them running.
#[derive(Debug, Default)]
pub struct PendingSend {
    targets: Vec<NodeId>,
    handle: Option<JoinHandle<SendReport>>,
}

impl PendingSend {
    /// Peers the payload is being sent to.
    pub fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    /// Wait for every send and collect the outcome.
    pub async fn report(self) -> SendReport {
        let Some(handle) = self.handle else {
            return SendReport::default();
        };
        match handle.await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "send collector did not complete");
                SendReport::default()
            }
        }
    }
}

/// Handle bytes received on `channel`. Returns the number of deliveries made.
///
/// Only the message channel is handled. Undecodable bytes are dropped without notifying
/// anyone; otherwise each listener gets the raw text, not the decoded map.
pub fn deliver_inbound(
    channel: &str,
    bytes: &[u8],
    listeners: &[ListenerId],
    sink: &dyn EventSink,
) -> usize {
    if channel != MESSAGE_CHANNEL {
        debug!(channel, "ignoring message on unknown channel");
        return 0;
    }
    if let Err(e) = codec::decode(bytes) {
        warn!(error = %e, len = bytes.len(), "dropping undecodable message");
        return 0;
    }
    let raw = match std::str::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "dropping message that is not UTF-8");
            return 0;
        }
    };
    for &id in listeners {
        sink.deliver(Event::MessageReceived {
            id,
            args: raw.to_owned(),
        });
    }
    listeners.len()
}
