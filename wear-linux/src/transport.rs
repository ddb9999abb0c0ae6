//! Node transport over TCP, one connection per frame. Outbound side is the relay's transport
//! and data layer; inbound frames are routed to the bridge.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use wear_core::wire::{body_len, decode_body, encode_frame, LEN_SIZE};
use wear_core::{
    DataEvent, DataItem, DataLayer, Message, NodeId, Transport, TransportError, WearableBridge,
};

use crate::discovery::PeerTable;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends frames to peers found in the discovery table.
#[derive(Clone)]
pub struct TcpTransport {
    local: NodeId,
    peers: PeerTable,
}

impl TcpTransport {
    pub fn new(local: NodeId, peers: PeerTable) -> Self {
        Self { local, peers }
    }

    /// Send `msg` to every known peer concurrently. Fails only if every peer failed.
    async fn broadcast(&self, msg: Message) -> Result<(), TransportError> {
        let frame: Arc<[u8]> = encode_frame(&msg)
            .map_err(|e| TransportError::DataLayer(e.to_string()))?
            .into();
        let targets = self.peers.addrs().await;
        if targets.is_empty() {
            return Ok(());
        }
        let total = targets.len();
        let mut sends = JoinSet::new();
        for (id, addr) in targets {
            let frame = frame.clone();
            sends.spawn(async move { (id, send_frame(addr, &frame).await) });
        }
        let mut failed = 0;
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((id, Err(e))) => {
                    warn!(node = %id, error = %e, "data layer send failed");
                    failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "data layer send task did not complete");
                    failed += 1;
                }
            }
        }
        if failed == total {
            return Err(TransportError::DataLayer(format!(
                "no peer reachable ({total} tried)"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, node: &NodeId, channel: &str, bytes: &[u8]) -> Result<(), TransportError> {
        let addr = self
            .peers
            .addr_of(node)
            .await
            .ok_or_else(|| TransportError::Unreachable(node.clone()))?;
        let send_error = |reason: String| TransportError::Send {
            node: node.clone(),
            reason,
        };
        let frame = encode_frame(&Message::ChannelMessage {
            source: self.local.clone(),
            channel: channel.to_string(),
            payload: bytes.to_vec(),
        })
        .map_err(|e| send_error(e.to_string()))?;
        send_frame(addr, &frame)
            .await
            .map_err(|e| send_error(e.to_string()))
    }
}

#[async_trait]
impl DataLayer for TcpTransport {
    async fn put_data_item(&self, item: DataItem) -> Result<(), TransportError> {
        self.broadcast(Message::DataItemChanged {
            source: self.local.clone(),
            item,
        })
        .await
    }

    async fn delete_data_item(&self, path: &str) -> Result<(), TransportError> {
        self.broadcast(Message::DataItemDeleted {
            source: self.local.clone(),
            path: path.to_string(),
        })
        .await
    }
}

async fn send_frame(addr: SocketAddr, frame: &[u8]) -> std::io::Result<()> {
    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
    stream.write_all(frame).await?;
    stream.flush().await?;
    stream.shutdown().await
}

/// Listen for peer connections on `port` and route every frame to the bridge.
pub async fn run_transport(bridge: Arc<WearableBridge>, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    info!(port, "transport listening");
    serve(listener, bridge).await
}

pub async fn serve(listener: TcpListener, bridge: Arc<WearableBridge>) -> std::io::Result<()> {
    loop {
        let (stream, from) = listener.accept().await?;
        let bridge = bridge.clone();
        tokio::spawn(async move {
            if let Err(e) = read_frames(stream, &bridge).await {
                debug!(%from, error = %e, "peer connection closed with error");
            }
        });
    }
}

async fn read_frames(mut stream: TcpStream, bridge: &WearableBridge) -> std::io::Result<()> {
    loop {
        let mut header = [0u8; LEN_SIZE];
        match stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }
        let len = body_len(header).map_err(invalid_data)?;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;
        let msg = decode_body(&body).map_err(invalid_data)?;
        route(bridge, msg);
    }
}

fn invalid_data(e: impl std::error::Error + Send + Sync + 'static) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e)
}

/// Hand one inbound frame to the bridge.
pub fn route(bridge: &WearableBridge, msg: Message) {
    match msg {
        Message::ChannelMessage {
            source,
            channel,
            payload,
        } => {
            bridge.on_message_received(&source, &channel, &payload);
        }
        Message::DataItemChanged { source, item } => {
            debug!(source = %source, path = %item.path, version = item.version, "data item changed");
            bridge.on_data_changed(&[DataEvent::changed(item)]);
        }
        Message::DataItemDeleted { source, path } => {
            debug!(source = %source, path = %path, "data item deleted");
            bridge.on_data_changed(&[DataEvent::deleted(path)]);
        }
        Message::Beacon { .. } | Message::DiscoveryResponse { .. } | Message::Leave { .. } => {
            debug!("discovery message on transport ignored");
        }
    }
}
