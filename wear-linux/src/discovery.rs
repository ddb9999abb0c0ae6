//! LAN discovery: UDP multicast beacon, parse beacons/responses, maintain the peer table
//! the relay queries on every send.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use wear_core::wire::{decode_frame, encode_frame};
use wear_core::{Discovery, DiscoveryError, Message, NodeId, PeerNode, PROTOCOL_VERSION};

const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 60, 61);
const BEACON_INTERVAL: Duration = Duration::from_secs(4);
/// Peer considered gone if no beacon/response for this long.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(16);

struct PeerState {
    display_name: String,
    addr: SocketAddr,
    last_seen: Instant,
}

/// Currently reachable peers, keyed by node id.
#[derive(Clone, Default)]
pub struct PeerTable {
    peers: Arc<Mutex<HashMap<NodeId, PeerState>>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a peer. Returns true if it was not known.
    pub async fn upsert(&self, id: NodeId, display_name: String, addr: SocketAddr) -> bool {
        self.upsert_at(id, display_name, addr, Instant::now()).await
    }

    async fn upsert_at(&self, id: NodeId, display_name: String, addr: SocketAddr, seen: Instant) -> bool {
        let mut p = self.peers.lock().await;
        p.insert(
            id,
            PeerState {
                display_name,
                addr,
                last_seen: seen,
            },
        )
        .is_none()
    }

    pub async fn remove(&self, id: &NodeId) -> bool {
        self.peers.lock().await.remove(id).is_some()
    }

    pub async fn addr_of(&self, id: &NodeId) -> Option<SocketAddr> {
        self.peers.lock().await.get(id).map(|s| s.addr)
    }

    pub async fn addrs(&self) -> Vec<(NodeId, SocketAddr)> {
        self.peers
            .lock()
            .await
            .iter()
            .map(|(id, s)| (id.clone(), s.addr))
            .collect()
    }

    /// Sorted by node id.
    pub async fn nodes(&self) -> Vec<PeerNode> {
        let p = self.peers.lock().await;
        let mut nodes: Vec<PeerNode> = p
            .iter()
            .map(|(id, s)| PeerNode::new(id.clone(), s.display_name.clone()))
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Drop peers not seen within `timeout` of `now`. Returns the ids removed.
    pub async fn expire(&self, now: Instant, timeout: Duration) -> Vec<NodeId> {
        let mut p = self.peers.lock().await;
        let gone: Vec<NodeId> = p
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.last_seen) >= timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &gone {
            p.remove(id);
        }
        gone
    }
}

#[async_trait]
impl Discovery for PeerTable {
    async fn connected_nodes(&self) -> Result<Vec<PeerNode>, DiscoveryError> {
        Ok(self.nodes().await)
    }
}

/// Run discovery: periodic beacons, beacon/response handling, peer expiry.
pub async fn run_discovery(
    peers: PeerTable,
    node_id: NodeId,
    display_name: String,
    discovery_port: u16,
    transport_port: u16,
) -> std::io::Result<()> {
    let socket = Arc::new(make_multicast_socket(discovery_port)?);
    info!(port = discovery_port, group = %MULTICAST_GROUP, "discovery started");

    let beacon = Message::Beacon {
        protocol_version: PROTOCOL_VERSION,
        node_id: node_id.clone(),
        display_name: display_name.clone(),
        listen_port: transport_port,
    };
    let response = Message::DiscoveryResponse {
        protocol_version: PROTOCOL_VERSION,
        node_id: node_id.clone(),
        display_name,
        listen_port: transport_port,
    };
    let beacon_frame = encode_frame(&beacon).map_err(invalid_data)?;
    let response_frame = encode_frame(&response).map_err(invalid_data)?;

    let mut tasks = JoinSet::new();
    tasks.spawn(beacon_loop(socket.clone(), beacon_frame, discovery_port));
    tasks.spawn(recv_loop(socket, peers.clone(), node_id, response_frame));
    tasks.spawn(peer_timeout_loop(peers));
    supervise(tasks).await
}

/// Wait on the discovery loops. The first one to fail stops the rest and its error is returned.
async fn supervise(mut tasks: JoinSet<std::io::Result<()>>) -> std::io::Result<()> {
    while let Some(joined) = tasks.join_next().await {
        joined.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
    }
    Ok(())
}

/// Tell peers we are leaving. Best effort.
pub async fn announce_leave(node_id: NodeId, discovery_port: u16) -> std::io::Result<()> {
    let frame = encode_frame(&Message::Leave { node_id }).map_err(invalid_data)?;
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket
        .send_to(&frame, SocketAddr::from((MULTICAST_GROUP, discovery_port)))
        .await?;
    Ok(())
}

fn make_multicast_socket(discovery_port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, discovery_port))?;
    std_sock.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

fn invalid_data(e: impl std::error::Error + Send + Sync + 'static) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e)
}

async fn beacon_loop(
    socket: Arc<UdpSocket>,
    frame: Vec<u8>,
    discovery_port: u16,
) -> std::io::Result<()> {
    let dest = SocketAddr::from((MULTICAST_GROUP, discovery_port));
    loop {
        if let Err(e) = socket.send_to(&frame, dest).await {
            warn!(error = %e, "beacon send failed");
        }
        tokio::time::sleep(BEACON_INTERVAL).await;
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    peers: PeerTable,
    my_id: NodeId,
    response_frame: Vec<u8>,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; 65536];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        let Ok((msg, _)) = decode_frame(&buf[..n]) else {
            debug!(%from, "ignoring undecodable datagram");
            continue;
        };
        match msg {
            Message::Beacon {
                protocol_version,
                node_id,
                display_name,
                listen_port,
            }
            | Message::DiscoveryResponse {
                protocol_version,
                node_id,
                display_name,
                listen_port,
            } => {
                if protocol_version != PROTOCOL_VERSION || node_id == my_id {
                    continue;
                }
                let addr = SocketAddr::new(from.ip(), listen_port);
                if peers.upsert(node_id.clone(), display_name.clone(), addr).await {
                    info!(node = %node_id, name = %display_name, %addr, "peer joined");
                    // Answer unknown peers directly so they learn about us before our next beacon.
                    let _ = socket.send_to(&response_frame, from).await;
                }
            }
            Message::Leave { node_id } => {
                if peers.remove(&node_id).await {
                    info!(node = %node_id, "peer left");
                }
            }
            _ => {}
        }
    }
}

async fn peer_timeout_loop(peers: PeerTable) -> std::io::Result<()> {
    loop {
        tokio::time::sleep(BEACON_INTERVAL).await;
        for id in peers.expire(Instant::now(), PEER_TIMEOUT).await {
            info!(node = %id, "peer timed out");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 20], port))
    }

    #[tokio::test]
    async fn upsert_reports_new_peers_once() {
        let table = PeerTable::new();
        assert!(table.upsert(NodeId::new("w"), "Watch".into(), addr(1)).await);
        assert!(!table.upsert(NodeId::new("w"), "Watch".into(), addr(2)).await);
        assert_eq!(table.addr_of(&NodeId::new("w")).await, Some(addr(2)));
    }

    #[tokio::test]
    async fn connected_nodes_sorted() {
        let table = PeerTable::new();
        table.upsert(NodeId::new("b"), "B".into(), addr(1)).await;
        table.upsert(NodeId::new("a"), "A".into(), addr(2)).await;
        let nodes = table.connected_nodes().await.unwrap();
        let ids: Vec<_> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(nodes[0].display_name, "A");
    }

    #[tokio::test]
    async fn stale_peers_expire() {
        let table = PeerTable::new();
        let start = Instant::now();
        table
            .upsert_at(NodeId::new("old"), "Old".into(), addr(1), start)
            .await;
        table
            .upsert_at(NodeId::new("new"), "New".into(), addr(2), start + PEER_TIMEOUT)
            .await;
        let gone = table.expire(start + PEER_TIMEOUT, PEER_TIMEOUT).await;
        assert_eq!(gone, [NodeId::new("old")]);
        assert_eq!(table.nodes().await.len(), 1);
    }

    #[tokio::test]
    async fn failing_loop_ends_discovery_with_its_error() {
        let mut tasks = JoinSet::new();
        tasks.spawn(async {
            std::future::pending::<()>().await;
            Ok(())
        });
        tasks.spawn(async {
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "socket gone",
            ))
        });
        let r = tokio::time::timeout(Duration::from_secs(1), supervise(tasks))
            .await
            .expect("supervise kept waiting after a loop failed");
        assert_eq!(r.unwrap_err().kind(), std::io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn leave_removes_peer() {
        let table = PeerTable::new();
        table.upsert(NodeId::new("w"), "W".into(), addr(1)).await;
        assert!(table.remove(&NodeId::new("w")).await);
        assert!(!table.remove(&NodeId::new("w")).await);
        assert!(table.connected_nodes().await.unwrap().is_empty());
    }
}
