//! Zero-configuration peer discovery over UDP broadcast.
//!
//! Every node broadcasts `{"type":"discovery","port":<http port>}` on the
//! discovery port at startup and then once per interval. A node hearing an
//! announcement from a different service port records the sender as a peer
//! and answers it directly with `{"type":"discovery-response","port":...}`,
//! so both sides learn of each other without waiting for the next round.
//!
//! The peer set only ever grows during a process lifetime; a listed peer may
//! have gone offline since it was heard.
//!
//! A node recognizes its own broadcast echo by the service port alone, so an
//! announcement from another host on the same HTTP port is ignored too. Nodes
//! sharing a port must list each other in the `peers` config instead.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::sync::scheduler::PeriodicTask;

pub const DEFAULT_DISCOVERY_PORT: u16 = 41234;
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_secs(60);

const MAX_DATAGRAM: usize = 1024;

/// Discovery wire messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DiscoveryMessage {
    /// Broadcast announcement.
    #[serde(rename = "discovery")]
    Announce { port: u16 },
    /// Unicast reply to an announcement.
    #[serde(rename = "discovery-response")]
    Response { port: u16 },
}

impl DiscoveryMessage {
    /// Service port the sender listens on.
    pub fn port(&self) -> u16 {
        match self {
            DiscoveryMessage::Announce { port } | DiscoveryMessage::Response { port } => *port,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        // A two-variant enum of integers always serializes.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Decodes a datagram. Anything malformed yields `None`.
    pub fn decode(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }
}

/// Known peers as `address:port` strings.
#[derive(Debug, Clone, Default)]
pub struct PeerSet {
    peers: Arc<RwLock<BTreeSet<String>>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer. Returns true if it was not known yet.
    pub async fn insert(&self, peer: impl Into<String>) -> bool {
        self.peers.write().await.insert(peer.into())
    }

    pub async fn list(&self) -> Vec<String> {
        self.peers.read().await.iter().cloned().collect()
    }

    pub async fn contains(&self, peer: &str) -> bool {
        self.peers.read().await.contains(peer)
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

/// Discovery settings.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Local address the discovery socket binds to.
    pub bind: SocketAddr,
    /// Where announcements are sent; the LAN broadcast address by default.
    pub broadcast: SocketAddr,
    /// HTTP port this node serves on, advertised to peers.
    pub service_port: u16,
    pub interval: Duration,
}

impl DiscoveryConfig {
    /// LAN-wide discovery on `discovery_port`.
    pub fn lan(discovery_port: u16, service_port: u16, interval: Duration) -> Self {
        Self {
            bind: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, discovery_port)),
            broadcast: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, discovery_port)),
            service_port,
            interval,
        }
    }
}

/// Errors from the discovery service.
#[derive(Debug)]
pub enum DiscoveryError {
    /// Binding or configuring the UDP socket failed.
    BindError(SocketAddr, io::Error),
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryError::BindError(addr, e) => {
                write!(f, "Failed to bind discovery socket on {}: {}", addr, e)
            }
        }
    }
}

impl std::error::Error for DiscoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiscoveryError::BindError(_, e) => Some(e),
        }
    }
}

struct Running {
    local_addr: SocketAddr,
    broadcaster: PeriodicTask,
    listener: JoinHandle<()>,
}

/// UDP discovery service. Owns the peer set it fills.
pub struct DiscoveryService {
    config: DiscoveryConfig,
    peers: PeerSet,
    running: Mutex<Option<Running>>,
}

impl DiscoveryService {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self::with_peers(config, PeerSet::new())
    }

    /// Creates a service that records into an existing peer set.
    pub fn with_peers(config: DiscoveryConfig, peers: PeerSet) -> Self {
        Self {
            config,
            peers,
            running: Mutex::new(None),
        }
    }

    pub fn peer_set(&self) -> &PeerSet {
        &self.peers
    }

    /// Current known peers as `address:port`.
    pub async fn peers(&self) -> Vec<String> {
        self.peers.list().await
    }

    /// Address the socket is bound to while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Binds the socket and starts announcing and listening.
    ///
    /// A bind failure is returned to the caller. Starting an already running
    /// service returns its bound address.
    pub async fn start(&self) -> Result<SocketAddr, DiscoveryError> {
        let mut running = self.running.lock().await;
        if let Some(r) = running.as_ref() {
            return Ok(r.local_addr);
        }

        let bind = self.config.bind;
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| DiscoveryError::BindError(bind, e))?;
        socket
            .set_broadcast(true)
            .map_err(|e| DiscoveryError::BindError(bind, e))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| DiscoveryError::BindError(bind, e))?;
        let socket = Arc::new(socket);

        let listener = tokio::spawn(listen(
            Arc::clone(&socket),
            self.peers.clone(),
            self.config.service_port,
        ));

        let announce = DiscoveryMessage::Announce {
            port: self.config.service_port,
        }
        .encode();
        let target = self.config.broadcast;
        let broadcaster = PeriodicTask::spawn("discovery-broadcast", self.config.interval, {
            let socket = Arc::clone(&socket);
            move || {
                let socket = Arc::clone(&socket);
                let announce = announce.clone();
                async move {
                    match socket.send_to(&announce, target).await {
                        Ok(_) => tracing::debug!(%target, "Sent discovery broadcast"),
                        Err(e) => tracing::warn!(%target, error = %e, "Discovery broadcast failed"),
                    }
                }
            }
        });

        tracing::info!(
            %local_addr,
            service_port = self.config.service_port,
            "Discovery service started"
        );

        *running = Some(Running {
            local_addr,
            broadcaster,
            listener,
        });

        Ok(local_addr)
    }

    /// Stops broadcasting and closes the socket. Idempotent.
    pub async fn stop(&self) {
        let Some(mut running) = self.running.lock().await.take() else {
            return;
        };

        running.broadcaster.stop().await;
        running.listener.abort();
        let _ = running.listener.await;

        tracing::info!(local_addr = %running.local_addr, "Discovery service stopped");
    }
}

async fn listen(socket: Arc<UdpSocket>, peers: PeerSet, service_port: u16) {
    let mut buf = [0u8; MAX_DATAGRAM];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::debug!(error = %e, "Discovery receive failed");
                continue;
            }
        };

        let Some(message) = DiscoveryMessage::decode(&buf[..len]) else {
            tracing::debug!(%from, "Ignoring malformed discovery packet");
            continue;
        };

        if let Some(reply) = handle_message(&peers, service_port, message, from).await {
            if let Err(e) = socket.send_to(&reply.encode(), from).await {
                tracing::debug!(%from, error = %e, "Discovery reply failed");
            }
        }
    }
}

/// Records the sender of `message` and returns the reply to send, if any.
async fn handle_message(
    peers: &PeerSet,
    service_port: u16,
    message: DiscoveryMessage,
    from: SocketAddr,
) -> Option<DiscoveryMessage> {
    // Our own broadcast looping back.
    if message.port() == service_port {
        return None;
    }

    let peer = SocketAddr::new(from.ip(), message.port()).to_string();
    if peers.insert(peer.clone()).await {
        tracing::info!(%peer, "Discovered peer");
    }

    match message {
        DiscoveryMessage::Announce { .. } => Some(DiscoveryMessage::Response { port: service_port }),
        DiscoveryMessage::Response { .. } => None,
    }
}
