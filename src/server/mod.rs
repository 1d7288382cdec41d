//! Data sharing server: owns the store, coordinator, discovery and push
//! channel of one node and manages their lifecycle.

pub mod routes;
pub mod ws;

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::discovery::{DiscoveryConfig, DiscoveryService, PeerSet};
use crate::error::{DataShareError, Result};
use crate::notifier::ChangeNotifier;
use crate::store::{CollectionStore, FileStore};
use crate::sync::{SnapshotWatcher, SyncCoordinator, SyncSettings};

/// How long `stop` waits for in-flight requests before aborting.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SyncCoordinator>,
}

struct Running {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<()>,
    discovery: Option<DiscoveryService>,
    watcher: Option<SnapshotWatcher>,
}

/// One node's HTTP surface plus its background services.
pub struct DataSharingServer {
    config: ServerConfig,
    coordinator: Arc<SyncCoordinator>,
    running: Mutex<Option<Running>>,
}

impl DataSharingServer {
    /// Creates a server storing collections under the configured data dir.
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(FileStore::new(&config.data_dir.value));
        Self::with_store(config, store)
    }

    pub fn with_store(config: ServerConfig, store: Arc<dyn CollectionStore>) -> Self {
        let settings = SyncSettings {
            mode: config.mode.value,
            node_id: config.node_id.value.clone(),
            shared_path: config.shared_path.value.clone(),
            data_dir: config.data_dir.value.clone(),
            interval: config.sync_interval(),
        };
        let coordinator = Arc::new(SyncCoordinator::new(
            store,
            Arc::new(ChangeNotifier::new()),
            PeerSet::new(),
            settings,
        ));

        Self {
            config,
            coordinator,
            running: Mutex::new(None),
        }
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// HTTP routes, independent of any listener.
    pub fn router(&self) -> Router {
        routes::router(AppState {
            coordinator: Arc::clone(&self.coordinator),
        })
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Binds the HTTP listener and starts discovery, auto-sync and the
    /// shared folder watcher. Returns the bound address. Calling it while
    /// running returns the existing address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(running) = running.as_ref() {
            return Ok(running.local_addr);
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port.value));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| DataShareError::BindError(addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| DataShareError::BindError(addr, e))?;

        let peers = self.coordinator.peers();
        for peer in &self.config.peers {
            peers.insert(peer.clone()).await;
        }

        let discovery = if self.config.discovery.value {
            let service = DiscoveryService::with_peers(
                DiscoveryConfig::lan(
                    self.config.discovery_port.value,
                    local_addr.port(),
                    self.config.broadcast_interval(),
                ),
                peers.clone(),
            );
            service.start().await?;
            Some(service)
        } else {
            None
        };

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let app = self.router();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
            }
        });

        let mut watcher = None;
        if self.coordinator.shared_path().is_some() {
            if self.config.auto_sync.value {
                if let Err(e) = self.coordinator.start_auto_sync().await {
                    tracing::warn!(error = %e, "Auto-sync not started");
                }
            }
            match SnapshotWatcher::start(Arc::clone(&self.coordinator)) {
                Ok(w) => watcher = Some(w),
                Err(e) => tracing::warn!(error = %e, "Shared folder watcher not started"),
            }
        }

        tracing::info!(
            %local_addr,
            mode = %self.coordinator.mode(),
            node_id = %self.coordinator.node_id(),
            shared_path = ?self.coordinator.shared_path(),
            "Data sharing server started"
        );

        *running = Some(Running {
            local_addr,
            shutdown,
            server,
            discovery,
            watcher,
        });
        Ok(local_addr)
    }

    /// Stops every background service and the HTTP listener. Stopping a
    /// stopped server is a no-op.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        self.coordinator.stop_auto_sync().await;
        if let Some(watcher) = running.watcher {
            watcher.stop();
        }
        if let Some(discovery) = running.discovery {
            discovery.stop().await;
        }
        self.coordinator.notifier().close_all().await;

        let _ = running.shutdown.send(());
        let mut server = running.server;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
            tracing::warn!("HTTP server did not drain in time, aborting");
            server.abort();
        }

        tracing::info!("Data sharing server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Collection, NodeMode, Record, Snapshot};
    use crate::store::MemoryStore;
    use crate::sync::{SharedSnapshot, DEFAULT_SYNC_INTERVAL};
    use chrono::Utc;
    use serde_json::json;
    use std::path::PathBuf;

    fn test_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.port.value = 0;
        config.discovery.value = false;
        config.data_dir.value = PathBuf::from("/nonexistent");
        config
    }

    fn record(id: &str, updated_at: &str) -> Record {
        serde_json::from_value(json!({"id": id, "updatedAt": updated_at})).unwrap()
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let server = DataSharingServer::with_store(test_config(), Arc::new(MemoryStore::new()));

        let addr = server.start().await.unwrap();
        assert_eq!(server.start().await.unwrap(), addr);
        assert!(server.is_running().await);

        server.stop().await;
        server.stop().await;
        assert!(!server.is_running().await);
        assert!(server.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn test_port_in_use_is_reported() {
        let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let mut config = test_config();
        config.port.value = taken.local_addr().unwrap().port();

        let server = DataSharingServer::with_store(config, Arc::new(MemoryStore::new()));
        let result = server.start().await;

        assert!(matches!(result, Err(DataShareError::BindError(_, _))));
        assert!(!server.is_running().await);
    }

    #[tokio::test]
    async fn test_peer_push_reaches_running_node() {
        // Node A serves HTTP with an older copy of customer 1.
        let a_store = Arc::new(MemoryStore::new());
        a_store
            .write(
                Collection::Customers,
                &[record("1", "2024-01-01T00:00:00.000Z")],
            )
            .unwrap();
        let a = DataSharingServer::with_store(test_config(), a_store.clone());
        let addr = a.start().await.unwrap();

        // Node B holds a newer copy and knows A as a peer.
        let b_store = Arc::new(MemoryStore::new());
        let newer = record("1", "2024-02-01T00:00:00.000Z");
        b_store
            .write(Collection::Customers, &[newer.clone()])
            .unwrap();
        let peers = PeerSet::new();
        peers.insert(format!("127.0.0.1:{}", addr.port())).await;
        let b = SyncCoordinator::new(
            b_store,
            Arc::new(ChangeNotifier::new()),
            peers,
            SyncSettings {
                mode: NodeMode::Client,
                node_id: "b".into(),
                shared_path: None,
                data_dir: PathBuf::from("/nonexistent"),
                interval: DEFAULT_SYNC_INTERVAL,
            },
        );

        assert_eq!(b.push_collection(Collection::Customers).await, 1);
        assert_eq!(a_store.read(Collection::Customers).unwrap(), vec![newer]);

        a.stop().await;
    }

    /// Polls `check` until it holds or five seconds pass.
    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        check()
    }

    #[tokio::test]
    async fn test_added_record_is_pushed_to_peers() {
        let a_store = Arc::new(MemoryStore::new());
        let a = DataSharingServer::with_store(test_config(), a_store.clone());
        let a_addr = a.start().await.unwrap();

        let mut config = test_config();
        config.peers = vec![format!("127.0.0.1:{}", a_addr.port())];
        let b = DataSharingServer::with_store(config, Arc::new(MemoryStore::new()));
        let b_addr = b.start().await.unwrap();

        let response: serde_json::Value = reqwest::Client::new()
            .post(format!(
                "http://127.0.0.1:{}/api/data/customers/add",
                b_addr.port()
            ))
            .json(&json!({"name": "Acme"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = response["item"]["id"].as_str().unwrap().to_string();

        let arrived = eventually(|| {
            a_store
                .read(Collection::Customers)
                .unwrap()
                .iter()
                .any(|r| r.key().as_deref() == Some(id.as_str()))
        })
        .await;
        assert!(arrived);

        b.stop().await;
        a.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_foreign_snapshot_is_imported_on_change() {
        let shared = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.shared_path.value = Some(shared.path().to_path_buf());
        config.auto_sync.value = false;

        let store = Arc::new(MemoryStore::new());
        let server = DataSharingServer::with_store(config, store.clone());
        server.start().await.unwrap();
        assert!(!server.coordinator().auto_sync_status().await.running);

        let incoming = record("remote-1", "2024-01-01T00:00:00.000Z");
        let mut snapshot = Snapshot::new(NodeMode::Master, "another-node", Utc::now());
        snapshot.insert(Collection::Customers, vec![incoming.clone()]);
        SharedSnapshot::new(shared.path()).write(&snapshot).unwrap();

        let imported = eventually(|| {
            store.read(Collection::Customers).unwrap() == vec![incoming.clone()]
        })
        .await;
        assert!(imported);
        assert!(server.coordinator().auto_sync_status().await.last_sync.is_none());

        server.stop().await;
    }

    #[tokio::test]
    async fn test_seed_peers_added_on_start() {
        let mut config = test_config();
        config.peers = vec!["10.1.1.1:3001".into()];
        let server = DataSharingServer::with_store(config, Arc::new(MemoryStore::new()));

        server.start().await.unwrap();
        assert!(server.coordinator().peers().contains("10.1.1.1:3001").await);

        server.stop().await;
    }
}
