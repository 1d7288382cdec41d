//! HTTP endpoints.

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use tower_http::trace::TraceLayer;

use super::{ws, AppState};
use crate::error::{DataShareError, Result};
use crate::models::record::timestamp;
use crate::models::{Collection, Record, Snapshot};
use crate::sync::{AutoSyncStatus, ImportOutcome, PeerSyncRequest, PeerSyncResponse};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route(
            "/api/data/{collection}",
            get(list_records).post(replace_collection),
        )
        .route("/api/data/{collection}/add", post(add_record))
        .route(
            "/api/data/{collection}/{id}",
            put(update_record).delete(delete_record),
        )
        .route("/api/sync", post(sync_collections))
        .route("/api/sync/peer", post(peer_sync))
        .route("/api/sync/timestamps", get(sync_timestamps))
        .route("/api/auto-sync/start", post(start_auto_sync))
        .route("/api/auto-sync/stop", post(stop_auto_sync))
        .route("/api/auto-sync/status", get(auto_sync_status))
        .route("/api/export", post(export_backup))
        .route("/api/import", post(import_snapshot))
        .route("/api/peers", get(list_peers))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn collection(name: &str) -> Result<Collection> {
    Collection::parse(name).ok_or_else(|| DataShareError::UnknownCollection(name.to_string()))
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| DataShareError::InvalidBody(e.body_text()))
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub mode: String,
    pub shared_path: Option<PathBuf>,
    pub node_id: String,
    pub auto_sync: bool,
    pub peers: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let c = &state.coordinator;
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: timestamp(Utc::now()),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mode: c.mode().to_string(),
        shared_path: c.shared_path().map(|p| p.to_path_buf()),
        node_id: c.node_id().to_string(),
        auto_sync: c.auto_sync_status().await.running,
        peers: c.peers().len().await,
    })
}

// ============================================================================
// Collections
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct DataQuery {
    #[serde(rename = "includeDeleted", default)]
    include_deleted: bool,
}

async fn list_records(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<DataQuery>,
) -> Result<Json<Vec<Record>>> {
    let records = state
        .coordinator
        .records(collection(&name)?, query.include_deleted)
        .await?;
    Ok(Json(records))
}

async fn replace_collection(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: std::result::Result<Json<Vec<Record>>, JsonRejection>,
) -> Result<Json<Value>> {
    let collection = collection(&name)?;
    let records = state
        .coordinator
        .replace_collection(collection, body(payload)?)
        .await?;
    Ok(Json(json!({ "success": true, "count": records.len() })))
}

async fn add_record(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: std::result::Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<Json<Value>> {
    let collection = collection(&name)?;
    let (item, data) = state
        .coordinator
        .add_record(collection, body(payload)?)
        .await?;
    Ok(Json(json!({ "success": true, "item": item, "data": data })))
}

async fn update_record(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
    payload: std::result::Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<Json<Value>> {
    let collection = collection(&name)?;
    let item = state
        .coordinator
        .update_record(collection, &id, body(payload)?)
        .await?;
    Ok(Json(json!({ "success": true, "item": item })))
}

async fn delete_record(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let collection = collection(&name)?;
    let item = state.coordinator.delete_record(collection, &id).await?;
    Ok(Json(json!({ "success": true, "item": item })))
}

// ============================================================================
// Sync
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct SyncRequest {
    collections: Option<Vec<String>>,
}

/// Live contents of the requested collections. An empty body means all.
async fn sync_collections(State(state): State<AppState>, raw: Bytes) -> Result<Json<Snapshot>> {
    let request: SyncRequest = if raw.iter().all(u8::is_ascii_whitespace) {
        SyncRequest::default()
    } else {
        serde_json::from_slice(&raw).map_err(|e| DataShareError::InvalidBody(e.to_string()))?
    };

    let requested = request
        .collections
        .map(|names| names.iter().map(|n| collection(n)).collect::<Result<Vec<_>>>())
        .transpose()?;

    let snapshot = state
        .coordinator
        .collections_snapshot(requested.as_deref())
        .await?;
    Ok(Json(snapshot))
}

async fn peer_sync(
    State(state): State<AppState>,
    payload: std::result::Result<Json<PeerSyncRequest>, JsonRejection>,
) -> Result<Json<PeerSyncResponse>> {
    let request = body(payload)?;
    let outcome = state
        .coordinator
        .receive_peer_data(request.collection, request.peer_data)
        .await?;
    Ok(Json(PeerSyncResponse {
        success: true,
        changed: outcome.changed,
        count: outcome.count,
    }))
}

async fn sync_timestamps(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.coordinator.timestamps().await))
}

// ============================================================================
// Auto-sync and manual operations
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSyncResponse {
    pub success: bool,
    /// False when the request did not change the timer state.
    pub changed: bool,
    pub status: AutoSyncStatus,
}

async fn start_auto_sync(State(state): State<AppState>) -> Result<Json<AutoSyncResponse>> {
    let changed = state.coordinator.start_auto_sync().await?;
    Ok(Json(AutoSyncResponse {
        success: true,
        changed,
        status: state.coordinator.auto_sync_status().await,
    }))
}

async fn stop_auto_sync(State(state): State<AppState>) -> Json<AutoSyncResponse> {
    let changed = state.coordinator.stop_auto_sync().await;
    Json(AutoSyncResponse {
        success: true,
        changed,
        status: state.coordinator.auto_sync_status().await,
    })
}

async fn auto_sync_status(State(state): State<AppState>) -> Json<AutoSyncStatus> {
    Json(state.coordinator.auto_sync_status().await)
}

async fn export_backup(State(state): State<AppState>) -> Result<Json<Value>> {
    let path = state.coordinator.export_backup().await?;
    Ok(Json(json!({ "success": true, "path": path })))
}

async fn import_snapshot(State(state): State<AppState>) -> Result<Json<Value>> {
    let outcome = state.coordinator.import_snapshot().await?;
    let collections = match &outcome {
        ImportOutcome::Applied { changed } => changed.clone(),
        _ => Vec::new(),
    };
    Ok(Json(json!({
        "success": true,
        "changed": outcome.changed(),
        "collections": collections,
        "outcome": outcome,
    })))
}

async fn list_peers(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "peers": state.coordinator.peers().list().await }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::PeerSet;
    use crate::models::NodeMode;
    use crate::notifier::ChangeNotifier;
    use crate::store::{CollectionStore, MemoryStore};
    use crate::sync::{SyncCoordinator, SyncSettings, DEFAULT_SYNC_INTERVAL};
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use axum::response::Response;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        store: Arc<MemoryStore>,
        coordinator: Arc<SyncCoordinator>,
    }

    fn app_with(shared: Option<PathBuf>, data_dir: PathBuf) -> TestApp {
        let store = Arc::new(MemoryStore::new());
        let coordinator = Arc::new(SyncCoordinator::new(
            store.clone(),
            Arc::new(ChangeNotifier::new()),
            PeerSet::new(),
            SyncSettings {
                mode: NodeMode::Master,
                node_id: "node-a".into(),
                shared_path: shared,
                data_dir,
                interval: DEFAULT_SYNC_INTERVAL,
            },
        ));
        TestApp {
            router: router(AppState {
                coordinator: coordinator.clone(),
            }),
            store,
            coordinator,
        }
    }

    fn app() -> TestApp {
        app_with(None, PathBuf::from("/nonexistent"))
    }

    async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                request = request.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let response = send(&app.router, Method::GET, "/api/health", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        let health: HealthResponse = serde_json::from_value(json_body(response).await).unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.mode, "master");
        assert_eq!(health.node_id, "node-a");
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
        assert!(health.shared_path.is_none());
        assert!(!health.auto_sync);
    }

    #[tokio::test]
    async fn test_add_then_list() {
        let app = app();

        let response = send(
            &app.router,
            Method::POST,
            "/api/data/customers/add",
            Some(json!({"name": "X"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;

        let item = &body["item"];
        let id = item["id"].as_str().unwrap();
        assert!(!id.is_empty());
        assert_eq!(item["createdAt"], item["updatedAt"]);
        assert_eq!(item["name"], "X");
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let response = send(&app.router, Method::GET, "/api/data/customers", None).await;
        let list = json_body(response).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["id"], id);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let app = app();
        let body = json_body(
            send(
                &app.router,
                Method::POST,
                "/api/data/projects/add",
                Some(json!({"title": "Roof"})),
            )
            .await,
        )
        .await;
        let id = body["item"]["id"].as_str().unwrap().to_string();

        let response = send(
            &app.router,
            Method::PUT,
            &format!("/api/data/projects/{}", id),
            Some(json!({"title": "New roof", "id": "hijack"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let updated = json_body(response).await;
        assert_eq!(updated["item"]["title"], "New roof");
        assert_eq!(updated["item"]["id"], id.as_str());

        let uri = format!("/api/data/projects/{}", id);
        let response = send(&app.router, Method::DELETE, &uri, None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app.router, Method::DELETE, &uri, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let error = json_body(response).await;
        assert_eq!(error["success"], false);
        assert!(error["error"].is_string());

        let visible = json_body(send(&app.router, Method::GET, "/api/data/projects", None).await).await;
        assert!(visible.as_array().unwrap().is_empty());

        let all = json_body(
            send(
                &app.router,
                Method::GET,
                "/api/data/projects?includeDeleted=true",
                None,
            )
            .await,
        )
        .await;
        assert_eq!(all[0]["_deleted"], true);
    }

    #[tokio::test]
    async fn test_replace_collection() {
        let app = app();
        let response = send(
            &app.router,
            Method::POST,
            "/api/data/materials",
            Some(json!([{"id": "m1", "name": "Oak"}, {"id": "m2", "name": "Pine"}])),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["count"], 2);
        assert_eq!(app.store.read(Collection::Materials).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_collection_and_bad_body() {
        let app = app();

        let response = send(&app.router, Method::GET, "/api/data/widgets", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["success"], false);

        let response = send(
            &app.router,
            Method::POST,
            "/api/data/customers",
            Some(json!({"not": "an array"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["success"], false);
    }

    #[tokio::test]
    async fn test_peer_sync_merges() {
        let app = app();
        app.store
            .write(
                Collection::Customers,
                &[serde_json::from_value(json!({"id": "1", "updatedAt": "2024-01-01T00:00:00.000Z"}))
                    .unwrap()],
            )
            .unwrap();

        let response = send(
            &app.router,
            Method::POST,
            "/api/sync/peer",
            Some(json!({
                "collection": "customers",
                "peerData": [{"id": "1", "updatedAt": "2024-02-01T00:00:00.000Z", "name": "B"}]
            })),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let result: PeerSyncResponse = serde_json::from_value(json_body(response).await).unwrap();
        assert!(result.success);
        assert!(result.changed);
        assert_eq!(result.count, 1);
        assert_eq!(
            app.store.read(Collection::Customers).unwrap()[0].fields()["name"],
            "B"
        );

        let stamps = json_body(send(&app.router, Method::GET, "/api/sync/timestamps", None).await).await;
        assert!(stamps["customers"].is_string());
    }

    #[tokio::test]
    async fn test_sync_returns_requested_collections() {
        let app = app();

        let all = json_body(send(&app.router, Method::POST, "/api/sync", None).await).await;
        assert_eq!(all["_source"], "master");
        assert!(all["invoices"].is_array());

        let some = json_body(
            send(
                &app.router,
                Method::POST,
                "/api/sync",
                Some(json!({"collections": ["quotes"]})),
            )
            .await,
        )
        .await;
        assert!(some["quotes"].is_array());
        assert!(some.get("customers").is_none());

        let response = send(
            &app.router,
            Method::POST,
            "/api/sync",
            Some(json!({"collections": ["widgets"]})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_shared_operations_without_shared_path() {
        let app = app();

        for uri in ["/api/import", "/api/auto-sync/start"] {
            let response = send(&app.router, Method::POST, uri, None).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }

        let status = json_body(send(&app.router, Method::GET, "/api/auto-sync/status", None).await).await;
        assert_eq!(status["running"], false);
    }

    #[tokio::test]
    async fn test_auto_sync_and_manual_operations() {
        let shared = TempDir::new().unwrap();
        let app = app_with(Some(shared.path().to_path_buf()), PathBuf::from("/nonexistent"));

        let response = send(&app.router, Method::POST, "/api/auto-sync/start", None).await;
        let started: AutoSyncResponse = serde_json::from_value(json_body(response).await).unwrap();
        assert!(started.changed);
        assert!(started.status.running);

        let response = send(&app.router, Method::POST, "/api/auto-sync/stop", None).await;
        let stopped: AutoSyncResponse = serde_json::from_value(json_body(response).await).unwrap();
        assert!(stopped.changed);
        assert!(!stopped.status.running);

        let export = json_body(send(&app.router, Method::POST, "/api/export", None).await).await;
        assert_eq!(export["success"], true);
        let path = PathBuf::from(export["path"].as_str().unwrap());
        assert!(path.starts_with(shared.path().join("backups")));
        assert!(path.exists());

        // Only this node has written to the shared folder.
        let import = json_body(send(&app.router, Method::POST, "/api/import", None).await).await;
        assert_eq!(import["success"], true);
        assert_eq!(import["changed"], false);

        app.coordinator.stop_auto_sync().await;
    }

    #[tokio::test]
    async fn test_list_peers() {
        let app = app();
        app.coordinator.peers().insert("10.0.0.9:3001").await;

        let body = json_body(send(&app.router, Method::GET, "/api/peers", None).await).await;
        assert_eq!(body["peers"], json!(["10.0.0.9:3001"]));
    }
}
