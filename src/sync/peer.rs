//! HTTP client for pushing collections directly to other nodes.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::{Collection, Record};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Body of `POST /api/sync/peer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSyncRequest {
    pub collection: Collection,
    #[serde(rename = "peerData")]
    pub peer_data: Vec<Record>,
}

/// Response of `POST /api/sync/peer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSyncResponse {
    pub success: bool,
    /// Whether the receiving node's collection changed.
    #[serde(default)]
    pub changed: bool,
    /// Number of records the receiver holds after merging.
    #[serde(default)]
    pub count: usize,
}

/// Errors talking to a peer.
#[derive(Debug)]
pub enum PeerError {
    /// Connection refused, timeout or other transport failure.
    RequestError(String, reqwest::Error),
    /// Peer answered with a non-success status.
    StatusError(String, StatusCode, String),
}

impl std::fmt::Display for PeerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerError::RequestError(peer, e) => write!(f, "Request to peer {} failed: {}", peer, e),
            PeerError::StatusError(peer, status, body) => {
                write!(f, "Peer {} responded {}: {}", peer, status, body)
            }
        }
    }
}

impl std::error::Error for PeerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PeerError::RequestError(_, e) => Some(e),
            PeerError::StatusError(..) => None,
        }
    }
}

/// Client for peer-to-peer collection pushes.
#[derive(Debug, Clone)]
pub struct PeerClient {
    http: reqwest::Client,
}

impl PeerClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// URL of the peer-sync endpoint for `peer` (`address:port`).
    pub fn sync_url(peer: &str) -> String {
        if peer.starts_with("http://") || peer.starts_with("https://") {
            format!("{}/api/sync/peer", peer.trim_end_matches('/'))
        } else {
            format!("http://{}/api/sync/peer", peer)
        }
    }

    /// Sends the full `records` of `collection` to `peer`, which merges them
    /// into its own copy.
    pub async fn push_collection(
        &self,
        peer: &str,
        collection: Collection,
        records: &[Record],
    ) -> Result<PeerSyncResponse, PeerError> {
        let body = PeerSyncRequest {
            collection,
            peer_data: records.to_vec(),
        };

        let response = self
            .http
            .post(Self::sync_url(peer))
            .json(&body)
            .send()
            .await
            .map_err(|e| PeerError::RequestError(peer.to_string(), e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PeerError::StatusError(peer.to_string(), status, text));
        }

        response
            .json()
            .await
            .map_err(|e| PeerError::RequestError(peer.to_string(), e))
    }
}

impl Default for PeerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_url() {
        assert_eq!(
            PeerClient::sync_url("192.168.1.5:3001"),
            "http://192.168.1.5:3001/api/sync/peer"
        );
        assert_eq!(
            PeerClient::sync_url("http://host:3001/"),
            "http://host:3001/api/sync/peer"
        );
        assert_eq!(
            PeerClient::sync_url("[::1]:3001"),
            "http://[::1]:3001/api/sync/peer"
        );
    }

    #[test]
    fn test_request_wire_format() {
        let request = PeerSyncRequest {
            collection: Collection::Customers,
            peer_data: vec![serde_json::from_value(serde_json::json!({"id": "1"})).unwrap()],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["collection"], "customers");
        assert_eq!(json["peerData"][0]["id"], "1");
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_request_error() {
        // Bind then drop to get a port nothing listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let client = PeerClient::new();
        let result = client
            .push_collection(&format!("127.0.0.1:{}", port), Collection::Customers, &[])
            .await;

        assert!(matches!(result, Err(PeerError::RequestError(_, _))));
    }
}
