//! HTTP client for a running node's operator endpoints.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

use datashare::server::routes::{AutoSyncResponse, HealthResponse};
use datashare::sync::AutoSyncStatus;

/// Errors talking to the node
#[derive(Debug)]
pub enum ClientError {
    /// Node unreachable or response unreadable
    RequestError(reqwest::Error),
    /// Node answered with an error
    ServerError(StatusCode, String),
    WebSocketError(tokio_tungstenite::tungstenite::Error),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::RequestError(e) => write!(f, "Cannot reach node: {}", e),
            ClientError::ServerError(status, message) => {
                write!(f, "Node returned {}: {}", status, message)
            }
            ClientError::WebSocketError(e) => write!(f, "Push channel error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::RequestError(e) => Some(e),
            ClientError::WebSocketError(e) => Some(e),
            ClientError::ServerError(..) => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::RequestError(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocketError(e)
    }
}

/// Client bound to one node's base URL (`http://host:port`).
pub struct NodeClient {
    base_url: String,
    http: reqwest::Client,
}

impl NodeClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the push channel.
    pub fn ws_url(&self) -> String {
        if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}/ws", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}/ws", rest)
        } else {
            format!("ws://{}/ws", self.base_url)
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v["error"].as_str().map(str::to_string))
            .unwrap_or(text);
        Err(ClientError::ServerError(status, message))
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        self.get("/api/health").await
    }

    pub async fn peers(&self) -> Result<Vec<String>, ClientError> {
        let body: Value = self.get("/api/peers").await?;
        Ok(body["peers"]
            .as_array()
            .map(|peers| {
                peers
                    .iter()
                    .filter_map(|p| p.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Writes a backup on the node and returns its path.
    pub async fn export(&self) -> Result<String, ClientError> {
        let body: Value = self.post("/api/export").await?;
        Ok(body["path"].as_str().unwrap_or_default().to_string())
    }

    /// Runs one import; returns the collections that changed.
    pub async fn import(&self) -> Result<Vec<String>, ClientError> {
        let body: Value = self.post("/api/import").await?;
        Ok(body["collections"]
            .as_array()
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn start_auto_sync(&self) -> Result<AutoSyncResponse, ClientError> {
        self.post("/api/auto-sync/start").await
    }

    pub async fn stop_auto_sync(&self) -> Result<AutoSyncResponse, ClientError> {
        self.post("/api/auto-sync/stop").await
    }

    pub async fn auto_sync_status(&self) -> Result<AutoSyncStatus, ClientError> {
        self.get("/api/auto-sync/status").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url() {
        assert_eq!(
            NodeClient::new("http://127.0.0.1:3001/").ws_url(),
            "ws://127.0.0.1:3001/ws"
        );
        assert_eq!(
            NodeClient::new("https://node.lan").ws_url(),
            "wss://node.lan/ws"
        );
        assert_eq!(NodeClient::new("node.lan:3001").ws_url(), "ws://node.lan:3001/ws");
    }
}
