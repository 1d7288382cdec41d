//! Crate-level error type.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::io;
use std::net::SocketAddr;

use crate::config::ConfigError;
use crate::discovery::DiscoveryError;
use crate::models::Collection;
use crate::store::StoreError;

pub type Result<T, E = DataShareError> = std::result::Result<T, E>;

/// Errors surfaced by the data sharing server.
#[derive(Debug)]
pub enum DataShareError {
    /// Collection name outside the tracked set.
    UnknownCollection(String),
    /// No live record with this id.
    RecordNotFound(Collection, String),
    /// Request body had the wrong shape.
    InvalidBody(String),
    /// Operation needs a shared folder but none is configured.
    SharedPathNotConfigured,
    /// Reading or writing local or shared storage failed.
    Storage(StoreError),
    /// Discovery could not start.
    Discovery(DiscoveryError),
    /// HTTP listener could not bind.
    BindError(SocketAddr, io::Error),
    /// Shared folder watcher could not start.
    WatchError(notify::Error),
    Config(ConfigError),
}

impl std::fmt::Display for DataShareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataShareError::UnknownCollection(name) => write!(f, "Unknown collection: {}", name),
            DataShareError::RecordNotFound(collection, id) => {
                write!(f, "No record '{}' in {}", id, collection)
            }
            DataShareError::InvalidBody(e) => write!(f, "Invalid request body: {}", e),
            DataShareError::SharedPathNotConfigured => {
                write!(f, "Shared folder not configured. Set shared_path in config.")
            }
            DataShareError::Storage(e) => write!(f, "Storage error: {}", e),
            DataShareError::Discovery(e) => write!(f, "{}", e),
            DataShareError::BindError(addr, e) => {
                write!(f, "Failed to listen on {}: {}", addr, e)
            }
            DataShareError::WatchError(e) => write!(f, "Failed to watch shared folder: {}", e),
            DataShareError::Config(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for DataShareError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DataShareError::Storage(e) => Some(e),
            DataShareError::Discovery(e) => Some(e),
            DataShareError::BindError(_, e) => Some(e),
            DataShareError::WatchError(e) => Some(e),
            DataShareError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for DataShareError {
    fn from(e: StoreError) -> Self {
        DataShareError::Storage(e)
    }
}

impl From<DiscoveryError> for DataShareError {
    fn from(e: DiscoveryError) -> Self {
        DataShareError::Discovery(e)
    }
}

impl From<ConfigError> for DataShareError {
    fn from(e: ConfigError) -> Self {
        DataShareError::Config(e)
    }
}

impl From<notify::Error> for DataShareError {
    fn from(e: notify::Error) -> Self {
        DataShareError::WatchError(e)
    }
}

impl DataShareError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DataShareError::UnknownCollection(_)
            | DataShareError::InvalidBody(_)
            | DataShareError::SharedPathNotConfigured => StatusCode::BAD_REQUEST,
            DataShareError::RecordNotFound(..) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DataShareError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (
            status,
            Json(json!({
                "success": false,
                "error": self.to_string(),
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            DataShareError::UnknownCollection("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            DataShareError::RecordNotFound(Collection::Customers, "1".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        let io = StoreError::IoError("/nope".into(), io::Error::other("denied"));
        assert_eq!(
            DataShareError::from(io).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_display_is_human_readable() {
        let err = DataShareError::RecordNotFound(Collection::Quotes, "q-7".into());
        assert_eq!(err.to_string(), "No record 'q-7' in quotes");
    }
}
