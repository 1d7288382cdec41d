//! Peer-to-peer data sharing for small installations on a LAN.
//!
//! Each node keeps its own copy of a fixed set of collections and converges
//! with the others through a shared snapshot file, direct HTTP pushes to
//! peers found by UDP discovery, and record-level last-writer-wins merging.
//! Connected clients are told about changes over a WebSocket push channel.

pub mod config;
pub mod discovery;
pub mod error;
pub mod models;
pub mod notifier;
pub mod server;
pub mod store;
pub mod sync;

pub use config::{ConfigError, ConfigSource, ConfigValue, ServerConfig};
pub use error::{DataShareError, Result};
pub use models::{Collection, NodeMode, Record, Snapshot};
pub use server::DataSharingServer;
