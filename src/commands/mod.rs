mod auto_sync;
mod client;
mod config_cmd;
mod node;
mod watch;

pub use auto_sync::AutoSyncCommand;
pub use client::NodeClient;
pub use config_cmd::ConfigCommand;
pub use node::{export, import, peers, status};
pub use watch::WatchCommand;
