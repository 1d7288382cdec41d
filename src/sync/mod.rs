//! Replication between nodes.
//!
//! Nodes converge through two independent channels:
//!
//! - a shared folder holding one JSON snapshot (`shared-data.json`) that every
//!   node periodically exports to and imports from
//! - direct HTTP pushes of whole collections to peers found by discovery
//!
//! Both paths reconcile record by record with last-writer-wins on `updatedAt`
//! (see [`merge`]).

pub mod coordinator;
pub mod merge;
pub mod peer;
pub mod scheduler;
pub mod snapshot;
pub mod watcher;

pub use coordinator::{
    AutoSyncStatus, CycleReport, ExportOutcome, ImportOutcome, MergeOutcome, SyncCoordinator,
    SyncSettings, DEFAULT_SYNC_INTERVAL,
};
pub use merge::merge_records;
pub use peer::{PeerClient, PeerError, PeerSyncRequest, PeerSyncResponse};
pub use scheduler::PeriodicTask;
pub use snapshot::{SharedSnapshot, SNAPSHOT_FILENAME};
pub use watcher::SnapshotWatcher;
