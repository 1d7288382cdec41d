//! Keeps local collections, the shared snapshot file and peers converging.
//!
//! Three paths move data between nodes:
//!
//! - **Export/import cycle** (timer, default every second): any snapshot
//!   written by another node is merged in first, then the local state is
//!   written to the shared file if it differs from what the file holds, then
//!   the file is read back and imported unless this node wrote it.
//! - **Peer push** (after every local write): the full collection is posted
//!   to every known peer, which merges it. Failures are logged and dropped;
//!   the next write or cycle tries again.
//! - **Peer receive**: a pushed collection is merged into the local one.
//!
//! All reconciliation is record-level last-writer-wins via [`merge_records`].

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use super::merge::merge_records;
use super::peer::PeerClient;
use super::scheduler::PeriodicTask;
use super::snapshot::SharedSnapshot;
use crate::discovery::PeerSet;
use crate::error::{DataShareError, Result};
use crate::models::record::{live, purge_tombstones, timestamp};
use crate::models::{Collection, NodeMode, Record, Snapshot};
use crate::notifier::{ChangeNotifier, ChangeOrigin};
use crate::store::CollectionStore;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_millis(1000);

/// Static settings for a coordinator.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub mode: NodeMode,
    /// Unique writer identity, recorded as `_nodeId` in snapshots.
    pub node_id: String,
    /// Shared folder holding the snapshot file. `None` means local-only.
    pub shared_path: Option<PathBuf>,
    /// Backups go here when there is no shared folder.
    pub data_dir: PathBuf,
    pub interval: Duration,
}

/// Result of the export step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportOutcome {
    Written,
    /// The shared file already held exactly the local state.
    Unchanged,
}

/// Result of the import step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ImportOutcome {
    /// No snapshot file yet, or it was unreadable.
    NoSnapshot,
    /// The file was written by this node and was not applied.
    OwnSnapshot,
    Applied { changed: Vec<Collection> },
}

impl ImportOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, ImportOutcome::Applied { changed } if !changed.is_empty())
    }
}

/// Result of one timer cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub export: ExportOutcome,
    pub import: ImportOutcome,
}

/// Result of merging a peer's collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub changed: bool,
    /// Live records after the merge.
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSyncStatus {
    pub running: bool,
    pub interval_ms: u64,
    pub shared_path: Option<PathBuf>,
    pub last_sync: Option<String>,
    pub last_error: Option<String>,
}

/// Sync coordinator for one node.
pub struct SyncCoordinator {
    store: Arc<dyn CollectionStore>,
    notifier: Arc<ChangeNotifier>,
    peers: PeerSet,
    peer_client: PeerClient,
    shared: Option<SharedSnapshot>,
    settings: SyncSettings,
    /// Serializes read-modify-write of collections.
    store_lock: Mutex<()>,
    /// Serializes export/import against each other.
    cycle_lock: Mutex<()>,
    timestamps: RwLock<BTreeMap<Collection, String>>,
    auto_sync: Mutex<Option<PeriodicTask>>,
    last_sync: RwLock<Option<String>>,
    last_error: RwLock<Option<String>>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn CollectionStore>,
        notifier: Arc<ChangeNotifier>,
        peers: PeerSet,
        settings: SyncSettings,
    ) -> Self {
        let shared = settings.shared_path.clone().map(SharedSnapshot::new);
        Self {
            store,
            notifier,
            peers,
            peer_client: PeerClient::new(),
            shared,
            settings,
            store_lock: Mutex::new(()),
            cycle_lock: Mutex::new(()),
            timestamps: RwLock::new(BTreeMap::new()),
            auto_sync: Mutex::new(None),
            last_sync: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    pub fn mode(&self) -> NodeMode {
        self.settings.mode
    }

    pub fn node_id(&self) -> &str {
        &self.settings.node_id
    }

    pub fn shared_path(&self) -> Option<&Path> {
        self.shared.as_ref().map(SharedSnapshot::dir)
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    // ------------------------------------------------------------------
    // Local CRUD
    // ------------------------------------------------------------------

    /// Reads a collection, hiding tombstones unless `include_deleted`.
    pub async fn records(&self, collection: Collection, include_deleted: bool) -> Result<Vec<Record>> {
        let records = self.store.read(collection)?;
        Ok(if include_deleted {
            records
        } else {
            live(&records)
        })
    }

    /// Replaces the live contents of a collection.
    ///
    /// Previously live records missing from `incoming` become tombstones so
    /// the removal propagates. Returns the live records afterwards.
    pub async fn replace_collection(
        self: &Arc<Self>,
        collection: Collection,
        incoming: Vec<Record>,
    ) -> Result<Vec<Record>> {
        let now = Utc::now();
        let ((), stored) = self
            .modify(collection, |records| {
                let keep: HashSet<String> = incoming.iter().filter_map(Record::key).collect();
                let mut next = incoming;
                for record in records.iter() {
                    let Some(key) = record.key() else { continue };
                    if keep.contains(&key) {
                        continue;
                    }
                    if record.is_deleted() {
                        next.push(record.clone());
                    } else {
                        next.push(record.tombstone(now));
                    }
                }
                *records = next;
                Ok(())
            })
            .await?;

        self.after_local_write(collection).await;
        Ok(live(&stored))
    }

    /// Creates a record from `fields`. Returns it with the live collection.
    pub async fn add_record(
        self: &Arc<Self>,
        collection: Collection,
        fields: Map<String, Value>,
    ) -> Result<(Record, Vec<Record>)> {
        let record = Record::create(fields, Utc::now());
        let ((), stored) = self
            .modify(collection, |records| {
                records.push(record.clone());
                Ok(())
            })
            .await?;

        self.after_local_write(collection).await;
        Ok((record, live(&stored)))
    }

    /// Merges `patch` into the live record `id`.
    pub async fn update_record(
        self: &Arc<Self>,
        collection: Collection,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<Record> {
        let now = Utc::now();
        let (updated, _) = self
            .modify(collection, |records| {
                let record = find_live(records, id)
                    .ok_or_else(|| DataShareError::RecordNotFound(collection, id.to_string()))?;
                record.apply_patch(patch, now);
                Ok(record.clone())
            })
            .await?;

        self.after_local_write(collection).await;
        Ok(updated)
    }

    /// Deletes the live record `id`, leaving a tombstone. Returns the record
    /// as it was before deletion.
    pub async fn delete_record(self: &Arc<Self>, collection: Collection, id: &str) -> Result<Record> {
        let now = Utc::now();
        let (removed, _) = self
            .modify(collection, |records| {
                let record = find_live(records, id)
                    .ok_or_else(|| DataShareError::RecordNotFound(collection, id.to_string()))?;
                let removed = record.clone();
                *record = removed.tombstone(now);
                Ok(removed)
            })
            .await?;

        self.after_local_write(collection).await;
        Ok(removed)
    }

    /// Runs `f` on the stored collection under the store lock and writes the
    /// result back. Nothing is written if `f` fails.
    async fn modify<T>(
        &self,
        collection: Collection,
        f: impl FnOnce(&mut Vec<Record>) -> Result<T>,
    ) -> Result<(T, Vec<Record>)> {
        let _guard = self.store_lock.lock().await;
        let mut records = self.store.read(collection)?;
        let value = f(&mut records)?;
        let records = purge_tombstones(records, Utc::now());
        self.store.write(collection, &records)?;
        Ok((value, records))
    }

    /// Announces a local change and propagates it in the background.
    async fn after_local_write(self: &Arc<Self>, collection: Collection) {
        self.notifier
            .collection_changed(collection, ChangeOrigin::Local)
            .await;

        let export = self.shared.is_some() && self.auto_sync.lock().await.is_some();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.push_collection(collection).await;
            if export {
                if let Err(e) = this.export_snapshot().await {
                    tracing::warn!(%collection, error = %e, "Export after write failed");
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Peer-to-peer
    // ------------------------------------------------------------------

    /// Pushes the full collection to every known peer concurrently.
    ///
    /// Returns how many peers accepted it. Failures are logged per peer.
    pub async fn push_collection(&self, collection: Collection) -> usize {
        let peers = self.peers.list().await;
        if peers.is_empty() {
            return 0;
        }

        let records = match self.store.read(collection) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(%collection, error = %e, "Cannot read collection for peer push");
                return 0;
            }
        };

        let pushes = peers.iter().map(|peer| {
            let records = &records;
            async move {
                match self
                    .peer_client
                    .push_collection(peer, collection, records)
                    .await
                {
                    Ok(response) => {
                        tracing::debug!(%peer, %collection, changed = response.changed, "Pushed collection");
                        true
                    }
                    Err(e) => {
                        tracing::warn!(%peer, %collection, error = %e, "Peer push failed");
                        false
                    }
                }
            }
        });

        join_all(pushes).await.into_iter().filter(|ok| *ok).count()
    }

    /// Merges a collection pushed by a peer into the local one.
    pub async fn receive_peer_data(
        &self,
        collection: Collection,
        remote: Vec<Record>,
    ) -> Result<MergeOutcome> {
        let changed = self.merge_into(collection, &remote).await?;
        let count = live(&self.store.read(collection)?).len();

        if changed {
            tracing::info!(%collection, "Merged peer update");
            self.notifier
                .collection_changed(collection, ChangeOrigin::Peer)
                .await;
        }

        Ok(MergeOutcome { changed, count })
    }

    /// Merges `remote` into the stored collection. Returns true if it changed.
    async fn merge_into(&self, collection: Collection, remote: &[Record]) -> Result<bool> {
        let changed = {
            let _guard = self.store_lock.lock().await;
            let local = self.store.read(collection)?;
            let merged = purge_tombstones(merge_records(&local, remote), Utc::now());
            if merged != local {
                self.store.write(collection, &merged)?;
                true
            } else {
                false
            }
        };

        self.stamp(collection).await;
        Ok(changed)
    }

    // ------------------------------------------------------------------
    // Shared snapshot
    // ------------------------------------------------------------------

    fn shared(&self) -> Result<&SharedSnapshot> {
        self.shared
            .as_ref()
            .ok_or(DataShareError::SharedPathNotConfigured)
    }

    fn is_own(&self, snapshot: &Snapshot) -> bool {
        snapshot.written_by(self.settings.mode, &self.settings.node_id)
    }

    /// Builds a snapshot of `collections` from the local store.
    async fn local_snapshot(&self, collections: &[Collection], include_deleted: bool) -> Result<Snapshot> {
        let _guard = self.store_lock.lock().await;
        let mut snapshot = Snapshot::new(self.settings.mode, &self.settings.node_id, Utc::now());
        for &collection in collections {
            let records = self.store.read(collection)?;
            let records = if include_deleted { records } else { live(&records) };
            snapshot.insert(collection, records);
        }
        Ok(snapshot)
    }

    /// Live contents of the requested collections (all when `None`).
    pub async fn collections_snapshot(&self, requested: Option<&[Collection]>) -> Result<Snapshot> {
        self.local_snapshot(requested.unwrap_or(&Collection::ALL), false)
            .await
    }

    /// Writes local state to the shared snapshot file.
    pub async fn export_snapshot(&self) -> Result<ExportOutcome> {
        let shared = self.shared()?;
        let _cycle = self.cycle_lock.lock().await;
        self.export_locked(shared).await
    }

    async fn export_locked(&self, shared: &SharedSnapshot) -> Result<ExportOutcome> {
        let current = shared.read()?;

        // Another node's unimported changes must not be overwritten.
        if let Some(foreign) = current.as_ref().filter(|s| !self.is_own(s)) {
            self.apply_snapshot(foreign).await?;
        }

        let snapshot = self.local_snapshot(&Collection::ALL, true).await?;
        if current
            .as_ref()
            .map(|c| c.same_contents(&snapshot))
            .unwrap_or(false)
        {
            return Ok(ExportOutcome::Unchanged);
        }

        shared.write(&snapshot)?;
        for collection in Collection::ALL {
            self.stamp(collection).await;
        }
        tracing::debug!(path = %shared.path().display(), "Exported snapshot");

        Ok(ExportOutcome::Written)
    }

    /// Reads the shared snapshot and merges it into local state, unless this
    /// node wrote it.
    pub async fn import_snapshot(&self) -> Result<ImportOutcome> {
        let shared = self.shared()?;
        let _cycle = self.cycle_lock.lock().await;
        self.import_locked(shared).await
    }

    async fn import_locked(&self, shared: &SharedSnapshot) -> Result<ImportOutcome> {
        let Some(snapshot) = shared.read()? else {
            return Ok(ImportOutcome::NoSnapshot);
        };

        if self.is_own(&snapshot) {
            tracing::trace!("Skipping import of own snapshot");
            return Ok(ImportOutcome::OwnSnapshot);
        }

        let changed = self.apply_snapshot(&snapshot).await?;
        if !changed.is_empty() {
            tracing::info!(
                source = %snapshot.source,
                written = %snapshot.last_modified,
                ?changed,
                "Imported shared snapshot"
            );
        }

        Ok(ImportOutcome::Applied { changed })
    }

    async fn apply_snapshot(&self, snapshot: &Snapshot) -> Result<Vec<Collection>> {
        let mut changed = Vec::new();
        for (collection, remote) in snapshot.known_collections() {
            if self.merge_into(collection, remote).await? {
                changed.push(collection);
                self.notifier
                    .collection_changed(collection, ChangeOrigin::Import)
                    .await;
            }
        }
        Ok(changed)
    }

    /// One export-then-import cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let shared = self.shared()?;
        let _cycle = self.cycle_lock.lock().await;

        let export = self.export_locked(shared).await?;
        let import = self.import_locked(shared).await?;

        *self.last_sync.write().await = Some(timestamp(Utc::now()));
        Ok(CycleReport { export, import })
    }

    /// Writes every collection, tombstones included, to a timestamped
    /// backup file and returns its path.
    pub async fn export_backup(&self) -> Result<PathBuf> {
        let snapshot = self.local_snapshot(&Collection::ALL, true).await?;
        let target = self
            .shared
            .clone()
            .unwrap_or_else(|| SharedSnapshot::new(&self.settings.data_dir));

        let path = target.write_backup(&snapshot, Utc::now())?;
        tracing::info!(path = %path.display(), "Wrote backup");
        Ok(path)
    }

    // ------------------------------------------------------------------
    // Sync timestamp table
    // ------------------------------------------------------------------

    async fn stamp(&self, collection: Collection) {
        self.timestamps
            .write()
            .await
            .insert(collection, timestamp(Utc::now()));
    }

    /// Last successful reconciliation per collection.
    pub async fn timestamps(&self) -> BTreeMap<Collection, String> {
        self.timestamps.read().await.clone()
    }

    // ------------------------------------------------------------------
    // Auto-sync timer
    // ------------------------------------------------------------------

    /// Starts the export/import timer. Returns false if it was already running.
    pub async fn start_auto_sync(self: &Arc<Self>) -> Result<bool> {
        self.shared()?;

        let mut task = self.auto_sync.lock().await;
        if task.as_ref().map(PeriodicTask::is_running).unwrap_or(false) {
            return Ok(false);
        }

        let weak = Arc::downgrade(self);
        *task = Some(PeriodicTask::spawn(
            "auto-sync",
            self.settings.interval,
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(this) = weak.upgrade() {
                        this.tick().await;
                    }
                }
            },
        ));

        tracing::info!(interval = ?self.settings.interval, "Auto-sync started");
        Ok(true)
    }

    /// Stops the timer. Returns false if it was not running.
    pub async fn stop_auto_sync(&self) -> bool {
        let task = self.auto_sync.lock().await.take();
        match task {
            Some(mut task) => {
                task.stop().await;
                tracing::info!("Auto-sync stopped");
                true
            }
            None => false,
        }
    }

    async fn tick(&self) {
        match self.run_cycle().await {
            Ok(report) => {
                *self.last_error.write().await = None;
                tracing::trace!(?report, "Sync cycle complete");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Sync cycle failed");
                *self.last_error.write().await = Some(e.to_string());
            }
        }
    }

    pub async fn auto_sync_status(&self) -> AutoSyncStatus {
        let running = self
            .auto_sync
            .lock()
            .await
            .as_ref()
            .map(PeriodicTask::is_running)
            .unwrap_or(false);

        AutoSyncStatus {
            running,
            interval_ms: self.settings.interval.as_millis() as u64,
            shared_path: self.shared_path().map(Path::to_path_buf),
            last_sync: self.last_sync.read().await.clone(),
            last_error: self.last_error.read().await.clone(),
        }
    }
}

fn find_live<'a>(records: &'a mut [Record], id: &str) -> Option<&'a mut Record> {
    records
        .iter_mut()
        .find(|r| !r.is_deleted() && r.key().as_deref() == Some(id))
}
