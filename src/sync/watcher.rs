//! Imports the shared snapshot as soon as another node rewrites it, instead
//! of waiting for the next sync cycle.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::coordinator::SyncCoordinator;
use super::snapshot::SNAPSHOT_FILENAME;
use crate::error::{DataShareError, Result};

/// Watches the shared folder while alive.
pub struct SnapshotWatcher {
    // Dropping the watcher closes the event channel and ends the task.
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl SnapshotWatcher {
    pub fn start(coordinator: Arc<SyncCoordinator>) -> Result<Self> {
        let dir = coordinator
            .shared_path()
            .ok_or(DataShareError::SharedPathNotConfigured)?
            .to_path_buf();

        let (tx, mut rx) = mpsc::channel(16);
        let handle = Handle::current();
        let mut watcher = notify::recommended_watcher(move |evt| {
            handle.block_on(async {
                drop(tx.send(evt).await);
            });
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %dir.display(), "Watching shared folder");

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(error = %e, "Shared folder watch error");
                        continue;
                    }
                };

                if !touches_snapshot(&event) {
                    continue;
                }

                match coordinator.import_snapshot().await {
                    Ok(outcome) if outcome.changed() => {
                        tracing::debug!(?outcome, "Imported snapshot after file change")
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Import after file change failed"),
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

/// Returns true for creations or modifications of the snapshot file.
fn touches_snapshot(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(Path::new(SNAPSHOT_FILENAME).as_os_str()))
}
