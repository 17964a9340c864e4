//! Subtree deletion
//!
//! Collects every key below a prefix with the same coordinator used for
//! listings, then deletes them on a background thread. A single node takes
//! one batched delete; a partitioned store deletes key by key, since a
//! multi-key delete is refused when keys live on different partitions.
//!
//! Progress is reported on an unbounded event channel that always ends with
//! [`DeletionEvent::Finished`] or [`DeletionEvent::Aborted`].

use crate::delivery::ActionStatus;
use crate::error::{Result, StoreError, WorkerError};
use crate::store::{KeyStore, ScanTarget};
use crate::tree::{escape_glob, Filter, LevelWindow, PATH_SEPARATOR};
use crate::walker::{ScanCoordinator, ScanOptions};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Totals of one subtree deletion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionReport {
    /// Prefix whose children were deleted
    pub prefix: String,

    /// Keys found below the prefix
    pub requested: u64,

    /// Keys actually removed
    pub deleted: u64,

    /// Keys whose delete call failed
    pub failed: u64,
}

/// Event pushed by the deletion thread
#[derive(Debug, Clone, PartialEq)]
pub enum DeletionEvent {
    /// One key (or the whole batch, on a single node) could not be deleted
    Failed { key: String, error: StoreError },

    /// The scan failed; nothing was deleted
    Aborted { reason: String },

    /// Every collected key was attempted
    Finished(DeletionReport),
}

impl DeletionEvent {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeletionEvent::Aborted { .. } | DeletionEvent::Finished(_)
        )
    }
}

/// Handle on a running subtree deletion
pub struct DeletionHandle {
    id: Uuid,
    events: Receiver<DeletionEvent>,
    worker: Option<JoinHandle<()>>,
    finished: bool,
}

impl DeletionHandle {
    /// Opaque id of this deletion
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Deletions always run in the background
    pub fn status(&self) -> ActionStatus {
        ActionStatus::Moved
    }

    /// Drain every event and wait for the deletion thread.
    ///
    /// Returns the final event (`Finished` or `Aborted`) and the failures
    /// seen before it.
    pub fn wait(mut self) -> Result<(DeletionEvent, Vec<DeletionEvent>)> {
        let mut failures = Vec::new();
        let mut last = None;
        for event in self.by_ref() {
            if event.is_terminal() {
                last = Some(event);
            } else {
                failures.push(event);
            }
        }

        if let Some(worker) = self.worker.take() {
            worker.join().map_err(|_| WorkerError::Panicked {
                shard: format!("deletion-{}", self.id),
            })?;
        }

        let last = last.ok_or(WorkerError::QueueClosed)?;
        Ok((last, failures))
    }
}

impl std::fmt::Debug for DeletionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletionHandle")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Iterator for DeletionHandle {
    type Item = DeletionEvent;

    fn next(&mut self) -> Option<DeletionEvent> {
        if self.finished {
            return None;
        }
        match self.events.recv() {
            Ok(event) => {
                self.finished = event.is_terminal();
                Some(event)
            }
            Err(_) => {
                self.finished = true;
                None
            }
        }
    }
}

/// Ping, then start deleting the children of `prefix` in the background
pub(crate) fn start(
    store: Arc<dyn KeyStore>,
    target: Arc<dyn ScanTarget>,
    options: ScanOptions,
    prefix: &str,
) -> Result<DeletionHandle> {
    store.ping()?;

    let id = Uuid::new_v4();
    let prefix = prefix.to_string();
    let (events_tx, events_rx) = unbounded();

    let worker = thread::Builder::new()
        .name(format!("delete-{id}"))
        .spawn(move || run(store.as_ref(), target, options, &prefix, &events_tx))
        .map_err(|e| WorkerError::SpawnFailed {
            what: "deletion thread".to_string(),
            reason: e.to_string(),
        })?;

    Ok(DeletionHandle {
        id,
        events: events_rx,
        worker: Some(worker),
        finished: false,
    })
}

fn run(
    store: &dyn KeyStore,
    target: Arc<dyn ScanTarget>,
    options: ScanOptions,
    prefix: &str,
    events: &Sender<DeletionEvent>,
) {
    let partitioned = target.is_partitioned();
    let filter = Filter::glob(format!("{}{PATH_SEPARATOR}*", escape_glob(prefix)));

    let mut tree = match ScanCoordinator::new(target, options).scan_all(&filter, LevelWindow::ALL) {
        Ok(outcome) => outcome.tree,
        Err(e) => {
            error!(prefix = %prefix, error = %e, "Subtree scan failed, nothing deleted");
            // A dropped receiver only means nobody is listening
            let _ = events.send(DeletionEvent::Aborted {
                reason: e.to_string(),
            });
            return;
        }
    };
    tree.remove(prefix);

    let mut keys = tree.content_paths();
    keys.sort_unstable();

    let mut report = DeletionReport {
        prefix: prefix.to_string(),
        requested: keys.len() as u64,
        ..Default::default()
    };

    if partitioned {
        for key in keys {
            match store.delete(std::slice::from_ref(&key)) {
                Ok(n) => report.deleted += n,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to delete key");
                    report.failed += 1;
                    let _ = events.send(DeletionEvent::Failed { key, error: e });
                }
            }
        }
    } else if !keys.is_empty() {
        match store.delete(&keys) {
            Ok(n) => report.deleted = n,
            Err(e) => {
                warn!(prefix = %prefix, error = %e, "Batch delete failed");
                report.failed = report.requested;
                let _ = events.send(DeletionEvent::Failed {
                    key: prefix.to_string(),
                    error: e,
                });
            }
        }
    }

    info!(
        prefix = %prefix,
        requested = report.requested,
        deleted = report.deleted,
        failed = report.failed,
        "Subtree deletion finished"
    );
    let _ = events.send(DeletionEvent::Finished(report));
}
