//! Scan coordinator - fans shard scans out across a deployment
//!
//! The coordinator is responsible for:
//! - Picking scan targets (primaries only on a partitioned store)
//! - Running one scanner thread per primary over one shared tree
//! - Joining every thread and merging errors (last one wins)
//! - Final statistics

use crate::error::{BrowserError, Result, StoreError, WorkerError};
use crate::store::{Endpoint, ScanTarget, DEFAULT_PAGE_SIZE};
use crate::tree::{EntryTree, Filter, LevelWindow};
use crate::walker::scanner::{scan_one_node, ScanRequest, ScanStats, ScanSummary};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Options fixed for the lifetime of a coordinator
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    /// Keys requested per page
    pub page_size: usize,

    /// Re-check key ownership on partitioned stores
    pub validate_ownership: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            validate_ownership: false,
        }
    }
}

/// Result of a completed scan
#[derive(Debug)]
pub struct ScanOutcome {
    /// Keys returned by the store over every shard
    pub scanned: u64,

    /// Aggregated tree
    pub tree: EntryTree,

    /// Number of shards scanned
    pub shards: usize,

    /// Time taken
    pub duration: Duration,

    /// Per-outcome counters
    pub stats: ScanSummary,
}

/// Coordinates the scan of every shard of one deployment
pub struct ScanCoordinator {
    target: Arc<dyn ScanTarget>,
    options: ScanOptions,
}

impl ScanCoordinator {
    /// Create a coordinator over `target`
    pub fn new(target: Arc<dyn ScanTarget>, options: ScanOptions) -> Self {
        Self { target, options }
    }

    /// Scan the whole deployment into a fresh tree
    pub fn scan_all(&self, filter: &Filter, window: LevelWindow) -> Result<ScanOutcome> {
        self.scan_all_with_stats(filter, window, &ScanStats::default())
    }

    /// Scan the whole deployment, updating `stats` while shards are scanned.
    ///
    /// Another thread may poll `stats` for live progress. The counters are
    /// added to, never reset.
    pub fn scan_all_with_stats(
        &self,
        filter: &Filter,
        window: LevelWindow,
        stats: &ScanStats,
    ) -> Result<ScanOutcome> {
        let start = Instant::now();
        let primaries = self.target.list_primaries()?;
        let partitioned = self.target.is_partitioned();

        info!(
            glob = filter.glob_pattern(),
            regex = filter.regex().map(|r| r.as_str()).unwrap_or(""),
            min_level = window.min,
            max_level = ?(!window.is_unbounded()).then_some(window.max),
            shards = primaries.len(),
            partitioned,
            "Starting keyspace scan"
        );

        let request = ScanRequest {
            filter,
            window,
            page_size: self.options.page_size,
            validate_ownership: partitioned && self.options.validate_ownership,
        };

        let (scanned, tree) = if partitioned {
            self.scan_partitioned(&primaries, &request, stats)?
        } else {
            self.scan_single(&primaries, &request, stats)?
        };

        let duration = start.elapsed();
        let summary = stats.snapshot();
        info!(
            keys = scanned,
            nodes = tree.len(),
            excluded = summary.keys_excluded,
            skipped = summary.keys_skipped,
            duration_ms = duration.as_millis() as u64,
            "Keyspace scan completed"
        );

        Ok(ScanOutcome {
            scanned,
            tree,
            shards: primaries.len(),
            duration,
            stats: summary,
        })
    }

    /// Non-partitioned: one scanner, no locking
    fn scan_single(
        &self,
        primaries: &[Endpoint],
        request: &ScanRequest<'_>,
        stats: &ScanStats,
    ) -> Result<(u64, EntryTree)> {
        let endpoint = primaries.first().ok_or_else(|| StoreError::ConnectionFailed {
            target: "store".to_string(),
            reason: "no primary reported".to_string(),
        })?;
        let mut scanner = self.target.open_scanner(endpoint)?;
        let tree = RefCell::new(EntryTree::new());
        let scanned = scan_one_node(scanner.as_mut(), request, &tree, stats)?;
        Ok((scanned, tree.into_inner()))
    }

    /// Partitioned: one thread per primary over one shared tree
    fn scan_partitioned(
        &self,
        primaries: &[Endpoint],
        request: &ScanRequest<'_>,
        stats: &ScanStats,
    ) -> Result<(u64, EntryTree)> {
        let tree = Mutex::new(EntryTree::new());
        let target = self.target.as_ref();

        let (scanned, last_error) = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(primaries.len());
            let mut last_error: Option<BrowserError> = None;

            for endpoint in primaries {
                let tree = &tree;
                let spawned = thread::Builder::new()
                    .name(format!("scan-{}", endpoint.id))
                    .spawn_scoped(scope, move || {
                        let mut scanner = target.open_scanner(endpoint)?;
                        scan_one_node(scanner.as_mut(), request, tree, stats)
                    });
                match spawned {
                    Ok(handle) => handles.push((endpoint, handle)),
                    Err(e) => {
                        warn!(shard = %endpoint, error = %e, "Failed to spawn scan thread");
                        last_error = Some(
                            WorkerError::SpawnFailed {
                                what: format!("scan thread for {endpoint}"),
                                reason: e.to_string(),
                            }
                            .into(),
                        );
                    }
                }
            }

            let mut scanned = 0u64;
            for (endpoint, handle) in handles {
                match handle.join() {
                    Ok(Ok(count)) => {
                        debug!(shard = %endpoint, keys = count, "Shard finished");
                        scanned += count;
                    }
                    Ok(Err(e)) => {
                        warn!(shard = %endpoint, error = %e, "Shard scan failed");
                        last_error = Some(e.into());
                    }
                    Err(_) => {
                        warn!(shard = %endpoint, "Shard scan thread panicked");
                        last_error = Some(
                            WorkerError::Panicked {
                                shard: endpoint.to_string(),
                            }
                            .into(),
                        );
                    }
                }
            }
            (scanned, last_error)
        });

        match last_error {
            Some(e) => Err(e),
            None => Ok((scanned, tree.into_inner())),
        }
    }
}
