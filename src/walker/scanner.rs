//! Single-shard scan
//!
//! Drives one shard's cursor scan to exhaustion, filtering each key, then
//! folding its path segments into a tree shared with the other scanners of
//! the same request.

use crate::error::{KeyOutcome, StoreResult};
use crate::store::{ShardScanner, CURSOR_START, DEFAULT_PAGE_SIZE};
use crate::tree::{tokenize, Filter, LevelWindow, TreeLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Parameters shared by every shard scan of one request
#[derive(Debug, Clone)]
pub struct ScanRequest<'a> {
    /// Glob and optional regex
    pub filter: &'a Filter,

    /// Levels to materialize
    pub window: LevelWindow,

    /// Keys requested per page
    pub page_size: usize,

    /// Re-check that each key still exists on the shard before folding it
    pub validate_ownership: bool,
}

impl<'a> ScanRequest<'a> {
    /// Request with the default page size and no ownership validation
    pub fn new(filter: &'a Filter, window: LevelWindow) -> Self {
        Self {
            filter,
            window,
            page_size: DEFAULT_PAGE_SIZE,
            validate_ownership: false,
        }
    }
}

/// Counters collected while scanning
#[derive(Debug, Default)]
pub struct ScanStats {
    /// Keys returned by the store
    pub keys_scanned: AtomicU64,

    /// Keys folded into the tree
    pub keys_accepted: AtomicU64,

    /// Keys rejected by the regex
    pub keys_excluded: AtomicU64,

    /// Keys gone from the shard at validation time
    pub keys_skipped: AtomicU64,

    /// Keys with too few segments for the window
    pub keys_too_shallow: AtomicU64,

    /// Key names the store returned that are not valid UTF-8
    pub keys_invalid: AtomicU64,

    /// Pages fetched
    pub pages_fetched: AtomicU64,

    /// Shards scanned to completion
    pub shards_scanned: AtomicU64,
}

impl ScanStats {
    fn record(&self, outcome: &KeyOutcome) {
        let counter = match outcome {
            KeyOutcome::Accepted => &self.keys_accepted,
            KeyOutcome::Excluded => &self.keys_excluded,
            KeyOutcome::Skipped => &self.keys_skipped,
            KeyOutcome::TooShallow => &self.keys_too_shallow,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Plain copy of the counters
    pub fn snapshot(&self) -> ScanSummary {
        ScanSummary {
            keys_scanned: self.keys_scanned.load(Ordering::Relaxed),
            keys_accepted: self.keys_accepted.load(Ordering::Relaxed),
            keys_excluded: self.keys_excluded.load(Ordering::Relaxed),
            keys_skipped: self.keys_skipped.load(Ordering::Relaxed),
            keys_too_shallow: self.keys_too_shallow.load(Ordering::Relaxed),
            keys_invalid: self.keys_invalid.load(Ordering::Relaxed),
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            shards_scanned: self.shards_scanned.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`ScanStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub keys_scanned: u64,
    pub keys_accepted: u64,
    pub keys_excluded: u64,
    pub keys_skipped: u64,
    pub keys_too_shallow: u64,
    pub keys_invalid: u64,
    pub pages_fetched: u64,
    pub shards_scanned: u64,
}

/// Scan one shard to exhaustion and fold every accepted key into `tree`.
///
/// The lock is taken once per key, for the whole path chain of that key.
/// Returns the number of keys the store returned; the first page error
/// aborts the scan.
///
/// Ownership validation is a best-effort snapshot: a key moved away during
/// resharding, or whose check fails (a redirect while its slot migrates), is
/// skipped here and may be missed by the new owner's scan too.
pub fn scan_one_node<L: TreeLock>(
    scanner: &mut dyn ShardScanner,
    request: &ScanRequest<'_>,
    tree: &L,
    stats: &ScanStats,
) -> StoreResult<u64> {
    let shard = scanner.endpoint().id.clone();
    let glob = request.filter.glob_pattern();
    let mut cursor = CURSOR_START;
    let mut scanned = 0u64;

    debug!(shard = %shard, glob = glob, "Scanning shard");

    loop {
        let page = scanner.scan(cursor, glob, request.page_size)?;
        stats.pages_fetched.fetch_add(1, Ordering::Relaxed);
        scanned += page.items.len() as u64;
        stats
            .keys_scanned
            .fetch_add(page.items.len() as u64, Ordering::Relaxed);
        if page.invalid > 0 {
            stats.keys_invalid.fetch_add(page.invalid, Ordering::Relaxed);
        }

        for key in &page.items {
            let outcome = process_key(scanner, request, key, tree);
            trace!(shard = %shard, key = %key, outcome = ?outcome, "Processed key");
            stats.record(&outcome);
        }

        if page.is_last() {
            break;
        }
        cursor = page.cursor;
    }

    stats.shards_scanned.fetch_add(1, Ordering::Relaxed);
    debug!(shard = %shard, keys = scanned, "Shard scan complete");
    Ok(scanned)
}

fn process_key<L: TreeLock>(
    scanner: &mut dyn ShardScanner,
    request: &ScanRequest<'_>,
    key: &str,
    tree: &L,
) -> KeyOutcome {
    if !request.filter.accepts(key) {
        tree.with_tree(|tree| tree.exclude_key(key, request.window));
        return KeyOutcome::Excluded;
    }

    if request.validate_ownership {
        match scanner.exists(key) {
            Ok(true) => {}
            Ok(false) => return KeyOutcome::Skipped,
            Err(e) => {
                debug!(key = %key, error = %e, "Ownership check failed, skipping key");
                return KeyOutcome::Skipped;
            }
        }
    }

    let segments = tokenize(key);
    if segments.len() <= request.window.min as usize {
        return KeyOutcome::TooShallow;
    }

    if tree.with_tree(|tree| tree.fold_key(&segments, request.window)) {
        KeyOutcome::Accepted
    } else {
        KeyOutcome::TooShallow
    }
}
