//! Data-source facade
//!
//! A [`DataSource`] binds one store connection to its descriptor and
//! exposes the browsing operations: entry-point listing, key information,
//! content, deletion, raw commands, topology and status. Mutating
//! operations check the read-only flag before any store call.

pub mod command;
pub mod deletion;
pub mod registry;
pub mod status;

pub use command::is_read_only_command;
pub use deletion::{DeletionEvent, DeletionHandle, DeletionReport};
pub use registry::{DataSourceHeader, MemoryVendor, RedisVendor, Registry, Vendor};
pub use status::{parse_cluster_info, parse_info, ClusterState, NodeState, StateSection};

use crate::config::{BrowseSettings, DataSourceDescriptor};
use crate::delivery::{
    deliver, filter_list, filter_stream, full_scan, ActionStatus, DataBatch, Delivery,
    MemberSource, NodePages, Record,
};
use crate::error::{BrowserError, ConfigError, Result, StoreError};
use crate::store::{CommandReply, KeyKind, KeyStore, ScanTarget, ShardRole};
use crate::tree::{Filter, LevelWindow};
use crate::walker::{ScanCoordinator, ScanOptions, ScanOutcome, ScanStats, ScanSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Kind, length and time to live of one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPointInfos {
    /// Value kind
    #[serde(rename = "type")]
    pub kind: KeyKind,

    /// String length, cardinality, or element count
    pub length: u64,

    /// Remaining time to live in milliseconds; absent without expiry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_live: Option<u64>,
}

/// Shards of the deployment at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    /// Every primary and replica
    pub nodes: Vec<ShardRole>,

    /// When the topology was read
    pub fetched_at: DateTime<Utc>,
}

/// Result of an entry-point listing
#[derive(Debug)]
pub struct Listing {
    /// Sorted nodes, inline or streamed
    pub delivery: Delivery,

    /// Number of nodes in the tree
    pub nodes: usize,

    /// Scan counters
    pub stats: ScanSummary,

    /// Scan time, delivery excluded
    pub duration: Duration,
}

/// One opened data source
pub struct DataSource {
    id: String,
    descriptor: DataSourceDescriptor,
    store: Arc<dyn KeyStore>,
    target: Arc<dyn ScanTarget>,
    settings: BrowseSettings,
}

impl DataSource {
    /// Bind an opened store to its descriptor
    pub fn new<S: KeyStore + 'static>(
        id: impl Into<String>,
        descriptor: DataSourceDescriptor,
        store: Arc<S>,
        settings: BrowseSettings,
    ) -> Self {
        let target: Arc<dyn ScanTarget> = store.clone();
        Self {
            id: id.into(),
            descriptor,
            store,
            target,
            settings,
        }
    }

    /// Registry id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Descriptor this source was opened from
    pub fn descriptor(&self) -> &DataSourceDescriptor {
        &self.descriptor
    }

    /// Check whether mutating operations are refused
    pub fn is_read_only(&self) -> bool {
        self.descriptor.read_only
    }

    /// Tunables in effect
    pub fn settings(&self) -> BrowseSettings {
        self.settings
    }

    /// Connectivity check
    pub fn ping(&self) -> Result<()> {
        Ok(self.store.ping()?)
    }

    fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            page_size: self.settings.page_size,
            validate_ownership: self.settings.validate_ownership,
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(BrowserError::ReadOnlyViolation {
                source_id: self.id.clone(),
            });
        }
        Ok(())
    }

    /// Scan the keyspace into a tree without delivering it
    pub fn scan_tree(&self, filter: &str, window: LevelWindow) -> Result<ScanOutcome> {
        self.scan_tree_with_stats(filter, window, &ScanStats::default())
    }

    fn scan_tree_with_stats(
        &self,
        filter: &str,
        window: LevelWindow,
        stats: &ScanStats,
    ) -> Result<ScanOutcome> {
        if !window.is_valid() {
            return Err(ConfigError::InvalidLevelWindow {
                min: window.min,
                max: window.max,
            }
            .into());
        }
        let filter = Filter::parse(filter)?;
        self.store.ping()?;

        ScanCoordinator::new(Arc::clone(&self.target), self.scan_options())
            .scan_all_with_stats(&filter, window, stats)
    }

    /// List the entry points matching `filter` within `window`.
    ///
    /// Scan errors are returned directly; nodes are sorted by path and
    /// delivered in pages of the configured page size.
    pub fn list_entry_points(&self, filter: &str, window: LevelWindow) -> Result<Listing> {
        self.list_entry_points_with_stats(filter, window, &ScanStats::default())
    }

    /// Same as [`DataSource::list_entry_points`], reporting scan counters to
    /// `progress_callback` every 100ms while the scan runs, and once more
    /// with the final counters
    pub fn list_entry_points_with_progress<F>(
        &self,
        filter: &str,
        window: LevelWindow,
        progress_callback: F,
    ) -> Result<Listing>
    where
        F: Fn(ScanSummary) + Send,
    {
        let stats = ScanStats::default();
        let done = AtomicBool::new(false);

        thread::scope(|scope| {
            let (done, stats) = (&done, &stats);
            scope.spawn(move || loop {
                let finished = done.load(Ordering::Acquire);
                progress_callback(stats.snapshot());
                if finished {
                    break;
                }
                thread::sleep(PROGRESS_INTERVAL);
            });

            let result = self.list_entry_points_with_stats(filter, window, stats);
            done.store(true, Ordering::Release);
            result
        })
    }

    fn list_entry_points_with_stats(
        &self,
        filter: &str,
        window: LevelWindow,
        stats: &ScanStats,
    ) -> Result<Listing> {
        let outcome = self.scan_tree_with_stats(filter, window, stats)?;
        let nodes = outcome.tree.len();
        let pages = NodePages::new(outcome.tree.into_sorted(), self.settings.page_size);
        let delivery = deliver(pages, self.settings.channel_capacity)?;

        info!(
            source = %self.id,
            nodes,
            status = ?delivery.status(),
            "Entry points listed"
        );

        Ok(Listing {
            delivery,
            nodes,
            stats: outcome.stats,
            duration: outcome.duration,
        })
    }

    /// Kind, length and time to live of `key`
    pub fn entry_point_infos(&self, key: &str) -> Result<EntryPointInfos> {
        let kind = self.key_kind(key)?;
        let length = self.store.length(key, kind)?;
        let time_to_live = match kind {
            KeyKind::Stream => None,
            _ => self
                .store
                .ttl(key)?
                .map(|ttl| ttl.as_millis().min(u64::MAX as u128) as u64),
        };

        Ok(EntryPointInfos {
            kind,
            length,
            time_to_live,
        })
    }

    /// Content of `key`, filtered by `filter` (`"<glob>[,<regex>]"`)
    pub fn content(&self, key: &str, filter: &str) -> Result<DataBatch> {
        let filter = Filter::parse(filter)?;
        let kind = self.key_kind(key)?;
        debug!(source = %self.id, key = %key, kind = %kind, "Reading content");

        match kind {
            KeyKind::Value => match self.store.value(key)? {
                Some(value) => Ok(DataBatch::new(vec![Record::Text(value)])),
                None => Err(not_found(key)),
            },
            KeyKind::List => Ok(DataBatch::new(filter_list(
                self.store.list_range(key)?,
                &filter,
            ))),
            KeyKind::Set | KeyKind::Hash | KeyKind::ScoredSet => {
                let source = MemberSource::new(
                    Arc::clone(&self.store),
                    key,
                    kind,
                    filter,
                    self.settings.page_size,
                )?;
                let order = source.order();
                full_scan(source, order)
            }
            KeyKind::Stream => Ok(DataBatch::new(filter_stream(
                self.store.stream_range(key)?,
                &filter,
            ))),
        }
    }

    /// Delete exactly `key`
    pub fn delete_entry_point(&self, key: &str) -> Result<ActionStatus> {
        self.ensure_writable()?;
        let deleted = self.store.delete(&[key.to_string()])?;
        if deleted == 0 {
            return Err(not_found(key));
        }
        info!(source = %self.id, key = %key, "Entry point deleted");
        Ok(ActionStatus::Completed)
    }

    /// Delete every key below `prefix` in the background.
    ///
    /// The `prefix` key itself is kept.
    pub fn delete_entry_point_children(&self, prefix: &str) -> Result<DeletionHandle> {
        self.ensure_writable()?;
        deletion::start(
            Arc::clone(&self.store),
            Arc::clone(&self.target),
            self.scan_options(),
            prefix,
        )
    }

    /// Every shard of the deployment
    pub fn cluster_infos(&self) -> Result<ClusterInfo> {
        let nodes = self.target.shards()?;
        Ok(ClusterInfo {
            nodes,
            fetched_at: Utc::now(),
        })
    }

    /// Run a raw command (name first), on the node `node_id` when given.
    ///
    /// A read-only source refuses anything outside the read-only allowlist
    /// before contacting the store.
    pub fn execute_command(&self, args: &[String], node_id: Option<&str>) -> Result<CommandReply> {
        if args.is_empty() {
            return Err(ConfigError::EmptyCommand.into());
        }
        if self.is_read_only() && !is_read_only_command(args) {
            return Err(BrowserError::ReadOnlyViolation {
                source_id: self.id.clone(),
            });
        }

        let node = match node_id {
            Some(id) => Some(
                self.target
                    .shards()?
                    .into_iter()
                    .map(|shard| shard.endpoint)
                    .find(|endpoint| endpoint.id == id)
                    .ok_or_else(|| StoreError::UnknownNode { id: id.to_string() })?,
            ),
            None => None,
        };

        debug!(source = %self.id, command = %args[0], node = ?node_id, "Executing command");
        Ok(self.store.execute(args, node.as_ref())?)
    }

    /// Status sections of every node, plus the cluster-level section on a
    /// partitioned store
    pub fn status(&self) -> Result<ClusterState> {
        let sections = match self.store.cluster_info()? {
            Some(text) => vec![parse_cluster_info(&text)],
            None => Vec::new(),
        };

        let node_states = self
            .target
            .shards()?
            .into_iter()
            .map(|shard| -> Result<NodeState> {
                let text = self.store.node_info(&shard.endpoint)?;
                Ok(NodeState {
                    node_id: shard.endpoint.id,
                    sections: parse_info(&text),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ClusterState {
            timestamp: Utc::now(),
            node_states,
            sections,
        })
    }

    /// Release the store connection
    pub fn close(&self) {
        debug!(source = %self.id, "Closing data source");
        self.store.close();
    }

    fn key_kind(&self, key: &str) -> Result<KeyKind> {
        self.store.key_kind(key)?.ok_or_else(|| not_found(key))
    }
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("id", &self.id)
            .field("vendor", &self.descriptor.vendor)
            .field("bootstrap", &self.descriptor.bootstrap)
            .field("read_only", &self.descriptor.read_only)
            .finish()
    }
}

fn not_found(key: &str) -> BrowserError {
    StoreError::NotFound {
        key: key.to_string(),
    }
    .into()
}
