//! keyspace-walker - Browse a flat key-value keyspace as a tree
//!
//! Keys such as `app:users:{eu:42}:profile` are split on `:` (hash tags in
//! braces stay whole) and folded into a tree of entry points, each knowing
//! whether it holds content and how many distinct children it has.
//!
//! # Features
//!
//! - **Cluster Fan-out**: on a partitioned deployment every primary is
//!   scanned by its own thread; replicas are skipped so nothing is counted
//!   twice.
//!
//! - **Level Windows**: only levels `min..=max` are materialized, so a
//!   browser can expand a huge keyspace one level at a time.
//!
//! - **Two-mode Delivery**: results that fit in the bounded queue come back
//!   inline; larger ones are handed to a background producer and streamed,
//!   with the queue providing backpressure.
//!
//! - **Read-only Guard**: mutating operations on a read-only data source
//!   fail before any store call.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Store (standalone or cluster)                   │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ SCAN cursor, per primary
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Shard Scan Threads                          │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐         ┌─────────┐      │
//! │  │Primary 1│  │Primary 2│  │Primary 3│  ...    │Primary N│      │
//! │  │ filter  │  │ filter  │  │ filter  │         │ filter  │      │
//! │  └────┬────┘  └────┬────┘  └────┬────┘         └────┬────┘      │
//! │       └────────────┴─────┬──────┴───────────────────┘           │
//! │                          ▼                                      │
//! │            ┌──────────────────────────┐                         │
//! │            │  Mutex<EntryTree>        │                         │
//! │            │  - locked per key        │                         │
//! │            └────────────┬─────────────┘                         │
//! │                         ▼                                       │
//! │            ┌──────────────────────────┐                         │
//! │            │  Batch Queue             │                         │
//! │            │  (crossbeam bounded)     │                         │
//! │            │  - Completed or Moved    │                         │
//! │            └──────────────────────────┘                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Top two levels of a local server
//! keyspace-walker -b redis://localhost:6379 tree --max-level 1
//!
//! # Children of one prefix on a cluster, filtered by regex
//! keyspace-walker -b cluster://10.0.0.1:7000 tree -f 'app:users:*,.*:eu$' --min-level 2
//!
//! # Content of a hash
//! keyspace-walker -b redis://localhost:6379 content app:users:42
//! ```

pub mod config;
pub mod datasource;
pub mod delivery;
pub mod error;
pub mod progress;
pub mod store;
pub mod tree;
pub mod walker;

pub use config::{BrowseConfig, BrowseSettings, CliArgs, DataSourceDescriptor};
pub use datasource::{DataSource, Registry};
pub use delivery::{ActionStatus, DataBatch, Delivery};
pub use error::{BrowserError, Result};
pub use tree::{EntryPointNode, Filter, LevelWindow};
pub use walker::ScanCoordinator;
