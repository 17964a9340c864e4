//! Parallel keyspace walker
//!
//! Scans every primary of a deployment and folds the keys into one tree.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────────────┐
//!                     │     ScanCoordinator     │
//!                     │  - list primaries       │
//!                     │  - join, last error     │
//!                     └───────────┬─────────────┘
//!                                 │
//!       ┌─────────────────────────┼─────────────────────────┐
//!       │                         │                         │
//! ┌─────▼─────┐             ┌─────▼─────┐             ┌─────▼─────┐
//! │ Primary 1 │             │ Primary 2 │             │ Primary N │
//! │   SCAN    │             │   SCAN    │             │   SCAN    │
//! │  filter   │             │  filter   │             │  filter   │
//! └─────┬─────┘             └─────┬─────┘             └─────┬─────┘
//!       │                         │                         │
//!       └──────────── Mutex<EntryTree> (per key) ───────────┘
//! ```

pub mod coordinator;
pub mod scanner;

pub use coordinator::{ScanCoordinator, ScanOptions, ScanOutcome};
pub use scanner::{scan_one_node, ScanRequest, ScanStats, ScanSummary};
