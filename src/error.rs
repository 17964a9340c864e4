//! Error types for keyspace-walker
//!
//! This module defines the error hierarchy that covers:
//! - Store connectivity and scan errors
//! - Configuration and CLI errors
//! - Shard scan and stream producer thread errors
//! - Read-only enforcement
//!
//! Store errors carry their reasons as strings so they can be cloned and
//! pushed through the deletion error channel after a hand-off.

use thiserror::Error;

/// Top-level error type for keyspace-walker
#[derive(Error, Debug)]
pub enum BrowserError {
    /// Store-related errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker/concurrency errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Mutating operation attempted on a read-only data source
    #[error("Data source '{source_id}' is read-only")]
    ReadOnlyViolation { source_id: String },

    /// Data source not registered
    #[error("Unknown data source '{0}'")]
    UnknownDataSource(String),
}

impl BrowserError {
    /// Check if this error was raised by the read-only guard
    pub fn is_read_only_violation(&self) -> bool {
        matches!(self, BrowserError::ReadOnlyViolation { .. })
    }

    /// Check if this error is a failed preflight/connectivity check
    pub fn is_connectivity(&self) -> bool {
        matches!(self, BrowserError::Store(e) if e.is_connectivity())
    }
}

/// Store connection and protocol errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The store could not be reached (preflight ping or connect failed)
    #[error("Failed to connect to '{target}': {reason}")]
    ConnectionFailed { target: String, reason: String },

    /// A page fetch failed mid-scan
    #[error("Scan failed on '{endpoint}': {reason}")]
    ScanFailed { endpoint: String, reason: String },

    /// The value type has no browsing or deletion semantics
    #[error("Type {kind} is unsupported for '{key}'")]
    UnsupportedType { key: String, kind: String },

    /// Key does not exist
    #[error("Entrypoint '{key}' was not found")]
    NotFound { key: String },

    /// Multi-key command spanning several partitions
    #[error("Keys {keys:?} do not hash to the same partition")]
    CrossSlot { keys: Vec<String> },

    /// No shard of the deployment has this node id
    #[error("Node '{id}' is not part of the deployment")]
    UnknownNode { id: String },

    /// Generic protocol error returned by the store
    #[error("Store protocol error: {0}")]
    Protocol(String),
}

impl StoreError {
    /// Check if this error means the store is unreachable
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::ConnectionFailed { .. })
    }

    /// Wrap an error as a scan failure on the given endpoint
    pub fn scan_failed(endpoint: &str, err: impl std::fmt::Display) -> Self {
        StoreError::ScanFailed {
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
            StoreError::ConnectionFailed {
                target: "redis".to_string(),
                reason: err.to_string(),
            }
        } else if err.code() == Some("CROSSSLOT") {
            StoreError::CrossSlot { keys: Vec::new() }
        } else {
            StoreError::Protocol(err.to_string())
        }
    }
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Bootstrap URL could not be parsed
    #[error("Invalid bootstrap '{bootstrap}': {reason}")]
    InvalidBootstrap { bootstrap: String, reason: String },

    /// Bootstrap protocol is not supported
    #[error("Protocol '{0}' is unknown")]
    UnknownProtocol(String),

    /// No registered vendor accepts the descriptor
    #[error("The vendor '{0}' is not known")]
    UnknownVendor(String),

    /// Secondary filter regex failed to compile
    #[error("Invalid filter regex '{pattern}': {reason}")]
    InvalidFilter { pattern: String, reason: String },

    /// Invalid scan page size
    #[error("Invalid page size {size}: must be between {min} and {max}")]
    InvalidPageSize { size: usize, min: usize, max: usize },

    /// Invalid delivery channel capacity
    #[error("Invalid channel capacity {capacity}: must be between {min} and {max}")]
    InvalidChannelCapacity {
        capacity: usize,
        min: usize,
        max: usize,
    },

    /// Level window with min above max
    #[error("Invalid level window: min {min} is greater than max {max}")]
    InvalidLevelWindow { min: u32, max: u32 },

    /// Invalid value in the descriptor configuration map
    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    /// Raw command without a command name
    #[error("Empty command")]
    EmptyCommand,
}

/// Worker thread errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Shard scan thread panicked
    #[error("Scan worker for shard '{shard}' panicked")]
    Panicked { shard: String },

    /// Thread could not be spawned
    #[error("Failed to spawn {what}: {reason}")]
    SpawnFailed { what: String, reason: String },

    /// The other end of a delivery queue is gone
    #[error("Delivery queue is disconnected")]
    QueueClosed,
}

/// Result type alias for BrowserError
pub type Result<T> = std::result::Result<T, BrowserError>;

/// Result type alias for StoreError
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outcome of processing a single scanned key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Key was folded into the tree
    Accepted,

    /// Key was rejected by the secondary regex
    Excluded,

    /// Key vanished from the shard between SCAN and validation
    Skipped,

    /// Key has too few segments for the level window
    TooShallow,
}
