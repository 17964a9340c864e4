//! Store access module
//!
//! The core only needs a small capability surface from a store client:
//! enumerate the shards of the deployment, open a cursor scanner on one
//! shard, and a handful of per-key accessors. Both a single node and a
//! partitioned cluster satisfy the same traits.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     KeyStore                         │
//! │  ping / key_kind / length / ttl / value / members    │
//! │  list_range / stream_range / delete                  │
//! │  execute / node_info / cluster_info                  │
//! ├──────────────────────────────────────────────────────┤
//! │                     ScanTarget                       │
//! │  shards() -> [ShardRole]      list_primaries()       │
//! │  open_scanner(endpoint) -> ShardScanner              │
//! └──────────────────────────┬───────────────────────────┘
//!                            │ one per scan thread
//!                            ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                    ShardScanner                      │
//! │  scan(cursor, glob, count) -> ScanPage               │
//! │  exists(key)                                         │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod memory;
pub mod redis_store;

pub use memory::{MemoryStore, MemoryValue};
pub use redis_store::{RedisStore, RedisStoreConfig};

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Cursor value that starts a scan and marks its end
pub const CURSOR_START: u64 = 0;

/// Default number of keys requested per scan page
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Address of one shard of the deployment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Node identifier (cluster node id, or a fixed id on a single node)
    pub id: String,

    /// Announced `host:port`
    pub address: String,
}

impl Endpoint {
    /// Create an endpoint
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

/// Role of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owns a disjoint key range
    Primary,
    /// Mirrors a primary
    Replica,
}

/// A shard with its role in the deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardRole {
    /// Where the shard lives
    pub endpoint: Endpoint,

    /// Primary or replica
    pub role: Role,

    /// Id of the mirrored primary, for replicas
    pub primary_of: Option<String>,
}

impl ShardRole {
    /// Check if this shard is a primary
    pub fn is_primary(&self) -> bool {
        self.role == Role::Primary
    }
}

/// One page of a cursor scan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage {
    /// Cursor for the next call; [`CURSOR_START`] once exhausted
    pub cursor: u64,

    /// Items returned by this page (may be empty mid-scan)
    pub items: Vec<String>,

    /// Items left out because they are not valid UTF-8
    pub invalid: u64,
}

impl ScanPage {
    /// Check if the scan is exhausted after this page
    pub fn is_last(&self) -> bool {
        self.cursor == CURSOR_START
    }
}

/// Kind of value stored under a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyKind {
    /// Plain string value
    Value,
    /// Unordered set of members
    Set,
    /// Members ordered by a numeric score
    ScoredSet,
    /// Ordered list
    List,
    /// Field/value map
    Hash,
    /// Append-only stream
    Stream,
}

impl KeyKind {
    /// Map the store's type name; `Ok(None)` means the key is missing
    pub fn from_type_name(key: &str, name: &str) -> StoreResult<Option<Self>> {
        match name.to_ascii_lowercase().as_str() {
            "string" => Ok(Some(KeyKind::Value)),
            "set" => Ok(Some(KeyKind::Set)),
            "zset" => Ok(Some(KeyKind::ScoredSet)),
            "list" => Ok(Some(KeyKind::List)),
            "hash" => Ok(Some(KeyKind::Hash)),
            "stream" => Ok(Some(KeyKind::Stream)),
            "none" => Ok(None),
            other => Err(StoreError::UnsupportedType {
                key: key.to_string(),
                kind: other.to_string(),
            }),
        }
    }

    /// Display name used in the wire format
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Value => "VALUE",
            KeyKind::Set => "SET",
            KeyKind::ScoredSet => "SCORED_SET",
            KeyKind::List => "LIST",
            KeyKind::Hash => "HASH",
            KeyKind::Stream => "STREAM",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEntry {
    /// Entry id, `<millis>-<sequence>`
    pub id: String,

    /// Field to value
    pub values: BTreeMap<String, String>,
}

impl StreamEntry {
    /// Entry from `(field, value)` pairs
    pub fn new<I, F, V>(id: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Into<String>,
    {
        Self {
            id: id.into(),
            values: values
                .into_iter()
                .map(|(f, v)| (f.into(), v.into()))
                .collect(),
        }
    }
}

/// Reply to a raw command, in a form that serializes to plain JSON
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandReply {
    /// Missing value
    Nil,
    /// Integer reply
    Integer(i64),
    /// Floating point reply
    Double(f64),
    /// Boolean reply
    Boolean(bool),
    /// Bulk or status string
    Text(String),
    /// Array, set or push reply
    Array(Vec<CommandReply>),
    /// Map reply as `[key, value]` pairs
    Map(Vec<(CommandReply, CommandReply)>),
}

impl CommandReply {
    /// Status reply `OK`
    pub fn ok() -> Self {
        CommandReply::Text("OK".to_string())
    }
}

/// Cursor scanner bound to one shard.
///
/// Not shared between threads; each scan thread opens its own.
pub trait ShardScanner: Send {
    /// Endpoint this scanner reads from
    fn endpoint(&self) -> &Endpoint;

    /// Fetch one page of keys matching `glob`
    fn scan(&mut self, cursor: u64, glob: &str, count: usize) -> StoreResult<ScanPage>;

    /// Check that `key` still exists on this shard
    fn exists(&mut self, key: &str) -> StoreResult<bool>;
}

/// Deployment that can be enumerated shard by shard
pub trait ScanTarget: Send + Sync {
    /// Whether keys are spread over several primaries
    fn is_partitioned(&self) -> bool;

    /// Every shard with its role
    fn shards(&self) -> StoreResult<Vec<ShardRole>>;

    /// Primaries only; every key lives on exactly one of them
    fn list_primaries(&self) -> StoreResult<Vec<Endpoint>> {
        Ok(self
            .shards()?
            .into_iter()
            .filter(ShardRole::is_primary)
            .map(|shard| shard.endpoint)
            .collect())
    }

    /// Open a cursor scanner on one shard
    fn open_scanner(&self, endpoint: &Endpoint) -> StoreResult<Box<dyn ShardScanner>>;
}

/// Primitive store client used by the browsing operations
pub trait KeyStore: ScanTarget {
    /// Preflight connectivity check
    fn ping(&self) -> StoreResult<()>;

    /// Kind of the value under `key`; `None` when the key is missing
    fn key_kind(&self, key: &str) -> StoreResult<Option<KeyKind>>;

    /// String length, cardinality, or entry count depending on `kind`
    fn length(&self, key: &str, kind: KeyKind) -> StoreResult<u64>;

    /// Remaining time to live; `None` when the key does not expire
    fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Plain string value
    fn value(&self, key: &str) -> StoreResult<Option<String>>;

    /// One page of a member cursor scan on a set, hash, or scored set.
    ///
    /// Hash pages are flat `field, value` pairs and scored-set pages are
    /// flat `member, score` pairs.
    fn scan_members(
        &self,
        key: &str,
        kind: KeyKind,
        cursor: u64,
        glob: &str,
        count: usize,
    ) -> StoreResult<ScanPage>;

    /// Whole list in stored order
    fn list_range(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Every entry of a stream, oldest first
    fn stream_range(&self, key: &str) -> StoreResult<Vec<StreamEntry>>;

    /// Delete keys in one call, returning how many existed.
    ///
    /// On a partitioned store every key must map to the same partition.
    fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    /// Run a raw command, on `node` when given, otherwise wherever the
    /// store routes it. `args` is never empty.
    fn execute(&self, args: &[String], node: Option<&Endpoint>) -> StoreResult<CommandReply>;

    /// Raw `INFO` text of one node
    fn node_info(&self, endpoint: &Endpoint) -> StoreResult<String>;

    /// Raw cluster-level status text; `None` on a single node
    fn cluster_info(&self) -> StoreResult<Option<String>>;

    /// Release connections; later calls may fail
    fn close(&self) {}
}
