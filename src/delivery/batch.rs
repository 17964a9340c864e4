//! Delivery payload types

use crate::store::StreamEntry;
use crate::tree::EntryPointNode;
use serde::{Deserialize, Serialize};

/// How a result reaches the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    /// Nothing was delivered
    #[default]
    None,
    /// The whole result was returned inline
    Completed,
    /// The result is delivered through a handle the caller must drain
    Moved,
}

/// A hash field with its value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashField {
    pub key: String,
    pub value: String,
}

/// Scored-set members sharing one score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMembers {
    pub score: f64,
    pub values: Vec<String>,
}

/// One typed item of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Record {
    /// Tree node from an entry-point listing
    Node(EntryPointNode),
    /// Hash field
    Field(HashField),
    /// Scored-set group
    Scored(ScoredMembers),
    /// Stream entry
    Entry(StreamEntry),
    /// Plain value, set member, or list element
    Text(String),
}

impl From<EntryPointNode> for Record {
    fn from(node: EntryPointNode) -> Self {
        Record::Node(node)
    }
}

impl From<String> for Record {
    fn from(text: String) -> Self {
        Record::Text(text)
    }
}

/// Unit exchanged over the delivery channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataBatch {
    /// Number of records in `data`
    pub size: u64,

    /// Records in delivery order
    pub data: Vec<Record>,
}

impl DataBatch {
    /// Batch over `data`, sized to match
    pub fn new(data: Vec<Record>) -> Self {
        Self {
            size: data.len() as u64,
            data,
        }
    }

    /// Check if the batch carries no record
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.data.len()
    }
}
