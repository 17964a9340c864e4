//! Deployment status
//!
//! Turns the store's `INFO` and cluster status texts into named sections
//! of typed values. Each line is `name:value`; lines starting with `#` open
//! a new section. Integer values become JSON numbers, anything else stays
//! a string.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Section name given to the cluster-level status
pub const CLUSTER_SECTION: &str = "Cluster";

/// Named group of status values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSection {
    pub name: String,
    pub values: BTreeMap<String, Value>,
}

impl StateSection {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    /// Look up one value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

/// Status sections of one node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    pub node_id: String,
    pub sections: Vec<StateSection>,
}

impl NodeState {
    /// Look up a section by name
    pub fn section(&self, name: &str) -> Option<&StateSection> {
        self.sections.iter().find(|s| s.name == name)
    }
}

/// Status of a whole deployment at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterState {
    /// When the status was read
    pub timestamp: DateTime<Utc>,

    /// One entry per node
    pub node_states: Vec<NodeState>,

    /// Cluster-level sections; empty on a single node
    pub sections: Vec<StateSection>,
}

/// Parse an `INFO` reply into its sections.
///
/// Values before the first `# Name` header are dropped.
pub fn parse_info(text: &str) -> Vec<StateSection> {
    let mut sections = Vec::new();
    let mut current: Option<StateSection> = None;

    for line in text.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
        if let Some(header) = line.strip_prefix('#') {
            sections.extend(current.take());
            current = Some(StateSection::new(header.trim()));
        } else if let Some(section) = current.as_mut() {
            put_value(line, &mut section.values);
        }
    }
    sections.extend(current);
    sections
}

/// Parse a cluster status reply (no headers) into one section
pub fn parse_cluster_info(text: &str) -> StateSection {
    let mut section = StateSection::new(CLUSTER_SECTION);
    for line in text.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
        put_value(line, &mut section.values);
    }
    section
}

/// Store the last `name:value` pair of a line.
///
/// Anything before it (a `cluster info:` style prefix) is ignored.
fn put_value(line: &str, values: &mut BTreeMap<String, Value>) {
    let mut parts = line.rsplitn(3, ':');
    let (Some(value), Some(name)) = (parts.next(), parts.next()) else {
        return;
    };
    let value = match value.parse::<i64>() {
        Ok(number) => Value::from(number),
        Err(_) => Value::from(value),
    };
    values.insert(name.to_string(), value);
}
