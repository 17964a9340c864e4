//! In-process store backend
//!
//! Keeps every shard's keyspace in a `BTreeMap` behind one shared lock. A
//! partitioned store spreads keys over several primaries by hashing the key
//! (or its hash tag) and exposes read-only replicas that mirror a primary.
//!
//! Scan cursors are positions in the sorted key order; each call examines
//! `count` keys, so a page can be empty while the cursor is not exhausted,
//! as with a real store. Keys written between two calls of one scan may be
//! missed or returned twice.
//!
//! Connectivity loss and per-shard scan failures can be injected, and every
//! store call is counted, which lets tests assert that a request was
//! rejected before touching the store.
//!
//! Raw commands cover a small subset (`PING`, `ECHO`, `DBSIZE`, `GET`, `SET`,
//! `EXISTS`, `TYPE`, `DEL`, `INFO` and `CLUSTER INFO|MYID`); anything else is
//! answered with an unknown-command error.

use crate::error::{StoreError, StoreResult};
use crate::store::{
    CommandReply, Endpoint, KeyKind, KeyStore, Role, ScanPage, ScanTarget, ShardRole,
    ShardScanner, StreamEntry, CURSOR_START,
};
use glob::Pattern;
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ADDRESS_HOST: &str = "memory";
const FIRST_PORT: u16 = 7000;

/// Value stored under a key
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryValue {
    /// Plain string
    Text(String),
    /// Unordered distinct members
    Set(BTreeSet<String>),
    /// Member to score
    ScoredSet(BTreeMap<String, f64>),
    /// Ordered elements
    List(Vec<String>),
    /// Field to value
    Hash(BTreeMap<String, String>),
    /// Stream entries, oldest first
    Stream(Vec<StreamEntry>),
}

impl MemoryValue {
    /// Plain string value
    pub fn text(value: impl Into<String>) -> Self {
        MemoryValue::Text(value.into())
    }

    /// Set from members; duplicates collapse
    pub fn set<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MemoryValue::Set(members.into_iter().map(Into::into).collect())
    }

    /// Scored set from `(member, score)` pairs; a repeated member keeps its last score
    pub fn scored<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        MemoryValue::ScoredSet(members.into_iter().map(|(m, s)| (m.into(), s)).collect())
    }

    /// List in the given order
    pub fn list<I, S>(elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MemoryValue::List(elements.into_iter().map(Into::into).collect())
    }

    /// Hash from `(field, value)` pairs
    pub fn hash<I, F, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Into<String>,
    {
        MemoryValue::Hash(
            fields
                .into_iter()
                .map(|(f, v)| (f.into(), v.into()))
                .collect(),
        )
    }

    /// Stream from entries, oldest first
    pub fn stream<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = StreamEntry>,
    {
        MemoryValue::Stream(entries.into_iter().collect())
    }

    fn kind(&self) -> KeyKind {
        match self {
            MemoryValue::Text(_) => KeyKind::Value,
            MemoryValue::Set(_) => KeyKind::Set,
            MemoryValue::ScoredSet(_) => KeyKind::ScoredSet,
            MemoryValue::List(_) => KeyKind::List,
            MemoryValue::Hash(_) => KeyKind::Hash,
            MemoryValue::Stream(_) => KeyKind::Stream,
        }
    }

    fn len(&self) -> u64 {
        let len = match self {
            MemoryValue::Text(s) => s.len(),
            MemoryValue::Set(s) => s.len(),
            MemoryValue::ScoredSet(s) => s.len(),
            MemoryValue::List(l) => l.len(),
            MemoryValue::Hash(h) => h.len(),
            MemoryValue::Stream(s) => s.len(),
        };
        len as u64
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: MemoryValue,
    ttl: Option<Duration>,
}

#[derive(Debug)]
struct Shard {
    endpoint: Endpoint,
    keys: BTreeMap<String, Entry>,
    fail_scans: bool,
}

#[derive(Debug)]
struct Replica {
    endpoint: Endpoint,
    primary: usize,
}

#[derive(Debug, Default)]
struct State {
    primaries: Vec<Shard>,
    replicas: Vec<Replica>,
}

impl State {
    /// Primary index serving `endpoint`, directly or through a replica
    fn serving(&self, endpoint: &Endpoint) -> Option<usize> {
        self.primaries
            .iter()
            .position(|s| s.endpoint == *endpoint)
            .or_else(|| {
                self.replicas
                    .iter()
                    .find(|r| r.endpoint == *endpoint)
                    .map(|r| r.primary)
            })
    }
}

/// Counters and switches shared by the store and its scanners
#[derive(Debug)]
struct Health {
    reachable: AtomicBool,
    operations: AtomicU64,
}

impl Health {
    fn check(&self, target: &str) -> StoreResult<()> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        if self.reachable.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(StoreError::ConnectionFailed {
                target: target.to_string(),
                reason: "store is unreachable".to_string(),
            })
        }
    }
}

/// In-process store, standalone or partitioned
#[derive(Debug, Clone)]
pub struct MemoryStore {
    partitioned: bool,
    state: Arc<RwLock<State>>,
    health: Arc<Health>,
}

impl MemoryStore {
    /// Single-node store
    pub fn standalone() -> Self {
        Self::build(false, 1, 0)
    }

    /// Partitioned store with `primaries` shards, each mirrored by
    /// `replicas_per_primary` replicas
    pub fn partitioned(primaries: usize, replicas_per_primary: usize) -> Self {
        Self::build(true, primaries.max(1), replicas_per_primary)
    }

    fn build(partitioned: bool, primaries: usize, replicas_per_primary: usize) -> Self {
        let mut state = State::default();
        let mut port = FIRST_PORT;
        let mut next_address = || {
            let address = format!("{ADDRESS_HOST}:{port}");
            port += 1;
            address
        };

        for index in 0..primaries {
            state.primaries.push(Shard {
                endpoint: Endpoint::new(format!("primary-{index}"), next_address()),
                keys: BTreeMap::new(),
                fail_scans: false,
            });
        }
        for primary in 0..primaries {
            for index in 0..replicas_per_primary {
                state.replicas.push(Replica {
                    endpoint: Endpoint::new(
                        format!("replica-{primary}-{index}"),
                        next_address(),
                    ),
                    primary,
                });
            }
        }

        Self {
            partitioned,
            state: Arc::new(RwLock::new(state)),
            health: Arc::new(Health {
                reachable: AtomicBool::new(true),
                operations: AtomicU64::new(0),
            }),
        }
    }

    /// Primary index owning `key`.
    ///
    /// Only the content of a non-empty `{...}` hash tag is hashed, so keys
    /// sharing a tag land on the same primary.
    pub fn shard_of(&self, key: &str) -> usize {
        let primaries = self.state.read().primaries.len();
        if primaries <= 1 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        hash_tag(key).hash(&mut hasher);
        (hasher.finish() % primaries as u64) as usize
    }

    /// Store a value, replacing any previous one
    pub fn insert(&self, key: impl Into<String>, value: MemoryValue) {
        let key = key.into();
        let shard = self.shard_of(&key);
        self.state.write().primaries[shard]
            .keys
            .insert(key, Entry { value, ttl: None });
    }

    /// Store a plain string value
    pub fn set_text(&self, key: impl Into<String>, value: impl Into<String>) {
        self.insert(key, MemoryValue::text(value));
    }

    /// Attach a time to live to an existing key; returns whether it exists
    pub fn set_ttl(&self, key: &str, ttl: Duration) -> bool {
        let shard = self.shard_of(key);
        match self.state.write().primaries[shard].keys.get_mut(key) {
            Some(entry) => {
                entry.ttl = Some(ttl);
                true
            }
            None => false,
        }
    }

    /// Check whether a key exists
    pub fn contains(&self, key: &str) -> bool {
        let shard = self.shard_of(key);
        self.state.read().primaries[shard].keys.contains_key(key)
    }

    /// Total number of keys over every primary
    pub fn key_count(&self) -> usize {
        self.state.read().primaries.iter().map(|s| s.keys.len()).sum()
    }

    /// Make every later call succeed or fail with a connection error
    pub fn set_reachable(&self, reachable: bool) {
        self.health.reachable.store(reachable, Ordering::Relaxed);
    }

    /// Make scans on one primary (and its replicas) fail
    pub fn fail_scans(&self, primary: usize, fail: bool) {
        if let Some(shard) = self.state.write().primaries.get_mut(primary) {
            shard.fail_scans = fail;
        }
    }

    /// Number of store calls made so far
    pub fn operation_count(&self) -> u64 {
        self.health.operations.load(Ordering::Relaxed)
    }

    fn with_entry<R>(&self, key: &str, f: impl FnOnce(Option<&Entry>) -> R) -> StoreResult<R> {
        self.health.check(ADDRESS_HOST)?;
        let shard = self.shard_of(key);
        let state = self.state.read();
        Ok(f(state.primaries[shard].keys.get(key)))
    }

    fn resolve(&self, endpoint: &Endpoint) -> StoreResult<usize> {
        self.state
            .read()
            .serving(endpoint)
            .ok_or_else(|| StoreError::ConnectionFailed {
                target: endpoint.to_string(),
                reason: "no such shard".to_string(),
            })
    }

    fn info_text(&self, endpoint: &Endpoint, primary: usize) -> String {
        let state = self.state.read();
        let shard = &state.primaries[primary];
        let is_primary = shard.endpoint == *endpoint;
        let port = endpoint.address.rsplit(':').next().unwrap_or_default();
        let replicas = state.replicas.iter().filter(|r| r.primary == primary).count();
        let expires = shard.keys.values().filter(|e| e.ttl.is_some()).count();

        let mut text = String::new();
        text.push_str("# Server\r\n");
        text.push_str("redis_version:7.2.0\r\n");
        text.push_str(&format!(
            "redis_mode:{}\r\n",
            if self.partitioned { "cluster" } else { "standalone" }
        ));
        text.push_str(&format!("tcp_port:{port}\r\n\r\n"));
        text.push_str("# Replication\r\n");
        if is_primary {
            text.push_str(&format!("role:master\r\nconnected_slaves:{replicas}\r\n\r\n"));
        } else {
            text.push_str(&format!(
                "role:slave\r\nmaster_host:{}\r\n\r\n",
                shard.endpoint.address
            ));
        }
        text.push_str("# Keyspace\r\n");
        if !shard.keys.is_empty() {
            text.push_str(&format!(
                "db0:keys={},expires={expires},avg_ttl=0\r\n",
                shard.keys.len()
            ));
        }
        text
    }
}

impl ScanTarget for MemoryStore {
    fn is_partitioned(&self) -> bool {
        self.partitioned
    }

    fn shards(&self) -> StoreResult<Vec<ShardRole>> {
        self.health.check(ADDRESS_HOST)?;
        let state = self.state.read();
        let primaries = state.primaries.iter().map(|s| ShardRole {
            endpoint: s.endpoint.clone(),
            role: Role::Primary,
            primary_of: None,
        });
        let replicas = state.replicas.iter().map(|r| ShardRole {
            endpoint: r.endpoint.clone(),
            role: Role::Replica,
            primary_of: Some(state.primaries[r.primary].endpoint.id.clone()),
        });
        Ok(primaries.chain(replicas).collect())
    }

    fn open_scanner(&self, endpoint: &Endpoint) -> StoreResult<Box<dyn ShardScanner>> {
        self.health.check(&endpoint.address)?;
        let primary = self
            .state
            .read()
            .serving(endpoint)
            .ok_or_else(|| StoreError::ConnectionFailed {
                target: endpoint.to_string(),
                reason: "no such shard".to_string(),
            })?;
        Ok(Box::new(MemoryScanner {
            endpoint: endpoint.clone(),
            primary,
            state: Arc::clone(&self.state),
            health: Arc::clone(&self.health),
        }))
    }
}

impl KeyStore for MemoryStore {
    fn ping(&self) -> StoreResult<()> {
        self.health.check(ADDRESS_HOST)
    }

    fn key_kind(&self, key: &str) -> StoreResult<Option<KeyKind>> {
        self.with_entry(key, |entry| entry.map(|e| e.value.kind()))
    }

    fn length(&self, key: &str, kind: KeyKind) -> StoreResult<u64> {
        self.with_entry(key, |entry| match entry {
            Some(e) if e.value.kind() == kind => Ok(e.value.len()),
            Some(e) => Err(wrong_type(key, e.value.kind())),
            None => Ok(0),
        })?
    }

    fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.with_entry(key, |entry| entry.and_then(|e| e.ttl))
    }

    fn value(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_entry(key, |entry| match entry {
            Some(Entry {
                value: MemoryValue::Text(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(e) => Err(wrong_type(key, e.value.kind())),
            None => Ok(None),
        })?
    }

    fn scan_members(
        &self,
        key: &str,
        kind: KeyKind,
        cursor: u64,
        glob: &str,
        count: usize,
    ) -> StoreResult<ScanPage> {
        let pattern = compile(glob)?;
        self.with_entry(key, |entry| {
            let Some(entry) = entry else {
                return Ok(ScanPage::default());
            };
            if entry.value.kind() != kind {
                return Err(wrong_type(key, entry.value.kind()));
            }
            let page = match &entry.value {
                MemoryValue::Set(members) => page_over(members.iter(), cursor, count, |m| {
                    pattern.matches(m).then(|| vec![m.clone()])
                }),
                MemoryValue::Hash(fields) => page_over(fields.iter(), cursor, count, |(f, v)| {
                    pattern.matches(f).then(|| vec![f.clone(), v.clone()])
                }),
                MemoryValue::ScoredSet(members) => {
                    page_over(members.iter(), cursor, count, |(m, s)| {
                        pattern.matches(m).then(|| vec![m.clone(), s.to_string()])
                    })
                }
                other => return Err(wrong_type(key, other.kind())),
            };
            Ok(page)
        })?
    }

    fn list_range(&self, key: &str) -> StoreResult<Vec<String>> {
        self.with_entry(key, |entry| match entry {
            Some(Entry {
                value: MemoryValue::List(elements),
                ..
            }) => Ok(elements.clone()),
            Some(e) => Err(wrong_type(key, e.value.kind())),
            None => Ok(Vec::new()),
        })?
    }

    fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        self.health.check(ADDRESS_HOST)?;
        if keys.is_empty() {
            return Ok(0);
        }

        if self.partitioned && keys.len() > 1 {
            let tags: HashSet<&str> = keys.iter().map(|k| hash_tag(k)).collect();
            if tags.len() > 1 {
                return Err(StoreError::CrossSlot {
                    keys: keys.to_vec(),
                });
            }
        }

        let placed: Vec<(usize, &String)> = keys.iter().map(|k| (self.shard_of(k), k)).collect();
        let mut state = self.state.write();
        let deleted = placed
            .into_iter()
            .filter(|(shard, key)| state.primaries[*shard].keys.remove(*key).is_some())
            .count();
        Ok(deleted as u64)
    }

    fn stream_range(&self, key: &str) -> StoreResult<Vec<StreamEntry>> {
        self.with_entry(key, |entry| match entry {
            Some(Entry {
                value: MemoryValue::Stream(entries),
                ..
            }) => Ok(entries.clone()),
            Some(e) => Err(wrong_type(key, e.value.kind())),
            None => Ok(Vec::new()),
        })?
    }

    fn execute(&self, args: &[String], node: Option<&Endpoint>) -> StoreResult<CommandReply> {
        self.health
            .check(node.map_or(ADDRESS_HOST, |n| n.address.as_str()))?;
        let target = node.map(|n| self.resolve(n).map(|p| (n, p))).transpose()?;
        let (name, rest) = args
            .split_first()
            .ok_or_else(|| StoreError::Protocol("ERR empty command".to_string()))?;

        let arity = |expected: usize| {
            if rest.len() == expected {
                Ok(())
            } else {
                Err(StoreError::Protocol(format!(
                    "ERR wrong number of arguments for '{}' command",
                    name.to_ascii_lowercase()
                )))
            }
        };

        match name.to_ascii_uppercase().as_str() {
            "PING" => Ok(CommandReply::Text(
                rest.first().cloned().unwrap_or_else(|| "PONG".to_string()),
            )),
            "ECHO" => {
                arity(1)?;
                Ok(CommandReply::Text(rest[0].clone()))
            }
            "DBSIZE" => {
                let state = self.state.read();
                let keys = match target {
                    Some((_, primary)) => state.primaries[primary].keys.len(),
                    None => state.primaries.iter().map(|s| s.keys.len()).sum(),
                };
                Ok(CommandReply::Integer(keys as i64))
            }
            "GET" => {
                arity(1)?;
                let shard = self.shard_of(&rest[0]);
                let state = self.state.read();
                match state.primaries[shard].keys.get(&rest[0]) {
                    Some(Entry {
                        value: MemoryValue::Text(s),
                        ..
                    }) => Ok(CommandReply::Text(s.clone())),
                    Some(e) => Err(wrong_type(&rest[0], e.value.kind())),
                    None => Ok(CommandReply::Nil),
                }
            }
            "SET" => {
                arity(2)?;
                self.set_text(rest[0].clone(), rest[1].clone());
                Ok(CommandReply::ok())
            }
            "EXISTS" => {
                let found = rest.iter().filter(|k| self.contains(k)).count();
                Ok(CommandReply::Integer(found as i64))
            }
            "TYPE" => {
                arity(1)?;
                let shard = self.shard_of(&rest[0]);
                let state = self.state.read();
                let name = state.primaries[shard]
                    .keys
                    .get(&rest[0])
                    .map_or("none", |e| type_name(e.value.kind()));
                Ok(CommandReply::Text(name.to_string()))
            }
            "DEL" => Ok(CommandReply::Integer(self.delete(rest)? as i64)),
            "INFO" => {
                let endpoint = match target {
                    Some((endpoint, _)) => endpoint.clone(),
                    None => self.state.read().primaries[0].endpoint.clone(),
                };
                Ok(CommandReply::Text(self.node_info(&endpoint)?))
            }
            "CLUSTER" => match rest.first().map(|s| s.to_ascii_uppercase()).as_deref() {
                Some("INFO") => self
                    .cluster_info()?
                    .map(CommandReply::Text)
                    .ok_or_else(|| {
                        StoreError::Protocol(
                            "ERR This instance has cluster support disabled".to_string(),
                        )
                    }),
                Some("MYID") => {
                    let endpoint = match target {
                        Some((endpoint, _)) => endpoint.clone(),
                        None => self.state.read().primaries[0].endpoint.clone(),
                    };
                    Ok(CommandReply::Text(endpoint.id))
                }
                _ => Err(StoreError::Protocol(format!(
                    "ERR unknown subcommand for 'cluster': {}",
                    rest.join(" ")
                ))),
            },
            _ => Err(StoreError::Protocol(format!(
                "ERR unknown command '{}'",
                name.to_ascii_lowercase()
            ))),
        }
    }

    fn node_info(&self, endpoint: &Endpoint) -> StoreResult<String> {
        self.health.check(&endpoint.address)?;
        let primary = self.resolve(endpoint)?;
        Ok(self.info_text(endpoint, primary))
    }

    fn cluster_info(&self) -> StoreResult<Option<String>> {
        self.health.check(ADDRESS_HOST)?;
        if !self.partitioned {
            return Ok(None);
        }
        let state = self.state.read();
        let known = state.primaries.len() + state.replicas.len();
        Ok(Some(format!(
            "cluster_state:ok\r\ncluster_slots_assigned:16384\r\ncluster_known_nodes:{known}\r\ncluster_size:{}\r\n",
            state.primaries.len()
        )))
    }
}

/// Cursor scanner over one primary or one of its replicas
struct MemoryScanner {
    endpoint: Endpoint,
    primary: usize,
    state: Arc<RwLock<State>>,
    health: Arc<Health>,
}

impl ShardScanner for MemoryScanner {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn scan(&mut self, cursor: u64, glob: &str, count: usize) -> StoreResult<ScanPage> {
        self.health
            .check(&self.endpoint.address)
            .map_err(|e| StoreError::scan_failed(&self.endpoint.id, e))?;
        let pattern = compile(glob)?;
        let state = self.state.read();
        let shard = &state.primaries[self.primary];
        if shard.fail_scans {
            return Err(StoreError::scan_failed(
                &self.endpoint.id,
                "injected scan failure",
            ));
        }
        Ok(page_over(shard.keys.keys(), cursor, count, |k| {
            pattern.matches(k).then(|| vec![k.clone()])
        }))
    }

    fn exists(&mut self, key: &str) -> StoreResult<bool> {
        self.health.check(&self.endpoint.address)?;
        Ok(self.state.read().primaries[self.primary]
            .keys
            .contains_key(key))
    }
}

/// Examine `count` items starting at position `cursor`
fn page_over<I, T>(
    items: I,
    cursor: u64,
    count: usize,
    mut select: impl FnMut(T) -> Option<Vec<String>>,
) -> ScanPage
where
    I: ExactSizeIterator<Item = T>,
{
    let total = items.len() as u64;
    let count = count.max(1) as u64;
    let end = cursor.saturating_add(count);

    let mut page = ScanPage {
        cursor: if end >= total { CURSOR_START } else { end },
        ..Default::default()
    };
    for item in items.skip(cursor as usize).take(count as usize) {
        if let Some(selected) = select(item) {
            page.items.extend(selected);
        }
    }
    page
}

/// Compile a store glob; `\x` escapes become `[x]`
fn compile(glob: &str) -> StoreResult<Pattern> {
    let mut translated = String::with_capacity(glob.len());
    let mut chars = glob.chars();
    while let Some(c) = chars.next() {
        match (c, chars.clone().next()) {
            ('\\', Some(next)) => {
                chars.next();
                translated.push('[');
                translated.push(next);
                translated.push(']');
            }
            _ => translated.push(c),
        }
    }
    Pattern::new(&translated)
        .map_err(|e| StoreError::Protocol(format!("invalid pattern '{glob}': {e}")))
}

/// Type name as reported by `TYPE`
fn type_name(kind: KeyKind) -> &'static str {
    match kind {
        KeyKind::Value => "string",
        KeyKind::Set => "set",
        KeyKind::ScoredSet => "zset",
        KeyKind::List => "list",
        KeyKind::Hash => "hash",
        KeyKind::Stream => "stream",
    }
}

fn wrong_type(key: &str, actual: KeyKind) -> StoreError {
    StoreError::Protocol(format!(
        "WRONGTYPE key '{key}' holds a {actual} value"
    ))
}

/// Portion of the key used for placement
fn hash_tag(key: &str) -> &str {
    if let Some(open) = key.find('{') {
        if let Some(len) = key[open + 1..].find('}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escaped_glob_is_literal() {
        let pattern = compile("a\\*b:*").unwrap();
        assert!(pattern.matches("a*b:1"));
        assert!(!pattern.matches("axb:1"));
    }

    fn scan_all(scanner: &mut dyn ShardScanner, glob: &str, count: usize) -> Vec<String> {
        let mut cursor = CURSOR_START;
        let mut keys = Vec::new();
        loop {
            let page = scanner.scan(cursor, glob, count).unwrap();
            keys.extend(page.items);
            if page.cursor == CURSOR_START {
                return keys;
            }
            cursor = page.cursor;
        }
    }

    #[test]
    fn test_hash_tag() {
        assert_eq!(hash_tag("user:{eu}:1"), "eu");
        assert_eq!(hash_tag("user:{}:1"), "user:{}:1");
        assert_eq!(hash_tag("plain"), "plain");
        assert_eq!(hash_tag("a{b"), "a{b");
    }

    #[test]
    fn test_scan_pages_with_glob() {
        let store = MemoryStore::standalone();
        for i in 0..25 {
            store.set_text(format!("a:{i}"), "x");
            store.set_text(format!("b:{i}"), "x");
        }

        let endpoint = store.list_primaries().unwrap().remove(0);
        let mut scanner = store.open_scanner(&endpoint).unwrap();
        let keys = scan_all(scanner.as_mut(), "a:*", 7);
        assert_eq!(keys.len(), 25);
        assert!(keys.iter().all(|k| k.starts_with("a:")));
    }

    #[test]
    fn test_partitioned_placement_and_replicas() {
        let store = MemoryStore::partitioned(3, 1);
        for i in 0..60 {
            store.set_text(format!("k:{i}"), "v");
        }

        let shards = store.shards().unwrap();
        assert_eq!(shards.len(), 6);
        assert_eq!(store.list_primaries().unwrap().len(), 3);

        let mut total = 0;
        for endpoint in store.list_primaries().unwrap() {
            let mut scanner = store.open_scanner(&endpoint).unwrap();
            total += scan_all(scanner.as_mut(), "*", 10).len();
        }
        assert_eq!(total, 60);

        let replica = shards.iter().find(|s| !s.is_primary()).unwrap();
        assert_eq!(replica.primary_of.as_deref(), Some("primary-0"));
    }

    #[test]
    fn test_cross_slot_delete() {
        let store = MemoryStore::partitioned(3, 0);
        store.set_text("{t}:a", "1");
        store.set_text("{t}:b", "2");
        store.set_text("other", "3");

        let same_tag = vec!["{t}:a".to_string(), "{t}:b".to_string()];
        assert_eq!(store.delete(&same_tag).unwrap(), 2);

        let mixed = vec!["other".to_string(), "missing".to_string()];
        assert!(matches!(
            store.delete(&mixed),
            Err(StoreError::CrossSlot { .. })
        ));
        assert!(store.contains("other"));
    }

    #[test]
    fn test_unreachable_store() {
        let store = MemoryStore::standalone();
        store.set_reachable(false);
        assert!(store.ping().unwrap_err().is_connectivity());
        assert_eq!(store.operation_count(), 1);
    }

    #[test]
    fn test_stream_range() {
        let store = MemoryStore::standalone();
        store.insert(
            "events",
            MemoryValue::stream([
                StreamEntry::new("1-0", [("kind", "login")]),
                StreamEntry::new("2-0", [("kind", "logout")]),
            ]),
        );
        store.set_text("plain", "x");

        let entries = store.stream_range("events").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].id, "2-0");
        assert_eq!(entries[1].values["kind"], "logout");
        assert!(store.stream_range("missing").unwrap().is_empty());
        assert!(store.stream_range("plain").is_err());
    }

    #[test]
    fn test_execute_subset() {
        let store = MemoryStore::partitioned(2, 1);
        let run = |args: &[&str]| {
            let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
            store.execute(&args, None)
        };

        assert_eq!(run(&["ping"]).unwrap(), CommandReply::Text("PONG".into()));
        assert_eq!(run(&["SET", "a:1", "x"]).unwrap(), CommandReply::ok());
        assert_eq!(run(&["GET", "a:1"]).unwrap(), CommandReply::Text("x".into()));
        assert_eq!(run(&["GET", "a:2"]).unwrap(), CommandReply::Nil);
        assert_eq!(run(&["TYPE", "a:1"]).unwrap(), CommandReply::Text("string".into()));
        assert_eq!(run(&["EXISTS", "a:1", "a:2"]).unwrap(), CommandReply::Integer(1));
        assert_eq!(run(&["DBSIZE"]).unwrap(), CommandReply::Integer(1));
        assert!(matches!(run(&["GET"]), Err(StoreError::Protocol(_))));
        assert!(matches!(run(&["FLUSHALL"]), Err(StoreError::Protocol(_))));

        let replica = store
            .shards()
            .unwrap()
            .into_iter()
            .find(|s| !s.is_primary())
            .unwrap()
            .endpoint;
        let myid = store
            .execute(&["CLUSTER".to_string(), "MYID".to_string()], Some(&replica))
            .unwrap();
        assert_eq!(myid, CommandReply::Text(replica.id.clone()));
    }

    #[test]
    fn test_node_and_cluster_info() {
        let store = MemoryStore::partitioned(2, 1);
        store.set_text("k", "v");
        let shards = store.shards().unwrap();

        let owner = &shards[store.shard_of("k")].endpoint;
        let info = store.node_info(owner).unwrap();
        assert!(info.contains("role:master"));
        assert!(info.contains("db0:keys=1,"));

        let replica = &shards.iter().find(|s| !s.is_primary()).unwrap().endpoint;
        assert!(store.node_info(replica).unwrap().contains("role:slave"));

        let cluster = store.cluster_info().unwrap().unwrap();
        assert!(cluster.contains("cluster_known_nodes:4"));
        assert!(MemoryStore::standalone().cluster_info().unwrap().is_none());
    }

    #[test]
    fn test_scan_members_pairs() {
        let store = MemoryStore::standalone();
        store.insert("h", MemoryValue::hash([("f1", "v1"), ("f2", "v2")]));
        store.insert("z", MemoryValue::scored([("m", 1.5)]));

        let page = store.scan_members("h", KeyKind::Hash, 0, "*", 10).unwrap();
        assert_eq!(page.items, vec!["f1", "v1", "f2", "v2"]);
        assert!(page.is_last());

        let page = store.scan_members("z", KeyKind::ScoredSet, 0, "*", 10).unwrap();
        assert_eq!(page.items, vec!["m", "1.5"]);

        assert!(store.scan_members("h", KeyKind::Set, 0, "*", 10).is_err());
    }
}
