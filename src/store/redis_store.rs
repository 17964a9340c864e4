//! Redis store backend
//!
//! Standalone deployments are reached through one connection. Cluster
//! deployments use a cluster connection for key commands, which follows
//! slot redirections, plus one direct connection per node for cursor scans,
//! since a cursor is only meaningful on the node that issued it.

use crate::error::{StoreError, StoreResult};
use crate::store::{
    CommandReply, Endpoint, KeyKind, KeyStore, Role, ScanPage, ScanTarget, ShardRole,
    ShardScanner, StreamEntry,
};
use parking_lot::Mutex;
use redis::cluster::{ClusterClient, ClusterConnection};
use redis::{
    Client, Cmd, Connection, ConnectionAddr, ConnectionInfo, FromRedisValue,
    RedisConnectionInfo, Value,
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Node id reported for a standalone server
pub const STANDALONE_NODE_ID: &str = "standalone";

/// Default port when a bootstrap address omits it
pub const DEFAULT_PORT: u16 = 6379;

/// Configuration for a Redis store
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Bootstrap `host:port` addresses
    pub nodes: Vec<String>,
    /// Whether the deployment is a cluster
    pub cluster: bool,
    /// ACL user name
    pub user: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Logical database (standalone only)
    pub db: i64,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Socket read timeout
    pub read_timeout: Option<Duration>,
    /// Socket write timeout
    pub write_timeout: Option<Duration>,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            nodes: vec![format!("127.0.0.1:{DEFAULT_PORT}")],
            cluster: false,
            user: None,
            password: None,
            db: 0,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Some(Duration::from_secs(30)),
            write_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RedisStoreConfig {
    /// Connection parameters for one `host:port` address
    fn connection_info(&self, address: &str) -> StoreResult<ConnectionInfo> {
        let (host, port) = split_address(address)?;
        Ok(ConnectionInfo {
            addr: ConnectionAddr::Tcp(host, port),
            redis: RedisConnectionInfo {
                db: if self.cluster { 0 } else { self.db },
                username: self.user.clone(),
                password: self.password.clone(),
                ..Default::default()
            },
        })
    }

    /// Open a direct connection to one node
    fn connect_node(&self, address: &str) -> StoreResult<Connection> {
        let failed = |e: redis::RedisError| StoreError::ConnectionFailed {
            target: address.to_string(),
            reason: e.to_string(),
        };
        let client = Client::open(self.connection_info(address)?).map_err(failed)?;
        let connection = client
            .get_connection_with_timeout(self.connect_timeout)
            .map_err(failed)?;
        connection.set_read_timeout(self.read_timeout).map_err(failed)?;
        connection.set_write_timeout(self.write_timeout).map_err(failed)?;
        Ok(connection)
    }
}

enum Link {
    Single(Connection),
    Cluster(ClusterConnection),
}

/// Redis store, standalone or cluster
pub struct RedisStore {
    config: RedisStoreConfig,
    link: Mutex<Option<Link>>,
}

impl RedisStore {
    /// Connect to the deployment described by `config`
    pub fn connect(config: RedisStoreConfig) -> StoreResult<Self> {
        if config.nodes.is_empty() {
            return Err(StoreError::ConnectionFailed {
                target: "redis".to_string(),
                reason: "no bootstrap address".to_string(),
            });
        }

        let link = if config.cluster {
            let infos = config
                .nodes
                .iter()
                .map(|n| config.connection_info(n))
                .collect::<StoreResult<Vec<_>>>()?;
            let mut builder = ClusterClient::builder(infos);
            if let Some(user) = &config.user {
                builder = builder.username(user.clone());
            }
            if let Some(password) = &config.password {
                builder = builder.password(password.clone());
            }
            let failed = |e: redis::RedisError| StoreError::ConnectionFailed {
                target: config.nodes.join(","),
                reason: e.to_string(),
            };
            let connection = builder.build().map_err(failed)?.get_connection().map_err(failed)?;
            connection.set_read_timeout(config.read_timeout).map_err(failed)?;
            connection.set_write_timeout(config.write_timeout).map_err(failed)?;
            Link::Cluster(connection)
        } else {
            Link::Single(config.connect_node(&config.nodes[0])?)
        };

        info!(
            nodes = %config.nodes.join(","),
            cluster = config.cluster,
            "Connected to redis"
        );

        Ok(Self {
            config,
            link: Mutex::new(Some(link)),
        })
    }

    fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> StoreResult<T> {
        let mut guard = self.link.lock();
        let result = match guard.as_mut() {
            Some(Link::Single(connection)) => cmd.query(connection),
            Some(Link::Cluster(connection)) => cmd.query(connection),
            None => {
                return Err(StoreError::ConnectionFailed {
                    target: self.config.nodes.join(","),
                    reason: "store was closed".to_string(),
                })
            }
        };
        result.map_err(StoreError::from)
    }

    /// Run a command on one node over a direct connection
    fn query_node<T: FromRedisValue>(&self, address: &str, cmd: &Cmd) -> StoreResult<T> {
        let mut connection = self.config.connect_node(address)?;
        Ok(cmd.query(&mut connection)?)
    }

    /// `CLUSTER <subcommand>` text, asked of the first reachable bootstrap node
    fn ask_cluster(&self, subcommand: &str) -> StoreResult<String> {
        let mut last_error = None;
        for address in &self.config.nodes {
            match self.query_node::<String>(address, redis::cmd("CLUSTER").arg(subcommand)) {
                Ok(text) => return Ok(text),
                Err(e) => {
                    debug!(node = %address, subcommand, error = %e, "CLUSTER command failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| StoreError::ConnectionFailed {
            target: "redis".to_string(),
            reason: "no bootstrap address".to_string(),
        }))
    }
}

impl ScanTarget for RedisStore {
    fn is_partitioned(&self) -> bool {
        self.config.cluster
    }

    fn shards(&self) -> StoreResult<Vec<ShardRole>> {
        if self.config.cluster {
            return self.ask_cluster("NODES").map(|text| parse_cluster_nodes(&text));
        }
        Ok(vec![ShardRole {
            endpoint: Endpoint::new(STANDALONE_NODE_ID, self.config.nodes[0].clone()),
            role: Role::Primary,
            primary_of: None,
        }])
    }

    fn open_scanner(&self, endpoint: &Endpoint) -> StoreResult<Box<dyn ShardScanner>> {
        let connection = self.config.connect_node(&endpoint.address)?;
        Ok(Box::new(RedisScanner {
            endpoint: endpoint.clone(),
            connection,
        }))
    }
}

impl KeyStore for RedisStore {
    fn ping(&self) -> StoreResult<()> {
        self.query::<String>(&redis::cmd("PING"))
            .map(|_| ())
            .map_err(|e| match e {
                StoreError::ConnectionFailed { reason, .. } => StoreError::ConnectionFailed {
                    target: self.config.nodes.join(","),
                    reason,
                },
                other => StoreError::ConnectionFailed {
                    target: self.config.nodes.join(","),
                    reason: other.to_string(),
                },
            })
    }

    fn key_kind(&self, key: &str) -> StoreResult<Option<KeyKind>> {
        let name: String = self.query(redis::cmd("TYPE").arg(key))?;
        KeyKind::from_type_name(key, &name)
    }

    fn length(&self, key: &str, kind: KeyKind) -> StoreResult<u64> {
        let command = match kind {
            KeyKind::Value => "STRLEN",
            KeyKind::Set => "SCARD",
            KeyKind::ScoredSet => "ZCARD",
            KeyKind::List => "LLEN",
            KeyKind::Hash => "HLEN",
            KeyKind::Stream => "XLEN",
        };
        self.query(redis::cmd(command).arg(key))
    }

    fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let millis: i64 = self.query(redis::cmd("PTTL").arg(key))?;
        // -1: no expiry, -2: missing key
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    fn value(&self, key: &str) -> StoreResult<Option<String>> {
        self.query(redis::cmd("GET").arg(key))
    }

    fn scan_members(
        &self,
        key: &str,
        kind: KeyKind,
        cursor: u64,
        glob: &str,
        count: usize,
    ) -> StoreResult<ScanPage> {
        let command = match kind {
            KeyKind::Set => "SSCAN",
            KeyKind::Hash => "HSCAN",
            KeyKind::ScoredSet => "ZSCAN",
            other => {
                return Err(StoreError::UnsupportedType {
                    key: key.to_string(),
                    kind: other.to_string(),
                })
            }
        };
        let (cursor, raw): (u64, Vec<Vec<u8>>) = self.query(
            redis::cmd(command)
                .arg(key)
                .arg(cursor)
                .arg("MATCH")
                .arg(glob)
                .arg("COUNT")
                .arg(count),
        )?;
        // Members are only displayed; pairs must stay aligned
        Ok(ScanPage {
            cursor,
            items: raw.iter().map(|item| String::from_utf8_lossy(item).into_owned()).collect(),
            invalid: 0,
        })
    }

    fn list_range(&self, key: &str) -> StoreResult<Vec<String>> {
        self.query(redis::cmd("LRANGE").arg(key).arg(0).arg(-1))
    }

    fn stream_range(&self, key: &str) -> StoreResult<Vec<StreamEntry>> {
        let raw: Vec<(String, Vec<Vec<u8>>)> =
            self.query(redis::cmd("XRANGE").arg(key).arg("-").arg("+"))?;
        Ok(raw
            .into_iter()
            .map(|(id, fields)| {
                let mut fields = fields
                    .into_iter()
                    .map(|f| String::from_utf8_lossy(&f).into_owned());
                let values = std::iter::from_fn(|| Some((fields.next()?, fields.next()?)));
                StreamEntry::new(id, values.collect::<Vec<_>>())
            })
            .collect())
    }

    fn execute(&self, args: &[String], node: Option<&Endpoint>) -> StoreResult<CommandReply> {
        let (name, rest) = args
            .split_first()
            .ok_or_else(|| StoreError::Protocol("empty command".to_string()))?;
        let mut cmd = redis::cmd(name);
        for arg in rest {
            cmd.arg(arg);
        }

        let value: Value = match node {
            Some(endpoint) => self.query_node(&endpoint.address, &cmd)?,
            None => self.query(&cmd)?,
        };
        Ok(to_reply(value))
    }

    fn node_info(&self, endpoint: &Endpoint) -> StoreResult<String> {
        if self.config.cluster {
            self.query_node(&endpoint.address, &redis::cmd("INFO"))
        } else {
            self.query(&redis::cmd("INFO"))
        }
    }

    fn cluster_info(&self) -> StoreResult<Option<String>> {
        if !self.config.cluster {
            return Ok(None);
        }
        self.ask_cluster("INFO").map(Some)
    }

    fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.query(redis::cmd("DEL").arg(keys))
            .map_err(|e| match e {
                StoreError::CrossSlot { .. } => StoreError::CrossSlot {
                    keys: keys.to_vec(),
                },
                other => other,
            })
    }

    fn close(&self) {
        if self.link.lock().take().is_some() {
            debug!(nodes = %self.config.nodes.join(","), "Closed redis connection");
        }
    }
}

/// Cursor scanner holding a direct connection to one node
struct RedisScanner {
    endpoint: Endpoint,
    connection: Connection,
}

impl ShardScanner for RedisScanner {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn scan(&mut self, cursor: u64, glob: &str, count: usize) -> StoreResult<ScanPage> {
        let (cursor, raw): (u64, Vec<Vec<u8>>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(glob)
            .arg("COUNT")
            .arg(count)
            .query(&mut self.connection)
            .map_err(|e| StoreError::scan_failed(&self.endpoint.id, e))?;
        let (items, invalid) = decode_keys(raw, &self.endpoint);
        Ok(ScanPage {
            cursor,
            items,
            invalid,
        })
    }

    fn exists(&mut self, key: &str) -> StoreResult<bool> {
        let found: u64 = redis::cmd("EXISTS")
            .arg(key)
            .query(&mut self.connection)?;
        Ok(found > 0)
    }
}

/// Decode scanned key names, leaving out the ones that are not UTF-8.
///
/// Such keys could not be addressed again by name; they are logged and
/// counted instead of failing the whole scan.
fn decode_keys(raw: Vec<Vec<u8>>, endpoint: &Endpoint) -> (Vec<String>, u64) {
    let mut keys = Vec::with_capacity(raw.len());
    let mut invalid = 0u64;
    for bytes in raw {
        match String::from_utf8(bytes) {
            Ok(key) => keys.push(key),
            Err(e) => {
                warn!(
                    shard = %endpoint,
                    key = %String::from_utf8_lossy(e.as_bytes()),
                    "Skipping key that is not valid UTF-8"
                );
                invalid += 1;
            }
        }
    }
    (keys, invalid)
}

/// Convert a raw reply into its JSON-friendly form
fn to_reply(value: Value) -> CommandReply {
    match value {
        Value::Nil => CommandReply::Nil,
        Value::Int(n) => CommandReply::Integer(n),
        Value::Double(n) => CommandReply::Double(n),
        Value::Boolean(b) => CommandReply::Boolean(b),
        Value::Okay => CommandReply::ok(),
        Value::SimpleString(s) => CommandReply::Text(s),
        Value::BulkString(bytes) => CommandReply::Text(String::from_utf8_lossy(&bytes).into_owned()),
        Value::VerbatimString { text, .. } => CommandReply::Text(text),
        Value::Array(items) | Value::Set(items) | Value::Push { data: items, .. } => {
            CommandReply::Array(items.into_iter().map(to_reply).collect())
        }
        Value::Map(pairs) => CommandReply::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (to_reply(k), to_reply(v)))
                .collect(),
        ),
        Value::Attribute { data, .. } => to_reply(*data),
        other => CommandReply::Text(format!("{other:?}")),
    }
}

/// Split `host[:port]`
fn split_address(address: &str) -> StoreResult<(String, u16)> {
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port.parse::<u16>().map_err(|e| StoreError::ConnectionFailed {
                target: address.to_string(),
                reason: format!("invalid port: {e}"),
            })?;
            Ok((host.to_string(), port))
        }
        _ if !address.is_empty() => Ok((address.to_string(), DEFAULT_PORT)),
        _ => Err(StoreError::ConnectionFailed {
            target: address.to_string(),
            reason: "empty address".to_string(),
        }),
    }
}

/// Parse a `CLUSTER NODES` reply.
///
/// Lines look like `<id> <ip:port@cport[,host]> <flags> <primary|-> ...`;
/// failed and address-less nodes are left out.
pub fn parse_cluster_nodes(text: &str) -> Vec<ShardRole> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let id = fields.next()?;
            let address = fields.next()?;
            let flags = fields.next()?;
            let primary = fields.next()?;

            let flags: Vec<&str> = flags.split(',').collect();
            if flags
                .iter()
                .any(|f| matches!(*f, "fail" | "noaddr" | "handshake"))
            {
                return None;
            }
            let role = if flags.contains(&"master") {
                Role::Primary
            } else if flags.iter().any(|f| matches!(*f, "slave" | "replica")) {
                Role::Replica
            } else {
                return None;
            };

            let address = address.split(['@', ',']).next()?;
            Some(ShardRole {
                endpoint: Endpoint::new(id, address),
                role,
                primary_of: (role == Role::Replica && primary != "-").then(|| primary.to_string()),
            })
        })
        .collect()
}
