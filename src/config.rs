//! Configuration types for keyspace-walker
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Data-source descriptors and bootstrap URL parsing
//! - Runtime configuration with validation

use crate::delivery::DEFAULT_CHANNEL_CAPACITY;
use crate::error::ConfigError;
use crate::store::{RedisStoreConfig, DEFAULT_PAGE_SIZE};
use crate::tree::{Filter, LevelWindow};
use clap::{Parser, Subcommand};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

/// Page size limits
const MIN_PAGE_SIZE: usize = 10;
const MAX_PAGE_SIZE: usize = 100_000;

/// Channel capacity limits
const MIN_CHANNEL_CAPACITY: usize = 1;
const MAX_CHANNEL_CAPACITY: usize = 10_000;

/// Default number of primaries of an in-process cluster
const DEFAULT_MEMORY_PRIMARIES: usize = 3;

/// Regex for parsing bootstrap URLs
static BOOTSTRAP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // Matches: scheme://rest
    Regex::new(r"^([A-Za-z][A-Za-z0-9+.-]*)://(.*)$").expect("Invalid bootstrap regex")
});

/// Browse a flat key-value keyspace as a tree
#[derive(Parser, Debug, Clone)]
#[command(
    name = "keyspace-walker",
    version,
    about = "Browse a flat key-value keyspace as a tree",
    long_about = "Splits keys on ':' (keeping {hash tags} whole) and lists them as a tree.\n\n\
                  Partitioned deployments are scanned primary by primary in parallel.\n\
                  Large results are streamed page by page.",
    after_help = "EXAMPLES:\n    \
        keyspace-walker -b redis://localhost:6379 tree\n    \
        keyspace-walker -b cluster://10.0.0.1:7000,10.0.0.2:7000 tree --filter 'user:*,.*:eu$' --max-level 2\n    \
        keyspace-walker -b redis://localhost:6379 info app:users:42\n    \
        keyspace-walker -b redis://localhost:6379 delete app:sessions --children"
)]
pub struct CliArgs {
    /// Data source bootstrap (redis://, cluster://, memory://)
    #[arg(short = 'b', long, env = "KEYSPACE_BOOTSTRAP", value_name = "URL")]
    pub bootstrap: String,

    /// Vendor handling the bootstrap (derived from the protocol if not set)
    #[arg(long, value_name = "NAME")]
    pub vendor: Option<String>,

    /// ACL user name
    #[arg(long, value_name = "USER")]
    pub user: Option<String>,

    /// Password
    #[arg(long, env = "KEYSPACE_PASSWORD", hide_env_values = true, value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Refuse every mutating operation
    #[arg(long)]
    pub readonly: bool,

    /// Extra data-source option (repeatable), e.g. `db=2` or `readTimeout=10`
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE", action = clap::ArgAction::Append)]
    pub options: Vec<String>,

    /// Keys requested per scan page
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, value_name = "NUM")]
    pub page_size: usize,

    /// Pages delivered inline before switching to streaming
    #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY, value_name = "NUM")]
    pub channel_capacity: usize,

    /// Re-check that each scanned key still exists on its shard
    #[arg(long)]
    pub validate_ownership: bool,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Operation to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List entry points as a tree
    Tree {
        /// Filter as `<glob>[,<regex>]`
        #[arg(short = 'f', long, default_value = "*", value_name = "FILTER")]
        filter: String,

        /// First level listed (becomes the root)
        #[arg(long, default_value = "0", value_name = "LEVEL")]
        min_level: u32,

        /// Last level listed (unbounded if not set)
        #[arg(long, value_name = "LEVEL")]
        max_level: Option<u32>,
    },

    /// Show kind, length and time to live of a key
    Info {
        /// Key to inspect
        key: String,
    },

    /// Show the content of a key
    Content {
        /// Key to read
        key: String,

        /// Member filter as `<glob>[,<regex>]`
        #[arg(short = 'f', long, default_value = "*", value_name = "FILTER")]
        filter: String,
    },

    /// Delete a key, or every key below a prefix
    Delete {
        /// Key or prefix
        key: String,

        /// Delete the keys below `key` instead of `key` itself
        #[arg(long)]
        children: bool,
    },

    /// Show the shards of the deployment
    Nodes,

    /// Run a raw store command
    Exec {
        /// Node id to run the command on (any node if not set)
        #[arg(short = 'n', long, value_name = "NODE_ID")]
        node: Option<String>,

        /// Command name followed by its arguments
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Show per-node and cluster status
    Status,
}

/// Connection descriptor of one data source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceDescriptor {
    /// Identifier; generated when empty
    #[serde(default)]
    pub id: String,

    /// Vendor name, e.g. `redis`
    pub vendor: String,

    /// Display name
    pub name: String,

    /// Free text
    #[serde(default)]
    pub description: String,

    /// Bootstrap URL
    pub bootstrap: String,

    /// Refuse mutating operations
    #[serde(default, rename = "readonly")]
    pub read_only: bool,

    /// ACL user name
    #[serde(default)]
    pub user: Option<String>,

    /// Password
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Vendor-specific options
    #[serde(default)]
    pub configuration: HashMap<String, String>,
}

impl DataSourceDescriptor {
    /// Read an integer option
    pub fn option_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        self.configuration
            .get(key)
            .map(|value| {
                value.trim().parse::<u64>().map_err(|e| ConfigError::InvalidOption {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Read a duration option given in seconds
    pub fn option_secs(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.option_u64(key)?.map(Duration::from_secs))
    }
}

/// Parsed bootstrap URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bootstrap {
    /// Standalone Redis server
    Redis { nodes: Vec<String> },
    /// Redis cluster, reached through any of `nodes`
    Cluster { nodes: Vec<String> },
    /// In-process store
    Memory { partitioned: bool },
}

impl Bootstrap {
    /// Parse a bootstrap URL
    ///
    /// Accepts formats:
    /// - redis://host:port
    /// - cluster://host:port,host:port
    /// - memory://standalone
    /// - memory://cluster
    pub fn parse(bootstrap: &str) -> Result<Self, ConfigError> {
        let bootstrap = bootstrap.trim();
        let caps = BOOTSTRAP_REGEX
            .captures(bootstrap)
            .ok_or_else(|| ConfigError::InvalidBootstrap {
                bootstrap: bootstrap.to_string(),
                reason: "expected <protocol>://<address>".to_string(),
            })?;
        let scheme = caps.get(1).map_or("", |m| m.as_str()).to_ascii_lowercase();
        let rest = caps.get(2).map_or("", |m| m.as_str());

        let nodes = || -> Result<Vec<String>, ConfigError> {
            let nodes: Vec<String> = rest
                .split(',')
                .map(|n| n.trim().trim_end_matches('/'))
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect();
            if nodes.is_empty() {
                return Err(ConfigError::InvalidBootstrap {
                    bootstrap: bootstrap.to_string(),
                    reason: "no address".to_string(),
                });
            }
            Ok(nodes)
        };

        match scheme.as_str() {
            "redis" => Ok(Bootstrap::Redis { nodes: nodes()? }),
            "cluster" => Ok(Bootstrap::Cluster { nodes: nodes()? }),
            "memory" => match rest {
                "" | "standalone" => Ok(Bootstrap::Memory { partitioned: false }),
                "cluster" => Ok(Bootstrap::Memory { partitioned: true }),
                other => Err(ConfigError::InvalidBootstrap {
                    bootstrap: bootstrap.to_string(),
                    reason: format!("unknown memory layout '{other}'"),
                }),
            },
            _ => Err(ConfigError::UnknownProtocol(scheme)),
        }
    }

    /// Vendor that serves this protocol
    pub fn vendor(&self) -> &'static str {
        match self {
            Bootstrap::Redis { .. } | Bootstrap::Cluster { .. } => "redis",
            Bootstrap::Memory { .. } => "memory",
        }
    }

    /// Redis connection settings from a descriptor using this bootstrap
    pub fn redis_config(
        &self,
        descriptor: &DataSourceDescriptor,
    ) -> Result<RedisStoreConfig, ConfigError> {
        let (nodes, cluster) = match self {
            Bootstrap::Redis { nodes } => (nodes.clone(), false),
            Bootstrap::Cluster { nodes } => (nodes.clone(), true),
            Bootstrap::Memory { .. } => {
                return Err(ConfigError::UnknownProtocol("memory".to_string()))
            }
        };

        let defaults = RedisStoreConfig::default();
        let db = match descriptor.option_u64("db")? {
            Some(db) => i64::try_from(db).map_err(|e| ConfigError::InvalidOption {
                key: "db".to_string(),
                reason: e.to_string(),
            })?,
            None => defaults.db,
        };

        Ok(RedisStoreConfig {
            nodes,
            cluster,
            user: descriptor.user.clone().filter(|u| !u.is_empty()),
            password: descriptor.password.clone().filter(|p| !p.is_empty()),
            db,
            connect_timeout: descriptor
                .option_secs("connectTimeout")?
                .unwrap_or(defaults.connect_timeout),
            read_timeout: descriptor
                .option_secs("readTimeout")?
                .or(defaults.read_timeout),
            write_timeout: descriptor
                .option_secs("writeTimeout")?
                .or(defaults.write_timeout),
        })
    }

    /// Shard layout of an in-process store: `(primaries, replicas per primary)`
    pub fn memory_layout(
        &self,
        descriptor: &DataSourceDescriptor,
    ) -> Result<(usize, usize), ConfigError> {
        let partitioned = match self {
            Bootstrap::Memory { partitioned } => *partitioned,
            _ => return Err(ConfigError::UnknownProtocol(self.vendor().to_string())),
        };
        if !partitioned {
            return Ok((1, 0));
        }
        let primaries = descriptor
            .option_u64("primaries")?
            .map_or(DEFAULT_MEMORY_PRIMARIES, |n| n as usize);
        let replicas = descriptor.option_u64("replicas")?.map_or(0, |n| n as usize);
        if primaries == 0 {
            return Err(ConfigError::InvalidOption {
                key: "primaries".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok((primaries, replicas))
    }
}

/// Tunables applied to every operation of a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowseSettings {
    /// Keys requested per scan page, and nodes per delivered batch
    pub page_size: usize,

    /// Delivery queue capacity
    pub channel_capacity: usize,

    /// Re-check key ownership on partitioned stores
    pub validate_ownership: bool,
}

impl Default for BrowseSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            validate_ownership: false,
        }
    }
}

impl BrowseSettings {
    /// Check the bounds of every tunable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size < MIN_PAGE_SIZE || self.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::InvalidPageSize {
                size: self.page_size,
                min: MIN_PAGE_SIZE,
                max: MAX_PAGE_SIZE,
            });
        }
        if self.channel_capacity < MIN_CHANNEL_CAPACITY
            || self.channel_capacity > MAX_CHANNEL_CAPACITY
        {
            return Err(ConfigError::InvalidChannelCapacity {
                capacity: self.channel_capacity,
                min: MIN_CHANNEL_CAPACITY,
                max: MAX_CHANNEL_CAPACITY,
            });
        }
        Ok(())
    }
}

/// Validated operation requested on the command line
#[derive(Debug, Clone)]
pub enum Operation {
    /// List entry points
    Tree { filter: String, window: LevelWindow },
    /// Key information
    Info { key: String },
    /// Key content
    Content { key: String, filter: String },
    /// Delete one key
    Delete { key: String },
    /// Delete every key below a prefix
    DeleteChildren { prefix: String },
    /// Shard topology
    Nodes,
    /// Raw command, optionally on one node
    Exec {
        args: Vec<String>,
        node: Option<String>,
    },
    /// Node and cluster status
    Status,
}

/// Runtime configuration (validated)
#[derive(Debug, Clone)]
pub struct BrowseConfig {
    /// Data source to open
    pub descriptor: DataSourceDescriptor,

    /// Tunables
    pub settings: BrowseSettings,

    /// Operation to run
    pub operation: Operation,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,
}

impl BrowseConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let bootstrap = Bootstrap::parse(&args.bootstrap)?;

        let settings = BrowseSettings {
            page_size: args.page_size,
            channel_capacity: args.channel_capacity,
            validate_ownership: args.validate_ownership,
        };
        settings.validate()?;

        let configuration = args
            .options
            .iter()
            .map(|option| {
                option
                    .split_once('=')
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                    .ok_or_else(|| ConfigError::InvalidOption {
                        key: option.clone(),
                        reason: "expected KEY=VALUE".to_string(),
                    })
            })
            .collect::<Result<HashMap<_, _>, _>>()?;

        let operation = match args.command {
            Command::Tree {
                filter,
                min_level,
                max_level,
            } => {
                let window = LevelWindow::new(min_level, max_level.unwrap_or(LevelWindow::UNBOUNDED));
                if !window.is_valid() {
                    return Err(ConfigError::InvalidLevelWindow {
                        min: window.min,
                        max: window.max,
                    });
                }
                // Fail on a bad regex before connecting
                Filter::parse(&filter)?;
                Operation::Tree { filter, window }
            }
            Command::Info { key } => Operation::Info { key },
            Command::Content { key, filter } => {
                Filter::parse(&filter)?;
                Operation::Content { key, filter }
            }
            Command::Delete { key, children } => {
                if children {
                    Operation::DeleteChildren { prefix: key }
                } else {
                    Operation::Delete { key }
                }
            }
            Command::Nodes => Operation::Nodes,
            Command::Exec { node, args } => Operation::Exec { args, node },
            Command::Status => Operation::Status,
        };

        let descriptor = DataSourceDescriptor {
            id: String::new(),
            vendor: args
                .vendor
                .unwrap_or_else(|| bootstrap.vendor().to_string()),
            name: args.bootstrap.clone(),
            description: String::new(),
            bootstrap: args.bootstrap,
            read_only: args.readonly,
            user: args.user,
            password: args.password,
            configuration,
        };

        Ok(Self {
            descriptor,
            settings,
            operation,
            show_progress: !args.quiet,
            verbose: args.verbose,
        })
    }
}
