//! Raw command guard
//!
//! A read-only data source only runs commands that cannot change the
//! keyspace: the store's read-only commands, a few connection and server
//! introspection commands, and the `CLUSTER` subcommands that only report
//! topology.

/// Lower-case names of commands that never write, sorted
const READ_ONLY_COMMANDS: &[&str] = &[
    "bitcount",
    "bitfield_ro",
    "bitpos",
    "dbsize",
    "dump",
    "echo",
    "eval_ro",
    "evalsha_ro",
    "exists",
    "expiretime",
    "fcall_ro",
    "geodist",
    "geohash",
    "geopos",
    "georadius_ro",
    "georadiusbymember_ro",
    "geosearch",
    "get",
    "getbit",
    "getrange",
    "hexists",
    "hget",
    "hgetall",
    "hkeys",
    "hlen",
    "hmget",
    "hrandfield",
    "hscan",
    "hstrlen",
    "hvals",
    "info",
    "keys",
    "lastsave",
    "lcs",
    "lindex",
    "llen",
    "lpos",
    "lrange",
    "mget",
    "pexpiretime",
    "pfcount",
    "ping",
    "pttl",
    "randomkey",
    "role",
    "scan",
    "scard",
    "sdiff",
    "sinter",
    "sintercard",
    "sismember",
    "smembers",
    "smismember",
    "sort_ro",
    "srandmember",
    "sscan",
    "strlen",
    "substr",
    "sunion",
    "time",
    "touch",
    "ttl",
    "type",
    "xlen",
    "xpending",
    "xrange",
    "xread",
    "xrevrange",
    "zcard",
    "zcount",
    "zdiff",
    "zinter",
    "zintercard",
    "zlexcount",
    "zmscore",
    "zrandmember",
    "zrange",
    "zrangebylex",
    "zrangebyscore",
    "zrank",
    "zrevrange",
    "zrevrangebylex",
    "zrevrangebyscore",
    "zrevrank",
    "zscan",
    "zscore",
    "zunion",
];

/// `CLUSTER` subcommands that only report state, sorted
const CLUSTER_READ_ONLY_SUBCOMMANDS: &[&str] = &[
    "getkeysinslot",
    "info",
    "keyslot",
    "myid",
    "nodes",
    "replicas",
    "slaves",
    "slots",
];

/// Check whether `args` (command name first) may run on a read-only source
pub fn is_read_only_command(args: &[String]) -> bool {
    let Some(name) = args.first() else {
        return false;
    };
    let name = name.to_ascii_lowercase();

    if name == "cluster" {
        return args.get(1).map_or(false, |sub| {
            CLUSTER_READ_ONLY_SUBCOMMANDS
                .binary_search(&sub.to_ascii_lowercase().as_str())
                .is_ok()
        });
    }
    READ_ONLY_COMMANDS.binary_search(&name.as_str()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_lists_are_sorted() {
        assert!(READ_ONLY_COMMANDS.windows(2).all(|w| w[0] < w[1]));
        assert!(CLUSTER_READ_ONLY_SUBCOMMANDS.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_read_commands_allowed() {
        assert!(is_read_only_command(&args("GET app:users:1")));
        assert!(is_read_only_command(&args("hgetall h")));
        assert!(is_read_only_command(&args("XRange events - +")));
        assert!(is_read_only_command(&args("CLUSTER NODES")));
        assert!(is_read_only_command(&args("cluster Info")));
    }

    #[test]
    fn test_write_commands_refused() {
        assert!(!is_read_only_command(&args("SET a b")));
        assert!(!is_read_only_command(&args("del a")));
        assert!(!is_read_only_command(&args("FLUSHALL")));
        assert!(!is_read_only_command(&args("CLUSTER FAILOVER")));
        assert!(!is_read_only_command(&args("CLUSTER")));
        assert!(!is_read_only_command(&[]));
    }
}
