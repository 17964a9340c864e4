//! Tree view over a flat keyspace
//!
//! ```text
//!  "app:users:{eu:1}:name"
//!          │ tokenize
//!          ▼
//!  ["app", "users", "{eu:1}", "name"]
//!          │ filter (glob on the store, regex here)
//!          ▼
//!  EntryTree  ──fold_key(window)──▶  app ─ users ─ {eu:1} ─ name
//! ```

pub mod aggregator;
pub mod filter;
pub mod tokenizer;

pub use aggregator::{EntryPointNode, EntryTree, LevelWindow, TreeLock};
pub use filter::{escape_glob, Filter, MATCH_ALL};
pub use tokenizer::{join, tokenize, PATH_SEPARATOR};
