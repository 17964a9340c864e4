//! Tree aggregation
//!
//! Folds tokenized keys into a request-scoped map of tree nodes. The map is
//! built from empty, filled by one or more shard scanners, then drained into
//! a path-ordered list and discarded.

use crate::tree::tokenizer::{join, tokenize, PATH_SEPARATOR};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

/// Inclusive bounds on the levels materialized as tree nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelWindow {
    /// First level kept; it becomes the apparent root of the tree
    pub min: u32,

    /// Last level kept ([`LevelWindow::UNBOUNDED`] for no limit)
    pub max: u32,
}

impl LevelWindow {
    /// Sentinel for an unbounded upper level
    pub const UNBOUNDED: u32 = u32::MAX;

    /// Window covering every level
    pub const ALL: LevelWindow = LevelWindow {
        min: 0,
        max: Self::UNBOUNDED,
    };

    /// Create a window; callers validate `min <= max`
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Window from `min` with no upper bound
    pub fn from_level(min: u32) -> Self {
        Self::new(min, Self::UNBOUNDED)
    }

    /// Check the window is usable
    pub fn is_valid(&self) -> bool {
        self.min <= self.max
    }

    /// Check whether the upper bound is the unbounded sentinel
    pub fn is_unbounded(&self) -> bool {
        self.max == Self::UNBOUNDED
    }
}

impl Default for LevelWindow {
    fn default() -> Self {
        Self::ALL
    }
}

/// One node (intermediate or leaf) of the derived tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPointNode {
    /// Segments from the window's first level, joined by `:`
    pub path: String,

    /// Whether a key exists at this node
    pub has_content: bool,

    /// Number of distinct direct children observed
    pub child_count: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct NodeState {
    has_content: bool,
    child_count: u64,
}

/// Request-scoped map of tree nodes keyed by path
#[derive(Debug, Default)]
pub struct EntryTree {
    nodes: HashMap<String, NodeState>,

    /// Full keys rejected by the regex, from every shard
    excluded: HashSet<String>,
}

impl EntryTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if no node was folded in
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by path
    pub fn get(&self, path: &str) -> Option<EntryPointNode> {
        self.nodes.get(path).map(|state| EntryPointNode {
            path: path.to_string(),
            has_content: state.has_content,
            child_count: state.child_count,
        })
    }

    /// Remove a node by path, returning whether it existed
    pub fn remove(&mut self, path: &str) -> bool {
        self.nodes.remove(path).is_some()
    }

    /// Fold one key's segments into the tree.
    ///
    /// Levels `window.min ..= min(window.max, len - 1)` are materialized.
    /// Every level but the deepest one reached counts its distinct direct
    /// children; the deepest one is flagged as having content. A new
    /// intermediate node starts with content only when its full key
    /// (including the levels cut off below `window.min`) was passed to
    /// [`EntryTree::exclude_key`], meaning the key exists but was rejected
    /// by the regex.
    ///
    /// Returns `false` when the key is too shallow to contribute.
    pub fn fold_key(&mut self, segments: &[&str], window: LevelWindow) -> bool {
        let count = segments.len();
        let min = window.min as usize;
        if count <= min {
            return false;
        }
        let last = (window.max as usize).min(count - 1);
        if last < min {
            return false;
        }

        let prefix = if min > 0 {
            let mut prefix = join(&segments[..min]);
            prefix.push(PATH_SEPARATOR);
            prefix
        } else {
            String::new()
        };

        let mut path = String::new();
        for level in min..=last {
            let parent_end = path.len();
            if level > min {
                path.push(PATH_SEPARATOR);
            }
            path.push_str(segments[level]);
            let deepest = level == last;

            let created = match self.nodes.get_mut(&path) {
                Some(state) => {
                    if deepest {
                        state.has_content = true;
                    }
                    false
                }
                None => {
                    let has_content = deepest
                        || (!self.excluded.is_empty()
                            && self.excluded.contains(&format!("{prefix}{path}")));
                    self.nodes.insert(
                        path.clone(),
                        NodeState {
                            has_content,
                            child_count: 0,
                        },
                    );
                    true
                }
            };

            if created && level > min {
                if let Some(parent) = self.nodes.get_mut(&path[..parent_end]) {
                    parent.child_count += 1;
                }
            }
        }

        true
    }

    /// Record a key rejected by the regex.
    ///
    /// Nodes created later at the key's path start with content, and a node
    /// already created there by a descendant is flagged now, so the result
    /// does not depend on scan order.
    pub fn exclude_key(&mut self, key: &str, window: LevelWindow) {
        self.mark_content(&tokenize(key), window);
        self.excluded.insert(key.to_string());
    }

    /// Flag the node standing exactly at a key's path, if it exists.
    ///
    /// Keys outside the window leave the tree untouched. Returns whether a
    /// node was flagged.
    pub fn mark_content(&mut self, segments: &[&str], window: LevelWindow) -> bool {
        let count = segments.len();
        let min = window.min as usize;
        if count <= min || count - 1 > window.max as usize {
            return false;
        }
        match self.nodes.get_mut(&join(&segments[min..])) {
            Some(state) => {
                state.has_content = true;
                true
            }
            None => false,
        }
    }

    /// Drain the tree into nodes ordered by path
    pub fn into_sorted(self) -> Vec<EntryPointNode> {
        let mut nodes: Vec<EntryPointNode> = self
            .nodes
            .into_iter()
            .map(|(path, state)| EntryPointNode {
                path,
                has_content: state.has_content,
                child_count: state.child_count,
            })
            .collect();
        nodes.sort_unstable_by(|a, b| a.path.cmp(&b.path));
        nodes
    }

    /// Paths of every node flagged as having content
    pub fn content_paths(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, state)| state.has_content)
            .map(|(path, _)| path.clone())
            .collect()
    }
}

/// Access to a tree shared by one or more scanners.
///
/// The guard is held for one key's whole path chain so the multi-level
/// update is atomic without serializing a whole shard scan.
pub trait TreeLock {
    /// Run `f` with exclusive access to the tree
    fn with_tree<R>(&self, f: impl FnOnce(&mut EntryTree) -> R) -> R;
}

/// Shared between concurrent shard scanners
impl TreeLock for Mutex<EntryTree> {
    fn with_tree<R>(&self, f: impl FnOnce(&mut EntryTree) -> R) -> R {
        f(&mut self.lock())
    }
}

/// Single scanner, no locking
impl TreeLock for RefCell<EntryTree> {
    fn with_tree<R>(&self, f: impl FnOnce(&mut EntryTree) -> R) -> R {
        f(&mut self.borrow_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(tree: &mut EntryTree, key: &str, window: LevelWindow) -> bool {
        tree.fold_key(&tokenize(key), window)
    }

    #[test]
    fn test_window_bounds() {
        assert!(LevelWindow::ALL.is_unbounded());
        assert!(LevelWindow::from_level(2).is_unbounded());
        assert!(!LevelWindow::new(0, 3).is_unbounded());
        assert!(!LevelWindow::new(3, 1).is_valid());
    }

    #[test]
    fn test_leaf_and_parent() {
        let mut tree = EntryTree::new();
        fold(&mut tree, "group:1", LevelWindow::ALL);
        fold(&mut tree, "group:2", LevelWindow::ALL);

        let root = tree.get("group").unwrap();
        assert_eq!(root.child_count, 2);
        assert!(!root.has_content);

        let leaf = tree.get("group:1").unwrap();
        assert_eq!(leaf.child_count, 0);
        assert!(leaf.has_content);
    }

    #[test]
    fn test_child_count_is_distinct_children() {
        let mut tree = EntryTree::new();
        fold(&mut tree, "a:1:x", LevelWindow::ALL);
        fold(&mut tree, "a:1:y", LevelWindow::ALL);
        fold(&mut tree, "a:2", LevelWindow::ALL);

        assert_eq!(tree.get("a").unwrap().child_count, 2);
        assert_eq!(tree.get("a:1").unwrap().child_count, 2);
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn test_existing_node_gains_content() {
        let mut tree = EntryTree::new();
        fold(&mut tree, "a:b", LevelWindow::ALL);
        assert!(!tree.get("a").unwrap().has_content);

        fold(&mut tree, "a", LevelWindow::ALL);
        let a = tree.get("a").unwrap();
        assert!(a.has_content);
        assert_eq!(a.child_count, 1);
    }

    #[test]
    fn test_window_max_truncates() {
        let mut tree = EntryTree::new();
        fold(&mut tree, "a:b:c", LevelWindow::new(0, 0));
        fold(&mut tree, "a:d", LevelWindow::new(0, 0));

        assert_eq!(tree.len(), 1);
        let a = tree.get("a").unwrap();
        assert!(a.has_content);
        assert_eq!(a.child_count, 0);
    }

    #[test]
    fn test_window_min_offsets_root() {
        let mut tree = EntryTree::new();
        assert!(fold(&mut tree, "app:users:42", LevelWindow::from_level(1)));
        assert!(!fold(&mut tree, "app", LevelWindow::from_level(1)));

        let nodes = tree.into_sorted();
        let paths: Vec<_> = nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["users", "users:42"]);
    }

    #[test]
    fn test_excluded_key_seeds_content() {
        let mut tree = EntryTree::new();
        tree.exclude_key("app:users", LevelWindow::from_level(1));
        assert!(tree.is_empty());

        fold(&mut tree, "app:users:42", LevelWindow::from_level(1));
        assert!(tree.get("users").unwrap().has_content);
        assert!(tree.get("users:42").unwrap().has_content);
    }

    #[test]
    fn test_excluded_after_descendant_seeds_content() {
        let mut tree = EntryTree::new();
        fold(&mut tree, "app:users:42", LevelWindow::ALL);
        tree.exclude_key("app:users", LevelWindow::ALL);
        tree.exclude_key("app:orders", LevelWindow::ALL);

        assert!(tree.get("app:users").unwrap().has_content);
        assert!(!tree.get("app").unwrap().has_content);
        assert!(tree.get("app:orders").is_none());
    }

    #[test]
    fn test_mark_content_flags_existing_node() {
        let mut tree = EntryTree::new();
        fold(&mut tree, "app:users:42", LevelWindow::from_level(1));
        assert!(!tree.get("users").unwrap().has_content);

        assert!(tree.mark_content(&tokenize("app:users"), LevelWindow::from_level(1)));
        assert!(tree.get("users").unwrap().has_content);
        assert_eq!(tree.get("users").unwrap().child_count, 1);
    }

    #[test]
    fn test_mark_content_outside_window() {
        let mut tree = EntryTree::new();
        fold(&mut tree, "a:b:c", LevelWindow::new(0, 1));

        assert!(!tree.mark_content(&tokenize("a:b:c"), LevelWindow::new(0, 1)));
        assert!(!tree.mark_content(&tokenize("zzz"), LevelWindow::new(0, 1)));
        assert!(!tree.mark_content(&tokenize("a"), LevelWindow::from_level(1)));
        assert!(!tree.get("a").unwrap().has_content);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_into_sorted_orders_by_path() {
        let mut tree = EntryTree::new();
        for key in ["b:1", "a:2", "a:1"] {
            fold(&mut tree, key, LevelWindow::ALL);
        }
        let paths: Vec<_> = tree.into_sorted().into_iter().map(|n| n.path).collect();
        assert_eq!(paths, vec!["a", "a:1", "a:2", "b", "b:1"]);
    }

    #[test]
    fn test_tree_lock_impls() {
        let shared = Mutex::new(EntryTree::new());
        shared.with_tree(|t| fold(t, "x:y", LevelWindow::ALL));
        assert_eq!(shared.lock().len(), 2);

        let local = RefCell::new(EntryTree::new());
        local.with_tree(|t| fold(t, "x", LevelWindow::ALL));
        assert_eq!(local.borrow().len(), 1);
    }
}
