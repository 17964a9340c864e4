//! Page sources feeding the delivery engine

use crate::delivery::batch::{HashField, Record, ScoredMembers};
use crate::delivery::engine::{ContentOrder, Page, PageSource};
use crate::error::{StoreError, StoreResult};
use crate::store::{KeyKind, KeyStore, StreamEntry, CURSOR_START};
use crate::tree::{EntryPointNode, Filter};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

/// Pages over an already computed, ordered list of tree nodes
pub struct NodePages {
    pages: VecDeque<Vec<EntryPointNode>>,
    served: u64,
}

impl NodePages {
    /// Split `nodes` into pages of `page_size`
    pub fn new(nodes: Vec<EntryPointNode>, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let mut pages = VecDeque::with_capacity(nodes.len() / page_size + 1);
        let mut nodes = nodes.into_iter().peekable();
        while nodes.peek().is_some() {
            pages.push_back(nodes.by_ref().take(page_size).collect());
        }
        Self { pages, served: 0 }
    }

    /// Pages left to serve
    pub fn remaining(&self) -> usize {
        self.pages.len()
    }
}

impl PageSource for NodePages {
    fn describe(&self) -> String {
        format!("entry points ({} pages)", self.pages.len() as u64 + self.served)
    }

    /// Pages are served in order; the cursor only marks progress
    fn fetch(&mut self, _cursor: u64) -> StoreResult<Page> {
        let records = self
            .pages
            .pop_front()
            .map(|page| page.into_iter().map(Record::Node).collect())
            .unwrap_or_default();
        self.served += 1;
        Ok(Page {
            records,
            next_cursor: if self.pages.is_empty() {
                CURSOR_START
            } else {
                self.served
            },
        })
    }
}

/// Member cursor scan over a set, hash, or scored set
pub struct MemberSource {
    store: Arc<dyn KeyStore>,
    key: String,
    kind: KeyKind,
    filter: Filter,
    page_size: usize,
}

impl MemberSource {
    /// Source for `key`, rejecting kinds without a member scan
    pub fn new(
        store: Arc<dyn KeyStore>,
        key: impl Into<String>,
        kind: KeyKind,
        filter: Filter,
        page_size: usize,
    ) -> StoreResult<Self> {
        let key = key.into();
        if Self::order_for(kind).is_none() {
            return Err(StoreError::UnsupportedType {
                key,
                kind: kind.to_string(),
            });
        }
        Ok(Self {
            store,
            key,
            kind,
            filter,
            page_size,
        })
    }

    /// Ordering for a kind's full scan; `None` when it has no member scan
    pub fn order_for(kind: KeyKind) -> Option<ContentOrder> {
        match kind {
            KeyKind::Set => Some(ContentOrder::Lexicographic),
            KeyKind::Hash => Some(ContentOrder::ByField),
            KeyKind::ScoredSet => Some(ContentOrder::ByScore),
            _ => None,
        }
    }

    /// Ordering of this source's full scan
    pub fn order(&self) -> ContentOrder {
        Self::order_for(self.kind).unwrap_or(ContentOrder::AsStored)
    }

    fn to_records(&self, items: Vec<String>) -> Vec<Record> {
        match self.kind {
            KeyKind::Set => items
                .into_iter()
                .filter(|member| self.filter.accepts(member))
                .map(Record::Text)
                .collect(),
            KeyKind::Hash => pairs(items)
                .filter(|(field, _)| self.filter.accepts(field))
                .map(|(key, value)| Record::Field(HashField { key, value }))
                .collect(),
            KeyKind::ScoredSet => pairs(items)
                .filter(|(member, _)| self.filter.accepts(member))
                .filter_map(|(member, score)| match score.parse::<f64>() {
                    Ok(score) => Some(Record::Scored(ScoredMembers {
                        score,
                        values: vec![member],
                    })),
                    Err(e) => {
                        warn!(key = %self.key, member = %member, score = %score, error = %e, "Skipping member with invalid score");
                        None
                    }
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl PageSource for MemberSource {
    fn describe(&self) -> String {
        format!("{} '{}'", self.kind, self.key)
    }

    fn preflight(&mut self) -> StoreResult<()> {
        self.store.ping()
    }

    fn fetch(&mut self, cursor: u64) -> StoreResult<Page> {
        let page = self.store.scan_members(
            &self.key,
            self.kind,
            cursor,
            self.filter.glob_pattern(),
            self.page_size,
        )?;
        Ok(Page {
            next_cursor: page.cursor,
            records: self.to_records(page.items),
        })
    }
}

/// Flat `a, b, a, b` items as pairs; a dangling item is dropped
fn pairs(items: Vec<String>) -> impl Iterator<Item = (String, String)> {
    let mut items = items.into_iter();
    std::iter::from_fn(move || Some((items.next()?, items.next()?)))
}

/// Stream entries in stored order; the regex is matched against entry ids
pub fn filter_stream(entries: Vec<StreamEntry>, filter: &Filter) -> Vec<Record> {
    entries
        .into_iter()
        .filter(|entry| filter.accepts(&entry.id))
        .map(Record::Entry)
        .collect()
}

/// List elements in stored order, filtered by the regex only
pub fn filter_list(elements: Vec<String>, filter: &Filter) -> Vec<Record> {
    elements
        .into_iter()
        .filter(|element| filter.accepts(element))
        .map(Record::Text)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::engine::{deliver, full_scan, Delivery};
    use crate::store::{MemoryStore, MemoryValue};

    fn node(path: &str) -> EntryPointNode {
        EntryPointNode {
            path: path.to_string(),
            has_content: true,
            child_count: 0,
        }
    }

    #[test]
    fn test_node_pages_split() {
        let nodes: Vec<_> = (0..7).map(|i| node(&format!("n{i}"))).collect();
        let mut pages = NodePages::new(nodes, 3);
        assert_eq!(pages.remaining(), 3);

        let first = pages.fetch(CURSOR_START).unwrap();
        assert_eq!(first.records.len(), 3);
        assert_eq!(first.next_cursor, 1);
        pages.fetch(1).unwrap();
        let last = pages.fetch(2).unwrap();
        assert_eq!(last.records.len(), 1);
        assert!(last.is_last());
    }

    #[test]
    fn test_node_pages_empty() {
        let mut pages = NodePages::new(Vec::new(), 10);
        let page = pages.fetch(CURSOR_START).unwrap();
        assert!(page.records.is_empty());
        assert!(page.is_last());
    }

    #[test]
    fn test_node_pages_delivery_modes() {
        let nodes: Vec<_> = (0..10).map(|i| node(&format!("n{i:02}"))).collect();
        let delivery = deliver(NodePages::new(nodes.clone(), 2), 5).unwrap();
        assert!(matches!(delivery, Delivery::Completed(_)));

        let delivery = deliver(NodePages::new(nodes, 2), 4).unwrap();
        assert!(matches!(delivery, Delivery::Moved(_)));
        let records = delivery.into_records();
        assert_eq!(records.len(), 10);
        assert_eq!(records[9], Record::Node(node("n09")));
    }

    #[test]
    fn test_set_full_scan_sorted_and_filtered() {
        let store = MemoryStore::standalone();
        store.insert("s", MemoryValue::set(["pear", "apple", "plum", "fig"]));
        let source = MemberSource::new(
            Arc::new(store),
            "s",
            KeyKind::Set,
            Filter::parse("p*").unwrap(),
            2,
        )
        .unwrap();

        let batch = full_scan(source, ContentOrder::Lexicographic).unwrap();
        assert_eq!(
            batch.data,
            vec![Record::Text("pear".into()), Record::Text("plum".into())]
        );
    }

    #[test]
    fn test_hash_regex_applies_to_field() {
        let store = MemoryStore::standalone();
        store.insert("h", MemoryValue::hash([("b-1", "x"), ("a-2", "y"), ("b-3", "z")]));
        let source = MemberSource::new(
            Arc::new(store),
            "h",
            KeyKind::Hash,
            Filter::parse("*,^b-").unwrap(),
            10,
        )
        .unwrap();
        let order = source.order();

        let batch = full_scan(source, order).unwrap();
        let keys: Vec<_> = batch
            .data
            .iter()
            .map(|r| match r {
                Record::Field(f) => f.key.as_str(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(keys, vec!["b-1", "b-3"]);
    }

    #[test]
    fn test_list_and_stream_have_no_member_scan() {
        let store: Arc<dyn KeyStore> = Arc::new(MemoryStore::standalone());
        let err = MemberSource::new(store, "l", KeyKind::List, Filter::match_all(), 10)
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::UnsupportedType { .. }));
    }

    #[test]
    fn test_filter_list_keeps_order() {
        let elements = vec!["b1".to_string(), "a".to_string(), "b0".to_string()];
        let records = filter_list(elements, &Filter::parse("*,^b").unwrap());
        assert_eq!(
            records,
            vec![Record::Text("b1".into()), Record::Text("b0".into())]
        );
    }

    #[test]
    fn test_pairs_drops_dangling() {
        let items = vec!["a".to_string(), "1".to_string(), "b".to_string()];
        assert_eq!(pairs(items).collect::<Vec<_>>(), vec![("a".into(), "1".into())]);
    }
}
