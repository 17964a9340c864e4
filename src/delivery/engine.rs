//! Two-mode delivery
//!
//! [`deliver`] pulls pages from a source into a bounded queue. If the source
//! runs dry before the queue fills, the whole result is returned inline as
//! [`Delivery::Completed`]. Otherwise the source is handed to a background
//! producer thread and the caller gets a [`Delivery::Moved`] handle to keep
//! draining; the producer blocks whenever the queue is full.
//!
//! [`full_scan`] always drains the whole source inline and arranges the
//! records with a kind-specific order.
//!
//! There is no cancellation: dropping a [`StreamHandle`] only stops the
//! producer at its next send, after it fetched one more page.

use crate::delivery::batch::{ActionStatus, DataBatch, HashField, Record, ScoredMembers};
use crate::delivery::queue::{BatchQueue, BatchReceiver, BatchSender, QueueStats, StreamFrame};
use crate::error::{Result, StoreResult, WorkerError};
use crate::store::CURSOR_START;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default queue capacity, and so the number of pages delivered inline
pub const DEFAULT_CHANNEL_CAPACITY: usize = 20;

/// One page pulled from a source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Records of this page (may be empty mid-scan)
    pub records: Vec<Record>,

    /// Cursor for the next call; [`CURSOR_START`] once exhausted
    pub next_cursor: u64,
}

impl Page {
    /// Check if the source is exhausted after this page
    pub fn is_last(&self) -> bool {
        self.next_cursor == CURSOR_START
    }
}

/// Cursor-driven producer of result pages
pub trait PageSource: Send + 'static {
    /// Short description for logs
    fn describe(&self) -> String;

    /// Connectivity check run before the first page
    fn preflight(&mut self) -> StoreResult<()> {
        Ok(())
    }

    /// Fetch the page starting at `cursor`
    fn fetch(&mut self, cursor: u64) -> StoreResult<Page>;
}

/// Outcome of [`deliver`]
pub enum Delivery {
    /// Every batch, in order
    Completed(Vec<DataBatch>),
    /// Batches keep arriving through the handle
    Moved(StreamHandle),
}

impl Delivery {
    /// Status reported to the transport layer
    pub fn status(&self) -> ActionStatus {
        match self {
            Delivery::Completed(_) => ActionStatus::Completed,
            Delivery::Moved(_) => ActionStatus::Moved,
        }
    }

    /// Collect every batch, blocking on a moved stream until it ends
    pub fn into_batches(self) -> Vec<DataBatch> {
        match self {
            Delivery::Completed(batches) => batches,
            Delivery::Moved(handle) => handle.collect(),
        }
    }

    /// Collect every record of every batch
    pub fn into_records(self) -> Vec<Record> {
        self.into_batches()
            .into_iter()
            .flat_map(|batch| batch.data)
            .collect()
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Delivery::Completed(batches) => f
                .debug_tuple("Completed")
                .field(&batches.len())
                .finish(),
            Delivery::Moved(handle) => f.debug_tuple("Moved").field(&handle.id).finish(),
        }
    }
}

/// Receiving end of a moved delivery.
///
/// Iterates over batches until the producer pushes its end marker. A
/// producer that failed mid-stream logs the error and still ends the
/// stream, so a short stream is not an error signal.
pub struct StreamHandle {
    id: Uuid,
    receiver: BatchReceiver,
    stats: Arc<QueueStats>,
    producer: Option<JoinHandle<()>>,
    finished: bool,
}

impl StreamHandle {
    /// Opaque id the transport layer maps to a long-lived connection
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue statistics (throughput, backpressure)
    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }

    /// Check whether the end marker was received
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Wait for the producer thread after draining the stream
    pub fn join(mut self) -> Result<()> {
        for _ in self.by_ref() {}
        match self.producer.take() {
            Some(handle) => handle.join().map_err(|_| {
                WorkerError::Panicked {
                    shard: format!("stream-{}", self.id),
                }
                .into()
            }),
            None => Ok(()),
        }
    }
}

impl Iterator for StreamHandle {
    type Item = DataBatch;

    fn next(&mut self) -> Option<DataBatch> {
        if self.finished {
            return None;
        }
        match self.receiver.recv() {
            Some(StreamFrame::Batch(batch)) => Some(batch),
            Some(StreamFrame::End) | None => {
                self.finished = true;
                None
            }
        }
    }
}

/// Deliver `source` inline or through a moved stream.
///
/// The first page is always fetched inline; pages keep being fetched while
/// the queue has room. Errors before the hand-off are returned; after it
/// they are logged by the producer.
pub fn deliver<S: PageSource>(mut source: S, capacity: usize) -> Result<Delivery> {
    source.preflight()?;

    let queue = BatchQueue::new(capacity);
    let stats = queue.stats();
    let (sender, receiver) = queue.split();
    let mut cursor = CURSOR_START;

    loop {
        let page = source.fetch(cursor)?;
        let exhausted = page.is_last();
        cursor = page.next_cursor;

        if !page.records.is_empty() {
            // The loop only continues while the queue has room
            sender.try_send(StreamFrame::Batch(DataBatch::new(page.records)))?;
        }

        if exhausted {
            drop(sender);
            let batches = receiver.drain();
            debug!(source = %source.describe(), batches = batches.len(), "Delivery completed inline");
            return Ok(Delivery::Completed(batches));
        }
        if sender.is_saturated() {
            break;
        }
    }

    let id = Uuid::new_v4();
    let description = source.describe();
    let producer = thread::Builder::new()
        .name(format!("stream-{id}"))
        .spawn(move || produce(source, cursor, sender, id))
        .map_err(|e| WorkerError::SpawnFailed {
            what: format!("stream producer for {description}"),
            reason: e.to_string(),
        })?;

    info!(stream = %id, source = %description, capacity, "Delivery moved to stream");

    Ok(Delivery::Moved(StreamHandle {
        id,
        receiver,
        stats,
        producer: Some(producer),
        finished: false,
    }))
}

/// Background producer: keep fetching until exhausted, then end the stream
fn produce<S: PageSource>(mut source: S, mut cursor: u64, sender: BatchSender, id: Uuid) {
    let mut pages = 0u64;
    loop {
        let page = match source.fetch(cursor) {
            Ok(page) => page,
            Err(e) => {
                warn!(stream = %id, source = %source.describe(), error = %e, "Stream producer failed");
                break;
            }
        };
        pages += 1;
        let exhausted = page.is_last();
        cursor = page.next_cursor;

        if !page.records.is_empty()
            && sender
                .send(StreamFrame::Batch(DataBatch::new(page.records)))
                .is_err()
        {
            debug!(stream = %id, "Stream receiver dropped, stopping producer");
            return;
        }
        if exhausted {
            break;
        }
    }

    let _ = sender.send(StreamFrame::End);
    debug!(stream = %id, pages, "Stream producer finished");
}

/// Ordering applied by [`full_scan`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentOrder {
    /// Text records deduplicated and sorted ascending
    Lexicographic,
    /// Hash fields sorted by field name
    ByField,
    /// Scored members grouped by score, groups ascending, members ascending
    ByScore,
    /// Order preserved as fetched
    AsStored,
}

impl ContentOrder {
    /// Arrange records fetched from a source
    pub fn arrange(self, records: Vec<Record>) -> Vec<Record> {
        match self {
            ContentOrder::AsStored => records,
            ContentOrder::Lexicographic => {
                let mut texts: Vec<String> = records
                    .into_iter()
                    .filter_map(|r| match r {
                        Record::Text(text) => Some(text),
                        _ => None,
                    })
                    .collect();
                texts.sort_unstable();
                texts.dedup();
                texts.into_iter().map(Record::Text).collect()
            }
            ContentOrder::ByField => {
                let mut fields: Vec<HashField> = records
                    .into_iter()
                    .filter_map(|r| match r {
                        Record::Field(field) => Some(field),
                        _ => None,
                    })
                    .collect();
                fields.sort_by(|a, b| a.key.cmp(&b.key));
                fields.dedup_by(|a, b| a.key == b.key);
                fields.into_iter().map(Record::Field).collect()
            }
            ContentOrder::ByScore => group_by_score(records),
        }
    }
}

fn group_by_score(records: Vec<Record>) -> Vec<Record> {
    let mut members: Vec<(f64, String)> = records
        .into_iter()
        .filter_map(|r| match r {
            Record::Scored(group) => Some(group),
            _ => None,
        })
        .flat_map(|group| {
            let score = group.score;
            group.values.into_iter().map(move |v| (score, v))
        })
        .collect();
    members.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    members.dedup();

    let mut groups: Vec<ScoredMembers> = Vec::new();
    for (score, member) in members {
        match groups.last_mut() {
            Some(group) if group.score.total_cmp(&score).is_eq() => group.values.push(member),
            _ => groups.push(ScoredMembers {
                score,
                values: vec![member],
            }),
        }
    }
    groups.into_iter().map(Record::Scored).collect()
}

/// Drain `source` completely and return one arranged batch.
///
/// Never moves to streaming, whatever the result size.
pub fn full_scan<S: PageSource>(mut source: S, order: ContentOrder) -> Result<DataBatch> {
    source.preflight()?;

    let mut records = Vec::new();
    let mut cursor = CURSOR_START;
    let mut pages = 0u64;
    loop {
        let page = source.fetch(cursor)?;
        pages += 1;
        records.extend(page.records);
        if page.next_cursor == CURSOR_START {
            break;
        }
        cursor = page.next_cursor;
    }

    debug!(source = %source.describe(), pages, records = records.len(), "Full scan complete");
    Ok(DataBatch::new(order.arrange(records)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BrowserError, StoreError};
    use proptest::prelude::*;

    /// Source serving `pages` pages of one record each
    struct CountingSource {
        pages: u64,
        fail_at: Option<u64>,
    }

    impl PageSource for CountingSource {
        fn describe(&self) -> String {
            format!("counting({})", self.pages)
        }

        fn fetch(&mut self, cursor: u64) -> StoreResult<Page> {
            if self.fail_at == Some(cursor) {
                return Err(StoreError::scan_failed("counting", "boom"));
            }
            let next = cursor + 1;
            Ok(Page {
                records: vec![Record::Text(format!("item-{cursor}"))],
                next_cursor: if next >= self.pages { CURSOR_START } else { next },
            })
        }
    }

    fn counting(pages: u64) -> CountingSource {
        CountingSource {
            pages,
            fail_at: None,
        }
    }

    #[test]
    fn test_capacity_pages_complete_inline() {
        let delivery = deliver(counting(5), 5).unwrap();
        assert_eq!(delivery.status(), ActionStatus::Completed);
        assert_eq!(delivery.into_batches().len(), 5);
    }

    #[test]
    fn test_one_page_over_capacity_moves() {
        let delivery = deliver(counting(6), 5).unwrap();
        assert_eq!(delivery.status(), ActionStatus::Moved);

        let records = delivery.into_records();
        assert_eq!(records.len(), 6);
        assert_eq!(records[0], Record::Text("item-0".into()));
        assert_eq!(records[5], Record::Text("item-5".into()));
    }

    #[test]
    fn test_first_page_is_fetched_inline() {
        let delivery = deliver(counting(1), 1).unwrap();
        assert_eq!(delivery.status(), ActionStatus::Completed);

        let delivery = deliver(counting(3), 1).unwrap();
        let Delivery::Moved(handle) = delivery else {
            panic!("expected a moved delivery");
        };
        assert_eq!(handle.count(), 3);
    }

    #[test]
    fn test_handle_stats_count_received_batches() {
        let Delivery::Moved(mut handle) = deliver(counting(4), 1).unwrap() else {
            panic!("expected a moved delivery");
        };
        let stats = handle.stats();
        assert_eq!(handle.by_ref().count(), 4);
        assert!(handle.is_finished());
        assert!(stats.throughput() >= 4);
    }

    #[test]
    fn test_error_before_hand_off_is_returned() {
        let source = CountingSource {
            pages: 10,
            fail_at: Some(2),
        };
        let err = deliver(source, 5).unwrap_err();
        assert!(matches!(err, BrowserError::Store(StoreError::ScanFailed { .. })));
    }

    #[test]
    fn test_error_after_hand_off_ends_stream() {
        let source = CountingSource {
            pages: 10,
            fail_at: Some(4),
        };
        let Delivery::Moved(mut handle) = deliver(source, 2).unwrap() else {
            panic!("expected a moved delivery");
        };
        let batches: Vec<_> = handle.by_ref().collect();
        assert_eq!(batches.len(), 4);
        assert!(handle.is_finished());
        handle.join().unwrap();
    }

    #[test]
    fn test_empty_source_completes() {
        struct Empty;
        impl PageSource for Empty {
            fn describe(&self) -> String {
                "empty".into()
            }
            fn fetch(&mut self, _cursor: u64) -> StoreResult<Page> {
                Ok(Page::default())
            }
        }
        let delivery = deliver(Empty, 3).unwrap();
        assert_eq!(delivery.status(), ActionStatus::Completed);
        assert!(delivery.into_batches().is_empty());
    }

    #[test]
    fn test_full_scan_never_moves() {
        let batch = full_scan(counting(50), ContentOrder::AsStored).unwrap();
        assert_eq!(batch.size, 50);
    }

    #[test]
    fn test_lexicographic_dedups() {
        let records = ["b", "a", "b"].iter().map(|s| Record::Text(s.to_string())).collect();
        assert_eq!(
            ContentOrder::Lexicographic.arrange(records),
            vec![Record::Text("a".into()), Record::Text("b".into())]
        );
    }

    #[test]
    fn test_by_score_groups_ties() {
        let scored = |score: f64, member: &str| {
            Record::Scored(ScoredMembers {
                score,
                values: vec![member.to_string()],
            })
        };
        let records = vec![
            scored(2.5, "third"),
            scored(0.5, "second"),
            scored(0.5, "first"),
        ];
        assert_eq!(
            ContentOrder::ByScore.arrange(records),
            vec![
                Record::Scored(ScoredMembers {
                    score: 0.5,
                    values: vec!["first".into(), "second".into()],
                }),
                Record::Scored(ScoredMembers {
                    score: 2.5,
                    values: vec!["third".into()],
                }),
            ]
        );
    }

    prop_compose! {
        fn scored_members()(pairs in prop::collection::vec((-1000i32..1000, "[a-z]{1,6}"), 0..60))
            -> Vec<(f64, String)> {
            pairs.into_iter().map(|(s, m)| (f64::from(s) / 4.0, m)).collect()
        }
    }

    proptest! {
        #[test]
        fn test_scored_order_law(members in scored_members()) {
            let records = members
                .iter()
                .rev()
                .map(|(score, member)| Record::Scored(ScoredMembers {
                    score: *score,
                    values: vec![member.clone()],
                }))
                .collect();
            let arranged = ContentOrder::ByScore.arrange(records);

            let mut previous: Option<f64> = None;
            for record in &arranged {
                let Record::Scored(group) = record else {
                    panic!("unexpected record {record:?}");
                };
                if let Some(prev) = previous {
                    prop_assert!(prev < group.score);
                }
                prop_assert!(group.values.windows(2).all(|w| w[0] < w[1]));
                previous = Some(group.score);
            }
        }
    }
}
