//! Result delivery
//!
//! Results leave the crate as [`DataBatch`]es. Small results are returned
//! inline; results larger than the queue capacity switch to a moved stream
//! drained from a [`StreamHandle`].
//!
//! ```text
//!  PageSource ──fetch(cursor)──▶ BatchQueue (bounded) ──▶ caller
//!      │                              │
//!      └── exhausted first ─▶ Completed(batches)
//!                                     └── saturated first ─▶ Moved(handle)
//! ```

pub mod batch;
pub mod content;
pub mod engine;
pub mod queue;

pub use batch::{ActionStatus, DataBatch, HashField, Record, ScoredMembers};
pub use content::{filter_list, filter_stream, MemberSource, NodePages};
pub use engine::{
    deliver, full_scan, ContentOrder, Delivery, Page, PageSource, StreamHandle,
    DEFAULT_CHANNEL_CAPACITY,
};
pub use queue::{BatchQueue, BatchReceiver, BatchSender, QueueStats, StreamFrame};
