//! Bounded batch queue with backpressure
//!
//! The queue capacity is both the backpressure bound for a background
//! producer and the threshold at which a delivery is moved to streaming.
//! Producers end a stream with an explicit [`StreamFrame::End`] before
//! dropping their sender.

use crate::delivery::batch::DataBatch;
use crate::error::WorkerError;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Item carried by the queue
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// One page of results
    Batch(DataBatch),
    /// No more data will follow
    End,
}

/// Statistics for the batch queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Total batches enqueued
    pub enqueued: AtomicU64,

    /// Total batches dequeued
    pub dequeued: AtomicU64,

    /// Number of times a send found the queue full
    pub backpressure_events: AtomicU64,
}

impl QueueStats {
    /// Get queue throughput (dequeued batches)
    pub fn throughput(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }

    /// Get backpressure event count
    pub fn backpressure_count(&self) -> u64 {
        self.backpressure_events.load(Ordering::Relaxed)
    }
}

/// Bounded queue of batches
pub struct BatchQueue {
    sender: Sender<StreamFrame>,
    receiver: Receiver<StreamFrame>,
    capacity: usize,
    stats: Arc<QueueStats>,
}

impl BatchQueue {
    /// Create a new queue; a zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = bounded(capacity);

        Self {
            sender,
            receiver,
            capacity,
            stats: Arc::new(QueueStats::default()),
        }
    }

    /// Get a sender handle
    pub fn sender(&self) -> BatchSender {
        BatchSender {
            sender: self.sender.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Get a receiver handle
    pub fn receiver(&self) -> BatchReceiver {
        BatchReceiver {
            receiver: self.receiver.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Split into handles, dropping the queue's own ends
    pub fn split(self) -> (BatchSender, BatchReceiver) {
        (
            BatchSender {
                sender: self.sender,
                stats: Arc::clone(&self.stats),
            },
            BatchReceiver {
                receiver: self.receiver,
                stats: self.stats,
            },
        )
    }

    /// Get queue statistics
    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }

    /// Get queue capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Handle for pushing frames
#[derive(Clone)]
pub struct BatchSender {
    sender: Sender<StreamFrame>,
    stats: Arc<QueueStats>,
}

impl BatchSender {
    /// Try to push a frame without blocking
    ///
    /// Returns `Ok(true)` if sent successfully
    /// Returns `Ok(false)` if the queue is full (backpressure)
    /// Returns `Err` if the receiver is gone
    pub fn try_send(&self, frame: StreamFrame) -> Result<bool, WorkerError> {
        match self.sender.try_send(frame) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            Err(TrySendError::Full(_)) => {
                self.stats.backpressure_events.fetch_add(1, Ordering::Relaxed);
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Err(WorkerError::QueueClosed),
        }
    }

    /// Push a frame, blocking while the queue is full
    pub fn send(&self, frame: StreamFrame) -> Result<(), WorkerError> {
        if self.sender.is_full() {
            self.stats.backpressure_events.fetch_add(1, Ordering::Relaxed);
        }
        self.sender.send(frame).map_err(|_| WorkerError::QueueClosed)?;
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Check whether the queue reached its capacity
    pub fn is_saturated(&self) -> bool {
        self.sender.is_full()
    }

    /// Get current queue length
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }
}

/// Handle for pulling frames
pub struct BatchReceiver {
    receiver: Receiver<StreamFrame>,
    stats: Arc<QueueStats>,
}

impl BatchReceiver {
    /// Receive a frame, blocking until one is available.
    ///
    /// Returns `None` once every sender is gone and the queue is empty.
    pub fn recv(&self) -> Option<StreamFrame> {
        match self.receiver.recv() {
            Ok(frame) => {
                self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
                Some(frame)
            }
            Err(_) => None,
        }
    }

    /// Take every batch currently queued, without blocking
    pub fn drain(&self) -> Vec<DataBatch> {
        let mut batches = Vec::with_capacity(self.receiver.len());
        loop {
            match self.receiver.try_recv() {
                Ok(frame) => {
                    self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
                    if let StreamFrame::Batch(batch) = frame {
                        batches.push(batch);
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        batches
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Get current queue length
    pub fn len(&self) -> usize {
        self.receiver.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::batch::Record;

    fn batch(text: &str) -> StreamFrame {
        StreamFrame::Batch(DataBatch::new(vec![Record::Text(text.into())]))
    }

    #[test]
    fn test_queue_backpressure() {
        let queue = BatchQueue::new(2);
        let sender = queue.sender();

        assert!(sender.try_send(batch("a")).unwrap());
        assert!(!sender.is_saturated());
        assert!(sender.try_send(batch("b")).unwrap());
        assert!(sender.is_saturated());

        // Queue is full - should return false (backpressure)
        assert!(!sender.try_send(batch("c")).unwrap());
        assert_eq!(queue.stats().backpressure_count(), 1);
    }

    #[test]
    fn test_drain_skips_end_marker() {
        let (sender, receiver) = BatchQueue::new(4).split();
        sender.send(batch("a")).unwrap();
        sender.send(StreamFrame::End).unwrap();

        let batches = receiver.drain();
        assert_eq!(batches.len(), 1);
        assert!(receiver.is_empty());
    }

    #[test]
    fn test_disconnected_receiver() {
        let (sender, receiver) = BatchQueue::new(1).split();
        drop(receiver);
        assert!(matches!(sender.send(batch("a")), Err(WorkerError::QueueClosed)));
        assert!(matches!(sender.try_send(batch("a")), Err(WorkerError::QueueClosed)));
    }

    #[test]
    fn test_recv_ends_when_senders_drop() {
        let (sender, receiver) = BatchQueue::new(2).split();
        sender.send(batch("a")).unwrap();
        drop(sender);

        assert!(matches!(receiver.recv(), Some(StreamFrame::Batch(_))));
        assert!(receiver.recv().is_none());
        assert_eq!(receiver.stats.throughput(), 1);
    }
}
