//! Outbound message queue with backpressure (spec §4.H).
//!
//! Grounded on the teacher's `services/forwarder/src/storage/journal.rs`
//! ack-cursor/replay shape (persist-on-disconnect, restore-and-resume on
//! reconnect) combined with a `BinaryHeap` priority ordering the teacher
//! has no equivalent of — telemetry's outbound queue needs priority+FIFO
//! delivery, not a single append-only journal.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use serde::{Deserialize, Serialize};

use telemetry_wire::Priority;

use crate::kv_store::KvStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    pub message_type: telemetry_wire::MessageType,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub timestamp: i64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub expires_at: Option<i64>,
}

/// Ordered so a max-heap pops highest priority first, ties broken FIFO by
/// timestamp (earlier timestamp = higher heap priority).
#[derive(Debug, Clone)]
struct HeapEntry(QueuedMessage);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.timestamp == other.0.timestamp
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.timestamp.cmp(&self.0.timestamp))
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub size: usize,
    pub delivered: u64,
    pub dropped: u64,
    pub retried: u64,
    pub backpressure_active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    MaxRetriesExceeded,
    Expired,
}

#[derive(Debug, Clone)]
pub struct DroppedMessage {
    pub id: String,
    pub reason: DropReason,
}

pub enum SendOutcome {
    Delivered,
    Failed,
}

#[derive(Serialize, Deserialize)]
struct PersistedQueue {
    messages: Vec<QueuedMessage>,
}

/// Priority queue over [`QueuedMessage`], with backpressure watermarks and
/// offline persistence. Not thread-shared — the facade owns it exclusively
/// (spec §5: "mutated only by the facade and its managers").
pub struct OutboundQueue {
    heap: BinaryHeap<HeapEntry>,
    high_watermark: usize,
    low_watermark: usize,
    backpressure_active: bool,
    delivered: u64,
    dropped: u64,
    retried: u64,
    dropped_log: VecDeque<DroppedMessage>,
}

impl OutboundQueue {
    pub fn new(high_watermark: usize, low_watermark: usize) -> Self {
        OutboundQueue {
            heap: BinaryHeap::new(),
            high_watermark,
            low_watermark,
            backpressure_active: false,
            delivered: 0,
            dropped: 0,
            retried: 0,
            dropped_log: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn backpressure_active(&self) -> bool {
        self.backpressure_active
    }

    /// Enqueue a message. Refuses anything below `HIGH` priority while
    /// backpressure is active (spec §4.H). Returns `false` if refused.
    pub fn enqueue(&mut self, message: QueuedMessage) -> bool {
        if self.backpressure_active && message.priority < Priority::High {
            return false;
        }
        self.heap.push(HeapEntry(message));
        self.update_backpressure();
        true
    }

    fn update_backpressure(&mut self) {
        if !self.backpressure_active && self.heap.len() > self.high_watermark {
            self.backpressure_active = true;
        } else if self.backpressure_active && self.heap.len() < self.low_watermark {
            self.backpressure_active = false;
        }
    }

    /// Pop the highest-priority, earliest-enqueued message for delivery.
    pub fn pop_for_delivery(&mut self) -> Option<QueuedMessage> {
        let entry = self.heap.pop()?.0;
        self.update_backpressure();
        Some(entry)
    }

    /// Record a successful delivery.
    pub fn mark_delivered(&mut self) {
        self.delivered += 1;
    }

    /// Record a failed delivery: increments `retry_count`, re-enqueues
    /// unless retries or TTL are exhausted, in which case it is dropped
    /// with an event.
    pub fn mark_failed(&mut self, mut message: QueuedMessage, now_ms: i64) -> Option<DroppedMessage> {
        message.retry_count += 1;
        if message.retry_count > message.max_retries {
            self.dropped += 1;
            let dropped = DroppedMessage { id: message.id.clone(), reason: DropReason::MaxRetriesExceeded };
            self.dropped_log.push_back(dropped.clone());
            return Some(dropped);
        }
        if let Some(expires_at) = message.expires_at {
            if now_ms > expires_at {
                self.dropped += 1;
                let dropped = DroppedMessage { id: message.id.clone(), reason: DropReason::Expired };
                self.dropped_log.push_back(dropped.clone());
                return Some(dropped);
            }
        }
        self.retried += 1;
        self.heap.push(HeapEntry(message));
        self.update_backpressure();
        None
    }

    /// Backoff delay before the next retry attempt, per spec §4.H:
    /// `baseDelay * 2^retryCount`.
    pub fn retry_delay_ms(retry_count: u32, base_delay_ms: i64) -> i64 {
        base_delay_ms.saturating_mul(1i64 << retry_count.min(32))
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.backpressure_active = false;
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            size: self.heap.len(),
            delivered: self.delivered,
            dropped: self.dropped,
            retried: self.retried,
            backpressure_active: self.backpressure_active,
        }
    }

    /// Snapshot the full queue to offline storage (spec §6: key
    /// `outbound_queue`, an array of queued messages).
    pub fn persist(&self, store: &dyn KvStore) -> Result<(), crate::error::ClientError> {
        let messages: Vec<QueuedMessage> = self.heap.iter().map(|e| e.0.clone()).collect();
        let bytes = serde_json::to_vec(&PersistedQueue { messages })
            .map_err(|e| crate::error::ClientError::new("QUEUE_PERSIST_FAILED", crate::error::ErrorKind::Queue, true, e.to_string()))?;
        store.save("outbound_queue", bytes)?;
        Ok(())
    }

    /// Restore a previously persisted queue and resume.
    pub fn restore(&mut self, store: &dyn KvStore) -> Result<(), crate::error::ClientError> {
        let Some(bytes) = store.load("outbound_queue")? else { return Ok(()) };
        let persisted: PersistedQueue = serde_json::from_slice(&bytes)
            .map_err(|e| crate::error::ClientError::new("QUEUE_RESTORE_FAILED", crate::error::ErrorKind::Queue, true, e.to_string()))?;
        for message in persisted.messages {
            self.heap.push(HeapEntry(message));
        }
        self.update_backpressure();
        Ok(())
    }
}
