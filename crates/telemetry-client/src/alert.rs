//! Alert pipeline (spec §4.K): batched outbound delivery, ack
//! reconciliation, and at-least-once resync across reconnects.
//!
//! Grounded on the teacher's ack-cursor/replay model in
//! `services/forwarder/src/storage/journal.rs` (pending acks held until
//! server confirmation, replayed on reconnect) generalized from a single
//! append-only event log to a typed alert with its own batching policy.

use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertPriority {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    New,
    Update,
    Remove,
    Clear,
}

#[derive(Debug, Clone)]
pub struct AlertData {
    pub title: Option<String>,
    pub message: String,
    pub source: String,
    pub action: Option<String>,
    pub acknowledged: Option<bool>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<i64>,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub id: String,
    pub kind: AlertKind,
    pub priority: AlertPriority,
    pub timestamp: i64,
    pub data: AlertData,
    pub client_id: Option<String>,
    pub sync_id: Option<String>,
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Acknowledgment {
    pub alert_id: String,
    pub acknowledged_by: String,
    pub acknowledged_at: i64,
    pub client_id: String,
    pub sync_across_clients: bool,
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub acknowledgment_timeout_ms: u64,
    pub resync_on_reconnect: bool,
    pub auto_acknowledge_info: bool,
    pub adaptive_batching: bool,
    pub low_latency_threshold_ms: f64,
    pub high_latency_threshold_ms: f64,
}

pub enum DispatchDecision {
    Immediate(Alert),
    Batched,
}

struct PendingBatch {
    items: VecDeque<Alert>,
    first_queued_at: i64,
}

/// Outbound batch + ack-pending state, one instance per client.
pub struct AlertPipeline {
    config: AlertConfig,
    batch: Option<PendingBatch>,
    pending_acks: HashMap<String, Acknowledgment>,
    acknowledged_locally: std::collections::HashSet<String>,
    connection_loss_time: Option<i64>,
    sync_in_flight: bool,
}

impl AlertPipeline {
    pub fn new(config: AlertConfig) -> Self {
        AlertPipeline {
            config,
            batch: None,
            pending_acks: HashMap::new(),
            acknowledged_locally: std::collections::HashSet::new(),
            connection_loss_time: None,
            sync_in_flight: false,
        }
    }

    /// Decide immediate vs batched send for an outbound alert (spec
    /// §4.K: "Immediate iff priority==critical OR (batch empty AND
    /// avgLatency<lowLatencyThreshold)").
    pub fn send_alert(&mut self, alert: Alert, avg_latency_ms: f64, now_ms: i64) -> DispatchDecision {
        let batch_empty = self.batch.as_ref().is_none_or(|b| b.items.is_empty());
        if alert.priority == AlertPriority::Critical || (batch_empty && avg_latency_ms < self.config.low_latency_threshold_ms) {
            return DispatchDecision::Immediate(alert);
        }
        let batch = self.batch.get_or_insert_with(|| PendingBatch { items: VecDeque::new(), first_queued_at: now_ms });
        batch.items.push_back(alert);
        DispatchDecision::Batched
    }

    /// Adaptive current batch size: halves under low latency, doubles
    /// under high latency, else the configured default.
    pub fn current_batch_size(&self, avg_latency_ms: f64) -> usize {
        if !self.config.adaptive_batching {
            return self.config.batch_size;
        }
        if avg_latency_ms < self.config.low_latency_threshold_ms {
            (self.config.batch_size / 2).max(1)
        } else if avg_latency_ms > self.config.high_latency_threshold_ms {
            self.config.batch_size * 2
        } else {
            self.config.batch_size
        }
    }

    /// Should the pending batch dispatch now?
    pub fn batch_due(&self, avg_latency_ms: f64, now_ms: i64) -> bool {
        let Some(batch) = &self.batch else { return false };
        if batch.items.is_empty() {
            return false;
        }
        batch.items.len() >= self.current_batch_size(avg_latency_ms)
            || (now_ms - batch.first_queued_at) as u64 >= self.config.batch_timeout_ms
    }

    /// Drain the current batch for dispatch. Caller sends it; on failure
    /// call [`Self::requeue_failed_batch`] to re-prepend.
    pub fn take_batch(&mut self) -> Vec<Alert> {
        match self.batch.take() {
            Some(batch) => batch.items.into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Re-prepend a failed batch ahead of anything queued since (spec
    /// §4.K: "re-prepends the items").
    pub fn requeue_failed_batch(&mut self, items: Vec<Alert>, now_ms: i64) {
        let mut new_items: VecDeque<Alert> = items.into();
        if let Some(existing) = self.batch.take() {
            new_items.extend(existing.items);
        }
        self.batch = Some(PendingBatch { items: new_items, first_queued_at: now_ms });
    }

    /// Record a pending acknowledgment and optimistically mark locally
    /// acknowledged.
    pub fn acknowledge(&mut self, ack: Acknowledgment) {
        self.acknowledged_locally.insert(ack.alert_id.clone());
        self.pending_acks.insert(ack.alert_id.clone(), ack);
    }

    /// Server confirmed the ack; clear it from the pending map.
    pub fn confirm_ack(&mut self, alert_id: &str) {
        self.pending_acks.remove(alert_id);
    }

    pub fn pending_ack_ids(&self) -> Vec<String> {
        self.pending_acks.keys().cloned().collect()
    }

    pub fn is_acknowledged_locally(&self, alert_id: &str) -> bool {
        self.acknowledged_locally.contains(alert_id)
    }

    /// Route a received alert: auto-ack info priority, mark locally
    /// acknowledged, and report whether an ack should be sent.
    pub fn route_received(&mut self, alert: &Alert) -> bool {
        if self.config.auto_acknowledge_info && alert.priority == AlertPriority::Info {
            self.acknowledged_locally.insert(alert.id.clone());
            return true;
        }
        false
    }

    /// Begin tracking a connection loss for resync (spec §4.K: "records
    /// connectionLossTime if absent").
    pub fn record_connection_loss(&mut self, now_ms: i64) {
        self.connection_loss_time.get_or_insert(now_ms);
    }

    pub fn connection_loss_time(&self) -> Option<i64> {
        self.connection_loss_time
    }

    pub fn clear_connection_loss(&mut self) {
        self.connection_loss_time = None;
    }

    /// Enter the single-in-flight sync guard. Returns `false` if a sync
    /// is already running (spec §4.K: "serialized, one in flight at a
    /// time").
    pub fn begin_sync(&mut self) -> bool {
        if self.sync_in_flight {
            return false;
        }
        self.sync_in_flight = true;
        true
    }

    pub fn end_sync(&mut self) {
        self.sync_in_flight = false;
    }

    pub fn sync_in_flight(&self) -> bool {
        self.sync_in_flight
    }
}

#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub last_sync_timestamp: i64,
    pub priorities: Vec<AlertPriority>,
    pub include_acknowledged: bool,
    pub max_count: usize,
}

#[derive(Debug, Clone)]
pub struct SyncResponse {
    pub alerts: Vec<Alert>,
    pub sync_timestamp: i64,
    pub has_more: bool,
    pub total_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> AlertConfig {
        AlertConfig {
            batch_size: 10,
            batch_timeout_ms: 1000,
            max_retries: 3,
            retry_backoff_ms: 100,
            acknowledgment_timeout_ms: 5000,
            resync_on_reconnect: true,
            auto_acknowledge_info: true,
            adaptive_batching: true,
            low_latency_threshold_ms: 50.0,
            high_latency_threshold_ms: 300.0,
        }
    }

    fn alert(id: &str, priority: AlertPriority) -> Alert {
        Alert {
            id: id.to_owned(),
            kind: AlertKind::New,
            priority,
            timestamp: 0,
            data: AlertData {
                title: None,
                message: "m".into(),
                source: "s".into(),
                action: None,
                acknowledged: None,
                acknowledged_by: None,
                acknowledged_at: None,
                expires_at: None,
            },
            client_id: None,
            sync_id: None,
            batch_id: None,
        }
    }

    /// S4: adaptive batching, non-empty low-priority batch, critical alert
    /// dispatches immediately; the batch remains queued.
    #[test]
    fn s4_critical_bypasses_batch() {
        let mut pipeline = AlertPipeline::new(cfg());
        pipeline.send_alert(alert("low-1", AlertPriority::Low), 200.0, 0);
        let decision = pipeline.send_alert(alert("crit", AlertPriority::Critical), 200.0, 0);
        assert!(matches!(decision, DispatchDecision::Immediate(_)));
        assert_eq!(pipeline.batch.as_ref().unwrap().items.len(), 1);
    }

    #[test]
    fn low_latency_with_empty_batch_sends_immediately() {
        let mut pipeline = AlertPipeline::new(cfg());
        let decision = pipeline.send_alert(alert("a", AlertPriority::Low), 10.0, 0);
        assert!(matches!(decision, DispatchDecision::Immediate(_)));
    }

    #[test]
    fn adaptive_batch_size_halves_and_doubles() {
        let pipeline = AlertPipeline::new(cfg());
        assert_eq!(pipeline.current_batch_size(10.0), 5);
        assert_eq!(pipeline.current_batch_size(400.0), 20);
        assert_eq!(pipeline.current_batch_size(150.0), 10);
    }

    #[test]
    fn batch_dispatches_on_size_or_timeout() {
        let mut pipeline = AlertPipeline::new(cfg());
        for i in 0..4 {
            pipeline.send_alert(alert(&format!("a{i}"), AlertPriority::Low), 150.0, 0);
        }
        assert!(!pipeline.batch_due(150.0, 0));
        assert!(pipeline.batch_due(150.0, 2000), "timeout elapsed");
    }

    #[test]
    fn failed_batch_is_reprepended_ahead_of_new_items() {
        let mut pipeline = AlertPipeline::new(cfg());
        pipeline.send_alert(alert("new", AlertPriority::Low), 150.0, 100);
        let failed = vec![alert("old1", AlertPriority::Low), alert("old2", AlertPriority::Low)];
        pipeline.requeue_failed_batch(failed, 50);
        let drained = pipeline.take_batch();
        let ids: Vec<&str> = drained.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["old1", "old2", "new"]);
    }

    #[test]
    fn sync_guard_rejects_concurrent_sync() {
        let mut pipeline = AlertPipeline::new(cfg());
        assert!(pipeline.begin_sync());
        assert!(!pipeline.begin_sync());
        pipeline.end_sync();
        assert!(pipeline.begin_sync());
    }

    #[test]
    fn auto_acknowledge_info_priority_on_receipt() {
        let mut pipeline = AlertPipeline::new(cfg());
        let a = alert("info-1", AlertPriority::Info);
        assert!(pipeline.route_received(&a));
        assert!(pipeline.is_acknowledged_locally("info-1"));
    }

    #[test]
    fn connection_loss_time_is_recorded_once() {
        let mut pipeline = AlertPipeline::new(cfg());
        pipeline.record_connection_loss(100);
        pipeline.record_connection_loss(200);
        assert_eq!(pipeline.connection_loss_time(), Some(100));
        pipeline.clear_connection_loss();
        assert_eq!(pipeline.connection_loss_time(), None);
    }
}
