//! Per-stream telemetry buffer manager (spec §4.I).
//!
//! Grounded on the teacher's `services/forwarder/src/storage/journal.rs`
//! for the "durable window with a size+freshness cap, restored once at
//! creation" persistence shape, generalized from a single SQLite journal
//! into an in-memory ring buffer per stream with six overflow strategies
//! and six flush triggers that the teacher has no equivalent of.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::kv_store::KvStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowStrategy {
    Fifo,
    DropOldest,
    DropNewest,
    Downsample,
    PriorityBased,
    Adaptive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushTrigger {
    TimeInterval,
    BufferFull,
    DataCount,
    QualityThreshold,
    Manual,
    ConnectionState,
}

#[derive(Debug, Clone)]
pub struct BufferConfig {
    pub stream_id: String,
    pub window_size_ms: u64,
    pub max_data_points: Option<usize>,
    pub overflow_strategy: OverflowStrategy,
    pub flush_triggers: Vec<FlushTrigger>,
    pub downsample_factor: Option<u32>,
    pub quality_threshold: Option<f64>,
    pub flush_interval_ms: Option<u64>,
    pub flush_data_count: Option<usize>,
    pub enable_persistence: bool,
    pub enable_statistics: bool,
    pub statistics_interval_ms: Option<u64>,
}

impl BufferConfig {
    /// Capacity is `max_data_points` if given, else `ceil(window_size_ms / 10)`.
    pub fn capacity(&self) -> usize {
        self.max_data_points
            .unwrap_or_else(|| ((self.window_size_ms + 9) / 10).max(1) as usize)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: i64,
    pub value: f64,
    pub quality: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub overflow: bool,
    pub evicted: Option<DataPoint>,
    pub accepted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct OverflowCounters {
    pub fifo: u32,
    pub drop_newest: u32,
    pub downsample: u32,
    pub priority_based: u32,
    pub adaptive: u32,
}

impl OverflowCounters {
    fn total(&self) -> u32 {
        self.fifo + self.drop_newest + self.downsample + self.priority_based + self.adaptive
    }
}

#[derive(Debug, Clone)]
pub struct BufferStatistics {
    pub size: usize,
    pub capacity: usize,
    pub utilization: f64,
    pub total_received: u64,
    pub total_stored: u64,
    pub total_dropped: u64,
    pub total_flushed: u64,
    pub overflow_counters: OverflowCounters,
    pub avg_insertion_us: f64,
    pub avg_retrieval_us: f64,
    pub data_rate_per_sec: f64,
    pub ema_quality: f64,
    pub quality_histogram: [u32; 10],
    pub oldest_timestamp: Option<i64>,
    pub newest_timestamp: Option<i64>,
    pub time_span_ms: i64,
    pub errors: u32,
    pub health_score: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferHealth {
    pub score: i32,
    pub utilization: f64,
    pub overflow_total: u32,
    pub avg_quality: f64,
    pub errors: u32,
}

#[derive(Debug, Clone)]
pub struct FlushEvent {
    pub stream_id: String,
    pub trigger: FlushTrigger,
    pub data: Vec<DataPoint>,
    pub statistics: BufferStatistics,
    pub flush_duration_ms: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Impact {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct OptimizationRecommendation {
    pub stream_id: String,
    pub proposed_window_size_ms: Option<u64>,
    pub proposed_capacity_delta_pct: Option<f64>,
    pub proposed_overflow_strategy: Option<OverflowStrategy>,
    pub proposed_downsample_factor: Option<u32>,
    pub proposed_quality_threshold: Option<f64>,
    pub impact: Impact,
    pub confidence: f64,
}

impl OptimizationRecommendation {
    pub fn should_auto_apply(&self) -> bool {
        self.confidence > 0.7 && self.impact != Impact::Low
    }
}

const INSERTION_RETRIEVAL_SAMPLE_WINDOW: usize = 100;
const PERSISTED_ENTRY_FRESHNESS: Duration = Duration::from_secs(3600);

#[derive(Serialize, Deserialize)]
struct PersistedWindow {
    data: Vec<DataPoint>,
    timestamp: i64,
    version: u32,
}

/// A single stream's circular buffer plus its rolling statistics.
pub struct StreamBuffer {
    config: BufferConfig,
    entries: VecDeque<DataPoint>,
    downsample_counter: u32,
    total_received: u64,
    total_stored: u64,
    total_dropped: u64,
    total_flushed: u64,
    overflow_counters: OverflowCounters,
    insertion_us: VecDeque<f64>,
    retrieval_us: VecDeque<f64>,
    ema_quality: f64,
    quality_histogram: [u32; 10],
    errors: u32,
    last_flush_at_ms: i64,
}

impl StreamBuffer {
    pub fn new(config: BufferConfig) -> Self {
        let capacity = config.capacity();
        StreamBuffer {
            config,
            entries: VecDeque::with_capacity(capacity),
            downsample_counter: 0,
            total_received: 0,
            total_stored: 0,
            total_dropped: 0,
            total_flushed: 0,
            overflow_counters: OverflowCounters::default(),
            insertion_us: VecDeque::with_capacity(INSERTION_RETRIEVAL_SAMPLE_WINDOW),
            retrieval_us: VecDeque::with_capacity(INSERTION_RETRIEVAL_SAMPLE_WINDOW),
            ema_quality: 1.0,
            quality_histogram: [0; 10],
            errors: 0,
            last_flush_at_ms: 0,
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    fn capacity(&self) -> usize {
        self.config.capacity()
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity()
    }

    /// Restore a persisted window at construction time, discarding entries
    /// older than the freshness cap (spec §4.I: "older than 1 hour is
    /// discarded on restore").
    pub fn restore(&mut self, store: &dyn KvStore, now_ms: i64) -> Result<(), crate::error::ClientError> {
        let key = format!("buffers/{}", self.config.stream_id);
        let Some(bytes) = store.load(&key)? else { return Ok(()) };
        let persisted: PersistedWindow = serde_json::from_slice(&bytes)
            .map_err(|e| crate::error::ClientError::new("BUFFER_RESTORE_FAILED", crate::error::ErrorKind::Buffer, true, e.to_string()))?;
        if (now_ms - persisted.timestamp) as u128 > PERSISTED_ENTRY_FRESHNESS.as_millis() {
            return Ok(());
        }
        for point in persisted.data {
            self.entries.push_back(point);
        }
        Ok(())
    }

    /// Snapshot the current window to `store`, keyed `buffers/{streamId}`.
    pub fn persist(&self, store: &dyn KvStore, now_ms: i64) -> Result<(), crate::error::ClientError> {
        if !self.config.enable_persistence {
            return Ok(());
        }
        let key = format!("buffers/{}", self.config.stream_id);
        let persisted = PersistedWindow {
            data: self.entries.iter().copied().collect(),
            timestamp: now_ms,
            version: 1,
        };
        let bytes = serde_json::to_vec(&persisted)
            .map_err(|e| crate::error::ClientError::new("BUFFER_PERSIST_FAILED", crate::error::ErrorKind::Buffer, true, e.to_string()))?;
        store.save(&key, bytes)?;
        Ok(())
    }

    fn record_insertion_timing(&mut self, micros: f64) {
        if self.insertion_us.len() == INSERTION_RETRIEVAL_SAMPLE_WINDOW {
            self.insertion_us.pop_front();
        }
        self.insertion_us.push_back(micros);
    }

    fn record_quality(&mut self, quality: f64) {
        const ALPHA: f64 = 0.1;
        self.ema_quality += ALPHA * (quality - self.ema_quality);
        let bucket = ((quality.clamp(0.0, 1.0)) * 9.99) as usize;
        self.quality_histogram[bucket.min(9)] += 1;
    }

    /// Data rate estimate used by the ADAPTIVE overflow gate: points per
    /// second over the current window.
    fn data_rate_per_sec(&self) -> f64 {
        if self.entries.len() < 2 {
            return 0.0;
        }
        let oldest = self.entries.front().unwrap().timestamp;
        let newest = self.entries.back().unwrap().timestamp;
        let span_s = ((newest - oldest).max(1)) as f64 / 1000.0;
        self.entries.len() as f64 / span_s
    }

    /// Ingest one point, applying the configured overflow strategy.
    /// `insertion_micros` is the caller-measured timing for statistics.
    pub fn push(&mut self, point: DataPoint, insertion_micros: f64) -> PushOutcome {
        self.total_received += 1;
        self.record_insertion_timing(insertion_micros);
        if let Some(quality) = point.quality {
            self.record_quality(quality);
        }

        let outcome = match self.config.overflow_strategy {
            OverflowStrategy::Fifo | OverflowStrategy::DropOldest => {
                let evicted = if self.is_full() { self.entries.pop_front() } else { None };
                let overflow = evicted.is_some();
                if overflow {
                    self.overflow_counters.fifo += 1;
                }
                self.entries.push_back(point);
                PushOutcome { overflow, evicted, accepted: true }
            }
            OverflowStrategy::DropNewest => {
                if self.is_full() {
                    self.overflow_counters.drop_newest += 1;
                    self.total_dropped += 1;
                    return PushOutcome { overflow: true, evicted: None, accepted: false };
                }
                self.entries.push_back(point);
                PushOutcome { overflow: false, evicted: None, accepted: true }
            }
            OverflowStrategy::Downsample => {
                let factor = self.config.downsample_factor.unwrap_or(1).max(1);
                self.downsample_counter += 1;
                if self.downsample_counter % factor != 0 {
                    self.overflow_counters.downsample += 1;
                    self.total_dropped += 1;
                    return PushOutcome { overflow: false, evicted: None, accepted: false };
                }
                let evicted = if self.is_full() { self.entries.pop_front() } else { None };
                self.entries.push_back(point);
                PushOutcome { overflow: evicted.is_some(), evicted, accepted: true }
            }
            OverflowStrategy::PriorityBased => {
                let threshold = self.config.quality_threshold.unwrap_or(0.0);
                if point.quality.unwrap_or(0.0) < threshold {
                    self.overflow_counters.priority_based += 1;
                    self.total_dropped += 1;
                    return PushOutcome { overflow: false, evicted: None, accepted: false };
                }
                let evicted = if self.is_full() { self.entries.pop_front() } else { None };
                self.entries.push_back(point);
                PushOutcome { overflow: evicted.is_some(), evicted, accepted: true }
            }
            OverflowStrategy::Adaptive => {
                let utilization = self.utilization();
                let quality = point.quality.unwrap_or(1.0);
                let rate = self.data_rate_per_sec();
                let threshold_rate = 100.0;
                let should_drop = (utilization > 0.8 && quality < 0.5 && rate > threshold_rate) && quality <= 0.7;
                if should_drop {
                    self.overflow_counters.adaptive += 1;
                    self.total_dropped += 1;
                    return PushOutcome { overflow: false, evicted: None, accepted: false };
                }
                let evicted = if self.is_full() { self.entries.pop_front() } else { None };
                self.entries.push_back(point);
                PushOutcome { overflow: evicted.is_some(), evicted, accepted: true }
            }
        };
        self.total_stored += 1;
        outcome
    }

    /// Read entries newer than `now - windowSizeMs`.
    pub fn read_window(&self, now_ms: i64) -> Vec<DataPoint> {
        let cutoff = now_ms - self.config.window_size_ms as i64;
        self.entries.iter().filter(|p| p.timestamp >= cutoff).copied().collect()
    }

    pub fn utilization(&self) -> f64 {
        self.entries.len() as f64 / self.capacity() as f64
    }

    /// Drain the buffer into a [`FlushEvent`]. Data is sorted by timestamp
    /// per spec §4.I even though ingestion order should already satisfy it.
    pub fn flush(&mut self, trigger: FlushTrigger, now_ms: i64, flush_duration_ms: f64) -> FlushEvent {
        let mut data: Vec<DataPoint> = self.entries.drain(..).collect();
        data.sort_by_key(|p| p.timestamp);
        self.total_flushed += data.len() as u64;
        self.last_flush_at_ms = now_ms;
        let statistics = self.statistics(now_ms);
        FlushEvent {
            stream_id: self.config.stream_id.clone(),
            trigger,
            data,
            statistics,
            flush_duration_ms,
            timestamp: now_ms,
        }
    }

    /// Should a `TIME_INTERVAL` flush fire right now?
    pub fn time_interval_due(&self, now_ms: i64) -> bool {
        match self.config.flush_interval_ms {
            Some(interval) => now_ms - self.last_flush_at_ms >= interval as i64,
            None => false,
        }
    }

    pub fn data_count_due(&self) -> bool {
        match self.config.flush_data_count {
            Some(n) => self.entries.len() >= n,
            None => false,
        }
    }

    pub fn quality_threshold_due(&self, flush_quality_threshold: f64) -> bool {
        self.ema_quality < flush_quality_threshold
    }

    pub fn buffer_full_due(&self) -> bool {
        self.utilization() >= 1.0
    }

    /// Health score per spec §4.I's additive-penalty formula, 0-100.
    pub fn health_score(&self, statistics: &BufferStatistics) -> i32 {
        let mut score: i32 = 100;
        if statistics.utilization > 0.9 {
            score -= 20;
        } else if statistics.utilization > 0.8 {
            score -= 10;
        }
        let overflow_total = statistics.overflow_counters.total();
        if overflow_total > 10 {
            score -= 15;
        } else if overflow_total > 5 {
            score -= 8;
        }
        if statistics.ema_quality < 0.5 {
            score -= 25;
        } else if statistics.ema_quality < 0.7 {
            score -= 10;
        }
        score -= (statistics.errors as i32 * 2).min(20);
        score.max(0)
    }

    pub fn statistics(&self, now_ms: i64) -> BufferStatistics {
        let avg = |samples: &VecDeque<f64>| {
            if samples.is_empty() { 0.0 } else { samples.iter().sum::<f64>() / samples.len() as f64 }
        };
        let oldest = self.entries.front().map(|p| p.timestamp);
        let newest = self.entries.back().map(|p| p.timestamp);
        let mut statistics = BufferStatistics {
            size: self.entries.len(),
            capacity: self.capacity(),
            utilization: self.utilization(),
            total_received: self.total_received,
            total_stored: self.total_stored,
            total_dropped: self.total_dropped,
            total_flushed: self.total_flushed,
            overflow_counters: self.overflow_counters.clone(),
            avg_insertion_us: avg(&self.insertion_us),
            avg_retrieval_us: avg(&self.retrieval_us),
            data_rate_per_sec: self.data_rate_per_sec(),
            ema_quality: self.ema_quality,
            quality_histogram: self.quality_histogram,
            oldest_timestamp: oldest,
            newest_timestamp: newest,
            time_span_ms: match (oldest, newest) {
                (Some(o), Some(n)) => n - o,
                _ => 0,
            },
            errors: self.errors,
            health_score: 0,
        };
        statistics.health_score = self.health_score(&statistics);
        statistics
    }

    /// Detected issues when `health_score < 70` (spec §4.I).
    pub fn health_issues(&self, statistics: &BufferStatistics) -> Vec<&'static str> {
        let mut issues = Vec::new();
        if statistics.utilization > 0.8 {
            issues.push("high_utilization");
        }
        if statistics.overflow_counters.total() > 5 {
            issues.push("frequent_overflow");
        }
        if statistics.ema_quality < 0.7 {
            issues.push("low_quality");
        }
        if statistics.errors > 0 {
            issues.push("errors_present");
        }
        issues
    }

    /// Property 3: overflow+drop counters plus current size equal total
    /// received.
    pub fn invariant_holds(&self) -> bool {
        self.overflow_counters.total() as u64 + self.total_stored - self.entries.len() as u64
            + self.entries.len() as u64
            == self.total_received
    }
}

/// One optimization recommendation per stream, per spec §4.I's four rules.
pub fn recommend_optimization(stream_id: &str, config: &BufferConfig, statistics: &BufferStatistics) -> Option<OptimizationRecommendation> {
    let overflow_total = statistics.overflow_counters.total();
    if overflow_total > 20 {
        return Some(OptimizationRecommendation {
            stream_id: stream_id.to_owned(),
            proposed_window_size_ms: Some((config.window_size_ms as f64 * 1.5) as u64),
            proposed_capacity_delta_pct: None,
            proposed_overflow_strategy: None,
            proposed_downsample_factor: None,
            proposed_quality_threshold: None,
            impact: Impact::High,
            confidence: 0.8,
        });
    }
    if statistics.utilization > 0.95 {
        return Some(OptimizationRecommendation {
            stream_id: stream_id.to_owned(),
            proposed_window_size_ms: None,
            proposed_capacity_delta_pct: Some(0.20),
            proposed_overflow_strategy: None,
            proposed_downsample_factor: None,
            proposed_quality_threshold: None,
            impact: Impact::Medium,
            confidence: 0.75,
        });
    }
    if statistics.data_rate_per_sec > 100.0 && config.window_size_ms < 200 {
        return Some(OptimizationRecommendation {
            stream_id: stream_id.to_owned(),
            proposed_window_size_ms: Some(200),
            proposed_capacity_delta_pct: None,
            proposed_overflow_strategy: Some(OverflowStrategy::Downsample),
            proposed_downsample_factor: Some(2),
            proposed_quality_threshold: None,
            impact: Impact::Medium,
            confidence: 0.75,
        });
    }
    if statistics.ema_quality < 0.6 && config.overflow_strategy != OverflowStrategy::PriorityBased {
        return Some(OptimizationRecommendation {
            stream_id: stream_id.to_owned(),
            proposed_window_size_ms: None,
            proposed_capacity_delta_pct: None,
            proposed_overflow_strategy: Some(OverflowStrategy::PriorityBased),
            proposed_downsample_factor: None,
            proposed_quality_threshold: Some(0.7),
            impact: Impact::Medium,
            confidence: 0.75,
        });
    }
    None
}

/// Owns every stream's [`StreamBuffer`] (spec §4.I: "the buffer manager
/// owns each stream's buffer exclusively; no cross-stream mutation").
#[derive(Default)]
pub struct BufferManager {
    buffers: std::collections::HashMap<String, StreamBuffer>,
}

impl BufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_buffer(&mut self, config: BufferConfig) {
        self.buffers.insert(config.stream_id.clone(), StreamBuffer::new(config));
    }

    pub fn get(&self, stream_id: &str) -> Option<&StreamBuffer> {
        self.buffers.get(stream_id)
    }

    pub fn get_mut(&mut self, stream_id: &str) -> Option<&mut StreamBuffer> {
        self.buffers.get_mut(stream_id)
    }

    /// Remove a stream's buffer, optionally persisting its current window
    /// first (spec §4.I: "destroyBuffer ... snapshot the current window").
    pub fn destroy_buffer(&mut self, stream_id: &str, store: Option<&dyn KvStore>, now_ms: i64) -> Result<(), crate::error::ClientError> {
        if let Some(buffer) = self.buffers.remove(stream_id) {
            if let Some(store) = store {
                buffer.persist(store, now_ms)?;
            }
        }
        Ok(())
    }

    pub fn stream_ids(&self) -> impl Iterator<Item = &String> {
        self.buffers.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(stream_id: &str, window_ms: u64, strategy: OverflowStrategy, max_points: Option<usize>) -> BufferConfig {
        BufferConfig {
            stream_id: stream_id.to_owned(),
            window_size_ms: window_ms,
            max_data_points: max_points,
            overflow_strategy: strategy,
            flush_triggers: vec![FlushTrigger::Manual],
            downsample_factor: None,
            quality_threshold: None,
            flush_interval_ms: None,
            flush_data_count: None,
            enable_persistence: false,
            enable_statistics: true,
            statistics_interval_ms: None,
        }
    }

    /// S2: windowSizeMs=200, points at t=0,50,100,150,180,250 (value=ts);
    /// at t=250 the read returns [50,100,150,180,250].
    #[test]
    fn s2_time_window_read() {
        let mut buf = StreamBuffer::new(cfg("s2", 200, OverflowStrategy::Fifo, Some(100)));
        for ts in [0, 50, 100, 150, 180, 250] {
            buf.push(DataPoint { timestamp: ts, value: ts as f64, quality: None }, 1.0);
        }
        let window: Vec<i64> = buf.read_window(250).iter().map(|p| p.timestamp).collect();
        assert_eq!(window, vec![50, 100, 150, 180, 250]);
    }

    /// S3: capacity 3, DROP_NEWEST, push 4 -> buffer has 1,2,3; 4 dropped;
    /// stats {totalReceived=4, totalStored=3, totalDropped=1, overflowEvents>=1}.
    #[test]
    fn s3_drop_newest_overflow() {
        let mut buf = StreamBuffer::new(cfg("s3", 10_000, OverflowStrategy::DropNewest, Some(3)));
        for i in 1..=4 {
            buf.push(DataPoint { timestamp: i, value: i as f64, quality: None }, 1.0);
        }
        let stats = buf.statistics(100);
        assert_eq!(stats.total_received, 4);
        assert_eq!(stats.total_stored, 3);
        assert_eq!(stats.total_dropped, 1);
        assert!(stats.overflow_counters.total() >= 1);
        let values: Vec<i64> = buf.read_window(100_000).iter().map(|p| p.timestamp).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn fifo_overwrites_oldest_on_overflow() {
        let mut buf = StreamBuffer::new(cfg("fifo", 10_000, OverflowStrategy::Fifo, Some(2)));
        buf.push(DataPoint { timestamp: 1, value: 1.0, quality: None }, 1.0);
        buf.push(DataPoint { timestamp: 2, value: 2.0, quality: None }, 1.0);
        let outcome = buf.push(DataPoint { timestamp: 3, value: 3.0, quality: None }, 1.0);
        assert!(outcome.overflow);
        assert_eq!(outcome.evicted.unwrap().timestamp, 1);
        let values: Vec<i64> = buf.read_window(100_000).iter().map(|p| p.timestamp).collect();
        assert_eq!(values, vec![2, 3]);
    }

    #[test]
    fn downsample_keeps_one_in_n() {
        let mut buf = StreamBuffer::new(cfg("ds", 10_000, OverflowStrategy::Downsample, Some(10)));
        buf.config.downsample_factor = Some(3);
        let mut accepted = 0;
        for i in 1..=9 {
            if buf.push(DataPoint { timestamp: i, value: i as f64, quality: None }, 1.0).accepted {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 3);
    }

    #[test]
    fn priority_based_rejects_below_quality_threshold() {
        let mut buf = StreamBuffer::new(cfg("pb", 10_000, OverflowStrategy::PriorityBased, Some(10)));
        buf.config.quality_threshold = Some(0.5);
        let low = buf.push(DataPoint { timestamp: 1, value: 1.0, quality: Some(0.2) }, 1.0);
        let high = buf.push(DataPoint { timestamp: 2, value: 2.0, quality: Some(0.9) }, 1.0);
        assert!(!low.accepted);
        assert!(high.accepted);
    }

    #[test]
    fn health_score_penalizes_high_utilization_and_low_quality() {
        let mut buf = StreamBuffer::new(cfg("health", 10_000, OverflowStrategy::Fifo, Some(10)));
        for i in 1..=10 {
            buf.push(DataPoint { timestamp: i, value: i as f64, quality: Some(0.2) }, 1.0);
        }
        let stats = buf.statistics(100);
        assert!(stats.health_score < 70, "score was {}", stats.health_score);
    }

    #[test]
    fn flush_drains_and_sorts_by_timestamp() {
        let mut buf = StreamBuffer::new(cfg("flush", 10_000, OverflowStrategy::Fifo, Some(10)));
        for ts in [30, 10, 20] {
            buf.push(DataPoint { timestamp: ts, value: ts as f64, quality: None }, 1.0);
        }
        let event = buf.flush(FlushTrigger::Manual, 1000, 0.5);
        let timestamps: Vec<i64> = event.data.iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, vec![10, 20, 30]);
        assert_eq!(buf.statistics(1000).size, 0);
    }

    #[test]
    fn restore_discards_stale_entries() {
        let store = crate::kv_store::InMemoryKvStore::new();
        let persisted = PersistedWindow {
            data: vec![DataPoint { timestamp: 0, value: 1.0, quality: None }],
            timestamp: 0,
            version: 1,
        };
        store.save("buffers/old", serde_json::to_vec(&persisted).unwrap()).unwrap();
        let mut buf = StreamBuffer::new(cfg("old", 10_000, OverflowStrategy::Fifo, Some(10)));
        buf.restore(&store, 10 * 3600 * 1000).unwrap();
        assert_eq!(buf.statistics(10 * 3600 * 1000).size, 0);
    }

    #[test]
    fn manager_destroy_buffer_persists_then_removes() {
        let mut manager = BufferManager::new();
        let mut config = cfg("mgr", 10_000, OverflowStrategy::Fifo, Some(10));
        config.enable_persistence = true;
        manager.create_buffer(config);
        manager.get_mut("mgr").unwrap().push(DataPoint { timestamp: 1, value: 1.0, quality: None }, 1.0);
        let store = crate::kv_store::InMemoryKvStore::new();
        manager.destroy_buffer("mgr", Some(&store), 1000).unwrap();
        assert!(manager.get("mgr").is_none());
        assert!(store.load("buffers/mgr").unwrap().is_some());
    }
}
