//! Telemetry subscription manager (spec §4.J).
//!
//! Grounded on spec §9's "heterogeneous subscription tree ... use
//! tagged-variant entities keyed in one arena ... relations are indices,
//! never owning references". The teacher has no subscription concept to
//! generalize from (its streams are fixed reader/timing-mat channels), so
//! the arena shape itself is grounded on the design note rather than
//! teacher code; the validation-rule-chain idiom follows the same
//! `Result`-returning, error-accumulating style the teacher uses in
//! `services/forwarder/src/storage/journal.rs`'s integrity checks.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Numeric,
    Vector,
    Matrix,
    String,
    Boolean,
    Object,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub stream_id: String,
    pub data_type: DataType,
    pub buffer_size: usize,
    pub sample_rate_hz: Option<f64>,
    pub decimation_factor: Option<u32>,
    pub dimensions: Option<Vec<usize>>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub units: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, Clone)]
pub struct Qos {
    pub reliability: Reliability,
    pub ordered: bool,
    pub durable: bool,
    pub latency_target_ms: Option<u32>,
    pub buffer_size: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Created,
    Active,
    Paused,
    Cancelled,
    Expired,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub u64);

#[derive(Debug, Clone)]
pub struct Lifetime {
    pub ttl_ms: Option<u64>,
    pub expires_at: Option<i64>,
    pub auto_renew: bool,
    pub renew_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionStats {
    pub total_received: u64,
    pub total_stored: u64,
    pub total_dropped: u64,
    pub rate_per_sec: f64,
    pub ema_quality: f64,
}

/// One entry in the subscription arena. Dependencies/group membership are
/// stored as ids, never owning references, so the arena has no cycles.
pub struct Subscription {
    pub id: SubscriptionId,
    pub wire_subscription_id: String,
    pub config: StreamConfig,
    pub qos: Option<Qos>,
    pub lifetime: Option<Lifetime>,
    pub dependencies: Vec<SubscriptionId>,
    pub group: Option<GroupId>,
    pub state: SubscriptionState,
    pub created_at: i64,
    pub last_activity: i64,
    pub decimation_counter: u32,
    pub stats: SubscriptionStats,
}

pub struct SubscriptionGroup {
    pub id: GroupId,
    pub members: Vec<SubscriptionId>,
}

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub modifications: HashMap<String, String>,
    pub estimated_resource_usage: Option<ResourceEstimate>,
}

impl ValidationOutcome {
    fn ok() -> Self {
        ValidationOutcome { valid: true, errors: Vec::new(), warnings: Vec::new(), modifications: HashMap::new(), estimated_resource_usage: None }
    }

    fn merge(mut self, other: ValidationOutcome) -> Self {
        self.valid &= other.valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.modifications.extend(other.modifications);
        if other.estimated_resource_usage.is_some() {
            self.estimated_resource_usage = other.estimated_resource_usage;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceEstimate {
    pub memory_bytes: u64,
    pub cpu_percent: f64,
    pub network_mbps: f64,
}

/// Base bytes-per-point overhead plus type-specific payload, per spec
/// §4.J's resource estimation formula.
fn estimated_bytes_per_point(data_type: DataType, dimensions: &Option<Vec<usize>>) -> u64 {
    const BASE: u64 = 50;
    let type_specific = match data_type {
        DataType::Numeric | DataType::Boolean => 8,
        DataType::String => 64,
        DataType::Object => 128,
        DataType::Vector => dimensions.as_ref().map_or(8, |d| d.iter().product::<usize>() as u64 * 8),
        DataType::Matrix => dimensions.as_ref().map_or(64, |d| d.iter().product::<usize>() as u64 * 8),
    };
    BASE + type_specific
}

pub fn estimate_resources(config: &StreamConfig) -> ResourceEstimate {
    let hz = config.sample_rate_hz.unwrap_or(1.0);
    let bytes_per_point = estimated_bytes_per_point(config.data_type, &config.dimensions);
    let memory_bytes = (hz * bytes_per_point as f64 * config.buffer_size as f64) as u64;
    let cpu_percent = (0.01 * hz).min(50.0);
    let bits_per_sec = hz * bytes_per_point as f64 * 8.0;
    let network_mbps = bits_per_sec / 1_000_000.0;
    ResourceEstimate { memory_bytes, cpu_percent, network_mbps }
}

/// A rule chain entry. Each rule inspects the (possibly already-modified)
/// config and channel capability and returns its own outcome; outcomes
/// are merged in order, with later modifications applied before routing.
pub type ValidationRule = fn(&StreamConfig, &ChannelCapability) -> ValidationOutcome;

#[derive(Debug, Clone)]
pub struct ChannelCapability {
    pub channel_id: String,
    pub max_frequency_hz: f64,
    pub max_batch_size: usize,
    pub supported_protocols: Vec<telemetry_wire::ProtocolKind>,
    pub adaptive_frequency: bool,
}

/// S6: a request at 500Hz against a 200Hz-max channel with
/// `adaptive=true` succeeds with `granted.frequency.actualHz=200` and a
/// `FREQUENCY_CAPPED` warning.
pub fn rule_frequency_compatibility(config: &StreamConfig, channel: &ChannelCapability) -> ValidationOutcome {
    let Some(requested) = config.sample_rate_hz else { return ValidationOutcome::ok() };
    if requested <= channel.max_frequency_hz {
        return ValidationOutcome::ok();
    }
    if channel.adaptive_frequency {
        let mut outcome = ValidationOutcome::ok();
        outcome.warnings.push("FREQUENCY_CAPPED".to_owned());
        outcome.modifications.insert("sample_rate_hz".to_owned(), channel.max_frequency_hz.to_string());
        outcome
    } else {
        ValidationOutcome {
            valid: false,
            errors: vec!["FREQUENCY_EXCEEDS_CHANNEL_MAX".to_owned()],
            warnings: Vec::new(),
            modifications: HashMap::new(),
            estimated_resource_usage: None,
        }
    }
}

pub fn rule_protocol_compatibility(_config: &StreamConfig, channel: &ChannelCapability) -> ValidationOutcome {
    if channel.supported_protocols.is_empty() {
        ValidationOutcome {
            valid: false,
            errors: vec!["NO_COMMON_PROTOCOL".to_owned()],
            warnings: Vec::new(),
            modifications: HashMap::new(),
            estimated_resource_usage: None,
        }
    } else {
        ValidationOutcome::ok()
    }
}

pub fn rule_resource_estimate(config: &StreamConfig, _channel: &ChannelCapability) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::ok();
    outcome.estimated_resource_usage = Some(estimate_resources(config));
    outcome
}

pub fn default_rule_chain() -> Vec<ValidationRule> {
    vec![rule_frequency_compatibility, rule_protocol_compatibility, rule_resource_estimate]
}

/// Run every rule in the chain and merge outcomes in order.
pub fn validate(config: &StreamConfig, channel: &ChannelCapability, rules: &[ValidationRule]) -> ValidationOutcome {
    rules.iter().fold(ValidationOutcome::ok(), |acc, rule| acc.merge(rule(config, channel)))
}

#[derive(Debug, Clone, Copy)]
pub struct BatchSubscribeOptions {
    pub fail_on_any_error: bool,
    pub transactional: bool,
    pub max_concurrency: usize,
}

/// Owns every [`Subscription`] and [`SubscriptionGroup`] in one arena,
/// keyed by id (spec §9).
#[derive(Default)]
pub struct SubscriptionManager {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    groups: HashMap<GroupId, SubscriptionGroup>,
    next_id: u64,
    next_group_id: u64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }

    pub fn allocate_group_id(&mut self) -> GroupId {
        self.next_group_id += 1;
        GroupId(self.next_group_id)
    }

    /// Create a subscription after it has already passed validation. The
    /// wire-level subscribe command is the caller's responsibility.
    pub fn create(&mut self, wire_subscription_id: String, config: StreamConfig, qos: Option<Qos>, lifetime: Option<Lifetime>, now_ms: i64) -> SubscriptionId {
        let id = self.allocate_id();
        self.subscriptions.insert(
            id,
            Subscription {
                id,
                wire_subscription_id,
                config,
                qos,
                lifetime,
                dependencies: Vec::new(),
                group: None,
                state: SubscriptionState::Created,
                created_at: now_ms,
                last_activity: now_ms,
                decimation_counter: 0,
                stats: SubscriptionStats::default(),
            },
        );
        id
    }

    pub fn get(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.subscriptions.get(&id)
    }

    pub fn get_mut(&mut self, id: SubscriptionId) -> Option<&mut Subscription> {
        self.subscriptions.get_mut(&id)
    }

    /// Remove a subscription for destruction. Caller is responsible for
    /// closing the wire subscription and destroying the buffer.
    pub fn remove(&mut self, id: SubscriptionId) -> Option<Subscription> {
        self.subscriptions.remove(&id)
    }

    pub fn activate(&mut self, id: SubscriptionId) {
        if let Some(sub) = self.subscriptions.get_mut(&id) {
            sub.state = SubscriptionState::Active;
        }
    }

    pub fn pause(&mut self, id: SubscriptionId) {
        if let Some(sub) = self.subscriptions.get_mut(&id) {
            if sub.state == SubscriptionState::Active {
                sub.state = SubscriptionState::Paused;
            }
        }
    }

    pub fn resume(&mut self, id: SubscriptionId) {
        if let Some(sub) = self.subscriptions.get_mut(&id) {
            if sub.state == SubscriptionState::Paused {
                sub.state = SubscriptionState::Active;
            }
        }
    }

    pub fn cancel(&mut self, id: SubscriptionId) {
        if let Some(sub) = self.subscriptions.get_mut(&id) {
            sub.state = SubscriptionState::Cancelled;
        }
    }

    /// Check lifetime expiry; marks expired (or, with `auto_renew`,
    /// returns `true` meaning "send a renewal command").
    pub fn check_lifetime(&mut self, id: SubscriptionId, now_ms: i64) -> bool {
        let Some(sub) = self.subscriptions.get_mut(&id) else { return false };
        let Some(lifetime) = &sub.lifetime else { return false };
        let Some(expires_at) = lifetime.expires_at else { return false };
        if now_ms < expires_at {
            return false;
        }
        if lifetime.auto_renew {
            true
        } else {
            sub.state = SubscriptionState::Expired;
            false
        }
    }

    pub fn mark_renewal_failed(&mut self, id: SubscriptionId) {
        if let Some(sub) = self.subscriptions.get_mut(&id) {
            sub.state = SubscriptionState::Expired;
        }
    }

    /// Gate for ingest: only active, non-expired subscriptions accept
    /// data. Applies decimation (accept 1 in N) as a side effect.
    pub fn should_ingest(&mut self, id: SubscriptionId) -> bool {
        let Some(sub) = self.subscriptions.get_mut(&id) else { return false };
        if sub.state != SubscriptionState::Active {
            return false;
        }
        let factor = sub.config.decimation_factor.unwrap_or(1).max(1);
        sub.decimation_counter += 1;
        sub.decimation_counter % factor == 0
    }

    pub fn record_ingest(&mut self, id: SubscriptionId, stored: bool, quality: Option<f64>) {
        if let Some(sub) = self.subscriptions.get_mut(&id) {
            sub.stats.total_received += 1;
            if stored {
                sub.stats.total_stored += 1;
            } else {
                sub.stats.total_dropped += 1;
            }
            if let Some(q) = quality {
                const ALPHA: f64 = 0.1;
                sub.stats.ema_quality += ALPHA * (q - sub.stats.ema_quality);
            }
        }
    }

    pub fn groups(&self) -> &HashMap<GroupId, SubscriptionGroup> {
        &self.groups
    }

    pub fn create_group(&mut self, members: Vec<SubscriptionId>) -> GroupId {
        let id = self.allocate_group_id();
        for member in &members {
            if let Some(sub) = self.subscriptions.get_mut(member) {
                sub.group = Some(id);
            }
        }
        self.groups.insert(id, SubscriptionGroup { id, members });
        id
    }

    pub fn ids_in_insertion_order(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<SubscriptionId> = self.subscriptions.keys().copied().collect();
        ids.sort_by_key(|id| id.0);
        ids
    }
}

/// Batch-subscribe over many configs, validating each with the rule
/// chain. In transactional mode, any failure rolls back subscriptions
/// already created in this batch.
pub fn batch_subscribe(
    manager: &mut SubscriptionManager,
    channel: &ChannelCapability,
    rules: &[ValidationRule],
    requests: Vec<(String, StreamConfig)>,
    options: BatchSubscribeOptions,
    now_ms: i64,
) -> Result<Vec<SubscriptionId>, Vec<String>> {
    let mut created = Vec::new();
    let mut errors = Vec::new();
    for (wire_id, mut config) in requests {
        let outcome = validate(&config, channel, rules);
        if !outcome.valid {
            errors.extend(outcome.errors);
            if options.fail_on_any_error || options.transactional {
                if options.transactional {
                    for id in created {
                        manager.remove(id);
                    }
                }
                return Err(errors);
            }
            continue;
        }
        if let Some(rate) = outcome.modifications.get("sample_rate_hz") {
            config.sample_rate_hz = rate.parse().ok();
        }
        created.push(manager.create(wire_id, config, None, None, now_ms));
    }
    if !errors.is_empty() && options.transactional {
        for id in created {
            manager.remove(id);
        }
        return Err(errors);
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_config(stream_id: &str, hz: f64) -> StreamConfig {
        StreamConfig {
            stream_id: stream_id.to_owned(),
            data_type: DataType::Numeric,
            buffer_size: 100,
            sample_rate_hz: Some(hz),
            decimation_factor: None,
            dimensions: None,
            min_value: None,
            max_value: None,
            units: None,
        }
    }

    fn channel(max_hz: f64, adaptive: bool) -> ChannelCapability {
        ChannelCapability {
            channel_id: "ch1".to_owned(),
            max_frequency_hz: max_hz,
            max_batch_size: 100,
            supported_protocols: vec![telemetry_wire::ProtocolKind::Json],
            adaptive_frequency: adaptive,
        }
    }

    /// S6: 500Hz request against 200Hz max, adaptive=true -> granted
    /// actualHz=200 with FREQUENCY_CAPPED warning.
    #[test]
    fn s6_validator_caps_frequency_and_warns() {
        let config = numeric_config("s6", 500.0);
        let ch = channel(200.0, true);
        let outcome = validate(&config, &ch, &default_rule_chain());
        assert!(outcome.valid);
        assert!(outcome.warnings.contains(&"FREQUENCY_CAPPED".to_owned()));
        assert_eq!(outcome.modifications.get("sample_rate_hz").unwrap(), "200");
    }

    #[test]
    fn non_adaptive_channel_rejects_excess_frequency() {
        let config = numeric_config("s6b", 500.0);
        let ch = channel(200.0, false);
        let outcome = validate(&config, &ch, &default_rule_chain());
        assert!(!outcome.valid);
        assert!(outcome.errors.contains(&"FREQUENCY_EXCEEDS_CHANNEL_MAX".to_owned()));
    }

    #[test]
    fn validation_fixed_point_modifications_applied_twice_match() {
        let config = numeric_config("fp", 500.0);
        let ch = channel(200.0, true);
        let first = validate(&config, &ch, &default_rule_chain());
        let mut modified = config.clone();
        modified.sample_rate_hz = first.modifications.get("sample_rate_hz").unwrap().parse().ok();
        let second = validate(&modified, &ch, &default_rule_chain());
        assert!(second.modifications.get("sample_rate_hz").is_none());
    }

    #[test]
    fn subscription_lifecycle_transitions() {
        let mut manager = SubscriptionManager::new();
        let id = manager.create("wire-1".into(), numeric_config("s", 10.0), None, None, 0);
        manager.activate(id);
        assert_eq!(manager.get(id).unwrap().state, SubscriptionState::Active);
        manager.pause(id);
        assert_eq!(manager.get(id).unwrap().state, SubscriptionState::Paused);
        manager.resume(id);
        assert_eq!(manager.get(id).unwrap().state, SubscriptionState::Active);
        manager.cancel(id);
        assert_eq!(manager.get(id).unwrap().state, SubscriptionState::Cancelled);
    }

    #[test]
    fn decimation_accepts_one_in_n() {
        let mut manager = SubscriptionManager::new();
        let mut config = numeric_config("dec", 10.0);
        config.decimation_factor = Some(3);
        let id = manager.create("wire-dec".into(), config, None, None, 0);
        manager.activate(id);
        let accepted: Vec<bool> = (0..6).map(|_| manager.should_ingest(id)).collect();
        assert_eq!(accepted, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn batch_subscribe_transactional_rolls_back_on_failure() {
        let mut manager = SubscriptionManager::new();
        let ch = channel(200.0, false);
        let requests = vec![
            ("w1".to_owned(), numeric_config("ok", 50.0)),
            ("w2".to_owned(), numeric_config("bad", 500.0)),
        ];
        let options = BatchSubscribeOptions { fail_on_any_error: false, transactional: true, max_concurrency: 1 };
        let result = batch_subscribe(&mut manager, &ch, &default_rule_chain(), requests, options, 0);
        assert!(result.is_err());
        assert_eq!(manager.ids_in_insertion_order().len(), 0);
    }

    #[test]
    fn resource_estimate_scales_with_rate_and_buffer_size() {
        let config = numeric_config("res", 100.0);
        let estimate = estimate_resources(&config);
        assert!(estimate.memory_bytes > 0);
        assert!(estimate.cpu_percent <= 50.0);
    }

    #[test]
    fn lifetime_expiry_without_auto_renew_marks_expired() {
        let mut manager = SubscriptionManager::new();
        let id = manager.create(
            "wire".into(),
            numeric_config("life", 1.0),
            None,
            Some(Lifetime { ttl_ms: Some(1000), expires_at: Some(1000), auto_renew: false, renew_interval_ms: None }),
            0,
        );
        assert!(!manager.check_lifetime(id, 1500));
        assert_eq!(manager.get(id).unwrap().state, SubscriptionState::Expired);
    }

    #[test]
    fn lifetime_expiry_with_auto_renew_requests_renewal_without_expiring() {
        let mut manager = SubscriptionManager::new();
        let id = manager.create(
            "wire".into(),
            numeric_config("life2", 1.0),
            None,
            Some(Lifetime { ttl_ms: Some(1000), expires_at: Some(1000), auto_renew: true, renew_interval_ms: Some(500) }),
            0,
        );
        assert!(manager.check_lifetime(id, 1500));
        assert_ne!(manager.get(id).unwrap().state, SubscriptionState::Expired);
    }
}
