//! Configuration surface (spec §6), loaded from TOML.
//!
//! Follows the teacher's two-layer `Raw*Config`/`*Config` pattern (see
//! `services/forwarder`'s config module): every field is optional in the
//! `Raw*` layer so a partial TOML file is legal, and the public `*Config`
//! fills in defaults and rejects contradictory values at construction
//! time rather than scattering `unwrap_or` calls through the rest of the
//! crate.

use std::time::Duration;

use serde::Deserialize;

use crate::reconnect::{BackoffStrategy, JitterMode, ReconnectConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawConnectionConfig {
    url: Option<String>,
    reconnect: Option<bool>,
    reconnect_attempts: Option<u32>,
    reconnect_delay: Option<u64>,
    reconnect_delay_max: Option<u64>,
    randomization_factor: Option<f64>,
    timeout: Option<u64>,
    heartbeat_interval: Option<u64>,
    heartbeat_timeout: Option<u64>,
    protocols: Option<Vec<String>>,
    compression: Option<bool>,
    debug: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    pub reconnect: bool,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub reconnect_delay_max_ms: u64,
    pub randomization_factor: f64,
    pub timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub protocols: Vec<String>,
    pub compression: bool,
    pub debug: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawAuthConfig {
    enabled: Option<bool>,
    token_refresh_threshold: Option<u64>,
    auto_refresh: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    pub token_refresh_threshold: Duration,
    pub auto_refresh: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawQueueConfig {
    max_size: Option<usize>,
    persist_offline: Option<bool>,
    priority_enabled: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_size: usize,
    pub persist_offline: bool,
    pub priority_enabled: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawPerformanceConfig {
    enable_metrics: Option<bool>,
    metrics_interval: Option<u64>,
    latency_threshold: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct PerformanceConfig {
    pub enable_metrics: bool,
    pub metrics_interval_ms: u64,
    pub latency_threshold_ms: f64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawReconnectionConfig {
    strategy: Option<String>,
    base_delay: Option<u64>,
    max_delay: Option<u64>,
    max_attempts: Option<u32>,
    factor: Option<f64>,
    jitter_type: Option<String>,
    jitter_factor: Option<f64>,
    reset_timeout: Option<u64>,
    circuit_breaker_threshold: Option<u32>,
    circuit_breaker_timeout: Option<u64>,
    enable_telemetry: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawAlertsConfig {
    batch_size: Option<usize>,
    batch_timeout: Option<u64>,
    compression_threshold: Option<usize>,
    max_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
    sync_interval: Option<u64>,
    acknowledgment_timeout: Option<u64>,
    resync_on_reconnect: Option<bool>,
    subscribed_priorities: Option<Vec<String>>,
    auto_acknowledge_info: Option<bool>,
    adaptive_batching: Option<bool>,
    low_latency_threshold: Option<f64>,
    high_latency_threshold: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct AlertsConfig {
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub compression_threshold: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub sync_interval_ms: u64,
    pub acknowledgment_timeout_ms: u64,
    pub resync_on_reconnect: bool,
    pub subscribed_priorities: Vec<String>,
    pub auto_acknowledge_info: bool,
    pub adaptive_batching: bool,
    pub low_latency_threshold_ms: f64,
    pub high_latency_threshold_ms: f64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawBufferingConfig {
    enabled: Option<bool>,
    default_window_ms: Option<u64>,
    default_overflow_strategy: Option<String>,
    default_flush_triggers: Option<Vec<String>>,
    enable_persistence: Option<bool>,
    enable_statistics: Option<bool>,
    statistics_interval: Option<u64>,
    auto_optimize: Option<bool>,
    memory_limit: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct BufferingConfig {
    pub enabled: bool,
    pub default_window_ms: u64,
    pub default_overflow_strategy: crate::buffer::OverflowStrategy,
    pub default_flush_triggers: Vec<crate::buffer::FlushTrigger>,
    pub enable_persistence: bool,
    pub enable_statistics: bool,
    pub statistics_interval_ms: u64,
    pub auto_optimize: bool,
    pub memory_limit_bytes: u64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawClientConfig {
    connection: Option<RawConnectionConfig>,
    auth: Option<RawAuthConfig>,
    queue: Option<RawQueueConfig>,
    performance: Option<RawPerformanceConfig>,
    reconnection: Option<RawReconnectionConfig>,
    alerts: Option<RawAlertsConfig>,
    buffering: Option<RawBufferingConfig>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    pub auth: AuthConfig,
    pub queue: QueueConfig,
    pub performance: PerformanceConfig,
    pub reconnection: ReconnectConfig,
    pub alerts: AlertsConfig,
    pub buffering: BufferingConfig,
}

fn parse_strategy(s: &str) -> Result<BackoffStrategy, ConfigError> {
    match s {
        "constant" => Ok(BackoffStrategy::Constant),
        "linear" => Ok(BackoffStrategy::Linear),
        "exponential" => Ok(BackoffStrategy::Exponential),
        "fibonacci" => Ok(BackoffStrategy::Fibonacci),
        other => Err(ConfigError::Invalid(format!("unknown reconnection strategy: {other}"))),
    }
}

fn parse_jitter(s: &str) -> Result<JitterMode, ConfigError> {
    match s {
        "none" => Ok(JitterMode::None),
        "full" => Ok(JitterMode::Full),
        "equal" => Ok(JitterMode::Equal),
        "decorrelated" => Ok(JitterMode::Decorrelated),
        other => Err(ConfigError::Invalid(format!("unknown jitter type: {other}"))),
    }
}

fn parse_overflow_strategy(s: &str) -> Result<crate::buffer::OverflowStrategy, ConfigError> {
    use crate::buffer::OverflowStrategy as O;
    match s {
        "fifo" => Ok(O::Fifo),
        "drop_oldest" => Ok(O::DropOldest),
        "drop_newest" => Ok(O::DropNewest),
        "downsample" => Ok(O::Downsample),
        "priority_based" => Ok(O::PriorityBased),
        "adaptive" => Ok(O::Adaptive),
        other => Err(ConfigError::Invalid(format!("unknown overflow strategy: {other}"))),
    }
}

fn parse_flush_trigger(s: &str) -> Result<crate::buffer::FlushTrigger, ConfigError> {
    use crate::buffer::FlushTrigger as T;
    match s {
        "time_interval" => Ok(T::TimeInterval),
        "buffer_full" => Ok(T::BufferFull),
        "data_count" => Ok(T::DataCount),
        "quality_threshold" => Ok(T::QualityThreshold),
        "manual" => Ok(T::Manual),
        "connection_state" => Ok(T::ConnectionState),
        other => Err(ConfigError::Invalid(format!("unknown flush trigger: {other}"))),
    }
}

impl ClientConfig {
    /// Parse a TOML document and fill in defaults for any namespace or
    /// field left unspecified.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let raw: RawClientConfig = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawClientConfig) -> Result<Self, ConfigError> {
        let c = raw.connection.unwrap_or_default();
        let connection = ConnectionConfig {
            url: c.url.ok_or_else(|| ConfigError::Invalid("connection.url is required".to_owned()))?,
            reconnect: c.reconnect.unwrap_or(true),
            reconnect_attempts: c.reconnect_attempts.unwrap_or(10),
            reconnect_delay_ms: c.reconnect_delay.unwrap_or(100),
            reconnect_delay_max_ms: c.reconnect_delay_max.unwrap_or(30_000),
            randomization_factor: c.randomization_factor.unwrap_or(0.5),
            timeout_ms: c.timeout.unwrap_or(10_000),
            heartbeat_interval_ms: c.heartbeat_interval.unwrap_or(15_000),
            heartbeat_timeout_ms: c.heartbeat_timeout.unwrap_or(5_000),
            protocols: c.protocols.unwrap_or_else(|| vec!["json".into(), "messagepack".into(), "cbor".into()]),
            compression: c.compression.unwrap_or(true),
            debug: c.debug.unwrap_or(false),
        };

        let a = raw.auth.unwrap_or_default();
        let auth = AuthConfig {
            enabled: a.enabled.unwrap_or(false),
            token_refresh_threshold: Duration::from_secs(a.token_refresh_threshold.unwrap_or(60)),
            auto_refresh: a.auto_refresh.unwrap_or(true),
        };

        let q = raw.queue.unwrap_or_default();
        let queue = QueueConfig {
            max_size: q.max_size.unwrap_or(10_000),
            persist_offline: q.persist_offline.unwrap_or(true),
            priority_enabled: q.priority_enabled.unwrap_or(true),
        };

        let p = raw.performance.unwrap_or_default();
        let performance = PerformanceConfig {
            enable_metrics: p.enable_metrics.unwrap_or(true),
            metrics_interval_ms: p.metrics_interval.unwrap_or(5_000),
            latency_threshold_ms: p.latency_threshold.unwrap_or(150.0),
        };

        let r = raw.reconnection.unwrap_or_default();
        let reconnection = ReconnectConfig {
            strategy: r.strategy.as_deref().map(parse_strategy).transpose()?.unwrap_or(BackoffStrategy::Exponential),
            base_delay: Duration::from_millis(r.base_delay.unwrap_or(100)),
            max_delay: Duration::from_millis(r.max_delay.unwrap_or(30_000)),
            max_attempts: r.max_attempts.unwrap_or(10),
            factor: r.factor.unwrap_or(2.0),
            jitter_type: r.jitter_type.as_deref().map(parse_jitter).transpose()?.unwrap_or(JitterMode::Full),
            jitter_factor: r.jitter_factor.unwrap_or(1.0),
            reset_timeout: Duration::from_millis(r.reset_timeout.unwrap_or(60_000)),
            circuit_breaker_threshold: r.circuit_breaker_threshold.unwrap_or(5),
            circuit_breaker_timeout: Duration::from_millis(r.circuit_breaker_timeout.unwrap_or(30_000)),
        };

        let al = raw.alerts.unwrap_or_default();
        let alerts = AlertsConfig {
            batch_size: al.batch_size.unwrap_or(20),
            batch_timeout_ms: al.batch_timeout.unwrap_or(2_000),
            compression_threshold: al.compression_threshold.unwrap_or(512),
            max_retries: al.max_retries.unwrap_or(3),
            retry_backoff_ms: al.retry_backoff_ms.unwrap_or(500),
            sync_interval_ms: al.sync_interval.unwrap_or(60_000),
            acknowledgment_timeout_ms: al.acknowledgment_timeout.unwrap_or(10_000),
            resync_on_reconnect: al.resync_on_reconnect.unwrap_or(true),
            subscribed_priorities: al.subscribed_priorities.unwrap_or_else(|| {
                vec!["critical".into(), "high".into(), "medium".into(), "low".into(), "info".into()]
            }),
            auto_acknowledge_info: al.auto_acknowledge_info.unwrap_or(true),
            adaptive_batching: al.adaptive_batching.unwrap_or(true),
            low_latency_threshold_ms: al.low_latency_threshold.unwrap_or(50.0),
            high_latency_threshold_ms: al.high_latency_threshold.unwrap_or(300.0),
        };

        let b = raw.buffering.unwrap_or_default();
        let default_flush_triggers = b
            .default_flush_triggers
            .unwrap_or_else(|| vec!["time_interval".into(), "buffer_full".into()])
            .iter()
            .map(|s| parse_flush_trigger(s))
            .collect::<Result<Vec<_>, _>>()?;
        let buffering = BufferingConfig {
            enabled: b.enabled.unwrap_or(true),
            default_window_ms: b.default_window_ms.unwrap_or(200),
            default_overflow_strategy: b
                .default_overflow_strategy
                .as_deref()
                .map(parse_overflow_strategy)
                .transpose()?
                .unwrap_or(crate::buffer::OverflowStrategy::Fifo),
            default_flush_triggers,
            enable_persistence: b.enable_persistence.unwrap_or(true),
            enable_statistics: b.enable_statistics.unwrap_or(true),
            statistics_interval_ms: b.statistics_interval.unwrap_or(5_000),
            auto_optimize: b.auto_optimize.unwrap_or(false),
            memory_limit_bytes: b.memory_limit.unwrap_or(100 * 1024 * 1024),
        };

        Ok(ClientConfig { connection, auth, queue, performance, reconnection, alerts, buffering })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_in_defaults() {
        let cfg = ClientConfig::from_toml("[connection]\nurl = \"wss://example.com\"\n").unwrap();
        assert_eq!(cfg.connection.url, "wss://example.com");
        assert_eq!(cfg.reconnection.max_attempts, 10);
        assert!(cfg.alerts.auto_acknowledge_info);
        assert_eq!(cfg.buffering.default_window_ms, 200);
    }

    #[test]
    fn missing_url_is_rejected() {
        let err = ClientConfig::from_toml("[connection]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn full_config_round_trips_fields() {
        let toml = r#"
            [connection]
            url = "wss://example.com"
            reconnectAttempts = 5

            [reconnection]
            strategy = "fibonacci"
            jitterType = "decorrelated"

            [buffering]
            defaultOverflowStrategy = "downsample"
        "#;
        let cfg = ClientConfig::from_toml(toml).unwrap();
        assert_eq!(cfg.connection.reconnect_attempts, 5);
        assert_eq!(cfg.reconnection.strategy, BackoffStrategy::Fibonacci);
        assert_eq!(cfg.reconnection.jitter_type, JitterMode::Decorrelated);
        assert_eq!(cfg.buffering.default_overflow_strategy, crate::buffer::OverflowStrategy::Downsample);
    }
}
