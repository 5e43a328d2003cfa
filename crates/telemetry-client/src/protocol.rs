//! Protocol negotiation, per-protocol rolling metrics, and the
//! recommendation engine (spec §4.C).
//!
//! Grounded on the teacher's `uplink.rs` negotiation handshake (which
//! hardcodes a single format) generalized to the spec's intersection/
//! preference negotiation, plus a rolling-sample scorer modeled on the
//! buffer manager's own rolling-statistics shape (spec §4.I) since the
//! teacher has no equivalent metrics engine to generalize from.

use std::collections::VecDeque;

use telemetry_wire::ProtocolKind;

/// What this client can do, advertised during negotiation.
#[derive(Debug, Clone)]
pub struct ClientCapabilities {
    pub supported_protocols: Vec<ProtocolKind>,
    pub preferred_protocol: ProtocolKind,
    pub compression_supported: bool,
    pub compression_algorithms: Vec<&'static str>,
    pub binary_support: bool,
    pub streaming: bool,
    pub max_message_size: usize,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        ClientCapabilities {
            supported_protocols: ProtocolKind::all().to_vec(),
            preferred_protocol: ProtocolKind::Json,
            compression_supported: true,
            compression_algorithms: vec!["gzip", "deflate"],
            binary_support: true,
            streaming: true,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerAdvertisement {
    pub supported_protocols: Vec<ProtocolKind>,
    pub preferred_protocol: Option<ProtocolKind>,
    pub compression_supported: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NegotiationResult {
    pub selected_protocol: ProtocolKind,
    pub compression_enabled: bool,
}

/// Compute the intersection with server-advertised formats; pick the
/// client-preferred if present, else the server-preferred, else the first
/// common format in client-capability order. Compression is enabled only
/// when both sides support it.
pub fn negotiate(client: &ClientCapabilities, server: &ServerAdvertisement) -> Option<NegotiationResult> {
    let common: Vec<ProtocolKind> = client
        .supported_protocols
        .iter()
        .copied()
        .filter(|p| server.supported_protocols.contains(p))
        .collect();
    if common.is_empty() {
        return None;
    }
    let selected = if common.contains(&client.preferred_protocol) {
        client.preferred_protocol
    } else if let Some(server_pref) = server.preferred_protocol.filter(|p| common.contains(p)) {
        server_pref
    } else {
        common[0]
    };
    Some(NegotiationResult {
        selected_protocol: selected,
        compression_enabled: client.compression_supported && server.compression_supported,
    })
}

/// One observation fed into a protocol's rolling sample window.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolSample {
    pub encode_time_ms: f64,
    pub decode_time_ms: f64,
    pub bytes: usize,
    pub compressed: bool,
    pub error: bool,
}

const MAX_SAMPLES: usize = 1000;
const MIN_SAMPLES_FOR_RECOMMENDATION: usize = 50;

/// Recomputed summary over a protocol's rolling sample window, produced
/// every `performance.metricsInterval` (spec §4.C: "every 5s").
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolMetrics {
    pub min_encode_ms: f64,
    pub avg_encode_ms: f64,
    pub p95_encode_ms: f64,
    pub p99_encode_ms: f64,
    pub compression_ratio: f64,
    pub throughput_bytes_per_sec: f64,
    pub error_rate: f64,
    pub sample_count: usize,
}

/// Weights from spec §4.C's scoring formula.
pub struct ScoreWeights {
    pub latency: f64,
    pub throughput: f64,
    pub size: f64,
    pub error: f64,
}

pub const DEFAULT_SCORE_WEIGHTS: ScoreWeights = ScoreWeights {
    latency: 0.3,
    throughput: 0.3,
    size: 0.2,
    error: 0.2,
};

/// Threshold an alternative protocol's score must exceed the current
/// protocol's score by, before a recommendation fires.
pub const RECOMMENDATION_SCORE_MULTIPLIER: f64 = 1.2;

/// Auto-switch fires only once confidence reaches this bound. Named per
/// spec §9's "preserve it as a named constant but permit replacement
/// without changing callers".
pub const AUTO_SWITCH_CONFIDENCE_THRESHOLD: f64 = 0.85;

pub struct ProtocolRollingStats {
    samples: VecDeque<ProtocolSample>,
}

impl ProtocolRollingStats {
    pub fn new() -> Self {
        ProtocolRollingStats { samples: VecDeque::with_capacity(MAX_SAMPLES) }
    }

    pub fn record(&mut self, sample: ProtocolSample) {
        if self.samples.len() == MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn recompute(&self) -> ProtocolMetrics {
        if self.samples.is_empty() {
            return ProtocolMetrics::default();
        }
        let mut encode_times: Vec<f64> = self.samples.iter().map(|s| s.encode_time_ms).collect();
        encode_times.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let n = encode_times.len();
        let percentile = |p: f64| encode_times[((n - 1) as f64 * p).round() as usize];

        let total_bytes: usize = self.samples.iter().map(|s| s.bytes).sum();
        let compressed_count = self.samples.iter().filter(|s| s.compressed).count();
        let errors = self.samples.iter().filter(|s| s.error).count();
        let total_time_s: f64 = self.samples.iter().map(|s| (s.encode_time_ms + s.decode_time_ms) / 1000.0).sum();

        ProtocolMetrics {
            min_encode_ms: encode_times[0],
            avg_encode_ms: encode_times.iter().sum::<f64>() / n as f64,
            p95_encode_ms: percentile(0.95),
            p99_encode_ms: percentile(0.99),
            compression_ratio: if compressed_count > 0 { compressed_count as f64 / n as f64 } else { 0.0 },
            throughput_bytes_per_sec: if total_time_s > 0.0 { total_bytes as f64 / total_time_s } else { 0.0 },
            error_rate: errors as f64 / n as f64,
            sample_count: n,
        }
    }
}

impl Default for ProtocolRollingStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Lower is better for latency/size/error; higher is better for
/// throughput. Normalize by inversion so every term increases with score.
fn score(metrics: &ProtocolMetrics, weights: &ScoreWeights) -> f64 {
    let latency_term = weights.latency / (1.0 + metrics.avg_encode_ms.max(0.0));
    let throughput_term = weights.throughput * (metrics.throughput_bytes_per_sec / 1_000_000.0).min(1.0);
    let size_term = weights.size / (1.0 + metrics.compression_ratio.max(0.0));
    let error_term = weights.error * (1.0 - metrics.error_rate.min(1.0));
    latency_term + throughput_term + size_term + error_term
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtocolRecommendation {
    pub recommended: ProtocolKind,
    pub current: ProtocolKind,
    pub confidence: f64,
    pub auto_switch: bool,
}

/// Compare `current`'s metrics against every alternative in `others` and
/// return a recommendation if one alternative scores above the
/// [`RECOMMENDATION_SCORE_MULTIPLIER`] threshold with enough samples.
pub fn recommend(
    current: ProtocolKind,
    current_metrics: &ProtocolMetrics,
    others: &[(ProtocolKind, ProtocolMetrics)],
    weights: &ScoreWeights,
    auto_switch_enabled: bool,
) -> Option<ProtocolRecommendation> {
    let current_score = score(current_metrics, weights);
    let mut best: Option<(ProtocolKind, f64, usize)> = None;
    for (protocol, metrics) in others {
        if metrics.sample_count < MIN_SAMPLES_FOR_RECOMMENDATION {
            continue;
        }
        let candidate_score = score(metrics, weights);
        if candidate_score > current_score * RECOMMENDATION_SCORE_MULTIPLIER {
            if best.map_or(true, |(_, s, _)| candidate_score > s) {
                best = Some((*protocol, candidate_score, metrics.sample_count));
            }
        }
    }
    best.map(|(protocol, _, sample_count)| {
        let confidence = (sample_count as f64 / MAX_SAMPLES as f64).min(0.9);
        ProtocolRecommendation {
            recommended: protocol,
            current,
            confidence,
            auto_switch: auto_switch_enabled && confidence >= AUTO_SWITCH_CONFIDENCE_THRESHOLD,
        }
    })
}

/// Per-message-type protocol hints (spec §4.C: "per-message-type hints
/// override scoring"), e.g. always prefer MessagePack for high-rate
/// telemetry frames regardless of the recommendation engine's verdict.
#[derive(Default)]
pub struct MessageTypeHints {
    hints: std::collections::HashMap<telemetry_wire::MessageType, ProtocolKind>,
}

impl MessageTypeHints {
    pub fn set(&mut self, message_type: telemetry_wire::MessageType, protocol: ProtocolKind) {
        self.hints.insert(message_type, protocol);
    }

    pub fn resolve(&self, message_type: telemetry_wire::MessageType, negotiated: ProtocolKind) -> ProtocolKind {
        self.hints.get(&message_type).copied().unwrap_or(negotiated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_prefers_client_preference_when_in_intersection() {
        let client = ClientCapabilities {
            preferred_protocol: ProtocolKind::MessagePack,
            ..Default::default()
        };
        let server = ServerAdvertisement {
            supported_protocols: vec![ProtocolKind::Json, ProtocolKind::MessagePack],
            preferred_protocol: Some(ProtocolKind::Json),
            compression_supported: true,
        };
        let result = negotiate(&client, &server).unwrap();
        assert_eq!(result.selected_protocol, ProtocolKind::MessagePack);
        assert!(result.compression_enabled);
    }

    #[test]
    fn negotiate_falls_back_to_server_preference() {
        let client = ClientCapabilities {
            preferred_protocol: ProtocolKind::Cbor,
            supported_protocols: vec![ProtocolKind::Json, ProtocolKind::MessagePack],
            ..Default::default()
        };
        let server = ServerAdvertisement {
            supported_protocols: vec![ProtocolKind::Json, ProtocolKind::MessagePack],
            preferred_protocol: Some(ProtocolKind::MessagePack),
            compression_supported: false,
        };
        let result = negotiate(&client, &server).unwrap();
        assert_eq!(result.selected_protocol, ProtocolKind::MessagePack);
        assert!(!result.compression_enabled);
    }

    #[test]
    fn negotiate_returns_none_without_common_protocol() {
        let client = ClientCapabilities {
            supported_protocols: vec![ProtocolKind::Cbor],
            ..Default::default()
        };
        let server = ServerAdvertisement {
            supported_protocols: vec![ProtocolKind::Json],
            preferred_protocol: None,
            compression_supported: true,
        };
        assert!(negotiate(&client, &server).is_none());
    }

    #[test]
    fn rolling_stats_caps_at_max_samples() {
        let mut stats = ProtocolRollingStats::new();
        for i in 0..(MAX_SAMPLES + 10) {
            stats.record(ProtocolSample {
                encode_time_ms: i as f64,
                decode_time_ms: 1.0,
                bytes: 100,
                compressed: false,
                error: false,
            });
        }
        assert_eq!(stats.len(), MAX_SAMPLES);
    }

    #[test]
    fn recommendation_requires_minimum_samples() {
        let mut fast = ProtocolRollingStats::new();
        for _ in 0..10 {
            fast.record(ProtocolSample { encode_time_ms: 0.1, decode_time_ms: 0.1, bytes: 10, compressed: false, error: false });
        }
        let mut slow = ProtocolRollingStats::new();
        for _ in 0..200 {
            slow.record(ProtocolSample { encode_time_ms: 50.0, decode_time_ms: 50.0, bytes: 10, compressed: false, error: false });
        }
        let rec = recommend(
            ProtocolKind::Json,
            &slow.recompute(),
            &[(ProtocolKind::MessagePack, fast.recompute())],
            &DEFAULT_SCORE_WEIGHTS,
            true,
        );
        assert!(rec.is_none(), "candidate has too few samples to recommend");
    }

    #[test]
    fn recommendation_fires_when_alternative_is_clearly_better() {
        let mut current = ProtocolRollingStats::new();
        for _ in 0..100 {
            current.record(ProtocolSample { encode_time_ms: 50.0, decode_time_ms: 50.0, bytes: 1000, compressed: false, error: true });
        }
        let mut alt = ProtocolRollingStats::new();
        for _ in 0..100 {
            alt.record(ProtocolSample { encode_time_ms: 1.0, decode_time_ms: 1.0, bytes: 1000, compressed: true, error: false });
        }
        let rec = recommend(
            ProtocolKind::Json,
            &current.recompute(),
            &[(ProtocolKind::MessagePack, alt.recompute())],
            &DEFAULT_SCORE_WEIGHTS,
            true,
        )
        .expect("alternative should be recommended");
        assert_eq!(rec.recommended, ProtocolKind::MessagePack);
        assert!(rec.confidence <= 0.9);
    }

    #[test]
    fn message_type_hint_overrides_negotiated_protocol() {
        let mut hints = MessageTypeHints::default();
        hints.set(telemetry_wire::MessageType::Telemetry, ProtocolKind::MessagePack);
        assert_eq!(
            hints.resolve(telemetry_wire::MessageType::Telemetry, ProtocolKind::Json),
            ProtocolKind::MessagePack
        );
        assert_eq!(hints.resolve(telemetry_wire::MessageType::Command, ProtocolKind::Json), ProtocolKind::Json);
    }
}
