//! Transport abstraction: a primary duplex stream with a long-poll
//! fallback, quality scoring, and auto-switch (spec §4.G).
//!
//! Grounded on the teacher's `services/forwarder/src/uplink.rs`
//! (`UplinkSession::connect`/`send_ws_message`/`recv_ws_message` over
//! `tokio_tungstenite`), generalized behind a [`Transport`] trait so a
//! [`TransportManager`] can hold either implementation and switch between
//! them without the rest of the client caring which is active.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

use crate::error::{ClientError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityLabel {
    Excellent,
    Good,
    Fair,
    Poor,
}

/// `excellent (<50ms AND err<1%)`, `good (<150/5%)`, `fair (<300/10%)`,
/// `poor` otherwise — spec §4.G.
pub fn classify_quality(avg_latency_ms: f64, error_rate: f64) -> QualityLabel {
    if avg_latency_ms < 50.0 && error_rate < 0.01 {
        QualityLabel::Excellent
    } else if avg_latency_ms < 150.0 && error_rate < 0.05 {
        QualityLabel::Good
    } else if avg_latency_ms < 300.0 && error_rate < 0.10 {
        QualityLabel::Fair
    } else {
        QualityLabel::Poor
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransportMetrics {
    pub sent_count: u64,
    pub received_count: u64,
    pub error_count: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub avg_latency_ms: f64,
    pub avg_bandwidth_bps: f64,
    pub compression_savings_bytes: u64,
}

impl TransportMetrics {
    pub fn error_rate(&self) -> f64 {
        let total = self.sent_count + self.received_count;
        if total == 0 { 0.0 } else { self.error_count as f64 / total as f64 }
    }

    pub fn quality(&self) -> QualityLabel {
        classify_quality(self.avg_latency_ms, self.error_rate())
    }
}

/// One wire-level duplex connection, abstracting over the primary
/// WebSocket and the long-poll fallback.
#[async_trait::async_trait]
pub trait Transport: Send {
    async fn send(&mut self, bytes: Vec<u8>) -> Result<(), ClientError>;
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, ClientError>;
    async fn close(&mut self) -> Result<(), ClientError>;
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Primary duplex transport over a persistent WebSocket, grounded on
/// `UplinkSession`.
pub struct PrimaryWsTransport {
    ws: WsStream,
}

impl PrimaryWsTransport {
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ClientError::new("TRANSPORT_CONNECT_FAILED", ErrorKind::Connection, true, e.to_string()))?;
        Ok(PrimaryWsTransport { ws })
    }

    /// Short-lived probe connection used to test primary availability
    /// while running on the fallback (spec §4.G: "3s budget").
    pub async fn probe(url: &str) -> bool {
        tokio::time::timeout(Duration::from_secs(3), Self::connect(url)).await.is_ok_and(|r| r.is_ok())
    }
}

#[async_trait::async_trait]
impl Transport for PrimaryWsTransport {
    async fn send(&mut self, bytes: Vec<u8>) -> Result<(), ClientError> {
        self.ws
            .send(WsMessage::Binary(bytes.into()))
            .await
            .map_err(|e| ClientError::new("TRANSPORT_SEND_FAILED", ErrorKind::Transport, true, e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, ClientError> {
        match self.ws.next().await {
            Some(Ok(WsMessage::Binary(bytes))) => Ok(Some(bytes.to_vec())),
            Some(Ok(WsMessage::Text(text))) => Ok(Some(text.as_bytes().to_vec())),
            Some(Ok(WsMessage::Close(_))) | None => Ok(None),
            Some(Ok(_)) => Ok(Some(Vec::new())),
            Some(Err(e)) => Err(ClientError::new("TRANSPORT_RECV_FAILED", ErrorKind::Transport, true, e.to_string())),
        }
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.ws
            .close(None)
            .await
            .map_err(|e| ClientError::new("TRANSPORT_CLOSE_FAILED", ErrorKind::Transport, false, e.to_string()))
    }
}

/// HTTP long-polling fallback per spec §6's fallback endpoints.
pub struct LongPollTransport {
    client: reqwest::Client,
    base_url: String,
    session_id: Option<String>,
    poll_timeout: Duration,
}

impl LongPollTransport {
    pub fn new(base_url: impl Into<String>, poll_timeout: Duration) -> Self {
        LongPollTransport {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            session_id: None,
            poll_timeout,
        }
    }

    pub async fn open_session(&mut self) -> Result<(), ClientError> {
        #[derive(serde::Deserialize)]
        struct SessionResponse {
            session_id: String,
        }
        let resp: SessionResponse = self
            .client
            .post(format!("{}/api/fallback/session", self.base_url))
            .send()
            .await
            .map_err(|e| ClientError::new("FALLBACK_SESSION_FAILED", ErrorKind::Transport, true, e.to_string()))?
            .json()
            .await
            .map_err(|e| ClientError::new("FALLBACK_SESSION_FAILED", ErrorKind::Transport, true, e.to_string()))?;
        self.session_id = Some(resp.session_id);
        Ok(())
    }

    pub async fn close_session(&mut self) -> Result<(), ClientError> {
        if let Some(session_id) = self.session_id.take() {
            self.client
                .delete(format!("{}/api/fallback/session/{session_id}", self.base_url))
                .send()
                .await
                .map_err(|e| ClientError::new("FALLBACK_SESSION_CLOSE_FAILED", ErrorKind::Transport, false, e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for LongPollTransport {
    async fn send(&mut self, bytes: Vec<u8>) -> Result<(), ClientError> {
        let session_id = self
            .session_id
            .clone()
            .ok_or_else(|| ClientError::new("FALLBACK_NOT_OPEN", ErrorKind::Transport, false, "no fallback session"))?;
        #[derive(serde::Serialize)]
        struct SendBody {
            session_id: String,
            payload: Vec<u8>,
        }
        self.client
            .post(format!("{}/api/fallback/send", self.base_url))
            .json(&SendBody { session_id, payload: bytes })
            .send()
            .await
            .map_err(|e| ClientError::new("FALLBACK_SEND_FAILED", ErrorKind::Transport, true, e.to_string()))?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, ClientError> {
        let session_id = self
            .session_id
            .clone()
            .ok_or_else(|| ClientError::new("FALLBACK_NOT_OPEN", ErrorKind::Transport, false, "no fallback session"))?;
        #[derive(serde::Serialize)]
        struct PollBody {
            session_id: String,
            last_message_id: Option<String>,
            timeout: u64,
        }
        #[derive(serde::Deserialize)]
        struct PollResponse {
            messages: Vec<Vec<u8>>,
        }
        let resp: PollResponse = self
            .client
            .post(format!("{}/api/fallback/poll", self.base_url))
            .json(&PollBody { session_id, last_message_id: None, timeout: self.poll_timeout.as_millis() as u64 })
            .send()
            .await
            .map_err(|e| ClientError::new("FALLBACK_POLL_FAILED", ErrorKind::Transport, true, e.to_string()))?
            .json()
            .await
            .map_err(|e| ClientError::new("FALLBACK_POLL_FAILED", ErrorKind::Transport, true, e.to_string()))?;
        Ok(resp.messages.into_iter().next())
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.close_session().await
    }
}

/// Owns the active transport, per-transport metrics, and the
/// primary/fallback switching policy.
pub struct TransportManager {
    primary_metrics: TransportMetrics,
    fallback_metrics: TransportMetrics,
    using_fallback: bool,
}

impl Default for TransportManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportManager {
    pub fn new() -> Self {
        TransportManager {
            primary_metrics: TransportMetrics::default(),
            fallback_metrics: TransportMetrics::default(),
            using_fallback: false,
        }
    }

    pub fn using_fallback(&self) -> bool {
        self.using_fallback
    }

    pub fn active_metrics(&self) -> &TransportMetrics {
        if self.using_fallback { &self.fallback_metrics } else { &self.primary_metrics }
    }

    pub fn record_send(&mut self, bytes: usize, latency_ms: f64, failed: bool) {
        let metrics = if self.using_fallback { &mut self.fallback_metrics } else { &mut self.primary_metrics };
        metrics.sent_count += 1;
        metrics.bytes_sent += bytes as u64;
        if failed {
            metrics.error_count += 1;
        }
        const ALPHA: f64 = 0.2;
        metrics.avg_latency_ms += ALPHA * (latency_ms - metrics.avg_latency_ms);
    }

    /// Should the manager fall back, given primary failed or sustained
    /// poor quality?
    pub fn should_fall_back(&self, primary_failed: bool) -> bool {
        !self.using_fallback && (primary_failed || self.primary_metrics.quality() == QualityLabel::Poor)
    }

    pub fn switch_to_fallback(&mut self) {
        self.using_fallback = true;
    }

    pub fn switch_to_primary(&mut self) {
        self.using_fallback = false;
    }
}
