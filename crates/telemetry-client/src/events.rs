//! The closed set of events published on the [`crate::event_bus::EventBus`].
//!
//! One enum rather than per-component generics: spec §9 calls for "a typed
//! publish/subscribe abstraction" but the bus itself serves every
//! component (connection, protocol manager, buffer manager, ...), so a
//! single tagged union keeps the bus non-generic while still giving
//! listeners a typed payload to match on.

use telemetry_wire::ProtocolKind;

use crate::buffer::{BufferHealth, FlushEvent};
use crate::connection::ConnectionState;
use crate::error::ClientError;
use crate::protocol::ProtocolRecommendation;
use crate::reconnect::CircuitState;

#[derive(Debug, Clone)]
pub enum Event {
    /// Connection state machine transitioned.
    StateChanged { from: ConnectionState, to: ConnectionState },
    /// A typed client error occurred.
    ErrorRaised(std::sync::Arc<ClientError>),
    /// Heartbeat monitor detected degraded or recovered liveness.
    HealthChanged { healthy: bool, consecutive_misses: u32 },
    /// Protocol manager recommends (or auto-switched to) a different wire format.
    ProtocolRecommended(ProtocolRecommendation),
    ProtocolSwitched { from: ProtocolKind, to: ProtocolKind },
    /// Reconnection circuit breaker transitioned.
    CircuitChanged { from: CircuitState, to: CircuitState },
    /// Outbound queue crossed a backpressure watermark.
    Backpressure { active: bool, queue_size: usize },
    /// A queued message was permanently dropped.
    MessageDropped { id: String, reason: String },
    /// A stream buffer flushed.
    BufferFlushed(FlushEvent),
    /// A stream buffer's computed health score crossed the warning threshold.
    BufferHealthWarning { stream_id: String, health: BufferHealth },
    /// A subscription transitioned lifecycle state.
    SubscriptionStateChanged { stream_id: String, state: String },
    /// Alert received from the server (after routing/auto-ack).
    AlertReceived { alert_id: String },
    /// Transport switched between primary and fallback.
    TransportSwitched { to_fallback: bool, reason: String },
    /// Free-form event for application extensions / tests.
    Custom(String),
}
