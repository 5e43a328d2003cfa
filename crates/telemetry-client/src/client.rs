//! Client facade (spec §4.L): constructs and wires components A-K and
//! exposes the public `connect`/`disconnect`/`reconnect`/`send_message`
//! surface plus a `status()` introspection snapshot.
//!
//! Grounded on the teacher's `services/forwarder/src/main.rs` top-level
//! wiring (uplink session + journal + batching loop constructed together
//! and driven by one `tokio::select!`), generalized to the much larger
//! component set this spec names. Graceful shutdown follows the same
//! `watch::Sender<bool>` broadcast the teacher uses for its forwarder
//! main loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch, Mutex};

use telemetry_wire::{Message, MessageType, Priority, ProtocolKind};

use crate::alert::{AlertConfig, AlertPipeline};
use crate::buffer::BufferManager;
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::connection::{ConnectionEvent, ConnectionMachine, ConnectionState, ConnectionStatus};
use crate::error::{ClientError, ErrorKind};
use crate::event_bus::EventBus;
use crate::events::Event;
use crate::heartbeat::HeartbeatMonitor;
use crate::kv_store::KvStore;
use crate::outbound::{OutboundQueue, QueuedMessage};
use crate::protocol::ClientCapabilities;
use crate::reconnect::ReconnectScheduler;
use crate::subscription::SubscriptionManager;

/// A pending request awaiting a correlated reply (ack, sync response),
/// per spec §9: "a table of `{operationId -> resolver}` with a
/// guaranteed-release scope on every exit path".
type PendingOps = Mutex<HashMap<String, oneshot::Sender<Result<serde_json::Value, ClientError>>>>;

#[derive(Debug, Clone)]
pub struct ClientStatus {
    pub connection: ConnectionStatus,
    pub negotiated_protocol: Option<ProtocolKind>,
    pub queue_size: usize,
    pub subscription_count: usize,
    pub circuit_state: crate::reconnect::CircuitState,
}

/// Assembles components A-K (spec §4.L). Generic over the transport send
/// function so production code and tests can swap in a
/// [`crate::test_support::MockTransport`]-backed sender without the
/// facade depending on a concrete transport type.
pub struct ClientFacade {
    config: ClientConfig,
    clock: Arc<dyn Clock>,
    event_bus: Arc<EventBus>,
    connection: Mutex<ConnectionMachine>,
    reconnect: Mutex<ReconnectScheduler>,
    heartbeat: Mutex<HeartbeatMonitor>,
    outbound: Mutex<OutboundQueue>,
    buffers: Mutex<BufferManager>,
    subscriptions: Mutex<SubscriptionManager>,
    alerts: Mutex<AlertPipeline>,
    capabilities: ClientCapabilities,
    store: Option<Arc<dyn KvStore>>,
    pending_ops: PendingOps,
    next_message_id: AtomicU64,
    shutdown: watch::Sender<bool>,
    manual_disconnect: std::sync::atomic::AtomicBool,
}

impl ClientFacade {
    pub fn new(config: ClientConfig, store: Option<Arc<dyn KvStore>>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let alert_config = AlertConfig {
            batch_size: config.alerts.batch_size,
            batch_timeout_ms: config.alerts.batch_timeout_ms,
            max_retries: config.alerts.max_retries,
            retry_backoff_ms: config.alerts.retry_backoff_ms,
            acknowledgment_timeout_ms: config.alerts.acknowledgment_timeout_ms,
            resync_on_reconnect: config.alerts.resync_on_reconnect,
            auto_acknowledge_info: config.alerts.auto_acknowledge_info,
            adaptive_batching: config.alerts.adaptive_batching,
            low_latency_threshold_ms: config.alerts.low_latency_threshold_ms,
            high_latency_threshold_ms: config.alerts.high_latency_threshold_ms,
        };
        let token_refresh_threshold = config.auth.token_refresh_threshold;
        let high_watermark = config.queue.max_size * 9 / 10;
        let low_watermark = config.queue.max_size / 2;
        ClientFacade {
            connection: Mutex::new(ConnectionMachine::new(token_refresh_threshold)),
            reconnect: Mutex::new(ReconnectScheduler::new(config.reconnection.clone())),
            heartbeat: Mutex::new(HeartbeatMonitor::new(3)),
            outbound: Mutex::new(OutboundQueue::new(high_watermark, low_watermark)),
            buffers: Mutex::new(BufferManager::new()),
            subscriptions: Mutex::new(SubscriptionManager::new()),
            alerts: Mutex::new(AlertPipeline::new(alert_config)),
            capabilities: ClientCapabilities::default(),
            store,
            pending_ops: Mutex::new(HashMap::new()),
            next_message_id: AtomicU64::new(0),
            shutdown,
            manual_disconnect: std::sync::atomic::AtomicBool::new(false),
            config,
            clock: Arc::new(SystemClock),
            event_bus: Arc::new(EventBus::default()),
        }
    }

    /// Swap in a test clock (e.g. [`crate::test_support::ManualClock`]).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    async fn apply_connection_event(&self, event: ConnectionEvent) -> Result<ConnectionState, ClientError> {
        let mut machine = self.connection.lock().await;
        let from = machine.state();
        let to = machine
            .apply(event, self.now_ms())
            .map_err(|e| ClientError::new("INVALID_TRANSITION", ErrorKind::Connection, false, format!("{:?} rejects {:?}", e.from, e.event)))?;
        drop(machine);
        if from != to {
            self.event_bus.emit("state_changed", Event::StateChanged { from, to });
        }
        Ok(to)
    }

    /// Transition to `connecting`, negotiate, authenticate if configured,
    /// start heartbeat, resume the outbound queue.
    ///
    /// Transport wiring is the caller's responsibility in this core
    /// crate: a concrete `connect(options)` that opens a socket lives in
    /// the embedding application (or the demo binary), which calls
    /// [`Self::on_transport_ready`] once the handshake completes. This
    /// keeps the facade transport-agnostic per spec §5's single-threaded
    /// cooperative model ("long work never blocks the core").
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.manual_disconnect.store(false, Ordering::SeqCst);
        self.apply_connection_event(ConnectionEvent::Connect).await?;
        Ok(())
    }

    pub async fn on_transport_ready(&self) -> Result<(), ClientError> {
        self.apply_connection_event(ConnectionEvent::TransportReady).await?;
        if let Some(store) = &self.store {
            self.outbound.lock().await.restore(store.as_ref())?;
        }
        Ok(())
    }

    pub async fn on_transport_failed(&self) -> Result<(), ClientError> {
        self.apply_connection_event(ConnectionEvent::TransportFailed).await?;
        self.reconnect.lock().await.record_failure(Duration::from_millis(self.now_ms() as u64));
        Ok(())
    }

    pub async fn on_auth_succeeded(&self, token_expires_at_ms: i64) -> Result<(), ClientError> {
        self.connection.lock().await.set_token_expiry(token_expires_at_ms);
        self.apply_connection_event(ConnectionEvent::AuthSucceeded).await?;
        self.reconnect.lock().await.record_success();
        Ok(())
    }

    pub async fn on_auth_failed(&self) -> Result<(), ClientError> {
        self.apply_connection_event(ConnectionEvent::AuthFailed).await
    }

    /// Mark the connection active (authenticated -> active, or idle ->
    /// active). Called by the driving loop on any inbound/outbound
    /// traffic.
    pub async fn on_activity(&self) -> Result<(), ClientError> {
        self.apply_connection_event(ConnectionEvent::Activity).await?;
        Ok(())
    }

    /// Mark the connection idle after a period with no traffic.
    pub async fn on_idled(&self) -> Result<(), ClientError> {
        self.apply_connection_event(ConnectionEvent::Idled).await?;
        Ok(())
    }

    /// Record connection loss; the reconnection scheduler (owned by the
    /// embedder's driving loop) decides when to call `connect()` again.
    pub async fn on_connection_lost(&self) -> Result<(), ClientError> {
        self.apply_connection_event(ConnectionEvent::ConnectionLost).await?;
        self.alerts.lock().await.record_connection_loss(self.now_ms());
        if let Some(store) = &self.store {
            self.outbound.lock().await.persist(store.as_ref())?;
        }
        Ok(())
    }

    /// `disconnect()`: mark manual, stop heartbeat (caller's driving loop
    /// stops polling it), persist state if enabled.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.manual_disconnect.store(true, Ordering::SeqCst);
        if let Some(store) = &self.store {
            self.outbound.lock().await.persist(store.as_ref())?;
        }
        self.apply_connection_event(ConnectionEvent::ManualDisconnect).await?;
        Ok(())
    }

    /// `reconnect()`: reset scheduler and circuit breaker, then connect.
    /// On success the caller should replay subscriptions and drain the
    /// queue via [`Self::subscriptions_for_replay`] and
    /// [`Self::drain_outbound`].
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        self.reconnect.lock().await.reset();
        self.connection.lock().await.reset_reconnect_attempts();
        self.connect().await
    }

    /// S5: subscriptions to replay, in insertion order.
    pub async fn subscriptions_for_replay(&self) -> Vec<String> {
        let manager = self.subscriptions.lock().await;
        manager
            .ids_in_insertion_order()
            .into_iter()
            .filter_map(|id| manager.get(id).map(|s| s.wire_subscription_id.clone()))
            .collect()
    }

    /// Drain the outbound queue, invoking `send` for each popped message
    /// in priority order. `send` returns whether delivery succeeded.
    pub async fn drain_outbound<F, Fut>(&self, mut send: F) -> Result<(), ClientError>
    where
        F: FnMut(QueuedMessage) -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        loop {
            let state = self.connection.lock().await.state();
            if !matches!(state, ConnectionState::Active | ConnectionState::Authenticated) {
                break;
            }
            let Some(message) = self.outbound.lock().await.pop_for_delivery() else { break };
            let ok = send(message.clone()).await;
            let mut queue = self.outbound.lock().await;
            if ok {
                queue.mark_delivered();
            } else if let Some(dropped) = queue.mark_failed(message, self.now_ms()) {
                self.event_bus.emit("message_dropped", Event::MessageDropped { id: dropped.id, reason: format!("{:?}", dropped.reason) });
            }
        }
        Ok(())
    }

    /// `sendMessage(type, payload, priority)`: enqueue if disconnected,
    /// else hand to the caller-provided `send` for immediate delivery.
    pub async fn send_message<F, Fut>(
        &self,
        message_type: MessageType,
        payload: serde_json::Value,
        priority: Priority,
        send: F,
    ) -> Result<(), ClientError>
    where
        F: FnOnce(Message) -> Fut,
        Fut: std::future::Future<Output = Result<(), ClientError>>,
    {
        let id = format!("msg-{}", self.next_message_id.fetch_add(1, Ordering::Relaxed));
        let now = self.now_ms();
        let state = self.connection.lock().await.state();
        let connected = matches!(state, ConnectionState::Active | ConnectionState::Authenticated | ConnectionState::Idle);

        if !connected {
            let queued = QueuedMessage {
                id,
                message_type,
                payload,
                priority,
                timestamp: now,
                retry_count: 0,
                max_retries: 3,
                expires_at: None,
            };
            let admitted = self.outbound.lock().await.enqueue(queued);
            if !admitted {
                return Err(ClientError::new("QUEUE_BACKPRESSURE", ErrorKind::Queue, false, "queue refused enqueue under backpressure"));
            }
            return Ok(());
        }

        let mut envelope = Message::new(id, message_type, payload, now, ProtocolKind::Json);
        envelope.priority = Some(priority);
        send(envelope).await
    }

    /// Direct access to the owned managers, for the driving loop (heartbeat
    /// ticking, buffer ingestion, alert batching) and the demo binary.
    /// The facade itself only orchestrates lifecycle transitions; per-tick
    /// work against these components is the embedder's responsibility
    /// (spec §5: "long work never blocks the core").
    pub fn heartbeat(&self) -> &Mutex<HeartbeatMonitor> {
        &self.heartbeat
    }

    pub fn buffers(&self) -> &Mutex<BufferManager> {
        &self.buffers
    }

    pub fn subscriptions(&self) -> &Mutex<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn alerts(&self) -> &Mutex<AlertPipeline> {
        &self.alerts
    }

    pub fn outbound(&self) -> &Mutex<OutboundQueue> {
        &self.outbound
    }

    /// Register a resolver for a correlation id (ack/sync), with a
    /// guaranteed-release timeout.
    pub async fn await_reply(&self, operation_id: String, timeout: Duration) -> Result<serde_json::Value, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.pending_ops.lock().await.insert(operation_id.clone(), tx);
        let result = tokio::time::timeout(timeout, rx).await;
        self.pending_ops.lock().await.remove(&operation_id);
        match result {
            Ok(Ok(inner)) => inner,
            Ok(Err(_)) => Err(ClientError::new("REPLY_CHANNEL_DROPPED", ErrorKind::Timeout, true, "resolver dropped without a reply")),
            Err(_) => Err(ClientError::new("OPERATION_TIMEOUT", ErrorKind::Timeout, true, "timed out awaiting reply").with_context(
                crate::error::ErrorContext::default().with_operation(operation_id),
            )),
        }
    }

    /// Resolve a pending operation by correlation id, e.g. on receiving
    /// an ack or sync response frame.
    pub async fn resolve_reply(&self, operation_id: &str, result: Result<serde_json::Value, ClientError>) {
        if let Some(tx) = self.pending_ops.lock().await.remove(operation_id) {
            let _ = tx.send(result);
        }
    }

    pub fn capabilities(&self) -> &ClientCapabilities {
        &self.capabilities
    }

    pub async fn status(&self) -> ClientStatus {
        let connection = self.connection.lock().await.status();
        let circuit_state = self.reconnect.lock().await.circuit_state();
        let queue_size = self.outbound.lock().await.len();
        let subscription_count = self.subscriptions.lock().await.ids_in_insertion_order().len();
        ClientStatus {
            negotiated_protocol: connection.negotiated_protocol,
            connection,
            queue_size,
            subscription_count,
            circuit_state,
        }
    }

    /// Idempotent destruction (spec §8 property 8): cancels the shutdown
    /// watch (driving loops observing it stop), clears the pending-op
    /// table, and clears all event listeners.
    pub async fn destroy(&self) {
        let _ = self.shutdown.send(true);
        self.pending_ops.lock().await.clear();
        self.event_bus.clear_all();
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}
