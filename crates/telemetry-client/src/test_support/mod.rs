//! Test doubles shared across this crate's unit and integration tests.
//!
//! `ManualClock` and `MockTransport` mirror the shape of the teacher's
//! `rt-test-utils::MockWsClient` (connect/send_message/recv_message over
//! an in-process channel instead of a real socket) so reconnection,
//! heartbeat, and facade tests never open a real network connection.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::error::{ClientError, ErrorKind};
use crate::transport::Transport;

/// A clock whose value is advanced explicitly by the test, so backoff
/// sequences and time-windowed buffer reads are deterministic.
#[derive(Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        ManualClock { now_ms: Arc::new(AtomicI64::new(start_ms)) }
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, value_ms: i64) {
        self.now_ms.store(value_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// One end of an in-process duplex byte-message channel standing in for
/// a WebSocket. `paired()` returns both ends already connected.
pub struct MockTransport {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    fail_next_send: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn paired() -> (MockTransport, MockTransport) {
        let (tx_a, rx_b) = mpsc::unbounded_channel();
        let (tx_b, rx_a) = mpsc::unbounded_channel();
        (
            MockTransport { outbound: tx_a, inbound: rx_a, fail_next_send: Arc::new(Mutex::new(false)) },
            MockTransport { outbound: tx_b, inbound: rx_b, fail_next_send: Arc::new(Mutex::new(false)) },
        )
    }

    /// Make the next `send` call fail, to exercise retry/backoff paths.
    pub fn fail_next_send(&self) {
        *self.fail_next_send.lock().unwrap() = true;
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, bytes: Vec<u8>) -> Result<(), ClientError> {
        let mut should_fail = self.fail_next_send.lock().unwrap();
        if *should_fail {
            *should_fail = false;
            return Err(ClientError::new("MOCK_SEND_FAILED", ErrorKind::Transport, true, "injected failure"));
        }
        drop(should_fail);
        self.outbound
            .send(bytes)
            .map_err(|_| ClientError::new("MOCK_TRANSPORT_CLOSED", ErrorKind::Transport, true, "peer dropped"))
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, ClientError> {
        Ok(self.inbound.recv().await)
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.inbound.close();
        Ok(())
    }
}
