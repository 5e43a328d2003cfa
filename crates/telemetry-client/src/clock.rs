//! Injectable clock seam.
//!
//! Production code uses [`SystemClock`]; backoff/buffer-window tests use
//! [`test_support::ManualClock`](crate::test_support::ManualClock) so delay
//! sequences and time-windowed reads are deterministic.

use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Monotonic client time in milliseconds, suitable for [`crate::Message::timestamp`].
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}
