//! Error taxonomy (spec §7).
//!
//! Every component-level error (reconnect, buffer, subscription, ...)
//! converts into a [`ClientError`] via `#[from]` so application code only
//! ever has to match on one enum plus the attached [`ErrorKind`] and
//! [`ErrorContext`].

use std::time::{SystemTime, UNIX_EPOCH};

/// Abstract error category (spec §7). Distinct from the Rust error enum
/// below it — `kind` is what the recovery policy keys off of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Authentication,
    Protocol,
    Timeout,
    Queue,
    Subscription,
    Buffer,
    Circuit,
    Transport,
}

/// Extra detail attached to a [`ClientError`]; optional fields default to
/// `None` so call sites only fill in what they know.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub state: Option<String>,
    pub attempt: Option<u32>,
    pub stream_id: Option<String>,
    pub operation: Option<String>,
}

impl ErrorContext {
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_stream(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }
}

/// The single error type surfaced to application code, carrying
/// `{code, kind, recoverable, timestamp, context}` per spec §7.
#[derive(Debug, thiserror::Error)]
#[error("[{code}] {message} (kind={kind:?}, recoverable={recoverable})")]
pub struct ClientError {
    pub code: &'static str,
    pub message: String,
    pub kind: ErrorKind,
    pub recoverable: bool,
    pub timestamp: i64,
    pub context: ErrorContext,
}

impl ClientError {
    pub fn new(code: &'static str, kind: ErrorKind, recoverable: bool, message: impl Into<String>) -> Self {
        ClientError {
            code,
            message: message.into(),
            kind,
            recoverable,
            timestamp: now_ms(),
            context: ErrorContext::default(),
        }
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl From<telemetry_wire::WireError> for ClientError {
    fn from(e: telemetry_wire::WireError) -> Self {
        ClientError::new("PROTOCOL_ERROR", ErrorKind::Protocol, false, e.to_string())
    }
}

impl From<crate::kv_store::KvError> for ClientError {
    fn from(e: crate::kv_store::KvError) -> Self {
        ClientError::new("BUFFER_STORAGE_FAILED", ErrorKind::Buffer, true, e.to_string())
    }
}
