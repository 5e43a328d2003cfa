//! Core, transport-agnostic implementation of the browser-side telemetry
//! and command client: connection lifecycle, protocol negotiation,
//! buffering, outbound queueing, subscriptions, and alerting.
//!
//! This crate owns every piece of state and every decision (what to do
//! on reconnect, when to flush a buffer, whether to batch an alert); it
//! does not open sockets itself. An embedder (the demo binary, or an
//! application crate) drives [`client::ClientFacade`] by feeding it
//! transport events and ticking its managers, the same separation the
//! teacher draws between `rt-websocket-client`'s pure protocol state and
//! `services/forwarder`'s actual socket loop.

pub mod alert;
pub mod buffer;
pub mod client;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod event_bus;
pub mod events;
pub mod heartbeat;
pub mod kv_store;
pub mod outbound;
pub mod protocol;
pub mod reconnect;
pub mod subscription;
pub mod transport;

pub mod test_support;

pub use client::{ClientFacade, ClientStatus};
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, ErrorContext, ErrorKind};

pub use telemetry_wire::{Message, MessageType, Priority, ProtocolKind};
