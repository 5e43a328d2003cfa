//! Demo: runs a loopback WebSocket echo server and drives
//! `telemetry_client::ClientFacade` against it end to end — connect,
//! negotiate, send a telemetry message, observe it echoed back, then a
//! clean disconnect.
//!
//! Mirrors the teacher's `services/streamer` binary shape: `tokio::main`,
//! `tracing_subscriber::fmt` with an env filter, then hand off to library
//! code. There is no real mission-control server here, so this binary
//! plays both client and server to exercise the full stack without
//! external infrastructure.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tracing::info;

use telemetry_client::client::ClientFacade;
use telemetry_client::config::ClientConfig;
use telemetry_client::transport::{PrimaryWsTransport, Transport};
use telemetry_wire::{MessageType, Priority};

async fn run_echo_server(listener: TcpListener) {
    loop {
        let Ok((stream, _addr)) = listener.accept().await else { return };
        tokio::spawn(async move {
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else { return };
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
                if ws.send(msg).await.is_err() {
                    break;
                }
            }
        });
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "telemetry-demo starting");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback listener");
    let port = listener.local_addr().expect("local addr").port();
    tokio::spawn(run_echo_server(listener));

    let url = format!("ws://127.0.0.1:{port}");
    let config = ClientConfig::from_toml(&format!("[connection]\nurl = \"{url}\"\n")).expect("valid demo config");

    let facade = Arc::new(ClientFacade::new(config, None));

    facade.connect().await.expect("connect");
    let mut transport = PrimaryWsTransport::connect(&url).await.expect("transport connect");
    facade.on_transport_ready().await.expect("transport ready");
    facade.on_auth_succeeded(i64::MAX).await.expect("auth succeeded (no auth configured for this demo)");
    facade.on_activity().await.expect("activity");

    info!(status = ?facade.status().await, "connected");

    facade
        .send_message(MessageType::Telemetry, serde_json::json!({"sensor": "imu-1", "value": 9.81}), Priority::Normal, |envelope| async {
            let bytes = serde_json::to_vec(&envelope).map_err(|e| {
                telemetry_client::ClientError::new("DEMO_ENCODE_FAILED", telemetry_client::ErrorKind::Protocol, false, e.to_string())
            })?;
            transport.send(bytes).await
        })
        .await
        .expect("send telemetry message");

    if let Ok(Some(bytes)) = transport.recv().await {
        let echoed: serde_json::Value = serde_json::from_slice(&bytes).expect("decode echoed envelope");
        info!(?echoed, "received echo from loopback server");
    }

    transport.close().await.ok();
    facade.disconnect().await.expect("disconnect");
    facade.destroy().await;

    info!("telemetry-demo finished");
}
