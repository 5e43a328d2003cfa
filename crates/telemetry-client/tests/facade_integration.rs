//! Black-box integration tests for `ClientFacade`, driven over an
//! in-process mock transport instead of a real socket. Mirrors the
//! teacher's `services/server/tests/receiver_subscribe.rs` shape: spin up
//! the thing under test, drive it through a realistic session, assert on
//! its externally observable state.

use std::sync::Arc;
use std::time::Duration;

use telemetry_client::client::ClientFacade;
use telemetry_client::config::ClientConfig;
use telemetry_client::connection::ConnectionState;
use telemetry_client::kv_store::InMemoryKvStore;
use telemetry_client::subscription::{DataType, StreamConfig};
use telemetry_client::test_support::MockTransport;
use telemetry_wire::{MessageType, Priority};

fn config() -> ClientConfig {
    ClientConfig::from_toml("[connection]\nurl = \"wss://example.com\"\n").unwrap()
}

fn stream_config(stream_id: &str) -> StreamConfig {
    StreamConfig {
        stream_id: stream_id.to_owned(),
        data_type: DataType::Numeric,
        buffer_size: 100,
        sample_rate_hz: Some(10.0),
        decimation_factor: None,
        dimensions: None,
        min_value: None,
        max_value: None,
        units: None,
    }
}

async fn bring_up(facade: &ClientFacade) {
    facade.connect().await.unwrap();
    facade.on_transport_ready().await.unwrap();
    facade.on_auth_succeeded(i64::MAX).await.unwrap();
    facade.on_activity().await.unwrap();
}

#[tokio::test]
async fn end_to_end_session_delivers_message_over_mock_transport() {
    let facade = ClientFacade::new(config(), None);
    bring_up(&facade).await;
    assert_eq!(facade.status().await.connection.state, ConnectionState::Active);

    let (mut client_side, mut server_side) = MockTransport::paired();
    facade
        .send_message(MessageType::Telemetry, serde_json::json!({"v": 1}), Priority::Normal, |envelope| async move {
            let bytes = serde_json::to_vec(&envelope).unwrap();
            client_side.send(bytes).await
        })
        .await
        .unwrap();

    let received = server_side.recv().await.unwrap().expect("message arrives");
    let decoded: serde_json::Value = serde_json::from_slice(&received).unwrap();
    assert_eq!(decoded["payload"], serde_json::json!({"v": 1}));
}

#[tokio::test]
async fn disconnected_sends_queue_and_drain_on_reconnect_delivers_in_priority_order() {
    let store = Arc::new(InMemoryKvStore::new());
    let facade = ClientFacade::new(config(), Some(store));

    for i in 0..2 {
        facade
            .send_message(MessageType::Command, serde_json::json!({"i": i}), Priority::Normal, |_| async { Ok(()) })
            .await
            .unwrap();
    }
    assert_eq!(facade.status().await.queue_size, 2);

    bring_up(&facade).await;
    assert_eq!(facade.status().await.queue_size, 2, "reaching active doesn't auto-drain the queue");

    let (mut client_side, mut server_side) = MockTransport::paired();
    facade
        .drain_outbound(|queued| {
            let bytes = serde_json::to_vec(&queued.payload).unwrap();
            async {
                client_side.send(bytes).await.is_ok()
            }
        })
        .await
        .unwrap();

    assert_eq!(facade.status().await.queue_size, 0);
    assert!(server_side.recv().await.unwrap().is_some());
    assert!(server_side.recv().await.unwrap().is_some());
}

#[tokio::test]
async fn reconnect_resets_scheduler_and_preserves_subscription_insertion_order() {
    let facade = ClientFacade::new(config(), None);
    bring_up(&facade).await;

    {
        let mut subs = facade.subscriptions().lock().await;
        subs.create("a-stream".into(), stream_config("a-stream"), None, None, 0);
        subs.create("b-stream".into(), stream_config("b-stream"), None, None, 0);
    }

    facade.on_connection_lost().await.unwrap();
    facade.reconnect().await.unwrap();
    facade.on_transport_ready().await.unwrap();

    let replay_order = facade.subscriptions_for_replay().await;
    assert_eq!(replay_order, vec!["a-stream", "b-stream"]);
}

#[tokio::test]
async fn await_reply_resolves_from_a_concurrent_task_before_timeout() {
    let facade = Arc::new(ClientFacade::new(config(), None));
    let awaiting = facade.clone();
    let handle = tokio::spawn(async move { awaiting.await_reply("corr-1".into(), Duration::from_secs(2)).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    facade.resolve_reply("corr-1", Ok(serde_json::json!({"ack": true}))).await;

    assert_eq!(handle.await.unwrap().unwrap(), serde_json::json!({"ack": true}));
}
