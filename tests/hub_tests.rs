// End-to-end hub tests
// A hub with no broker reachable still serves clients and relays their events

use exhibit_core::HubConfig;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn offline_config() -> HubConfig {
    let mut config = HubConfig::default();
    config.network.bind_address = "127.0.0.1".to_string();
    config.network.ws_port = 0;
    config.network.max_connections = Some(2);
    config.bus.host = "127.0.0.1".to_string();
    config.bus.port = 1;
    config.bus.reconnect_backoff_secs = 1;
    config.broadcast.telemetry_interval_ms = 100;
    config.voice.api_keys.clear();
    config
}

async fn connect(port: u16) -> Client {
    let (client, _) = connect_async(format!("ws://127.0.0.1:{}/ws", port))
        .await
        .unwrap();
    client
}

/// Next frame whose `type` matches, skipping periodic telemetry
async fn next_of_type(client: &mut Client, kind: &str) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => {
                    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                    if value["type"] == kind {
                        return value;
                    }
                }
                Some(Ok(_)) => {}
                other => panic!("connection ended: {:?}", other),
            }
        }
    })
    .await
    .unwrap()
}

async fn wait_for_connections(port: u16, expected: u64) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let health: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{}/health", port))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if health["connections"] == expected {
                return health;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_site_discovered_reaches_every_client() {
    let hub = exhibit_server::start(offline_config()).await.unwrap();
    let port = hub.local_addr().port();

    let mut judge = connect(port).await;
    let mut kiosk = connect(port).await;
    let health = wait_for_connections(port, 2).await;
    assert_eq!(health["bus_connected"], false);

    judge
        .send(Message::Text(
            r#"{"command":"site_discovered","params":{"site_id":"hoan_kiem","site_name":"Hồ Hoàn Kiếm"}}"#
                .to_string(),
        ))
        .await
        .unwrap();

    for client in [&mut judge, &mut kiosk] {
        let event = next_of_type(client, "event").await;
        assert_eq!(event["event"], "site_discovered");
        assert_eq!(event["station_id"], "hoan_kiem");
        assert_eq!(event["site_name"], "Hồ Hoàn Kiếm");
    }

    hub.shutdown().await;
}

#[tokio::test]
async fn test_bad_frames_keep_connection_open() {
    let hub = exhibit_server::start(offline_config()).await.unwrap();
    let port = hub.local_addr().port();
    let mut client = connect(port).await;
    wait_for_connections(port, 1).await;

    for frame in ["{{{", r#"{"command":"move","params":{"speed":"fast"}}"#, r#"{"command":"stop"}"#] {
        client.send(Message::Text(frame.to_string())).await.unwrap();
    }

    // Still receiving periodic telemetry after the failures
    next_of_type(&mut client, "telemetry").await;
    assert_eq!(hub.state().registry.connection_count(), 1);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_capacity_and_disconnect_cleanup() {
    let hub = exhibit_server::start(offline_config()).await.unwrap();
    let port = hub.local_addr().port();

    let first = connect(port).await;
    let _second = connect(port).await;
    wait_for_connections(port, 2).await;

    let mut third = connect(port).await;
    let refused = tokio::time::timeout(Duration::from_secs(5), third.next())
        .await
        .unwrap();
    assert!(matches!(refused, Some(Ok(Message::Close(_))) | None | Some(Err(_))));

    drop(first);
    wait_for_connections(port, 1).await;

    hub.shutdown().await;
}
