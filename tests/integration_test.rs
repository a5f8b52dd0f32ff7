//! Integration tests for the full request/response and discovery flows.

use anyhow::Result;
use async_trait::async_trait;
use piaware_ble_connect::advertising::{
    serve_advertising, Advertising, AdvertisingMonitor, AdvertisingPlatform, MonitorSettings,
    StopReason,
};
use piaware_ble_connect::bluetooth::ble_constants::framing::MESSAGE_TERMINATOR;
use piaware_ble_connect::bluetooth::reassembler::MessageReassembler;
use piaware_ble_connect::bluetooth::{build_uart_tree, UartTransport};
use piaware_ble_connect::configurator::{ConfiguratorClient, DeviceStatus, RequestRouter};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ConfiguratorClient {
    let addr = server.address();
    ConfiguratorClient::new(&addr.ip().to_string(), addr.port(), Duration::from_secs(5)).unwrap()
}

/// Collect notifications until one carries the terminator, then decode.
async fn next_response(packets: &mut mpsc::Receiver<Vec<u8>>) -> (Value, usize) {
    let mut reassembler = MessageReassembler::new();
    let mut count = 0;
    loop {
        let packet = packets.recv().await.expect("notification");
        count += 1;
        if let Some(message) = reassembler.process_packet(&packet) {
            return (serde_json::from_slice(&message).unwrap(), count);
        }
    }
}

#[tokio::test]
async fn test_wifi_scan_round_trip() {
    let server = MockServer::start().await;
    let networks: Vec<Value> = (0..40)
        .map(|i| json!({"ssid": format!("network-{}", i), "signal_level": -40 - i}))
        .collect();
    Mock::given(method("POST"))
        .and(path("/configurator"))
        .and(body_partial_json(
            json!({"request": "get_wifi_networks", "requestor": "ble-bridge"}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"networks": networks})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = UartTransport::new(RequestRouter::new(client_for(&server)));
    let (sink, mut packets) = mpsc::channel(256);
    assert!(transport.tx().start_notify(sink));

    transport
        .handle_write(br#"{"request_id": "scan-1", "request": "get_wifi_networks"}"#.to_vec())
        .await
        .unwrap();

    let (response, count) = next_response(&mut packets).await;
    assert_eq!(response["success"], json!(true));
    assert_eq!(response["request_id"], json!("scan-1"));
    assert_eq!(response["response_payload"]["networks"].as_array().unwrap().len(), 40);
    assert!(count > 1, "large reply should span several notifications");
}

#[tokio::test]
async fn test_backend_error_reaches_central() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let transport = UartTransport::new(RequestRouter::new(client_for(&server)));
    let (sink, mut packets) = mpsc::channel(32);
    transport.tx().start_notify(sink);

    transport
        .handle_write(
            br#"{"request_id": 7, "request": "set_wifi_config", "request_payload": {"ssid": "home"}}"#
                .to_vec(),
        )
        .await
        .unwrap();

    let (response, _) = next_response(&mut packets).await;
    assert_eq!(
        response,
        json!({"success": false, "request_id": 7, "error": "HTTP Error 500"})
    );
}

#[tokio::test]
async fn test_malformed_command_never_reaches_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let transport = UartTransport::new(RequestRouter::new(client_for(&server)));
    let (sink, mut packets) = mpsc::channel(32);
    transport.tx().start_notify(sink);

    transport.handle_write(b"{not json".to_vec()).await.unwrap();
    let (response, _) = next_response(&mut packets).await;
    assert_eq!(
        response,
        json!({"success": false, "error": "Bad JSON formatting"})
    );

    transport
        .handle_write(br#"{"request_id": "2", "request": "reboot"}"#.to_vec())
        .await
        .unwrap();
    let (response, _) = next_response(&mut packets).await;
    assert_eq!(
        response,
        json!({"success": false, "error": "Unsupported request received: reboot"})
    );
}

#[tokio::test]
async fn test_reply_without_subscriber_is_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let transport = UartTransport::new(RequestRouter::new(client_for(&server)));
    transport
        .handle_write(br#"{"request_id": "a", "request": "get_device_info"}"#.to_vec())
        .await
        .unwrap();

    let (sink, mut packets) = mpsc::channel(32);
    transport.tx().start_notify(sink);
    assert!(packets.try_recv().is_err());

    transport
        .handle_write(br#"{"request_id": "b", "request": "get_device_info"}"#.to_vec())
        .await
        .unwrap();
    let (response, _) = next_response(&mut packets).await;
    assert_eq!(response["request_id"], json!("b"));
}

#[test]
fn test_every_notification_fits_and_ends_with_terminator() {
    let tree = build_uart_tree().unwrap();
    assert_eq!(tree.get_managed_snapshot().len(), 5);

    let body = json!({"success": true, "request_id": "x", "response_payload": "é".repeat(500)});
    let packets = piaware_ble_connect::bluetooth::reassembler::chunk_message(
        body.to_string().as_bytes(),
    );
    assert!(packets.iter().all(|p| p.len() <= 182));
    assert_eq!(packets.last().unwrap().last(), Some(&MESSAGE_TERMINATOR));
}

#[derive(Default, Clone)]
struct CountingPlatform {
    registered: Arc<AtomicUsize>,
    unregistered: Arc<AtomicUsize>,
}

#[async_trait]
impl AdvertisingPlatform for CountingPlatform {
    async fn register_advertisement(&mut self) -> Result<()> {
        self.registered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unregister_advertisement(&mut self) -> Result<()> {
        self.unregistered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn fast_settings(ticks: u32) -> MonitorSettings {
    MonitorSettings {
        start_delay: Duration::from_millis(10),
        interval: Duration::from_millis(10),
        discovery_ticks: ticks,
    }
}

/// Run the monitor against `server` with the advertising owner on this task.
async fn run_discovery(server: &MockServer, ticks: u32) -> (StopReason, CountingPlatform, bool) {
    let platform = CountingPlatform::default();
    let mut advertising = Advertising::new(platform.clone());
    let (link, mut requests) = advertising.link();

    let status = DeviceStatus::new(client_for(server), 2, Duration::from_millis(10));
    let monitor = tokio::spawn(AdvertisingMonitor::new(link, status, fast_settings(ticks)).run());

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let waiter = tokio::spawn(async move {
        let reason = monitor.await.unwrap();
        let _ = done_tx.send(reason);
    });

    let mut reason = None;
    serve_advertising(&mut advertising, &mut requests, async {
        reason = done_rx.await.ok();
    })
    .await
    .unwrap();
    waiter.await.unwrap();

    // The monitor's last request may still be queued behind the stop signal.
    while let Ok(request) = requests.try_recv() {
        match request {
            piaware_ble_connect::advertising::AdvertisingRequest::Enable => {
                advertising.enable().await.unwrap();
            }
            piaware_ble_connect::advertising::AdvertisingRequest::Disable => {
                advertising.disable().await;
            }
        }
    }

    (reason.unwrap(), platform, advertising.is_advertising())
}

#[tokio::test]
async fn test_unclaimed_receiver_times_out_discovery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"request": "get_device_state"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"is_connected_to_internet": false, "is_receiver_claimed": false}),
        ))
        .mount(&server)
        .await;

    let (reason, platform, advertising) = run_discovery(&server, 3).await;

    assert_eq!(reason, StopReason::DiscoveryTimeout);
    assert_eq!(platform.registered.load(Ordering::SeqCst), 1);
    assert_eq!(platform.unregistered.load(Ordering::SeqCst), 1);
    assert!(!advertising);
}

#[tokio::test]
async fn test_configured_receiver_never_advertises() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"is_connected_to_internet": true, "is_receiver_claimed": true}),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let (reason, platform, advertising) = run_discovery(&server, 5).await;

    assert_eq!(reason, StopReason::AlreadyDisabled);
    assert_eq!(platform.registered.load(Ordering::SeqCst), 0);
    assert!(!advertising);
}

#[tokio::test]
async fn test_unreachable_backend_keeps_discovery_on() {
    // Free port, closed again.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = ConfiguratorClient::new("127.0.0.1", port, Duration::from_secs(2)).unwrap();

    let platform = CountingPlatform::default();
    let mut advertising = Advertising::new(platform.clone());
    let (link, mut requests) = advertising.link();
    let status = DeviceStatus::new(client, 2, Duration::from_millis(10));
    let mut monitor = AdvertisingMonitor::new(link, status, fast_settings(5));

    monitor.tick().await;
    let request = requests.try_recv().unwrap();
    assert_eq!(
        request,
        piaware_ble_connect::advertising::AdvertisingRequest::Enable
    );
    advertising.enable().await.unwrap();
    assert_eq!(platform.registered.load(Ordering::SeqCst), 1);
}
