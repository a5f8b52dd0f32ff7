// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! UART-style transport over two characteristics.
//!
//! The central writes one JSON command per write to RX and reads the reply as
//! a series of TX notifications ending with the terminator byte.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::ble_constants::*;
use super::gatt::{Flag, GattError, GattTree};
use super::protocol::ResponseEnvelope;
use super::reassembler::chunk_message;
use crate::configurator::{ConfiguratorBackend, RequestRouter};

/// Object path of the GATT application root.
pub const APPLICATION_PATH: &str = "/com/flightaware/piaware_ble_connect";

/// Envelope error for writes that are not valid UTF-8.
pub const MALFORMED_PAYLOAD: &str = "Malformed payload: request is not valid UTF-8";

/// Envelope error for writes that overlap an unanswered command.
pub const REQUEST_IN_PROGRESS: &str = "Request already in progress";

/// Build the UART service tree: TX (notify) at index 0, RX (write) at index 1.
pub fn build_uart_tree() -> Result<GattTree, GattError> {
    let mut tree = GattTree::new(APPLICATION_PATH);
    let service = tree.add_service(UART_SERVICE_UUID, true);

    let tx = tree.add_characteristic(service, UART_TX_CHARACTERISTIC_UUID, &[Flag::Notify])?;
    tree.add_descriptor(tx, USER_DESCRIPTION_UUID, &[Flag::Read], "UART TX")?;

    let rx = tree.add_characteristic(service, UART_RX_CHARACTERISTIC_UUID, &[Flag::Write])?;
    tree.add_descriptor(rx, USER_DESCRIPTION_UUID, &[Flag::Read], "UART RX")?;

    Ok(tree)
}

struct Subscriber {
    session: u64,
    sink: mpsc::Sender<Vec<u8>>,
}

/// Notify side. Messages sent while nobody is subscribed are dropped.
///
/// One message's notifications are never interleaved with another's.
#[derive(Default)]
pub struct TxCharacteristic {
    subscriber: Mutex<Option<Subscriber>>,
    sessions: AtomicU64,
    sending: tokio::sync::Mutex<()>,
}

impl TxCharacteristic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_notifying(&self) -> bool {
        self.subscriber.lock().is_some()
    }

    fn new_subscriber(&self, sink: mpsc::Sender<Vec<u8>>) -> Subscriber {
        Subscriber {
            session: self.sessions.fetch_add(1, Ordering::Relaxed) + 1,
            sink,
        }
    }

    /// Subscribe `sink`. No-op (returns `false`) when already notifying.
    pub fn start_notify(&self, sink: mpsc::Sender<Vec<u8>>) -> bool {
        let mut subscriber = self.subscriber.lock();
        if subscriber.is_some() {
            debug!("TX notifications already started");
            return false;
        }
        *subscriber = Some(self.new_subscriber(sink));
        debug!("TX notifications started");
        true
    }

    /// Unsubscribe. No-op (returns `false`) when not notifying.
    pub fn stop_notify(&self) -> bool {
        let stopped = self.subscriber.lock().take().is_some();
        if stopped {
            debug!("TX notifications stopped");
        }
        stopped
    }

    /// Install `sink` for a new platform notify session, replacing any
    /// previous one. Returns the session id for [`close_session`].
    ///
    /// [`close_session`]: Self::close_session
    pub fn open_session(&self, sink: mpsc::Sender<Vec<u8>>) -> u64 {
        let next = self.new_subscriber(sink);
        let session = next.session;
        if let Some(stale) = self.subscriber.lock().replace(next) {
            warn!(
                "TX notify session {} replaced by session {}",
                stale.session, session
            );
        }
        session
    }

    /// End `session`. Leaves a newer session's sink in place.
    pub fn close_session(&self, session: u64) -> bool {
        let mut subscriber = self.subscriber.lock();
        match subscriber.as_ref() {
            Some(current) if current.session == session => {
                *subscriber = None;
                debug!("TX notifications stopped");
                true
            }
            _ => false,
        }
    }

    /// Frame and notify `envelope`. Returns the number of notifications queued.
    pub async fn send(&self, envelope: &ResponseEnvelope) -> usize {
        let json = match envelope.to_json() {
            Ok(j) => j,
            Err(e) => {
                error!("Failed to serialize response: {}", e);
                return 0;
            }
        };

        let _sending = self.sending.lock().await;
        let sink = self.subscriber.lock().as_ref().map(|s| s.sink.clone());
        let Some(sink) = sink else {
            debug!("No TX subscriber, dropping response");
            return 0;
        };
        debug!("Tx (response): {}", json);

        let mut sent = 0;
        for packet in chunk_message(json.as_bytes()) {
            if let Err(e) = sink.send(packet).await {
                error!("Failed to queue notification: {}", e);
                break;
            }
            sent += 1;
        }
        sent
    }
}

/// RX dispatch plus the TX characteristic it answers on.
pub struct UartTransport<B> {
    router: Arc<RequestRouter<B>>,
    tx: Arc<TxCharacteristic>,
    in_flight: Arc<Semaphore>,
}

impl<B: ConfiguratorBackend + 'static> UartTransport<B> {
    pub fn new(router: RequestRouter<B>) -> Self {
        Self {
            router: Arc::new(router),
            tx: Arc::new(TxCharacteristic::new()),
            in_flight: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn tx(&self) -> &Arc<TxCharacteristic> {
        &self.tx
    }

    /// Handle one RX write.
    ///
    /// The backend call runs on its own task so the write returns at once.
    /// One command is served at a time; an overlapping write is answered
    /// with a busy envelope.
    pub fn handle_write(&self, data: Vec<u8>) -> JoinHandle<()> {
        let tx = self.tx.clone();

        let request = match String::from_utf8(data) {
            Ok(request) => request,
            Err(e) => {
                warn!("Invalid UTF-8 in request: {}", e);
                return tokio::spawn(async move {
                    tx.send(&ResponseEnvelope::failure(MALFORMED_PAYLOAD)).await;
                });
            }
        };
        debug!("Rx (request): {}", request);

        let Ok(permit) = self.in_flight.clone().try_acquire_owned() else {
            warn!("Request received while another is in flight");
            let mut busy = ResponseEnvelope::failure(REQUEST_IN_PROGRESS);
            busy.request_id = serde_json::from_str::<Value>(&request)
                .ok()
                .and_then(|v| v.get("request_id").cloned());
            return tokio::spawn(async move {
                tx.send(&busy).await;
            });
        };

        let router = self.router.clone();
        tokio::spawn(async move {
            let response = router.route(&request).await;
            tx.send(&response).await;
            drop(permit);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::ble_constants::framing::MESSAGE_TERMINATOR;
    use crate::bluetooth::gatt::{NodeKind, GATT_CHRC_IFACE};
    use crate::bluetooth::reassembler::MessageReassembler;
    use crate::configurator::router::tests::FakeBackend;
    use crate::configurator::BackendError;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Notify;

    fn drain(rx: &mut mpsc::Receiver<Vec<u8>>) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        while let Ok(p) = rx.try_recv() {
            packets.push(p);
        }
        packets
    }

    fn decode(packets: &[Vec<u8>]) -> Value {
        let mut reassembler = MessageReassembler::new();
        let message = packets
            .iter()
            .find_map(|p| reassembler.process_packet(p))
            .expect("terminator");
        serde_json::from_slice(&message).unwrap()
    }

    #[test]
    fn test_uart_tree_layout() {
        let tree = build_uart_tree().unwrap();
        let snapshot = tree.get_managed_snapshot();
        assert_eq!(snapshot.len(), 5);

        let tx = tree.find_characteristic(UART_TX_CHARACTERISTIC_UUID).unwrap();
        let rx = tree.find_characteristic(UART_RX_CHARACTERISTIC_UUID).unwrap();
        assert_eq!(
            tree.path(tx).unwrap(),
            "/com/flightaware/piaware_ble_connect/service0/char0"
        );
        assert_eq!(
            tree.path(rx).unwrap(),
            "/com/flightaware/piaware_ble_connect/service0/char1"
        );
        assert!(matches!(
            tree.kind(rx).unwrap(),
            NodeKind::Characteristic { flags, .. } if flags == &vec![Flag::Write]
        ));
        assert!(tree.get_properties(tx, GATT_CHRC_IFACE).is_ok());
    }

    #[tokio::test]
    async fn test_notify_toggling_is_idempotent() {
        let tx = TxCharacteristic::new();
        let (sink, _rx) = mpsc::channel(8);

        assert!(!tx.stop_notify());
        assert!(tx.start_notify(sink.clone()));
        assert!(!tx.start_notify(sink));
        assert!(tx.is_notifying());
        assert!(tx.stop_notify());
        assert!(!tx.stop_notify());
        assert!(!tx.is_notifying());
    }

    #[tokio::test]
    async fn test_send_without_subscriber_is_dropped() {
        let tx = TxCharacteristic::new();
        let env = ResponseEnvelope::success(json!("1"));

        assert_eq!(tx.send(&env).await, 0);

        // Subscribing later does not replay the dropped message.
        let (sink, mut rx) = mpsc::channel(8);
        tx.start_notify(sink);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_large_response_fragmented() {
        let tx = TxCharacteristic::new();
        let (sink, mut rx) = mpsc::channel(64);
        tx.start_notify(sink);

        let networks: Vec<_> = (0..60)
            .map(|i| json!({"ssid": format!("network-{}", i), "signal": -40 - i}))
            .collect();
        let env = ResponseEnvelope::success(json!("big")).with_payload(json!(networks));

        let sent = tx.send(&env).await;
        let packets = drain(&mut rx);

        assert!(sent > 1);
        assert_eq!(packets.len(), sent);
        assert!(packets.iter().all(|p| p.len() <= framing::NOTIFY_CHUNK_SIZE));
        assert_eq!(*packets.last().unwrap().last().unwrap(), MESSAGE_TERMINATOR);
        assert_eq!(decode(&packets), serde_json::to_value(&env).unwrap());
    }

    #[tokio::test]
    async fn test_write_round_trip() {
        let backend = FakeBackend::new(Ok(Some(json!({"serial": "ABC123"}))));
        let transport = UartTransport::new(RequestRouter::new(backend));
        let (sink, mut rx) = mpsc::channel(64);
        transport.tx().start_notify(sink);

        transport
            .handle_write(br#"{"request_id": "9", "request": "get_device_info"}"#.to_vec())
            .await
            .unwrap();

        assert_eq!(
            decode(&drain(&mut rx)),
            json!({"success": true, "request_id": "9", "response_payload": {"serial": "ABC123"}})
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_write() {
        let transport = UartTransport::new(RequestRouter::new(FakeBackend::new(Ok(None))));
        let (sink, mut rx) = mpsc::channel(64);
        transport.tx().start_notify(sink);

        transport.handle_write(vec![0xff, 0xfe, b'{']).await.unwrap();

        assert_eq!(
            decode(&drain(&mut rx)),
            json!({"success": false, "error": MALFORMED_PAYLOAD})
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend_reply() {
        let backend = FakeBackend::new(Err(BackendError::Unreachable {
            url: "http://127.0.0.1:5000/configurator".into(),
        }));
        let transport = UartTransport::new(RequestRouter::new(backend));
        let (sink, mut rx) = mpsc::channel(64);
        transport.tx().start_notify(sink);

        transport
            .handle_write(br#"{"request_id":"1","request":"get_device_state"}"#.to_vec())
            .await
            .unwrap();

        assert_eq!(
            decode(&drain(&mut rx)),
            json!({
                "success": false,
                "error": "Cannot connect to http://127.0.0.1:5000/configurator...",
                "request_id": "1",
            })
        );
    }

    /// Backend that blocks until released.
    struct GatedBackend {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl ConfiguratorBackend for GatedBackend {
        fn url(&self) -> &str {
            "http://gated/configurator"
        }

        async fn post(&self, _body: &Value) -> Result<Option<Value>, BackendError> {
            self.gate.notified().await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_overlapping_write_rejected() {
        let gate = Arc::new(Notify::new());
        let transport = UartTransport::new(RequestRouter::new(GatedBackend { gate: gate.clone() }));
        let (sink, mut rx) = mpsc::channel(64);
        transport.tx().start_notify(sink);

        let first = transport
            .handle_write(br#"{"request_id": "a", "request": "get_wifi_networks"}"#.to_vec());
        transport
            .handle_write(br#"{"request_id": "b", "request": "get_device_info"}"#.to_vec())
            .await
            .unwrap();

        assert_eq!(
            decode(&drain(&mut rx)),
            json!({"success": false, "error": REQUEST_IN_PROGRESS, "request_id": "b"})
        );

        gate.notify_one();
        first.await.unwrap();
        assert_eq!(
            decode(&drain(&mut rx)),
            json!({"success": true, "request_id": "a"})
        );

        // The slot is free again.
        let third = transport
            .handle_write(br#"{"request_id": "c", "request": "get_device_state"}"#.to_vec());
        gate.notify_one();
        third.await.unwrap();
        assert_eq!(
            decode(&drain(&mut rx)),
            json!({"success": true, "request_id": "c"})
        );
    }

    #[tokio::test]
    async fn test_new_session_takes_over_stale_one() {
        let tx = TxCharacteristic::new();
        let (old_sink, mut old_rx) = mpsc::channel(8);
        let (new_sink, mut new_rx) = mpsc::channel(8);

        let old = tx.open_session(old_sink);
        let new = tx.open_session(new_sink);
        assert_ne!(old, new);

        // The stale session ending must not unsubscribe the new one.
        assert!(!tx.close_session(old));
        assert!(tx.is_notifying());

        tx.send(&ResponseEnvelope::success(json!("1"))).await;
        assert!(drain(&mut old_rx).is_empty());
        assert_eq!(decode(&drain(&mut new_rx)), json!({"success": true, "request_id": "1"}));

        assert!(tx.close_session(new));
        assert!(!tx.is_notifying());
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_reply_waits_for_slow_multi_chunk_reply() {
        let networks: Vec<_> = (0..200)
            .map(|i| json!({"ssid": format!("network-{}", i), "signal_level": -40 - (i % 50)}))
            .collect();
        let backend = FakeBackend::new(Ok(Some(json!({"networks": networks}))));
        let transport = UartTransport::new(RequestRouter::new(backend));
        let (sink, mut rx) = mpsc::channel(32);
        transport.tx().start_notify(sink);

        // Slow central: one notification every 10 ms.
        let central = tokio::spawn(async move {
            let mut reassembler = MessageReassembler::new();
            let mut messages = Vec::new();
            let mut packets = 0;
            while messages.len() < 2 {
                let packet = rx.recv().await.unwrap();
                packets += 1;
                if let Some(message) = reassembler.process_packet(&packet) {
                    messages.push(message);
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            (messages, packets)
        });

        let first = transport
            .handle_write(br#"{"request_id": "a", "request": "get_wifi_networks"}"#.to_vec());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = transport
            .handle_write(br#"{"request_id": "b", "request": "get_device_info"}"#.to_vec());

        first.await.unwrap();
        second.await.unwrap();
        let (messages, packets) = central.await.unwrap();

        // The first reply alone overflows the channel.
        assert!(packets > 33);

        let first: Value = serde_json::from_slice(&messages[0]).unwrap();
        assert_eq!(first["request_id"], json!("a"));
        assert_eq!(first["response_payload"]["networks"].as_array().unwrap().len(), 200);

        let second: Value = serde_json::from_slice(&messages[1]).unwrap();
        assert_eq!(
            second,
            json!({"success": false, "error": REQUEST_IN_PROGRESS, "request_id": "b"})
        );
    }
}
