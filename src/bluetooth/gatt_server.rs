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

//! BlueZ peripheral: GATT application registration, advertising and the
//! process run loop.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle, Feature, Type};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotifier, CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicWrite, CharacteristicWriteMethod,
    CharacteristicWriteRequest, Descriptor, DescriptorRead, DescriptorReadRequest, Service,
};
use bluer::Adapter;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::ble_constants::UART_SERVICE_UUID;
use super::gatt::{Flag, GattTree, NodeId, NodeKind};
use super::uart::{TxCharacteristic, UartTransport};
use crate::advertising::{serve_advertising, Advertising, AdvertisingPlatform, AdvertisingRequest};
use crate::configurator::ConfiguratorBackend;

/// The local adapter acting as a GATT peripheral.
pub struct Peripheral {
    adapter: Adapter,
}

impl Peripheral {
    /// Open a BlueZ session and power on the default adapter.
    pub async fn new() -> Result<Self> {
        info!("Initializing BLE peripheral...");

        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }

        Ok(Self { adapter })
    }

    /// Set the adapter alias shown to centrals.
    pub async fn set_name(&self, name: &str) -> Result<()> {
        self.adapter.set_alias(name.to_string()).await?;
        info!("Bluetooth name set to: {}", name);
        Ok(())
    }

    /// Publish `tree` to BlueZ, wiring writes and notifications to `transport`.
    ///
    /// The application stays registered while the returned handle is alive.
    pub async fn register_application<B>(
        &self,
        tree: &GattTree,
        transport: Arc<UartTransport<B>>,
    ) -> Result<ApplicationHandle>
    where
        B: ConfiguratorBackend + 'static,
    {
        for (path, interfaces) in tree.get_managed_snapshot() {
            debug!("GATT object {} {:?}", path, interfaces.keys().collect::<Vec<_>>());
        }

        let app = render_application(tree, &transport)?;
        let handle = self.adapter.serve_gatt_application(app).await?;
        info!("GATT application registered");
        Ok(handle)
    }

    /// Platform advertisement for this adapter, announced as `local_name`.
    pub fn advertisement(&self, local_name: impl Into<String>) -> BluezAdvertisement {
        BluezAdvertisement {
            adapter: self.adapter.clone(),
            local_name: local_name.into(),
            handle: None,
        }
    }
}

fn render_application<B>(tree: &GattTree, transport: &Arc<UartTransport<B>>) -> Result<Application>
where
    B: ConfiguratorBackend + 'static,
{
    let mut services = Vec::new();
    for &service in tree.children(tree.root())? {
        let NodeKind::Service { uuid, primary } = tree.kind(service)? else {
            continue;
        };

        let mut characteristics = Vec::new();
        for &chr in tree.children(service)? {
            characteristics.push(render_characteristic(tree, chr, transport)?);
        }

        services.push(Service {
            uuid: *uuid,
            primary: *primary,
            characteristics,
            ..Default::default()
        });
    }

    Ok(Application {
        services,
        ..Default::default()
    })
}

fn render_characteristic<B>(
    tree: &GattTree,
    id: NodeId,
    transport: &Arc<UartTransport<B>>,
) -> Result<Characteristic>
where
    B: ConfiguratorBackend + 'static,
{
    let NodeKind::Characteristic { uuid, flags } = tree.kind(id)? else {
        return Err(anyhow!("{} is not a characteristic", tree.path(id)?));
    };

    let mut descriptors = Vec::new();
    for &desc in tree.children(id)? {
        descriptors.push(render_descriptor(tree, desc)?);
    }

    let write = flags
        .iter()
        .any(|f| matches!(f, Flag::Write | Flag::WriteWithoutResponse))
        .then(|| CharacteristicWrite {
            write: flags.contains(&Flag::Write),
            write_without_response: flags.contains(&Flag::WriteWithoutResponse),
            method: write_method(transport.clone()),
            ..Default::default()
        });

    let notify = flags
        .iter()
        .any(|f| matches!(f, Flag::Notify | Flag::Indicate))
        .then(|| CharacteristicNotify {
            notify: flags.contains(&Flag::Notify),
            indicate: flags.contains(&Flag::Indicate),
            method: notify_method(transport.tx().clone()),
            ..Default::default()
        });

    Ok(Characteristic {
        uuid: *uuid,
        write,
        notify,
        descriptors,
        ..Default::default()
    })
}

fn render_descriptor(tree: &GattTree, id: NodeId) -> Result<Descriptor> {
    let NodeKind::Descriptor { uuid, value, .. } = tree.kind(id)? else {
        return Err(anyhow!("{} is not a descriptor", tree.path(id)?));
    };
    let value = value.clone();

    Ok(Descriptor {
        uuid: *uuid,
        read: Some(DescriptorRead {
            read: true,
            fun: Box::new(move |_req: DescriptorReadRequest| {
                let value = value.clone();
                Box::pin(async move { Ok(value) })
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn write_method<B>(transport: Arc<UartTransport<B>>) -> CharacteristicWriteMethod
where
    B: ConfiguratorBackend + 'static,
{
    CharacteristicWriteMethod::Fun(Box::new(
        move |data: Vec<u8>, req: CharacteristicWriteRequest| {
            debug!("RX write: {} bytes (mtu {})", data.len(), req.mtu);
            // The reply goes out on TX; the write itself is acknowledged at once.
            let _ = transport.handle_write(data);
            Box::pin(async move { Ok(()) })
        },
    ))
}

fn notify_method(tx: Arc<TxCharacteristic>) -> CharacteristicNotifyMethod {
    CharacteristicNotifyMethod::Fun(Box::new(move |notifier: CharacteristicNotifier| {
        let tx = tx.clone();
        Box::pin(async move { notify_session(tx, notifier).await })
    }))
}

/// Forward queued packets to one subscribed central until it unsubscribes.
///
/// A new session takes over from a stale one still holding the sink.
async fn notify_session(tx: Arc<TxCharacteristic>, mut notifier: CharacteristicNotifier) {
    let (sink, mut packets) = mpsc::channel::<Vec<u8>>(32);
    let session = tx.open_session(sink);
    info!("TX notification session {} started", session);

    loop {
        let packet = tokio::select! {
            _ = notifier.stopped() => None,
            packet = packets.recv() => packet,
        };
        let Some(packet) = packet else { break };

        debug!("Sending notification: {} bytes", packet.len());
        if let Err(e) = notifier.notify(packet).await {
            error!("Failed to send notification: {}", e);
            break;
        }
    }

    tx.close_session(session);
    info!("TX notification session {} ended", session);
}

/// BlueZ LE advertisement. Dropping the handle unregisters it.
pub struct BluezAdvertisement {
    adapter: Adapter,
    local_name: String,
    handle: Option<AdvertisementHandle>,
}

impl BluezAdvertisement {
    fn advertisement(&self) -> Advertisement {
        Advertisement {
            advertisement_type: Type::Peripheral,
            service_uuids: vec![UART_SERVICE_UUID].into_iter().collect(),
            local_name: Some(self.local_name.clone()),
            system_includes: vec![Feature::TxPower].into_iter().collect(),
            discoverable: Some(true),
            ..Default::default()
        }
    }
}

#[async_trait]
impl AdvertisingPlatform for BluezAdvertisement {
    async fn register_advertisement(&mut self) -> Result<()> {
        let handle = self.adapter.advertise(self.advertisement()).await?;
        self.handle = Some(handle);
        debug!("Advertisement registered as {}", self.local_name);
        Ok(())
    }

    async fn unregister_advertisement(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => {
                drop(handle);
                debug!("Advertisement unregistered");
                Ok(())
            }
            None => Err(anyhow!("no advertisement registered")),
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let interrupt = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = interrupt => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = interrupt.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = interrupt.await;
    }
}

/// Serve advertising requests until shutdown, then tear down.
///
/// Teardown is best effort and always runs, even when the loop failed.
pub async fn run<P: AdvertisingPlatform>(
    app: ApplicationHandle,
    advertising: &mut Advertising<P>,
    requests: &mut mpsc::Receiver<AdvertisingRequest>,
) -> Result<()> {
    info!("BLE GATT server running");
    let result = serve_advertising(advertising, requests, shutdown_signal()).await;

    advertising.disable().await;
    drop(app);
    info!("BLE GATT server stopped");

    result
}
