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

//! Peripheral discoverability.
//!
//! [`Advertising`] lives on the main loop and is the only thing that touches
//! the platform advertisement. Other tasks hold an [`AdvertisingLink`]: they
//! read [`AdvertisingState`] through a watch channel and ask for transitions
//! through an mpsc channel that [`serve_advertising`] drains.

pub mod monitor;

use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub use monitor::{AdvertisingMonitor, MonitorSettings, StatusOracle, StopReason};

/// Whether the peripheral is currently discoverable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvertisingState {
    pub is_advertising: bool,
}

/// Platform side of advertising (BlueZ in production).
#[async_trait]
pub trait AdvertisingPlatform: Send {
    async fn register_advertisement(&mut self) -> Result<()>;
    async fn unregister_advertisement(&mut self) -> Result<()>;
}

/// Transition requested from outside the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingRequest {
    Enable,
    Disable,
}

/// Owner of the advertising state.
pub struct Advertising<P> {
    platform: P,
    state: watch::Sender<AdvertisingState>,
}

impl<P: AdvertisingPlatform> Advertising<P> {
    pub fn new(platform: P) -> Self {
        let (state, _) = watch::channel(AdvertisingState::default());
        Self { platform, state }
    }

    pub fn is_advertising(&self) -> bool {
        self.state.borrow().is_advertising
    }

    pub fn subscribe(&self) -> watch::Receiver<AdvertisingState> {
        self.state.subscribe()
    }

    /// Handle for other tasks, plus the receiver the main loop must drain.
    pub fn link(&self) -> (AdvertisingLink, mpsc::Receiver<AdvertisingRequest>) {
        let (requests, rx) = mpsc::channel(8);
        (
            AdvertisingLink {
                requests,
                state: self.subscribe(),
            },
            rx,
        )
    }

    /// Start advertising. Returns whether a transition happened.
    ///
    /// A platform failure leaves the state disabled and is returned to the caller.
    pub async fn enable(&mut self) -> Result<bool> {
        debug!("Enabling BLE Peripheral advertisement mode");
        if self.is_advertising() {
            debug!("BLE Peripheral advertising is already enabled");
            return Ok(false);
        }

        self.platform.register_advertisement().await?;
        self.state.send_replace(AdvertisingState {
            is_advertising: true,
        });
        info!("BLE Peripheral advertising ON");
        Ok(true)
    }

    /// Stop advertising. Returns whether a transition happened.
    ///
    /// Best effort: a platform failure is logged and the state still goes off.
    pub async fn disable(&mut self) -> bool {
        debug!("Disabling BLE Peripheral advertisement mode");
        if !self.is_advertising() {
            debug!("BLE Peripheral advertising already disabled");
            return false;
        }

        if let Err(e) = self.platform.unregister_advertisement().await {
            error!("Error disabling BLE Peripheral advertising: {:#}", e);
        }
        self.state.send_replace(AdvertisingState {
            is_advertising: false,
        });
        info!("BLE Peripheral advertising OFF");
        true
    }
}

/// Cross-task handle onto [`Advertising`].
#[derive(Debug, Clone)]
pub struct AdvertisingLink {
    requests: mpsc::Sender<AdvertisingRequest>,
    state: watch::Receiver<AdvertisingState>,
}

/// Something whose discoverability the monitor can read and switch.
#[async_trait]
pub trait AdvertisingSwitch: Send + Sync {
    fn is_advertising(&self) -> bool;
    async fn enable(&self);
    async fn disable(&self);
}

impl AdvertisingLink {
    async fn request(&self, request: AdvertisingRequest) {
        if self.requests.send(request).await.is_err() {
            warn!("Main loop is gone, dropping {:?} request", request);
        }
    }
}

#[async_trait]
impl AdvertisingSwitch for AdvertisingLink {
    fn is_advertising(&self) -> bool {
        self.state.borrow().is_advertising
    }

    async fn enable(&self) {
        self.request(AdvertisingRequest::Enable).await;
    }

    async fn disable(&self) {
        self.request(AdvertisingRequest::Disable).await;
    }
}

/// Apply advertising requests until `shutdown` resolves.
///
/// Returns an error if enabling fails; that is fatal for the run loop.
pub async fn serve_advertising<P, F>(
    advertising: &mut Advertising<P>,
    requests: &mut mpsc::Receiver<AdvertisingRequest>,
    shutdown: F,
) -> Result<()>
where
    P: AdvertisingPlatform,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                return Ok(());
            }
            Some(request) = requests.recv() => match request {
                AdvertisingRequest::Enable => {
                    if let Err(e) = advertising.enable().await {
                        error!("Failed to enable Advertisement mode: {:#}", e);
                        return Err(e);
                    }
                }
                AdvertisingRequest::Disable => {
                    advertising.disable().await;
                }
            },
        }
    }
}
