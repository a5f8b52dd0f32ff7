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

//! Device state polling for the advertising monitor.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::client::ConfiguratorBackend;
use crate::advertising::monitor::StatusOracle;
use crate::bluetooth::protocol::{SupportedRequest, REQUESTOR};

/// Asks the configurator whether the receiver is online and claimed.
pub struct DeviceStatus<B> {
    backend: B,
    attempts: u32,
    retry_delay: Duration,
}

impl<B: ConfiguratorBackend> DeviceStatus<B> {
    pub fn new(backend: B, attempts: u32, retry_delay: Duration) -> Self {
        Self {
            backend,
            attempts,
            retry_delay,
        }
    }
}

/// `false` only when the payload says the receiver is both connected and claimed.
pub fn advertising_wanted(payload: Option<&Value>) -> bool {
    let flag = |name: &str| payload.and_then(|p| p.get(name)).and_then(Value::as_bool);

    match (flag("is_connected_to_internet"), flag("is_receiver_claimed")) {
        (Some(connected), Some(claimed)) => !(connected && claimed),
        _ => {
            info!("Could not determine if advertising should be on");
            true
        }
    }
}

#[async_trait]
impl<B: ConfiguratorBackend> StatusOracle for DeviceStatus<B> {
    async fn should_advertise(&self) -> bool {
        let query = json!({
            "request": SupportedRequest::GetDeviceState.as_str(),
            "requestor": REQUESTOR,
        });

        for attempt in 1..=self.attempts {
            match self.backend.post(&query).await {
                Ok(payload) => {
                    debug!("Device state: {:?}", payload);
                    return advertising_wanted(payload.as_ref());
                }
                Err(e) => {
                    warn!(
                        "Device state query failed (attempt {}/{}): {}",
                        attempt, self.attempts, e
                    );
                    if attempt < self.attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        info!("Configurator unavailable, keeping Bluetooth discovery available");
        true
    }
}
