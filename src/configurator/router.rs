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

//! Validates inbound requests and forwards them to the configurator.

use tracing::{error, info, warn};

use super::client::ConfiguratorBackend;
use crate::bluetooth::protocol::{Command, CommandError, ResponseEnvelope};

/// Turns raw request strings into response envelopes.
pub struct RequestRouter<B> {
    backend: B,
}

impl<B: ConfiguratorBackend> RequestRouter<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Handle one request. Always yields an envelope.
    pub async fn route(&self, raw_request: &str) -> ResponseEnvelope {
        let command = match Command::from_json(raw_request) {
            Ok(command) => command,
            Err(e) => {
                match &e {
                    CommandError::Unsupported(name) => {
                        error!("Unsupported BLE request received: {}", name)
                    }
                    _ => warn!("Rejected BLE request: {}", e),
                }
                return ResponseEnvelope::failure(e.to_string());
            }
        };

        info!("BLE request received: {}", command.request.as_str());

        let body = match command.to_value() {
            Ok(body) => body,
            Err(e) => {
                return ResponseEnvelope::failure(e.to_string()).with_request_id(command.request_id)
            }
        };

        match self.backend.post(&body).await {
            Ok(Some(payload)) => ResponseEnvelope::success(command.request_id).with_payload(payload),
            Ok(None) => ResponseEnvelope::success(command.request_id),
            Err(e) => {
                warn!("{} failed: {}", command.request.as_str(), e);
                ResponseEnvelope::failure(e.to_string()).with_request_id(command.request_id)
            }
        }
    }
}
