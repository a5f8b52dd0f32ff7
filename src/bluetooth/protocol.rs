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

//! Command and response envelope definitions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Tag added to every command forwarded to the configurator.
pub const REQUESTOR: &str = "ble-bridge";

/// Requests the bridge forwards to the configurator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportedRequest {
    GetDeviceInfo,
    GetDeviceState,
    GetWifiNetworks,
    SetWifiConfig,
    PiawareConfigRead,
}

impl SupportedRequest {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetDeviceInfo => "get_device_info",
            Self::GetDeviceState => "get_device_state",
            Self::GetWifiNetworks => "get_wifi_networks",
            Self::SetWifiConfig => "set_wifi_config",
            Self::PiawareConfigRead => "piaware_config_read",
        }
    }

    /// Parse a wire name. Matching is exact.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "get_device_info" => Some(Self::GetDeviceInfo),
            "get_device_state" => Some(Self::GetDeviceState),
            "get_wifi_networks" => Some(Self::GetWifiNetworks),
            "set_wifi_config" => Some(Self::SetWifiConfig),
            "piaware_config_read" => Some(Self::PiawareConfigRead),
            _ => None,
        }
    }
}

/// Why an inbound request could not become a [`Command`].
///
/// The display strings are what the central receives in `error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Bad JSON formatting")]
    BadJson,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unsupported request received: {0}")]
    Unsupported(String),
}

/// A validated command, ready to forward.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    /// Opaque correlation token, echoed back unchanged.
    pub request_id: Value,

    pub request: SupportedRequest,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_payload: Option<Value>,

    pub requestor: String,

    /// Any other fields the central sent; forwarded as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Command {
    /// Parse and validate a raw request string.
    pub fn from_json(raw: &str) -> Result<Self, CommandError> {
        let value: Value = serde_json::from_str(raw).map_err(|_| CommandError::BadJson)?;
        let Value::Object(mut fields) = value else {
            return Err(CommandError::BadJson);
        };

        let request_id = fields
            .remove("request_id")
            .ok_or(CommandError::MissingField("request_id"))?;
        let request = fields
            .remove("request")
            .ok_or(CommandError::MissingField("request"))?;

        let request = match &request {
            Value::String(name) => SupportedRequest::parse(name)
                .ok_or_else(|| CommandError::Unsupported(name.clone()))?,
            other => return Err(CommandError::Unsupported(other.to_string())),
        };

        let request_payload = fields.remove("request_payload");
        fields.remove("requestor");

        Ok(Self {
            request_id,
            request,
            request_payload,
            requestor: REQUESTOR.to_string(),
            extra: fields,
        })
    }

    /// Body posted to the configurator.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// Reply sent to the central for every inbound write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_payload: Option<Value>,
}

impl ResponseEnvelope {
    /// Successful reply for `request_id`.
    pub fn success(request_id: Value) -> Self {
        Self {
            success: true,
            request_id: Some(request_id),
            error: None,
            response_payload: None,
        }
    }

    /// Failed reply with no request id.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            request_id: None,
            error: Some(error.into()),
            response_payload: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Value) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.response_payload = Some(payload);
        self
    }

    /// Serialize to compact JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
