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

//! HTTP client for piaware-configurator.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Ways a configurator call can fail.
///
/// The display strings are what the central receives in `error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Cannot connect to {url}...")]
    Unreachable { url: String },

    #[error("Request to {url} timed out...")]
    TimedOut { url: String },

    #[error("HTTP Error {status}")]
    Rejected { status: u16 },

    #[error("{0}")]
    Other(String),
}

/// Synchronous request/response oracle behind the bridge.
#[async_trait]
pub trait ConfiguratorBackend: Send + Sync {
    /// Endpoint the backend posts to.
    fn url(&self) -> &str;

    /// POST `body` as JSON. `Ok(None)` means a 2xx reply with no body.
    async fn post(&self, body: &Value) -> Result<Option<Value>, BackendError>;
}

/// `reqwest` implementation of [`ConfiguratorBackend`].
#[derive(Debug, Clone)]
pub struct ConfiguratorClient {
    client: reqwest::Client,
    url: String,
}

impl ConfiguratorClient {
    /// Client for `http://{host}:{port}/configurator`.
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("http://{}:{}/configurator", host, port),
        })
    }

    fn classify(&self, err: reqwest::Error) -> BackendError {
        if err.is_connect() {
            BackendError::Unreachable {
                url: self.url.clone(),
            }
        } else if err.is_timeout() {
            BackendError::TimedOut {
                url: self.url.clone(),
            }
        } else {
            BackendError::Other(err.to_string())
        }
    }
}

#[async_trait]
impl ConfiguratorBackend for ConfiguratorClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, body: &Value) -> Result<Option<Value>, BackendError> {
        debug!("POST {}: {}", self.url, body);

        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Rejected {
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Null) => Ok(None),
            Ok(payload) => Ok(Some(payload)),
            Err(e) => Err(BackendError::Other(format!(
                "Invalid JSON returned from server: {}",
                e
            ))),
        }
    }
}
