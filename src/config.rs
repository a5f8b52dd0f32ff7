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

//! Configuration module.
//!
//! Settings come from an optional TOML file; every field has a default so
//! the bridge runs with no file at all.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::advertising::MonitorSettings;
use crate::bluetooth::ble_constants::ADVERTISING_NAME;

/// Location read when no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/piaware-ble-connect/config.toml";

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// piaware-configurator endpoint.
    pub backend: BackendConfig,

    /// Advertising and discovery timing.
    pub advertising: AdvertisingConfig,

    /// Files the advertised name is derived from.
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    /// HTTP request timeout.
    pub timeout_secs: u64,
    /// Device state queries per monitor tick.
    pub status_attempts: u32,
    pub status_retry_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            timeout_secs: 20,
            status_attempts: 5,
            status_retry_secs: 3,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn status_retry(&self) -> Duration {
        Duration::from_secs(self.status_retry_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvertisingConfig {
    /// Explicit local name. Derived from device identity when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Used when no identity source is readable.
    pub fallback_name: String,

    pub start_delay_secs: u64,
    pub interval_secs: u64,

    /// Monitor ticks before discovery is forced off.
    pub discovery_ticks: u32,
}

impl Default for AdvertisingConfig {
    fn default() -> Self {
        Self {
            name: None,
            fallback_name: ADVERTISING_NAME.to_string(),
            start_delay_secs: 60,
            interval_secs: 60,
            discovery_ticks: 5,
        }
    }
}

impl AdvertisingConfig {
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            start_delay: Duration::from_secs(self.start_delay_secs),
            interval: Duration::from_secs(self.interval_secs),
            discovery_ticks: self.discovery_ticks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub cpuinfo_path: PathBuf,
    /// piaware's runtime status file.
    pub status_path: PathBuf,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            cpuinfo_path: PathBuf::from("/proc/cpuinfo"),
            status_path: PathBuf::from("/var/run/piaware/status.json"),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_PATH`] is
    /// read if present and defaults are used otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file {} does not exist", path.display());
                }
                Self::from_file(path)
            }
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
