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

//! PiAware BLE Connect daemon

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use piaware_ble_connect::advertising::{Advertising, AdvertisingMonitor};
use piaware_ble_connect::bluetooth::{build_uart_tree, gatt_server, Peripheral, UartTransport};
use piaware_ble_connect::config::Config;
use piaware_ble_connect::configurator::{
    ConfiguratorBackend, ConfiguratorClient, DeviceStatus, RequestRouter,
};
use piaware_ble_connect::identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            Self::Debug => "piaware_ble_connect=debug",
            Self::Info => "piaware_ble_connect=info",
            Self::Warning => "piaware_ble_connect=warn",
            Self::Error | Self::Critical => "piaware_ble_connect=error",
        }
    }
}

#[derive(Parser)]
#[command(name = "piaware-ble-connect")]
#[command(about = "Bluetooth LE configuration bridge for PiAware", version)]
struct Cli {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host of piaware-configurator handling BLE requests
    #[arg(long)]
    host: Option<String>,

    /// Port of piaware-configurator handling BLE requests
    #[arg(long)]
    port: Option<u16>,

    /// Log level for program output
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Monitor ticks before Bluetooth discovery is switched off
    #[arg(long, value_name = "TICKS")]
    discovery_timeout: Option<u32>,

    /// Advertised name, overriding the one derived from the device
    #[arg(long)]
    name: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.backend.host = host.clone();
        }
        if let Some(port) = self.port {
            config.backend.port = port;
        }
        if let Some(ticks) = self.discovery_timeout {
            config.advertising.discovery_ticks = ticks;
        }
        if let Some(name) = &self.name {
            config.advertising.name = Some(name.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(cli.log_level.directive().parse()?),
        )
        .init();

    info!(
        "Starting PiAware BLE Connect v{}...",
        env!("CARGO_PKG_VERSION")
    );

    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    info!("Configuration loaded");

    let client = ConfiguratorClient::new(
        &config.backend.host,
        config.backend.port,
        config.backend.timeout(),
    )?;
    info!("Forwarding BLE requests to {}", client.url());

    let name = identity::resolve_name(
        config.advertising.name.as_deref(),
        &config.identity,
        &config.advertising.fallback_name,
    );

    let peripheral = Peripheral::new().await?;
    peripheral.set_name(&name).await?;

    let tree = build_uart_tree()?;
    let transport = Arc::new(UartTransport::new(RequestRouter::new(client.clone())));
    let app = match peripheral.register_application(&tree, transport).await {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to register application: {:#}", e);
            return Err(e.context("GATT application registration failed"));
        }
    };
    info!("BLE GATT server started as '{}'", name);

    let mut advertising = Advertising::new(peripheral.advertisement(name));
    let (link, mut requests) = advertising.link();

    let status = DeviceStatus::new(
        client,
        config.backend.status_attempts,
        config.backend.status_retry(),
    );
    let monitor = AdvertisingMonitor::new(link, status, config.advertising.monitor_settings());
    tokio::spawn(monitor.run());

    gatt_server::run(app, &mut advertising, &mut requests).await
}
