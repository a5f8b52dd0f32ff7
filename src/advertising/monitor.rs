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

//! Advertising monitor.
//!
//! Polls device state on a fixed cadence and switches discoverability on or
//! off. Discovery is bounded: once the tick budget runs out, advertising is
//! forced off and the monitor exits for the rest of the process lifetime.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time;
use tracing::info;

use super::AdvertisingSwitch;

/// Source of truth for whether the peripheral should be discoverable.
#[async_trait]
pub trait StatusOracle: Send + Sync {
    async fn should_advertise(&self) -> bool;
}

/// Timing for the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Wait before the first tick.
    pub start_delay: Duration,
    /// Wait between ticks.
    pub interval: Duration,
    /// Number of ticks that may evaluate state before discovery is forced off.
    pub discovery_ticks: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(60),
            interval: Duration::from_secs(60),
            discovery_ticks: 5,
        }
    }
}

/// Why the monitor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Discovery budget exhausted.
    DiscoveryTimeout,
    /// Receiver is online and claimed; advertising was switched off.
    Configured,
    /// Receiver is online and claimed and advertising was never on.
    AlreadyDisabled,
}

/// What one tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Stop(StopReason),
}

/// Countdown of monitor ticks. Only a restart refills it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryBudget {
    remaining: u32,
}

impl DiscoveryBudget {
    pub fn new(ticks: u32) -> Self {
        Self { remaining: ticks }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    fn consume(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }
}

/// The monitor's state machine.
pub struct AdvertisingMonitor<S, O> {
    switch: S,
    oracle: O,
    settings: MonitorSettings,
    budget: DiscoveryBudget,
}

impl<S: AdvertisingSwitch, O: StatusOracle> AdvertisingMonitor<S, O> {
    pub fn new(switch: S, oracle: O, settings: MonitorSettings) -> Self {
        Self {
            switch,
            oracle,
            settings,
            budget: DiscoveryBudget::new(settings.discovery_ticks),
        }
    }

    pub fn budget(&self) -> DiscoveryBudget {
        self.budget
    }

    /// Evaluate once.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.budget.is_exhausted() {
            info!("Bluetooth discovery enabled timeout reached. Disabling Bluetooth discovery mode.");
            self.switch.disable().await;
            return TickOutcome::Stop(StopReason::DiscoveryTimeout);
        }

        let is_advertising = self.switch.is_advertising();
        let should_advertise = self.oracle.should_advertise().await;

        let outcome = match (is_advertising, should_advertise) {
            (true, false) => {
                info!("PiAware has been connected and claimed. Disabling Bluetooth discovery mode.");
                self.switch.disable().await;
                TickOutcome::Stop(StopReason::Configured)
            }
            (false, false) => {
                info!("Bluetooth discovery mode is disabled");
                TickOutcome::Stop(StopReason::AlreadyDisabled)
            }
            (false, true) => {
                info!("PiAware is not connected to FlightAware and/or unclaimed. Enabling BLE discovery mode.");
                self.switch.enable().await;
                TickOutcome::Continue
            }
            (true, true) => TickOutcome::Continue,
        };

        if outcome == TickOutcome::Continue {
            self.budget.consume();
        }
        outcome
    }

    /// Run until a terminal condition. Never resumes afterwards.
    pub async fn run(mut self) -> StopReason {
        time::sleep(self.settings.start_delay).await;
        info!("Starting advertising monitor");

        loop {
            match self.tick().await {
                TickOutcome::Continue => time::sleep(self.settings.interval).await,
                TickOutcome::Stop(reason) => {
                    info!("Advertising monitor stopped: {:?}", reason);
                    return reason;
                }
            }
        }
    }
}
