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

//! Bluetooth communication module.
//!
//! Exposes a UART-style GATT service over BlueZ: the central writes JSON
//! commands to RX and receives framed JSON replies as TX notifications.

pub mod ble_constants;
pub mod gatt;
pub mod gatt_server;
pub mod protocol;
pub mod reassembler;
pub mod uart;

pub use gatt::{GattError, GattTree};
pub use gatt_server::{BluezAdvertisement, Peripheral};
pub use protocol::{Command, CommandError, ResponseEnvelope, SupportedRequest};
pub use uart::{build_uart_tree, TxCharacteristic, UartTransport};
