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

//! BLE service and characteristic UUIDs for the PiAware UART bridge.

use uuid::Uuid;

/// UART GATT service UUID.
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0xac8602af_0226_4889_b925_d751bdf70001);

/// RX characteristic UUID (central writes commands here).
/// Properties: Write
pub const UART_RX_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xac8602af_0226_4889_b925_d751bdf70002);

/// TX characteristic UUID (peripheral sends responses here).
/// Properties: Notify
pub const UART_TX_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xac8602af_0226_4889_b925_d751bdf70003);

/// Characteristic User Description descriptor (Bluetooth SIG assigned 0x2901).
pub const USER_DESCRIPTION_UUID: Uuid = Uuid::from_u128(0x00002901_0000_1000_8000_00805f9b34fb);

/// Local name used when no device identity is available.
pub const ADVERTISING_NAME: &str = "PiAware";

/// Outbound framing.
pub mod framing {
    /// Maximum payload bytes per notification.
    pub const NOTIFY_CHUNK_SIZE: usize = 182;

    /// ASCII "End of Transmission Block", appended after every JSON message.
    pub const MESSAGE_TERMINATOR: u8 = 0x13;
}
