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

//! piaware-configurator integration.
//!
//! The configurator is a local HTTP service that owns wifi and claim state.
//! The bridge only forwards requests to it and reads device state from it.

pub mod client;
pub mod router;
pub mod status;

pub use client::{BackendError, ConfiguratorBackend, ConfiguratorClient};
pub use router::RequestRouter;
pub use status::{advertising_wanted, DeviceStatus};
