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

//! Terminator-delimited message framing for the TX characteristic.
//!
//! A message is its UTF-8 bytes followed by a single
//! [`MESSAGE_TERMINATOR`](framing::MESSAGE_TERMINATOR) byte, cut into
//! notifications of at most [`NOTIFY_CHUNK_SIZE`](framing::NOTIFY_CHUNK_SIZE)
//! bytes. The central concatenates notifications until it sees the terminator.

use tracing::{debug, warn};

use super::ble_constants::framing;

/// Collects notification payloads into complete messages (central side).
pub struct MessageReassembler {
    buffer: Vec<u8>,
}

impl MessageReassembler {
    /// Create a new message reassembler.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
        }
    }

    /// Process an incoming notification.
    ///
    /// Returns `Some(complete_message)` (terminator stripped) once the
    /// terminator byte is seen, otherwise `None`. Bytes following a terminator
    /// in the same packet start the next message.
    pub fn process_packet(&mut self, packet: &[u8]) -> Option<Vec<u8>> {
        if packet.is_empty() {
            warn!("Empty notification ignored");
            return None;
        }

        match packet.iter().position(|b| *b == framing::MESSAGE_TERMINATOR) {
            Some(end) => {
                self.buffer.extend_from_slice(&packet[..end]);
                let message = std::mem::take(&mut self.buffer);
                self.buffer.extend_from_slice(&packet[end + 1..]);
                debug!("Message reassembly complete: {} bytes", message.len());
                Some(message)
            }
            None => {
                self.buffer.extend_from_slice(packet);
                None
            }
        }
    }

    /// Reset the reassembler state.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Check if reassembly is in progress.
    pub fn is_in_progress(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Get current buffer size.
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for MessageReassembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame a message and cut it into notification payloads.
///
/// The terminator is always the final byte of the final packet. An empty
/// message still yields one packet holding just the terminator.
pub fn chunk_message(data: &[u8]) -> Vec<Vec<u8>> {
    let mut framed = Vec::with_capacity(data.len() + 1);
    framed.extend_from_slice(data);
    framed.push(framing::MESSAGE_TERMINATOR);

    framed
        .chunks(framing::NOTIFY_CHUNK_SIZE)
        .map(<[u8]>::to_vec)
        .collect()
}
