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

//! Device identity and the advertised local name.
//!
//! The name is picked in this order: an explicitly configured name, the
//! FlightAware site number, the Raspberry Pi model.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{error, info};

use crate::config::IdentityConfig;

/// Model reported when the board revision is not in [`MODEL_REVISIONS`].
pub const DEFAULT_MODEL: &str = "Raspberry Pi";

/// Board revision codes per model.
const MODEL_REVISIONS: &[(&str, &[&str])] = &[
    ("RPi Zero W", &["9000c1"]),
    ("RPi Zero", &["900092", "900093", "920093"]),
    ("RPi 3B", &["a02082", "a22082", "a32082"]),
    ("RPi 3B+", &["a020d3"]),
    ("RPi 4", &["a03111", "b03111", "c03111"]),
];

/// Board model and the tail of its serial number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardInfo {
    pub model: String,
    pub serial: Option<String>,
}

/// Parse `/proc/cpuinfo` contents.
pub fn model_and_serial(cpuinfo: &str) -> BoardInfo {
    let mut model = DEFAULT_MODEL;
    let mut serial = None;

    for line in cpuinfo.lines() {
        let Some((attribute, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match attribute.trim() {
            "Revision" => {
                if let Some((name, _)) = MODEL_REVISIONS
                    .iter()
                    .find(|(_, revisions)| revisions.contains(&value))
                {
                    model = *name;
                }
            }
            "Serial" => {
                let start = value.len().saturating_sub(6);
                serial = value.get(start..).map(str::to_uppercase);
            }
            _ => {}
        }
    }

    BoardInfo {
        model: model.to_string(),
        serial,
    }
}

#[derive(Debug, Deserialize)]
struct PiawareStatus {
    site_url: Option<String>,
}

/// Site number from the contents of piaware's `status.json`.
pub fn site_number(status_json: &str) -> Option<String> {
    let status: PiawareStatus = match serde_json::from_str(status_json) {
        Ok(s) => s,
        Err(e) => {
            error!("Error retrieving ADS-B receiver site number: {}", e);
            return None;
        }
    };

    let Some(site_url) = status.site_url else {
        info!("No site number found in status.json. Receiver unclaimed or not yet connected to FlightAware.");
        return None;
    };

    let marker = ["#stats-", "/stats/site/"]
        .into_iter()
        .find(|m| site_url.contains(m))?;
    let parts: Vec<&str> = site_url.split(marker).collect();
    (parts.len() == 2)
        .then(|| parts[1].to_string())
        .filter(|n| !n.is_empty())
}

/// Pick the advertised name from already-loaded identity sources.
///
/// `cpuinfo` is `None` when it could not be read; `fallback` is used then.
pub fn advertisement_name(
    configured: Option<&str>,
    site: Option<&str>,
    cpuinfo: Option<&str>,
    fallback: &str,
) -> String {
    if let Some(name) = configured.filter(|n| !n.trim().is_empty()) {
        return name.to_string();
    }
    if let Some(site) = site {
        return format!("PiAware - Site {}", site);
    }
    match cpuinfo {
        Some(cpuinfo) => {
            let board = model_and_serial(cpuinfo);
            if let Some(serial) = &board.serial {
                info!("Board serial: {}", serial);
            }
            format!("PiAware - {}", board.model)
        }
        None => fallback.to_string(),
    }
}

fn read_optional(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(contents) => Some(contents),
        Err(e) => {
            info!("Cannot read {}: {}", path.display(), e);
            None
        }
    }
}

/// Resolve the advertised name from the files named in `identity`.
pub fn resolve_name(configured: Option<&str>, identity: &IdentityConfig, fallback: &str) -> String {
    let site = read_optional(&identity.status_path).and_then(|s| site_number(&s));
    let cpuinfo = read_optional(&identity.cpuinfo_path);
    advertisement_name(configured, site.as_deref(), cpuinfo.as_deref(), fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PI4_CPUINFO: &str = "processor\t: 0\n\
        model name\t: ARMv7 Processor rev 3 (v7l)\n\
        Hardware\t: BCM2711\n\
        Revision\t: c03111\n\
        Serial\t\t: 10000000abcdef12\n\
        Model\t\t: Raspberry Pi 4 Model B Rev 1.1\n";

    #[test]
    fn test_model_and_serial() {
        let board = model_and_serial(PI4_CPUINFO);
        assert_eq!(board.model, "RPi 4");
        assert_eq!(board.serial.as_deref(), Some("CDEF12"));
    }

    #[test]
    fn test_unknown_revision() {
        let board = model_and_serial("Revision : ffffff\n");
        assert_eq!(board.model, DEFAULT_MODEL);
        assert_eq!(board.serial, None);
    }

    #[test]
    fn test_short_serial() {
        let board = model_and_serial("Serial : ab12\n");
        assert_eq!(board.serial.as_deref(), Some("AB12"));
    }

    #[test]
    fn test_site_number() {
        assert_eq!(
            site_number(r#"{"site_url": "https://flightaware.com/adsb/stats/user/x#stats-12345"}"#)
                .as_deref(),
            Some("12345")
        );
        assert_eq!(
            site_number(r#"{"site_url": "https://flightaware.com/adsb/stats/site/678"}"#)
                .as_deref(),
            Some("678")
        );
        assert_eq!(
            site_number(r#"{"site_url": "https://flightaware.com/adsb/"}"#),
            None
        );
        assert_eq!(site_number(r#"{"status": "unclaimed"}"#), None);
        assert_eq!(site_number("not json"), None);
    }

    #[test]
    fn test_name_priority() {
        assert_eq!(
            advertisement_name(Some("Hangar"), Some("1"), Some(PI4_CPUINFO), "PiAware"),
            "Hangar"
        );
        assert_eq!(
            advertisement_name(None, Some("1"), Some(PI4_CPUINFO), "PiAware"),
            "PiAware - Site 1"
        );
        assert_eq!(
            advertisement_name(Some("  "), None, Some(PI4_CPUINFO), "PiAware"),
            "PiAware - RPi 4"
        );
        assert_eq!(
            advertisement_name(None, None, Some(""), "PiAware"),
            "PiAware - Raspberry Pi"
        );
        assert_eq!(advertisement_name(None, None, None, "PiAware"), "PiAware");
    }

    #[test]
    fn test_resolve_name_from_files() {
        let mut cpuinfo = NamedTempFile::new().unwrap();
        writeln!(cpuinfo, "Revision : a020d3").unwrap();
        let mut status = NamedTempFile::new().unwrap();
        write!(status, r#"{{"site_url": "x/stats/site/42"}}"#).unwrap();

        let mut identity = IdentityConfig {
            cpuinfo_path: cpuinfo.path().to_path_buf(),
            status_path: status.path().to_path_buf(),
        };
        assert_eq!(resolve_name(None, &identity, "PiAware"), "PiAware - Site 42");

        identity.status_path = "/nonexistent/status.json".into();
        assert_eq!(resolve_name(None, &identity, "PiAware"), "PiAware - RPi 3B+");

        identity.cpuinfo_path = "/nonexistent/cpuinfo".into();
        assert_eq!(resolve_name(None, &identity, "PiAware"), "PiAware");
    }
}
