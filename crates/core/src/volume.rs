// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! VolumeSpec/VolumeStatus and the disk-alias encoding shared by the domain
//! builder and volume attacher (I4, I5).

use std::collections::HashMap;

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Prefix for a libvirt disk alias that represents a spec volume (I5).
pub const VOLUME_ALIAS_PREFIX: &str = "ua-volume-";

/// Encode a spec volume name into its libvirt disk alias (I5).
pub fn volume_alias(name: &str) -> String {
    format!(
        "{VOLUME_ALIAS_PREFIX}{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(name)
    )
}

/// Inverse of [`volume_alias`]; `None` if `alias` does not carry the volume
/// prefix or is not validly encoded.
pub fn parse_volume_alias(alias: &str) -> Option<String> {
    let encoded = alias.strip_prefix(VOLUME_ALIAS_PREFIX)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(encoded)
        .ok()?;
    String::from_utf8(bytes).ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VolumeSource {
    LocalDisk {
        size: u64,
        #[serde(default)]
        image_ref: Option<String>,
    },
    EmptyDisk {
        size: u64,
    },
    Connection {
        driver: String,
        handle: String,
        #[serde(default)]
        attributes: HashMap<String, String>,
        #[serde(default)]
        secret_data: HashMap<String, String>,
        #[serde(default)]
        encryption_data: HashMap<String, String>,
        #[serde(default)]
        effective_storage_bytes: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    /// Guest device suffix, e.g. `"oda"`.
    pub device: String,
    #[serde(flatten)]
    pub source: VolumeSource,
}

impl VolumeSpec {
    pub fn alias(&self) -> String {
        volume_alias(&self.name)
    }

    /// The guest-visible target device for this volume: the device suffix
    /// with its first character rewritten to `'v'` (e.g. `"oda"` -> `"vda"`).
    pub fn target_device(&self) -> String {
        let mut chars = self.device.chars();
        chars.next();
        format!("v{}", chars.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeState {
    Pending,
    Attached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeStatus {
    pub name: String,
    /// Canonical `"<plugin_name>/<backing_id>"` string (I4).
    pub handle: String,
    pub state: VolumeState,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_alias_round_trips_for_arbitrary_names() {
        for name in ["disk-1", "", "has/slash", "unicode-\u{1F600}"] {
            let alias = volume_alias(name);
            assert_eq!(parse_volume_alias(&alias).as_deref(), Some(name));
        }
    }

    #[test]
    fn parse_volume_alias_rejects_unprefixed_strings() {
        assert_eq!(parse_volume_alias("ua-networkinterface-Zm9v"), None);
    }

    #[test]
    fn target_device_rewrites_first_character() {
        let spec = VolumeSpec {
            name: "disk-1".into(),
            device: "oda".into(),
            source: VolumeSource::EmptyDisk { size: 1 },
        };
        assert_eq!(spec.target_device(), "vda");
    }
}
