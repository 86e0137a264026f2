// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NetworkInterfaceSpec/Status and the NIC-alias encoding shared by the
//! domain builder and NIC reconcile step (I6).

use std::collections::HashMap;

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Prefix for a libvirt interface alias that represents a spec NIC (I6).
pub const NIC_ALIAS_PREFIX: &str = "ua-networkinterface-";

pub fn nic_alias(name: &str) -> String {
    format!(
        "{NIC_ALIAS_PREFIX}{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(name)
    )
}

pub fn parse_nic_alias(alias: &str) -> Option<String> {
    let encoded = alias.strip_prefix(NIC_ALIAS_PREFIX)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(encoded)
        .ok()?;
    String::from_utf8(bytes).ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterfaceSpec {
    pub name: String,
    pub network_id: String,
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl NetworkInterfaceSpec {
    pub fn alias(&self) -> String {
        nic_alias(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkInterfaceState {
    Pending,
    Attached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterfaceStatus {
    pub name: String,
    pub handle: String,
    pub state: NetworkInterfaceState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nic_alias_round_trips() {
        let alias = nic_alias("nic-1");
        assert_eq!(parse_nic_alias(&alias).as_deref(), Some("nic-1"));
    }
}
