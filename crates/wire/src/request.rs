// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Requests the MRI server accepts over its Unix socket (§4.10).

use std::collections::HashMap;
use std::time::SystemTime;

use lvp_core::{GuestAgentType, MachineId, NetworkInterfaceSpec, Power, Selector, VolumeSpec};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    CreateMachine {
        class: String,
        power: Power,
        #[serde(default)]
        labels: HashMap<String, String>,
        #[serde(default)]
        annotations: HashMap<String, String>,
        #[serde(default)]
        image: Option<String>,
        #[serde(default)]
        ignition: Option<Vec<u8>>,
        #[serde(default)]
        guest_agent: GuestAgentType,
        #[serde(default)]
        volumes: Vec<VolumeSpec>,
        #[serde(default)]
        network_interfaces: Vec<NetworkInterfaceSpec>,
    },

    DeleteMachine {
        id: MachineId,
    },

    ListMachines {
        #[serde(default)]
        id: Option<MachineId>,
        #[serde(default)]
        label_selector: Selector,
    },

    UpdateMachinePower {
        id: MachineId,
        power: Power,
    },

    UpdateMachineAnnotations {
        id: MachineId,
        annotations: HashMap<String, String>,
    },

    AttachVolume {
        id: MachineId,
        volume: VolumeSpec,
    },

    DetachVolume {
        id: MachineId,
        name: String,
    },

    UpdateVolume {
        id: MachineId,
        volume: VolumeSpec,
    },

    AttachNetworkInterface {
        id: MachineId,
        network_interface: NetworkInterfaceSpec,
    },

    DetachNetworkInterface {
        id: MachineId,
        name: String,
    },

    Exec {
        id: MachineId,
    },

    ListEvents {
        #[serde(default)]
        label_selector: Selector,
        #[serde(default)]
        events_from_time: Option<SystemTime>,
        #[serde(default)]
        events_to_time: Option<SystemTime>,
    },

    Status,

    Version,
}
