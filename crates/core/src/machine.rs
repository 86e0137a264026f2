// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Machine resource: spec, status, and the envelope fields the object
//! store (`lvp-storage`) round-trips.

use std::collections::{BTreeSet, HashMap};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::id::MachineId;
use crate::network::{NetworkInterfaceSpec, NetworkInterfaceStatus};
use crate::resource::{CreateStrategy, Resource};
use crate::volume::{VolumeSpec, VolumeStatus};

/// Finalizer the reconciler inserts before provisioning and removes only
/// after full teardown (I2).
pub const MACHINE_FINALIZER: &str = "machine";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Power {
    On,
    Off,
}

crate::simple_display! {
    Power {
        On => "on",
        Off => "off",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestAgentType {
    #[default]
    None,
    QemuGuestAgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    Pending,
    Running,
    Suspended,
    Terminating,
    Terminated,
}

crate::simple_display! {
    MachineState {
        Pending => "pending",
        Running => "running",
        Suspended => "suspended",
        Terminating => "terminating",
        Terminated => "terminated",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestAgentStatus {
    /// Unix-socket address the guest agent channel is bound at.
    pub addr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSpec {
    pub power: Power,
    pub cpu: u32,
    pub memory_bytes: u64,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default, with = "ignition_bytes")]
    pub ignition: Option<Vec<u8>>,
    /// Set by the reconciler on the first deletion pass.
    #[serde(default)]
    pub shutdown_at: Option<SystemTime>,
    #[serde(default)]
    pub guest_agent: GuestAgentType,
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterfaceSpec>,
}

/// `ignition` is carried as an opaque byte payload but JSON has no native
/// bytes type; serialize through base64 the way the teacher serializes other
/// binary blobs at its JSON boundaries.
mod ignition_bytes {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .encode(bytes)
                    .serialize(s)
            }
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let opt: Option<String> = Option::deserialize(d)?;
        match opt {
            Some(s) => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(s)
                    .map(Some)
                    .map_err(serde::de::Error::custom)
            }
            None => Ok(None),
        }
    }
}

impl MachineSpec {
    pub fn new(power: Power, cpu: u32, memory_bytes: u64) -> Self {
        Self {
            power,
            cpu,
            memory_bytes,
            image: None,
            ignition: None,
            shutdown_at: None,
            guest_agent: GuestAgentType::None,
            volumes: Vec::new(),
            network_interfaces: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineStatus {
    pub state: MachineState,
    #[serde(default)]
    pub image_ref: Option<String>,
    #[serde(default)]
    pub volume_status: Vec<VolumeStatus>,
    #[serde(default)]
    pub network_interface_status: Vec<NetworkInterfaceStatus>,
    #[serde(default)]
    pub guest_agent_status: Option<GuestAgentStatus>,
}

impl MachineStatus {
    pub fn pending() -> Self {
        Self {
            state: MachineState::Pending,
            image_ref: None,
            volume_status: Vec::new(),
            network_interface_status: Vec::new(),
            guest_agent_status: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub id: MachineId,
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub created_at: Option<SystemTime>,
    #[serde(default)]
    pub deleted_at: Option<SystemTime>,
    #[serde(default)]
    pub finalizers: BTreeSet<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    pub spec: MachineSpec,
    pub status: MachineStatus,
}

impl Machine {
    /// Construct a fresh, not-yet-stored Machine. The store's `create`
    /// assigns `created_at`/`resource_version`/`generation` and resets
    /// `status` via [`MachineCreateStrategy`] — callers should not rely on
    /// the values set here surviving `create`.
    pub fn new(spec: MachineSpec) -> Self {
        Self {
            id: MachineId::new(),
            generation: 0,
            resource_version: 0,
            created_at: None,
            deleted_at: None,
            finalizers: BTreeSet::new(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
            spec,
            status: MachineStatus::pending(),
        }
    }

    pub fn has_machine_finalizer(&self) -> bool {
        self.finalizers.contains(MACHINE_FINALIZER)
    }

    pub fn is_deleting(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Resource for Machine {
    fn id(&self) -> MachineId {
        self.id
    }

    fn resource_version(&self) -> u64 {
        self.resource_version
    }

    fn set_resource_version(&mut self, v: u64) {
        self.resource_version = v;
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn set_generation(&mut self, v: u64) {
        self.generation = v;
    }

    fn created_at(&self) -> Option<SystemTime> {
        self.created_at
    }

    fn set_created_at(&mut self, t: SystemTime) {
        self.created_at = Some(t);
    }

    fn deleted_at(&self) -> Option<SystemTime> {
        self.deleted_at
    }

    fn set_deleted_at(&mut self, t: SystemTime) {
        self.deleted_at = Some(t);
    }

    fn finalizers(&self) -> &BTreeSet<String> {
        &self.finalizers
    }

    fn finalizers_mut(&mut self) -> &mut BTreeSet<String> {
        &mut self.finalizers
    }

    fn spec_differs_from(&self, other: &Self) -> bool {
        self.spec != other.spec
    }
}

/// Resets `status` to `{state: Pending}` on create, regardless of what the
/// caller supplied — callers only ever author `spec`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MachineCreateStrategy;

impl CreateStrategy<Machine> for MachineCreateStrategy {
    fn prepare(&self, obj: &mut Machine) {
        obj.status = MachineStatus::pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_machine_has_pending_status_and_no_finalizers() {
        let m = Machine::new(MachineSpec::new(Power::On, 4, 8 << 30));
        assert_eq!(m.status.state, MachineState::Pending);
        assert!(m.finalizers.is_empty());
        assert!(!m.has_machine_finalizer());
    }

    #[test]
    fn create_strategy_resets_status_to_pending() {
        let mut m = Machine::new(MachineSpec::new(Power::On, 1, 1));
        m.status.state = MachineState::Running;
        MachineCreateStrategy.prepare(&mut m);
        assert_eq!(m.status.state, MachineState::Pending);
    }

    #[test]
    fn ignition_bytes_round_trip_through_json() {
        let mut spec = MachineSpec::new(Power::On, 1, 1);
        spec.ignition = Some(vec![0u8, 1, 2, 255]);
        let json = serde_json::to_string(&spec).unwrap();
        let back: MachineSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ignition, spec.ignition);
    }
}
