// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test-only builders and proptest strategies shared across crates'
//! `test-support`-gated test code. Never built into production binaries.

use std::collections::HashMap;

use proptest::prelude::*;

use crate::machine::{Machine, MachineSpec, Power};
use crate::network::NetworkInterfaceSpec;
use crate::volume::{VolumeSource, VolumeSpec};

/// A minimal running Machine with no volumes or NICs, handy as a test
/// fixture base.
pub fn sample_machine() -> Machine {
    Machine::new(MachineSpec::new(Power::On, 1, 256 << 20))
}

pub fn sample_volume_spec(name: &str) -> VolumeSpec {
    VolumeSpec {
        name: name.to_string(),
        device: "oda".to_string(),
        source: VolumeSource::EmptyDisk { size: 1 << 30 },
    }
}

pub fn sample_nic_spec(name: &str) -> NetworkInterfaceSpec {
    NetworkInterfaceSpec {
        name: name.to_string(),
        network_id: "default".to_string(),
        ips: Vec::new(),
        attributes: HashMap::new(),
    }
}

/// Arbitrary ASCII volume/NIC name, including edge cases like the empty
/// string, that the alias codecs (P6) must round-trip.
pub fn arb_alias_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[a-zA-Z0-9_./-]{0,32}",
        "\\PC{0,16}",
    ]
}

pub fn arb_cpu() -> impl Strategy<Value = u32> {
    1u32..=256
}

pub fn arb_memory_bytes() -> impl Strategy<Value = u64> {
    (1u64 << 20)..(1u64 << 40)
}
