// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lvp-core: data model, ids, clock, and error taxonomy shared by every
//! crate in the libvirt machine provider.

pub mod clock;
pub mod error;
pub mod event;
pub mod id;
pub mod macros;
pub mod machine;
pub mod network;
pub mod resource;
pub mod selector;
pub mod volume;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, FakeClock, SystemClock};
pub use error::{CoreError, CoreResult};
pub use event::{Event, EventType};
pub use id::{EventId, MachineId};
pub use machine::{
    GuestAgentStatus, GuestAgentType, Machine, MachineCreateStrategy, MachineSpec, MachineState,
    MachineStatus, Power, MACHINE_FINALIZER,
};
pub use network::{nic_alias, parse_nic_alias, NetworkInterfaceSpec, NetworkInterfaceState, NetworkInterfaceStatus};
pub use resource::{CreateStrategy, Resource};
pub use selector::{selector_matches, Selector};
pub use volume::{parse_volume_alias, volume_alias, VolumeSource, VolumeSpec, VolumeState, VolumeStatus};
