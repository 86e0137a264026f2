// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lvp-libvirt: turns a Machine record into a live libvirt domain. Domain
//! Builder (C7), Volume Attacher (C8), and the Image Cache (C6) live here;
//! the Machine Reconciler (C9) in `lvp-engine` is the caller.

pub mod attacher;
pub mod builder;
pub mod client;
pub mod digest;
pub mod domain;
pub mod error;
pub mod image_cache;
pub mod secret;

pub use attacher::{CreationExecutor, Executor, NicAttacher, RunningExecutor, VolumeAttacher};
pub use builder::{build_domain, BuildOutcome, BuildRequest, ImageResolution};
pub use client::{DomainRunState, Hypervisor, LifecycleEvent, ShutdownMode, VirtHypervisor};
pub use domain::capability::{parse_capabilities_xml, select, CapabilityError, GuestCapability, Selected};
pub use domain::{
    Disk, DomainDescriptor, DomainDevice, Interface, GUEST_AGENT_CHANNEL_TARGET, IGNITION_FW_CFG_KEY, ROOTFS_ALIAS,
    ROOTFS_SERIAL, ROOTFS_TARGET_DEV,
};
pub use error::{LibvirtError, LibvirtResult};
pub use image_cache::{GetOutcome, Image, ImageCache, ImageCacheError, ImageConfig};
pub use secret::{auth_secret_uuid, enc_secret_uuid};

#[cfg(any(test, feature = "test-support"))]
pub use client::fake::FakeHypervisor;
