// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Network-Interface Plugin (C5): applies and deletes NIC attachments by
//! driver.

mod apinet;
mod isolated;
mod providernet;
mod registry;

pub use apinet::ApinetPlugin;
pub use isolated::IsolatedPlugin;
pub use providernet::ProviderNetPlugin;
pub use registry::NetworkInterfacePluginRegistry;

use std::path::PathBuf;

use async_trait::async_trait;
use lvp_core::{MachineId, NetworkInterfaceSpec};

use crate::error::PluginError;

/// Attribute key selecting which plugin handles a NIC spec; defaults to
/// `"isolated"` when absent.
pub const DRIVER_ATTRIBUTE: &str = "driver";
pub const DEFAULT_DRIVER: &str = "isolated";

pub fn driver_for(spec: &NetworkInterfaceSpec) -> &str {
    spec.attributes.get(DRIVER_ATTRIBUTE).map(String::as_str).unwrap_or(DEFAULT_DRIVER)
}

#[derive(Debug, Clone)]
pub struct NicCtx {
    pub root: PathBuf,
    pub machine_id: MachineId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NicVariant {
    HostDevice(String),
    Direct(String),
    Isolated,
    ProviderNetwork(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedNic {
    pub handle: String,
    pub variant: NicVariant,
}

#[async_trait]
pub trait NetworkInterfacePlugin: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(
        &self,
        ctx: &NicCtx,
        spec: &NetworkInterfaceSpec,
    ) -> Result<AppliedNic, PluginError>;

    async fn delete(
        &self,
        ctx: &NicCtx,
        name: &str,
        machine_id: MachineId,
    ) -> Result<(), PluginError>;
}
