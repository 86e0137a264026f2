// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use async_trait::async_trait;
use lvp_core::{MachineId, NetworkInterfaceSpec};

use crate::error::PluginError;
use crate::network::{AppliedNic, NicCtx, NicVariant, NetworkInterfacePlugin};

pub const NAME: &str = "isolated";

/// No external connectivity: a libvirt network with no forwarding.
#[derive(Debug, Default, Clone, Copy)]
pub struct IsolatedPlugin;

#[async_trait]
impl NetworkInterfacePlugin for IsolatedPlugin {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn apply(
        &self,
        _ctx: &NicCtx,
        spec: &NetworkInterfaceSpec,
    ) -> Result<AppliedNic, PluginError> {
        Ok(AppliedNic { handle: format!("{NAME}/{}", spec.name), variant: NicVariant::Isolated })
    }

    async fn delete(
        &self,
        _ctx: &NicCtx,
        _name: &str,
        _machine_id: MachineId,
    ) -> Result<(), PluginError> {
        Ok(())
    }
}
