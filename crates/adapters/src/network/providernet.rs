// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use async_trait::async_trait;
use lvp_core::{MachineId, NetworkInterfaceSpec};

use crate::error::PluginError;
use crate::network::{AppliedNic, NicCtx, NicVariant, NetworkInterfacePlugin};

pub const NAME: &str = "providernet";

/// Records `spec.network_id` as the attached provider network's identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProviderNetPlugin;

#[async_trait]
impl NetworkInterfacePlugin for ProviderNetPlugin {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn apply(
        &self,
        _ctx: &NicCtx,
        spec: &NetworkInterfaceSpec,
    ) -> Result<AppliedNic, PluginError> {
        Ok(AppliedNic {
            handle: format!("{NAME}/{}", spec.name),
            variant: NicVariant::ProviderNetwork(spec.network_id.clone()),
        })
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
