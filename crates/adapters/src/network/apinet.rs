// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stub `apinet` plugin (§4.5.1). The real external control-plane call is
//! out of scope; `apply` writes a descriptor file and returns
//! deterministically from local state, never calling out.

use async_trait::async_trait;
use lvp_core::{MachineId, NetworkInterfaceSpec};
use serde::{Deserialize, Serialize};

use crate::error::PluginError;
use crate::network::{AppliedNic, NicCtx, NicVariant, NetworkInterfacePlugin};

pub const NAME: &str = "apinet";

#[derive(Debug, Default, Clone, Copy)]
pub struct ApinetPlugin;

#[derive(Debug, Serialize, Deserialize)]
struct ApiNetDescriptor {
    handle: String,
    ips: Vec<String>,
    attributes: std::collections::HashMap<String, String>,
}

fn descriptor_path(ctx: &NicCtx, name: &str) -> std::path::PathBuf {
    ctx.root
        .join("machines")
        .join(ctx.machine_id.to_string())
        .join("networkinterfaces")
        .join(name)
        .join("api-net.json")
}

#[async_trait]
impl NetworkInterfacePlugin for ApinetPlugin {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn apply(
        &self,
        ctx: &NicCtx,
        spec: &NetworkInterfaceSpec,
    ) -> Result<AppliedNic, PluginError> {
        let handle = format!("{NAME}/{}", spec.name);
        let path = descriptor_path(ctx, &spec.name);
        std::fs::create_dir_all(path.parent().expect("has parent"))?;
        let descriptor = ApiNetDescriptor {
            handle: handle.clone(),
            ips: spec.ips.clone(),
            attributes: spec.attributes.clone(),
        };
        std::fs::write(&path, serde_json::to_vec_pretty(&descriptor).map_err(|e| {
            PluginError::Other(format!("serializing api-net descriptor: {e}"))
        })?)?;

        Ok(AppliedNic {
            handle,
            variant: NicVariant::ProviderNetwork(spec.network_id.clone()),
        })
    }

    async fn delete(
        &self,
        ctx: &NicCtx,
        name: &str,
        _machine_id: MachineId,
    ) -> Result<(), PluginError> {
        let dir = descriptor_path(ctx, name).parent().expect("has parent").to_path_buf();
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn apply_writes_descriptor_and_returns_provider_network() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = NicCtx { root: tmp.path().to_path_buf(), machine_id: MachineId::new() };
        let spec = NetworkInterfaceSpec {
            name: "nic-1".into(),
            network_id: "net-a".into(),
            ips: vec!["10.0.0.5".into()],
            attributes: HashMap::new(),
        };

        let applied = ApinetPlugin.apply(&ctx, &spec).await.unwrap();
        assert_eq!(applied.variant, NicVariant::ProviderNetwork("net-a".into()));
        assert!(descriptor_path(&ctx, "nic-1").exists());
    }
}
