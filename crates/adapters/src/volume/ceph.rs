// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ceph RBD volumes. Purely descriptive: unlike the file-backed plugins,
//! `apply` never touches local disk — it parses `VolumeSource::Connection`
//! into an RBD disk descriptor the domain builder renders as a network
//! disk, and any real I/O happens inside libvirt/qemu against the cluster.

use std::path::Path;

use async_trait::async_trait;
use lvp_core::{MachineId, VolumeSource, VolumeSpec};

use crate::error::PluginError;
use crate::volume::{AppliedVolume, CephDisk, LuksEncryption, VolumeCtx, VolumeLocation, VolumePlugin};

pub const NAME: &str = "ceph";

#[derive(Debug, Default, Clone, Copy)]
pub struct CephPlugin;

#[async_trait]
impl VolumePlugin for CephPlugin {
    fn name(&self) -> &'static str {
        NAME
    }

    fn can_support(&self, spec: &VolumeSpec) -> bool {
        matches!(&spec.source, VolumeSource::Connection { driver, .. } if driver == NAME)
    }

    async fn apply(
        &self,
        _ctx: &VolumeCtx,
        spec: &VolumeSpec,
        _image_rootfs: Option<&Path>,
    ) -> Result<AppliedVolume, PluginError> {
        let VolumeSource::Connection {
            handle: _,
            attributes,
            secret_data,
            encryption_data,
            effective_storage_bytes,
            ..
        } = &spec.source
        else {
            return Err(PluginError::Other(format!(
                "ceph plugin cannot apply spec with source {:?}",
                spec.source
            )));
        };

        let monitors = attributes
            .get("monitors")
            .map(|m| m.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        let image = attributes.get("image").cloned().unwrap_or_default();
        let user_id = secret_data.get("userID").cloned().unwrap_or_default();
        let key = secret_data.get("userKey").cloned().unwrap_or_default();
        let encryption = encryption_data.get("encryptionPassphrase").map(|key| LuksEncryption {
            key: key.clone(),
        });

        Ok(AppliedVolume {
            location: VolumeLocation::Ceph(CephDisk { monitors, image, user_id, key, encryption }),
            handle: self.handle(spec),
            size: effective_storage_bytes.unwrap_or(0),
        })
    }

    async fn delete(
        &self,
        _ctx: &VolumeCtx,
        _volume_name: &str,
        _machine_id: MachineId,
    ) -> Result<(), PluginError> {
        // Nothing local to clean up; the RBD image itself outlives the Machine.
        Ok(())
    }

    async fn get_size(&self, _ctx: &VolumeCtx, spec: &VolumeSpec) -> Result<u64, PluginError> {
        match &spec.source {
            VolumeSource::Connection { effective_storage_bytes, .. } => {
                Ok(effective_storage_bytes.unwrap_or(0))
            }
            _ => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn apply_parses_monitors_and_secret_data() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = VolumeCtx { root: tmp.path().to_path_buf(), machine_id: MachineId::new() };

        let mut attributes = HashMap::new();
        attributes.insert("monitors".to_string(), "host:6789".to_string());
        attributes.insert("image".to_string(), "rbd/img".to_string());
        let mut secret_data = HashMap::new();
        secret_data.insert("userID".to_string(), "user1".to_string());
        secret_data.insert("userKey".to_string(), "a2V5".to_string());

        let spec = VolumeSpec {
            name: "disk-1".into(),
            device: "oda".into(),
            source: VolumeSource::Connection {
                driver: "ceph".into(),
                handle: "dummy".into(),
                attributes,
                secret_data,
                encryption_data: HashMap::new(),
                effective_storage_bytes: Some(1024),
            },
        };

        let applied = CephPlugin.apply(&ctx, &spec, None).await.unwrap();
        let VolumeLocation::Ceph(disk) = applied.location else { panic!("expected ceph location") };
        assert_eq!(disk.monitors, vec!["host:6789"]);
        assert_eq!(disk.image, "rbd/img");
        assert_eq!(disk.user_id, "user1");
        assert_eq!(applied.size, 1024);
    }
}
