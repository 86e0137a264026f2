// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use async_trait::async_trait;
use lvp_core::{MachineId, VolumeSource, VolumeSpec};

use crate::error::PluginError;
use crate::volume::{AppliedVolume, VolumeCtx, VolumeLocation, VolumePlugin, DEFAULT_EMPTY_DISK_SIZE};

pub const NAME: &str = "empty-disk";

/// An always-sparse scratch disk with no image seeding.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyDiskPlugin;

fn disk_path(ctx: &VolumeCtx, name: &str) -> std::path::PathBuf {
    ctx.volume_dir(NAME, name).join("disk.raw")
}

#[async_trait]
impl VolumePlugin for EmptyDiskPlugin {
    fn name(&self) -> &'static str {
        NAME
    }

    fn can_support(&self, spec: &VolumeSpec) -> bool {
        matches!(spec.source, VolumeSource::EmptyDisk { .. })
    }

    async fn apply(
        &self,
        ctx: &VolumeCtx,
        spec: &VolumeSpec,
        _image_rootfs: Option<&Path>,
    ) -> Result<AppliedVolume, PluginError> {
        let VolumeSource::EmptyDisk { size } = &spec.source else {
            return Err(PluginError::Other(format!(
                "empty-disk plugin cannot apply spec with source {:?}",
                spec.source
            )));
        };
        let size = if *size == 0 { DEFAULT_EMPTY_DISK_SIZE } else { *size };

        let path = disk_path(ctx, &spec.name);
        if !path.exists() {
            std::fs::create_dir_all(path.parent().expect("has parent"))?;
            let mut file = File::create(&path)?;
            file.seek(SeekFrom::Start(size - 1))?;
            file.write_all(&[0u8])?;
        }

        Ok(AppliedVolume { location: VolumeLocation::File(path), handle: self.handle(spec), size })
    }

    async fn delete(
        &self,
        ctx: &VolumeCtx,
        volume_name: &str,
        _machine_id: MachineId,
    ) -> Result<(), PluginError> {
        let dir = ctx.volume_dir(NAME, volume_name);
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    async fn get_size(&self, ctx: &VolumeCtx, spec: &VolumeSpec) -> Result<u64, PluginError> {
        let path = disk_path(ctx, &spec.name);
        Ok(std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_size_defaults_to_500_mib() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = VolumeCtx { root: tmp.path().to_path_buf(), machine_id: MachineId::new() };
        let spec = VolumeSpec {
            name: "scratch".into(),
            device: "odb".into(),
            source: VolumeSource::EmptyDisk { size: 0 },
        };

        let applied = EmptyDiskPlugin.apply(&ctx, &spec, None).await.unwrap();
        assert_eq!(applied.size, DEFAULT_EMPTY_DISK_SIZE);
    }
}
