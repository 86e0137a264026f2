// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use async_trait::async_trait;
use lvp_core::{MachineId, VolumeSource, VolumeSpec};

use crate::error::PluginError;
use crate::volume::{AppliedVolume, VolumeCtx, VolumeLocation, VolumePlugin};

pub const NAME: &str = "local-disk";

/// A spec volume backed by a raw file under the Machine's volume tree,
/// optionally seeded from a pulled image's RootFS layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalDiskPlugin;

fn disk_path(ctx: &VolumeCtx, name: &str) -> std::path::PathBuf {
    ctx.volume_dir(NAME, name).join("disk.raw")
}

fn create_sparse_file(path: &Path, size: u64) -> Result<(), PluginError> {
    std::fs::create_dir_all(path.parent().expect("disk path always has a parent"))?;
    let mut file = File::create(path)?;
    if size > 0 {
        file.seek(SeekFrom::Start(size - 1))?;
        file.write_all(&[0u8])?;
    }
    Ok(())
}

#[async_trait]
impl VolumePlugin for LocalDiskPlugin {
    fn name(&self) -> &'static str {
        NAME
    }

    fn can_support(&self, spec: &VolumeSpec) -> bool {
        matches!(spec.source, VolumeSource::LocalDisk { .. })
    }

    async fn apply(
        &self,
        ctx: &VolumeCtx,
        spec: &VolumeSpec,
        image_rootfs: Option<&Path>,
    ) -> Result<AppliedVolume, PluginError> {
        let VolumeSource::LocalDisk { size, image_ref } = &spec.source else {
            return Err(PluginError::Other(format!(
                "local-disk plugin cannot apply spec with source {:?}",
                spec.source
            )));
        };

        let path = disk_path(ctx, &spec.name);
        if !path.exists() {
            match (image_ref, image_rootfs) {
                (Some(_), Some(rootfs)) => {
                    std::fs::create_dir_all(path.parent().expect("has parent"))?;
                    std::fs::copy(rootfs, &path)?;
                }
                _ => create_sparse_file(&path, *size)?,
            }
        }

        Ok(AppliedVolume {
            location: VolumeLocation::File(path),
            handle: self.handle(spec),
            size: *size,
        })
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
    use lvp_core::VolumeSpec;

    fn ctx() -> (tempfile::TempDir, VolumeCtx) {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = VolumeCtx { root: tmp.path().to_path_buf(), machine_id: MachineId::new() };
        (tmp, ctx)
    }

    #[tokio::test]
    async fn apply_without_image_ref_creates_sparse_file_of_requested_size() {
        let (_tmp, ctx) = ctx();
        let spec = VolumeSpec {
            name: "disk-1".into(),
            device: "oda".into(),
            source: VolumeSource::LocalDisk { size: 4096, image_ref: None },
        };

        let applied = LocalDiskPlugin.apply(&ctx, &spec, None).await.unwrap();
        assert_eq!(applied.size, 4096);
        let VolumeLocation::File(path) = applied.location else { panic!("expected file location") };
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn apply_with_image_ref_copies_rootfs_layer() {
        let (tmp, ctx) = ctx();
        let rootfs = tmp.path().join("rootfs.img");
        std::fs::write(&rootfs, b"rootfs-bytes").unwrap();

        let spec = VolumeSpec {
            name: "disk-1".into(),
            device: "oda".into(),
            source: VolumeSource::LocalDisk { size: 12, image_ref: Some("img:latest".into()) },
        };

        let applied = LocalDiskPlugin.apply(&ctx, &spec, Some(&rootfs)).await.unwrap();
        let VolumeLocation::File(path) = applied.location else { panic!("expected file location") };
        assert_eq!(std::fs::read(&path).unwrap(), b"rootfs-bytes");
    }

    #[test]
    fn handle_is_plugin_name_slash_backing_id() {
        let spec = VolumeSpec {
            name: "disk-1".into(),
            device: "oda".into(),
            source: VolumeSource::LocalDisk { size: 1, image_ref: None },
        };
        assert_eq!(LocalDiskPlugin.handle(&spec), "local-disk/disk-1");
    }
}
