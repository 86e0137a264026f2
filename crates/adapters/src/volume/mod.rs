// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Volume Plugin Registry (C4): resolves a volume spec to a driver that can
//! materialize, resize, and delete its backing storage.

mod ceph;
mod empty_disk;
mod local_disk;
mod registry;

pub use ceph::CephPlugin;
pub use empty_disk::EmptyDiskPlugin;
pub use local_disk::LocalDiskPlugin;
pub use registry::VolumePluginRegistry;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lvp_core::{MachineId, VolumeSpec};

use crate::error::PluginError;

/// Default size for an `empty_disk` volume that does not specify one.
pub const DEFAULT_EMPTY_DISK_SIZE: u64 = 500 << 20;

/// Shared context every volume plugin call receives.
#[derive(Debug, Clone)]
pub struct VolumeCtx {
    pub root: PathBuf,
    pub machine_id: MachineId,
}

impl VolumeCtx {
    /// `<root>/machines/<id>/volumes/<plugin>/<name>`
    pub fn volume_dir(&self, plugin: &str, name: &str) -> PathBuf {
        self.root
            .join("machines")
            .join(self.machine_id.to_string())
            .join("volumes")
            .join(plugin)
            .join(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LuksEncryption {
    pub key: String,
}

/// Where a materialized volume's bytes live, in enough detail for the
/// domain builder to render disk XML (§4.7) without talking to the plugin
/// again.
#[derive(Debug, Clone, PartialEq)]
pub enum VolumeLocation {
    File(PathBuf),
    Ceph(CephDisk),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CephDisk {
    pub monitors: Vec<String>,
    pub image: String,
    pub user_id: String,
    pub key: String,
    pub encryption: Option<LuksEncryption>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedVolume {
    pub location: VolumeLocation,
    /// Canonical `"<plugin_name>/<backing_id>"` (I4).
    pub handle: String,
    pub size: u64,
}

#[async_trait]
pub trait VolumePlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this plugin's driver matches `spec`'s source variant.
    fn can_support(&self, spec: &VolumeSpec) -> bool;

    /// The backing-id half of the volume handle (I4); by default the spec
    /// volume's own name, which is unique within a Machine.
    fn backing_volume_id(&self, spec: &VolumeSpec) -> String {
        spec.name.clone()
    }

    fn handle(&self, spec: &VolumeSpec) -> String {
        format!("{}/{}", self.name(), self.backing_volume_id(spec))
    }

    /// `image_rootfs` is the resolved RootFS layer path for `spec.source`'s
    /// `image_ref`, when set (the image cache, C6, has already been
    /// consulted by the caller); plugins that do not use an image ignore
    /// it.
    async fn apply(
        &self,
        ctx: &VolumeCtx,
        spec: &VolumeSpec,
        image_rootfs: Option<&Path>,
    ) -> Result<AppliedVolume, PluginError>;

    async fn delete(
        &self,
        ctx: &VolumeCtx,
        volume_name: &str,
        machine_id: MachineId,
    ) -> Result<(), PluginError>;

    async fn get_size(&self, ctx: &VolumeCtx, spec: &VolumeSpec) -> Result<u64, PluginError>;
}
