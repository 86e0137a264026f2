// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup: create the on-disk layout, open the object store, wire
//! the reconciler, and bind the MRI socket last.

use std::sync::Arc;

use lvp_core::{Machine, SystemClock};
use lvp_engine::{EventStore, Reconciler, ReconcilerConfig, WorkQueue};
use lvp_libvirt::{Hypervisor, ImageCache, LibvirtError, VirtHypervisor};
use lvp_plugins::network::NetworkInterfacePluginRegistry;
use lvp_plugins::volume::VolumePluginRegistry;
use lvp_storage::ObjectStore;
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{Config, ConfigError};
use crate::listener::{ListenCtx, Listener};
use crate::machine_class::{MachineClassError, MachineClassSet};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    MachineClass(#[from] MachineClassError),

    #[error("could not create directory {0}: {1}")]
    CreateDir(std::path::PathBuf, std::io::Error),

    #[error("could not bind socket {0}: {1}")]
    Bind(std::path::PathBuf, std::io::Error),

    #[error("could not remove stale socket {0}: {1}")]
    RemoveStaleSocket(std::path::PathBuf, std::io::Error),

    #[error(transparent)]
    Store(#[from] lvp_core::CoreError),

    #[error(transparent)]
    Libvirt(#[from] LibvirtError),
}

/// Everything spawned at startup, kept alive for the duration of the
/// process and torn down together on shutdown.
pub struct DaemonHandle {
    reconciler: Arc<Reconciler<SystemClock>>,
    tasks: Vec<JoinHandle<()>>,
}

impl DaemonHandle {
    pub fn shutdown(&self) {
        self.reconciler.shutdown();
    }

    /// Wait for every background task to observe cancellation and exit.
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Create `<root>/store/machines` and `<root>/images`, open the object
/// store, wire the reconciler against a real libvirt connection, and bind
/// the Unix socket last so the daemon never advertises readiness before
/// every other dependency is live.
pub async fn startup(config: &Config) -> Result<DaemonHandle, DaemonError> {
    let store_dir = config.root_dir.join("store").join("machines");
    let images_dir = config.root_dir.join("images");
    std::fs::create_dir_all(&store_dir).map_err(|e| DaemonError::CreateDir(store_dir.clone(), e))?;
    std::fs::create_dir_all(&images_dir).map_err(|e| DaemonError::CreateDir(images_dir.clone(), e))?;

    let machine_classes = Arc::new(MachineClassSet::load(&config.supported_machine_classes)?);
    info!(classes = machine_classes.iter().count(), "loaded machine classes");

    let store = Arc::new(ObjectStore::<Machine>::open(store_dir)?);
    let queue = Arc::new(WorkQueue::new());
    let events = Arc::new(EventStore::new(config.machine_event_max_events, config.machine_event_ttl));

    let hypervisor: Arc<dyn Hypervisor> = Arc::new(VirtHypervisor::open(config.libvirt_uri())?);
    let image_cache = ImageCache::spawn(images_dir);
    let volume_plugins = VolumePluginRegistry::with_builtins();
    let nic_plugins = NetworkInterfacePluginRegistry::with_builtins();

    let mut reconciler_config = ReconcilerConfig::new(config.root_dir.clone());
    reconciler_config.domain_type_prefs = config.libvirt.preferred_domain_types.clone();
    reconciler_config.machine_type_prefs = config.libvirt.preferred_machine_types.clone();
    reconciler_config.enable_hugepages = config.enable_hugepages;
    reconciler_config.resync_interval_volume_size = config.volume_size_resync_interval;
    reconciler_config.resync_interval_gc = config.gc_resync_interval;
    reconciler_config.gc_grace = config.gc_vm_graceful_shutdown_timeout;
    reconciler_config.volume_cache_policy = config.volume_cache_policy.as_str().to_string();

    let reconciler = Reconciler::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&events),
        hypervisor,
        image_cache,
        volume_plugins,
        nic_plugins,
        reconciler_config,
        SystemClock,
    );

    let mut tasks = reconciler.spawn();
    tasks.push(events.spawn_sweeper(config.machine_event_resync_interval));

    if config.address.exists() {
        std::fs::remove_file(&config.address).map_err(|e| DaemonError::RemoveStaleSocket(config.address.clone(), e))?;
    }
    if let Some(parent) = config.address.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DaemonError::CreateDir(parent.to_path_buf(), e))?;
    }
    let unix = UnixListener::bind(&config.address).map_err(|e| DaemonError::Bind(config.address.clone(), e))?;

    let ctx = Arc::new(ListenCtx::new(store, events, machine_classes));
    tasks.push(tokio::spawn(Listener::new(unix, ctx).run()));

    info!(address = %config.address.display(), "MRI server listening");
    Ok(DaemonHandle { reconciler, tasks })
}
