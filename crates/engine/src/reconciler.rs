// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Machine Reconciler (C9): the single class wiring the Object Store,
//! Image Cache, Volume/NIC plugin registries, and the Hypervisor client
//! into one controller loop driven by the [`crate::queue::WorkQueue`]
//! (§4.9).
//!
//! Four background tasks feed the queue (store watch, libvirt lifecycle
//! events, a periodic volume-size probe, a periodic GC sweep) and a pool of
//! workers drain it, each running [`Reconciler::reconcile`] for one
//! [`MachineId`] at a time.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lvp_core::error::CoreResult;
use lvp_core::event::reason;
use lvp_core::{
    Clock, CoreError, Event, GuestAgentStatus, GuestAgentType, Machine, MachineId, MachineState, MachineStatus,
    NetworkInterfaceSpec, NetworkInterfaceState, NetworkInterfaceStatus, SystemClock, VolumeSource, VolumeSpec,
    VolumeState, VolumeStatus, MACHINE_FINALIZER,
};
use lvp_libvirt::{
    build_domain, BuildRequest, DomainDescriptor, DomainRunState, Executor, GetOutcome, Hypervisor, ImageCache,
    ImageResolution, LibvirtError, NicAttacher, RunningExecutor, ShutdownMode, VolumeAttacher,
};
use lvp_plugins::network::{NetworkInterfacePluginRegistry, NicCtx};
use lvp_plugins::volume::{VolumeCtx, VolumePluginRegistry};
use lvp_storage::ObjectStore;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::event_store::EventStore;
use crate::queue::WorkQueue;

/// Default concurrent worker count draining the queue (§4.9).
pub const DEFAULT_WORKER_COUNT: usize = 15;
/// Default period for the volume-size probe background task.
pub const DEFAULT_RESYNC_INTERVAL_VOLUME_SIZE: Duration = Duration::from_secs(60);
/// Default period for the GC sweep background task.
pub const DEFAULT_RESYNC_INTERVAL_GC: Duration = Duration::from_secs(60);
/// Default grace window between requesting a graceful shutdown and forcing
/// a destroy.
pub const DEFAULT_GC_GRACE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub root: PathBuf,
    pub domain_type_prefs: Vec<String>,
    pub machine_type_prefs: Vec<String>,
    pub enable_hugepages: bool,
    pub worker_count: usize,
    pub resync_interval_volume_size: Duration,
    pub resync_interval_gc: Duration,
    pub gc_grace: Duration,
    /// Disk cache mode applied to Ceph/RBD volumes (§4.8), e.g. `"writeback"`.
    pub volume_cache_policy: String,
}

impl ReconcilerConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            domain_type_prefs: vec!["kvm".to_string(), "qemu".to_string()],
            machine_type_prefs: vec!["pc-q35".to_string()],
            enable_hugepages: false,
            worker_count: DEFAULT_WORKER_COUNT,
            resync_interval_volume_size: DEFAULT_RESYNC_INTERVAL_VOLUME_SIZE,
            resync_interval_gc: DEFAULT_RESYNC_INTERVAL_GC,
            gc_grace: DEFAULT_GC_GRACE,
            volume_cache_policy: "writeback".to_string(),
        }
    }
}

/// Wires C1–C8 together and drives them from the work queue (§4.9).
pub struct Reconciler<C: Clock = SystemClock> {
    store: Arc<ObjectStore<Machine>>,
    queue: Arc<WorkQueue>,
    events: Arc<EventStore>,
    hypervisor: Arc<dyn Hypervisor>,
    image_cache: ImageCache,
    volume_plugins: VolumePluginRegistry,
    nic_plugins: NetworkInterfacePluginRegistry,
    config: ReconcilerConfig,
    clock: C,
    cancel: CancellationToken,
}

impl<C: Clock + 'static> Reconciler<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ObjectStore<Machine>>,
        queue: Arc<WorkQueue>,
        events: Arc<EventStore>,
        hypervisor: Arc<dyn Hypervisor>,
        image_cache: ImageCache,
        volume_plugins: VolumePluginRegistry,
        nic_plugins: NetworkInterfacePluginRegistry,
        config: ReconcilerConfig,
        clock: C,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            queue,
            events,
            hypervisor,
            image_cache,
            volume_plugins,
            nic_plugins,
            config,
            clock,
            cancel: CancellationToken::new(),
        })
    }

    /// Start the four background ingestion tasks plus `worker_count`
    /// workers; returns their join handles for the caller to track.
    pub fn spawn(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = vec![
            self.spawn_store_watch(),
            self.spawn_lifecycle_ingestion(),
            self.spawn_volume_size_probe(),
            self.spawn_gc_sweep(),
        ];
        for _ in 0..self.config.worker_count {
            handles.push(tokio::spawn(Arc::clone(self).run_worker()));
        }
        handles
    }

    /// Cancel background tasks and unblock workers waiting on the queue.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.queue.shutdown();
    }

    fn spawn_store_watch(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut watch = this.store.watch();
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    event = watch.recv() => {
                        match event {
                            Some(event) => this.queue.add(event.object.id),
                            None => break,
                        }
                    }
                }
            }
        })
    }

    fn spawn_lifecycle_ingestion(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut events = this.hypervisor.subscribe_lifecycle_events();
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    event = events.recv() => {
                        match event {
                            Some(event) => {
                                let id = MachineId::from(event.domain_uuid);
                                if this.store.get(&id).is_ok() {
                                    this.queue.add_rate_limited(id).await;
                                }
                            }
                            None => {
                                warn!("lifecycle event channel closed; exiting ingestion task");
                                break;
                            }
                        }
                    }
                }
            }
        })
    }

    fn spawn_volume_size_probe(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        let interval = this.config.resync_interval_volume_size;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = ticker.tick() => this.probe_volume_sizes().await,
                }
            }
        })
    }

    /// For every non-terminating Machine with the finalizer set, query each
    /// volume's current size; a change from the last recorded size
    /// requeues the machine for reconcile (§4.9).
    async fn probe_volume_sizes(&self) {
        for machine in self.store.list() {
            if machine.is_deleting() || !machine.has_machine_finalizer() {
                continue;
            }
            let ctx = VolumeCtx { root: self.config.root.clone(), machine_id: machine.id };
            for volume in &machine.spec.volumes {
                let Ok(plugin) = self.volume_plugins.find_plugin_by_spec(volume) else { continue };
                let Ok(size) = plugin.get_size(&ctx, volume).await else { continue };
                let recorded = machine.status.volume_status.iter().find(|s| s.name == volume.name).map(|s| s.size);
                if recorded.is_some_and(|r| r != 0 && r != size) {
                    self.queue.add_rate_limited(machine.id).await;
                }
            }
        }
    }

    fn spawn_gc_sweep(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        let interval = this.config.resync_interval_gc;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = ticker.tick() => this.gc_sweep().await,
                }
            }
        })
    }

    async fn gc_sweep(&self) {
        for machine in self.store.list() {
            if machine.deleted_at.is_some() && machine.has_machine_finalizer() {
                if let Err(e) = self.run_deletion_state_machine(machine).await {
                    warn!(error = %e, "deletion state machine step failed; will retry next sweep");
                }
            }
        }
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            let (id, shutdown) = self.queue.get().await;
            let Some(id) = id else {
                if shutdown {
                    break;
                }
                continue;
            };
            if let Err(e) = self.reconcile(id).await {
                warn!(machine_id = %id, error = %e, "reconcile failed; will retry with backoff");
                self.queue.add_rate_limited(id).await;
            }
            self.queue.done(&id);
        }
    }

    /// `reconcile(id)`: the per-Machine state machine (§4.9). Returns
    /// success in every case that does not require the caller to retry
    /// sooner than the queue's own rate limiting already arranges.
    async fn reconcile(&self, id: MachineId) -> CoreResult<()> {
        let mut machine = match self.store.get(&id) {
            Ok(m) => m,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        if machine.is_deleting() {
            // Handled by the GC sweep, not by ordinary reconcile.
            return Ok(());
        }

        if !machine.has_machine_finalizer() {
            machine.finalizers.insert(MACHINE_FINALIZER.to_string());
            self.store.update(machine)?;
            return Ok(());
        }

        let machine_dir = self.config.root.join("machines").join(id.to_string());
        for sub in ["rootfs", "volumes", "ignitions", "networkinterfaces"] {
            tokio::fs::create_dir_all(machine_dir.join(sub)).await?;
        }

        let domain_uuid = id.domain_uuid();
        let existing_xml = self.hypervisor.domain_xml(domain_uuid).await?;

        let status = match existing_xml {
            None => self.reconcile_create(&machine).await?,
            Some(xml) => self.reconcile_running(&machine, xml).await?,
        };

        let Some(status) = status else {
            // Still pulling an image; no status mutation this pass.
            return Ok(());
        };

        machine.status = status;
        self.retry_update(machine, id).await?;
        self.queue.forget(&id);
        Ok(())
    }

    async fn retry_update(&self, machine: Machine, id: MachineId) -> CoreResult<()> {
        match self.store.update(machine) {
            Ok(_) => Ok(()),
            Err(CoreError::ResourceVersionNotLatest { .. }) => {
                self.queue.add(id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Absent-domain branch of step 6: resolve the boot image and every
    /// volume/NIC, build the descriptor (C7), and `create-xml` it.
    /// `Ok(None)` means an image is still pulling.
    async fn reconcile_create(&self, machine: &Machine) -> CoreResult<Option<MachineStatus>> {
        if machine.spec.ignition.is_none() {
            self.events.record(Event::warning(
                machine.id,
                self.clock.system_time(),
                reason::NO_IGNITION_DATA,
                "no ignition payload set",
                machine.labels.clone(),
            ));
        }

        let image = match &machine.spec.image {
            None => ImageResolution::NotRequested,
            Some(image_ref) => match self.image_cache.get(image_ref).await {
                Ok(image) => {
                    self.events.record(Event::normal(
                        machine.id,
                        self.clock.system_time(),
                        reason::PULLED_IMAGE,
                        format!("pulled {image_ref}"),
                        machine.labels.clone(),
                    ));
                    ImageResolution::Ready(image)
                }
                Err(GetOutcome::Pulling) => {
                    self.events.record(Event::normal(
                        machine.id,
                        self.clock.system_time(),
                        reason::PULLING_IMAGE,
                        format!("pulling {image_ref}"),
                        machine.labels.clone(),
                    ));
                    return Ok(None);
                }
            },
        };

        let mut applied_volumes = Vec::new();
        for spec in &machine.spec.volumes {
            let Ok(plugin) = self.volume_plugins.find_plugin_by_spec(spec) else { continue };
            let image_rootfs = match &spec.source {
                VolumeSource::LocalDisk { image_ref: Some(r), .. } => match self.image_cache.get(r).await {
                    Ok(img) => Some(img.rootfs_layer),
                    Err(GetOutcome::Pulling) => return Ok(None),
                },
                _ => None,
            };
            let ctx = VolumeCtx { root: self.config.root.clone(), machine_id: machine.id };
            let Ok(applied) = plugin.apply(&ctx, spec, image_rootfs.as_deref()).await else { continue };
            applied_volumes.push((spec.clone(), applied));
        }

        let mut applied_nics = Vec::new();
        for spec in &machine.spec.network_interfaces {
            let Ok(plugin) = self.nic_plugins.find_plugin_by_spec(spec) else { continue };
            let ctx = NicCtx { root: self.config.root.clone(), machine_id: machine.id };
            let Ok(applied) = plugin.apply(&ctx, spec).await else { continue };
            applied_nics.push((spec.clone(), applied));
        }

        let capabilities = self.hypervisor.capabilities().await?;
        let domain_type_prefs: Vec<&str> = self.config.domain_type_prefs.iter().map(String::as_str).collect();
        let machine_type_prefs: Vec<&str> = self.config.machine_type_prefs.iter().map(String::as_str).collect();

        let outcome = match build_domain(BuildRequest {
            machine,
            root: &self.config.root,
            capabilities: &capabilities,
            domain_type_prefs: &domain_type_prefs,
            machine_type_prefs: &machine_type_prefs,
            enable_hugepages: self.config.enable_hugepages,
            image,
            volumes: &applied_volumes,
            nics: &applied_nics,
            volume_cache_policy: &self.config.volume_cache_policy,
        })
        .await
        {
            Ok(outcome) => outcome,
            Err(LibvirtError::ImagePulling(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let xml = outcome.descriptor.to_xml().map_err(LibvirtError::from)?;
        self.hypervisor.create_xml(xml).await?;

        for (spec, _) in &applied_volumes {
            self.events.record(Event::normal(
                machine.id,
                self.clock.system_time(),
                reason::ATTCHED_VOLUME,
                format!("attached {}", spec.name),
                machine.labels.clone(),
            ));
        }
        for (spec, _) in &applied_nics {
            self.events.record(Event::normal(
                machine.id,
                self.clock.system_time(),
                reason::ATTCHED_NIC,
                format!("attached {}", spec.name),
                machine.labels.clone(),
            ));
        }

        Ok(Some(MachineStatus {
            state: MachineState::Pending,
            image_ref: machine.spec.image.clone(),
            volume_status: applied_volumes
                .iter()
                .map(|(spec, applied)| VolumeStatus {
                    name: spec.name.clone(),
                    handle: applied.handle.clone(),
                    state: VolumeState::Attached,
                    size: applied.size,
                })
                .collect(),
            network_interface_status: applied_nics
                .iter()
                .map(|(spec, applied)| NetworkInterfaceStatus {
                    name: spec.name.clone(),
                    handle: applied.handle.clone(),
                    state: NetworkInterfaceState::Attached,
                })
                .collect(),
            guest_agent_status: outcome.guest_agent_addr.map(|addr| GuestAgentStatus { addr }),
        }))
    }

    /// Present-domain branch of step 6: diff the live descriptor's volumes
    /// and NICs against `spec` and map the domain's run state onto
    /// [`MachineState`] (§4.9's state table).
    async fn reconcile_running(&self, machine: &Machine, xml: String) -> CoreResult<Option<MachineStatus>> {
        let mut descriptor = DomainDescriptor::from_xml(&xml).map_err(LibvirtError::from)?;
        let executor = RunningExecutor::new(Arc::clone(&self.hypervisor));

        let volume_status = {
            let mut attacher = VolumeAttacher::new(&mut descriptor, &executor, &self.config.volume_cache_policy);
            self.reconcile_volumes(&mut attacher, machine).await
        };
        let network_interface_status = {
            let mut attacher = NicAttacher::new(&mut descriptor, &executor);
            self.reconcile_nics(&mut attacher, machine).await
        };

        let run_state = self.hypervisor.domain_state(machine.id.domain_uuid()).await?;
        let state = match run_state {
            Some(DomainRunState::Pending) | None => MachineState::Pending,
            Some(DomainRunState::Running) => MachineState::Running,
            Some(DomainRunState::Terminating) => MachineState::Terminating,
            Some(DomainRunState::Terminated) => MachineState::Terminated,
        };

        Ok(Some(MachineStatus {
            state,
            image_ref: machine.status.image_ref.clone(),
            volume_status,
            network_interface_status,
            guest_agent_status: machine.status.guest_agent_status.clone(),
        }))
    }

    /// Per-volume reconcile (§4.8): `current \ desired` gets detached and
    /// deleted, `desired` gets applied and attached (or resized, if its
    /// recorded size changed).
    async fn reconcile_volumes<E: Executor>(
        &self,
        attacher: &mut VolumeAttacher<'_, E>,
        machine: &Machine,
    ) -> Vec<VolumeStatus> {
        let desired: HashMap<&str, &VolumeSpec> =
            machine.spec.volumes.iter().map(|v| (v.name.as_str(), v)).collect();

        let mut current: BTreeSet<String> = attacher.current_volume_names().into_iter().collect();
        let volumes_root = self.config.root.join("machines").join(machine.id.to_string()).join("volumes");
        for name in scan_volume_dir_names(volumes_root).await {
            current.insert(name);
        }

        for name in &current {
            if desired.contains_key(name.as_str()) {
                continue;
            }
            let old_handle = machine.status.volume_status.iter().find(|s| &s.name == name).map(|s| s.handle.clone());
            if let Err(e) = attacher.detach(name).await {
                if !matches!(e, LibvirtError::DiskNotFound(_)) {
                    self.warn_volume_event(machine, name, &e.to_string());
                }
            }
            if let Some(handle) = old_handle {
                if let Some(plugin_name) = handle.split('/').next() {
                    if let Some(plugin) = self.volume_plugins.get(plugin_name) {
                        let ctx = VolumeCtx { root: self.config.root.clone(), machine_id: machine.id };
                        let _ = plugin.delete(&ctx, name, machine.id).await;
                    }
                }
            }
        }

        let mut statuses = Vec::new();
        for (name, spec) in &desired {
            let ctx = VolumeCtx { root: self.config.root.clone(), machine_id: machine.id };
            let old_status = machine.status.volume_status.iter().find(|s| &s.name == name);

            let plugin = match self.volume_plugins.find_plugin_by_spec(spec) {
                Ok(p) => p,
                Err(_) => continue,
            };

            if let Some(old) = old_status {
                if let Some(old_plugin_name) = old.handle.split('/').next() {
                    if old_plugin_name != plugin.name() {
                        let _ = attacher.detach(name).await;
                        if let Some(old_plugin) = self.volume_plugins.get(old_plugin_name) {
                            let _ = old_plugin.delete(&ctx, name, machine.id).await;
                        }
                    }
                }
            }

            let image_rootfs = match &spec.source {
                VolumeSource::LocalDisk { image_ref: Some(r), .. } => {
                    self.image_cache.get(r).await.ok().map(|img| img.rootfs_layer)
                }
                _ => None,
            };

            let applied = match plugin.apply(&ctx, spec, image_rootfs.as_deref()).await {
                Ok(a) => a,
                Err(_) => continue,
            };

            match attacher.attach(spec, &applied).await {
                Ok(()) => {
                    self.events.record(Event::normal(
                        machine.id,
                        self.clock.system_time(),
                        reason::ATTCHED_VOLUME,
                        format!("attached {name}"),
                        machine.labels.clone(),
                    ));
                }
                Err(LibvirtError::DiskAlreadyExists(_)) => {}
                Err(e) => {
                    self.warn_volume_event(machine, name, &e.to_string());
                    continue;
                }
            }

            let size = plugin.get_size(&ctx, spec).await.unwrap_or(applied.size);
            if let Some(old) = old_status {
                if old.size != 0 && old.size != size && attacher.resize(name, size).await.is_ok() {
                    self.events.record(Event::normal(
                        machine.id,
                        self.clock.system_time(),
                        reason::SIZE_CHANGED_VOLUME,
                        format!("{name} resized to {size} bytes"),
                        machine.labels.clone(),
                    ));
                }
            }

            statuses.push(VolumeStatus { name: name.to_string(), handle: plugin.handle(spec), state: VolumeState::Attached, size });
        }
        statuses
    }

    fn warn_volume_event(&self, machine: &Machine, name: &str, detail: &str) {
        self.events.record(Event::warning(
            machine.id,
            self.clock.system_time(),
            reason::ATTCH_DETACH_VOLUME,
            format!("{name}: {detail}"),
            machine.labels.clone(),
        ));
    }

    /// Per-NIC reconcile (§4.8.1): same shape as [`Self::reconcile_volumes`]
    /// minus resize, which has no NIC analog.
    async fn reconcile_nics<E: Executor>(
        &self,
        attacher: &mut NicAttacher<'_, E>,
        machine: &Machine,
    ) -> Vec<NetworkInterfaceStatus> {
        let desired: HashMap<&str, &NetworkInterfaceSpec> =
            machine.spec.network_interfaces.iter().map(|n| (n.name.as_str(), n)).collect();

        let mut current: BTreeSet<String> = attacher.current_nic_names().into_iter().collect();
        let nics_root = self.config.root.join("machines").join(machine.id.to_string()).join("networkinterfaces");
        for name in scan_nic_dir_names(nics_root).await {
            current.insert(name);
        }

        for name in &current {
            if desired.contains_key(name.as_str()) {
                continue;
            }
            let old_handle =
                machine.status.network_interface_status.iter().find(|s| &s.name == name).map(|s| s.handle.clone());
            if let Err(e) = attacher.detach(name).await {
                if !matches!(e, LibvirtError::InterfaceNotFound(_)) {
                    self.warn_nic_event(machine, name, &e.to_string());
                }
            }
            if let Some(handle) = old_handle {
                if let Some(plugin_name) = handle.split('/').next() {
                    if let Some(plugin) = self.nic_plugins.get(plugin_name) {
                        let ctx = NicCtx { root: self.config.root.clone(), machine_id: machine.id };
                        let _ = plugin.delete(&ctx, name, machine.id).await;
                    }
                }
            }
        }

        let mut statuses = Vec::new();
        for (name, spec) in &desired {
            let ctx = NicCtx { root: self.config.root.clone(), machine_id: machine.id };
            let old_status = machine.status.network_interface_status.iter().find(|s| &s.name == name);

            let plugin = match self.nic_plugins.find_plugin_by_spec(spec) {
                Ok(p) => p,
                Err(_) => continue,
            };

            if let Some(old) = old_status {
                if let Some(old_plugin_name) = old.handle.split('/').next() {
                    if old_plugin_name != plugin.name() {
                        let _ = attacher.detach(name).await;
                        if let Some(old_plugin) = self.nic_plugins.get(old_plugin_name) {
                            let _ = old_plugin.delete(&ctx, name, machine.id).await;
                        }
                    }
                }
            }

            let applied = match plugin.apply(&ctx, spec).await {
                Ok(a) => a,
                Err(_) => continue,
            };

            match attacher.attach(spec, &applied).await {
                Ok(()) => {
                    self.events.record(Event::normal(
                        machine.id,
                        self.clock.system_time(),
                        reason::ATTCHED_NIC,
                        format!("attached {name}"),
                        machine.labels.clone(),
                    ));
                }
                Err(LibvirtError::InterfaceAlreadyExists(_)) => {}
                Err(e) => {
                    self.warn_nic_event(machine, name, &e.to_string());
                    continue;
                }
            }

            statuses.push(NetworkInterfaceStatus { name: name.to_string(), handle: applied.handle, state: NetworkInterfaceState::Attached });
        }
        statuses
    }

    fn warn_nic_event(&self, machine: &Machine, name: &str, detail: &str) {
        self.events.record(Event::warning(
            machine.id,
            self.clock.system_time(),
            reason::ATTCH_DETACH_NIC,
            format!("{name}: {detail}"),
            machine.labels.clone(),
        ));
    }

    /// The deletion state machine: trigger shutdown, wait out the grace
    /// period, force-destroy, then tear down storage and drop the
    /// finalizer. Only invoked by the GC sweep for Machines with
    /// `deleted_at` set and the finalizer still present.
    async fn run_deletion_state_machine(&self, mut machine: Machine) -> CoreResult<()> {
        let now = self.clock.system_time();
        let domain_uuid = machine.id.domain_uuid();

        if machine.status.state != MachineState::Terminating {
            machine.status.state = MachineState::Terminating;
            machine.spec.shutdown_at = Some(now);
            machine = self.store.update(machine)?;
            self.events.record(Event::normal(
                machine.id,
                now,
                reason::TRIGGERING_SHUTDOWN,
                "triggering shutdown",
                machine.labels.clone(),
            ));
        }

        let shutdown_at = machine.spec.shutdown_at.unwrap_or(now);
        let grace_deadline = shutdown_at + self.config.gc_grace;

        if now < grace_deadline {
            let mode = if machine.spec.guest_agent == GuestAgentType::QemuGuestAgent {
                ShutdownMode::GuestAgent
            } else {
                ShutdownMode::AcpiPowerBtn
            };
            match self.hypervisor.shutdown(domain_uuid, mode).await {
                Ok(()) | Err(LibvirtError::DomainNotFound(_)) => {}
                Err(_) => return Ok(()), // transient hypervisor error; retry next sweep
            }
        } else {
            match self.hypervisor.destroy(domain_uuid).await {
                Ok(()) => {
                    self.events.record(Event::warning(
                        machine.id,
                        now,
                        reason::DESTROYED_DOMAIN,
                        "forcefully destroyed domain after grace period",
                        machine.labels.clone(),
                    ));
                }
                Err(LibvirtError::DomainNotFound(_)) => {}
                Err(_) => return Ok(()),
            }
        }

        if self.hypervisor.domain_exists(domain_uuid).await? {
            return Ok(());
        }

        self.teardown_storage(&machine).await;

        let machine_dir = self.config.root.join("machines").join(machine.id.to_string());
        let _ = tokio::fs::remove_dir_all(&machine_dir).await;

        machine.status.state = MachineState::Terminated;
        machine.finalizers.remove(MACHINE_FINALIZER);
        self.store.update(machine.clone())?;
        self.events.record(Event::normal(
            machine.id,
            self.clock.system_time(),
            reason::COMPLETED_DELETION,
            "deletion complete",
            machine.labels,
        ));
        Ok(())
    }

    async fn teardown_storage(&self, machine: &Machine) {
        let ctx = VolumeCtx { root: self.config.root.clone(), machine_id: machine.id };
        for status in &machine.status.volume_status {
            if let Some(plugin_name) = status.handle.split('/').next() {
                if let Some(plugin) = self.volume_plugins.get(plugin_name) {
                    let _ = plugin.delete(&ctx, &status.name, machine.id).await;
                }
            }
        }
        let nic_ctx = NicCtx { root: self.config.root.clone(), machine_id: machine.id };
        for status in &machine.status.network_interface_status {
            if let Some(plugin_name) = status.handle.split('/').next() {
                if let Some(plugin) = self.nic_plugins.get(plugin_name) {
                    let _ = plugin.delete(&nic_ctx, &status.name, machine.id).await;
                }
            }
        }
    }
}

async fn scan_volume_dir_names(volumes_root: PathBuf) -> Vec<String> {
    tokio::task::spawn_blocking(move || {
        let mut names = Vec::new();
        let Ok(plugin_dirs) = std::fs::read_dir(&volumes_root) else { return names };
        for plugin_dir in plugin_dirs.flatten() {
            if !plugin_dir.path().is_dir() {
                continue;
            }
            let Ok(name_dirs) = std::fs::read_dir(plugin_dir.path()) else { continue };
            for name_dir in name_dirs.flatten() {
                if name_dir.path().is_dir() {
                    if let Some(name) = name_dir.file_name().to_str() {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names
    })
    .await
    .unwrap_or_default()
}

async fn scan_nic_dir_names(nics_root: PathBuf) -> Vec<String> {
    tokio::task::spawn_blocking(move || {
        let mut names = Vec::new();
        let Ok(entries) = std::fs::read_dir(&nics_root) else { return names };
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names
    })
    .await
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lvp_core::{FakeClock, MachineCreateStrategy, MachineSpec, Power};
    use lvp_libvirt::domain::capability::GuestCapability;
    use lvp_libvirt::FakeHypervisor;

    fn harness() -> (tempfile::TempDir, Arc<Reconciler<FakeClock>>, Arc<ObjectStore<Machine>>, Arc<FakeHypervisor>) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(ObjectStore::open(tmp.path()).unwrap());
        let queue = Arc::new(WorkQueue::new());
        let events = Arc::new(EventStore::default());
        let hypervisor = Arc::new(FakeHypervisor::default());
        hypervisor.capabilities.lock().push(GuestCapability {
            os_type: "hvm".to_string(),
            arch: "x86_64".to_string(),
            domain_type: "kvm".to_string(),
            machine_type: "pc-q35-8.1".to_string(),
        });
        let image_cache = ImageCache::spawn(tmp.path().to_path_buf());

        let reconciler = Reconciler::new(
            Arc::clone(&store),
            queue,
            events,
            Arc::clone(&hypervisor) as Arc<dyn Hypervisor>,
            image_cache,
            VolumePluginRegistry::with_builtins(),
            NetworkInterfacePluginRegistry::with_builtins(),
            ReconcilerConfig::new(tmp.path()),
            FakeClock::new(),
        );
        (tmp, reconciler, store, hypervisor)
    }

    #[tokio::test]
    async fn first_reconcile_only_adds_the_finalizer() {
        let (_tmp, reconciler, store, hypervisor) = harness();
        let machine = store.create(Machine::new(MachineSpec::new(Power::On, 1, 1 << 20)), &MachineCreateStrategy).unwrap();
        assert!(!machine.has_machine_finalizer());

        reconciler.reconcile(machine.id).await.unwrap();

        let after = store.get(&machine.id).unwrap();
        assert!(after.has_machine_finalizer());
        assert!(hypervisor.domains.lock().is_empty());
    }

    #[tokio::test]
    async fn second_reconcile_creates_the_domain_with_attached_volume_and_nic() {
        let (_tmp, reconciler, store, hypervisor) = harness();
        let mut spec = MachineSpec::new(Power::On, 2, 4 << 30);
        spec.volumes.push(VolumeSpec {
            name: "disk-1".into(),
            device: "oda".into(),
            source: VolumeSource::EmptyDisk { size: 1 << 20 },
        });
        spec.network_interfaces.push(NetworkInterfaceSpec {
            name: "nic-1".into(),
            network_id: "net-a".into(),
            ips: vec![],
            attributes: HashMap::new(),
        });
        let machine = store.create(Machine::new(spec), &MachineCreateStrategy).unwrap();

        reconciler.reconcile(machine.id).await.unwrap();
        reconciler.reconcile(machine.id).await.unwrap();

        let after = store.get(&machine.id).unwrap();
        assert_eq!(after.status.state, MachineState::Pending);
        assert_eq!(after.status.volume_status.len(), 1);
        assert_eq!(after.status.volume_status[0].handle, "empty-disk/disk-1");
        assert_eq!(after.status.network_interface_status.len(), 1);
        assert_eq!(after.status.network_interface_status[0].handle, "isolated/nic-1");
        assert!(hypervisor.domains.lock().contains_key(&machine.id.domain_uuid()));
    }

    #[tokio::test]
    async fn running_path_detaches_a_volume_removed_from_spec() {
        let (_tmp, reconciler, store, _hypervisor) = harness();
        let mut spec = MachineSpec::new(Power::On, 1, 1 << 20);
        spec.volumes.push(VolumeSpec {
            name: "disk-1".into(),
            device: "oda".into(),
            source: VolumeSource::EmptyDisk { size: 1 << 20 },
        });
        let machine = store.create(Machine::new(spec), &MachineCreateStrategy).unwrap();
        reconciler.reconcile(machine.id).await.unwrap();
        reconciler.reconcile(machine.id).await.unwrap();
        assert_eq!(store.get(&machine.id).unwrap().status.volume_status.len(), 1);

        let mut current = store.get(&machine.id).unwrap();
        current.spec.volumes.clear();
        store.update(current).unwrap();

        reconciler.reconcile(machine.id).await.unwrap();

        let after = store.get(&machine.id).unwrap();
        assert!(after.status.volume_status.is_empty());
        assert_eq!(after.status.state, MachineState::Running);
    }

    #[tokio::test]
    async fn deletion_with_domain_running_transitions_then_tears_down() {
        // FakeHypervisor completes shutdown synchronously (unlike real
        // libvirt's async request), so the whole state machine resolves in
        // a single pass here.
        let (_tmp, reconciler, store, hypervisor) = harness();
        let machine = store.create(Machine::new(MachineSpec::new(Power::On, 1, 1 << 20)), &MachineCreateStrategy).unwrap();
        reconciler.reconcile(machine.id).await.unwrap();
        reconciler.reconcile(machine.id).await.unwrap();
        assert!(hypervisor.domains.lock().contains_key(&machine.id.domain_uuid()));

        store.delete(&machine.id).unwrap();
        let deleting = store.get(&machine.id).unwrap();
        assert!(deleting.is_deleting());

        reconciler.run_deletion_state_machine(deleting).await.unwrap();

        assert!(store.get(&machine.id).is_err());
        assert!(!hypervisor.domains.lock().contains_key(&machine.id.domain_uuid()));
        let events = reconciler.events.list_for_machine(&machine.id, &crate::event_store::EventFilter::default());
        assert!(events.iter().any(|e| e.reason == reason::TRIGGERING_SHUTDOWN));
        assert!(events.iter().any(|e| e.reason == reason::COMPLETED_DELETION));
    }

    #[tokio::test]
    async fn deletion_past_grace_period_force_destroys_and_emits_warning() {
        let (_tmp, reconciler, store, _hypervisor) = harness();
        let machine = store.create(Machine::new(MachineSpec::new(Power::On, 1, 1 << 20)), &MachineCreateStrategy).unwrap();
        reconciler.reconcile(machine.id).await.unwrap();
        reconciler.reconcile(machine.id).await.unwrap();

        store.delete(&machine.id).unwrap();
        let mut deleting = store.get(&machine.id).unwrap();
        deleting.status.state = MachineState::Terminating;
        deleting.spec.shutdown_at = Some(reconciler.clock.system_time());
        let deleting = store.update(deleting).unwrap();

        reconciler.clock.advance(Duration::from_secs(600));

        reconciler.run_deletion_state_machine(deleting).await.unwrap();

        assert!(store.get(&machine.id).is_err());
        let events = reconciler.events.list_for_machine(&machine.id, &crate::event_store::EventFilter::default());
        assert!(events.iter().any(|e| e.reason == reason::DESTROYED_DOMAIN));
    }
}
