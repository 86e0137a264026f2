// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain Builder (C7): given a Machine and the host's advertised
//! capabilities, deterministically builds the domain descriptor that will
//! back `create-xml` (§4.7). Volume/NIC materialization (plugin `apply`) and
//! image resolution happen before this is called; the builder only
//! translates already-applied state into descriptor XML.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use lvp_core::{Machine, NetworkInterfaceSpec, VolumeSpec};
use lvp_plugins::network::AppliedNic;
use lvp_plugins::volume::AppliedVolume;

use crate::attacher::{CreationExecutor, NicAttacher, VolumeAttacher};
use crate::domain::capability::{self, GuestCapability};
use crate::domain::{
    Channel, ChannelSource, ChannelTarget, Console, Controller, DomainClock, DomainCpu, DomainCrashAction,
    DomainDescriptor, DomainDevice, DomainDevices, DomainFeatures, DomainLifecycleAction, DomainMemory,
    DomainMetadata, DomainOs, DomainOsLoader, DomainOsType, DomainType, DomainVcpu, Disk, DiskBus, DiskDevice,
    DiskDriver, DiskSource, DiskTarget, DiskType, FwCfgDatum, FwCfgEntry, Hugepages, MachineMetadata, MemoryBacking,
    OsCmdline, OsPath, OsTypeKind, Rng, RngBackend, Serial, GUEST_AGENT_CHANNEL_TARGET, IGNITION_FW_CFG_KEY,
    ROOTFS_ALIAS, ROOTFS_SERIAL, ROOTFS_TARGET_DEV,
};
use crate::error::{LibvirtError, LibvirtResult};
use crate::image_cache::{GetOutcome, Image};

const OS_TYPE: &str = "hvm";
const ARCH: &str = "x86_64";
const PCIE_ROOT_PORTS: u32 = 30;

/// What resolving `spec.image` produced, handed in by the caller (the
/// reconciler, which already consulted the image cache before building).
pub enum ImageResolution {
    NotRequested,
    Ready(Image),
    Pulling(String),
}

pub struct BuildRequest<'a> {
    pub machine: &'a Machine,
    pub root: &'a Path,
    pub capabilities: &'a [GuestCapability],
    pub domain_type_prefs: &'a [&'a str],
    pub machine_type_prefs: &'a [&'a str],
    pub enable_hugepages: bool,
    pub image: ImageResolution,
    pub volumes: &'a [(VolumeSpec, AppliedVolume)],
    pub nics: &'a [(NetworkInterfaceSpec, AppliedNic)],
    pub volume_cache_policy: &'a str,
}

/// What the builder produced beyond the descriptor itself, for the
/// reconciler to fold into `status` and events.
pub struct BuildOutcome {
    pub descriptor: DomainDescriptor,
    pub guest_agent_addr: Option<String>,
    pub ignition_written: bool,
}

pub async fn build_domain(req: BuildRequest<'_>) -> LibvirtResult<BuildOutcome> {
    let selected = capability::select(
        req.capabilities,
        OS_TYPE,
        ARCH,
        req.domain_type_prefs,
        req.machine_type_prefs,
    )
    .map_err(|e| LibvirtError::Other(e.to_string()))?;

    let domain_uuid = req.machine.id.domain_uuid();
    let machine_dir = req.root.join("machines").join(req.machine.id.to_string());

    let mut descriptor = skeleton(
        domain_uuid,
        selected.domain_type,
        selected.machine_type,
        req.machine.spec.memory_bytes,
        req.machine.spec.cpu,
        req.enable_hugepages,
        &req.machine.labels,
    );

    match req.image {
        ImageResolution::NotRequested => {}
        ImageResolution::Pulling(image_ref) => return Err(LibvirtError::ImagePulling(image_ref)),
        ImageResolution::Ready(image) => apply_image(&mut descriptor, &machine_dir, &image).await?,
    }

    let ignition_written = if let Some(bytes) = &req.machine.spec.ignition {
        write_ignition(&machine_dir, bytes).await?;
        descriptor.devices.contents.push(DomainDevice::FwCfg(FwCfgEntry {
            kind: "fwcfg".to_string(),
            entry: FwCfgDatum {
                name: IGNITION_FW_CFG_KEY.to_string(),
                file: machine_dir.join("ignitions").join("data.ign").display().to_string(),
            },
        }));
        true
    } else {
        false
    };

    let guest_agent_addr = if req.machine.spec.guest_agent == lvp_core::GuestAgentType::QemuGuestAgent {
        let addr = machine_dir.join("qemu-guest-agent.sock").display().to_string();
        descriptor.devices.contents.push(DomainDevice::Channel(Channel {
            kind: "unix".to_string(),
            source: ChannelSource { mode: "bind".to_string(), path: addr.clone() },
            target: ChannelTarget { kind: "virtio".to_string(), name: GUEST_AGENT_CHANNEL_TARGET.to_string() },
        }));
        Some(addr)
    } else {
        None
    };

    {
        let executor = CreationExecutor;
        let mut attacher = VolumeAttacher::new(&mut descriptor, &executor, req.volume_cache_policy);
        for (spec, applied) in req.volumes {
            attacher.attach(spec, applied).await?;
        }
    }
    {
        let executor = CreationExecutor;
        let mut attacher = NicAttacher::new(&mut descriptor, &executor);
        for (spec, applied) in req.nics {
            attacher.attach(spec, applied).await?;
        }
    }

    Ok(BuildOutcome { descriptor, guest_agent_addr, ignition_written })
}

#[allow(clippy::too_many_arguments)]
fn skeleton(
    uuid: uuid::Uuid,
    domain_type: &str,
    machine_type: &str,
    memory_bytes: u64,
    vcpu: u32,
    enable_hugepages: bool,
    labels: &std::collections::HashMap<String, String>,
) -> DomainDescriptor {
    let kind = if domain_type == "kvm" { DomainType::Kvm } else { DomainType::Qemu };

    let mut devices = Vec::new();
    devices.push(DomainDevice::Console(Console { kind: "pty".to_string() }));
    devices.push(DomainDevice::Serial(Serial { kind: "pty".to_string() }));
    devices.push(DomainDevice::Rng(Rng {
        model: "virtio".to_string(),
        backend: RngBackend { model: "random".to_string(), source: "/dev/urandom".to_string() },
    }));
    devices.push(DomainDevice::Controller(Controller {
        kind: "pci".to_string(),
        model: "pcie-root".to_string(),
        index: 0,
    }));
    for index in 1..=PCIE_ROOT_PORTS {
        devices.push(DomainDevice::Controller(Controller {
            kind: "pci".to_string(),
            model: "pcie-root-port".to_string(),
            index,
        }));
    }

    DomainDescriptor {
        kind,
        name: Some(uuid.to_string()),
        uuid,
        metadata: Some(DomainMetadata { machine: MachineMetadata::from_labels(labels) }),
        memory: DomainMemory::bytes(memory_bytes),
        memory_backing: enable_hugepages.then(|| MemoryBacking { hugepages: Hugepages {} }),
        vcpu: DomainVcpu { count: vcpu },
        cpu: DomainCpu::default(),
        os: DomainOs {
            firmware: Some("efi".to_string()),
            kind: DomainOsType { kind: OsTypeKind::Hvm, arch: ARCH.to_string(), machine: machine_type.to_string() },
            loader: Some(DomainOsLoader { secure: false, path: None }),
            kernel: None,
            initrd: None,
            cmdline: None,
        },
        features: DomainFeatures::default(),
        clock: DomainClock::default(),
        on_poweroff: DomainLifecycleAction::Destroy,
        on_reboot: DomainLifecycleAction::Restart,
        on_crash: DomainCrashAction::CoredumpRestart,
        devices: DomainDevices { contents: devices },
    }
}

async fn apply_image(descriptor: &mut DomainDescriptor, machine_dir: &Path, image: &Image) -> LibvirtResult<()> {
    if let Some(kernel) = &image.config.kernel {
        descriptor.os.kernel = Some(OsPath { path: kernel.clone() });
    }
    if let Some(initrd) = &image.config.initrd {
        descriptor.os.initrd = Some(OsPath { path: initrd.clone() });
    }
    if let Some(cmdline) = &image.config.cmdline {
        descriptor.os.cmdline = Some(OsCmdline { text: cmdline.clone() });
    }

    let machine_dir = machine_dir.to_path_buf();
    let rootfs_layer = image.rootfs_layer.clone();
    let rootfs_path = tokio::task::spawn_blocking(move || materialize_rootfs(&machine_dir, &rootfs_layer))
        .await
        .map_err(|e| LibvirtError::Other(format!("blocking task panicked: {e}")))??;

    descriptor.devices.contents.push(DomainDevice::Disk(Disk {
        kind: DiskType::File,
        device: DiskDevice::Disk,
        driver: Some(DiskDriver::raw()),
        source: DiskSource { file: Some(rootfs_path.display().to_string()), ..Default::default() },
        target: DiskTarget { dev: ROOTFS_TARGET_DEV.to_string(), bus: DiskBus::VirtIO },
        auth: None,
        encryption: None,
        alias: Some(ROOTFS_ALIAS.to_string()),
        serial: Some(ROOTFS_SERIAL.to_string()),
        readonly: Some(true),
    }));

    Ok(())
}

fn materialize_rootfs(machine_dir: &Path, source: &Path) -> LibvirtResult<PathBuf> {
    let dir = machine_dir.join("rootfs");
    fs::create_dir_all(&dir)?;
    let dest = dir.join("rootfs");
    fs::copy(source, &dest)?;
    fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o666))?;
    Ok(dest)
}

async fn write_ignition(machine_dir: &Path, bytes: &[u8]) -> LibvirtResult<()> {
    let machine_dir = machine_dir.to_path_buf();
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || {
        let dir = machine_dir.join("ignitions");
        fs::create_dir_all(&dir)?;
        let path = dir.join("data.ign");
        fs::write(&path, &bytes)?;
        fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666))?;
        Ok::<(), std::io::Error>(())
    })
    .await
    .map_err(|e| LibvirtError::Other(format!("blocking task panicked: {e}")))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lvp_core::{Machine, MachineSpec, Power};
    use lvp_plugins::volume::VolumeLocation;
    use std::path::PathBuf;

    fn capability() -> Vec<GuestCapability> {
        vec![GuestCapability {
            os_type: OS_TYPE.to_string(),
            arch: ARCH.to_string(),
            domain_type: "kvm".to_string(),
            machine_type: "pc-q35-8.1".to_string(),
        }]
    }

    #[tokio::test]
    async fn bare_machine_gets_skeleton_devices_and_no_rootfs_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let machine = Machine::new(MachineSpec::new(Power::On, 2, 4 << 30));

        let outcome = build_domain(BuildRequest {
            machine: &machine,
            root: tmp.path(),
            capabilities: &capability(),
            domain_type_prefs: &["kvm", "qemu"],
            machine_type_prefs: &["pc-q35"],
            enable_hugepages: false,
            image: ImageResolution::NotRequested,
            volumes: &[],
            nics: &[],
            volume_cache_policy: "writeback",
        })
        .await
        .unwrap();

        assert_eq!(outcome.descriptor.uuid, machine.id.domain_uuid());
        assert_eq!(outcome.descriptor.vcpu.count, 2);
        assert!(outcome.descriptor.find_disk("ua-rootfs").is_none());
        assert!(!outcome.ignition_written);
        assert!(outcome.guest_agent_addr.is_none());

        let controller_count = outcome
            .descriptor
            .devices
            .contents
            .iter()
            .filter(|d| matches!(d, DomainDevice::Controller(_)))
            .count();
        assert_eq!(controller_count, 1 + PCIE_ROOT_PORTS as usize);
    }

    #[tokio::test]
    async fn image_pulling_short_circuits_with_image_pulling_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut spec = MachineSpec::new(Power::On, 1, 1 << 30);
        spec.image = Some("demo:latest".to_string());
        let machine = Machine::new(spec);

        let err = build_domain(BuildRequest {
            machine: &machine,
            root: tmp.path(),
            capabilities: &capability(),
            domain_type_prefs: &[],
            machine_type_prefs: &[],
            enable_hugepages: false,
            image: ImageResolution::Pulling("demo:latest".to_string()),
            volumes: &[],
            nics: &[],
            volume_cache_policy: "writeback",
        })
        .await
        .unwrap_err();

        assert!(matches!(err, LibvirtError::ImagePulling(r) if r == "demo:latest"));
    }

    #[tokio::test]
    async fn ready_image_wires_kernel_initrd_cmdline_and_rootfs_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let rootfs_src = tmp.path().join("source-rootfs");
        fs::write(&rootfs_src, b"rootfs bytes").unwrap();

        let mut spec = MachineSpec::new(Power::On, 1, 1 << 30);
        spec.image = Some("demo:latest".to_string());
        let machine = Machine::new(spec);

        let image = Image {
            config: crate::image_cache::ImageConfig {
                kernel: Some("/boot/vmlinuz".to_string()),
                initrd: Some("/boot/initrd".to_string()),
                cmdline: Some("console=ttyS0".to_string()),
            },
            rootfs_layer: rootfs_src,
            kernel_layer: None,
            initramfs_layer: None,
        };

        let outcome = build_domain(BuildRequest {
            machine: &machine,
            root: tmp.path(),
            capabilities: &capability(),
            domain_type_prefs: &["kvm"],
            machine_type_prefs: &["pc-q35"],
            enable_hugepages: false,
            image: ImageResolution::Ready(image),
            volumes: &[],
            nics: &[],
            volume_cache_policy: "writeback",
        })
        .await
        .unwrap();

        assert_eq!(outcome.descriptor.os.kernel.as_ref().unwrap().path, "/boot/vmlinuz");
        assert_eq!(outcome.descriptor.os.cmdline.as_ref().unwrap().text, "console=ttyS0");
        let disk = outcome.descriptor.find_disk("ua-rootfs").unwrap();
        assert_eq!(disk.target.dev, ROOTFS_TARGET_DEV);
        assert_eq!(disk.serial.as_deref(), Some(ROOTFS_SERIAL));
        assert!(disk.readonly.unwrap());
    }

    #[tokio::test]
    async fn ignition_and_guest_agent_add_their_respective_devices() {
        let tmp = tempfile::tempdir().unwrap();
        let mut spec = MachineSpec::new(Power::On, 1, 1 << 30);
        spec.ignition = Some(b"{}".to_vec());
        spec.guest_agent = lvp_core::GuestAgentType::QemuGuestAgent;
        let machine = Machine::new(spec);

        let outcome = build_domain(BuildRequest {
            machine: &machine,
            root: tmp.path(),
            capabilities: &capability(),
            domain_type_prefs: &["kvm"],
            machine_type_prefs: &["pc-q35"],
            enable_hugepages: false,
            image: ImageResolution::NotRequested,
            volumes: &[],
            nics: &[],
            volume_cache_policy: "writeback",
        })
        .await
        .unwrap();

        assert!(outcome.ignition_written);
        assert!(outcome.guest_agent_addr.as_ref().unwrap().ends_with("qemu-guest-agent.sock"));
        assert!(outcome
            .descriptor
            .devices
            .contents
            .iter()
            .any(|d| matches!(d, DomainDevice::FwCfg(_))));
        assert!(outcome
            .descriptor
            .devices
            .contents
            .iter()
            .any(|d| matches!(d, DomainDevice::Channel(_))));

        let ignition_path = tmp.path().join("machines").join(machine.id.to_string()).join("ignitions/data.ign");
        assert!(ignition_path.exists());
    }

    #[tokio::test]
    async fn volumes_and_nics_are_attached_via_the_creation_executor() {
        let tmp = tempfile::tempdir().unwrap();
        let machine = Machine::new(MachineSpec::new(Power::On, 1, 1 << 30));

        let volume = VolumeSpec {
            name: "disk-1".to_string(),
            device: "oda".to_string(),
            source: lvp_core::VolumeSource::EmptyDisk { size: 1 << 20 },
        };
        let applied = AppliedVolume {
            location: VolumeLocation::File(PathBuf::from("/var/lib/lvp/disk-1.raw")),
            handle: "empty-disk/disk-1".to_string(),
            size: 1 << 20,
        };

        let outcome = build_domain(BuildRequest {
            machine: &machine,
            root: tmp.path(),
            capabilities: &capability(),
            domain_type_prefs: &["kvm"],
            machine_type_prefs: &["pc-q35"],
            enable_hugepages: false,
            image: ImageResolution::NotRequested,
            volumes: &[(volume, applied)],
            nics: &[],
            volume_cache_policy: "writeback",
        })
        .await
        .unwrap();

        assert!(outcome.descriptor.find_disk(&lvp_core::volume_alias("disk-1")).is_some());
    }
}
