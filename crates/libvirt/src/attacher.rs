// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Volume Attacher (C8): translates applied volumes/NICs into disk/interface
//! XML and either appends them to an in-memory descriptor (creation
//! executor, §4.7 "Volumes") or issues live libvirt calls (running
//! executor, §4.9's per-volume/per-NIC reconcile). Both paths share the same
//! alias/secret-derivation logic so the two executors can never disagree on
//! identity.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use lvp_core::{nic_alias, parse_nic_alias, parse_volume_alias, volume_alias, NetworkInterfaceSpec, VolumeSpec};
use lvp_plugins::network::{AppliedNic, NicVariant};
use lvp_plugins::volume::{AppliedVolume, VolumeLocation};
use uuid::Uuid;

use crate::client::Hypervisor;
use crate::domain::{
    Disk, DiskAuth, DiskAuthSecret, DiskBus, DiskDevice, DiskDriver, DiskEncryption, DiskEncryptionSecret,
    DiskSource, DiskSourceHost, DiskTarget, DiskType, DomainDescriptor, HostDev, HostDevAddress, HostDevSource,
    Interface, InterfaceSource, InterfaceType,
};
use crate::error::{LibvirtError, LibvirtResult};
use crate::secret::{auth_secret_uuid, enc_secret_uuid};

/// The live-libvirt half of attach/detach/resize, abstracted so the domain
/// builder's "creation executor" and the reconciler's "running executor"
/// share one code path (§4.8.1).
#[async_trait]
pub trait Executor: Send + Sync {
    async fn attach_disk(&self, domain_uuid: Uuid, disk_xml: &str) -> LibvirtResult<()>;
    async fn detach_disk(&self, domain_uuid: Uuid, disk_xml: &str) -> LibvirtResult<()>;
    async fn attach_interface(&self, domain_uuid: Uuid, device_xml: &str) -> LibvirtResult<()>;
    async fn detach_interface(&self, domain_uuid: Uuid, device_xml: &str) -> LibvirtResult<()>;
    async fn block_resize(&self, domain_uuid: Uuid, target_dev: &str, bytes: u64) -> LibvirtResult<()>;
    async fn define_secret(&self, secret_uuid: Uuid, secret_xml: &str) -> LibvirtResult<()>;
    async fn set_secret_value(&self, secret_uuid: Uuid, value: Vec<u8>) -> LibvirtResult<()>;
    async fn undefine_secret(&self, secret_uuid: Uuid) -> LibvirtResult<()>;
}

/// Used while building a not-yet-created domain: only mutates the
/// descriptor in memory, issues no libvirt calls (§4.7 "Volumes").
pub struct CreationExecutor;

#[async_trait]
impl Executor for CreationExecutor {
    async fn attach_disk(&self, _domain_uuid: Uuid, _disk_xml: &str) -> LibvirtResult<()> {
        Ok(())
    }
    async fn detach_disk(&self, _domain_uuid: Uuid, _disk_xml: &str) -> LibvirtResult<()> {
        Ok(())
    }
    async fn attach_interface(&self, _domain_uuid: Uuid, _device_xml: &str) -> LibvirtResult<()> {
        Ok(())
    }
    async fn detach_interface(&self, _domain_uuid: Uuid, _device_xml: &str) -> LibvirtResult<()> {
        Ok(())
    }
    async fn block_resize(&self, _domain_uuid: Uuid, _target_dev: &str, _bytes: u64) -> LibvirtResult<()> {
        Ok(())
    }
    async fn define_secret(&self, _secret_uuid: Uuid, _secret_xml: &str) -> LibvirtResult<()> {
        Ok(())
    }
    async fn set_secret_value(&self, _secret_uuid: Uuid, _value: Vec<u8>) -> LibvirtResult<()> {
        Ok(())
    }
    async fn undefine_secret(&self, _secret_uuid: Uuid) -> LibvirtResult<()> {
        Ok(())
    }
}

/// Used against an already-running domain: every call is a live libvirt
/// operation dispatched through a [`Hypervisor`].
pub struct RunningExecutor {
    hypervisor: Arc<dyn Hypervisor>,
}

impl RunningExecutor {
    pub fn new(hypervisor: Arc<dyn Hypervisor>) -> Self {
        Self { hypervisor }
    }
}

#[async_trait]
impl Executor for RunningExecutor {
    async fn attach_disk(&self, domain_uuid: Uuid, disk_xml: &str) -> LibvirtResult<()> {
        self.hypervisor.attach_device(domain_uuid, disk_xml.to_string()).await
    }
    async fn detach_disk(&self, domain_uuid: Uuid, disk_xml: &str) -> LibvirtResult<()> {
        self.hypervisor.detach_device(domain_uuid, disk_xml.to_string()).await
    }
    async fn attach_interface(&self, domain_uuid: Uuid, device_xml: &str) -> LibvirtResult<()> {
        self.hypervisor.attach_device(domain_uuid, device_xml.to_string()).await
    }
    async fn detach_interface(&self, domain_uuid: Uuid, device_xml: &str) -> LibvirtResult<()> {
        self.hypervisor.detach_device(domain_uuid, device_xml.to_string()).await
    }
    async fn block_resize(&self, domain_uuid: Uuid, target_dev: &str, bytes: u64) -> LibvirtResult<()> {
        self.hypervisor.block_resize(domain_uuid, target_dev.to_string(), bytes).await
    }
    async fn define_secret(&self, secret_uuid: Uuid, secret_xml: &str) -> LibvirtResult<()> {
        self.hypervisor.secret_define(secret_uuid, secret_xml.to_string()).await
    }
    async fn set_secret_value(&self, secret_uuid: Uuid, value: Vec<u8>) -> LibvirtResult<()> {
        self.hypervisor.secret_set_value(secret_uuid, value).await
    }
    async fn undefine_secret(&self, secret_uuid: Uuid) -> LibvirtResult<()> {
        self.hypervisor.secret_undefine(secret_uuid).await
    }
}

fn secret_xml(uuid: Uuid, description: &str, private: bool) -> String {
    format!(
        "<secret ephemeral='no' private='{}'><uuid>{}</uuid><description>{}</description></secret>",
        private, uuid, description,
    )
}

fn build_disk_xml(
    domain_uuid: Uuid,
    volume: &VolumeSpec,
    applied: &AppliedVolume,
    cache_policy: &str,
) -> LibvirtResult<Disk> {
    let alias = volume_alias(&volume.name);
    let target = DiskTarget { dev: volume.target_device(), bus: DiskBus::VirtIO };

    match &applied.location {
        VolumeLocation::File(path) => {
            let kind = if path.extension().and_then(|e| e.to_str()) == Some("qcow2") {
                DiskDriver::qcow2()
            } else {
                DiskDriver::raw()
            };
            Ok(Disk {
                kind: DiskType::File,
                device: DiskDevice::Disk,
                driver: Some(kind),
                source: DiskSource { file: Some(path.display().to_string()), ..Default::default() },
                target,
                auth: None,
                encryption: None,
                alias: Some(alias),
                serial: None,
                readonly: None,
            })
        }
        VolumeLocation::Ceph(ceph) => {
            let hosts = ceph
                .monitors
                .iter()
                .map(|m| match m.split_once(':') {
                    Some((host, port)) => DiskSourceHost { name: host.to_string(), port: port.parse().ok() },
                    None => DiskSourceHost { name: m.clone(), port: None },
                })
                .collect();

            let auth = if ceph.user_id.is_empty() {
                None
            } else {
                Some(DiskAuth {
                    username: ceph.user_id.clone(),
                    secret: DiskAuthSecret { kind: "ceph".into(), uuid: auth_secret_uuid(domain_uuid, &volume.name) },
                })
            };
            let encryption = ceph.encryption.as_ref().map(|_| DiskEncryption {
                format: "luks".into(),
                secret: DiskEncryptionSecret {
                    kind: "passphrase".into(),
                    uuid: enc_secret_uuid(domain_uuid, &volume.name),
                },
            });

            Ok(Disk {
                kind: DiskType::Network,
                device: DiskDevice::Disk,
                driver: Some(DiskDriver::rbd(cache_policy)),
                source: DiskSource {
                    protocol: Some("rbd".into()),
                    name: Some(ceph.image.clone()),
                    hosts,
                    ..Default::default()
                },
                target,
                auth,
                encryption,
                alias: Some(alias),
                serial: None,
                readonly: None,
            })
        }
    }
}

fn build_interface(domain_uuid: Uuid, spec: &NetworkInterfaceSpec, applied: &AppliedNic) -> DomainInterfaceXml {
    let alias = nic_alias(&spec.name);
    let _ = domain_uuid;
    match &applied.variant {
        NicVariant::HostDevice(pci_address) => DomainInterfaceXml::HostDev(HostDev {
            mode: "subsystem".into(),
            kind: "pci".into(),
            source: HostDevSource { address: parse_pci_address(pci_address) },
            alias: Some(alias),
        }),
        NicVariant::Direct(tap) => DomainInterfaceXml::Interface(Interface {
            kind: InterfaceType::Direct,
            source: Some(InterfaceSource { network: None, dev: Some(tap.clone()), mode: Some("bridge".into()) }),
            alias: Some(alias),
        }),
        NicVariant::Isolated => DomainInterfaceXml::Interface(Interface {
            kind: InterfaceType::Network,
            source: Some(InterfaceSource { network: Some("lvp-isolated".into()), dev: None, mode: None }),
            alias: Some(alias),
        }),
        NicVariant::ProviderNetwork(name) => DomainInterfaceXml::Interface(Interface {
            kind: InterfaceType::Network,
            source: Some(InterfaceSource { network: Some(name.clone()), dev: None, mode: None }),
            alias: Some(alias),
        }),
    }
}

enum DomainInterfaceXml {
    Interface(Interface),
    HostDev(HostDev),
}

impl DomainInterfaceXml {
    fn alias(&self) -> Option<&str> {
        match self {
            Self::Interface(i) => i.alias.as_deref(),
            Self::HostDev(h) => h.alias.as_deref(),
        }
    }

    fn to_xml(&self) -> LibvirtResult<String> {
        Ok(match self {
            Self::Interface(i) => quick_xml::se::to_string(i)?,
            Self::HostDev(h) => quick_xml::se::to_string(h)?,
        })
    }
}

fn parse_pci_address(addr: &str) -> HostDevAddress {
    // Expected shape: "0000:00:03.0" (domain:bus:slot.function).
    let mut domain = "0000".to_string();
    let mut bus = "00".to_string();
    let mut slot = "00".to_string();
    let mut function = "0".to_string();
    if let Some((prefix, func)) = addr.rsplit_once('.') {
        function = func.to_string();
        let parts: Vec<&str> = prefix.split(':').collect();
        if parts.len() == 3 {
            domain = parts[0].to_string();
            bus = parts[1].to_string();
            slot = parts[2].to_string();
        }
    }
    HostDevAddress { domain, bus, slot, function }
}

pub struct VolumeAttacher<'a, E: Executor> {
    descriptor: &'a mut DomainDescriptor,
    executor: &'a E,
    cache_policy: &'a str,
}

impl<'a, E: Executor> VolumeAttacher<'a, E> {
    pub fn new(descriptor: &'a mut DomainDescriptor, executor: &'a E, cache_policy: &'a str) -> Self {
        Self { descriptor, executor, cache_policy }
    }

    pub async fn attach(&mut self, volume: &VolumeSpec, applied: &AppliedVolume) -> LibvirtResult<()> {
        let alias = volume_alias(&volume.name);
        if self.descriptor.find_disk(&alias).is_some() {
            return Err(LibvirtError::DiskAlreadyExists(alias));
        }

        let domain_uuid = self.descriptor.uuid;
        let disk = build_disk_xml(domain_uuid, volume, applied, self.cache_policy)?;

        match (&disk.auth, &disk.encryption) {
            (None, None) => {
                self.executor.undefine_secret(auth_secret_uuid(domain_uuid, &volume.name)).await.ok();
                self.executor.undefine_secret(enc_secret_uuid(domain_uuid, &volume.name)).await.ok();
            }
            _ => {
                if let Some(auth) = &disk.auth {
                    self.executor
                        .define_secret(auth.secret.uuid, &secret_xml(auth.secret.uuid, &volume.name, true))
                        .await?;
                    if let VolumeLocation::Ceph(ceph) = &applied.location {
                        let key = base64::engine::general_purpose::STANDARD
                            .decode(&ceph.key)
                            .unwrap_or_else(|_| ceph.key.clone().into_bytes());
                        self.executor.set_secret_value(auth.secret.uuid, key).await?;
                    }
                }
                if let Some(encryption) = &disk.encryption {
                    self.executor
                        .define_secret(
                            encryption.secret.uuid,
                            &secret_xml(encryption.secret.uuid, &volume.name, true),
                        )
                        .await?;
                    if let VolumeLocation::Ceph(ceph) = &applied.location {
                        if let Some(enc) = &ceph.encryption {
                            self.executor
                                .set_secret_value(encryption.secret.uuid, enc.key.clone().into_bytes())
                                .await?;
                        }
                    }
                }
            }
        }

        let disk_xml = quick_xml::se::to_string(&disk)?;
        self.executor.attach_disk(domain_uuid, &disk_xml).await?;
        self.descriptor.push_disk(disk);
        Ok(())
    }

    pub async fn detach(&mut self, name: &str) -> LibvirtResult<()> {
        let alias = volume_alias(name);
        let disk = self
            .descriptor
            .find_disk(&alias)
            .cloned()
            .ok_or_else(|| LibvirtError::DiskNotFound(alias.clone()))?;

        let domain_uuid = self.descriptor.uuid;
        let disk_xml = quick_xml::se::to_string(&disk)?;
        self.executor.detach_disk(domain_uuid, &disk_xml).await?;
        self.executor.undefine_secret(auth_secret_uuid(domain_uuid, name)).await.ok();
        self.executor.undefine_secret(enc_secret_uuid(domain_uuid, name)).await.ok();
        self.descriptor.remove_disk(&alias);
        Ok(())
    }

    pub async fn resize(&mut self, name: &str, bytes: u64) -> LibvirtResult<()> {
        let alias = volume_alias(name);
        let dev = self
            .descriptor
            .find_disk(&alias)
            .map(|d| d.target.dev.clone())
            .ok_or_else(|| LibvirtError::DiskNotFound(alias.clone()))?;
        self.executor.block_resize(self.descriptor.uuid, &dev, bytes).await
    }

    /// Spec volume names currently present in the descriptor (alias-decoded).
    pub fn current_volume_names(&self) -> Vec<String> {
        self.descriptor.disk_aliases().filter_map(parse_volume_alias).collect()
    }
}

pub struct NicAttacher<'a, E: Executor> {
    descriptor: &'a mut DomainDescriptor,
    executor: &'a E,
}

impl<'a, E: Executor> NicAttacher<'a, E> {
    pub fn new(descriptor: &'a mut DomainDescriptor, executor: &'a E) -> Self {
        Self { descriptor, executor }
    }

    pub async fn attach(&mut self, spec: &NetworkInterfaceSpec, applied: &AppliedNic) -> LibvirtResult<()> {
        let alias = nic_alias(&spec.name);
        if self.descriptor.find_interface(&alias).is_some() {
            return Err(LibvirtError::InterfaceAlreadyExists(alias));
        }

        let domain_uuid = self.descriptor.uuid;
        let device = build_interface(domain_uuid, spec, applied);
        let xml = device.to_xml()?;
        self.executor.attach_interface(domain_uuid, &xml).await?;

        match device {
            DomainInterfaceXml::Interface(nic) => self.descriptor.push_interface(nic),
            DomainInterfaceXml::HostDev(hostdev) => {
                self.descriptor.devices.contents.push(crate::domain::DomainDevice::HostDev(hostdev));
            }
        }
        let _ = alias;
        Ok(())
    }

    pub async fn detach(&mut self, name: &str) -> LibvirtResult<()> {
        let alias = nic_alias(name);
        let nic = self
            .descriptor
            .find_interface(&alias)
            .cloned()
            .ok_or_else(|| LibvirtError::InterfaceNotFound(alias.clone()))?;

        let domain_uuid = self.descriptor.uuid;
        let xml = quick_xml::se::to_string(&nic)?;
        self.executor.detach_interface(domain_uuid, &xml).await?;
        self.descriptor.remove_interface(&alias);
        Ok(())
    }

    pub fn current_nic_names(&self) -> Vec<String> {
        self.descriptor.interface_aliases().filter_map(parse_nic_alias).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CpuMode, DomainClock, DomainCpu, DomainDevices, DomainFeatures, DomainLifecycleAction, DomainMemory,
        DomainOs, DomainOsType, DomainType, DomainVcpu, OsTypeKind,
    };
    use lvp_plugins::volume::AppliedVolume;
    use std::path::PathBuf;

    fn empty_descriptor() -> DomainDescriptor {
        DomainDescriptor {
            kind: DomainType::Kvm,
            name: Some("m-1".into()),
            uuid: Uuid::new_v4(),
            metadata: None,
            memory: DomainMemory::bytes(1 << 30),
            memory_backing: None,
            vcpu: DomainVcpu { count: 1 },
            cpu: DomainCpu { mode: CpuMode::HostPassthrough },
            os: DomainOs {
                firmware: None,
                kind: DomainOsType { kind: OsTypeKind::Hvm, arch: "x86_64".into(), machine: "q35".into() },
                loader: None,
                kernel: None,
                initrd: None,
                cmdline: None,
            },
            features: DomainFeatures::default(),
            clock: DomainClock::default(),
            on_poweroff: DomainLifecycleAction::Destroy,
            on_reboot: DomainLifecycleAction::Restart,
            on_crash: crate::domain::DomainCrashAction::CoredumpRestart,
            devices: DomainDevices::default(),
        }
    }

    fn file_volume(name: &str) -> (VolumeSpec, AppliedVolume) {
        let spec = VolumeSpec {
            name: name.to_string(),
            device: "oda".into(),
            source: lvp_core::VolumeSource::EmptyDisk { size: 1 << 20 },
        };
        let applied = AppliedVolume {
            location: VolumeLocation::File(PathBuf::from(format!("/var/lib/lvp/{name}.raw"))),
            handle: format!("empty-disk/{name}"),
            size: 1 << 20,
        };
        (spec, applied)
    }

    #[tokio::test]
    async fn attach_then_detach_round_trips_disk_presence() {
        let mut descriptor = empty_descriptor();
        let executor = CreationExecutor;
        let (spec, applied) = file_volume("disk-1");

        {
            let mut attacher = VolumeAttacher::new(&mut descriptor, &executor, "writeback");
            attacher.attach(&spec, &applied).await.unwrap();
            assert_eq!(attacher.current_volume_names(), vec!["disk-1".to_string()]);
        }

        let mut attacher = VolumeAttacher::new(&mut descriptor, &executor, "writeback");
        attacher.detach("disk-1").await.unwrap();
        assert!(attacher.current_volume_names().is_empty());
    }

    #[tokio::test]
    async fn attaching_same_volume_twice_fails_already_exists() {
        let mut descriptor = empty_descriptor();
        let executor = CreationExecutor;
        let (spec, applied) = file_volume("disk-1");
        let mut attacher = VolumeAttacher::new(&mut descriptor, &executor, "writeback");
        attacher.attach(&spec, &applied).await.unwrap();
        let err = attacher.attach(&spec, &applied).await.unwrap_err();
        assert!(matches!(err, LibvirtError::DiskAlreadyExists(_)));
    }

    #[tokio::test]
    async fn detaching_missing_volume_fails_not_found() {
        let mut descriptor = empty_descriptor();
        let executor = CreationExecutor;
        let mut attacher = VolumeAttacher::new(&mut descriptor, &executor, "writeback");
        let err = attacher.detach("nope").await.unwrap_err();
        assert!(matches!(err, LibvirtError::DiskNotFound(_)));
    }

    #[tokio::test]
    async fn nic_attach_detach_round_trips_presence() {
        let mut descriptor = empty_descriptor();
        let executor = CreationExecutor;
        let spec = NetworkInterfaceSpec {
            name: "nic-1".into(),
            network_id: "net-a".into(),
            ips: vec![],
            attributes: Default::default(),
        };
        let applied = AppliedNic { handle: "isolated/nic-1".into(), variant: NicVariant::Isolated };

        {
            let mut attacher = NicAttacher::new(&mut descriptor, &executor);
            attacher.attach(&spec, &applied).await.unwrap();
            assert_eq!(attacher.current_nic_names(), vec!["nic-1".to_string()]);
        }
        let mut attacher = NicAttacher::new(&mut descriptor, &executor);
        attacher.detach("nic-1").await.unwrap();
        assert!(attacher.current_nic_names().is_empty());
    }
}
