// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The domain descriptor struct tree and its libvirt-domain-XML encoding
//! (§4.7.1). `quick_xml::se::to_string`/`quick_xml::de::from_str` are the
//! only places that know the XML shape; everything else reads/writes plain
//! Rust fields.

pub mod capability;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ROOTFS_ALIAS: &str = "ua-rootfs";
pub const ROOTFS_TARGET_DEV: &str = "vdaaa";
pub const ROOTFS_SERIAL: &str = "machineboot";
pub const IGNITION_FW_CFG_KEY: &str = "opt/com.coreos/config";
pub const GUEST_AGENT_CHANNEL_TARGET: &str = "org.qemu.guest_agent.0";
pub const METADATA_NAMESPACE: &str = "https://lvp.alfredjean.dev/machine";
pub const METADATA_PREFIX: &str = "lvp";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "domain")]
pub struct DomainDescriptor {
    #[serde(rename = "@type")]
    pub kind: DomainType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub uuid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DomainMetadata>,
    pub memory: DomainMemory,
    #[serde(rename = "memoryBacking", skip_serializing_if = "Option::is_none")]
    pub memory_backing: Option<MemoryBacking>,
    pub vcpu: DomainVcpu,
    pub cpu: DomainCpu,
    pub os: DomainOs,
    pub features: DomainFeatures,
    pub clock: DomainClock,
    pub on_poweroff: DomainLifecycleAction,
    pub on_reboot: DomainLifecycleAction,
    pub on_crash: DomainCrashAction,
    pub devices: DomainDevices,
}

impl DomainDescriptor {
    /// Find a disk by its libvirt alias (I4/I5); used by both the creation
    /// executor (building up the descriptor) and the running executor
    /// (diffing live XML against desired state).
    pub fn find_disk(&self, alias: &str) -> Option<&Disk> {
        self.devices.contents.iter().find_map(|d| match d {
            DomainDevice::Disk(disk) if disk.alias.as_deref() == Some(alias) => Some(disk),
            _ => None,
        })
    }

    pub fn find_interface(&self, alias: &str) -> Option<&Interface> {
        self.devices.contents.iter().find_map(|d| match d {
            DomainDevice::Interface(nic) if nic.alias.as_deref() == Some(alias) => Some(nic),
            _ => None,
        })
    }

    pub fn disk_aliases(&self) -> impl Iterator<Item = &str> {
        self.devices.contents.iter().filter_map(|d| match d {
            DomainDevice::Disk(disk) => disk.alias.as_deref(),
            _ => None,
        })
    }

    pub fn interface_aliases(&self) -> impl Iterator<Item = &str> {
        self.devices.contents.iter().filter_map(|d| match d {
            DomainDevice::Interface(nic) => nic.alias.as_deref(),
            _ => None,
        })
    }

    pub fn push_disk(&mut self, disk: Disk) {
        self.devices.contents.push(DomainDevice::Disk(disk));
    }

    pub fn push_interface(&mut self, nic: Interface) {
        self.devices.contents.push(DomainDevice::Interface(nic));
    }

    pub fn remove_disk(&mut self, alias: &str) {
        self.devices
            .contents
            .retain(|d| !matches!(d, DomainDevice::Disk(disk) if disk.alias.as_deref() == Some(alias)));
    }

    pub fn remove_interface(&mut self, alias: &str) {
        self.devices
            .contents
            .retain(|d| !matches!(d, DomainDevice::Interface(nic) if nic.alias.as_deref() == Some(alias)));
    }

    pub fn to_xml(&self) -> Result<String, quick_xml::SeError> {
        quick_xml::se::to_string(self)
    }

    pub fn from_xml(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DomainType {
    #[default]
    Kvm,
    Qemu,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "metadata")]
pub struct DomainMetadata {
    #[serde(rename = "lvp:machine")]
    pub machine: MachineMetadata,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "lvp:machine")]
pub struct MachineMetadata {
    #[serde(rename = "@xmlns:lvp")]
    pub xmlns: String,
    /// Canonical text form, one `"key": "value"` per line, sorted by key.
    #[serde(rename = "$text")]
    pub labels: String,
}

impl MachineMetadata {
    pub fn from_labels(labels: &HashMap<String, String>) -> Self {
        let mut pairs: Vec<_> = labels.iter().collect();
        pairs.sort_by_key(|(k, _)| k.as_str());
        let text = pairs.into_iter().map(|(k, v)| format!("{k:?}: {v:?}")).collect::<Vec<_>>().join("\n");
        Self { xmlns: METADATA_NAMESPACE.to_string(), labels: text }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "memory")]
pub struct DomainMemory {
    #[serde(rename = "@unit")]
    pub unit: MemoryUnit,
    #[serde(rename = "$text")]
    pub value: u64,
}

impl DomainMemory {
    pub fn bytes(value: u64) -> Self {
        Self { unit: MemoryUnit::Byte, value }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename = "memoryBacking")]
pub struct MemoryBacking {
    pub hugepages: Hugepages,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default)]
pub struct Hugepages {}

#[derive(Debug, Serialize, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemoryUnit {
    #[default]
    Byte,
    KiB,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "vcpu")]
pub struct DomainVcpu {
    #[serde(rename = "$text")]
    pub count: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "cpu")]
pub struct DomainCpu {
    #[serde(rename = "@mode")]
    pub mode: CpuMode,
}

impl Default for DomainCpu {
    fn default() -> Self {
        Self { mode: CpuMode::HostPassthrough }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CpuMode {
    HostPassthrough,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename = "features")]
pub struct DomainFeatures {
    #[serde(default)]
    pub acpi: Acpi,
    #[serde(default)]
    pub apic: Apic,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default)]
pub struct Acpi {}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default)]
pub struct Apic {}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "clock")]
pub struct DomainClock {
    #[serde(rename = "@offset")]
    pub offset: ClockOffset,
    pub timer: Vec<ClockTimer>,
}

impl Default for DomainClock {
    fn default() -> Self {
        Self {
            offset: ClockOffset::Utc,
            timer: vec![
                ClockTimer { name: TimerName::Rtc, tickpolicy: Some(TickPolicy::Catchup) },
                ClockTimer { name: TimerName::Hpet, tickpolicy: Some(TickPolicy::Catchup) },
                ClockTimer { name: TimerName::Tsc, tickpolicy: Some(TickPolicy::Paravirt) },
            ],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClockOffset {
    Utc,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "timer")]
pub struct ClockTimer {
    #[serde(rename = "@name")]
    pub name: TimerName,
    #[serde(rename = "@tickpolicy", skip_serializing_if = "Option::is_none")]
    pub tickpolicy: Option<TickPolicy>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimerName {
    Rtc,
    Hpet,
    Tsc,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TickPolicy {
    Catchup,
    Paravirt,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DomainLifecycleAction {
    Destroy,
    Restart,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DomainCrashAction {
    CoredumpRestart,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "os")]
pub struct DomainOs {
    #[serde(rename = "@firmware", skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
    #[serde(rename = "type")]
    pub kind: DomainOsType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loader: Option<DomainOsLoader>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<OsPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initrd: Option<OsPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmdline: Option<OsCmdline>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DomainOsType {
    #[serde(rename = "$text")]
    pub kind: OsTypeKind,
    #[serde(rename = "@arch")]
    pub arch: String,
    #[serde(rename = "@machine")]
    pub machine: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OsTypeKind {
    Hvm,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "loader")]
pub struct DomainOsLoader {
    #[serde(rename = "@secure")]
    pub secure: bool,
    #[serde(rename = "$text", skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "kernel")]
pub struct OsPath {
    #[serde(rename = "$text")]
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "cmdline")]
pub struct OsCmdline {
    #[serde(rename = "$text")]
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename = "devices")]
pub struct DomainDevices {
    #[serde(rename = "$value", default)]
    pub contents: Vec<DomainDevice>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum DomainDevice {
    #[serde(rename = "disk")]
    Disk(Disk),
    #[serde(rename = "interface")]
    Interface(Interface),
    #[serde(rename = "hostdev")]
    HostDev(HostDev),
    #[serde(rename = "channel")]
    Channel(Channel),
    #[serde(rename = "console")]
    Console(Console),
    #[serde(rename = "serial")]
    Serial(Serial),
    #[serde(rename = "rng")]
    Rng(Rng),
    #[serde(rename = "controller")]
    Controller(Controller),
    #[serde(rename = "sysinfo")]
    FwCfg(FwCfgEntry),
    #[serde(other)]
    Other,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "disk")]
pub struct Disk {
    #[serde(rename = "@type")]
    pub kind: DiskType,
    #[serde(rename = "@device")]
    pub device: DiskDevice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<DiskDriver>,
    pub source: DiskSource,
    pub target: DiskTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<DiskAuth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<DiskEncryption>,
    #[serde(rename = "@alias", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(rename = "@serial", skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(rename = "@readonly", skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiskType {
    File,
    Network,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiskDevice {
    Disk,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "driver")]
pub struct DiskDriver {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "@cache", skip_serializing_if = "Option::is_none")]
    pub cache: Option<String>,
    #[serde(rename = "@io", skip_serializing_if = "Option::is_none")]
    pub io: Option<String>,
}

impl DiskDriver {
    pub fn qcow2() -> Self {
        Self { name: "qemu".into(), kind: "qcow2".into(), cache: None, io: None }
    }

    pub fn raw() -> Self {
        Self { name: "qemu".into(), kind: "raw".into(), cache: None, io: None }
    }

    pub fn rbd(cache_policy: &str) -> Self {
        Self {
            name: "qemu".into(),
            kind: "raw".into(),
            cache: Some(cache_policy.to_string()),
            io: Some("threads".into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename = "source")]
pub struct DiskSource {
    #[serde(rename = "@file", skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(rename = "@protocol", skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(rename = "@name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "host", default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<DiskSourceHost>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "host")]
pub struct DiskSourceHost {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@port", skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "target")]
pub struct DiskTarget {
    #[serde(rename = "@dev")]
    pub dev: String,
    #[serde(rename = "@bus")]
    pub bus: DiskBus,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiskBus {
    VirtIO,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "auth")]
pub struct DiskAuth {
    #[serde(rename = "@username")]
    pub username: String,
    pub secret: DiskAuthSecret,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "secret")]
pub struct DiskAuthSecret {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "@uuid")]
    pub uuid: Uuid,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "encryption")]
pub struct DiskEncryption {
    #[serde(rename = "@format")]
    pub format: String,
    pub secret: DiskEncryptionSecret,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "secret")]
pub struct DiskEncryptionSecret {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "@uuid")]
    pub uuid: Uuid,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "interface")]
pub struct Interface {
    #[serde(rename = "@type")]
    pub kind: InterfaceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<InterfaceSource>,
    #[serde(rename = "@alias", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    Network,
    Direct,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "source")]
pub struct InterfaceSource {
    #[serde(rename = "@network", skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(rename = "@dev", skip_serializing_if = "Option::is_none")]
    pub dev: Option<String>,
    #[serde(rename = "@mode", skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "hostdev")]
pub struct HostDev {
    #[serde(rename = "@mode")]
    pub mode: String,
    #[serde(rename = "@type")]
    pub kind: String,
    pub source: HostDevSource,
    #[serde(rename = "@alias", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "source")]
pub struct HostDevSource {
    pub address: HostDevAddress,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "address")]
pub struct HostDevAddress {
    #[serde(rename = "@domain")]
    pub domain: String,
    #[serde(rename = "@bus")]
    pub bus: String,
    #[serde(rename = "@slot")]
    pub slot: String,
    #[serde(rename = "@function")]
    pub function: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "channel")]
pub struct Channel {
    #[serde(rename = "@type")]
    pub kind: String,
    pub source: ChannelSource,
    pub target: ChannelTarget,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "source")]
pub struct ChannelSource {
    #[serde(rename = "@mode")]
    pub mode: String,
    #[serde(rename = "@path")]
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "target")]
pub struct ChannelTarget {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "@name")]
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "console")]
pub struct Console {
    #[serde(rename = "@type")]
    pub kind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "serial")]
pub struct Serial {
    #[serde(rename = "@type")]
    pub kind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "rng")]
pub struct Rng {
    #[serde(rename = "@model")]
    pub model: String,
    pub backend: RngBackend,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "backend")]
pub struct RngBackend {
    #[serde(rename = "@model")]
    pub model: String,
    #[serde(rename = "$text")]
    pub source: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "controller")]
pub struct Controller {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "@model")]
    pub model: String,
    #[serde(rename = "@index")]
    pub index: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "sysinfo")]
pub struct FwCfgEntry {
    #[serde(rename = "@type")]
    pub kind: String,
    pub entry: FwCfgDatum,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename = "entry")]
pub struct FwCfgDatum {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@file")]
    pub file: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_disk() -> Disk {
        Disk {
            kind: DiskType::File,
            device: DiskDevice::Disk,
            driver: Some(DiskDriver::qcow2()),
            source: DiskSource { file: Some("/var/lib/lvp/disk.qcow2".into()), ..Default::default() },
            target: DiskTarget { dev: "vda".into(), bus: DiskBus::VirtIO },
            auth: None,
            encryption: None,
            alias: Some("ua-volume-ZGlzay0x".into()),
            serial: None,
            readonly: None,
        }
    }

    #[test]
    fn disk_xml_renders_file_source_and_alias() {
        let xml = quick_xml::se::to_string(&sample_disk()).unwrap();
        assert!(xml.contains(r#"type="file""#));
        assert!(xml.contains(r#"alias="ua-volume-ZGlzay0x""#));
        assert!(xml.contains(r#"file="/var/lib/lvp/disk.qcow2""#));
    }

    #[test]
    fn find_disk_locates_by_alias() {
        let mut descriptor = empty_descriptor();
        descriptor.push_disk(sample_disk());
        assert!(descriptor.find_disk("ua-volume-ZGlzay0x").is_some());
        assert!(descriptor.find_disk("missing").is_none());
    }

    #[test]
    fn remove_disk_drops_only_the_matching_alias() {
        let mut descriptor = empty_descriptor();
        descriptor.push_disk(sample_disk());
        let mut other = sample_disk();
        other.alias = Some("ua-volume-b3RoZXI".into());
        descriptor.push_disk(other);

        descriptor.remove_disk("ua-volume-ZGlzay0x");
        assert!(descriptor.find_disk("ua-volume-ZGlzay0x").is_none());
        assert!(descriptor.find_disk("ua-volume-b3RoZXI").is_some());
    }

    fn empty_descriptor() -> DomainDescriptor {
        DomainDescriptor {
            kind: DomainType::Kvm,
            name: Some("m-1".into()),
            uuid: Uuid::nil(),
            metadata: None,
            memory: DomainMemory::bytes(1 << 30),
            memory_backing: None,
            vcpu: DomainVcpu { count: 1 },
            cpu: DomainCpu::default(),
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
            on_crash: DomainCrashAction::CoredumpRestart,
            devices: DomainDevices::default(),
        }
    }
}
