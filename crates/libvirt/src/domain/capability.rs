// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain/machine-type capability selection (§4.7 "Capability selection").

use serde::Deserialize;
use thiserror::Error;

use crate::error::LibvirtError;

#[derive(Debug, Clone)]
pub struct GuestCapability {
    pub os_type: String,
    pub arch: String,
    pub domain_type: String,
    pub machine_type: String,
}

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("no domain/machine pair advertised for os_type={os_type} arch={arch}")]
    NoMatch { os_type: String, arch: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selected<'a> {
    pub domain_type: &'a str,
    pub machine_type: &'a str,
}

/// Parse the numeric `-N.M` suffix of a machine-type name, if any.
fn machine_version(machine_type: &str) -> Option<(u32, u32)> {
    let (_, suffix) = machine_type.rsplit_once('-')?;
    let (major, minor) = suffix.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// Pick the best-matching (domain type, machine type) pair for `(os_type,
/// arch)` out of the host's advertised capabilities, honoring `domain_prefs`
/// and `machine_prefs` ordering. Empty preference lists fall back to "first
/// advertised".
pub fn select<'a>(
    capabilities: &'a [GuestCapability],
    os_type: &str,
    arch: &str,
    domain_prefs: &[&str],
    machine_prefs: &[&str],
) -> Result<Selected<'a>, CapabilityError> {
    let candidates: Vec<&GuestCapability> = capabilities
        .iter()
        .filter(|c| c.os_type == os_type && c.arch == arch)
        .collect();

    if candidates.is_empty() {
        return Err(CapabilityError::NoMatch { os_type: os_type.to_string(), arch: arch.to_string() });
    }

    let domain_rank = |domain_type: &str| -> usize {
        domain_prefs.iter().position(|p| *p == domain_type).unwrap_or(usize::MAX)
    };
    let machine_rank = |machine_type: &str| -> usize {
        machine_prefs
            .iter()
            .position(|p| machine_type.starts_with(p))
            .unwrap_or(usize::MAX)
    };

    let best = candidates.into_iter().min_by(|a, b| {
        let a_key = (domain_rank(&a.domain_type), machine_rank(&a.machine_type));
        let b_key = (domain_rank(&b.domain_type), machine_rank(&b.machine_type));
        a_key.cmp(&b_key).then_with(|| {
            // Within equally-preferred machine types, the numerically largest
            // -N.M suffix wins (newest chipset revision).
            machine_version(&b.machine_type).cmp(&machine_version(&a.machine_type))
        })
    });

    match best {
        // `candidates` was checked non-empty above, so `min_by` always yields Some.
        Some(best) => Ok(Selected { domain_type: best.domain_type.as_str(), machine_type: best.machine_type.as_str() }),
        None => Err(CapabilityError::NoMatch { os_type: os_type.to_string(), arch: arch.to_string() }),
    }
}

#[derive(Debug, Deserialize)]
struct CapabilitiesXml {
    #[serde(rename = "guest", default)]
    guests: Vec<GuestXml>,
}

#[derive(Debug, Deserialize)]
struct GuestXml {
    os_type: String,
    arch: ArchXml,
}

#[derive(Debug, Deserialize)]
struct ArchXml {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "domain", default)]
    domains: Vec<DomainXml>,
    #[serde(rename = "machine", default)]
    machines: Vec<MachineXml>,
}

#[derive(Debug, Deserialize)]
struct DomainXml {
    #[serde(rename = "@type")]
    kind: String,
    #[serde(rename = "machine", default)]
    machines: Vec<MachineXml>,
}

#[derive(Debug, Deserialize)]
struct MachineXml {
    #[serde(rename = "$text")]
    name: String,
}

/// Parse `virConnectGetCapabilities`' XML into the flat `(os_type, arch,
/// domain_type, machine_type)` tuples [`select`] operates on. A `<domain>`
/// without its own `<machine>` list inherits the `<arch>`-level default.
pub fn parse_capabilities_xml(xml: &str) -> Result<Vec<GuestCapability>, LibvirtError> {
    let parsed: CapabilitiesXml = quick_xml::de::from_str(xml)?;

    let mut out = Vec::new();
    for guest in parsed.guests {
        for domain in &guest.arch.domains {
            let machines = if domain.machines.is_empty() { &guest.arch.machines } else { &domain.machines };
            for machine in machines {
                out.push(GuestCapability {
                    os_type: guest.os_type.clone(),
                    arch: guest.arch.name.clone(),
                    domain_type: domain.kind.clone(),
                    machine_type: machine.name.clone(),
                });
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> Vec<GuestCapability> {
        vec![
            GuestCapability {
                os_type: "hvm".into(),
                arch: "x86_64".into(),
                domain_type: "qemu".into(),
                machine_type: "pc-q35-8.1".into(),
            },
            GuestCapability {
                os_type: "hvm".into(),
                arch: "x86_64".into(),
                domain_type: "kvm".into(),
                machine_type: "pc-q35-7.2".into(),
            },
            GuestCapability {
                os_type: "hvm".into(),
                arch: "x86_64".into(),
                domain_type: "kvm".into(),
                machine_type: "pc-q35-8.1".into(),
            },
        ]
    }

    #[test]
    fn prefers_lowest_index_domain_type() {
        let selected = select(&caps(), "hvm", "x86_64", &["kvm", "qemu"], &["pc-q35"]).unwrap();
        assert_eq!(selected.domain_type, "kvm");
    }

    #[test]
    fn ties_break_on_largest_machine_version() {
        let selected = select(&caps(), "hvm", "x86_64", &["kvm"], &["pc-q35"]).unwrap();
        assert_eq!(selected.machine_type, "pc-q35-8.1");
    }

    #[test]
    fn no_preference_picks_first_advertised() {
        let selected = select(&caps(), "hvm", "x86_64", &[], &[]).unwrap();
        assert_eq!(selected.domain_type, "qemu");
        assert_eq!(selected.machine_type, "pc-q35-8.1");
    }

    #[test]
    fn unmatched_os_type_errors() {
        assert!(select(&caps(), "xen", "x86_64", &[], &[]).is_err());
    }

    #[test]
    fn parses_domain_specific_machine_lists_from_capabilities_xml() {
        let xml = r#"<capabilities>
            <guest>
                <os_type>hvm</os_type>
                <arch name='x86_64'>
                    <domain type='qemu'>
                        <machine>pc-q35-7.2</machine>
                    </domain>
                    <domain type='kvm'/>
                    <machine>pc-q35-8.1</machine>
                </arch>
            </guest>
        </capabilities>"#;

        let caps = parse_capabilities_xml(xml).unwrap();
        assert!(caps.iter().any(|c| c.domain_type == "qemu" && c.machine_type == "pc-q35-7.2"));
        // `kvm` has no domain-specific machine list, so it inherits the arch default.
        assert!(caps.iter().any(|c| c.domain_type == "kvm" && c.machine_type == "pc-q35-8.1"));
    }
}
