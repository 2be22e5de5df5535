//! Virtualization detection
//!
//! Each family runs its heuristics in a fixed order and reports the first
//! positive match. Known families always emit `virtualization_type` and
//! `virtualization_role`, falling back to `NA`.

pub mod aix;
pub mod bsd;
pub mod darwin;
pub mod hpux;
pub mod linux;
pub mod sunos;

use super::platform::PlatformFamily;
use super::probe::{FactProbe, Fragment, UnsupportedProbe};
use super::FactCategory;

pub const NA: &str = "NA";

pub fn probe_for(family: PlatformFamily) -> Box<dyn FactProbe> {
    match family {
        PlatformFamily::Linux => Box::new(linux::LinuxVirtualization),
        PlatformFamily::FreeBsd | PlatformFamily::DragonFly => {
            Box::new(bsd::FreeBsdVirtualization)
        }
        PlatformFamily::OpenBsd => Box::new(bsd::OpenBsdVirtualization),
        PlatformFamily::NetBsd => Box::new(bsd::NetBsdVirtualization),
        PlatformFamily::Darwin => Box::new(darwin::DarwinVirtualization),
        PlatformFamily::SunOs => Box::new(sunos::SunOsVirtualization),
        PlatformFamily::Aix => Box::new(aix::AixVirtualization),
        PlatformFamily::HpUx => Box::new(hpux::HpUxVirtualization),
        PlatformFamily::Unknown => Box::new(UnsupportedProbe::new(FactCategory::Virtualization)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualizationRole {
    Host,
    Guest,
}

impl VirtualizationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            VirtualizationRole::Host => "host",
            VirtualizationRole::Guest => "guest",
        }
    }
}

/// A positive detection. `None` in a fragment means `NA`/`NA`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualizationInfo {
    pub kind: String,
    pub role: VirtualizationRole,
}

impl VirtualizationInfo {
    pub fn guest(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            role: VirtualizationRole::Guest,
        }
    }

    pub fn host(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            role: VirtualizationRole::Host,
        }
    }
}

pub fn render(found: Option<VirtualizationInfo>, fragment: &mut Fragment) {
    match found {
        Some(info) => {
            fragment.insert("virtualization_type", info.kind);
            fragment.insert("virtualization_role", info.role.as_str());
        }
        None => {
            fragment.insert("virtualization_type", NA);
            fragment.insert("virtualization_role", NA);
        }
    }
}

/// Substring → virtualization type, checked in order. More specific vendors
/// precede the generic hypervisors they run on.
const DMI_VENDORS: &[(&str, &str)] = &[
    ("OpenStack", "openstack"),
    ("KubeVirt", "kubevirt"),
    ("RHEV Hypervisor", "RHEV"),
    ("oVirt", "oVirt"),
    ("KVM", "kvm"),
    ("Standard PC", "kvm"),
    ("QEMU", "kvm"),
    ("Amazon EC2", "kvm"),
    ("VMware", "VMware"),
    ("VirtualBox", "virtualbox"),
    ("innotek", "virtualbox"),
    ("HVM domU", "xen"),
    ("Xen", "xen"),
    ("Parallels", "parallels"),
    ("Bochs", "bochs"),
    ("BHYVE", "bhyve"),
];

/// Maps a DMI vendor or product string to a virtualization type.
pub fn dmi_guest_type(value: &str) -> Option<&'static str> {
    DMI_VENDORS
        .iter()
        .find(|(needle, _)| value.contains(needle))
        .map(|(_, kind)| *kind)
}

/// Hyper-V guests identify only through the vendor and product pair.
pub fn is_hyperv_guest(vendor: &str, product: &str) -> bool {
    vendor.contains("Microsoft Corporation") && product.contains("Virtual Machine")
}
