//! Linux virtualization heuristics

use super::{dmi_guest_type, is_hyperv_guest, render, VirtualizationInfo};
use crate::facts::probe::{FactProbe, Fragment, ProbeContext};
use crate::facts::{FactCategory, FactError};
use async_trait::async_trait;
use tracing::debug;

const DMI_ID: &str = "/sys/devices/virtual/dmi/id";

/// Checked in this order; the first positive heuristic wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Heuristic {
    Container,
    OpenVz,
    Xen,
    ProductName,
    BiosVendor,
    SysVendor,
    VServer,
    CpuInfo,
    Modules,
}

const ORDER: [Heuristic; 9] = [
    Heuristic::Container,
    Heuristic::OpenVz,
    Heuristic::Xen,
    Heuristic::ProductName,
    Heuristic::BiosVendor,
    Heuristic::SysVendor,
    Heuristic::VServer,
    Heuristic::CpuInfo,
    Heuristic::Modules,
];

pub struct LinuxVirtualization;

#[async_trait]
impl FactProbe for LinuxVirtualization {
    fn category(&self) -> FactCategory {
        FactCategory::Virtualization
    }

    fn name(&self) -> &'static str {
        "linux_virtual"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        let mut found = None;
        for heuristic in ORDER {
            if let Some(info) = heuristic.check(ctx).await? {
                debug!(?heuristic, kind = %info.kind, "virtualization detected");
                found = Some(info);
                break;
            }
        }
        render(found, fragment);
        Ok(())
    }
}

impl Heuristic {
    async fn check(self, ctx: &ProbeContext) -> Result<Option<VirtualizationInfo>, FactError> {
        match self {
            Heuristic::Container => container(ctx).await,
            Heuristic::OpenVz => {
                if !ctx.exists("/proc/vz").await {
                    return Ok(None);
                }
                Ok(Some(if ctx.exists("/proc/bc").await {
                    VirtualizationInfo::host("openvz")
                } else {
                    VirtualizationInfo::guest("openvz")
                }))
            }
            Heuristic::Xen => {
                if !ctx.exists("/proc/xen").await {
                    return Ok(None);
                }
                let capabilities = ctx.read("/proc/xen/capabilities").await?;
                Ok(Some(
                    if capabilities.is_some_and(|c| c.contains("control_d")) {
                        VirtualizationInfo::host("xen")
                    } else {
                        VirtualizationInfo::guest("xen")
                    },
                ))
            }
            Heuristic::ProductName => dmi_lookup(ctx, "product_name").await,
            Heuristic::BiosVendor => dmi_lookup(ctx, "bios_vendor").await,
            Heuristic::SysVendor => {
                let Some(vendor) = ctx.read_trimmed(format!("{DMI_ID}/sys_vendor")).await? else {
                    return Ok(None);
                };
                let product = ctx
                    .read_trimmed(format!("{DMI_ID}/product_name"))
                    .await?
                    .unwrap_or_default();
                if is_hyperv_guest(&vendor, &product) {
                    return Ok(Some(VirtualizationInfo::guest("VirtualPC")));
                }
                Ok(dmi_guest_type(&vendor).map(VirtualizationInfo::guest))
            }
            Heuristic::VServer => {
                let status = ctx.read("/proc/self/status").await?;
                Ok(status.as_deref().and_then(vserver))
            }
            Heuristic::CpuInfo => cpuinfo(ctx).await,
            Heuristic::Modules => {
                let modules = ctx.read("/proc/modules").await?;
                Ok(modules.as_deref().and_then(loaded_modules))
            }
        }
    }
}

async fn container(ctx: &ProbeContext) -> Result<Option<VirtualizationInfo>, FactError> {
    if let Some(kind) = ctx.read("/proc/1/cgroup").await?.as_deref().and_then(cgroup_container) {
        return Ok(Some(VirtualizationInfo::guest(kind)));
    }
    if let Some(kind) = ctx.read("/proc/1/environ").await?.as_deref().and_then(environ_container) {
        return Ok(Some(VirtualizationInfo::guest(kind)));
    }
    if ctx.exists("/.dockerenv").await {
        return Ok(Some(VirtualizationInfo::guest("docker")));
    }
    if ctx.exists("/run/.containerenv").await {
        return Ok(Some(VirtualizationInfo::guest("podman")));
    }
    Ok(None)
}

fn cgroup_container(cgroup: &str) -> Option<&'static str> {
    cgroup.lines().find_map(|line| {
        if line.contains("/docker/") || line.contains("docker-") {
            Some("docker")
        } else if line.contains("/lxc/") {
            Some("lxc")
        } else if line.contains("kubepods") {
            Some("containerd")
        } else if line.contains("machine.slice") {
            Some("systemd-nspawn")
        } else {
            None
        }
    })
}

/// `/proc/1/environ` is NUL separated.
fn environ_container(environ: &str) -> Option<String> {
    environ
        .split(['\0', '\n'])
        .find_map(|entry| entry.strip_prefix("container="))
        .filter(|value| !value.is_empty())
        .map(|value| match value {
            "oci" => "podman".to_string(),
            other => other.to_string(),
        })
}

async fn dmi_lookup(
    ctx: &ProbeContext,
    field: &str,
) -> Result<Option<VirtualizationInfo>, FactError> {
    let value = ctx.read_trimmed(format!("{DMI_ID}/{field}")).await?;
    Ok(value
        .as_deref()
        .and_then(dmi_guest_type)
        .map(VirtualizationInfo::guest))
}

/// `VxID: 0` is the host context.
fn vserver(status: &str) -> Option<VirtualizationInfo> {
    let id = status
        .lines()
        .find_map(|line| line.strip_prefix("VxID:"))?
        .trim();
    Some(if id == "0" {
        VirtualizationInfo::host("linux_vserver")
    } else {
        VirtualizationInfo::guest("linux_vserver")
    })
}

async fn cpuinfo(ctx: &ProbeContext) -> Result<Option<VirtualizationInfo>, FactError> {
    let Some(cpuinfo) = ctx.read("/proc/cpuinfo").await? else {
        return Ok(None);
    };
    if cpuinfo.contains("User Mode Linux") {
        return Ok(Some(VirtualizationInfo::guest("uml")));
    }
    if cpuinfo.contains("PowerVM Lx86") {
        return Ok(Some(VirtualizationInfo::guest("powervm_lx86")));
    }
    if cpuinfo.contains("IBM/S390") {
        let sysinfo = ctx.read("/proc/sysinfo").await?.unwrap_or_default();
        if sysinfo.contains("VM00") {
            return Ok(Some(VirtualizationInfo::guest("zvm")));
        }
        if sysinfo.contains("LPAR") {
            return Ok(Some(VirtualizationInfo::guest("ibm_systemz")));
        }
    }
    Ok(None)
}

fn loaded_modules(modules: &str) -> Option<VirtualizationInfo> {
    let names: Vec<&str> = modules
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .collect();
    if names.contains(&"kvm") {
        Some(VirtualizationInfo::host("kvm"))
    } else if names.contains(&"vboxdrv") {
        Some(VirtualizationInfo::host("virtualbox"))
    } else if names.iter().any(|name| name.starts_with("virtio")) {
        Some(VirtualizationInfo::guest("kvm"))
    } else {
        None
    }
}
