//! BSD virtualization heuristics

use super::{dmi_guest_type, render, VirtualizationInfo};
use crate::facts::probe::{FactProbe, Fragment, ProbeContext};
use crate::facts::{FactCategory, FactError};
use async_trait::async_trait;

/// FreeBSD and DragonFly.
pub struct FreeBsdVirtualization;

#[async_trait]
impl FactProbe for FreeBsdVirtualization {
    fn category(&self) -> FactCategory {
        FactCategory::Virtualization
    }

    fn name(&self) -> &'static str {
        "freebsd_virtual"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        let found = freebsd(ctx, fragment).await?;
        render(found, fragment);
        Ok(())
    }
}

async fn freebsd(
    ctx: &ProbeContext,
    fragment: &mut Fragment,
) -> Result<Option<VirtualizationInfo>, FactError> {
    if ctx.sysctl(fragment, "security.jail.jailed").await?.as_deref() == Some("1") {
        return Ok(Some(VirtualizationInfo::guest("jails")));
    }
    if let Some(kind) = ctx
        .sysctl(fragment, "kern.vm_guest")
        .await?
        .as_deref()
        .and_then(vm_guest_type)
    {
        return Ok(Some(VirtualizationInfo::guest(kind)));
    }
    if let Some(kind) = ctx
        .sysctl(fragment, "hw.hv_vendor")
        .await?
        .as_deref()
        .and_then(hv_vendor_type)
    {
        return Ok(Some(VirtualizationInfo::guest(kind)));
    }
    if let Some(kind) = ctx
        .stdout(fragment, "kenv", &["smbios.system.product"])
        .await?
        .as_deref()
        .and_then(dmi_guest_type)
    {
        return Ok(Some(VirtualizationInfo::guest(kind)));
    }
    let modules = ctx.stdout(fragment, "kldstat", &[]).await?;
    if modules.is_some_and(|m| m.lines().any(|l| l.split_whitespace().last() == Some("vmm.ko"))) {
        return Ok(Some(VirtualizationInfo::host("bhyve")));
    }
    Ok(None)
}

/// `kern.vm_guest`: `none` and `generic` say nothing useful.
fn vm_guest_type(value: &str) -> Option<&'static str> {
    match value {
        "kvm" => Some("kvm"),
        "xen" => Some("xen"),
        "vmware" => Some("VMware"),
        "hv" => Some("hyperv"),
        "bhyve" => Some("bhyve"),
        "vbox" => Some("virtualbox"),
        "parallels" => Some("parallels"),
        _ => None,
    }
}

/// CPUID hypervisor vendor signatures.
fn hv_vendor_type(value: &str) -> Option<&'static str> {
    if value.contains("bhyve") {
        Some("bhyve")
    } else if value.contains("KVMKVMKVM") {
        Some("kvm")
    } else if value.contains("Microsoft Hv") {
        Some("hyperv")
    } else if value.contains("VMwareVMware") {
        Some("VMware")
    } else if value.contains("XenVMM") {
        Some("xen")
    } else {
        None
    }
}

pub struct OpenBsdVirtualization;

#[async_trait]
impl FactProbe for OpenBsdVirtualization {
    fn category(&self) -> FactCategory {
        FactCategory::Virtualization
    }

    fn name(&self) -> &'static str {
        "openbsd_virtual"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        let mut found = None;
        for key in ["hw.product", "hw.vendor"] {
            if let Some(kind) = ctx.sysctl(fragment, key).await?.as_deref().and_then(dmi_guest_type) {
                found = Some(VirtualizationInfo::guest(kind));
                break;
            }
        }
        if found.is_none() {
            let dmesg = ctx.read("/var/run/dmesg.boot").await?;
            if dmesg.is_some_and(|d| d.lines().any(|l| l.starts_with("vmm0 at mainbus0"))) {
                found = Some(VirtualizationInfo::host("vmm"));
            }
        }
        render(found, fragment);
        Ok(())
    }
}

pub struct NetBsdVirtualization;

#[async_trait]
impl FactProbe for NetBsdVirtualization {
    fn category(&self) -> FactCategory {
        FactCategory::Virtualization
    }

    fn name(&self) -> &'static str {
        "netbsd_virtual"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        let mut found = None;
        for key in ["machdep.dmi.system-product", "machdep.dmi.system-vendor"] {
            if let Some(kind) = ctx.sysctl(fragment, key).await?.as_deref().and_then(dmi_guest_type) {
                found = Some(VirtualizationInfo::guest(kind));
                break;
            }
        }
        if found.is_none() {
            let hypervisor = ctx.sysctl(fragment, "machdep.hypervisor").await?;
            found = hypervisor
                .as_deref()
                .and_then(|h| match h {
                    h if h.contains("Xen") => Some("xen"),
                    h => dmi_guest_type(h).or_else(|| hv_vendor_type(h)),
                })
                .map(VirtualizationInfo::guest);
        }
        render(found, fragment);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::platform::PlatformIdentity;
    use crate::facts::stub::{StubReader, StubRunner};
    use crate::facts::ProbeDeadline;
    use std::sync::Arc;

    fn context(runner: StubRunner, reader: StubReader) -> ProbeContext {
        ProbeContext::new(
            Arc::new(PlatformIdentity::unknown()),
            Arc::new(runner),
            Arc::new(reader),
            ProbeDeadline::unbounded(),
        )
    }

    #[tokio::test]
    async fn test_freebsd_jail_first() {
        let runner = StubRunner::new()
            .with("sysctl -n security.jail.jailed", "1\n")
            .with("sysctl -n kern.vm_guest", "kvm\n");
        let ctx = context(runner, StubReader::new());
        let mut fragment = Fragment::new();
        FreeBsdVirtualization.collect(&ctx, &mut fragment).await.unwrap();
        assert_eq!(fragment.facts.get_str("virtualization_type"), Some("jails"));
    }

    #[tokio::test]
    async fn test_freebsd_bhyve_host() {
        let runner = StubRunner::new()
            .with("sysctl -n security.jail.jailed", "0\n")
            .with("sysctl -n kern.vm_guest", "none\n")
            .with(
                "kldstat",
                "Id Refs Address                Size Name\n 1   42 0xffffffff80200000 1f3e2d0 kernel\n 2    1 0xffffffff82a10000  3c0b8 vmm.ko\n",
            );
        let ctx = context(runner, StubReader::new());
        let mut fragment = Fragment::new();
        FreeBsdVirtualization.collect(&ctx, &mut fragment).await.unwrap();
        assert_eq!(fragment.facts.get_str("virtualization_type"), Some("bhyve"));
        assert_eq!(fragment.facts.get_str("virtualization_role"), Some("host"));
    }

    #[tokio::test]
    async fn test_openbsd_vmm_host() {
        let reader = StubReader::new()
            .with_file("/var/run/dmesg.boot", "cpu0 at mainbus0\nvmm0 at mainbus0: VMX/EPT\n");
        let ctx = context(StubRunner::new(), reader);
        let mut fragment = Fragment::new();
        OpenBsdVirtualization.collect(&ctx, &mut fragment).await.unwrap();
        assert_eq!(fragment.facts.get_str("virtualization_type"), Some("vmm"));
        assert_eq!(fragment.facts.get_str("virtualization_role"), Some("host"));
    }

    #[tokio::test]
    async fn test_netbsd_xen_hypervisor() {
        let runner = StubRunner::new().with("sysctl -n machdep.hypervisor", "Xen\n");
        let ctx = context(runner, StubReader::new());
        let mut fragment = Fragment::new();
        NetBsdVirtualization.collect(&ctx, &mut fragment).await.unwrap();
        assert_eq!(fragment.facts.get_str("virtualization_type"), Some("xen"));
    }

    #[test]
    fn test_hypervisor_signatures() {
        assert_eq!(hv_vendor_type("KVMKVMKVM"), Some("kvm"));
        assert_eq!(hv_vendor_type("bhyve bhyve "), Some("bhyve"));
        assert_eq!(vm_guest_type("generic"), None);
    }
}
