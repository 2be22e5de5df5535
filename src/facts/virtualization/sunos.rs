//! Solaris and illumos virtualization heuristics

use super::{dmi_guest_type, render, VirtualizationInfo};
use crate::facts::probe::{FactProbe, Fragment, ProbeContext};
use crate::facts::{FactCategory, FactError};
use async_trait::async_trait;

pub struct SunOsVirtualization;

#[async_trait]
impl FactProbe for SunOsVirtualization {
    fn category(&self) -> FactCategory {
        FactCategory::Virtualization
    }

    fn name(&self) -> &'static str {
        "sunos_virtual"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        let found = detect(ctx, fragment).await?;
        render(found, fragment);
        Ok(())
    }
}

async fn detect(
    ctx: &ProbeContext,
    fragment: &mut Fragment,
) -> Result<Option<VirtualizationInfo>, FactError> {
    let zone = ctx.stdout(fragment, "zonename", &[]).await?;
    if zone.is_some_and(|z| z != "global") {
        return Ok(Some(VirtualizationInfo::guest("zone")));
    }

    let virtinfo = ctx.stdout(fragment, "virtinfo", &["-p"]).await?;
    if virtinfo.is_some_and(|v| {
        v.lines()
            .any(|l| l.starts_with("DOMAINROLE|") && l.contains("impl=LDoms"))
    }) {
        return Ok(Some(VirtualizationInfo::guest("ldom")));
    }

    if let Some(kind) = ctx
        .stdout(fragment, "prtdiag", &[])
        .await?
        .as_deref()
        .and_then(|out| {
            out.lines()
                .find_map(|l| l.strip_prefix("System Configuration:"))
                .and_then(dmi_guest_type)
        })
    {
        return Ok(Some(VirtualizationInfo::guest(kind)));
    }

    let modules = ctx.stdout(fragment, "modinfo", &[]).await?;
    if modules.is_some_and(|m| m.split_whitespace().any(|w| w == "vboxdrv")) {
        return Ok(Some(VirtualizationInfo::host("virtualbox")));
    }
    Ok(None)
}
