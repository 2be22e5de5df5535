//! macOS virtualization heuristics

use super::{render, VirtualizationInfo};
use crate::facts::probe::{FactProbe, Fragment, ProbeContext};
use crate::facts::{FactCategory, FactError};
use async_trait::async_trait;

pub struct DarwinVirtualization;

#[async_trait]
impl FactProbe for DarwinVirtualization {
    fn category(&self) -> FactCategory {
        FactCategory::Virtualization
    }

    fn name(&self) -> &'static str {
        "darwin_virtual"
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
    if let Some(kind) = ctx.sysctl(fragment, "hw.model").await?.as_deref().and_then(model_type) {
        return Ok(Some(VirtualizationInfo::guest(kind)));
    }
    let features = ctx.sysctl(fragment, "machdep.cpu.features").await?;
    if features.is_some_and(|f| f.split_whitespace().any(|flag| flag == "VMM")) {
        return Ok(Some(VirtualizationInfo::guest("vmm")));
    }
    if ctx.sysctl(fragment, "kern.hv_vmm_present").await?.as_deref() == Some("1") {
        return Ok(Some(VirtualizationInfo::guest("apple_hv")));
    }
    Ok(None)
}

fn model_type(model: &str) -> Option<&'static str> {
    if model.contains("VMware") {
        Some("VMware")
    } else if model.contains("Parallels") {
        Some("parallels")
    } else if model.contains("VirtualBox") {
        Some("virtualbox")
    } else {
        None
    }
}
