//! HP-UX vPars and Integrity VM

use super::{render, VirtualizationInfo};
use crate::facts::probe::{FactProbe, Fragment, ProbeContext};
use crate::facts::{FactCategory, FactError};
use async_trait::async_trait;

const VECHECK: &str = "/usr/sbin/vecheck";
const HPVMINFO: &str = "/opt/hpvm/bin/hpvminfo";

pub struct HpUxVirtualization;

#[async_trait]
impl FactProbe for HpUxVirtualization {
    fn category(&self) -> FactCategory {
        FactCategory::Virtualization
    }

    fn name(&self) -> &'static str {
        "hpux_virtual"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        let mut found = None;
        // Both tools are optional; their absence is not a failure.
        if ctx.run(VECHECK, &[]).await?.success() {
            found = Some(VirtualizationInfo::guest("HP vPar"));
        }
        if found.is_none() {
            let hpvminfo = ctx.run(HPVMINFO, &[]).await?;
            found = hpvminfo.stdout_if_ok().and_then(hpvm_type);
        }
        render(found, fragment);
        Ok(())
    }
}

fn hpvm_type(output: &str) -> Option<VirtualizationInfo> {
    if output.contains("Running HPVM vPar") {
        Some(VirtualizationInfo::guest("HPVM vPar"))
    } else if output.contains("Running HPVM guest") {
        Some(VirtualizationInfo::guest("HPVM IVM"))
    } else if output.contains("Running HPVM host") {
        Some(VirtualizationInfo::host("HPVM"))
    } else {
        None
    }
}
