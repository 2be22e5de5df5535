//! Distribution category: renders the shared platform identity

use super::PlatformFamily;
use crate::facts::probe::{FactProbe, Fragment, ProbeContext};
use crate::facts::{FactCategory, FactError};
use async_trait::async_trait;

/// Distribution facts need no platform-specific code once the identity is
/// known, so every family, `Unknown` included, uses the same probe.
pub fn probe_for(_family: PlatformFamily) -> Box<dyn FactProbe> {
    Box::new(DistributionProbe)
}

pub struct DistributionProbe;

#[async_trait]
impl FactProbe for DistributionProbe {
    fn category(&self) -> FactCategory {
        FactCategory::Distribution
    }

    fn name(&self) -> &'static str {
        "distribution"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        let id = &ctx.identity;
        let dist = &id.distribution;

        fragment.insert("system", &id.system);
        fragment.insert("kernel", &id.kernel);
        fragment.insert("kernel_version", &id.kernel_version);
        fragment.insert("machine", &id.machine);
        fragment.insert("architecture", &id.architecture);
        fragment.insert_opt("userspace_bits", id.userspace_bits);
        fragment.insert_opt("userspace_architecture", id.userspace_architecture.as_ref());

        fragment.insert("os_family", &dist.os_family);
        fragment.insert("distribution", &dist.name);
        fragment.insert("distribution_version", &dist.version);
        fragment.insert("distribution_major_version", &dist.major_version);
        fragment.insert("distribution_release", &dist.release);
        fragment.insert_opt("distribution_file_path", dist.file_path.as_ref());
        fragment.insert_opt("distribution_file_variety", dist.file_variety.as_ref());

        fragment.insert("hostname", id.short_hostname());
        fragment.insert("nodename", &id.nodename);
        fragment.insert("fqdn", &id.fqdn);
        fragment.insert("domain", id.domain());
        Ok(())
    }
}
