//! Platform identity detection
//!
//! The identity is computed once per collection, before any probe runs, and
//! handed to every probe through its [`ProbeContext`]. Detection never fails:
//! anything that cannot be determined reads as `NA`.

pub mod distribution;
pub mod probe;

pub use distribution::Distribution;

use super::deadline::ProbeDeadline;
use super::probe::{Fragment, ProbeContext};
use super::reader::FileReader;
use super::runner::CommandRunner;
use super::SoftFailure;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub const NA: &str = "NA";

/// Coarse OS classification used to pick probe implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PlatformFamily {
    Linux,
    FreeBsd,
    DragonFly,
    OpenBsd,
    NetBsd,
    SunOs,
    Aix,
    HpUx,
    Darwin,
    Unknown,
}

impl PlatformFamily {
    /// Maps `uname -s` output to a family.
    pub fn from_uname(system: &str) -> Self {
        match system.trim() {
            "Linux" => PlatformFamily::Linux,
            "FreeBSD" | "GNU/kFreeBSD" => PlatformFamily::FreeBsd,
            "DragonFly" => PlatformFamily::DragonFly,
            "OpenBSD" => PlatformFamily::OpenBsd,
            "NetBSD" => PlatformFamily::NetBsd,
            "SunOS" => PlatformFamily::SunOs,
            "AIX" => PlatformFamily::Aix,
            "HP-UX" => PlatformFamily::HpUx,
            "Darwin" => PlatformFamily::Darwin,
            _ => PlatformFamily::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformFamily::Linux => "Linux",
            PlatformFamily::FreeBsd => "FreeBSD",
            PlatformFamily::DragonFly => "DragonFly",
            PlatformFamily::OpenBsd => "OpenBSD",
            PlatformFamily::NetBsd => "NetBSD",
            PlatformFamily::SunOs => "SunOS",
            PlatformFamily::Aix => "AIX",
            PlatformFamily::HpUx => "HP-UX",
            PlatformFamily::Darwin => "Darwin",
            PlatformFamily::Unknown => NA,
        }
    }

    pub fn is_bsd(&self) -> bool {
        matches!(
            self,
            PlatformFamily::FreeBsd
                | PlatformFamily::DragonFly
                | PlatformFamily::OpenBsd
                | PlatformFamily::NetBsd
        )
    }
}

impl fmt::Display for PlatformFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformIdentity {
    pub family: PlatformFamily,
    /// `uname -s`, or `NA`.
    pub system: String,
    pub kernel: String,
    pub kernel_version: String,
    pub machine: String,
    pub architecture: String,
    pub userspace_bits: Option<u32>,
    pub userspace_architecture: Option<String>,
    pub nodename: String,
    pub fqdn: String,
    pub distribution: Distribution,
}

impl PlatformIdentity {
    /// Identity of a host nothing could be learned about.
    pub fn unknown() -> Self {
        Self {
            family: PlatformFamily::Unknown,
            system: NA.to_string(),
            kernel: NA.to_string(),
            kernel_version: NA.to_string(),
            machine: NA.to_string(),
            architecture: NA.to_string(),
            userspace_bits: None,
            userspace_architecture: None,
            nodename: NA.to_string(),
            fqdn: NA.to_string(),
            distribution: Distribution::unknown(),
        }
    }

    /// Inspects the host. Every probe failure degrades to `NA` fields.
    pub async fn collect(
        runner: Arc<dyn CommandRunner>,
        reader: Arc<dyn FileReader>,
        deadline: ProbeDeadline,
    ) -> Self {
        let ctx = ProbeContext::new(Arc::new(Self::unknown()), runner, reader, deadline);
        let mut scratch = Fragment::new();
        let identity = detect(&ctx, &mut scratch).await;
        for failure in &scratch.failures {
            debug!(%failure, "platform detection degraded");
        }
        debug!(
            family = %identity.family,
            distribution = %identity.distribution.name,
            version = %identity.distribution.version,
            "platform identity detected"
        );
        identity
    }

    pub fn short_hostname(&self) -> &str {
        self.nodename.split('.').next().unwrap_or(&self.nodename)
    }

    pub fn domain(&self) -> &str {
        self.fqdn.split_once('.').map(|(_, d)| d).unwrap_or("")
    }
}

async fn detect(ctx: &ProbeContext, scratch: &mut Fragment) -> PlatformIdentity {
    let uname = |flag: &'static str| async move {
        let mut local = Fragment::new();
        let value = ctx.stdout(&mut local, "uname", &[flag]).await.ok().flatten();
        (value, local.failures)
    };

    let (system, failures) = uname("-s").await;
    for failure in failures {
        scratch.fail(failure);
    }
    let Some(system) = system else {
        return PlatformIdentity::unknown();
    };

    let family = PlatformFamily::from_uname(&system);
    let kernel = uname("-r").await.0.unwrap_or_else(|| NA.to_string());
    let kernel_version = uname("-v").await.0.unwrap_or_else(|| NA.to_string());
    let machine = uname("-m").await.0.unwrap_or_else(|| NA.to_string());
    let nodename = uname("-n")
        .await
        .0
        .or_else(|| hostname::get().ok().and_then(|h| h.into_string().ok()))
        .unwrap_or_else(|| NA.to_string());

    let userspace_bits = ctx
        .stdout(scratch, "getconf", &["LONG_BIT"])
        .await
        .ok()
        .flatten()
        .and_then(|bits| bits.parse::<u32>().ok())
        .or(Some(usize::BITS));

    let architecture = resolve_architecture(ctx, scratch, family, &machine).await;
    let userspace_architecture = userspace_bits.and_then(|bits| userspace_arch(&machine, bits));

    let fqdn = match ctx.stdout(scratch, "hostname", &["-f"]).await.ok().flatten() {
        Some(fqdn) if fqdn.contains('.') => fqdn,
        _ => nodename.clone(),
    };

    let distribution =
        distribution::detect(ctx, scratch, family, &system, &kernel).await;

    PlatformIdentity {
        family,
        system,
        kernel,
        kernel_version,
        machine,
        architecture,
        userspace_bits,
        userspace_architecture,
        nodename,
        fqdn,
        distribution,
    }
}

static I386_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^i[3-6]86$").expect("valid regex"));
static ARM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^armv?\d").expect("valid regex"));

/// Userspace architecture from the reported machine string and the bit width
/// of userspace, which may differ from the kernel's.
pub fn userspace_arch(machine: &str, bits: u32) -> Option<String> {
    match machine {
        "x86_64" | "amd64" => Some(if bits == 32 { "i386" } else { "x86_64" }.to_string()),
        "aarch64" | "arm64" => Some(if bits == 32 { "arm" } else { machine }.to_string()),
        m if I386_RE.is_match(m) => Some("i386".to_string()),
        m if ARM_RE.is_match(m) => Some(m.to_string()),
        _ => None,
    }
}

async fn resolve_architecture(
    ctx: &ProbeContext,
    scratch: &mut Fragment,
    family: PlatformFamily,
    machine: &str,
) -> String {
    match family {
        PlatformFamily::Aix => {
            if let Some(arch) = ctx
                .stdout(scratch, "getconf", &["MACHINE_ARCHITECTURE"])
                .await
                .ok()
                .flatten()
            {
                return arch;
            }
        }
        PlatformFamily::OpenBsd => {
            if let Some(arch) = ctx.stdout(scratch, "uname", &["-p"]).await.ok().flatten() {
                return arch;
            }
        }
        _ => {}
    }

    match machine {
        "i86pc" => match ctx.stdout(scratch, "isainfo", &["-n"]).await.ok().flatten() {
            Some(isa) if isa == "amd64" => "x86_64".to_string(),
            Some(_) => "i386".to_string(),
            None => {
                scratch.fail(SoftFailure::parse("isainfo", "cannot resolve i86pc"));
                machine.to_string()
            }
        },
        m if I386_RE.is_match(m) => "i386".to_string(),
        m => m.to_string(),
    }
}
