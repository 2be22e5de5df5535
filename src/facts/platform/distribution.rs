//! Distribution name, version and OS family detection

use super::{PlatformFamily, NA};
use crate::facts::probe::{Fragment, ProbeContext};
use crate::facts::util::{key_values, major_version};
use crate::facts::SoftFailure;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distribution {
    pub name: String,
    pub version: String,
    pub major_version: String,
    pub release: String,
    pub os_family: String,
    /// Marker file that decided the distribution, when one did.
    pub file_path: Option<String>,
    pub file_variety: Option<String>,
}

impl Distribution {
    pub fn unknown() -> Self {
        Self {
            name: NA.to_string(),
            version: NA.to_string(),
            major_version: NA.to_string(),
            release: NA.to_string(),
            os_family: NA.to_string(),
            file_path: None,
            file_variety: None,
        }
    }
}

/// Partially known distribution while sources are consulted in order.
#[derive(Debug, Default, Clone, PartialEq)]
struct Partial {
    name: Option<String>,
    version: Option<String>,
    release: Option<String>,
    file_path: Option<String>,
    file_variety: Option<String>,
}

impl Partial {
    /// Fills fields that are still unknown.
    fn fill(&mut self, other: Partial) {
        self.name = self.name.take().or(other.name);
        self.version = self.version.take().or(other.version);
        self.release = self.release.take().or(other.release);
        self.file_path = self.file_path.take().or(other.file_path);
        self.file_variety = self.file_variety.take().or(other.file_variety);
    }

    fn finish(self, default_name: &str) -> Distribution {
        let name = self.name.unwrap_or_else(|| default_name.to_string());
        let version = self.version.unwrap_or_else(|| NA.to_string());
        let major_version = if version == NA {
            NA.to_string()
        } else {
            major_version(&version).unwrap_or_else(|| NA.to_string())
        };
        Distribution {
            os_family: os_family(&name).to_string(),
            name,
            version,
            major_version,
            release: self.release.unwrap_or_else(|| NA.to_string()),
            file_path: self.file_path,
            file_variety: self.file_variety,
        }
    }
}

/// Marker file consulted, in priority order, on Linux.
struct Marker {
    name: &'static str,
    path: &'static str,
    /// When set, the file only counts if it contains this text.
    needle: Option<&'static str>,
    /// Existence alone identifies the distribution.
    allow_empty: bool,
}

const fn marker(name: &'static str, path: &'static str) -> Marker {
    Marker {
        name,
        path,
        needle: None,
        allow_empty: false,
    }
}

const LINUX_MARKERS: &[Marker] = &[
    marker("Altlinux", "/etc/altlinux-release"),
    marker("OracleLinux", "/etc/oracle-release"),
    marker("Slackware", "/etc/slackware-version"),
    marker("CentOS", "/etc/centos-release"),
    marker("RedHat", "/etc/redhat-release"),
    Marker {
        allow_empty: true,
        ..marker("VMwareESX", "/etc/vmware-release")
    },
    marker("OpenWrt", "/etc/openwrt_release"),
    Marker {
        needle: Some("Amazon"),
        ..marker("Amazon", "/etc/system-release")
    },
    marker("Alpine", "/etc/alpine-release"),
    Marker {
        allow_empty: true,
        ..marker("Archlinux", "/etc/arch-release")
    },
    marker("SUSE", "/etc/SuSE-release"),
    marker("Gentoo", "/etc/gentoo-release"),
    Marker {
        needle: Some("Mandriva"),
        ..marker("Mandriva", "/etc/lsb-release")
    },
    marker("SMGL", "/etc/sourcemage-release"),
    marker("Coreos", "/etc/coreos/update.conf"),
];

static RELEASE_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"release (\d+(?:\.\d+)*)").expect("valid regex"));
static CODENAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([^)]+)\)").expect("valid regex"));
static DOTTED_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)+|\d+)").expect("valid regex"));
static OPENBSD_RELEASE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"OpenBSD\s[0-9]+\.[0-9]+-(\S+)\s").expect("valid regex"));
static NETBSD_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"NetBSD\s(\d+)\.(\d+)").expect("valid regex"));
static BSD_RELEASE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\.?(\d+)?").expect("valid regex"));
static HPUX_VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]\.(\d+\.\d+)").expect("valid regex"));

pub(super) async fn detect(
    ctx: &ProbeContext,
    scratch: &mut Fragment,
    family: PlatformFamily,
    system: &str,
    kernel: &str,
) -> Distribution {
    let partial = match family {
        PlatformFamily::Linux => linux(ctx, scratch).await,
        PlatformFamily::FreeBsd | PlatformFamily::DragonFly => Partial {
            name: Some(system.to_string()),
            version: bsd_version(kernel),
            release: Some(kernel.to_string()),
            ..Partial::default()
        },
        PlatformFamily::OpenBsd => {
            let kern_version = ctx.sysctl(scratch, "kern.version").await.ok().flatten();
            Partial {
                name: Some("OpenBSD".to_string()),
                version: Some(kernel.to_string()),
                release: kern_version.as_deref().and_then(openbsd_release),
                ..Partial::default()
            }
        }
        PlatformFamily::NetBsd => {
            let kern_version = ctx.sysctl(scratch, "kern.version").await.ok().flatten();
            Partial {
                name: Some("NetBSD".to_string()),
                version: kern_version
                    .as_deref()
                    .and_then(netbsd_version)
                    .or_else(|| Some(kernel.to_string())),
                release: Some(kernel.to_string()),
                ..Partial::default()
            }
        }
        PlatformFamily::Darwin => Partial {
            name: Some("MacOSX".to_string()),
            version: ctx
                .stdout(scratch, "sw_vers", &["-productVersion"])
                .await
                .ok()
                .flatten(),
            release: Some(kernel.to_string()),
            ..Partial::default()
        },
        PlatformFamily::SunOs => sunos(ctx, scratch).await,
        PlatformFamily::Aix => Partial {
            name: Some("AIX".to_string()),
            version: ctx
                .stdout(scratch, "oslevel", &[])
                .await
                .ok()
                .flatten()
                .map(|level| aix_version(&level)),
            release: Some(kernel.to_string()),
            ..Partial::default()
        },
        PlatformFamily::HpUx => Partial {
            name: Some("HP-UX".to_string()),
            version: hpux_version(kernel),
            release: Some(kernel.to_string()),
            ..Partial::default()
        },
        PlatformFamily::Unknown => Partial::default(),
    };

    partial.finish(system)
}

async fn linux(ctx: &ProbeContext, scratch: &mut Fragment) -> Partial {
    let mut partial = Partial::default();

    for marker in LINUX_MARKERS {
        let content = ctx.read(marker.path).await.ok().flatten();
        let found = match content {
            Some(content) => {
                if marker.needle.is_some_and(|needle| !content.contains(needle)) {
                    continue;
                }
                parse_marker(marker, &content)
            }
            None if marker.allow_empty && ctx.exists(marker.path).await => Partial {
                name: Some(marker.name.to_string()),
                ..Partial::default()
            },
            None => continue,
        };
        partial.fill(Partial {
            file_path: Some(marker.path.to_string()),
            file_variety: Some(marker.name.to_string()),
            ..found
        });
        break;
    }

    let os_release = match ctx.read("/etc/os-release").await.ok().flatten() {
        Some(content) => Some(content),
        None => ctx.read("/usr/lib/os-release").await.ok().flatten(),
    };
    if let Some(content) = os_release {
        partial.fill(parse_os_release(&content));
    }

    if partial.name.as_deref() == Some("Debian") {
        if let Some(full) = ctx.read_trimmed("/etc/debian_version").await.ok().flatten() {
            if full.starts_with(|c: char| c.is_ascii_digit()) {
                partial.version = Some(full);
            }
        }
    }

    if partial.name.is_none() || partial.version.is_none() {
        if let Some(content) = ctx.read("/etc/lsb-release").await.ok().flatten() {
            partial.fill(parse_lsb_release(&content));
        }
    }

    if partial.name.is_none() {
        if let Some(out) = ctx.stdout(scratch, "lsb_release", &["-a"]).await.ok().flatten() {
            partial.fill(parse_lsb_release_command(&out));
        }
    }

    if partial.name.is_none() {
        scratch.fail(SoftFailure::parse("distribution", "no release file matched"));
    }
    partial
}

fn parse_marker(marker: &Marker, content: &str) -> Partial {
    let first_line = content.lines().next().unwrap_or("").trim();
    let mut partial = Partial {
        name: Some(marker.name.to_string()),
        ..Partial::default()
    };

    match marker.name {
        "RedHat" | "CentOS" | "OracleLinux" | "Amazon" | "Altlinux" => {
            if marker.name == "RedHat" {
                partial.name = Some(redhat_variant(first_line).to_string());
            }
            partial.version = RELEASE_VERSION_RE
                .captures(first_line)
                .or_else(|| DOTTED_VERSION_RE.captures(first_line))
                .map(|c| c[1].to_string());
            partial.release = CODENAME_RE
                .captures(first_line)
                .map(|c| c[1].to_string());
        }
        "Slackware" | "Gentoo" | "VMwareESX" => {
            partial.version = DOTTED_VERSION_RE
                .captures(first_line)
                .map(|c| c[1].to_string());
        }
        "Alpine" | "SMGL" => {
            partial.version = (!first_line.is_empty()).then(|| first_line.to_string());
        }
        "OpenWrt" => {
            let kv = key_values(content, '=');
            partial.version = kv.get("DISTRIB_RELEASE").cloned();
            partial.release = kv.get("DISTRIB_CODENAME").cloned();
        }
        "Mandriva" => {
            let kv = key_values(content, '=');
            partial.version = kv.get("DISTRIB_RELEASE").cloned();
            partial.release = kv.get("DISTRIB_CODENAME").cloned();
        }
        "SUSE" => {
            let kv = key_values(content, '=');
            if first_line.to_lowercase().contains("enterprise") {
                partial.name = Some("SLES".to_string());
            } else {
                partial.name = Some("openSUSE".to_string());
            }
            partial.version = kv.get("VERSION").map(|v| match kv.get("PATCHLEVEL") {
                Some(patch) if patch != "0" => format!("{v}.{patch}"),
                _ => v.clone(),
            });
            partial.release = kv.get("PATCHLEVEL").cloned();
        }
        "Coreos" => {
            partial.release = key_values(content, '=').get("GROUP").cloned();
        }
        _ => {}
    }
    partial
}

/// `/etc/redhat-release` is shared by the whole RHEL family.
fn redhat_variant(line: &str) -> &'static str {
    const VARIANTS: &[(&str, &str)] = &[
        ("CentOS", "CentOS"),
        ("Fedora", "Fedora"),
        ("Rocky", "Rocky"),
        ("AlmaLinux", "AlmaLinux"),
        ("Scientific", "Scientific"),
        ("Oracle", "OracleLinux"),
        ("Virtuozzo", "Virtuozzo"),
    ];
    VARIANTS
        .iter()
        .find(|(needle, _)| line.contains(needle))
        .map(|(_, name)| *name)
        .unwrap_or("RedHat")
}

fn parse_os_release(content: &str) -> Partial {
    let kv = key_values(content, '=');
    let name = kv
        .get("ID")
        .map(|id| normalize_distribution(id))
        .or_else(|| kv.get("NAME").cloned());
    Partial {
        name,
        version: kv.get("VERSION_ID").cloned(),
        release: kv
            .get("VERSION_CODENAME")
            .or_else(|| kv.get("UBUNTU_CODENAME"))
            .filter(|c| !c.is_empty())
            .cloned(),
        ..Partial::default()
    }
}

fn parse_lsb_release(content: &str) -> Partial {
    let kv = key_values(content, '=');
    Partial {
        name: kv.get("DISTRIB_ID").map(|id| normalize_distribution(id)),
        version: kv.get("DISTRIB_RELEASE").cloned(),
        release: kv.get("DISTRIB_CODENAME").cloned(),
        ..Partial::default()
    }
}

fn parse_lsb_release_command(output: &str) -> Partial {
    let kv = key_values(output, ':');
    Partial {
        name: kv.get("Distributor ID").map(|id| normalize_distribution(id)),
        version: kv.get("Release").cloned(),
        release: kv.get("Codename").filter(|c| c.as_str() != "n/a").cloned(),
        ..Partial::default()
    }
}

/// Canonical distribution name for an os-release `ID`.
pub fn normalize_distribution(id: &str) -> String {
    let name = match id.to_lowercase().as_str() {
        "ubuntu" => "Ubuntu",
        "debian" => "Debian",
        "raspbian" => "Debian",
        "linuxmint" => "Linux Mint",
        "kali" => "Kali",
        "pop" => "Pop!_OS",
        "centos" => "CentOS",
        "rhel" | "redhat" | "redhatenterpriseserver" => "RedHat",
        "fedora" => "Fedora",
        "rocky" => "Rocky",
        "almalinux" => "AlmaLinux",
        "ol" | "oracle" => "OracleLinux",
        "amzn" | "amazon" => "Amazon",
        "scientific" => "Scientific",
        "sles" | "sles_sap" => "SLES",
        "opensuse" | "suse" => "SUSE",
        "opensuse-leap" => "openSUSE Leap",
        "opensuse-tumbleweed" => "openSUSE Tumbleweed",
        "arch" | "archarm" => "Archlinux",
        "manjaro" => "Manjaro",
        "alpine" => "Alpine",
        "gentoo" => "Gentoo",
        "slackware" => "Slackware",
        "altlinux" => "Altlinux",
        "clear-linux-os" => "ClearLinux",
        "coreos" => "Coreos",
        "flatcar" => "Flatcar",
        "void" => "Void",
        "nixos" => "NixOS",
        _ => {
            let mut chars = id.chars();
            return match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => NA.to_string(),
            };
        }
    };
    name.to_string()
}

/// OS family for a distribution name; unmapped names are their own family.
pub fn os_family(distribution: &str) -> &str {
    const FAMILIES: &[(&str, &[&str])] = &[
        (
            "RedHat",
            &[
                "RedHat", "Fedora", "CentOS", "Scientific", "OracleLinux", "Amazon",
                "Rocky", "AlmaLinux", "Virtuozzo", "XenServer",
            ],
        ),
        (
            "Debian",
            &["Debian", "Ubuntu", "Raspbian", "Linux Mint", "Kali", "Pop!_OS", "Devuan"],
        ),
        (
            "Suse",
            &["SUSE", "SLES", "SLED", "openSUSE", "openSUSE Leap", "openSUSE Tumbleweed"],
        ),
        ("Archlinux", &["Archlinux", "Manjaro"]),
        ("Gentoo", &["Gentoo"]),
        ("Alpine", &["Alpine"]),
        ("Slackware", &["Slackware"]),
        ("Altlinux", &["Altlinux"]),
        ("Mandrake", &["Mandriva", "Mandrake"]),
        ("ClearLinux", &["ClearLinux"]),
        ("Flatcar", &["Flatcar", "Coreos"]),
        ("Solaris", &["Solaris", "OpenIndiana", "OmniOS", "SmartOS", "Nexenta"]),
        ("Darwin", &["MacOSX"]),
    ];
    FAMILIES
        .iter()
        .find(|(_, members)| members.contains(&distribution))
        .map(|(family, _)| *family)
        .unwrap_or(distribution)
}

async fn sunos(ctx: &ProbeContext, scratch: &mut Fragment) -> Partial {
    let Some(content) = ctx.read("/etc/release").await.ok().flatten() else {
        scratch.fail(SoftFailure::parse("/etc/release", "missing"));
        return Partial {
            name: Some("Solaris".to_string()),
            ..Partial::default()
        };
    };
    let mut partial = parse_sunos_release(&content);
    partial.file_path = Some("/etc/release".to_string());
    partial.file_variety = Some("Solaris".to_string());
    partial
}

fn parse_sunos_release(content: &str) -> Partial {
    let line = content.lines().next().unwrap_or("").trim();
    const NAMES: &[(&str, &str)] = &[
        ("SmartOS", "SmartOS"),
        ("OpenIndiana", "OpenIndiana"),
        ("OmniOS", "OmniOS"),
        ("Nexenta", "Nexenta"),
        ("Solaris", "Solaris"),
    ];
    let name = NAMES
        .iter()
        .find(|(needle, _)| line.contains(needle))
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| "Solaris".to_string());

    let version = match name.as_str() {
        // "OmniOS v11 r151046" and "OpenIndiana Hipster 2023.04"
        "OmniOS" => line
            .split_whitespace()
            .find(|w| w.starts_with('r') && w[1..].chars().all(|c| c.is_ascii_digit()))
            .map(str::to_string),
        "SmartOS" => line
            .split_whitespace()
            .find(|w| w.chars().next().is_some_and(|c| c.is_ascii_digit()))
            .map(str::to_string),
        _ => DOTTED_VERSION_RE.captures(line).map(|c| c[1].to_string()),
    };

    Partial {
        name: Some(name),
        version,
        release: Some(line.to_string()),
        ..Partial::default()
    }
}

fn bsd_version(release: &str) -> Option<String> {
    let captures = BSD_RELEASE_RE.captures(release)?;
    Some(match captures.get(2) {
        Some(minor) => format!("{}.{}", &captures[1], minor.as_str()),
        None => captures[1].to_string(),
    })
}

fn openbsd_release(kern_version: &str) -> Option<String> {
    OPENBSD_RELEASE_RE
        .captures(kern_version)
        .map(|c| c[1].to_string())
        .or_else(|| Some("release".to_string()))
}

fn netbsd_version(kern_version: &str) -> Option<String> {
    NETBSD_VERSION_RE
        .captures(kern_version)
        .map(|c| format!("{}.{}", &c[1], &c[2]))
}

/// `7.2.0.0` → `7.2`
fn aix_version(oslevel: &str) -> String {
    let parts: Vec<&str> = oslevel.trim().split('.').collect();
    match parts.as_slice() {
        [major, minor, ..] => format!("{major}.{minor}"),
        _ => oslevel.trim().to_string(),
    }
}

/// `B.11.31` → `11.31`
fn hpux_version(release: &str) -> Option<String> {
    HPUX_VERSION_RE
        .captures(release)
        .map(|c| c[1].to_string())
}
