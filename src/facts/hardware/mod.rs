//! Hardware fact collection
//!
//! One probe per platform family. The parsers for `/proc/cpuinfo` and
//! `/proc/meminfo` live here because NetBSD exposes the same files.

pub mod aix;
pub mod bsd;
pub mod darwin;
pub mod hpux;
pub mod linux;
pub mod sunos;

use super::platform::PlatformFamily;
use super::probe::{FactProbe, Fragment, ProbeContext, UnsupportedProbe};
use super::util::kb_to_mb;
use super::{FactCategory, FactError, FactMap, FactValue};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn probe_for(family: PlatformFamily) -> Box<dyn FactProbe> {
    match family {
        PlatformFamily::Linux => Box::new(linux::LinuxHardware),
        PlatformFamily::FreeBsd | PlatformFamily::DragonFly => Box::new(bsd::FreeBsdHardware),
        PlatformFamily::OpenBsd => Box::new(bsd::OpenBsdHardware),
        PlatformFamily::NetBsd => Box::new(bsd::NetBsdHardware),
        PlatformFamily::Darwin => Box::new(darwin::DarwinHardware),
        PlatformFamily::SunOs => Box::new(sunos::SunOsHardware),
        PlatformFamily::Aix => Box::new(aix::AixHardware),
        PlatformFamily::HpUx => Box::new(hpux::HpUxHardware),
        PlatformFamily::Unknown => Box::new(UnsupportedProbe::new(FactCategory::Hardware)),
    }
}

/// Processor topology derived from a per-logical-CPU listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuTopology {
    /// `(vendor, model)` per logical processor, in listing order.
    pub processors: Vec<(Option<String>, String)>,
    pub sockets: u64,
    /// Cores per socket.
    pub cores: u64,
    pub threads_per_core: u64,
    pub vcpus: u64,
}

impl CpuTopology {
    pub fn render(&self, fragment: &mut Fragment) {
        if !self.processors.is_empty() {
            let mut listing = Vec::with_capacity(self.processors.len() * 3);
            for (index, (vendor, model)) in self.processors.iter().enumerate() {
                listing.push(FactValue::from(index.to_string()));
                if let Some(vendor) = vendor {
                    listing.push(vendor.into());
                }
                listing.push(model.into());
            }
            fragment.insert("processor", listing);
        }
        if self.sockets > 0 {
            fragment.insert("processor_count", self.sockets);
            fragment.insert("processor_cores", self.cores);
            fragment.insert("processor_threads_per_core", self.threads_per_core);
            fragment.insert("processor_vcpus", self.vcpus);
        }
    }
}

#[derive(Default)]
struct SocketInfo {
    cores: u64,
    siblings: u64,
}

/// Groups logical processors by `physical id`. Without socket ids every
/// logical processor counts as its own single-core, single-thread socket.
pub fn parse_cpuinfo(content: &str) -> CpuTopology {
    let mut topology = CpuTopology::default();
    let mut sockets: BTreeMap<String, SocketInfo> = BTreeMap::new();
    let mut logical = 0u64;
    let mut vendor: Option<String> = None;
    let mut current_socket: Option<String> = None;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match key {
            "processor" if value.parse::<u64>().is_ok() => {
                logical += 1;
                current_socket = None;
            }
            "vendor_id" | "vendor" => vendor = Some(value.to_string()),
            // Older ARM kernels name the model on a single `Processor` line.
            "model name" | "Processor" | "cpu" | "cpu model" => {
                topology
                    .processors
                    .push((vendor.clone(), value.to_string()));
            }
            "physical id" => {
                sockets.entry(value.to_string()).or_default();
                current_socket = Some(value.to_string());
            }
            "cpu cores" | "siblings" => {
                let (Some(socket), Ok(n)) = (&current_socket, value.parse::<u64>()) else {
                    continue;
                };
                if let Some(info) = sockets.get_mut(socket) {
                    if key == "cpu cores" {
                        info.cores = info.cores.max(n);
                    } else {
                        info.siblings = info.siblings.max(n);
                    }
                }
            }
            _ => {}
        }
    }

    if logical == 0 {
        logical = topology.processors.len() as u64;
    }
    if logical == 0 {
        return topology;
    }

    if sockets.is_empty() {
        topology.sockets = logical;
        topology.cores = 1;
        topology.threads_per_core = 1;
        topology.vcpus = logical;
        return topology;
    }

    let cores = sockets.values().map(|s| s.cores).max().unwrap_or(0).max(1);
    let siblings = sockets.values().map(|s| s.siblings).max().unwrap_or(0);
    topology.sockets = sockets.len() as u64;
    topology.cores = cores;
    topology.threads_per_core = (siblings / cores).max(1);
    topology.vcpus = topology.sockets * topology.cores * topology.threads_per_core;
    topology
}

/// `/proc/meminfo` values in KB.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemInfo {
    fields: BTreeMap<String, u64>,
}

impl MemInfo {
    pub fn get(&self, key: &str) -> Option<u64> {
        self.fields.get(key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

pub fn parse_meminfo(content: &str) -> MemInfo {
    let fields = content
        .lines()
        .filter_map(|line| line.split_once(':'))
        .filter_map(|(key, value)| {
            let kb = value.split_whitespace().next()?.parse::<u64>().ok()?;
            Some((key.trim().to_string(), kb))
        })
        .collect();
    MemInfo { fields }
}

/// Memory facts from a `/proc/meminfo`-shaped summary.
pub fn render_meminfo(fragment: &mut Fragment, mem: &MemInfo) {
    let mb = |key: &str| mem.get(key).map(kb_to_mb);

    fragment.insert_opt("memtotal_mb", mb("MemTotal"));
    fragment.insert_opt("memfree_mb", mb("MemFree"));
    fragment.insert_opt("swaptotal_mb", mb("SwapTotal"));
    fragment.insert_opt("swapfree_mb", mb("SwapFree"));

    let mut memory = FactMap::new();
    if let (Some(total), Some(free)) = (mb("MemTotal"), mb("MemFree")) {
        memory.insert("real".to_string(), usage(total, free).into());

        let cached = mb("Buffers").unwrap_or(0) + mb("Cached").unwrap_or(0);
        let nocache_free = free + cached;
        let mut nocache = FactMap::new();
        nocache.insert("free".to_string(), nocache_free.into());
        nocache.insert("used".to_string(), total.saturating_sub(nocache_free).into());
        memory.insert("nocache".to_string(), nocache.into());
    }
    if let (Some(total), Some(free)) = (mb("SwapTotal"), mb("SwapFree")) {
        let mut swap = usage(total, free);
        if let Some(cached) = mb("SwapCached") {
            swap.insert("cached".to_string(), cached.into());
        }
        memory.insert("swap".to_string(), swap.into());
    }
    if !memory.is_empty() {
        fragment.insert("memory_mb", memory);
    }
}

/// `{total, used, free}` map in MB.
pub(crate) fn usage(total: u64, free: u64) -> FactMap {
    let mut map = FactMap::new();
    map.insert("total".to_string(), total.into());
    map.insert("free".to_string(), free.into());
    map.insert("used".to_string(), total.saturating_sub(free).into());
    map
}

/// One DMI identifier: fact key, `/sys/devices/virtual/dmi/id` file and
/// `dmidecode -s` keyword.
pub(crate) struct DmiField {
    pub key: &'static str,
    pub sysfs: &'static str,
    pub keyword: &'static str,
}

const fn dmi(key: &'static str, sysfs: &'static str, keyword: &'static str) -> DmiField {
    DmiField {
        key,
        sysfs,
        keyword,
    }
}

pub(crate) const DMI_FIELDS: &[DmiField] = &[
    dmi("bios_date", "bios_date", "bios-release-date"),
    dmi("bios_vendor", "bios_vendor", "bios-vendor"),
    dmi("bios_version", "bios_version", "bios-version"),
    dmi("board_asset_tag", "board_asset_tag", "baseboard-asset-tag"),
    dmi("board_name", "board_name", "baseboard-product-name"),
    dmi("board_serial", "board_serial", "baseboard-serial-number"),
    dmi("board_vendor", "board_vendor", "baseboard-manufacturer"),
    dmi("board_version", "board_version", "baseboard-version"),
    dmi("chassis_asset_tag", "chassis_asset_tag", "chassis-asset-tag"),
    dmi("chassis_serial", "chassis_serial", "chassis-serial-number"),
    dmi("chassis_vendor", "chassis_vendor", "chassis-manufacturer"),
    dmi("chassis_version", "chassis_version", "chassis-version"),
    dmi("form_factor", "chassis_type", "chassis-type"),
    dmi("product_name", "product_name", "system-product-name"),
    dmi("product_serial", "product_serial", "system-serial-number"),
    dmi("product_uuid", "product_uuid", "system-uuid"),
    dmi("product_version", "product_version", "system-version"),
    dmi("system_vendor", "sys_vendor", "system-manufacturer"),
];

/// SMBIOS chassis type codes, as exposed numerically by sysfs.
const FORM_FACTORS: &[&str] = &[
    "Unknown",
    "Other",
    "Unknown",
    "Desktop",
    "Low Profile Desktop",
    "Pizza Box",
    "Mini Tower",
    "Tower",
    "Portable",
    "Laptop",
    "Notebook",
    "Hand Held",
    "Docking Station",
    "All In One",
    "Sub Notebook",
    "Space-saving",
    "Lunch Box",
    "Main Server Chassis",
    "Expansion Chassis",
    "Sub Chassis",
    "Bus Expansion Chassis",
    "Peripheral Chassis",
    "RAID Chassis",
    "Rack Mount Chassis",
    "Sealed-case PC",
    "Multi-system",
    "CompactPCI",
    "AdvancedTCA",
    "Blade",
    "Blade Enclosure",
    "Tablet",
    "Convertible",
    "Detachable",
    "IoT Gateway",
    "Embedded PC",
    "Mini PC",
    "Stick PC",
];

pub(crate) fn form_factor(chassis_type: &str) -> String {
    chassis_type
        .parse::<usize>()
        .ok()
        .and_then(|code| FORM_FACTORS.get(code))
        .map(|name| name.to_string())
        .unwrap_or_else(|| chassis_type.to_string())
}

/// Fills missing DMI keys with `dmidecode -s <keyword>`. Stops at the first
/// sign that `dmidecode` is absent.
pub(crate) async fn dmidecode(ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
    for field in DMI_FIELDS {
        if fragment.facts.contains_key(field.key) {
            continue;
        }
        let output = ctx.run("dmidecode", &["-s", field.keyword]).await?;
        if output.missing {
            fragment.fail(super::SoftFailure::tool("dmidecode"));
            return Ok(());
        }
        let value = output
            .stdout_if_ok()
            .and_then(|out| out.lines().find(|l| !l.starts_with('#')))
            .map(str::trim)
            .filter(|v| !v.is_empty());
        fragment.insert_opt(field.key, value);
    }
    Ok(())
}

static BOOTTIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"sec\s*=\s*(\d+)").expect("valid regex"));

/// Boot time as epoch seconds from `kern.boottime`, which is either
/// `{ sec = N, usec = M } ...` or a bare number.
pub fn parse_boottime(value: &str) -> Option<u64> {
    match BOOTTIME_RE.captures(value) {
        Some(c) => c[1].parse().ok(),
        None => value.trim().parse().ok(),
    }
}

pub(crate) fn uptime_since(boot_epoch: u64) -> Option<u64> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
    now.checked_sub(boot_epoch)
}

/// Number of distinct values, for socket and core counting.
pub(crate) fn distinct<'a>(values: impl IntoIterator<Item = &'a str>) -> u64 {
    values.into_iter().collect::<BTreeSet<_>>().len() as u64
}
