//! Solaris and illumos hardware facts

use super::bsd::render_swap;
use super::{distinct, CpuTopology};
use crate::facts::probe::{FactProbe, Fragment, ProbeContext};
use crate::facts::util::kb_to_mb;
use crate::facts::{FactCategory, FactError, SoftFailure};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static SWAP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"= (\d+)k used, (\d+)k available").expect("valid regex"));

const PRTDIAG_VENDORS: &[&str] = &[
    "Fujitsu",
    "Oracle Corporation",
    "QEMU",
    "Sun Microsystems",
    "VMware, Inc.",
];

pub struct SunOsHardware;

#[async_trait]
impl FactProbe for SunOsHardware {
    fn category(&self) -> FactCategory {
        FactCategory::Hardware
    }

    fn name(&self) -> &'static str {
        "sunos_hardware"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        let args = ["-p", "cpu_info:::brand", "cpu_info:::chip_id", "cpu_info:::core_id"];
        if let Some(kstat) = ctx.stdout(fragment, "kstat", &args).await? {
            parse_kstat_cpu(&kstat).render(fragment);
        }

        if let Some(prtconf) = ctx.stdout(fragment, "prtconf", &[]).await? {
            let memory = prtconf
                .lines()
                .find_map(|l| l.strip_prefix("Memory size:"))
                .and_then(|rest| rest.split_whitespace().next())
                .and_then(|n| n.parse::<u64>().ok());
            match memory {
                Some(mb) => fragment.insert("memtotal_mb", mb),
                None => fragment.fail(SoftFailure::parse("prtconf", "no Memory size line")),
            }
        }

        if let Some(swap) = ctx.stdout(fragment, "swap", &["-s"]).await? {
            match SWAP_RE.captures(&swap) {
                Some(c) => {
                    let used: u64 = c[1].parse().unwrap_or(0);
                    let available: u64 = c[2].parse().unwrap_or(0);
                    render_swap(fragment, kb_to_mb(used + available), kb_to_mb(available));
                }
                None => fragment.fail(SoftFailure::parse("swap -s", swap)),
            }
        }

        if let Some(prtdiag) = ctx.stdout(fragment, "prtdiag", &[]).await? {
            if let Some((vendor, product)) = parse_prtdiag(&prtdiag) {
                fragment.insert_opt("system_vendor", vendor);
                fragment.insert("product_name", product);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct Instance {
    brand: Option<String>,
    chip: Option<String>,
    core: Option<String>,
}

/// `kstat -p` lines look like `cpu_info:0:cpu_info0:chip_id\t0`.
fn parse_kstat_cpu(output: &str) -> CpuTopology {
    let mut instances: BTreeMap<u64, Instance> = BTreeMap::new();
    for line in output.lines() {
        let Some((name, value)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let parts: Vec<&str> = name.split(':').collect();
        let (Some(instance), Some(stat)) = (parts.get(1), parts.get(3)) else {
            continue;
        };
        let Ok(instance) = instance.parse::<u64>() else {
            continue;
        };
        let entry = instances.entry(instance).or_default();
        let value = Some(value.trim().to_string());
        match *stat {
            "brand" => entry.brand = value,
            "chip_id" => entry.chip = value,
            "core_id" => entry.core = value,
            _ => {}
        }
    }

    let logical = instances.len() as u64;
    if logical == 0 {
        return CpuTopology::default();
    }

    let chips = distinct(instances.values().filter_map(|i| i.chip.as_deref())).max(1);
    let mut cores_per_chip: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for instance in instances.values() {
        if let (Some(chip), Some(core)) = (&instance.chip, &instance.core) {
            cores_per_chip.entry(chip).or_default().push(core);
        }
    }
    let cores = cores_per_chip
        .into_values()
        .map(distinct)
        .max()
        .unwrap_or(1)
        .max(1);

    CpuTopology {
        processors: instances
            .values()
            .filter_map(|i| i.brand.clone())
            .map(|b| (None, b))
            .collect(),
        sockets: chips,
        cores,
        threads_per_core: (logical / (chips * cores)).max(1),
        vcpus: logical,
    }
}

/// Splits the `System Configuration:` line into vendor and product.
fn parse_prtdiag(output: &str) -> Option<(Option<String>, String)> {
    let line = output
        .lines()
        .find_map(|l| l.strip_prefix("System Configuration:"))?
        .trim();
    for vendor in PRTDIAG_VENDORS {
        if let Some(product) = line.strip_prefix(vendor) {
            return Some((Some(vendor.to_string()), product.trim().to_string()));
        }
    }
    Some((None, line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kstat_topology() {
        let mut output = String::new();
        for (cpu, chip, core) in [(0, 0, 0), (1, 0, 0), (2, 0, 1), (3, 0, 1)] {
            output.push_str(&format!(
                "cpu_info:{cpu}:cpu_info{cpu}:brand\tIntel(r) Xeon(r) CPU E5-2690\n\
                 cpu_info:{cpu}:cpu_info{cpu}:chip_id\t{chip}\n\
                 cpu_info:{cpu}:cpu_info{cpu}:core_id\t{core}\n"
            ));
        }
        let topology = parse_kstat_cpu(&output);
        assert_eq!(topology.sockets, 1);
        assert_eq!(topology.cores, 2);
        assert_eq!(topology.threads_per_core, 2);
        assert_eq!(topology.vcpus, 4);
    }

    #[test]
    fn test_prtdiag_vendor_split() {
        let output = "System Configuration: VMware, Inc. VMware Virtual Platform\nBIOS Configuration: ...\n";
        assert_eq!(
            parse_prtdiag(output),
            Some((
                Some("VMware, Inc.".to_string()),
                "VMware Virtual Platform".to_string()
            ))
        );
    }
}
