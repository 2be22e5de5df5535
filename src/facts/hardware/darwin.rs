//! macOS hardware facts

use super::bsd::{boottime_uptime, render_swap};
use super::{usage, CpuTopology};
use crate::facts::probe::{FactProbe, Fragment, ProbeContext};
use crate::facts::util::{bytes_to_mb, pages_to_mb};
use crate::facts::{FactCategory, FactError, FactMap, SoftFailure};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

static PAGE_SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"page size of (\d+) bytes").expect("valid regex"));
static SWAPUSAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"total = ([\d.]+)M\s+used = ([\d.]+)M\s+free = ([\d.]+)M").expect("valid regex")
});

pub struct DarwinHardware;

#[async_trait]
impl FactProbe for DarwinHardware {
    fn category(&self) -> FactCategory {
        FactCategory::Hardware
    }

    fn name(&self) -> &'static str {
        "darwin_hardware"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        let brand = ctx.sysctl(fragment, "machdep.cpu.brand_string").await?;
        let mut counts = [0u64; 3];
        for (slot, key) in ["hw.physicalcpu", "hw.logicalcpu", "hw.packages"].iter().enumerate() {
            counts[slot] = ctx
                .sysctl(fragment, key)
                .await?
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
        }
        if let Some(topology) = topology(brand, counts[0], counts[1], counts[2]) {
            topology.render(fragment);
        }

        let total = ctx
            .sysctl(fragment, "hw.memsize")
            .await?
            .and_then(|b| b.parse::<u64>().ok())
            .map(bytes_to_mb);
        fragment.insert_opt("memtotal_mb", total);
        if let Some(vm_stat) = ctx.stdout(fragment, "vm_stat", &[]).await? {
            match parse_vm_stat_free_mb(&vm_stat) {
                Some(free) => {
                    fragment.insert("memfree_mb", free);
                    if let Some(total) = total {
                        let mut memory = FactMap::new();
                        memory.insert("real".to_string(), usage(total, free).into());
                        fragment.insert("memory_mb", memory);
                    }
                }
                None => fragment.fail(SoftFailure::parse("vm_stat", "no free page count")),
            }
        }
        if let Some(swap) = ctx.sysctl(fragment, "vm.swapusage").await? {
            match parse_swapusage(&swap) {
                Some((total, free)) => render_swap(fragment, total, free),
                None => fragment.fail(SoftFailure::parse("vm.swapusage", swap)),
            }
        }

        if let Some(model) = ctx.sysctl(fragment, "hw.model").await? {
            fragment.insert("product_name", &model);
            fragment.insert("model", model);
        }

        boottime_uptime(ctx, fragment).await
    }
}

fn topology(brand: Option<String>, physical: u64, logical: u64, packages: u64) -> Option<CpuTopology> {
    if logical == 0 {
        return None;
    }
    let sockets = packages.max(1);
    let physical = physical.max(1);
    Some(CpuTopology {
        processors: brand
            .map(|b| vec![(None, b); logical as usize])
            .unwrap_or_default(),
        sockets,
        cores: (physical / sockets).max(1),
        threads_per_core: (logical / physical).max(1),
        vcpus: logical,
    })
}

fn parse_vm_stat_free_mb(output: &str) -> Option<u64> {
    let page_size = PAGE_SIZE_RE
        .captures(output)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(4096);
    let free = output
        .lines()
        .find_map(|line| line.strip_prefix("Pages free:"))?
        .trim()
        .trim_end_matches('.')
        .parse::<u64>()
        .ok()?;
    Some(pages_to_mb(free, page_size))
}

/// `total = 2048.00M  used = 1056.25M  free = 991.75M  (encrypted)`
fn parse_swapusage(value: &str) -> Option<(u64, u64)> {
    let c = SWAPUSAGE_RE.captures(value)?;
    let total: f64 = c[1].parse().ok()?;
    let free: f64 = c[3].parse().ok()?;
    Some((total.floor() as u64, free.floor() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_stat_uses_reported_page_size() {
        let output = "Mach Virtual Memory Statistics: (page size of 16384 bytes)\n\
                      Pages free:                               65536.\n\
                      Pages active:                            400000.\n";
        assert_eq!(parse_vm_stat_free_mb(output), Some(1024));
    }

    #[test]
    fn test_swapusage() {
        assert_eq!(
            parse_swapusage("total = 2048.00M  used = 1056.25M  free = 991.75M  (encrypted)"),
            Some((2048, 991))
        );
    }

    #[test]
    fn test_apple_silicon_topology() {
        let topology = topology(Some("Apple M1".to_string()), 8, 8, 1).unwrap();
        assert_eq!(topology.cores, 8);
        assert_eq!(topology.threads_per_core, 1);
        assert_eq!(topology.processors.len(), 8);
    }
}
