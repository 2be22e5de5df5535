//! BSD hardware facts

use super::{
    dmidecode, parse_boottime, parse_cpuinfo, parse_meminfo, render_meminfo, uptime_since, usage,
    CpuTopology,
};
use crate::facts::probe::{FactProbe, Fragment, ProbeContext};
use crate::facts::util::{bytes_to_mb, kb_to_mb, key_values, leading_u64, pages_to_mb};
use crate::facts::{FactCategory, FactError, FactMap, SoftFailure};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

static SMP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"FreeBSD/SMP: (\d+) package\(s\) x (\d+) core\(s\)(?: x (\d+) hardware threads)?")
        .expect("valid regex")
});
static SWAPCTL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"total:\s*(\d+)k bytes allocated = (\d+)k used, (\d+)k available")
        .expect("valid regex")
});

/// FreeBSD and DragonFly.
pub struct FreeBsdHardware;

#[async_trait]
impl FactProbe for FreeBsdHardware {
    fn category(&self) -> FactCategory {
        FactCategory::Hardware
    }

    fn name(&self) -> &'static str {
        "freebsd_hardware"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        let ncpu = ctx
            .sysctl(fragment, "hw.ncpu")
            .await?
            .and_then(|n| n.parse::<u64>().ok());
        let dmesg = ctx.read("/var/run/dmesg.boot").await?.unwrap_or_default();
        parse_dmesg_cpu(&dmesg, ncpu).render(fragment);

        if let Some(stats) = ctx.stdout(fragment, "sysctl", &["vm.stats"]).await? {
            render_vm_stats(fragment, &stats);
        }
        if let Some(swapinfo) = ctx.stdout(fragment, "swapinfo", &["-k"]).await? {
            match parse_swapinfo(&swapinfo) {
                Some((total, free)) => render_swap(fragment, total, free),
                None => fragment.fail(SoftFailure::parse("swapinfo", "no device rows")),
            }
        }

        dmidecode(ctx, fragment).await?;
        boottime_uptime(ctx, fragment).await
    }
}

pub struct OpenBsdHardware;

#[async_trait]
impl FactProbe for OpenBsdHardware {
    fn category(&self) -> FactCategory {
        FactCategory::Hardware
    }

    fn name(&self) -> &'static str {
        "openbsd_hardware"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        let model = ctx.sysctl(fragment, "hw.model").await?;
        let ncpu = ctx
            .sysctl(fragment, "hw.ncpuonline")
            .await?
            .and_then(|n| n.parse::<u64>().ok());
        if let Some(ncpu) = ncpu {
            CpuTopology {
                processors: model
                    .map(|m| vec![(None, m); ncpu as usize])
                    .unwrap_or_default(),
                sockets: ncpu,
                cores: 1,
                threads_per_core: 1,
                vcpus: ncpu,
            }
            .render(fragment);
        }

        if let Some(physmem) = ctx
            .sysctl(fragment, "hw.physmem")
            .await?
            .and_then(|b| b.parse::<u64>().ok())
        {
            fragment.insert("memtotal_mb", bytes_to_mb(physmem));
        }
        if let Some(vmstat) = ctx.stdout(fragment, "vmstat", &[]).await? {
            match parse_vmstat_free_kb(&vmstat) {
                Some(kb) => fragment.insert("memfree_mb", kb_to_mb(kb)),
                None => fragment.fail(SoftFailure::parse("vmstat", "no fre column")),
            }
        }
        if let Some(swapctl) = ctx.stdout(fragment, "swapctl", &["-sk"]).await? {
            match parse_swapctl(&swapctl) {
                Some((total, free)) => render_swap(fragment, total, free),
                None => fragment.fail(SoftFailure::parse("swapctl", swapctl)),
            }
        }

        for (key, sysctl) in [
            ("system_vendor", "hw.vendor"),
            ("product_name", "hw.product"),
            ("product_version", "hw.version"),
            ("product_serial", "hw.serialno"),
            ("product_uuid", "hw.uuid"),
        ] {
            let value = ctx.sysctl(fragment, sysctl).await?;
            fragment.insert_opt(key, value);
        }

        boottime_uptime(ctx, fragment).await
    }
}

/// NetBSD mounts a Linux-compatible procfs.
pub struct NetBsdHardware;

#[async_trait]
impl FactProbe for NetBsdHardware {
    fn category(&self) -> FactCategory {
        FactCategory::Hardware
    }

    fn name(&self) -> &'static str {
        "netbsd_hardware"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        if let Some(cpuinfo) = ctx.read("/proc/cpuinfo").await? {
            parse_cpuinfo(&cpuinfo).render(fragment);
        }
        if let Some(meminfo) = ctx.read("/proc/meminfo").await? {
            render_meminfo(fragment, &parse_meminfo(&meminfo));
        }

        for (key, sysctl) in [
            ("system_vendor", "machdep.dmi.system-vendor"),
            ("product_name", "machdep.dmi.system-product"),
            ("product_version", "machdep.dmi.system-version"),
            ("product_serial", "machdep.dmi.system-serial"),
            ("product_uuid", "machdep.dmi.system-uuid"),
            ("bios_vendor", "machdep.dmi.bios-vendor"),
            ("bios_version", "machdep.dmi.bios-version"),
            ("bios_date", "machdep.dmi.bios-date"),
        ] {
            let value = ctx.sysctl(fragment, sysctl).await?;
            fragment.insert_opt(key, value);
        }

        boottime_uptime(ctx, fragment).await
    }
}

pub(crate) async fn boottime_uptime(
    ctx: &ProbeContext,
    fragment: &mut Fragment,
) -> Result<(), FactError> {
    if let Some(boottime) = ctx.sysctl(fragment, "kern.boottime").await? {
        match parse_boottime(&boottime) {
            Some(boot) => fragment.insert_opt("uptime_seconds", uptime_since(boot)),
            None => fragment.fail(SoftFailure::parse("kern.boottime", boottime)),
        }
    }
    Ok(())
}

pub(crate) fn render_swap(fragment: &mut Fragment, total_mb: u64, free_mb: u64) {
    fragment.insert("swaptotal_mb", total_mb);
    fragment.insert("swapfree_mb", free_mb);
    let mut memory = fragment
        .facts
        .remove("memory_mb")
        .and_then(|m| m.as_map().cloned())
        .unwrap_or_default();
    memory.insert("swap".to_string(), usage(total_mb, free_mb).into());
    fragment.insert("memory_mb", memory);
}

/// CPU model lines and topology from `dmesg.boot`.
fn parse_dmesg_cpu(dmesg: &str, ncpu: Option<u64>) -> CpuTopology {
    let mut model = None;
    let mut sockets = None;
    let mut cores = None;
    let mut threads = None;

    for line in dmesg.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("CPU:") {
            let rest = rest.trim();
            // "CPU: Intel(R) Xeon(R) ... (2394.46-MHz K8-class CPU)"
            let name = rest.rsplit_once(" (").map(|(name, _)| name).unwrap_or(rest);
            model.get_or_insert_with(|| name.trim().to_string());
        } else if let Some(c) = SMP_RE.captures(line) {
            sockets = c[1].parse().ok();
            cores = c[2].parse().ok();
            threads = c.get(3).and_then(|t| t.as_str().parse().ok());
        } else if let Some(n) = line.strip_prefix("Logical CPUs per core:") {
            threads = n.trim().parse().ok();
        } else if let Some(n) = line.strip_prefix("Cores per package:") {
            cores = n.trim().parse().ok();
        }
    }

    let Some(ncpu) = ncpu else {
        return CpuTopology::default();
    };
    let threads_per_core: u64 = threads.unwrap_or(1).max(1);
    let reported = sockets.is_some() && cores.is_some();
    let cores: u64 = cores.unwrap_or(ncpu / threads_per_core).max(1);
    let sockets: u64 = sockets.unwrap_or_else(|| (ncpu / (cores * threads_per_core)).max(1));
    // Derived from the topology like other platforms; hw.ncpu only when the
    // kernel printed none.
    let vcpus = if reported {
        sockets * cores * threads_per_core
    } else {
        ncpu
    };

    CpuTopology {
        processors: model
            .map(|m| vec![(None, m); vcpus as usize])
            .unwrap_or_default(),
        sockets,
        cores,
        threads_per_core,
        vcpus,
    }
}

fn render_vm_stats(fragment: &mut Fragment, stats: &str) {
    let kv = key_values(stats, ':');
    let get = |key: &str| kv.get(key).and_then(|v| v.parse::<u64>().ok());
    let (Some(page_size), Some(count), Some(free)) = (
        get("vm.stats.vm.v_page_size"),
        get("vm.stats.vm.v_page_count"),
        get("vm.stats.vm.v_free_count"),
    ) else {
        fragment.fail(SoftFailure::parse("sysctl vm.stats", "missing page counters"));
        return;
    };
    let total = pages_to_mb(count, page_size);
    let free = pages_to_mb(free, page_size);
    fragment.insert("memtotal_mb", total);
    fragment.insert("memfree_mb", free);
    let mut memory = FactMap::new();
    memory.insert("real".to_string(), usage(total, free).into());
    fragment.insert("memory_mb", memory);
}

/// Sums device rows of `swapinfo -k` into `(total, free)` MB.
fn parse_swapinfo(output: &str) -> Option<(u64, u64)> {
    let mut total_kb = 0;
    let mut free_kb = 0;
    let mut rows = 0;
    for line in output.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || fields[0] == "Total" {
            continue;
        }
        total_kb += fields[1].parse::<u64>().ok()?;
        free_kb += fields[3].parse::<u64>().ok()?;
        rows += 1;
    }
    (rows > 0).then(|| (kb_to_mb(total_kb), kb_to_mb(free_kb)))
}

/// `swapctl -sk` into `(total, free)` MB.
fn parse_swapctl(output: &str) -> Option<(u64, u64)> {
    let c = SWAPCTL_RE.captures(output)?;
    let total: u64 = c[1].parse().ok()?;
    let free: u64 = c[3].parse().ok()?;
    Some((kb_to_mb(total), kb_to_mb(free)))
}

/// Free memory in KB from the `fre` column of `vmstat`.
fn parse_vmstat_free_kb(output: &str) -> Option<u64> {
    let mut lines = output.lines();
    let header = lines.find(|l| l.split_whitespace().any(|w| w == "fre"))?;
    let column = header.split_whitespace().position(|w| w == "fre")?;
    let values = lines.next()?;
    let field = values.split_whitespace().nth(column)?;
    // OpenBSD may print `1024M` or `512K` once values grow.
    let n = leading_u64(field)?;
    Some(match field.chars().last() {
        Some('M') => n * 1024,
        Some('G') => n * 1024 * 1024,
        _ => n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freebsd_dmesg_topology() {
        let dmesg = "\
CPU: Intel(R) Xeon(R) CPU E5-2650 v2 @ 2.60GHz (2600.06-MHz K8-class CPU)
  Origin=\"GenuineIntel\"  Id=0x306e4  Family=0x6  Model=0x3e  Stepping=4
FreeBSD/SMP: Multiprocessor System Detected: 8 CPUs
FreeBSD/SMP: 1 package(s) x 4 core(s) x 2 hardware threads
";
        let topology = parse_dmesg_cpu(dmesg, Some(8));
        assert_eq!(topology.sockets, 1);
        assert_eq!(topology.cores, 4);
        assert_eq!(topology.threads_per_core, 2);
        assert_eq!(topology.processors.len(), 8);
        assert_eq!(
            topology.processors[0].1,
            "Intel(R) Xeon(R) CPU E5-2650 v2 @ 2.60GHz"
        );
    }

    #[test]
    fn test_vcpus_follow_reported_topology() {
        let dmesg = "FreeBSD/SMP: 2 package(s) x 4 core(s) x 2 hardware threads\n";
        let topology = parse_dmesg_cpu(dmesg, Some(12));
        assert_eq!(topology.vcpus, 16);

        let topology = parse_dmesg_cpu("CPU: ARM Cortex-A72 r0p3\n", Some(4));
        assert_eq!(topology.sockets, 1);
        assert_eq!(topology.cores, 4);
        assert_eq!(topology.vcpus, 4);
        assert_eq!(topology.processors.len(), 4);
    }

    #[test]
    fn test_vm_stats_pages_to_mb() {
        let mut fragment = Fragment::new();
        render_vm_stats(
            &mut fragment,
            "vm.stats.vm.v_page_size: 4096\nvm.stats.vm.v_page_count: 2035712\n\
             vm.stats.vm.v_free_count: 1048575\n",
        );
        assert_eq!(fragment.facts.get_i64("memtotal_mb"), Some(7952));
        assert_eq!(fragment.facts.get_i64("memfree_mb"), Some(4095));
    }

    #[test]
    fn test_swap_parsers() {
        let swapinfo = "Device          1K-blocks     Used    Avail Capacity\n\
                        /dev/ada0p3       2097152        0  2097152     0%\n";
        assert_eq!(parse_swapinfo(swapinfo), Some((2048, 2048)));
        assert_eq!(
            parse_swapctl("total: 69268k bytes allocated = 0k used, 69268k available"),
            Some((67, 67))
        );
    }

    #[test]
    fn test_vmstat_fre_column() {
        let vmstat = " procs    memory       page                    disks    traps          cpu\n \
                      r   s   avm     fre  flt  re  pi  po  fr  sr sd0 sd1  int   sys   cs us sy id\n \
                      1 101   442M  3261M   26   0   0   0   0   0   1   0   43    93   33  0  0 100\n";
        assert_eq!(parse_vmstat_free_kb(vmstat), Some(3261 * 1024));
    }

    #[test]
    fn test_render_swap_keeps_real_memory() {
        let mut fragment = Fragment::new();
        render_vm_stats(
            &mut fragment,
            "vm.stats.vm.v_page_size: 4096\nvm.stats.vm.v_page_count: 256\nvm.stats.vm.v_free_count: 0\n",
        );
        render_swap(&mut fragment, 1024, 512);
        assert!(fragment.facts.get_path("memory_mb.real.total").is_some());
        assert_eq!(
            fragment.facts.get_path("memory_mb.swap.used").and_then(|v| v.as_i64()),
            Some(512)
        );
    }
}
