//! AIX hardware facts

use super::bsd::render_swap;
use super::CpuTopology;
use crate::facts::probe::{FactProbe, Fragment, ProbeContext};
use crate::facts::util::{key_values, pages_to_mb};
use crate::facts::{FactCategory, FactError, SoftFailure};
use async_trait::async_trait;

/// AIX memory pages reported by `vmstat -v` are 4 KB.
const AIX_PAGE_SIZE: u64 = 4096;

pub struct AixHardware;

#[async_trait]
impl FactProbe for AixHardware {
    fn category(&self) -> FactCategory {
        FactCategory::Hardware
    }

    fn name(&self) -> &'static str {
        "aix_hardware"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        self.cpu_facts(ctx, fragment).await?;

        if let Some(vmstat) = ctx.stdout(fragment, "vmstat", &["-v"]).await? {
            let (total, free) = parse_vmstat_pages(&vmstat);
            fragment.insert_opt("memtotal_mb", total.map(|p| pages_to_mb(p, AIX_PAGE_SIZE)));
            fragment.insert_opt("memfree_mb", free.map(|p| pages_to_mb(p, AIX_PAGE_SIZE)));
        }

        if let Some(lsps) = ctx.stdout(fragment, "lsps", &["-s"]).await? {
            match parse_lsps(&lsps) {
                Some((total, free)) => render_swap(fragment, total, free),
                None => fragment.fail(SoftFailure::parse("lsps -s", lsps)),
            }
        }

        let fw = ctx
            .stdout(fragment, "lsattr", &["-El", "sys0", "-a", "fwversion"])
            .await?;
        if let Some(fw) = fw.as_deref().and_then(|l| l.split_whitespace().nth(1)) {
            fragment.insert("firmware_version", fw.trim_start_matches("IBM,"));
        }

        if let Some(lsconf) = ctx.stdout(fragment, "lsconf", &[]).await? {
            let conf = key_values(&lsconf, ':');
            fragment.insert_opt("model", conf.get("System Model"));
            fragment.insert_opt("product_serial", conf.get("Machine Serial Number"));
            fragment.insert_opt("lpar_info", conf.get("LPAR Info"));
        }
        Ok(())
    }
}

impl AixHardware {
    async fn cpu_facts(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        let Some(lsdev) = ctx
            .stdout(fragment, "lsdev", &["-Cc", "processor"])
            .await?
        else {
            return Ok(());
        };
        let procs: Vec<&str> = lsdev
            .lines()
            .filter(|l| l.split_whitespace().nth(1) == Some("Available"))
            .filter_map(|l| l.split_whitespace().next())
            .collect();
        let Some(&first) = procs.first() else {
            return Ok(());
        };

        let attr = |name: &'static str| ["-El", first, "-a", name];
        let model = ctx
            .stdout(fragment, "lsattr", &attr("type"))
            .await?
            .and_then(|l| l.split_whitespace().nth(1).map(str::to_string));
        let threads = ctx
            .stdout(fragment, "lsattr", &attr("smt_threads"))
            .await?
            .and_then(|l| l.split_whitespace().nth(1).and_then(|n| n.parse::<u64>().ok()))
            .unwrap_or(1);

        let sockets = procs.len() as u64;
        CpuTopology {
            processors: model
                .map(|m| vec![(None, m); procs.len()])
                .unwrap_or_default(),
            sockets,
            cores: 1,
            threads_per_core: threads,
            vcpus: sockets * threads,
        }
        .render(fragment);
        Ok(())
    }
}

/// `(memory pages, free pages)` from `vmstat -v`.
fn parse_vmstat_pages(output: &str) -> (Option<u64>, Option<u64>) {
    let count = |label: &str| {
        output.lines().find_map(|line| {
            let line = line.trim();
            let (n, rest) = line.split_once(char::is_whitespace)?;
            (rest.trim() == label).then(|| n.parse::<u64>().ok()).flatten()
        })
    };
    (count("memory pages"), count("free pages"))
}

/// `(total, free)` MB from `lsps -s`.
fn parse_lsps(output: &str) -> Option<(u64, u64)> {
    let row = output.lines().nth(1)?;
    let mut fields = row.split_whitespace();
    let total: u64 = fields.next()?.trim_end_matches("MB").parse().ok()?;
    let used_pct: u64 = fields.next()?.trim_end_matches('%').parse().ok()?;
    let free = total * 100u64.saturating_sub(used_pct) / 100;
    Some((total, free))
}
