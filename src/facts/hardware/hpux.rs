//! HP-UX hardware facts

use super::CpuTopology;
use crate::facts::probe::{FactProbe, Fragment, ProbeContext};
use crate::facts::util::leading_u64;
use crate::facts::{FactCategory, FactError, SoftFailure};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

static CPUS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:Number of CPUs\s*=\s*(\d+))|(?:(\d+) logical processors)").expect("valid regex")
});
static SOCKETS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) sockets?\b").expect("valid regex"));
static PER_SOCKET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((\d+) per socket\)").expect("valid regex"));
static CORES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((\d+) cores?,").expect("valid regex"));
static MEMORY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Memory\s*[:=]\s*(\d+) MB").expect("valid regex"));
static MODEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(Intel\(R\) Itanium(?:\(R\))?[^(]*)").expect("valid regex"));

pub struct HpUxHardware;

#[async_trait]
impl FactProbe for HpUxHardware {
    fn category(&self) -> FactCategory {
        FactCategory::Hardware
    }

    fn name(&self) -> &'static str {
        "hpux_hardware"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        if let Some(machinfo) = ctx.stdout(fragment, "machinfo", &[]).await? {
            let info = parse_machinfo(&machinfo);
            info.topology.render(fragment);
            fragment.insert_opt("memtotal_mb", info.memory_mb);
            fragment.insert_opt("firmware_version", info.firmware);
            if info.topology.vcpus == 0 {
                fragment.fail(SoftFailure::parse("machinfo", "no processor count"));
            }
        }

        let swap = ctx
            .stdout(fragment, "swapinfo", &["-m", "-d", "-f", "-q"])
            .await?;
        if let Some(total) = swap.as_deref().and_then(leading_u64) {
            fragment.insert("swaptotal_mb", total);
        }

        if let Some(model) = ctx.stdout(fragment, "model", &[]).await? {
            fragment.insert("model", model);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MachInfo {
    topology: CpuTopology,
    memory_mb: Option<u64>,
    firmware: Option<String>,
}

fn parse_machinfo(output: &str) -> MachInfo {
    let number = |re: &Regex| {
        re.captures(output).and_then(|c| {
            c.iter()
                .skip(1)
                .flatten()
                .next()
                .and_then(|m| m.as_str().parse::<u64>().ok())
        })
    };

    let mut info = MachInfo {
        memory_mb: number(&MEMORY_RE),
        firmware: output
            .lines()
            .find_map(|l| l.trim().strip_prefix("Firmware revision"))
            .map(|rest| rest.trim_start_matches([' ', ':', '=']).trim().to_string()),
        ..MachInfo::default()
    };

    let Some(logical) = number(&CPUS_RE) else {
        return info;
    };
    let sockets = number(&SOCKETS_RE)
        .or_else(|| number(&PER_SOCKET_RE).map(|per| logical / per.max(1)))
        .unwrap_or(logical)
        .max(1);
    let cores = number(&CORES_RE).unwrap_or(logical / sockets).max(1);
    let model = output
        .lines()
        .find_map(|l| MODEL_RE.captures(l.trim()).map(|c| c[1].trim().to_string()));

    info.topology = CpuTopology {
        processors: model
            .map(|m| vec![(None, m); logical as usize])
            .unwrap_or_default(),
        sockets,
        cores,
        threads_per_core: (logical / (sockets * cores)).max(1),
        vcpus: logical,
    };
    info
}
