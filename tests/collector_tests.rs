//! End-to-end collection against simulated hosts

use async_trait::async_trait;
use rustle_facts::facts::stub::{StubReader, StubRunner};
use rustle_facts::facts::{
    hardware, network, CommandOutput, CommandRunner, FactCategory, FactError, FactProbe, FactValue,
    Fragment, PlatformFamily, PlatformIdentity, ProbeContext, ProbeDeadline, ProbeState,
    SoftFailure, SystemFileReader,
};
use rustle_facts::{CollectorConfig, FactAggregator};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const CPUINFO: &str = "\
processor\t: 0
vendor_id\t: GenuineIntel
model name\t: Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz
physical id\t: 0
siblings\t: 2
cpu cores\t: 2

processor\t: 1
vendor_id\t: GenuineIntel
model name\t: Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz
physical id\t: 0
siblings\t: 2
cpu cores\t: 2
";

const IP_ADDR: &str = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN group default qlen 1000
    link/loopback 00:00:00:00:00:00 brd 00:00:00:00:00:00
    inet 127.0.0.1/8 scope host lo
2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc fq_codel state UP group default qlen 1000
    link/ether 52:54:00:12:34:56 brd ff:ff:ff:ff:ff:ff
    inet 10.0.0.5/24 brd 10.0.0.255 scope global eth0
    inet6 fe80::5054:ff:fe12:3456/64 scope link
";

fn linux_runner() -> StubRunner {
    StubRunner::new()
        .with("uname -s", "Linux")
        .with("uname -r", "5.15.0-91-generic")
        .with("uname -v", "#101-Ubuntu SMP")
        .with("uname -m", "x86_64")
        .with("uname -n", "web01")
        .with("getconf LONG_BIT", "64")
        .with("nproc", "2")
        .with("ip addr show", IP_ADDR)
        .with(
            "ip -4 route get 8.8.8.8",
            "8.8.8.8 via 10.0.0.1 dev eth0 src 10.0.0.5 uid 0 \n    cache \n",
        )
}

fn linux_reader() -> StubReader {
    StubReader::new()
        .with_file("/etc/os-release", "ID=ubuntu\nVERSION_ID=\"22.04\"\n")
        .with_file("/proc/cpuinfo", CPUINFO)
        .with_file(
            "/proc/meminfo",
            "MemTotal:        1048576 kB\nMemFree:          524288 kB\nSwapTotal:             0 kB\nSwapFree:              0 kB\n",
        )
        .with_file("/proc/uptime", "12345.67 23456.78\n")
}

fn config() -> CollectorConfig {
    CollectorConfig {
        fact_path: "/nonexistent/facts.d".into(),
        ..CollectorConfig::default()
    }
}

fn linux_identity() -> PlatformIdentity {
    PlatformIdentity {
        family: PlatformFamily::Linux,
        system: "Linux".to_string(),
        ..PlatformIdentity::unknown()
    }
}

/// Never finishes on its own.
struct Stuck(FactCategory);

#[async_trait]
impl FactProbe for Stuck {
    fn category(&self) -> FactCategory {
        self.0
    }

    fn name(&self) -> &'static str {
        "stuck"
    }

    async fn collect(&self, _ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        fragment.insert("written_before_hang", true);
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_linux_host_scenario() {
    let collection = FactAggregator::new(config())
        .with_runner(Arc::new(linux_runner()))
        .with_reader(Arc::new(linux_reader()))
        .collect()
        .await
        .unwrap();
    let facts = &collection.facts;

    assert_eq!(facts.get_str("system"), Some("Linux"));
    assert_eq!(facts.get_str("distribution"), Some("Ubuntu"));
    assert_eq!(facts.get_i64("processor_count"), Some(1));
    assert_eq!(facts.get_i64("processor_cores"), Some(2));
    assert_eq!(facts.get_i64("processor_threads_per_core"), Some(1));
    assert_eq!(facts.get_i64("processor_vcpus"), Some(2));
    assert_eq!(facts.get_i64("memtotal_mb"), Some(1024));
    assert_eq!(facts.get_i64("memfree_mb"), Some(512));
    assert_eq!(facts.get_i64("uptime_seconds"), Some(12345));

    assert_eq!(
        facts.get_path("default_ipv4.address").and_then(FactValue::as_str),
        Some("10.0.0.5")
    );
    assert_eq!(
        facts.get_path("default_ipv4.interface").and_then(FactValue::as_str),
        Some("eth0")
    );
    assert_eq!(
        facts.get_path("default_ipv4.gateway").and_then(FactValue::as_str),
        Some("10.0.0.1")
    );
    let interfaces = facts.get("interfaces").and_then(FactValue::as_list).unwrap();
    assert!(interfaces.contains(&FactValue::from("eth0")));
    // No IPv6 route in the fixture.
    assert!(facts.get("default_ipv6").is_some_and(FactValue::is_empty_map));

    assert_eq!(facts.get_str("virtualization_type"), Some("NA"));
    assert!(collection
        .states
        .values()
        .all(|state| *state == ProbeState::Completed));
}

#[tokio::test]
async fn test_collection_is_idempotent() {
    let aggregator = FactAggregator::new(config())
        .with_runner(Arc::new(linux_runner()))
        .with_reader(Arc::new(linux_reader()));

    let first = aggregator.collect().await.unwrap();
    let second = aggregator.collect().await.unwrap();
    assert_eq!(first.facts, second.facts);
    assert_eq!(first.diagnostics, second.diagnostics);
}

#[tokio::test]
async fn test_hung_command_only_costs_its_own_category() {
    let runner = linux_runner().with_hang("ip addr show");
    let config = CollectorConfig {
        gather_timeout: 1,
        ..config()
    };

    let started = Instant::now();
    let collection = FactAggregator::new(config)
        .with_runner(Arc::new(runner))
        .with_reader(Arc::new(linux_reader()))
        .collect()
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        collection.states.get(&FactCategory::Network),
        Some(&ProbeState::TimedOut)
    );
    assert!(!collection.facts.contains_key("interfaces"));
    assert_eq!(collection.facts.get_i64("memtotal_mb"), Some(1024));
    assert!(collection.diagnostics.iter().any(|d| {
        d.category == FactCategory::Network && matches!(d.failure, SoftFailure::Timeout { .. })
    }));
}

#[tokio::test]
async fn test_slow_categories_overlap() {
    let runner = StubRunner::new()
        .with("uname -s", "Linux")
        .with("uname -r", "5.15.0-91-generic")
        .with("uname -m", "x86_64")
        .with("getconf LONG_BIT", "64")
        .with_delay("nproc", Duration::from_secs(1), "2")
        .with_delay("ip addr show", Duration::from_secs(1), IP_ADDR);
    let config = CollectorConfig {
        gather_timeout: 2,
        ..config()
    };

    let started = Instant::now();
    let collection = FactAggregator::new(config)
        .with_runner(Arc::new(runner))
        .with_reader(Arc::new(linux_reader()))
        .collect()
        .await
        .unwrap();
    let elapsed = started.elapsed();

    // Run one after the other these would need two seconds.
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1800), "took {elapsed:?}");
    assert_eq!(
        collection.states.get(&FactCategory::Hardware),
        Some(&ProbeState::Completed)
    );
    assert_eq!(
        collection.states.get(&FactCategory::Network),
        Some(&ProbeState::Completed)
    );
    assert_eq!(collection.facts.get_i64("processor_nproc"), Some(2));
    assert!(collection.facts.contains_key("eth0"));
}

#[tokio::test]
async fn test_stuck_probe_keeps_partial_facts() {
    let config = CollectorConfig {
        gather_timeout: 1,
        ..config()
    };

    let collection = FactAggregator::new(config)
        .with_runner(Arc::new(linux_runner()))
        .with_reader(Arc::new(linux_reader()))
        .with_probe(Stuck(FactCategory::Virtualization))
        .collect()
        .await
        .unwrap();

    assert_eq!(
        collection.states.get(&FactCategory::Virtualization),
        Some(&ProbeState::TimedOut)
    );
    assert_eq!(
        collection.facts.get("written_before_hang"),
        Some(&FactValue::Bool(true))
    );
    assert_eq!(
        collection.states.get(&FactCategory::Hardware),
        Some(&ProbeState::Completed)
    );
}

#[tokio::test]
async fn test_overall_deadline_returns_partial_result() {
    let config = CollectorConfig {
        gather_timeout: 30,
        timeout: 1,
        ..config()
    };

    let started = Instant::now();
    let collection = FactAggregator::new(config)
        .with_runner(Arc::new(linux_runner()))
        .with_reader(Arc::new(linux_reader()))
        .with_identity(linux_identity())
        .with_probe(Stuck(FactCategory::Network))
        .collect()
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        collection.states.get(&FactCategory::Network),
        Some(&ProbeState::TimedOut)
    );
    // Abandoned probes contribute nothing, not even what they wrote so far.
    assert!(!collection.facts.contains_key("written_before_hang"));
    assert_eq!(collection.facts.get_i64("memtotal_mb"), Some(1024));
}

#[tokio::test]
async fn test_missing_tools_yield_empty_fragments() {
    let families = [
        PlatformFamily::Linux,
        PlatformFamily::FreeBsd,
        PlatformFamily::DragonFly,
        PlatformFamily::OpenBsd,
        PlatformFamily::NetBsd,
        PlatformFamily::SunOs,
        PlatformFamily::Aix,
        PlatformFamily::HpUx,
        PlatformFamily::Darwin,
        PlatformFamily::Unknown,
    ];
    for family in families {
        let identity = PlatformIdentity {
            family,
            system: family.as_str().to_string(),
            ..PlatformIdentity::unknown()
        };
        let ctx = ProbeContext::new(
            Arc::new(identity),
            Arc::new(StubRunner::new()),
            Arc::new(StubReader::new()),
            ProbeDeadline::unbounded(),
        );
        for probe in [hardware::probe_for(family), network::probe_for(family)] {
            let mut fragment = Fragment::new();
            probe.collect(&ctx, &mut fragment).await.unwrap();
            assert!(
                fragment.is_empty(),
                "{} on {family} produced {:?}",
                probe.name(),
                fragment.facts
            );
        }
    }
}

#[tokio::test]
async fn test_first_virtualization_heuristic_wins() {
    let reader = linux_reader()
        .with_file("/.dockerenv", "")
        .with_dir("/proc/vz")
        .with_file("/sys/devices/virtual/dmi/id/product_name", "KVM\n");

    let collection = FactAggregator::new(config())
        .with_runner(Arc::new(linux_runner()))
        .with_reader(Arc::new(reader))
        .collect()
        .await
        .unwrap();

    assert_eq!(collection.facts.get_str("virtualization_type"), Some("docker"));
    assert_eq!(collection.facts.get_str("virtualization_role"), Some("guest"));
}

#[tokio::test]
async fn test_subset_limits_categories() {
    let config = CollectorConfig {
        gather_subset: vec!["min".to_string()],
        ..config()
    };
    let collection = FactAggregator::new(config)
        .with_runner(Arc::new(linux_runner()))
        .with_reader(Arc::new(linux_reader()))
        .collect()
        .await
        .unwrap();

    assert_eq!(collection.facts.get_str("distribution"), Some("Ubuntu"));
    assert!(!collection.facts.contains_key("memtotal_mb"));
    assert!(!collection.states.contains_key(&FactCategory::Network));
}

#[tokio::test]
async fn test_custom_facts_merge_under_local() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("app.fact"), "{\"tier\": \"web\"}").unwrap();
    let config = CollectorConfig {
        fact_path: dir.path().to_path_buf(),
        ..CollectorConfig::default()
    };

    let collection = FactAggregator::new(config)
        .with_runner(Arc::new(StubRunner::new()))
        .with_reader(Arc::new(SystemFileReader))
        .collect()
        .await
        .unwrap();

    assert_eq!(
        collection.facts.get_path("local.app.tier").and_then(FactValue::as_str),
        Some("web")
    );
}

struct ExhaustedRunner;

#[async_trait]
impl CommandRunner for ExhaustedRunner {
    async fn run(
        &self,
        program: &str,
        _args: &[&str],
        _deadline: &ProbeDeadline,
    ) -> Result<CommandOutput, FactError> {
        Err(FactError::ResourceExhausted {
            operation: format!("spawn {program}"),
            source: std::io::Error::from_raw_os_error(11),
        })
    }
}

#[tokio::test]
async fn test_resource_exhaustion_is_hard() {
    let result = FactAggregator::new(config())
        .with_runner(Arc::new(ExhaustedRunner))
        .with_reader(Arc::new(StubReader::new()))
        .with_identity(linux_identity())
        .collect()
        .await;

    assert!(matches!(result, Err(ref e) if e.is_hard()));
}
