//! Linux hardware facts from procfs and sysfs

use super::{dmidecode, form_factor, parse_cpuinfo, parse_meminfo, render_meminfo, DMI_FIELDS};
use crate::facts::probe::{FactProbe, Fragment, ProbeContext};
use crate::facts::util::human_size;
use crate::facts::{FactCategory, FactError, FactMap, FactValue, SoftFailure};
use async_trait::async_trait;

const DMI_DIR: &str = "/sys/devices/virtual/dmi/id";
const SYS_BLOCK: &str = "/sys/block";
/// sysfs reports block device sizes in 512-byte sectors regardless of the
/// device's logical block size.
const SYSFS_SECTOR: u64 = 512;
const SKIPPED_DEVICES: &[&str] = &["loop", "ram", "zram"];

pub struct LinuxHardware;

#[async_trait]
impl FactProbe for LinuxHardware {
    fn category(&self) -> FactCategory {
        FactCategory::Hardware
    }

    fn name(&self) -> &'static str {
        "linux_hardware"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        self.cpu_facts(ctx, fragment).await?;

        if let Some(meminfo) = ctx.read("/proc/meminfo").await? {
            render_meminfo(fragment, &parse_meminfo(&meminfo));
        }

        self.dmi_facts(ctx, fragment).await?;
        self.device_facts(ctx, fragment).await?;

        if let Some(uptime) = ctx.read_trimmed("/proc/uptime").await? {
            match parse_uptime(&uptime) {
                Some(secs) => fragment.insert("uptime_seconds", secs),
                None => fragment.fail(SoftFailure::parse("/proc/uptime", uptime)),
            }
        }
        Ok(())
    }
}

impl LinuxHardware {
    async fn cpu_facts(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        let topology = match ctx.read("/proc/cpuinfo").await? {
            Some(cpuinfo) => parse_cpuinfo(&cpuinfo),
            None => Default::default(),
        };
        topology.render(fragment);

        let nproc = ctx
            .stdout(fragment, "nproc", &[])
            .await?
            .and_then(|n| n.parse::<u64>().ok());
        let fallback = (topology.vcpus > 0).then_some(topology.vcpus);
        fragment.insert_opt("processor_nproc", nproc.or(fallback));
        Ok(())
    }

    async fn dmi_facts(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        if !ctx.exists(DMI_DIR).await {
            return dmidecode(ctx, fragment).await;
        }
        for field in DMI_FIELDS {
            let path = format!("{DMI_DIR}/{}", field.sysfs);
            // Serial numbers and uuids are root-only; they read as absent.
            let Some(value) = ctx.read_trimmed(&path).await? else {
                continue;
            };
            if field.key == "form_factor" {
                fragment.insert(field.key, form_factor(&value));
            } else {
                fragment.insert(field.key, value);
            }
        }
        Ok(())
    }

    async fn device_facts(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        let mut devices = FactMap::new();

        for name in ctx.list_dir(SYS_BLOCK).await? {
            if SKIPPED_DEVICES.iter().any(|prefix| name.starts_with(prefix)) {
                continue;
            }
            let base = format!("{SYS_BLOCK}/{name}");
            let mut device = FactMap::new();

            for (key, file) in [("vendor", "device/vendor"), ("model", "device/model")] {
                let value = ctx.read_trimmed(format!("{base}/{file}")).await?;
                device.insert(key.to_string(), FactValue::from(value.unwrap_or_default()));
            }

            let sectors = read_u64(ctx, &format!("{base}/size")).await?;
            if let Some(sectors) = sectors {
                device.insert("sectors".to_string(), sectors.to_string().into());
                device.insert(
                    "size".to_string(),
                    human_size(sectors.saturating_mul(SYSFS_SECTOR)).into(),
                );
            }
            if let Some(size) = read_u64(ctx, &format!("{base}/queue/logical_block_size")).await? {
                device.insert("sectorsize".to_string(), size.to_string().into());
            }
            if let Some(removable) = ctx.read_trimmed(format!("{base}/removable")).await? {
                device.insert("removable".to_string(), removable.into());
            }
            if let Some(rotational) = ctx.read_trimmed(format!("{base}/queue/rotational")).await? {
                device.insert("rotational".to_string(), rotational.into());
            }

            let mut partitions = FactMap::new();
            for part in ctx.list_dir(&base).await? {
                if !part.starts_with(&name) {
                    continue;
                }
                let mut partition = FactMap::new();
                if let Some(sectors) = read_u64(ctx, &format!("{base}/{part}/size")).await? {
                    partition.insert("sectors".to_string(), sectors.to_string().into());
                    partition.insert(
                        "size".to_string(),
                        human_size(sectors.saturating_mul(SYSFS_SECTOR)).into(),
                    );
                }
                if let Some(start) = read_u64(ctx, &format!("{base}/{part}/start")).await? {
                    partition.insert("start".to_string(), start.to_string().into());
                }
                partitions.insert(part, partition.into());
            }
            device.insert("partitions".to_string(), partitions.into());

            devices.insert(name, device.into());
        }

        if !devices.is_empty() {
            fragment.insert("devices", devices);
        }
        Ok(())
    }
}

async fn read_u64(ctx: &ProbeContext, path: &str) -> Result<Option<u64>, FactError> {
    Ok(ctx
        .read_trimmed(path)
        .await?
        .and_then(|v| v.parse::<u64>().ok()))
}

/// First field of `/proc/uptime`, truncated to whole seconds.
fn parse_uptime(content: &str) -> Option<u64> {
    let secs: f64 = content.split_whitespace().next()?.parse().ok()?;
    (secs >= 0.0).then_some(secs as u64)
}
