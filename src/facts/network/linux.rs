//! Linux interfaces from `ip addr show`, refined through sysfs

use super::{
    BondingInfo, BridgeInfo, DefaultRoute, InterfaceKind, Ipv4Record, Ipv6Record,
    NetworkInterface, NetworkSnapshot,
};
use crate::facts::probe::{FactProbe, Fragment, ProbeContext};
use crate::facts::util::{normalize_mac, word_after};
use crate::facts::{FactCategory, FactError, SoftFailure};
use async_trait::async_trait;

const SYS_NET: &str = "/sys/class/net";
/// Addresses used only to ask the kernel which route it would pick.
const PROBE_V4: &str = "8.8.8.8";
const PROBE_V6: &str = "2404:6800:400a:800::1012";
const IFF_PROMISC: u64 = 0x100;
const ARPHRD_PPP: &str = "512";
const ARPHRD_LOOPBACK: &str = "772";

pub struct LinuxNetwork;

#[async_trait]
impl FactProbe for LinuxNetwork {
    fn category(&self) -> FactCategory {
        FactCategory::Network
    }

    fn name(&self) -> &'static str {
        "linux_network"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        let Some(listing) = ctx.stdout(fragment, "ip", &["addr", "show"]).await? else {
            return Ok(());
        };
        let mut snapshot = parse_ip_addr(&listing);
        if snapshot.interfaces.is_empty() {
            fragment.fail(SoftFailure::parse("ip addr show", "no interfaces"));
            return Ok(());
        }

        for interface in &mut snapshot.interfaces {
            refine_from_sysfs(ctx, interface).await?;
        }

        let v4 = ctx.stdout(fragment, "ip", &["-4", "route", "get", PROBE_V4]).await?;
        snapshot.default_ipv4 = v4.as_deref().and_then(parse_route_get);
        let v6 = ctx.stdout(fragment, "ip", &["-6", "route", "get", PROBE_V6]).await?;
        snapshot.default_ipv6 = v6.as_deref().and_then(parse_route_get);

        snapshot.render(fragment);
        Ok(())
    }
}

/// Parses `ip addr show` output.
pub fn parse_ip_addr(output: &str) -> NetworkSnapshot {
    let mut snapshot = NetworkSnapshot::default();
    let mut current: Option<usize> = None;

    for line in output.lines() {
        if line.starts_with(|c: char| c.is_ascii_digit()) {
            // `2: eth0@if5: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 ...`
            let mut parts = line.splitn(3, ':');
            let (Some(_), Some(name), Some(rest)) = (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let name = name.trim();
            let name = name.split('@').next().unwrap_or(name);
            let flags = header_flags(rest);

            let interface = snapshot.interface_mut(name);
            interface.active = flags.iter().any(|f| f == "UP");
            interface.mtu = word_after(rest, "mtu").and_then(|m| m.parse().ok());
            if flags.iter().any(|f| f == "LOOPBACK") {
                interface.kind = InterfaceKind::Loopback;
            }
            if flags.iter().any(|f| f == "PROMISC") {
                interface.promisc = Some(true);
            }
            current = snapshot.interfaces.iter().position(|i| i.device == name);
            continue;
        }

        let Some(interface) = current.and_then(|i| snapshot.interfaces.get_mut(i)) else {
            continue;
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.first().copied() {
            Some(link) if link.starts_with("link/") => {
                interface.kind = match link {
                    "link/ether" => InterfaceKind::Ether,
                    "link/loopback" => InterfaceKind::Loopback,
                    "link/ppp" => InterfaceKind::Ppp,
                    "link/none" | "link/ipip" | "link/sit" | "link/gre" | "link/tunnel6" => {
                        InterfaceKind::Tunnel
                    }
                    _ => interface.kind,
                };
                if let Some(mac) = words.get(1).filter(|m| m.contains(':')) {
                    if interface.kind != InterfaceKind::Loopback {
                        interface.macaddress = Some(normalize_mac(mac));
                    }
                }
            }
            Some("inet") => {
                let Some(address) = words.get(1) else { continue };
                let broadcast = word_after(line, "brd");
                if let Some(record) = Ipv4Record::parse(address, None, broadcast) {
                    // The first address listed is the primary one.
                    interface.ipv4.push(record);
                }
            }
            Some("inet6") => {
                let Some(address) = words.get(1) else { continue };
                if let Some(record) = Ipv6Record::parse(address, None, word_after(line, "scope")) {
                    interface.ipv6.push(record);
                }
            }
            _ => {}
        }
    }
    snapshot
}

fn header_flags(rest: &str) -> Vec<String> {
    rest.split_once('<')
        .and_then(|(_, r)| r.split_once('>'))
        .map(|(flags, _)| flags.split(',').map(str::to_string).collect())
        .unwrap_or_default()
}

/// `8.8.8.8 via 10.0.0.1 dev eth0 src 10.0.0.5 uid 1000`
pub fn parse_route_get(output: &str) -> Option<DefaultRoute> {
    let line = output.lines().next()?;
    Some(DefaultRoute {
        interface: word_after(line, "dev")?.to_string(),
        gateway: word_after(line, "via").map(str::to_string),
        address: word_after(line, "src").map(str::to_string),
    })
}

async fn refine_from_sysfs(
    ctx: &ProbeContext,
    interface: &mut NetworkInterface,
) -> Result<(), FactError> {
    let base = format!("{SYS_NET}/{}", interface.device);
    let read = |file: &str| ctx.read_trimmed(format!("{base}/{file}"));

    if interface.macaddress.is_none() {
        interface.macaddress = read("address")
            .await?
            .filter(|mac| mac.contains(':') && interface.kind != InterfaceKind::Loopback);
    }
    if interface.mtu.is_none() {
        interface.mtu = read("mtu").await?.and_then(|m| m.parse().ok());
    }
    match read("type").await?.as_deref() {
        Some(ARPHRD_LOOPBACK) => interface.kind = InterfaceKind::Loopback,
        Some(ARPHRD_PPP) => interface.kind = InterfaceKind::Ppp,
        _ => {}
    }
    if let Some(flags) = read("flags").await? {
        if let Ok(bits) = u64::from_str_radix(flags.trim_start_matches("0x"), 16) {
            interface.promisc = Some(bits & IFF_PROMISC != 0);
        }
    }

    let link_name = |file: &str| {
        let path = format!("{base}/{file}");
        async move {
            ctx.read_link(path)
                .await
                .and_then(|target| target.file_name().map(|n| n.to_string_lossy().into_owned()))
        }
    };
    interface.module = link_name("device/driver/module").await;
    interface.master = link_name("master").await;

    if ctx.exists(format!("{base}/bridge")).await {
        interface.kind = InterfaceKind::Bridge;
        interface.bridge = Some(BridgeInfo {
            interfaces: ctx.list_dir(format!("{base}/brif")).await?,
            id: read("bridge/bridge_id").await?,
            stp: read("bridge/stp_state").await?.map(|s| s != "0"),
        });
    } else if ctx.exists(format!("{base}/bonding")).await {
        interface.kind = InterfaceKind::Bonding;
        let first_word = |v: String| v.split_whitespace().next().map(str::to_string);
        interface.bonding = Some(BondingInfo {
            slaves: read("bonding/slaves")
                .await?
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            mode: read("bonding/mode").await?.and_then(first_word),
            miimon: read("bonding/miimon").await?,
            lacp_rate: read("bonding/lacp_rate").await?.and_then(first_word),
            primary: read("bonding/primary").await?,
        });
    }
    Ok(())
}
