//! `ifconfig -a` based interfaces for the BSDs, macOS, Solaris and AIX

use super::{
    BondingInfo, BridgeInfo, DefaultRoute, InterfaceKind, Ipv4Record, Ipv6Record,
    NetworkInterface, NetworkSnapshot,
};
use crate::facts::platform::PlatformFamily;
use crate::facts::probe::{FactProbe, Fragment, ProbeContext};
use crate::facts::util::{key_values, normalize_mac, word_after};
use crate::facts::{FactCategory, FactError, SoftFailure};
use async_trait::async_trait;

const TUNNEL_PREFIXES: &[&str] = &["gif", "gre", "tun", "utun", "ipsec", "stf", "wg"];

pub struct IfconfigNetwork {
    family: PlatformFamily,
}

impl IfconfigNetwork {
    pub fn new(family: PlatformFamily) -> Self {
        Self { family }
    }

    fn ifconfig_args(&self) -> &'static [&'static str] {
        match self.family {
            PlatformFamily::OpenBsd => &["-aA"],
            _ => &["-a"],
        }
    }
}

#[async_trait]
impl FactProbe for IfconfigNetwork {
    fn category(&self) -> FactCategory {
        FactCategory::Network
    }

    fn name(&self) -> &'static str {
        match self.family {
            PlatformFamily::Darwin => "darwin_network",
            PlatformFamily::SunOs => "sunos_network",
            PlatformFamily::Aix => "aix_network",
            _ => "bsd_network",
        }
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        let Some(listing) = ctx.stdout(fragment, "ifconfig", self.ifconfig_args()).await? else {
            return Ok(());
        };
        let mut snapshot = parse_ifconfig(&listing);
        if snapshot.interfaces.is_empty() {
            fragment.fail(SoftFailure::parse("ifconfig", "no interfaces"));
            return Ok(());
        }

        if self.family == PlatformFamily::Aix {
            aix_enrich(ctx, fragment, &mut snapshot).await?;
            if let Some(netstat) = ctx.stdout(fragment, "netstat", &["-nr"]).await? {
                let (v4, v6) = parse_netstat_defaults(&netstat);
                snapshot.default_ipv4 = v4;
                snapshot.default_ipv6 = v6;
            }
        } else {
            let v4 = ctx.stdout(fragment, "route", &["-n", "get", "default"]).await?;
            snapshot.default_ipv4 = v4.as_deref().and_then(parse_route_get);
            let v6 = ctx
                .stdout(fragment, "route", &["-n", "get", "-inet6", "default"])
                .await?;
            snapshot.default_ipv6 = v6.as_deref().and_then(parse_route_get);
        }

        snapshot.render(fragment);
        Ok(())
    }
}

/// Parses `ifconfig -a` in its BSD, macOS, Solaris and AIX dialects.
/// Solaris lists IPv4 and IPv6 in separate blocks of the same name; those
/// are merged.
pub fn parse_ifconfig(output: &str) -> NetworkSnapshot {
    let mut snapshot = NetworkSnapshot::default();
    let mut current: Option<usize> = None;

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if !line.starts_with([' ', '\t']) {
            let Some((name, rest)) = line.split_once(':') else {
                continue;
            };
            let flags = header_flags(rest);
            let interface = snapshot.interface_mut(name.trim());
            let has = |flag: &str| flags.iter().any(|f| f == flag);

            interface.active |= has("UP");
            if let Some(mtu) = word_after(rest, "mtu").and_then(|m| m.parse().ok()) {
                interface.mtu = Some(mtu);
            }
            if has("LOOPBACK") {
                interface.kind = InterfaceKind::Loopback;
            } else if TUNNEL_PREFIXES.iter().any(|p| interface.device.starts_with(p)) {
                interface.kind = InterfaceKind::Tunnel;
            } else if has("POINTOPOINT") && interface.kind == InterfaceKind::Unknown {
                interface.kind = InterfaceKind::Ppp;
            }
            if has("PROMISC") {
                interface.promisc = Some(true);
            }
            let device = interface.device.clone();
            current = snapshot.interfaces.iter().position(|i| i.device == device);
            continue;
        }

        let Some(interface) = current.and_then(|i| snapshot.interfaces.get_mut(i)) else {
            continue;
        };
        let line = line.trim();
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.first().copied() {
            Some("ether") | Some("lladdr") | Some("address:") => {
                if let Some(mac) = words.get(1) {
                    interface.macaddress = Some(normalize_mac(mac));
                    if matches!(interface.kind, InterfaceKind::Unknown | InterfaceKind::Ppp) {
                        interface.kind = InterfaceKind::Ether;
                    }
                }
            }
            Some("inet") => {
                let Some(address) = words.get(1) else { continue };
                let record = Ipv4Record::parse(
                    address,
                    word_after(line, "netmask"),
                    word_after(line, "broadcast"),
                );
                if let Some(record) = record {
                    interface.ipv4.push(record);
                }
            }
            Some("inet6") => {
                let Some(address) = words.get(1) else { continue };
                let prefix = word_after(line, "prefixlen").and_then(|p| p.parse().ok());
                if let Some(record) = Ipv6Record::parse(address, prefix, None) {
                    if !interface.ipv6.contains(&record) {
                        interface.ipv6.push(record);
                    }
                }
            }
            Some("status:") => {
                interface.active = line.ends_with("active") && !line.contains("inactive");
            }
            Some("member:") => {
                let bridge = interface.bridge.get_or_insert_with(BridgeInfo::default);
                if let Some(member) = words.get(1) {
                    bridge.interfaces.push(member.to_string());
                }
                interface.kind = InterfaceKind::Bridge;
            }
            Some("id") if interface.device.starts_with("bridge") => {
                let bridge = interface.bridge.get_or_insert_with(BridgeInfo::default);
                bridge.id = words.get(1).map(|id| id.to_string());
                interface.kind = InterfaceKind::Bridge;
            }
            _ if interface.bridge.is_some() && word_after(line, "proto").is_some() => {
                if let Some(bridge) = interface.bridge.as_mut() {
                    bridge.stp = word_after(line, "proto").map(|p| p.contains("stp"));
                }
            }
            Some("laggproto") => {
                let bonding = interface.bonding.get_or_insert_with(BondingInfo::default);
                bonding.mode = words.get(1).map(|m| m.to_string());
                interface.kind = InterfaceKind::Bonding;
            }
            Some("laggport:") => {
                let bonding = interface.bonding.get_or_insert_with(BondingInfo::default);
                if let Some(port) = words.get(1) {
                    bonding.slaves.push(port.to_string());
                }
                interface.kind = InterfaceKind::Bonding;
            }
            _ => {}
        }
    }
    snapshot
}

/// Flags between `<` and `>` of an interface header.
fn header_flags(rest: &str) -> Vec<String> {
    rest.split_once('<')
        .and_then(|(_, r)| r.split_once('>'))
        .map(|(flags, _)| flags.split(',').map(str::to_string).collect())
        .unwrap_or_default()
}

/// `route -n get default`, shared by the BSDs, macOS and Solaris.
pub fn parse_route_get(output: &str) -> Option<DefaultRoute> {
    let fields = key_values(output, ':');
    Some(DefaultRoute {
        interface: fields.get("interface")?.clone(),
        gateway: fields.get("gateway").cloned(),
        address: None,
    })
}

/// `default` rows of AIX `netstat -nr`, split by address family.
pub fn parse_netstat_defaults(output: &str) -> (Option<DefaultRoute>, Option<DefaultRoute>) {
    let mut v4 = None;
    let mut v6 = None;
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.first() != Some(&"default") || fields.len() < 6 {
            continue;
        }
        let route = DefaultRoute {
            interface: fields[5].to_string(),
            gateway: Some(fields[1].to_string()),
            address: None,
        };
        if fields[1].contains(':') {
            v6.get_or_insert(route);
        } else {
            v4.get_or_insert(route);
        }
    }
    (v4, v6)
}

/// AIX `ifconfig` omits MACs and often the MTU; `entstat` and `lsattr` fill
/// them in for Ethernet adapters.
async fn aix_enrich(
    ctx: &ProbeContext,
    fragment: &mut Fragment,
    snapshot: &mut NetworkSnapshot,
) -> Result<(), FactError> {
    for interface in &mut snapshot.interfaces {
        if !interface.device.starts_with("en") {
            continue;
        }
        interface.kind = InterfaceKind::Ether;
        if interface.macaddress.is_none() {
            let entstat = ctx
                .stdout(fragment, "entstat", &["-d", interface.device.as_str()])
                .await?;
            interface.macaddress = entstat.as_deref().and_then(|out| {
                out.lines()
                    .find_map(|l| l.trim().strip_prefix("Hardware Address:"))
                    .map(|mac| normalize_mac(mac.trim()))
            });
        }
        if interface.mtu.is_none() {
            let lsattr = ctx
                .stdout(fragment, "lsattr", &["-El", interface.device.as_str(), "-a", "mtu"])
                .await?;
            interface.mtu = lsattr
                .as_deref()
                .and_then(|out| out.split_whitespace().nth(1))
                .and_then(|mtu| mtu.parse().ok());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freebsd_listing() {
        let output = "\
em0: flags=8843<UP,BROADCAST,RUNNING,SIMPLEX,MULTICAST> metric 0 mtu 1500
\toptions=481009b<RXCSUM,TXCSUM,VLAN_MTU>
\tether 08:00:27:aa:bb:cc
\tinet 10.0.2.15 netmask 0xffffff00 broadcast 10.0.2.255
\tinet6 fe80::a00:27ff:feaa:bbcc%em0 prefixlen 64 scopeid 0x1
\tmedia: Ethernet autoselect (1000baseT <full-duplex>)
\tstatus: active
lo0: flags=8049<UP,LOOPBACK,RUNNING,MULTICAST> metric 0 mtu 16384
\tinet6 ::1 prefixlen 128
\tinet 127.0.0.1 netmask 0xff000000
bridge0: flags=8843<UP,BROADCAST,RUNNING,SIMPLEX,MULTICAST> metric 0 mtu 1500
\tether 58:9c:fc:10:ff:c6
\tid 00:00:00:00:00:00 priority 32768 hellotime 2 fwddelay 15
\tmember: em1 flags=143<LEARNING,DISCOVER,AUTOEDGE,AUTOPTP>
\t        ifmaxaddr 0 port 2 priority 128 path cost 20000 proto rstp
lagg0: flags=8843<UP,BROADCAST,RUNNING,SIMPLEX,MULTICAST> metric 0 mtu 1500
\tlaggproto lacp lagghash l2,l3,l4
\tlaggport: em2 flags=1c<ACTIVE,COLLECTING,DISTRIBUTING>
\tlaggport: em3 flags=1c<ACTIVE,COLLECTING,DISTRIBUTING>
";
        let snapshot = parse_ifconfig(output);
        let em0 = snapshot.get("em0").unwrap();
        assert_eq!(em0.kind, InterfaceKind::Ether);
        assert_eq!(em0.ipv4[0].prefix, 24);
        assert_eq!(em0.ipv6[0].address, "fe80::a00:27ff:feaa:bbcc");
        assert!(em0.active);

        assert_eq!(snapshot.get("lo0").unwrap().kind, InterfaceKind::Loopback);

        let bridge = snapshot.get("bridge0").unwrap();
        assert_eq!(bridge.kind, InterfaceKind::Bridge);
        let info = bridge.bridge.as_ref().unwrap();
        assert_eq!(info.interfaces, vec!["em1"]);
        assert_eq!(info.stp, Some(true));

        let lagg = snapshot.get("lagg0").unwrap();
        assert_eq!(lagg.kind, InterfaceKind::Bonding);
        let bonding = lagg.bonding.as_ref().unwrap();
        assert_eq!(bonding.mode.as_deref(), Some("lacp"));
        assert_eq!(bonding.slaves, vec!["em2", "em3"]);
    }

    #[test]
    fn test_solaris_blocks_merge() {
        let output = "\
lo0: flags=2001000849<UP,LOOPBACK,RUNNING,MULTICAST,IPv4,VIRTUAL> mtu 8232 index 1
\tinet 127.0.0.1 netmask ff000000
net0: flags=100001004843<UP,BROADCAST,RUNNING,MULTICAST,DHCP,IPv4,PHYSRUNNING> mtu 1500 index 2
\tinet 10.0.2.15 netmask ffffff00 broadcast 10.0.2.255
\tether 8:0:27:d6:ec:f6
lo0: flags=2002000849<UP,LOOPBACK,RUNNING,MULTICAST,IPv6,VIRTUAL> mtu 8252 index 1
\tinet6 ::1/128
net0: flags=120002004841<UP,RUNNING,MULTICAST,DHCP,IPv6,PHYSRUNNING> mtu 1500 index 2
\tinet6 fe80::a00:27ff:fed6:ecf6/10
\tether 8:0:27:d6:ec:f6
";
        let snapshot = parse_ifconfig(output);
        assert_eq!(snapshot.interfaces.len(), 2);
        let net0 = snapshot.get("net0").unwrap();
        assert_eq!(net0.macaddress.as_deref(), Some("08:00:27:d6:ec:f6"));
        assert_eq!(net0.ipv4.len(), 1);
        assert_eq!(net0.ipv6[0].prefix, 10);
    }

    #[test]
    fn test_route_get_default() {
        let output = "   route to: default\ndestination: default\n       mask: default\n\
                      gateway: 10.0.2.2\n  interface: em0\n      flags: <UP,GATEWAY,DONE,STATIC>\n";
        let route = parse_route_get(output).unwrap();
        assert_eq!(route.interface, "em0");
        assert_eq!(route.gateway.as_deref(), Some("10.0.2.2"));
    }

    #[test]
    fn test_aix_netstat_defaults() {
        let output = "\
Routing tables
Destination        Gateway           Flags   Refs     Use  If   Exp  Groups

Route Tree for Protocol Family 2 (Internet):
default            192.168.1.1       UG        3    123456 en0      -      -
127/8              127.0.0.1         U         5      1500 lo0      -      -

Route Tree for Protocol Family 24 (Internet v6):
default            fe80::1           UG        0         0 en0      -      -
";
        let (v4, v6) = parse_netstat_defaults(output);
        assert_eq!(v4.unwrap().gateway.as_deref(), Some("192.168.1.1"));
        assert_eq!(v6.unwrap().interface, "en0");
    }
}
