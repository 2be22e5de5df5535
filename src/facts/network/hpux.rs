//! HP-UX interfaces from `netstat`

use super::{DefaultRoute, InterfaceKind, Ipv4Record, NetworkSnapshot};
use crate::facts::probe::{FactProbe, Fragment, ProbeContext};
use crate::facts::{FactCategory, FactError, SoftFailure};
use async_trait::async_trait;
use std::net::Ipv4Addr;

pub struct HpUxNetwork;

#[async_trait]
impl FactProbe for HpUxNetwork {
    fn category(&self) -> FactCategory {
        FactCategory::Network
    }

    fn name(&self) -> &'static str {
        "hpux_network"
    }

    async fn collect(&self, ctx: &ProbeContext, fragment: &mut Fragment) -> Result<(), FactError> {
        let Some(listing) = ctx.stdout(fragment, "netstat", &["-niw"]).await? else {
            return Ok(());
        };
        let mut snapshot = parse_netstat_interfaces(&listing);
        if snapshot.interfaces.is_empty() {
            fragment.fail(SoftFailure::parse("netstat -niw", "no interfaces"));
            return Ok(());
        }
        if let Some(routes) = ctx.stdout(fragment, "netstat", &["-nr"]).await? {
            snapshot.default_ipv4 = parse_default_route(&routes);
        }
        snapshot.render(fragment);
        Ok(())
    }
}

/// `Name Mtu Network Address ...` rows. The netmask is not listed, so the
/// prefix is inferred from the network address's trailing zero octets.
fn parse_netstat_interfaces(output: &str) -> NetworkSnapshot {
    let mut snapshot = NetworkSnapshot::default();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 || fields[0] == "Name" {
            continue;
        }
        let (Ok(network), Ok(address)) = (fields[2].parse::<Ipv4Addr>(), fields[3].parse::<Ipv4Addr>())
        else {
            continue;
        };
        let name = fields[0].trim_end_matches('*');
        let interface = snapshot.interface_mut(name);
        interface.active = !fields[0].ends_with('*');
        interface.mtu = fields[1].parse().ok();
        interface.kind = if name.starts_with("lo") {
            InterfaceKind::Loopback
        } else if name.starts_with("lan") {
            InterfaceKind::Ether
        } else {
            InterfaceKind::Unknown
        };
        let prefix = 32 - (u32::from(network).trailing_zeros() / 8 * 8).min(32) as u8;
        interface.ipv4.push(Ipv4Record::new(address, prefix, None));
    }
    snapshot
}

fn parse_default_route(output: &str) -> Option<DefaultRoute> {
    output.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        (fields.first() == Some(&"default") && fields.len() >= 5).then(|| DefaultRoute {
            interface: fields[4].to_string(),
            gateway: Some(fields[1].to_string()),
            address: None,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netstat_niw() {
        let output = "\
Name      Mtu  Network         Address         Ipkts   Ierrs Opkts   Oerrs Coll
lan0      1500 192.168.1.0     192.168.1.10    102345  0     98765   0     0
lo0       32808 127.0.0.0      127.0.0.1       4242    0     4242    0     0
";
        let snapshot = parse_netstat_interfaces(output);
        let lan0 = snapshot.get("lan0").unwrap();
        assert_eq!(lan0.kind, InterfaceKind::Ether);
        assert_eq!(lan0.mtu, Some(1500));
        assert_eq!(lan0.ipv4[0].prefix, 24);
        assert_eq!(snapshot.get("lo0").unwrap().ipv4[0].prefix, 8);
    }

    #[test]
    fn test_default_route_row() {
        let output = "Routing tables\nDestination  Gateway  Flags Refs Interface Pmtu\n\
                      default      192.168.1.1  UG  0  lan0  1500\n";
        let route = parse_default_route(output).unwrap();
        assert_eq!(route.interface, "lan0");
        assert_eq!(route.gateway.as_deref(), Some("192.168.1.1"));
    }
}
