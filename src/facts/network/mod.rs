//! Network fact collection
//!
//! Each family parses its interface listing into [`NetworkInterface`]
//! records and resolves one default route per address family. Rendering into
//! facts is shared.

pub mod hpux;
pub mod ifconfig;
pub mod linux;

use super::platform::PlatformFamily;
use super::probe::{FactProbe, Fragment, UnsupportedProbe};
use super::{FactCategory, FactMap, FactValue};
use std::net::Ipv4Addr;

pub fn probe_for(family: PlatformFamily) -> Box<dyn FactProbe> {
    match family {
        PlatformFamily::Linux => Box::new(linux::LinuxNetwork),
        PlatformFamily::HpUx => Box::new(hpux::HpUxNetwork),
        PlatformFamily::Unknown => Box::new(UnsupportedProbe::new(FactCategory::Network)),
        family => Box::new(ifconfig::IfconfigNetwork::new(family)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterfaceKind {
    Ether,
    Loopback,
    Ppp,
    Bridge,
    Bonding,
    Tunnel,
    #[default]
    Unknown,
}

impl InterfaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceKind::Ether => "ether",
            InterfaceKind::Loopback => "loopback",
            InterfaceKind::Ppp => "ppp",
            InterfaceKind::Bridge => "bridge",
            InterfaceKind::Bonding => "bonding",
            InterfaceKind::Tunnel => "tunnel",
            InterfaceKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ipv4Record {
    pub address: Ipv4Addr,
    pub prefix: u8,
    pub broadcast: Option<String>,
}

impl Ipv4Record {
    pub fn new(address: Ipv4Addr, prefix: u8, broadcast: Option<String>) -> Self {
        Self {
            address,
            prefix: prefix.min(32),
            broadcast,
        }
    }

    /// Parses `a.b.c.d/len` or a bare address with a separate netmask in
    /// dotted, `0x`-hex or bare hex form.
    pub fn parse(address: &str, netmask: Option<&str>, broadcast: Option<&str>) -> Option<Self> {
        let (addr, prefix) = match address.split_once('/') {
            Some((addr, len)) => (addr, len.parse::<u8>().ok()?),
            None => (address, netmask.and_then(netmask_to_prefix).unwrap_or(32)),
        };
        Some(Self::new(
            addr.parse().ok()?,
            prefix,
            broadcast.map(str::to_string),
        ))
    }

    pub fn netmask(&self) -> Ipv4Addr {
        prefix_to_netmask(self.prefix)
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) & u32::from(self.netmask()))
    }

    pub fn render(&self) -> FactMap {
        let mut map = FactMap::new();
        map.insert("address".to_string(), self.address.to_string().into());
        map.insert("netmask".to_string(), self.netmask().to_string().into());
        map.insert("network".to_string(), self.network().to_string().into());
        map.insert("prefix".to_string(), self.prefix.to_string().into());
        if let Some(broadcast) = &self.broadcast {
            map.insert("broadcast".to_string(), broadcast.into());
        }
        map
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ipv6Record {
    pub address: String,
    pub prefix: u8,
    pub scope: String,
}

impl Ipv6Record {
    /// Parses `addr/len` or `addr` with a separate prefix length. A `%zone`
    /// suffix is dropped from the address.
    pub fn parse(address: &str, prefix: Option<u8>, scope: Option<&str>) -> Option<Self> {
        let (addr, len) = match address.split_once('/') {
            Some((addr, len)) => (addr, len.parse().ok()),
            None => (address, prefix),
        };
        let addr = addr.split('%').next().unwrap_or(addr);
        if addr.is_empty() || !addr.contains(':') {
            return None;
        }
        let scope = scope
            .map(str::to_string)
            .unwrap_or_else(|| ipv6_scope(addr).to_string());
        Some(Self {
            address: addr.to_string(),
            prefix: len.unwrap_or(128).min(128),
            scope,
        })
    }

    pub fn render(&self) -> FactMap {
        let mut map = FactMap::new();
        map.insert("address".to_string(), self.address.as_str().into());
        map.insert("prefix".to_string(), self.prefix.to_string().into());
        map.insert("scope".to_string(), self.scope.as_str().into());
        map
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BridgeInfo {
    pub interfaces: Vec<String>,
    pub id: Option<String>,
    pub stp: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BondingInfo {
    pub slaves: Vec<String>,
    pub mode: Option<String>,
    pub miimon: Option<String>,
    pub lacp_rate: Option<String>,
    pub primary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkInterface {
    pub device: String,
    pub active: bool,
    pub kind: InterfaceKind,
    pub macaddress: Option<String>,
    pub mtu: Option<u64>,
    pub ipv4: Vec<Ipv4Record>,
    pub ipv6: Vec<Ipv6Record>,
    pub promisc: Option<bool>,
    pub bridge: Option<BridgeInfo>,
    pub bonding: Option<BondingInfo>,
    /// Kernel driver module backing the device.
    pub module: Option<String>,
    /// Bridge or bond this interface is enslaved to.
    pub master: Option<String>,
}

impl NetworkInterface {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Self::default()
        }
    }

    /// Fact key for this interface.
    pub fn fact_key(&self) -> String {
        self.device.replace(['-', ':'], "_")
    }

    pub fn render(&self) -> FactMap {
        let mut map = FactMap::new();
        map.insert("device".to_string(), self.device.as_str().into());
        map.insert("active".to_string(), self.active.into());
        map.insert("type".to_string(), self.kind.as_str().into());
        map.insert(
            "macaddress".to_string(),
            self.macaddress.as_deref().unwrap_or("unknown").into(),
        );
        if let Some(mtu) = self.mtu {
            map.insert("mtu".to_string(), mtu.into());
        }
        if let Some((first, rest)) = self.ipv4.split_first() {
            map.insert("ipv4".to_string(), first.render().into());
            if !rest.is_empty() {
                let secondaries: Vec<FactValue> = rest.iter().map(|r| r.render().into()).collect();
                map.insert("ipv4_secondaries".to_string(), secondaries.into());
            }
        }
        if !self.ipv6.is_empty() {
            let ipv6: Vec<FactValue> = self.ipv6.iter().map(|r| r.render().into()).collect();
            map.insert("ipv6".to_string(), ipv6.into());
        }
        if let Some(promisc) = self.promisc {
            map.insert("promisc".to_string(), promisc.into());
        }
        if let Some(module) = &self.module {
            map.insert("module".to_string(), module.into());
        }
        if let Some(master) = &self.master {
            map.insert("master".to_string(), master.into());
        }
        if let Some(bridge) = &self.bridge {
            map.insert(
                "interfaces".to_string(),
                FactValue::strings(bridge.interfaces.iter().cloned()),
            );
            if let Some(id) = &bridge.id {
                map.insert("id".to_string(), id.into());
            }
            if let Some(stp) = bridge.stp {
                map.insert("stp".to_string(), stp.into());
            }
        }
        if let Some(bonding) = &self.bonding {
            map.insert(
                "slaves".to_string(),
                FactValue::strings(bonding.slaves.iter().cloned()),
            );
            for (key, value) in [
                ("mode", &bonding.mode),
                ("miimon", &bonding.miimon),
                ("lacp_rate", &bonding.lacp_rate),
                ("primary", &bonding.primary),
            ] {
                if let Some(value) = value {
                    map.insert(key.to_string(), value.into());
                }
            }
        }
        map
    }
}

/// One resolved default route.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefaultRoute {
    pub interface: String,
    pub gateway: Option<String>,
    /// Preferred source address, when the route lookup reports one.
    pub address: Option<String>,
}

/// Everything one network probe discovered, before rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkSnapshot {
    pub interfaces: Vec<NetworkInterface>,
    pub default_ipv4: Option<DefaultRoute>,
    pub default_ipv6: Option<DefaultRoute>,
}

impl NetworkSnapshot {
    pub fn interface_mut(&mut self, device: &str) -> &mut NetworkInterface {
        match self.interfaces.iter().position(|i| i.device == device) {
            Some(index) => &mut self.interfaces[index],
            None => {
                self.interfaces.push(NetworkInterface::new(device));
                let last = self.interfaces.len() - 1;
                &mut self.interfaces[last]
            }
        }
    }

    pub fn get(&self, device: &str) -> Option<&NetworkInterface> {
        self.interfaces.iter().find(|i| i.device == device)
    }

    /// Writes network facts. Nothing is written when no interface was found.
    pub fn render(&self, fragment: &mut Fragment) {
        if self.interfaces.is_empty() {
            return;
        }

        fragment.insert(
            "interfaces",
            FactValue::strings(self.interfaces.iter().map(|i| i.device.clone())),
        );
        for interface in &self.interfaces {
            fragment.insert(interface.fact_key(), interface.render());
        }

        let all_ipv4 = self
            .interfaces
            .iter()
            .flat_map(|i| i.ipv4.iter().map(|r| r.address.to_string()));
        fragment.insert("all_ipv4_addresses", FactValue::strings(all_ipv4));
        let all_ipv6 = self
            .interfaces
            .iter()
            .flat_map(|i| i.ipv6.iter().map(|r| r.address.clone()));
        fragment.insert("all_ipv6_addresses", FactValue::strings(all_ipv6));

        fragment.insert("default_ipv4", self.default_record(self.default_ipv4.as_ref(), false));
        fragment.insert("default_ipv6", self.default_record(self.default_ipv6.as_ref(), true));
    }

    /// The default interface's address map with route details promoted on top.
    fn default_record(&self, route: Option<&DefaultRoute>, v6: bool) -> FactMap {
        let Some(route) = route else {
            return FactMap::new();
        };
        let mut map = FactMap::new();

        if let Some(interface) = self.get(&route.interface) {
            let address = if v6 {
                interface
                    .ipv6
                    .iter()
                    .find(|r| Some(&r.address) == route.address.as_ref())
                    .or_else(|| interface.ipv6.iter().find(|r| r.scope != "link"))
                    .or_else(|| interface.ipv6.first())
                    .map(Ipv6Record::render)
            } else {
                interface
                    .ipv4
                    .iter()
                    .find(|r| route.address.as_deref() == Some(r.address.to_string().as_str()))
                    .or_else(|| interface.ipv4.first())
                    .map(Ipv4Record::render)
            };
            map.extend(address.unwrap_or_default());
            map.insert(
                "macaddress".to_string(),
                interface.macaddress.as_deref().unwrap_or("unknown").into(),
            );
            if let Some(mtu) = interface.mtu {
                map.insert("mtu".to_string(), mtu.into());
            }
            map.insert("type".to_string(), interface.kind.as_str().into());
            map.insert("alias".to_string(), interface.device.as_str().into());
        }

        map.insert("interface".to_string(), route.interface.as_str().into());
        if let Some(gateway) = &route.gateway {
            map.insert("gateway".to_string(), gateway.into());
        }
        if let Some(address) = &route.address {
            map.insert("address".to_string(), address.into());
        }
        map
    }
}

pub fn prefix_to_netmask(prefix: u8) -> Ipv4Addr {
    let bits = match prefix {
        0 => 0,
        p if p >= 32 => u32::MAX,
        p => u32::MAX << (32 - u32::from(p)),
    };
    Ipv4Addr::from(bits)
}

/// Prefix length of a dotted (`255.255.255.0`), `0x`-hex (`0xffffff00`) or
/// bare hex (`ffffff00`) netmask.
pub fn netmask_to_prefix(netmask: &str) -> Option<u8> {
    let bits = if let Ok(addr) = netmask.parse::<Ipv4Addr>() {
        u32::from(addr)
    } else {
        let hex = netmask.trim_start_matches("0x");
        if hex.len() != 8 {
            return None;
        }
        u32::from_str_radix(hex, 16).ok()?
    };
    // Non-contiguous masks are not meaningful as a prefix.
    if bits.leading_ones() + bits.trailing_zeros() != 32 {
        return None;
    }
    Some(bits.leading_ones() as u8)
}

fn ipv6_scope(address: &str) -> &'static str {
    let lower = address.to_lowercase();
    if lower == "::1" {
        "host"
    } else if lower.starts_with("fe80") {
        "link"
    } else if lower.starts_with("fc") || lower.starts_with("fd") {
        "site"
    } else {
        "global"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netmask_forms() {
        assert_eq!(netmask_to_prefix("255.255.255.0"), Some(24));
        assert_eq!(netmask_to_prefix("0xffff0000"), Some(16));
        assert_eq!(netmask_to_prefix("ff000000"), Some(8));
        assert_eq!(netmask_to_prefix("255.0.255.0"), None);
        assert_eq!(prefix_to_netmask(0), Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(prefix_to_netmask(20), Ipv4Addr::new(255, 255, 240, 0));
    }

    #[test]
    fn test_ipv4_record_network() {
        let record = Ipv4Record::parse("10.1.2.3/20", None, Some("10.1.15.255")).unwrap();
        let map = record.render();
        assert_eq!(map.get("network").and_then(FactValue::as_str), Some("10.1.0.0"));
        assert_eq!(map.get("netmask").and_then(FactValue::as_str), Some("255.255.240.0"));
        assert_eq!(map.get("prefix").and_then(FactValue::as_str), Some("20"));
    }

    #[test]
    fn test_ipv6_zone_and_scope() {
        let record = Ipv6Record::parse("fe80::1%lo0", Some(64), None).unwrap();
        assert_eq!(record.address, "fe80::1");
        assert_eq!(record.scope, "link");
        assert!(Ipv6Record::parse("10.0.0.1", None, None).is_none());
    }

    #[test]
    fn test_fact_key_replaces_separators() {
        assert_eq!(NetworkInterface::new("br-lan:1").fact_key(), "br_lan_1");
    }

    #[test]
    fn test_default_record_promotes_interface() {
        let mut snapshot = NetworkSnapshot::default();
        let eth0 = snapshot.interface_mut("eth0");
        eth0.kind = InterfaceKind::Ether;
        eth0.mtu = Some(1500);
        eth0.ipv4.push(Ipv4Record::parse("10.0.0.5/24", None, None).unwrap());
        snapshot.default_ipv4 = Some(DefaultRoute {
            interface: "eth0".to_string(),
            gateway: Some("10.0.0.1".to_string()),
            address: None,
        });

        let mut fragment = Fragment::new();
        snapshot.render(&mut fragment);
        let facts = &fragment.facts;
        assert_eq!(
            facts.get_path("default_ipv4.address").and_then(FactValue::as_str),
            Some("10.0.0.5")
        );
        assert_eq!(
            facts.get_path("default_ipv4.gateway").and_then(FactValue::as_str),
            Some("10.0.0.1")
        );
        assert!(facts.get("default_ipv6").unwrap().is_empty_map());
    }
}
