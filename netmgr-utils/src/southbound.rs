//
// Copyright (c) The Netmgr Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};

use bitflags::bitflags;
use ipnetwork::IpNetwork;
use serde::Deserialize;

use crate::ip::AddressFamily;
use crate::mac_addr::MacAddr;
use crate::vset::SetEntry;

bitflags! {
    // Modifier bits of an interface address; the family tag lives in the
    // address itself.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct AddressFlags: u8 {
        // Observed on the interface but not managed in the kernel.
        const EXTERNAL = 0x01;
        const KERNEL = 0x02;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RouteFlags: u8 {
        const EXTERNAL = 0x01;
        // Reported to the kernel with protocol=KERNEL (subnet routes).
        const KERNEL = 0x02;
        // Metric was set explicitly and must not inherit the interface's.
        const METRIC = 0x04;
    }
}

bitflags! {
    // Which members of DevSettings carry a configured value.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct DeviceOptions: u8 {
        const MTU = 0x01;
        const TXQUEUELEN = 0x02;
        const MACADDR = 0x04;
    }
}

// An address owned by an interface's IP settings.
#[derive(Clone, Debug)]
pub struct DeviceAddr {
    pub flags: AddressFlags,
    pub addr: IpNetwork,
    // IPv4 only; derived from the prefix when unset.
    pub broadcast: Option<Ipv4Addr>,
    // IPv4 only: point-to-point peer.
    pub peer: Option<Ipv4Addr>,
    pub enabled: bool,
}

// A route owned by an interface's IP settings or host-route set.
#[derive(Clone, Debug)]
pub struct DeviceRoute {
    pub flags: RouteFlags,
    pub prefix: IpNetwork,
    // Unspecified means on-link.
    pub nexthop: IpAddr,
    pub mtu: u32,
    pub metric: u32,
    // Owning interface, by name.
    pub iface: Option<String>,
    pub enabled: bool,
}

// Hardware settings pushed to a device when it is brought up; the previous
// values are snapshotted so teardown can restore them.
#[derive(Clone, Copy, Debug, Default)]
pub struct DevSettings {
    pub flags: DeviceOptions,
    pub mtu: u32,
    pub txqueuelen: u32,
    pub macaddr: MacAddr,
}

// Bridge parameters; times are in seconds.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeSettings {
    pub stp: bool,
    pub forward_delay: u32,
    pub hello_time: Option<u32>,
    pub max_age: Option<u32>,
    pub ageing_time: Option<u32>,
    pub igmp_snooping: bool,
    pub members: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VlanSettings {
    // Parent device.
    pub device: String,
    pub vid: u16,
}

// Tunnel attribute blob; only the "sit" type is supported.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TunnelSettings {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub local: Option<String>,
    pub remote: Option<String>,
    pub ttl: Option<u32>,
    #[serde(rename = "6rd-prefix")]
    pub sixrd_prefix: Option<String>,
    #[serde(rename = "6rd-relay-prefix")]
    pub sixrd_relay_prefix: Option<String>,
}

// ===== impl DeviceAddr =====

impl DeviceAddr {
    pub fn new(addr: IpNetwork) -> DeviceAddr {
        DeviceAddr {
            flags: AddressFlags::empty(),
            addr,
            broadcast: None,
            peer: None,
            enabled: false,
        }
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.addr.ip())
    }
}

impl SetEntry for DeviceAddr {
    // Everything except the runtime `enabled` bit.
    type Key = (u8, IpNetwork, Option<Ipv4Addr>, Option<Ipv4Addr>);

    fn key(&self) -> Self::Key {
        (self.flags.bits(), self.addr, self.broadcast, self.peer)
    }
}

// ===== impl DeviceRoute =====

impl DeviceRoute {
    pub fn new(prefix: IpNetwork) -> DeviceRoute {
        let family = AddressFamily::of(&prefix.ip());
        DeviceRoute {
            flags: RouteFlags::empty(),
            prefix,
            nexthop: family.unspecified(),
            mtu: 0,
            metric: 0,
            iface: None,
            enabled: false,
        }
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.prefix.ip())
    }

    pub fn has_nexthop(&self) -> bool {
        !self.nexthop.is_unspecified()
    }

    // A zero-length prefix is a default route.
    pub fn is_default(&self) -> bool {
        self.prefix.prefix() == 0
    }
}

impl SetEntry for DeviceRoute {
    // Everything except the runtime bits (`iface`, `enabled`).
    type Key = (u8, IpNetwork, IpAddr, u32, u32);

    fn key(&self) -> Self::Key {
        (
            self.flags.bits(),
            self.prefix,
            self.nexthop,
            self.mtu,
            self.metric,
        )
    }
}

// ===== impl BridgeSettings =====

impl Default for BridgeSettings {
    fn default() -> BridgeSettings {
        BridgeSettings {
            stp: false,
            forward_delay: 2,
            hello_time: None,
            max_age: None,
            ageing_time: None,
            igmp_snooping: true,
            members: Vec::new(),
        }
    }
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_helpers() {
        let mut route = DeviceRoute::new("0.0.0.0/0".parse().unwrap());
        assert!(route.is_default());
        assert!(!route.has_nexthop());
        route.nexthop = "192.168.1.1".parse().unwrap();
        assert!(route.has_nexthop());

        let host = DeviceRoute::new("10.0.0.50/32".parse().unwrap());
        assert!(!host.is_default());
        assert_eq!(host.family(), AddressFamily::Ipv4);
        assert!(!host.has_nexthop());
    }

    #[test]
    fn addr_key_excludes_runtime_bits() {
        let addr: IpNetwork = "10.0.0.1/24".parse().unwrap();
        let mut a = DeviceAddr::new(addr);
        let mut b = DeviceAddr::new(addr);
        a.enabled = true;
        assert_eq!(a.key(), b.key());
        b.broadcast = Some("10.0.0.255".parse().unwrap());
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn route_key_excludes_runtime_bits() {
        let prefix: IpNetwork = "10.0.0.0/24".parse().unwrap();
        let mut a = DeviceRoute::new(prefix);
        let mut b = DeviceRoute::new(prefix);
        a.enabled = true;
        a.iface = Some("lan".to_owned());
        assert_eq!(a.key(), b.key());
        b.metric = 100;
        assert_ne!(a.key(), b.key());
    }
}
