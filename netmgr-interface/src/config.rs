//
// Copyright (c) The Netmgr Project Contributors
//
// SPDX-License-Identifier: MIT
//

// Entry points turning typed attribute blobs into IP settings entries.
// Protocol handlers pass their own interface; the configuration frontend
// passes none and lets the blob name the interface, landing the entry on
// the config layer.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;
use serde::Deserialize;
use tracing::debug;

use netmgr_utils::ip::{AddressFamily, parse_netmask, parse_prefix};
use netmgr_utils::southbound::{DeviceAddr, DeviceRoute, RouteFlags};

use crate::SystemOps;
use crate::device::Devices;
use crate::interface::Interfaces;
use crate::ip::{self, IpSettings, Layer};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouteSpec {
    pub interface: Option<String>,
    pub target: Option<String>,
    pub netmask: Option<String>,
    pub gateway: Option<String>,
    pub metric: Option<u32>,
    pub mtu: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AddressSpec {
    pub interface: Option<String>,
    pub address: Option<String>,
    pub netmask: Option<String>,
    pub broadcast: Option<String>,
    pub point_to_point: Option<String>,
}

// What the static proto feeds into an interface's proto layer on setup.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StaticSettings {
    #[serde(rename = "address")]
    pub addresses: Vec<AddressSpec>,
    #[serde(rename = "address6")]
    pub addresses6: Vec<AddressSpec>,
    #[serde(rename = "route")]
    pub routes: Vec<RouteSpec>,
    #[serde(rename = "route6")]
    pub routes6: Vec<RouteSpec>,
    pub dns_servers: Vec<String>,
    pub dns_search: Vec<String>,
}

// ===== global functions =====

// Parses a route blob and files it under the owning layer. Malformed blobs
// are dropped with a debug log.
pub fn add_route<S: SystemOps>(
    sys: &mut S,
    devices: &Devices,
    interfaces: &mut Interfaces,
    iface: Option<&str>,
    spec: &RouteSpec,
    v6: bool,
) {
    let Some((ifname, layer)) = select_interface(iface, spec.interface.as_deref()) else {
        return;
    };
    let Some(iface) = interfaces.get_mut(&ifname) else {
        debug!(iface = %ifname, "route for unknown interface");
        return;
    };

    let family = if v6 {
        AddressFamily::Ipv6
    } else {
        AddressFamily::Ipv4
    };

    let mut prefixlen = family.max_prefixlen();
    if let Some(netmask) = spec.netmask.as_deref() {
        match parse_netmask(netmask, v6) {
            Some(len) => prefixlen = len,
            None => {
                debug!(%netmask, "failed to parse route netmask");
                return;
            }
        }
    }

    let mut target = family.unspecified();
    if let Some(route_target) = spec.target.as_deref() {
        match parse_family_addr(route_target, v6) {
            Some(addr) => target = addr,
            None => {
                debug!(target = %route_target, "failed to parse route target");
                return;
            }
        }
    }
    let Ok(prefix) = IpNetwork::new(target, prefixlen) else {
        return;
    };

    let mut route = DeviceRoute::new(prefix);
    if let Some(gateway) = spec.gateway.as_deref() {
        match parse_family_addr(gateway, v6) {
            Some(addr) => route.nexthop = addr,
            None => {
                debug!(%gateway, "failed to parse route gateway");
                return;
            }
        }
    }
    if let Some(metric) = spec.metric {
        route.metric = metric;
        // An explicit metric must survive the layered callback.
        route.flags |= RouteFlags::METRIC;
    }
    if let Some(mtu) = spec.mtu {
        route.mtu = mtu;
    }

    let ifindex = devices
        .get(&iface.device)
        .map(|dev| dev.ifindex)
        .unwrap_or(0);
    let metric = iface.metric;
    let name = iface.name.clone();
    let ip = iface.layer_mut(layer);
    let enabled = ip.enabled;
    let no_defaultroute = ip.no_defaultroute;
    ip.route.add(route, |route_new, route_old| {
        ip::route_delta(
            sys,
            ifindex,
            &name,
            metric,
            enabled,
            no_defaultroute,
            route_new,
            route_old,
        )
    });
}

// Parses an address blob; the address may carry its own prefix length,
// otherwise the netmask field applies.
pub fn add_address<S: SystemOps>(
    sys: &mut S,
    devices: &Devices,
    interfaces: &mut Interfaces,
    iface: Option<&str>,
    spec: &AddressSpec,
    v6: bool,
) {
    let Some((ifname, layer)) = select_interface(iface, spec.interface.as_deref()) else {
        return;
    };
    let Some(iface) = interfaces.get_mut(&ifname) else {
        debug!(iface = %ifname, "address for unknown interface");
        return;
    };

    let Some(address) = spec.address.as_deref() else {
        return;
    };
    let Some((addr, mut prefixlen)) = parse_prefix(address, v6) else {
        debug!(%address, "failed to parse address");
        return;
    };
    if !address.contains('/') {
        if let Some(netmask) = spec.netmask.as_deref() {
            match parse_netmask(netmask, v6) {
                Some(len) => prefixlen = len,
                None => {
                    debug!(%netmask, "failed to parse address netmask");
                    return;
                }
            }
        }
    }
    let Ok(network) = IpNetwork::new(addr, prefixlen) else {
        return;
    };

    let mut entry = DeviceAddr::new(network);
    if !v6 {
        if let Some(broadcast) = spec.broadcast.as_deref() {
            match broadcast.parse::<Ipv4Addr>() {
                Ok(broadcast) => entry.broadcast = Some(broadcast),
                Err(_) => {
                    debug!(%broadcast, "failed to parse broadcast address");
                    return;
                }
            }
        }
        if let Some(peer) = spec.point_to_point.as_deref() {
            match peer.parse::<Ipv4Addr>() {
                Ok(peer) => entry.peer = Some(peer),
                Err(_) => {
                    debug!(%peer, "failed to parse point-to-point address");
                    return;
                }
            }
        }
    }

    let ifindex = devices
        .get(&iface.device)
        .map(|dev| dev.ifindex)
        .unwrap_or(0);
    let metric = iface.metric;
    let ip = iface.layer_mut(layer);
    ip.addr.add(entry, |addr_new, addr_old| {
        ip::addr_delta(sys, ifindex, metric, addr_new, addr_old)
    });
}

// Accepts an IPv4 or IPv6 server address; anything else is dropped
// silently.
pub fn add_dns_server(ip: &mut IpSettings, server: &str) {
    let addr = server
        .parse::<Ipv4Addr>()
        .map(IpAddr::V4)
        .ok()
        .or_else(|| server.parse::<Ipv6Addr>().map(IpAddr::V6).ok());
    match addr {
        Some(addr) => {
            debug!(%addr, "adding DNS server");
            ip.dns_servers.add(addr);
        }
        None => debug!(%server, "failed to parse DNS server"),
    }
}

pub fn add_dns_search(ip: &mut IpSettings, domain: &str) {
    debug!(%domain, "adding DNS search domain");
    ip.dns_search.add(domain.to_owned());
}

// The static proto: rebuilds the interface's proto layer from its stored
// settings within one update epoch. Reapplying unchanged settings results
// in no kernel operations.
pub fn apply_static<S: SystemOps>(
    sys: &mut S,
    devices: &Devices,
    interfaces: &mut Interfaces,
    ifname: &str,
) {
    let Some(iface) = interfaces.get_mut(ifname) else {
        return;
    };
    let settings = iface.static_cfg.clone();

    ip::update_start(iface, Layer::Proto);
    for server in &settings.dns_servers {
        add_dns_server(&mut iface.proto_ip, server);
    }
    for domain in &settings.dns_search {
        add_dns_search(&mut iface.proto_ip, domain);
    }
    for spec in &settings.addresses {
        add_address(sys, devices, interfaces, Some(ifname), spec, false);
    }
    for spec in &settings.addresses6 {
        add_address(sys, devices, interfaces, Some(ifname), spec, true);
    }
    for spec in &settings.routes {
        add_route(sys, devices, interfaces, Some(ifname), spec, false);
    }
    for spec in &settings.routes6 {
        add_route(sys, devices, interfaces, Some(ifname), spec, true);
    }

    let Some(iface) = interfaces.get_mut(ifname) else {
        return;
    };
    let Some(dev) = devices.get(&iface.device) else {
        return;
    };
    ip::update_complete(sys, dev, iface, Layer::Proto);
}

// ===== helper functions =====

fn select_interface(
    iface: Option<&str>,
    spec_iface: Option<&str>,
) -> Option<(String, Layer)> {
    match iface {
        Some(ifname) => Some((ifname.to_owned(), Layer::Proto)),
        None => spec_iface.map(|ifname| (ifname.to_owned(), Layer::Config)),
    }
}

fn parse_family_addr(addr: &str, v6: bool) -> Option<IpAddr> {
    if v6 {
        addr.parse::<Ipv6Addr>().ok().map(IpAddr::V6)
    } else {
        addr.parse::<Ipv4Addr>().ok().map(IpAddr::V4)
    }
}

// ===== tests =====
