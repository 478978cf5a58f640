//
// Copyright (c) The Netmgr Project Contributors
//
// SPDX-License-Identifier: MIT
//

// Differential application of per-interface IP settings: the address and
// route sets accumulate desired state between `update_start` and
// `update_complete`, and the delta handlers here translate the resulting
// changes into kernel operations.

use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::IpNetwork;
use tracing::debug;

use netmgr_utils::ip::{AddressFamily, clear_host_bits, match_prefix};
use netmgr_utils::southbound::{AddressFlags, DeviceAddr, DeviceRoute, RouteFlags};
use netmgr_utils::vset::{SimpleList, VSet};

use crate::SystemOps;
use crate::device::{Device, Devices};
use crate::interface::{Interface, Interfaces};

// Which of an interface's two IP settings layers is addressed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Layer {
    Proto,
    Config,
}

#[derive(Debug)]
pub struct IpSettings {
    pub enabled: bool,
    pub no_defaultroute: bool,
    pub no_dns: bool,
    pub addr: VSet<DeviceAddr>,
    pub route: VSet<DeviceRoute>,
    pub dns_servers: SimpleList<IpAddr>,
    pub dns_search: SimpleList<String>,
}

// ===== impl IpSettings =====

impl Default for IpSettings {
    fn default() -> IpSettings {
        IpSettings {
            enabled: true,
            no_defaultroute: false,
            no_dns: false,
            addr: VSet::new(),
            route: VSet::new(),
            dns_servers: SimpleList::new(),
            dns_search: SimpleList::new(),
        }
    }
}

// ===== global functions =====

// Opens the update epochs of one settings layer. DNS on the config layer
// is static and never rebuilt.
pub fn update_start(iface: &mut Interface, layer: Layer) {
    let ip = iface.layer_mut(layer);
    if layer == Layer::Proto {
        ip.dns_servers.update();
        ip.dns_search.update();
    }
    ip.route.update();
    ip.addr.update();
}

// Closes the epochs, driving the address and route deltas to the kernel.
pub fn update_complete<S: SystemOps>(
    sys: &mut S,
    dev: &Device,
    iface: &mut Interface,
    layer: Layer,
) {
    let ifindex = dev.ifindex;
    let metric = iface.metric;
    let ifname = iface.name.clone();

    let ip = iface.layer_mut(layer);
    if layer == Layer::Proto {
        ip.dns_servers.flush();
        ip.dns_search.flush();
    }
    let enabled = ip.enabled;
    let no_defaultroute = ip.no_defaultroute;
    ip.route.flush(|route_new, route_old| {
        route_delta(
            sys,
            ifindex,
            &ifname,
            metric,
            enabled,
            no_defaultroute,
            route_new,
            route_old,
        )
    });
    ip.addr
        .flush(|addr_new, addr_old| addr_delta(sys, ifindex, metric, addr_new, addr_old));
}

// Toggles one layer's kernel state without touching the desired sets.
pub fn set_enabled<S: SystemOps>(
    sys: &mut S,
    dev: &Device,
    metric: u32,
    ip: &mut IpSettings,
    enabled: bool,
) {
    ip.enabled = enabled;
    if dev.ifindex == 0 {
        return;
    }
    let ifindex = dev.ifindex;

    for addr in ip.addr.iter_mut() {
        if addr.enabled == enabled {
            continue;
        }
        if enabled {
            let _ = sys.add_address(ifindex, addr);
        } else {
            let _ = sys.del_address(ifindex, addr);
        }
        addr.enabled = enabled;
    }

    let no_defaultroute = ip.no_defaultroute;
    for route in ip.route.iter_mut() {
        let route_enabled = enabled && !(no_defaultroute && route.is_default());
        if route.enabled == route_enabled {
            continue;
        }
        if route_enabled {
            if !route.flags.contains(RouteFlags::METRIC) {
                route.metric = metric;
            }
            let _ = sys.add_route(ifindex, route);
        } else {
            let _ = sys.del_route(ifindex, route);
        }
        route.enabled = route_enabled;
    }
}

// Teardown: synthesizes removal of everything the layer holds. Host routes
// belong to the proto layer's lifetime.
pub fn flush<S: SystemOps>(sys: &mut S, dev: &Device, iface: &mut Interface, layer: Layer) {
    let ifindex = dev.ifindex;
    let metric = iface.metric;
    let ifname = iface.name.clone();

    if layer == Layer::Proto {
        iface.host_routes.flush_all(|_, route_old| {
            if let Some(route_old) = route_old {
                let _ = sys.del_route(ifindex, &route_old);
            }
        });
    }

    let ip = iface.layer_mut(layer);
    let enabled = ip.enabled;
    let no_defaultroute = ip.no_defaultroute;
    ip.dns_servers.flush_all();
    ip.dns_search.flush_all();
    ip.route.flush_all(|route_new, route_old| {
        route_delta(
            sys,
            ifindex,
            &ifname,
            metric,
            enabled,
            no_defaultroute,
            route_new,
            route_old,
        )
    });
    ip.addr
        .flush_all(|addr_new, addr_old| addr_delta(sys, ifindex, metric, addr_new, addr_old));
}

// Resolves the interface owning an arbitrary destination: a locally
// addressable target wins, otherwise the best enabled route match. The
// resulting host route is inserted into the owning interface's host-routes
// set, which installs it in the kernel unconditionally.
pub fn add_target_route<S: SystemOps>(
    sys: &mut S,
    interfaces: &mut Interfaces,
    devices: &Devices,
    target: IpAddr,
) -> Option<String> {
    let family = AddressFamily::of(&target);
    let Ok(prefix) = IpNetwork::new(target, family.max_prefixlen()) else {
        return None;
    };
    let mut route = DeviceRoute::new(prefix);

    let mut selected = None;
    let mut best: Option<&DeviceRoute> = None;
    for iface in interfaces.iter() {
        // Look for a locally addressable target first.
        if find_addr_target(&iface.proto_ip, &target)
            || find_addr_target(&iface.config_ip, &target)
        {
            selected = Some(iface.name.clone());
            break;
        }

        // Do not stop at the first route; let the lookup compare masks to
        // find the best match.
        find_route_target(&iface.proto_ip, &target, &mut best);
        find_route_target(&iface.config_ip, &target, &mut best);
    }

    let ifname = match selected {
        Some(ifname) => ifname,
        None => {
            let via = best?;
            route.nexthop = via.nexthop;
            route.mtu = via.mtu;
            route.metric = via.metric;
            via.iface.clone()?
        }
    };

    route.iface = Some(ifname.clone());
    let iface = interfaces.get_mut(&ifname)?;
    let ifindex = devices
        .get(&iface.device)
        .map(|dev| dev.ifindex)
        .unwrap_or(0);
    iface.host_routes.add(route, |route_new, route_old| {
        host_route_delta(sys, ifindex, route_new, route_old)
    });
    debug!(%target, iface = %ifname, "host route resolved");
    Some(ifname)
}

// ===== helper functions =====

pub(crate) fn addr_delta<S: SystemOps>(
    sys: &mut S,
    ifindex: u32,
    metric: u32,
    mut addr_new: Option<&mut DeviceAddr>,
    addr_old: Option<DeviceAddr>,
) {
    // Derive the IPv4 broadcast address when the provider left it unset.
    if let Some(addr) = addr_new.as_deref_mut() {
        if let IpNetwork::V4(network) = addr.addr {
            if addr.broadcast.is_none() {
                let host_bits = u32::MAX
                    .checked_shr(u32::from(network.prefix()))
                    .unwrap_or(0);
                let broadcast = u32::from(network.ip()) | host_bits;
                addr.broadcast = Some(Ipv4Addr::from(broadcast));
            }
        }
    }

    let keep = match (addr_new.as_deref(), addr_old.as_ref()) {
        (Some(new), Some(old)) => {
            new.flags == old.flags && (!new.addr.ip().is_ipv4() || new.broadcast == old.broadcast)
        }
        _ => false,
    };

    if let Some(old) = addr_old {
        if !old.flags.contains(AddressFlags::EXTERNAL) && old.enabled && !keep {
            // Drop the subnet route first, then the address itself.
            let _ = sys.del_route(ifindex, &subnet_route(&old, false, 0));
            let _ = sys.del_address(ifindex, &old);
        }
    }

    if let Some(addr) = addr_new {
        addr.enabled = true;
        if !addr.flags.contains(AddressFlags::EXTERNAL) && !keep {
            let _ = sys.add_address(ifindex, addr);
            if metric != 0 {
                install_subnet_route(sys, ifindex, addr, metric);
            }
        }
    }
}

pub(crate) fn route_delta<S: SystemOps>(
    sys: &mut S,
    ifindex: u32,
    ifname: &str,
    metric: u32,
    ip_enabled: bool,
    no_defaultroute: bool,
    route_new: Option<&mut DeviceRoute>,
    route_old: Option<DeviceRoute>,
) {
    let keep = match (route_new.as_deref(), route_old.as_ref()) {
        (Some(new), Some(old)) => new.nexthop == old.nexthop,
        _ => false,
    };

    if let Some(old) = route_old {
        if !old.flags.contains(RouteFlags::EXTERNAL) && old.enabled && !keep {
            let _ = sys.del_route(ifindex, &old);
        }
    }

    if let Some(route) = route_new {
        if !route.flags.contains(RouteFlags::METRIC) {
            route.metric = metric;
        }
        let enabled = ip_enabled && !(no_defaultroute && route.is_default());
        if !route.flags.contains(RouteFlags::EXTERNAL) && !keep && enabled {
            let _ = sys.add_route(ifindex, route);
        }
        route.iface = Some(ifname.to_owned());
        route.enabled = enabled;
    }
}

// Host routes carry no keep/enabled gating: any removal uninstalls, any
// addition installs.
fn host_route_delta<S: SystemOps>(
    sys: &mut S,
    ifindex: u32,
    route_new: Option<&mut DeviceRoute>,
    route_old: Option<DeviceRoute>,
) {
    if let Some(old) = route_old {
        let _ = sys.del_route(ifindex, &old);
    }
    if let Some(new) = route_new {
        let _ = sys.add_route(ifindex, new);
    }
}

// The route covering an address's prefix, host bits cleared.
fn subnet_route(addr: &DeviceAddr, kernel: bool, metric: u32) -> DeviceRoute {
    let prefixlen = addr.addr.prefix();
    let network = clear_host_bits(&addr.addr.ip(), prefixlen);
    let prefix = IpNetwork::new(network, prefixlen).unwrap();
    let mut route = DeviceRoute::new(prefix);
    route.flags = RouteFlags::from_bits_truncate(addr.flags.bits());
    if kernel {
        route.flags.insert(RouteFlags::KERNEL);
    }
    route.metric = metric;
    route
}

// Clears the kernel's own version of the prefix route, then installs ours
// carrying the interface metric.
fn install_subnet_route<S: SystemOps>(
    sys: &mut S,
    ifindex: u32,
    addr: &DeviceAddr,
    metric: u32,
) {
    let _ = sys.del_route(ifindex, &subnet_route(addr, true, 0));
    let _ = sys.add_route(ifindex, &subnet_route(addr, false, metric));
}

fn find_addr_target(ip: &IpSettings, target: &IpAddr) -> bool {
    ip.addr.iter().any(|addr| {
        addr.enabled
            && addr.family() == AddressFamily::of(target)
            && match_prefix(&addr.addr.ip(), target, addr.addr.prefix())
    })
}

fn find_route_target<'a>(
    ip: &'a IpSettings,
    target: &IpAddr,
    best: &mut Option<&'a DeviceRoute>,
) {
    for route in ip.route.iter() {
        if !route.enabled || route.family() != AddressFamily::of(target) {
            continue;
        }
        if !match_prefix(&route.prefix.ip(), target, route.prefix.prefix()) {
            continue;
        }
        if best.is_none_or(|current| route.prefix.prefix() < current.prefix.prefix()) {
            *best = Some(route);
        }
    }
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use netmgr_utils::vset::SetEntry;

    use super::*;
    use crate::device::{Device, DeviceKind, Devices};
    use crate::testing::{Op, Recorder};

    fn test_dev() -> Device {
        let mut dev = Device::new("eth0", DeviceKind::Simple);
        dev.ifindex = 2;
        dev.present = true;
        dev
    }

    fn test_iface(metric: u32) -> Interface {
        let mut iface = Interface::new("wan", "eth0", metric);
        iface.state = crate::interface::InterfaceState::Up;
        iface.proto_ip.enabled = true;
        iface.config_ip.enabled = true;
        iface
    }

    fn v4_addr(s: &str) -> DeviceAddr {
        DeviceAddr::new(s.parse().unwrap())
    }

    fn v4_route(prefix: &str, gateway: Option<&str>) -> DeviceRoute {
        let mut route = DeviceRoute::new(prefix.parse().unwrap());
        if let Some(gateway) = gateway {
            route.nexthop = gateway.parse().unwrap();
        }
        route
    }

    fn apply_addrs(rec: &mut Recorder, dev: &Device, iface: &mut Interface, addrs: &[DeviceAddr]) {
        update_start(iface, Layer::Config);
        for addr in addrs {
            iface.config_ip.addr.add(addr.clone(), |_, _| ());
        }
        update_complete(rec, dev, iface, Layer::Config);
    }

    fn apply_routes(
        rec: &mut Recorder,
        dev: &Device,
        iface: &mut Interface,
        routes: &[DeviceRoute],
    ) {
        update_start(iface, Layer::Proto);
        for route in routes {
            iface.proto_ip.route.add(route.clone(), |_, _| ());
        }
        update_complete(rec, dev, iface, Layer::Proto);
    }

    #[test]
    fn static_address_derives_broadcast() {
        let mut rec = Recorder::default();
        let dev = test_dev();
        let mut iface = test_iface(0);

        apply_addrs(&mut rec, &dev, &mut iface, &[v4_addr("10.0.0.1/24")]);

        // With a zero interface metric no subnet route is managed.
        assert_eq!(
            rec.ops,
            vec![Op::AddAddr {
                ifindex: 2,
                addr: "10.0.0.1/24".parse().unwrap(),
                broadcast: Some("10.0.0.255".parse().unwrap()),
            }]
        );
        let stored = iface.config_ip.addr.iter().next().unwrap();
        assert!(stored.enabled);
    }

    #[test]
    fn subnet_route_delete_precedes_add() {
        let mut rec = Recorder::default();
        let dev = test_dev();
        let mut iface = test_iface(10);

        apply_addrs(&mut rec, &dev, &mut iface, &[v4_addr("10.0.0.1/24")]);

        let prefix: IpNetwork = "10.0.0.0/24".parse().unwrap();
        assert_eq!(
            rec.ops,
            vec![
                Op::AddAddr {
                    ifindex: 2,
                    addr: "10.0.0.1/24".parse().unwrap(),
                    broadcast: Some("10.0.0.255".parse().unwrap()),
                },
                // The kernel-owned version is cleared before ours goes in.
                Op::DelRoute {
                    ifindex: 2,
                    prefix,
                    kernel: true,
                    metric: 0,
                },
                Op::AddRoute {
                    ifindex: 2,
                    prefix,
                    nexthop: "0.0.0.0".parse().unwrap(),
                    kernel: false,
                    metric: 10,
                },
            ]
        );
    }

    #[test]
    fn readding_the_same_address_is_kept() {
        let mut rec = Recorder::default();
        let dev = test_dev();
        let mut iface = test_iface(0);

        apply_addrs(&mut rec, &dev, &mut iface, &[v4_addr("10.0.0.1/24")]);
        rec.ops.clear();

        // Same address in the next epoch: no kernel churn, even though the
        // broadcast was derived only after insertion.
        apply_addrs(&mut rec, &dev, &mut iface, &[v4_addr("10.0.0.1/24")]);
        assert_eq!(rec.ops, vec![]);
        assert_eq!(iface.config_ip.addr.len(), 1);
    }

    #[test]
    fn removed_address_is_uninstalled() {
        let mut rec = Recorder::default();
        let dev = test_dev();
        let mut iface = test_iface(0);

        apply_addrs(&mut rec, &dev, &mut iface, &[v4_addr("10.0.0.1/24")]);
        rec.ops.clear();

        apply_addrs(&mut rec, &dev, &mut iface, &[]);
        assert_eq!(
            rec.ops,
            vec![
                Op::DelRoute {
                    ifindex: 2,
                    prefix: "10.0.0.0/24".parse().unwrap(),
                    kernel: false,
                    metric: 0,
                },
                Op::DelAddr {
                    ifindex: 2,
                    addr: "10.0.0.1/24".parse().unwrap(),
                },
            ]
        );
        assert_eq!(iface.config_ip.addr.len(), 0);
    }

    #[test]
    fn external_entries_are_not_managed() {
        let mut rec = Recorder::default();
        let dev = test_dev();
        let mut iface = test_iface(0);

        let mut addr = v4_addr("10.0.0.1/24");
        addr.flags |= AddressFlags::EXTERNAL;
        let mut route = v4_route("10.1.0.0/16", None);
        route.flags |= RouteFlags::EXTERNAL;

        apply_addrs(&mut rec, &dev, &mut iface, &[addr]);
        apply_routes(&mut rec, &dev, &mut iface, &[route]);
        assert_eq!(rec.ops, vec![]);
    }

    #[test]
    fn default_route_with_gateway() {
        let mut rec = Recorder::default();
        let dev = test_dev();
        let mut iface = test_iface(0);

        apply_routes(
            &mut rec,
            &dev,
            &mut iface,
            &[v4_route("0.0.0.0/0", Some("192.168.1.1"))],
        );
        assert_eq!(
            rec.ops,
            vec![Op::AddRoute {
                ifindex: 2,
                prefix: "0.0.0.0/0".parse().unwrap(),
                nexthop: "192.168.1.1".parse().unwrap(),
                kernel: false,
                metric: 0,
            }]
        );
        let stored = iface.proto_ip.route.iter().next().unwrap();
        assert!(stored.enabled);
        assert_eq!(stored.iface.as_deref(), Some("wan"));
    }

    #[test]
    fn no_defaultroute_gates_only_default_routes() {
        let mut rec = Recorder::default();
        let dev = test_dev();
        let mut iface = test_iface(0);

        apply_routes(
            &mut rec,
            &dev,
            &mut iface,
            &[
                v4_route("0.0.0.0/0", Some("192.168.1.1")),
                v4_route("10.1.0.0/16", Some("192.168.1.254")),
            ],
        );
        rec.ops.clear();

        iface.proto_ip.no_defaultroute = true;
        set_enabled(&mut rec, &dev, 0, &mut iface.proto_ip, true);

        // Only the default route is withdrawn.
        assert_eq!(
            rec.ops,
            vec![Op::DelRoute {
                ifindex: 2,
                prefix: "0.0.0.0/0".parse().unwrap(),
                kernel: false,
                metric: 0,
            }]
        );
        let default = iface
            .proto_ip
            .route
            .iter()
            .find(|route| route.is_default())
            .unwrap();
        assert!(!default.enabled);
        let other = iface
            .proto_ip
            .route
            .iter()
            .find(|route| !route.is_default())
            .unwrap();
        assert!(other.enabled);
    }

    #[test]
    fn routes_inherit_the_interface_metric() {
        let mut rec = Recorder::default();
        let dev = test_dev();
        let mut iface = test_iface(20);

        let mut pinned = v4_route("10.2.0.0/16", Some("192.168.1.1"));
        pinned.flags |= RouteFlags::METRIC;
        pinned.metric = 5;

        apply_routes(
            &mut rec,
            &dev,
            &mut iface,
            &[v4_route("10.1.0.0/16", Some("192.168.1.1")), pinned],
        );

        let metrics: Vec<u32> = rec
            .ops
            .iter()
            .map(|op| match op {
                Op::AddRoute { metric, .. } => *metric,
                op => panic!("unexpected op: {op:?}"),
            })
            .collect();
        assert_eq!(metrics, vec![20, 5]);
    }

    #[test]
    fn changed_nexthop_reinstalls_the_route() {
        let mut rec = Recorder::default();
        let dev = test_dev();
        let mut iface = test_iface(0);

        apply_routes(
            &mut rec,
            &dev,
            &mut iface,
            &[v4_route("10.1.0.0/16", Some("192.168.1.1"))],
        );
        rec.ops.clear();

        apply_routes(
            &mut rec,
            &dev,
            &mut iface,
            &[v4_route("10.1.0.0/16", Some("192.168.1.2"))],
        );
        assert_eq!(
            rec.ops,
            vec![
                Op::DelRoute {
                    ifindex: 2,
                    prefix: "10.1.0.0/16".parse().unwrap(),
                    kernel: false,
                    metric: 0,
                },
                Op::AddRoute {
                    ifindex: 2,
                    prefix: "10.1.0.0/16".parse().unwrap(),
                    nexthop: "192.168.1.2".parse().unwrap(),
                    kernel: false,
                    metric: 0,
                },
            ]
        );
    }

    #[test]
    fn set_enabled_toggles_addresses() {
        let mut rec = Recorder::default();
        let dev = test_dev();
        let mut iface = test_iface(0);

        apply_addrs(&mut rec, &dev, &mut iface, &[v4_addr("10.0.0.1/24")]);
        rec.ops.clear();

        set_enabled(&mut rec, &dev, 0, &mut iface.config_ip, false);
        set_enabled(&mut rec, &dev, 0, &mut iface.config_ip, false);
        assert_eq!(
            rec.ops,
            vec![Op::DelAddr {
                ifindex: 2,
                addr: "10.0.0.1/24".parse().unwrap(),
            }]
        );
    }

    #[test]
    fn teardown_flushes_everything() {
        let mut rec = Recorder::default();
        let dev = test_dev();
        let mut iface = test_iface(0);

        apply_addrs(&mut rec, &dev, &mut iface, &[v4_addr("10.0.0.1/24")]);
        apply_routes(
            &mut rec,
            &dev,
            &mut iface,
            &[v4_route("0.0.0.0/0", Some("192.168.1.1"))],
        );
        iface.proto_ip.dns_servers.add("8.8.8.8".parse().unwrap());
        rec.ops.clear();

        flush(&mut rec, &dev, &mut iface, Layer::Proto);
        flush(&mut rec, &dev, &mut iface, Layer::Config);

        assert_eq!(
            rec.ops,
            vec![
                Op::DelRoute {
                    ifindex: 2,
                    prefix: "0.0.0.0/0".parse().unwrap(),
                    kernel: false,
                    metric: 0,
                },
                Op::DelRoute {
                    ifindex: 2,
                    prefix: "10.0.0.0/24".parse().unwrap(),
                    kernel: false,
                    metric: 0,
                },
                Op::DelAddr {
                    ifindex: 2,
                    addr: "10.0.0.1/24".parse().unwrap(),
                },
            ]
        );
        assert!(iface.proto_ip.dns_servers.is_empty());
        assert_eq!(iface.proto_ip.route.len(), 0);
        assert_eq!(iface.config_ip.addr.len(), 0);
    }

    // ----- host-route resolver -----

    fn resolver_setup(rec: &mut Recorder) -> (Devices, Interfaces) {
        let mut devices = Devices::new();
        devices.insert(test_dev());
        let mut iface = test_iface(0);
        let dev = devices.get("eth0").unwrap();
        apply_addrs(rec, dev, &mut iface, &[v4_addr("10.0.0.1/24")]);
        let mut interfaces = Interfaces::new();
        interfaces.add(iface);
        rec.ops.clear();
        (devices, interfaces)
    }

    #[test]
    fn host_route_via_on_link_interface() {
        let mut rec = Recorder::default();
        let (devices, mut interfaces) = resolver_setup(&mut rec);

        let target: IpAddr = "10.0.0.50".parse().unwrap();
        let iface = add_target_route(&mut rec, &mut interfaces, &devices, target);
        assert_eq!(iface.as_deref(), Some("wan"));

        // On-link: no nexthop on the installed host route.
        assert_eq!(
            rec.ops,
            vec![Op::AddRoute {
                ifindex: 2,
                prefix: "10.0.0.50/32".parse().unwrap(),
                nexthop: "0.0.0.0".parse().unwrap(),
                kernel: false,
                metric: 0,
            }]
        );
        assert_eq!(interfaces.get("wan").unwrap().host_routes.len(), 1);
    }

    #[test]
    fn host_route_via_gateway() {
        let mut rec = Recorder::default();
        let (devices, mut interfaces) = resolver_setup(&mut rec);
        let dev = test_dev();
        let iface = interfaces.get_mut("wan").unwrap();
        apply_routes(
            &mut rec,
            &dev,
            iface,
            &[v4_route("0.0.0.0/0", Some("192.168.1.1"))],
        );
        rec.ops.clear();

        let target: IpAddr = "172.16.0.9".parse().unwrap();
        let chosen = add_target_route(&mut rec, &mut interfaces, &devices, target);
        assert_eq!(chosen.as_deref(), Some("wan"));
        assert_eq!(
            rec.ops,
            vec![Op::AddRoute {
                ifindex: 2,
                prefix: "172.16.0.9/32".parse().unwrap(),
                nexthop: "192.168.1.1".parse().unwrap(),
                kernel: false,
                metric: 0,
            }]
        );
    }

    #[test]
    fn host_route_prefers_smallest_mask() {
        let mut rec = Recorder::default();
        let (devices, mut interfaces) = resolver_setup(&mut rec);
        let dev = test_dev();
        let iface = interfaces.get_mut("wan").unwrap();
        apply_routes(
            &mut rec,
            &dev,
            iface,
            &[
                v4_route("172.16.0.0/24", Some("192.168.1.1")),
                v4_route("172.16.0.0/16", Some("192.168.1.2")),
            ],
        );
        rec.ops.clear();

        let target: IpAddr = "172.16.0.9".parse().unwrap();
        add_target_route(&mut rec, &mut interfaces, &devices, target).unwrap();

        // The smaller mask wins; first found wins ties.
        assert_eq!(
            rec.ops,
            vec![Op::AddRoute {
                ifindex: 2,
                prefix: "172.16.0.9/32".parse().unwrap(),
                nexthop: "192.168.1.2".parse().unwrap(),
                kernel: false,
                metric: 0,
            }]
        );
    }

    #[test]
    fn unreachable_target_resolves_to_none() {
        let mut rec = Recorder::default();
        let (devices, mut interfaces) = resolver_setup(&mut rec);

        let target: IpAddr = "203.0.113.77".parse().unwrap();
        assert_eq!(
            add_target_route(&mut rec, &mut interfaces, &devices, target),
            None
        );
        assert_eq!(rec.ops, vec![]);
        assert_eq!(interfaces.get("wan").unwrap().host_routes.len(), 0);
    }

    #[test]
    fn disabled_entries_do_not_resolve_targets() {
        let mut rec = Recorder::default();
        let (devices, mut interfaces) = resolver_setup(&mut rec);
        let dev = test_dev();
        {
            let iface = interfaces.get_mut("wan").unwrap();
            set_enabled(&mut rec, &dev, 0, &mut iface.config_ip, false);
        }
        rec.ops.clear();

        let target: IpAddr = "10.0.0.50".parse().unwrap();
        assert_eq!(
            add_target_route(&mut rec, &mut interfaces, &devices, target),
            None
        );
    }

    #[test]
    fn address_key_pairs_across_epochs() {
        // The stored key is the one captured at insert time, before the
        // broadcast derivation mutates the entry.
        let addr = v4_addr("10.0.0.1/24");
        let key = addr.key();
        let mut derived = addr.clone();
        derived.broadcast = Some("10.0.0.255".parse().unwrap());
        assert_ne!(key, derived.key());
    }
}
