//
// Copyright (c) The Netmgr Project Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod events;
mod ioctl;
mod netlink;
mod sysfs;

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::os::fd::{AsFd, OwnedFd};

use netlink_packet_core::{NLM_F_CREATE, NLM_F_REPLACE};
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
use nix::errno::Errno;
use nix::sys::socket::{AddressFamily as SockFamily, SockFlag, SockType, socket};
use tracing::debug;

use netmgr_utils::ip::parse_prefix;
use netmgr_utils::southbound::{BridgeSettings, DevSettings, DeviceAddr, DeviceRoute, TunnelSettings};

pub use crate::events::{HotplugEvent, LinkEvent, LinkMonitor};
pub use crate::ioctl::{LinkInfo, link_modes};

#[derive(Debug)]
pub enum Error {
    // Errno returned by an ioctl or a netlink ack.
    Kernel(Errno),
    // Socket setup or message encoding failure.
    Io(io::Error),
    // Malformed device parameters.
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// The two process-global kernel endpoints: a datagram socket for ioctls and
// a routing netlink socket for address/route commands. Initialized once at
// daemon start; a failure here is fatal.
pub struct System {
    ioctl_fd: OwnedFd,
    rtnl: netlink::RtnlSocket,
}

// ===== impl Error =====

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Kernel(errno) => write!(f, "kernel error: {errno}"),
            Error::Io(error) => write!(f, "I/O error: {error}"),
            Error::Invalid(reason) => write!(f, "invalid parameters: {reason}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Error {
        Error::Kernel(errno)
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Error {
        Error::Io(error)
    }
}

// ===== impl System =====

impl System {
    pub fn init() -> Result<System> {
        let ioctl_fd = socket(
            SockFamily::Unix,
            SockType::Datagram,
            SockFlag::SOCK_CLOEXEC,
            None,
        )?;
        let rtnl = netlink::RtnlSocket::open()?;
        Ok(System { ioctl_fd, rtnl })
    }

    // ----- addresses and routes -----

    pub fn add_address(&mut self, ifindex: u32, addr: &DeviceAddr) -> Result<()> {
        debug!(%ifindex, addr = %addr.addr, "adding address");
        let msg = netlink::addr_message(ifindex, addr);
        self.rtnl.request(RouteNetlinkMessage::NewAddress(msg), 0)
    }

    pub fn del_address(&mut self, ifindex: u32, addr: &DeviceAddr) -> Result<()> {
        debug!(%ifindex, addr = %addr.addr, "deleting address");
        let msg = netlink::addr_message(ifindex, addr);
        self.rtnl.request(RouteNetlinkMessage::DelAddress(msg), 0)
    }

    pub fn add_route(&mut self, ifindex: u32, route: &DeviceRoute) -> Result<()> {
        debug!(%ifindex, prefix = %route.prefix, "adding route");
        let msg = netlink::route_message(ifindex, route, false);
        self.rtnl
            .request(RouteNetlinkMessage::NewRoute(msg), NLM_F_CREATE | NLM_F_REPLACE)
    }

    pub fn del_route(&mut self, ifindex: u32, route: &DeviceRoute) -> Result<()> {
        debug!(%ifindex, prefix = %route.prefix, "deleting route");
        let msg = netlink::route_message(ifindex, route, true);
        self.rtnl.request(RouteNetlinkMessage::DelRoute(msg), 0)
    }

    // ----- device control -----

    pub fn if_resolve(&self, ifname: &str) -> Option<u32> {
        ioctl::if_resolve(self.ioctl_fd.as_fd(), ifname)
    }

    // Whether a device of that name currently exists in the kernel.
    pub fn if_check(&self, ifname: &str) -> bool {
        self.if_resolve(ifname).is_some()
    }

    // Brings the device up: snapshot current settings, push the configured
    // ones, resolve the ifindex and raise IFF_UP.
    pub fn if_up(
        &self,
        ifname: &str,
        settings: &mut DevSettings,
        orig_settings: &mut DevSettings,
    ) -> Result<u32> {
        ioctl::if_get_settings(self.ioctl_fd.as_fd(), ifname, orig_settings);
        ioctl::if_apply_settings(self.ioctl_fd.as_fd(), ifname, settings);
        let ifindex = self.if_resolve(ifname).unwrap_or(0);
        ioctl::if_flags(self.ioctl_fd.as_fd(), ifname, libc::IFF_UP as libc::c_short, 0)?;
        Ok(ifindex)
    }

    // Takes the device down and restores the settings that were actually
    // changed on the way up.
    pub fn if_down(
        &self,
        ifname: &str,
        settings: &DevSettings,
        orig_settings: &mut DevSettings,
    ) -> Result<()> {
        let result = ioctl::if_flags(
            self.ioctl_fd.as_fd(),
            ifname,
            0,
            libc::IFF_UP as libc::c_short,
        );
        orig_settings.flags &= settings.flags;
        ioctl::if_apply_settings(self.ioctl_fd.as_fd(), ifname, orig_settings);
        result.map_err(Error::Kernel)
    }

    // Clears bridge membership and kernel-held addresses/routes when taking
    // over an interface.
    pub fn if_clear_state(&mut self, ifname: &str) -> Result<()> {
        let Some(ifindex) = self.if_resolve(ifname) else {
            return Ok(());
        };

        let _ = ioctl::if_flags(
            self.ioctl_fd.as_fd(),
            ifname,
            0,
            libc::IFF_UP as libc::c_short,
        );

        if sysfs::is_bridge(ifname) {
            debug!(%ifname, "deleting existing bridge");
            return self.bridge_delbr(ifname);
        }
        if let Some(bridge) = sysfs::bridge_of(ifname) {
            debug!(%ifname, %bridge, "removing device from bridge");
            let _ = ioctl::bridge_port(
                self.ioctl_fd.as_fd(),
                &bridge,
                ioctl::SIOCBRDELIF,
                ifindex,
            );
        }

        self.clear_routes(ifindex, AddressFamily::Inet);
        self.clear_addresses(ifindex, AddressFamily::Inet);
        self.clear_routes(ifindex, AddressFamily::Inet6);
        self.clear_addresses(ifindex, AddressFamily::Inet6);
        sysfs::set_disable_ipv6(ifname, false);
        Ok(())
    }

    fn clear_addresses(&mut self, ifindex: u32, family: AddressFamily) {
        let request = netlink::addr_dump_request(family);
        let replies = match self.rtnl.dump(RouteNetlinkMessage::GetAddress(request)) {
            Ok(replies) => replies,
            Err(error) => {
                debug!(%ifindex, %error, "address dump failed");
                return;
            }
        };
        for reply in replies {
            if let RouteNetlinkMessage::NewAddress(msg) = reply {
                if netlink::address_matches(&msg, ifindex) {
                    debug!(%ifindex, "removing a stale address");
                    // Re-emit the dumped entry as a delete request.
                    if let Err(error) = self.rtnl.request(RouteNetlinkMessage::DelAddress(msg), 0)
                    {
                        debug!(%ifindex, %error, "failed to remove stale address");
                    }
                }
            }
        }
    }

    fn clear_routes(&mut self, ifindex: u32, family: AddressFamily) {
        let request = netlink::route_dump_request(family);
        let replies = match self.rtnl.dump(RouteNetlinkMessage::GetRoute(request)) {
            Ok(replies) => replies,
            Err(error) => {
                debug!(%ifindex, %error, "route dump failed");
                return;
            }
        };
        for reply in replies {
            if let RouteNetlinkMessage::NewRoute(msg) = reply {
                if netlink::route_matches(&msg, ifindex) {
                    debug!(%ifindex, "removing a stale route");
                    if let Err(error) = self.rtnl.request(RouteNetlinkMessage::DelRoute(msg), 0) {
                        debug!(%ifindex, %error, "failed to remove stale route");
                    }
                }
            }
        }
    }

    // ----- bridges -----

    pub fn bridge_addbr(&self, ifname: &str, settings: &BridgeSettings) -> Result<()> {
        ioctl::bridge_create(self.ioctl_fd.as_fd(), ifname)?;

        let fd = self.ioctl_fd.as_fd();
        let _ = ioctl::bridge_option(
            fd,
            ifname,
            ioctl::BRCTL_SET_BRIDGE_STP_STATE,
            settings.stp as libc::c_ulong,
        );
        let _ = ioctl::bridge_option(
            fd,
            ifname,
            ioctl::BRCTL_SET_BRIDGE_FORWARD_DELAY,
            sec_to_centisec(settings.forward_delay),
        );
        sysfs::set_bridge_multicast_snooping(ifname, settings.igmp_snooping);
        if let Some(ageing_time) = settings.ageing_time {
            let _ = ioctl::bridge_option(
                fd,
                ifname,
                ioctl::BRCTL_SET_AGEING_TIME,
                sec_to_centisec(ageing_time),
            );
        }
        if let Some(hello_time) = settings.hello_time {
            let _ = ioctl::bridge_option(
                fd,
                ifname,
                ioctl::BRCTL_SET_BRIDGE_HELLO_TIME,
                sec_to_centisec(hello_time),
            );
        }
        if let Some(max_age) = settings.max_age {
            let _ = ioctl::bridge_option(
                fd,
                ifname,
                ioctl::BRCTL_SET_BRIDGE_MAX_AGE,
                sec_to_centisec(max_age),
            );
        }
        Ok(())
    }

    pub fn bridge_delbr(&self, ifname: &str) -> Result<()> {
        ioctl::bridge_delete(self.ioctl_fd.as_fd(), ifname).map_err(Error::Kernel)
    }

    // Adds a member port. IPv6 is disabled on member devices; re-adding a
    // device to the bridge it is already in succeeds without a kernel call.
    pub fn bridge_addif(&self, bridge: &str, member: &str) -> Result<()> {
        sysfs::set_disable_ipv6(member, true);
        if sysfs::bridge_of(member).as_deref() == Some(bridge) {
            return Ok(());
        }
        let ifindex = self.if_resolve(member).ok_or(Error::Kernel(Errno::ENODEV))?;
        ioctl::bridge_port(self.ioctl_fd.as_fd(), bridge, ioctl::SIOCBRADDIF, ifindex)
            .map_err(Error::Kernel)
    }

    pub fn bridge_delif(&self, bridge: &str, member: &str) -> Result<()> {
        sysfs::set_disable_ipv6(member, false);
        let ifindex = self.if_resolve(member).ok_or(Error::Kernel(Errno::ENODEV))?;
        ioctl::bridge_port(self.ioctl_fd.as_fd(), bridge, ioctl::SIOCBRDELIF, ifindex)
            .map_err(Error::Kernel)
    }

    // ----- VLANs -----

    pub fn vlan_add(&self, parent: &str, vid: u16) -> Result<()> {
        ioctl::vlan_add(self.ioctl_fd.as_fd(), parent, vid).map_err(Error::Kernel)
    }

    pub fn vlan_del(&self, ifname: &str) -> Result<()> {
        ioctl::vlan_del(self.ioctl_fd.as_fd(), ifname).map_err(Error::Kernel)
    }

    // ----- tunnels -----

    // Creates a SIT (6-in-4) tunnel, replacing any existing device of the
    // same name. For 6rd the deployment prefixes are configured on the new
    // device; a failure there tears the tunnel down again.
    pub fn tunnel_add(&self, ifname: &str, settings: &TunnelSettings) -> Result<()> {
        let _ = self.tunnel_del(ifname);

        let kind = settings
            .kind
            .as_deref()
            .ok_or_else(|| Error::Invalid("missing tunnel type".to_owned()))?;
        if kind != "sit" {
            return Err(Error::Invalid(format!("unsupported tunnel type: {kind}")));
        }

        let local = parse_tunnel_endpoint(settings.local.as_deref())?;
        let remote = parse_tunnel_endpoint(settings.remote.as_deref())?;
        let ttl = settings.ttl.unwrap_or(0);
        if ttl > 255 {
            return Err(Error::Invalid(format!("invalid ttl: {ttl}")));
        }

        ioctl::tunnel_add_sit(self.ioctl_fd.as_fd(), ifname, local, remote, ttl as u8)?;

        if let Some(prefix) = settings.sixrd_prefix.as_deref() {
            let Some((addr, prefixlen)) = parse_prefix(prefix, true) else {
                return Err(Error::Invalid(format!("invalid 6rd prefix: {prefix}")));
            };
            let std::net::IpAddr::V6(addr) = addr else {
                return Err(Error::Invalid(format!("invalid 6rd prefix: {prefix}")));
            };

            let relay = match settings.sixrd_relay_prefix.as_deref() {
                Some(relay_prefix) => {
                    let Some((relay, relay_prefixlen)) = parse_prefix(relay_prefix, false) else {
                        return Err(Error::Invalid(format!(
                            "invalid 6rd relay prefix: {relay_prefix}"
                        )));
                    };
                    let std::net::IpAddr::V4(relay) = relay else {
                        return Err(Error::Invalid(format!(
                            "invalid 6rd relay prefix: {relay_prefix}"
                        )));
                    };
                    Some((relay, relay_prefixlen))
                }
                None => None,
            };

            if let Err(errno) = ioctl::tunnel_add_6rd(
                self.ioctl_fd.as_fd(),
                ifname,
                addr.octets(),
                prefixlen,
                relay,
            ) {
                let _ = self.tunnel_del(ifname);
                return Err(Error::Kernel(errno));
            }
        }
        Ok(())
    }

    pub fn tunnel_del(&self, ifname: &str) -> Result<()> {
        ioctl::tunnel_del(self.ioctl_fd.as_fd(), ifname).map_err(Error::Kernel)
    }

    // ----- status queries -----

    pub fn if_carrier(&self, ifname: &str) -> Option<bool> {
        sysfs::carrier(ifname)
    }

    pub fn if_link_info(&self, ifname: &str) -> Option<LinkInfo> {
        ioctl::ethtool_link_info(self.ioctl_fd.as_fd(), ifname)
    }

    pub fn if_stats(&self, ifname: &str) -> BTreeMap<String, u64> {
        sysfs::statistics(ifname)
    }

    // A wireless device is managed by its own daemon and treated as
    // external here.
    pub fn if_force_external(&self, ifname: &str) -> bool {
        sysfs::force_external(ifname)
    }

    // Resolves the lower device, if any (VLANs, tunnels).
    pub fn if_parent(&self, ifname: &str) -> Option<String> {
        let iflink = sysfs::iflink(ifname)?;
        let ifindex = self.if_resolve(ifname)?;
        if iflink == 0 || iflink == ifindex {
            return None;
        }
        ioctl::if_indextoname(iflink)
    }

    pub fn flush_route_cache(&self) {
        sysfs::flush_route_cache();
    }
}

// ===== helper functions =====

// Bridge time parameters travel as centiseconds.
fn sec_to_centisec(seconds: u32) -> libc::c_ulong {
    libc::c_ulong::from(seconds) * 100
}

fn parse_tunnel_endpoint(addr: Option<&str>) -> Result<Ipv4Addr> {
    match addr {
        Some(addr) => addr
            .parse()
            .map_err(|_| Error::Invalid(format!("invalid tunnel endpoint: {addr}"))),
        None => Ok(Ipv4Addr::UNSPECIFIED),
    }
}

// ===== tests =====
