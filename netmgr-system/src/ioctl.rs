//
// Copyright (c) The Netmgr Project Contributors
//
// SPDX-License-Identifier: MIT
//

// ifreq-based kernel driver. The ABI structures and the sockios/if_vlan/
// if_bridge/if_tunnel request numbers the kernel headers would provide are
// declared locally; their layouts are pinned by the tests at the bottom.

use std::ffi::CString;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, BorrowedFd};

use nix::errno::Errno;

use netmgr_utils::southbound::{DevSettings, DeviceOptions};

pub(crate) const IFNAMSIZ: usize = 16;

// linux/sockios.h
const SIOCGIFFLAGS: libc::c_ulong = 0x8913;
const SIOCSIFFLAGS: libc::c_ulong = 0x8914;
const SIOCGIFMTU: libc::c_ulong = 0x8921;
const SIOCSIFMTU: libc::c_ulong = 0x8922;
const SIOCSIFHWADDR: libc::c_ulong = 0x8924;
const SIOCGIFHWADDR: libc::c_ulong = 0x8927;
const SIOCGIFINDEX: libc::c_ulong = 0x8933;
const SIOCGIFTXQLEN: libc::c_ulong = 0x8942;
const SIOCSIFTXQLEN: libc::c_ulong = 0x8943;
const SIOCETHTOOL: libc::c_ulong = 0x8946;
const SIOCSIFVLAN: libc::c_ulong = 0x8983;
const SIOCBRADDBR: libc::c_ulong = 0x89a0;
const SIOCBRDELBR: libc::c_ulong = 0x89a1;
pub(crate) const SIOCBRADDIF: libc::c_ulong = 0x89a2;
pub(crate) const SIOCBRDELIF: libc::c_ulong = 0x89a3;
const SIOCDEVPRIVATE: libc::c_ulong = 0x89f0;

// linux/if_tunnel.h
const SIOCADDTUNNEL: libc::c_ulong = SIOCDEVPRIVATE + 1;
const SIOCDELTUNNEL: libc::c_ulong = SIOCDEVPRIVATE + 2;
const SIOCADD6RD: libc::c_ulong = SIOCDEVPRIVATE + 9;

// linux/if_bridge.h
pub(crate) const BRCTL_SET_BRIDGE_FORWARD_DELAY: libc::c_ulong = 8;
pub(crate) const BRCTL_SET_BRIDGE_HELLO_TIME: libc::c_ulong = 9;
pub(crate) const BRCTL_SET_BRIDGE_MAX_AGE: libc::c_ulong = 10;
pub(crate) const BRCTL_SET_AGEING_TIME: libc::c_ulong = 11;
pub(crate) const BRCTL_SET_BRIDGE_STP_STATE: libc::c_ulong = 14;

// linux/if_vlan.h
const ADD_VLAN_CMD: libc::c_int = 0;
const DEL_VLAN_CMD: libc::c_int = 1;
const SET_VLAN_NAME_TYPE_CMD: libc::c_int = 6;
const VLAN_NAME_TYPE_RAW_PLUS_VID_NO_PAD: libc::c_uint = 3;

// linux/ethtool.h
const ETHTOOL_GSET: u32 = 0x01;
const DUPLEX_FULL: u8 = 1;

const IP_DF: u16 = 0x4000;

// Link modes, assuming advertised == supported.
const ETHTOOL_LINK_MODES: [(u32, &str); 6] = [
    (1 << 0, "10H"),
    (1 << 1, "10F"),
    (1 << 2, "100H"),
    (1 << 3, "100F"),
    (1 << 4, "1000H"),
    (1 << 5, "1000F"),
];

#[repr(C)]
#[allow(dead_code)]
union IfrData {
    flags: libc::c_short,
    ivalue: libc::c_int,
    data: *mut libc::c_void,
    hwaddr: libc::sockaddr,
    // struct ifreq's union is 24 bytes (struct ifmap).
    pad: [u8; 24],
}

#[repr(C)]
struct IfReq {
    name: [libc::c_char; IFNAMSIZ],
    data: IfrData,
}

#[repr(C)]
#[allow(dead_code)]
union VlanData {
    device2: [libc::c_char; 24],
    vid: libc::c_int,
    name_type: libc::c_uint,
}

#[repr(C)]
struct VlanIoctlArgs {
    cmd: libc::c_int,
    device1: [libc::c_char; 24],
    u: VlanData,
    vlan_qos: libc::c_short,
}

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct IpHdr {
    version_ihl: u8,
    tos: u8,
    tot_len: u16,
    id: u16,
    frag_off: u16,
    ttl: u8,
    protocol: u8,
    check: u16,
    saddr: u32,
    daddr: u32,
}

#[repr(C)]
#[allow(dead_code)]
struct IpTunnelParm {
    name: [libc::c_char; IFNAMSIZ],
    link: libc::c_int,
    i_flags: u16,
    o_flags: u16,
    i_key: u32,
    o_key: u32,
    iph: IpHdr,
}

#[repr(C)]
#[allow(dead_code)]
struct IpTunnel6rd {
    prefix: [u8; 16],
    relay_prefix: u32,
    prefixlen: u16,
    relay_prefixlen: u16,
}

#[repr(C)]
#[allow(dead_code)]
struct EthtoolCmd {
    cmd: u32,
    supported: u32,
    advertising: u32,
    speed: u16,
    duplex: u8,
    port: u8,
    phy_address: u8,
    transceiver: u8,
    autoneg: u8,
    mdio_support: u8,
    maxtxpkt: u32,
    maxrxpkt: u32,
    speed_hi: u16,
    eth_tp_mdix: u8,
    eth_tp_mdix_ctrl: u8,
    lp_advertising: u32,
    reserved: [u32; 2],
}

// Ethtool link state of a device.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkInfo {
    pub speed: u32,
    pub full_duplex: bool,
    pub supported: u32,
    pub advertising: u32,
}

// ===== impl IfReq =====

impl IfReq {
    fn new(ifname: &str) -> IfReq {
        let mut ifr: IfReq = unsafe { std::mem::zeroed() };
        copy_ifname(&mut ifr.name, ifname);
        ifr
    }
}

// ===== helper functions =====

fn copy_ifname(dst: &mut [libc::c_char], ifname: &str) {
    for (dst, src) in dst.iter_mut().zip(ifname.bytes().take(IFNAMSIZ - 1)) {
        *dst = src as libc::c_char;
    }
}

fn ioctl<T>(fd: BorrowedFd<'_>, request: libc::c_ulong, arg: *mut T) -> Result<(), Errno> {
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), request, arg) };
    if ret < 0 { Err(Errno::last()) } else { Ok(()) }
}

fn vlan_args(cmd: libc::c_int, device1: &str) -> VlanIoctlArgs {
    let mut args: VlanIoctlArgs = unsafe { std::mem::zeroed() };
    args.cmd = cmd;
    copy_ifname(&mut args.device1[..IFNAMSIZ], device1);
    args
}

fn tunnel_parm(name: &str) -> IpTunnelParm {
    let mut parm: IpTunnelParm = unsafe { std::mem::zeroed() };
    copy_ifname(&mut parm.name, name);
    parm.iph.version_ihl = 0x45;
    parm.iph.frag_off = IP_DF.to_be();
    parm
}

fn tunnel_ioctl<T>(
    fd: BorrowedFd<'_>,
    ifname: &str,
    request: libc::c_ulong,
    parm: *mut T,
) -> Result<(), Errno> {
    let mut ifr = IfReq::new(ifname);
    ifr.data.data = parm as *mut libc::c_void;
    ioctl(fd, request, &mut ifr)
}

// ===== global functions =====

pub(crate) fn if_resolve(fd: BorrowedFd<'_>, ifname: &str) -> Option<u32> {
    let mut ifr = IfReq::new(ifname);
    ioctl(fd, SIOCGIFINDEX, &mut ifr).ok()?;
    let ifindex = unsafe { ifr.data.ivalue };
    (ifindex > 0).then_some(ifindex as u32)
}

pub(crate) fn if_indextoname(ifindex: u32) -> Option<String> {
    let mut buf = [0u8; IFNAMSIZ];
    let name = unsafe { libc::if_indextoname(ifindex, buf.as_mut_ptr() as *mut libc::c_char) };
    if name.is_null() {
        return None;
    }
    let len = buf.iter().position(|byte| *byte == 0)?;
    String::from_utf8(buf[..len].to_vec()).ok()
}

pub(crate) fn if_flags(
    fd: BorrowedFd<'_>,
    ifname: &str,
    set: libc::c_short,
    clear: libc::c_short,
) -> Result<(), Errno> {
    let mut ifr = IfReq::new(ifname);
    ioctl(fd, SIOCGIFFLAGS, &mut ifr)?;
    unsafe {
        ifr.data.flags |= set;
        ifr.data.flags &= !clear;
    }
    ioctl(fd, SIOCSIFFLAGS, &mut ifr)
}

// Snapshots the device's current hardware settings.
pub(crate) fn if_get_settings(fd: BorrowedFd<'_>, ifname: &str, settings: &mut DevSettings) {
    let mut ifr = IfReq::new(ifname);
    if ioctl(fd, SIOCGIFMTU, &mut ifr).is_ok() {
        settings.mtu = unsafe { ifr.data.ivalue } as u32;
        settings.flags |= DeviceOptions::MTU;
    }
    if ioctl(fd, SIOCGIFTXQLEN, &mut ifr).is_ok() {
        settings.txqueuelen = unsafe { ifr.data.ivalue } as u32;
        settings.flags |= DeviceOptions::TXQUEUELEN;
    }
    if ioctl(fd, SIOCGIFHWADDR, &mut ifr).is_ok() {
        let mut macaddr = [0u8; 6];
        let sa_data = unsafe { ifr.data.hwaddr.sa_data };
        for (dst, src) in macaddr.iter_mut().zip(sa_data.iter()) {
            *dst = *src as u8;
        }
        settings.macaddr = macaddr.into();
        settings.flags |= DeviceOptions::MACADDR;
    }
}

// Pushes configured settings, clearing the corresponding flag on failure so
// teardown won't attempt to restore a value that was never applied.
pub(crate) fn if_apply_settings(fd: BorrowedFd<'_>, ifname: &str, settings: &mut DevSettings) {
    if settings.flags.contains(DeviceOptions::MTU) {
        let mut ifr = IfReq::new(ifname);
        ifr.data.ivalue = settings.mtu as libc::c_int;
        if ioctl(fd, SIOCSIFMTU, &mut ifr).is_err() {
            settings.flags.remove(DeviceOptions::MTU);
        }
    }
    if settings.flags.contains(DeviceOptions::TXQUEUELEN) {
        let mut ifr = IfReq::new(ifname);
        ifr.data.ivalue = settings.txqueuelen as libc::c_int;
        if ioctl(fd, SIOCSIFTXQLEN, &mut ifr).is_err() {
            settings.flags.remove(DeviceOptions::TXQUEUELEN);
        }
    }
    if settings.flags.contains(DeviceOptions::MACADDR) {
        let mut ifr = IfReq::new(ifname);
        let mut hwaddr: libc::sockaddr = unsafe { std::mem::zeroed() };
        hwaddr.sa_family = libc::ARPHRD_ETHER;
        for (dst, src) in hwaddr
            .sa_data
            .iter_mut()
            .zip(settings.macaddr.as_bytes().iter())
        {
            *dst = *src as libc::c_char;
        }
        ifr.data.hwaddr = hwaddr;
        if ioctl(fd, SIOCSIFHWADDR, &mut ifr).is_err() {
            settings.flags.remove(DeviceOptions::MACADDR);
        }
    }
}

pub(crate) fn bridge_create(fd: BorrowedFd<'_>, name: &str) -> Result<(), Errno> {
    let name = CString::new(name).map_err(|_| Errno::EINVAL)?;
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), SIOCBRADDBR, name.as_ptr()) };
    if ret < 0 { Err(Errno::last()) } else { Ok(()) }
}

pub(crate) fn bridge_delete(fd: BorrowedFd<'_>, name: &str) -> Result<(), Errno> {
    let name = CString::new(name).map_err(|_| Errno::EINVAL)?;
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), SIOCBRDELBR, name.as_ptr()) };
    if ret < 0 { Err(Errno::last()) } else { Ok(()) }
}

// Adds or removes a member port, identified by ifindex.
pub(crate) fn bridge_port(
    fd: BorrowedFd<'_>,
    bridge: &str,
    request: libc::c_ulong,
    ifindex: u32,
) -> Result<(), Errno> {
    let mut ifr = IfReq::new(bridge);
    ifr.data.ivalue = ifindex as libc::c_int;
    ioctl(fd, request, &mut ifr)
}

// Per-bridge option via the BRCTL SIOCDEVPRIVATE interface.
pub(crate) fn bridge_option(
    fd: BorrowedFd<'_>,
    bridge: &str,
    opcode: libc::c_ulong,
    value: libc::c_ulong,
) -> Result<(), Errno> {
    let mut args: [libc::c_ulong; 4] = [opcode, value, 0, 0];
    let mut ifr = IfReq::new(bridge);
    ifr.data.data = args.as_mut_ptr() as *mut libc::c_void;
    ioctl(fd, SIOCDEVPRIVATE, &mut ifr)
}

fn vlan_set_name_type(fd: BorrowedFd<'_>) {
    let mut args = vlan_args(SET_VLAN_NAME_TYPE_CMD, "");
    args.u.name_type = VLAN_NAME_TYPE_RAW_PLUS_VID_NO_PAD;
    let _ = ioctl(fd, SIOCSIFVLAN, &mut args);
}

pub(crate) fn vlan_add(fd: BorrowedFd<'_>, parent: &str, vid: u16) -> Result<(), Errno> {
    vlan_set_name_type(fd);
    let mut args = vlan_args(ADD_VLAN_CMD, parent);
    args.u.vid = libc::c_int::from(vid);
    ioctl(fd, SIOCSIFVLAN, &mut args)
}

pub(crate) fn vlan_del(fd: BorrowedFd<'_>, ifname: &str) -> Result<(), Errno> {
    vlan_set_name_type(fd);
    let mut args = vlan_args(DEL_VLAN_CMD, ifname);
    args.u.vid = 0;
    ioctl(fd, SIOCSIFVLAN, &mut args)
}

// Creates a SIT tunnel device on top of the base `sit0` device.
pub(crate) fn tunnel_add_sit(
    fd: BorrowedFd<'_>,
    name: &str,
    local: Ipv4Addr,
    remote: Ipv4Addr,
    ttl: u8,
) -> Result<(), Errno> {
    let mut parm = tunnel_parm(name);
    parm.iph.protocol = libc::IPPROTO_IPV6 as u8;
    parm.iph.saddr = u32::from(local).to_be();
    parm.iph.daddr = u32::from(remote).to_be();
    parm.iph.ttl = ttl;
    tunnel_ioctl(fd, "sit0", SIOCADDTUNNEL, &mut parm)
}

pub(crate) fn tunnel_del(fd: BorrowedFd<'_>, name: &str) -> Result<(), Errno> {
    let mut parm = tunnel_parm(name);
    tunnel_ioctl(fd, name, SIOCDELTUNNEL, &mut parm)
}

pub(crate) fn tunnel_add_6rd(
    fd: BorrowedFd<'_>,
    name: &str,
    prefix: [u8; 16],
    prefixlen: u8,
    relay: Option<(Ipv4Addr, u8)>,
) -> Result<(), Errno> {
    let mut parm: IpTunnel6rd = unsafe { std::mem::zeroed() };
    parm.prefix = prefix;
    parm.prefixlen = u16::from(prefixlen);
    if let Some((relay_prefix, relay_prefixlen)) = relay {
        parm.relay_prefix = u32::from(relay_prefix).to_be();
        parm.relay_prefixlen = u16::from(relay_prefixlen);
    }
    tunnel_ioctl(fd, name, SIOCADD6RD, &mut parm)
}

pub(crate) fn ethtool_link_info(fd: BorrowedFd<'_>, ifname: &str) -> Option<LinkInfo> {
    let mut ecmd: EthtoolCmd = unsafe { std::mem::zeroed() };
    ecmd.cmd = ETHTOOL_GSET;
    let mut ifr = IfReq::new(ifname);
    ifr.data.data = &mut ecmd as *mut EthtoolCmd as *mut libc::c_void;
    ioctl(fd, SIOCETHTOOL, &mut ifr).ok()?;
    Some(LinkInfo {
        speed: u32::from(ecmd.speed) | (u32::from(ecmd.speed_hi) << 16),
        full_duplex: ecmd.duplex == DUPLEX_FULL,
        supported: ecmd.supported,
        advertising: ecmd.advertising,
    })
}

// Decodes an ethtool mode mask into the usual short notation.
pub fn link_modes(mask: u32) -> Vec<&'static str> {
    ETHTOOL_LINK_MODES
        .iter()
        .filter(|(bit, _)| mask & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use std::mem::size_of;

    use super::*;

    // The kernel ABI structure layouts the driver depends on.
    #[test]
    fn abi_struct_layouts() {
        assert_eq!(size_of::<IfReq>(), 40);
        assert_eq!(size_of::<IpHdr>(), 20);
        assert_eq!(size_of::<IpTunnelParm>(), 52);
        assert_eq!(size_of::<IpTunnel6rd>(), 24);
        assert_eq!(size_of::<VlanIoctlArgs>(), 56);
        assert_eq!(size_of::<EthtoolCmd>(), 44);
    }

    #[test]
    fn ifname_is_nul_terminated() {
        let ifr = IfReq::new("a-very-long-interface-name");
        assert_eq!(ifr.name[IFNAMSIZ - 1], 0);
    }

    #[test]
    fn tunnel_parm_defaults() {
        let parm = tunnel_parm("6rd");
        assert_eq!(parm.iph.version_ihl, 0x45);
        assert_eq!(u16::from_be(parm.iph.frag_off), IP_DF);
        assert_eq!(parm.iph.ttl, 0);
    }

    #[test]
    fn link_mode_names() {
        assert_eq!(link_modes(0), Vec::<&str>::new());
        assert_eq!(link_modes(0x0c), vec!["100H", "100F"]);
        assert_eq!(link_modes(1 << 5), vec!["1000F"]);
    }
}
