//
// Copyright (c) The Netmgr Project Contributors
//
// SPDX-License-Identifier: MIT
//

// Blocking routing-netlink command socket. All requests are synchronous:
// send, wait for the kernel's ack, return its errno on failure.

use std::io;
use std::net::IpAddr;

use netlink_packet_core::{
    NLM_F_ACK, NLM_F_DUMP, NLM_F_REQUEST, NetlinkMessage, NetlinkPayload,
};
use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use netlink_packet_route::route::{
    RouteAddress, RouteAttribute, RouteFlags as RtmFlags, RouteMessage, RouteProtocol, RouteScope,
    RouteType,
};
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
use netlink_sys::Socket;
use netlink_sys::protocols::NETLINK_ROUTE;
use nix::errno::Errno;

use netmgr_utils::southbound::{DeviceAddr, DeviceRoute, RouteFlags};

use crate::{Error, Result};

const RECV_BUF_LEN: usize = 65536;

pub(crate) struct RtnlSocket {
    socket: Socket,
    seq: u32,
}

// ===== impl RtnlSocket =====

impl RtnlSocket {
    pub(crate) fn open() -> io::Result<RtnlSocket> {
        let mut socket = Socket::new(NETLINK_ROUTE)?;
        socket.bind_auto()?;
        Ok(RtnlSocket { socket, seq: 0 })
    }

    // Sends a request and blocks until the matching ack arrives.
    pub(crate) fn request(
        &mut self,
        payload: RouteNetlinkMessage,
        extra_flags: u16,
    ) -> Result<()> {
        let seq = self.send(payload, NLM_F_REQUEST | NLM_F_ACK | extra_flags)?;

        let mut buf = vec![0u8; RECV_BUF_LEN];
        loop {
            let size = self.socket.recv(&mut &mut buf[..], 0).map_err(Error::Io)?;
            let mut offset = 0;
            while offset < size {
                let reply = deserialize(&buf[offset..size])?;
                let length = reply.header.length as usize;
                if reply.header.sequence_number == seq {
                    match reply.payload {
                        NetlinkPayload::Error(err) => {
                            return match err.code {
                                None => Ok(()),
                                Some(code) => Err(Error::Kernel(Errno::from_raw(-code.get()))),
                            };
                        }
                        NetlinkPayload::Done(_) => return Ok(()),
                        _ => (),
                    }
                }
                if length == 0 {
                    break;
                }
                offset += length;
            }
        }
    }

    // Issues a dump request and collects the multipart replies.
    pub(crate) fn dump(
        &mut self,
        payload: RouteNetlinkMessage,
    ) -> Result<Vec<RouteNetlinkMessage>> {
        let seq = self.send(payload, NLM_F_REQUEST | NLM_F_DUMP)?;

        let mut entries = Vec::new();
        let mut buf = vec![0u8; RECV_BUF_LEN];
        loop {
            let size = self.socket.recv(&mut &mut buf[..], 0).map_err(Error::Io)?;
            let mut offset = 0;
            while offset < size {
                let reply = deserialize(&buf[offset..size])?;
                let length = reply.header.length as usize;
                if reply.header.sequence_number == seq {
                    match reply.payload {
                        NetlinkPayload::InnerMessage(inner) => entries.push(inner),
                        NetlinkPayload::Error(err) => {
                            return match err.code {
                                None => Ok(entries),
                                Some(code) => Err(Error::Kernel(Errno::from_raw(-code.get()))),
                            };
                        }
                        NetlinkPayload::Done(_) => return Ok(entries),
                        _ => (),
                    }
                }
                if length == 0 {
                    break;
                }
                offset += length;
            }
        }
    }

    fn send(&mut self, payload: RouteNetlinkMessage, flags: u16) -> Result<u32> {
        self.seq = self.seq.wrapping_add(1);
        let mut msg = NetlinkMessage::from(payload);
        msg.header.flags = flags;
        msg.header.sequence_number = self.seq;
        msg.finalize();
        let mut buf = vec![0u8; msg.buffer_len()];
        msg.serialize(&mut buf);
        self.socket.send(&buf, 0).map_err(Error::Io)?;
        Ok(self.seq)
    }
}

// ===== helper functions =====

fn deserialize(buf: &[u8]) -> Result<NetlinkMessage<RouteNetlinkMessage>> {
    NetlinkMessage::<RouteNetlinkMessage>::deserialize(buf)
        .map_err(|err| Error::Io(io::Error::other(err.to_string())))
}

fn nl_family(addr: &IpAddr) -> AddressFamily {
    match addr {
        IpAddr::V4(_) => AddressFamily::Inet,
        IpAddr::V6(_) => AddressFamily::Inet6,
    }
}

fn route_address(addr: &IpAddr) -> RouteAddress {
    match addr {
        IpAddr::V4(addr) => RouteAddress::Inet(*addr),
        IpAddr::V6(addr) => RouteAddress::Inet6(*addr),
    }
}

// ===== global functions =====

// RTM_NEWADDR/RTM_DELADDR body for an interface address.
pub(crate) fn addr_message(ifindex: u32, addr: &DeviceAddr) -> AddressMessage {
    let mut msg = AddressMessage::default();
    msg.header.family = nl_family(&addr.addr.ip());
    msg.header.prefix_len = addr.addr.prefix();
    msg.header.index = ifindex;
    msg.attributes.push(AddressAttribute::Local(addr.addr.ip()));
    if addr.addr.ip().is_ipv4() {
        if let Some(broadcast) = addr.broadcast {
            msg.attributes.push(AddressAttribute::Broadcast(broadcast));
        }
        if let Some(peer) = addr.peer {
            msg.attributes
                .push(AddressAttribute::Address(IpAddr::V4(peer)));
        }
    }
    msg
}

// RTM_NEWROUTE/RTM_DELROUTE body for a device route.
pub(crate) fn route_message(ifindex: u32, route: &DeviceRoute, del: bool) -> RouteMessage {
    let mut msg = RouteMessage::default();
    msg.header.address_family = nl_family(&route.prefix.ip());
    msg.header.destination_prefix_length = route.prefix.prefix();
    msg.header.table = libc::RT_TABLE_MAIN;
    msg.header.protocol = if route.flags.contains(RouteFlags::KERNEL) {
        RouteProtocol::Kernel
    } else {
        RouteProtocol::Boot
    };
    msg.header.scope = if del {
        RouteScope::NoWhere
    } else if route.has_nexthop() {
        RouteScope::Universe
    } else {
        RouteScope::Link
    };
    msg.header.kind = if del {
        RouteType::Unspec
    } else {
        RouteType::Unicast
    };

    if route.prefix.prefix() > 0 {
        msg.attributes
            .push(RouteAttribute::Destination(route_address(&route.prefix.ip())));
    }
    if route.metric > 0 {
        msg.attributes.push(RouteAttribute::Priority(route.metric));
    }
    if route.has_nexthop() {
        msg.attributes
            .push(RouteAttribute::Gateway(route_address(&route.nexthop)));
    }
    msg.attributes.push(RouteAttribute::Oif(ifindex));
    msg
}

pub(crate) fn addr_dump_request(family: AddressFamily) -> AddressMessage {
    let mut msg = AddressMessage::default();
    msg.header.family = family;
    msg
}

// Dump request covering cloned routes, which is what claim-time cleanup
// needs to sweep.
pub(crate) fn route_dump_request(family: AddressFamily) -> RouteMessage {
    let mut msg = RouteMessage::default();
    msg.header.address_family = family;
    msg.header.flags = RtmFlags::Cloned;
    msg
}

pub(crate) fn address_matches(msg: &AddressMessage, ifindex: u32) -> bool {
    msg.header.index == ifindex
}

pub(crate) fn route_matches(msg: &RouteMessage, ifindex: u32) -> bool {
    msg.attributes
        .iter()
        .any(|attr| matches!(attr, RouteAttribute::Oif(oif) if *oif == ifindex))
}

// ===== tests =====
