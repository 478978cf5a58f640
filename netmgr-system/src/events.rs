//
// Copyright (c) The Netmgr Project Contributors
//
// SPDX-License-Identifier: MIT
//

// Kernel event sources: the routing-netlink link monitor and the
// NETLINK_KOBJECT_UEVENT hotplug listener.

use std::io;

use futures::channel::mpsc::UnboundedReceiver;
use netlink_packet_core::{NetlinkMessage, NetlinkPayload};
use netlink_packet_route::RouteNetlinkMessage;
use netlink_packet_route::link::LinkAttribute;
use netlink_sys::protocols::NETLINK_KOBJECT_UEVENT;
use netlink_sys::{AsyncSocket, Socket, SocketAddr};
use rtnetlink::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace};

// rtnetlink multicast group carrying RTM_NEWLINK/RTM_DELLINK.
const RTNLGRP_LINK: u32 = 1;

const UEVENT_BUF_LEN: usize = 4096;

pub type LinkMonitor = UnboundedReceiver<(NetlinkMessage<RouteNetlinkMessage>, SocketAddr)>;

// A link event distilled from RTM_NEWLINK/RTM_DELLINK.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LinkEvent {
    pub ifname: String,
    pub ifindex: u32,
    pub new: bool,
}

// A `net` subsystem hotplug event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HotplugEvent {
    pub ifname: String,
    pub add: bool,
}

// ===== global functions =====

// Opens the netlink connections: one for requests (link dumps), one joined
// to the link multicast group for events.
pub fn link_monitor() -> io::Result<(Handle, LinkMonitor)> {
    let (conn, handle, _) = rtnetlink::new_connection()?;
    tokio::spawn(conn);

    let (mut conn, _, monitor) = rtnetlink::new_connection()?;
    let groups = 1 << (RTNLGRP_LINK - 1);
    let addr = SocketAddr::new(0, groups);
    conn.socket_mut().socket_mut().bind(&addr)?;
    tokio::spawn(conn);

    Ok((handle, monitor))
}

// Extracts the attributes of interest from a link message. Messages without
// an interface name are ignored.
pub fn parse_link_event(msg: NetlinkMessage<RouteNetlinkMessage>) -> Option<LinkEvent> {
    let NetlinkPayload::InnerMessage(msg) = msg.payload else {
        return None;
    };
    let (link, new) = match msg {
        RouteNetlinkMessage::NewLink(link) => (link, true),
        RouteNetlinkMessage::DelLink(link) => (link, false),
        _ => return None,
    };
    trace!(ifindex = %link.header.index, %new, "received link message");

    let ifindex = link.header.index;
    let ifname = link.attributes.into_iter().find_map(|attr| match attr {
        LinkAttribute::IfName(ifname) => Some(ifname),
        _ => None,
    })?;
    Some(LinkEvent { ifname, ifindex, new })
}

// Binds the uevent socket and drains it on a dedicated thread. Only
// kernel-originated messages (port id 0) are accepted.
pub fn hotplug_listener() -> io::Result<mpsc::UnboundedReceiver<HotplugEvent>> {
    let mut socket = Socket::new(NETLINK_KOBJECT_UEVENT)?;
    socket.bind(&SocketAddr::new(std::process::id(), 1))?;

    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let mut buf = vec![0u8; UEVENT_BUF_LEN];
        loop {
            let (size, addr) = match socket.recv_from(&mut &mut buf[..], 0) {
                Ok(reply) => reply,
                Err(error) => {
                    debug!(%error, "uevent receive failed");
                    break;
                }
            };
            if addr.port_number() != 0 {
                continue;
            }
            if let Some(event) = parse_hotplug(&buf[..size]) {
                if tx.send(event).is_err() {
                    break;
                }
            }
        }
    });
    Ok(rx)
}

// Parses the NUL-separated KEY=VALUE stream behind an `add@`/`remove@`
// header. Foreign subsystems are dropped as soon as they identify
// themselves.
pub fn parse_hotplug(data: &[u8]) -> Option<HotplugEvent> {
    let mut parts = data.split(|byte| *byte == 0);
    let header = std::str::from_utf8(parts.next()?).ok()?;
    let add = if header.starts_with("add@") {
        true
    } else if header.starts_with("remove@") {
        false
    } else {
        return None;
    };

    let mut subsystem = false;
    let mut interface = None;
    for part in parts {
        let Ok(part) = std::str::from_utf8(part) else {
            continue;
        };
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key {
            "SUBSYSTEM" => {
                if value != "net" {
                    return None;
                }
                subsystem = true;
            }
            "INTERFACE" => interface = Some(value.to_owned()),
            _ => (),
        }
        if subsystem && interface.is_some() {
            break;
        }
    }
    if !subsystem {
        return None;
    }
    interface.map(|ifname| HotplugEvent { ifname, add })
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use netlink_packet_core::NetlinkHeader;
    use netlink_packet_route::link::LinkMessage;

    use super::*;

    #[test]
    fn parse_hotplug_add() {
        let data = b"add@/class/net/eth0\0ACTION=add\0SUBSYSTEM=net\0INTERFACE=eth0\0";
        assert_eq!(
            parse_hotplug(data),
            Some(HotplugEvent {
                ifname: "eth0".to_owned(),
                add: true,
            })
        );
    }

    #[test]
    fn parse_hotplug_remove() {
        let data = b"remove@/class/net/eth0\0SUBSYSTEM=net\0INTERFACE=eth0\0";
        assert_eq!(
            parse_hotplug(data),
            Some(HotplugEvent {
                ifname: "eth0".to_owned(),
                add: false,
            })
        );
    }

    #[test]
    fn parse_hotplug_rejects_foreign_subsystem() {
        let data = b"add@/devices/usb1\0SUBSYSTEM=usb\0INTERFACE=eth0\0";
        assert_eq!(parse_hotplug(data), None);
    }

    #[test]
    fn parse_hotplug_requires_interface_and_subsystem() {
        assert_eq!(parse_hotplug(b"add@/class/net/eth0\0SUBSYSTEM=net\0"), None);
        assert_eq!(parse_hotplug(b"add@/class/net/eth0\0INTERFACE=eth0\0"), None);
        assert_eq!(parse_hotplug(b"bind@/class/net/eth0\0SUBSYSTEM=net\0INTERFACE=eth0\0"), None);
    }

    #[test]
    fn parse_link_event_requires_ifname() {
        let mut link = LinkMessage::default();
        link.header.index = 4;
        let msg = NetlinkMessage::new(
            NetlinkHeader::default(),
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewLink(link)),
        );
        assert_eq!(parse_link_event(msg), None);

        let mut link = LinkMessage::default();
        link.header.index = 4;
        link.attributes
            .push(LinkAttribute::IfName("eth0".to_owned()));
        let msg = NetlinkMessage::new(
            NetlinkHeader::default(),
            NetlinkPayload::InnerMessage(RouteNetlinkMessage::DelLink(link)),
        );
        assert_eq!(
            parse_link_event(msg),
            Some(LinkEvent {
                ifname: "eth0".to_owned(),
                ifindex: 4,
                new: false,
            })
        );
    }
}
