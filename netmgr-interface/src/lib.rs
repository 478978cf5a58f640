//
// Copyright (c) The Netmgr Project Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod config;
pub mod device;
pub mod interface;
pub mod ip;
pub mod resolv;

use std::path::PathBuf;

use futures::StreamExt;
use futures::TryStreamExt;
use netlink_packet_core::NetlinkMessage;
use netlink_packet_route::RouteNetlinkMessage;
use netlink_packet_route::link::LinkAttribute;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info};

use netmgr_system::events::{self, HotplugEvent, LinkMonitor};
use netmgr_system::System;
use netmgr_utils::southbound::{DeviceAddr, DeviceRoute};

use crate::device::Devices;
use crate::interface::{Interface, InterfaceState, Interfaces};
use crate::ip::Layer;

// The kernel operations reconciliation emits. The concrete executor
// implements this; tests substitute a recorder.
pub trait SystemOps {
    fn add_address(&mut self, ifindex: u32, addr: &DeviceAddr) -> netmgr_system::Result<()>;
    fn del_address(&mut self, ifindex: u32, addr: &DeviceAddr) -> netmgr_system::Result<()>;
    fn add_route(&mut self, ifindex: u32, route: &DeviceRoute) -> netmgr_system::Result<()>;
    fn del_route(&mut self, ifindex: u32, route: &DeviceRoute) -> netmgr_system::Result<()>;
}

impl SystemOps for System {
    fn add_address(&mut self, ifindex: u32, addr: &DeviceAddr) -> netmgr_system::Result<()> {
        System::add_address(self, ifindex, addr)
    }

    fn del_address(&mut self, ifindex: u32, addr: &DeviceAddr) -> netmgr_system::Result<()> {
        System::del_address(self, ifindex, addr)
    }

    fn add_route(&mut self, ifindex: u32, route: &DeviceRoute) -> netmgr_system::Result<()> {
        System::add_route(self, ifindex, route)
    }

    fn del_route(&mut self, ifindex: u32, route: &DeviceRoute) -> netmgr_system::Result<()> {
        System::del_route(self, ifindex, route)
    }
}

pub struct Master {
    // Kernel executor.
    pub system: System,
    // Known devices, by name.
    pub devices: Devices,
    // Configured interfaces.
    pub interfaces: Interfaces,
    // Resolver file location.
    pub resolv_conf: PathBuf,
}

// ===== impl Master =====

impl Master {
    pub fn new(system: System, resolv_conf: PathBuf) -> Master {
        Master {
            system,
            devices: Devices::new(),
            interfaces: Interfaces::new(),
            resolv_conf,
        }
    }

    // Brings up every interface whose device is already present and writes
    // the initial resolver state.
    pub fn start(&mut self) {
        let names: Vec<String> = self
            .interfaces
            .iter()
            .map(|iface| iface.name.clone())
            .collect();
        for name in names {
            self.setup_by_name(&name);
        }
        resolv::write_resolv_conf(&self.resolv_conf, &self.interfaces);
    }

    // Brings one interface up and lets the static proto populate its
    // settings.
    fn setup_by_name(&mut self, name: &str) {
        let Master {
            system,
            devices,
            interfaces,
            ..
        } = self;
        let Some(iface) = interfaces.get_mut(name) else {
            return;
        };
        if iface.state == InterfaceState::Up {
            return;
        }
        setup_interface(system, devices, iface);
        if interfaces
            .get(name)
            .is_some_and(|iface| iface.state == InterfaceState::Up)
        {
            config::apply_static(system, devices, interfaces, name);
        }
    }

    fn disable_by_name(&mut self, name: &str) {
        let Master {
            system,
            devices,
            interfaces,
            ..
        } = self;
        let Some(iface) = interfaces.get_mut(name) else {
            return;
        };
        if iface.state == InterfaceState::Down {
            return;
        }
        disable_interface(system, devices, iface);
    }

    // Primes device state from a kernel link dump.
    pub async fn fetch_links(&mut self, handle: &rtnetlink::Handle) {
        let mut links = handle.link().get().execute();
        loop {
            match links.try_next().await {
                Ok(Some(msg)) => {
                    let ifindex = msg.header.index;
                    let ifname = msg.attributes.iter().find_map(|attr| match attr {
                        LinkAttribute::IfName(ifname) => Some(ifname.clone()),
                        _ => None,
                    });
                    let Some(ifname) = ifname else { continue };
                    if let Some(dev) = self.devices.get_mut(&ifname) {
                        dev.ifindex = ifindex;
                        if dev.kind.is_simple() {
                            dev.present = true;
                        }
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    error!(%error, "failed to fetch link information");
                    break;
                }
            }
        }
    }

    // Main loop: kernel link events, hotplug events, shutdown signals.
    pub async fn run(
        &mut self,
        mut link_rx: LinkMonitor,
        mut hotplug_rx: UnboundedReceiver<HotplugEvent>,
    ) {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(error) => {
                error!(%error, "failed to register the SIGTERM handler");
                return;
            }
        };

        loop {
            tokio::select! {
                Some((msg, _)) = link_rx.next() => {
                    self.process_link_msg(msg);
                }
                Some(event) = hotplug_rx.recv() => {
                    self.process_hotplug(event);
                }
                _ = tokio::signal::ctrl_c() => {
                    break;
                }
                _ = sigterm.recv() => {
                    break;
                }
            }
        }
        info!("shutting down");
        self.shutdown();
    }

    // Tears every interface down, restores device settings and drops the
    // kernel route cache.
    pub fn shutdown(&mut self) {
        let Master {
            system,
            devices,
            interfaces,
            ..
        } = self;
        interfaces.flush_all(|_, iface_old| {
            if let Some(mut iface) = iface_old {
                let Some(dev) = devices.get(&iface.device) else {
                    return;
                };
                ip::flush(&mut *system, dev, &mut iface, Layer::Proto);
                ip::flush(&mut *system, dev, &mut iface, Layer::Config);
            }
        });
        for dev in devices.iter_mut() {
            device::bring_down(system, dev);
        }
        system.flush_route_cache();
        resolv::write_resolv_conf(&self.resolv_conf, &self.interfaces);
    }

    // Link events update the ifindex of known devices; nothing is
    // auto-created here.
    fn process_link_msg(&mut self, msg: NetlinkMessage<RouteNetlinkMessage>) {
        let Some(event) = events::parse_link_event(msg) else {
            return;
        };
        let Some(dev) = self.devices.get_mut(&event.ifname) else {
            return;
        };
        debug!(ifname = %event.ifname, ifindex = %event.ifindex, "link event");
        dev.ifindex = event.ifindex;
    }

    // Hotplug toggles presence of plain hardware devices and drives the
    // interfaces bound to them.
    fn process_hotplug(&mut self, event: HotplugEvent) {
        {
            let Some(dev) = self.devices.get_mut(&event.ifname) else {
                return;
            };
            if !dev.kind.is_simple() || dev.present == event.add {
                return;
            }
            dev.present = event.add;
        }
        info!(ifname = %event.ifname, present = %event.add, "device presence changed");

        let names: Vec<String> = self
            .interfaces
            .iter()
            .filter(|iface| iface.device == event.ifname)
            .map(|iface| iface.name.clone())
            .collect();
        for name in names {
            if event.add {
                self.setup_by_name(&name);
            } else {
                self.disable_by_name(&name);
            }
        }
        resolv::write_resolv_conf(&self.resolv_conf, &self.interfaces);
    }
}

// ===== helper functions =====

// Claims the device, brings it up and enables both settings layers.
fn setup_interface(system: &mut System, devices: &mut Devices, iface: &mut Interface) {
    let Some(dev) = devices.get_mut(&iface.device) else {
        debug!(name = %iface.name, device = %iface.device, "interface has no device");
        return;
    };
    if !dev.present {
        return;
    }
    if !device::bring_up(system, dev) {
        return;
    }
    iface.state = InterfaceState::Up;
    ip::set_enabled(system, dev, iface.metric, &mut iface.config_ip, true);
    ip::set_enabled(system, dev, iface.metric, &mut iface.proto_ip, true);
    info!(name = %iface.name, "interface is up");
}

// The device disappeared: both layers go inactive, desired state stays.
fn disable_interface(system: &mut System, devices: &Devices, iface: &mut Interface) {
    iface.state = InterfaceState::Down;
    let Some(dev) = devices.get(&iface.device) else {
        return;
    };
    ip::set_enabled(system, dev, iface.metric, &mut iface.config_ip, false);
    ip::set_enabled(system, dev, iface.metric, &mut iface.proto_ip, false);
    info!(name = %iface.name, "interface is down");
}

// ===== test plumbing =====
