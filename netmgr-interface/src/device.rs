//
// Copyright (c) The Netmgr Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use enum_as_inner::EnumAsInner;
use tracing::{debug, error, info};

use netmgr_system::System;
use netmgr_utils::southbound::{BridgeSettings, DevSettings, TunnelSettings, VlanSettings};

#[derive(Debug, EnumAsInner)]
pub enum DeviceKind {
    Simple,
    Bridge(BridgeSettings),
    Vlan(VlanSettings),
    Tunnel(TunnelSettings),
}

// A kernel network device. Created on first reference by name, destroyed
// only on explicit removal.
#[derive(Debug)]
pub struct Device {
    pub name: String,
    pub ifindex: u32,
    pub kind: DeviceKind,
    pub present: bool,
    // Managed by another daemon; observed, never reconfigured.
    pub external: bool,
    // The device has been claimed and set up in the kernel.
    pub active: bool,
    pub settings: DevSettings,
    pub orig_settings: DevSettings,
}

#[derive(Debug, Default)]
pub struct Devices(BTreeMap<String, Device>);

// ===== impl Device =====

impl Device {
    pub fn new(name: &str, kind: DeviceKind) -> Device {
        Device {
            name: name.to_owned(),
            ifindex: 0,
            kind,
            present: false,
            external: false,
            active: false,
            settings: DevSettings::default(),
            orig_settings: DevSettings::default(),
        }
    }
}

// ===== impl Devices =====

impl Devices {
    pub fn new() -> Devices {
        Default::default()
    }

    pub fn get(&self, name: &str) -> Option<&Device> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Device> {
        self.0.get_mut(name)
    }

    // Returns the device of that name, creating a plain one on first
    // reference.
    pub fn get_or_create(&mut self, name: &str) -> &mut Device {
        self.0
            .entry(name.to_owned())
            .or_insert_with(|| Device::new(name, DeviceKind::Simple))
    }

    pub fn insert(&mut self, dev: Device) {
        self.0.insert(dev.name.clone(), dev);
    }

    pub fn remove(&mut self, name: &str) -> Option<Device> {
        self.0.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.0.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.0.values_mut()
    }
}

// ===== global functions =====

// Fills in what the kernel already knows about a freshly created device.
pub fn probe(system: &System, dev: &mut Device) {
    if dev.kind.is_simple() {
        if system.if_force_external(&dev.name) {
            dev.external = true;
        }
        if let Some(ifindex) = system.if_resolve(&dev.name) {
            dev.ifindex = ifindex;
            dev.present = true;
        }
    }
}

// Claims and brings up a device: clears stale kernel state once, creates
// the virtual device if needed, pushes settings and raises IFF_UP.
pub fn bring_up(system: &mut System, dev: &mut Device) -> bool {
    if dev.external {
        dev.ifindex = system.if_resolve(&dev.name).unwrap_or(dev.ifindex);
        return true;
    }

    if !dev.active {
        if let Err(error) = system.if_clear_state(&dev.name) {
            debug!(ifname = %dev.name, %error, "claim-time cleanup failed");
        }
        dev.active = true;
    }

    match &dev.kind {
        DeviceKind::Simple => (),
        DeviceKind::Bridge(settings) => {
            if let Err(error) = system.bridge_addbr(&dev.name, settings) {
                error!(ifname = %dev.name, %error, "failed to create bridge");
                return false;
            }
            for member in &settings.members {
                if let Err(error) = system.bridge_addif(&dev.name, member) {
                    error!(ifname = %dev.name, %member, %error, "failed to add bridge member");
                }
            }
        }
        DeviceKind::Vlan(vlan) => {
            if let Err(error) = system.vlan_add(&vlan.device, vlan.vid) {
                error!(ifname = %dev.name, %error, "failed to create VLAN device");
                return false;
            }
        }
        DeviceKind::Tunnel(tunnel) => {
            if let Err(error) = system.tunnel_add(&dev.name, tunnel) {
                error!(ifname = %dev.name, %error, "failed to create tunnel device");
                return false;
            }
        }
    }

    match system.if_up(&dev.name, &mut dev.settings, &mut dev.orig_settings) {
        Ok(ifindex) => {
            dev.ifindex = ifindex;
            dev.present = true;
            if let Some(info) = system.if_link_info(&dev.name) {
                debug!(ifname = %dev.name, speed = %info.speed, full_duplex = %info.full_duplex, "link settings");
            }
            info!(ifname = %dev.name, ifindex = %dev.ifindex, "device is up");
            true
        }
        Err(error) => {
            error!(ifname = %dev.name, %error, "failed to bring device up");
            false
        }
    }
}

// Takes a device down, restoring its settings and deleting any virtual
// device created on the way up.
pub fn bring_down(system: &mut System, dev: &mut Device) {
    if dev.external || !dev.active {
        return;
    }

    if let Err(error) = system.if_down(&dev.name, &dev.settings, &mut dev.orig_settings) {
        debug!(ifname = %dev.name, %error, "failed to bring device down");
    }

    match &dev.kind {
        DeviceKind::Simple => (),
        DeviceKind::Bridge(settings) => {
            for member in &settings.members {
                if let Err(error) = system.bridge_delif(&dev.name, member) {
                    debug!(ifname = %dev.name, %member, %error, "failed to remove bridge member");
                }
            }
            let _ = system.bridge_delbr(&dev.name);
            dev.present = false;
        }
        DeviceKind::Vlan(_) => {
            let _ = system.vlan_del(&dev.name);
            dev.present = false;
        }
        DeviceKind::Tunnel(_) => {
            let _ = system.tunnel_del(&dev.name);
            dev.present = false;
        }
    }
    dev.active = false;
    info!(ifname = %dev.name, "device is down");
}

// The conventional name of a VLAN subdevice.
pub fn vlan_ifname(vlan: &VlanSettings) -> String {
    format!("{}.{}", vlan.device, vlan.vid)
}

// ===== tests =====
