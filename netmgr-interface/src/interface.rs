//
// Copyright (c) The Netmgr Project Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::debug;

use netmgr_utils::southbound::DeviceRoute;
use netmgr_utils::vset::{SetEntry, VSet};

use crate::config::StaticSettings;
use crate::ip::{IpSettings, Layer};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InterfaceState {
    Down,
    Up,
}

// A logical interface: a name bound to an L3 device, carrying two IP
// settings layers and the host routes resolved on its behalf.
#[derive(Debug)]
pub struct Interface {
    pub name: String,
    // Name of the L3 device.
    pub device: String,
    pub state: InterfaceState,
    pub metric: u32,
    // Populated by the active protocol handler.
    pub proto_ip: IpSettings,
    // Populated by static user configuration.
    pub config_ip: IpSettings,
    pub host_routes: VSet<DeviceRoute>,
    // What the static proto applies when the interface comes up.
    pub static_cfg: StaticSettings,
}

// The process-wide interface mapping, ordered by name.
#[derive(Debug, Default)]
pub struct Interfaces(VSet<Interface>);

// ===== impl Interface =====

impl Interface {
    pub fn new(name: &str, device: &str, metric: u32) -> Interface {
        // Both layers stay inactive until the interface comes up.
        let mut proto_ip = IpSettings::default();
        proto_ip.enabled = false;
        let mut config_ip = IpSettings::default();
        config_ip.enabled = false;

        Interface {
            name: name.to_owned(),
            device: device.to_owned(),
            state: InterfaceState::Down,
            metric,
            proto_ip,
            config_ip,
            host_routes: VSet::new(),
            static_cfg: StaticSettings::default(),
        }
    }

    pub fn layer(&self, layer: Layer) -> &IpSettings {
        match layer {
            Layer::Proto => &self.proto_ip,
            Layer::Config => &self.config_ip,
        }
    }

    pub fn layer_mut(&mut self, layer: Layer) -> &mut IpSettings {
        match layer {
            Layer::Proto => &mut self.proto_ip,
            Layer::Config => &mut self.config_ip,
        }
    }

    pub fn has_dns(&self) -> bool {
        !self.proto_ip.dns_servers.is_empty()
            || !self.proto_ip.dns_search.is_empty()
            || !self.config_ip.dns_servers.is_empty()
            || !self.config_ip.dns_search.is_empty()
    }
}

impl SetEntry for Interface {
    type Key = String;

    fn key(&self) -> String {
        self.name.clone()
    }
}

// ===== impl Interfaces =====

impl Interfaces {
    pub fn new() -> Interfaces {
        Default::default()
    }

    pub fn add(&mut self, iface: Interface) {
        self.0.add(iface, |new, old| {
            if let (Some(new), Some(_)) = (new, old) {
                debug!(name = %new.name, "replaced existing interface");
            }
        });
    }

    pub fn get(&self, name: &str) -> Option<&Interface> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Interface> {
        self.0.get_mut(name)
    }

    // Visits all interfaces, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Interface> {
        self.0.iter_mut()
    }

    // Tears the whole mapping down, synthesizing a removal per interface.
    pub fn flush_all<F>(&mut self, cb: F)
    where
        F: FnMut(Option<&mut Interface>, Option<Interface>),
    {
        self.0.flush_all(cb);
    }
}
