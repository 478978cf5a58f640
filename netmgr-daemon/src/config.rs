//
// Copyright (c) The Netmgr Project Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::Deserialize;
use tracing::debug;

use netmgr_interface::Master;
use netmgr_interface::config::{RouteSpec, StaticSettings, add_route};
use netmgr_interface::device::{self, Device, DeviceKind};
use netmgr_interface::interface::Interface;
use netmgr_utils::mac_addr::MacAddr;
use netmgr_utils::southbound::{
    BridgeSettings, DeviceOptions, TunnelSettings, VlanSettings,
};

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub resolv_conf: String,
    pub logging: Logging,
    #[serde(rename = "device")]
    pub devices: Vec<DeviceCfg>,
    #[serde(rename = "interface")]
    pub interfaces: Vec<InterfaceCfg>,
    #[serde(rename = "route")]
    pub routes: Vec<RouteSpec>,
    #[serde(rename = "route6")]
    pub routes6: Vec<RouteSpec>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub stdout: LoggingStdout,
    pub file: LoggingFile,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingStdout {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingFile {
    pub enabled: bool,
    pub dir: String,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceCfg {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DeviceCfgKind,
    pub bridge: Option<BridgeSettings>,
    pub vlan: Option<VlanSettings>,
    pub tunnel: Option<TunnelSettings>,
    pub mtu: Option<u32>,
    pub txqueuelen: Option<u32>,
    pub macaddr: Option<String>,
    pub external: bool,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCfgKind {
    #[default]
    Simple,
    Bridge,
    Vlan,
    Sit,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterfaceCfg {
    pub name: String,
    pub device: String,
    pub metric: u32,
    pub no_defaultroute: bool,
    pub no_dns: bool,
    #[serde(rename = "address")]
    pub addresses: Vec<netmgr_interface::config::AddressSpec>,
    #[serde(rename = "address6")]
    pub addresses6: Vec<netmgr_interface::config::AddressSpec>,
    pub dns_servers: Vec<String>,
    pub dns_search: Vec<String>,
}

// ===== impl Config =====

impl Config {
    const DFLT_FILEPATH: &'static str = "/etc/netmgrd.toml";

    pub(crate) fn load(config_file: Option<&str>) -> Config {
        let config_file = config_file.unwrap_or(Config::DFLT_FILEPATH);

        match std::fs::read_to_string(config_file) {
            Ok(config_str) => {
                toml::from_str(&config_str).expect("Failed to parse configuration file")
            }
            Err(err) => {
                eprintln!("Failed to load configuration file: {err}");
                eprintln!("Falling back to default configuration...");
                Config::default()
            }
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            resolv_conf: "/tmp/resolv.conf.auto".to_owned(),
            logging: Default::default(),
            devices: Vec::new(),
            interfaces: Vec::new(),
            routes: Vec::new(),
            routes6: Vec::new(),
        }
    }
}

// ===== impl LoggingStdout =====

impl Default for LoggingStdout {
    fn default() -> LoggingStdout {
        LoggingStdout { enabled: true }
    }
}

// ===== impl LoggingFile =====

impl Default for LoggingFile {
    fn default() -> LoggingFile {
        LoggingFile {
            enabled: false,
            dir: "/var/log".to_owned(),
            name: "netmgrd.log".to_owned(),
        }
    }
}

// ===== global functions =====

// Turns the parsed configuration into devices, interfaces and config-layer
// routes. Interface addresses, routes and DNS settings are stored on the
// interface and applied by the static proto at bring-up.
pub(crate) fn apply(master: &mut Master, config: &Config) {
    for dev_cfg in &config.devices {
        let kind = match dev_cfg.kind {
            DeviceCfgKind::Simple => DeviceKind::Simple,
            DeviceCfgKind::Bridge => {
                DeviceKind::Bridge(dev_cfg.bridge.clone().unwrap_or_default())
            }
            DeviceCfgKind::Vlan => DeviceKind::Vlan(dev_cfg.vlan.clone().unwrap_or_default()),
            DeviceCfgKind::Sit => {
                DeviceKind::Tunnel(dev_cfg.tunnel.clone().unwrap_or_default())
            }
        };
        let name = if dev_cfg.name.is_empty() {
            match &kind {
                DeviceKind::Vlan(vlan) => device::vlan_ifname(vlan),
                _ => {
                    debug!("skipping device without a name");
                    continue;
                }
            }
        } else {
            dev_cfg.name.clone()
        };

        let mut dev = Device::new(&name, kind);
        dev.external = dev_cfg.external;
        if let Some(mtu) = dev_cfg.mtu {
            dev.settings.mtu = mtu;
            dev.settings.flags |= DeviceOptions::MTU;
        }
        if let Some(txqueuelen) = dev_cfg.txqueuelen {
            dev.settings.txqueuelen = txqueuelen;
            dev.settings.flags |= DeviceOptions::TXQUEUELEN;
        }
        if let Some(macaddr) = dev_cfg.macaddr.as_deref() {
            match macaddr.parse::<MacAddr>() {
                Ok(macaddr) => {
                    dev.settings.macaddr = macaddr;
                    dev.settings.flags |= DeviceOptions::MACADDR;
                }
                Err(_) => debug!(%name, %macaddr, "failed to parse MAC address"),
            }
        }
        device::probe(&master.system, &mut dev);
        master.devices.insert(dev);
    }

    for iface_cfg in &config.interfaces {
        if iface_cfg.name.is_empty() || iface_cfg.device.is_empty() {
            debug!("skipping interface without a name or device");
            continue;
        }
        // Reference the device, creating a plain one on demand.
        if master.devices.get(&iface_cfg.device).is_none() {
            let mut dev = Device::new(&iface_cfg.device, DeviceKind::Simple);
            device::probe(&master.system, &mut dev);
            master.devices.insert(dev);
        }

        let mut iface = Interface::new(&iface_cfg.name, &iface_cfg.device, iface_cfg.metric);
        iface.proto_ip.no_defaultroute = iface_cfg.no_defaultroute;
        iface.proto_ip.no_dns = iface_cfg.no_dns;
        iface.static_cfg = StaticSettings {
            addresses: iface_cfg.addresses.clone(),
            addresses6: iface_cfg.addresses6.clone(),
            routes: Vec::new(),
            routes6: Vec::new(),
            dns_servers: iface_cfg.dns_servers.clone(),
            dns_search: iface_cfg.dns_search.clone(),
        };
        master.interfaces.add(iface);
    }

    // Config-layer routes name their interface themselves. They stay
    // disabled until the interface comes up.
    let Master {
        system,
        devices,
        interfaces,
        ..
    } = master;
    for spec in &config.routes {
        add_route(system, devices, interfaces, None, spec, false);
    }
    for spec in &config.routes6 {
        add_route(system, devices, interfaces, None, spec, true);
    }
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_example_config() {
        let config: Config = toml::from_str(
            r#"
            resolv_conf = "/tmp/resolv.conf.d/resolv.conf.auto"

            [logging.stdout]
            enabled = true

            [[device]]
            name = "br-lan"
            type = "bridge"
            mtu = 1500

            [device.bridge]
            stp = true
            forward_delay = 4
            members = ["eth0"]

            [[device]]
            name = "eth0.10"
            type = "vlan"

            [device.vlan]
            device = "eth0"
            vid = 10

            [[device]]
            name = "6rd"
            type = "sit"

            [device.tunnel]
            type = "sit"
            local = "192.0.2.1"
            remote = "192.0.2.254"
            ttl = 64
            "6rd-prefix" = "2001:db8::/32"

            [[interface]]
            name = "lan"
            device = "br-lan"
            dns_servers = ["192.168.1.1"]

            [[interface.address]]
            address = "192.168.1.1/24"

            [[interface]]
            name = "wan"
            device = "eth1"
            metric = 10
            no_defaultroute = true

            [[route]]
            interface = "wan"
            target = "172.16.0.0"
            netmask = "255.240.0.0"
            gateway = "192.168.0.1"
            "#,
        )
        .unwrap();

        assert_eq!(config.resolv_conf, "/tmp/resolv.conf.d/resolv.conf.auto");
        assert_eq!(config.devices.len(), 3);
        assert_eq!(config.devices[0].kind, DeviceCfgKind::Bridge);
        let bridge = config.devices[0].bridge.as_ref().unwrap();
        assert!(bridge.stp);
        assert_eq!(bridge.forward_delay, 4);
        assert_eq!(bridge.members, vec!["eth0".to_owned()]);
        let tunnel = config.devices[2].tunnel.as_ref().unwrap();
        assert_eq!(tunnel.sixrd_prefix.as_deref(), Some("2001:db8::/32"));

        assert_eq!(config.interfaces.len(), 2);
        assert_eq!(config.interfaces[0].addresses.len(), 1);
        assert_eq!(config.interfaces[1].metric, 10);
        assert!(config.interfaces[1].no_defaultroute);

        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].interface.as_deref(), Some("wan"));
    }

    #[test]
    fn defaults_without_a_config_file() {
        let config = Config::default();
        assert_eq!(config.resolv_conf, "/tmp/resolv.conf.auto");
        assert!(config.logging.stdout.enabled);
        assert!(!config.logging.file.enabled);
        assert!(config.devices.is_empty());
    }
}
