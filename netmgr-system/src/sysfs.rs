//
// Copyright (c) The Netmgr Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use sysctl::{Ctl, Sysctl};
use tracing::debug;

// Per-device sysctls are written by path: interface names may contain dots
// (VLAN devices), which a name-based sysctl lookup would misparse.
pub(crate) fn set_sysctl_path(path: &str, value: &str) {
    if let Err(error) = fs::write(path, value) {
        debug!(%path, %error, "sysctl write failed");
    }
}

pub(crate) fn set_disable_ipv6(ifname: &str, disable: bool) {
    let path = format!("/proc/sys/net/ipv6/conf/{ifname}/disable_ipv6");
    set_sysctl_path(&path, if disable { "1" } else { "0" });
}

pub(crate) fn set_bridge_multicast_snooping(ifname: &str, enable: bool) {
    let path = format!("/sys/devices/virtual/net/{ifname}/bridge/multicast_snooping");
    set_sysctl_path(&path, if enable { "1" } else { "0" });
}

// Drops the kernel's cached routes for both families.
pub(crate) fn flush_route_cache() {
    for name in ["net.ipv4.route.flush", "net.ipv6.route.flush"] {
        let result = Ctl::new(name).and_then(|ctl| ctl.set_value_string("-1"));
        if let Err(error) = result {
            debug!(%name, %error, "route cache flush failed");
        }
    }
}

// A device is a bridge iff its virtual-device directory carries the bridge
// attribute group.
pub(crate) fn is_bridge(ifname: &str) -> bool {
    Path::new(&format!("/sys/devices/virtual/net/{ifname}/bridge")).exists()
}

// Returns the name of the bridge the device is currently a member of.
pub(crate) fn bridge_of(ifname: &str) -> Option<String> {
    let link = fs::read_link(format!("/sys/class/net/{ifname}/brport/bridge")).ok()?;
    Some(link.file_name()?.to_str()?.to_owned())
}

pub(crate) fn carrier(ifname: &str) -> Option<bool> {
    let value = read_trimmed(&format!("/sys/class/net/{ifname}/carrier"))?;
    Some(value == "1")
}

pub(crate) fn iflink(ifname: &str) -> Option<u32> {
    read_trimmed(&format!("/sys/class/net/{ifname}/iflink"))?
        .parse()
        .ok()
}

// Wireless devices expose a phy80211 node and are managed elsewhere.
pub(crate) fn force_external(ifname: &str) -> bool {
    Path::new(&format!("/sys/class/net/{ifname}/phy80211")).exists()
}

pub(crate) fn statistics(ifname: &str) -> BTreeMap<String, u64> {
    let mut counters = BTreeMap::new();
    let dir = format!("/sys/class/net/{ifname}/statistics");
    let Ok(entries) = fs::read_dir(&dir) else {
        return counters;
    };
    for entry in entries.flatten() {
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let Some(value) = read_trimmed(&entry.path().to_string_lossy()) else {
            continue;
        };
        if let Ok(value) = value.parse() {
            counters.insert(name, value);
        }
    }
    counters
}

fn read_trimmed(path: &str) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|value| value.trim_end().to_owned())
}
