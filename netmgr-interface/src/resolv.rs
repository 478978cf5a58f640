//
// Copyright (c) The Netmgr Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::interface::{InterfaceState, Interfaces};
use crate::ip::IpSettings;

// Serializes the DNS state of every interface that is up, replacing the
// resolver file atomically through a temporary sibling.
pub fn write_resolv_conf(path: &Path, interfaces: &Interfaces) {
    let tmp_path = tmp_sibling(path);
    let _ = fs::remove_file(&tmp_path);

    let mut content = String::new();
    for iface in interfaces.iter() {
        if iface.state != InterfaceState::Up || !iface.has_dns() {
            continue;
        }
        let _ = writeln!(content, "# Interface {}", iface.name);
        write_entries(&mut content, &iface.config_ip);
        if !iface.proto_ip.no_dns {
            write_entries(&mut content, &iface.proto_ip);
        }
    }

    if let Err(error) = fs::write(&tmp_path, &content) {
        debug!(path = %tmp_path.display(), %error, "failed to write resolver file");
        return;
    }
    if let Err(error) = fs::rename(&tmp_path, path) {
        debug!(path = %path.display(), %error, "failed to replace resolver file");
        let _ = fs::remove_file(&tmp_path);
    }
}

// ===== helper functions =====

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn write_entries(content: &mut String, ip: &IpSettings) {
    for server in ip.dns_servers.iter() {
        let _ = writeln!(content, "nameserver {server}");
    }
    for domain in ip.dns_search.iter() {
        let _ = writeln!(content, "search {domain}");
    }
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{add_dns_search, add_dns_server};
    use crate::interface::Interface;

    fn test_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("netmgr-resolv-{}-{tag}", std::process::id()))
    }

    fn up_iface(name: &str) -> Interface {
        let mut iface = Interface::new(name, "eth0", 0);
        iface.state = InterfaceState::Up;
        iface
    }

    #[test]
    fn writes_sections_per_interface() {
        let mut interfaces = Interfaces::new();

        let mut lan = up_iface("lan");
        add_dns_server(&mut lan.config_ip, "192.168.1.1");
        add_dns_search(&mut lan.config_ip, "lan.example.net");
        interfaces.add(lan);

        let mut wan = up_iface("wan");
        add_dns_server(&mut wan.proto_ip, "8.8.8.8");
        add_dns_server(&mut wan.proto_ip, "2001:4860:4860::8888");
        interfaces.add(wan);

        // Interfaces that are down or DNS-less are skipped.
        let mut guest = Interface::new("guest", "eth1", 0);
        add_dns_server(&mut guest.config_ip, "10.0.0.1");
        interfaces.add(guest);
        interfaces.add(up_iface("mgmt"));

        let path = test_path("sections");
        write_resolv_conf(&path, &interfaces);

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "# Interface lan\n\
             nameserver 192.168.1.1\n\
             search lan.example.net\n\
             # Interface wan\n\
             nameserver 8.8.8.8\n\
             nameserver 2001:4860:4860::8888\n"
        );
        assert!(!tmp_sibling(&path).exists());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn no_dns_suppresses_proto_entries_only() {
        let mut interfaces = Interfaces::new();
        let mut wan = up_iface("wan");
        wan.proto_ip.no_dns = true;
        add_dns_server(&mut wan.proto_ip, "8.8.8.8");
        add_dns_server(&mut wan.config_ip, "192.168.1.1");
        interfaces.add(wan);

        let path = test_path("nodns");
        write_resolv_conf(&path, &interfaces);

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "# Interface wan\nnameserver 192.168.1.1\n");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replaces_previous_content() {
        let mut interfaces = Interfaces::new();
        let mut wan = up_iface("wan");
        add_dns_server(&mut wan.proto_ip, "8.8.4.4");
        interfaces.add(wan);

        let path = test_path("replace");
        fs::write(&path, "stale content\n").unwrap();
        write_resolv_conf(&path, &interfaces);

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "# Interface wan\nnameserver 8.8.4.4\n");
        let _ = fs::remove_file(&path);
    }
}
