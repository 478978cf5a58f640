//
// Copyright (c) The Netmgr Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

// Address Family identifier.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

// ===== impl AddressFamily =====

impl AddressFamily {
    pub fn of(addr: &IpAddr) -> AddressFamily {
        match addr {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    // Maximum prefix length of the family.
    pub fn max_prefixlen(&self) -> u8 {
        match self {
            AddressFamily::Ipv4 => 32,
            AddressFamily::Ipv6 => 128,
        }
    }

    pub fn unspecified(&self) -> IpAddr {
        match self {
            AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

// ===== global functions =====

// Zeroes all bits at or beyond `prefixlen`.
pub fn clear_host_bits(addr: &IpAddr, prefixlen: u8) -> IpAddr {
    match addr {
        IpAddr::V4(addr) => {
            let mut octets = addr.octets();
            clear_octets(&mut octets, prefixlen);
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        IpAddr::V6(addr) => {
            let mut octets = addr.octets();
            clear_octets(&mut octets, prefixlen);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    }
}

// Compares two addresses under a common prefix length. Addresses of
// different families never match.
pub fn match_prefix(a: &IpAddr, b: &IpAddr, prefixlen: u8) -> bool {
    if AddressFamily::of(a) != AddressFamily::of(b) {
        return false;
    }
    clear_host_bits(a, prefixlen) == clear_host_bits(b, prefixlen)
}

// Parses a netmask given either as a decimal prefix length or, for IPv4, as
// a dotted mask. Rejects non-contiguous dotted masks and out-of-range
// lengths.
pub fn parse_netmask(s: &str, v6: bool) -> Option<u8> {
    let max = if v6 { 128 } else { 32 };
    if let Ok(prefixlen) = s.parse::<u8>() {
        return (prefixlen <= max).then_some(prefixlen);
    }
    if v6 {
        return None;
    }
    let mask: Ipv4Addr = s.parse().ok()?;
    let bits = u32::from(mask);
    let ones = bits.leading_ones();
    (bits.count_ones() == ones).then_some(ones as u8)
}

// Parses an `addr/len` string; a missing length means a host prefix.
pub fn parse_prefix(s: &str, v6: bool) -> Option<(IpAddr, u8)> {
    let (addr, prefixlen) = match s.split_once('/') {
        Some((addr, len)) => (addr, parse_netmask(len, v6)?),
        None => (s, if v6 { 128 } else { 32 }),
    };
    let addr: IpAddr = addr.parse().ok()?;
    if addr.is_ipv6() != v6 {
        return None;
    }
    Some((addr, prefixlen))
}

// ===== helper functions =====

fn clear_octets(octets: &mut [u8], prefixlen: u8) {
    let full = usize::from(prefixlen / 8);
    let partial = prefixlen % 8;
    if full >= octets.len() {
        return;
    }
    let mut idx = full;
    if partial != 0 {
        octets[idx] &= 0xff << (8 - partial);
        idx += 1;
    }
    for octet in octets[idx..].iter_mut() {
        *octet = 0;
    }
}

// ===== tests =====
