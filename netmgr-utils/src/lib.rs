//
// Copyright (c) The Netmgr Project Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod ip;
pub mod mac_addr;
pub mod southbound;
pub mod vset;
