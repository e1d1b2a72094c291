//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use derive_new::new;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

// L3 interface as reported by the system.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct L3Interface {
    pub name: String,
    pub ifindex: u32,
    pub addr: Ipv4Network,
    pub mtu: u16,
    pub mac: [u8; 6],
    pub oper_up: bool,
}

// Messages coming from the collaborators that feed the engine: the link
// inventory and the external route feed.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SouthboundMsg {
    InterfaceUpdate(L3Interface),
    InterfaceDelete(String),
    ExternalRouteAdd { prefix: Ipv4Network, metric: u32 },
    ExternalRouteDel { prefix: Ipv4Network },
}

// Route pushed to the forwarding plane.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct RouteInstall {
    pub prefix: Ipv4Network,
    pub cost: u32,
    pub nexthops: BTreeSet<Nexthop>,
}

// Route nexthop.
//
// Directly connected destinations have no nexthop address.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, new)]
#[derive(Deserialize, Serialize)]
pub struct Nexthop {
    // Address of the outgoing interface.
    pub iface_addr: Ipv4Addr,
    pub ifindex: u32,
    pub addr: Option<Ipv4Addr>,
}

// Consumer of the routing table deltas computed by SPF.
pub trait RouteSink: Send + Sync {
    fn install(&self, route: &RouteInstall);

    fn uninstall(&self, prefix: &Ipv4Network);
}

// ===== impl L3Interface =====

impl L3Interface {
    // Checks whether OSPF can run on top of this interface.
    pub fn is_ready(&self) -> bool {
        self.oper_up && self.mtu != 0
    }
}
