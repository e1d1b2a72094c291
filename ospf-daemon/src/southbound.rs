//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ipnetwork::Ipv4Network;
use nix::ifaddrs;
use nix::net::if_::{InterfaceFlags, if_nametoindex};
use ospf_engine::southbound::{
    L3Interface, RouteInstall, RouteSink, SouthboundMsg,
};
use ospf_utils::UnboundedSender;
use ospf_utils::task::IntervalTask;
use tracing::{debug, info, warn};

// Last known state of the system interfaces.
#[derive(Debug, Default)]
pub struct Inventory {
    links: BTreeMap<String, L3Interface>,
}

// Route sink that reports routing table changes through the log.
#[derive(Debug, Default)]
pub struct LogRouteSink;

// ===== impl Inventory =====

impl Inventory {
    // Replaces the known interfaces with a new snapshot, returning the
    // messages that describe the difference.
    pub fn update(
        &mut self,
        links: BTreeMap<String, L3Interface>,
    ) -> Vec<SouthboundMsg> {
        let mut msgs = vec![];

        for name in self.links.keys() {
            if !links.contains_key(name) {
                msgs.push(SouthboundMsg::InterfaceDelete(name.clone()));
            }
        }
        for (name, link) in &links {
            if self.links.get(name) != Some(link) {
                msgs.push(SouthboundMsg::InterfaceUpdate(link.clone()));
            }
        }

        self.links = links;
        msgs
    }
}

// ===== impl LogRouteSink =====

impl RouteSink for LogRouteSink {
    fn install(&self, route: &RouteInstall) {
        let nexthops = route
            .nexthops
            .iter()
            .map(|nexthop| match nexthop.addr {
                Some(addr) => format!("{} ({})", addr, nexthop.ifindex),
                None => format!("direct ({})", nexthop.ifindex),
            })
            .collect::<Vec<_>>()
            .join(", ");
        info!(
            prefix = %route.prefix, cost = %route.cost, %nexthops,
            "route installed"
        );
    }

    fn uninstall(&self, prefix: &Ipv4Network) {
        info!(%prefix, "route uninstalled");
    }
}

// ===== global functions =====

// Periodically scans the system interfaces and reports changes to the
// instance.
pub fn inventory_task(
    interval: Duration,
    inventory: Inventory,
    sbp: UnboundedSender<SouthboundMsg>,
) -> IntervalTask {
    let inventory = Arc::new(Mutex::new(inventory));
    IntervalTask::new(interval, false, move || {
        let inventory = inventory.clone();
        let sbp = sbp.clone();
        async move {
            let links = match scan() {
                Ok(links) => links,
                Err(error) => {
                    warn!(%error, "failed to scan system interfaces");
                    return;
                }
            };

            let msgs = match inventory.lock() {
                Ok(mut inventory) => inventory.update(links),
                Err(_) => return,
            };
            for msg in msgs {
                debug!(?msg, "interface inventory change");
                let _ = sbp.send(msg);
            }
        }
    })
}

// Lists the system interfaces and their primary IPv4 address.
pub fn scan() -> nix::Result<BTreeMap<String, L3Interface>> {
    let mut links = BTreeMap::new();
    let mut macs = BTreeMap::new();

    for ifaddr in ifaddrs::getifaddrs()? {
        let Some(address) = ifaddr.address else {
            continue;
        };

        // Link-layer address.
        if let Some(link) = address.as_link_addr() {
            if let Some(mac) = link.addr() {
                macs.insert(ifaddr.interface_name.clone(), mac);
            }
            continue;
        }

        // Keep only the first IPv4 address of each interface.
        let Some(addr) = address.as_sockaddr_in() else {
            continue;
        };
        if links.contains_key(&ifaddr.interface_name) {
            continue;
        }
        let addr = Ipv4Addr::from(addr.ip());
        let plen = ifaddr
            .netmask
            .as_ref()
            .and_then(|mask| mask.as_sockaddr_in())
            .and_then(|mask| {
                let mask = Ipv4Addr::from(mask.ip());
                ipnetwork::ipv4_mask_to_prefix(mask).ok()
            })
            .unwrap_or(32);
        let Ok(addr) = Ipv4Network::new(addr, plen) else {
            continue;
        };
        let name = ifaddr.interface_name;
        let ifindex = match if_nametoindex(name.as_str()) {
            Ok(ifindex) => ifindex,
            Err(error) => {
                warn!(%name, %error, "failed to get interface index");
                continue;
            }
        };
        let oper_up = ifaddr.flags.contains(InterfaceFlags::IFF_UP)
            && ifaddr.flags.contains(InterfaceFlags::IFF_RUNNING);

        let link = L3Interface {
            name: name.clone(),
            ifindex,
            addr,
            mtu: read_mtu(&name),
            mac: [0; 6],
            oper_up,
        };
        links.insert(name, link);
    }

    for (name, link) in links.iter_mut() {
        if let Some(mac) = macs.get(name) {
            link.mac = *mac;
        }
    }

    Ok(links)
}

// ===== helper functions =====

fn read_mtu(ifname: &str) -> u16 {
    std::fs::read_to_string(format!("/sys/class/net/{ifname}/mtu"))
        .ok()
        .and_then(|mtu| mtu.trim().parse::<u32>().ok())
        .map(|mtu| mtu.min(u16::MAX as u32) as u16)
        .unwrap_or(0)
}

// ===== unit tests =====
