//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, btree_map};
use std::net::Ipv4Addr;

use bitflags::bitflags;
use derive_new::new;
use ipnetwork::Ipv4Network;
use ospf_utils::ip::Ipv4AddrExt;
use serde::{Deserialize, Serialize};

use crate::area::AreaSpf;
use crate::debug::Debug;
use crate::lsdb::{LSA_INFINITY, LsdbSnapshot};
use crate::northbound::RouteState;
use crate::packet::lsa::{LsaKey, LsaRouterFlags, LsaTypeCode};
use crate::southbound::{Nexthop, RouteInstall, RouteSink};

// Network routing table entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteNet {
    pub area_id: Option<Ipv4Addr>,
    pub origin: Option<LsaKey>,
    pub path_type: PathType,
    pub metric: u32,
    pub type2_metric: Option<u32>,
    pub nexthops: Nexthops,
    pub flags: RouteNetFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RouteNetFlags: u8 {
        const CONNECTED = 0x01;
        const INSTALLED = 0x02;
    }
}

// Router routing table entry.
#[derive(Clone, Debug, Eq, PartialEq, new)]
pub struct RouteRtr {
    pub area_id: Ipv4Addr,
    pub path_type: PathType,
    pub flags: LsaRouterFlags,
    pub metric: u32,
    pub nexthops: Nexthops,
}

// OSPF path types in decreasing order of preference.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathType {
    IntraArea,
    InterArea,
    Type1External,
    Type2External,
}

// Routing table destination type.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteDestType {
    Network,
    InternalRouter,
    AsBoundaryRouter,
    AreaBorderRouter,
    Both,
}

// Ordered set of nexthops.
pub type Nexthops = BTreeSet<Nexthop>;

// Network routing table.
pub type Rib = BTreeMap<Ipv4Network, RouteNet>;

// ===== impl RouteNet =====

impl RouteNet {
    // Metric used for comparison and installation.
    pub fn metric(&self) -> u32 {
        match self.path_type {
            PathType::IntraArea
            | PathType::InterArea
            | PathType::Type1External => self.metric,
            PathType::Type2External => self.type2_metric.unwrap_or(self.metric),
        }
    }

    pub fn state(&self, prefix: &Ipv4Network) -> RouteState {
        RouteState {
            prefix: *prefix,
            dest_type: RouteDestType::Network,
            area_id: self.area_id,
            path_type: self.path_type,
            cost: self.metric,
            type2_cost: self.type2_metric,
            nexthops: self.nexthops.clone(),
            ls_origin: self.origin.map(|origin| {
                format!(
                    "type {} id {} adv-rtr {}",
                    origin.lsa_type.0, origin.lsa_id, origin.adv_rtr
                )
            }),
        }
    }
}

// ===== impl RouteRtr =====

impl RouteRtr {
    pub fn dest_type(&self) -> RouteDestType {
        match (self.flags.is_abr(), self.flags.is_asbr()) {
            (true, true) => RouteDestType::Both,
            (true, false) => RouteDestType::AreaBorderRouter,
            (false, true) => RouteDestType::AsBoundaryRouter,
            (false, false) => RouteDestType::InternalRouter,
        }
    }

    pub fn state(&self, router_id: &Ipv4Addr) -> RouteState {
        RouteState {
            prefix: router_id.to_host_prefix(),
            dest_type: self.dest_type(),
            area_id: Some(self.area_id),
            path_type: self.path_type,
            cost: self.metric,
            type2_cost: None,
            nexthops: self.nexthops.clone(),
            ls_origin: None,
        }
    }
}

// ===== global functions =====

// Computes the network routing table out of the shortest-path trees of all
// areas.
pub(crate) fn compute_rib(
    snapshot: &LsdbSnapshot,
    areas: &mut BTreeMap<Ipv4Addr, AreaSpf>,
    max_paths: u16,
) -> Rib {
    let mut rib = Rib::new();

    // Compute intra-area routes.
    for area in areas.values() {
        update_rib_intra_area(&mut rib, area, max_paths);
    }

    // Compute inter-area routes.
    for area in areas.values_mut() {
        // If the router has active attachments to multiple areas, only backbone
        // summary-LSAs are examined.
        if snapshot.is_abr && !area.is_backbone() {
            continue;
        }

        update_rib_inter_area_networks(
            &mut rib,
            area,
            snapshot.router_id,
            max_paths,
        );
        update_rib_inter_area_routers(area, snapshot.router_id);
    }

    // Compute external routes.
    update_rib_external(&mut rib, snapshot, areas, max_paths);

    rib
}

// Computes intra-area routes: transit networks and stub links.
fn update_rib_intra_area(rib: &mut Rib, area: &AreaSpf, max_paths: u16) {
    for stub in area.intra_area_networks() {
        let vertex = stub.vertex;

        // Calculate stub metric.
        let metric = vertex.distance.saturating_add(stub.metric.into());

        // Compare this distance to the current best cost to the stub network.
        if let Some(best_route) = rib.get(&stub.prefix) {
            if best_route.path_type == PathType::IntraArea
                && metric > best_route.metric
            {
                continue;
            }
        }

        let origin = vertex.lsa.origin();

        // Multiple transit vertices mapped to the same IP network (e.g. while
        // a new DR is being established). The current entry is overwritten
        // only when the new path is just as short and its origin has a larger
        // Link State ID.
        if !vertex.lsa.is_router() {
            if let btree_map::Entry::Occupied(o) = rib.entry(stub.prefix) {
                let curr_route = o.get();
                let curr_lsa_id = curr_route.origin.map(|origin| origin.lsa_id);
                if metric > curr_route.metric
                    || curr_lsa_id.is_some_and(|lsa_id| origin.lsa_id < lsa_id)
                {
                    continue;
                }
                o.remove();
            }
        }

        // Create new intra-area route.
        let mut flags = RouteNetFlags::empty();
        let mut nexthops = vertex.nexthops.clone();
        if vertex.hops == 0 {
            flags.insert(RouteNetFlags::CONNECTED);
            if let Some(nexthop) = stub.connected {
                nexthops.insert(nexthop);
            }
        }
        let new_route = RouteNet {
            area_id: Some(area.area_id),
            path_type: PathType::IntraArea,
            origin: Some(origin),
            metric,
            type2_metric: None,
            nexthops,
            flags,
        };

        route_update(rib, stub.prefix, new_route, max_paths);
    }
}

// Computes inter-area "network" routes.
fn update_rib_inter_area_networks(
    rib: &mut Rib,
    area: &AreaSpf,
    router_id: Ipv4Addr,
    max_paths: u16,
) {
    // Examine all Type-3 Summary-LSAs.
    for lsa in area
        .lsas_by_type(LsaTypeCode::SummaryNetwork)
        // Filter out LSAs originated by the calculating router itself.
        .filter(|lsa| lsa.hdr.adv_rtr != router_id)
    {
        let Some(summary) = lsa.body.as_summary_network() else {
            continue;
        };

        // Filter out unreachable LSAs.
        if summary.metric >= LSA_INFINITY {
            continue;
        }
        let Some(prefix) = lsa.hdr.lsa_id.with_netmask(summary.mask) else {
            continue;
        };

        // Look up the routing table entry for the area border router having
        // this area as its associated area.
        let Some(route_br) = area
            .routers
            .get(&lsa.hdr.adv_rtr)
            .filter(|route| route.path_type == PathType::IntraArea)
            .filter(|route| route.flags.is_abr())
        else {
            Debug::SpfUnreachableAbr(&prefix, lsa.hdr.adv_rtr).log();
            continue;
        };

        // The inter-area path cost is the distance to the ABR plus the cost
        // specified in the LSA.
        let new_route = RouteNet {
            area_id: Some(area.area_id),
            path_type: PathType::InterArea,
            origin: Some(lsa.key()),
            metric: route_br.metric.saturating_add(summary.metric),
            type2_metric: None,
            nexthops: route_br.nexthops.clone(),
            flags: RouteNetFlags::empty(),
        };

        route_update(rib, prefix, new_route, max_paths);
    }
}

// Computes inter-area "router" routes.
fn update_rib_inter_area_routers(area: &mut AreaSpf, router_id: Ipv4Addr) {
    let mut new_routes: BTreeMap<Ipv4Addr, RouteRtr> = BTreeMap::new();

    // Examine all Type-4 Summary-LSAs.
    for lsa in area
        .lsas_by_type(LsaTypeCode::SummaryRouter)
        .filter(|lsa| lsa.hdr.adv_rtr != router_id)
        .filter(|lsa| lsa.hdr.lsa_id != router_id)
    {
        let Some(summary) = lsa.body.as_summary_router() else {
            continue;
        };
        if summary.metric >= LSA_INFINITY {
            continue;
        }

        let Some(route_br) = area
            .routers
            .get(&lsa.hdr.adv_rtr)
            .filter(|route| route.path_type == PathType::IntraArea)
            .filter(|route| route.flags.is_abr())
        else {
            continue;
        };

        let metric = route_br.metric.saturating_add(summary.metric);
        let new_route = RouteRtr::new(
            area.area_id,
            PathType::InterArea,
            LsaRouterFlags::E,
            metric,
            route_br.nexthops.clone(),
        );
        match new_routes.entry(lsa.hdr.lsa_id) {
            btree_map::Entry::Vacant(v) => {
                v.insert(new_route);
            }
            btree_map::Entry::Occupied(mut o) => {
                let curr = o.get_mut();
                match metric.cmp(&curr.metric) {
                    Ordering::Less => *curr = new_route,
                    Ordering::Equal => curr.nexthops.extend(new_route.nexthops),
                    Ordering::Greater => {}
                }
            }
        }
    }

    // Intra-area paths are always preferred.
    for (router_id, route) in new_routes {
        area.routers.entry(router_id).or_insert(route);
    }
}

// Computes AS external routes.
fn update_rib_external(
    rib: &mut Rib,
    snapshot: &LsdbSnapshot,
    areas: &BTreeMap<Ipv4Addr, AreaSpf>,
    max_paths: u16,
) {
    let router_id = snapshot.router_id;
    let mut external_rib = Rib::new();

    // Examine all AS-external-LSAs.
    for lsa in snapshot
        .as_lsas
        .values()
        .filter(|lsa| !lsa.hdr.is_maxage())
        // Filter out LSAs originated by the calculating router itself.
        .filter(|lsa| lsa.hdr.adv_rtr != router_id)
    {
        let Some(lsa_body) = lsa.body.as_as_external() else {
            continue;
        };

        // Filter out unreachable LSAs.
        if lsa_body.metric >= LSA_INFINITY {
            continue;
        }
        let Some(prefix) = lsa.hdr.lsa_id.with_netmask(lsa_body.mask) else {
            continue;
        };

        // Look up the routing table entries (potentially one per attached
        // area) for the AS boundary router that originated the LSA.
        let mut asbr_routes = areas
            .values()
            .filter(|area| !area.cfg.is_stub())
            .filter_map(|area| {
                area.routers
                    .get(&lsa.hdr.adv_rtr)
                    .filter(|route| route.flags.is_asbr())
            })
            .collect::<Vec<_>>();

        // Intra-area paths using non-backbone areas are always the most
        // preferred.
        let asbr_routes_pruned = asbr_routes
            .iter()
            .copied()
            .filter(|route| {
                route.path_type == PathType::IntraArea
                    && route.area_id != Ipv4Addr::UNSPECIFIED
            })
            .collect::<Vec<_>>();
        if !asbr_routes_pruned.is_empty() {
            asbr_routes = asbr_routes_pruned;
        }

        // Select the routing table entry with the least cost; when there are
        // multiple least cost routing table entries the entry whose associated
        // area has the largest OSPF Area ID is chosen.
        let Some(route_asbr) = asbr_routes.into_iter().reduce(|best, route| {
            match route.metric.cmp(&best.metric) {
                Ordering::Less => route,
                Ordering::Equal if route.area_id > best.area_id => route,
                _ => best,
            }
        }) else {
            Debug::SpfUnreachableAsbr(&prefix, lsa.hdr.adv_rtr).log();
            continue;
        };

        // A non-zero forwarding address must be reachable through an
        // intra-area or inter-area route.
        let (fwd_metric, nexthops) = match lsa_body.fwd_addr {
            Some(fwd_addr) if !fwd_addr.is_unspecified() => {
                let Some(fwd_route) = rib_lookup(rib, fwd_addr) else {
                    Debug::SpfUnreachableFwdAddr(&prefix, fwd_addr).log();
                    continue;
                };
                let nexthops = fwd_route
                    .nexthops
                    .iter()
                    .map(|nexthop| match nexthop.addr {
                        Some(_) => *nexthop,
                        None => Nexthop::new(
                            nexthop.iface_addr,
                            nexthop.ifindex,
                            Some(fwd_addr),
                        ),
                    })
                    .collect();
                (fwd_route.metric, nexthops)
            }
            _ => (route_asbr.metric, route_asbr.nexthops.clone()),
        };

        // Get path type and metric.
        let (path_type, metric, type2_metric) = match lsa_body.is_type2() {
            true => {
                (PathType::Type2External, fwd_metric, Some(lsa_body.metric))
            }
            false => (
                PathType::Type1External,
                fwd_metric.saturating_add(lsa_body.metric),
                None,
            ),
        };

        let new_route = RouteNet {
            area_id: None,
            path_type,
            origin: Some(lsa.key()),
            metric,
            type2_metric,
            nexthops,
            flags: RouteNetFlags::empty(),
        };
        route_update(&mut external_rib, prefix, new_route, max_paths);
    }

    // External routes never override intra-area or inter-area routes.
    for (prefix, route) in external_rib {
        route_update(rib, prefix, route, max_paths);
    }
}

// Updates the routes pushed to the route sink.
//
// This is done at the end of the routing table calculation to prevent
// transient states from affecting the forwarding plane. Returns the number of
// routes installed or uninstalled.
pub(crate) fn update_global_rib(
    rib: &mut Rib,
    mut old_rib: Rib,
    sink: &dyn RouteSink,
) -> usize {
    let mut changes = 0;

    // Install new routes or routes that have changed.
    for (prefix, route) in rib.iter_mut() {
        let mut installed = false;

        // Remove route from the old RIB if it's present.
        if let Some(old_route) = old_rib.remove(prefix) {
            installed = old_route.flags.contains(RouteNetFlags::INSTALLED);

            // Skip reinstalling the route if it hasn't changed.
            if old_route.metric() == route.metric()
                && old_route.nexthops == route.nexthops
                && old_route.flags.contains(RouteNetFlags::CONNECTED)
                    == route.flags.contains(RouteNetFlags::CONNECTED)
            {
                if installed {
                    route.flags.insert(RouteNetFlags::INSTALLED);
                }
                continue;
            }
        }

        // Changed routes are removed before the new version is installed.
        if installed {
            Debug::RouteUninstall(prefix).log();
            sink.uninstall(prefix);
            changes += 1;
        }

        // Connected routes are owned by the system. The list of nexthops
        // might also be empty in the case of nexthop computation errors.
        if !route.flags.contains(RouteNetFlags::CONNECTED)
            && !route.nexthops.is_empty()
        {
            let metric = route.metric();
            Debug::RouteInstall(prefix, metric).log();
            sink.install(&RouteInstall::new(
                *prefix,
                metric,
                route.nexthops.clone(),
            ));
            route.flags.insert(RouteNetFlags::INSTALLED);
            changes += 1;
        }
    }

    // Uninstall routes that are no longer available.
    for (prefix, _) in old_rib
        .into_iter()
        .filter(|(_, route)| route.flags.contains(RouteNetFlags::INSTALLED))
    {
        Debug::RouteUninstall(&prefix).log();
        sink.uninstall(&prefix);
        changes += 1;
    }

    changes
}

// Uninstalls every route previously pushed to the route sink.
pub(crate) fn uninstall_all(rib: &mut Rib, sink: &dyn RouteSink) {
    for (prefix, route) in rib.iter_mut() {
        if route.flags.contains(RouteNetFlags::INSTALLED) {
            Debug::RouteUninstall(prefix).log();
            sink.uninstall(prefix);
            route.flags.remove(RouteNetFlags::INSTALLED);
        }
    }
}

// ===== helper functions =====

fn route_update(
    rib: &mut Rib,
    prefix: Ipv4Network,
    route: RouteNet,
    max_paths: u16,
) {
    let route = match rib.entry(prefix) {
        btree_map::Entry::Occupied(o) => {
            let curr_route = o.into_mut();

            match route_compare(&route, curr_route) {
                Ordering::Less => {
                    *curr_route = route;
                }
                Ordering::Equal => {
                    // Merge nexthops.
                    curr_route.nexthops.extend(route.nexthops);
                }
                Ordering::Greater => {
                    // Ignore less preferred route.
                }
            }

            curr_route
        }
        btree_map::Entry::Vacant(v) => v.insert(route),
    };

    // Honor configured maximum number of ECMP paths.
    if route.nexthops.len() > max_paths as usize {
        route.nexthops = std::mem::take(&mut route.nexthops)
            .into_iter()
            .take(max_paths as usize)
            .collect();
    }
}

fn route_compare(a: &RouteNet, b: &RouteNet) -> Ordering {
    let cmp = a.path_type.cmp(&b.path_type);
    if cmp != Ordering::Equal {
        return cmp;
    }

    match a.path_type {
        PathType::IntraArea | PathType::InterArea | PathType::Type1External => {
            a.metric.cmp(&b.metric)
        }
        PathType::Type2External => {
            let cmp = a.type2_metric.cmp(&b.type2_metric);
            if cmp != Ordering::Equal {
                return cmp;
            }

            a.metric.cmp(&b.metric)
        }
    }
}

// Longest prefix match over the intra-area and inter-area routes.
fn rib_lookup(rib: &Rib, addr: Ipv4Addr) -> Option<&RouteNet> {
    rib.iter()
        .filter(|(_, route)| {
            matches!(route.path_type, PathType::IntraArea | PathType::InterArea)
        })
        .filter(|(prefix, _)| prefix.contains(addr))
        .max_by_key(|(prefix, _)| prefix.prefix())
        .map(|(_, route)| route)
}

// ===== unit tests =====
