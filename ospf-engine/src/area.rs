//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, btree_map};
use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnetwork::Ipv4Network;
use ospf_utils::ip::Ipv4NetworkExt;

use crate::interface::{InterfaceSummary, ism};
use crate::lsdb::{AreaSnapshot, LSA_INFINITY};
use crate::northbound::{AdminState, AreaCfg};
use crate::packet::lsa::{Lsa, LsaBody, LsaKey, LsaSummary, LsaTypeCode};
use crate::route::{Nexthops, PathType, Rib, RouteRtr};
use crate::southbound::Nexthop;
use crate::spf::{Vertex, VertexId};

// Area as seen by a single SPF run.
#[derive(Debug)]
pub struct AreaSpf {
    pub area_id: Ipv4Addr,
    pub cfg: AreaCfg,
    pub interfaces: Vec<InterfaceSummary>,
    pub lsas: BTreeMap<LsaKey, Arc<Lsa>>,
    // Shortest-path tree.
    pub spt: BTreeMap<VertexId, Vertex>,
    // Routing table entries for area border routers and AS boundary routers
    // reachable through this area.
    pub routers: BTreeMap<Ipv4Addr, RouteRtr>,
}

// Summary-LSAs an ABR originates into each area.
pub type AreaSummaries = BTreeMap<Ipv4Addr, BTreeMap<LsaKey, LsaBody>>;

// ===== impl AreaSpf =====

impl AreaSpf {
    pub(crate) fn new(area_id: Ipv4Addr, snapshot: &AreaSnapshot) -> AreaSpf {
        AreaSpf {
            area_id,
            cfg: snapshot.cfg.clone(),
            interfaces: snapshot.interfaces.clone(),
            lsas: snapshot.lsas.clone(),
            spt: Default::default(),
            routers: Default::default(),
        }
    }

    pub fn is_backbone(&self) -> bool {
        self.area_id.is_unspecified()
    }

    // An area takes part in the routing table calculation when it's
    // administratively up and has at least one operational interface.
    pub fn is_active(&self) -> bool {
        self.cfg.admin_state == AdminState::Up
            && self
                .interfaces
                .iter()
                .any(|iface| iface.state != ism::State::Down)
    }

    // Iterates over the non-MaxAge LSAs of the given type.
    pub(crate) fn lsas_by_type(
        &self,
        type_code: LsaTypeCode,
    ) -> impl Iterator<Item = &Arc<Lsa>> {
        let start = LsaKey::new(
            type_code.into(),
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
        );
        let end = LsaKey::new(
            type_code.into(),
            Ipv4Addr::BROADCAST,
            Ipv4Addr::BROADCAST,
        );
        self.lsas
            .range(start..=end)
            .map(|(_, lsa)| lsa)
            .filter(|lsa| !lsa.hdr.is_maxage())
    }

    // Finds the operational interface described by a Router-LSA link's Link
    // Data (interface address, or ifindex for unnumbered interfaces).
    pub(crate) fn interface_by_link_data(
        &self,
        link_data: Ipv4Addr,
    ) -> Option<&InterfaceSummary> {
        self.interfaces
            .iter()
            .filter(|iface| iface.state != ism::State::Down)
            .find(|iface| {
                if iface.is_unnumbered() {
                    Ipv4Addr::from(iface.ifindex) == link_data
                } else {
                    iface.addr.ip() == link_data
                }
            })
    }

    // Finds the operational interface attached to the given network.
    pub(crate) fn interface_by_prefix(
        &self,
        prefix: &Ipv4Network,
    ) -> Option<&InterfaceSummary> {
        self.interfaces
            .iter()
            .filter(|iface| iface.state != ism::State::Down)
            .filter(|iface| !iface.is_unnumbered())
            .find(|iface| prefix.contains(iface.addr.ip()))
    }

    // Checks whether any of the nexthops goes out an interface of this area.
    fn owns_nexthops(&self, nexthops: &Nexthops) -> bool {
        nexthops.iter().any(|nexthop| {
            self.interfaces
                .iter()
                .any(|iface| iface_matches_nexthop(iface, nexthop))
        })
    }
}

// ===== global functions =====

// Computes the Summary-LSAs to originate into each attached area (RFC 2328,
// Section 12.4.3).
pub(crate) fn compute_summaries(
    is_abr: bool,
    router_id: Ipv4Addr,
    areas: &BTreeMap<Ipv4Addr, AreaSpf>,
    rib: &Rib,
) -> AreaSummaries {
    let mut summaries = AreaSummaries::new();

    // Only ABRs originate summaries.
    if !is_abr {
        return summaries;
    }

    for area in areas.values().filter(|area| area.is_active()) {
        let mut area_summaries = BTreeMap::new();

        // Type-3 summaries.
        for (prefix, metric) in compute_net_summaries(area, rib) {
            let key = LsaKey::new(
                LsaTypeCode::SummaryNetwork.into(),
                router_id,
                prefix.network(),
            );

            // Prefixes sharing the same network address but with different
            // masks are not disambiguated: the first one wins.
            if let btree_map::Entry::Vacant(v) = area_summaries.entry(key) {
                let summary = LsaSummary::new(prefix.mask(), metric);
                v.insert(LsaBody::SummaryNetwork(summary));
            }
        }

        // Type-4 summaries.
        for (asbr, metric) in compute_rtr_summaries(area, areas, router_id) {
            let key =
                LsaKey::new(LsaTypeCode::SummaryRouter.into(), router_id, asbr);
            let body = LsaBody::SummaryRouter(LsaSummary::new(
                Ipv4Addr::UNSPECIFIED,
                metric,
            ));
            area_summaries.insert(key, body);
        }

        summaries.insert(area.area_id, area_summaries);
    }

    summaries
}

// ===== helper functions =====

fn compute_net_summaries(
    area: &AreaSpf,
    rib: &Rib,
) -> Vec<(Ipv4Network, u32)> {
    let mut summaries: Vec<_> = rib
        .iter()
        // AS external routes are never advertised in summary-LSAs.
        .filter(|(_, route)| {
            !matches!(
                route.path_type,
                PathType::Type1External | PathType::Type2External
            )
        })
        // Skip unreachable destinations.
        .filter(|(_, route)| route.metric < LSA_INFINITY)
        // Skip route if it's associated with the area itself.
        .filter(|(_, route)| route.area_id != Some(area.area_id))
        // Only intra-area routes are advertised into the backbone.
        .filter(|(_, route)| {
            route.path_type == PathType::IntraArea || !area.is_backbone()
        })
        // Check if the nexthops associated with this route belong to the
        // area. This is the logical equivalent of a Distance Vector
        // protocol's split horizon logic.
        .filter(|(_, route)| !area.owns_nexthops(&route.nexthops))
        .map(|(prefix, route)| (*prefix, route.metric))
        .collect();

    // Add default route for stub areas.
    if area.cfg.is_stub() {
        let default_cost = area.cfg.stub_default_cost;
        summaries.push((Ipv4Network::default_route(), default_cost));
    }

    summaries
}

fn compute_rtr_summaries(
    area: &AreaSpf,
    areas: &BTreeMap<Ipv4Addr, AreaSpf>,
    router_id: Ipv4Addr,
) -> BTreeMap<Ipv4Addr, u32> {
    let mut summaries = BTreeMap::new();

    // No router summaries are advertised into stub areas.
    if area.cfg.is_stub() {
        return summaries;
    }

    for (asbr, route) in areas
        .values()
        // Check the routing table from all other areas.
        .filter(|area_src| area_src.area_id != area.area_id)
        .flat_map(|area_src| area_src.routers.iter())
        .filter(|(asbr, _)| **asbr != router_id)
        // Only ASBR routes are advertised in summary-LSAs.
        .filter(|(_, route)| route.flags.is_asbr())
        // Skip unreachable destinations.
        .filter(|(_, route)| route.metric < LSA_INFINITY)
        // Only intra-area routes are advertised into the backbone.
        .filter(|(_, route)| {
            route.path_type == PathType::IntraArea || !area.is_backbone()
        })
        // Split horizon.
        .filter(|(_, route)| !area.owns_nexthops(&route.nexthops))
        // ASBRs reachable from within the area don't need a summary.
        .filter(|(asbr, _)| {
            area.routers
                .get(*asbr)
                .is_none_or(|route| route.path_type != PathType::IntraArea)
        })
    {
        summaries
            .entry(*asbr)
            .and_modify(|metric: &mut u32| *metric = route.metric.min(*metric))
            .or_insert(route.metric);
    }

    summaries
}

fn iface_matches_nexthop(iface: &InterfaceSummary, nexthop: &Nexthop) -> bool {
    iface.addr.ip() == nexthop.iface_addr && iface.ifindex == nexthop.ifindex
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use const_addrs::{ip4, net4};

    use super::*;
    use crate::interface::{InterfaceKey, InterfaceType};
    use crate::packet::lsa::LsaRouterFlags;
    use crate::route::{RouteNet, RouteNetFlags};

    fn iface(
        addr: &str,
        ifindex: u32,
        area_id: Ipv4Addr,
    ) -> InterfaceSummary {
        let addr: Ipv4Network = addr.parse().unwrap();
        InterfaceSummary {
            key: InterfaceKey::new(addr.ip(), 0),
            area_id,
            if_type: InterfaceType::Broadcast,
            state: ism::State::Dr,
            addr,
            ifindex,
            cost: 10,
            dr: Some(addr.ip()),
            full_nbrs: Default::default(),
            dr_full: true,
        }
    }

    fn area(area_id: Ipv4Addr, stub: bool, iface: InterfaceSummary) -> AreaSpf {
        let cfg = AreaCfg {
            area_id,
            import_external: !stub,
            stub_default_cost: 5,
            ..Default::default()
        };
        AreaSpf {
            area_id,
            cfg,
            interfaces: vec![iface],
            lsas: Default::default(),
            spt: Default::default(),
            routers: Default::default(),
        }
    }

    fn route(
        area_id: Ipv4Addr,
        path_type: PathType,
        metric: u32,
        iface: &InterfaceSummary,
    ) -> RouteNet {
        RouteNet {
            area_id: Some(area_id),
            origin: None,
            path_type,
            metric,
            type2_metric: None,
            nexthops: [Nexthop::new(
                iface.addr.ip(),
                iface.ifindex,
                Some(ip4!("10.0.0.99")),
            )]
            .into(),
            flags: RouteNetFlags::empty(),
        }
    }

    // Backbone on 10.0.0.1/24 (ifindex 1), area 0.0.0.1 on 10.0.1.1/24
    // (ifindex 2).
    fn setup(stub: bool) -> BTreeMap<Ipv4Addr, AreaSpf> {
        let backbone = ip4!("0.0.0.0");
        let area1 = ip4!("0.0.0.1");
        let mut areas = BTreeMap::new();
        areas.insert(
            backbone,
            area(backbone, false, iface("10.0.0.1/24", 1, backbone)),
        );
        areas
            .insert(area1, area(area1, stub, iface("10.0.1.1/24", 2, area1)));
        areas
    }

    fn net_summary<'a>(
        summaries: &'a AreaSummaries,
        area_id: Ipv4Addr,
        lsa_id: Ipv4Addr,
    ) -> Option<&'a LsaSummary> {
        let key = LsaKey::new(
            LsaTypeCode::SummaryNetwork.into(),
            ip4!("1.1.1.1"),
            lsa_id,
        );
        summaries.get(&area_id)?.get(&key)?.as_summary_network()
    }

    #[test]
    fn intra_area_routes_cross_areas() {
        let areas = setup(false);
        let backbone_if = areas[&ip4!("0.0.0.0")].interfaces[0].clone();
        let area1_if = areas[&ip4!("0.0.0.1")].interfaces[0].clone();

        let mut rib = Rib::new();
        rib.insert(
            net4!("172.16.0.0/24"),
            route(ip4!("0.0.0.0"), PathType::IntraArea, 20, &backbone_if),
        );
        rib.insert(
            net4!("172.16.1.0/24"),
            route(ip4!("0.0.0.1"), PathType::IntraArea, 30, &area1_if),
        );
        let summaries =
            compute_summaries(true, ip4!("1.1.1.1"), &areas, &rib);

        // Each area receives the other area's intra-area routes only.
        let s = net_summary(&summaries, ip4!("0.0.0.1"), ip4!("172.16.0.0"));
        assert_eq!(s.map(|s| s.metric), Some(20));
        let s = net_summary(&summaries, ip4!("0.0.0.0"), ip4!("172.16.1.0"));
        assert_eq!(s.map(|s| s.mask), Some(ip4!("255.255.255.0")));
        assert!(
            net_summary(&summaries, ip4!("0.0.0.0"), ip4!("172.16.0.0"))
                .is_none()
        );
        assert!(
            net_summary(&summaries, ip4!("0.0.0.1"), ip4!("172.16.1.0"))
                .is_none()
        );
    }

    #[test]
    fn inter_area_routes_not_advertised_into_backbone() {
        let areas = setup(false);
        let area1_if = areas[&ip4!("0.0.0.1")].interfaces[0].clone();

        let mut rib = Rib::new();
        rib.insert(
            net4!("172.16.9.0/24"),
            route(ip4!("0.0.0.1"), PathType::InterArea, 30, &area1_if),
        );
        let summaries =
            compute_summaries(true, ip4!("1.1.1.1"), &areas, &rib);
        assert!(
            net_summary(&summaries, ip4!("0.0.0.0"), ip4!("172.16.9.0"))
                .is_none()
        );
    }

    #[test]
    fn split_horizon_and_externals() {
        let areas = setup(false);
        let area1_if = areas[&ip4!("0.0.0.1")].interfaces[0].clone();

        let mut rib = Rib::new();
        // Backbone route whose nexthop goes through area 0.0.0.1.
        rib.insert(
            net4!("172.16.5.0/24"),
            route(ip4!("0.0.0.0"), PathType::IntraArea, 30, &area1_if),
        );
        let mut external =
            route(ip4!("0.0.0.0"), PathType::Type1External, 30, &area1_if);
        external.area_id = None;
        rib.insert(net4!("192.168.0.0/16"), external);

        let summaries =
            compute_summaries(true, ip4!("1.1.1.1"), &areas, &rib);
        assert!(
            net_summary(&summaries, ip4!("0.0.0.1"), ip4!("172.16.5.0"))
                .is_none()
        );
        assert!(summaries.values().all(|area| area.is_empty()));
    }

    #[test]
    fn stub_area_default_summary() {
        let mut areas = setup(true);
        let backbone_if = areas[&ip4!("0.0.0.0")].interfaces[0].clone();

        // ASBR reachable through the backbone.
        areas.get_mut(&ip4!("0.0.0.0")).unwrap().routers.insert(
            ip4!("9.9.9.9"),
            RouteRtr::new(
                ip4!("0.0.0.0"),
                PathType::IntraArea,
                LsaRouterFlags::E,
                15,
                route(ip4!("0.0.0.0"), PathType::IntraArea, 15, &backbone_if)
                    .nexthops,
            ),
        );

        let summaries =
            compute_summaries(true, ip4!("1.1.1.1"), &areas, &Rib::new());
        let s = net_summary(&summaries, ip4!("0.0.0.1"), ip4!("0.0.0.0"));
        let s = s.map(|s| (s.mask, s.metric));
        assert_eq!(s, Some((ip4!("0.0.0.0"), 5)));

        // No type-4 summaries into the stub area.
        let stub = &summaries[&ip4!("0.0.0.1")];
        assert!(stub.keys().all(|key| {
            key.lsa_type != LsaTypeCode::SummaryRouter.into()
        }));
    }

    #[test]
    fn asbr_summary_into_regular_area() {
        let mut areas = setup(false);
        let backbone_if = areas[&ip4!("0.0.0.0")].interfaces[0].clone();
        areas.get_mut(&ip4!("0.0.0.0")).unwrap().routers.insert(
            ip4!("9.9.9.9"),
            RouteRtr::new(
                ip4!("0.0.0.0"),
                PathType::IntraArea,
                LsaRouterFlags::E,
                15,
                route(ip4!("0.0.0.0"), PathType::IntraArea, 15, &backbone_if)
                    .nexthops,
            ),
        );

        let summaries =
            compute_summaries(true, ip4!("1.1.1.1"), &areas, &Rib::new());
        let key = LsaKey::new(
            LsaTypeCode::SummaryRouter.into(),
            ip4!("1.1.1.1"),
            ip4!("9.9.9.9"),
        );
        let body = summaries[&ip4!("0.0.0.1")].get(&key).unwrap();
        assert_eq!(body.as_summary_router().unwrap().metric, 15);
        assert!(!summaries[&ip4!("0.0.0.0")].contains_key(&key));
    }

    #[test]
    fn no_summaries_unless_abr() {
        let areas = setup(true);
        let summaries =
            compute_summaries(false, ip4!("1.1.1.1"), &areas, &Rib::new());
        assert!(summaries.is_empty());
    }
}
