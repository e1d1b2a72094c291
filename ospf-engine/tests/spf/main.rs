//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;

use const_addrs::{ip4, net4};
use ipnetwork::Ipv4Network;
use maplit::btreemap;
use ospf_engine::interface::{
    InterfaceKey, InterfaceSummary, InterfaceType, ism,
};
use ospf_engine::lsdb::{AreaSnapshot, LsdbSnapshot};
use ospf_engine::northbound::AreaCfg;
use ospf_engine::packet::Options;
use ospf_engine::packet::lsa::*;
use ospf_engine::route::{PathType, RouteNetFlags};
use ospf_engine::southbound::Nexthop;
use ospf_engine::spf;

const BACKBONE: Ipv4Addr = ip4!("0.0.0.0");
const AREA1: Ipv4Addr = ip4!("0.0.0.1");

//
// Helper functions.
//

// Point-to-point link between two routers. Router N uses address
// 10.<area>.<XY>.N on the link between routers X and Y.
#[derive(Clone, Copy)]
struct P2pLink {
    area: u8,
    a: u8,
    b: u8,
    cost: u16,
}

impl P2pLink {
    fn subnet(&self) -> u8 {
        self.a * 10 + self.b
    }

    fn addr(&self, rtr: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, self.area, self.subnet(), rtr)
    }

    fn prefix(&self) -> Ipv4Network {
        Ipv4Network::new(Ipv4Addr::new(10, self.area, self.subnet(), 0), 24)
            .unwrap()
    }

    fn peer(&self, rtr: u8) -> Option<u8> {
        if rtr == self.a {
            Some(self.b)
        } else if rtr == self.b {
            Some(self.a)
        } else {
            None
        }
    }
}

fn p2p(area: u8, a: u8, b: u8, cost: u16) -> P2pLink {
    P2pLink { area, a, b, cost }
}

fn router_id(rtr: u8) -> Ipv4Addr {
    Ipv4Addr::new(rtr, rtr, rtr, rtr)
}

fn router_lsa(
    rtr: u8,
    flags: LsaRouterFlags,
    links: &[P2pLink],
    stubs: &[(Ipv4Network, u16)],
) -> Arc<Lsa> {
    let mut lsa_links = vec![];
    for link in links {
        let Some(peer) = link.peer(rtr) else {
            continue;
        };
        lsa_links.push(LsaRouterLink::new(
            LsaRouterLinkType::PointToPoint,
            router_id(peer),
            link.addr(rtr),
            link.cost,
        ));
        lsa_links.push(LsaRouterLink::new(
            LsaRouterLinkType::StubNetwork,
            link.prefix().network(),
            link.prefix().mask(),
            link.cost,
        ));
    }
    for (prefix, cost) in stubs {
        lsa_links.push(LsaRouterLink::new(
            LsaRouterLinkType::StubNetwork,
            prefix.network(),
            prefix.mask(),
            *cost,
        ));
    }

    Arc::new(Lsa::new(
        0,
        Options::E,
        router_id(rtr),
        router_id(rtr),
        0x80000001,
        LsaBody::Router(LsaRouter::new(flags, lsa_links)),
    ))
}

// Interfaces of router 1, numbered in the order of the given links.
fn interfaces(links: &[P2pLink]) -> Vec<InterfaceSummary> {
    links
        .iter()
        .filter(|link| link.peer(1).is_some())
        .enumerate()
        .map(|(idx, link)| {
            let addr = Ipv4Network::new(link.addr(1), 24).unwrap();
            let peer = link.peer(1).unwrap();
            InterfaceSummary {
                key: InterfaceKey::new(addr.ip(), 0),
                area_id: Ipv4Addr::new(0, 0, 0, link.area),
                if_type: InterfaceType::PointToPoint,
                state: ism::State::PointToPoint,
                addr,
                ifindex: idx as u32 + 1,
                cost: link.cost,
                dr: None,
                full_nbrs: [(router_id(peer), link.addr(peer))].into(),
                dr_full: false,
            }
        })
        .collect()
}

fn area_snapshot(
    area_id: Ipv4Addr,
    interfaces: Vec<InterfaceSummary>,
    lsas: Vec<Arc<Lsa>>,
) -> AreaSnapshot {
    AreaSnapshot {
        cfg: AreaCfg {
            area_id,
            ..Default::default()
        },
        interfaces,
        lsas: lsas.into_iter().map(|lsa| (lsa.key(), lsa)).collect(),
    }
}

fn snapshot(
    is_abr: bool,
    areas: BTreeMap<Ipv4Addr, AreaSnapshot>,
    as_lsas: Vec<Arc<Lsa>>,
) -> LsdbSnapshot {
    LsdbSnapshot {
        router_id: router_id(1),
        is_abr,
        areas,
        as_lsas: as_lsas.into_iter().map(|lsa| (lsa.key(), lsa)).collect(),
    }
}

// Plain Dijkstra over the router graph, used as the reference result.
fn reference_distances(links: &[P2pLink]) -> BTreeMap<u8, u32> {
    let mut dist = btreemap! { 1 => 0 };
    let mut done = BTreeSet::new();
    loop {
        let Some((rtr, d)) = dist
            .iter()
            .filter(|(rtr, _)| !done.contains(*rtr))
            .min_by_key(|(_, d)| **d)
            .map(|(rtr, d)| (*rtr, *d))
        else {
            break;
        };
        done.insert(rtr);
        for link in links {
            let Some(peer) = link.peer(rtr) else {
                continue;
            };
            let new = d + link.cost as u32;
            if dist.get(&peer).is_none_or(|old| new < *old) {
                dist.insert(peer, new);
            }
        }
    }
    dist
}

fn nexthop(link: &P2pLink, ifindex: u32, peer: u8) -> Nexthop {
    Nexthop::new(link.addr(1), ifindex, Some(link.addr(peer)))
}

//
// Test topologies.
//
//    R1 ---10--- R2
//    |           | \
//    10          30 10
//    |           |   \
//    R3 ---30----+    R4 -- 10.0.4.0/24 (cost 1)
//     \              /
//      +-----10-----+
//
fn square() -> Vec<P2pLink> {
    vec![
        p2p(0, 1, 2, 10),
        p2p(0, 1, 3, 10),
        p2p(0, 2, 3, 30),
        p2p(0, 2, 4, 10),
        p2p(0, 3, 4, 10),
    ]
}

fn square_snapshot() -> LsdbSnapshot {
    let links = square();
    let stub = (net4!("10.0.4.0/24"), 1);
    let lsas = vec![
        router_lsa(1, LsaRouterFlags::empty(), &links, &[]),
        router_lsa(2, LsaRouterFlags::empty(), &links, &[]),
        router_lsa(3, LsaRouterFlags::empty(), &links, &[]),
        router_lsa(4, LsaRouterFlags::empty(), &links, &[stub]),
    ];
    let area = area_snapshot(BACKBONE, interfaces(&links), lsas);
    snapshot(false, btreemap! { BACKBONE => area }, vec![])
}

//
// Tests.
//

#[test]
fn shortest_paths_match_reference() {
    let links = square();
    let output = spf::compute(&square_snapshot(), 16);
    let reference = reference_distances(&links);

    // Every transit link's subnet is reached through the closest of its two
    // endpoints.
    for link in &links {
        let expected = std::cmp::min(reference[&link.a], reference[&link.b])
            + link.cost as u32;
        let route = &output.rib[&link.prefix()];
        assert_eq!(route.metric, expected, "prefix {}", link.prefix());
        assert_eq!(route.path_type, PathType::IntraArea);
        assert_eq!(route.area_id, Some(BACKBONE));
    }

    let route = &output.rib[&net4!("10.0.4.0/24")];
    assert_eq!(route.metric, reference[&4] + 1);

    // The calculating router isn't part of the router table.
    let area = &output.areas[&BACKBONE];
    assert!(!area.routers.contains_key(&router_id(1)));
    assert_eq!(area.spt.len(), 4);
}

#[test]
fn equal_cost_multipath() {
    let links = square();
    let output = spf::compute(&square_snapshot(), 16);

    let route = &output.rib[&net4!("10.0.4.0/24")];
    assert_eq!(route.metric, 21);
    assert_eq!(
        route.nexthops,
        BTreeSet::from([nexthop(&links[0], 1, 2), nexthop(&links[1], 2, 3)])
    );
    assert!(!route.flags.contains(RouteNetFlags::CONNECTED));

    // Both ends of the R2-R3 link are equally distant.
    let route = &output.rib[&links[2].prefix()];
    assert_eq!(route.metric, 40);
    assert_eq!(route.nexthops.len(), 2);

    // Directly connected subnets.
    let route = &output.rib[&links[0].prefix()];
    assert_eq!(route.metric, 10);
    assert!(route.flags.contains(RouteNetFlags::CONNECTED));
    assert_eq!(
        route.nexthops,
        BTreeSet::from([Nexthop::new(links[0].addr(1), 1, None)])
    );
}

#[test]
fn max_paths_limits_ecmp() {
    let output = spf::compute(&square_snapshot(), 1);
    let route = &output.rib[&net4!("10.0.4.0/24")];
    assert_eq!(route.metric, 21);
    assert_eq!(route.nexthops.len(), 1);
}

#[test]
fn inter_area_routes() {
    // R1 is an internal router of area 1. R2 is the area's ABR.
    let link = p2p(1, 1, 2, 10);
    let summary = Arc::new(Lsa::new(
        0,
        Options::E,
        ip4!("10.0.50.0"),
        router_id(2),
        0x80000001,
        LsaBody::SummaryNetwork(LsaSummary::new(ip4!("255.255.255.0"), 5)),
    ));
    // Summary from a router that isn't reachable.
    let unreachable = Arc::new(Lsa::new(
        0,
        Options::E,
        ip4!("10.0.60.0"),
        router_id(9),
        0x80000001,
        LsaBody::SummaryNetwork(LsaSummary::new(ip4!("255.255.255.0"), 5)),
    ));
    // Summary with a non-contiguous netmask.
    let bad_mask = Arc::new(Lsa::new(
        0,
        Options::E,
        ip4!("10.0.70.0"),
        router_id(2),
        0x80000001,
        LsaBody::SummaryNetwork(LsaSummary::new(ip4!("255.0.255.0"), 5)),
    ));
    let lsas = vec![
        router_lsa(1, LsaRouterFlags::empty(), &[link], &[]),
        router_lsa(2, LsaRouterFlags::B, &[link], &[]),
        summary,
        unreachable,
        bad_mask,
    ];
    let area = area_snapshot(AREA1, interfaces(&[link]), lsas);
    let snapshot = snapshot(false, btreemap! { AREA1 => area }, vec![]);
    let output = spf::compute(&snapshot, 16);

    let route = &output.rib[&net4!("10.0.50.0/24")];
    assert_eq!(route.path_type, PathType::InterArea);
    assert_eq!(route.metric, 15);
    assert_eq!(route.nexthops, BTreeSet::from([nexthop(&link, 1, 2)]));
    assert!(!output.rib.contains_key(&net4!("10.0.60.0/24")));
    assert!(
        output
            .rib
            .keys()
            .all(|prefix| !prefix.contains(ip4!("10.0.70.0")))
    );

    // Non-ABRs don't originate summaries.
    assert!(output.summaries.is_empty());
}

#[test]
fn external_routes() {
    let link = p2p(0, 1, 2, 10);
    let external = |prefix: Ipv4Network, flags, metric| {
        Arc::new(Lsa::new(
            0,
            Options::E,
            prefix.network(),
            router_id(2),
            0x80000001,
            LsaBody::AsExternal(LsaAsExternal::new(
                prefix.mask(),
                flags,
                metric,
                None,
                0,
            )),
        ))
    };
    let lsas = vec![
        router_lsa(1, LsaRouterFlags::empty(), &[link], &[]),
        router_lsa(
            2,
            LsaRouterFlags::E,
            &[link],
            &[(net4!("192.168.0.0/24"), 5)],
        ),
    ];
    let as_lsas = vec![
        external(net4!("172.16.0.0/16"), LsaAsExternalFlags::E, 100),
        external(net4!("172.17.0.0/16"), LsaAsExternalFlags::empty(), 20),
        // Also reachable as an intra-area route.
        external(net4!("192.168.0.0/24"), LsaAsExternalFlags::empty(), 1),
    ];
    let area = area_snapshot(BACKBONE, interfaces(&[link]), lsas);
    let snapshot = snapshot(false, btreemap! { BACKBONE => area }, as_lsas);
    let output = spf::compute(&snapshot, 16);

    let route = &output.rib[&net4!("172.16.0.0/16")];
    assert_eq!(route.path_type, PathType::Type2External);
    assert_eq!(route.metric, 10);
    assert_eq!(route.type2_metric, Some(100));
    assert_eq!(route.area_id, None);
    assert_eq!(route.nexthops, BTreeSet::from([nexthop(&link, 1, 2)]));

    let route = &output.rib[&net4!("172.17.0.0/16")];
    assert_eq!(route.path_type, PathType::Type1External);
    assert_eq!(route.metric, 30);
    assert_eq!(route.type2_metric, None);

    let route = &output.rib[&net4!("192.168.0.0/24")];
    assert_eq!(route.path_type, PathType::IntraArea);
    assert_eq!(route.metric, 15);
}

#[test]
fn abr_summaries() {
    // R1 attaches to the backbone (towards R2) and to area 1 (towards R3).
    let link0 = p2p(0, 1, 2, 10);
    let link1 = p2p(1, 1, 3, 10);
    let stub = (net4!("10.1.3.0/24"), 1);
    let backbone = area_snapshot(
        BACKBONE,
        interfaces(&[link0]),
        vec![
            router_lsa(1, LsaRouterFlags::B, &[link0], &[]),
            router_lsa(2, LsaRouterFlags::empty(), &[link0], &[]),
        ],
    );
    let mut iface1 = interfaces(&[link1]);
    iface1[0].ifindex = 2;
    let area1 = area_snapshot(
        AREA1,
        iface1,
        vec![
            router_lsa(1, LsaRouterFlags::B, &[link1], &[]),
            router_lsa(3, LsaRouterFlags::empty(), &[link1], &[stub]),
        ],
    );
    let snapshot = snapshot(
        true,
        btreemap! { BACKBONE => backbone, AREA1 => area1 },
        vec![],
    );
    let output = spf::compute(&snapshot, 16);

    let summary = |prefix: Ipv4Network, metric| {
        (
            LsaKey::new(
                LsaTypeCode::SummaryNetwork.into(),
                router_id(1),
                prefix.network(),
            ),
            LsaBody::SummaryNetwork(LsaSummary::new(prefix.mask(), metric)),
        )
    };
    assert_eq!(
        output.summaries[&BACKBONE],
        BTreeMap::from([
            summary(link1.prefix(), 10),
            summary(net4!("10.1.3.0/24"), 11),
        ])
    );
    assert_eq!(
        output.summaries[&AREA1],
        BTreeMap::from([summary(link0.prefix(), 10)])
    );
}
