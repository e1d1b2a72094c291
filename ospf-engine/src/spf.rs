//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use derive_new::new;
use enum_as_inner::EnumAsInner;
use ipnetwork::Ipv4Network;
use ospf_utils::ip::Ipv4AddrExt;
use ospf_utils::task::TimeoutTask;
use ospf_utils::{UnboundedReceiver, UnboundedSender};
use smallvec::SmallVec;
use tokio::sync::oneshot;

use crate::area::{self, AreaSpf, AreaSummaries};
use crate::debug::Debug;
use crate::error::Error;
use crate::lsdb::LsdbSnapshot;
use crate::northbound::{GlobalCfg, RouteState};
use crate::packet::lsa::{
    Lsa, LsaKey, LsaRouterFlags, LsaRouterLink, LsaRouterLinkType,
    LsaTypeCode,
};
use crate::route::{self, Nexthops, PathType, Rib, RouteRtr};
use crate::southbound::{Nexthop, RouteSink};
use crate::tasks;
use crate::tasks::messages::{LsdbMsg, SpfMsg};

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum VertexId {
    // Network vertices sort first so that, at equal distances, transit
    // networks are settled before routers.
    Network { dr_addr: Ipv4Addr },
    Router { router_id: Ipv4Addr },
}

#[derive(Clone, Debug, Eq, EnumAsInner, PartialEq)]
pub enum VertexLsa {
    Network(Arc<Lsa>),
    Router(Arc<Lsa>),
}

#[derive(Debug, new)]
pub struct Vertex {
    pub id: VertexId,
    pub lsa: VertexLsa,
    pub distance: u32,
    // Number of routers between the root and this vertex.
    pub hops: u16,
    #[new(default)]
    pub nexthops: Nexthops,
}

#[derive(Debug, new)]
struct SpfLink<'a> {
    parent: Option<&'a LsaRouterLink>,
    id: VertexId,
    lsa: VertexLsa,
    cost: u16,
}

// Stub network or transit network attached to a vertex of the shortest-path
// tree.
#[derive(Debug)]
pub struct SpfIntraAreaNetwork<'a> {
    pub vertex: &'a Vertex,
    pub prefix: Ipv4Network,
    pub metric: u16,
    // Interface attached to the network, for stubs of the calculating router.
    pub connected: Option<Nexthop>,
}

// Result of a routing table calculation.
#[derive(Debug)]
pub struct SpfOutput {
    pub areas: BTreeMap<Ipv4Addr, AreaSpf>,
    pub rib: Rib,
    pub summaries: AreaSummaries,
}

// SPF component. Sole owner of the routing table.
pub struct Spf {
    max_paths: u16,
    spf_delay: Duration,
    spfp: UnboundedSender<SpfMsg>,
    lsdbp: UnboundedSender<LsdbMsg>,
    sink: Arc<dyn RouteSink>,
    delay_timer: Option<TimeoutTask>,
    rib: Rib,
    routers: BTreeMap<Ipv4Addr, BTreeMap<Ipv4Addr, RouteRtr>>,
}

// ===== impl VertexLsa =====

impl VertexLsa {
    fn lsa(&self) -> &Arc<Lsa> {
        match self {
            VertexLsa::Network(lsa) | VertexLsa::Router(lsa) => lsa,
        }
    }

    pub fn router_id(&self) -> Ipv4Addr {
        self.lsa().hdr.adv_rtr
    }

    pub fn router_flags(&self) -> LsaRouterFlags {
        self.lsa()
            .body
            .as_router()
            .map(|body| body.flags)
            .unwrap_or_default()
    }

    fn router_links(&self) -> &[LsaRouterLink] {
        match self {
            VertexLsa::Router(lsa) => lsa
                .body
                .as_router()
                .map(|body| body.links.as_slice())
                .unwrap_or_default(),
            VertexLsa::Network(_) => &[],
        }
    }

    // Prefix of a Network-LSA vertex.
    fn network_prefix(&self) -> Option<Ipv4Network> {
        let lsa = self.as_network()?;
        let body = lsa.body.as_network()?;
        lsa.hdr.lsa_id.with_netmask(body.mask)
    }

    pub fn origin(&self) -> LsaKey {
        self.lsa().key()
    }
}

// ===== impl AreaSpf =====

impl AreaSpf {
    fn vertex_lsa_find(&self, id: VertexId) -> Option<VertexLsa> {
        match id {
            VertexId::Network { dr_addr } => {
                // SPF needs to find a Network-LSA knowing only its LS-ID but
                // not its advertising router.
                self.lsas_by_type(LsaTypeCode::Network)
                    .find(|lsa| lsa.hdr.lsa_id == dr_addr)
                    .filter(|lsa| lsa.body.as_network().is_some())
                    .map(|lsa| VertexLsa::Network(lsa.clone()))
            }
            VertexId::Router { router_id } => {
                let lsa_key = LsaKey::new(
                    LsaTypeCode::Router.into(),
                    router_id,
                    router_id,
                );
                self.lsas
                    .get(&lsa_key)
                    .filter(|lsa| !lsa.hdr.is_maxage())
                    .filter(|lsa| lsa.body.as_router().is_some())
                    .map(|lsa| VertexLsa::Router(lsa.clone()))
            }
        }
    }

    fn vertex_lsa_links<'a>(
        &self,
        vertex_lsa: &'a VertexLsa,
    ) -> SmallVec<[SpfLink<'a>; 8]> {
        match vertex_lsa {
            VertexLsa::Network(lsa) => {
                let Some(lsa_body) = lsa.body.as_network() else {
                    return SmallVec::new();
                };
                lsa_body
                    .attached_rtrs
                    .iter()
                    .filter_map(|router_id| {
                        let link_vid = VertexId::Router {
                            router_id: *router_id,
                        };
                        self.vertex_lsa_find(link_vid).map(|link_vlsa| {
                            SpfLink::new(None, link_vid, link_vlsa, 0)
                        })
                    })
                    .collect()
            }
            VertexLsa::Router(_) => vertex_lsa
                .router_links()
                .iter()
                .filter_map(|link| match link.link_type {
                    LsaRouterLinkType::PointToPoint => {
                        let link_vid = VertexId::Router {
                            router_id: link.link_id,
                        };
                        Some((link, link_vid))
                    }
                    LsaRouterLinkType::TransitNetwork => {
                        let link_vid = VertexId::Network {
                            dr_addr: link.link_id,
                        };
                        Some((link, link_vid))
                    }
                    LsaRouterLinkType::StubNetwork
                    | LsaRouterLinkType::VirtualLink => None,
                })
                .filter_map(|(link, link_vid)| {
                    self.vertex_lsa_find(link_vid).map(|link_vlsa| {
                        let cost = link.metric;
                        SpfLink::new(Some(link), link_vid, link_vlsa, cost)
                    })
                })
                .collect(),
        }
    }

    // Lists the networks attached to the shortest-path tree.
    pub(crate) fn intra_area_networks(&self) -> Vec<SpfIntraAreaNetwork<'_>> {
        let mut stubs = vec![];

        for vertex in self.spt.values() {
            match &vertex.lsa {
                VertexLsa::Network(_) => {
                    let Some(prefix) = vertex.lsa.network_prefix() else {
                        continue;
                    };
                    stubs.push(SpfIntraAreaNetwork {
                        vertex,
                        prefix,
                        metric: 0,
                        connected: None,
                    });
                }
                VertexLsa::Router(_) => {
                    stubs.extend(
                        vertex
                            .lsa
                            .router_links()
                            .iter()
                            .filter(|link| {
                                link.link_type == LsaRouterLinkType::StubNetwork
                            })
                            .filter_map(|link| {
                                let prefix =
                                    link.link_id.with_netmask(link.link_data)?;
                                let connected = (vertex.hops == 0)
                                    .then(|| self.interface_by_prefix(&prefix))
                                    .flatten()
                                    .map(|iface| {
                                        Nexthop::new(
                                            iface.addr.ip(),
                                            iface.ifindex,
                                            None,
                                        )
                                    });
                                Some(SpfIntraAreaNetwork {
                                    vertex,
                                    prefix,
                                    metric: link.metric,
                                    connected,
                                })
                            }),
                    );
                }
            }
        }

        stubs
    }
}

// ===== impl Spf =====

impl Spf {
    pub fn new(
        cfg: &GlobalCfg,
        spfp: UnboundedSender<SpfMsg>,
        lsdbp: UnboundedSender<LsdbMsg>,
        sink: Arc<dyn RouteSink>,
    ) -> Spf {
        Spf {
            max_paths: cfg.max_paths,
            spf_delay: cfg.spf_delay(),
            spfp,
            lsdbp,
            sink,
            delay_timer: None,
            rib: Default::default(),
            routers: Default::default(),
        }
    }

    pub async fn run(mut self, mut spfc: UnboundedReceiver<SpfMsg>) {
        while let Some(msg) = spfc.recv().await {
            match msg {
                SpfMsg::Schedule => {
                    // Coalesce SPF requests.
                    if self.delay_timer.is_none() {
                        self.delay_timer = Some(tasks::spf_delay_timer(
                            &self.spfp,
                            self.spf_delay,
                        ));
                    }
                }
                SpfMsg::DelayTimer => {
                    self.delay_timer = None;
                    if let Err(error) = self.run_spf().await {
                        error.log();
                    }
                }
                SpfMsg::GetState { reply } => {
                    let _ = reply.send(self.state());
                }
                SpfMsg::Stop { ack } => {
                    self.delay_timer = None;
                    route::uninstall_all(&mut self.rib, self.sink.as_ref());
                    let _ = ack.send(());
                    return;
                }
            }
        }
    }

    async fn run_spf(&mut self) -> Result<(), Error> {
        // Get a consistent copy of the LSDB.
        let (reply_tx, reply_rx) = oneshot::channel();
        self.lsdbp
            .send(LsdbMsg::Snapshot { reply: reply_tx })
            .map_err(|_| Error::ChannelClosed("lsdb"))?;
        let snapshot =
            reply_rx.await.map_err(|_| Error::ChannelClosed("lsdb"))?;

        Debug::SpfStart.log();
        let mut output = compute(&snapshot, self.max_paths);

        // Push the routing table deltas to the route sink.
        let old_rib = std::mem::take(&mut self.rib);
        let changes = route::update_global_rib(
            &mut output.rib,
            old_rib,
            self.sink.as_ref(),
        );
        self.rib = output.rib;
        self.routers = output
            .areas
            .into_iter()
            .map(|(area_id, area)| (area_id, area.routers))
            .collect();
        Debug::SpfFinish(changes).log();

        // Update summary LSAs.
        self.lsdbp
            .send(LsdbMsg::Summaries(output.summaries))
            .map_err(|_| Error::ChannelClosed("lsdb"))?;

        Ok(())
    }

    fn state(&self) -> Vec<RouteState> {
        let networks = self
            .rib
            .iter()
            .map(|(prefix, route)| route.state(prefix));
        let routers = self.routers.values().flat_map(|routers| {
            routers
                .iter()
                .map(|(router_id, route)| route.state(router_id))
        });
        networks.chain(routers).collect()
    }
}

// ===== global functions =====

// Computes the routing table and the ABR summaries out of an LSDB snapshot.
pub fn compute(snapshot: &LsdbSnapshot, max_paths: u16) -> SpfOutput {
    let mut areas: BTreeMap<_, _> = snapshot
        .areas
        .iter()
        .map(|(area_id, area)| (*area_id, AreaSpf::new(*area_id, area)))
        .filter(|(_, area)| area.is_active())
        .collect();

    // Calculate shortest-path trees.
    for area in areas.values_mut() {
        run_area(area, snapshot.router_id);
    }

    // Compute the routing table.
    let rib = route::compute_rib(snapshot, &mut areas, max_paths);

    // Compute summary LSAs.
    let summaries = area::compute_summaries(
        snapshot.is_abr,
        snapshot.router_id,
        &areas,
        &rib,
    );

    SpfOutput {
        areas,
        rib,
        summaries,
    }
}

// ===== helper functions =====

// Runs SPF in the provided area (RFC 2328, Section 16.1).
fn run_area(area: &mut AreaSpf, router_id: Ipv4Addr) {
    area.spt.clear();
    area.routers.clear();

    // Get root vertex.
    let root_vid = VertexId::Router { router_id };
    let Some(root_vlsa) = area.vertex_lsa_find(root_vid) else {
        Error::SpfRootNotFound(area.area_id).log();
        return;
    };
    let root_v = Vertex::new(root_vid, root_vlsa, 0, 0);

    // Initialize SPT and candidate list.
    let mut spt = BTreeMap::new();
    let mut cand_list = BTreeMap::new();
    cand_list.insert((root_v.distance, root_v.id), root_v);

    // Main SPF loop.
    while let Some((_, vertex)) = cand_list.pop_first() {
        if vertex.lsa.is_router() && vertex.id != root_vid {
            // Add "router" routing table entry.
            let route = RouteRtr::new(
                area.area_id,
                PathType::IntraArea,
                vertex.lsa.router_flags(),
                vertex.distance,
                vertex.nexthops.clone(),
            );
            area.routers.insert(vertex.lsa.router_id(), route);
        }

        // Iterate over all links described by the vertex's LSA.
        for link in area.vertex_lsa_links(&vertex.lsa) {
            // Check if the link's vertex is already on the shortest-path tree.
            if link.id == vertex.id || spt.contains_key(&link.id) {
                continue;
            }

            // Check if the LSAs are mutually linked.
            if !area
                .vertex_lsa_links(&link.lsa)
                .iter()
                .any(|back_link| back_link.id == vertex.id)
            {
                continue;
            }

            // Calculate distance to the link's vertex.
            let distance = vertex.distance.saturating_add(link.cost.into());

            // Increment number of hops to the root.
            let mut hops = vertex.hops;
            if link.lsa.is_router() {
                hops = hops.saturating_add(1);
            }

            // Check if this vertex is already present on the candidate list.
            if let Some(cand_key) = cand_list
                .iter()
                .find(|(_, cand_v)| cand_v.id == link.id)
                .map(|(cand_key, _)| *cand_key)
            {
                match distance.cmp(&cand_key.0) {
                    Ordering::Less => {
                        // Remove vertex since its key has changed. It will be
                        // re-added with the correct key below.
                        cand_list.remove(&cand_key);
                    }
                    Ordering::Equal => {}
                    Ordering::Greater => {
                        // Ignore higher cost path.
                        continue;
                    }
                }
            }
            let cand_v =
                cand_list.entry((distance, link.id)).or_insert_with(|| {
                    Vertex::new(link.id, link.lsa.clone(), distance, hops)
                });

            // Update vertex's nexthops.
            match calc_nexthops(area, &vertex, link.parent, link.id, &link.lsa)
            {
                Ok(nexthops) => cand_v.nexthops.extend(nexthops),
                Err(error) => error.log(),
            }
        }

        // Add vertex to SPT.
        spt.insert(vertex.id, vertex);
    }

    area.spt = spt;
}

// Computes the set of nexthops that should be used to reach the given
// destination (RFC 2328, Section 16.1.1).
fn calc_nexthops(
    area: &AreaSpf,
    parent: &Vertex,
    parent_link: Option<&LsaRouterLink>,
    dest_id: VertexId,
    dest_lsa: &VertexLsa,
) -> Result<Nexthops, Error> {
    // If there is at least one intervening router in the current shortest
    // path between the destination and the root, the destination simply
    // inherits the set of next hops from the parent.
    if parent.hops != 0 {
        return Ok(parent.nexthops.clone());
    }

    let mut nexthops = Nexthops::new();
    match &parent.lsa {
        // The parent vertex is the root. The destination is either a directly
        // connected network or directly connected router, and the outgoing
        // interface is simply the one connecting to it.
        VertexLsa::Router(_) => {
            let parent_link =
                parent_link.ok_or(Error::SpfNexthopCalcError(dest_id))?;
            let iface = area
                .interface_by_link_data(parent_link.link_data)
                .ok_or(Error::SpfNexthopCalcError(dest_id))?;

            match dest_lsa {
                VertexLsa::Router(_) => {
                    if iface.is_unnumbered() {
                        // Use the neighbor's source address.
                        let router_id = dest_lsa.router_id();
                        if let Some(src) = iface.full_nbrs.get(&router_id) {
                            nexthops.insert(Nexthop::new(
                                iface.addr.ip(),
                                iface.ifindex,
                                Some(*src),
                            ));
                        }
                    } else {
                        // The neighbor's links pointing back into the
                        // interface's subnet provide the nexthop addresses.
                        nexthops.extend(
                            dest_lsa
                                .router_links()
                                .iter()
                                .filter(|link| {
                                    link.link_type
                                        != LsaRouterLinkType::StubNetwork
                                })
                                .filter(|link| {
                                    iface.addr.contains(link.link_data)
                                })
                                .map(|link| {
                                    Nexthop::new(
                                        iface.addr.ip(),
                                        iface.ifindex,
                                        Some(link.link_data),
                                    )
                                }),
                        );
                    }
                    if nexthops.is_empty() {
                        return Err(Error::SpfNexthopCalcError(dest_id));
                    }
                }
                VertexLsa::Network(_) => {
                    nexthops.insert(Nexthop::new(
                        iface.addr.ip(),
                        iface.ifindex,
                        None,
                    ));
                }
            }
        }
        // The parent vertex is a network that directly connects the
        // calculating router to the destination router. For each link in the
        // router-LSA that points back to the parent network, the link's Link
        // Data field provides the IP address of a next hop router.
        VertexLsa::Network(_) => {
            let parent_network = parent
                .lsa
                .network_prefix()
                .ok_or(Error::SpfNexthopCalcError(dest_id))?;
            let dest_link = dest_lsa
                .router_links()
                .iter()
                .filter(|link| {
                    link.link_type == LsaRouterLinkType::TransitNetwork
                })
                .find(|link| parent_network.contains(link.link_data))
                .ok_or(Error::SpfNexthopCalcError(dest_id))?;

            // Inherit outgoing interface from the parent network.
            let parent_nexthop = parent
                .nexthops
                .first()
                .ok_or(Error::SpfNexthopCalcError(dest_id))?;

            nexthops.insert(Nexthop::new(
                parent_nexthop.iface_addr,
                parent_nexthop.ifindex,
                Some(dest_link.link_data),
            ));
        }
    }

    Ok(nexthops)
}

// ===== unit tests =====
