//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;
#[cfg(not(feature = "deterministic"))]
use std::time::Duration;

use bitflags::bitflags;
use ipnetwork::Ipv4Network;
use ospf_utils::task::{IntervalTask, TimeoutTask};
use ospf_utils::{UnboundedReceiver, UnboundedSender};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::debug::{Debug, LsaFlushReason};
use crate::error::Error;
use crate::interface::{InterfaceKey, InterfaceSummary, InterfaceType, ism};
use crate::neighbor::NeighborKey;
use crate::northbound::{AreaCfg, GlobalCfg, LsdbState};
use crate::packet::Options;
use crate::packet::lsa::{
    Lsa, LsaAsExternal, LsaAsExternalFlags, LsaBody, LsaHdr, LsaKey,
    LsaNetwork, LsaRouter, LsaRouterFlags, LsaRouterLink, LsaRouterLinkType,
    LsaType, LsaTypeCode,
};
use crate::tasks;
use crate::tasks::messages::{FloodMsg, LsdbMsg, SpfMsg};

// Architectural Constants.
pub const LSA_REFRESH_TIME: u16 = 1800;
pub const LSA_MAX_AGE: u16 = 3600;
pub const LSA_MAX_AGE_DIFF: u16 = 900;
pub const LSA_CHECK_AGE: u16 = 300;
pub const LSA_INFINITY: u32 = 0x00ffffff;
pub const LSA_INIT_SEQ_NO: u32 = 0x80000001;
pub const LSA_MAX_SEQ_NO: u32 = 0x7fffffff;
pub const LSA_RESERVED_SEQ_NO: u32 = 0x80000000;
pub const LSA_MIN_INTERVAL: u64 = 5;
pub const LSA_MIN_ARRIVAL: u64 = 1;

// Flooding scope of an LSDB.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LsdbId {
    Area(Ipv4Addr),
    As,
}

#[derive(Debug)]
pub struct LsaEntry {
    // LSA data.
    pub data: Arc<Lsa>,
    // LSA entry flags.
    pub flags: LsaEntryFlags,
    // Time the LSA was received through flooding.
    pub rcvd_time: Option<Instant>,
    // Time the LSA was last originated by this router.
    pub orig_time: Option<Instant>,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct LsaEntryFlags: u8 {
        const RECEIVED = 0x01;
        const SELF_ORIGINATED = 0x02;
    }
}

// Origination postponed by the MinLSInterval check.
#[derive(Debug)]
pub struct LsaDelayedOrig {
    pub data: Lsa,
    pub timeout: TimeoutTask,
}

// LSAs of a single flooding scope.
#[derive(Debug, Default)]
pub struct LsdbMap {
    lsas: BTreeMap<LsaKey, LsaEntry>,
    // Sequence numbers of self-originated LSAs that were flushed and removed.
    seqno_memory: HashMap<LsaKey, u32>,
    delayed_orig: HashMap<LsaKey, LsaDelayedOrig>,
    // LSAs to originate once their MaxSequenceNumber instance is gone.
    seqno_wrapping: HashMap<LsaKey, Lsa>,
}

#[derive(Debug)]
pub struct AreaLsdb {
    pub cfg: AreaCfg,
    pub map: LsdbMap,
    pub interfaces: BTreeMap<InterfaceKey, InterfaceSummary>,
    // Summary-LSAs computed by the last SPF run.
    pub summaries: BTreeMap<LsaKey, LsaBody>,
}

// Result of the installation attempt of an LSA received in an LS Update.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LsaRcvdOutcome {
    // The LSA was newer and got installed (and flooded).
    Installed,
    // MaxAge LSA with no database copy: acknowledge and discard.
    MaxAgeAck,
    // Discarded by the MinLSArrival check.
    MinArrivalDiscard,
    // Same instance as the database copy.
    Duplicate,
    // The database copy is newer. It's sent back to the neighbor unless the
    // MinLSArrival check says otherwise.
    DbCopyNewer(Option<Arc<Lsa>>),
    // LSA type not acceptable in the area.
    Discard,
}

// Read-only LSDB copy handed to the SPF task.
#[derive(Clone, Debug)]
pub struct LsdbSnapshot {
    pub router_id: Ipv4Addr,
    pub is_abr: bool,
    pub areas: BTreeMap<Ipv4Addr, AreaSnapshot>,
    pub as_lsas: BTreeMap<LsaKey, Arc<Lsa>>,
}

#[derive(Clone, Debug)]
pub struct AreaSnapshot {
    pub cfg: AreaCfg,
    pub interfaces: Vec<InterfaceSummary>,
    pub lsas: BTreeMap<LsaKey, Arc<Lsa>>,
}

// LSDB component. Sole owner of every LSA known to the instance.
#[derive(Debug)]
pub struct Lsdb {
    router_id: Ipv4Addr,
    asbr: bool,
    areas: BTreeMap<Ipv4Addr, AreaLsdb>,
    as_lsdb: LsdbMap,
    external_routes: BTreeMap<Ipv4Network, u32>,
    lsdbp: UnboundedSender<LsdbMsg>,
    floodp: UnboundedSender<FloodMsg>,
    spfp: UnboundedSender<SpfMsg>,
    age_tick: Option<IntervalTask>,
}

// ===== impl LsdbMap =====

impl LsdbMap {
    pub fn get(&self, key: &LsaKey) -> Option<&LsaEntry> {
        self.lsas.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LsaKey, &LsaEntry)> {
        self.lsas.iter()
    }

    // Iterates over the LSAs of the given type.
    pub fn iter_by_type(
        &self,
        lsa_type: LsaType,
    ) -> impl Iterator<Item = (&LsaKey, &LsaEntry)> {
        let start = LsaKey::new(
            lsa_type,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
        );
        let end =
            LsaKey::new(lsa_type, Ipv4Addr::BROADCAST, Ipv4Addr::BROADCAST);
        self.lsas.range(start..=end)
    }

    pub fn len(&self) -> usize {
        self.lsas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lsas.is_empty()
    }
}

// ===== impl AreaLsdb =====

impl AreaLsdb {
    fn new(cfg: AreaCfg) -> AreaLsdb {
        AreaLsdb {
            cfg,
            map: Default::default(),
            interfaces: Default::default(),
            summaries: Default::default(),
        }
    }

    // An area is active when at least one of its interfaces is operational.
    fn is_active(&self) -> bool {
        self.interfaces
            .values()
            .any(|iface| iface.state != ism::State::Down)
    }

    fn options(&self) -> Options {
        let mut options = Options::empty();
        if self.cfg.import_external {
            options.insert(Options::E);
        }
        options
    }
}

// ===== impl Lsdb =====

impl Lsdb {
    pub fn new(
        cfg: &GlobalCfg,
        lsdbp: UnboundedSender<LsdbMsg>,
        floodp: UnboundedSender<FloodMsg>,
        spfp: UnboundedSender<SpfMsg>,
    ) -> Lsdb {
        Lsdb {
            router_id: cfg.router_id,
            asbr: cfg.asbr,
            areas: Default::default(),
            as_lsdb: Default::default(),
            external_routes: Default::default(),
            lsdbp,
            floodp,
            spfp,
            age_tick: None,
        }
    }

    pub async fn run(mut self, mut lsdbc: UnboundedReceiver<LsdbMsg>) {
        self.age_tick = Some(tasks::lsdb_age_tick(&self.lsdbp));

        while let Some(msg) = lsdbc.recv().await {
            if let LsdbMsg::Stop { ack } = msg {
                self.age_tick = None;
                let _ = ack.send(());
                return;
            }
            self.process_msg(msg);
        }
    }

    pub fn process_msg(&mut self, msg: LsdbMsg) {
        match msg {
            LsdbMsg::AreaStart(cfg) => {
                let area_id = cfg.area_id;
                match self.areas.get_mut(&area_id) {
                    Some(area) => area.cfg = cfg,
                    None => {
                        self.areas.insert(area_id, AreaLsdb::new(cfg));
                    }
                }
                self.sync_all();
            }
            LsdbMsg::AreaStop { area_id } => {
                if self.areas.remove(&area_id).is_some() {
                    self.sync_all();
                    self.spf_schedule();
                }
            }
            LsdbMsg::InterfaceUpdate(iface) => {
                let Some(area) = self.areas.get_mut(&iface.area_id) else {
                    return;
                };
                area.interfaces.insert(iface.key, iface);
                self.sync_all();
                self.spf_schedule();
            }
            LsdbMsg::InterfaceDelete { area_id, iface } => {
                let Some(area) = self.areas.get_mut(&area_id) else {
                    return;
                };
                if area.interfaces.remove(&iface).is_some() {
                    self.sync_all();
                    self.spf_schedule();
                }
            }
            LsdbMsg::LsaReceived {
                area_id,
                lsa,
                origin,
                exchanging,
                reply,
            } => {
                let outcome =
                    self.lsa_received(area_id, lsa, origin, exchanging);
                let _ = reply.send(outcome);
            }
            LsdbMsg::Get {
                area_id,
                keys,
                reply,
            } => {
                let lsas = keys
                    .iter()
                    .map(|key| {
                        self.lookup(area_id, key).map(|lse| lse.data.clone())
                    })
                    .collect();
                let _ = reply.send(lsas);
            }
            LsdbMsg::Headers { area_id, reply } => {
                let _ = reply.send(self.area_lsas(area_id));
            }
            LsdbMsg::NewerThanDb {
                area_id,
                hdrs,
                reply,
            } => {
                let hdrs = hdrs
                    .into_iter()
                    .filter(|hdr| match self.lookup(area_id, &hdr.key()) {
                        Some(lse) => {
                            lsa_compare(hdr, &lse.data.hdr) == Ordering::Greater
                        }
                        None => true,
                    })
                    .collect();
                let _ = reply.send(hdrs);
            }
            LsdbMsg::NeighborDown { area_id, router_id } => {
                self.neighbor_down(area_id, router_id);
            }
            LsdbMsg::Summaries(mut summaries) => {
                for (area_id, area) in self.areas.iter_mut() {
                    area.summaries =
                        summaries.remove(area_id).unwrap_or_default();
                }
                let area_ids: Vec<_> = self.areas.keys().copied().collect();
                for area_id in area_ids {
                    self.sync_self_originated(LsdbId::Area(area_id));
                }
            }
            LsdbMsg::ExternalRouteAdd { prefix, metric } => {
                self.external_routes.insert(prefix, metric);
                self.sync_self_originated(LsdbId::As);
            }
            LsdbMsg::ExternalRouteDel { prefix } => {
                if self.external_routes.remove(&prefix).is_some() {
                    self.sync_self_originated(LsdbId::As);
                }
            }
            LsdbMsg::AgeTick => {
                self.age_tick();
            }
            LsdbMsg::DelayedOrig { lsdb_id, key } => {
                self.delayed_orig(lsdb_id, key);
            }
            LsdbMsg::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            LsdbMsg::GetState { reply } => {
                let _ = reply.send(self.state());
            }
            LsdbMsg::Stop { ack } => {
                let _ = ack.send(());
            }
        }
    }

    // Checks whether the router is attached to more than one active area.
    pub fn is_abr(&self) -> bool {
        self.areas.values().filter(|area| area.is_active()).count() > 1
    }

    pub fn map(&self, lsdb_id: LsdbId) -> Option<&LsdbMap> {
        match lsdb_id {
            LsdbId::Area(area_id) => {
                self.areas.get(&area_id).map(|area| &area.map)
            }
            LsdbId::As => Some(&self.as_lsdb),
        }
    }

    fn map_mut(&mut self, lsdb_id: LsdbId) -> Option<&mut LsdbMap> {
        match lsdb_id {
            LsdbId::Area(area_id) => {
                self.areas.get_mut(&area_id).map(|area| &mut area.map)
            }
            LsdbId::As => Some(&mut self.as_lsdb),
        }
    }

    fn lookup(&self, area_id: Ipv4Addr, key: &LsaKey) -> Option<&LsaEntry> {
        let area = self.areas.get(&area_id)?;
        if key.lsa_type.is_as_scoped() {
            if !area.cfg.import_external {
                return None;
            }
            self.as_lsdb.get(key)
        } else {
            area.map.get(key)
        }
    }

    // All LSAs visible from the given area (area-scoped plus AS-scoped when
    // the area imports external routes).
    fn area_lsas(&self, area_id: Ipv4Addr) -> Vec<Arc<Lsa>> {
        let Some(area) = self.areas.get(&area_id) else {
            return vec![];
        };
        let mut lsas: Vec<_> =
            area.map.iter().map(|(_, lse)| lse.data.clone()).collect();
        if area.cfg.import_external {
            lsas.extend(self.as_lsdb.iter().map(|(_, lse)| lse.data.clone()));
        }
        lsas
    }

    fn lsdb_ids(&self) -> Vec<LsdbId> {
        self.areas
            .keys()
            .map(|area_id| LsdbId::Area(*area_id))
            .chain(std::iter::once(LsdbId::As))
            .collect()
    }

    fn is_self_originated(&self, lsa: &Lsa) -> bool {
        // 1) The LSA's Advertising Router is equal to the router's own Router
        // ID.
        if lsa.hdr.adv_rtr == self.router_id {
            return true;
        }

        // 2) The LSA is a network-LSA and its Link State ID is equal to one of
        // the router's own IP interface addresses.
        lsa.hdr.lsa_type.type_code() == Some(LsaTypeCode::Network)
            && self
                .areas
                .values()
                .flat_map(|area| area.interfaces.values())
                .any(|iface| {
                    !iface.is_unnumbered() && iface.addr.ip() == lsa.hdr.lsa_id
                })
    }

    // ===== LSA input =====

    fn lsa_received(
        &mut self,
        area_id: Ipv4Addr,
        lsa: Lsa,
        origin: NeighborKey,
        exchanging: bool,
    ) -> LsaRcvdOutcome {
        let Some(area) = self.areas.get(&area_id) else {
            return LsaRcvdOutcome::Discard;
        };

        // Reject AS-external and type-4 summary LSAs (as per errata 3746 of RFC
        // 2328) on stub areas.
        if !area.cfg.import_external
            && matches!(
                lsa.hdr.lsa_type.type_code(),
                Some(LsaTypeCode::SummaryRouter | LsaTypeCode::AsExternal)
            )
        {
            return LsaRcvdOutcome::Discard;
        }
        let lsdb_id = if lsa.hdr.lsa_type.is_as_scoped() {
            LsdbId::As
        } else {
            LsdbId::Area(area_id)
        };
        let Some(map) = self.map(lsdb_id) else {
            return LsaRcvdOutcome::Discard;
        };
        let key = lsa.key();
        let db = map.get(&key);

        // (4) MaxAge LSA with no database copy while no neighbor is exchanging
        // databases.
        if lsa.is_maxage() && db.is_none() && !exchanging {
            return LsaRcvdOutcome::MaxAgeAck;
        }

        match db.map(|db| lsa_compare(&lsa.hdr, &db.data.hdr)) {
            None | Some(Ordering::Greater) => {
                // (5.a) MinLSArrival check.
                #[cfg(not(feature = "deterministic"))]
                {
                    let rcvd_time = db.and_then(|db| db.rcvd_time);
                    if rcvd_time.is_some_and(|rcvd_time| {
                        rcvd_time.elapsed()
                            < Duration::from_secs(LSA_MIN_ARRIVAL)
                    }) {
                        Debug::LsaMinArrivalDiscard(&lsa.hdr).log();
                        return LsaRcvdOutcome::MinArrivalDiscard;
                    }
                }

                // (5.b-d) Install and flood the new LSA.
                let self_originated = self.is_self_originated(&lsa);
                let lsa = self.install(lsdb_id, lsa, LsaEntryFlags::RECEIVED);
                self.flood(lsdb_id, lsa.clone(), Some(origin));

                // (5.f) Self-originated LSA: either advertise a newer instance
                // or flush it.
                if self_originated {
                    Debug::LsaSelfOriginated(&lsa.hdr).log();
                    self.sync_self_originated(lsdb_id);
                }

                LsaRcvdOutcome::Installed
            }
            Some(Ordering::Equal) => {
                // Our own LSA came back: advertise the database copy again.
                if let Some(db) = db
                    && self.is_self_originated(&lsa)
                {
                    Debug::LsaSelfOriginated(&lsa.hdr).log();
                    self.flood(lsdb_id, db.data.clone(), None);
                }
                LsaRcvdOutcome::Duplicate
            }
            Some(Ordering::Less) => {
                let Some(db) = db else {
                    return LsaRcvdOutcome::DbCopyNewer(None);
                };

                // (8) Database copy being flushed due to sequence number
                // wrapping: discard silently.
                if db.data.is_maxage() && db.data.hdr.seq_no == LSA_MAX_SEQ_NO
                {
                    return LsaRcvdOutcome::DbCopyNewer(None);
                }

                // Older instance of our own LSA: the database copy is
                // reflooded unchanged on every interface of the LSDB, the
                // sender included.
                if self.is_self_originated(&lsa) {
                    Debug::LsaSelfOriginated(&lsa.hdr).log();
                    self.flood(lsdb_id, db.data.clone(), None);
                    return LsaRcvdOutcome::DbCopyNewer(None);
                }

                #[cfg(not(feature = "deterministic"))]
                {
                    let last_time = db.rcvd_time.or(db.orig_time);
                    if last_time.is_some_and(|time| {
                        time.elapsed() < Duration::from_secs(LSA_MIN_ARRIVAL)
                    }) {
                        return LsaRcvdOutcome::DbCopyNewer(None);
                    }
                }

                LsaRcvdOutcome::DbCopyNewer(Some(db.data.clone()))
            }
        }
    }

    // Ages out the LSAs advertised by a neighbor that went down.
    fn neighbor_down(&mut self, area_id: Ipv4Addr, router_id: Ipv4Addr) {
        if router_id == self.router_id {
            return;
        }
        let lsdb_id = LsdbId::Area(area_id);
        let Some(map) = self.map(lsdb_id) else {
            return;
        };
        let keys: Vec<_> = map
            .iter()
            .filter(|(key, lse)| {
                key.adv_rtr == router_id && !lse.data.is_maxage()
            })
            .map(|(key, _)| *key)
            .collect();
        for key in keys {
            self.flush(lsdb_id, key, LsaFlushReason::NeighborDead);
        }
    }

    // ===== LSA origination =====

    fn sync_all(&mut self) {
        for lsdb_id in self.lsdb_ids() {
            self.sync_self_originated(lsdb_id);
        }
    }

    // Brings the self-originated LSAs of an LSDB in line with the current
    // interface, summary and external route state: LSAs that are still
    // needed are (re)originated when their contents changed, the others are
    // flushed.
    fn sync_self_originated(&mut self, lsdb_id: LsdbId) {
        let desired = self.desired_lsas(lsdb_id);
        for (key, (options, body)) in &desired {
            self.originate_check(lsdb_id, *options, key.lsa_id, body.clone());
        }

        let Some(map) = self.map(lsdb_id) else {
            return;
        };
        let stale: Vec<_> = map
            .iter()
            .filter(|(key, lse)| {
                !desired.contains_key(key)
                    && !lse.data.is_maxage()
                    && (lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED)
                        || self.is_self_originated(&lse.data))
            })
            .map(|(key, _)| *key)
            .collect();
        for key in stale {
            self.flush(lsdb_id, key, LsaFlushReason::PrematureAging);
        }

        if let Some(map) = self.map_mut(lsdb_id) {
            map.delayed_orig.retain(|key, _| desired.contains_key(key));
        }
    }

    fn desired_lsas(
        &self,
        lsdb_id: LsdbId,
    ) -> BTreeMap<LsaKey, (Options, LsaBody)> {
        let router_id = self.router_id;
        let mut desired = BTreeMap::new();

        match lsdb_id {
            LsdbId::Area(area_id) => {
                let Some(area) = self.areas.get(&area_id) else {
                    return desired;
                };
                let options = area.options();

                // Router-LSA.
                if !area.interfaces.is_empty() {
                    let key = LsaKey::new(
                        LsaTypeCode::Router.into(),
                        router_id,
                        router_id,
                    );
                    let body = self.lsa_orig_router(area);
                    desired.insert(key, (options, body));
                }

                // Network-LSAs.
                for iface in area.interfaces.values().filter(|iface| {
                    iface.state == ism::State::Dr && !iface.full_nbrs.is_empty()
                }) {
                    let key = LsaKey::new(
                        LsaTypeCode::Network.into(),
                        router_id,
                        iface.addr.ip(),
                    );
                    let attached_rtrs = std::iter::once(router_id)
                        .chain(iface.full_nbrs.keys().copied())
                        .collect();
                    let body = LsaBody::Network(LsaNetwork::new(
                        iface.addr.mask(),
                        attached_rtrs,
                    ));
                    desired.insert(key, (options, body));
                }

                // Summary-LSAs.
                if self.is_abr() {
                    for (key, body) in &area.summaries {
                        desired.insert(*key, (options, body.clone()));
                    }
                }
            }
            LsdbId::As => {
                let active = self.areas.values().any(|area| {
                    area.cfg.import_external && area.is_active()
                });
                if !self.asbr || !active {
                    return desired;
                }

                // AS-External-LSAs.
                for (prefix, metric) in &self.external_routes {
                    let key = LsaKey::new(
                        LsaTypeCode::AsExternal.into(),
                        router_id,
                        prefix.network(),
                    );
                    let body = LsaBody::AsExternal(LsaAsExternal::new(
                        prefix.mask(),
                        LsaAsExternalFlags::E,
                        *metric,
                        None,
                        0,
                    ));
                    desired.insert(key, (Options::E, body));
                }
            }
        }

        desired
    }

    fn lsa_orig_router(&self, area: &AreaLsdb) -> LsaBody {
        // Router-LSA's flags.
        let mut flags = LsaRouterFlags::empty();
        if self.is_abr() {
            flags.insert(LsaRouterFlags::B);
        }
        if self.asbr && area.cfg.import_external {
            flags.insert(LsaRouterFlags::E);
        }

        // Router-LSA's links.
        let mut links = vec![];
        for iface in area
            .interfaces
            .values()
            // Skip interfaces in the "Down" state.
            .filter(|iface| iface.state != ism::State::Down)
        {
            // Add a host route to interfaces in Loopback state.
            if iface.state == ism::State::Loopback
                || iface.if_type == InterfaceType::Loopback
            {
                links.push(LsaRouterLink::new(
                    LsaRouterLinkType::StubNetwork,
                    iface.addr.ip(),
                    Ipv4Addr::BROADCAST,
                    0,
                ));
                continue;
            }

            let mut add_stub_link = false;
            match iface.if_type {
                InterfaceType::PointToPoint => {
                    // Add a Type-1 link (p2p) for each fully adjacent neighbor.
                    let link_data = if iface.is_unnumbered() {
                        Ipv4Addr::from(iface.ifindex)
                    } else {
                        iface.addr.ip()
                    };
                    for router_id in iface.full_nbrs.keys() {
                        links.push(LsaRouterLink::new(
                            LsaRouterLinkType::PointToPoint,
                            *router_id,
                            link_data,
                            iface.cost,
                        ));
                    }

                    // Add Type-3 (stub) link, unless the interface is
                    // unnumbered.
                    add_stub_link = !iface.is_unnumbered();
                }
                InterfaceType::Broadcast => match iface.dr {
                    Some(dr)
                        if iface.state != ism::State::Waiting
                            && iface.dr_full =>
                    {
                        // Add a Type-2 (transit) link.
                        links.push(LsaRouterLink::new(
                            LsaRouterLinkType::TransitNetwork,
                            dr,
                            iface.addr.ip(),
                            iface.cost,
                        ));
                    }
                    _ => add_stub_link = true,
                },
                InterfaceType::Loopback => {}
            }

            if add_stub_link {
                links.push(LsaRouterLink::new(
                    LsaRouterLinkType::StubNetwork,
                    iface.addr.network(),
                    iface.addr.mask(),
                    iface.cost,
                ));
            }
        }

        LsaBody::Router(LsaRouter::new(flags, links))
    }

    fn originate_check(
        &mut self,
        lsdb_id: LsdbId,
        options: Options,
        lsa_id: Ipv4Addr,
        body: LsaBody,
    ) {
        let router_id = self.router_id;
        #[cfg(not(feature = "deterministic"))]
        let lsdbp = self.lsdbp.clone();
        let key = LsaKey::new(body.lsa_type(), router_id, lsa_id);
        let Some(map) = self.map_mut(lsdb_id) else {
            return;
        };

        // Get the next sequence number.
        let old = map.lsas.get(&key);
        let seq_no = match old {
            Some(old) => old.data.hdr.seq_no.wrapping_add(1),
            None => map
                .seqno_memory
                .get(&key)
                .map(|seq_no| seq_no.wrapping_add(1))
                .unwrap_or(LSA_INIT_SEQ_NO),
        };
        let lsa = Lsa::new(0, options, lsa_id, router_id, seq_no, body);

        if let Some(old) = old {
            // Skip origination when the contents haven't changed, unless a
            // newer instance was received from the network.
            if !old.flags.contains(LsaEntryFlags::RECEIVED)
                && lsa_same_contents(&old.data, &lsa)
            {
                return;
            }

            // MinLSInterval check.
            #[cfg(not(feature = "deterministic"))]
            {
                let orig_time = old.orig_time.filter(|orig_time| {
                    orig_time.elapsed() < Duration::from_secs(LSA_MIN_INTERVAL)
                });
                if let Some(orig_time) = orig_time {
                    Debug::LsaOriginateMinInterval(&lsa.hdr).log();
                    match map.delayed_orig.get_mut(&key) {
                        Some(delayed_orig) => delayed_orig.data = lsa,
                        None => {
                            let timeout = tasks::lsa_orig_delayed_timer(
                                &lsdbp,
                                lsdb_id,
                                key,
                                Some(orig_time),
                            );
                            let delayed_orig =
                                LsaDelayedOrig { data: lsa, timeout };
                            map.delayed_orig.insert(key, delayed_orig);
                        }
                    }
                    return;
                }
            }
        }

        self.originate(lsdb_id, lsa);
    }

    fn originate(&mut self, lsdb_id: LsdbId, lsa: Lsa) {
        let key = lsa.key();

        // Sequence number wrapping: flush the current instance first and
        // originate the new one once it's gone.
        if lsa.hdr.seq_no == LSA_MAX_SEQ_NO.wrapping_add(1) {
            if let Some(map) = self.map_mut(lsdb_id) {
                map.seqno_wrapping.insert(key, lsa);
            }
            self.flush(lsdb_id, key, LsaFlushReason::PrematureAging);
            return;
        }

        Debug::LsaOriginate(&lsa.hdr).log();
        if let Some(map) = self.map_mut(lsdb_id) {
            map.delayed_orig.remove(&key);
        }
        let lsa = self.install(lsdb_id, lsa, LsaEntryFlags::SELF_ORIGINATED);
        self.flood(lsdb_id, lsa, None);
    }

    fn delayed_orig(&mut self, lsdb_id: LsdbId, key: LsaKey) {
        let Some(map) = self.map_mut(lsdb_id) else {
            return;
        };
        let Some(delayed_orig) = map.delayed_orig.remove(&key) else {
            return;
        };
        let data = delayed_orig.data;
        if let Some(old) = map.lsas.get(&key) {
            if lsa_same_contents(&old.data, &data) {
                return;
            }
        }

        let seq_no = map
            .lsas
            .get(&key)
            .map(|old| old.data.hdr.seq_no.wrapping_add(1))
            .unwrap_or(data.hdr.seq_no);
        let lsa = Lsa::new(
            0,
            data.hdr.options,
            data.hdr.lsa_id,
            data.hdr.adv_rtr,
            seq_no,
            data.body,
        );
        self.originate(lsdb_id, lsa);
    }

    // Prematurely ages an LSA and floods it.
    fn flush(&mut self, lsdb_id: LsdbId, key: LsaKey, reason: LsaFlushReason) {
        let Some(map) = self.map_mut(lsdb_id) else {
            return;
        };
        map.delayed_orig.remove(&key);
        let Some(lse) = map.lsas.get(&key) else {
            return;
        };
        if lse.data.is_maxage() {
            return;
        }

        let flags = lse.flags;
        let mut lsa = (*lse.data).clone();
        lsa.set_maxage();
        Debug::LsaFlush(&lsa.hdr, reason).log();

        let lsa = self.install(lsdb_id, lsa, flags);
        self.flood(lsdb_id, lsa, None);
    }

    fn install(
        &mut self,
        lsdb_id: LsdbId,
        lsa: Lsa,
        flags: LsaEntryFlags,
    ) -> Arc<Lsa> {
        Debug::LsaInstall(&lsa.hdr).log();

        let key = lsa.key();
        let lsa = Arc::new(lsa);
        let Some(map) = self.map_mut(lsdb_id) else {
            return lsa;
        };

        let now = Instant::now();
        let entry = LsaEntry {
            data: lsa.clone(),
            flags,
            rcvd_time: flags.contains(LsaEntryFlags::RECEIVED).then_some(now),
            orig_time: flags
                .contains(LsaEntryFlags::SELF_ORIGINATED)
                .then_some(now),
        };
        let old = map.lsas.insert(key, entry);
        map.seqno_memory.remove(&key);

        // Schedule SPF when the contents changed. Self-originated
        // summaries are an output of SPF and don't trigger it.
        let changed = old
            .as_ref()
            .is_none_or(|old| !lsa_same_contents(&old.data, &lsa));
        let self_summary = flags.contains(LsaEntryFlags::SELF_ORIGINATED)
            && lsa.body.as_summary().is_some();
        if changed && !self_summary {
            self.spf_schedule();
        }

        lsa
    }

    // ===== LSA aging =====

    fn age_tick(&mut self) {
        for lsdb_id in self.lsdb_ids() {
            self.age_tick_lsdb(lsdb_id);
        }
    }

    fn age_tick_lsdb(&mut self, lsdb_id: LsdbId) {
        let Some(map) = self.map_mut(lsdb_id) else {
            return;
        };

        // Remove the LSAs that reached MaxAge (and were flooded as such) on a
        // previous tick.
        let maxage: Vec<_> = map
            .lsas
            .iter()
            .filter(|(_, lse)| lse.data.is_maxage())
            .map(|(key, _)| *key)
            .collect();
        let mut wrapped = vec![];
        for key in maxage {
            let Some(lse) = map.lsas.remove(&key) else {
                continue;
            };
            Debug::LsaMaxAgeRemove(&lse.data.hdr).log();
            if lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED) {
                map.seqno_memory.insert(key, lse.data.hdr.seq_no);
            }
            if let Some(lsa) = map.seqno_wrapping.remove(&key) {
                wrapped.push(lsa);
            }
        }

        // Age the remaining LSAs.
        let mut refresh = vec![];
        let mut expired = vec![];
        for (key, lse) in map.lsas.iter_mut() {
            let age = std::cmp::min(lse.data.age() + 1, LSA_MAX_AGE);
            Arc::make_mut(&mut lse.data).set_age(age);

            if age % LSA_CHECK_AGE == 0 && !lse.data.is_checksum_valid() {
                Error::LsaChecksumMismatch(*key).log();
            }

            if lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED)
                && age >= LSA_REFRESH_TIME
            {
                refresh.push(lse.data.clone());
            } else if age == LSA_MAX_AGE {
                expired.push(lse.data.clone());
            }
        }

        // Flood LSAs that just reached MaxAge.
        for lsa in expired {
            Debug::LsaFlush(&lsa.hdr, LsaFlushReason::Expiry).log();
            self.flood(lsdb_id, lsa, None);
            self.spf_schedule();
        }

        // Refresh self-originated LSAs.
        for lsa in refresh {
            Debug::LsaRefresh(&lsa.hdr).log();
            let lsa = Lsa::new(
                0,
                lsa.hdr.options,
                lsa.hdr.lsa_id,
                lsa.hdr.adv_rtr,
                lsa.hdr.seq_no.wrapping_add(1),
                lsa.body.clone(),
            );
            self.originate(lsdb_id, lsa);
        }

        // Restart sequence numbers of the LSAs that wrapped.
        for lsa in wrapped {
            let lsa = Lsa::new(
                0,
                lsa.hdr.options,
                lsa.hdr.lsa_id,
                lsa.hdr.adv_rtr,
                LSA_INIT_SEQ_NO,
                lsa.body,
            );
            self.originate(lsdb_id, lsa);
        }
    }

    // ===== helper methods =====

    fn flood(
        &self,
        lsdb_id: LsdbId,
        lsa: Arc<Lsa>,
        origin: Option<NeighborKey>,
    ) {
        let _ = self.floodp.send(FloodMsg::Flood {
            lsdb_id,
            lsa,
            origin,
        });
    }

    fn spf_schedule(&self) {
        let _ = self.spfp.send(SpfMsg::Schedule);
    }

    fn snapshot(&self) -> LsdbSnapshot {
        let areas = self
            .areas
            .iter()
            .map(|(area_id, area)| {
                let snapshot = AreaSnapshot {
                    cfg: area.cfg.clone(),
                    interfaces: area.interfaces.values().cloned().collect(),
                    lsas: area
                        .map
                        .iter()
                        .map(|(key, lse)| (*key, lse.data.clone()))
                        .collect(),
                };
                (*area_id, snapshot)
            })
            .collect();
        let as_lsas = self
            .as_lsdb
            .iter()
            .map(|(key, lse)| (*key, lse.data.clone()))
            .collect();

        LsdbSnapshot {
            router_id: self.router_id,
            is_abr: self.is_abr(),
            areas,
            as_lsas,
        }
    }

    fn state(&self) -> Vec<LsdbState> {
        let area_lsas = self.areas.iter().flat_map(|(area_id, area)| {
            area.map.iter().map(|(_, lse)| (Some(*area_id), lse))
        });
        let as_lsas = self.as_lsdb.iter().map(|(_, lse)| (None, lse));
        area_lsas
            .chain(as_lsas)
            .map(|(area_id, lse)| {
                let lsa = &lse.data;
                LsdbState {
                    lsa_type: lsa.body.type_code(),
                    lsa_id: lsa.hdr.lsa_id,
                    area_id,
                    adv_rtr: lsa.hdr.adv_rtr,
                    seq_no: lsa.hdr.seq_no,
                    age: lsa.hdr.age,
                    cksum: lsa.hdr.cksum,
                    options: lsa.hdr.options,
                    length: lsa.hdr.length,
                    advertisement: lsa.body.to_string(),
                }
            })
            .collect()
    }
}

// ===== global functions =====

// Compares which LSA is more recent according to the rules specified in
// Section 13.1 of RFC 2328.
//
// The second argument is expected to be the database copy.
pub fn lsa_compare(a: &LsaHdr, b: &LsaHdr) -> Ordering {
    let a_seq_no = a.seq_no as i32;
    let b_seq_no = b.seq_no as i32;
    let cmp = a_seq_no.cmp(&b_seq_no);
    if cmp != Ordering::Equal {
        return cmp;
    }

    let cmp = a.cksum.cmp(&b.cksum);
    if cmp != Ordering::Equal {
        return cmp;
    }

    if a.is_maxage() && !b.is_maxage() {
        return Ordering::Greater;
    } else if !a.is_maxage() && b.is_maxage() {
        return Ordering::Less;
    }

    if a.age.abs_diff(b.age) > LSA_MAX_AGE_DIFF {
        return b.age.cmp(&a.age);
    }

    Ordering::Equal
}

// Checks whether the contents of two instances of the same LSA differ, as
// described in Section 13.2 of RFC 2328.
pub fn lsa_same_contents(a: &Lsa, b: &Lsa) -> bool {
    a.hdr.options == b.hdr.options
        && a.is_maxage() == b.is_maxage()
        && a.hdr.length == b.hdr.length
        && a.raw.get(LsaHdr::LENGTH as usize..)
            == b.raw.get(LsaHdr::LENGTH as usize..)
}

// ===== unit tests =====
