//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::Arc;

use const_addrs::{ip4, net4};
use ospf_engine::interface::{
    InterfaceKey, InterfaceSummary, InterfaceType, ism,
};
use ospf_engine::lsdb::{
    LSA_INIT_SEQ_NO, LSA_MAX_AGE, LSA_REFRESH_TIME, LsaRcvdOutcome, Lsdb,
    LsdbId,
};
use ospf_engine::neighbor::NeighborKey;
use ospf_engine::northbound::{AreaCfg, GlobalCfg};
use ospf_engine::packet::Options;
use ospf_engine::packet::lsa::*;
use ospf_engine::tasks::messages::{FloodMsg, LsdbMsg, SpfMsg};
use ospf_utils::UnboundedReceiver;
use tokio::sync::{mpsc, oneshot};

const ROUTER_ID: Ipv4Addr = ip4!("1.1.1.1");
const NBR_ID: Ipv4Addr = ip4!("2.2.2.2");
const BACKBONE: Ipv4Addr = ip4!("0.0.0.0");

//
// Helper functions.
//

struct TestLsdb {
    lsdb: Lsdb,
    floodc: UnboundedReceiver<FloodMsg>,
    spfc: UnboundedReceiver<SpfMsg>,
    _lsdbc: UnboundedReceiver<LsdbMsg>,
}

impl TestLsdb {
    fn new(asbr: bool, import_external: bool) -> TestLsdb {
        let cfg = GlobalCfg {
            router_id: ROUTER_ID,
            asbr,
            ..Default::default()
        };
        let (lsdbp, lsdbc) = mpsc::unbounded_channel();
        let (floodp, floodc) = mpsc::unbounded_channel();
        let (spfp, spfc) = mpsc::unbounded_channel();
        let mut lsdb = Lsdb::new(&cfg, lsdbp, floodp, spfp);

        lsdb.process_msg(LsdbMsg::AreaStart(AreaCfg {
            area_id: BACKBONE,
            import_external,
            ..Default::default()
        }));
        lsdb.process_msg(LsdbMsg::InterfaceUpdate(iface_summary(10)));

        let mut test = TestLsdb {
            lsdb,
            floodc,
            spfc,
            _lsdbc: lsdbc,
        };
        test.flooded();
        test
    }

    // Returns the LSAs sent to the flooding task since the last call.
    fn flooded(&mut self) -> Vec<(Arc<Lsa>, Option<NeighborKey>)> {
        let mut lsas = vec![];
        while let Ok(msg) = self.floodc.try_recv() {
            if let FloodMsg::Flood { lsa, origin, .. } = msg {
                lsas.push((lsa, origin));
            }
        }
        lsas
    }

    fn spf_scheduled(&mut self) -> bool {
        let mut scheduled = false;
        while let Ok(msg) = self.spfc.try_recv() {
            scheduled |= matches!(msg, SpfMsg::Schedule);
        }
        scheduled
    }

    fn lookup(&self, lsdb_id: LsdbId, key: &LsaKey) -> Option<Arc<Lsa>> {
        self.lsdb
            .map(lsdb_id)
            .and_then(|map| map.get(key))
            .map(|lse| lse.data.clone())
    }

    fn receive(&mut self, lsa: Lsa) -> LsaRcvdOutcome {
        let (reply_tx, mut reply_rx) = oneshot::channel();
        self.lsdb.process_msg(LsdbMsg::LsaReceived {
            area_id: BACKBONE,
            lsa,
            origin: nbr_key(),
            exchanging: false,
            reply: reply_tx,
        });
        reply_rx.try_recv().unwrap()
    }

    fn age(&mut self, secs: u16) {
        for _ in 0..secs {
            self.lsdb.process_msg(LsdbMsg::AgeTick);
        }
    }
}

fn iface_key() -> InterfaceKey {
    InterfaceKey::new(ip4!("10.0.1.1"), 0)
}

fn nbr_key() -> NeighborKey {
    NeighborKey::new(iface_key(), ip4!("10.0.1.2"))
}

fn iface_summary(cost: u16) -> InterfaceSummary {
    InterfaceSummary {
        key: iface_key(),
        area_id: BACKBONE,
        if_type: InterfaceType::Broadcast,
        state: ism::State::DrOther,
        addr: net4!("10.0.1.1/24"),
        ifindex: 1,
        cost,
        dr: None,
        full_nbrs: Default::default(),
        dr_full: false,
    }
}

fn router_key(router_id: Ipv4Addr) -> LsaKey {
    LsaKey::new(LsaTypeCode::Router.into(), router_id, router_id)
}

fn external_key(prefix: Ipv4Addr) -> LsaKey {
    LsaKey::new(LsaTypeCode::AsExternal.into(), ROUTER_ID, prefix)
}

fn router_lsa(adv_rtr: Ipv4Addr, seq_no: u32, age: u16) -> Lsa {
    Lsa::new(
        age,
        Options::E,
        adv_rtr,
        adv_rtr,
        seq_no,
        LsaBody::Router(LsaRouter {
            flags: LsaRouterFlags::empty(),
            links: vec![LsaRouterLink {
                link_type: LsaRouterLinkType::StubNetwork,
                link_id: ip4!("10.0.9.0"),
                link_data: ip4!("255.255.255.0"),
                metric: 10,
            }],
        }),
    )
}

fn external_metric(lsa: &Lsa) -> u32 {
    lsa.body.as_as_external().unwrap().metric
}

//
// Tests.
//

#[test]
fn router_lsa_origination() {
    let test = TestLsdb::new(false, true);
    let lsa = test
        .lookup(LsdbId::Area(BACKBONE), &router_key(ROUTER_ID))
        .unwrap();
    assert_eq!(lsa.hdr.seq_no, LSA_INIT_SEQ_NO);
    assert_eq!(lsa.hdr.age, 0);
    assert_eq!(lsa.hdr.options, Options::E);
    let body = lsa.body.as_router().unwrap();
    assert_eq!(
        body.links,
        vec![LsaRouterLink::new(
            LsaRouterLinkType::StubNetwork,
            ip4!("10.0.1.0"),
            ip4!("255.255.255.0"),
            10,
        )]
    );
}

#[test]
fn router_lsa_unchanged_contents_not_reoriginated() {
    let mut test = TestLsdb::new(false, true);
    test.lsdb.process_msg(LsdbMsg::InterfaceUpdate(iface_summary(10)));
    assert!(test.flooded().is_empty());

    test.lsdb.process_msg(LsdbMsg::InterfaceUpdate(iface_summary(20)));
    let flooded = test.flooded();
    assert_eq!(flooded.len(), 1);
    assert_eq!(flooded[0].0.hdr.seq_no, LSA_INIT_SEQ_NO + 1);
    assert_eq!(flooded[0].1, None);
}

#[test]
fn external_lsa_metric_change() {
    let mut test = TestLsdb::new(true, true);
    test.lsdb.process_msg(LsdbMsg::ExternalRouteAdd {
        prefix: net4!("10.0.0.0/24"),
        metric: 20,
    });
    let key = external_key(ip4!("10.0.0.0"));
    let old = test.lookup(LsdbId::As, &key).unwrap();
    assert_eq!(external_metric(&old), 20);
    assert_eq!(old.hdr.seq_no, LSA_INIT_SEQ_NO);
    assert!(old.body.as_as_external().unwrap().is_type2());

    test.age(10);
    assert_eq!(test.lookup(LsdbId::As, &key).unwrap().hdr.age, 10);
    test.flooded();

    test.lsdb.process_msg(LsdbMsg::ExternalRouteAdd {
        prefix: net4!("10.0.0.0/24"),
        metric: 30,
    });
    let new = test.lookup(LsdbId::As, &key).unwrap();
    assert_eq!(external_metric(&new), 30);
    assert_eq!(new.hdr.seq_no, old.hdr.seq_no + 1);
    assert_eq!(new.hdr.age, 0);
    assert_ne!(new.hdr.cksum, old.hdr.cksum);
    assert!(new.validate().is_ok());

    let flooded = test.flooded();
    assert_eq!(flooded.len(), 1);
    assert_eq!(flooded[0].0, new);
}

#[test]
fn external_lsa_requires_asbr() {
    let mut test = TestLsdb::new(false, true);
    test.lsdb.process_msg(LsdbMsg::ExternalRouteAdd {
        prefix: net4!("10.0.0.0/24"),
        metric: 20,
    });
    let key = external_key(ip4!("10.0.0.0"));
    assert!(test.lookup(LsdbId::As, &key).is_none());
}

#[test]
fn external_lsa_withdrawal() {
    let mut test = TestLsdb::new(true, true);
    let key = external_key(ip4!("10.0.0.0"));
    test.lsdb.process_msg(LsdbMsg::ExternalRouteAdd {
        prefix: net4!("10.0.0.0/24"),
        metric: 20,
    });
    test.flooded();

    test.lsdb.process_msg(LsdbMsg::ExternalRouteDel {
        prefix: net4!("10.0.0.0/24"),
    });
    let lsa = test.lookup(LsdbId::As, &key).unwrap();
    assert!(lsa.is_maxage());
    let flooded = test.flooded();
    assert_eq!(flooded.len(), 1);
    assert!(flooded[0].0.is_maxage());

    // The flushed instance is removed on the next aging tick.
    test.age(1);
    assert!(test.lookup(LsdbId::As, &key).is_none());

    // A new origination resumes from the remembered sequence number.
    test.lsdb.process_msg(LsdbMsg::ExternalRouteAdd {
        prefix: net4!("10.0.0.0/24"),
        metric: 20,
    });
    let lsa = test.lookup(LsdbId::As, &key).unwrap();
    assert_eq!(lsa.hdr.seq_no, LSA_INIT_SEQ_NO + 1);
}

#[test]
fn self_originated_newer_instance() {
    let mut test = TestLsdb::new(false, true);
    let key = router_key(ROUTER_ID);
    let local = test.lookup(LsdbId::Area(BACKBONE), &key).unwrap();

    // Stale instance from a previous incarnation of the router.
    let rcvd = router_lsa(ROUTER_ID, LSA_INIT_SEQ_NO + 4, 100);
    assert_eq!(test.receive(rcvd.clone()), LsaRcvdOutcome::Installed);

    let lsa = test.lookup(LsdbId::Area(BACKBONE), &key).unwrap();
    assert_eq!(lsa.hdr.seq_no, LSA_INIT_SEQ_NO + 5);
    assert_eq!(lsa.hdr.age, 0);
    assert_eq!(lsa.body, local.body);

    // The received instance is flooded first, then the local one.
    let flooded = test.flooded();
    assert_eq!(flooded.len(), 2);
    assert_eq!(*flooded[0].0, rcvd);
    assert_eq!(flooded[0].1, Some(nbr_key()));
    assert_eq!(flooded[1].0, lsa);
    assert_eq!(flooded[1].1, None);
}

#[test]
fn self_originated_same_instance() {
    let mut test = TestLsdb::new(false, true);
    let key = router_key(ROUTER_ID);
    let local = test.lookup(LsdbId::Area(BACKBONE), &key).unwrap();

    let outcome = test.receive((*local).clone());
    assert_eq!(outcome, LsaRcvdOutcome::Duplicate);
    assert_eq!(test.lookup(LsdbId::Area(BACKBONE), &key).unwrap(), local);

    // The local copy is reflooded as is.
    let flooded = test.flooded();
    assert_eq!(flooded.len(), 1);
    assert_eq!(flooded[0].0, local);
    assert_eq!(flooded[0].1, None);
    assert!(!test.spf_scheduled());
}

#[test]
fn self_originated_older_instance() {
    let mut test = TestLsdb::new(false, true);
    test.lsdb.process_msg(LsdbMsg::InterfaceUpdate(iface_summary(20)));
    test.flooded();
    let key = router_key(ROUTER_ID);
    let local = test.lookup(LsdbId::Area(BACKBONE), &key).unwrap();
    assert_eq!(local.hdr.seq_no, LSA_INIT_SEQ_NO + 1);

    // The database copy is reflooded unchanged, the sender included.
    let rcvd = router_lsa(ROUTER_ID, LSA_INIT_SEQ_NO, 1);
    let outcome = test.receive(rcvd);
    assert_eq!(outcome, LsaRcvdOutcome::DbCopyNewer(None));
    assert_eq!(test.lookup(LsdbId::Area(BACKBONE), &key).unwrap(), local);
    let flooded = test.flooded();
    assert_eq!(flooded.len(), 1);
    assert_eq!(flooded[0].0, local);
    assert_eq!(flooded[0].1, None);
}

#[test]
fn other_router_older_instance() {
    let mut test = TestLsdb::new(false, true);
    let rcvd = router_lsa(NBR_ID, LSA_INIT_SEQ_NO + 1, 1);
    assert_eq!(test.receive(rcvd), LsaRcvdOutcome::Installed);
    let key = router_key(NBR_ID);
    let db = test.lookup(LsdbId::Area(BACKBONE), &key).unwrap();
    test.flooded();

    // Only the sender gets the database copy back.
    let outcome = test.receive(router_lsa(NBR_ID, LSA_INIT_SEQ_NO, 1));
    assert_eq!(outcome, LsaRcvdOutcome::DbCopyNewer(Some(db)));
    assert!(test.flooded().is_empty());
}

#[test]
fn received_lsa_install_and_spf() {
    let mut test = TestLsdb::new(false, true);
    test.spf_scheduled();

    let rcvd = router_lsa(NBR_ID, LSA_INIT_SEQ_NO, 1);
    assert_eq!(test.receive(rcvd.clone()), LsaRcvdOutcome::Installed);
    assert!(test.spf_scheduled());
    let lsa = test
        .lookup(LsdbId::Area(BACKBONE), &router_key(NBR_ID))
        .unwrap();
    assert_eq!(*lsa, rcvd);

    // Same instance again.
    assert_eq!(test.receive(rcvd), LsaRcvdOutcome::Duplicate);
    assert!(!test.spf_scheduled());
}

#[test]
fn maxage_without_db_copy() {
    let mut test = TestLsdb::new(false, true);
    let rcvd = router_lsa(NBR_ID, LSA_INIT_SEQ_NO, LSA_MAX_AGE);
    assert_eq!(test.receive(rcvd), LsaRcvdOutcome::MaxAgeAck);
    assert!(
        test.lookup(LsdbId::Area(BACKBONE), &router_key(NBR_ID))
            .is_none()
    );
}

#[test]
fn stub_area_rejects_external_lsas() {
    let mut test = TestLsdb::new(false, false);
    let rcvd = Lsa::new(
        1,
        Options::E,
        ip4!("172.16.0.0"),
        NBR_ID,
        LSA_INIT_SEQ_NO,
        LsaBody::AsExternal(LsaAsExternal::new(
            ip4!("255.255.0.0"),
            LsaAsExternalFlags::E,
            20,
            None,
            0,
        )),
    );
    assert_eq!(test.receive(rcvd), LsaRcvdOutcome::Discard);
}

#[test]
fn lsa_expiry() {
    let mut test = TestLsdb::new(false, true);
    let key = router_key(NBR_ID);
    let rcvd = router_lsa(NBR_ID, LSA_INIT_SEQ_NO, LSA_MAX_AGE - 2);
    assert_eq!(test.receive(rcvd), LsaRcvdOutcome::Installed);
    test.flooded();
    test.spf_scheduled();

    test.age(1);
    let lsa = test.lookup(LsdbId::Area(BACKBONE), &key).unwrap();
    assert_eq!(lsa.hdr.age, LSA_MAX_AGE - 1);
    assert!(test.flooded().is_empty());

    // Reaching MaxAge floods the LSA and schedules SPF.
    test.age(1);
    let lsa = test.lookup(LsdbId::Area(BACKBONE), &key).unwrap();
    assert!(lsa.is_maxage());
    let flooded = test.flooded();
    assert_eq!(flooded.len(), 1);
    assert!(flooded[0].0.is_maxage());
    assert!(test.spf_scheduled());

    test.age(1);
    assert!(test.lookup(LsdbId::Area(BACKBONE), &key).is_none());
}

#[test]
fn self_originated_refresh() {
    let mut test = TestLsdb::new(false, true);
    let key = router_key(ROUTER_ID);

    test.age(LSA_REFRESH_TIME - 1);
    let lsa = test.lookup(LsdbId::Area(BACKBONE), &key).unwrap();
    assert_eq!(lsa.hdr.seq_no, LSA_INIT_SEQ_NO);
    assert_eq!(lsa.hdr.age, LSA_REFRESH_TIME - 1);
    test.flooded();

    test.age(1);
    let lsa = test.lookup(LsdbId::Area(BACKBONE), &key).unwrap();
    assert_eq!(lsa.hdr.seq_no, LSA_INIT_SEQ_NO + 1);
    assert_eq!(lsa.hdr.age, 0);
    assert_eq!(test.flooded().len(), 1);
}

#[test]
fn neighbor_down_flushes_its_lsas() {
    let mut test = TestLsdb::new(false, true);
    let key = router_key(NBR_ID);
    let rcvd = router_lsa(NBR_ID, LSA_INIT_SEQ_NO, 1);
    assert_eq!(test.receive(rcvd), LsaRcvdOutcome::Installed);
    test.flooded();

    test.lsdb.process_msg(LsdbMsg::NeighborDown {
        area_id: BACKBONE,
        router_id: NBR_ID,
    });
    let lsa = test.lookup(LsdbId::Area(BACKBONE), &key).unwrap();
    assert!(lsa.is_maxage());
    assert_eq!(test.flooded().len(), 1);

    // The router's own LSAs are left alone.
    let lsa = test
        .lookup(LsdbId::Area(BACKBONE), &router_key(ROUTER_ID))
        .unwrap();
    assert!(!lsa.is_maxage());
}

#[test]
fn newer_than_db_filter() {
    let mut test = TestLsdb::new(false, true);
    let local = test
        .lookup(LsdbId::Area(BACKBONE), &router_key(ROUTER_ID))
        .unwrap();
    let newer = router_lsa(ROUTER_ID, LSA_INIT_SEQ_NO + 1, 1);
    let unknown = router_lsa(NBR_ID, LSA_INIT_SEQ_NO, 1);

    let (reply_tx, mut reply_rx) = oneshot::channel();
    test.lsdb.process_msg(LsdbMsg::NewerThanDb {
        area_id: BACKBONE,
        hdrs: vec![local.hdr.clone(), newer.hdr.clone(), unknown.hdr.clone()],
        reply: reply_tx,
    });
    let hdrs = reply_rx.try_recv().unwrap();
    assert_eq!(hdrs, vec![newer.hdr, unknown.hdr]);
}
