//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use const_addrs::{ip4, net4};
use ipnetwork::Ipv4Network;
use ospf_engine::error::IoError;
use ospf_engine::instance::InstanceHandle;
use ospf_engine::interface::{InterfaceKey, InterfaceType, ism};
use ospf_engine::neighbor::nsm;
use ospf_engine::network::{
    InterfaceIo, MulticastAddr, NetworkDriver, PacketReader, PacketWriter,
};
use ospf_engine::northbound::{AreaCfg, GlobalCfg, InterfaceCfg};
use ospf_engine::packet::lsa::LsaTypeCode;
use ospf_engine::southbound::{
    L3Interface, Nexthop, RouteInstall, RouteSink, SouthboundMsg,
};
use tokio::sync::mpsc;

const BACKBONE: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

// Shared broadcast medium. Every /24 is a separate segment.
#[derive(Default)]
struct Hub {
    ports: Mutex<Vec<HubPort>>,
}

struct HubPort {
    addr: Ipv4Addr,
    groups: Arc<Mutex<BTreeSet<MulticastAddr>>>,
    tx: mpsc::UnboundedSender<(Ipv4Addr, Ipv4Addr, Bytes)>,
}

struct HubDriver {
    hub: Arc<Hub>,
}

struct HubReader {
    rx: mpsc::UnboundedReceiver<(Ipv4Addr, Ipv4Addr, Bytes)>,
}

struct HubWriter {
    hub: Arc<Hub>,
    addr: Ipv4Addr,
    groups: Arc<Mutex<BTreeSet<MulticastAddr>>>,
}

// Route sink that remembers the currently installed routes.
#[derive(Default)]
struct RecordingSink {
    routes: Mutex<BTreeMap<Ipv4Network, RouteInstall>>,
}

struct TestRouter {
    handle: InstanceHandle,
    sink: Arc<RecordingSink>,
}

// ===== impl Hub =====

impl Hub {
    fn deliver(&self, src: Ipv4Addr, dst: Ipv4Addr, data: Bytes) {
        let mut ports = self.ports.lock().unwrap();
        ports.retain(|port| !port.tx.is_closed());

        let group = MulticastAddr::from_addr(&dst);
        for port in ports.iter() {
            if port.addr == src || segment(port.addr) != segment(src) {
                continue;
            }
            let accept = match group {
                Some(group) => port.groups.lock().unwrap().contains(&group),
                None => port.addr == dst,
            };
            if accept {
                let _ = port.tx.send((src, dst, data.clone()));
            }
        }
    }
}

// ===== impl HubDriver =====

#[async_trait]
impl NetworkDriver for HubDriver {
    async fn open(
        &self,
        iface: &InterfaceIo,
    ) -> Result<(Box<dyn PacketReader>, Box<dyn PacketWriter>), IoError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let groups = Arc::new(Mutex::new(BTreeSet::new()));
        self.hub.ports.lock().unwrap().push(HubPort {
            addr: iface.addr,
            groups: groups.clone(),
            tx,
        });

        let reader = HubReader { rx };
        let writer = HubWriter {
            hub: self.hub.clone(),
            addr: iface.addr,
            groups,
        };
        Ok((Box::new(reader), Box::new(writer)))
    }
}

// ===== impl HubReader =====

#[async_trait]
impl PacketReader for HubReader {
    async fn recv(&mut self) -> Result<(Ipv4Addr, Ipv4Addr, Bytes), IoError> {
        self.rx.recv().await.ok_or(IoError::Closed)
    }
}

// ===== impl HubWriter =====

#[async_trait]
impl PacketWriter for HubWriter {
    async fn send(
        &mut self,
        dst: Ipv4Addr,
        data: Bytes,
    ) -> Result<(), IoError> {
        self.hub.deliver(self.addr, dst, data);
        Ok(())
    }

    fn join(&mut self, group: MulticastAddr) -> Result<(), IoError> {
        self.groups.lock().unwrap().insert(group);
        Ok(())
    }

    fn leave(&mut self, group: MulticastAddr) -> Result<(), IoError> {
        self.groups.lock().unwrap().remove(&group);
        Ok(())
    }
}

// ===== impl RecordingSink =====

impl RouteSink for RecordingSink {
    fn install(&self, route: &RouteInstall) {
        self.routes
            .lock()
            .unwrap()
            .insert(route.prefix, route.clone());
    }

    fn uninstall(&self, prefix: &Ipv4Network) {
        self.routes.lock().unwrap().remove(prefix);
    }
}

impl RecordingSink {
    fn route(&self, prefix: Ipv4Network) -> Option<RouteInstall> {
        self.routes.lock().unwrap().get(&prefix).cloned()
    }
}

// ===== impl TestRouter =====

impl TestRouter {
    async fn new(hub: &Arc<Hub>, router_id: Ipv4Addr) -> TestRouter {
        let driver = Arc::new(HubDriver { hub: hub.clone() });
        let sink = Arc::new(RecordingSink::default());
        let handle = InstanceHandle::spawn(driver, sink.clone());

        let cfg = GlobalCfg {
            router_id,
            ..Default::default()
        };
        handle.create_global(cfg).await.unwrap();
        let cfg = AreaCfg {
            area_id: BACKBONE,
            ..Default::default()
        };
        handle.create_area(cfg).await.unwrap();

        TestRouter { handle, sink }
    }

    async fn add_interface(
        &self,
        name: &str,
        ifindex: u32,
        addr: Ipv4Network,
        if_type: InterfaceType,
        priority: u8,
    ) {
        let iface = L3Interface {
            name: name.to_owned(),
            ifindex,
            addr,
            mtu: 1500,
            mac: [0x02, 0x00, 0x00, 0x00, 0x00, ifindex as u8],
            oper_up: true,
        };
        self.handle
            .southbound()
            .send(SouthboundMsg::InterfaceUpdate(iface))
            .unwrap();

        let cfg = InterfaceCfg {
            ip_address: addr.ip(),
            area_id: BACKBONE,
            if_type,
            priority,
            ..Default::default()
        };
        self.handle.create_interface(cfg).await.unwrap();
    }

    async fn iface_state(&self, addr: Ipv4Addr) -> ism::State {
        self.handle
            .get_interface(InterfaceKey::new(addr, 0))
            .await
            .unwrap()
            .state
    }

    async fn nbr_state(
        &self,
        addr: Ipv4Addr,
        router_id: Ipv4Addr,
    ) -> nsm::State {
        self.handle
            .get_neighbor(InterfaceKey::new(addr, 0), router_id)
            .await
            .unwrap()
            .state
    }
}

// ===== helper functions =====

fn segment(addr: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(addr.to_bits() & 0xffffff00)
}

async fn converge(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

// ===== tests =====

#[tokio::test(start_paused = true)]
async fn point_to_point_adjacency() {
    let hub = Arc::new(Hub::default());
    let rt1 = TestRouter::new(&hub, ip4!("1.1.1.1")).await;
    let rt2 = TestRouter::new(&hub, ip4!("2.2.2.2")).await;
    let p2p = InterfaceType::PointToPoint;
    rt1.add_interface("eth0", 1, net4!("10.0.1.1/24"), p2p, 1)
        .await;
    rt2.add_interface("eth0", 1, net4!("10.0.1.2/24"), p2p, 1)
        .await;
    rt2.add_interface(
        "eth1",
        2,
        net4!("10.0.2.1/24"),
        InterfaceType::Broadcast,
        1,
    )
    .await;

    converge(60).await;

    // Adjacency.
    assert_eq!(
        rt1.nbr_state(ip4!("10.0.1.1"), ip4!("2.2.2.2")).await,
        nsm::State::Full
    );
    assert_eq!(
        rt2.nbr_state(ip4!("10.0.1.2"), ip4!("1.1.1.1")).await,
        nsm::State::Full
    );
    let iface = rt1
        .handle
        .get_interface(InterfaceKey::new(ip4!("10.0.1.1"), 0))
        .await
        .unwrap();
    assert_eq!(iface.state, ism::State::PointToPoint);
    assert_eq!(iface.dr_router_id, None);
    assert_eq!(iface.neighbor_count, 1);

    // Synchronized databases.
    for router in [&rt1, &rt2] {
        for adv_rtr in [ip4!("1.1.1.1"), ip4!("2.2.2.2")] {
            let lsa = router
                .handle
                .get_lsa(Some(BACKBONE), LsaTypeCode::Router, adv_rtr, adv_rtr)
                .await;
            assert!(lsa.is_ok());
        }
    }

    // Routing.
    let nexthop = Nexthop::new(ip4!("10.0.1.1"), 1, Some(ip4!("10.0.1.2")));
    let route = rt1.sink.route(net4!("10.0.2.0/24")).unwrap();
    assert_eq!(route.cost, 20);
    assert_eq!(route.nexthops, BTreeSet::from([nexthop]));
    let route = rt1.handle.get_route(net4!("10.0.2.0/24")).await.unwrap();
    assert_eq!(route.cost, 20);

    // The local subnet is directly connected and never pushed to the sink.
    assert!(rt1.sink.route(net4!("10.0.1.0/24")).is_none());
    assert!(rt2.sink.route(net4!("10.0.2.0/24")).is_none());

    rt1.handle.shutdown().await;
    rt2.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn broadcast_dr_election() {
    let hub = Arc::new(Hub::default());
    let rt1 = TestRouter::new(&hub, ip4!("1.1.1.1")).await;
    let rt2 = TestRouter::new(&hub, ip4!("2.2.2.2")).await;
    let rt3 = TestRouter::new(&hub, ip4!("3.3.3.3")).await;
    let bcast = InterfaceType::Broadcast;
    rt1.add_interface("eth0", 1, net4!("10.0.1.1/24"), bcast, 0)
        .await;
    rt2.add_interface("eth0", 1, net4!("10.0.1.2/24"), bcast, 1)
        .await;
    rt3.add_interface("eth0", 1, net4!("10.0.1.3/24"), bcast, 2)
        .await;

    // Wait timer plus database synchronization.
    converge(90).await;

    assert_eq!(rt1.iface_state(ip4!("10.0.1.1")).await, ism::State::DrOther);
    assert_eq!(rt2.iface_state(ip4!("10.0.1.2")).await, ism::State::Backup);
    assert_eq!(rt3.iface_state(ip4!("10.0.1.3")).await, ism::State::Dr);

    for router in [&rt1, &rt2, &rt3] {
        let iface = router
            .handle
            .get_bulk_interfaces(0, 10)
            .await
            .unwrap()
            .list
            .remove(0);
        assert_eq!(iface.dr_router_id, Some(ip4!("3.3.3.3")));
        assert_eq!(iface.dr_addr, Some(ip4!("10.0.1.3")));
        assert_eq!(iface.bdr_router_id, Some(ip4!("2.2.2.2")));
    }

    // A DROther forms adjacencies with the DR and the BDR only.
    let addr = ip4!("10.0.1.1");
    assert_eq!(rt1.nbr_state(addr, ip4!("2.2.2.2")).await, nsm::State::Full);
    assert_eq!(rt1.nbr_state(addr, ip4!("3.3.3.3")).await, nsm::State::Full);
    let addr = ip4!("10.0.1.2");
    assert_eq!(rt2.nbr_state(addr, ip4!("3.3.3.3")).await, nsm::State::Full);

    // The DR originates the network LSA for the segment.
    let lsa = rt1
        .handle
        .get_lsa(
            Some(BACKBONE),
            LsaTypeCode::Network,
            ip4!("10.0.1.3"),
            ip4!("3.3.3.3"),
        )
        .await;
    assert!(lsa.is_ok());

    for router in [&rt1, &rt2, &rt3] {
        router.handle.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn hello_interval_mismatch() {
    let hub = Arc::new(Hub::default());
    let rt1 = TestRouter::new(&hub, ip4!("1.1.1.1")).await;
    let rt2 = TestRouter::new(&hub, ip4!("2.2.2.2")).await;
    rt1.add_interface(
        "eth0",
        1,
        net4!("10.0.1.1/24"),
        InterfaceType::PointToPoint,
        1,
    )
    .await;

    // Second router with a different hello interval.
    let iface = L3Interface {
        name: "eth0".to_owned(),
        ifindex: 1,
        addr: net4!("10.0.1.2/24"),
        mtu: 1500,
        mac: [0x02, 0x00, 0x00, 0x00, 0x00, 0x02],
        oper_up: true,
    };
    rt2.handle
        .southbound()
        .send(SouthboundMsg::InterfaceUpdate(iface))
        .unwrap();
    let cfg = InterfaceCfg {
        ip_address: ip4!("10.0.1.2"),
        area_id: BACKBONE,
        if_type: InterfaceType::PointToPoint,
        hello_interval: 5,
        ..Default::default()
    };
    rt2.handle.create_interface(cfg).await.unwrap();

    converge(60).await;

    let iface = rt1
        .handle
        .get_interface(InterfaceKey::new(ip4!("10.0.1.1"), 0))
        .await
        .unwrap();
    assert_eq!(iface.neighbor_count, 0);
    let rtr_id = ip4!("2.2.2.2");
    let lsa = rt1
        .handle
        .get_lsa(Some(BACKBONE), LsaTypeCode::Router, rtr_id, rtr_id)
        .await;
    assert!(lsa.is_err());
}

#[tokio::test(start_paused = true)]
async fn external_route_propagation() {
    let hub = Arc::new(Hub::default());
    let rt1 = TestRouter::new(&hub, ip4!("1.1.1.1")).await;
    let rt2 = TestRouter::new(&hub, ip4!("2.2.2.2")).await;
    let cfg = GlobalCfg {
        router_id: ip4!("2.2.2.2"),
        asbr: true,
        ..Default::default()
    };
    rt2.handle.update_global(cfg).await.unwrap();

    let p2p = InterfaceType::PointToPoint;
    rt1.add_interface("eth0", 1, net4!("10.0.1.1/24"), p2p, 1)
        .await;
    rt2.add_interface("eth0", 1, net4!("10.0.1.2/24"), p2p, 1)
        .await;
    rt2.handle
        .southbound()
        .send(SouthboundMsg::ExternalRouteAdd {
            prefix: net4!("172.16.0.0/16"),
            metric: 100,
        })
        .unwrap();

    converge(60).await;

    let route = rt1.handle.get_route(net4!("172.16.0.0/16")).await.unwrap();
    assert_eq!(route.type2_cost, Some(100));
    let nexthop = Nexthop::new(ip4!("10.0.1.1"), 1, Some(ip4!("10.0.1.2")));
    let installed = rt1.sink.route(net4!("172.16.0.0/16")).unwrap();
    assert_eq!(installed.nexthops, BTreeSet::from([nexthop]));

    // Withdrawal reaches the neighbor and removes the route.
    rt2.handle
        .southbound()
        .send(SouthboundMsg::ExternalRouteDel {
            prefix: net4!("172.16.0.0/16"),
        })
        .unwrap();
    converge(10).await;
    assert!(rt1.sink.route(net4!("172.16.0.0/16")).is_none());
}
