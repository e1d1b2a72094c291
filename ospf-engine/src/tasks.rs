//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::time::Duration;

use ospf_utils::task::{IntervalTask, Task, TimeoutTask};
use ospf_utils::{Responder, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, oneshot};
use tokio::time::Instant;
use tracing::{Instrument, debug_span};

use crate::debug::Debug;
use crate::error::Error;
use crate::flood::Flooding;
use crate::interface::Interface;
use crate::lsdb::{LSA_MIN_INTERVAL, Lsdb, LsdbId};
use crate::neighbor::{NeighborKey, Neighbors, RxmtPacketType};
use crate::network::{self, PacketReader, PacketWriter};
use crate::packet::Packet;
use crate::packet::lsa::LsaKey;
use crate::spf::Spf;
use crate::tasks::messages::{
    FloodMsg, IfaceMsg, LsdbMsg, NbrMsg, NetTxMsg, SpfMsg,
};

//
// OSPF tasks diagram:
//
//                              +--------------+
//                              |   instance   |
//                              +--------------+
//                                |  |  |  |  |
//          +---------------------+  |  |  |  +---------------------+
//          |              +---------+  |  +---------+              |
//          V              V            V            V              V
//   +-------------+ +-----------+ +---------+ +-----------+ +-------------+
//   | interface   | | neighbors | |  flood  | |   lsdb    | |     spf     |
//   |   (Nx)      | |   (1x)    | |  (1x)   | |   (1x)    | |    (1x)     |
//   +-------------+ +-----------+ +---------+ +-----------+ +-------------+
//     ^   |  ^  |     ^   |  ^ ^    ^   |       ^ |  ^  |       ^ |  ^
//     |   |  |  +-----+   |  | +----|---+       | |  |  +-------+ |  |
//     |   |  +------------+  |      +-----------|-+  |            |  |
//     |   +------------------|------------------+    +------------+  |
//     |                      |                                       |
//  net_rx (Nx)       nsm_inactivity_timer (Nx)  lsdb_age_tick (1x)  spf_delay
//  ism_wait_timer    packet_rxmt_interval (Nx)  lsa_orig_delayed    (1x)
//  (Nx)              dbdesc_free_timer (Nx)     (Nx)
//
//   interface -> net_tx (Nx), hello_interval (Nx)
//
// Request/reply pairs only flow downwards (flood -> neighbors -> lsdb,
// spf -> lsdb, instance -> all), hence a component never waits on another
// component that might be waiting on it.
//

// OSPF inter-task message types.
pub mod messages {
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    use ipnetwork::Ipv4Network;
    use ospf_utils::Responder;

    use crate::debug::InterfaceInactiveReason;
    use crate::interface::{InterfaceKey, InterfaceSummary, InterfaceView};
    use crate::lsdb::{LsaRcvdOutcome, LsdbId, LsdbSnapshot};
    use crate::neighbor::{NeighborKey, RxmtPacketType, nsm};
    use crate::network::MulticastAddr;
    use crate::northbound::{
        AreaCfg, InterfaceState, LsdbState, NeighborState, RouteState,
    };
    use crate::packet::error::DecodeError;
    use crate::packet::lsa::{Lsa, LsaBody, LsaHdr, LsaKey};
    use crate::packet::{Options, Packet};

    // Messages handled by an interface task.
    #[derive(Debug)]
    pub enum IfaceMsg {
        NetRx(NetRxPacketMsg),
        WaitTimer,
        NeighborState {
            net_id: Ipv4Addr,
            router_id: Ipv4Addr,
            state: nsm::State,
        },
        NeighborDead {
            net_id: Ipv4Addr,
        },
        GetState {
            reply: Responder<InterfaceState>,
        },
        Stop {
            reason: InterfaceInactiveReason,
            ack: Responder<()>,
        },
    }

    #[derive(Debug)]
    pub struct NetRxPacketMsg {
        pub src: Ipv4Addr,
        pub dst: Ipv4Addr,
        pub packet: Result<Packet, DecodeError>,
    }

    // Messages handled by an interface's network Tx task.
    #[derive(Clone, Debug)]
    pub enum NetTxMsg {
        Packet { dst: Ipv4Addr, packet: Packet },
        Join(MulticastAddr),
        Leave(MulticastAddr),
    }

    // Messages handled by the neighbor dispatcher.
    #[derive(Debug)]
    pub enum NbrMsg {
        InterfaceUpdate(InterfaceView),
        InterfaceDown {
            iface: InterfaceKey,
        },
        HelloRcvd(HelloRcvdMsg),
        AdjOk {
            iface: InterfaceKey,
        },
        Packet {
            nbr: NeighborKey,
            packet: Packet,
        },
        InactivityTimer {
            nbr: NeighborKey,
        },
        RxmtInterval {
            nbr: NeighborKey,
            packet_type: RxmtPacketType,
        },
        DbDescFree {
            nbr: NeighborKey,
        },
        FloodPrepare {
            iface: InterfaceKey,
            lsa: Arc<Lsa>,
            origin: Option<NeighborKey>,
            reply: Responder<bool>,
        },
        GetState {
            reply: Responder<Vec<NeighborState>>,
        },
        Stop {
            ack: Responder<()>,
        },
    }

    #[derive(Debug)]
    pub struct HelloRcvdMsg {
        pub nbr: NeighborKey,
        pub router_id: Ipv4Addr,
        pub src: Ipv4Addr,
        pub priority: u8,
        pub dr: Option<Ipv4Addr>,
        pub bdr: Option<Ipv4Addr>,
        pub options: Options,
        pub two_way: bool,
    }

    // Messages handled by the flooding task.
    #[derive(Debug)]
    pub enum FloodMsg {
        InterfaceUpdate(InterfaceView),
        InterfaceDelete(InterfaceKey),
        Flood {
            lsdb_id: LsdbId,
            lsa: Arc<Lsa>,
            origin: Option<NeighborKey>,
        },
        Stop {
            ack: Responder<()>,
        },
    }

    // Messages handled by the LSDB task.
    #[derive(Debug)]
    pub enum LsdbMsg {
        AreaStart(AreaCfg),
        AreaStop {
            area_id: Ipv4Addr,
        },
        InterfaceUpdate(InterfaceSummary),
        InterfaceDelete {
            area_id: Ipv4Addr,
            iface: InterfaceKey,
        },
        LsaReceived {
            area_id: Ipv4Addr,
            lsa: Lsa,
            origin: NeighborKey,
            exchanging: bool,
            reply: Responder<LsaRcvdOutcome>,
        },
        Get {
            area_id: Ipv4Addr,
            keys: Vec<LsaKey>,
            reply: Responder<Vec<Option<Arc<Lsa>>>>,
        },
        Headers {
            area_id: Ipv4Addr,
            reply: Responder<Vec<Arc<Lsa>>>,
        },
        NewerThanDb {
            area_id: Ipv4Addr,
            hdrs: Vec<LsaHdr>,
            reply: Responder<Vec<LsaHdr>>,
        },
        NeighborDown {
            area_id: Ipv4Addr,
            router_id: Ipv4Addr,
        },
        Summaries(BTreeMap<Ipv4Addr, BTreeMap<LsaKey, LsaBody>>),
        ExternalRouteAdd {
            prefix: Ipv4Network,
            metric: u32,
        },
        ExternalRouteDel {
            prefix: Ipv4Network,
        },
        AgeTick,
        DelayedOrig {
            lsdb_id: LsdbId,
            key: LsaKey,
        },
        Snapshot {
            reply: Responder<LsdbSnapshot>,
        },
        GetState {
            reply: Responder<Vec<LsdbState>>,
        },
        Stop {
            ack: Responder<()>,
        },
    }

    // Messages handled by the SPF task.
    #[derive(Debug)]
    pub enum SpfMsg {
        Schedule,
        DelayTimer,
        GetState {
            reply: Responder<Vec<RouteState>>,
        },
        Stop {
            ack: Responder<()>,
        },
    }
}

// Handle to a running component task.
#[derive(Debug)]
pub struct Component<M> {
    pub name: &'static str,
    pub tx: UnboundedSender<M>,
    task: Task<()>,
}

// ===== impl Component =====

impl<M> Component<M> {
    pub(crate) fn new(
        name: &'static str,
        tx: UnboundedSender<M>,
        task: Task<()>,
    ) -> Self {
        Component { name, tx, task }
    }

    // Asks the component to stop and blocks until it acknowledges the request
    // or the timeout expires. In the latter case the task is aborted.
    pub(crate) async fn stop<F>(
        self,
        stop_msg: F,
        timeout: Duration,
    ) -> Result<(), Error>
    where
        F: FnOnce(Responder<()>) -> M,
    {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(stop_msg(ack_tx)).is_err() {
            // The task is already gone.
            return Ok(());
        }

        match tokio::time::timeout(timeout, ack_rx).await {
            Ok(_) => {
                Debug::ComponentStop(self.name).log();
                let _ = self.task.await;
                Ok(())
            }
            Err(_) => Err(Error::StopTimeout(self.name)),
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

// ===== component tasks =====

pub(crate) fn interface(
    iface: Interface,
    ifacec: UnboundedReceiver<IfaceMsg>,
) -> Task<()> {
    let span = debug_span!("interface", name = %iface.name);
    Task::spawn(async move { iface.run(ifacec).await }.instrument(span))
}

pub(crate) fn neighbors(
    nbrs: Neighbors,
    nbrc: UnboundedReceiver<NbrMsg>,
) -> Task<()> {
    Task::spawn(
        async move { nbrs.run(nbrc).await }
            .instrument(debug_span!("neighbors")),
    )
}

pub(crate) fn flooding(
    flooding: Flooding,
    floodc: UnboundedReceiver<FloodMsg>,
) -> Task<()> {
    Task::spawn(
        async move { flooding.run(floodc).await }
            .instrument(debug_span!("flooding")),
    )
}

pub(crate) fn lsdb(
    lsdb: Lsdb,
    lsdbc: UnboundedReceiver<LsdbMsg>,
) -> Task<()> {
    Task::spawn(
        async move { lsdb.run(lsdbc).await }.instrument(debug_span!("lsdb")),
    )
}

pub(crate) fn spf(spf: Spf, spfc: UnboundedReceiver<SpfMsg>) -> Task<()> {
    Task::spawn(
        async move { spf.run(spfc).await }.instrument(debug_span!("spf")),
    )
}

// ===== network tasks =====

// Network Rx task.
pub(crate) fn net_rx(
    reader: Box<dyn PacketReader>,
    ifacep: &UnboundedSender<IfaceMsg>,
) -> Task<()> {
    let span1 = debug_span!("network");
    let _span1_guard = span1.enter();
    let span2 = debug_span!("input");
    let _span2_guard = span2.enter();

    let reader = Arc::new(Mutex::new(reader));
    let ifacep = ifacep.clone();

    Task::spawn_supervised(move || {
        let reader = reader.clone();
        let ifacep = ifacep.clone();
        async move {
            network::read_loop(reader, ifacep).await;
        }
        .in_current_span()
    })
}

// Network Tx task.
pub(crate) fn net_tx(
    ifname: String,
    writer: Box<dyn PacketWriter>,
    net_txc: UnboundedReceiver<NetTxMsg>,
) -> Task<()> {
    let span1 = debug_span!("network");
    let _span1_guard = span1.enter();
    let span2 = debug_span!("output");
    let _span2_guard = span2.enter();

    Task::spawn(
        async move {
            network::write_loop(ifname, writer, net_txc).await;
        }
        .in_current_span(),
    )
}

// ===== timers =====

// Send periodic OSPF Hello messages.
pub(crate) fn hello_interval(
    net_txp: &UnboundedSender<NetTxMsg>,
    dst: std::net::Ipv4Addr,
    packet: Packet,
    interval: u16,
) -> IntervalTask {
    let net_txp = net_txp.clone();
    IntervalTask::new(
        Duration::from_secs(interval.into()),
        true,
        move || {
            let packet = packet.clone();
            let net_txp = net_txp.clone();
            async move {
                let _ = net_txp.send(NetTxMsg::Packet { dst, packet });
            }
        },
    )
}

// Interface wait timer task.
pub(crate) fn ism_wait_timer(
    ifacep: &UnboundedSender<IfaceMsg>,
    dead_interval: u32,
) -> TimeoutTask {
    let ifacep = ifacep.clone();
    TimeoutTask::new(
        Duration::from_secs(dead_interval.into()),
        move || async move {
            let _ = ifacep.send(IfaceMsg::WaitTimer);
        },
    )
}

// Neighbor inactivity timer.
pub(crate) fn nsm_inactivity_timer(
    nbrp: &UnboundedSender<NbrMsg>,
    nbr: NeighborKey,
    dead_interval: u32,
) -> TimeoutTask {
    let nbrp = nbrp.clone();
    TimeoutTask::new(
        Duration::from_secs(dead_interval.into()),
        move || async move {
            let _ = nbrp.send(NbrMsg::InactivityTimer { nbr });
        },
    )
}

// Send periodic packet retransmissions.
pub(crate) fn packet_rxmt_interval(
    nbrp: &UnboundedSender<NbrMsg>,
    nbr: NeighborKey,
    packet_type: RxmtPacketType,
    interval: u16,
) -> IntervalTask {
    let nbrp = nbrp.clone();
    IntervalTask::new(
        Duration::from_secs(interval.into()),
        false,
        move || {
            let nbrp = nbrp.clone();
            async move {
                let _ = nbrp.send(NbrMsg::RxmtInterval { nbr, packet_type });
            }
        },
    )
}

// Timer to free the neighbor's last sent/received Database Description
// packets.
pub(crate) fn dbdesc_free_timer(
    nbrp: &UnboundedSender<NbrMsg>,
    nbr: NeighborKey,
    dead_interval: u32,
) -> TimeoutTask {
    let nbrp = nbrp.clone();
    TimeoutTask::new(
        Duration::from_secs(dead_interval.into()),
        move || async move {
            let _ = nbrp.send(NbrMsg::DbDescFree { nbr });
        },
    )
}

// LSDB aging tick, once per second.
pub(crate) fn lsdb_age_tick(lsdbp: &UnboundedSender<LsdbMsg>) -> IntervalTask {
    let lsdbp = lsdbp.clone();
    IntervalTask::new(Duration::from_secs(1), false, move || {
        let lsdbp = lsdbp.clone();
        async move {
            let _ = lsdbp.send(LsdbMsg::AgeTick);
        }
    })
}

// Postponed LSA origination (MinLSInterval).
pub(crate) fn lsa_orig_delayed_timer(
    lsdbp: &UnboundedSender<LsdbMsg>,
    lsdb_id: LsdbId,
    key: LsaKey,
    orig_time: Option<Instant>,
) -> TimeoutTask {
    let interval = Duration::from_secs(LSA_MIN_INTERVAL);
    let timeout = match orig_time {
        Some(orig_time) => interval.saturating_sub(orig_time.elapsed()),
        None => interval,
    };
    let lsdbp = lsdbp.clone();
    TimeoutTask::new(timeout, move || async move {
        let _ = lsdbp.send(LsdbMsg::DelayedOrig { lsdb_id, key });
    })
}

// SPF delay timer.
pub(crate) fn spf_delay_timer(
    spfp: &UnboundedSender<SpfMsg>,
    delay: Duration,
) -> TimeoutTask {
    let spfp = spfp.clone();
    TimeoutTask::new(delay, move || async move {
        let _ = spfp.send(SpfMsg::DelayTimer);
    })
}
