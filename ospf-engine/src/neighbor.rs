//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use derive_new::new;
use nsm::{Event, State};
use ospf_utils::task::{IntervalTask, TimeoutTask};
use ospf_utils::{Responder, UnboundedReceiver, UnboundedSender};
#[cfg(not(feature = "deterministic"))]
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::debug::Debug;
use crate::error::Error;
use crate::interface::{InterfaceKey, InterfaceView, ism};
use crate::northbound::NeighborState;
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey};
use crate::packet::{DbDescFlags, Options, Packet};
use crate::tasks::messages::{HelloRcvdMsg, IfaceMsg, LsdbMsg, NbrMsg};
use crate::{events, output, tasks};

// Neighbor identity: the interface it was discovered on plus its network ID
// (source address on broadcast networks, Router ID on point-to-point links).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, new)]
#[derive(Deserialize, Serialize)]
pub struct NeighborKey {
    pub iface: InterfaceKey,
    pub net_id: Ipv4Addr,
}

#[derive(Debug)]
pub struct Neighbor {
    pub key: NeighborKey,
    pub router_id: Ipv4Addr,
    pub src: Ipv4Addr,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub priority: u8,
    pub state: State,

    pub options: Option<Options>,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
    pub last_rcvd_dbdesc: Option<LastDbDesc>,
    pub last_sent_dbdesc: Option<(Ipv4Addr, Packet)>,

    pub event_count: u32,
    pub discontinuity_time: DateTime<Utc>,

    pub lists: NeighborLsaLists,
    pub tasks: NeighborTasks,
}

#[derive(Debug)]
pub struct LastDbDesc {
    pub options: Options,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
}

#[derive(Debug, Default)]
pub struct NeighborLsaLists {
    // LSAs enqueued for transmission in LS Update packets.
    pub ls_update: BTreeMap<LsaKey, Arc<Lsa>>,
    // LSAs waiting to be acknowledged.
    pub ls_rxmt: BTreeMap<LsaKey, Arc<Lsa>>,
    // LSA headers enqueued for transmission in Database Description packets.
    pub db_summary: BTreeMap<LsaKey, Arc<Lsa>>,
    // LSAs that need to be received from this neighbor.
    pub ls_request: BTreeMap<LsaKey, LsaHdr>,
    // LSAs that were requested but not received yet.
    pub ls_request_pending: BTreeMap<LsaKey, LsaHdr>,
}

#[derive(Debug, Default)]
pub struct NeighborTasks {
    pub inactivity_timer: Option<TimeoutTask>,
    pub dbdesc_free_timer: Option<TimeoutTask>,
    rxmt_dbdesc: Option<IntervalTask>,
    rxmt_lsreq: Option<IntervalTask>,
    rxmt_lsupd: Option<IntervalTask>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RxmtPacketType {
    DbDesc,
    LsRequest,
    LsUpdate,
}

// Data shared by all neighbors handled by the dispatcher.
#[derive(Clone, Debug)]
pub struct InstanceCtx {
    pub router_id: Ipv4Addr,
    pub nbrp: UnboundedSender<NbrMsg>,
    pub lsdbp: UnboundedSender<LsdbMsg>,
}

// Neighbor dispatcher.
//
// Single task running the state machines of all neighbors of the instance.
#[derive(Debug)]
pub struct Neighbors {
    pub ctx: InstanceCtx,
    pub ifaces: BTreeMap<InterfaceKey, InterfaceView>,
    pub neighbors: BTreeMap<NeighborKey, Neighbor>,
}

// Neighbor state machine.
pub mod nsm {
    use serde::{Deserialize, Serialize};

    use crate::debug::SeqNoMismatchReason;

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down,
        Attempt,
        Init,
        TwoWay,
        ExStart,
        Exchange,
        Loading,
        Full,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        HelloRcvd,
        Start,
        TwoWayRcvd,
        NegotiationDone,
        ExchangeDone,
        BadLsReq,
        LoadingDone,
        AdjOk,
        SeqNoMismatch(SeqNoMismatchReason),
        OneWayRcvd,
        Kill,
        InactivityTimer,
        LinkDown,
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    pub(crate) fn new(
        key: NeighborKey,
        router_id: Ipv4Addr,
        src: Ipv4Addr,
    ) -> Neighbor {
        // Initialize the DD Sequence Number.
        let dd_seq_no = {
            #[cfg(not(feature = "deterministic"))]
            {
                // Random value.
                rand::rng().next_u32()
            }
            #[cfg(feature = "deterministic")]
            {
                // Fixed value for deterministic test results.
                router_id.into()
            }
        };

        Neighbor {
            key,
            router_id,
            src,
            dr: None,
            bdr: None,
            priority: 0,
            state: State::Down,
            options: None,
            dd_flags: DbDescFlags::empty(),
            dd_seq_no,
            last_rcvd_dbdesc: None,
            last_sent_dbdesc: None,
            event_count: 0,
            discontinuity_time: Utc::now(),
            lists: Default::default(),
            tasks: Default::default(),
        }
    }

    pub(crate) async fn fsm(
        &mut self,
        iface: &InterfaceView,
        ctx: &InstanceCtx,
        event: Event,
    ) {
        Debug::NsmEvent(self.router_id, &self.state, &event).log();

        let new_state = match (self.state, &event) {
            // NSM (state, event) -> (Action, new state)
            (State::Attempt | State::Down, Event::HelloRcvd) => {
                self.inactivity_timer_reset(iface, ctx);
                Some(State::Init)
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::Init
                | State::TwoWay
                | State::ExStart
                | State::Exchange
                | State::Loading
                | State::Full,
                Event::HelloRcvd,
            ) => {
                self.inactivity_timer_reset(iface, ctx);
                None
            }
            // NSM (state, event) -> (Action, new state)
            (State::Init, Event::TwoWayRcvd)
            | (State::TwoWay, Event::AdjOk) => {
                if iface.need_adjacency(self.key.net_id) {
                    self.dd_seq_no = self.dd_seq_no.wrapping_add(1);
                    self.dd_flags.insert(
                        DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS,
                    );
                    output::send_dbdesc(self, iface, ctx);
                    Some(State::ExStart)
                } else {
                    Some(State::TwoWay)
                }
            }
            // NSM (state, event) -> (Action, new state)
            (State::ExStart, Event::NegotiationDone) => {
                // List the contents of the entire LSDB in the summary list.
                let area_id = iface.area_id;
                let lsas = ctx
                    .lsdb_request(|reply| LsdbMsg::Headers { area_id, reply })
                    .await;
                match lsas {
                    Ok(lsas) => {
                        for lsa in lsas {
                            let lsa_key = lsa.key();
                            if lsa.is_maxage() {
                                self.lists.ls_rxmt.insert(lsa_key, lsa);
                            } else {
                                self.lists.db_summary.insert(lsa_key, lsa);
                            }
                        }
                        self.rxmt_lsupd_start_check(iface, ctx);
                    }
                    Err(error) => error.log(),
                }

                self.dd_flags.remove(DbDescFlags::I);
                Some(State::Exchange)
            }
            // NSM (state, event) -> (Action, new state)
            (State::Exchange, Event::ExchangeDone) => {
                if self.lists.ls_request_pending.is_empty()
                    && self.lists.ls_request.is_empty()
                {
                    Some(State::Full)
                } else {
                    // Wait for outstanding LS Requests to be responded.
                    Some(State::Loading)
                }
            }
            // NSM (state, event) -> (Action, new state)
            (State::Loading, Event::LoadingDone) => {
                // No action required.
                Some(State::Full)
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::ExStart | State::Exchange | State::Loading | State::Full,
                Event::AdjOk,
            ) => {
                if iface.need_adjacency(self.key.net_id) {
                    None
                } else {
                    self.reset_adjacency();
                    Some(State::TwoWay)
                }
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::Exchange | State::Loading | State::Full,
                Event::SeqNoMismatch(_) | Event::BadLsReq,
            ) => {
                self.reset_adjacency();
                self.dd_seq_no = self.dd_seq_no.wrapping_add(1);
                self.dd_flags
                    .insert(DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS);
                output::send_dbdesc(self, iface, ctx);
                Some(State::ExStart)
            }
            // NSM (state, event) -> (Action, new state)
            (_, Event::Kill | Event::LinkDown | Event::InactivityTimer) => {
                self.reset_adjacency();
                self.tasks.inactivity_timer = None;
                Some(State::Down)
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::TwoWay
                | State::ExStart
                | State::Exchange
                | State::Loading
                | State::Full,
                Event::OneWayRcvd,
            ) => {
                self.reset_adjacency();
                Some(State::Init)
            }
            // NSM (state, event) -> (Action, new state)
            (
                State::TwoWay
                | State::ExStart
                | State::Exchange
                | State::Loading
                | State::Full,
                Event::TwoWayRcvd,
            ) => {
                // No action required.
                None
            }
            // NSM (state, event) -> (Action, new state)
            (State::Init, Event::OneWayRcvd) => {
                // No action required.
                None
            }
            // Catch-all wildcard.
            _ => {
                Error::NsmUnexpectedEvent(self.router_id, self.state, event)
                    .log();
                return;
            }
        };

        // Check for FSM state change.
        if let Some(new_state) = new_state {
            if new_state != self.state {
                self.fsm_state_change(iface, new_state);
            }
        }
    }

    fn fsm_state_change(&mut self, iface: &InterfaceView, new_state: State) {
        // Effectively transition to the new FSM state.
        Debug::NsmTransition(self.router_id, &self.state, &new_state).log();
        self.state = new_state;

        // Let the interface know. Transitions to and from 2-Way matter to the
        // DR election while transitions to and from Full affect the
        // origination of LSAs.
        let _ = iface.ifacep.send(IfaceMsg::NeighborState {
            net_id: self.key.net_id,
            router_id: self.router_id,
            state: new_state,
        });

        // Update statistics.
        self.event_count += 1;
        self.discontinuity_time = Utc::now();
    }

    pub(crate) async fn loading_done_check(
        &mut self,
        iface: &InterfaceView,
        ctx: &InstanceCtx,
    ) {
        // Check if all pending LSA requests were received.
        if self.lists.ls_request_pending.is_empty() {
            // Stop the LS Request rxmt task.
            self.rxmt_lsreq_stop();

            // Check if there are new LSAs to request.
            if !self.lists.ls_request.is_empty() {
                output::send_lsreq(self, iface, ctx);
            } else if self.state == State::Loading {
                // Database loading has completed.
                self.fsm(iface, ctx, Event::LoadingDone).await;
            }
        }
    }

    fn reset_adjacency(&mut self) {
        self.options = None;
        self.last_rcvd_dbdesc = None;
        self.last_sent_dbdesc = None;
        self.lists = Default::default();
        self.tasks.dbdesc_free_timer = None;
        self.tasks.rxmt_dbdesc = None;
        self.tasks.rxmt_lsreq = None;
        self.tasks.rxmt_lsupd = None;
    }

    pub(crate) fn dbdesc_is_dup(
        &self,
        options: Options,
        dd_flags: DbDescFlags,
        dd_seq_no: u32,
    ) -> bool {
        self.last_rcvd_dbdesc.as_ref().is_some_and(|last_rcvd_dbdesc| {
            last_rcvd_dbdesc.options == options
                && last_rcvd_dbdesc.dd_flags == dd_flags
                && last_rcvd_dbdesc.dd_seq_no == dd_seq_no
        })
    }

    pub(crate) fn state_info(&self, iface: &InterfaceView) -> NeighborState {
        NeighborState {
            addr: self.src,
            addressless_ifindex: self.key.iface.addressless_ifindex,
            iface_addr: self.key.iface.addr,
            router_id: self.router_id,
            area_id: iface.area_id,
            priority: self.priority,
            options: self.options,
            state: self.state,
            dr: self.dr,
            bdr: self.bdr,
            event_count: self.event_count,
            rxmt_count: self.lists.ls_rxmt.len(),
        }
    }

    fn inactivity_timer_reset(
        &mut self,
        iface: &InterfaceView,
        ctx: &InstanceCtx,
    ) {
        if let Some(inactivity_timer) = self.tasks.inactivity_timer.as_mut() {
            inactivity_timer.reset(None);
        } else {
            let task = tasks::nsm_inactivity_timer(
                &ctx.nbrp,
                self.key,
                iface.dead_interval,
            );
            self.tasks.inactivity_timer = Some(task);
        }
    }

    pub(crate) fn dbdesc_free_timer_start(
        &mut self,
        iface: &InterfaceView,
        ctx: &InstanceCtx,
    ) {
        let task =
            tasks::dbdesc_free_timer(&ctx.nbrp, self.key, iface.dead_interval);
        self.tasks.dbdesc_free_timer = Some(task);
    }

    pub(crate) fn rxmt_dbdesc_start(
        &mut self,
        iface: &InterfaceView,
        ctx: &InstanceCtx,
    ) {
        let task = tasks::packet_rxmt_interval(
            &ctx.nbrp,
            self.key,
            RxmtPacketType::DbDesc,
            iface.retransmit_interval,
        );
        self.tasks.rxmt_dbdesc = Some(task);
    }

    pub(crate) fn rxmt_dbdesc_stop(&mut self) {
        self.tasks.rxmt_dbdesc = None;
    }

    pub(crate) fn rxmt_lsreq_start(
        &mut self,
        iface: &InterfaceView,
        ctx: &InstanceCtx,
    ) {
        let task = tasks::packet_rxmt_interval(
            &ctx.nbrp,
            self.key,
            RxmtPacketType::LsRequest,
            iface.retransmit_interval,
        );
        self.tasks.rxmt_lsreq = Some(task);
    }

    fn rxmt_lsreq_stop(&mut self) {
        self.tasks.rxmt_lsreq = None;
    }

    pub(crate) fn rxmt_lsupd_start_check(
        &mut self,
        iface: &InterfaceView,
        ctx: &InstanceCtx,
    ) {
        if !self.lists.ls_rxmt.is_empty() && self.tasks.rxmt_lsupd.is_none() {
            let task = tasks::packet_rxmt_interval(
                &ctx.nbrp,
                self.key,
                RxmtPacketType::LsUpdate,
                iface.retransmit_interval,
            );
            self.tasks.rxmt_lsupd = Some(task);
        }
    }

    pub(crate) fn rxmt_lsupd_stop_check(&mut self) {
        if self.lists.ls_rxmt.is_empty() && self.tasks.rxmt_lsupd.is_some() {
            self.tasks.rxmt_lsupd = None;
        }
    }
}

// ===== impl InstanceCtx =====

impl InstanceCtx {
    // Sends a request to the LSDB task and waits for the reply.
    pub(crate) async fn lsdb_request<T, F>(&self, msg: F) -> Result<T, Error>
    where
        F: FnOnce(Responder<T>) -> LsdbMsg,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.lsdbp
            .send(msg(reply_tx))
            .map_err(|_| Error::ChannelClosed("lsdb"))?;
        reply_rx.await.map_err(|_| Error::ChannelClosed("lsdb"))
    }
}

// ===== impl Neighbors =====

impl Neighbors {
    pub fn new(
        router_id: Ipv4Addr,
        nbrp: UnboundedSender<NbrMsg>,
        lsdbp: UnboundedSender<LsdbMsg>,
    ) -> Neighbors {
        Neighbors {
            ctx: InstanceCtx {
                router_id,
                nbrp,
                lsdbp,
            },
            ifaces: Default::default(),
            neighbors: Default::default(),
        }
    }

    pub async fn run(mut self, mut nbrc: UnboundedReceiver<NbrMsg>) {
        while let Some(msg) = nbrc.recv().await {
            if let NbrMsg::Stop { ack } = msg {
                // Stop all neighbors and their timers.
                self.neighbors.clear();
                self.ifaces.clear();
                let _ = ack.send(());
                return;
            }
            self.process_msg(msg).await;
        }
    }

    pub(crate) async fn process_msg(&mut self, msg: NbrMsg) {
        match msg {
            NbrMsg::InterfaceUpdate(view) => {
                let iface = view.key;
                let down = view.state == ism::State::Down;
                self.ifaces.insert(iface, view);
                if down {
                    self.kill_iface_neighbors(iface, Event::LinkDown).await;
                }
            }
            NbrMsg::InterfaceDown { iface } => {
                self.kill_iface_neighbors(iface, Event::Kill).await;
                self.ifaces.remove(&iface);
            }
            NbrMsg::HelloRcvd(msg) => {
                self.process_hello_rcvd(msg).await;
            }
            NbrMsg::AdjOk { iface } => {
                let keys = self.iface_neighbors(iface);
                for nbr_key in keys {
                    let Some(nbr) = self.neighbors.get(&nbr_key) else {
                        continue;
                    };
                    if nbr.state >= State::TwoWay {
                        self.nbr_event(nbr_key, Event::AdjOk).await;
                    }
                }
            }
            NbrMsg::Packet { nbr, packet } => {
                if let Err(error) =
                    events::process_packet(self, nbr, packet).await
                {
                    error.log();
                }
            }
            NbrMsg::InactivityTimer { nbr } => {
                self.nbr_kill(nbr, Event::InactivityTimer).await;
            }
            NbrMsg::RxmtInterval { nbr, packet_type } => {
                events::process_packet_rxmt(self, nbr, packet_type);
            }
            NbrMsg::DbDescFree { nbr } => {
                events::process_dbdesc_free(self, nbr);
            }
            NbrMsg::FloodPrepare {
                iface,
                lsa,
                origin,
                reply,
            } => {
                let added =
                    events::process_flood_prepare(self, iface, &lsa, origin)
                        .await;
                let _ = reply.send(added);
            }
            NbrMsg::GetState { reply } => {
                let _ = reply.send(self.state());
            }
            NbrMsg::Stop { ack } => {
                let _ = ack.send(());
            }
        }
    }

    async fn process_hello_rcvd(&mut self, msg: HelloRcvdMsg) {
        let Some(iface) = self.ifaces.get(&msg.nbr.iface) else {
            return;
        };
        if iface.state == ism::State::Down {
            return;
        }

        let nbr = self.neighbors.entry(msg.nbr).or_insert_with(|| {
            Neighbor::new(msg.nbr, msg.router_id, msg.src)
        });
        nbr.router_id = msg.router_id;
        nbr.src = msg.src;
        nbr.priority = msg.priority;
        nbr.dr = msg.dr;
        nbr.bdr = msg.bdr;

        nbr.fsm(iface, &self.ctx, Event::HelloRcvd).await;
        let event = if msg.two_way {
            Event::TwoWayRcvd
        } else {
            Event::OneWayRcvd
        };
        nbr.fsm(iface, &self.ctx, event).await;
    }

    // Runs the FSM of a single neighbor.
    pub(crate) async fn nbr_event(
        &mut self,
        nbr_key: NeighborKey,
        event: Event,
    ) {
        let Some(iface) = self.ifaces.get(&nbr_key.iface) else {
            return;
        };
        let Some(nbr) = self.neighbors.get_mut(&nbr_key) else {
            return;
        };
        nbr.fsm(iface, &self.ctx, event).await;
    }

    // Brings the neighbor down and deletes it.
    async fn nbr_kill(&mut self, nbr_key: NeighborKey, event: Event) {
        let Some(iface) = self.ifaces.get(&nbr_key.iface) else {
            self.neighbors.remove(&nbr_key);
            return;
        };
        let Some(mut nbr) = self.neighbors.remove(&nbr_key) else {
            return;
        };
        let was_full = nbr.state == State::Full;
        nbr.fsm(iface, &self.ctx, event).await;

        // Age out the LSAs of the dead neighbor, unless they're still
        // reachable through another full adjacency in the same area.
        let area_id = iface.area_id;
        let router_id = nbr.router_id;
        let other_adjacency = self.neighbors.iter().any(|(key, other)| {
            other.router_id == router_id
                && other.state == State::Full
                && self
                    .ifaces
                    .get(&key.iface)
                    .is_some_and(|iface| iface.area_id == area_id)
        });
        if was_full && !other_adjacency {
            let _ = self
                .ctx
                .lsdbp
                .send(LsdbMsg::NeighborDown { area_id, router_id });
        }

        // Let the interface stop advertising the neighbor.
        let _ = iface.ifacep.send(IfaceMsg::NeighborDead {
            net_id: nbr_key.net_id,
        });
    }

    async fn kill_iface_neighbors(
        &mut self,
        iface: InterfaceKey,
        event: Event,
    ) {
        for nbr_key in self.iface_neighbors(iface) {
            self.nbr_kill(nbr_key, event).await;
        }
    }

    fn iface_neighbors(&self, iface: InterfaceKey) -> Vec<NeighborKey> {
        self.neighbors
            .keys()
            .filter(|nbr_key| nbr_key.iface == iface)
            .copied()
            .collect()
    }

    // Checks whether any neighbor is exchanging databases.
    pub(crate) fn exchanging(&self) -> bool {
        self.neighbors.values().any(|nbr| {
            matches!(nbr.state, State::Exchange | State::Loading)
        })
    }

    fn state(&self) -> Vec<NeighborState> {
        self.neighbors
            .iter()
            .filter_map(|(nbr_key, nbr)| {
                let iface = self.ifaces.get(&nbr_key.iface)?;
                Some(nbr.state_info(iface))
            })
            .collect()
    }
}
