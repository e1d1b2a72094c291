//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use derive_new::new;
use ipnetwork::Ipv4Network;
use ospf_utils::ip::Ipv4AddrExt;
use ospf_utils::task::{IntervalTask, Task, TimeoutTask};
use ospf_utils::{UnboundedReceiver, UnboundedSender};
use serde::{Deserialize, Serialize};

use crate::debug::Debug;
use crate::error::{Error, InterfaceCfgError, IoError};
use crate::neighbor::{NeighborKey, nsm};
use crate::network::{InterfaceIo, MulticastAddr, NetworkDriver};
use crate::northbound::{AreaCfg, InterfaceCfg, InterfaceState};
use crate::packet::{Hello, Options, Packet, PacketHdr, PacketType};
use crate::southbound::L3Interface;
use crate::tasks;
use crate::tasks::messages::{
    FloodMsg, HelloRcvdMsg, IfaceMsg, LsdbMsg, NbrMsg, NetRxPacketMsg,
    NetTxMsg,
};

// OSPF network types.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceType {
    Broadcast,
    PointToPoint,
    Loopback,
}

// Interface identity: local address plus the ifindex of address-less
// interfaces.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, new)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceKey {
    pub addr: Ipv4Addr,
    pub addressless_ifindex: u32,
}

// Interface data shared with the neighbor dispatcher and the flooding task.
#[derive(Clone, Debug)]
pub struct InterfaceView {
    pub key: InterfaceKey,
    pub name: String,
    pub router_id: Ipv4Addr,
    pub area_id: Ipv4Addr,
    pub area_options: Options,
    pub if_type: InterfaceType,
    pub state: ism::State,
    pub addr: Ipv4Network,
    pub ifindex: u32,
    pub mtu: u16,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub transit_delay: u16,
    pub retransmit_interval: u16,
    pub dead_interval: u32,
    pub ifacep: UnboundedSender<IfaceMsg>,
    pub net_txp: Option<UnboundedSender<NetTxMsg>>,
}

// Interface data consumed by the LSDB for Router-LSA and Network-LSA
// origination, and by SPF for nexthop calculation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InterfaceSummary {
    pub key: InterfaceKey,
    pub area_id: Ipv4Addr,
    pub if_type: InterfaceType,
    pub state: ism::State,
    pub addr: Ipv4Network,
    pub ifindex: u32,
    pub cost: u16,
    pub dr: Option<Ipv4Addr>,
    // Fully adjacent neighbors (Router ID -> source address).
    pub full_nbrs: BTreeMap<Ipv4Addr, Ipv4Addr>,
    // Whether the router is fully adjacent to the DR (or is the DR with at
    // least one fully adjacent neighbor).
    pub dr_full: bool,
}

// Neighbor as seen by the interface, as far as Hello processing and the DR
// election are concerned.
#[derive(Clone, Debug)]
struct NeighborView {
    router_id: Ipv4Addr,
    src: Ipv4Addr,
    priority: u8,
    dr: Option<Ipv4Addr>,
    bdr: Option<Ipv4Addr>,
    // Whether the neighbor lists us in its Hellos.
    two_way: bool,
    state: nsm::State,
}

// Router taking part in the DR election.
#[derive(Clone, Copy, Debug, Eq, PartialEq, new)]
pub struct DrCandidate {
    pub router_id: Ipv4Addr,
    pub net_id: Ipv4Addr,
    pub priority: u8,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
}

// Network I/O of an operational interface.
#[derive(Debug)]
struct InterfaceNet {
    _net_rx_task: Task<()>,
    _net_tx_task: Task<()>,
    net_txp: UnboundedSender<NetTxMsg>,
}

pub struct Interface {
    pub name: String,
    pub key: InterfaceKey,
    router_id: Ipv4Addr,
    cfg: InterfaceCfg,
    area: AreaCfg,
    system: L3Interface,
    state: ism::State,
    dr: Option<Ipv4Addr>,
    bdr: Option<Ipv4Addr>,
    neighbors: BTreeMap<Ipv4Addr, NeighborView>,
    event_count: u32,
    last_change: Option<DateTime<Utc>>,
    mcast_groups: BTreeSet<MulticastAddr>,
    last_summary: Option<InterfaceSummary>,
    driver: Arc<dyn NetworkDriver>,
    net: Option<InterfaceNet>,
    hello_interval_task: Option<IntervalTask>,
    wait_timer: Option<TimeoutTask>,
    ifacep: UnboundedSender<IfaceMsg>,
    nbrp: UnboundedSender<NbrMsg>,
    floodp: UnboundedSender<FloodMsg>,
    lsdbp: UnboundedSender<LsdbMsg>,
}

// OSPF interface state machine.
pub mod ism {
    use serde::{Deserialize, Serialize};

    use crate::debug::InterfaceInactiveReason;

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down,
        Loopback,
        Waiting,
        PointToPoint,
        DrOther,
        Backup,
        Dr,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        InterfaceUp,
        WaitTimer,
        BackupSeen,
        NbrChange,
        InterfaceDown(InterfaceInactiveReason),
    }
}

// ===== impl InterfaceView =====

impl InterfaceView {
    pub fn is_dr_or_backup(&self) -> bool {
        matches!(self.state, ism::State::Dr | ism::State::Backup)
    }

    // Checks whether an adjacency should be formed with the given neighbor.
    pub fn need_adjacency(&self, nbr_net_id: Ipv4Addr) -> bool {
        match self.if_type {
            InterfaceType::PointToPoint => true,
            InterfaceType::Broadcast => {
                self.is_dr_or_backup()
                    || self.dr == Some(nbr_net_id)
                    || self.bdr == Some(nbr_net_id)
            }
            InterfaceType::Loopback => false,
        }
    }

    // Maximum size of an OSPF packet sent out this interface.
    pub fn max_packet_size(&self) -> u16 {
        const IPV4_HDR_SIZE: u16 = 20;

        self.mtu.saturating_sub(IPV4_HDR_SIZE)
    }

    // Destination of LS Updates and LS Acks flooded out this interface.
    pub fn flood_dst(&self) -> Ipv4Addr {
        if self.if_type == InterfaceType::PointToPoint
            || self.is_dr_or_backup()
        {
            MulticastAddr::AllSpfRtrs.addr()
        } else {
            MulticastAddr::AllDrRtrs.addr()
        }
    }

    pub fn packet_hdr(&self, pkt_type: PacketType) -> PacketHdr {
        PacketHdr::new(pkt_type, self.router_id, self.area_id)
    }

    pub fn send_packet(&self, dst: Ipv4Addr, packet: Packet) {
        if let Some(net_txp) = &self.net_txp {
            let _ = net_txp.send(NetTxMsg::Packet { dst, packet });
        }
    }
}

// ===== impl InterfaceSummary =====

impl InterfaceSummary {
    pub fn is_unnumbered(&self) -> bool {
        self.addr.ip().is_unspecified()
    }
}

// ===== impl Interface =====

impl Interface {
    pub(crate) fn new(
        router_id: Ipv4Addr,
        cfg: InterfaceCfg,
        area: AreaCfg,
        system: L3Interface,
        driver: Arc<dyn NetworkDriver>,
        ifacep: UnboundedSender<IfaceMsg>,
        nbrp: UnboundedSender<NbrMsg>,
        floodp: UnboundedSender<FloodMsg>,
        lsdbp: UnboundedSender<LsdbMsg>,
    ) -> Interface {
        let key = InterfaceKey::new(cfg.ip_address, cfg.addressless_ifindex);
        Interface {
            name: system.name.clone(),
            key,
            router_id,
            cfg,
            area,
            system,
            state: ism::State::Down,
            dr: None,
            bdr: None,
            neighbors: Default::default(),
            event_count: 0,
            last_change: None,
            mcast_groups: Default::default(),
            last_summary: None,
            driver,
            net: None,
            hello_interval_task: None,
            wait_timer: None,
            ifacep,
            nbrp,
            floodp,
            lsdbp,
        }
    }

    pub async fn run(mut self, mut ifacec: UnboundedReceiver<IfaceMsg>) {
        Debug::InterfaceStart(&self.name).log();

        // Open the network driver, unless this is a loopback interface.
        if self.cfg.if_type != InterfaceType::Loopback {
            match self.net_start().await {
                Ok(net) => self.net = Some(net),
                Err(error) => {
                    Error::InterfaceStartError(self.name.clone(), error).log();
                }
            }
        }
        if self.net.is_some() || self.cfg.if_type == InterfaceType::Loopback {
            self.fsm(ism::Event::InterfaceUp);
        } else {
            self.sync();
        }

        while let Some(msg) = ifacec.recv().await {
            match msg {
                IfaceMsg::NetRx(msg) => {
                    if let Err(error) = self.process_packet(msg) {
                        error.log();
                    }
                }
                IfaceMsg::WaitTimer => {
                    self.fsm(ism::Event::WaitTimer);
                }
                IfaceMsg::NeighborState {
                    net_id,
                    router_id,
                    state,
                } => {
                    self.neighbor_state(net_id, router_id, state);
                }
                IfaceMsg::NeighborDead { net_id } => {
                    self.neighbor_dead(net_id);
                }
                IfaceMsg::GetState { reply } => {
                    let _ = reply.send(self.state());
                }
                IfaceMsg::Stop { reason, ack } => {
                    Debug::InterfaceStop(&self.name, reason).log();
                    self.fsm(ism::Event::InterfaceDown(reason));

                    // Remove the interface from the other components.
                    let iface = self.key;
                    let area_id = self.area.area_id;
                    let _ = self.nbrp.send(NbrMsg::InterfaceDown { iface });
                    let _ = self.floodp.send(FloodMsg::InterfaceDelete(iface));
                    let _ = self
                        .lsdbp
                        .send(LsdbMsg::InterfaceDelete { area_id, iface });

                    // Stop the network tasks.
                    self.net = None;
                    let _ = ack.send(());
                    return;
                }
            }
        }
    }

    async fn net_start(&self) -> Result<InterfaceNet, IoError> {
        let addr = if self.key.addr.is_unspecified() {
            self.system.addr.ip()
        } else {
            self.key.addr
        };
        let io = InterfaceIo::new(self.name.clone(), self.system.ifindex, addr);
        let (reader, writer) = self.driver.open(&io).await?;

        let (net_txp, net_txc) = tokio::sync::mpsc::unbounded_channel();
        let net_rx_task = tasks::net_rx(reader, &self.ifacep);
        let net_tx_task = tasks::net_tx(self.name.clone(), writer, net_txc);
        Ok(InterfaceNet {
            _net_rx_task: net_rx_task,
            _net_tx_task: net_tx_task,
            net_txp,
        })
    }

    // ===== ISM =====

    pub(crate) fn fsm(&mut self, event: ism::Event) {
        Debug::IsmEvent(&self.state, &event).log();

        let mut dr_change = false;
        let new_state = match (self.state, &event) {
            // ISM (state, event) -> (Action, new state)
            (ism::State::Down, ism::Event::InterfaceUp) => {
                // Start interface.
                self.start()
            }
            (ism::State::Waiting, ism::Event::NbrChange) => {
                // No action required.
                return;
            }
            (
                ism::State::Waiting,
                ism::Event::BackupSeen | ism::Event::WaitTimer,
            ) => {
                // Stop the wait timer.
                self.wait_timer = None;

                // Run DR election.
                let (new_state, changed) = self.dr_election();
                dr_change = changed;
                new_state
            }
            (
                ism::State::DrOther | ism::State::Backup | ism::State::Dr,
                ism::Event::NbrChange,
            ) => {
                // Run DR election.
                let (new_state, changed) = self.dr_election();
                dr_change = changed;
                new_state
            }
            (_, ism::Event::InterfaceDown(_)) => {
                // Stop interface.
                self.stop();
                ism::State::Down
            }
            _ => {
                Error::IsmUnexpectedEvent(self.state, event).log();
                return;
            }
        };

        // Check for FSM state change.
        if new_state != self.state {
            self.fsm_state_change(new_state);
        } else if dr_change {
            self.sync_view();
            self.sync_hello_tx();
        }

        // Adjacencies might need to be formed or torn down after a change of
        // DR or BDR.
        if dr_change {
            let _ = self.nbrp.send(NbrMsg::AdjOk { iface: self.key });
        }

        // Propagate changes to the LSDB.
        self.sync();
    }

    fn fsm_state_change(&mut self, new_state: ism::State) {
        Debug::IsmTransition(&self.state, &new_state).log();

        self.state = new_state;
        self.update_mcast_groups();
        self.event_count += 1;
        self.last_change = Some(Utc::now());
        self.sync_hello_tx();
        self.sync_view();
    }

    fn start(&mut self) -> ism::State {
        if self.cfg.if_type == InterfaceType::Loopback {
            return ism::State::Loopback;
        }

        match self.cfg.if_type {
            InterfaceType::PointToPoint => ism::State::PointToPoint,
            _ => {
                // Routers that can't become DR skip the Waiting state.
                if self.cfg.priority == 0 {
                    ism::State::DrOther
                } else {
                    // Start wait timer.
                    let task = tasks::ism_wait_timer(
                        &self.ifacep,
                        self.cfg.dead_interval,
                    );
                    self.wait_timer = Some(task);
                    ism::State::Waiting
                }
            }
        }
    }

    fn stop(&mut self) {
        // Delete all neighbors.
        for nbr in std::mem::take(&mut self.neighbors).into_values() {
            Debug::NeighborDelete(nbr.router_id).log();
        }

        // Reset interface state.
        self.dr = None;
        self.bdr = None;
        self.wait_timer = None;
        self.hello_interval_task = None;
    }

    // Joins or leaves the OSPF multicast groups as required by the current
    // interface state.
    fn update_mcast_groups(&mut self) {
        let mut groups = BTreeSet::new();
        if self.state >= ism::State::Waiting {
            groups.insert(MulticastAddr::AllSpfRtrs);
        }
        if matches!(self.state, ism::State::Dr | ism::State::Backup) {
            groups.insert(MulticastAddr::AllDrRtrs);
        }

        let Some(net) = &self.net else {
            return;
        };
        for group in groups.difference(&self.mcast_groups) {
            let _ = net.net_txp.send(NetTxMsg::Join(*group));
        }
        for group in self.mcast_groups.difference(&groups) {
            let _ = net.net_txp.send(NetTxMsg::Leave(*group));
        }
        self.mcast_groups = groups;
    }

    // ===== DR election =====

    // Runs the DR election, returning the new interface state and whether the
    // DR or the BDR changed.
    fn dr_election(&mut self) -> (ism::State, bool) {
        let old_dr = self.dr;
        let old_bdr = self.bdr;

        let local = self.dr_candidate();
        let nbrs = self.dr_eligible_neighbors();
        let (dr, bdr) = elect_dr_bdr(local, &nbrs);
        self.dr = dr;
        self.bdr = bdr;

        Debug::IsmDrElection(old_dr, dr, old_bdr, bdr).log();

        // Calculate the new interface state.
        let addr = self.key.addr;
        let new_state = if dr == Some(addr) {
            ism::State::Dr
        } else if bdr == Some(addr) {
            ism::State::Backup
        } else {
            ism::State::DrOther
        };

        (new_state, old_dr != dr || old_bdr != bdr)
    }

    // Local router as a DR election candidate.
    fn dr_candidate(&self) -> Option<DrCandidate> {
        (self.cfg.priority != 0).then(|| {
            DrCandidate::new(
                self.router_id,
                self.key.addr,
                self.cfg.priority,
                self.dr,
                self.bdr,
            )
        })
    }

    // Neighbors in state 2-Way or higher and with a non-zero priority.
    fn dr_eligible_neighbors(&self) -> Vec<DrCandidate> {
        self.neighbors
            .values()
            .filter(|nbr| nbr.two_way && nbr.priority != 0)
            .map(|nbr| {
                DrCandidate::new(
                    nbr.router_id,
                    nbr.src,
                    nbr.priority,
                    nbr.dr,
                    nbr.bdr,
                )
            })
            .collect()
    }

    // ===== packet input =====

    fn process_packet(&mut self, msg: NetRxPacketMsg) -> Result<(), Error> {
        let NetRxPacketMsg { src, dst, packet } = msg;

        // Check if the packet was decoded successfully.
        let packet =
            packet.map_err(|error| Error::PacketDecodeError(src, error))?;

        // Ignore packets received on inoperational interfaces.
        if matches!(self.state, ism::State::Down | ism::State::Loopback) {
            return Ok(());
        }

        // Validate IP destination address.
        self.validate_packet_dst(dst)?;

        // Validate IP source address.
        self.validate_packet_src(src)?;

        // Check for Area ID mismatch.
        let pkt_type = packet.hdr().pkt_type;
        if packet.hdr().area_id != self.area.area_id {
            return Err(Error::InterfaceCfgError(
                self.name.clone(),
                src,
                pkt_type,
                InterfaceCfgError::AreaIdMismatch(
                    packet.hdr().area_id,
                    self.area.area_id,
                ),
            ));
        }

        // Log received packet.
        Debug::PacketRx(&self.name, &src, &dst, &packet).log();

        if let Packet::Hello(hello) = packet {
            self.process_packet_hello(src, hello)
        } else {
            // Non-Hello packets not matching any known neighbor are discarded.
            let router_id = packet.hdr().router_id;
            let net_id = self.net_id(src, router_id);
            if !self.neighbors.contains_key(&net_id) {
                return Err(Error::UnknownNeighbor(src, router_id));
            }

            let nbr = NeighborKey::new(self.key, net_id);
            let _ = self.nbrp.send(NbrMsg::Packet { nbr, packet });
            Ok(())
        }
    }

    fn process_packet_hello(
        &mut self,
        src: Ipv4Addr,
        hello: Hello,
    ) -> Result<(), Error> {
        // Perform all the required sanity checks.
        if let Err(error) = self.validate_hello(&hello) {
            return Err(Error::InterfaceCfgError(
                self.name.clone(),
                src,
                PacketType::Hello,
                error,
            ));
        }

        // Find or create new neighbor.
        let router_id = hello.hdr.router_id;
        let net_id = self.net_id(src, router_id);
        let mut new_nbr = false;
        let nbr = self.neighbors.entry(net_id).or_insert_with(|| {
            Debug::NeighborCreate(router_id).log();
            new_nbr = true;
            NeighborView {
                router_id,
                src,
                priority: hello.priority,
                dr: hello.dr,
                bdr: hello.bdr,
                two_way: false,
                state: nsm::State::Down,
            }
        });
        nbr.router_id = router_id;
        nbr.src = src;

        let two_way = hello.neighbors.contains(&self.router_id);
        let mut nbr_change = nbr.two_way != two_way;
        let mut backup_seen = false;
        nbr.two_way = two_way;

        if self.cfg.if_type != InterfaceType::Broadcast {
            nbr_change = false;
        } else if two_way {
            // Check for Router Priority change.
            if nbr.priority != hello.priority {
                nbr_change = true;
            }

            if self.state == ism::State::Waiting {
                // The neighbor declares itself as the DR with no BDR, or as
                // the BDR.
                if (hello.dr == Some(src) && hello.bdr.is_none())
                    || hello.bdr == Some(src)
                {
                    backup_seen = true;
                }
            }

            // The neighbor started or stopped declaring itself as the DR or
            // as the BDR.
            if (hello.dr == Some(src)) != (nbr.dr == Some(src))
                || (hello.bdr == Some(src)) != (nbr.bdr == Some(src))
            {
                nbr_change = true;
            }
        }

        // Update neighbor's data.
        nbr.priority = hello.priority;
        nbr.dr = hello.dr;
        nbr.bdr = hello.bdr;

        // Let the neighbor dispatcher run the NSM.
        let msg = HelloRcvdMsg {
            nbr: NeighborKey::new(self.key, net_id),
            router_id,
            src,
            priority: hello.priority,
            dr: hello.dr,
            bdr: hello.bdr,
            options: hello.options,
            two_way,
        };
        let _ = self.nbrp.send(NbrMsg::HelloRcvd(msg));

        // Advertise the new neighbor in our Hellos.
        if new_nbr {
            self.sync_hello_tx();
        }

        if backup_seen {
            self.fsm(ism::Event::BackupSeen);
        } else if nbr_change {
            self.fsm(ism::Event::NbrChange);
        }

        Ok(())
    }

    fn validate_packet_dst(&self, dst: Ipv4Addr) -> Result<(), Error> {
        // Check if the destination matches AllSPFRouters.
        if dst == MulticastAddr::AllSpfRtrs.addr() {
            return Ok(());
        }

        // Packets whose IP destination is AllDRouters should only be accepted
        // if the state of the receiving interface is DR or Backup.
        if dst == MulticastAddr::AllDrRtrs.addr()
            && matches!(self.state, ism::State::Dr | ism::State::Backup)
        {
            return Ok(());
        }

        // Unicast packets sent to the interface address.
        if dst == self.key.addr || dst == self.system.addr.ip() {
            return Ok(());
        }

        Err(Error::InvalidDstAddr(dst))
    }

    fn validate_packet_src(&self, src: Ipv4Addr) -> Result<(), Error> {
        if !src.is_usable() {
            return Err(Error::InvalidSrcAddr(src));
        }

        // The packet's IP source address is required to be on the same
        // network as the receiving interface.
        if self.cfg.if_type == InterfaceType::Broadcast
            && !self.system.addr.contains(src)
        {
            return Err(Error::InvalidSrcAddr(src));
        }

        Ok(())
    }

    fn validate_hello(&self, hello: &Hello) -> Result<(), InterfaceCfgError> {
        // Validate the Hello Network mask field.
        if self.cfg.if_type == InterfaceType::Broadcast {
            let mask = self.system.addr.mask();
            if hello.network_mask != mask {
                return Err(InterfaceCfgError::HelloMaskMismatch(
                    hello.network_mask,
                    mask,
                ));
            }
        }

        // Validate the HelloInterval field.
        if hello.hello_interval != self.cfg.hello_interval {
            return Err(InterfaceCfgError::HelloIntervalMismatch(
                hello.hello_interval,
                self.cfg.hello_interval,
            ));
        }

        // Validate the RouterDeadInterval field.
        if hello.dead_interval != self.cfg.dead_interval {
            return Err(InterfaceCfgError::DeadIntervalMismatch(
                hello.dead_interval,
                self.cfg.dead_interval,
            ));
        }

        // Validate the E-bit.
        if hello.options.e_bit() != self.area.import_external {
            return Err(InterfaceCfgError::ExternalRoutingCapabilityMismatch(
                hello.options.e_bit(),
            ));
        }

        // Check for duplicate Router ID.
        if hello.hdr.router_id == self.router_id {
            return Err(InterfaceCfgError::DuplicateRouterId(
                hello.hdr.router_id,
            ));
        }

        Ok(())
    }

    // ===== neighbor notifications =====

    fn neighbor_state(
        &mut self,
        net_id: Ipv4Addr,
        router_id: Ipv4Addr,
        state: nsm::State,
    ) {
        let Some(nbr) = self.neighbors.get_mut(&net_id) else {
            return;
        };
        if nbr.router_id != router_id {
            return;
        }
        nbr.state = state;
        self.sync();
    }

    fn neighbor_dead(&mut self, net_id: Ipv4Addr) {
        let Some(nbr) = self.neighbors.remove(&net_id) else {
            return;
        };
        Debug::NeighborDelete(nbr.router_id).log();
        self.sync_hello_tx();

        if nbr.two_way
            && matches!(
                self.state,
                ism::State::DrOther | ism::State::Backup | ism::State::Dr
            )
        {
            self.fsm(ism::Event::NbrChange);
        } else {
            self.sync();
        }
    }

    // ===== state propagation =====

    // Sends the interface summary to the LSDB when it changed.
    fn sync(&mut self) {
        let summary = self.summary();
        if self.last_summary.as_ref() != Some(&summary) {
            let _ = self.lsdbp.send(LsdbMsg::InterfaceUpdate(summary.clone()));
            self.last_summary = Some(summary);
        }
    }

    // Sends the interface view to the neighbor dispatcher and to the flooding
    // task.
    fn sync_view(&self) {
        let view = self.view();
        let _ = self.nbrp.send(NbrMsg::InterfaceUpdate(view.clone()));
        let _ = self.floodp.send(FloodMsg::InterfaceUpdate(view));
    }

    // (Re)starts the Hello transmission with up-to-date contents.
    fn sync_hello_tx(&mut self) {
        let Some(net) = &self.net else {
            self.hello_interval_task = None;
            return;
        };
        if matches!(self.state, ism::State::Down | ism::State::Loopback) {
            self.hello_interval_task = None;
            return;
        }

        let dst = MulticastAddr::AllSpfRtrs.addr();
        let packet = self.generate_hello();
        let task = tasks::hello_interval(
            &net.net_txp,
            dst,
            packet,
            self.cfg.hello_interval,
        );
        self.hello_interval_task = Some(task);
    }

    fn generate_hello(&self) -> Packet {
        let hdr = PacketHdr::new(
            PacketType::Hello,
            self.router_id,
            self.area.area_id,
        );
        let network_mask = if self.key.addr.is_unspecified() {
            Ipv4Addr::UNSPECIFIED
        } else {
            self.system.addr.mask()
        };

        Packet::Hello(Hello {
            hdr,
            network_mask,
            hello_interval: self.cfg.hello_interval,
            options: self.area_options(),
            priority: self.cfg.priority,
            dead_interval: self.cfg.dead_interval,
            dr: self.dr,
            bdr: self.bdr,
            neighbors: self
                .neighbors
                .values()
                .map(|nbr| nbr.router_id)
                .collect(),
        })
    }

    fn area_options(&self) -> Options {
        let mut options = Options::empty();
        if self.area.import_external {
            options.insert(Options::E);
        }
        options
    }

    fn addr(&self) -> Ipv4Network {
        if self.key.addr.is_unspecified() {
            Ipv4Network::from(Ipv4Addr::UNSPECIFIED)
        } else {
            Ipv4Network::new(self.key.addr, self.system.addr.prefix())
                .unwrap_or(self.system.addr)
        }
    }

    fn view(&self) -> InterfaceView {
        InterfaceView {
            key: self.key,
            name: self.name.clone(),
            router_id: self.router_id,
            area_id: self.area.area_id,
            area_options: self.area_options(),
            if_type: self.cfg.if_type,
            state: self.state,
            addr: self.addr(),
            ifindex: self.system.ifindex,
            mtu: self.system.mtu,
            dr: self.dr,
            bdr: self.bdr,
            transit_delay: self.cfg.transit_delay,
            retransmit_interval: self.cfg.retransmit_interval,
            dead_interval: self.cfg.dead_interval,
            ifacep: self.ifacep.clone(),
            net_txp: self.net.as_ref().map(|net| net.net_txp.clone()),
        }
    }

    fn summary(&self) -> InterfaceSummary {
        let full_nbrs: BTreeMap<_, _> = self
            .neighbors
            .values()
            .filter(|nbr| nbr.state == nsm::State::Full)
            .map(|nbr| (nbr.router_id, nbr.src))
            .collect();
        let dr_full = match self.dr {
            Some(dr) if dr == self.key.addr => !full_nbrs.is_empty(),
            Some(dr) => self
                .neighbors
                .get(&dr)
                .is_some_and(|nbr| nbr.state == nsm::State::Full),
            None => false,
        };

        InterfaceSummary {
            key: self.key,
            area_id: self.area.area_id,
            if_type: self.cfg.if_type,
            state: self.state,
            addr: self.addr(),
            ifindex: self.system.ifindex,
            cost: self.cfg.cost,
            dr: self.dr,
            full_nbrs,
            dr_full,
        }
    }

    fn state(&self) -> InterfaceState {
        let router_id_of = |addr: Option<Ipv4Addr>| {
            addr.and_then(|addr| {
                if addr == self.key.addr {
                    Some(self.router_id)
                } else {
                    self.neighbors.get(&addr).map(|nbr| nbr.router_id)
                }
            })
        };

        InterfaceState {
            ip_address: self.key.addr,
            addressless_ifindex: self.key.addressless_ifindex,
            name: self.name.clone(),
            area_id: self.area.area_id,
            if_type: self.cfg.if_type,
            state: self.state,
            dr_addr: self.dr,
            dr_router_id: router_id_of(self.dr),
            bdr_addr: self.bdr,
            bdr_router_id: router_id_of(self.bdr),
            mtu: self.system.mtu,
            cost: self.cfg.cost,
            lsa_count: Default::default(),
            neighbor_count: self.neighbors.len(),
            event_count: self.event_count,
            last_change: self.last_change,
        }
    }

    // Neighbors are identified by their source address on broadcast networks
    // and by their Router ID on point-to-point links.
    fn net_id(&self, src: Ipv4Addr, router_id: Ipv4Addr) -> Ipv4Addr {
        match self.cfg.if_type {
            InterfaceType::Broadcast => src,
            InterfaceType::PointToPoint | InterfaceType::Loopback => router_id,
        }
    }
}

// ===== global functions =====

// Elects the Backup Designated Router (RFC 2328 Section 9.4, step 2).
pub fn elect_bdr(routers: &[DrCandidate]) -> Option<Ipv4Addr> {
    // Routers that have not declared themselves to be the DR.
    let eligible = || routers.iter().filter(|rtr| rtr.dr != Some(rtr.net_id));

    // Prefer the routers declaring themselves to be the BDR.
    eligible()
        .filter(|rtr| rtr.bdr == Some(rtr.net_id))
        .max_by_key(|rtr| (rtr.priority, rtr.router_id))
        .or_else(|| eligible().max_by_key(|rtr| (rtr.priority, rtr.router_id)))
        .map(|rtr| rtr.net_id)
}

// Elects the Designated Router (RFC 2328 Section 9.4, step 3).
pub fn elect_dr(
    routers: &[DrCandidate],
    bdr: Option<Ipv4Addr>,
) -> Option<Ipv4Addr> {
    routers
        .iter()
        .filter(|rtr| rtr.dr == Some(rtr.net_id))
        .max_by_key(|rtr| (rtr.priority, rtr.router_id))
        .map(|rtr| rtr.net_id)
        .or(bdr)
}

// Runs the complete DR election from the point of view of the local router,
// returning the new DR and BDR.
//
// When the local router becomes (or stops being) the DR or the BDR, the
// election is repeated with its updated claims.
pub fn elect_dr_bdr(
    local: Option<DrCandidate>,
    nbrs: &[DrCandidate],
) -> (Option<Ipv4Addr>, Option<Ipv4Addr>) {
    let elect = |local: Option<DrCandidate>| {
        let routers: Vec<_> =
            local.into_iter().chain(nbrs.iter().copied()).collect();
        let bdr = elect_bdr(&routers);
        let dr = elect_dr(&routers, bdr);
        (dr, bdr)
    };

    let (dr, bdr) = elect(local);
    let Some(mut local) = local else {
        return (dr, bdr);
    };

    let addr = local.net_id;
    let is_dr = |new: Option<Ipv4Addr>, old: Option<Ipv4Addr>| {
        (new == Some(addr)) != (old == Some(addr))
    };
    if is_dr(dr, local.dr) || is_dr(bdr, local.bdr) {
        local.dr = dr;
        local.bdr = bdr;
        return elect(Some(local));
    }

    (dr, bdr)
}

// ===== unit tests =====
