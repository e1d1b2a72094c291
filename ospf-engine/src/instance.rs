//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use ipnetwork::Ipv4Network;
use ospf_utils::task::Task;
use ospf_utils::{Responder, UnboundedReceiver, UnboundedSender};
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug_span};

use crate::debug::{Debug, InstanceInactiveReason, InterfaceInactiveReason};
use crate::flood::Flooding;
use crate::interface::{Interface, InterfaceKey, ism};
use crate::lsdb::Lsdb;
use crate::neighbor::Neighbors;
use crate::network::NetworkDriver;
use crate::northbound::{
    AdminState, AreaAuthType, AreaCfg, AreaState, BulkState, ConfigError,
    GlobalCfg, GlobalState, InterfaceCfg, InterfaceState, LsaCounts,
    LsdbState, NeighborState, RouteState,
};
use crate::packet::lsa::LsaTypeCode;
use crate::route::RouteDestType;
use crate::southbound::{L3Interface, RouteSink, SouthboundMsg};
use crate::spf::Spf;
use crate::tasks::messages::{FloodMsg, IfaceMsg, LsdbMsg, NbrMsg, SpfMsg};
use crate::tasks::{self, Component};

type ConfigResult<T> = Result<T, ConfigError>;

// Northbound handle to a running OSPF instance.
//
// Every method sends a request to the instance task and waits for its reply.
#[derive(Clone, Debug)]
pub struct InstanceHandle {
    nb_tx: UnboundedSender<InstanceMsg>,
    sb_tx: UnboundedSender<SouthboundMsg>,
}

// Requests handled by the instance task.
#[derive(Debug)]
pub enum InstanceMsg {
    CreateGlobal {
        cfg: GlobalCfg,
        reply: Responder<ConfigResult<()>>,
    },
    UpdateGlobal {
        cfg: GlobalCfg,
        reply: Responder<ConfigResult<()>>,
    },
    DeleteGlobal {
        reply: Responder<ConfigResult<()>>,
    },
    CreateArea {
        cfg: AreaCfg,
        reply: Responder<ConfigResult<()>>,
    },
    UpdateArea {
        cfg: AreaCfg,
        reply: Responder<ConfigResult<()>>,
    },
    DeleteArea {
        area_id: Ipv4Addr,
        reply: Responder<ConfigResult<()>>,
    },
    CreateInterface {
        cfg: InterfaceCfg,
        reply: Responder<ConfigResult<()>>,
    },
    UpdateInterface {
        cfg: InterfaceCfg,
        reply: Responder<ConfigResult<()>>,
    },
    DeleteInterface {
        key: InterfaceKey,
        reply: Responder<ConfigResult<()>>,
    },
    GetState {
        request: StateRequest,
        reply: Responder<ConfigResult<StateReply>>,
    },
    Shutdown {
        ack: Responder<()>,
    },
}

// Operational state tables.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StateRequest {
    Global,
    Areas,
    Interfaces,
    Neighbors,
    Lsdb,
    Routes,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StateReply {
    Global(GlobalState),
    Areas(Vec<AreaState>),
    Interfaces(Vec<InterfaceState>),
    Neighbors(Vec<NeighborState>),
    Lsdb(Vec<LsdbState>),
    Routes(Vec<RouteState>),
}

// OSPF instance task.
//
// Owns the configuration and the system inventory, and drives the lifecycle
// of every protocol component.
pub struct Instance {
    global: Option<GlobalCfg>,
    areas: BTreeMap<Ipv4Addr, AreaCfg>,
    interfaces: BTreeMap<InterfaceKey, InterfaceCfg>,
    system: BTreeMap<String, L3Interface>,
    external_routes: BTreeMap<Ipv4Network, u32>,
    driver: Arc<dyn NetworkDriver>,
    sink: Arc<dyn RouteSink>,
    state: Option<InstanceState>,
}

// Components of an active instance.
#[derive(Debug)]
struct InstanceState {
    router_id: Ipv4Addr,
    stop_timeout: Duration,
    nbrs: Component<NbrMsg>,
    flooding: Component<FloodMsg>,
    lsdb: Component<LsdbMsg>,
    spf: Component<SpfMsg>,
    interfaces: BTreeMap<InterfaceKey, Component<IfaceMsg>>,
}

// Instance input channels.
#[derive(Debug)]
struct InstanceChannelsRx {
    nb: UnboundedReceiver<InstanceMsg>,
    sb: UnboundedReceiver<SouthboundMsg>,
}

#[derive(Debug)]
enum InstanceInput {
    Northbound(InstanceMsg),
    Southbound(SouthboundMsg),
}

// ===== impl InstanceHandle =====

impl InstanceHandle {
    // Spawns a new instance task. The instance stays inactive until its
    // global configuration is created.
    pub fn spawn(
        driver: Arc<dyn NetworkDriver>,
        sink: Arc<dyn RouteSink>,
    ) -> InstanceHandle {
        let (nb_tx, nb) = mpsc::unbounded_channel();
        let (sb_tx, sb) = mpsc::unbounded_channel();
        let instance = Instance::new(driver, sink);
        let mut task = Task::spawn(
            async move { instance.run(InstanceChannelsRx { nb, sb }).await }
                .instrument(debug_span!("ospf")),
        );
        task.detach();
        InstanceHandle { nb_tx, sb_tx }
    }

    // Channel feeding the instance with interface inventory updates and
    // external routes.
    pub fn southbound(&self) -> UnboundedSender<SouthboundMsg> {
        self.sb_tx.clone()
    }

    pub async fn create_global(&self, cfg: GlobalCfg) -> ConfigResult<()> {
        self.request(|reply| InstanceMsg::CreateGlobal { cfg, reply })
            .await?
    }

    pub async fn update_global(&self, cfg: GlobalCfg) -> ConfigResult<()> {
        self.request(|reply| InstanceMsg::UpdateGlobal { cfg, reply })
            .await?
    }

    pub async fn delete_global(&self) -> ConfigResult<()> {
        self.request(|reply| InstanceMsg::DeleteGlobal { reply })
            .await?
    }

    pub async fn create_area(&self, cfg: AreaCfg) -> ConfigResult<()> {
        self.request(|reply| InstanceMsg::CreateArea { cfg, reply })
            .await?
    }

    pub async fn update_area(&self, cfg: AreaCfg) -> ConfigResult<()> {
        self.request(|reply| InstanceMsg::UpdateArea { cfg, reply })
            .await?
    }

    pub async fn delete_area(&self, area_id: Ipv4Addr) -> ConfigResult<()> {
        self.request(|reply| InstanceMsg::DeleteArea { area_id, reply })
            .await?
    }

    pub async fn create_interface(
        &self,
        cfg: InterfaceCfg,
    ) -> ConfigResult<()> {
        self.request(|reply| InstanceMsg::CreateInterface { cfg, reply })
            .await?
    }

    pub async fn update_interface(
        &self,
        cfg: InterfaceCfg,
    ) -> ConfigResult<()> {
        self.request(|reply| InstanceMsg::UpdateInterface { cfg, reply })
            .await?
    }

    pub async fn delete_interface(
        &self,
        key: InterfaceKey,
    ) -> ConfigResult<()> {
        self.request(|reply| InstanceMsg::DeleteInterface { key, reply })
            .await?
    }

    pub async fn get_global(&self) -> ConfigResult<GlobalState> {
        match self.get_state(StateRequest::Global).await? {
            StateReply::Global(state) => Ok(state),
            _ => Err(ConfigError::EngineUnavailable),
        }
    }

    pub async fn get_area(
        &self,
        area_id: Ipv4Addr,
    ) -> ConfigResult<AreaState> {
        self.areas()
            .await?
            .into_iter()
            .find(|area| area.area_id == area_id)
            .ok_or(ConfigError::NotFound)
    }

    pub async fn get_bulk_areas(
        &self,
        from_idx: usize,
        count: usize,
    ) -> ConfigResult<BulkState<AreaState>> {
        BulkState::new(self.areas().await?, from_idx, count)
    }

    pub async fn get_interface(
        &self,
        key: InterfaceKey,
    ) -> ConfigResult<InterfaceState> {
        self.interfaces()
            .await?
            .into_iter()
            .find(|iface| {
                iface.ip_address == key.addr
                    && iface.addressless_ifindex == key.addressless_ifindex
            })
            .ok_or(ConfigError::NotFound)
    }

    pub async fn get_bulk_interfaces(
        &self,
        from_idx: usize,
        count: usize,
    ) -> ConfigResult<BulkState<InterfaceState>> {
        BulkState::new(self.interfaces().await?, from_idx, count)
    }

    pub async fn get_neighbor(
        &self,
        iface: InterfaceKey,
        router_id: Ipv4Addr,
    ) -> ConfigResult<NeighborState> {
        self.neighbors()
            .await?
            .into_iter()
            .find(|nbr| {
                nbr.iface_addr == iface.addr
                    && nbr.addressless_ifindex == iface.addressless_ifindex
                    && nbr.router_id == router_id
            })
            .ok_or(ConfigError::NotFound)
    }

    pub async fn get_bulk_neighbors(
        &self,
        from_idx: usize,
        count: usize,
    ) -> ConfigResult<BulkState<NeighborState>> {
        BulkState::new(self.neighbors().await?, from_idx, count)
    }

    // Looks up an LSA. AS-scoped LSAs have no area.
    pub async fn get_lsa(
        &self,
        area_id: Option<Ipv4Addr>,
        lsa_type: LsaTypeCode,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
    ) -> ConfigResult<LsdbState> {
        self.lsdb()
            .await?
            .into_iter()
            .find(|lsa| {
                lsa.area_id == area_id
                    && lsa.lsa_type == lsa_type
                    && lsa.lsa_id == lsa_id
                    && lsa.adv_rtr == adv_rtr
            })
            .ok_or(ConfigError::NotFound)
    }

    pub async fn get_bulk_lsdb(
        &self,
        from_idx: usize,
        count: usize,
    ) -> ConfigResult<BulkState<LsdbState>> {
        BulkState::new(self.lsdb().await?, from_idx, count)
    }

    // Looks up a routing table entry. Network routes take precedence over
    // router routes sharing the same host prefix.
    pub async fn get_route(
        &self,
        prefix: Ipv4Network,
    ) -> ConfigResult<RouteState> {
        self.routes()
            .await?
            .into_iter()
            .find(|route| route.prefix == prefix)
            .ok_or(ConfigError::NotFound)
    }

    pub async fn get_bulk_routes(
        &self,
        from_idx: usize,
        count: usize,
    ) -> ConfigResult<BulkState<RouteState>> {
        BulkState::new(self.routes().await?, from_idx, count)
    }

    // Stops every component and terminates the instance task.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.nb_tx.send(InstanceMsg::Shutdown { ack: ack_tx }).is_ok() {
            let _ = ack_rx.await;
        }
    }

    async fn areas(&self) -> ConfigResult<Vec<AreaState>> {
        match self.get_state(StateRequest::Areas).await? {
            StateReply::Areas(list) => Ok(list),
            _ => Err(ConfigError::EngineUnavailable),
        }
    }

    async fn interfaces(&self) -> ConfigResult<Vec<InterfaceState>> {
        match self.get_state(StateRequest::Interfaces).await? {
            StateReply::Interfaces(list) => Ok(list),
            _ => Err(ConfigError::EngineUnavailable),
        }
    }

    async fn neighbors(&self) -> ConfigResult<Vec<NeighborState>> {
        match self.get_state(StateRequest::Neighbors).await? {
            StateReply::Neighbors(list) => Ok(list),
            _ => Err(ConfigError::EngineUnavailable),
        }
    }

    async fn lsdb(&self) -> ConfigResult<Vec<LsdbState>> {
        match self.get_state(StateRequest::Lsdb).await? {
            StateReply::Lsdb(list) => Ok(list),
            _ => Err(ConfigError::EngineUnavailable),
        }
    }

    async fn routes(&self) -> ConfigResult<Vec<RouteState>> {
        match self.get_state(StateRequest::Routes).await? {
            StateReply::Routes(list) => Ok(list),
            _ => Err(ConfigError::EngineUnavailable),
        }
    }

    async fn get_state(
        &self,
        request: StateRequest,
    ) -> ConfigResult<StateReply> {
        self.request(|reply| InstanceMsg::GetState { request, reply })
            .await?
    }

    async fn request<T, F>(&self, msg: F) -> ConfigResult<T>
    where
        F: FnOnce(Responder<T>) -> InstanceMsg,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.nb_tx
            .send(msg(reply_tx))
            .map_err(|_| ConfigError::EngineUnavailable)?;
        reply_rx.await.map_err(|_| ConfigError::EngineUnavailable)
    }
}

// ===== impl Instance =====

impl Instance {
    fn new(
        driver: Arc<dyn NetworkDriver>,
        sink: Arc<dyn RouteSink>,
    ) -> Instance {
        Instance {
            global: None,
            areas: Default::default(),
            interfaces: Default::default(),
            system: Default::default(),
            external_routes: Default::default(),
            driver,
            sink,
            state: None,
        }
    }

    async fn run(mut self, mut rx: InstanceChannelsRx) {
        while let Some(input) = rx.recv().await {
            match input {
                InstanceInput::Northbound(InstanceMsg::Shutdown { ack }) => {
                    self.stop(InstanceInactiveReason::Shutdown).await;
                    let _ = ack.send(());
                    return;
                }
                InstanceInput::Northbound(msg) => {
                    self.process_nb_msg(msg).await;
                }
                InstanceInput::Southbound(msg) => {
                    self.process_sb_msg(msg).await;
                }
            }
        }

        // Every handle is gone.
        self.stop(InstanceInactiveReason::Shutdown).await;
    }

    async fn process_nb_msg(&mut self, msg: InstanceMsg) {
        match msg {
            InstanceMsg::CreateGlobal { cfg, reply } => {
                let _ = reply.send(self.create_global(cfg).await);
            }
            InstanceMsg::UpdateGlobal { cfg, reply } => {
                let _ = reply.send(self.update_global(cfg).await);
            }
            InstanceMsg::DeleteGlobal { reply } => {
                let _ = reply.send(Err(ConfigError::NotSupported));
            }
            InstanceMsg::CreateArea { cfg, reply } => {
                let _ = reply.send(self.create_area(cfg).await);
            }
            InstanceMsg::UpdateArea { cfg, reply } => {
                let _ = reply.send(self.update_area(cfg).await);
            }
            InstanceMsg::DeleteArea { area_id, reply } => {
                let _ = reply.send(self.delete_area(area_id).await);
            }
            InstanceMsg::CreateInterface { cfg, reply } => {
                let _ = reply.send(self.create_interface(cfg).await);
            }
            InstanceMsg::UpdateInterface { cfg, reply } => {
                let _ = reply.send(self.update_interface(cfg).await);
            }
            InstanceMsg::DeleteInterface { key, reply } => {
                let _ = reply.send(self.delete_interface(key).await);
            }
            InstanceMsg::GetState { request, reply } => {
                let _ = reply.send(self.get_state(request).await);
            }
            InstanceMsg::Shutdown { .. } => (),
        }
    }

    async fn process_sb_msg(&mut self, msg: SouthboundMsg) {
        match msg {
            SouthboundMsg::InterfaceUpdate(system) => {
                let old =
                    self.system.insert(system.name.clone(), system.clone());
                if old.as_ref() == Some(&system) {
                    return;
                }

                // Interfaces bound to the old or new version of the link.
                let affected: BTreeSet<_> = self
                    .interfaces
                    .values()
                    .filter(|cfg| {
                        old.as_ref().is_some_and(|old| l3_matches(old, cfg))
                            || l3_matches(&system, cfg)
                    })
                    .map(iface_key)
                    .collect();

                // MTU, address or operational status changes restart the
                // interface.
                for key in affected {
                    self.iface_stop(key, InterfaceInactiveReason::Resetting)
                        .await;
                    self.iface_update(key).await;
                }
            }
            SouthboundMsg::InterfaceDelete(name) => {
                let Some(old) = self.system.remove(&name) else {
                    return;
                };
                let affected: Vec<_> = self
                    .interfaces
                    .values()
                    .filter(|cfg| l3_matches(&old, cfg))
                    .map(iface_key)
                    .collect();
                for key in affected {
                    let reason = InterfaceInactiveReason::MissingL3Interface;
                    self.iface_stop(key, reason).await;
                }
            }
            SouthboundMsg::ExternalRouteAdd { prefix, metric } => {
                self.external_routes.insert(prefix, metric);
                if let Some(state) = &self.state {
                    let msg = LsdbMsg::ExternalRouteAdd { prefix, metric };
                    let _ = state.lsdb.tx.send(msg);
                }
            }
            SouthboundMsg::ExternalRouteDel { prefix } => {
                if self.external_routes.remove(&prefix).is_some() {
                    if let Some(state) = &self.state {
                        let msg = LsdbMsg::ExternalRouteDel { prefix };
                        let _ = state.lsdb.tx.send(msg);
                    }
                }
            }
        }
    }

    // ===== configuration =====

    async fn create_global(&mut self, cfg: GlobalCfg) -> ConfigResult<()> {
        if self.global.is_some() {
            return Err(ConfigError::AlreadyExists);
        }
        validate_global(&cfg)?;

        self.global = Some(cfg);
        self.update().await;
        Ok(())
    }

    async fn update_global(&mut self, cfg: GlobalCfg) -> ConfigResult<()> {
        if self.global.is_none() {
            return Err(ConfigError::GlobalCfgMissing);
        }
        validate_global(&cfg)?;

        self.stop(InstanceInactiveReason::Resetting).await;
        self.global = Some(cfg);
        self.update().await;
        Ok(())
    }

    async fn create_area(&mut self, cfg: AreaCfg) -> ConfigResult<()> {
        if self.areas.contains_key(&cfg.area_id) {
            return Err(ConfigError::AlreadyExists);
        }
        validate_area(&cfg)?;

        let area_id = cfg.area_id;
        self.areas.insert(area_id, cfg);
        self.area_start(area_id);
        Ok(())
    }

    async fn update_area(&mut self, cfg: AreaCfg) -> ConfigResult<()> {
        if !self.areas.contains_key(&cfg.area_id) {
            return Err(ConfigError::NotFound);
        }
        validate_area(&cfg)?;

        // Stop the area's interfaces and flush its LSDB.
        let area_id = cfg.area_id;
        let keys = self.area_interfaces(area_id);
        for key in &keys {
            self.iface_stop(*key, InterfaceInactiveReason::AreaDown)
                .await;
        }
        self.area_stop(area_id);

        // Apply the new configuration and bring everything back up.
        self.areas.insert(area_id, cfg);
        self.area_start(area_id);
        for key in keys {
            self.iface_update(key).await;
        }
        Ok(())
    }

    async fn delete_area(&mut self, area_id: Ipv4Addr) -> ConfigResult<()> {
        if !self.areas.contains_key(&area_id) {
            return Err(ConfigError::NotFound);
        }
        if !self.area_interfaces(area_id).is_empty() {
            return Err(ConfigError::AreaHasInterfaces(area_id));
        }

        self.area_stop(area_id);
        self.areas.remove(&area_id);
        Ok(())
    }

    async fn create_interface(
        &mut self,
        cfg: InterfaceCfg,
    ) -> ConfigResult<()> {
        let key = iface_key(&cfg);
        if self.interfaces.contains_key(&key) {
            return Err(ConfigError::AlreadyExists);
        }
        self.validate_interface(&cfg)?;

        self.interfaces.insert(key, cfg);
        self.iface_update(key).await;
        Ok(())
    }

    async fn update_interface(
        &mut self,
        cfg: InterfaceCfg,
    ) -> ConfigResult<()> {
        let key = iface_key(&cfg);
        if !self.interfaces.contains_key(&key) {
            return Err(ConfigError::NotFound);
        }
        self.validate_interface(&cfg)?;

        self.iface_stop(key, InterfaceInactiveReason::Resetting)
            .await;
        self.interfaces.insert(key, cfg);
        self.iface_update(key).await;
        Ok(())
    }

    async fn delete_interface(
        &mut self,
        key: InterfaceKey,
    ) -> ConfigResult<()> {
        if !self.interfaces.contains_key(&key) {
            return Err(ConfigError::NotFound);
        }

        self.iface_stop(key, InterfaceInactiveReason::AdminDown)
            .await;
        self.interfaces.remove(&key);
        Ok(())
    }

    fn validate_interface(&self, cfg: &InterfaceCfg) -> ConfigResult<()> {
        if !self.areas.contains_key(&cfg.area_id) {
            return Err(ConfigError::AreaNotFound(cfg.area_id));
        }
        if self.l3_lookup(cfg).is_none() {
            return Err(ConfigError::UnknownL3Interface(
                cfg.ip_address,
                cfg.addressless_ifindex,
            ));
        }
        Ok(())
    }

    // ===== lifecycle =====

    // Starts or stops the instance according to its configuration.
    async fn update(&mut self) {
        match &self.global {
            Some(cfg) if cfg.admin_state == AdminState::Up => {
                if self.state.is_none() {
                    let cfg = cfg.clone();
                    self.start(&cfg).await;
                }
            }
            _ => {
                self.stop(InstanceInactiveReason::AdminDown).await;
            }
        }
    }

    async fn start(&mut self, cfg: &GlobalCfg) {
        Debug::InstanceStart(cfg.router_id).log();

        let (nbrp, nbrc) = mpsc::unbounded_channel();
        let (floodp, floodc) = mpsc::unbounded_channel();
        let (lsdbp, lsdbc) = mpsc::unbounded_channel();
        let (spfp, spfc) = mpsc::unbounded_channel();

        let lsdb =
            Lsdb::new(cfg, lsdbp.clone(), floodp.clone(), spfp.clone());
        let nbrs = Neighbors::new(cfg.router_id, nbrp.clone(), lsdbp.clone());
        let flooding = Flooding::new(nbrp.clone());
        let spf =
            Spf::new(cfg, spfp.clone(), lsdbp.clone(), self.sink.clone());

        self.state = Some(InstanceState {
            router_id: cfg.router_id,
            stop_timeout: cfg.stop_timeout(),
            lsdb: Component::new("lsdb", lsdbp, tasks::lsdb(lsdb, lsdbc)),
            nbrs: Component::new(
                "neighbors",
                nbrp,
                tasks::neighbors(nbrs, nbrc),
            ),
            flooding: Component::new(
                "flooding",
                floodp,
                tasks::flooding(flooding, floodc),
            ),
            spf: Component::new("spf", spfp, tasks::spf(spf, spfc)),
            interfaces: Default::default(),
        });

        // Initialize area LSDBs.
        let area_ids: Vec<_> = self.areas.keys().copied().collect();
        for area_id in area_ids {
            self.area_start(area_id);
        }

        // Feed the external routes.
        if let Some(state) = &self.state {
            for (prefix, metric) in &self.external_routes {
                let msg = LsdbMsg::ExternalRouteAdd {
                    prefix: *prefix,
                    metric: *metric,
                };
                let _ = state.lsdb.tx.send(msg);
            }
        }

        // Try to start interfaces.
        let keys: Vec<_> = self.interfaces.keys().copied().collect();
        for key in keys {
            self.iface_update(key).await;
        }
    }

    async fn stop(&mut self, reason: InstanceInactiveReason) {
        let Some(mut state) = self.state.take() else {
            return;
        };

        Debug::InstanceStop(reason).log();

        // Interfaces go first so that their neighbors are torn down while the
        // rest of the components are still alive.
        let timeout = state.stop_timeout;
        for (_, iface) in std::mem::take(&mut state.interfaces) {
            let reason = InterfaceInactiveReason::InstanceDown;
            let result = iface
                .stop(|ack| IfaceMsg::Stop { reason, ack }, timeout)
                .await;
            if let Err(error) = result {
                error.log();
            }
        }

        let results = [
            state
                .nbrs
                .stop(|ack| NbrMsg::Stop { ack }, timeout)
                .await,
            state
                .flooding
                .stop(|ack| FloodMsg::Stop { ack }, timeout)
                .await,
            state.spf.stop(|ack| SpfMsg::Stop { ack }, timeout).await,
            state
                .lsdb
                .stop(|ack| LsdbMsg::Stop { ack }, timeout)
                .await,
        ];
        for result in results {
            if let Err(error) = result {
                error.log();
            }
        }
    }

    fn area_start(&self, area_id: Ipv4Addr) {
        let (Some(state), Some(cfg)) = (&self.state, self.areas.get(&area_id))
        else {
            return;
        };
        if cfg.admin_state == AdminState::Up {
            let _ = state.lsdb.tx.send(LsdbMsg::AreaStart(cfg.clone()));
        }
    }

    fn area_stop(&self, area_id: Ipv4Addr) {
        if let Some(state) = &self.state {
            let _ = state.lsdb.tx.send(LsdbMsg::AreaStop { area_id });
        }
    }

    // Starts the interface when all its prerequisites are met, or stops it
    // when they no longer are.
    async fn iface_update(&mut self, key: InterfaceKey) {
        let Some(state) = &self.state else {
            return;
        };
        let running = state
            .interfaces
            .get(&key)
            .is_some_and(|iface| !iface.is_finished());

        match self.iface_is_ready(key) {
            Ok(()) if !running => self.iface_start(key),
            Err(reason) if running => self.iface_stop(key, reason).await,
            _ => (),
        }
    }

    fn iface_is_ready(
        &self,
        key: InterfaceKey,
    ) -> Result<(), InterfaceInactiveReason> {
        let cfg = self
            .interfaces
            .get(&key)
            .ok_or(InterfaceInactiveReason::AdminDown)?;
        if cfg.admin_state != AdminState::Up {
            return Err(InterfaceInactiveReason::AdminDown);
        }
        let area = self
            .areas
            .get(&cfg.area_id)
            .ok_or(InterfaceInactiveReason::AreaDown)?;
        if area.admin_state != AdminState::Up {
            return Err(InterfaceInactiveReason::AreaDown);
        }
        let system = self
            .l3_lookup(cfg)
            .ok_or(InterfaceInactiveReason::MissingL3Interface)?;
        if !system.is_ready() {
            return Err(InterfaceInactiveReason::OperationalDown);
        }
        Ok(())
    }

    fn iface_start(&mut self, key: InterfaceKey) {
        let (Some(cfg), Some(state)) =
            (self.interfaces.get(&key), self.state.as_ref())
        else {
            return;
        };
        let (Some(area), Some(system)) =
            (self.areas.get(&cfg.area_id), self.l3_lookup(cfg))
        else {
            return;
        };

        let (ifacep, ifacec) = mpsc::unbounded_channel();
        let iface = Interface::new(
            state.router_id,
            cfg.clone(),
            area.clone(),
            system.clone(),
            self.driver.clone(),
            ifacep.clone(),
            state.nbrs.tx.clone(),
            state.flooding.tx.clone(),
            state.lsdb.tx.clone(),
        );
        let task = tasks::interface(iface, ifacec);
        let component = Component::new("interface", ifacep, task);
        if let Some(state) = self.state.as_mut() {
            state.interfaces.insert(key, component);
        }
    }

    async fn iface_stop(
        &mut self,
        key: InterfaceKey,
        reason: InterfaceInactiveReason,
    ) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let Some(iface) = state.interfaces.remove(&key) else {
            return;
        };
        let timeout = state.stop_timeout;
        if let Err(error) = iface
            .stop(|ack| IfaceMsg::Stop { reason, ack }, timeout)
            .await
        {
            error.log();
        }
    }

    fn area_interfaces(&self, area_id: Ipv4Addr) -> Vec<InterfaceKey> {
        self.interfaces
            .iter()
            .filter(|(_, cfg)| cfg.area_id == area_id)
            .map(|(key, _)| *key)
            .collect()
    }

    fn l3_lookup(&self, cfg: &InterfaceCfg) -> Option<&L3Interface> {
        self.system.values().find(|system| l3_matches(system, cfg))
    }

    // ===== operational state =====

    async fn get_state(
        &self,
        request: StateRequest,
    ) -> ConfigResult<StateReply> {
        let reply = match request {
            StateRequest::Global => {
                StateReply::Global(self.global_state().await?)
            }
            StateRequest::Areas => {
                StateReply::Areas(self.area_states().await?)
            }
            StateRequest::Interfaces => {
                StateReply::Interfaces(self.iface_states().await?)
            }
            StateRequest::Neighbors => {
                StateReply::Neighbors(self.nbr_states().await?)
            }
            StateRequest::Lsdb => StateReply::Lsdb(self.lsdb_states().await?),
            StateRequest::Routes => {
                StateReply::Routes(self.route_states().await?)
            }
        };
        Ok(reply)
    }

    async fn global_state(&self) -> ConfigResult<GlobalState> {
        let Some(cfg) = &self.global else {
            return Err(ConfigError::GlobalCfgMissing);
        };

        let ifaces = self.iface_states().await?;
        let nbrs = self.nbr_states().await?;
        let lsdb = self.lsdb_states().await?;
        let routes = self.route_states().await?;

        // The router is an ABR when it has operational interfaces in more
        // than one area.
        let active_areas: BTreeSet<_> = ifaces
            .iter()
            .filter(|iface| iface.state != ism::State::Down)
            .map(|iface| iface.area_id)
            .collect();

        Ok(GlobalState {
            router_id: cfg.router_id,
            active: self.state.is_some(),
            abr: active_areas.len() > 1,
            asbr: cfg.asbr,
            reference_bandwidth: cfg.reference_bandwidth,
            area_count: self.areas.len(),
            interface_count: self.interfaces.len(),
            neighbor_count: nbrs.len(),
            lsa_count: lsa_counts(&lsdb, |_| true),
            route_count: network_route_count(&routes, |_| true),
        })
    }

    async fn area_states(&self) -> ConfigResult<Vec<AreaState>> {
        let nbrs = self.nbr_states().await?;
        let lsdb = self.lsdb_states().await?;
        let routes = self.route_states().await?;

        let states = self
            .areas
            .values()
            .map(|cfg| {
                let area_id = cfg.area_id;
                AreaState {
                    area_id,
                    admin_state: cfg.admin_state,
                    import_external: cfg.import_external,
                    lsa_count: lsa_counts(&lsdb, |lsa| {
                        lsa.area_id == Some(area_id)
                    }),
                    interface_count: self.area_interfaces(area_id).len(),
                    neighbor_count: nbrs
                        .iter()
                        .filter(|nbr| nbr.area_id == area_id)
                        .count(),
                    route_count: network_route_count(&routes, |route| {
                        route.area_id == Some(area_id)
                    }),
                }
            })
            .collect();
        Ok(states)
    }

    async fn iface_states(&self) -> ConfigResult<Vec<InterfaceState>> {
        let lsdb = self.lsdb_states().await?;

        let mut states = vec![];
        for (key, cfg) in &self.interfaces {
            let running = self
                .state
                .as_ref()
                .and_then(|state| state.interfaces.get(key));
            let mut state = match running {
                Some(iface) => {
                    request(&iface.tx, |reply| IfaceMsg::GetState { reply })
                        .await?
                }
                None => self.iface_state_down(cfg),
            };
            let area_id = cfg.area_id;
            state.lsa_count =
                lsa_counts(&lsdb, |lsa| lsa.area_id == Some(area_id));
            states.push(state);
        }
        Ok(states)
    }

    // State of an interface that isn't running.
    fn iface_state_down(&self, cfg: &InterfaceCfg) -> InterfaceState {
        let system = self.l3_lookup(cfg);
        InterfaceState {
            ip_address: cfg.ip_address,
            addressless_ifindex: cfg.addressless_ifindex,
            name: system
                .map(|system| system.name.clone())
                .unwrap_or_default(),
            area_id: cfg.area_id,
            if_type: cfg.if_type,
            state: ism::State::Down,
            dr_addr: None,
            dr_router_id: None,
            bdr_addr: None,
            bdr_router_id: None,
            mtu: system.map(|system| system.mtu).unwrap_or_default(),
            cost: cfg.cost,
            lsa_count: Default::default(),
            neighbor_count: 0,
            event_count: 0,
            last_change: None,
        }
    }

    async fn nbr_states(&self) -> ConfigResult<Vec<NeighborState>> {
        match &self.state {
            Some(state) => {
                request(&state.nbrs.tx, |reply| NbrMsg::GetState { reply })
                    .await
            }
            None => Ok(vec![]),
        }
    }

    async fn lsdb_states(&self) -> ConfigResult<Vec<LsdbState>> {
        match &self.state {
            Some(state) => {
                request(&state.lsdb.tx, |reply| LsdbMsg::GetState { reply })
                    .await
            }
            None => Ok(vec![]),
        }
    }

    async fn route_states(&self) -> ConfigResult<Vec<RouteState>> {
        match &self.state {
            Some(state) => {
                request(&state.spf.tx, |reply| SpfMsg::GetState { reply })
                    .await
            }
            None => Ok(vec![]),
        }
    }
}

// ===== impl InstanceChannelsRx =====

impl InstanceChannelsRx {
    async fn recv(&mut self) -> Option<InstanceInput> {
        // Inventory updates are handled before configuration requests sent
        // after them.
        tokio::select! {
            biased;
            Some(msg) = self.sb.recv() => {
                Some(InstanceInput::Southbound(msg))
            }
            msg = self.nb.recv() => {
                msg.map(InstanceInput::Northbound)
            }
        }
    }
}

// ===== helper functions =====

fn validate_global(cfg: &GlobalCfg) -> ConfigResult<()> {
    if cfg.vrf != "default" {
        return Err(ConfigError::UnsupportedVrf(cfg.vrf.clone()));
    }
    if cfg.router_id.is_unspecified() || cfg.router_id.is_broadcast() {
        return Err(ConfigError::InvalidRouterId(cfg.router_id));
    }
    Ok(())
}

fn validate_area(cfg: &AreaCfg) -> ConfigResult<()> {
    if cfg.auth_type != AreaAuthType::None {
        return Err(ConfigError::UnsupportedAuthType(cfg.auth_type));
    }
    Ok(())
}

fn iface_key(cfg: &InterfaceCfg) -> InterfaceKey {
    InterfaceKey::new(cfg.ip_address, cfg.addressless_ifindex)
}

// Checks whether the system interface is the one the configuration refers
// to: by address for numbered interfaces, by ifindex for unnumbered ones.
fn l3_matches(system: &L3Interface, cfg: &InterfaceCfg) -> bool {
    if cfg.ip_address.is_unspecified() {
        system.ifindex == cfg.addressless_ifindex
    } else {
        system.addr.ip() == cfg.ip_address
    }
}

fn lsa_counts<F>(lsdb: &[LsdbState], filter: F) -> LsaCounts
where
    F: Fn(&LsdbState) -> bool,
{
    let mut counts = LsaCounts::default();
    for lsa in lsdb.iter().filter(|lsa| filter(lsa)) {
        counts.add(lsa.lsa_type);
    }
    counts
}

fn network_route_count<F>(routes: &[RouteState], filter: F) -> usize
where
    F: Fn(&RouteState) -> bool,
{
    routes
        .iter()
        .filter(|route| route.dest_type == RouteDestType::Network)
        .filter(|route| filter(route))
        .count()
}

async fn request<M, T, F>(tx: &UnboundedSender<M>, msg: F) -> ConfigResult<T>
where
    F: FnOnce(Responder<T>) -> M,
{
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(msg(reply_tx))
        .map_err(|_| ConfigError::EngineUnavailable)?;
    reply_rx.await.map_err(|_| ConfigError::EngineUnavailable)
}
