//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::interface::{InterfaceType, ism};
use crate::neighbor::nsm;
use crate::packet::Options;
use crate::packet::lsa::LsaTypeCode;
use crate::route::{PathType, RouteDestType};
use crate::southbound::Nexthop;

// Administrative state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdminState {
    #[default]
    Up,
    Down,
}

// Area authentication type.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AreaAuthType {
    #[default]
    None,
    Simple,
    Md5,
}

// Global configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GlobalCfg {
    pub vrf: String,
    pub router_id: Ipv4Addr,
    pub admin_state: AdminState,
    pub asbr: bool,
    // Reference bandwidth in Mbps.
    pub reference_bandwidth: u32,
    // SPF scheduling delay in milliseconds.
    pub spf_delay: u32,
    pub max_paths: u16,
    // Time allowed for a component to acknowledge a stop request, in
    // milliseconds.
    pub stop_timeout: u32,
}

// Area configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AreaCfg {
    pub area_id: Ipv4Addr,
    pub admin_state: AdminState,
    pub auth_type: AreaAuthType,
    // Areas that don't import external routes are stub areas.
    pub import_external: bool,
    pub stub_default_cost: u32,
}

// Interface configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct InterfaceCfg {
    pub ip_address: Ipv4Addr,
    pub addressless_ifindex: u32,
    pub admin_state: AdminState,
    pub area_id: Ipv4Addr,
    pub if_type: InterfaceType,
    pub priority: u8,
    pub transit_delay: u16,
    pub retransmit_interval: u16,
    pub hello_interval: u16,
    pub dead_interval: u32,
    pub cost: u16,
}

// Configuration errors, returned synchronously to the caller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    AlreadyExists,
    NotFound,
    GlobalCfgMissing,
    AreaNotFound(Ipv4Addr),
    AreaHasInterfaces(Ipv4Addr),
    UnknownL3Interface(Ipv4Addr, u32),
    UnsupportedAuthType(AreaAuthType),
    UnsupportedVrf(String),
    InvalidRouterId(Ipv4Addr),
    InvalidRange(usize),
    NotSupported,
    EngineUnavailable,
}

// Paginated state reply.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct BulkState<T> {
    pub end_idx: usize,
    pub count: usize,
    pub more: bool,
    pub list: Vec<T>,
}

// Global operational state.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct GlobalState {
    pub router_id: Ipv4Addr,
    pub active: bool,
    pub abr: bool,
    pub asbr: bool,
    pub reference_bandwidth: u32,
    pub area_count: usize,
    pub interface_count: usize,
    pub neighbor_count: usize,
    pub lsa_count: LsaCounts,
    pub route_count: usize,
}

// Area operational state.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct AreaState {
    pub area_id: Ipv4Addr,
    pub admin_state: AdminState,
    pub import_external: bool,
    pub lsa_count: LsaCounts,
    pub interface_count: usize,
    pub neighbor_count: usize,
    pub route_count: usize,
}

// Number of LSAs per type.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaCounts {
    pub router: u32,
    pub network: u32,
    pub summary_network: u32,
    pub summary_router: u32,
    pub as_external: u32,
}

// Interface operational state.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceState {
    pub ip_address: Ipv4Addr,
    pub addressless_ifindex: u32,
    pub name: String,
    pub area_id: Ipv4Addr,
    pub if_type: InterfaceType,
    pub state: ism::State,
    pub dr_addr: Option<Ipv4Addr>,
    pub dr_router_id: Option<Ipv4Addr>,
    pub bdr_addr: Option<Ipv4Addr>,
    pub bdr_router_id: Option<Ipv4Addr>,
    pub mtu: u16,
    pub cost: u16,
    pub lsa_count: LsaCounts,
    pub neighbor_count: usize,
    pub event_count: u32,
    pub last_change: Option<DateTime<Utc>>,
}

// Neighbor operational state.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NeighborState {
    pub addr: Ipv4Addr,
    pub addressless_ifindex: u32,
    pub iface_addr: Ipv4Addr,
    pub router_id: Ipv4Addr,
    pub area_id: Ipv4Addr,
    pub priority: u8,
    pub options: Option<Options>,
    pub state: nsm::State,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub event_count: u32,
    pub rxmt_count: usize,
}

// LSDB entry operational state.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsdbState {
    pub lsa_type: LsaTypeCode,
    pub lsa_id: Ipv4Addr,
    // Area the LSA belongs to (AS-scoped LSAs have none).
    pub area_id: Option<Ipv4Addr>,
    pub adv_rtr: Ipv4Addr,
    pub seq_no: u32,
    pub age: u16,
    pub cksum: u16,
    pub options: Options,
    pub length: u16,
    pub advertisement: String,
}

// Routing table entry operational state.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteState {
    pub prefix: Ipv4Network,
    pub dest_type: RouteDestType,
    pub area_id: Option<Ipv4Addr>,
    pub path_type: PathType,
    pub cost: u32,
    pub type2_cost: Option<u32>,
    pub nexthops: BTreeSet<Nexthop>,
    pub ls_origin: Option<String>,
}

// ===== impl GlobalCfg =====

impl GlobalCfg {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout.into())
    }

    pub fn spf_delay(&self) -> Duration {
        Duration::from_millis(self.spf_delay.into())
    }
}

impl Default for GlobalCfg {
    fn default() -> GlobalCfg {
        GlobalCfg {
            vrf: "default".to_owned(),
            router_id: Ipv4Addr::UNSPECIFIED,
            admin_state: AdminState::Up,
            asbr: false,
            reference_bandwidth: 100000,
            spf_delay: 50,
            max_paths: 16,
            stop_timeout: 5000,
        }
    }
}

// ===== impl AreaCfg =====

impl AreaCfg {
    pub fn is_stub(&self) -> bool {
        !self.import_external
    }
}

impl Default for AreaCfg {
    fn default() -> AreaCfg {
        AreaCfg {
            area_id: Ipv4Addr::UNSPECIFIED,
            admin_state: AdminState::Up,
            auth_type: AreaAuthType::None,
            import_external: true,
            stub_default_cost: 1,
        }
    }
}

// ===== impl InterfaceCfg =====

impl Default for InterfaceCfg {
    fn default() -> InterfaceCfg {
        InterfaceCfg {
            ip_address: Ipv4Addr::UNSPECIFIED,
            addressless_ifindex: 0,
            admin_state: AdminState::Up,
            area_id: Ipv4Addr::UNSPECIFIED,
            if_type: InterfaceType::Broadcast,
            priority: 1,
            transit_delay: 1,
            retransmit_interval: 5,
            hello_interval: 10,
            dead_interval: 40,
            cost: 10,
        }
    }
}

// ===== impl ConfigError =====

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::AlreadyExists => {
                write!(f, "object already exists")
            }
            ConfigError::NotFound => {
                write!(f, "object not found")
            }
            ConfigError::GlobalCfgMissing => {
                write!(f, "global configuration missing")
            }
            ConfigError::AreaNotFound(area_id) => {
                write!(f, "area {} not found", area_id)
            }
            ConfigError::AreaHasInterfaces(area_id) => {
                write!(f, "area {} still has interfaces", area_id)
            }
            ConfigError::UnknownL3Interface(addr, ifindex) => {
                write!(f, "unknown L3 interface {} (ifindex {})", addr, ifindex)
            }
            ConfigError::UnsupportedAuthType(auth_type) => {
                write!(f, "unsupported authentication type: {:?}", auth_type)
            }
            ConfigError::UnsupportedVrf(vrf) => {
                write!(f, "unsupported VRF: {}", vrf)
            }
            ConfigError::InvalidRouterId(router_id) => {
                write!(f, "invalid router-id: {}", router_id)
            }
            ConfigError::InvalidRange(from_idx) => {
                write!(f, "invalid get-bulk start index: {}", from_idx)
            }
            ConfigError::NotSupported => {
                write!(f, "operation not supported")
            }
            ConfigError::EngineUnavailable => {
                write!(f, "engine unavailable")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ===== impl BulkState =====

impl<T> BulkState<T> {
    // Slices a full list of objects for a get-bulk request.
    pub fn new(
        items: Vec<T>,
        from_idx: usize,
        count: usize,
    ) -> Result<BulkState<T>, ConfigError> {
        let total = items.len();
        if from_idx > total || (from_idx == total && total != 0) {
            return Err(ConfigError::InvalidRange(from_idx));
        }

        let list: Vec<T> =
            items.into_iter().skip(from_idx).take(count).collect();
        let end_idx = from_idx + list.len();
        Ok(BulkState {
            end_idx,
            count: list.len(),
            more: end_idx < total,
            list,
        })
    }
}

// ===== impl LsaCounts =====

impl LsaCounts {
    pub fn add(&mut self, lsa_type: LsaTypeCode) {
        match lsa_type {
            LsaTypeCode::Router => self.router += 1,
            LsaTypeCode::Network => self.network += 1,
            LsaTypeCode::SummaryNetwork => self.summary_network += 1,
            LsaTypeCode::SummaryRouter => self.summary_router += 1,
            LsaTypeCode::AsExternal => self.as_external += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.router
            + self.network
            + self.summary_network
            + self.summary_router
            + self.as_external
    }
}

// ===== unit tests =====
