//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span};

use crate::interface::ism;
use crate::neighbor::nsm;
use crate::packet::Packet;
use crate::packet::error::LsaValidationError;
use crate::packet::lsa::LsaHdr;

// OSPF debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Instances
    InstanceStart(Ipv4Addr),
    InstanceStop(InstanceInactiveReason),
    ComponentStop(&'static str),
    // Interfaces
    InterfaceStart(&'a str),
    InterfaceStop(&'a str, InterfaceInactiveReason),
    IsmEvent(&'a ism::State, &'a ism::Event),
    IsmTransition(&'a ism::State, &'a ism::State),
    IsmDrElection(
        Option<Ipv4Addr>,
        Option<Ipv4Addr>,
        Option<Ipv4Addr>,
        Option<Ipv4Addr>,
    ),
    // Neighbors
    NeighborCreate(Ipv4Addr),
    NeighborDelete(Ipv4Addr),
    NsmEvent(Ipv4Addr, &'a nsm::State, &'a nsm::Event),
    NsmTransition(Ipv4Addr, &'a nsm::State, &'a nsm::State),
    // Network
    PacketRx(&'a str, &'a Ipv4Addr, &'a Ipv4Addr, &'a Packet),
    PacketTx(&'a str, &'a Ipv4Addr, &'a Packet),
    PacketRxIgnore(Ipv4Addr, &'a nsm::State),
    // Flooding
    LsaDiscard(Ipv4Addr, &'a LsaHdr, &'a LsaValidationError),
    LsaMinArrivalDiscard(&'a LsaHdr),
    LsaSelfOriginated(&'a LsaHdr),
    QuestionableAck(Ipv4Addr, &'a LsaHdr),
    // LSDB maintenance
    LsaInstall(&'a LsaHdr),
    LsaOriginate(&'a LsaHdr),
    LsaOriginateMinInterval(&'a LsaHdr),
    LsaFlush(&'a LsaHdr, LsaFlushReason),
    LsaRefresh(&'a LsaHdr),
    LsaMaxAgeRemove(&'a LsaHdr),
    // SPF
    SpfStart,
    SpfFinish(usize),
    SpfUnreachableAsbr(&'a Ipv4Network, Ipv4Addr),
    SpfUnreachableAbr(&'a Ipv4Network, Ipv4Addr),
    SpfUnreachableFwdAddr(&'a Ipv4Network, Ipv4Addr),
    RouteInstall(&'a Ipv4Network, u32),
    RouteUninstall(&'a Ipv4Network),
}

// Reason why an OSPF instance is inactive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InstanceInactiveReason {
    AdminDown,
    Resetting,
    Shutdown,
}

// Reason why OSPF is inactive on an interface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum InterfaceInactiveReason {
    InstanceDown,
    AreaDown,
    AdminDown,
    OperationalDown,
    MissingL3Interface,
    Resetting,
}

// Reason why a SeqNoMismatch event was generated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SeqNoMismatchReason {
    InconsistentFlags,
    InconsistentOptions,
    InconsistentSeqNo,
    UnexpectedDbDesc,
    InvalidLsaType,
}

// Reason why an LSA is being flushed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaFlushReason {
    Expiry,
    PrematureAging,
    NeighborDead,
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceStart(router_id) => {
                debug!(%router_id, "{}", self);
            }
            Debug::InstanceStop(reason) => {
                debug!(?reason, "{}", self);
            }
            Debug::ComponentStop(component) => {
                debug!(%component, "{}", self);
            }
            Debug::InterfaceStart(name) => {
                // Parent span(s): interface
                debug!(%name, "{}", self);
            }
            Debug::InterfaceStop(name, reason) => {
                // Parent span(s): interface
                debug!(%name, ?reason, "{}", self);
            }
            Debug::IsmEvent(state, event) => {
                // Parent span(s): interface
                debug_span!("fsm").in_scope(|| {
                    debug!(?state, ?event, "{}", self);
                })
            }
            Debug::IsmTransition(old_state, new_state) => {
                // Parent span(s): interface
                debug_span!("fsm").in_scope(|| {
                    debug!(?old_state, ?new_state, "{}", self);
                })
            }
            Debug::IsmDrElection(old_dr, new_dr, old_bdr, new_bdr) => {
                // Parent span(s): interface
                debug_span!("fsm").in_scope(|| {
                    debug!(?old_dr, ?new_dr, ?old_bdr, ?new_bdr, "{}", self);
                })
            }
            Debug::NeighborCreate(router_id)
            | Debug::NeighborDelete(router_id) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!("{}", self);
                })
            }
            Debug::NsmEvent(router_id, state, event) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?state, ?event, "{}", self);
                    })
                })
            }
            Debug::NsmTransition(router_id, old_state, new_state) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?old_state, ?new_state, "{}", self);
                    })
                })
            }
            Debug::PacketRx(name, src, dst, packet) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        let data = serde_json::to_string(&packet)
                            .unwrap_or_default();
                        debug!(
                            interface = %name, %src, %dst, %data, "{}", self
                        );
                    })
                })
            }
            Debug::PacketTx(name, dst, packet) => {
                debug_span!("network").in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        let data = serde_json::to_string(&packet)
                            .unwrap_or_default();
                        debug!(interface = %name, %dst, %data, "{}", self);
                    })
                })
            }
            Debug::PacketRxIgnore(router_id, state) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!(?state, "{}", self);
                })
            }
            Debug::LsaDiscard(router_id, lsa_hdr, error) => {
                debug_span!("neighbor", %router_id, %error).in_scope(|| {
                    debug!(?lsa_hdr, "{}", self);
                })
            }
            Debug::QuestionableAck(router_id, lsa_hdr) => {
                debug_span!("neighbor", %router_id).in_scope(|| {
                    debug!(?lsa_hdr, "{}", self);
                })
            }
            Debug::LsaMinArrivalDiscard(lsa_hdr)
            | Debug::LsaSelfOriginated(lsa_hdr)
            | Debug::LsaInstall(lsa_hdr)
            | Debug::LsaOriginate(lsa_hdr)
            | Debug::LsaOriginateMinInterval(lsa_hdr)
            | Debug::LsaRefresh(lsa_hdr)
            | Debug::LsaMaxAgeRemove(lsa_hdr) => {
                // Parent span(s): lsdb
                debug!(?lsa_hdr, "{}", self);
            }
            Debug::LsaFlush(lsa_hdr, reason) => {
                // Parent span(s): lsdb
                debug!(?lsa_hdr, ?reason, "{}", self);
            }
            Debug::SpfStart => {
                // Parent span(s): spf
                debug!("{}", self);
            }
            Debug::SpfFinish(routes) => {
                // Parent span(s): spf
                debug!(%routes, "{}", self);
            }
            Debug::SpfUnreachableAsbr(destination, asbr) => {
                // Parent span(s): spf
                debug!(%destination, %asbr, "{}", self);
            }
            Debug::SpfUnreachableAbr(destination, abr) => {
                // Parent span(s): spf
                debug!(%destination, %abr, "{}", self);
            }
            Debug::SpfUnreachableFwdAddr(destination, fwd_addr) => {
                // Parent span(s): spf
                debug!(%destination, %fwd_addr, "{}", self);
            }
            Debug::RouteInstall(destination, metric) => {
                // Parent span(s): spf
                debug!(%destination, %metric, "{}", self);
            }
            Debug::RouteUninstall(destination) => {
                // Parent span(s): spf
                debug!(%destination, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceStart(..) => {
                write!(f, "starting instance")
            }
            Debug::InstanceStop(..) => {
                write!(f, "stopping instance")
            }
            Debug::ComponentStop(..) => {
                write!(f, "component stopped")
            }
            Debug::InterfaceStart(..) => {
                write!(f, "starting interface")
            }
            Debug::InterfaceStop(..) => {
                write!(f, "stopping interface")
            }
            Debug::IsmEvent(..) | Debug::NsmEvent(..) => {
                write!(f, "event")
            }
            Debug::IsmTransition(..) | Debug::NsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::IsmDrElection(..) => {
                write!(f, "DR election")
            }
            Debug::NeighborCreate(..) => {
                write!(f, "neighbor created")
            }
            Debug::NeighborDelete(..) => {
                write!(f, "neighbor deleted")
            }
            Debug::PacketRx(..) | Debug::PacketTx(..) => {
                write!(f, "packet")
            }
            Debug::PacketRxIgnore(..) => {
                write!(f, "ignoring packet received in an invalid state")
            }
            Debug::LsaDiscard(..) => {
                write!(f, "discarding invalid LSA")
            }
            Debug::LsaMinArrivalDiscard(..) => {
                write!(f, "discarding LSA due to the MinLSArrival check")
            }
            Debug::LsaSelfOriginated(..) => {
                write!(f, "received self-originated LSA")
            }
            Debug::QuestionableAck(..) => {
                write!(f, "discarding questionable acknowledgment")
            }
            Debug::LsaInstall(..) => {
                write!(f, "installing LSA")
            }
            Debug::LsaOriginate(..) => {
                write!(f, "originating LSA")
            }
            Debug::LsaOriginateMinInterval(..) => {
                write!(f, "postponing LSA origination due to MinLSInterval")
            }
            Debug::LsaFlush(..) => {
                write!(f, "flushing LSA")
            }
            Debug::LsaRefresh(..) => {
                write!(f, "refreshing LSA")
            }
            Debug::LsaMaxAgeRemove(..) => {
                write!(f, "removing MaxAge LSA")
            }
            Debug::SpfStart => {
                write!(f, "starting SPF calculation")
            }
            Debug::SpfFinish(..) => {
                write!(f, "SPF calculation finished")
            }
            Debug::SpfUnreachableAsbr(..) => {
                write!(f, "ASBR is unreachable")
            }
            Debug::SpfUnreachableAbr(..) => {
                write!(f, "ABR is unreachable")
            }
            Debug::SpfUnreachableFwdAddr(..) => {
                write!(f, "forwarding address is unreachable")
            }
            Debug::RouteInstall(..) => {
                write!(f, "installing route")
            }
            Debug::RouteUninstall(..) => {
                write!(f, "uninstalling route")
            }
        }
    }
}
