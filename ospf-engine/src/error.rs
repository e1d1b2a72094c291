//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use tracing::{error, warn, warn_span};

use crate::interface::ism;
use crate::neighbor::nsm;
use crate::network::MulticastAddr;
use crate::packet::PacketType;
use crate::packet::error::DecodeError;
use crate::packet::lsa::LsaKey;
use crate::spf::VertexId;

// OSPF errors.
#[derive(Debug)]
pub enum Error {
    // I/O errors
    IoError(IoError),
    // Packet input
    PacketDecodeError(Ipv4Addr, DecodeError),
    InvalidSrcAddr(Ipv4Addr),
    InvalidDstAddr(Ipv4Addr),
    UnknownNeighbor(Ipv4Addr, Ipv4Addr),
    InterfaceCfgError(String, Ipv4Addr, PacketType, InterfaceCfgError),
    DbDescReject(Ipv4Addr, nsm::State),
    // LSDB
    LsaChecksumMismatch(LsaKey),
    // SPF
    SpfRootNotFound(Ipv4Addr),
    SpfNexthopCalcError(VertexId),
    // Other
    IsmUnexpectedEvent(ism::State, ism::Event),
    NsmUnexpectedEvent(Ipv4Addr, nsm::State, nsm::Event),
    InterfaceStartError(String, IoError),
    StopTimeout(&'static str),
    ChannelClosed(&'static str),
}

// OSPF I/O errors.
#[derive(Debug)]
pub enum IoError {
    SocketError(std::io::Error),
    MulticastJoinError(MulticastAddr, std::io::Error),
    MulticastLeaveError(MulticastAddr, std::io::Error),
    RecvError(std::io::Error),
    RecvMissingSourceAddr,
    RecvMissingAncillaryData,
    SendError(std::io::Error),
    Closed,
}

// OSPF interface configuration errors.
#[derive(Debug)]
pub enum InterfaceCfgError {
    AreaIdMismatch(Ipv4Addr, Ipv4Addr),
    HelloMaskMismatch(Ipv4Addr, Ipv4Addr),
    HelloIntervalMismatch(u16, u16),
    DeadIntervalMismatch(u32, u32),
    ExternalRoutingCapabilityMismatch(bool),
    MtuMismatch(u16),
    DuplicateRouterId(Ipv4Addr),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::PacketDecodeError(source, error) => {
                warn!(%source, %error, "{}", self);
            }
            Error::InvalidSrcAddr(addr) | Error::InvalidDstAddr(addr) => {
                warn!(address = %addr, "{}", self);
            }
            Error::UnknownNeighbor(source, router_id) => {
                warn!(%source, %router_id, "{}", self);
            }
            Error::InterfaceCfgError(iface, source, pkt_type, error) => {
                warn_span!("interface", name = %iface, %source, %pkt_type)
                    .in_scope(|| {
                        error.log();
                    })
            }
            Error::DbDescReject(router_id, state) => {
                warn_span!("neighbor", %router_id).in_scope(|| {
                    warn!(?state, "{}", self);
                })
            }
            Error::LsaChecksumMismatch(lsa_key) => {
                error!(%lsa_key, "{}", self);
            }
            Error::SpfRootNotFound(area_id) => {
                warn!(%area_id, "{}", self);
            }
            Error::SpfNexthopCalcError(vertex_id) => {
                warn!(?vertex_id, "{}", self);
            }
            Error::IsmUnexpectedEvent(state, event) => {
                warn_span!("fsm").in_scope(|| {
                    warn!(?state, ?event, "{}", self);
                })
            }
            Error::NsmUnexpectedEvent(router_id, state, event) => {
                warn_span!("neighbor", %router_id).in_scope(|| {
                    warn_span!("fsm").in_scope(|| {
                        warn!(?state, ?event, "{}", self);
                    })
                })
            }
            Error::InterfaceStartError(name, error) => {
                error!(%name, error = %with_source(error), "{}", self);
            }
            Error::StopTimeout(component) | Error::ChannelClosed(component) => {
                error!(%component, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::PacketDecodeError(..) => {
                write!(f, "failed to decode packet")
            }
            Error::InvalidSrcAddr(..) => {
                write!(f, "invalid source address")
            }
            Error::InvalidDstAddr(..) => {
                write!(f, "invalid destination address")
            }
            Error::UnknownNeighbor(..) => {
                write!(f, "unknown neighbor")
            }
            Error::InterfaceCfgError(_, _, _, error) => error.fmt(f),
            Error::DbDescReject(..) => {
                write!(f, "database description packet rejected")
            }
            Error::LsaChecksumMismatch(..) => {
                write!(f, "LSA checksum verification failed")
            }
            Error::SpfRootNotFound(..) => {
                write!(f, "SPF root not found")
            }
            Error::SpfNexthopCalcError(..) => {
                write!(f, "failed to calculate nexthop address")
            }
            Error::IsmUnexpectedEvent(..) => {
                write!(f, "unexpected event")
            }
            Error::NsmUnexpectedEvent(..) => {
                write!(f, "unexpected event")
            }
            Error::InterfaceStartError(..) => {
                write!(f, "failed to start interface")
            }
            Error::StopTimeout(..) => {
                write!(f, "timed out waiting for component to stop")
            }
            Error::ChannelClosed(..) => {
                write!(f, "component channel closed")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            Error::PacketDecodeError(_, error) => Some(error),
            Error::InterfaceStartError(_, error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub(crate) fn log(&self) {
        match self {
            IoError::SocketError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            IoError::MulticastJoinError(addr, error)
            | IoError::MulticastLeaveError(addr, error) => {
                warn!(?addr, error = %with_source(error), "{}", self);
            }
            IoError::RecvError(error) | IoError::SendError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            IoError::RecvMissingSourceAddr
            | IoError::RecvMissingAncillaryData
            | IoError::Closed => {
                warn!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::SocketError(..) => {
                write!(f, "failed to create raw IP socket")
            }
            IoError::MulticastJoinError(..) => {
                write!(f, "failed to join multicast group")
            }
            IoError::MulticastLeaveError(..) => {
                write!(f, "failed to leave multicast group")
            }
            IoError::RecvError(..) => {
                write!(f, "failed to receive IP packet")
            }
            IoError::RecvMissingSourceAddr => {
                write!(
                    f,
                    "failed to retrieve source address from received packet"
                )
            }
            IoError::RecvMissingAncillaryData => {
                write!(
                    f,
                    "failed to retrieve ancillary data from received packet"
                )
            }
            IoError::SendError(..) => {
                write!(f, "failed to send IP packet")
            }
            IoError::Closed => {
                write!(f, "network driver closed")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::SocketError(error)
            | IoError::MulticastJoinError(_, error)
            | IoError::MulticastLeaveError(_, error)
            | IoError::RecvError(error)
            | IoError::SendError(error) => Some(error),
            _ => None,
        }
    }
}

// ===== impl InterfaceCfgError =====

impl InterfaceCfgError {
    pub(crate) fn log(&self) {
        match self {
            InterfaceCfgError::AreaIdMismatch(received, expected) => {
                warn!(%received, %expected, "{}", self);
            }
            InterfaceCfgError::HelloMaskMismatch(received, expected) => {
                warn!(%received, %expected, "{}", self);
            }
            InterfaceCfgError::HelloIntervalMismatch(received, expected) => {
                warn!(%received, %expected, "{}", self);
            }
            InterfaceCfgError::DeadIntervalMismatch(received, expected) => {
                warn!(%received, %expected, "{}", self);
            }
            InterfaceCfgError::ExternalRoutingCapabilityMismatch(e_bit) => {
                warn!(%e_bit, "{}", self);
            }
            InterfaceCfgError::MtuMismatch(mtu) => {
                warn!(%mtu, "{}", self);
            }
            InterfaceCfgError::DuplicateRouterId(router_id) => {
                warn!(%router_id, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for InterfaceCfgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterfaceCfgError::AreaIdMismatch(..) => {
                write!(f, "area ID mismatch")
            }
            InterfaceCfgError::HelloMaskMismatch(..) => {
                write!(f, "network mask mismatch")
            }
            InterfaceCfgError::HelloIntervalMismatch(..) => {
                write!(f, "hello interval mismatch")
            }
            InterfaceCfgError::DeadIntervalMismatch(..) => {
                write!(f, "dead interval mismatch")
            }
            InterfaceCfgError::ExternalRoutingCapabilityMismatch(..) => {
                write!(f, "external routing capability mismatch")
            }
            InterfaceCfgError::MtuMismatch(..) => {
                write!(f, "MTU mismatch")
            }
            InterfaceCfgError::DuplicateRouterId(..) => {
                write!(f, "duplicate Router ID")
            }
        }
    }
}

impl std::error::Error for InterfaceCfgError {}

// ===== global functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
