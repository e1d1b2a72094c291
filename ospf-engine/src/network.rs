//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use derive_new::new;
use ospf_utils::{UnboundedReceiver, UnboundedSender};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::debug::Debug;
use crate::error::IoError;
use crate::packet::Packet;
use crate::tasks::messages::{IfaceMsg, NetRxPacketMsg, NetTxMsg};

// OSPF IP protocol number.
pub const OSPF_IP_PROTO: i32 = 89;

// OSPF multicast groups.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Serialize)]
pub enum MulticastAddr {
    AllSpfRtrs,
    AllDrRtrs,
}

// Identity of the link a packet driver is opened on.
#[derive(Clone, Debug, Eq, PartialEq, new)]
pub struct InterfaceIo {
    pub name: String,
    pub ifindex: u32,
    pub addr: Ipv4Addr,
}

// Packet I/O boundary.
//
// Implementations deal with raw sockets (or anything else that can move OSPF
// payloads around); the engine only ever sees OSPF packets without the IP
// header.
#[async_trait]
pub trait NetworkDriver: Send + Sync {
    async fn open(
        &self,
        iface: &InterfaceIo,
    ) -> Result<(Box<dyn PacketReader>, Box<dyn PacketWriter>), IoError>;
}

#[async_trait]
pub trait PacketReader: Send {
    // Waits for the next datagram, returning its source address, destination
    // address and OSPF payload.
    async fn recv(&mut self) -> Result<(Ipv4Addr, Ipv4Addr, Bytes), IoError>;
}

#[async_trait]
pub trait PacketWriter: Send {
    async fn send(&mut self, dst: Ipv4Addr, data: Bytes) -> Result<(), IoError>;

    fn join(&mut self, group: MulticastAddr) -> Result<(), IoError>;

    fn leave(&mut self, group: MulticastAddr) -> Result<(), IoError>;
}

// ===== impl MulticastAddr =====

impl MulticastAddr {
    pub const fn addr(&self) -> Ipv4Addr {
        match self {
            MulticastAddr::AllSpfRtrs => Ipv4Addr::new(224, 0, 0, 5),
            MulticastAddr::AllDrRtrs => Ipv4Addr::new(224, 0, 0, 6),
        }
    }

    // Ethernet address the group maps to (RFC 1112).
    pub const fn mac(&self) -> [u8; 6] {
        match self {
            MulticastAddr::AllSpfRtrs => [0x01, 0x00, 0x5e, 0x00, 0x00, 0x05],
            MulticastAddr::AllDrRtrs => [0x01, 0x00, 0x5e, 0x00, 0x00, 0x06],
        }
    }

    pub fn from_addr(addr: &Ipv4Addr) -> Option<MulticastAddr> {
        [MulticastAddr::AllSpfRtrs, MulticastAddr::AllDrRtrs]
            .into_iter()
            .find(|group| group.addr() == *addr)
    }
}

// ===== global functions =====

pub(crate) async fn write_loop(
    ifname: String,
    mut writer: Box<dyn PacketWriter>,
    mut net_txc: UnboundedReceiver<NetTxMsg>,
) {
    while let Some(msg) = net_txc.recv().await {
        let result = match msg {
            NetTxMsg::Packet { dst, packet } => {
                Debug::PacketTx(&ifname, &dst, &packet).log();

                // Encode and send packet.
                let buf = packet.encode();
                writer.send(dst, buf).await
            }
            NetTxMsg::Join(group) => writer.join(group),
            NetTxMsg::Leave(group) => writer.leave(group),
        };
        if let Err(error) = result {
            error.log();
        }
    }
}

pub(crate) async fn read_loop(
    reader: Arc<Mutex<Box<dyn PacketReader>>>,
    ifacep: UnboundedSender<IfaceMsg>,
) {
    let mut reader = reader.lock().await;
    loop {
        match reader.recv().await {
            Ok((src, dst, mut buf)) => {
                // Decode packet.
                let packet = Packet::decode(&mut buf);
                let msg = NetRxPacketMsg { src, dst, packet };
                if ifacep.send(IfaceMsg::NetRx(msg)).is_err() {
                    return;
                }
            }
            Err(IoError::Closed) => {
                return;
            }
            Err(error) => {
                error.log();
            }
        }
    }
}
