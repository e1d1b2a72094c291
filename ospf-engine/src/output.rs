//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::interface::{InterfaceType, InterfaceView};
use crate::lsdb;
use crate::neighbor::{InstanceCtx, Neighbor};
use crate::network::MulticastAddr;
use crate::packet::lsa::{Lsa, LsaHdr};
use crate::packet::{
    DbDesc, DbDescFlags, LsAck, LsRequest, LsUpdate, Packet, PacketHdr,
    PacketType,
};

// ===== Database Description Packets =====

pub(crate) fn send_dbdesc(
    nbr: &mut Neighbor,
    iface: &InterfaceView,
    ctx: &InstanceCtx,
) {
    let dst = send_dest_nbr(nbr, iface);

    // Calculate maximum packet size.
    let max_size = iface
        .max_packet_size()
        .saturating_sub(PacketHdr::LENGTH + DbDesc::BASE_LENGTH);

    // Append as many LSA headers as possible while on the Exchange state.
    let mut total = 0;
    let mut lsa_hdrs = vec![];
    while total + LsaHdr::LENGTH <= max_size {
        match nbr.lists.db_summary.pop_first() {
            Some((_, lsa)) => {
                total += LsaHdr::LENGTH;
                lsa_hdrs.push(lsa.hdr);
            }
            None => break,
        }
    }

    // Clear the M-bit if there's no more data to send.
    if !nbr.dd_flags.contains(DbDescFlags::I) && nbr.lists.db_summary.is_empty()
    {
        nbr.dd_flags.remove(DbDescFlags::M);
    }

    // Generate Database Description packet.
    let packet = Packet::DbDesc(DbDesc {
        hdr: iface.packet_hdr(PacketType::DbDesc),
        mtu: iface.mtu,
        options: iface.area_options,
        dd_flags: nbr.dd_flags,
        dd_seq_no: nbr.dd_seq_no,
        lsa_hdrs,
    });

    // Enqueue packet for network transmission.
    nbr.last_sent_dbdesc = Some((dst, packet.clone()));
    iface.send_packet(dst, packet);

    // Start retransmission interval in two cases:
    // * The router is master
    // * When sending the initial database description packet
    if nbr.dd_flags.intersects(DbDescFlags::MS | DbDescFlags::I) {
        nbr.rxmt_dbdesc_start(iface, ctx);
    }
}

pub(crate) fn rxmt_dbdesc(nbr: &Neighbor, iface: &InterfaceView) {
    if let Some((dst, packet)) = &nbr.last_sent_dbdesc {
        iface.send_packet(*dst, packet.clone());
    }
}

// ===== LS Request Packets =====

pub(crate) fn send_lsreq(
    nbr: &mut Neighbor,
    iface: &InterfaceView,
    ctx: &InstanceCtx,
) {
    // Calculate maximum packet size.
    let max_size = iface.max_packet_size().saturating_sub(PacketHdr::LENGTH);

    // Append as many LS Request Entries as possible in a single packet.
    let mut total = 0;
    while total + LsRequest::ENTRY_LENGTH < max_size {
        match nbr.lists.ls_request.pop_first() {
            Some((lsa_key, lsa_hdr)) => {
                nbr.lists.ls_request_pending.insert(lsa_key, lsa_hdr);
                total += LsRequest::ENTRY_LENGTH;
            }
            None => break,
        }
    }

    rxmt_lsreq(nbr, iface);

    // Start retransmission interval.
    nbr.rxmt_lsreq_start(iface, ctx);
}

pub(crate) fn rxmt_lsreq(nbr: &Neighbor, iface: &InterfaceView) {
    let dst = send_dest_nbr(nbr, iface);

    // Generate Link State Request packet.
    let entries = nbr.lists.ls_request_pending.keys().copied().collect();
    let packet = Packet::LsRequest(LsRequest {
        hdr: iface.packet_hdr(PacketType::LsRequest),
        entries,
    });

    // Enqueue packet for network transmission.
    iface.send_packet(dst, packet);
}

// ===== LS Update Packets =====

// Sends the given LSAs, packing as many of them as possible in each LS
// Update.
pub(crate) fn send_lsupd<I>(iface: &InterfaceView, dst: Ipv4Addr, lsas: I)
where
    I: IntoIterator<Item = Arc<Lsa>>,
{
    // Calculate maximum packet size.
    let max_size = iface
        .max_packet_size()
        .saturating_sub(PacketHdr::LENGTH + LsUpdate::BASE_LENGTH);

    let mut total = 0;
    let mut pkt_lsas = vec![];
    for lsa in lsas {
        // If a single LSA is bigger than the maximum packet size, there's
        // nothing we can do other than relying on IP-level fragmentation.
        let length = lsa.hdr.length;
        if !pkt_lsas.is_empty() && total + length > max_size {
            let lsas = std::mem::take(&mut pkt_lsas);
            send_lsupd_packet(iface, dst, lsas);
            total = 0;
        }
        total += length;
        pkt_lsas.push(lsa_transmit_copy(iface, &lsa));
    }
    if !pkt_lsas.is_empty() {
        send_lsupd_packet(iface, dst, pkt_lsas);
    }
}

// Sends the LSAs enqueued for transmission to the neighbor.
pub(crate) fn send_lsupd_nbr(nbr: &mut Neighbor, iface: &InterfaceView) {
    let dst = send_dest_nbr(nbr, iface);
    let lsas = std::mem::take(&mut nbr.lists.ls_update);
    send_lsupd(iface, dst, lsas.into_values());
}

pub(crate) fn rxmt_lsupd(nbr: &Neighbor, iface: &InterfaceView) {
    let dst = send_dest_nbr(nbr, iface);

    // Calculate maximum packet size.
    let max_size = iface
        .max_packet_size()
        .saturating_sub(PacketHdr::LENGTH + LsUpdate::BASE_LENGTH);

    // Append as many LSAs as possible in a single packet.
    let mut total = 0;
    let mut lsas = vec![];
    for lsa in nbr.lists.ls_rxmt.values() {
        let length = lsa.hdr.length;
        if !lsas.is_empty() && total + length > max_size {
            break;
        }
        total += length;
        lsas.push(lsa_transmit_copy(iface, lsa));
    }

    send_lsupd_packet(iface, dst, lsas);
}

// ===== LS Ack Packets =====

pub(crate) fn send_lsack_direct(
    nbr: &Neighbor,
    iface: &InterfaceView,
    lsa_hdr: &LsaHdr,
) {
    let dst = send_dest_nbr(nbr, iface);

    // Generate Link State Ack packet.
    let packet = Packet::LsAck(LsAck {
        hdr: iface.packet_hdr(PacketType::LsAck),
        lsa_hdrs: vec![*lsa_hdr],
    });

    // Enqueue packet for network transmission.
    iface.send_packet(dst, packet);
}

// ===== helper functions =====

fn send_lsupd_packet(iface: &InterfaceView, dst: Ipv4Addr, lsas: Vec<Lsa>) {
    let packet = Packet::LsUpdate(LsUpdate {
        hdr: iface.packet_hdr(PacketType::LsUpdate),
        lsas,
    });
    iface.send_packet(dst, packet);
}

// Returns a copy of the LSA with its age incremented by InfTransDelay.
fn lsa_transmit_copy(iface: &InterfaceView, lsa: &Lsa) -> Lsa {
    let mut lsa = lsa.clone();
    let age = std::cmp::min(
        lsa.age().saturating_add(iface.transit_delay),
        lsdb::LSA_MAX_AGE,
    );
    lsa.set_age(age);
    lsa
}

// Destination of packets addressed to a single neighbor.
fn send_dest_nbr(nbr: &Neighbor, iface: &InterfaceView) -> Ipv4Addr {
    match iface.if_type {
        InterfaceType::PointToPoint => MulticastAddr::AllSpfRtrs.addr(),
        InterfaceType::Broadcast | InterfaceType::Loopback => nbr.src,
    }
}
