//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::btree_map;
use std::sync::Arc;

use crate::debug::{Debug, SeqNoMismatchReason};
use crate::error::{Error, InterfaceCfgError};
use crate::interface::{InterfaceKey, InterfaceView};
use crate::lsdb::{LsaRcvdOutcome, lsa_compare};
use crate::neighbor::{
    InstanceCtx, LastDbDesc, Neighbor, NeighborKey, Neighbors, RxmtPacketType,
    nsm,
};
use crate::output;
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey};
use crate::packet::{DbDesc, DbDescFlags, LsAck, LsRequest, LsUpdate, Packet};
use crate::tasks::messages::LsdbMsg;

// ===== Network packet receipt =====

pub(crate) async fn process_packet(
    nbrs: &mut Neighbors,
    nbr_key: NeighborKey,
    packet: Packet,
) -> Result<(), Error> {
    match packet {
        // Hellos are handled by the interface.
        Packet::Hello(_) => Ok(()),
        Packet::DbDesc(dbdesc) => {
            let Neighbors {
                ctx,
                ifaces,
                neighbors,
            } = nbrs;
            let Some(iface) = ifaces.get(&nbr_key.iface) else {
                return Ok(());
            };
            let Some(nbr) = neighbors.get_mut(&nbr_key) else {
                return Ok(());
            };
            process_packet_dbdesc(nbr, iface, ctx, dbdesc).await
        }
        Packet::LsRequest(ls_req) => {
            let Neighbors {
                ctx,
                ifaces,
                neighbors,
            } = nbrs;
            let Some(iface) = ifaces.get(&nbr_key.iface) else {
                return Ok(());
            };
            let Some(nbr) = neighbors.get_mut(&nbr_key) else {
                return Ok(());
            };
            process_packet_lsreq(nbr, iface, ctx, ls_req).await
        }
        Packet::LsUpdate(ls_upd) => {
            process_packet_lsupd(nbrs, nbr_key, ls_upd).await
        }
        Packet::LsAck(ls_ack) => {
            let Some(nbr) = nbrs.neighbors.get_mut(&nbr_key) else {
                return Ok(());
            };
            process_packet_lsack(nbr, ls_ack);
            Ok(())
        }
    }
}

async fn process_packet_dbdesc(
    nbr: &mut Neighbor,
    iface: &InterfaceView,
    ctx: &InstanceCtx,
    dbdesc: DbDesc,
) -> Result<(), Error> {
    // MTU mismatch check.
    if dbdesc.mtu > iface.mtu {
        return Err(Error::InterfaceCfgError(
            iface.name.clone(),
            nbr.src,
            dbdesc.hdr.pkt_type,
            InterfaceCfgError::MtuMismatch(dbdesc.mtu),
        ));
    }

    // Further processing depends on the neighbor's state.
    match nbr.state {
        nsm::State::Down | nsm::State::Attempt | nsm::State::TwoWay => {
            return Err(Error::DbDescReject(nbr.router_id, nbr.state));
        }
        nsm::State::Init | nsm::State::ExStart => {
            if nbr.state == nsm::State::Init {
                nbr.fsm(iface, ctx, nsm::Event::TwoWayRcvd).await;
                if nbr.state != nsm::State::ExStart {
                    return Ok(());
                }
                // Fall through to the ExStart case.
            }

            if dbdesc
                .dd_flags
                .contains(DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS)
                && dbdesc.lsa_hdrs.is_empty()
                && dbdesc.hdr.router_id > ctx.router_id
            {
                // Set the master/slave bit to slave, and set the neighbor data
                // structure's DD sequence number to that specified by the
                // master.
                nbr.dd_flags.remove(DbDescFlags::MS);
                nbr.dd_seq_no = dbdesc.dd_seq_no;
            } else if !dbdesc
                .dd_flags
                .intersects(DbDescFlags::I | DbDescFlags::MS)
                && dbdesc.dd_seq_no == nbr.dd_seq_no
                && dbdesc.hdr.router_id < ctx.router_id
            {
                // In this case the router is Master.
            } else {
                // Ignore the packet.
                return Ok(());
            }

            nbr.options = Some(dbdesc.options);
            nbr.fsm(iface, ctx, nsm::Event::NegotiationDone).await;
        }
        nsm::State::Exchange => {
            // Check for duplicate packet.
            if nbr.dbdesc_is_dup(
                dbdesc.options,
                dbdesc.dd_flags,
                dbdesc.dd_seq_no,
            ) {
                // The slave needs to retransmit the last Database Description
                // packet that it had sent.
                if !nbr.dd_flags.contains(DbDescFlags::MS) {
                    output::rxmt_dbdesc(nbr, iface);
                }

                return Ok(());
            }

            // Sanity checks.
            let mut reason = None;
            if let Some(last_rcvd_dbdesc) = &nbr.last_rcvd_dbdesc {
                if dbdesc.dd_flags.contains(DbDescFlags::I)
                    || dbdesc.dd_flags.contains(DbDescFlags::MS)
                        != last_rcvd_dbdesc.dd_flags.contains(DbDescFlags::MS)
                {
                    reason = Some(SeqNoMismatchReason::InconsistentFlags);
                } else if dbdesc.options != last_rcvd_dbdesc.options {
                    reason = Some(SeqNoMismatchReason::InconsistentOptions);
                }
            }
            if reason.is_none()
                && ((nbr.dd_flags.contains(DbDescFlags::MS)
                    && dbdesc.dd_seq_no != nbr.dd_seq_no)
                    || (!nbr.dd_flags.contains(DbDescFlags::MS)
                        && dbdesc.dd_seq_no != nbr.dd_seq_no.wrapping_add(1)))
            {
                reason = Some(SeqNoMismatchReason::InconsistentSeqNo);
            }
            if let Some(reason) = reason {
                let event = nsm::Event::SeqNoMismatch(reason);
                nbr.fsm(iface, ctx, event).await;
                return Ok(());
            }
        }
        nsm::State::Loading | nsm::State::Full => {
            // Check for duplicate packet.
            if nbr.dbdesc_is_dup(
                dbdesc.options,
                dbdesc.dd_flags,
                dbdesc.dd_seq_no,
            ) {
                // The slave must respond to duplicates by repeating the last
                // Database Description packet that it had sent.
                if !nbr.dd_flags.contains(DbDescFlags::MS) {
                    output::rxmt_dbdesc(nbr, iface);
                }

                return Ok(());
            }

            let reason = SeqNoMismatchReason::UnexpectedDbDesc;
            let event = nsm::Event::SeqNoMismatch(reason);
            nbr.fsm(iface, ctx, event).await;
            return Ok(());
        }
    }

    // If we got this far it means the packet was accepted. Stop the
    // retransmission interval in case it's active.
    nbr.rxmt_dbdesc_stop();

    // Now iterate over all LSA headers.
    let mut hdrs = Vec::with_capacity(dbdesc.lsa_hdrs.len());
    for lsa_hdr in &dbdesc.lsa_hdrs {
        // Check if the LSA is valid for this area.
        if !lsa_hdr.lsa_type.is_known()
            || (lsa_hdr.lsa_type.is_as_scoped() && !iface.area_options.e_bit())
        {
            let reason = SeqNoMismatchReason::InvalidLsaType;
            let event = nsm::Event::SeqNoMismatch(reason);
            nbr.fsm(iface, ctx, event).await;
            return Ok(());
        }

        // RFC 5243 says:
        // "If the Database summary list contains an instance of the LSA that is
        // the same as or less recent than the listed LSA, the LSA is removed
        // from the Database summary list".
        let lsa_key = lsa_hdr.key();
        if let btree_map::Entry::Occupied(o) =
            nbr.lists.db_summary.entry(lsa_key)
        {
            if lsa_compare(&o.get().hdr, lsa_hdr) != Ordering::Greater {
                o.remove();
            }
        }

        hdrs.push(*lsa_hdr);
    }

    // Put the LSAs on the Link state request list if they're not present on
    // the LSDB, or if the local copies are less recent than the received ones.
    if !hdrs.is_empty() {
        let area_id = iface.area_id;
        let hdrs = ctx
            .lsdb_request(|reply| LsdbMsg::NewerThanDb {
                area_id,
                hdrs,
                reply,
            })
            .await?;
        for lsa_hdr in hdrs {
            nbr.lists.ls_request.insert(lsa_hdr.key(), lsa_hdr);
        }
    }

    // Start sending Link State Request packets.
    if !nbr.lists.ls_request.is_empty()
        && nbr.lists.ls_request_pending.is_empty()
    {
        output::send_lsreq(nbr, iface, ctx);
    }

    // Further processing depends on whether the router is master or slave.
    let mut exchange_done = false;
    if nbr.dd_flags.contains(DbDescFlags::MS) {
        nbr.dd_seq_no = nbr.dd_seq_no.wrapping_add(1);

        if !nbr.dd_flags.contains(DbDescFlags::M)
            && !dbdesc.dd_flags.contains(DbDescFlags::M)
        {
            exchange_done = true;
        } else {
            output::send_dbdesc(nbr, iface, ctx);
        }
    } else {
        nbr.dd_seq_no = dbdesc.dd_seq_no;

        output::send_dbdesc(nbr, iface, ctx);

        if !nbr.dd_flags.contains(DbDescFlags::M)
            && !dbdesc.dd_flags.contains(DbDescFlags::M)
        {
            exchange_done = true;
        }
    }
    if exchange_done {
        nbr.fsm(iface, ctx, nsm::Event::ExchangeDone).await;

        // The slave must wait RouterDeadInterval seconds before freeing the
        // last Database Description packet. Reception of a Database Description
        // packet from the master after this interval will generate a
        // SeqNumberMismatch neighbor event.
        if !nbr.dd_flags.contains(DbDescFlags::MS) {
            nbr.dbdesc_free_timer_start(iface, ctx);
        }
    }

    // Save last received Database Description packet.
    nbr.last_rcvd_dbdesc = Some(LastDbDesc {
        options: dbdesc.options,
        dd_flags: dbdesc.dd_flags,
        dd_seq_no: dbdesc.dd_seq_no,
    });

    Ok(())
}

async fn process_packet_lsreq(
    nbr: &mut Neighbor,
    iface: &InterfaceView,
    ctx: &InstanceCtx,
    ls_req: LsRequest,
) -> Result<(), Error> {
    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
        return Ok(());
    }

    // Locate the requested LSAs in the LSDB.
    let area_id = iface.area_id;
    let keys = ls_req.entries;
    let lsas = ctx
        .lsdb_request(|reply| LsdbMsg::Get {
            area_id,
            keys: keys.clone(),
            reply,
        })
        .await?;

    for (lsa_key, lsa) in keys.into_iter().zip(lsas) {
        match lsa {
            Some(lsa) => {
                // Copy LSA for transmission to the neighbor.
                nbr.lists.ls_update.insert(lsa_key, lsa);
            }
            None => {
                // Something has gone wrong with the Database Exchange
                // process.
                nbr.lists.ls_update.clear();
                nbr.fsm(iface, ctx, nsm::Event::BadLsReq).await;
                return Ok(());
            }
        }
    }

    // Send the requested LSAs.
    if !nbr.lists.ls_update.is_empty() {
        output::send_lsupd_nbr(nbr, iface);
    }

    Ok(())
}

async fn process_packet_lsupd(
    nbrs: &mut Neighbors,
    nbr_key: NeighborKey,
    ls_upd: LsUpdate,
) -> Result<(), Error> {
    let Some(nbr) = nbrs.neighbors.get(&nbr_key) else {
        return Ok(());
    };
    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
        return Ok(());
    }

    // Process all LSAs contained in the packet.
    for lsa in ls_upd.lsas {
        let stop = process_packet_lsupd_lsa(nbrs, nbr_key, lsa).await?;
        if stop {
            break;
        }
    }

    // All requested LSAs might have been received by now.
    let Neighbors {
        ctx,
        ifaces,
        neighbors,
    } = nbrs;
    if let (Some(iface), Some(nbr)) =
        (ifaces.get(&nbr_key.iface), neighbors.get_mut(&nbr_key))
    {
        if nbr.state >= nsm::State::Exchange {
            nbr.loading_done_check(iface, ctx).await;
        }
    }

    Ok(())
}

// Processes a single LSA received in an LS Update. Returns true when the
// processing of the remaining LSAs should stop.
async fn process_packet_lsupd_lsa(
    nbrs: &mut Neighbors,
    nbr_key: NeighborKey,
    lsa: Lsa,
) -> Result<bool, Error> {
    let Some(iface) = nbrs.ifaces.get(&nbr_key.iface) else {
        return Ok(true);
    };
    let Some(nbr) = nbrs.neighbors.get(&nbr_key) else {
        return Ok(true);
    };
    let area_id = iface.area_id;
    let router_id = nbr.router_id;

    // (1-3) Validate the LSA. Unknown LSA types were already skipped by the
    // decoder.
    if let Err(error) = lsa.validate() {
        Debug::LsaDiscard(router_id, &lsa.hdr, &error).log();
        return Ok(false);
    }

    // Let the LSDB decide what to do with the LSA.
    let lsa_hdr = lsa.hdr;
    let lsa_key = lsa.key();
    let exchanging = nbrs.exchanging();
    let outcome = nbrs
        .ctx
        .lsdb_request(|reply| LsdbMsg::LsaReceived {
            area_id,
            lsa,
            origin: nbr_key,
            exchanging,
            reply,
        })
        .await?;

    let Neighbors {
        ctx,
        ifaces,
        neighbors,
    } = nbrs;
    let Some(iface) = ifaces.get(&nbr_key.iface) else {
        return Ok(true);
    };

    match outcome {
        LsaRcvdOutcome::Installed => {
            // (5.c) Remove the previous instances of the LSA from all
            // retransmission lists.
            for nbr in neighbors.values_mut() {
                if let btree_map::Entry::Occupied(o) =
                    nbr.lists.ls_rxmt.entry(lsa_key)
                {
                    if lsa_compare(&o.get().hdr, &lsa_hdr) == Ordering::Less {
                        o.remove();
                        nbr.rxmt_lsupd_stop_check();
                    }
                }
            }

            // The LSA might have been requested from the neighbor.
            let Some(nbr) = neighbors.get_mut(&nbr_key) else {
                return Ok(true);
            };
            nbr.lists.ls_request.remove(&lsa_key);
            nbr.lists.ls_request_pending.remove(&lsa_key);

            // (5.e) Acknowledge the receipt of the LSA.
            output::send_lsack_direct(nbr, iface, &lsa_hdr);
        }
        LsaRcvdOutcome::MaxAgeAck => {
            // (4) Acknowledge and discard.
            let Some(nbr) = neighbors.get(&nbr_key) else {
                return Ok(true);
            };
            output::send_lsack_direct(nbr, iface, &lsa_hdr);
        }
        LsaRcvdOutcome::MinArrivalDiscard | LsaRcvdOutcome::Discard => {}
        LsaRcvdOutcome::Duplicate | LsaRcvdOutcome::DbCopyNewer(_) => {
            let Some(nbr) = neighbors.get_mut(&nbr_key) else {
                return Ok(true);
            };

            // (6) An instance of the LSA on the neighbor's request list
            // means the Database Exchange process went wrong.
            if nbr.lists.ls_request.contains_key(&lsa_key)
                || nbr.lists.ls_request_pending.contains_key(&lsa_key)
            {
                nbr.fsm(iface, ctx, nsm::Event::BadLsReq).await;
                return Ok(true);
            }

            match outcome {
                LsaRcvdOutcome::Duplicate => {
                    lsupd_duplicate(nbr, iface, lsa_key, &lsa_hdr);
                }
                LsaRcvdOutcome::DbCopyNewer(Some(db_copy)) => {
                    // (8) Send the database copy back to the neighbor.
                    nbr.lists.ls_update.insert(lsa_key, db_copy);
                    output::send_lsupd_nbr(nbr, iface);
                }
                _ => {}
            }
        }
    }

    Ok(false)
}

// (7) Same instance as the database copy.
fn lsupd_duplicate(
    nbr: &mut Neighbor,
    iface: &InterfaceView,
    lsa_key: LsaKey,
    lsa_hdr: &LsaHdr,
) {
    if nbr.lists.ls_rxmt.remove(&lsa_key).is_some() {
        // (7.a) Treat the LSA as an implied acknowledgment.
        nbr.rxmt_lsupd_stop_check();
    } else {
        // (7.b) Acknowledge the duplicate.
        output::send_lsack_direct(nbr, iface, lsa_hdr);
    }
}

fn process_packet_lsack(nbr: &mut Neighbor, ls_ack: LsAck) {
    if nbr.state < nsm::State::Exchange {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
        return;
    }

    // Iterate over all LSA headers.
    for lsa_hdr in &ls_ack.lsa_hdrs {
        let lsa_key = lsa_hdr.key();
        let btree_map::Entry::Occupied(o) = nbr.lists.ls_rxmt.entry(lsa_key)
        else {
            continue;
        };

        // Check whether the acknowledgment is for the same instance.
        if lsa_compare(&o.get().hdr, lsa_hdr) == Ordering::Equal {
            o.remove();
        } else {
            Debug::QuestionableAck(nbr.router_id, lsa_hdr).log();
        }
    }

    nbr.rxmt_lsupd_stop_check();
}

// ===== Neighbor timers =====

pub(crate) fn process_packet_rxmt(
    nbrs: &mut Neighbors,
    nbr_key: NeighborKey,
    packet_type: RxmtPacketType,
) {
    let Some(iface) = nbrs.ifaces.get(&nbr_key.iface) else {
        return;
    };
    let Some(nbr) = nbrs.neighbors.get(&nbr_key) else {
        return;
    };

    match packet_type {
        RxmtPacketType::DbDesc => output::rxmt_dbdesc(nbr, iface),
        RxmtPacketType::LsRequest => output::rxmt_lsreq(nbr, iface),
        RxmtPacketType::LsUpdate => output::rxmt_lsupd(nbr, iface),
    }
}

pub(crate) fn process_dbdesc_free(nbrs: &mut Neighbors, nbr_key: NeighborKey) {
    let Some(nbr) = nbrs.neighbors.get_mut(&nbr_key) else {
        return;
    };

    nbr.last_rcvd_dbdesc = None;
    nbr.last_sent_dbdesc = None;
    nbr.tasks.dbdesc_free_timer = None;
}

// ===== Flooding =====

// Adds the LSA to the retransmission lists of the eligible neighbors of the
// interface (RFC 2328, Section 13.3, step 1). Returns whether any neighbor
// list was changed.
pub(crate) async fn process_flood_prepare(
    nbrs: &mut Neighbors,
    iface_key: InterfaceKey,
    lsa: &Arc<Lsa>,
    origin: Option<NeighborKey>,
) -> bool {
    let Neighbors {
        ctx,
        ifaces,
        neighbors,
    } = nbrs;
    let Some(iface) = ifaces.get(&iface_key) else {
        return false;
    };

    let lsa_key = lsa.key();
    let mut added = false;
    for (nbr_key, nbr) in neighbors
        .iter_mut()
        .filter(|(nbr_key, _)| nbr_key.iface == iface_key)
    {
        // (1.a) Skip neighbors in a lesser state than Exchange.
        if nbr.state < nsm::State::Exchange {
            continue;
        }

        // (1.b) Adjacency not full yet.
        if nbr.state != nsm::State::Full {
            let req = nbr
                .lists
                .ls_request
                .get(&lsa_key)
                .or_else(|| nbr.lists.ls_request_pending.get(&lsa_key))
                .copied();
            if let Some(req) = req {
                let cmp = lsa_compare(&lsa.hdr, &req);
                if cmp == Ordering::Less {
                    continue;
                }

                nbr.lists.ls_request.remove(&lsa_key);
                nbr.lists.ls_request_pending.remove(&lsa_key);
                nbr.loading_done_check(iface, ctx).await;
                if cmp == Ordering::Equal {
                    continue;
                }
            }
        }

        // (1.c) Skip the neighbor the LSA was received from.
        if origin == Some(*nbr_key) {
            continue;
        }

        // (1.d) Add the LSA to the neighbor's retransmission list.
        nbr.lists.ls_rxmt.insert(lsa_key, lsa.clone());
        nbr.rxmt_lsupd_start_check(iface, ctx);
        added = true;
    }

    added
}

// ===== unit tests =====
