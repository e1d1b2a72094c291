//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::sync::Arc;

use ospf_utils::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

use crate::interface::{InterfaceKey, InterfaceView, ism};
use crate::lsdb::LsdbId;
use crate::neighbor::NeighborKey;
use crate::output;
use crate::packet::lsa::Lsa;
use crate::tasks::messages::{FloodMsg, NbrMsg};

// Flooding component.
//
// Decides which interfaces a new LSA goes out of, delegating the neighbor
// retransmission lists to the neighbor dispatcher.
#[derive(Debug)]
pub struct Flooding {
    views: BTreeMap<InterfaceKey, InterfaceView>,
    nbrp: UnboundedSender<NbrMsg>,
}

// ===== impl Flooding =====

impl Flooding {
    pub fn new(nbrp: UnboundedSender<NbrMsg>) -> Flooding {
        Flooding {
            views: Default::default(),
            nbrp,
        }
    }

    pub async fn run(mut self, mut floodc: UnboundedReceiver<FloodMsg>) {
        while let Some(msg) = floodc.recv().await {
            match msg {
                FloodMsg::InterfaceUpdate(view) => {
                    self.views.insert(view.key, view);
                }
                FloodMsg::InterfaceDelete(iface) => {
                    self.views.remove(&iface);
                }
                FloodMsg::Flood {
                    lsdb_id,
                    lsa,
                    origin,
                } => {
                    self.flood(lsdb_id, &lsa, origin).await;
                }
                FloodMsg::Stop { ack } => {
                    let _ = ack.send(());
                    return;
                }
            }
        }
    }

    // Floods the LSA out of all eligible interfaces (RFC 2328, Section 13.3).
    // Returns whether the LSA was flooded back out the receiving interface.
    pub(crate) async fn flood(
        &self,
        lsdb_id: LsdbId,
        lsa: &Arc<Lsa>,
        origin: Option<NeighborKey>,
    ) -> bool {
        let mut flooded_back = false;

        for view in self.views.values().filter(|view| match lsdb_id {
            LsdbId::Area(area_id) => view.area_id == area_id,
            // AS-external LSAs aren't flooded into stub areas.
            LsdbId::As => view.area_options.e_bit(),
        }) {
            if matches!(view.state, ism::State::Down | ism::State::Loopback) {
                continue;
            }

            // 1) Update the retransmission lists of the interface's neighbors.
            let (reply_tx, reply_rx) = oneshot::channel();
            let msg = NbrMsg::FloodPrepare {
                iface: view.key,
                lsa: lsa.clone(),
                origin,
                reply: reply_tx,
            };
            if self.nbrp.send(msg).is_err() {
                return flooded_back;
            }
            let Ok(rxmt_added) = reply_rx.await else {
                return flooded_back;
            };

            // 2) No neighbor was added to a retransmission list, hence there's
            // no need to flood the LSA out the interface.
            if !rxmt_added {
                continue;
            }

            let rcvd_iface = origin.is_some_and(|nbr| nbr.iface == view.key);
            if let Some(origin) = origin {
                // 3) The LSA was received from the DR or the BDR of the
                // receiving interface. Chances are all neighbors have received
                // it already.
                if rcvd_iface
                    && (view.dr == Some(origin.net_id)
                        || view.bdr == Some(origin.net_id))
                {
                    continue;
                }

                // 4) Receiving interface in the Backup state.
                if rcvd_iface && view.state == ism::State::Backup {
                    continue;
                }
            }

            // 5) Flood the LSA out the interface.
            if rcvd_iface {
                flooded_back = true;
            }
            output::send_lsupd(view, view.flood_dst(), [lsa.clone()]);
        }

        flooded_back
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use ipnetwork::Ipv4Network;
    use tokio::sync::mpsc;

    use super::*;
    use crate::interface::InterfaceType;
    use crate::network::MulticastAddr;
    use crate::packet::lsa::{LsaBody, LsaSummary};
    use crate::packet::{Options, Packet};
    use crate::tasks::messages::NetTxMsg;

    fn addr(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn view(
        addr_str: &str,
        area_id: &str,
        state: ism::State,
        dr: Option<Ipv4Addr>,
        net_txp: UnboundedSender<NetTxMsg>,
    ) -> InterfaceView {
        let (ifacep, _) = mpsc::unbounded_channel();
        InterfaceView {
            key: InterfaceKey::new(addr(addr_str), 0),
            name: format!("if-{addr_str}"),
            router_id: addr("1.1.1.1"),
            area_id: addr(area_id),
            area_options: Options::E,
            if_type: InterfaceType::Broadcast,
            state,
            addr: Ipv4Network::new(addr(addr_str), 24).unwrap(),
            ifindex: 1,
            mtu: 1500,
            dr,
            bdr: None,
            transit_delay: 1,
            retransmit_interval: 5,
            dead_interval: 40,
            ifacep,
            net_txp: Some(net_txp),
        }
    }

    fn lsa() -> Arc<Lsa> {
        let body = LsaBody::SummaryNetwork(LsaSummary::new(
            addr("255.255.255.0"),
            10,
        ));
        Arc::new(Lsa::new(
            1,
            Options::E,
            addr("10.0.9.0"),
            addr("2.2.2.2"),
            0x80000001,
            body,
        ))
    }

    // Neighbor dispatcher stand-in that reports every interface as having
    // eligible neighbors.
    fn nbr_stub() -> UnboundedSender<NbrMsg> {
        let (nbrp, mut nbrc) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(msg) = nbrc.recv().await {
                if let NbrMsg::FloodPrepare { reply, .. } = msg {
                    let _ = reply.send(true);
                }
            }
        });
        nbrp
    }

    #[tokio::test]
    async fn flood_area_scope() {
        let (net_txp1, mut net_txc1) = mpsc::unbounded_channel();
        let (net_txp2, mut net_txc2) = mpsc::unbounded_channel();
        let mut flooding = Flooding::new(nbr_stub());
        let v1 =
            view("10.0.1.1", "0.0.0.0", ism::State::DrOther, None, net_txp1);
        let v2 = view("10.0.2.1", "0.0.0.1", ism::State::Dr, None, net_txp2);
        flooding.views.insert(v1.key, v1);
        flooding.views.insert(v2.key, v2);

        let lsa = lsa();
        let flooded_back = flooding
            .flood(LsdbId::Area(addr("0.0.0.0")), &lsa, None)
            .await;
        assert!(!flooded_back);

        // Only the interface in the LSA's area floods it, towards
        // AllDRouters since it's neither DR nor BDR.
        match net_txc1.try_recv() {
            Ok(NetTxMsg::Packet {
                dst,
                packet: Packet::LsUpdate(ls_upd),
            }) => {
                assert_eq!(dst, MulticastAddr::AllDrRtrs.addr());
                assert_eq!(ls_upd.lsas.len(), 1);
                assert_eq!(ls_upd.lsas[0].age(), 2);
            }
            msg => panic!("unexpected message: {msg:?}"),
        }
        assert!(net_txc2.try_recv().is_err());
    }

    #[tokio::test]
    async fn flood_skips_receiving_interface_when_origin_is_dr() {
        let (net_txp, mut net_txc) = mpsc::unbounded_channel();
        let mut flooding = Flooding::new(nbr_stub());
        let v = view(
            "10.0.1.1",
            "0.0.0.0",
            ism::State::DrOther,
            Some(addr("10.0.1.2")),
            net_txp,
        );
        let origin = NeighborKey::new(v.key, addr("10.0.1.2"));
        flooding.views.insert(v.key, v);

        let flooded_back = flooding
            .flood(LsdbId::Area(addr("0.0.0.0")), &lsa(), Some(origin))
            .await;
        assert!(!flooded_back);
        assert!(net_txc.try_recv().is_err());
    }
}
