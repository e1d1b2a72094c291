//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::hint::black_box;
use std::sync::LazyLock as Lazy;

use const_addrs::ip4;
use criterion::{Criterion, criterion_group, criterion_main};
use ospf_engine::packet::lsa::*;
use ospf_engine::packet::*;

static PACKET: Lazy<Packet> = Lazy::new(|| {
    Packet::LsUpdate(LsUpdate {
        hdr: PacketHdr::new(
            PacketType::LsUpdate,
            ip4!("2.2.2.2"),
            ip4!("0.0.0.1"),
        ),
        lsas: vec![
            Lsa::new(
                49,
                Options::E,
                ip4!("2.2.2.2"),
                ip4!("2.2.2.2"),
                0x80000002,
                LsaBody::Router(LsaRouter {
                    flags: LsaRouterFlags::B,
                    links: vec![LsaRouterLink {
                        link_type: LsaRouterLinkType::StubNetwork,
                        link_id: ip4!("10.0.1.0"),
                        link_data: ip4!("255.255.255.0"),
                        metric: 10,
                    }],
                }),
            ),
            Lsa::new(
                49,
                Options::E,
                ip4!("10.0.2.0"),
                ip4!("2.2.2.2"),
                0x80000001,
                LsaBody::SummaryNetwork(LsaSummary {
                    mask: ip4!("255.255.255.0"),
                    metric: 10,
                }),
            ),
            Lsa::new(
                49,
                Options::E,
                ip4!("172.16.0.0"),
                ip4!("2.2.2.2"),
                0x80000001,
                LsaBody::AsExternal(LsaAsExternal {
                    mask: ip4!("255.255.0.0"),
                    flags: LsaAsExternalFlags::E,
                    metric: 20,
                    fwd_addr: None,
                    tag: 0,
                }),
            ),
        ],
    })
});

fn packet_encode(n: u64) {
    for _ in 0..n {
        PACKET.encode();
    }
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("Packet encode", |b| {
        b.iter(|| packet_encode(black_box(10000)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
