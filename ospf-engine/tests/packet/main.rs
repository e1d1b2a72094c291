//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use bytes::Bytes;
use const_addrs::ip4;
use maplit::btreeset;
use ospf_engine::packet::error::{DecodeError, LsaValidationError};
use ospf_engine::packet::lsa::*;
use ospf_engine::packet::*;

//
// Helper functions.
//

fn test_encode_packet(bytes_expected: &[u8], packet: &Packet) {
    let bytes_actual = packet.encode();
    assert_eq!(bytes_expected, bytes_actual.as_ref());
}

fn test_decode_packet(bytes: &[u8], packet_expected: &Packet) {
    let mut buf = Bytes::copy_from_slice(bytes);
    let packet_actual = Packet::decode(&mut buf).unwrap();
    assert_eq!(*packet_expected, packet_actual);
}

fn test_encode_lsa(bytes_expected: &[u8], lsa: &Lsa) {
    assert_eq!(bytes_expected, lsa.raw.as_ref());
}

fn test_decode_lsa(bytes: &[u8], lsa_expected: &Lsa) {
    let mut bytes = Bytes::copy_from_slice(bytes);
    let lsa_actual = Lsa::decode(&mut bytes).unwrap();
    assert_eq!(*lsa_expected, lsa_actual);
    assert!(lsa_actual.validate().is_ok());
}

fn test_decode_error(bytes: &[u8], error_expected: DecodeError) {
    let mut buf = Bytes::copy_from_slice(bytes);
    let error_actual = Packet::decode(&mut buf).unwrap_err();
    assert_eq!(error_expected, error_actual);
}

fn router_lsa() -> Lsa {
    Lsa::new(
        1,
        Options::E,
        ip4!("1.1.1.1"),
        ip4!("1.1.1.1"),
        0x80000001,
        LsaBody::Router(LsaRouter {
            flags: LsaRouterFlags::B,
            links: vec![
                LsaRouterLink {
                    link_type: LsaRouterLinkType::TransitNetwork,
                    link_id: ip4!("10.0.1.1"),
                    link_data: ip4!("10.0.1.1"),
                    metric: 10,
                },
                LsaRouterLink {
                    link_type: LsaRouterLinkType::StubNetwork,
                    link_id: ip4!("10.0.2.0"),
                    link_data: ip4!("255.255.255.0"),
                    metric: 10,
                },
            ],
        }),
    )
}

fn network_lsa() -> Lsa {
    Lsa::new(
        1,
        Options::E,
        ip4!("10.0.1.1"),
        ip4!("1.1.1.1"),
        0x80000001,
        LsaBody::Network(LsaNetwork {
            mask: ip4!("255.255.255.0"),
            attached_rtrs: btreeset![ip4!("1.1.1.1"), ip4!("2.2.2.2")],
        }),
    )
}

fn as_external_lsa() -> Lsa {
    Lsa::new(
        1,
        Options::E,
        ip4!("172.16.0.0"),
        ip4!("1.1.1.1"),
        0x80000001,
        LsaBody::AsExternal(LsaAsExternal {
            mask: ip4!("255.255.0.0"),
            flags: LsaAsExternalFlags::E,
            metric: 100,
            fwd_addr: None,
            tag: 0,
        }),
    )
}

//
// Test packets.
//

static HELLO1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x01, 0x00, 0x30, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00,
            0x00, 0x00, 0xeb, 0x93, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0x00, 0x00, 0x0a,
            0x02, 0x01, 0x00, 0x00, 0x00, 0x28, 0x0a, 0x00, 0x01, 0x01,
            0x00, 0x00, 0x00, 0x00, 0x02, 0x02, 0x02, 0x02,
        ],
        Packet::Hello(Hello {
            hdr: PacketHdr::new(
                PacketType::Hello,
                ip4!("1.1.1.1"),
                ip4!("0.0.0.0"),
            ),
            network_mask: ip4!("255.255.255.0"),
            hello_interval: 10,
            options: Options::E,
            priority: 1,
            dead_interval: 40,
            dr: Some(ip4!("10.0.1.1")),
            bdr: None,
            neighbors: btreeset![ip4!("2.2.2.2")],
        }),
    )
});

static DBDESC1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x02, 0x00, 0x34, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00,
            0x00, 0x00, 0xd9, 0x67, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x05, 0xdc, 0x02, 0x07, 0x00, 0x00,
            0x04, 0xd2, 0x00, 0x01, 0x02, 0x01, 0x01, 0x01, 0x01, 0x01,
            0x01, 0x01, 0x01, 0x01, 0x80, 0x00, 0x00, 0x01, 0x8f, 0x73,
            0x00, 0x30,
        ],
        Packet::DbDesc(DbDesc {
            hdr: PacketHdr::new(
                PacketType::DbDesc,
                ip4!("1.1.1.1"),
                ip4!("0.0.0.0"),
            ),
            mtu: 1500,
            options: Options::E,
            dd_flags: DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS,
            dd_seq_no: 1234,
            lsa_hdrs: vec![router_lsa().hdr],
        }),
    )
});

static LSREQUEST1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x03, 0x00, 0x30, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00,
            0x00, 0x00, 0xe4, 0xb9, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02, 0x02,
            0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x00, 0x00, 0x00, 0x02,
            0x0a, 0x00, 0x01, 0x02, 0x02, 0x02, 0x02, 0x02,
        ],
        Packet::LsRequest(LsRequest {
            hdr: PacketHdr::new(
                PacketType::LsRequest,
                ip4!("1.1.1.1"),
                ip4!("0.0.0.0"),
            ),
            entries: vec![
                LsaKey::new(
                    LsaTypeCode::Router.into(),
                    ip4!("2.2.2.2"),
                    ip4!("2.2.2.2"),
                ),
                LsaKey::new(
                    LsaTypeCode::Network.into(),
                    ip4!("2.2.2.2"),
                    ip4!("10.0.1.2"),
                ),
            ],
        }),
    )
});

static LSUPDATE1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x04, 0x00, 0x70, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00,
            0x00, 0x00, 0xe2, 0x9e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x01,
            0x02, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
            0x80, 0x00, 0x00, 0x01, 0x8f, 0x73, 0x00, 0x30, 0x01, 0x00,
            0x00, 0x02, 0x0a, 0x00, 0x01, 0x01, 0x0a, 0x00, 0x01, 0x01,
            0x02, 0x00, 0x00, 0x0a, 0x0a, 0x00, 0x02, 0x00, 0xff, 0xff,
            0xff, 0x00, 0x03, 0x00, 0x00, 0x0a, 0x00, 0x01, 0x02, 0x05,
            0xac, 0x10, 0x00, 0x00, 0x01, 0x01, 0x01, 0x01, 0x80, 0x00,
            0x00, 0x01, 0x2b, 0x82, 0x00, 0x24, 0xff, 0xff, 0x00, 0x00,
            0x80, 0x00, 0x00, 0x64, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00,
        ],
        Packet::LsUpdate(LsUpdate {
            hdr: PacketHdr::new(
                PacketType::LsUpdate,
                ip4!("1.1.1.1"),
                ip4!("0.0.0.0"),
            ),
            lsas: vec![router_lsa(), as_external_lsa()],
        }),
    )
});

static LSACK1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x05, 0x00, 0x40, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00,
            0x00, 0x00, 0x03, 0xfb, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02, 0x01, 0x01, 0x01,
            0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x80, 0x00, 0x00, 0x01,
            0x8f, 0x73, 0x00, 0x30, 0x00, 0x01, 0x02, 0x02, 0x0a, 0x00,
            0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x80, 0x00, 0x00, 0x01,
            0x52, 0xeb, 0x00, 0x20,
        ],
        Packet::LsAck(LsAck {
            hdr: PacketHdr::new(
                PacketType::LsAck,
                ip4!("1.1.1.1"),
                ip4!("0.0.0.0"),
            ),
            lsa_hdrs: vec![router_lsa().hdr, network_lsa().hdr],
        }),
    )
});

//
// Test LSAs.
//

static LSA_ROUTER1: Lazy<(Vec<u8>, Lsa)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x01, 0x02, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
            0x01, 0x01, 0x80, 0x00, 0x00, 0x01, 0x8f, 0x73, 0x00, 0x30,
            0x01, 0x00, 0x00, 0x02, 0x0a, 0x00, 0x01, 0x01, 0x0a, 0x00,
            0x01, 0x01, 0x02, 0x00, 0x00, 0x0a, 0x0a, 0x00, 0x02, 0x00,
            0xff, 0xff, 0xff, 0x00, 0x03, 0x00, 0x00, 0x0a,
        ],
        router_lsa(),
    )
});

static LSA_NETWORK1: Lazy<(Vec<u8>, Lsa)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x01, 0x02, 0x02, 0x0a, 0x00, 0x01, 0x01, 0x01, 0x01,
            0x01, 0x01, 0x80, 0x00, 0x00, 0x01, 0x52, 0xeb, 0x00, 0x20,
            0xff, 0xff, 0xff, 0x00, 0x01, 0x01, 0x01, 0x01, 0x02, 0x02,
            0x02, 0x02,
        ],
        network_lsa(),
    )
});

static LSA_SUMMARY_NETWORK1: Lazy<(Vec<u8>, Lsa)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x01, 0x02, 0x03, 0x0a, 0x00, 0x03, 0x00, 0x01, 0x01,
            0x01, 0x01, 0x80, 0x00, 0x00, 0x01, 0x72, 0xc5, 0x00, 0x1c,
            0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x14,
        ],
        Lsa::new(
            1,
            Options::E,
            ip4!("10.0.3.0"),
            ip4!("1.1.1.1"),
            0x80000001,
            LsaBody::SummaryNetwork(LsaSummary {
                mask: ip4!("255.255.255.0"),
                metric: 20,
            }),
        ),
    )
});

static LSA_SUMMARY_ROUTER1: Lazy<(Vec<u8>, Lsa)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x01, 0x02, 0x04, 0x04, 0x04, 0x04, 0x04, 0x01, 0x01,
            0x01, 0x01, 0x80, 0x00, 0x00, 0x01, 0xb3, 0x76, 0x00, 0x1c,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1e,
        ],
        Lsa::new(
            1,
            Options::E,
            ip4!("4.4.4.4"),
            ip4!("1.1.1.1"),
            0x80000001,
            LsaBody::SummaryRouter(LsaSummary {
                mask: ip4!("0.0.0.0"),
                metric: 30,
            }),
        ),
    )
});

static LSA_AS_EXTERNAL1: Lazy<(Vec<u8>, Lsa)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x01, 0x02, 0x05, 0xac, 0x10, 0x00, 0x00, 0x01, 0x01,
            0x01, 0x01, 0x80, 0x00, 0x00, 0x01, 0x2b, 0x82, 0x00, 0x24,
            0xff, 0xff, 0x00, 0x00, 0x80, 0x00, 0x00, 0x64, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ],
        as_external_lsa(),
    )
});

//
// Tests.
//

#[test]
fn test_encode_hello1() {
    let (ref bytes, ref hello) = *HELLO1;
    test_encode_packet(bytes, hello);
}

#[test]
fn test_decode_hello1() {
    let (ref bytes, ref hello) = *HELLO1;
    test_decode_packet(bytes, hello);
}

#[test]
fn test_encode_dbdesc1() {
    let (ref bytes, ref dbdesc) = *DBDESC1;
    test_encode_packet(bytes, dbdesc);
}

#[test]
fn test_decode_dbdesc1() {
    let (ref bytes, ref dbdesc) = *DBDESC1;
    test_decode_packet(bytes, dbdesc);
}

#[test]
fn test_encode_lsrequest1() {
    let (ref bytes, ref lsrequest) = *LSREQUEST1;
    test_encode_packet(bytes, lsrequest);
}

#[test]
fn test_decode_lsrequest1() {
    let (ref bytes, ref lsrequest) = *LSREQUEST1;
    test_decode_packet(bytes, lsrequest);
}

#[test]
fn test_encode_lsupdate1() {
    let (ref bytes, ref lsupdate) = *LSUPDATE1;
    test_encode_packet(bytes, lsupdate);
}

#[test]
fn test_decode_lsupdate1() {
    let (ref bytes, ref lsupdate) = *LSUPDATE1;
    test_decode_packet(bytes, lsupdate);
}

#[test]
fn test_encode_lsack1() {
    let (ref bytes, ref lsack) = *LSACK1;
    test_encode_packet(bytes, lsack);
}

#[test]
fn test_decode_lsack1() {
    let (ref bytes, ref lsack) = *LSACK1;
    test_decode_packet(bytes, lsack);
}

#[test]
fn test_encode_lsa_router1() {
    let (ref bytes, ref lsa) = *LSA_ROUTER1;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_lsa_router1() {
    let (ref bytes, ref lsa) = *LSA_ROUTER1;
    test_decode_lsa(bytes, lsa);
}

#[test]
fn test_encode_lsa_network1() {
    let (ref bytes, ref lsa) = *LSA_NETWORK1;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_lsa_network1() {
    let (ref bytes, ref lsa) = *LSA_NETWORK1;
    test_decode_lsa(bytes, lsa);
}

#[test]
fn test_encode_lsa_summary_network1() {
    let (ref bytes, ref lsa) = *LSA_SUMMARY_NETWORK1;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_lsa_summary_network1() {
    let (ref bytes, ref lsa) = *LSA_SUMMARY_NETWORK1;
    test_decode_lsa(bytes, lsa);
}

#[test]
fn test_encode_lsa_summary_router1() {
    let (ref bytes, ref lsa) = *LSA_SUMMARY_ROUTER1;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_lsa_summary_router1() {
    let (ref bytes, ref lsa) = *LSA_SUMMARY_ROUTER1;
    test_decode_lsa(bytes, lsa);
}

#[test]
fn test_encode_lsa_as_external1() {
    let (ref bytes, ref lsa) = *LSA_AS_EXTERNAL1;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_lsa_as_external1() {
    let (ref bytes, ref lsa) = *LSA_AS_EXTERNAL1;
    test_decode_lsa(bytes, lsa);
}

#[test]
fn test_decode_invalid_checksum() {
    let (ref bytes, _) = *HELLO1;
    let mut bytes = bytes.clone();
    bytes[30] ^= 0xff;
    test_decode_error(&bytes, DecodeError::InvalidChecksum);
}

#[test]
fn test_decode_truncated() {
    let (ref bytes, _) = *HELLO1;
    test_decode_error(&bytes[..40], DecodeError::InvalidLength(48));
    test_decode_error(&bytes[..20], DecodeError::InvalidLength(20));
}

#[test]
fn test_decode_lsa_truncated() {
    let (ref bytes, _) = *LSA_SUMMARY_NETWORK1;
    let mut buf = Bytes::copy_from_slice(&bytes[..bytes.len() - 4]);
    let orig = buf.clone();
    assert_eq!(Lsa::decode(&mut buf), Err(DecodeError::InvalidLsaLength));
    assert_eq!(buf, orig);

    // Length field smaller than the LSA header itself.
    let mut raw = bytes.to_vec();
    raw[18..20].copy_from_slice(&8u16.to_be_bytes());
    let mut buf = Bytes::from(raw);
    let orig = buf.clone();
    assert_eq!(Lsa::decode(&mut buf), Err(DecodeError::InvalidLsaLength));
    assert_eq!(buf, orig);
}

#[test]
fn test_decode_unsupported_auth() {
    let bytes = [
        0x02, 0x01, 0x00, 0x30, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00,
        0x00, 0x00, 0xeb, 0x92, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0x00, 0x00, 0x0a,
        0x02, 0x01, 0x00, 0x00, 0x00, 0x28, 0x0a, 0x00, 0x01, 0x01,
        0x00, 0x00, 0x00, 0x00, 0x02, 0x02, 0x02, 0x02,
    ];
    test_decode_error(&bytes, DecodeError::UnsupportedAuthType(1));
}

#[test]
fn test_decode_lsupdate_unknown_lsa_type() {
    // The unknown LSA is skipped and the remaining ones are still decoded.
    let bytes = [
        0x02, 0x04, 0x00, 0x68, 0x03, 0x03, 0x03, 0x03, 0x00, 0x00,
        0x00, 0x00, 0x28, 0x93, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x01,
        0x02, 0x07, 0x0a, 0x09, 0x00, 0x00, 0x03, 0x03, 0x03, 0x03,
        0x80, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x1c, 0xff, 0xff,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02, 0x01,
        0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x80, 0x00,
        0x00, 0x01, 0x8f, 0x73, 0x00, 0x30, 0x01, 0x00, 0x00, 0x02,
        0x0a, 0x00, 0x01, 0x01, 0x0a, 0x00, 0x01, 0x01, 0x02, 0x00,
        0x00, 0x0a, 0x0a, 0x00, 0x02, 0x00, 0xff, 0xff, 0xff, 0x00,
        0x03, 0x00, 0x00, 0x0a,
    ];
    let mut buf = Bytes::copy_from_slice(&bytes);
    let packet = Packet::decode(&mut buf).unwrap();
    let Packet::LsUpdate(lsupdate) = packet else {
        panic!("unexpected packet type");
    };
    assert_eq!(lsupdate.lsas, vec![router_lsa()]);
}

#[test]
fn test_lsa_checksum_corruption() {
    let (ref bytes, _) = *LSA_SUMMARY_NETWORK1;
    let mut bytes = Bytes::copy_from_slice(bytes);
    let mut lsa = Lsa::decode(&mut bytes).unwrap();
    let mut raw = lsa.raw.to_vec();
    raw[27] = 0x15;
    lsa.raw = raw.into();
    assert_eq!(lsa.validate(), Err(LsaValidationError::InvalidChecksum));
}
