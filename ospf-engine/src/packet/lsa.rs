//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use enum_as_inner::EnumAsInner;
use itertools::Itertools;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use ospf_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use serde::{Deserialize, Serialize};

use crate::lsdb::{LSA_MAX_AGE, LSA_RESERVED_SEQ_NO, lsa_compare};
use crate::packet::Options;
use crate::packet::error::{DecodeError, DecodeResult, LsaValidationError};

// LSA type, as carried on the wire.
//
// DD packets and LS Requests may reference types that this implementation
// doesn't know about, hence the raw representation.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LsaType(pub u8);

// LSA type code.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, Hash, Ord, PartialEq)]
#[derive(PartialOrd, Deserialize, Serialize)]
pub enum LsaTypeCode {
    Router = 1,
    Network = 2,
    SummaryNetwork = 3,
    SummaryRouter = 4,
    AsExternal = 5,
}

// LSA key. It serves both as a global LSA identifier and as a key to store
// LSAs in an LSDB.
//
// The LSA type comes first so that iterating over an LSDB visits the LSAs
// grouped by type.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaKey {
    pub lsa_type: LsaType,
    pub adv_rtr: Ipv4Addr,
    pub lsa_id: Ipv4Addr,
}

// LSA.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Lsa {
    // LSA raw bytes.
    #[serde(default, skip_serializing)]
    pub raw: Bytes,
    // LSA header.
    pub hdr: LsaHdr,
    // LSA body.
    pub body: LsaBody,
}

//
// LSA header.
//
// Encoding format:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |            LS age             |    Options    |    LS type    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Link State ID                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Advertising Router                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     LS sequence number                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         LS checksum           |             length            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaHdr {
    pub age: u16,
    pub options: Options,
    pub lsa_type: LsaType,
    pub lsa_id: Ipv4Addr,
    pub adv_rtr: Ipv4Addr,
    pub seq_no: u32,
    pub cksum: u16,
    pub length: u16,
}

// LSA body.
//
// Closed set of the LSA types this implementation understands. Every consumer
// matches on it exhaustively.
#[derive(Clone, Debug, EnumAsInner, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaBody {
    Router(LsaRouter),
    Network(LsaNetwork),
    SummaryNetwork(LsaSummary),
    SummaryRouter(LsaSummary),
    AsExternal(LsaAsExternal),
}

// Wire codec shared by all LSA bodies.
//
// Header handling, length and checksum computation, aging and validation are
// written once in `Lsa` on top of this trait.
pub trait LsaBodyCodec: Sized {
    // Minimum length of the encoded body.
    const BASE_LENGTH: u16;

    fn decode(buf: &mut Bytes) -> DecodeResult<Self>;

    fn encode(&self, buf: &mut BytesMut);

    fn validate(&self, _hdr: &LsaHdr) -> Result<(), LsaValidationError> {
        Ok(())
    }
}

//
// Router-LSA.
//
// Encoding format (LSA body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |    0    |V|E|B|        0      |            # links            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Link ID                              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Link Data                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |     Type      |     # TOS     |            metric             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                              ...                              |
//
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouter {
    pub flags: LsaRouterFlags,
    pub links: Vec<LsaRouterLink>,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaRouterFlags: u8 {
        const B = 0x01;
        const E = 0x02;
        const V = 0x04;
    }
}

#[derive(Clone, Copy, Debug, Eq, FromPrimitive, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LsaRouterLinkType {
    PointToPoint = 0x01,
    TransitNetwork = 0x02,
    StubNetwork = 0x03,
    VirtualLink = 0x04,
}

#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouterLink {
    pub link_type: LsaRouterLinkType,
    pub link_id: Ipv4Addr,
    pub link_data: Ipv4Addr,
    pub metric: u16,
}

//
// Network-LSA.
//
// Encoding format (LSA body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Network Mask                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Attached Router                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                              ...                              |
//
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaNetwork {
    pub mask: Ipv4Addr,
    pub attached_rtrs: BTreeSet<Ipv4Addr>,
}

//
// Summary-LSA (types 3 and 4).
//
// Encoding format (LSA body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Network Mask                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |      0        |                  metric                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaSummary {
    pub mask: Ipv4Addr,
    pub metric: u32,
}

//
// AS-External-LSA.
//
// Encoding format (LSA body):
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Network Mask                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |E|     0       |                  metric                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                      Forwarding address                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                      External Route Tag                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaAsExternal {
    pub mask: Ipv4Addr,
    pub flags: LsaAsExternalFlags,
    pub metric: u32,
    pub fwd_addr: Option<Ipv4Addr>,
    pub tag: u32,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaAsExternalFlags: u8 {
        const E = 0x80;
    }
}

// ===== impl LsaType =====

impl LsaType {
    pub fn type_code(&self) -> Option<LsaTypeCode> {
        LsaTypeCode::from_u8(self.0)
    }

    pub fn is_known(&self) -> bool {
        self.type_code().is_some()
    }

    // AS-scoped LSAs are flooded throughout all areas that import external
    // routing information.
    pub fn is_as_scoped(&self) -> bool {
        self.type_code() == Some(LsaTypeCode::AsExternal)
    }
}

impl std::fmt::Display for LsaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.type_code() {
            Some(code) => write!(f, "{}", code),
            None => write!(f, "unknown({})", self.0),
        }
    }
}

impl From<LsaTypeCode> for LsaType {
    fn from(code: LsaTypeCode) -> LsaType {
        LsaType(code as u8)
    }
}

// ===== impl LsaTypeCode =====

impl std::fmt::Display for LsaTypeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LsaTypeCode::Router => write!(f, "router"),
            LsaTypeCode::Network => write!(f, "network"),
            LsaTypeCode::SummaryNetwork => write!(f, "summary-network"),
            LsaTypeCode::SummaryRouter => write!(f, "summary-router"),
            LsaTypeCode::AsExternal => write!(f, "as-external"),
        }
    }
}

// ===== impl LsaKey =====

impl std::fmt::Display for LsaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "type {} id {} adv-rtr {}",
            self.lsa_type, self.lsa_id, self.adv_rtr
        )
    }
}

// ===== impl Lsa =====

impl Lsa {
    // LSA maximum length.
    //
    // Kept conservative to avoid packet fragmentation even in low-MTU links.
    pub const MAX_LENGTH: usize = 1024;

    pub fn new(
        age: u16,
        options: Options,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        seq_no: u32,
        body: LsaBody,
    ) -> Self {
        // The length and checksum are filled in by the encoding step.
        let hdr = LsaHdr::new(
            age,
            options,
            body.lsa_type(),
            lsa_id,
            adv_rtr,
            seq_no,
        );

        let mut lsa = Lsa {
            raw: Default::default(),
            hdr,
            body,
        };
        lsa.encode();
        lsa
    }

    // Decodes LSA from a bytes buffer.
    //
    // Once the LSA length is validated the buffer is advanced past the whole
    // LSA, even when its type is unknown, so that the caller can skip it and
    // carry on. A header or length error leaves the buffer untouched.
    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let buf_orig = buf.clone();
        if buf.remaining() < LsaHdr::LENGTH as usize {
            return Err(DecodeError::InvalidLength(buf.len() as u16));
        }
        let mut buf_hdr = buf.clone();
        let hdr = LsaHdr::decode(&mut buf_hdr)?;
        if hdr.length < LsaHdr::LENGTH
            || buf.remaining() < hdr.length as usize
        {
            return Err(DecodeError::InvalidLsaLength);
        }
        *buf = buf_hdr;
        let lsa_body_len = (hdr.length - LsaHdr::LENGTH) as usize;
        let mut buf_lsa = buf.copy_to_bytes(lsa_body_len);

        let body = LsaBody::decode(hdr.lsa_type, &mut buf_lsa)?;

        Ok(Lsa {
            raw: buf_orig.slice(0..hdr.length as usize),
            hdr,
            body,
        })
    }

    // Encodes LSA into its raw representation, computing the length and
    // checksum along the way.
    pub(crate) fn encode(&mut self) {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            self.hdr.encode(&mut buf);
            self.body.encode(&mut buf);

            // Rewrite LSA length.
            let lsa_len = buf.len() as u16;
            buf[18..20].copy_from_slice(&lsa_len.to_be_bytes());
            self.hdr.length = lsa_len;

            // Compute LSA checksum, skipping the age field.
            buf[16..18].copy_from_slice(&[0, 0]);
            let cksum = lsa_checksum(&buf[2..lsa_len as usize]);
            buf[16..18].copy_from_slice(&cksum);
            self.hdr.cksum = u16::from_be_bytes(cksum);

            self.raw = buf.clone().freeze();
        });
    }

    pub fn validate(&self) -> Result<(), LsaValidationError> {
        if self.hdr.age > LSA_MAX_AGE {
            return Err(LsaValidationError::InvalidLsaAge);
        }
        if self.hdr.seq_no == LSA_RESERVED_SEQ_NO {
            return Err(LsaValidationError::InvalidLsaSeqNo);
        }
        if !self.is_checksum_valid() {
            return Err(LsaValidationError::InvalidChecksum);
        }

        self.body.validate(&self.hdr)
    }

    // Checks the stored checksum against the raw LSA contents.
    pub fn is_checksum_valid(&self) -> bool {
        let len = std::cmp::min(self.hdr.length as usize, self.raw.len());
        if len < LsaHdr::LENGTH as usize {
            return false;
        }
        lsa_checksum_verify(&self.raw[2..len]) == 0
    }

    pub fn key(&self) -> LsaKey {
        self.hdr.key()
    }

    pub fn age(&self) -> u16 {
        self.hdr.age
    }

    // Updates the LSA age.
    //
    // The age field isn't covered by the checksum, so only the first two raw
    // bytes need patching.
    pub fn set_age(&mut self, age: u16) {
        self.hdr.age = age;
        let mut raw = BytesMut::from(self.raw.as_ref());
        if raw.len() >= 2 {
            raw[0..2].copy_from_slice(&age.to_be_bytes());
        }
        self.raw = raw.freeze();
    }

    pub fn set_maxage(&mut self) {
        self.set_age(LSA_MAX_AGE);
    }

    pub fn is_maxage(&self) -> bool {
        self.hdr.is_maxage()
    }

    // Checks whether this instance is more recent than the given one (RFC
    // 2328, Section 13.1).
    pub fn is_newer(&self, other: &Lsa) -> bool {
        lsa_compare(&self.hdr, &other.hdr) == Ordering::Greater
    }
}

// ===== impl LsaHdr =====

impl LsaHdr {
    pub const LENGTH: u16 = 20;

    pub fn new(
        age: u16,
        options: Options,
        lsa_type: LsaType,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        seq_no: u32,
    ) -> Self {
        LsaHdr {
            age,
            options,
            lsa_type,
            lsa_id,
            adv_rtr,
            seq_no,
            cksum: 0,
            length: 0,
        }
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < Self::LENGTH as usize {
            return Err(DecodeError::InvalidLsaLength);
        }

        let age = buf.get_u16();
        let options = Options::from_bits_truncate(buf.get_u8());
        let lsa_type = LsaType(buf.get_u8());
        let lsa_id = buf.get_ipv4();
        let adv_rtr = buf.get_ipv4();
        let seq_no = buf.get_u32();
        let cksum = buf.get_u16();
        let length = buf.get_u16();

        Ok(LsaHdr {
            age,
            options,
            lsa_type,
            lsa_id,
            adv_rtr,
            seq_no,
            cksum,
            length,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.age);
        buf.put_u8(self.options.bits());
        buf.put_u8(self.lsa_type.0);
        buf.put_ipv4(&self.lsa_id);
        buf.put_ipv4(&self.adv_rtr);
        buf.put_u32(self.seq_no);
        buf.put_u16(self.cksum);
        buf.put_u16(self.length);
    }

    pub fn key(&self) -> LsaKey {
        LsaKey::new(self.lsa_type, self.adv_rtr, self.lsa_id)
    }

    pub fn is_maxage(&self) -> bool {
        self.age == LSA_MAX_AGE
    }
}

// ===== impl LsaBody =====

impl LsaBody {
    pub(crate) fn decode(
        lsa_type: LsaType,
        buf: &mut Bytes,
    ) -> DecodeResult<Self> {
        let body = match lsa_type.type_code() {
            Some(LsaTypeCode::Router) => {
                LsaBody::Router(decode_body::<LsaRouter>(buf)?)
            }
            Some(LsaTypeCode::Network) => {
                LsaBody::Network(decode_body::<LsaNetwork>(buf)?)
            }
            Some(LsaTypeCode::SummaryNetwork) => {
                LsaBody::SummaryNetwork(decode_body::<LsaSummary>(buf)?)
            }
            Some(LsaTypeCode::SummaryRouter) => {
                LsaBody::SummaryRouter(decode_body::<LsaSummary>(buf)?)
            }
            Some(LsaTypeCode::AsExternal) => {
                LsaBody::AsExternal(decode_body::<LsaAsExternal>(buf)?)
            }
            None => return Err(DecodeError::UnknownLsaType(lsa_type.0)),
        };

        Ok(body)
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        match self {
            LsaBody::Router(lsa) => lsa.encode(buf),
            LsaBody::Network(lsa) => lsa.encode(buf),
            LsaBody::SummaryNetwork(lsa) => lsa.encode(buf),
            LsaBody::SummaryRouter(lsa) => lsa.encode(buf),
            LsaBody::AsExternal(lsa) => lsa.encode(buf),
        }
    }

    pub(crate) fn validate(
        &self,
        hdr: &LsaHdr,
    ) -> Result<(), LsaValidationError> {
        match self {
            LsaBody::Router(lsa) => lsa.validate(hdr),
            LsaBody::Network(lsa) => lsa.validate(hdr),
            LsaBody::SummaryNetwork(lsa) | LsaBody::SummaryRouter(lsa) => {
                lsa.validate(hdr)
            }
            LsaBody::AsExternal(lsa) => lsa.validate(hdr),
        }
    }

    pub fn lsa_type(&self) -> LsaType {
        self.type_code().into()
    }

    pub fn type_code(&self) -> LsaTypeCode {
        match self {
            LsaBody::Router(_) => LsaTypeCode::Router,
            LsaBody::Network(_) => LsaTypeCode::Network,
            LsaBody::SummaryNetwork(_) => LsaTypeCode::SummaryNetwork,
            LsaBody::SummaryRouter(_) => LsaTypeCode::SummaryRouter,
            LsaBody::AsExternal(_) => LsaTypeCode::AsExternal,
        }
    }

    pub fn as_summary(&self) -> Option<&LsaSummary> {
        match self {
            LsaBody::SummaryNetwork(summary)
            | LsaBody::SummaryRouter(summary) => Some(summary),
            _ => None,
        }
    }
}

impl std::fmt::Display for LsaBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LsaBody::Router(lsa) => {
                let links = lsa.links.iter().format_with(" ", |link, f| {
                    f(&format_args!(
                        "[{:?} id {} data {} metric {}]",
                        link.link_type,
                        link.link_id,
                        link.link_data,
                        link.metric
                    ))
                });
                write!(f, "flags {:?} links {}", lsa.flags, links)
            }
            LsaBody::Network(lsa) => {
                let attached_rtrs = lsa.attached_rtrs.iter().join(" ");
                write!(f, "mask {} attached {}", lsa.mask, attached_rtrs)
            }
            LsaBody::SummaryNetwork(lsa) | LsaBody::SummaryRouter(lsa) => {
                write!(f, "mask {} metric {}", lsa.mask, lsa.metric)
            }
            LsaBody::AsExternal(lsa) => {
                write!(
                    f,
                    "mask {} metric {} type {} fwd {} tag {}",
                    lsa.mask,
                    lsa.metric,
                    if lsa.flags.contains(LsaAsExternalFlags::E) {
                        2
                    } else {
                        1
                    },
                    lsa.fwd_addr.unwrap_or(Ipv4Addr::UNSPECIFIED),
                    lsa.tag
                )
            }
        }
    }
}

// ===== impl LsaRouter =====

impl LsaRouter {
    const LINK_LENGTH: usize = 12;
}

impl LsaBodyCodec for LsaRouter {
    const BASE_LENGTH: u16 = 4;

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let flags = LsaRouterFlags::from_bits_truncate(buf.get_u8());
        let _ = buf.get_u8();
        let links_cnt = buf.get_u16();

        let mut links = vec![];
        for _ in 0..links_cnt {
            if buf.remaining() < Self::LINK_LENGTH {
                return Err(DecodeError::InvalidLsaLength);
            }
            let link_id = buf.get_ipv4();
            let link_data = buf.get_ipv4();
            let link_type = buf.get_u8();
            let link_type = LsaRouterLinkType::from_u8(link_type)
                .ok_or(DecodeError::UnknownRouterLinkType(link_type))?;
            let num_tos = buf.get_u8() as usize;
            let metric = buf.get_u16();

            // Ignore deprecated TOS metrics.
            if buf.remaining() < num_tos * 4 {
                return Err(DecodeError::InvalidLsaLength);
            }
            buf.advance(num_tos * 4);

            links.push(LsaRouterLink::new(
                link_type, link_id, link_data, metric,
            ));
        }

        Ok(LsaRouter { flags, links })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags.bits());
        buf.put_u8(0);
        buf.put_u16(self.links.len() as u16);
        for link in &self.links {
            buf.put_ipv4(&link.link_id);
            buf.put_ipv4(&link.link_data);
            buf.put_u8(link.link_type as u8);
            buf.put_u8(0);
            buf.put_u16(link.metric);
        }
    }

    fn validate(&self, hdr: &LsaHdr) -> Result<(), LsaValidationError> {
        // The Router-LSA's advertising router and LSA-ID must be equal.
        if hdr.adv_rtr != hdr.lsa_id {
            return Err(LsaValidationError::RouterLsaIdMismatch);
        }

        Ok(())
    }
}

// ===== impl LsaRouterFlags =====

impl LsaRouterFlags {
    pub fn is_abr(&self) -> bool {
        self.contains(LsaRouterFlags::B)
    }

    pub fn is_asbr(&self) -> bool {
        self.contains(LsaRouterFlags::E)
    }
}

// ===== impl LsaNetwork =====

impl LsaBodyCodec for LsaNetwork {
    const BASE_LENGTH: u16 = 4;

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let mask = buf.get_ipv4();
        let mut attached_rtrs = BTreeSet::new();
        let rtrs_cnt = buf.remaining() / 4;
        for _ in 0..rtrs_cnt {
            let rtr = buf.get_ipv4();
            attached_rtrs.insert(rtr);
        }

        Ok(LsaNetwork {
            mask,
            attached_rtrs,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.mask);
        for rtr in &self.attached_rtrs {
            buf.put_ipv4(rtr);
        }
    }
}

// ===== impl LsaSummary =====

impl LsaBodyCodec for LsaSummary {
    const BASE_LENGTH: u16 = 8;

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let mask = buf.get_ipv4();
        let _ = buf.get_u8();
        let metric = buf.get_u24();
        // Ignore deprecated TOS metrics.

        Ok(LsaSummary { mask, metric })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.mask);
        buf.put_u8(0);
        buf.put_u24(self.metric);
    }
}

// ===== impl LsaAsExternal =====

impl LsaAsExternal {
    pub fn is_type2(&self) -> bool {
        self.flags.contains(LsaAsExternalFlags::E)
    }
}

impl LsaBodyCodec for LsaAsExternal {
    const BASE_LENGTH: u16 = 16;

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let mask = buf.get_ipv4();
        let flags = LsaAsExternalFlags::from_bits_truncate(buf.get_u8());
        let metric = buf.get_u24();
        let fwd_addr = buf.get_opt_ipv4();
        let tag = buf.get_u32();
        // Ignore deprecated TOS-specific information.

        Ok(LsaAsExternal {
            mask,
            flags,
            metric,
            fwd_addr,
            tag,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.mask);
        buf.put_u8(self.flags.bits());
        buf.put_u24(self.metric);
        buf.put_opt_ipv4(&self.fwd_addr);
        buf.put_u32(self.tag);
    }
}

// ===== global functions =====

// Computes the Fletcher checksum of an LSA (starting right after the age
// field), adjusted so that the result can be stored in the LS checksum field
// as described in RFC 905 Annex B.
//
// The checksum field must be zeroed beforehand.
pub fn lsa_checksum(data: &[u8]) -> [u8; 2] {
    let checksum = fletcher::calc_fletcher16(data);
    let mut checkbyte0 = (checksum & 0x00FF) as i32;
    let mut checkbyte1 = ((checksum >> 8) & 0x00FF) as i32;

    // The checksum field sits at offset 15 (one-based) of the data.
    let sop = data.len() as i32 - 15;
    let mut x = (sop * checkbyte0 - checkbyte1) % 255;
    if x <= 0 {
        x += 255;
    }
    checkbyte1 = 510 - checkbyte0 - x;
    if checkbyte1 > 255 {
        checkbyte1 -= 255;
    }
    checkbyte0 = x;
    [checkbyte0 as u8, checkbyte1 as u8]
}

// Runs the Fletcher checksum over an LSA that already carries its checksum.
//
// Returns zero when the LSA contents are intact.
pub fn lsa_checksum_verify(data: &[u8]) -> u16 {
    fletcher::calc_fletcher16(data)
}

// ===== helper functions =====

// Decodes an LSA body after making sure the fixed part is present.
fn decode_body<T: LsaBodyCodec>(buf: &mut Bytes) -> DecodeResult<T> {
    if buf.remaining() < T::BASE_LENGTH as usize {
        return Err(DecodeError::InvalidLsaLength);
    }
    T::decode(buf)
}

// ===== unit tests =====
