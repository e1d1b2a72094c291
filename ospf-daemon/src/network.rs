//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::io::{IoSlice, IoSliceMut};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::AsRawFd;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use nix::sys::socket::{self, SockaddrIn, sockopt};
use ospf_engine::error::IoError;
use ospf_engine::network::{
    InterfaceIo, MulticastAddr, NetworkDriver, OSPF_IP_PROTO, PacketReader,
    PacketWriter,
};
use socket2::{Domain, InterfaceIndexOrAddress, Protocol, Socket, Type};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tracing::warn;

// Largest datagram we expect to receive.
const RECV_BUF_SIZE: usize = 16384;

// Packet driver backed by one raw IP socket per interface.
#[derive(Debug, Default)]
pub struct RawSocketDriver;

#[derive(Debug)]
struct RawSocketReader {
    socket: Arc<AsyncFd<Socket>>,
    buf: Vec<u8>,
}

#[derive(Debug)]
struct RawSocketWriter {
    socket: Arc<AsyncFd<Socket>>,
    ifindex: u32,
    src: Ipv4Addr,
}

// ===== impl RawSocketDriver =====

#[async_trait]
impl NetworkDriver for RawSocketDriver {
    async fn open(
        &self,
        iface: &InterfaceIo,
    ) -> Result<(Box<dyn PacketReader>, Box<dyn PacketWriter>), IoError> {
        let socket = socket(&iface.name)
            .and_then(AsyncFd::new)
            .map_err(IoError::SocketError)?;
        let socket = Arc::new(socket);

        let reader = RawSocketReader {
            socket: socket.clone(),
            buf: vec![0; RECV_BUF_SIZE],
        };
        let writer = RawSocketWriter {
            socket,
            ifindex: iface.ifindex,
            src: iface.addr,
        };
        Ok((Box::new(reader), Box::new(writer)))
    }
}

// ===== impl RawSocketReader =====

#[async_trait]
impl PacketReader for RawSocketReader {
    async fn recv(&mut self) -> Result<(Ipv4Addr, Ipv4Addr, Bytes), IoError> {
        let mut cmsgspace = nix::cmsg_space!(libc::in_pktinfo);

        loop {
            let socket = &self.socket;
            let buf = &mut self.buf;
            let result = socket
                .async_io(Interest::READABLE, |socket| {
                    let mut iov = [IoSliceMut::new(&mut buf[..])];
                    match socket::recvmsg::<SockaddrIn>(
                        socket.as_raw_fd(),
                        &mut iov,
                        Some(&mut cmsgspace),
                        socket::MsgFlags::empty(),
                    ) {
                        Ok(msg) => {
                            // Retrieve source and destination addresses.
                            let src = msg
                                .address
                                .map(|addr| Ipv4Addr::from(addr.ip()));
                            let dst = msg
                                .cmsgs()
                                .ok()
                                .and_then(|cmsgs| get_packet_dst(cmsgs));
                            Ok((src, dst, msg.bytes))
                        }
                        Err(errno) => Err(errno.into()),
                    }
                })
                .await;

            match result {
                Ok((src, dst, bytes)) => {
                    let src = src.ok_or(IoError::RecvMissingSourceAddr)?;
                    let dst = dst.ok_or(IoError::RecvMissingAncillaryData)?;

                    // Strip the IP header.
                    let mut buf = Bytes::copy_from_slice(&self.buf[..bytes]);
                    if let Err(error) = strip_ip_hdr(&mut buf) {
                        warn!(%src, %error, "discarding malformed datagram");
                        continue;
                    }
                    return Ok((src, dst, buf));
                }
                Err(error)
                    if error.kind() == std::io::ErrorKind::Interrupted =>
                {
                    // Retry if the syscall was interrupted (EINTR).
                    continue;
                }
                Err(error) => return Err(IoError::RecvError(error)),
            }
        }
    }
}

// ===== impl RawSocketWriter =====

#[async_trait]
impl PacketWriter for RawSocketWriter {
    async fn send(
        &mut self,
        dst: Ipv4Addr,
        data: Bytes,
    ) -> Result<(), IoError> {
        let iov = [IoSlice::new(&data)];
        let sockaddr = SockaddrIn::from(SocketAddrV4::new(dst, 0));
        let pktinfo = libc::in_pktinfo {
            ipi_ifindex: self.ifindex as i32,
            ipi_spec_dst: libc::in_addr {
                s_addr: u32::from(self.src).to_be(),
            },
            ipi_addr: libc::in_addr { s_addr: 0 },
        };
        let cmsg = [socket::ControlMessage::Ipv4PacketInfo(&pktinfo)];
        self.socket
            .async_io(Interest::WRITABLE, |socket| {
                socket::sendmsg(
                    socket.as_raw_fd(),
                    &iov,
                    &cmsg,
                    socket::MsgFlags::empty(),
                    Some(&sockaddr),
                )
                .map_err(|errno| errno.into())
            })
            .await
            .map(|_| ())
            .map_err(IoError::SendError)
    }

    fn join(&mut self, group: MulticastAddr) -> Result<(), IoError> {
        self.socket
            .get_ref()
            .join_multicast_v4_n(
                &group.addr(),
                &InterfaceIndexOrAddress::Index(self.ifindex),
            )
            .map_err(|error| IoError::MulticastJoinError(group, error))
    }

    fn leave(&mut self, group: MulticastAddr) -> Result<(), IoError> {
        self.socket
            .get_ref()
            .leave_multicast_v4_n(
                &group.addr(),
                &InterfaceIndexOrAddress::Index(self.ifindex),
            )
            .map_err(|error| IoError::MulticastLeaveError(group, error))
    }
}

// ===== helper functions =====

fn socket(ifname: &str) -> Result<Socket, std::io::Error> {
    let socket = Socket::new(
        Domain::IPV4,
        Type::RAW,
        Some(Protocol::from(OSPF_IP_PROTO)),
    )?;

    socket.set_nonblocking(true)?;
    socket.bind_device(Some(ifname.as_bytes()))?;
    socket.set_multicast_loop_v4(false)?;
    socket.set_multicast_ttl_v4(1)?;
    let tos = libc::IPTOS_PREC_INTERNETCONTROL as libc::c_int;
    socket::setsockopt(&socket, sockopt::Ipv4Tos, &tos)?;
    socket::setsockopt(&socket, sockopt::Ipv4PacketInfo, &true)?;

    Ok(socket)
}

fn get_packet_dst(mut cmsgs: socket::CmsgIterator<'_>) -> Option<Ipv4Addr> {
    cmsgs.find_map(|cmsg| {
        if let socket::ControlMessageOwned::Ipv4PacketInfo(pktinfo) = cmsg {
            Some(Ipv4Addr::from(u32::from_be(pktinfo.ipi_addr.s_addr)))
        } else {
            None
        }
    })
}

// Validates the IP header of a received datagram and moves past it.
fn strip_ip_hdr(buf: &mut Bytes) -> Result<(), IpHdrError> {
    const MIN_HDR_LEN: usize = 20;

    let buf_len = buf.len();
    if buf_len < MIN_HDR_LEN {
        return Err(IpHdrError::Truncated(buf_len));
    }

    // Parse IHL (header length).
    let hdr_len = ((buf[0] & 0x0F) as usize) << 2;
    if hdr_len < MIN_HDR_LEN || hdr_len > buf_len {
        return Err(IpHdrError::InvalidHdrLength(hdr_len));
    }

    // Parse and validate the IP header total length.
    let total_len = u16::from_be_bytes([buf[2], buf[3]]);
    if total_len as usize != buf_len {
        return Err(IpHdrError::InvalidTotalLength(total_len));
    }

    buf.advance(hdr_len);
    Ok(())
}

#[derive(Debug, Eq, PartialEq)]
enum IpHdrError {
    Truncated(usize),
    InvalidHdrLength(usize),
    InvalidTotalLength(u16),
}

impl std::fmt::Display for IpHdrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpHdrError::Truncated(len) => {
                write!(f, "truncated IP header ({len} bytes)")
            }
            IpHdrError::InvalidHdrLength(len) => {
                write!(f, "invalid IP header length ({len})")
            }
            IpHdrError::InvalidTotalLength(len) => {
                write!(f, "invalid IP total length ({len})")
            }
        }
    }
}

// ===== unit tests =====
