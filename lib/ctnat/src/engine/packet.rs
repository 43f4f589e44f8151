// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! A mutable view of an IPv4 packet.
//!
//! The engine only needs the handful of fields that make up a
//! [`Tuple`] plus the checksums covering them. [`PacketView`] overlays
//! raw header structs on a caller-owned buffer, so every rewrite
//! happens in place.

use super::checksum::csum_replace;
use core::mem;
use ctnat_api::Ipv4Addr;
use ctnat_api::Protocol;
use ctnat_api::Tuple;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

pub const IPV4_HDR_SZ: usize = mem::size_of::<Ipv4HdrRaw>();
pub const TCP_HDR_SZ: usize = mem::size_of::<TcpHdrRaw>();
pub const UDP_HDR_SZ: usize = mem::size_of::<UdpHdrRaw>();
pub const ICMP_HDR_SZ: usize = mem::size_of::<IcmpHdrRaw>();

const IPV4_VERSION: u8 = 4;
const IPV4_FRAG_OFFSET_MASK: u16 = 0x1FFF;

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("truncated {0} header")]
    Truncated(&'static str),

    #[error("not IPv4 (version {0})")]
    BadVersion(u8),

    #[error("bad IPv4 header length {0}")]
    BadHeaderLen(u8),

    #[error("bad IPv4 total length {0}")]
    BadTotalLen(u16),

    /// Only the first fragment carries the transport header.
    #[error("non-initial fragment")]
    Fragment,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ManipError {
    #[error("expected {expected} header, found {found}")]
    WrongProtocol { expected: Protocol, found: Protocol },
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct Ipv4HdrRaw {
    pub ver_hdr_len: u8,
    pub dscp_ecn: u8,
    pub total_len: [u8; 2],
    pub ident: [u8; 2],
    pub frag_and_flags: [u8; 2],
    pub ttl: u8,
    pub proto: u8,
    pub csum: [u8; 2],
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

impl Ipv4HdrRaw {
    /// Header length in bytes, options included.
    pub fn hdr_len(&self) -> usize {
        usize::from(self.ver_hdr_len & 0x0F) * 4
    }
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct TcpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub seq: [u8; 4],
    pub ack: [u8; 4],
    pub offset: u8,
    pub flags: u8,
    pub window: [u8; 2],
    pub csum: [u8; 2],
    pub urg: [u8; 2],
}

#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct UdpHdrRaw {
    pub src_port: [u8; 2],
    pub dst_port: [u8; 2],
    pub len: [u8; 2],
    pub csum: [u8; 2],
}

/// The fixed part of an ICMP query message (echo, timestamp, info,
/// address mask).
#[repr(C)]
#[derive(
    Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
)]
pub struct IcmpHdrRaw {
    pub ty: u8,
    pub code: u8,
    pub csum: [u8; 2],
    pub id: [u8; 2],
    pub seq: [u8; 2],
}

/// The upper-layer header, if it is one we understand.
#[derive(Debug)]
pub enum Ulp<'a> {
    Tcp(&'a mut TcpHdrRaw),
    Udp(&'a mut UdpHdrRaw),
    Icmp(&'a mut IcmpHdrRaw),
    Other,
}

/// An IPv4 packet overlaid on a mutable byte buffer.
#[derive(Debug)]
pub struct PacketView<'a> {
    ip: &'a mut Ipv4HdrRaw,
    ulp: Ulp<'a>,
    body: &'a mut [u8],
}

impl<'a> PacketView<'a> {
    /// Overlay a view on `buf`, which must begin with the IPv4 header.
    ///
    /// Trailing bytes beyond the IPv4 total length (e.g. Ethernet
    /// padding) are excluded from the view.
    pub fn parse(buf: &'a mut [u8]) -> Result<Self, ParseError> {
        let (ip, rest) = Ipv4HdrRaw::mut_from_prefix(buf)
            .map_err(|_| ParseError::Truncated("IPv4"))?;

        let version = ip.ver_hdr_len >> 4;
        if version != IPV4_VERSION {
            return Err(ParseError::BadVersion(version));
        }

        let hdr_len = ip.hdr_len();
        if hdr_len < IPV4_HDR_SZ {
            return Err(ParseError::BadHeaderLen(ip.ver_hdr_len & 0x0F));
        }

        let total_len = u16::from_be_bytes(ip.total_len);
        let opts_len = hdr_len - IPV4_HDR_SZ;
        let ulp_len = usize::from(total_len)
            .checked_sub(hdr_len)
            .ok_or(ParseError::BadTotalLen(total_len))?;
        if rest.len() < opts_len + ulp_len {
            return Err(ParseError::Truncated("IPv4"));
        }

        let frag = u16::from_be_bytes(ip.frag_and_flags);
        if frag & IPV4_FRAG_OFFSET_MASK != 0 {
            return Err(ParseError::Fragment);
        }

        let rest = &mut rest[opts_len..opts_len + ulp_len];
        let (ulp, body) = match Protocol::from(ip.proto) {
            Protocol::TCP => {
                let (tcp, body) = TcpHdrRaw::mut_from_prefix(rest)
                    .map_err(|_| ParseError::Truncated("TCP"))?;
                (Ulp::Tcp(tcp), body)
            }

            Protocol::UDP => {
                let (udp, body) = UdpHdrRaw::mut_from_prefix(rest)
                    .map_err(|_| ParseError::Truncated("UDP"))?;
                (Ulp::Udp(udp), body)
            }

            Protocol::ICMP => {
                let (icmp, body) = IcmpHdrRaw::mut_from_prefix(rest)
                    .map_err(|_| ParseError::Truncated("ICMP"))?;
                (Ulp::Icmp(icmp), body)
            }

            Protocol::Unknown(_) => (Ulp::Other, rest),
        };

        Ok(Self { ip, ulp, body })
    }

    pub fn proto(&self) -> Protocol {
        Protocol::from(self.ip.proto)
    }

    pub fn src_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip.src)
    }

    pub fn dst_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip.dst)
    }

    /// The bytes following the upper-layer header.
    pub fn body(&self) -> &[u8] {
        self.body
    }

    /// Build the tuple describing this packet's direction of its flow.
    pub fn tuple(&self) -> Tuple {
        let (src, dst) = (self.src_ip(), self.dst_ip());
        match &self.ulp {
            Ulp::Tcp(tcp) => Tuple::new_ports(
                Protocol::TCP,
                src,
                u16::from_be_bytes(tcp.src_port),
                dst,
                u16::from_be_bytes(tcp.dst_port),
            ),

            Ulp::Udp(udp) => Tuple::new_ports(
                Protocol::UDP,
                src,
                u16::from_be_bytes(udp.src_port),
                dst,
                u16::from_be_bytes(udp.dst_port),
            ),

            Ulp::Icmp(icmp) => Tuple::new_icmp(
                src,
                dst,
                u16::from_be_bytes(icmp.id),
                icmp.ty,
                icmp.code,
            ),

            Ulp::Other => {
                Tuple::new_ports(self.proto(), src, 0, dst, 0)
            }
        }
    }

    /// Rewrite the source address, repairing the IPv4 header checksum.
    ///
    /// The transport checksum is the protocol manipulator's business.
    pub fn set_src_ip(&mut self, ip: Ipv4Addr) {
        let new = ip.bytes();
        csum_replace(&mut self.ip.csum, &self.ip.src, &new);
        self.ip.src = new;
    }

    /// Rewrite the destination address, repairing the IPv4 header
    /// checksum.
    pub fn set_dst_ip(&mut self, ip: Ipv4Addr) {
        let new = ip.bytes();
        csum_replace(&mut self.ip.csum, &self.ip.dst, &new);
        self.ip.dst = new;
    }

    pub fn ip_csum(&self) -> [u8; 2] {
        self.ip.csum
    }

    pub fn tcp_mut(&mut self) -> Result<&mut TcpHdrRaw, ManipError> {
        let found = self.proto();
        match &mut self.ulp {
            Ulp::Tcp(tcp) => Ok(tcp),
            _ => Err(ManipError::WrongProtocol {
                expected: Protocol::TCP,
                found,
            }),
        }
    }

    pub fn udp_mut(&mut self) -> Result<&mut UdpHdrRaw, ManipError> {
        let found = self.proto();
        match &mut self.ulp {
            Ulp::Udp(udp) => Ok(udp),
            _ => Err(ManipError::WrongProtocol {
                expected: Protocol::UDP,
                found,
            }),
        }
    }

    pub fn icmp_mut(&mut self) -> Result<&mut IcmpHdrRaw, ManipError> {
        let found = self.proto();
        match &mut self.ulp {
            Ulp::Icmp(icmp) => Ok(icmp),
            _ => Err(ManipError::WrongProtocol {
                expected: Protocol::ICMP,
                found,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::checksum::Checksum;
    use crate::engine::checksum::HeaderChecksum;

    fn udp_pkt() -> Vec<u8> {
        let mut pkt = vec![
            // IPv4, 20 + 8 + 4 bytes
            0x45, 0x00, 0x00, 0x20, 0x00, 0x01, 0x40, 0x00, 0x40, 0x11,
            0x00, 0x00, 10, 0, 0, 1, 192, 0, 2, 1,
            // UDP 5353 -> 53, len 12, no checksum
            0x14, 0xe9, 0x00, 0x35, 0x00, 0x0c, 0x00, 0x00,
            // payload
            0xde, 0xad, 0xbe, 0xef,
            // trailing padding
            0x00, 0x00,
        ];
        let hc = HeaderChecksum::from(Checksum::compute(&pkt[..20])).bytes();
        pkt[10..12].copy_from_slice(&hc);
        pkt
    }

    #[test]
    fn parse_udp_tuple() {
        let mut buf = udp_pkt();
        let pkt = PacketView::parse(&mut buf).unwrap();
        let t = pkt.tuple();
        assert_eq!(t.proto, Protocol::UDP);
        assert_eq!(t.src.ip, "10.0.0.1".parse().unwrap());
        assert_eq!(t.src.id, 5353);
        assert_eq!(t.dst.id, 53);
        assert_eq!(pkt.body(), &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn rewrite_keeps_ip_csum_valid() {
        let mut buf = udp_pkt();
        let mut pkt = PacketView::parse(&mut buf).unwrap();
        pkt.set_src_ip("203.0.113.9".parse().unwrap());
        pkt.set_dst_ip("198.51.100.3".parse().unwrap());
        let mut sum = Checksum::compute(&buf[..20]);
        assert_eq!(sum.finalize(), 0xFFFF);
        assert_eq!(&buf[12..16], &[203, 0, 113, 9]);
    }

    #[test]
    fn reject_bad_input() {
        let mut buf = udp_pkt();
        assert_eq!(
            PacketView::parse(&mut buf[..10]).unwrap_err(),
            ParseError::Truncated("IPv4")
        );

        let mut v6 = udp_pkt();
        v6[0] = 0x65;
        assert_eq!(
            PacketView::parse(&mut v6).unwrap_err(),
            ParseError::BadVersion(6)
        );

        let mut frag = udp_pkt();
        frag[6] = 0x00;
        frag[7] = 0x10;
        assert_eq!(
            PacketView::parse(&mut frag).unwrap_err(),
            ParseError::Fragment
        );

        let mut short = udp_pkt();
        short[2] = 0x00;
        short[3] = 0x18;
        assert_eq!(
            PacketView::parse(&mut short).unwrap_err(),
            ParseError::Truncated("UDP")
        );
    }

    #[test]
    fn wrong_protocol_accessor() {
        let mut buf = udp_pkt();
        let mut pkt = PacketView::parse(&mut buf).unwrap();
        assert!(pkt.udp_mut().is_ok());
        assert_eq!(
            pkt.tcp_mut().unwrap_err(),
            ManipError::WrongProtocol {
                expected: Protocol::TCP,
                found: Protocol::UDP
            }
        );
    }
}
