// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Flow tuples.
//!
//! A [`Tuple`] identifies one direction of one flow. It is split into
//! the part NAT rewrites as a matter of course (the source,
//! [`ManipPart`]) and the part that normally stays put (the
//! destination, [`FixedPart`]). For ICMP the echo identifier plays
//! the role of the source port, and the destination carries the
//! message type and code instead of a port.

use super::ip::Ipv4Addr;
use super::ip::Protocol;
use super::nat::ManipType;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_ECHO: u8 = 8;
pub const ICMP_TIMESTAMP: u8 = 13;
pub const ICMP_TIMESTAMP_REPLY: u8 = 14;
pub const ICMP_INFO_REQUEST: u8 = 15;
pub const ICMP_INFO_REPLY: u8 = 16;
pub const ICMP_ADDRESS: u8 = 17;
pub const ICMP_ADDRESS_REPLY: u8 = 18;

/// Map an ICMP query type to the type of its answer, and vice versa.
///
/// Only the query/response pairs can be tracked as a flow; any other
/// message type has no inverse.
pub const fn icmp_invert_type(ty: u8) -> Option<u8> {
    match ty {
        ICMP_ECHO => Some(ICMP_ECHO_REPLY),
        ICMP_ECHO_REPLY => Some(ICMP_ECHO),
        ICMP_TIMESTAMP => Some(ICMP_TIMESTAMP_REPLY),
        ICMP_TIMESTAMP_REPLY => Some(ICMP_TIMESTAMP),
        ICMP_INFO_REQUEST => Some(ICMP_INFO_REPLY),
        ICMP_INFO_REPLY => Some(ICMP_INFO_REQUEST),
        ICMP_ADDRESS => Some(ICMP_ADDRESS_REPLY),
        ICMP_ADDRESS_REPLY => Some(ICMP_ADDRESS),
        _ => None,
    }
}

/// The rewritable half of a tuple: an address plus the
/// protocol-specific identifier (port for TCP/UDP, echo identifier for
/// ICMP).
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct ManipPart {
    pub ip: Ipv4Addr,
    pub id: u16,
}

impl ManipPart {
    pub const fn new(ip: Ipv4Addr, id: u16) -> Self {
        Self { ip, id }
    }
}

/// The destination half of a tuple.
///
/// `id` is the destination port for TCP/UDP and zero for ICMP, which
/// instead records the message type and code.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct FixedPart {
    pub ip: Ipv4Addr,
    pub id: u16,
    pub icmp_type: u8,
    pub icmp_code: u8,
}

/// The identity of one direction of a flow.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Tuple {
    pub src: ManipPart,
    pub dst: FixedPart,
    pub proto: Protocol,
}

/// The number of bytes produced by [`Tuple::to_bytes`].
pub const TUPLE_BYTES: usize = 16;

impl Tuple {
    /// A TCP or UDP tuple.
    pub fn new_ports(
        proto: Protocol,
        src_ip: Ipv4Addr,
        src_port: u16,
        dst_ip: Ipv4Addr,
        dst_port: u16,
    ) -> Self {
        Self {
            src: ManipPart::new(src_ip, src_port),
            dst: FixedPart { ip: dst_ip, id: dst_port, ..Default::default() },
            proto,
        }
    }

    /// An ICMP query tuple.
    pub fn new_icmp(
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        ident: u16,
        icmp_type: u8,
        icmp_code: u8,
    ) -> Self {
        Self {
            src: ManipPart::new(src_ip, ident),
            dst: FixedPart { ip: dst_ip, id: 0, icmp_type, icmp_code },
            proto: Protocol::ICMP,
        }
    }

    /// Produce the tuple of the opposite direction of the same flow.
    ///
    /// Returns `None` when the tuple cannot describe a two-way flow,
    /// such as an ICMP message that is neither a query nor a response.
    pub fn invert(&self) -> Option<Tuple> {
        match self.proto {
            Protocol::TCP | Protocol::UDP => Some(Tuple {
                src: ManipPart::new(self.dst.ip, self.dst.id),
                dst: FixedPart {
                    ip: self.src.ip,
                    id: self.src.id,
                    ..Default::default()
                },
                proto: self.proto,
            }),

            Protocol::ICMP => {
                let ty = icmp_invert_type(self.dst.icmp_type)?;
                Some(Tuple::new_icmp(
                    self.dst.ip,
                    self.src.ip,
                    self.src.id,
                    ty,
                    self.dst.icmp_code,
                ))
            }

            Protocol::Unknown(_) => Some(Tuple {
                src: ManipPart::new(self.dst.ip, 0),
                dst: FixedPart { ip: self.src.ip, ..Default::default() },
                proto: self.proto,
            }),
        }
    }

    /// Does the source half of `self` equal that of `other`?
    pub fn src_equal(&self, other: &Tuple) -> bool {
        self.src == other.src && self.proto == other.proto
    }

    /// Does the destination half of `self` equal that of `other`?
    pub fn dst_equal(&self, other: &Tuple) -> bool {
        self.dst == other.dst && self.proto == other.proto
    }

    /// Return the address and identifier on the side named by `manip`.
    pub fn manip_part(&self, manip: ManipType) -> ManipPart {
        match manip {
            ManipType::Src => self.src,
            ManipType::Dst => ManipPart::new(self.dst.ip, self.dst.id),
        }
    }

    /// Set the address on the side named by `manip`.
    pub fn set_manip_ip(&mut self, manip: ManipType, ip: Ipv4Addr) {
        match manip {
            ManipType::Src => self.src.ip = ip,
            ManipType::Dst => self.dst.ip = ip,
        }
    }

    /// Set the protocol identifier on the side named by `manip`.
    pub fn set_manip_id(&mut self, manip: ManipType, id: u16) {
        match manip {
            ManipType::Src => self.src.id = id,
            ManipType::Dst => self.dst.id = id,
        }
    }

    /// Overwrite the side named by `manip` with `part`.
    pub fn set_manip_part(&mut self, manip: ManipType, part: ManipPart) {
        self.set_manip_ip(manip, part.ip);
        self.set_manip_id(manip, part.id);
    }

    /// Serialize the tuple into a fixed-size byte string, suitable for
    /// hashing.
    pub fn to_bytes(&self) -> [u8; TUPLE_BYTES] {
        let mut out = [0u8; TUPLE_BYTES];
        out[0..4].copy_from_slice(&self.src.ip.bytes());
        out[4..6].copy_from_slice(&self.src.id.to_be_bytes());
        out[6..10].copy_from_slice(&self.dst.ip.bytes());
        out[10..12].copy_from_slice(&self.dst.id.to_be_bytes());
        out[12] = self.dst.icmp_type;
        out[13] = self.dst.icmp_code;
        out[14] = u8::from(self.proto);
        out
    }

    /// Compare `self` against `other`, considering only the bits set
    /// in `mask`.
    pub fn mask_matches(&self, other: &Tuple, mask: &TupleMask) -> bool {
        let masked = |a: u32, b: u32, m: u32| (a & m) == (b & m);

        masked(self.src.ip.into(), other.src.ip.into(), mask.src_ip.into())
            && masked(
                self.src.id.into(),
                other.src.id.into(),
                mask.src_id.into(),
            )
            && masked(
                self.dst.ip.into(),
                other.dst.ip.into(),
                mask.dst_ip.into(),
            )
            && masked(
                self.dst.id.into(),
                other.dst.id.into(),
                mask.dst_id.into(),
            )
            && masked(
                u8::from(self.proto).into(),
                u8::from(other.proto).into(),
                mask.proto.into(),
            )
    }
}

impl Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.proto {
            Protocol::ICMP => write!(
                f,
                "{} {} -> {} id={} type={} code={}",
                self.proto,
                self.src.ip,
                self.dst.ip,
                self.src.id,
                self.dst.icmp_type,
                self.dst.icmp_code,
            ),

            _ => write!(
                f,
                "{} {}:{} -> {}:{}",
                self.proto,
                self.src.ip,
                self.src.id,
                self.dst.ip,
                self.dst.id,
            ),
        }
    }
}

/// A tuple-shaped bitmask. A set bit means the corresponding bit of
/// the tuple participates in a comparison.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TupleMask {
    pub src_ip: Ipv4Addr,
    pub src_id: u16,
    pub dst_ip: Ipv4Addr,
    pub dst_id: u16,
    pub proto: u8,
}

impl TupleMask {
    /// A mask that compares every field.
    pub const EXACT: Self = Self {
        src_ip: Ipv4Addr::LOCAL_BCAST,
        src_id: u16::MAX,
        dst_ip: Ipv4Addr::LOCAL_BCAST,
        dst_id: u16::MAX,
        proto: u8::MAX,
    };

    /// A mask that compares nothing, matching every tuple.
    pub const ANY: Self = Self {
        src_ip: Ipv4Addr::ANY_ADDR,
        src_id: 0,
        dst_ip: Ipv4Addr::ANY_ADDR,
        dst_id: 0,
        proto: 0,
    };
}

#[cfg(test)]
mod test {
    use super::*;

    fn tcp() -> Tuple {
        Tuple::new_ports(
            Protocol::TCP,
            "10.0.0.1".parse().unwrap(),
            1234,
            "93.184.0.1".parse().unwrap(),
            80,
        )
    }

    #[test]
    fn invert_ports() {
        let t = tcp();
        let r = t.invert().unwrap();
        assert_eq!(r.src.ip, t.dst.ip);
        assert_eq!(r.src.id, 80);
        assert_eq!(r.dst.ip, t.src.ip);
        assert_eq!(r.dst.id, 1234);
        assert_eq!(r.invert().unwrap(), t);
    }

    #[test]
    fn invert_icmp() {
        let t = Tuple::new_icmp(
            "10.0.0.1".parse().unwrap(),
            "8.8.8.8".parse().unwrap(),
            77,
            ICMP_ECHO,
            0,
        );
        let r = t.invert().unwrap();
        assert_eq!(r.src.id, 77);
        assert_eq!(r.dst.icmp_type, ICMP_ECHO_REPLY);
        assert_eq!(r.invert().unwrap(), t);

        // Destination unreachable is not a query.
        let unreach = Tuple::new_icmp(t.src.ip, t.dst.ip, 0, 3, 1);
        assert!(unreach.invert().is_none());
    }

    #[test]
    fn manip_part_sides() {
        let mut t = tcp();
        let new_src = ManipPart::new("203.0.113.1".parse().unwrap(), 40000);
        t.set_manip_part(ManipType::Src, new_src);
        assert_eq!(t.manip_part(ManipType::Src), new_src);
        assert_eq!(t.dst.id, 80);

        t.set_manip_id(ManipType::Dst, 8080);
        assert_eq!(t.manip_part(ManipType::Dst).id, 8080);
    }

    #[test]
    fn mask_compare() {
        let t = tcp();
        let mut other = t;
        other.src.id = 9999;
        assert!(!t.mask_matches(&other, &TupleMask::EXACT));
        assert!(t.mask_matches(&other, &TupleMask::ANY));

        let by_subnet = TupleMask {
            src_ip: "255.255.255.0".parse().unwrap(),
            proto: u8::MAX,
            ..TupleMask::ANY
        };
        other.src.ip = "10.0.0.200".parse().unwrap();
        assert!(t.mask_matches(&other, &by_subnet));
        other.proto = Protocol::UDP;
        assert!(!t.mask_matches(&other, &by_subnet));
    }

    #[test]
    fn bytes_distinguish_protocols() {
        let t = tcp();
        let mut u = t;
        u.proto = Protocol::UDP;
        assert_ne!(t.to_bytes(), u.to_bytes());
    }
}
