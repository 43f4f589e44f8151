// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Common routines for integration tests and benchmarks.
//!
//! Packets are built with smoltcp rather than with anything in ctnat,
//! so that checksums computed here are an independent check on the
//! engine's incremental repairs.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

pub mod icmp;
pub mod pcap;

pub use ctnat::api::Direction;
pub use ctnat::api::IfIndex;
pub use ctnat::api::Ipv4Addr;
pub use ctnat::api::NatRange;
pub use ctnat::api::Protocol;
pub use ctnat::api::RateLimitCfg;
pub use ctnat::api::Tuple;
pub use ctnat::ddi::time::Moment;
pub use ctnat::engine::Error;
pub use ctnat::engine::conntrack::ConnRef;
pub use ctnat::engine::conntrack::ConnRegistry;
pub use ctnat::engine::conntrack::ConnStatus;
pub use ctnat::engine::masq::IfEvent;
pub use ctnat::engine::masq::StaticRoutes;
pub use ctnat::engine::packet::PacketView;
pub use ctnat::engine::rate::RateLimit;
pub use ctnat::engine::rule::NatAction;
pub use ctnat::engine::rule::Rule;
pub use ctnat::engine::rule::TupleMatch;
pub use ctnat::engine::tracker::ConnTracker;
pub use ctnat::engine::tracker::TrackerCfg;
pub use ctnat::engine::tracker::Verdict;
pub use ctnat::provider::PrintlnLog;
pub use smoltcp::wire::IpProtocol;
pub use std::sync::Arc;

use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::Icmpv4Packet;
use smoltcp::wire::IpAddress;
use smoltcp::wire::Ipv4Address;
use smoltcp::wire::Ipv4Packet;
use smoltcp::wire::Ipv4Repr;
use smoltcp::wire::TcpPacket;
use smoltcp::wire::TcpSeqNumber;
use smoltcp::wire::UdpPacket;
use smoltcp::wire::UdpRepr;

/// The egress interface every harness is created with.
pub const ETH0: IfIndex = IfIndex(2);

/// `ETH0`'s address until a test changes it.
pub const ETH0_ADDR: Ipv4Addr = Ipv4Addr::from_const([203, 0, 113, 1]);

pub fn ip(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

fn v4(ip: Ipv4Addr) -> Ipv4Address {
    Ipv4Address(ip.bytes())
}

fn ip_addr(ip: Ipv4Addr) -> IpAddress {
    IpAddress::Ipv4(v4(ip))
}

/// A tracker plus the routing table backing its masquerading.
pub struct Harness {
    pub tracker: ConnTracker,
    pub routes: Arc<StaticRoutes>,
}

pub fn harness() -> Harness {
    harness_with(TrackerCfg::default())
}

pub fn harness_with(cfg: TrackerCfg) -> Harness {
    let routes = Arc::new(StaticRoutes::new());
    routes.set(ETH0, ETH0_ADDR);
    let tracker = ConnTracker::new(cfg, routes.clone(), Arc::new(PrintlnLog));
    Harness { tracker, routes }
}

/// A rule masquerading everything out of [`ETH0`].
pub fn masq_rule(name: &str) -> Rule {
    Rule::new(name, TupleMatch::any()).nat(NatAction::Masquerade {
        egress: ETH0,
        range: NatRange::unconstrained(),
    })
}

/// Unwrap an accept verdict.
#[track_caller]
pub fn accepted(v: Verdict) -> (ConnRef, Direction, bool) {
    match v {
        Verdict::Accept { conn, dir, new } => (conn, dir, new),
        Verdict::Drop(reason) => panic!("expected accept, got drop: {reason}"),
    }
}

/// Wrap `ulp` in an IPv4 header with a correct checksum.
pub fn ipv4(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    proto: IpProtocol,
    ulp: &[u8],
) -> Vec<u8> {
    let repr = Ipv4Repr {
        src_addr: v4(src),
        dst_addr: v4(dst),
        next_header: proto,
        payload_len: ulp.len(),
        hop_limit: 64,
    };
    let hdr_len = repr.buffer_len();
    let mut buf = vec![0u8; hdr_len + ulp.len()];
    let mut pkt = Ipv4Packet::new_unchecked(&mut buf[..]);
    repr.emit(&mut pkt, &ChecksumCapabilities::default());
    buf[hdr_len..].copy_from_slice(ulp);
    buf
}

/// A UDP datagram with every checksum filled in.
pub fn udp_pkt(
    src: Ipv4Addr,
    sport: u16,
    dst: Ipv4Addr,
    dport: u16,
    payload: &[u8],
) -> Vec<u8> {
    let udp = UdpRepr { src_port: sport, dst_port: dport };
    let mut ulp = vec![0u8; udp.header_len() + payload.len()];
    let mut pkt = UdpPacket::new_unchecked(&mut ulp[..]);
    udp.emit(
        &mut pkt,
        &ip_addr(src),
        &ip_addr(dst),
        payload.len(),
        |buf| buf.copy_from_slice(payload),
        &ChecksumCapabilities::default(),
    );
    ipv4(src, dst, IpProtocol::Udp, &ulp)
}

/// Byte offset of the UDP checksum in a packet from [`udp_pkt`].
pub const UDP_CSUM_OFF: usize = 26;

/// A UDP datagram whose sender did not compute a checksum.
pub fn udp_pkt_no_csum(
    src: Ipv4Addr,
    sport: u16,
    dst: Ipv4Addr,
    dport: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut buf = udp_pkt(src, sport, dst, dport, payload);
    buf[UDP_CSUM_OFF..UDP_CSUM_OFF + 2].copy_from_slice(&[0, 0]);
    buf
}

/// A TCP segment with every checksum filled in. A segment without
/// payload is a SYN; one with payload is an ACK carrying it.
pub fn tcp_pkt(
    src: Ipv4Addr,
    sport: u16,
    dst: Ipv4Addr,
    dport: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut ulp = vec![0u8; 20 + payload.len()];
    let mut tcp = TcpPacket::new_unchecked(&mut ulp[..]);
    tcp.set_src_port(sport);
    tcp.set_dst_port(dport);
    tcp.set_seq_number(TcpSeqNumber(4224));
    tcp.set_ack_number(TcpSeqNumber(0));
    tcp.set_header_len(20);
    tcp.clear_flags();
    if payload.is_empty() {
        tcp.set_syn(true);
    } else {
        tcp.set_ack(true);
        tcp.set_psh(true);
    }
    tcp.set_window_len(64_240);
    tcp.set_urgent_at(0);
    tcp.payload_mut().copy_from_slice(payload);
    tcp.fill_checksum(&ip_addr(src), &ip_addr(dst));
    ipv4(src, dst, IpProtocol::Tcp, &ulp)
}

/// Verify every checksum in an IPv4 packet by full recomputation.
///
/// A UDP checksum of zero means none was computed and is accepted.
pub fn verify_checksums(buf: &[u8]) -> Result<(), String> {
    let ip = Ipv4Packet::new_checked(buf).map_err(|e| format!("ip: {e}"))?;
    if !ip.verify_checksum() {
        return Err("bad IPv4 header checksum".into());
    }

    let src = IpAddress::Ipv4(ip.src_addr());
    let dst = IpAddress::Ipv4(ip.dst_addr());
    let ulp = ip.payload();

    match ip.next_header() {
        IpProtocol::Tcp => {
            let tcp =
                TcpPacket::new_checked(ulp).map_err(|e| format!("tcp: {e}"))?;
            if !tcp.verify_checksum(&src, &dst) {
                return Err(format!("bad TCP checksum {:#06x}", tcp.checksum()));
            }
        }

        IpProtocol::Udp => {
            let udp =
                UdpPacket::new_checked(ulp).map_err(|e| format!("udp: {e}"))?;
            if udp.checksum() != 0 && !udp.verify_checksum(&src, &dst) {
                return Err(format!("bad UDP checksum {:#06x}", udp.checksum()));
            }
        }

        IpProtocol::Icmp => {
            let icmp = Icmpv4Packet::new_checked(ulp)
                .map_err(|e| format!("icmp: {e}"))?;
            if !icmp.verify_checksum() {
                return Err(format!(
                    "bad ICMP checksum {:#06x}",
                    icmp.checksum()
                ));
            }
        }

        _ => {}
    }

    Ok(())
}
