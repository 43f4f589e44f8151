// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Routines for ICMP testing.

use super::IpProtocol;
use super::Ipv4Addr;
use super::ipv4;
use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::Icmpv4Packet;
use smoltcp::wire::Icmpv4Repr;

pub enum IcmpEchoType {
    Req,
    Reply,
}

pub fn gen_icmp_echo_req(
    ip_src: Ipv4Addr,
    ip_dst: Ipv4Addr,
    ident: u16,
    seq_no: u16,
    data: &[u8],
) -> Vec<u8> {
    gen_icmp_echo(IcmpEchoType::Req, ip_src, ip_dst, ident, seq_no, data)
}

pub fn gen_icmp_echo_reply(
    ip_src: Ipv4Addr,
    ip_dst: Ipv4Addr,
    ident: u16,
    seq_no: u16,
    data: &[u8],
) -> Vec<u8> {
    gen_icmp_echo(IcmpEchoType::Reply, ip_src, ip_dst, ident, seq_no, data)
}

pub fn gen_icmp_echo(
    etype: IcmpEchoType,
    ip_src: Ipv4Addr,
    ip_dst: Ipv4Addr,
    ident: u16,
    seq_no: u16,
    data: &[u8],
) -> Vec<u8> {
    let icmp = match etype {
        IcmpEchoType::Req => Icmpv4Repr::EchoRequest { ident, seq_no, data },
        IcmpEchoType::Reply => Icmpv4Repr::EchoReply { ident, seq_no, data },
    };
    let mut icmp_bytes = vec![0u8; icmp.buffer_len()];
    let mut icmp_pkt = Icmpv4Packet::new_unchecked(&mut icmp_bytes[..]);
    icmp.emit(&mut icmp_pkt, &ChecksumCapabilities::default());

    ipv4(ip_src, ip_dst, IpProtocol::Icmp, &icmp_bytes)
}
