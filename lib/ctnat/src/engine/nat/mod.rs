// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The NAT translation engine.
//!
//! NAT is established once per connection, while it is still a
//! [`NewConn`]: [`NatEngine::setup`] picks a translated tuple that is
//! in range and not in use, then rewrites the connection's reply tuple
//! to mirror it. From then on [`NatEngine::translate`] rewrites each
//! packet of the connection so that it matches the inverse of the
//! opposite direction's tuple.
//!
//! Each protocol supplies a [`NatProto`] strategy for range checks,
//! id allocation, and rewriting its own header.

pub mod icmp;
pub mod port;
pub mod tcp;
pub mod udp;

use super::Direction;
use super::Error;
use super::Result;
use super::conntrack::Conn;
use super::conntrack::ConnStatus;
use super::conntrack::NewConn;
use super::conntrack::TupleInUse;
use super::packet::ManipError;
use super::packet::PacketView;
use crate::provider::LogLevel;
use crate::provider::LogRef;
use crate::provider::null_log;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use core::sync::atomic::AtomicU32;
use ctnat_api::Ipv4Addr;
use ctnat_api::ManipPart;
use ctnat_api::ManipType;
use ctnat_api::NatRange;
use ctnat_api::Protocol;
use ctnat_api::Tuple;

/// A protocol's translation strategy.
pub trait NatProto: Send + Sync {
    /// Is the id `manip` would rewrite within `[min.id, max.id]`?
    fn in_range(
        &self,
        tuple: &Tuple,
        manip: ManipType,
        min: &ManipPart,
        max: &ManipPart,
    ) -> bool;

    /// Find a value for the id `manip` would rewrite, such that the
    /// resulting tuple is within `range` and not in use.
    ///
    /// `rover` is the engine's rotating probe counter.
    fn unique_tuple(
        &self,
        tuple: &Tuple,
        range: &NatRange,
        manip: ManipType,
        in_use: &dyn TupleInUse,
        rover: &AtomicU32,
    ) -> Option<Tuple>;

    /// Rewrite the protocol header so the `manip` side of the packet
    /// matches `target`, and repair the protocol's checksum.
    ///
    /// This runs before the IP header is rewritten: the packet's
    /// addresses are still the old ones, which is what a pseudo-header
    /// checksum repair needs.
    fn manip_pkt(
        &self,
        pkt: &mut PacketView,
        target: &Tuple,
        manip: ManipType,
    ) -> core::result::Result<(), ManipError>;
}

/// The fallback for protocols without a strategy of their own: the
/// address can be translated, nothing else.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnknownProto;

impl NatProto for UnknownProto {
    fn in_range(
        &self,
        _tuple: &Tuple,
        _manip: ManipType,
        _min: &ManipPart,
        _max: &ManipPart,
    ) -> bool {
        true
    }

    fn unique_tuple(
        &self,
        _tuple: &Tuple,
        _range: &NatRange,
        _manip: ManipType,
        _in_use: &dyn TupleInUse,
        _rover: &AtomicU32,
    ) -> Option<Tuple> {
        None
    }

    fn manip_pkt(
        &self,
        _pkt: &mut PacketView,
        _target: &Tuple,
        _manip: ManipType,
    ) -> core::result::Result<(), ManipError> {
        Ok(())
    }
}

/// Would `candidate`, used as a connection's original tuple, collide
/// with a tracked connection? Only the reply tuple needs checking; the
/// original is checked when the connection is confirmed.
pub fn used_tuple(candidate: &Tuple, in_use: &dyn TupleInUse) -> bool {
    match candidate.invert() {
        Some(reply) => in_use.tuple_taken(&reply),
        None => true,
    }
}

pub struct NatEngine {
    protos: BTreeMap<Protocol, Box<dyn NatProto>>,
    unknown: UnknownProto,
    rover: AtomicU32,
    log: LogRef,
}

impl Default for NatEngine {
    fn default() -> Self {
        Self::new(null_log())
    }
}

impl NatEngine {
    /// Create an engine with the TCP, UDP and ICMP strategies.
    pub fn new(log: LogRef) -> Self {
        let mut engine = Self {
            protos: BTreeMap::new(),
            unknown: UnknownProto,
            rover: AtomicU32::new(0),
            log,
        };
        engine.register(Protocol::TCP, Box::new(tcp::TcpNat));
        engine.register(Protocol::UDP, Box::new(udp::UdpNat));
        engine.register(Protocol::ICMP, Box::new(icmp::IcmpNat));
        engine
    }

    /// Install (or replace) the strategy for `proto`.
    pub fn register(&mut self, proto: Protocol, nat: Box<dyn NatProto>) {
        self.protos.insert(proto, nat);
    }

    fn proto(&self, proto: Protocol) -> &dyn NatProto {
        match self.protos.get(&proto) {
            Some(nat) => nat.as_ref(),
            None => &self.unknown,
        }
    }

    /// Choose the address for the `manip` side of `tuple` from the
    /// range's address bounds.
    ///
    /// The choice hashes both addresses of the flow, so a given
    /// client/server pair is always mapped to the same address. An
    /// inverted range leaves the tuple alone.
    fn choose_ip(tuple: &mut Tuple, range: &NatRange, manip: ManipType) {
        let min = u64::from(u32::from(range.min.ip));
        let max = u64::from(u32::from(range.max.ip));
        if !range.maps_ips() || min > max {
            return;
        }

        let mut key = [0u8; 8];
        key[..4].copy_from_slice(&tuple.src.ip.bytes());
        key[4..].copy_from_slice(&tuple.dst.ip.bytes());
        let j = u64::from(crc32fast::hash(&key));
        let ip = (min + j % (max - min + 1)) as u32;
        tuple.set_manip_ip(manip, Ipv4Addr::from(ip));
    }

    /// Find a translation of `orig` within `range` that does not
    /// collide with any tracked connection.
    ///
    /// The address is picked first. If the tuple with that address is
    /// in range and unused it is kept as is; otherwise the protocol
    /// strategy searches for a free id. An inverted range yields
    /// nothing.
    pub fn get_unique_tuple(
        &self,
        orig: &Tuple,
        range: &NatRange,
        manip: ManipType,
        in_use: &dyn TupleInUse,
    ) -> Option<Tuple> {
        range.validate().ok()?;
        let proto = self.proto(orig.proto);
        let mut tuple = *orig;
        Self::choose_ip(&mut tuple, range, manip);

        let id_ok = !range.proto_specified()
            || proto.in_range(&tuple, manip, &range.min, &range.max);
        if id_ok && !used_tuple(&tuple, in_use) {
            return Some(tuple);
        }

        proto.unique_tuple(&tuple, range, manip, in_use, &self.rover)
    }

    /// Establish NAT for a connection that has not been confirmed.
    ///
    /// On success the connection's reply tuple mirrors the translated
    /// tuple, and `SRC_NAT` or `DST_NAT` is set if a translation was
    /// actually needed.
    pub fn setup(
        &self,
        conn: &mut NewConn,
        range: &NatRange,
        manip: ManipType,
        in_use: &dyn TupleInUse,
    ) -> Result<()> {
        range.validate().map_err(Error::BadConfig)?;
        let reply = *conn.tuple(Direction::Reply);
        let orig = reply.invert().ok_or(Error::NoInverse(reply))?;

        let new = match self.get_unique_tuple(&orig, range, manip, in_use) {
            Some(new) => new,
            None => {
                self.log.log(
                    LogLevel::Warn,
                    &format!("{manip}: no free tuple for {orig} in {range}"),
                );
                return Err(Error::TranslationExhausted {
                    tuple: orig,
                    range: *range,
                });
            }
        };

        if new != orig {
            let new_reply = new.invert().ok_or(Error::NoInverse(new))?;
            conn.set_reply(new_reply);
            conn.add_status(match manip {
                ManipType::Src => ConnStatus::SRC_NAT,
                ManipType::Dst => ConnStatus::DST_NAT,
            });
        }

        Ok(())
    }

    /// Rewrite the `manip` side of `pkt` to match `target`.
    ///
    /// The protocol header goes first, while the IP header still holds
    /// the old addresses its checksum repair depends on.
    pub fn manip_pkt(
        &self,
        pkt: &mut PacketView,
        target: &Tuple,
        manip: ManipType,
    ) -> Result<()> {
        self.proto(target.proto).manip_pkt(pkt, target, manip)?;

        match manip {
            ManipType::Src => pkt.set_src_ip(target.src.ip),
            ManipType::Dst => pkt.set_dst_ip(target.dst.ip),
        }

        Ok(())
    }

    /// Apply a connection's translation to a packet travelling in
    /// `dir`.
    ///
    /// The packet is rewritten to look like the inverse of the other
    /// direction's tuple. A source translation of the original
    /// direction is a destination translation of the reply, and vice
    /// versa.
    pub fn translate(
        &self,
        conn: &Conn,
        dir: Direction,
        pkt: &mut PacketView,
    ) -> Result<()> {
        let status = conn.status();
        if !status.intersects(ConnStatus::SRC_NAT | ConnStatus::DST_NAT) {
            return Ok(());
        }

        let other = *conn.tuple(dir.reverse());
        let target = other.invert().ok_or(Error::NoInverse(other))?;

        for manip in [ManipType::Src, ManipType::Dst] {
            let bit = match (manip, dir) {
                (ManipType::Src, Direction::Original)
                | (ManipType::Dst, Direction::Reply) => ConnStatus::SRC_NAT,
                (ManipType::Dst, Direction::Original)
                | (ManipType::Src, Direction::Reply) => ConnStatus::DST_NAT,
            };

            if status.contains(bit) {
                self.manip_pkt(pkt, &target, manip)?;
            }
        }

        Ok(())
    }
}
