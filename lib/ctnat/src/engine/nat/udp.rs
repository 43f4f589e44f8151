// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use super::NatProto;
use super::port;
use crate::engine::checksum::csum_replace;
use crate::engine::conntrack::TupleInUse;
use crate::engine::packet::ManipError;
use crate::engine::packet::PacketView;
use core::sync::atomic::AtomicU32;
use ctnat_api::ManipPart;
use ctnat_api::ManipType;
use ctnat_api::NatRange;
use ctnat_api::Tuple;

/// A UDP checksum of zero means the sender did not compute one.
pub const UDP_NO_CSUM: [u8; 2] = [0, 0];

#[derive(Clone, Copy, Debug, Default)]
pub struct UdpNat;

impl NatProto for UdpNat {
    fn in_range(
        &self,
        tuple: &Tuple,
        manip: ManipType,
        min: &ManipPart,
        max: &ManipPart,
    ) -> bool {
        port::port_in_range(tuple, manip, min, max)
    }

    fn unique_tuple(
        &self,
        tuple: &Tuple,
        range: &NatRange,
        manip: ManipType,
        in_use: &dyn TupleInUse,
        rover: &AtomicU32,
    ) -> Option<Tuple> {
        port::unique_port(tuple, range, manip, in_use, rover)
    }

    fn manip_pkt(
        &self,
        pkt: &mut PacketView,
        target: &Tuple,
        manip: ManipType,
    ) -> Result<(), ManipError> {
        let (old_ip, new_ip) = match manip {
            ManipType::Src => (pkt.src_ip(), target.src.ip),
            ManipType::Dst => (pkt.dst_ip(), target.dst.ip),
        };
        let new_port = port::port_of(target, manip).to_be_bytes();

        let udp = pkt.udp_mut()?;
        let port = match manip {
            ManipType::Src => &mut udp.src_port,
            ManipType::Dst => &mut udp.dst_port,
        };
        let old_port = *port;
        *port = new_port;

        if udp.csum == UDP_NO_CSUM {
            return Ok(());
        }

        csum_replace(&mut udp.csum, &old_ip.bytes(), &new_ip.bytes());
        csum_replace(&mut udp.csum, &old_port, &new_port);

        // A computed zero is sent as all ones.
        if udp.csum == UDP_NO_CSUM {
            udp.csum = [0xFF, 0xFF];
        }

        Ok(())
    }
}
