// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! ICMP query translation.
//!
//! The query identifier plays the part of a source port: it lives in
//! the source half of the tuple in both directions, so it is what
//! gets reassigned whichever side is being translated. Destination
//! NAT of a query therefore may change its identifier too.

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

#[derive(Clone, Copy, Debug, Default)]
pub struct IcmpNat;

impl NatProto for IcmpNat {
    fn in_range(
        &self,
        tuple: &Tuple,
        _manip: ManipType,
        min: &ManipPart,
        max: &ManipPart,
    ) -> bool {
        tuple.src.id >= min.id && tuple.src.id <= max.id
    }

    fn unique_tuple(
        &self,
        tuple: &Tuple,
        range: &NatRange,
        _manip: ManipType,
        in_use: &dyn TupleInUse,
        rover: &AtomicU32,
    ) -> Option<Tuple> {
        let band = if range.proto_specified() {
            range.min.id..=range.max.id
        } else {
            0..=u16::MAX
        };

        port::probe_ids(tuple, band, in_use, rover, |t, id| t.src.id = id)
    }

    fn manip_pkt(
        &self,
        pkt: &mut PacketView,
        target: &Tuple,
        _manip: ManipType,
    ) -> Result<(), ManipError> {
        let icmp = pkt.icmp_mut()?;
        let new_id = target.src.id.to_be_bytes();
        // No pseudo-header: the ICMP checksum covers only the message.
        csum_replace(&mut icmp.csum, &icmp.id, &new_id);
        icmp.id = new_id;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::conntrack::ConnRegistry;
    use ctnat_api::ICMP_ECHO;

    #[test]
    fn full_id_space_when_unconstrained() {
        let reg = ConnRegistry::default();
        let rover = AtomicU32::new(0);
        let t = Tuple::new_icmp(
            "203.0.113.1".parse().unwrap(),
            "192.0.2.1".parse().unwrap(),
            9,
            ICMP_ECHO,
            0,
        );
        let range = NatRange::unconstrained();
        let new = IcmpNat
            .unique_tuple(&t, &range, ManipType::Dst, &reg, &rover)
            .unwrap();
        assert_eq!(new.src.id, 0);
        assert_eq!(new.dst, t.dst);
    }
}
