// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Port allocation shared by TCP and UDP.

use super::used_tuple;
use crate::engine::conntrack::TupleInUse;
use core::ops::RangeInclusive;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;
use ctnat_api::ManipPart;
use ctnat_api::ManipType;
use ctnat_api::NatRange;
use ctnat_api::Tuple;

// Privileged ports, and the low band of them used for credential
// passing.
const PRIV_PORT_MAX: u16 = 1023;
const CRED_PORT_MAX: u16 = 511;
const PRIV_BAND_MIN: u16 = 600;
const EPHEMERAL_MIN: u16 = 1024;

pub fn port_of(tuple: &Tuple, manip: ManipType) -> u16 {
    match manip {
        ManipType::Src => tuple.src.id,
        ManipType::Dst => tuple.dst.id,
    }
}

pub fn port_in_range(
    tuple: &Tuple,
    manip: ManipType,
    min: &ManipPart,
    max: &ManipPart,
) -> bool {
    let port = port_of(tuple, manip);
    port >= min.id && port <= max.id
}

/// The band a port may be remapped within when the range does not
/// name one, so privileged ports stay privileged.
pub fn default_band(port: u16) -> RangeInclusive<u16> {
    if port <= CRED_PORT_MAX {
        1..=CRED_PORT_MAX
    } else if port <= PRIV_PORT_MAX {
        PRIV_BAND_MIN..=PRIV_PORT_MAX
    } else {
        EPHEMERAL_MIN..=u16::MAX
    }
}

/// Probe the ids in `band` cyclically, starting at the next value of
/// `rover`, and return the first tuple whose translation is unused.
pub fn probe_ids<F>(
    tuple: &Tuple,
    band: RangeInclusive<u16>,
    in_use: &dyn TupleInUse,
    rover: &AtomicU32,
    set_id: F,
) -> Option<Tuple>
where
    F: Fn(&mut Tuple, u16),
{
    let (min, max) = (u32::from(*band.start()), u32::from(*band.end()));
    if min > max {
        return None;
    }

    let size = max - min + 1;
    let start = rover.fetch_add(1, Ordering::Relaxed);
    let mut candidate = *tuple;

    for i in 0..size {
        let id = min + (start.wrapping_add(i) % size);
        // `id <= max <= u16::MAX`
        set_id(&mut candidate, id as u16);
        if !used_tuple(&candidate, in_use) {
            return Some(candidate);
        }
    }

    None
}

/// The TCP/UDP `unique_tuple` strategy.
///
/// A destination port is never reassigned unless the range names the
/// ports to use.
pub fn unique_port(
    tuple: &Tuple,
    range: &NatRange,
    manip: ManipType,
    in_use: &dyn TupleInUse,
    rover: &AtomicU32,
) -> Option<Tuple> {
    let band = if range.proto_specified() {
        range.min.id..=range.max.id
    } else if manip == ManipType::Dst {
        return None;
    } else {
        default_band(port_of(tuple, manip))
    };

    probe_ids(tuple, band, in_use, rover, |t, id| t.set_manip_id(manip, id))
}
