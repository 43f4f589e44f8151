// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use super::ip::Ipv4Addr;
use super::tuple::ManipPart;
use alloc::string::String;
use bitflags::bitflags;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// Which side of a tuple a translation rewrites.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum ManipType {
    /// Source NAT: rewrite the source address and id.
    Src,
    /// Destination NAT: rewrite the destination address and id.
    Dst,
}

impl Display for ManipType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Src => "SNAT",
            Self::Dst => "DNAT",
        };
        write!(f, "{s}")
    }
}

bitflags! {
    #[derive(
        Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize,
        Deserialize,
    )]
    pub struct NatRangeFlags: u8 {
        /// The range constrains the address.
        const MAP_IPS = 0x1;
        /// The range constrains the protocol id (port or ICMP id).
        const PROTO_SPECIFIED = 0x2;
    }
}

/// The space from which a translated [`ManipPart`] may be drawn.
///
/// Only the fields named by `flags` are meaningful: the address bounds
/// when `MAP_IPS` is set and the id bounds when `PROTO_SPECIFIED` is
/// set.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NatRange {
    pub flags: NatRangeFlags,
    pub min: ManipPart,
    pub max: ManipPart,
}

impl NatRange {
    /// A range that constrains neither address nor id.
    pub const fn unconstrained() -> Self {
        Self {
            flags: NatRangeFlags::empty(),
            min: ManipPart::new(Ipv4Addr::ANY_ADDR, 0),
            max: ManipPart::new(Ipv4Addr::ANY_ADDR, 0),
        }
    }

    /// A range pinned to a single address, with any id.
    pub const fn addr(ip: Ipv4Addr) -> Self {
        Self {
            flags: NatRangeFlags::MAP_IPS,
            min: ManipPart::new(ip, 0),
            max: ManipPart::new(ip, 0),
        }
    }

    /// Constrain the id to `[min, max]`.
    pub const fn with_ids(mut self, min: u16, max: u16) -> Self {
        self.flags = self.flags.union(NatRangeFlags::PROTO_SPECIFIED);
        self.min.id = min;
        self.max.id = max;
        self
    }

    pub fn maps_ips(&self) -> bool {
        self.flags.contains(NatRangeFlags::MAP_IPS)
    }

    pub fn proto_specified(&self) -> bool {
        self.flags.contains(NatRangeFlags::PROTO_SPECIFIED)
    }

    /// Check that the bounds are ordered.
    pub fn validate(&self) -> Result<(), String> {
        if self.maps_ips() && u32::from(self.min.ip) > u32::from(self.max.ip)
        {
            return Err(format!(
                "address range {} - {} is inverted",
                self.min.ip, self.max.ip
            ));
        }

        if self.proto_specified() && self.min.id > self.max.id {
            return Err(format!(
                "id range {} - {} is inverted",
                self.min.id, self.max.id
            ));
        }

        Ok(())
    }

    /// Is `ip` within the address bounds? Always true when the range
    /// does not map addresses.
    pub fn contains_ip(&self, ip: Ipv4Addr) -> bool {
        if !self.maps_ips() {
            return true;
        }

        let ip = u32::from(ip);
        ip >= u32::from(self.min.ip) && ip <= u32::from(self.max.ip)
    }
}

impl Display for NatRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.maps_ips(), self.proto_specified()) {
            (false, false) => write!(f, "any"),
            (true, false) => write!(f, "{}-{}", self.min.ip, self.max.ip),
            (false, true) => write!(f, ":{}-{}", self.min.id, self.max.id),
            (true, true) => write!(
                f,
                "{}-{}:{}-{}",
                self.min.ip, self.max.ip, self.min.id, self.max.id
            ),
        }
    }
}

/// Parse the iptables-like range syntax `IP[-IP][:ID[-ID]]`, or
/// `:ID[-ID]` to constrain only the id.
impl FromStr for NatRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut range = NatRange::unconstrained();
        let (ips, ids) = match s.split_once(':') {
            Some((ips, ids)) => (ips, Some(ids)),
            None => (s, None),
        };

        if !ips.is_empty() {
            let (lo, hi) = ips.split_once('-').unwrap_or((ips, ips));
            range.flags |= NatRangeFlags::MAP_IPS;
            range.min.ip = lo.parse()?;
            range.max.ip = hi.parse()?;
        }

        if let Some(ids) = ids {
            let (lo, hi) = ids.split_once('-').unwrap_or((ids, ids));
            let lo = lo
                .parse::<u16>()
                .map_err(|e| format!("bad id {lo}: {e}"))?;
            let hi = hi
                .parse::<u16>()
                .map_err(|e| format!("bad id {hi}: {e}"))?;
            range = range.with_ids(lo, hi);
        }

        range.validate()?;
        Ok(range)
    }
}

#[cfg(test)]
mod test {
    use alloc::string::ToString;
    use super::*;

    #[test]
    fn parse_ranges() {
        let r: NatRange =
            "203.0.113.1-203.0.113.4:40000-40002".parse().unwrap();
        assert!(r.maps_ips());
        assert!(r.proto_specified());
        assert_eq!(r.min.id, 40000);
        assert_eq!(r.max.id, 40002);
        assert!(r.contains_ip("203.0.113.3".parse().unwrap()));
        assert!(!r.contains_ip("203.0.113.5".parse().unwrap()));

        let r: NatRange = ":1024-2047".parse().unwrap();
        assert!(!r.maps_ips());
        assert_eq!(r.to_string(), ":1024-2047");

        let r: NatRange = "198.51.100.7".parse().unwrap();
        assert_eq!(r, NatRange::addr("198.51.100.7".parse().unwrap()));
    }

    #[test]
    fn reject_inverted() {
        assert!(":2000-1000".parse::<NatRange>().is_err());
        assert!("10.0.0.9-10.0.0.1".parse::<NatRange>().is_err());
    }
}
