// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use alloc::string::String;
use alloc::string::ToString;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use core::ops::Deref;
use core::result;
use core::str::FromStr;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de;

/// An IP protocol value.
#[repr(u8)]
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
pub enum Protocol {
    ICMP,
    TCP,
    UDP,
    Unknown(u8),
}

pub const PROTO_ICMP: u8 = 0x1;
pub const PROTO_TCP: u8 = 0x6;
pub const PROTO_UDP: u8 = 0x11;

impl Default for Protocol {
    fn default() -> Self {
        Self::Unknown(255)
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ICMP => write!(f, "ICMP"),
            Self::TCP => write!(f, "TCP"),
            Self::UDP => write!(f, "UDP"),
            Self::Unknown(p) => write!(f, "PROTO{p}"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        match val.to_ascii_lowercase().as_str() {
            "icmp" => Ok(Self::ICMP),
            "tcp" => Ok(Self::TCP),
            "udp" => Ok(Self::UDP),
            other => other
                .parse::<u8>()
                .map(Self::from)
                .map_err(|_| format!("unknown protocol: {val}")),
        }
    }
}

impl From<u8> for Protocol {
    fn from(proto: u8) -> Self {
        match proto {
            PROTO_ICMP => Self::ICMP,
            PROTO_TCP => Self::TCP,
            PROTO_UDP => Self::UDP,
            _ => Self::Unknown(proto),
        }
    }
}

impl From<Protocol> for u8 {
    fn from(proto: Protocol) -> u8 {
        match proto {
            Protocol::ICMP => PROTO_ICMP,
            Protocol::TCP => PROTO_TCP,
            Protocol::UDP => PROTO_UDP,
            Protocol::Unknown(v) => v,
        }
    }
}

/// An IPv4 address.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(C)]
pub struct Ipv4Addr {
    inner: [u8; 4],
}

impl Ipv4Addr {
    pub const ANY_ADDR: Self = Self { inner: [0; 4] };
    pub const LOCAL_BCAST: Self = Self { inner: [255; 4] };

    /// Return the bytes of the address.
    #[inline]
    pub fn bytes(&self) -> [u8; 4] {
        self.inner
    }

    pub const fn from_const(bytes: [u8; 4]) -> Self {
        Self { inner: bytes }
    }

    /// Return the address after applying the network mask.
    pub fn mask(mut self, mask: u8) -> Result<Self, String> {
        if mask > 32 {
            return Err(format!("bad mask: {mask}"));
        }

        if mask == 0 {
            return Ok(Ipv4Addr::ANY_ADDR);
        }

        let mut n = u32::from_be_bytes(self.inner);

        let mut bits = i32::MIN;
        bits >>= mask - 1;
        n &= bits as u32;
        self.inner = n.to_be_bytes();
        Ok(self)
    }

    pub fn safe_mask(self, prefix_len: Ipv4PrefixLen) -> Self {
        match self.mask(prefix_len.0) {
            Ok(ip) => ip,
            // A valid prefix length can never produce a bad mask.
            Err(_) => unreachable!(),
        }
    }

    pub const fn is_multicast(&self) -> bool {
        matches!(self.inner[0], 224..240)
    }
}

impl From<core::net::Ipv4Addr> for Ipv4Addr {
    fn from(ip4: core::net::Ipv4Addr) -> Self {
        Self { inner: ip4.octets() }
    }
}

impl From<Ipv4Addr> for core::net::Ipv4Addr {
    fn from(ip4: Ipv4Addr) -> Self {
        Self::from(ip4.inner)
    }
}

impl From<Ipv4Addr> for u32 {
    fn from(ip: Ipv4Addr) -> u32 {
        u32::from_be_bytes(ip.bytes())
    }
}

impl From<u32> for Ipv4Addr {
    fn from(val: u32) -> Self {
        Self { inner: val.to_be_bytes() }
    }
}

impl From<[u8; 4]> for Ipv4Addr {
    fn from(bytes: [u8; 4]) -> Self {
        Self { inner: bytes }
    }
}

impl FromStr for Ipv4Addr {
    type Err = String;

    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        let octets: Vec<u8> = val
            .split('.')
            .map(|s| s.parse().map_err(|e| format!("{e}")))
            .collect::<result::Result<Vec<u8>, _>>()?;

        if octets.len() != 4 {
            return Err(format!("malformed ip: {val}"));
        }

        Ok(Self { inner: [octets[0], octets[1], octets[2], octets[3]] })
    }
}

impl Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.inner[0], self.inner[1], self.inner[2], self.inner[3],
        )
    }
}

// There's no reason to view an Ipv4Addr as its raw array, so just
// present it in a human-friendly manner.
impl Debug for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Ipv4Addr {{ inner: {self} }}")
    }
}

// Serialized in dotted-quad form.
impl Serialize for Ipv4Addr {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ipv4Addr {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(d)?;
        s.parse().map_err(de::Error::custom)
    }
}

impl AsRef<[u8]> for Ipv4Addr {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

impl From<Ipv4Addr> for [u8; 4] {
    fn from(ip: Ipv4Addr) -> [u8; 4] {
        ip.inner
    }
}

impl Deref for Ipv4Addr {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// A valid IPv4 prefix length.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, Ord, PartialOrd,
)]
pub struct Ipv4PrefixLen(u8);

impl TryFrom<u8> for Ipv4PrefixLen {
    type Error = String;

    fn try_from(p: u8) -> Result<Self, Self::Error> {
        Self::new(p)
    }
}

impl Ipv4PrefixLen {
    pub const NETMASK_NONE: Self = Self(0);
    pub const NETMASK_ALL: Self = Self(32);

    pub fn new(prefix_len: u8) -> Result<Self, String> {
        if prefix_len > 32 {
            return Err(format!("bad IPv4 prefix length: {prefix_len}"));
        }

        Ok(Self(prefix_len))
    }

    /// Convert the prefix length into a subnet mask.
    pub fn to_netmask(self) -> Ipv4Addr {
        if self.0 == 0 {
            return Ipv4Addr::ANY_ADDR;
        }

        let mut bits = i32::MIN;
        bits >>= self.0 - 1;
        Ipv4Addr::from(bits.to_be_bytes())
    }

    pub fn val(&self) -> u8 {
        self.0
    }
}

/// An IPv4 CIDR.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ipv4Cidr {
    ip: Ipv4Addr,
    prefix_len: Ipv4PrefixLen,
}

impl core::cmp::Ord for Ipv4Cidr {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        if self.ip != other.ip {
            self.ip.cmp(&other.ip)
        } else {
            self.prefix_len.cmp(&other.prefix_len)
        }
    }
}

impl core::cmp::PartialOrd for Ipv4Cidr {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Ipv4Cidr {
    type Err = String;

    /// Convert a string like "192.168.2.0/24" into an `Ipv4Cidr`.
    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        let (ip_s, prefix_s) = match val.split_once('/') {
            Some(v) => v,
            None => return Err("no '/' found".to_string()),
        };

        let ip = match ip_s.parse() {
            Ok(v) => v,
            Err(e) => return Err(format!("bad IP: {e}")),
        };

        let raw = match prefix_s.parse::<u8>() {
            Ok(v) => v,
            Err(e) => {
                return Err(format!("bad prefix length: {e}"));
            }
        };

        let prefix_len = Ipv4PrefixLen::new(raw)?;
        Ok(Ipv4Cidr::new(ip, prefix_len))
    }
}

impl Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len.val())
    }
}

impl Serialize for Ipv4Cidr {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ipv4Cidr {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(d)?;
        s.parse().map_err(de::Error::custom)
    }
}

impl Ipv4Cidr {
    pub fn ip(&self) -> Ipv4Addr {
        self.parts().0
    }

    /// Is this `ip` a member of the CIDR?
    pub fn is_member(&self, ip: Ipv4Addr) -> bool {
        ip.safe_mask(self.parts().1) == self.ip()
    }

    pub fn new(ip: Ipv4Addr, prefix_len: Ipv4PrefixLen) -> Self {
        let ip = ip.safe_mask(prefix_len);
        Ipv4Cidr { ip, prefix_len }
    }

    pub fn parts(&self) -> (Ipv4Addr, Ipv4PrefixLen) {
        (self.ip, self.prefix_len)
    }

    pub fn prefix_len(self) -> u8 {
        self.parts().1.val()
    }

    /// Convert the CIDR prefix length into a subnet mask.
    pub fn to_mask(self) -> Ipv4Addr {
        self.prefix_len.to_netmask()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cidr_membership() {
        let cidr: Ipv4Cidr = "10.0.0.77/24".parse().unwrap();
        assert_eq!(cidr.ip(), "10.0.0.0".parse().unwrap());
        assert!(cidr.is_member("10.0.0.1".parse().unwrap()));
        assert!(!cidr.is_member("10.0.1.1".parse().unwrap()));
        assert_eq!(cidr.to_mask(), "255.255.255.0".parse().unwrap());

        let all: Ipv4Cidr = "0.0.0.0/0".parse().unwrap();
        assert_eq!(all.to_mask(), Ipv4Addr::ANY_ADDR);
        assert!(all.is_member("192.0.2.1".parse().unwrap()));
    }

    #[test]
    fn protocol_parse() {
        assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::TCP);
        assert_eq!("UDP".parse::<Protocol>().unwrap(), Protocol::UDP);
        assert_eq!("47".parse::<Protocol>().unwrap(), Protocol::Unknown(47));
        assert_eq!("6".parse::<Protocol>().unwrap(), Protocol::TCP);
        assert!("sctp".parse::<Protocol>().is_err());
    }

    #[test]
    fn addr_u32_round() {
        let ip: Ipv4Addr = "203.0.113.9".parse().unwrap();
        assert_eq!(u32::from(ip), 0xCB00_7109);
        assert_eq!(Ipv4Addr::from(0xCB00_7109), ip);
        assert!("1.2.3".parse::<Ipv4Addr>().is_err());
    }
}
