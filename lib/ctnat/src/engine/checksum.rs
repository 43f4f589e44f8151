// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Types for calculating the internet checksum.
//!
//! [`Checksum`] is a rolling one's complement sum that defers carry
//! folding until [`Checksum::finalize`]. [`HeaderChecksum`] is the
//! complemented form stored in packet headers.
//!
//! # Checksums and Endianness
//!
//! The checksum is a pair of bytes, not a logical integer. Both the
//! summed data and the checksum itself are read and written with
//! `{to,from}_ne_bytes()`, never byte-swapped: summing network-order
//! words as native integers and storing the result back natively
//! yields a network-order result on any host (RFC 1071 §1.B).
//!
//! # Incremental update
//!
//! When a header field changes from `m` to `m'`, the new header
//! checksum is `HC' = ~(~HC + ~m + m')` (RFC 1624, eqn. 3). This is
//! [`csum_replace`], and it is how every rewrite in the engine repairs
//! a checksum. `old` and `new` must start at the same even offset
//! within the summed data.

/// The checksum value as it is stored in a network header, i.e. with
/// one's complement applied.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderChecksum {
    inner: [u8; 2],
}

impl HeaderChecksum {
    /// Return the bytes of this header checksum.
    pub fn bytes(&self) -> [u8; 2] {
        self.inner
    }

    /// Wrap the checksum bytes found in a header.
    pub fn wrap(hc: [u8; 2]) -> Self {
        Self { inner: hc }
    }
}

impl From<Checksum> for HeaderChecksum {
    fn from(mut csum: Checksum) -> HeaderChecksum {
        Self { inner: (!csum.finalize()).to_ne_bytes() }
    }
}

/// A rolling one's complement sum.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u32,
}

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new rolling checksum, starting with `bytes`.
    pub fn compute(bytes: &[u8]) -> Self {
        Self { inner: csum_add(0, bytes) }
    }

    /// Add the contents of `bytes` to the sum.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_add(self.inner, bytes);
    }

    /// Remove the contents of `bytes` from the sum, by adding their
    /// complement.
    pub fn sub_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_sub(self.inner, bytes);
    }

    /// Fold all accumulated carries and return the 16-bit sum.
    pub fn finalize(&mut self) -> u16 {
        while (self.inner >> 16) != 0 {
            self.inner = (self.inner >> 16) + (self.inner & 0xFFFF);
        }

        (self.inner & 0xFFFF) as u16
    }
}

impl From<HeaderChecksum> for Checksum {
    fn from(hc: HeaderChecksum) -> Self {
        Self { inner: u32::from(!u16::from_ne_bytes(hc.bytes())) }
    }
}

/// Repair header checksum `hc` in place after the bytes `old` were
/// overwritten with `new`.
pub fn csum_replace(hc: &mut [u8; 2], old: &[u8], new: &[u8]) {
    debug_assert_eq!(old.len(), new.len());
    let mut csum = Checksum::from(HeaderChecksum::wrap(*hc));
    csum.sub_bytes(old);
    csum.add_bytes(new);
    *hc = HeaderChecksum::from(csum).bytes();
}

// Words are summed in native order; see the module comment.
fn csum_add(csum: u32, bytes: &[u8]) -> u32 {
    let mut sum = u64::from(csum);
    let mut words = bytes.chunks_exact(2);
    for w in &mut words {
        sum += u64::from(u16::from_ne_bytes([w[0], w[1]]));
    }

    if let [last] = words.remainder() {
        sum += u64::from(u16::from_ne_bytes([*last, 0]));
    }

    fold32(sum)
}

fn csum_sub(csum: u32, bytes: &[u8]) -> u32 {
    let mut sum = u64::from(csum);
    let mut words = bytes.chunks_exact(2);
    for w in &mut words {
        sum += u64::from(!u16::from_ne_bytes([w[0], w[1]]));
    }

    if let [last] = words.remainder() {
        sum += u64::from(!u16::from_ne_bytes([*last, 0]));
    }

    fold32(sum)
}

// 2^32 is congruent to 1 modulo 0xFFFF, so folding the high word into
// the low word preserves the one's complement sum.
fn fold32(mut sum: u64) -> u32 {
    while (sum >> 32) != 0 {
        sum = (sum >> 32) + (sum & 0xFFFF_FFFF);
    }

    sum as u32
}

#[cfg(test)]
mod test {
    use super::*;

    // RFC 1071 §3 worked example.
    #[test]
    fn rfc1071_sum() {
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        let mut csum = Checksum::compute(&data);
        assert_eq!(u16::from_be(csum.finalize()), 0xddf2);
    }

    #[test]
    fn odd_length_pads_with_zero() {
        let mut a = Checksum::compute(&[0xab, 0xcd, 0xef]);
        let mut b = Checksum::compute(&[0xab, 0xcd, 0xef, 0x00]);
        assert_eq!(a.finalize(), b.finalize());
    }

    #[test]
    fn replace_matches_recompute() {
        let mut data = [
            0x45, 0x00, 0x00, 0x54, 0x12, 0x34, 0x40, 0x00, 0x40, 0x01,
            0x00, 0x00, 0x0a, 0x00, 0x00, 0x01, 0x08, 0x08, 0x08, 0x08,
        ];
        let hc = HeaderChecksum::from(Checksum::compute(&data)).bytes();
        data[10..12].copy_from_slice(&hc);

        let mut csum = [data[10], data[11]];
        let old = [0x0a, 0x00, 0x00, 0x01];
        let new = [0xcb, 0x00, 0x71, 0x05];
        csum_replace(&mut csum, &old, &new);
        data[12..16].copy_from_slice(&new);

        data[10..12].copy_from_slice(&[0, 0]);
        let full = HeaderChecksum::from(Checksum::compute(&data)).bytes();
        assert_eq!(csum, full);
    }

    #[test]
    fn replace_with_same_bytes_is_identity() {
        let mut hc = [0x12, 0x34];
        csum_replace(&mut hc, &[0xaa, 0xbb], &[0xaa, 0xbb]);
        assert_eq!(hc, [0x12, 0x34]);
    }
}
