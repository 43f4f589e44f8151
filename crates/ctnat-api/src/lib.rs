// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod cmd;
pub mod ip;
pub mod limit;
pub mod nat;
pub mod tuple;

pub use cmd::*;
pub use ip::*;
pub use limit::*;
pub use nat::*;
pub use tuple::*;

/// The direction of a packet relative to the connection it belongs
/// to.
///
/// `Original` is the direction of the first packet observed for the
/// flow; `Reply` is the return path.
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
pub enum Direction {
    Original = 0,
    Reply = 1,
}

impl Direction {
    /// Return the opposite direction.
    pub const fn reverse(self) -> Self {
        match self {
            Self::Original => Self::Reply,
            Self::Reply => Self::Original,
        }
    }

    /// The index of this direction's tuple in a connection.
    pub const fn idx(self) -> usize {
        self as usize
    }
}

impl core::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "original" | "orig" => Ok(Direction::Original),
            "reply" => Ok(Direction::Reply),
            _ => Err(format!("invalid direction: {}", s)),
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dirstr = match self {
            Direction::Original => "ORIGINAL",
            Direction::Reply => "REPLY",
        };

        write!(f, "{}", dirstr)
    }
}

/// An interface identifier, as handed out by the surrounding
/// interface subsystem.
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
pub struct IfIndex(pub u32);

impl Display for IfIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "if{}", self.0)
    }
}

impl From<u32> for IfIndex {
    fn from(val: u32) -> Self {
        Self(val)
    }
}
