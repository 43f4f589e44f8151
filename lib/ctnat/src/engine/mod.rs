// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The connection tracking and NAT engine.

pub mod checksum;
pub mod conntrack;
pub mod masq;
pub mod nat;
pub mod packet;
pub mod rate;
pub mod rule;
pub mod tracker;

use alloc::string::String;
pub use ctnat_api::Direction;
use ctnat_api::IfIndex;
use ctnat_api::NatRange;
use ctnat_api::Tuple;
use packet::ManipError;
use packet::ParseError;

/// Everything the engine can report to its caller.
///
/// None of these are fatal: a failure affects the packet or
/// configuration item at hand and nothing else.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// The flow is already tracked. Callers should look it up again.
    #[error("tuple already tracked: {0}")]
    DuplicateTuple(Tuple),

    /// No free tuple was left in the range. The packet must be
    /// dropped.
    #[error("no free tuple for {tuple} in range {range}")]
    TranslationExhausted { tuple: Tuple, range: NatRange },

    #[error("no source address for egress interface {0}")]
    RouteLookupFailed(IfIndex),

    /// A rate limit whose parameters cannot be represented.
    #[error("rate limit avg={avg} burst={burst} overflows")]
    ConfigOverflow { avg: u32, burst: u32 },

    #[error("rule wired twice: {0}")]
    DuplicateRuleWiring(String),

    #[error("bad configuration: {0}")]
    BadConfig(String),

    #[error("connection table is full ({0} entries)")]
    MaxCapacity(u64),

    /// The tuple does not describe a two-way flow, e.g. an ICMP error.
    #[error("tuple has no inverse: {0}")]
    NoInverse(Tuple),

    #[error("parse: {0}")]
    Parse(#[from] ParseError),

    #[error("rewrite: {0}")]
    Manip(#[from] ManipError),
}

pub type Result<T> = core::result::Result<T, Error>;
