// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! A connection-tracking and network-address-translation engine.
//!
//! The engine is split the same way the packet path uses it:
//!
//! * [`engine::conntrack`]: the registry of live bidirectional flows.
//! * [`engine::nat`]: per-protocol translation, unique tuple
//!   allocation, and checksum-preserving packet rewrites.
//! * [`engine::masq`]: source NAT whose address follows the egress
//!   interface.
//! * [`engine::rate`]: token-bucket admission control.
//! * [`engine::tracker`]: the pipeline tying the above together for a
//!   single packet.
#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[macro_use]
extern crate alloc;

pub mod api {
    pub use ctnat_api::*;
}

pub mod cfg;
pub mod ddi;
pub mod engine;
pub mod print;
pub mod provider;
