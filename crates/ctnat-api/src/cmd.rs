// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use super::IfIndex;
use super::tuple::Tuple;
use alloc::vec::Vec;
use serde::Deserialize;
use serde::Serialize;

/// A snapshot of one tracked connection, for diagnostics.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConnDump {
    pub id: u64,
    pub original: Tuple,
    pub reply: Tuple,
    pub snat: bool,
    pub dnat: bool,
    pub masquerade: bool,
    pub ifindex: Option<IfIndex>,
    pub hits: u64,
    /// Milliseconds since the connection last saw a packet.
    pub idle_ms: u64,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DumpConnsResp {
    pub conns: Vec<ConnDump>,
}
