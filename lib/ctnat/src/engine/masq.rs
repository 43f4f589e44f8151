// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Masquerading: source NAT to whatever address the egress interface
//! currently has.
//!
//! The translated address is not configured. It is looked up from the
//! routing collaborator when a connection is created, and the
//! connection remembers which interface it came from. When that
//! interface goes away or is re-addressed, every connection bound to
//! it is evicted.

use super::Error;
use super::Result;
use super::conntrack::ConnRegistry;
use super::conntrack::ConnStatus;
use super::conntrack::NewConn;
use super::conntrack::TupleInUse;
use super::nat::NatEngine;
use crate::ddi::sync::KRwLock;
use crate::provider::LogLevel;
use crate::provider::LogRef;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;
use ctnat_api::IfIndex;
use ctnat_api::Ipv4Addr;
use ctnat_api::ManipType;
use ctnat_api::NatRange;

/// The routing collaborator.
pub trait RouteProvider: Send + Sync {
    /// The source address the local stack would use for traffic
    /// leaving through `ifindex`, if any.
    fn current_source_address(&self, ifindex: IfIndex) -> Option<Ipv4Addr>;
}

/// A routing collaborator backed by a fixed table, updated by hand.
#[derive(Default)]
pub struct StaticRoutes {
    routes: KRwLock<BTreeMap<IfIndex, Ipv4Addr>>,
}

impl StaticRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address of `ifindex`, returning the previous one.
    pub fn set(&self, ifindex: IfIndex, addr: Ipv4Addr) -> Option<Ipv4Addr> {
        self.routes.write().insert(ifindex, addr)
    }

    pub fn remove(&self, ifindex: IfIndex) -> Option<Ipv4Addr> {
        self.routes.write().remove(&ifindex)
    }
}

impl RouteProvider for StaticRoutes {
    fn current_source_address(&self, ifindex: IfIndex) -> Option<Ipv4Addr> {
        self.routes.read().get(&ifindex).copied()
    }
}

/// Interface lifecycle events.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IfEvent {
    Up(IfIndex),
    Down(IfIndex),
    AddrChanged(IfIndex),
}

impl fmt::Display for IfEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Up(i) => write!(f, "{i} up"),
            Self::Down(i) => write!(f, "{i} down"),
            Self::AddrChanged(i) => write!(f, "{i} address changed"),
        }
    }
}

pub struct Masquerade {
    engine: Arc<NatEngine>,
    routes: Arc<dyn RouteProvider>,
    registry: Arc<ConnRegistry>,
    log: LogRef,
}

impl Masquerade {
    pub fn new(
        engine: Arc<NatEngine>,
        routes: Arc<dyn RouteProvider>,
        registry: Arc<ConnRegistry>,
        log: LogRef,
    ) -> Self {
        Self { engine, routes, registry, log }
    }

    /// Check a masquerade rule's range. The address always comes from
    /// the interface, so the range may only name ports.
    pub fn validate(range: &NatRange) -> Result<()> {
        if range.maps_ips() {
            return Err(Error::BadConfig(format!(
                "masquerade range {range} may not name addresses"
            )));
        }

        range.validate().map_err(Error::BadConfig)
    }

    /// Source-NAT `conn` to the current address of `egress`.
    ///
    /// The port part of `range` is honored. On success the connection
    /// is marked `MASQUERADE` and bound to `egress`.
    pub fn apply(
        &self,
        conn: &mut NewConn,
        egress: IfIndex,
        range: &NatRange,
        in_use: &dyn TupleInUse,
    ) -> Result<()> {
        let Some(addr) = self.routes.current_source_address(egress) else {
            self.log.log(
                LogLevel::Warn,
                &format!("masquerade: no source address on {egress}"),
            );
            return Err(Error::RouteLookupFailed(egress));
        };

        let mut pinned = NatRange::addr(addr);
        if range.proto_specified() {
            pinned = pinned.with_ids(range.min.id, range.max.id);
        }

        self.engine.setup(conn, &pinned, ManipType::Src, in_use)?;
        conn.set_ifindex(egress);
        conn.add_status(ConnStatus::MASQUERADE);
        Ok(())
    }

    /// Evict every connection bound to `ifindex`, returning how many.
    pub fn on_interface_down_or_changed(&self, ifindex: IfIndex) -> usize {
        let n = self
            .registry
            .evict_where(|c| c.nat_meta().ifindex == Some(ifindex));
        if n > 0 {
            self.log.log(
                LogLevel::Note,
                &format!("masquerade: evicted {n} connections on {ifindex}"),
            );
        }
        n
    }

    pub fn handle_event(&self, ev: IfEvent) -> usize {
        match ev {
            IfEvent::Up(_) => 0,
            IfEvent::Down(i) | IfEvent::AddrChanged(i) => {
                self.on_interface_down_or_changed(i)
            }
        }
    }
}
