// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The per-packet pipeline.
//!
//! Each packet is parsed, checked against its rule's rate limit, and
//! matched to a connection. The first packet of a flow creates the
//! connection, establishing any translation its rule asks for. Every
//! packet of a translated connection is then rewritten in place.

use super::Error;
use super::Result;
use super::conntrack::ConnRef;
use super::conntrack::ConnRegistry;
use super::conntrack::DEF_IDLE_TTL;
use super::conntrack::NewConn;
use super::conntrack::RegistryCfg;
use super::conntrack::TupleInUse;
use super::masq::IfEvent;
use super::masq::Masquerade;
use super::masq::RouteProvider;
use super::nat::NatEngine;
use super::packet::PacketView;
use super::rule::NatAction;
use super::rule::Rule;
use crate::ddi::time::Moment;
use crate::ddi::time::Ttl;
use crate::provider::LogLevel;
use crate::provider::LogRef;
use alloc::sync::Arc;
use core::fmt;
use ctnat_api::Direction;
use ctnat_api::DumpConnsResp;
use ctnat_api::ManipType;
use ctnat_api::Tuple;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TrackerCfg {
    pub registry: RegistryCfg,
    pub idle_ttl: Ttl,
}

impl Default for TrackerCfg {
    fn default() -> Self {
        Self { registry: RegistryCfg::default(), idle_ttl: DEF_IDLE_TTL }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DropReason {
    RateLimited,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate limited"),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Verdict {
    /// The packet belongs to `conn`, travelling in `dir`, and has been
    /// translated if the connection calls for it. `new` is set when
    /// this packet created the connection.
    Accept { conn: ConnRef, dir: Direction, new: bool },
    Drop(DropReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept { .. })
    }
}

pub struct ConnTracker {
    registry: Arc<ConnRegistry>,
    nat: Arc<NatEngine>,
    masq: Masquerade,
    ttl: Ttl,
    log: LogRef,
}

impl ConnTracker {
    pub fn new(
        cfg: TrackerCfg,
        routes: Arc<dyn RouteProvider>,
        log: LogRef,
    ) -> Self {
        let registry = Arc::new(ConnRegistry::new(cfg.registry));
        let nat = Arc::new(NatEngine::new(log.clone()));
        let masq = Masquerade::new(
            nat.clone(),
            routes,
            registry.clone(),
            log.clone(),
        );

        Self { registry, nat, masq, ttl: cfg.idle_ttl, log }
    }

    pub fn registry(&self) -> &Arc<ConnRegistry> {
        &self.registry
    }

    pub fn nat(&self) -> &NatEngine {
        &self.nat
    }

    pub fn masq(&self) -> &Masquerade {
        &self.masq
    }

    pub fn idle_ttl(&self) -> Ttl {
        self.ttl
    }

    pub fn process(
        &self,
        buf: &mut [u8],
        rule: Option<&Rule>,
    ) -> Result<Verdict> {
        self.process_at(buf, rule, Moment::now())
    }

    /// Run one IPv4 packet through the pipeline at `now`.
    ///
    /// `rule` is the rule the packet matched, if any. Its rate limit
    /// applies to every packet; its translation is established only
    /// when the packet creates a connection.
    pub fn process_at(
        &self,
        buf: &mut [u8],
        rule: Option<&Rule>,
        now: Moment,
    ) -> Result<Verdict> {
        let mut pkt = PacketView::parse(buf)?;

        if let Some(limit) = rule.and_then(|r| r.limit.as_ref()) {
            if !limit.check_at(now) {
                return Ok(Verdict::Drop(DropReason::RateLimited));
            }
        }

        let tuple = pkt.tuple();
        let (conn, dir, new) = self.lookup_or_create(&tuple, rule, now)?;
        conn.hit(now);
        self.nat.translate(&conn, dir, &mut pkt)?;
        Ok(Verdict::Accept { conn, dir, new })
    }

    /// Find the connection for `tuple`, creating it if there is none.
    ///
    /// Losing a creation race to another thread shows up as
    /// `DuplicateTuple`; the winner's connection is then found by
    /// looking up again. Creation is attempted at most twice.
    fn lookup_or_create(
        &self,
        tuple: &Tuple,
        rule: Option<&Rule>,
        now: Moment,
    ) -> Result<(ConnRef, Direction, bool)> {
        let mut last_err = Error::DuplicateTuple(*tuple);

        for _ in 0..2 {
            if let Some((conn, dir)) = self.registry.lookup(tuple) {
                return Ok((conn, dir, false));
            }

            match self.create(tuple, rule, now) {
                Ok(conn) => return Ok((conn, Direction::Original, true)),
                Err(e @ Error::DuplicateTuple(_)) => last_err = e,
                Err(e) => return Err(e),
            }
        }

        Err(last_err)
    }

    fn create(
        &self,
        tuple: &Tuple,
        rule: Option<&Rule>,
        now: Moment,
    ) -> Result<ConnRef> {
        let action = rule.and_then(|r| r.nat);
        let res = self.registry.create_with(*tuple, now, |new, in_use| {
            self.bind(new, action, in_use)
        });

        if let Err(e @ Error::MaxCapacity(_)) = &res {
            self.log.log(LogLevel::Warn, &format!("{tuple}: {e}"));
        }

        res
    }

    fn bind(
        &self,
        new: &mut NewConn,
        action: Option<NatAction>,
        in_use: &dyn TupleInUse,
    ) -> Result<()> {
        match action {
            None => Ok(()),
            Some(NatAction::Snat(range)) => {
                self.nat.setup(new, &range, ManipType::Src, in_use)
            }
            Some(NatAction::Dnat(range)) => {
                self.nat.setup(new, &range, ManipType::Dst, in_use)
            }
            Some(NatAction::Masquerade { egress, range }) => {
                self.masq.apply(new, egress, &range, in_use)
            }
        }
    }

    /// Remove connections idle for longer than the configured TTL.
    pub fn expire(&self, now: Moment) -> usize {
        let n = self.registry.expire_idle(now, self.ttl);
        if n > 0 {
            self.log.log(LogLevel::Note, &format!("expired {n} connections"));
        }
        n
    }

    pub fn handle_event(&self, ev: IfEvent) -> usize {
        self.masq.handle_event(ev)
    }

    pub fn dump(&self, now: Moment) -> DumpConnsResp {
        self.registry.dump(now)
    }
}
