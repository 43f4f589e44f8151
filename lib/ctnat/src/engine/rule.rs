// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Rules: what to do with the first packet of a flow.
//!
//! A rule pairs a masked tuple match with an optional translation and
//! an optional rate limit. Selection is first match in order.

use super::Error;
use super::Result;
use super::rate::RateLimit;
use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use ctnat_api::IfIndex;
use ctnat_api::Ipv4Addr;
use ctnat_api::ManipType;
use ctnat_api::NatRange;
use ctnat_api::Tuple;
use ctnat_api::TupleMask;

/// The translation a rule applies when it creates a connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NatAction {
    Snat(NatRange),
    Dnat(NatRange),
    Masquerade { egress: IfIndex, range: NatRange },
}

impl NatAction {
    pub fn manip(&self) -> ManipType {
        match self {
            Self::Snat(_) | Self::Masquerade { .. } => ManipType::Src,
            Self::Dnat(_) => ManipType::Dst,
        }
    }
}

impl fmt::Display for NatAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Snat(r) => write!(f, "SNAT to {r}"),
            Self::Dnat(r) => write!(f, "DNAT to {r}"),
            Self::Masquerade { egress, range } => {
                write!(f, "MASQUERADE out {egress} {range}")
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TupleMatch {
    pub tuple: Tuple,
    pub mask: TupleMask,
}

impl TupleMatch {
    /// Match every tuple.
    pub fn any() -> Self {
        Self { tuple: Tuple::default(), mask: TupleMask::ANY }
    }

    pub fn matches(&self, tuple: &Tuple) -> bool {
        self.tuple.mask_matches(tuple, &self.mask)
    }
}

impl fmt::Display for TupleMatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.mask == TupleMask::ANY {
            return write!(f, "any");
        }

        let mut sep = "";
        if self.mask.proto != 0 {
            write!(f, "proto={}", self.tuple.proto)?;
            sep = " ";
        }
        if self.mask.src_ip != Ipv4Addr::ANY_ADDR {
            write!(f, "{sep}src={}/{}", self.tuple.src.ip, self.mask.src_ip)?;
            sep = " ";
        }
        if self.mask.dst_ip != Ipv4Addr::ANY_ADDR {
            write!(f, "{sep}dst={}/{}", self.tuple.dst.ip, self.mask.dst_ip)?;
            sep = " ";
        }
        if self.mask.dst_id != 0 {
            write!(f, "{sep}dport={}", self.tuple.dst.id)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Rule {
    pub name: String,
    pub matcher: TupleMatch,
    pub nat: Option<NatAction>,
    pub limit: Option<Arc<RateLimit>>,
}

impl Rule {
    pub fn new(name: &str, matcher: TupleMatch) -> Self {
        Self { name: name.into(), matcher, nat: None, limit: None }
    }

    pub fn nat(mut self, action: NatAction) -> Self {
        self.nat = Some(action);
        self
    }

    pub fn limit(mut self, limit: RateLimit) -> Self {
        self.limit = Some(Arc::new(limit));
        self
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(nat) = &self.nat {
            write!(f, " {nat}")?;
        }
        if let Some(limit) = &self.limit {
            write!(f, " limit {}", limit.cfg())?;
        }
        Ok(())
    }
}

/// An ordered set of uniquely named rules.
#[derive(Clone, Debug, Default)]
pub struct Ruleset {
    rules: Vec<Rule>,
}

impl Ruleset {
    pub fn new(rules: Vec<Rule>) -> Result<Self> {
        let mut names = BTreeSet::new();
        for rule in &rules {
            if !names.insert(rule.name.as_str()) {
                return Err(Error::DuplicateRuleWiring(rule.name.clone()));
            }
        }

        Ok(Self { rules })
    }

    /// The first rule matching `tuple`.
    pub fn select(&self, tuple: &Tuple) -> Option<&Rule> {
        self.rules.iter().find(|r| r.matcher.matches(tuple))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }
}
