// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! TOML configuration.
//!
//! ```toml
//! [tracker]
//! max_conns = 8192
//! buckets = 1024
//! idle_ttl_secs = 60
//!
//! [[interface]]
//! name = "eth0"
//! index = 2
//! addr = "203.0.113.1"
//!
//! [[rule]]
//! name = "outbound"
//! src = "10.0.0.0/8"
//! nat = "masquerade"
//! out = "eth0"
//! to = ":40000-40999"
//! limit = "100/sec"
//! burst = 20
//! ```
//!
//! Everything is checked when the configuration is built: bad ranges,
//! unknown interfaces, unrepresentable rate limits and duplicate rule
//! names are all rejected before any packet is seen.

use crate::ddi::time::Ttl;
use crate::engine::Error;
use crate::engine::Result;
use crate::engine::conntrack::DEF_BUCKETS;
use crate::engine::conntrack::DEF_MAX_CONNS;
use crate::engine::conntrack::RegistryCfg;
use crate::engine::masq::Masquerade;
use crate::engine::masq::StaticRoutes;
use crate::engine::rate::RateLimit;
use crate::engine::rule::NatAction;
use crate::engine::rule::Rule;
use crate::engine::rule::Ruleset;
use crate::engine::rule::TupleMatch;
use crate::engine::tracker::ConnTracker;
use crate::engine::tracker::TrackerCfg;
use crate::provider::LogRef;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::string::ToString;
use alloc::sync::Arc;
use alloc::vec::Vec;
use ctnat_api::DEFAULT_BURST;
use ctnat_api::IfIndex;
use ctnat_api::Ipv4Addr;
use ctnat_api::Ipv4Cidr;
use ctnat_api::NatRange;
use ctnat_api::Protocol;
use ctnat_api::RateLimitCfg;
use serde::Deserialize;
use serde::Serialize;

pub const DEF_IDLE_TTL_SECS: u64 = 60;

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerSection,
    #[serde(default, rename = "interface")]
    pub interfaces: Vec<InterfaceCfg>,
    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleCfg>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerSection {
    pub max_conns: u32,
    pub buckets: u32,
    pub idle_ttl_secs: u64,
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            max_conns: DEF_MAX_CONNS,
            buckets: DEF_BUCKETS,
            idle_ttl_secs: DEF_IDLE_TTL_SECS,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceCfg {
    pub name: String,
    pub index: u32,
    /// The interface's current source address. An interface without
    /// one exists but cannot be masqueraded out of until it gets one.
    pub addr: Option<Ipv4Addr>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NatKind {
    Snat,
    Dnat,
    Masquerade,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RuleCfg {
    pub name: String,
    pub src: Option<Ipv4Cidr>,
    pub dst: Option<Ipv4Cidr>,
    pub proto: Option<String>,
    pub dst_port: Option<u16>,
    pub nat: Option<NatKind>,
    /// A range in `IP[-IP][:ID[-ID]]` form.
    pub to: Option<String>,
    /// Egress interface name, for masquerade.
    pub out: Option<String>,
    /// A rate such as `10/sec`.
    pub limit: Option<String>,
    pub burst: Option<u32>,
}

/// Everything built from a [`Config`].
pub struct Setup {
    pub tracker: ConnTracker,
    pub routes: Arc<StaticRoutes>,
    pub rules: Ruleset,
    pub interfaces: BTreeMap<String, IfIndex>,
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::BadConfig(e.to_string()))
    }

    pub fn tracker_cfg(&self) -> Result<TrackerCfg> {
        let t = &self.tracker;
        if t.max_conns == 0 {
            return Err(Error::BadConfig("max_conns must be nonzero".into()));
        }
        if t.buckets == 0 {
            return Err(Error::BadConfig("buckets must be nonzero".into()));
        }

        Ok(TrackerCfg {
            registry: RegistryCfg {
                max_conns: t.max_conns,
                buckets: t.buckets,
            },
            idle_ttl: Ttl::new_seconds(t.idle_ttl_secs),
        })
    }

    fn interface_map(&self) -> Result<BTreeMap<String, IfIndex>> {
        let mut names = BTreeMap::new();
        let mut seen = Vec::new();

        for iface in &self.interfaces {
            let idx = IfIndex(iface.index);
            if seen.contains(&idx) {
                return Err(Error::BadConfig(format!(
                    "interface index {} used twice",
                    iface.index
                )));
            }
            seen.push(idx);

            if names.insert(iface.name.clone(), idx).is_some() {
                return Err(Error::BadConfig(format!(
                    "interface {} defined twice",
                    iface.name
                )));
            }
        }

        Ok(names)
    }

    /// Validate the configuration and build a tracker, its routing
    /// table and its rules.
    pub fn build(&self, log: LogRef) -> Result<Setup> {
        let cfg = self.tracker_cfg()?;
        let interfaces = self.interface_map()?;

        let routes = Arc::new(StaticRoutes::new());
        for iface in &self.interfaces {
            if let Some(addr) = iface.addr {
                routes.set(IfIndex(iface.index), addr);
            }
        }

        let rules = self
            .rules
            .iter()
            .map(|r| r.build(&interfaces))
            .collect::<Result<Vec<_>>>()?;
        let rules = Ruleset::new(rules)?;

        let tracker = ConnTracker::new(cfg, routes.clone(), log);
        Ok(Setup { tracker, routes, rules, interfaces })
    }
}

impl RuleCfg {
    fn bad(&self, msg: &str) -> Error {
        Error::BadConfig(format!("rule {}: {msg}", self.name))
    }

    fn matcher(&self) -> Result<TupleMatch> {
        let mut m = TupleMatch::any();

        if let Some(src) = self.src {
            m.tuple.src.ip = src.ip();
            m.mask.src_ip = src.to_mask();
        }

        if let Some(dst) = self.dst {
            m.tuple.dst.ip = dst.ip();
            m.mask.dst_ip = dst.to_mask();
        }

        if let Some(proto) = &self.proto {
            let proto: Protocol = proto.parse().map_err(|e: String| self.bad(&e))?;
            m.tuple.proto = proto;
            m.mask.proto = u8::MAX;
        }

        if let Some(port) = self.dst_port {
            if !matches!(m.tuple.proto, Protocol::TCP | Protocol::UDP)
                || m.mask.proto == 0
            {
                return Err(self.bad("dst_port needs proto tcp or udp"));
            }
            m.tuple.dst.id = port;
            m.mask.dst_id = u16::MAX;
        }

        Ok(m)
    }

    fn range(&self) -> Result<Option<NatRange>> {
        self.to
            .as_deref()
            .map(|s| s.parse::<NatRange>().map_err(|e| self.bad(&e)))
            .transpose()
    }

    fn action(
        &self,
        interfaces: &BTreeMap<String, IfIndex>,
    ) -> Result<Option<NatAction>> {
        let range = self.range()?;

        let Some(kind) = self.nat else {
            if range.is_some() || self.out.is_some() {
                return Err(self.bad("to/out given without nat"));
            }
            return Ok(None);
        };

        let action = match kind {
            NatKind::Snat | NatKind::Dnat => {
                if self.out.is_some() {
                    return Err(self.bad("out only applies to masquerade"));
                }
                let Some(range) = range else {
                    return Err(self.bad("snat/dnat needs a to range"));
                };
                if kind == NatKind::Snat {
                    NatAction::Snat(range)
                } else {
                    NatAction::Dnat(range)
                }
            }

            NatKind::Masquerade => {
                let Some(out) = &self.out else {
                    return Err(self.bad("masquerade needs an out interface"));
                };
                let Some(&egress) = interfaces.get(out) else {
                    return Err(self.bad(&format!("unknown interface {out}")));
                };
                let range = range.unwrap_or(NatRange::unconstrained());
                Masquerade::validate(&range)
                    .map_err(|e| self.bad(&e.to_string()))?;
                NatAction::Masquerade { egress, range }
            }
        };

        Ok(Some(action))
    }

    fn limit(&self) -> Result<Option<RateLimit>> {
        let Some(limit) = &self.limit else {
            if self.burst.is_some() {
                return Err(self.bad("burst given without limit"));
            }
            return Ok(None);
        };

        let avg = ctnat_api::parse_rate(limit).map_err(|e| self.bad(&e))?;
        let cfg = RateLimitCfg::new(avg, self.burst.unwrap_or(DEFAULT_BURST));
        RateLimit::new(cfg).map(Some)
    }

    fn build(&self, interfaces: &BTreeMap<String, IfIndex>) -> Result<Rule> {
        let mut rule = Rule::new(&self.name, self.matcher()?);
        if let Some(action) = self.action(interfaces)? {
            rule = rule.nat(action);
        }
        if let Some(limit) = self.limit()? {
            rule = rule.limit(limit);
        }
        Ok(rule)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::provider::null_log;
    use ctnat_api::Tuple;

    const GOOD: &str = r#"
        [tracker]
        max_conns = 16
        buckets = 8

        [[interface]]
        name = "eth0"
        index = 2
        addr = "203.0.113.1"

        [[rule]]
        name = "web"
        proto = "tcp"
        dst_port = 80
        nat = "dnat"
        to = "10.1.1.1"

        [[rule]]
        name = "out"
        src = "10.0.0.0/8"
        nat = "masquerade"
        out = "eth0"
        limit = "10/sec"
        burst = 20
    "#;

    #[test]
    fn build_good() {
        let cfg = Config::from_toml(GOOD).unwrap();
        assert_eq!(cfg.tracker.idle_ttl_secs, DEF_IDLE_TTL_SECS);
        let setup = cfg.build(null_log()).unwrap();
        assert_eq!(setup.rules.len(), 2);
        assert_eq!(setup.tracker.registry().max_conns(), 16);
        assert_eq!(setup.interfaces["eth0"], IfIndex(2));

        let web = Tuple::new_ports(
            Protocol::TCP,
            "192.0.2.9".parse().unwrap(),
            5555,
            "192.0.2.1".parse().unwrap(),
            80,
        );
        assert_eq!(setup.rules.select(&web).unwrap().name, "web");

        let mut out = web;
        out.src.ip = "10.2.3.4".parse().unwrap();
        out.dst.id = 443;
        let rule = setup.rules.select(&out).unwrap();
        assert_eq!(rule.name, "out");
        let limit = rule.limit.as_ref().unwrap();
        assert_eq!(limit.cfg(), RateLimitCfg::new(1_000, 20));
    }

    #[test]
    fn empty_is_default() {
        let cfg = Config::from_toml("").unwrap();
        assert_eq!(cfg, Config::default());
        assert!(cfg.build(null_log()).unwrap().rules.is_empty());
    }

    fn build_err(toml: &str) -> Error {
        match Config::from_toml(toml).and_then(|c| c.build(null_log())) {
            Ok(_) => panic!("config accepted:\n{toml}"),
            Err(e) => e,
        }
    }

    #[test]
    fn rejects() {
        assert!(matches!(
            build_err("[tracker]\nmax_conns = 0\n"),
            Error::BadConfig(_)
        ));
        assert!(matches!(build_err("[bogus]\n"), Error::BadConfig(_)));
        assert!(matches!(
            build_err(
                "[[rule]]\nname = \"m\"\nnat = \"masquerade\"\nout = \"eth9\"\n"
            ),
            Error::BadConfig(_)
        ));
        assert!(matches!(
            build_err(
                "[[interface]]\nname = \"eth0\"\nindex = 2\n\
                 [[rule]]\nname = \"m\"\nnat = \"masquerade\"\n\
                 out = \"eth0\"\nto = \"198.51.100.1\"\n"
            ),
            Error::BadConfig(_)
        ));
        assert!(matches!(
            build_err("[[rule]]\nname = \"s\"\nnat = \"snat\"\n"),
            Error::BadConfig(_)
        ));
        assert!(matches!(
            build_err(
                "[[rule]]\nname = \"s\"\nnat = \"snat\"\n\
                 to = \"203.0.113.9-203.0.113.1\"\n"
            ),
            Error::BadConfig(_)
        ));
        assert_eq!(
            build_err("[[rule]]\nname = \"l\"\nlimit = \"1/sec\"\nburst = 0\n"),
            Error::ConfigOverflow { avg: 10_000, burst: 0 }
        );
        assert_eq!(
            build_err("[[rule]]\nname = \"a\"\n[[rule]]\nname = \"a\"\n"),
            Error::DuplicateRuleWiring("a".into())
        );
        assert!(matches!(
            build_err("[[rule]]\nname = \"p\"\ndst_port = 80\n"),
            Error::BadConfig(_)
        ));
    }
}
