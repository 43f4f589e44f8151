// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! ctnat administration library.
//!
//! Loads a configuration and replays captured traffic through the
//! engine it describes, offline.

use core::time::Duration;
use ctnat::api::DumpConnsResp;
use ctnat::cfg::Config;
use ctnat::cfg::Setup;
use ctnat::ddi::time::Moment;
use ctnat::engine::masq::IfEvent;
use ctnat::engine::packet::PacketView;
use ctnat::engine::rule::Ruleset;
use ctnat::engine::tracker::Verdict;
use ctnat::provider::LogRef;
use pcap_parser::Linktype;
use pcap_parser::pcap;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

const ETHER_HDR_SZ: usize = 14;
const ETHER_TYPE_IPV4: [u8; 2] = [0x08, 0x00];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Engine(#[from] ctnat::engine::Error),

    #[error("bad capture: {0}")]
    Pcap(String),

    #[error("unsupported link type {0}")]
    Linktype(i32),

    #[error("unknown interface {0}")]
    UnknownInterface(String),
}

/// One packet read from a capture.
#[derive(Clone, Debug)]
pub struct CapturedPkt {
    /// Time since the first packet in the capture.
    pub offset: Duration,
    /// The packet from its IPv4 header on.
    pub data: Vec<u8>,
}

/// Read a legacy pcap file of raw IPv4 or Ethernet frames.
///
/// Non-IPv4 Ethernet frames are skipped.
pub fn read_pcap(mut bytes: &[u8]) -> Result<Vec<CapturedPkt>, Error> {
    let (rest, hdr) = pcap::parse_pcap_header(bytes)
        .map_err(|e| Error::Pcap(format!("header: {e:?}")))?;
    bytes = rest;

    let ether = match hdr.network {
        Linktype::RAW | Linktype::IPV4 => false,
        Linktype::ETHERNET => true,
        other => return Err(Error::Linktype(other.0)),
    };

    let mut first = None;
    let mut pkts = vec![];
    while !bytes.is_empty() {
        let res = if hdr.is_bigendian() {
            pcap::parse_pcap_frame_be(bytes)
        } else {
            pcap::parse_pcap_frame(bytes)
        };
        let (rest, block) =
            res.map_err(|e| Error::Pcap(format!("frame: {e:?}")))?;
        bytes = rest;

        let ts = Duration::from_secs(u64::from(block.ts_sec))
            + Duration::from_micros(u64::from(block.ts_usec));
        let first = *first.get_or_insert(ts);

        let data = if ether {
            if block.data.len() < ETHER_HDR_SZ
                || block.data[12..ETHER_HDR_SZ] != ETHER_TYPE_IPV4
            {
                continue;
            }
            &block.data[ETHER_HDR_SZ..]
        } else {
            block.data
        };

        pkts.push(CapturedPkt {
            offset: ts.saturating_sub(first),
            data: data.to_vec(),
        });
    }

    Ok(pkts)
}

/// What happened to a replayed capture.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReplayStats {
    pub accepted: u64,
    pub new_conns: u64,
    pub dropped: u64,
    /// Failures, keyed by error message.
    pub failed: BTreeMap<String, u64>,
}

impl fmt::Display for ReplayStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "accepted: {} (new connections: {})",
            self.accepted, self.new_conns
        )?;
        writeln!(f, "dropped:  {}", self.dropped)?;
        for (err, n) in &self.failed {
            writeln!(f, "failed:   {n} x {err}")?;
        }
        Ok(())
    }
}

/// An engine built from a configuration file.
pub struct CtnatAdm {
    setup: Setup,
    start: Moment,
}

impl CtnatAdm {
    pub fn open(path: &Path, log: LogRef) -> Result<Self, Error> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml(&s, log)
    }

    pub fn from_toml(s: &str, log: LogRef) -> Result<Self, Error> {
        let setup = Config::from_toml(s)?.build(log)?;
        Ok(Self { setup, start: Moment::now() })
    }

    pub fn rules(&self) -> &Ruleset {
        &self.setup.rules
    }

    /// Run `pkts` through the engine in order, on the capture's own
    /// clock. Each packet is matched against the rules first.
    pub fn replay(&self, pkts: &mut [CapturedPkt]) -> ReplayStats {
        let mut stats = ReplayStats::default();

        for pkt in pkts {
            let now = self.start + pkt.offset;
            let res = PacketView::parse(&mut pkt.data)
                .map(|v| v.tuple())
                .map_err(ctnat::engine::Error::from)
                .and_then(|tuple| {
                    let rule = self.setup.rules.select(&tuple);
                    self.setup.tracker.process_at(&mut pkt.data, rule, now)
                });

            match res {
                Ok(Verdict::Accept { new, .. }) => {
                    stats.accepted += 1;
                    stats.new_conns += u64::from(new);
                }
                Ok(Verdict::Drop(_)) => stats.dropped += 1,
                Err(e) => {
                    *stats.failed.entry(e.to_string()).or_default() += 1;
                }
            }
        }

        stats
    }

    /// Take the named interface down, returning how many connections
    /// were evicted.
    pub fn interface_down(&self, name: &str) -> Result<usize, Error> {
        let Some(&ifindex) = self.setup.interfaces.get(name) else {
            return Err(Error::UnknownInterface(name.to_string()));
        };
        self.setup.routes.remove(ifindex);
        Ok(self.setup.tracker.handle_event(IfEvent::Down(ifindex)))
    }

    pub fn dump(&self) -> DumpConnsResp {
        self.setup.tracker.dump(Moment::now())
    }
}
