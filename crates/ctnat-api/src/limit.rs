// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Rate-limit parameters.
//!
//! The average rate is expressed as the mean interval between
//! admitted packets, in units of 1/[`LIMIT_SCALE`] seconds. A rate of
//! one packet per second is therefore `avg = 10_000`.

use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// Fixed-point scale of [`RateLimitCfg::avg`].
pub const LIMIT_SCALE: u32 = 10_000;

/// Burst used when a rule does not name one.
pub const DEFAULT_BURST: u32 = 5;

/// Average used when a rule does not name one: 3 per hour.
pub const DEFAULT_AVG: u32 = LIMIT_SCALE * 3600 / 3;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RateLimitCfg {
    /// Mean interval between packets, scaled by [`LIMIT_SCALE`].
    pub avg: u32,
    /// Packets admitted back-to-back before the average applies.
    pub burst: u32,
}

impl Default for RateLimitCfg {
    fn default() -> Self {
        Self { avg: DEFAULT_AVG, burst: DEFAULT_BURST }
    }
}

impl RateLimitCfg {
    pub const fn new(avg: u32, burst: u32) -> Self {
        Self { avg, burst }
    }

    /// `per_sec` packets per second, `burst` deep.
    pub fn per_second(per_sec: u32, burst: u32) -> Self {
        Self { avg: LIMIT_SCALE / per_sec.max(1), burst }
    }
}

/// Parse a rate of the form `N/sec`, `N/minute`, `N/hour` or `N/day`.
///
/// Any prefix of the unit name is accepted, as is a bare `N` meaning
/// per second. Returns the scaled average interval.
pub fn parse_rate(s: &str) -> Result<u32, String> {
    let (count, unit) = match s.split_once('/') {
        Some((c, u)) => (c, Some(u)),
        None => (s, None),
    };

    let count = count
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("bad rate {s}: {e}"))?;

    if count == 0 {
        return Err(format!("rate {s} must be non-zero"));
    }

    let mult: u32 = match unit.map(|u| u.trim()) {
        None => 1,
        Some(u) if !u.is_empty() && "second".starts_with(u) => 1,
        Some(u) if !u.is_empty() && "minute".starts_with(u) => 60,
        Some(u) if !u.is_empty() && "hour".starts_with(u) => 60 * 60,
        Some(u) if !u.is_empty() && "day".starts_with(u) => 24 * 60 * 60,
        Some(u) => return Err(format!("bad rate unit {u}")),
    };

    let r = (u64::from(LIMIT_SCALE) * u64::from(mult)) / u64::from(count);
    if r == 0 {
        return Err(format!("rate {s} too fast"));
    }

    u32::try_from(r).map_err(|_| format!("rate {s} too slow"))
}

impl FromStr for RateLimitCfg {
    type Err = String;

    /// Parse `RATE[,burst=N]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(',');
        let avg = parse_rate(parts.next().unwrap_or(""))?;
        let mut burst = DEFAULT_BURST;

        for p in parts {
            match p.trim().split_once('=') {
                Some(("burst", val)) => {
                    burst = val
                        .parse()
                        .map_err(|e| format!("bad burst {val}: {e}"))?;
                }
                _ => return Err(format!("unknown rate option: {p}")),
            }
        }

        Ok(Self { avg, burst })
    }
}

impl Display for RateLimitCfg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "avg={},burst={}", self.avg, self.burst)
    }
}
