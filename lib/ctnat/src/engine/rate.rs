// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Token-bucket rate limiting.
//!
//! Credit accrues at a fixed number of credits per millisecond tick,
//! up to a cap sized for the burst. Each admitted packet costs the
//! credit equivalent of the average interval. The credit unit is
//! chosen so that rates from one packet per day up to one per tick
//! fit in 32 bits.

use super::Error;
use super::Result;
use crate::ddi::sync::KSpinLock;
use crate::ddi::time::MILLIS;
use crate::ddi::time::Moment;
use ctnat_api::LIMIT_SCALE;
use ctnat_api::RateLimitCfg;

/// Ticks per second.
pub const HZ: u64 = MILLIS;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// The largest power of two not exceeding `x`, for `x > 0`.
const fn pow2_below32(mut x: u32) -> u32 {
    x |= x >> 1;
    x |= x >> 2;
    x |= x >> 4;
    x |= x >> 8;
    x |= x >> 16;
    (x >> 1) + 1
}

/// Credits earned per tick: as many as possible while a full day of
/// ticks still fits in a `u32`.
pub const CREDITS_PER_TICK: u32 =
    pow2_below32((u32::MAX as u64 / (HZ * SECS_PER_DAY)) as u32);

/// Convert an interval scaled by [`LIMIT_SCALE`] into credits.
///
/// Large values are divided first so the product cannot overflow, at
/// the cost of precision nobody can observe at that scale.
pub fn user2credits(user: u32) -> u64 {
    let user = u64::from(user);
    let per_sec = HZ * u64::from(CREDITS_PER_TICK);
    if user > u64::from(u32::MAX) / per_sec {
        (user / u64::from(LIMIT_SCALE)) * per_sec
    } else {
        (user * per_sec) / u64::from(LIMIT_SCALE)
    }
}

/// A snapshot of a limiter's bucket.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RateState {
    pub credit: u64,
    pub credit_cap: u64,
    pub cost: u64,
    pub last_update: Moment,
}

/// A token bucket shared by every packet matching one rule.
///
/// The whole of [`RateLimit::check_at`] is one critical section under
/// a spin lock, so concurrent callers can never spend the same credit
/// twice.
#[derive(Debug)]
pub struct RateLimit {
    cfg: RateLimitCfg,
    state: KSpinLock<RateState>,
}

impl RateLimit {
    pub fn new(cfg: RateLimitCfg) -> Result<Self> {
        Self::new_at(cfg, Moment::now())
    }

    /// Create a limiter with a full bucket as of `now`.
    ///
    /// # Errors
    ///
    /// [`Error::ConfigOverflow`] if `burst` is zero, or if the burst
    /// credit cannot be represented.
    pub fn new_at(cfg: RateLimitCfg, now: Moment) -> Result<Self> {
        let overflow =
            Error::ConfigOverflow { avg: cfg.avg, burst: cfg.burst };
        if cfg.burst == 0 || cfg.avg == 0 {
            return Err(overflow);
        }

        let Some(burst_interval) = cfg.avg.checked_mul(cfg.burst) else {
            return Err(overflow);
        };

        let credit_cap = user2credits(burst_interval);
        let cost = user2credits(cfg.avg);
        if credit_cap < cost {
            return Err(overflow);
        }

        Ok(Self {
            cfg,
            state: KSpinLock::new(RateState {
                credit: credit_cap,
                credit_cap,
                cost,
                last_update: now,
            }),
        })
    }

    pub fn cfg(&self) -> RateLimitCfg {
        self.cfg
    }

    /// Admit or reject one packet now.
    pub fn check(&self) -> bool {
        self.check_at(Moment::now())
    }

    /// Admit or reject one packet at `now`.
    ///
    /// Credit accrues for the time since the last call and is capped.
    /// If enough remains, the cost is deducted and the packet is
    /// admitted; otherwise nothing is deducted.
    pub fn check_at(&self, now: Moment) -> bool {
        let mut st = self.state.lock();
        let elapsed = now.delta_as_millis(st.last_update);
        if now > st.last_update {
            st.last_update = now;
        }

        let earned = elapsed.saturating_mul(u64::from(CREDITS_PER_TICK));
        st.credit = st.credit.saturating_add(earned).min(st.credit_cap);

        if st.credit >= st.cost {
            st.credit -= st.cost;
            true
        } else {
            false
        }
    }

    pub fn state(&self) -> RateState {
        *self.state.lock()
    }
}
