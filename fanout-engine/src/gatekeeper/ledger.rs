//! Fixed-window rate counters and budget ledger for one provider.
//!
//! Windows reset on fixed UTC boundaries (top of the minute, hour, day,
//! and the first of the month), not on a sliding basis. A burst that
//! straddles a boundary can therefore see up to twice the quota across
//! the two windows. Every operation is O(1).

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BudgetTier, DenialReason, RateTier};

use super::ProviderLimits;

/// Indices of the fixed windows containing one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WindowIds {
    minute: i64,
    hour: i64,
    day: i64,
    month: i64,
}

impl WindowIds {
    pub(crate) fn at(now: DateTime<Utc>) -> Self {
        let secs = now.timestamp();
        Self {
            minute: secs.div_euclid(60),
            hour: secs.div_euclid(3_600),
            day: secs.div_euclid(86_400),
            month: i64::from(now.year()) * 12 + i64::from(now.month0()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counter {
    window: i64,
    count: u32,
}

impl Counter {
    fn current(&self, window: i64) -> u32 {
        if self.window == window {
            self.count
        } else {
            0
        }
    }

    fn add(&mut self, window: i64) {
        if self.window != window {
            self.window = window;
            self.count = 0;
        }
        self.count = self.count.saturating_add(1);
    }

    fn remove(&mut self, window: i64) {
        if self.window == window {
            self.count = self.count.saturating_sub(1);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Spend {
    window: i64,
    total: f64,
}

impl Spend {
    fn current(&self, window: i64) -> f64 {
        if self.window == window {
            self.total
        } else {
            0.0
        }
    }

    fn add(&mut self, window: i64, amount: f64) {
        if self.window != window {
            self.window = window;
            self.total = 0.0;
        }
        self.total = (self.total + amount).max(0.0);
    }

    fn adjust(&mut self, window: i64, delta: f64) {
        if self.window == window {
            self.total = (self.total + delta).max(0.0);
        }
    }
}

/// Usage of one rate window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowUsage {
    pub used: u32,
    pub limit: Option<u32>,
    pub resets_at: DateTime<Utc>,
}

impl WindowUsage {
    /// Calls left in this window, `None` when unlimited.
    pub fn remaining(&self) -> Option<u32> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }
}

/// Spend against one budget tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendUsage {
    pub spent: f64,
    pub limit: Option<f64>,
    pub resets_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateStatus {
    pub minute: WindowUsage,
    pub hour: WindowUsage,
    pub day: WindowUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub per_query_limit: Option<f64>,
    pub day: SpendUsage,
    pub month: SpendUsage,
}

/// Rate counters and spend totals for one provider.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    minute: Counter,
    hour: Counter,
    day: Counter,
    spend_day: Spend,
    spend_month: Spend,
}

impl Ledger {
    /// Check whether one more call costing `cost` fits every window.
    pub(crate) fn check(
        &self,
        limits: &ProviderLimits,
        ids: WindowIds,
        cost: f64,
    ) -> Result<(), DenialReason> {
        let rate_checks = [
            (RateTier::Minute, limits.per_minute, self.minute.current(ids.minute)),
            (RateTier::Hour, limits.per_hour, self.hour.current(ids.hour)),
            (RateTier::Day, limits.per_day, self.day.current(ids.day)),
        ];
        for (tier, limit, used) in rate_checks {
            if limit.is_some_and(|limit| used >= limit) {
                return Err(DenialReason::RateLimited(tier));
            }
        }

        if limits.max_cost_per_query.is_some_and(|max| cost > max) {
            return Err(DenialReason::BudgetExceeded(BudgetTier::Query));
        }
        let budget_checks = [
            (BudgetTier::Day, limits.daily_budget, self.spend_day.current(ids.day)),
            (BudgetTier::Month, limits.monthly_budget, self.spend_month.current(ids.month)),
        ];
        for (tier, limit, spent) in budget_checks {
            if limit.is_some_and(|limit| spent + cost > limit + f64::EPSILON) {
                return Err(DenialReason::BudgetExceeded(tier));
            }
        }
        Ok(())
    }

    pub(crate) fn reserve(&mut self, ids: WindowIds, cost: f64) {
        self.minute.add(ids.minute);
        self.hour.add(ids.hour);
        self.day.add(ids.day);
        self.spend_day.add(ids.day, cost);
        self.spend_month.add(ids.month, cost);
    }

    /// Undo a reservation made in `ids`. Windows that have since rolled
    /// over are left alone.
    pub(crate) fn refund(&mut self, ids: WindowIds, cost: f64) {
        self.minute.remove(ids.minute);
        self.hour.remove(ids.hour);
        self.day.remove(ids.day);
        self.spend_day.adjust(ids.day, -cost);
        self.spend_month.adjust(ids.month, -cost);
    }

    /// Correct the spend of a committed call once its real cost is known.
    pub(crate) fn settle(&mut self, ids: WindowIds, delta: f64) {
        self.spend_day.adjust(ids.day, delta);
        self.spend_month.adjust(ids.month, delta);
    }

    pub(crate) fn rate_status(&self, limits: &ProviderLimits, now: DateTime<Utc>) -> RateStatus {
        let ids = WindowIds::at(now);
        let secs = now.timestamp();
        RateStatus {
            minute: WindowUsage {
                used: self.minute.current(ids.minute),
                limit: limits.per_minute,
                resets_at: boundary(secs, 60),
            },
            hour: WindowUsage {
                used: self.hour.current(ids.hour),
                limit: limits.per_hour,
                resets_at: boundary(secs, 3_600),
            },
            day: WindowUsage {
                used: self.day.current(ids.day),
                limit: limits.per_day,
                resets_at: boundary(secs, 86_400),
            },
        }
    }

    pub(crate) fn budget_status(&self, limits: &ProviderLimits, now: DateTime<Utc>) -> BudgetStatus {
        let ids = WindowIds::at(now);
        BudgetStatus {
            per_query_limit: limits.max_cost_per_query,
            day: SpendUsage {
                spent: self.spend_day.current(ids.day),
                limit: limits.daily_budget,
                resets_at: boundary(now.timestamp(), 86_400),
            },
            month: SpendUsage {
                spent: self.spend_month.current(ids.month),
                limit: limits.monthly_budget,
                resets_at: next_month(now),
            },
        }
    }
}

fn boundary(secs: i64, period: i64) -> DateTime<Utc> {
    let next = (secs.div_euclid(period) + 1) * period;
    Utc.timestamp_opt(next, 0).single().unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn next_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
