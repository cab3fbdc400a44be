//! Spending limit records and calendar periods.
//!
//! These are plain data types; every mutation of a persisted limit goes
//! through [`LimitLedger`](crate::ledger::LimitLedger).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::{AutoPayError, Result};

/// Calendar period after which a spending counter resets.
///
/// Boundaries are evaluated in UTC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpendingPeriod {
    /// Resets at each new calendar day.
    #[default]
    Daily,
    /// Resets at each new ISO week.
    Weekly,
    /// Resets at each new calendar month.
    Monthly,
}

impl SpendingPeriod {
    /// Get the period name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Returns true if `now` lies in a later period than `last_reset`.
    ///
    /// A clock that moved backwards never triggers a reset.
    pub fn has_rolled_over(&self, last_reset: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            Self::Daily => now.date_naive() > last_reset.date_naive(),
            Self::Weekly => {
                let (a, b) = (last_reset.iso_week(), now.iso_week());
                (b.year(), b.week()) > (a.year(), a.week())
            }
            Self::Monthly => (now.year(), now.month()) > (last_reset.year(), last_reset.month()),
        }
    }
}

impl fmt::Display for SpendingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpendingPeriod {
    type Err = AutoPayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(Self::Daily),
            "weekly" | "week" => Ok(Self::Weekly),
            "monthly" | "month" => Ok(Self::Monthly),
            other => Err(AutoPayError::validation(
                "period",
                format!("unknown period '{}', expected daily, weekly or monthly", other),
            )),
        }
    }
}

/// Which counter a limit check refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitScope {
    /// The payee's own limit.
    Peer,
    /// The wallet-wide daily limit.
    Global,
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peer => f.write_str("peer"),
            Self::Global => f.write_str("global"),
        }
    }
}

/// Spending limit for one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerLimit {
    pub peer_id: String,
    pub limit_sats: u64,
    pub spent_sats: u64,
    pub period: SpendingPeriod,
    pub last_reset_at: DateTime<Utc>,
}

impl PeerLimit {
    /// Create a fresh limit with nothing spent, starting its period at `now`.
    pub fn new(
        peer_id: impl Into<String>,
        limit_sats: u64,
        period: SpendingPeriod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            limit_sats,
            spent_sats: 0,
            period,
            last_reset_at: now,
        }
    }

    /// Zero the counter if the period boundary was crossed. Returns true if
    /// a reset happened.
    pub fn reset_if_expired(&mut self, now: DateTime<Utc>) -> bool {
        if self.period.has_rolled_over(self.last_reset_at, now) {
            self.spent_sats = 0;
            self.last_reset_at = now;
            true
        } else {
            false
        }
    }

    /// Check if adding `amount_sats` would exceed the limit.
    pub fn would_exceed(&self, amount_sats: u64) -> bool {
        match self.spent_sats.checked_add(amount_sats) {
            Some(total) => total > self.limit_sats,
            None => true,
        }
    }

    pub fn remaining_sats(&self) -> u64 {
        self.limit_sats.saturating_sub(self.spent_sats)
    }

    /// Share of the limit already spent, in percent (0-100, may exceed 100
    /// if the limit was lowered after spending).
    pub fn usage_percent(&self) -> f64 {
        if self.limit_sats == 0 {
            return if self.spent_sats == 0 { 0.0 } else { 100.0 };
        }
        self.spent_sats as f64 / self.limit_sats as f64 * 100.0
    }
}

/// Wallet-wide spend counter. Always resets daily; its limit lives in
/// [`GlobalSettings`](crate::settings::GlobalSettings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSpend {
    pub spent_sats: u64,
    pub last_reset_at: DateTime<Utc>,
}

impl GlobalSpend {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            spent_sats: 0,
            last_reset_at: now,
        }
    }

    /// Zero the counter at a new UTC day. Returns true if a reset happened.
    pub fn reset_if_expired(&mut self, now: DateTime<Utc>) -> bool {
        if SpendingPeriod::Daily.has_rolled_over(self.last_reset_at, now) {
            self.spent_sats = 0;
            self.last_reset_at = now;
            true
        } else {
            false
        }
    }

    pub fn would_exceed(&self, amount_sats: u64, limit_sats: u64) -> bool {
        match self.spent_sats.checked_add(amount_sats) {
            Some(total) => total > limit_sats,
            None => true,
        }
    }

    pub fn remaining_sats(&self, limit_sats: u64) -> u64 {
        limit_sats.saturating_sub(self.spent_sats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_rollover() {
        let p = SpendingPeriod::Daily;
        assert!(!p.has_rolled_over(at(2024, 3, 4, 1), at(2024, 3, 4, 23)));
        assert!(p.has_rolled_over(at(2024, 3, 4, 23), at(2024, 3, 5, 0)));
    }

    #[test]
    fn test_weekly_rollover_uses_iso_weeks() {
        let p = SpendingPeriod::Weekly;
        // 2024-03-04 is a Monday
        assert!(!p.has_rolled_over(at(2024, 3, 4, 0), at(2024, 3, 10, 23)));
        assert!(p.has_rolled_over(at(2024, 3, 10, 23), at(2024, 3, 11, 0)));
        // 2020-12-31 and 2021-01-01 are both in ISO week 53 of 2020
        assert!(!p.has_rolled_over(at(2020, 12, 31, 0), at(2021, 1, 1, 0)));
        assert!(p.has_rolled_over(at(2020, 12, 31, 0), at(2021, 1, 4, 0)));
    }

    #[test]
    fn test_monthly_rollover() {
        let p = SpendingPeriod::Monthly;
        assert!(!p.has_rolled_over(at(2024, 1, 1, 0), at(2024, 1, 31, 23)));
        assert!(p.has_rolled_over(at(2024, 1, 31, 23), at(2024, 2, 1, 0)));
        assert!(p.has_rolled_over(at(2023, 12, 15, 0), at(2024, 1, 1, 0)));
    }

    #[test]
    fn test_clock_going_backwards_does_not_reset() {
        let now = at(2024, 3, 5, 12);
        assert!(!SpendingPeriod::Daily.has_rolled_over(now, now - Duration::days(2)));
    }

    #[test]
    fn test_reset_three_days_later() {
        let now = at(2024, 3, 8, 9);
        let mut limit = PeerLimit {
            peer_id: "pk:alice".into(),
            limit_sats: 10_000,
            spent_sats: 5_000,
            period: SpendingPeriod::Daily,
            last_reset_at: now - Duration::days(3),
        };

        assert!(limit.reset_if_expired(now));
        assert_eq!(limit.spent_sats, 0);
        assert_eq!(limit.last_reset_at, now);

        // Idempotent within the same period
        limit.spent_sats = 200;
        assert!(!limit.reset_if_expired(now + Duration::hours(1)));
        assert_eq!(limit.spent_sats, 200);
    }

    #[test]
    fn test_would_exceed_and_remaining() {
        let mut limit = PeerLimit::new("pk:bob", 1_000, SpendingPeriod::Weekly, Utc::now());
        assert!(!limit.would_exceed(1_000));
        assert!(limit.would_exceed(1_001));

        limit.spent_sats = 400;
        assert_eq!(limit.remaining_sats(), 600);
        assert!((limit.usage_percent() - 40.0).abs() < f64::EPSILON);

        limit.spent_sats = u64::MAX;
        assert!(limit.would_exceed(1));
        assert_eq!(limit.remaining_sats(), 0);
    }

    #[test]
    fn test_global_spend() {
        let now = at(2024, 3, 4, 10);
        let mut global = GlobalSpend::new(now);
        global.spent_sats = 90_000;
        assert!(global.would_exceed(10_001, 100_000));
        assert_eq!(global.remaining_sats(100_000), 10_000);

        assert!(global.reset_if_expired(now + Duration::days(1)));
        assert_eq!(global.spent_sats, 0);
    }

    #[test]
    fn test_period_parsing() {
        assert_eq!("Weekly".parse::<SpendingPeriod>().unwrap(), SpendingPeriod::Weekly);
        assert!("yearly".parse::<SpendingPeriod>().is_err());
        assert_eq!(LimitScope::Global.to_string(), "global");
    }
}
