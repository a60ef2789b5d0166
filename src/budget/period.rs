//! Recurring budget periods.
//!
//! Period bounds are computed in UTC from the instant being evaluated; weeks
//! start on Monday.

use std::fmt;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Recurrence of a budget rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriod {
    /// Resets at 00:00 UTC.
    Daily,
    /// Resets Monday 00:00 UTC.
    Weekly,
    /// Resets on the first of the month.
    Monthly,
    /// Resets on January 1st.
    Yearly,
}

impl BudgetPeriod {
    /// Start of the period containing `at`.
    pub fn start_of(self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = at.date_naive();
        let first = match self {
            Self::Daily => date,
            Self::Weekly => date
                .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
                .unwrap_or(date),
            Self::Monthly => date.with_day(1).unwrap_or(date),
            Self::Yearly => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
        };
        first.and_time(NaiveTime::MIN).and_utc()
    }

    /// Start of the period following the one containing `at`.
    pub fn end_of(self, at: DateTime<Utc>) -> DateTime<Utc> {
        let start = self.start_of(at);
        let next = match self {
            Self::Daily => start.checked_add_days(Days::new(1)),
            Self::Weekly => start.checked_add_days(Days::new(7)),
            Self::Monthly => start.checked_add_months(Months::new(1)),
            Self::Yearly => start.checked_add_months(Months::new(12)),
        };
        next.unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
