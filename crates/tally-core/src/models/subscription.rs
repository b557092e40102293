//! Subscription and monthly quota model

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::store::SettingsDocument;
use crate::util::month_stamp;

/// Plan tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Pro,
}

/// Billing status reported by the (out-of-scope) payment processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    Active,
    Canceled,
    PastDue,
    Trialing,
}

/// Per-identity subscription state (settings document).
///
/// Payment processing is out of scope; the billing fields are carried for
/// the hosted backend to fill in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Subscription {
    pub plan: Plan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BillingStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_period_end: Option<i64>,
    /// Receipts created this month
    pub receipt_count_this_month: u32,
    /// AI scans performed this month
    pub ai_scan_count_this_month: u32,
    /// `YYYY-MM` stamp of the month the counters belong to
    pub last_reset_date: String,
}

impl Subscription {
    /// Whether the identity is on an active paid plan
    #[must_use]
    pub fn is_pro(&self) -> bool {
        self.plan == Plan::Pro && self.status == Some(BillingStatus::Active)
    }

    /// Reset the monthly counters when the stored month differs from the
    /// current one. Returns `true` when a reset happened and the document
    /// should be written back.
    pub fn ensure_month(&mut self, today: NaiveDate) -> bool {
        let current = month_stamp(today);
        if self.last_reset_date == current {
            return false;
        }
        self.receipt_count_this_month = 0;
        self.ai_scan_count_this_month = 0;
        self.last_reset_date = current;
        true
    }
}

impl SettingsDocument for Subscription {
    const DOC: &'static str = "subscription";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_ensure_month_resets_counters_on_new_month() {
        let mut sub = Subscription {
            receipt_count_this_month: 12,
            ai_scan_count_this_month: 4,
            last_reset_date: "2025-01".to_string(),
            ..Subscription::default()
        };
        assert!(sub.ensure_month(date(2025, 2, 1)));
        assert_eq!(sub.receipt_count_this_month, 0);
        assert_eq!(sub.ai_scan_count_this_month, 0);
        assert_eq!(sub.last_reset_date, "2025-02");
    }

    #[test]
    fn test_ensure_month_is_noop_within_month() {
        let mut sub = Subscription {
            receipt_count_this_month: 12,
            last_reset_date: "2025-02".to_string(),
            ..Subscription::default()
        };
        assert!(!sub.ensure_month(date(2025, 2, 28)));
        assert_eq!(sub.receipt_count_this_month, 12);
    }

    #[test]
    fn test_is_pro_requires_active_status() {
        let mut sub = Subscription {
            plan: Plan::Pro,
            ..Subscription::default()
        };
        assert!(!sub.is_pro());
        sub.status = Some(BillingStatus::Active);
        assert!(sub.is_pro());
        sub.status = Some(BillingStatus::Canceled);
        assert!(!sub.is_pro());
    }
}
