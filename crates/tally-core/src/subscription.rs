//! Monthly quota tracking and plan gating.
//!
//! Counters live in the per-identity subscription settings document and
//! reset on first read in a new month. The free tier gates receipt
//! creation and AI scans; payment processing itself is out of scope.

use chrono::NaiveDate;
use serde_json::json;

use crate::error::{Error, Result};
use crate::models::Subscription;
use crate::store::{LocalStore, RemoteStore};
use crate::sync::DocumentSync;

/// Receipts a free-plan identity may create per month
pub const FREE_RECEIPTS_PER_MONTH: u32 = 30;
/// AI scans a free-plan identity may perform per month
pub const FREE_AI_SCANS_PER_MONTH: u32 = 10;

/// Derived quota view for gating UI and commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    pub is_pro: bool,
    pub can_add_receipt: bool,
    pub can_use_ai_scan: bool,
    /// Remaining receipts this month; `None` means unlimited
    pub remaining_receipts: Option<u32>,
    /// Remaining AI scans this month; `None` means unlimited
    pub remaining_ai_scans: Option<u32>,
}

/// Compute the quota view for a subscription
#[must_use]
pub fn quota_status(subscription: &Subscription) -> QuotaStatus {
    let is_pro = subscription.is_pro();
    if is_pro {
        return QuotaStatus {
            is_pro,
            can_add_receipt: true,
            can_use_ai_scan: true,
            remaining_receipts: None,
            remaining_ai_scans: None,
        };
    }
    let remaining_receipts =
        FREE_RECEIPTS_PER_MONTH.saturating_sub(subscription.receipt_count_this_month);
    let remaining_ai_scans =
        FREE_AI_SCANS_PER_MONTH.saturating_sub(subscription.ai_scan_count_this_month);
    QuotaStatus {
        is_pro,
        can_add_receipt: remaining_receipts > 0,
        can_use_ai_scan: remaining_ai_scans > 0,
        remaining_receipts: Some(remaining_receipts),
        remaining_ai_scans: Some(remaining_ai_scans),
    }
}

/// Subscription document coordinator with reset-on-read semantics
pub struct SubscriptionService<R: RemoteStore> {
    doc: DocumentSync<Subscription, R>,
}

impl<R: RemoteStore> SubscriptionService<R> {
    #[must_use]
    pub fn new(local: LocalStore, remote: R) -> Self {
        Self {
            doc: DocumentSync::new(local, remote),
        }
    }

    /// Underlying document coordinator (identity transitions, subscribe)
    #[must_use]
    pub const fn doc(&self) -> &DocumentSync<Subscription, R> {
        &self.doc
    }

    /// Current subscription state. The first read in a new month resets
    /// both counters and persists the new month stamp.
    pub async fn current(&self, today: NaiveDate) -> Result<Subscription> {
        self.doc.refresh().await?;
        let mut subscription = self.doc.get();
        if subscription.ensure_month(today) {
            self.doc.save(&subscription).await?;
        }
        Ok(subscription)
    }

    /// Count one created receipt against the quota. Fails with
    /// [`Error::QuotaExceeded`] when the free-tier limit is reached.
    pub async fn record_receipt(&self, today: NaiveDate) -> Result<Subscription> {
        let mut subscription = self.current(today).await?;
        if !quota_status(&subscription).can_add_receipt {
            return Err(Error::QuotaExceeded(format!(
                "free plan allows {FREE_RECEIPTS_PER_MONTH} receipts per month"
            )));
        }
        subscription.receipt_count_this_month += 1;
        self.doc
            .merge(json!({
                "receipt_count_this_month": subscription.receipt_count_this_month
            }))
            .await?;
        Ok(subscription)
    }

    /// Count one AI scan against the quota
    pub async fn record_ai_scan(&self, today: NaiveDate) -> Result<Subscription> {
        let mut subscription = self.current(today).await?;
        if !quota_status(&subscription).can_use_ai_scan {
            return Err(Error::QuotaExceeded(format!(
                "free plan allows {FREE_AI_SCANS_PER_MONTH} AI scans per month"
            )));
        }
        subscription.ai_scan_count_this_month += 1;
        self.doc
            .merge(json!({
                "ai_scan_count_this_month": subscription.ai_scan_count_this_month
            }))
            .await?;
        Ok(subscription)
    }

    /// Flip the plan to pro/active. Manual for now; a payment processor
    /// would drive this in production.
    pub async fn upgrade_to_pro(&self) -> Result<()> {
        self.doc
            .merge(json!({ "plan": "pro", "status": "active" }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::models::{BillingStatus, Plan};
    use crate::store::MemoryRemoteStore;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn service(tmp: &std::path::Path) -> SubscriptionService<MemoryRemoteStore> {
        SubscriptionService::new(LocalStore::new(tmp), MemoryRemoteStore::new())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_first_read_in_new_month_resets_counters() {
        let tmp = tempdir().unwrap();
        let service = service(tmp.path());

        let stale = Subscription {
            receipt_count_this_month: 30,
            ai_scan_count_this_month: 10,
            last_reset_date: "2025-01".to_string(),
            ..Subscription::default()
        };
        service.doc().save(&stale).await.unwrap();

        let current = service.current(date(2025, 2, 3)).await.unwrap();
        assert_eq!(current.receipt_count_this_month, 0);
        assert_eq!(current.ai_scan_count_this_month, 0);
        assert_eq!(current.last_reset_date, "2025-02");

        // The reset was persisted, not just computed
        assert_eq!(service.doc().get().last_reset_date, "2025-02");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_record_receipt_increments_and_gates() {
        let tmp = tempdir().unwrap();
        let service = service(tmp.path());
        let today = date(2025, 2, 3);

        let after = service.record_receipt(today).await.unwrap();
        assert_eq!(after.receipt_count_this_month, 1);

        let nearly_full = Subscription {
            receipt_count_this_month: FREE_RECEIPTS_PER_MONTH,
            last_reset_date: "2025-02".to_string(),
            ..Subscription::default()
        };
        service.doc().save(&nearly_full).await.unwrap();

        let error = service.record_receipt(today).await.unwrap_err();
        assert!(matches!(error, Error::QuotaExceeded(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pro_plan_is_unlimited() {
        let tmp = tempdir().unwrap();
        let service = service(tmp.path());
        let today = date(2025, 2, 3);

        let maxed_pro = Subscription {
            plan: Plan::Pro,
            status: Some(BillingStatus::Active),
            receipt_count_this_month: 1_000,
            ai_scan_count_this_month: 1_000,
            last_reset_date: "2025-02".to_string(),
            ..Subscription::default()
        };
        service.doc().save(&maxed_pro).await.unwrap();

        let status = quota_status(&service.current(today).await.unwrap());
        assert!(status.is_pro);
        assert!(status.can_add_receipt);
        assert_eq!(status.remaining_receipts, None);
        assert!(service.record_receipt(today).await.is_ok());
        assert!(service.record_ai_scan(today).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upgrade_to_pro_merges_plan_fields() {
        let tmp = tempdir().unwrap();
        let service = service(tmp.path());
        let today = date(2025, 2, 3);

        service.current(today).await.unwrap();
        service.upgrade_to_pro().await.unwrap();

        let current = service.current(today).await.unwrap();
        assert!(current.is_pro());
        // Counter state survives the merge
        assert_eq!(current.last_reset_date, "2025-02");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_quota_resets_work_signed_in_too() {
        let tmp = tempdir().unwrap();
        let remote = MemoryRemoteStore::new();
        let service = SubscriptionService::new(LocalStore::new(tmp.path()), remote.clone());
        let user = Identity {
            user_id: "u1".to_string(),
            email: None,
        };

        let stale = Subscription {
            ai_scan_count_this_month: 10,
            last_reset_date: "2025-01".to_string(),
            ..Subscription::default()
        };
        remote
            .set_document(
                &user,
                <Subscription as crate::store::SettingsDocument>::DOC,
                serde_json::to_value(&stale).unwrap(),
            )
            .await
            .unwrap();

        service.doc().sign_in(user);
        let current = service.current(date(2025, 2, 1)).await.unwrap();
        assert_eq!(current.ai_scan_count_this_month, 0);
        assert!(quota_status(&current).can_use_ai_scan);
    }
}
