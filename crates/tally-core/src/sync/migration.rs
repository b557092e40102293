//! One-time local-to-remote migration flow.
//!
//! Runs once per identity per device: `NotChecked → Prompting →
//! {Migrating → Done | Skipped}`. The durable marker guarantees the flow
//! never re-triggers once completed or skipped; declining a merge leaves
//! the marker unset so the prompt returns next session.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::Identity;
use crate::error::Result;
use crate::models::{Achievement, AiSettings, Receipt, StoreNameHistory};
use crate::store::{LocalStore, Record, RemoteStore, SettingsDocument};

const MARKERS_KEY: &str = "migration-markers";

/// Durable per-identity migration outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationMarker {
    Completed,
    Skipped,
}

type Markers = BTreeMap<String, MigrationMarker>;

/// Qualifying local data found on this device
#[derive(Debug, Clone)]
pub struct LocalCensus {
    pub receipts: Vec<Receipt>,
    pub unlocked_achievements: Vec<Achievement>,
    pub ai_settings: Option<AiSettings>,
    pub store_names: StoreNameHistory,
}

impl LocalCensus {
    fn take(local: &LocalStore) -> Self {
        let achievements: Vec<Achievement> = local.load_collection();
        let ai_settings = Some(local.load_document::<AiSettings>())
            .filter(AiSettings::is_configured);
        Self {
            receipts: local.load_collection(),
            unlocked_achievements: achievements
                .into_iter()
                .filter(|achievement| achievement.unlocked)
                .collect(),
            ai_settings,
            store_names: local.load_document(),
        }
    }

    /// Whether this device holds anything worth migrating
    #[must_use]
    pub fn qualifies(&self) -> bool {
        !self.receipts.is_empty() || !self.unlocked_achievements.is_empty()
    }

    /// Number of migration units, the denominator for progress reporting
    #[must_use]
    pub fn total_units(&self) -> usize {
        self.receipts.len()
            + self.unlocked_achievements.len()
            + usize::from(self.ai_settings.is_some())
            + usize::from(!self.store_names.names.is_empty())
    }
}

/// What the user is shown before choosing migrate-or-skip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPrompt {
    pub receipt_count: usize,
    pub unlocked_achievement_count: usize,
    pub has_ai_settings: bool,
    pub store_name_count: usize,
    /// The remote collection already holds data; migrating becomes a merge
    /// (duplicates by id are skipped, not overwritten) and needs explicit
    /// confirmation.
    pub remote_has_data: bool,
}

/// Progress of a running migration, as a completed/total fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationProgress {
    pub completed: usize,
    pub total: usize,
}

impl MigrationProgress {
    #[must_use]
    pub fn fraction(self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Result of a completed migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MigrationOutcome {
    pub migrated_receipts: usize,
    pub skipped_duplicates: usize,
    pub migrated_achievements: usize,
    pub migrated_ai_settings: bool,
    pub migrated_store_names: bool,
}

/// Drives the one-time migration for one identity on one device
pub struct MigrationFlow<R: RemoteStore> {
    local: LocalStore,
    remote: R,
    identity: Identity,
}

impl<R: RemoteStore> MigrationFlow<R> {
    #[must_use]
    pub fn new(local: LocalStore, remote: R, identity: Identity) -> Self {
        Self {
            local,
            remote,
            identity,
        }
    }

    /// The durable marker for this identity, if any
    #[must_use]
    pub fn marker(&self) -> Option<MigrationMarker> {
        let markers: Markers = self.local.load_named(MARKERS_KEY);
        markers.get(&self.identity.user_id).copied()
    }

    /// Decide whether to prompt. Returns `None` when the flow already ran
    /// for this identity or there is no qualifying local data.
    pub async fn check(&self) -> Result<Option<MigrationPrompt>> {
        if self.marker().is_some() {
            return Ok(None);
        }
        let census = LocalCensus::take(&self.local);
        if !census.qualifies() {
            return Ok(None);
        }
        let existing = self
            .remote
            .snapshot(&self.identity, Receipt::COLLECTION)
            .await?;
        Ok(Some(MigrationPrompt {
            receipt_count: census.receipts.len(),
            unlocked_achievement_count: census.unlocked_achievements.len(),
            has_ai_settings: census.ai_settings.is_some(),
            store_name_count: census.store_names.names.len(),
            remote_has_data: !existing.is_empty(),
        }))
    }

    /// Copy qualifying local data to the remote store.
    ///
    /// Receipts already present remotely (by id) are skipped, not
    /// overwritten. Any write error aborts the remaining batch and leaves
    /// the marker unset; already-written records stay, and retrying is safe
    /// because upsert-by-id is idempotent.
    pub async fn migrate(
        &self,
        mut on_progress: impl FnMut(MigrationProgress),
    ) -> Result<MigrationOutcome> {
        let census = LocalCensus::take(&self.local);
        let total = census.total_units();
        let mut completed = 0usize;
        let mut outcome = MigrationOutcome::default();

        let existing = self
            .remote
            .snapshot(&self.identity, Receipt::COLLECTION)
            .await?;
        let existing_ids: HashSet<String> = existing
            .iter()
            .filter_map(|value| value.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .collect();

        for receipt in &census.receipts {
            let id = receipt.id();
            if existing_ids.contains(&id) {
                outcome.skipped_duplicates += 1;
            } else {
                self.remote
                    .upsert(
                        &self.identity,
                        Receipt::COLLECTION,
                        &id,
                        serde_json::to_value(receipt)?,
                    )
                    .await?;
                outcome.migrated_receipts += 1;
            }
            completed += 1;
            on_progress(MigrationProgress { completed, total });
        }

        for achievement in &census.unlocked_achievements {
            self.remote
                .upsert(
                    &self.identity,
                    Achievement::COLLECTION,
                    &achievement.id(),
                    serde_json::to_value(achievement)?,
                )
                .await?;
            outcome.migrated_achievements += 1;
            completed += 1;
            on_progress(MigrationProgress { completed, total });
        }

        if let Some(settings) = &census.ai_settings {
            self.remote
                .merge_document(
                    &self.identity,
                    AiSettings::DOC,
                    serde_json::to_value(settings)?,
                )
                .await?;
            outcome.migrated_ai_settings = true;
            completed += 1;
            on_progress(MigrationProgress { completed, total });
        }

        if !census.store_names.names.is_empty() {
            self.remote
                .merge_document(
                    &self.identity,
                    StoreNameHistory::DOC,
                    serde_json::to_value(&census.store_names)?,
                )
                .await?;
            outcome.migrated_store_names = true;
            completed += 1;
            on_progress(MigrationProgress { completed, total });
        }

        self.set_marker(MigrationMarker::Completed);
        tracing::info!(
            user = %self.identity.user_id,
            receipts = outcome.migrated_receipts,
            skipped = outcome.skipped_duplicates,
            "Migration completed"
        );
        Ok(outcome)
    }

    /// Skip migration for good; the flow never re-triggers for this
    /// identity on this device even though local data remains.
    pub fn skip(&self) {
        self.set_marker(MigrationMarker::Skipped);
    }

    fn set_marker(&self, marker: MigrationMarker) {
        let mut markers: Markers = self.local.load_named(MARKERS_KEY);
        markers.insert(self.identity.user_id.clone(), marker);
        self.local.save_named(MARKERS_KEY, &markers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, ReceiptItem};
    use crate::store::MemoryRemoteStore;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn receipt(store: &str, created_at: i64) -> Receipt {
        let mut receipt = Receipt::new(
            store,
            Category::Food,
            vec![ReceiptItem {
                name: "Item".to_string(),
                quantity: 1,
                price: 10.0,
            }],
            "cash",
        );
        receipt.created_at = created_at;
        receipt
    }

    fn identity(uid: &str) -> Identity {
        Identity {
            user_id: uid.to_string(),
            email: None,
        }
    }

    fn seeded_local(tmp: &std::path::Path, receipts: &[Receipt]) -> LocalStore {
        let local = LocalStore::new(tmp);
        local.save_collection(receipts);
        local
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_check_prompts_only_with_qualifying_data() {
        let tmp = tempdir().unwrap();
        let local = LocalStore::new(tmp.path());
        let flow = MigrationFlow::new(local.clone(), MemoryRemoteStore::new(), identity("u1"));
        assert!(flow.check().await.unwrap().is_none());

        local.save_collection(&[receipt("A", 1)]);
        let prompt = flow.check().await.unwrap().unwrap();
        assert_eq!(prompt.receipt_count, 1);
        assert!(!prompt.remote_has_data);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrate_copies_records_and_sets_marker() {
        let tmp = tempdir().unwrap();
        let receipts = [receipt("A", 1), receipt("B", 2), receipt("C", 3)];
        let local = seeded_local(tmp.path(), &receipts);
        let remote = MemoryRemoteStore::new();
        let flow = MigrationFlow::new(local, remote.clone(), identity("u1"));

        let mut fractions = Vec::new();
        let outcome = flow
            .migrate(|progress| fractions.push(progress.fraction()))
            .await
            .unwrap();

        assert_eq!(outcome.migrated_receipts, 3);
        assert_eq!(outcome.skipped_duplicates, 0);
        assert_eq!(flow.marker(), Some(MigrationMarker::Completed));
        assert_eq!(fractions.last().copied(), Some(1.0));

        let remote_records = remote
            .snapshot(&identity("u1"), Receipt::COLLECTION)
            .await
            .unwrap();
        assert_eq!(remote_records.len(), 3);

        // Completed marker suppresses any further prompting
        assert!(flow.check().await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrate_twice_yields_same_remote_state() {
        let tmp = tempdir().unwrap();
        let receipts = [receipt("A", 1), receipt("B", 2)];
        let local = seeded_local(tmp.path(), &receipts);
        let remote = MemoryRemoteStore::new();
        let flow = MigrationFlow::new(local, remote.clone(), identity("u1"));

        flow.migrate(|_| {}).await.unwrap();
        let first = remote
            .snapshot(&identity("u1"), Receipt::COLLECTION)
            .await
            .unwrap();

        let outcome = flow.migrate(|_| {}).await.unwrap();
        let second = remote
            .snapshot(&identity("u1"), Receipt::COLLECTION)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(outcome.migrated_receipts, 0);
        assert_eq!(outcome.skipped_duplicates, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_merge_skips_duplicates_without_overwriting() {
        let tmp = tempdir().unwrap();
        let cloud_version = receipt("Cloud edit", 1);
        let local_version = {
            let mut local_version = cloud_version.clone();
            local_version.store_name = "Local edit".to_string();
            local_version
        };
        let local = seeded_local(tmp.path(), &[local_version]);
        let remote = MemoryRemoteStore::new();
        remote
            .upsert(
                &identity("u1"),
                Receipt::COLLECTION,
                &cloud_version.id(),
                serde_json::to_value(&cloud_version).unwrap(),
            )
            .await
            .unwrap();

        let flow = MigrationFlow::new(local, remote.clone(), identity("u1"));
        let prompt = flow.check().await.unwrap().unwrap();
        assert!(prompt.remote_has_data);

        let outcome = flow.migrate(|_| {}).await.unwrap();
        assert_eq!(outcome.skipped_duplicates, 1);

        // The remote copy won; migration never clobbers existing records
        let records = remote
            .snapshot(&identity("u1"), Receipt::COLLECTION)
            .await
            .unwrap();
        assert_eq!(records[0]["store_name"], "Cloud edit");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_write_failure_aborts_and_leaves_marker_unset() {
        let tmp = tempdir().unwrap();
        let local = seeded_local(tmp.path(), &[receipt("A", 1)]);
        let remote = MemoryRemoteStore::new();
        let flow = MigrationFlow::new(local, remote.clone(), identity("u1"));

        remote.set_fail_writes(true);
        assert!(flow.migrate(|_| {}).await.is_err());
        assert_eq!(flow.marker(), None);

        // Retry succeeds once the backend recovers
        remote.set_fail_writes(false);
        flow.migrate(|_| {}).await.unwrap();
        assert_eq!(flow.marker(), Some(MigrationMarker::Completed));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_skip_is_durable() {
        let tmp = tempdir().unwrap();
        let local = seeded_local(tmp.path(), &[receipt("A", 1)]);
        let flow = MigrationFlow::new(local, MemoryRemoteStore::new(), identity("u1"));

        flow.skip();
        assert_eq!(flow.marker(), Some(MigrationMarker::Skipped));
        // Local data still exists, but the flow never re-triggers
        assert!(flow.check().await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_markers_are_per_identity() {
        let tmp = tempdir().unwrap();
        let local = seeded_local(tmp.path(), &[receipt("A", 1)]);
        let remote = MemoryRemoteStore::new();

        let flow_a = MigrationFlow::new(local.clone(), remote.clone(), identity("alice"));
        flow_a.skip();

        let flow_b = MigrationFlow::new(local, remote, identity("bob"));
        assert_eq!(flow_b.marker(), None);
        assert!(flow_b.check().await.unwrap().is_some());
    }
}
