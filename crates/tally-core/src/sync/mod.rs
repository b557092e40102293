//! Sync coordinator
//!
//! Presents one CRUD+subscribe surface per entity regardless of identity
//! state: local JSON storage while signed out, remote subscription-backed
//! state while signed in. The adapter is selected once per identity
//! transition, never branched ad hoc at call sites.

mod collection;
mod document;
mod migration;

pub use collection::CollectionSync;
pub use document::DocumentSync;
pub use migration::{
    LocalCensus, MigrationFlow, MigrationMarker, MigrationOutcome, MigrationProgress,
    MigrationPrompt,
};

use serde::{Deserialize, Serialize};

/// Sync lifecycle of one collection or settings document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Success,
    Error,
}

/// Per-collection sync metadata, mutated only by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncState {
    pub status: SyncStatus,
    /// Unix ms of the last successful sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncState {
    pub(crate) fn mark_syncing(&mut self) {
        self.status = SyncStatus::Syncing;
        self.error = None;
    }

    pub(crate) fn mark_success(&mut self, now_ms: i64) {
        self.status = SyncStatus::Success;
        self.last_sync_at = Some(now_ms);
        self.error = None;
    }

    pub(crate) fn mark_error(&mut self, message: impl Into<String>) {
        self.status = SyncStatus::Error;
        self.error = Some(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_state_transitions() {
        let mut state = SyncState::default();
        assert_eq!(state.status, SyncStatus::Idle);

        state.mark_syncing();
        assert_eq!(state.status, SyncStatus::Syncing);

        state.mark_success(1000);
        assert_eq!(state.status, SyncStatus::Success);
        assert_eq!(state.last_sync_at, Some(1000));

        state.mark_error("offline");
        assert_eq!(state.status, SyncStatus::Error);
        assert_eq!(state.error.as_deref(), Some("offline"));
        // The last successful sync time survives an error
        assert_eq!(state.last_sync_at, Some(1000));
    }
}
