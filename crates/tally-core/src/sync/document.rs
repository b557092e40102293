//! Settings-document sync coordinator

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::watch;

use super::SyncState;
use crate::auth::Identity;
use crate::error::Result;
use crate::store::{
    merge_fields, DocumentEvent, FeedGuard, LocalStore, RemoteStore, SettingsDocument,
};
use crate::util::unix_timestamp_ms;

struct Inner {
    identity: Option<Identity>,
    state: SyncState,
}

/// Uniform surface over one per-identity settings document.
///
/// Settings documents are a single mutable resource with merge-write
/// semantics — deliberately not unified with the append/remove semantics of
/// record collections. A missing remote document is created from
/// `T::default()` on first observation.
pub struct DocumentSync<T: SettingsDocument, R: RemoteStore> {
    local: LocalStore,
    remote: R,
    doc_tx: Arc<watch::Sender<T>>,
    inner: Arc<Mutex<Inner>>,
    feed_guard: Mutex<Option<FeedGuard>>,
}

impl<T: SettingsDocument, R: RemoteStore> DocumentSync<T, R> {
    /// Create a coordinator in signed-out mode, seeded from local storage
    #[must_use]
    pub fn new(local: LocalStore, remote: R) -> Self {
        let document = local.load_document::<T>();
        let (doc_tx, _) = watch::channel(document);
        Self {
            local,
            remote,
            doc_tx: Arc::new(doc_tx),
            inner: Arc::new(Mutex::new(Inner {
                identity: None,
                state: SyncState::default(),
            })),
            feed_guard: Mutex::new(None),
        }
    }

    /// Current document contents
    #[must_use]
    pub fn get(&self) -> T {
        self.doc_tx.borrow().clone()
    }

    /// Watch the document for changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.doc_tx.subscribe()
    }

    /// Current sync state
    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        lock(&self.inner).state.clone()
    }

    /// Current identity, if signed in
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        lock(&self.inner).identity.clone()
    }

    /// Switch to remote mode for `identity`
    pub fn sign_in(&self, identity: Identity) {
        let mut feed = self.remote.subscribe_document(&identity, T::DOC);
        {
            let mut inner = lock(&self.inner);
            inner.identity = Some(identity.clone());
            inner.state.mark_syncing();
        }

        let doc_tx = Arc::clone(&self.doc_tx);
        let inner = Arc::clone(&self.inner);
        let remote = self.remote.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = feed.next().await {
                match event {
                    DocumentEvent::Document(Some(value)) => {
                        match serde_json::from_value::<T>(value) {
                            Ok(document) => {
                                doc_tx.send_replace(document);
                                lock(&inner).state.mark_success(unix_timestamp_ms());
                            }
                            Err(error) => {
                                tracing::warn!(
                                    doc = T::DOC,
                                    "Ignoring malformed settings document: {error}"
                                );
                            }
                        }
                    }
                    DocumentEvent::Document(None) => {
                        // First session for this identity: seed the remote
                        // document with defaults.
                        let default = T::default();
                        if let Ok(value) = serde_json::to_value(&default) {
                            if let Err(error) =
                                remote.set_document(&identity, T::DOC, value).await
                            {
                                tracing::warn!(
                                    doc = T::DOC,
                                    "Failed to seed settings document: {error}"
                                );
                            }
                        }
                        doc_tx.send_replace(default);
                        lock(&inner).state.mark_success(unix_timestamp_ms());
                    }
                    DocumentEvent::Error(message) => {
                        tracing::warn!(doc = T::DOC, "Remote feed failed: {message}");
                        lock(&inner).state.mark_error(message);
                        break;
                    }
                }
            }
        });
        *lock(&self.feed_guard) = Some(FeedGuard::for_task(handle));
    }

    /// Drop the remote subscription and fall back to the local document
    pub fn sign_out(&self) {
        *lock(&self.feed_guard) = None;
        {
            let mut inner = lock(&self.inner);
            inner.identity = None;
            inner.state = SyncState::default();
        }
        self.doc_tx.send_replace(self.local.load_document::<T>());
    }

    /// One-shot refresh for short-lived processes
    pub async fn refresh(&self) -> Result<()> {
        let Some(identity) = self.identity() else {
            self.doc_tx.send_replace(self.local.load_document::<T>());
            return Ok(());
        };

        lock(&self.inner).state.mark_syncing();
        match self.remote.get_document(&identity, T::DOC).await {
            Ok(Some(value)) => {
                match serde_json::from_value::<T>(value) {
                    Ok(document) => {
                        self.doc_tx.send_replace(document);
                    }
                    Err(error) => {
                        tracing::warn!(doc = T::DOC, "Ignoring malformed settings document: {error}");
                    }
                }
                lock(&self.inner).state.mark_success(unix_timestamp_ms());
                Ok(())
            }
            Ok(None) => {
                let default = T::default();
                self.remote
                    .set_document(&identity, T::DOC, serde_json::to_value(&default)?)
                    .await?;
                self.doc_tx.send_replace(default);
                lock(&self.inner).state.mark_success(unix_timestamp_ms());
                Ok(())
            }
            Err(error) => {
                lock(&self.inner).state.mark_error(error.to_string());
                Err(error)
            }
        }
    }

    /// Replace the whole document
    pub async fn save(&self, document: &T) -> Result<()> {
        if let Some(identity) = self.identity() {
            self.remote
                .set_document(&identity, T::DOC, serde_json::to_value(document)?)
                .await?;
            // The subscription delivers the new state; for one-shot callers
            // reflect it immediately as well.
            self.doc_tx.send_replace(document.clone());
            Ok(())
        } else {
            self.local.save_document(document);
            self.doc_tx.send_replace(document.clone());
            Ok(())
        }
    }

    /// Merge fields into the document (the settings-shaped `setField` write)
    pub async fn merge(&self, fields: Value) -> Result<()> {
        if let Some(identity) = self.identity() {
            self.remote.merge_document(&identity, T::DOC, fields).await
        } else {
            let mut value = serde_json::to_value(self.get())?;
            merge_fields(&mut value, &fields);
            let document: T = serde_json::from_value(value)?;
            self.local.save_document(&document);
            self.doc_tx.send_replace(document);
            Ok(())
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AiProvider, AiSettings};
    use crate::store::MemoryRemoteStore;
    use crate::sync::SyncStatus;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    fn identity(uid: &str) -> Identity {
        Identity {
            user_id: uid.to_string(),
            email: None,
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_signed_out_save_and_merge_are_local() {
        let tmp = tempdir().unwrap();
        let sync: DocumentSync<AiSettings, MemoryRemoteStore> =
            DocumentSync::new(LocalStore::new(tmp.path()), MemoryRemoteStore::new());

        let settings = AiSettings {
            api_key: "sk-test".to_string(),
            ..AiSettings::default()
        };
        sync.save(&settings).await.unwrap();
        assert_eq!(sync.get().api_key, "sk-test");

        sync.merge(json!({"model": "gpt-4o-mini"})).await.unwrap();
        let merged = sync.get();
        assert_eq!(merged.model, "gpt-4o-mini");
        assert_eq!(merged.api_key, "sk-test");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sign_in_seeds_missing_remote_document() {
        let tmp = tempdir().unwrap();
        let remote = MemoryRemoteStore::new();
        let sync: DocumentSync<AiSettings, MemoryRemoteStore> =
            DocumentSync::new(LocalStore::new(tmp.path()), remote.clone());

        sync.sign_in(identity("u1"));
        wait_for(|| sync.sync_state().status == SyncStatus::Success).await;

        let seeded = remote
            .get_document(&identity("u1"), AiSettings::DOC)
            .await
            .unwrap();
        assert!(seeded.is_some());
        assert_eq!(sync.get().provider, AiProvider::OpenAi);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_signed_in_merge_reaches_subscription() {
        let tmp = tempdir().unwrap();
        let remote = MemoryRemoteStore::new();
        let sync: DocumentSync<AiSettings, MemoryRemoteStore> =
            DocumentSync::new(LocalStore::new(tmp.path()), remote);

        sync.sign_in(identity("u1"));
        wait_for(|| sync.sync_state().status == SyncStatus::Success).await;

        sync.merge(json!({"api_key": "sk-cloud"})).await.unwrap();
        wait_for(|| sync.get().api_key == "sk-cloud").await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sign_out_restores_local_document() {
        let tmp = tempdir().unwrap();
        let sync: DocumentSync<AiSettings, MemoryRemoteStore> =
            DocumentSync::new(LocalStore::new(tmp.path()), MemoryRemoteStore::new());

        let local_settings = AiSettings {
            api_key: "sk-local".to_string(),
            ..AiSettings::default()
        };
        sync.save(&local_settings).await.unwrap();

        sync.sign_in(identity("u1"));
        wait_for(|| sync.get().api_key.is_empty()).await;

        sync.sign_out();
        assert_eq!(sync.get().api_key, "sk-local");
    }
}
