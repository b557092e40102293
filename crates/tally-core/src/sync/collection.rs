//! Collection sync coordinator

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::watch;

use super::SyncState;
use crate::auth::Identity;
use crate::error::Result;
use crate::store::{FeedEvent, FeedGuard, LocalStore, Record, RemoteStore};
use crate::util::unix_timestamp_ms;

struct Inner {
    identity: Option<Identity>,
    state: SyncState,
}

/// Uniform CRUD+subscribe surface over one record collection.
///
/// Signed out, operations hit the local store synchronously. Signed in,
/// writes go to the remote store and the visible state reflects only what
/// the remote subscription has pushed — the local cache is not a second
/// source of truth once authenticated.
pub struct CollectionSync<T: Record, R: RemoteStore> {
    local: LocalStore,
    remote: R,
    records_tx: Arc<watch::Sender<Vec<T>>>,
    inner: Arc<Mutex<Inner>>,
    feed_guard: Mutex<Option<FeedGuard>>,
}

impl<T: Record, R: RemoteStore> CollectionSync<T, R> {
    /// Create a coordinator in signed-out mode, seeded from local storage
    #[must_use]
    pub fn new(local: LocalStore, remote: R) -> Self {
        let records = local.load_collection::<T>();
        let (records_tx, _) = watch::channel(records);
        Self {
            local,
            remote,
            records_tx: Arc::new(records_tx),
            inner: Arc::new(Mutex::new(Inner {
                identity: None,
                state: SyncState::default(),
            })),
            feed_guard: Mutex::new(None),
        }
    }

    /// Current snapshot, newest first
    #[must_use]
    pub fn records(&self) -> Vec<T> {
        self.records_tx.borrow().clone()
    }

    /// Watch the collection; the receiver yields a fresh snapshot on every
    /// change, starting from the current one.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<T>> {
        self.records_tx.subscribe()
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

    /// Switch to remote mode for `identity`. Opens the remote subscription
    /// and drops any previous one; local data is left untouched (copying it
    /// up is the migration flow's job, not a side effect of signing in).
    pub fn sign_in(&self, identity: Identity) {
        let mut feed = self.remote.subscribe(&identity, T::COLLECTION);
        {
            let mut inner = lock(&self.inner);
            inner.identity = Some(identity);
            inner.state.mark_syncing();
        }

        let records_tx = Arc::clone(&self.records_tx);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(event) = feed.next().await {
                match event {
                    FeedEvent::Snapshot(values) => {
                        records_tx.send_replace(decode_records::<T>(&values));
                        lock(&inner).state.mark_success(unix_timestamp_ms());
                    }
                    FeedEvent::Error(message) => {
                        tracing::warn!(
                            collection = T::COLLECTION,
                            "Remote feed failed: {message}"
                        );
                        lock(&inner).state.mark_error(message);
                        break;
                    }
                }
            }
        });
        *lock(&self.feed_guard) = Some(FeedGuard::for_task(handle));
    }

    /// Drop the remote subscription and fall back to the local view.
    /// Remote data is not deleted.
    pub fn sign_out(&self) {
        *lock(&self.feed_guard) = None;
        {
            let mut inner = lock(&self.inner);
            inner.identity = None;
            inner.state = SyncState::default();
        }
        self.records_tx
            .send_replace(self.local.load_collection::<T>());
    }

    /// One-shot refresh: fetch the current remote snapshot (or reload local
    /// storage when signed out). Useful for short-lived processes that do
    /// not hold a subscription open.
    pub async fn refresh(&self) -> Result<()> {
        let Some(identity) = self.identity() else {
            self.records_tx
                .send_replace(self.local.load_collection::<T>());
            return Ok(());
        };

        lock(&self.inner).state.mark_syncing();
        match self.remote.snapshot(&identity, T::COLLECTION).await {
            Ok(values) => {
                self.records_tx.send_replace(decode_records::<T>(&values));
                lock(&self.inner).state.mark_success(unix_timestamp_ms());
                Ok(())
            }
            Err(error) => {
                lock(&self.inner).state.mark_error(error.to_string());
                Err(error)
            }
        }
    }

    /// Insert or replace a record. Signed in, the visible snapshot updates
    /// when the subscription delivers it; signed out, immediately.
    pub async fn upsert(&self, record: T) -> Result<()> {
        if let Some(identity) = self.identity() {
            let value = serde_json::to_value(&record)?;
            self.remote
                .upsert(&identity, T::COLLECTION, &record.id(), value)
                .await
        } else {
            let records = self.local.upsert(&record);
            self.records_tx.send_replace(records);
            Ok(())
        }
    }

    /// Delete a record by id
    pub async fn remove(&self, id: &str) -> Result<()> {
        if let Some(identity) = self.identity() {
            self.remote.remove(&identity, T::COLLECTION, id).await
        } else {
            let records = self.local.remove::<T>(id);
            self.records_tx.send_replace(records);
            Ok(())
        }
    }

    /// Delete every record. The remote store has no bulk delete, so signed
    /// in this removes record by record.
    pub async fn clear(&self) -> Result<()> {
        if let Some(identity) = self.identity() {
            let values = self.remote.snapshot(&identity, T::COLLECTION).await?;
            for record in decode_records::<T>(&values) {
                self.remote
                    .remove(&identity, T::COLLECTION, &record.id())
                    .await?;
            }
            Ok(())
        } else {
            self.local.save_collection::<T>(&[]);
            self.records_tx.send_replace(Vec::new());
            Ok(())
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decode a raw snapshot, dropping (and logging) records that no longer
/// parse rather than poisoning the whole collection.
fn decode_records<T: Record>(values: &[Value]) -> Vec<T> {
    let mut records: Vec<T> = values
        .iter()
        .filter_map(|value| match serde_json::from_value(value.clone()) {
            Ok(record) => Some(record),
            Err(error) => {
                tracing::warn!(
                    collection = T::COLLECTION,
                    "Dropping malformed remote record: {error}"
                );
                None
            }
        })
        .collect();
    records.sort_by_key(|record| std::cmp::Reverse(record.sort_key()));
    records
}
