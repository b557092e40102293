//! Remote store adapter contract
//!
//! A remote store holds per-identity collections (one document per record,
//! id-keyed) and per-identity settings documents with merge-write
//! semantics. Conflicts resolve last-write-wins in the backend; this layer
//! adds no locking, leasing, or retry of its own.

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::Identity;
use crate::error::Result;

/// One event on a collection feed
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Full snapshot of the collection, including the initial one.
    /// Snapshots for one collection arrive in monotonically-consistent
    /// order; nothing is guaranteed across collections.
    Snapshot(Vec<Value>),
    /// The feed failed. No further events arrive; the adapter does not
    /// retry — reconnecting is the caller's decision.
    Error(String),
}

/// One event on a settings-document feed
#[derive(Debug, Clone)]
pub enum DocumentEvent {
    /// Current document contents, `None` when it does not exist yet
    Document(Option<Value>),
    /// The feed failed; no further events arrive
    Error(String),
}

/// Cancels the producing task when dropped. Dropping the guard is the only
/// cancellation primitive; in-flight writes complete or fail independently.
#[derive(Debug, Default)]
pub struct FeedGuard {
    handle: Option<JoinHandle<()>>,
}

impl FeedGuard {
    /// Guard that aborts `handle` on drop
    #[must_use]
    pub fn for_task(handle: JoinHandle<()>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Guard with nothing to cancel (feeds with no backing task)
    #[must_use]
    pub fn noop() -> Self {
        Self::default()
    }
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// A live collection feed plus its cancellation guard
#[derive(Debug)]
pub struct RemoteFeed {
    pub(crate) events: mpsc::Receiver<FeedEvent>,
    #[allow(dead_code)] // held for its Drop
    pub(crate) guard: FeedGuard,
}

impl RemoteFeed {
    pub(crate) fn new(events: mpsc::Receiver<FeedEvent>, guard: FeedGuard) -> Self {
        Self { events, guard }
    }

    /// Next event, or `None` once the feed is closed
    pub async fn next(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }
}

/// A live settings-document feed plus its cancellation guard
#[derive(Debug)]
pub struct DocumentFeed {
    pub(crate) events: mpsc::Receiver<DocumentEvent>,
    #[allow(dead_code)] // held for its Drop
    pub(crate) guard: FeedGuard,
}

impl DocumentFeed {
    pub(crate) fn new(events: mpsc::Receiver<DocumentEvent>, guard: FeedGuard) -> Self {
        Self { events, guard }
    }

    /// Next event, or `None` once the feed is closed
    pub async fn next(&mut self) -> Option<DocumentEvent> {
        self.events.recv().await
    }
}

/// Contract for the per-identity remote document store.
///
/// Writes are complete records with last-write-wins semantics — no merge,
/// no optimistic-concurrency check. Each collection is exclusively owned by
/// one identity.
#[allow(async_fn_in_trait)]
pub trait RemoteStore: Clone + Send + Sync + 'static {
    /// One-shot fetch of a collection's current records
    async fn snapshot(&self, identity: &Identity, collection: &str) -> Result<Vec<Value>>;

    /// Open a realtime feed for a collection. The initial snapshot is
    /// delivered as the first event.
    fn subscribe(&self, identity: &Identity, collection: &str) -> RemoteFeed;

    /// Write a complete record by id (insert or replace)
    async fn upsert(
        &self,
        identity: &Identity,
        collection: &str,
        id: &str,
        record: Value,
    ) -> Result<()>;

    /// Delete a record by id; deleting a missing record is not an error
    async fn remove(&self, identity: &Identity, collection: &str, id: &str) -> Result<()>;

    /// Fetch a settings document, `None` when absent
    async fn get_document(&self, identity: &Identity, doc: &str) -> Result<Option<Value>>;

    /// Replace a settings document wholesale
    fn set_document(
        &self,
        identity: &Identity,
        doc: &str,
        value: Value,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Merge fields into a settings document, creating it when absent
    async fn merge_document(&self, identity: &Identity, doc: &str, fields: Value) -> Result<()>;

    /// Open a realtime feed for a settings document. The current contents
    /// are delivered as the first event.
    fn subscribe_document(&self, identity: &Identity, doc: &str) -> DocumentFeed;
}
