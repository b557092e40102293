//! In-memory remote store.
//!
//! Backs tests and offline development. All mutations and feed
//! notifications happen under one lock, which makes it the reference for
//! the ordering contract: every snapshot a subscriber sees reflects a
//! superset of the writes in the one before it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

use super::{
    merge_fields, DocumentEvent, DocumentFeed, FeedEvent, FeedGuard, RemoteFeed, RemoteStore,
};
use crate::auth::Identity;
use crate::error::{Error, Result};

const FEED_CAPACITY: usize = 64;

type Scope = (String, String);

#[derive(Default)]
struct State {
    collections: HashMap<Scope, BTreeMap<String, Value>>,
    documents: HashMap<Scope, Value>,
    collection_feeds: HashMap<Scope, Vec<mpsc::Sender<FeedEvent>>>,
    document_feeds: HashMap<Scope, Vec<mpsc::Sender<DocumentEvent>>>,
    fail_writes: bool,
}

/// In-process [`RemoteStore`] with realtime feeds
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    inner: Arc<Mutex<State>>,
}

impl MemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: make every subsequent write fail until reset
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_writable(state: &State) -> Result<()> {
        if state.fail_writes {
            return Err(Error::Remote("injected write failure".to_string()));
        }
        Ok(())
    }

    fn notify_collection(state: &mut State, scope: &Scope) {
        let records = collection_snapshot(state, scope);
        if let Some(feeds) = state.collection_feeds.get_mut(scope) {
            feeds.retain(|tx| {
                !matches!(
                    tx.try_send(FeedEvent::Snapshot(records.clone())),
                    Err(mpsc::error::TrySendError::Closed(_))
                )
            });
        }
    }

    fn notify_document(state: &mut State, scope: &Scope) {
        let document = state.documents.get(scope).cloned();
        if let Some(feeds) = state.document_feeds.get_mut(scope) {
            feeds.retain(|tx| {
                !matches!(
                    tx.try_send(DocumentEvent::Document(document.clone())),
                    Err(mpsc::error::TrySendError::Closed(_))
                )
            });
        }
    }
}

fn scope_for(identity: &Identity, name: &str) -> Scope {
    (identity.user_id.clone(), name.to_string())
}

fn collection_snapshot(state: &State, scope: &Scope) -> Vec<Value> {
    state
        .collections
        .get(scope)
        .map(|records| records.values().cloned().collect())
        .unwrap_or_default()
}

impl RemoteStore for MemoryRemoteStore {
    async fn snapshot(&self, identity: &Identity, collection: &str) -> Result<Vec<Value>> {
        let state = self.lock();
        Ok(collection_snapshot(&state, &scope_for(identity, collection)))
    }

    fn subscribe(&self, identity: &Identity, collection: &str) -> RemoteFeed {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let scope = scope_for(identity, collection);
        let mut state = self.lock();
        let initial = collection_snapshot(&state, &scope);
        let _ = tx.try_send(FeedEvent::Snapshot(initial));
        state.collection_feeds.entry(scope).or_default().push(tx);
        RemoteFeed::new(rx, FeedGuard::noop())
    }

    async fn upsert(
        &self,
        identity: &Identity,
        collection: &str,
        id: &str,
        record: Value,
    ) -> Result<()> {
        let scope = scope_for(identity, collection);
        let mut state = self.lock();
        Self::check_writable(&state)?;
        state
            .collections
            .entry(scope.clone())
            .or_default()
            .insert(id.to_string(), record);
        Self::notify_collection(&mut state, &scope);
        Ok(())
    }

    async fn remove(&self, identity: &Identity, collection: &str, id: &str) -> Result<()> {
        let scope = scope_for(identity, collection);
        let mut state = self.lock();
        Self::check_writable(&state)?;
        if let Some(records) = state.collections.get_mut(&scope) {
            records.remove(id);
        }
        Self::notify_collection(&mut state, &scope);
        Ok(())
    }

    async fn get_document(&self, identity: &Identity, doc: &str) -> Result<Option<Value>> {
        let state = self.lock();
        Ok(state.documents.get(&scope_for(identity, doc)).cloned())
    }

    async fn set_document(&self, identity: &Identity, doc: &str, value: Value) -> Result<()> {
        let scope = scope_for(identity, doc);
        let mut state = self.lock();
        Self::check_writable(&state)?;
        state.documents.insert(scope.clone(), value);
        Self::notify_document(&mut state, &scope);
        Ok(())
    }

    async fn merge_document(&self, identity: &Identity, doc: &str, fields: Value) -> Result<()> {
        let scope = scope_for(identity, doc);
        let mut state = self.lock();
        Self::check_writable(&state)?;
        let document = state
            .documents
            .entry(scope.clone())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        merge_fields(document, &fields);
        Self::notify_document(&mut state, &scope);
        Ok(())
    }

    fn subscribe_document(&self, identity: &Identity, doc: &str) -> DocumentFeed {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let scope = scope_for(identity, doc);
        let mut state = self.lock();
        let initial = state.documents.get(&scope).cloned();
        let _ = tx.try_send(DocumentEvent::Document(initial));
        state.document_feeds.entry(scope).or_default().push(tx);
        DocumentFeed::new(rx, FeedGuard::noop())
    }
}
