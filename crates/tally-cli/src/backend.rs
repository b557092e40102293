//! Remote backend selection for the CLI.
//!
//! Signed in with a configured backend the CLI talks HTTP; otherwise it
//! carries an inert in-process store that is never reached while the
//! coordinators stay in signed-out mode.

use serde_json::Value;
use tally_core::auth::Identity;
use tally_core::store::{
    DocumentFeed, HttpRemoteStore, MemoryRemoteStore, RemoteFeed, RemoteStore,
};

/// The CLI's remote store: HTTP when reachable, in-process otherwise
#[derive(Clone)]
pub enum Backend {
    Http(HttpRemoteStore),
    Offline(MemoryRemoteStore),
}

impl Backend {
    /// In-process backend for signed-out and `--mock` runs
    #[must_use]
    pub fn offline() -> Self {
        Self::Offline(MemoryRemoteStore::new())
    }
}

impl RemoteStore for Backend {
    async fn snapshot(
        &self,
        identity: &Identity,
        collection: &str,
    ) -> tally_core::Result<Vec<Value>> {
        match self {
            Self::Http(store) => store.snapshot(identity, collection).await,
            Self::Offline(store) => store.snapshot(identity, collection).await,
        }
    }

    fn subscribe(&self, identity: &Identity, collection: &str) -> RemoteFeed {
        match self {
            Self::Http(store) => store.subscribe(identity, collection),
            Self::Offline(store) => store.subscribe(identity, collection),
        }
    }

    async fn upsert(
        &self,
        identity: &Identity,
        collection: &str,
        id: &str,
        record: Value,
    ) -> tally_core::Result<()> {
        match self {
            Self::Http(store) => store.upsert(identity, collection, id, record).await,
            Self::Offline(store) => store.upsert(identity, collection, id, record).await,
        }
    }

    async fn remove(
        &self,
        identity: &Identity,
        collection: &str,
        id: &str,
    ) -> tally_core::Result<()> {
        match self {
            Self::Http(store) => store.remove(identity, collection, id).await,
            Self::Offline(store) => store.remove(identity, collection, id).await,
        }
    }

    async fn get_document(
        &self,
        identity: &Identity,
        doc: &str,
    ) -> tally_core::Result<Option<Value>> {
        match self {
            Self::Http(store) => store.get_document(identity, doc).await,
            Self::Offline(store) => store.get_document(identity, doc).await,
        }
    }

    async fn set_document(
        &self,
        identity: &Identity,
        doc: &str,
        value: Value,
    ) -> tally_core::Result<()> {
        match self {
            Self::Http(store) => store.set_document(identity, doc, value).await,
            Self::Offline(store) => store.set_document(identity, doc, value).await,
        }
    }

    async fn merge_document(
        &self,
        identity: &Identity,
        doc: &str,
        fields: Value,
    ) -> tally_core::Result<()> {
        match self {
            Self::Http(store) => store.merge_document(identity, doc, fields).await,
            Self::Offline(store) => store.merge_document(identity, doc, fields).await,
        }
    }

    fn subscribe_document(&self, identity: &Identity, doc: &str) -> DocumentFeed {
        match self {
            Self::Http(store) => store.subscribe_document(identity, doc),
            Self::Offline(store) => store.subscribe_document(identity, doc),
        }
    }
}
