//! Storage adapters for Tally
//!
//! Two backing stores sit behind the sync coordinator: a JSON-file local
//! store used while signed out, and a remote document store keyed by the
//! signed-in identity.

mod http_remote;
mod local;
mod memory_remote;
mod remote;

pub use http_remote::HttpRemoteStore;
pub use local::LocalStore;
pub use memory_remote::MemoryRemoteStore;
pub use remote::{DocumentEvent, DocumentFeed, FeedEvent, FeedGuard, RemoteFeed, RemoteStore};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A persisted unit of application data belonging to a named collection.
///
/// Records are mutated only by full replacement; within a collection ids are
/// unique and ordering is recomputed on every read (newest-first by
/// [`Record::sort_key`]).
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable collection name, shared by the local file layout and the
    /// remote sub-collection. Must not change across versions.
    const COLLECTION: &'static str;

    /// Unique identifier within the collection
    fn id(&self) -> String;

    /// Ordering key; collections are sorted newest-first by this value
    fn sort_key(&self) -> i64;
}

/// A single per-identity settings document with merge-write semantics.
///
/// Settings documents are a distinct shape from collections: one mutable
/// resource per identity, written whole or merged field-by-field, never
/// appended to.
pub trait SettingsDocument:
    Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Stable document name, shared by the local file layout and the remote
    /// settings namespace. Must not change across versions.
    const DOC: &'static str;
}

/// Shallow-merge `fields` into `target`. Both are expected to be JSON
/// objects; non-object targets are replaced wholesale.
pub(crate) fn merge_fields(target: &mut serde_json::Value, fields: &serde_json::Value) {
    match (target.as_object_mut(), fields.as_object()) {
        (Some(target_map), Some(field_map)) => {
            for (key, value) in field_map {
                target_map.insert(key.clone(), value.clone());
            }
        }
        _ => *target = fields.clone(),
    }
}
