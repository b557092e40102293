//! Local store adapter
//!
//! Persists one JSON file per entity type under the app data directory.
//! Local storage is a best-effort cache, not a source of truth: malformed
//! data reads as empty and write failures are logged no-ops, never hard
//! errors for the caller.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{Record, SettingsDocument};

/// JSON-file-backed key-value store for one device.
///
/// Single-threaded, single-device by construction; read-modify-write needs
/// no concurrent-writer protection.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at `dir`. The directory is created lazily on
    /// first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory this store persists into
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load an arbitrary named value, falling back to `T::default()` when
    /// the file is missing or unreadable.
    pub fn load_named<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let path = self.file_path(key);
        if !path.exists() {
            return T::default();
        }
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!("Failed to read {}: {error}", path.display());
                return T::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!("Malformed data in {}: {error}", path.display());
                T::default()
            }
        }
    }

    /// Persist an arbitrary named value, replacing the file atomically
    /// (temp file + rename). Failures are logged no-ops.
    pub fn save_named<T: Serialize>(&self, key: &str, value: &T) {
        if let Err(error) = self.try_save(key, value) {
            tracing::warn!("Failed to save local data for '{key}': {error}");
        }
    }

    /// Load a collection, newest first
    pub fn load_collection<T: Record>(&self) -> Vec<T> {
        let mut records: Vec<T> = self.load_named(T::COLLECTION);
        records.sort_by_key(|record| std::cmp::Reverse(record.sort_key()));
        records
    }

    /// Overwrite a collection in its entirety
    pub fn save_collection<T: Record>(&self, records: &[T]) {
        self.save_named(T::COLLECTION, &records);
    }

    /// Insert or replace one record by id
    pub fn upsert<T: Record>(&self, record: &T) -> Vec<T> {
        let mut records = self.load_collection::<T>();
        records.retain(|existing| existing.id() != record.id());
        records.push(record.clone());
        records.sort_by_key(|existing| std::cmp::Reverse(existing.sort_key()));
        self.save_collection(&records);
        records
    }

    /// Remove one record by id
    pub fn remove<T: Record>(&self, id: &str) -> Vec<T> {
        let mut records = self.load_collection::<T>();
        records.retain(|existing| existing.id() != id);
        self.save_collection(&records);
        records
    }

    /// Load a settings document, falling back to its default
    pub fn load_document<T: SettingsDocument>(&self) -> T {
        self.load_named(T::DOC)
    }

    /// Persist a settings document
    pub fn save_document<T: SettingsDocument>(&self, document: &T) {
        self.save_named(T::DOC, document);
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn try_save<T: Serialize>(&self, key: &str, value: &T) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.file_path(key);
        let serialized = serde_json::to_string_pretty(value)
            .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))?;
        let temp_path = self.dir.join(format!(".{key}.json.tmp"));
        std::fs::write(&temp_path, serialized)?;
        std::fs::rename(&temp_path, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Receipt, ReceiptItem, StoreNameHistory};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn receipt(store: &str, created_at: i64) -> Receipt {
        let mut receipt = Receipt::new(
            store,
            Category::Food,
            vec![ReceiptItem {
                name: "Coffee".to_string(),
                quantity: 1,
                price: 55.0,
            }],
            "cash",
        );
        receipt.created_at = created_at;
        receipt
    }

    #[test]
    fn test_load_missing_collection_is_empty() {
        let tmp = tempdir().unwrap();
        let store = LocalStore::new(tmp.path());
        let records: Vec<Receipt> = store.load_collection();
        assert!(records.is_empty());
    }

    #[test]
    fn test_upsert_and_remove_round_trip() {
        let tmp = tempdir().unwrap();
        let store = LocalStore::new(tmp.path());

        let first = receipt("A", 1);
        let second = receipt("B", 2);
        store.upsert(&first);
        store.upsert(&second);

        let loaded: Vec<Receipt> = store.load_collection();
        assert_eq!(loaded.len(), 2);
        // Newest first
        assert_eq!(loaded[0].store_name, "B");

        store.remove::<Receipt>(&first.id.as_str());
        let loaded: Vec<Receipt> = store.load_collection();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].store_name, "B");
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let tmp = tempdir().unwrap();
        let store = LocalStore::new(tmp.path());

        let mut record = receipt("Before", 1);
        store.upsert(&record);
        record.store_name = "After".to_string();
        store.upsert(&record);

        let loaded: Vec<Receipt> = store.load_collection();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].store_name, "After");
    }

    #[test]
    fn test_malformed_file_reads_as_empty() {
        let tmp = tempdir().unwrap();
        let store = LocalStore::new(tmp.path());
        std::fs::write(tmp.path().join("receipts.json"), "not json {{{").unwrap();

        let records: Vec<Receipt> = store.load_collection();
        assert!(records.is_empty());
    }

    #[test]
    fn test_document_round_trip_and_default() {
        let tmp = tempdir().unwrap();
        let store = LocalStore::new(tmp.path());

        let missing: StoreNameHistory = store.load_document();
        assert!(missing.names.is_empty());

        let mut history = StoreNameHistory::default();
        history.remember("7-ELEVEN");
        store.save_document(&history);

        let loaded: StoreNameHistory = store.load_document();
        assert_eq!(loaded, history);
    }
}
