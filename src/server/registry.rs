//! Registry of stored files
// (c) 2025 Ross Younger

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::protocol::ListEntry;
use crate::storage::StorageKey;

/// Metadata about one stored file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    storage_key: StorageKey,
    size: u64,
}

impl FileRecord {
    /// Constructor
    #[must_use]
    pub fn new(storage_key: StorageKey, size: u64) -> Self {
        Self { storage_key, size }
    }

    /// The user who uploaded the file
    #[must_use]
    pub fn owner(&self) -> &str {
        self.storage_key.owner()
    }

    /// Accessor
    #[must_use]
    pub fn filename(&self) -> &str {
        self.storage_key.filename()
    }

    /// Where the contents live
    #[must_use]
    pub fn storage_key(&self) -> &StorageKey {
        &self.storage_key
    }

    /// Size of the contents in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    fn map_key(&self) -> (String, String) {
        (self.owner().to_string(), self.filename().to_string())
    }
}

/// The set of stored files, keyed by (owner, filename).
///
/// Different owners may each have a file with the same name.
/// Every operation takes the lock exactly once, so each is atomic with respect to the others.
#[derive(Debug, Default)]
pub struct FileRegistry {
    records: RwLock<BTreeMap<(String, String), FileRecord>>,
}

impl FileRegistry {
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<(String, String), FileRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<(String, String), FileRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces a record, returning the one it replaced
    pub fn upsert(&self, record: FileRecord) -> Option<FileRecord> {
        self.write().insert(record.map_key(), record)
    }

    /// Reinstates a record that was removed, unless something has since taken its place.
    ///
    /// # Return
    /// true if the record was reinstated
    pub fn restore(&self, record: FileRecord) -> bool {
        let mut records = self.write();
        let key = record.map_key();
        if records.contains_key(&key) {
            return false;
        }
        let _ = records.insert(key, record);
        true
    }

    /// Looks up a record
    #[must_use]
    pub fn get(&self, owner: &str, filename: &str) -> Option<FileRecord> {
        self.read()
            .get(&(owner.to_string(), filename.to_string()))
            .cloned()
    }

    /// Removes a record, returning it
    pub fn remove(&self, owner: &str, filename: &str) -> Option<FileRecord> {
        self.write()
            .remove(&(owner.to_string(), filename.to_string()))
    }

    /// A consistent snapshot of every file, sorted by owner then filename
    #[must_use]
    pub fn snapshot(&self) -> Vec<ListEntry> {
        self.read()
            .values()
            .map(|r| ListEntry {
                owner: r.owner().to_string(),
                filename: r.filename().to_string(),
            })
            .collect()
    }

    /// Number of files
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Are there no files?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
