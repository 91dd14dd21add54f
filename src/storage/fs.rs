//! Filesystem blob store
// (c) 2025 Ross Younger

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt as _;
use tracing::{debug, trace, warn};

use super::{validate_name, BlobStore, NameKind, StorageError, StorageKey};

/// Directory under the storage root where writes are staged before being committed
const STAGING_DIR: &str = ".partial";

/// Stores each blob as `<root>/<owner>/<filename>`.
///
/// Writes are staged in `<root>/.partial/` and renamed into place, so a committed file is
/// never observed half-written. Anything left in the staging area by a crash is removed
/// when the store is next opened.
#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
    staging: PathBuf,
    sequence: AtomicU64,
}

impl FsBlobStore {
    /// Opens (creating if necessary) a store rooted at the given directory
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        let staging = root.join(STAGING_DIR);
        tokio::fs::create_dir_all(&staging).await?;
        let store = Self {
            root,
            staging,
            sequence: AtomicU64::new(0),
        };
        store.purge_staging().await?;
        debug!("opened storage at {}", store.root.display());
        Ok(store)
    }

    /// Accessor
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &StorageKey) -> PathBuf {
        self.root.join(key.owner()).join(key.filename())
    }

    fn staging_path(&self) -> PathBuf {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.staging
            .join(format!("{pid}.{seq}", pid = std::process::id()))
    }

    async fn purge_staging(&self) -> Result<(), StorageError> {
        let mut dir = tokio::fs::read_dir(&self.staging).await?;
        while let Some(entry) = dir.next_entry().await? {
            warn!(
                "removing interrupted write {}",
                entry.path().display()
            );
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                warn!("could not remove {}: {e}", entry.path().display());
            }
        }
        Ok(())
    }

    /// Writes and syncs the staging file. The caller is responsible for removing it on failure.
    async fn stage(path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_all().await
    }
}

fn not_found_or(key: &StorageKey, e: std::io::Error) -> StorageError {
    if e.kind() == ErrorKind::NotFound {
        StorageError::NotFound(key.clone())
    } else {
        StorageError::Io(e)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn write(&self, key: &StorageKey, data: &[u8]) -> Result<(), StorageError> {
        let destination = self.path_for(key);
        let staged = self.staging_path();
        trace!("staging {key} at {}", staged.display());

        let result = async {
            tokio::fs::create_dir_all(self.root.join(key.owner())).await?;
            Self::stage(&staged, data).await?;
            tokio::fs::rename(&staged, &destination).await
        }
        .await;

        if let Err(e) = result {
            // Best effort; the staging area is purged on next open in any case.
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read(&self, key: &StorageKey) -> Result<Bytes, StorageError> {
        tokio::fs::read(self.path_for(key))
            .await
            .map(Bytes::from)
            .map_err(|e| not_found_or(key, e))
    }

    async fn delete(&self, key: &StorageKey) -> Result<(), StorageError> {
        tokio::fs::remove_file(self.path_for(key))
            .await
            .map_err(|e| not_found_or(key, e))
    }

    async fn exists(&self, key: &StorageKey) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(self.path_for(key)).await?)
    }

    async fn scan(&self) -> Result<Vec<(StorageKey, u64)>, StorageError> {
        let mut found = Vec::new();
        let mut owners = tokio::fs::read_dir(&self.root).await?;
        while let Some(owner_dir) = owners.next_entry().await? {
            if !owner_dir.file_type().await?.is_dir() {
                continue;
            }
            let Some(owner) = owner_dir.file_name().to_str().map(str::to_string) else {
                warn!("ignoring non-UTF-8 directory {}", owner_dir.path().display());
                continue;
            };
            if validate_name(NameKind::Username, &owner).is_err() {
                // includes our own staging directory
                continue;
            }
            let mut files = tokio::fs::read_dir(owner_dir.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let meta = file.metadata().await?;
                if !meta.is_file() {
                    continue;
                }
                let name = file.file_name();
                let Some(key) = name
                    .to_str()
                    .and_then(|filename| StorageKey::new(&owner, filename).ok())
                else {
                    warn!("ignoring unexpected file {}", file.path().display());
                    continue;
                };
                found.push((key, meta.len()));
            }
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::{FsBlobStore, STAGING_DIR};
    use crate::storage::{BlobStore as _, StorageError, StorageKey};

    fn key(owner: &str, filename: &str) -> StorageKey {
        StorageKey::new(owner, filename).unwrap()
    }

    #[tokio::test]
    async fn write_read_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::open(dir.path()).await.unwrap();
        let k = key("alice", "notes.txt");

        assert!(!store.exists(&k).await.unwrap());
        store.write(&k, b"a:b:c").await.unwrap();
        assert!(store.exists(&k).await.unwrap());
        assert_eq!(&store.read(&k).await.unwrap()[..], b"a:b:c");
        assert!(dir.path().join("alice").join("notes.txt").is_file());

        store.delete(&k).await.unwrap();
        assert!(!store.exists(&k).await.unwrap());
        assert!(matches!(
            store.read(&k).await.unwrap_err(),
            StorageError::NotFound(_)
        ));
        assert!(matches!(
            store.delete(&k).await.unwrap_err(),
            StorageError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn overwrite_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::open(dir.path()).await.unwrap();
        let k = key("alice", "notes.txt");
        store.write(&k, b"a much longer first version").await.unwrap();
        store.write(&k, b"v2").await.unwrap();
        assert_eq!(&store.read(&k).await.unwrap()[..], b"v2");
        // nothing left behind in staging
        let staged = std::fs::read_dir(dir.path().join(STAGING_DIR))
            .unwrap()
            .count();
        assert_eq!(staged, 0);
    }

    #[tokio::test]
    async fn interrupted_writes_are_purged() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(STAGING_DIR)).unwrap();
        std::fs::write(dir.path().join(STAGING_DIR).join("123.0"), b"half").unwrap();
        let _store = FsBlobStore::open(dir.path()).await.unwrap();
        assert_eq!(
            std::fs::read_dir(dir.path().join(STAGING_DIR))
                .unwrap()
                .count(),
            0
        );
    }

    #[tokio::test]
    async fn scan_finds_committed_files_only() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::open(dir.path()).await.unwrap();
        store.write(&key("alice", "a.txt"), b"1").await.unwrap();
        store.write(&key("alice", "b.txt"), b"22").await.unwrap();
        store.write(&key("bob", "c.txt"), b"333").await.unwrap();
        // junk that is not ours
        std::fs::write(dir.path().join("stray-file"), b"x").unwrap();
        std::fs::create_dir_all(dir.path().join("bob").join("subdir")).unwrap();

        let mut found = store.scan().await.unwrap();
        found.sort();
        assert_eq!(
            found,
            vec![
                (key("alice", "a.txt"), 1),
                (key("alice", "b.txt"), 2),
                (key("bob", "c.txt"), 3),
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_write_preserves_previous_version() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::open(dir.path()).await.unwrap();
        let k = key("alice", "notes.txt");
        store.write(&k, b"original").await.unwrap();

        // Make the owner directory read-only so the rename cannot land
        let owner_dir = dir.path().join("alice");
        std::fs::set_permissions(&owner_dir, std::fs::Permissions::from_mode(0o500)).unwrap();
        let result = store.write(&k, b"replacement").await;
        std::fs::set_permissions(&owner_dir, std::fs::Permissions::from_mode(0o700)).unwrap();

        // root ignores permissions, in which case the write legitimately succeeds
        if result.is_err() {
            assert_eq!(&store.read(&k).await.unwrap()[..], b"original");
        }
    }
}
