//! Durable storage of file contents
// (c) 2025 Ross Younger
//!
//! The server treats storage as an opaque blob store addressed by [`StorageKey`].
//! [`FsBlobStore`] is the production implementation; it keeps one directory per owner
//! under a storage root.

use std::fmt::Display;

use async_trait::async_trait;
use bytes::Bytes;

mod fs;
pub use fs::FsBlobStore;

/// Longest name (in bytes) we accept for a user or a file
pub const MAX_NAME_LENGTH: usize = 255;

/// What sort of name is being validated
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum NameKind {
    /// A username, which is also an owner directory
    Username,
    /// A filename within an owner directory
    Filename,
}

/// Errors reported by a [`BlobStore`]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The key has no committed contents
    #[error("{0} not found")]
    NotFound(StorageKey),
    /// The name cannot be safely stored
    #[error("invalid {kind} {name:?}: {reason}")]
    InvalidName {
        /// Which name was rejected
        kind: NameKind,
        /// The offending name
        name: String,
        /// Why
        reason: &'static str,
    },
    /// Anything else that went wrong with the underlying storage
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Checks that a name is safe to use as a single path component.
///
/// Usernames additionally may not begin with `.`, as dot-directories in the storage root
/// are reserved for our own use.
pub fn validate_name(kind: NameKind, name: &str) -> Result<(), StorageError> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.len() > MAX_NAME_LENGTH {
        Some("too long")
    } else if name == "." || name == ".." {
        Some("reserved name")
    } else if name.contains(['/', '\\', '\0']) {
        Some("must not contain path separators or NUL")
    } else if kind == NameKind::Username && name.starts_with('.') {
        Some("must not begin with '.'")
    } else {
        None
    };
    match reason {
        None => Ok(()),
        Some(reason) => Err(StorageError::InvalidName {
            kind,
            name: name.to_string(),
            reason,
        }),
    }
}

/// Opaque reference to a stored blob: the (owner, filename) pair, validated
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey {
    owner: String,
    filename: String,
}

impl StorageKey {
    /// Constructor. Fails if either name is not safe to store.
    pub fn new(owner: &str, filename: &str) -> Result<Self, StorageError> {
        validate_name(NameKind::Username, owner)?;
        validate_name(NameKind::Filename, filename)?;
        Ok(Self {
            owner: owner.to_string(),
            filename: filename.to_string(),
        })
    }

    /// Accessor
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Accessor
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }
}

impl Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.filename)
    }
}

/// A durable store of file contents.
///
/// Implementations must make [`write`](BlobStore::write) atomic: a reader sees either the
/// previous contents or the new contents, never a partial write, even if the process dies
/// part-way through.
#[async_trait]
pub trait BlobStore: Send + Sync + std::fmt::Debug {
    /// Stores `data` under `key`, replacing anything already there
    async fn write(&self, key: &StorageKey, data: &[u8]) -> Result<(), StorageError>;

    /// Retrieves the contents stored under `key`
    async fn read(&self, key: &StorageKey) -> Result<Bytes, StorageError>;

    /// Removes the contents stored under `key`
    async fn delete(&self, key: &StorageKey) -> Result<(), StorageError>;

    /// Is there anything stored under `key`?
    async fn exists(&self, key: &StorageKey) -> Result<bool, StorageError>;

    /// Lists every committed blob and its size
    async fn scan(&self) -> Result<Vec<(StorageKey, u64)>, StorageError>;
}
