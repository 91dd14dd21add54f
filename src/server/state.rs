//! State shared by every connection, and the operations on it
// (c) 2025 Ross Younger

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use human_repr::HumanCount as _;
use tracing::{debug, info, warn};

use super::directory::ClientDirectory;
use super::registry::{FileRecord, FileRegistry};
use crate::protocol::{ListEntry, Message, Outcome, Status, WireCodec, NOT_FOUND_OR_NOT_OWNER};
use crate::storage::{BlobStore, StorageError, StorageKey};

/// Per-connection tunables
#[derive(Clone, Copy, Debug)]
pub struct ConnectionSettings {
    /// Largest frame we will send or receive
    pub max_frame_size: u32,
    /// How long a new connection has to identify itself
    pub handshake_timeout: Duration,
}

impl ConnectionSettings {
    pub(super) fn codec(&self) -> WireCodec {
        WireCodec::new(self.max_frame_size)
    }
}

/// Everything the connection handlers share.
///
/// The only mutable state is the [`ClientDirectory`] and the [`FileRegistry`], each of which
/// does its own locking.
#[derive(Debug)]
pub struct ServerState {
    directory: ClientDirectory,
    registry: FileRegistry,
    store: Arc<dyn BlobStore>,
    settings: ConnectionSettings,
}

fn storage_failure(e: &StorageError) -> Outcome {
    match e {
        StorageError::InvalidName { .. } => Outcome::error(Status::InvalidName, e.to_string()),
        _ => Outcome::error(Status::Failed, e.to_string()),
    }
}

impl ServerState {
    /// Constructor
    #[must_use]
    pub fn new(store: Arc<dyn BlobStore>, settings: ConnectionSettings) -> Self {
        Self {
            directory: ClientDirectory::default(),
            registry: FileRegistry::default(),
            store,
            settings,
        }
    }

    /// Accessor
    #[must_use]
    pub fn directory(&self) -> &ClientDirectory {
        &self.directory
    }

    /// Accessor
    #[must_use]
    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    /// Accessor
    #[must_use]
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Repopulates the registry from whatever is already in the blob store.
    ///
    /// # Return
    /// The number of files found
    pub async fn rescan(&self) -> Result<usize, StorageError> {
        let found = self.store.scan().await?;
        let count = found.len();
        for (key, size) in found {
            debug!("found {key} ({})", size.human_count_bytes());
            let _ = self.registry.upsert(FileRecord::new(key, size));
        }
        Ok(count)
    }

    /// Stores a file on behalf of `owner`, replacing any previous version.
    ///
    /// The registry is only updated once the contents are safely stored.
    pub async fn upload(&self, owner: &str, filename: &str, content: &Bytes) -> Outcome {
        let key = match StorageKey::new(owner, filename) {
            Ok(k) => k,
            Err(e) => {
                debug!("rejected upload: {e}");
                return storage_failure(&e);
            }
        };
        if let Err(e) = self.store.write(&key, content).await {
            warn!("upload of {key} failed: {e}");
            return storage_failure(&e);
        }
        let size = content.len() as u64;
        let _ = self.registry.upsert(FileRecord::new(key, size));
        info!(
            "File {filename} uploaded by {owner} ({})",
            size.human_count_bytes()
        );
        Outcome::Ok
    }

    /// Lists every stored file
    #[must_use]
    pub fn list(&self) -> Vec<ListEntry> {
        self.registry.snapshot()
    }

    /// Retrieves a file.
    ///
    /// If the file's owner is connected (and is not the requester), they are notified.
    ///
    /// # Return
    /// One of [`Message::DownloadResponse`], [`Message::NotFound`] or [`Message::DownloadFailed`].
    pub async fn download(&self, requester: &str, owner: &str, filename: &str) -> Message {
        let Some(record) = self.registry.get(owner, filename) else {
            return Message::NotFound;
        };
        let content = match self.store.read(record.storage_key()).await {
            Ok(c) => c,
            Err(StorageError::NotFound(key)) => {
                warn!("{key} is registered but missing from storage");
                return Message::NotFound;
            }
            Err(e) => {
                warn!("download of {} failed: {e}", record.storage_key());
                return Message::DownloadFailed {
                    reason: e.to_string(),
                };
            }
        };
        if owner != requester {
            if let Some(session) = self.directory.get(owner) {
                let _ = session.notify(format!("{filename} was downloaded by {requester}"));
            }
        }
        debug!("{requester} downloaded {}", record.storage_key());
        Message::DownloadResponse {
            filename: filename.to_string(),
            content,
        }
    }

    /// Deletes one of `owner`'s files.
    ///
    /// The record leaves the registry before the contents are removed, so nobody can list or
    /// download a file that is part-way through deletion.
    pub async fn delete(&self, owner: &str, filename: &str) -> Outcome {
        let Some(record) = self.registry.remove(owner, filename) else {
            return Outcome::error(Status::NotFound, NOT_FOUND_OR_NOT_OWNER);
        };
        match self.store.delete(record.storage_key()).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {
                info!("File {filename} deleted by {owner}");
                Outcome::Ok
            }
            Err(e) => {
                warn!("delete of {} failed: {e}", record.storage_key());
                let _ = self.registry.restore(record);
                storage_failure(&e)
            }
        }
    }
}
