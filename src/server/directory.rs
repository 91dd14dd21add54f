//! Directory of connected clients
// (c) 2025 Ross Younger

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::session::SessionHandle;

/// Why a session could not be registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    /// Another live session already has this username
    #[error("username in use")]
    NameInUse,
    /// The server is shutting down and accepts no new sessions
    #[error("server is shutting down")]
    Closed,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, SessionHandle>,
    closed: bool,
}

/// The set of currently-connected users, keyed by username.
///
/// At most one session exists per username. Every check-then-modify sequence happens
/// under a single lock acquisition; the lock is never held across an await point.
#[derive(Debug, Default)]
pub struct ClientDirectory {
    inner: Mutex<Inner>,
}

impl ClientDirectory {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a session, unless its username is already taken.
    pub fn register(&self, handle: SessionHandle) -> Result<(), RegisterError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(RegisterError::Closed);
        }
        if inner.sessions.contains_key(handle.username()) {
            return Err(RegisterError::NameInUse);
        }
        let _ = inner
            .sessions
            .insert(handle.username().to_string(), handle);
        Ok(())
    }

    /// Removes a session, if (and only if) it is the one currently registered under its name.
    ///
    /// A stale handle from an earlier session never evicts a newer one with the same username.
    ///
    /// # Return
    /// true if the session was found and removed
    pub fn remove(&self, handle: &SessionHandle) -> bool {
        let mut inner = self.lock();
        match inner.sessions.get(handle.username()) {
            Some(current) if current.id() == handle.id() => {
                let _ = inner.sessions.remove(handle.username());
                true
            }
            _ => false,
        }
    }

    /// Looks up the live session for a username
    #[must_use]
    pub fn get(&self, username: &str) -> Option<SessionHandle> {
        self.lock().sessions.get(username).cloned()
    }

    /// Is there a live session for this username?
    #[must_use]
    pub fn contains(&self, username: &str) -> bool {
        self.lock().sessions.contains_key(username)
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Are there no live sessions?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The usernames of all live sessions, sorted
    #[must_use]
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().sessions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stops accepting registrations and removes every session, returning them.
    ///
    /// Used at shutdown. It is safe to call more than once.
    pub fn close(&self) -> Vec<SessionHandle> {
        let mut inner = self.lock();
        inner.closed = true;
        inner.sessions.drain().map(|(_, h)| h).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::{ClientDirectory, RegisterError};
    use crate::server::session::SessionHandle;

    fn handle(name: &str) -> SessionHandle {
        let (tx, _rx) = mpsc::channel(1);
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        SessionHandle::new(name.into(), peer, tx, CancellationToken::new())
    }

    #[test]
    fn one_session_per_name() {
        let dir = ClientDirectory::default();
        dir.register(handle("alice")).unwrap();
        assert_eq!(
            dir.register(handle("alice")).unwrap_err(),
            RegisterError::NameInUse
        );
        dir.register(handle("bob")).unwrap();
        assert_eq!(dir.usernames(), vec!["alice", "bob"]);
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn stale_handle_does_not_evict() {
        let dir = ClientDirectory::default();
        let first = handle("alice");
        dir.register(first.clone()).unwrap();
        assert!(dir.remove(&first));
        assert!(!dir.remove(&first));

        let second = handle("alice");
        dir.register(second.clone()).unwrap();
        assert!(!dir.remove(&first));
        assert_eq!(dir.get("alice").unwrap().id(), second.id());
    }

    #[test]
    fn close_drains_and_refuses() {
        let dir = ClientDirectory::default();
        dir.register(handle("alice")).unwrap();
        dir.register(handle("bob")).unwrap();
        let drained = dir.close();
        assert_eq!(drained.len(), 2);
        assert!(dir.is_empty());
        assert_eq!(
            dir.register(handle("carol")).unwrap_err(),
            RegisterError::Closed
        );
        assert!(dir.close().is_empty());
    }

    #[test]
    fn concurrent_registration_admits_exactly_one() {
        let dir = Arc::new(ClientDirectory::default());
        let winners: usize = std::thread::scope(|s| {
            let threads: Vec<_> = (0..16)
                .map(|_| {
                    let dir = dir.clone();
                    s.spawn(move || dir.register(handle("alice")).is_ok())
                })
                .collect();
            threads
                .into_iter()
                .map(|t| usize::from(t.join().unwrap()))
                .sum()
        });
        assert_eq!(winners, 1);
        assert_eq!(dir.len(), 1);
    }
}
