//! Server-side view of a connected client
// (c) 2025 Ross Younger

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::directory::ClientDirectory;
use crate::protocol::{Message, SendingStream, WireCodec};

/// How many outbound frames may be queued for a single connection
pub(super) const OUTBOUND_QUEUE_DEPTH: usize = 32;

/// Unique identifier for a session, within the life of the process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub(super) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A cloneable reference to a live session, as held in the [`ClientDirectory`].
///
/// Anyone holding a handle may queue notifications for the client or ask its
/// connection to close. Neither operation blocks.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: SessionId,
    username: String,
    peer: SocketAddr,
    outbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub(super) fn new(
        username: String,
        peer: SocketAddr,
        outbound: mpsc::Sender<Message>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: SessionId::next(),
            username,
            peer,
            outbound,
            cancel,
        }
    }

    /// Accessor
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Accessor
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Accessor
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queues a [`Message::Notify`] for this client, without waiting.
    ///
    /// This is best-effort: if the client's queue is full or its connection has gone,
    /// the notification is dropped and logged.
    ///
    /// # Return
    /// true if the notification was queued
    pub fn notify<S: Into<String>>(&self, text: S) -> bool {
        match self.outbound.try_send(Message::notify(text)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("notification to {} dropped: queue full", self.username);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("notification to {} dropped: connection closed", self.username);
                false
            }
        }
    }

    /// Asks the session's connection handler to close. Returns immediately.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Lifecycle of a [`Session`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub(super) enum SessionState {
    Connected,
    Closed,
}

/// One authenticated client connection, owned by its connection handler
#[derive(Debug)]
pub(super) struct Session {
    handle: SessionHandle,
    state: SessionState,
}

impl Session {
    pub(super) fn new(handle: SessionHandle) -> Self {
        Self {
            handle,
            state: SessionState::Connected,
        }
    }

    pub(super) fn id(&self) -> SessionId {
        self.handle.id()
    }

    pub(super) fn username(&self) -> &str {
        self.handle.username()
    }

    #[cfg(test)]
    pub(super) fn state(&self) -> SessionState {
        self.state
    }

    /// Removes the session from the directory and closes its transport.
    /// Calling this more than once is harmless.
    pub(super) fn close(&mut self, directory: &ClientDirectory) {
        if self.state == SessionState::Closed {
            return;
        }
        let _ = directory.remove(&self.handle);
        self.handle.close();
        self.state = SessionState::Closed;
        info!("Client {} disconnected", self.username());
    }
}

/// Writes queued frames to the transport until every sender has been dropped.
///
/// If the transport fails, `cancel` is triggered so the reading side of the
/// connection stops too.
pub(super) async fn write_outbound<W: SendingStream>(
    send: W,
    mut queue: mpsc::Receiver<Message>,
    codec: WireCodec,
    cancel: CancellationToken,
) {
    let mut sink = FramedWrite::new(send, codec);
    while let Some(msg) = queue.recv().await {
        let tag = msg.tag();
        if let Err(e) = sink.send(msg).await {
            debug!("failed to send {tag}: {e}");
            cancel.cancel();
            return;
        }
        trace!("sent {tag}");
    }
    // All senders gone: flush and shut down our half of the transport.
    if let Err(e) = SinkExt::<Message>::close(&mut sink).await {
        debug!("error closing transport: {e}");
    }
}
