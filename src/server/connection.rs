//! Per-connection handler
// (c) 2025 Ross Younger

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt as _;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument as _};

use super::directory::RegisterError;
use super::session::{write_outbound, Session, SessionHandle, OUTBOUND_QUEUE_DEPTH};
use super::state::ServerState;
use crate::protocol::{
    Message, Outcome, ProtocolError, ReceivingStream, SendReceivePair, SendingStream, Status,
    WireCodec, USERNAME_IN_USE,
};
use crate::storage::{validate_name, NameKind};

/// Where a connection is in its lifecycle
#[derive(Debug)]
enum ConnectionState {
    AwaitingHandshake,
    Active(Session),
    Closed,
}

/// The reading half of a connection, which drives the state machine
struct Connection<R: ReceivingStream> {
    state: Arc<ServerState>,
    peer: SocketAddr,
    frames: FramedRead<R, WireCodec>,
    outbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

/// Runs a connection from accept to close.
///
/// Replies and notifications for this client are funnelled through a single queue, so each
/// frame goes out whole. Cancelling `cancel` makes the connection close promptly, whatever
/// state it is in; anything already queued for the client is still sent.
pub(super) async fn handle_connection<W, R>(
    pair: SendReceivePair<W, R>,
    peer: SocketAddr,
    state: Arc<ServerState>,
    cancel: CancellationToken,
) where
    W: SendingStream,
    R: ReceivingStream,
{
    let codec = state.settings().codec();
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
    let reader = Connection {
        state,
        peer,
        frames: FramedRead::new(pair.recv, codec),
        outbound: tx,
        cancel: cancel.clone(),
    };
    // The writer finishes once the reader (and every session handle) has dropped its sender.
    let ((), ()) = tokio::join!(reader.run(), write_outbound(pair.send, rx, codec, cancel));
    debug!("connection closed");
}

impl<R: ReceivingStream> Connection<R> {
    async fn run(mut self) {
        let mut state = ConnectionState::AwaitingHandshake;
        loop {
            state = match state {
                ConnectionState::AwaitingHandshake => self.handshake().await,
                ConnectionState::Active(session) => {
                    let span = info_span!("session", user = session.username());
                    self.serve(session).instrument(span).await
                }
                ConnectionState::Closed => break,
            };
        }
    }

    /// Reads the next frame, unless we are cancelled first.
    /// `None` means the peer closed the connection or we were asked to stop.
    async fn next_frame(&mut self) -> Option<Result<Message, ProtocolError>> {
        tokio::select! {
            () = self.cancel.cancelled() => None,
            frame = self.frames.next() => frame,
        }
    }

    /// Queues a message for the client.
    /// Returns false if the connection is going away.
    async fn reply(&self, msg: Message) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            result = self.outbound.send(msg) => result.is_ok(),
        }
    }

    async fn handshake(&mut self) -> ConnectionState {
        let timeout = self.state.settings().handshake_timeout;
        let frame = match tokio::time::timeout(timeout, self.next_frame()).await {
            Ok(f) => f,
            Err(_) => {
                info!("no handshake from {} within {timeout:?}", self.peer);
                return ConnectionState::Closed;
            }
        };
        let username = match frame {
            None => return ConnectionState::Closed,
            Some(Err(e)) => {
                warn!("handshake from {} failed: {e}", self.peer);
                return ConnectionState::Closed;
            }
            Some(Ok(Message::Handshake { username })) => username,
            Some(Ok(other)) => {
                warn!(
                    "{} sent {} instead of a handshake",
                    self.peer,
                    ProtocolError::Unexpected(other.tag())
                );
                return ConnectionState::Closed;
            }
        };

        if let Err(e) = validate_name(NameKind::Username, &username) {
            info!("rejected handshake from {}: {e}", self.peer);
            let _ = self
                .reply(Message::HandshakeAck(Outcome::error(
                    Status::InvalidName,
                    e.to_string(),
                )))
                .await;
            return ConnectionState::Closed;
        }

        let handle = SessionHandle::new(
            username.clone(),
            self.peer,
            self.outbound.clone(),
            self.cancel.clone(),
        );
        if let Err(e) = self.state.directory().register(handle.clone()) {
            info!("rejected handshake from {} as {username}: {e}", self.peer);
            let outcome = match e {
                RegisterError::NameInUse => Outcome::error(Status::NameInUse, USERNAME_IN_USE),
                RegisterError::Closed => Outcome::error(Status::Failed, e.to_string()),
            };
            let _ = self.reply(Message::HandshakeAck(outcome)).await;
            return ConnectionState::Closed;
        }

        let mut session = Session::new(handle);
        if !self.reply(Message::HandshakeAck(Outcome::Ok)).await {
            session.close(self.state.directory());
            return ConnectionState::Closed;
        }
        info!(
            "Client {username} connected from {} (session {})",
            self.peer,
            session.id()
        );
        ConnectionState::Active(session)
    }

    /// Processes requests, one at a time, until the connection ends
    async fn serve(&mut self, mut session: Session) -> ConnectionState {
        loop {
            let request = match self.next_frame().await {
                None => break,
                Some(Ok(msg)) => msg,
                Some(Err(e)) if e.is_transport() => {
                    debug!("transport error: {e}");
                    break;
                }
                Some(Err(e)) => {
                    warn!("protocol error: {e}");
                    break;
                }
            };
            let tag = request.tag();
            trace!("received {tag}");
            let reply = match self.dispatch(&session, request).await {
                Ok(r) => r,
                Err(e) => {
                    warn!("protocol error: {e}");
                    break;
                }
            };
            if !self.reply(reply).await {
                break;
            }
        }
        // Only now, with no request in flight, can another session take this username.
        session.close(self.state.directory());
        ConnectionState::Closed
    }

    async fn dispatch(&self, session: &Session, request: Message) -> Result<Message, ProtocolError> {
        let user = session.username();
        let state = &self.state;
        Ok(match request {
            Message::UploadRequest { filename, content } => {
                Message::UploadResult(state.upload(user, &filename, &content).await)
            }
            Message::ListRequest => Message::ListResponse(state.list()),
            Message::DownloadRequest { owner, filename } => {
                state.download(user, &owner, &filename).await
            }
            Message::DeleteRequest { filename } => {
                Message::DeleteResult(state.delete(user, &filename).await)
            }
            other => return Err(ProtocolError::Unexpected(other.tag())),
        })
    }
}
