//! Client session driver
// (c) 2025 Ross Younger

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt as _};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};

use crate::protocol::{
    ListEntry, Message, Outcome, ProtocolError, ReceivingStream, SendReceivePair, SendingStream,
    Status, Tag, WireCodec,
};

/// How long [`ClientSession::disconnect`] waits for the server to close its side
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// How many replies may be buffered between the reader task and the caller
const RESPONSE_QUEUE_DEPTH: usize = 4;

/// Errors reported by a [`ClientSession`]
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Could not establish the connection
    #[error("connection failed: {0}")]
    Transport(#[from] std::io::Error),
    /// The server sent something we could not understand, or the transport failed mid-frame
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The server refused our handshake
    #[error("handshake rejected: {reason}")]
    HandshakeRejected {
        /// Error code
        status: Status,
        /// Human-readable reason
        reason: String,
    },
    /// The server refused the request
    #[error("{reason}")]
    Rejected {
        /// Error code
        status: Status,
        /// Human-readable reason
        reason: String,
    },
    /// The requested file does not exist
    #[error("file not found")]
    NotFound,
    /// The file exists but the server could not read it
    #[error("download failed: {0}")]
    DownloadFailed(String),
    /// Another request on this session has not yet completed
    #[error("a request is already in progress on this session")]
    RequestInFlight,
    /// The server sent a message that is not a valid reply to our request
    #[error("unexpected response from server: {0}")]
    UnexpectedResponse(Tag),
    /// The connection has gone
    #[error("disconnected from server")]
    Disconnected,
}

impl ClientError {
    fn rejected(outcome: Outcome) -> Result<(), Self> {
        match outcome {
            Outcome::Ok => Ok(()),
            Outcome::Error { status, reason } => Err(Self::Rejected { status, reason }),
        }
    }
}

/// Lifecycle of a [`ClientSession`]
///
/// There is no handshaking state to observe: [`ClientSession::connect`] performs the handshake
/// and only returns a session once the server has accepted it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum ClientState {
    /// Handshake complete; requests may be made
    Ready,
    /// The connection has closed
    Disconnected,
}

/// The request/reply half of a session; only one request may hold it at a time
struct Exchange {
    sink: FramedWrite<Box<dyn SendingStream>, WireCodec>,
    responses: mpsc::Receiver<Result<Message, ProtocolError>>,
    /// A request was sent but its caller gave up before the reply arrived
    awaiting_reply: bool,
}

/// A connection to a fileshed server, on behalf of one user.
///
/// Each operation sends a single request and waits for its reply. Only one request may be
/// in flight at a time; a concurrent attempt fails immediately with [`ClientError::RequestInFlight`].
///
/// Notifications from the server may arrive at any time. They are delivered to the channel
/// returned by [`take_notifications`](Self::take_notifications).
pub struct ClientSession {
    username: String,
    exchange: Mutex<Exchange>,
    notifications: Option<mpsc::UnboundedReceiver<String>>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("username", &self.username)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Routes inbound frames: notifications one way, everything else to whoever is waiting for a reply
async fn read_inbound<R: ReceivingStream>(
    mut frames: FramedRead<R, WireCodec>,
    responses: mpsc::Sender<Result<Message, ProtocolError>>,
    notifications: mpsc::UnboundedSender<String>,
    alive: Arc<AtomicBool>,
) {
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Notify { text }) => {
                trace!("notification: {text}");
                // The receiver may have been dropped; the caller doesn't want them
                let _ = notifications.send(text);
            }
            Ok(msg) => {
                if responses.send(Ok(msg)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("inbound stream failed: {e}");
                // Whoever receives this error must already see us as disconnected
                alive.store(false, Ordering::Relaxed);
                let _ = responses.send(Err(e)).await;
                break;
            }
        }
    }
    alive.store(false, Ordering::Relaxed);
    debug!("connection closed by server");
}

impl ClientSession {
    /// Connects to a server over TCP and identifies as `username`.
    ///
    /// `codec` sets the largest frame we will send or accept, which bounds the size of a file.
    /// It should match the server's `max_frame_size`.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        username: &str,
        codec: WireCodec,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::connect_with(SendReceivePair::from(stream), username, codec).await
    }

    /// Identifies as `username` over an already-established transport
    pub async fn connect_with<S, R>(
        pair: SendReceivePair<S, R>,
        username: &str,
        codec: WireCodec,
    ) -> Result<Self, ClientError>
    where
        S: SendingStream + 'static,
        R: ReceivingStream + 'static,
    {
        let (resp_tx, resp_rx) = mpsc::channel(RESPONSE_QUEUE_DEPTH);
        let (note_tx, note_rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_inbound(
            FramedRead::new(pair.recv, codec),
            resp_tx,
            note_tx,
            alive.clone(),
        ));
        let sink: Box<dyn SendingStream> = Box::new(pair.send);
        let session = Self {
            username: username.to_string(),
            exchange: Mutex::new(Exchange {
                sink: FramedWrite::new(sink, codec),
                responses: resp_rx,
                awaiting_reply: false,
            }),
            notifications: Some(note_rx),
            alive,
            reader,
        };

        let reply = session
            .request(Message::Handshake {
                username: username.to_string(),
            })
            .await;
        // On failure, dropping the session stops the reader task
        match reply? {
            Message::HandshakeAck(Outcome::Ok) => {
                debug!("connected as {username}");
                Ok(session)
            }
            Message::HandshakeAck(Outcome::Error { status, reason }) => {
                Err(ClientError::HandshakeRejected { status, reason })
            }
            other => Err(ClientError::UnexpectedResponse(other.tag())),
        }
    }

    /// Accessor
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ClientState {
        if self.alive.load(Ordering::Relaxed) {
            ClientState::Ready
        } else {
            ClientState::Disconnected
        }
    }

    /// Takes the receiver for server notifications.
    ///
    /// This returns `Some` only once. If nobody takes it, notifications are buffered
    /// for the life of the session.
    pub fn take_notifications(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.notifications.take()
    }

    /// Sends one request and waits for its reply
    async fn request(&self, msg: Message) -> Result<Message, ClientError> {
        let Ok(mut exchange) = self.exchange.try_lock() else {
            return Err(ClientError::RequestInFlight);
        };
        if self.state() == ClientState::Disconnected {
            return Err(ClientError::Disconnected);
        }
        if exchange.awaiting_reply {
            // An abandoned request's reply is still owed to us; it is not the answer to this one.
            // That request may not have been flushed yet.
            if let Err(e) = SinkExt::<Message>::flush(&mut exchange.sink).await {
                return Err(self.send_failed(e));
            }
            match exchange.responses.recv().await {
                Some(Ok(stale)) => warn!("discarding reply to abandoned request: {}", stale.tag()),
                Some(Err(e)) => return Err(e.into()),
                None => return Err(ClientError::Disconnected),
            }
            exchange.awaiting_reply = false;
        }
        let tag = msg.tag();
        trace!("sending {tag}");
        if let Err(e) = exchange.sink.feed(msg).await {
            return Err(self.send_failed(e));
        }
        // From here on, the frame goes out with the next flush even if we are cancelled
        exchange.awaiting_reply = true;
        if let Err(e) = SinkExt::<Message>::flush(&mut exchange.sink).await {
            exchange.awaiting_reply = false;
            return Err(self.send_failed(e));
        }
        let reply = exchange.responses.recv().await;
        exchange.awaiting_reply = false;
        match reply {
            Some(Ok(reply)) => {
                trace!("{tag} answered by {}", reply.tag());
                Ok(reply)
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(ClientError::Disconnected),
        }
    }

    fn send_failed(&self, e: ProtocolError) -> ClientError {
        if e.is_transport() {
            self.alive.store(false, Ordering::Relaxed);
        }
        e.into()
    }

    /// Uploads a file, replacing any previous file of ours with the same name
    pub async fn upload<B: Into<Bytes>>(&self, filename: &str, content: B) -> Result<(), ClientError> {
        let reply = self
            .request(Message::UploadRequest {
                filename: filename.to_string(),
                content: content.into(),
            })
            .await?;
        match reply {
            Message::UploadResult(outcome) => ClientError::rejected(outcome),
            other => Err(ClientError::UnexpectedResponse(other.tag())),
        }
    }

    /// Lists every file on the server
    pub async fn list(&self) -> Result<Vec<ListEntry>, ClientError> {
        match self.request(Message::ListRequest).await? {
            Message::ListResponse(entries) => Ok(entries),
            other => Err(ClientError::UnexpectedResponse(other.tag())),
        }
    }

    /// Downloads a file.
    ///
    /// # Return
    /// The filename as the server reported it, and the contents
    pub async fn download(&self, owner: &str, filename: &str) -> Result<(String, Bytes), ClientError> {
        let reply = self
            .request(Message::DownloadRequest {
                owner: owner.to_string(),
                filename: filename.to_string(),
            })
            .await?;
        match reply {
            Message::DownloadResponse { filename, content } => Ok((filename, content)),
            Message::NotFound => Err(ClientError::NotFound),
            Message::DownloadFailed { reason } => Err(ClientError::DownloadFailed(reason)),
            other => Err(ClientError::UnexpectedResponse(other.tag())),
        }
    }

    /// Deletes one of our files
    pub async fn delete(&self, filename: &str) -> Result<(), ClientError> {
        let reply = self
            .request(Message::DeleteRequest {
                filename: filename.to_string(),
            })
            .await?;
        match reply {
            Message::DeleteResult(outcome) => ClientError::rejected(outcome),
            other => Err(ClientError::UnexpectedResponse(other.tag())),
        }
    }

    /// Closes the connection, waiting briefly for the server to acknowledge
    pub async fn disconnect(mut self) {
        if let Err(e) = SinkExt::<Message>::close(&mut self.exchange.get_mut().sink).await {
            debug!("error closing connection: {e}");
        }
        if tokio::time::timeout(DISCONNECT_GRACE, &mut self.reader)
            .await
            .is_err()
        {
            debug!("server did not close the connection; dropping it");
        }
        debug!("{} disconnected", self.username);
        // Drop aborts the reader, if it is still running
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use futures_util::{SinkExt as _, StreamExt as _};
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncWriteExt as _, ReadHalf, SimplexStream, WriteHalf};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::{ClientError, ClientSession, ClientState};
    use crate::protocol::test_helpers::{new_test_plumbing, TestStreamPair};
    use crate::protocol::{ListEntry, Message, Outcome, ProtocolError, Status, WireCodec};

    /// The far end of the plumbing, played by the test
    struct FakeServer {
        rx: FramedRead<ReadHalf<SimplexStream>, WireCodec>,
        tx: FramedWrite<WriteHalf<SimplexStream>, WireCodec>,
    }

    impl FakeServer {
        fn new(pair: TestStreamPair) -> Self {
            Self {
                rx: FramedRead::new(pair.recv, WireCodec::default()),
                tx: FramedWrite::new(pair.send, WireCodec::default()),
            }
        }
        async fn expect(&mut self, msg: Message) {
            assert_eq!(self.rx.next().await.unwrap().unwrap(), msg);
        }
        async fn send(&mut self, msg: Message) {
            self.tx.send(msg).await.unwrap();
        }
    }

    async fn connected() -> (ClientSession, FakeServer) {
        let (client, server) = new_test_plumbing();
        let mut server = FakeServer::new(server);
        let (session, ()) = tokio::join!(
            ClientSession::connect_with(client, "alice", WireCodec::default()),
            async {
                server
                    .expect(Message::Handshake {
                        username: "alice".into(),
                    })
                    .await;
                server.send(Message::HandshakeAck(Outcome::Ok)).await;
            }
        );
        (session.unwrap(), server)
    }

    #[tokio::test]
    async fn handshake_rejected() {
        let (client, server) = new_test_plumbing();
        let mut server = FakeServer::new(server);
        let (result, ()) = tokio::join!(
            ClientSession::connect_with(client, "alice", WireCodec::default()),
            async {
                server
                    .send(Message::HandshakeAck(Outcome::error(
                        Status::NameInUse,
                        "username in use",
                    )))
                    .await;
            }
        );
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            ClientError::HandshakeRejected {
                status: Status::NameInUse,
                ..
            }
        ));
        assert_eq!(err.to_string(), "handshake rejected: username in use");
    }

    #[tokio::test]
    async fn connect_waits_for_handshake_ack() {
        let (client, server) = new_test_plumbing();
        let mut server = FakeServer::new(server);
        let connecting = ClientSession::connect_with(client, "alice", WireCodec::default());
        tokio::pin!(connecting);
        tokio::select! {
            _ = &mut connecting => panic!("connected before the handshake was answered"),
            () = server.expect(Message::Handshake { username: "alice".into() }) => (),
        }
        assert!(tokio::time::timeout(Duration::from_millis(50), &mut connecting)
            .await
            .is_err());
        server.send(Message::HandshakeAck(Outcome::Ok)).await;
        let session = connecting.await.unwrap();
        assert_eq!(session.state(), ClientState::Ready);
    }

    #[tokio::test]
    async fn operations() {
        let (session, mut server) = connected().await;
        assert_eq!(session.state(), ClientState::Ready);

        let (r, ()) = tokio::join!(session.upload("a.txt", &b"data"[..]), async {
            server
                .expect(Message::UploadRequest {
                    filename: "a.txt".into(),
                    content: Bytes::from_static(b"data"),
                })
                .await;
            server.send(Message::UploadResult(Outcome::Ok)).await;
        });
        r.unwrap();

        let entries = vec![ListEntry {
            owner: "alice".into(),
            filename: "a.txt".into(),
        }];
        let (r, ()) = tokio::join!(session.list(), async {
            server.expect(Message::ListRequest).await;
            server.send(Message::ListResponse(entries.clone())).await;
        });
        assert_eq!(r.unwrap(), entries);

        let (r, ()) = tokio::join!(session.download("bob", "b"), async {
            server
                .expect(Message::DownloadRequest {
                    owner: "bob".into(),
                    filename: "b".into(),
                })
                .await;
            server.send(Message::NotFound).await;
        });
        assert!(matches!(r.unwrap_err(), ClientError::NotFound));

        let (r, ()) = tokio::join!(session.delete("zzz"), async {
            server
                .expect(Message::DeleteRequest {
                    filename: "zzz".into(),
                })
                .await;
            server
                .send(Message::DeleteResult(Outcome::error(
                    Status::NotFound,
                    "not found or not owner",
                )))
                .await;
        });
        assert_eq!(r.unwrap_err().to_string(), "not found or not owner");
    }

    #[tokio::test]
    async fn notifications_are_routed_separately() {
        let (mut session, mut server) = connected().await;
        let mut notes = session.take_notifications().unwrap();
        assert!(session.take_notifications().is_none());

        let (r, ()) = tokio::join!(session.list(), async {
            server.expect(Message::ListRequest).await;
            server.send(Message::notify("a.txt was downloaded by bob")).await;
            server.send(Message::ListResponse(vec![])).await;
        });
        assert_eq!(r.unwrap(), vec![]);
        assert_eq!(notes.recv().await.unwrap(), "a.txt was downloaded by bob");
    }

    #[tokio::test]
    async fn concurrent_requests_are_refused() {
        let (session, mut server) = connected().await;
        let session = Arc::new(session);
        let s2 = session.clone();
        let first = tokio::spawn(async move { s2.list().await });
        // wait until the first request is on the wire
        server.expect(Message::ListRequest).await;
        assert!(matches!(
            session.list().await.unwrap_err(),
            ClientError::RequestInFlight
        ));
        server.send(Message::ListResponse(vec![])).await;
        assert_eq!(first.await.unwrap().unwrap(), vec![]);
    }

    #[tokio::test]
    async fn late_reply_to_abandoned_request_is_discarded() {
        let (session, mut server) = connected().await;
        // The request reaches the server, but the caller stops waiting before the reply comes
        let (abandoned, ()) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(100), session.list()),
            server.expect(Message::ListRequest)
        );
        assert!(abandoned.is_err());

        let (r, ()) = tokio::join!(session.download("bob", "b"), async {
            server.send(Message::ListResponse(vec![])).await;
            server
                .expect(Message::DownloadRequest {
                    owner: "bob".into(),
                    filename: "b".into(),
                })
                .await;
            server.send(Message::NotFound).await;
        });
        assert!(matches!(r.unwrap_err(), ClientError::NotFound));

        // and the session is back in step
        let (r, ()) = tokio::join!(session.list(), async {
            server.expect(Message::ListRequest).await;
            server.send(Message::ListResponse(vec![])).await;
        });
        assert_eq!(r.unwrap(), vec![]);
    }

    #[tokio::test]
    async fn reply_that_arrived_after_abandonment_is_discarded() {
        let (session, mut server) = connected().await;
        let (abandoned, ()) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(100), session.list()),
            server.expect(Message::ListRequest)
        );
        assert!(abandoned.is_err());
        // This time the stale reply is already queued when the next request starts
        server.send(Message::ListResponse(vec![])).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (r, ()) = tokio::join!(session.delete("a.txt"), async {
            server
                .expect(Message::DeleteRequest {
                    filename: "a.txt".into(),
                })
                .await;
            server.send(Message::DeleteResult(Outcome::Ok)).await;
        });
        r.unwrap();
    }

    #[tokio::test]
    async fn frame_limit_applies_to_replies() {
        let (client, server) = new_test_plumbing();
        let mut server = FakeServer::new(server);
        let (session, ()) = tokio::join!(
            ClientSession::connect_with(client, "alice", WireCodec::new(1024)),
            async {
                let _ = server.rx.next().await;
                server.send(Message::HandshakeAck(Outcome::Ok)).await;
            }
        );
        let session = session.unwrap();
        let (r, ()) = tokio::join!(session.download("bob", "big"), async {
            let _ = server.rx.next().await;
            server
                .send(Message::DownloadResponse {
                    filename: "big".into(),
                    content: Bytes::from(vec![0u8; 4096]),
                })
                .await;
        });
        assert!(matches!(
            r.unwrap_err(),
            ClientError::Protocol(ProtocolError::FrameTooLarge { limit: 1024, .. })
        ));
    }

    #[tokio::test]
    async fn unexpected_reply() {
        let (session, mut server) = connected().await;
        let (r, ()) = tokio::join!(session.list(), async {
            server.expect(Message::ListRequest).await;
            server.send(Message::UploadResult(Outcome::Ok)).await;
        });
        assert!(matches!(
            r.unwrap_err(),
            ClientError::UnexpectedResponse(crate::protocol::Tag::UploadResult)
        ));
    }

    #[tokio::test]
    async fn server_goes_away() {
        let (session, mut server) = connected().await;
        server.tx.get_mut().shutdown().await.unwrap();
        // Depending on timing, the request may or may not be sent; either way, no reply comes
        assert!(matches!(
            session.list().await.unwrap_err(),
            ClientError::Disconnected
        ));
        assert_eq!(session.state(), ClientState::Disconnected);
        assert!(matches!(
            session.list().await.unwrap_err(),
            ClientError::Disconnected
        ));
    }

    #[tokio::test]
    async fn disconnect_closes_our_side() {
        let (session, mut server) = connected().await;
        let ((), ()) = tokio::join!(session.disconnect(), async {
            assert!(server.rx.next().await.is_none());
            server.tx.get_mut().shutdown().await.unwrap();
        });
    }
}
