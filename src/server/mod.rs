//! Server: listener, per-connection handlers and shared state
// (c) 2025 Ross Younger
//!
//! A running [`Server`] owns an accept loop, which spawns one task per connection.
//! The tasks share the [`ClientDirectory`], the [`FileRegistry`] and the blob store,
//! all held in a single [`ServerState`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument as _};

use crate::config::Configuration;
use crate::protocol::{SendReceivePair, SHUTTING_DOWN};
use crate::storage::{BlobStore, FsBlobStore};

mod connection;
mod directory;
mod registry;
mod session;
mod state;

pub use directory::{ClientDirectory, RegisterError};
pub use registry::{FileRecord, FileRegistry};
pub use session::{SessionHandle, SessionId};
pub use state::{ConnectionSettings, ServerState};

/// Pause after a failed accept, so a persistent failure (e.g. out of file descriptors) doesn't spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A running server.
///
/// Created listening by [`Server::start`]; [`Server::stop`] consumes it.
#[derive(Debug)]
pub struct Server {
    local_addr: SocketAddr,
    state: Arc<ServerState>,
    accept_cancel: CancellationToken,
    connections_cancel: CancellationToken,
    accept_task: JoinHandle<JoinSet<()>>,
    shutdown_timeout: Duration,
}

impl Server {
    /// Opens the configured storage root and starts listening
    pub async fn start(config: &Configuration) -> anyhow::Result<Self> {
        let store = FsBlobStore::open(&config.storage_root)
            .await
            .with_context(|| {
                format!(
                    "opening storage root {}",
                    config.storage_root.display()
                )
            })?;
        Self::start_with_store(config, Arc::new(store)).await
    }

    /// Starts listening, using the given blob store.
    ///
    /// If the configuration says so, the file registry is first rebuilt from the store.
    pub async fn start_with_store(
        config: &Configuration,
        store: Arc<dyn BlobStore>,
    ) -> anyhow::Result<Self> {
        let state = Arc::new(ServerState::new(store, config.connection_settings()));
        if config.rescan_storage {
            let count = state
                .rescan()
                .await
                .context("scanning storage for existing files")?;
            info!("found {count} stored file(s)");
        }

        let listener = TcpListener::bind(config.listen_address())
            .await
            .with_context(|| format!("binding to {}", config.listen_address()))?;
        let local_addr = listener.local_addr()?;

        let accept_cancel = CancellationToken::new();
        let connections_cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            state.clone(),
            accept_cancel.clone(),
            connections_cancel.clone(),
        ));
        info!("Server started on {local_addr}");
        debug!("{}", config.summary());

        Ok(Self {
            local_addr,
            state,
            accept_cancel,
            connections_cancel,
            accept_task,
            shutdown_timeout: config.shutdown_timeout_duration(),
        })
    }

    /// The address we are actually listening on (useful if the configured port was 0)
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accessor
    #[must_use]
    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Stops the server.
    ///
    /// New connections are refused. Every connected client is told the server is shutting
    /// down, then every connection (including those still handshaking) is closed.
    /// Connections that have not finished within the shutdown timeout are aborted.
    pub async fn stop(self) {
        info!("Stopping server");
        self.accept_cancel.cancel();
        let mut tasks = match self.accept_task.await {
            Ok(t) => t,
            Err(e) => {
                error!("accept loop failed: {e}");
                JoinSet::new()
            }
        };

        for session in self.state.directory().close() {
            let _ = session.notify(SHUTTING_DOWN);
            session.close();
        }
        self.connections_cancel.cancel();

        let drain = async {
            while let Some(result) = tasks.join_next().await {
                reap(result);
            }
        };
        if timeout(self.shutdown_timeout, drain).await.is_err() {
            warn!(
                "{} connection(s) did not close in time; aborting",
                tasks.len()
            );
            tasks.shutdown().await;
        }
        // Aborted handlers never got the chance to tidy up after themselves
        let _ = self.state.directory().close();
        info!("All clients disconnected");
        info!("Server stopped");
    }
}

fn reap(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("connection handler panicked: {e}");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<ServerState>,
    cancel: CancellationToken,
    connections_cancel: CancellationToken,
) -> JoinSet<()> {
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("set_nodelay failed for {peer}: {e}");
                    }
                    trace!("accepted connection from {peer}");
                    let _ = tasks.spawn(
                        connection::handle_connection(
                            SendReceivePair::from(stream),
                            peer,
                            state.clone(),
                            connections_cancel.child_token(),
                        )
                        .instrument(info_span!("conn", %peer)),
                    );
                }
                Err(e) => {
                    warn!("failed to accept connection: {e}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(result) = tasks.join_next(), if !tasks.is_empty() => reap(result),
        }
    }
    debug!("no longer accepting connections");
    tasks
}

/// Runs a server until interrupted (Ctrl-C), then stops it
#[cfg_attr(coverage_nightly, coverage(off))] // This is a thin adaptor, not worth testing
pub async fn server_main(config: &Configuration) -> anyhow::Result<()> {
    let server = Server::start(config).await?;
    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt signal")?;
    server.stop().await;
    Ok(())
}
