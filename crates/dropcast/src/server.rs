//! `DropcastServer` builder and server loop.
//!
//! This is the entry point for running a Dropcast broadcast server. It ties
//! together the layers: transport → gate → lifecycle driver → room registry.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dropcast_room::{RegistryConfig, RoomRegistry};
use dropcast_transport::{WebSocketConnection, WebSocketTransport};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::DropcastError;
use crate::auth::Authenticator;
use crate::config::{Config, DEFAULT_HANDSHAKE_TIMEOUT_SECS};
use crate::handler::handle_connection;

/// How long `run_until` waits for live connections to close after shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks.
pub(crate) struct ServerState<A: Authenticator> {
    pub(crate) registry: Arc<RoomRegistry<WebSocketConnection>>,
    pub(crate) auth: A,
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) handshake_timeout: Duration,
    /// Flipped to `true` once the server stops; every handler watches it.
    pub(crate) shutdown: watch::Sender<bool>,
}

/// Builder for configuring and starting a Dropcast server.
///
/// # Example
///
/// ```rust,no_run
/// use dropcast::prelude::*;
///
/// # async fn start() -> Result<(), DropcastError> {
/// let server = DropcastServer::builder()
///     .bind("0.0.0.0:10325")
///     .build(AllowAll)
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct DropcastServerBuilder {
    bind_addr: String,
    registry_config: RegistryConfig,
    idle_timeout: Option<Duration>,
    handshake_timeout: Duration,
    shutdown_grace: Duration,
}

impl DropcastServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:10325".to_string(),
            registry_config: RegistryConfig::default(),
            idle_timeout: None,
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Creates a builder from a loaded [`Config`].
    pub fn from_config(config: &Config) -> Self {
        Self::new()
            .bind(&config.listen_address)
            .send_timeout(config.send_timeout)
            .idle_timeout(config.idle_timeout)
            .handshake_timeout(config.handshake_timeout)
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Bounds each write during broadcast. `None` lets a slow recipient
    /// block its sender indefinitely.
    pub fn send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.registry_config.send_timeout = timeout;
        self
    }

    /// Closes connections that send nothing for this long.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Bounds the WebSocket upgrade handshake.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Bounds how long shutdown waits for connections to leave and close.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Binds the listener and builds the server with the given gate.
    pub async fn build<A: Authenticator>(
        self,
        auth: A,
    ) -> Result<DropcastServer<A>, DropcastError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        let (shutdown, _) = watch::channel(false);

        let state = Arc::new(ServerState {
            registry: Arc::new(RoomRegistry::with_config(self.registry_config)),
            auth,
            idle_timeout: self.idle_timeout,
            handshake_timeout: self.handshake_timeout,
            shutdown,
        });

        Ok(DropcastServer {
            transport,
            state,
            shutdown_grace: self.shutdown_grace,
        })
    }
}

impl Default for DropcastServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Dropcast server.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// accepting connections.
pub struct DropcastServer<A: Authenticator> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A>>,
    shutdown_grace: Duration,
}

impl DropcastServer<crate::auth::AllowAll> {
    /// Creates a new builder.
    pub fn builder() -> DropcastServerBuilder {
        DropcastServerBuilder::new()
    }
}

impl<A: Authenticator> DropcastServer<A> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// The registry shared by all connections of this server.
    pub fn registry(&self) -> Arc<RoomRegistry<WebSocketConnection>> {
        Arc::clone(&self.state.registry)
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), DropcastError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` resolves.
    ///
    /// Each accepted connection is upgraded and driven on its own task.
    /// When `shutdown` fires the server stops accepting, tells every live
    /// connection to leave its channel and close, and waits up to the
    /// shutdown grace period for those tasks to finish. Stragglers are
    /// aborted.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), DropcastError> {
        tracing::info!(addr = ?self.local_addr().ok(), "Dropcast server running");
        tokio::pin!(shutdown);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(pending) => {
                        let peer = pending.peer_addr();
                        let state = Arc::clone(&self.state);
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(pending, state).await {
                                tracing::debug!(
                                    %peer,
                                    error = %e,
                                    "connection ended with error"
                                );
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    log_join_error(finished);
                }
            }
        }

        tracing::info!(live = connections.len(), "Dropcast server shutting down");
        self.state.shutdown.send_replace(true);

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(finished) = connections.join_next().await {
                log_join_error(finished);
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                "connections still open after shutdown grace, aborting"
            );
            connections.shutdown().await;
        }
        Ok(())
    }
}

fn log_join_error(finished: Result<(), tokio::task::JoinError>) {
    match finished {
        Err(e) if e.is_panic() => {
            tracing::error!(error = %e, "connection task panicked");
        }
        // Cancellation only comes from our own shutdown.
        _ => {}
    }
}
