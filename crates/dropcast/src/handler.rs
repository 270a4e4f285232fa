//! Per-connection lifecycle driver.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Complete the WebSocket upgrade → capture the request query
//!   2. Run the upgrade gate → reject with a policy close frame on failure
//!   3. Join the requested channel (`Connecting → Joined`)
//!   4. Loop: read a frame → broadcast it to the channel, until the peer
//!      leaves, the link fails, a broadcast evicts this connection, or the
//!      server shuts down
//!   5. On exit, leave the channel and close the transport
//!      (`Closing → Closed`), whatever ended the loop

use std::sync::Arc;
use std::time::Duration;

use dropcast_room::{ChannelName, ConnectionHandle, DeliverySettings, RoomRegistry};
use dropcast_transport::{
    CloseCode, Connection, ConnectionId, Frame, PendingUpgrade, TransportError,
    WebSocketConnection,
};
use tokio::sync::watch;

use crate::DropcastError;
use crate::auth::Authenticator;
use crate::lifecycle::LifecycleState;
use crate::server::ServerState;

/// Query parameter naming the channel to join.
pub const CHANNEL_PARAM: &str = "channel";

/// Query parameter asking for self-delivery of broadcasts.
pub const ECHO_PARAM: &str = "echo";

type Handle = ConnectionHandle<WebSocketConnection>;
type Registry = RoomRegistry<WebSocketConnection>;

/// Why the read loop stopped.
enum CloseReason {
    PeerClosed,
    ReadFailed(TransportError),
    IdleTimeout,
    /// A broadcast failed to reach this connection and removed it.
    Evicted,
    Shutdown,
}

/// Drop guard that removes a connection from the registry when the
/// handler exits.
///
/// Normal exits call [`release`](Self::release) and wait for cleanup. If
/// the task panics or is cancelled instead, `Drop` runs the same cleanup
/// on a spawned task since it cannot await.
struct MembershipGuard {
    handle: Option<Handle>,
    registry: Arc<Registry>,
}

impl MembershipGuard {
    async fn release(mut self) {
        if let Some(handle) = self.handle.take() {
            leave_and_close(&self.registry, handle).await;
        }
    }
}

impl Drop for MembershipGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let registry = Arc::clone(&self.registry);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                leave_and_close(&registry, handle).await;
            });
        }
    }
}

/// Leaves the channel and closes the transport. Both steps tolerate a
/// connection that was already evicted and closed during a broadcast.
async fn leave_and_close(registry: &Registry, handle: Handle) {
    let removed = registry.leave(&handle).await;
    let close = handle.connection().close();
    let closed = tokio::time::timeout(registry.config().close_timeout, close).await;
    tracing::debug!(
        conn_id = %handle.id(),
        channel = %handle.channel(),
        removed,
        closed = matches!(closed, Ok(Ok(()))),
        "connection released"
    );
}

fn advance(state: &mut LifecycleState, target: LifecycleState, conn_id: ConnectionId) {
    debug_assert!(state.can_transition_to(target), "{state} -> {target}");
    tracing::trace!(%conn_id, from = %state, to = %target, "lifecycle transition");
    *state = target;
}

/// Handles a single connection from upgrade to close.
pub(crate) async fn handle_connection<A: Authenticator>(
    pending: PendingUpgrade,
    state: Arc<ServerState<A>>,
) -> Result<(), DropcastError> {
    let (conn, request) = pending.upgrade(state.handshake_timeout).await?;
    let conn_id = conn.id();
    let mut lifecycle = LifecycleState::Connecting;

    // --- Step 1: Gate ---
    if let Err(e) = state.auth.authorize(&request).await {
        tracing::info!(%conn_id, error = %e, "connection rejected");
        if let Err(close_err) = conn.close_with(CloseCode::Policy, "unauthorized").await {
            tracing::debug!(%conn_id, error = %close_err, "failed to send rejection");
        }
        return Err(e.into());
    }

    // --- Step 2: Join ---
    let channel = ChannelName::new(request.query_param(CHANNEL_PARAM).unwrap_or_default());
    let settings = DeliverySettings::from_flag(request.query_param(ECHO_PARAM));
    let handle = ConnectionHandle::new(Arc::new(conn), channel);

    state.registry.join(&handle, settings).await;
    let guard = MembershipGuard {
        handle: Some(handle.clone()),
        registry: Arc::clone(&state.registry),
    };
    advance(&mut lifecycle, LifecycleState::Joined, conn_id);
    tracing::debug!(%conn_id, channel = %handle.channel(), "client joined");

    // --- Step 3: Message loop ---
    let mut shutdown = state.shutdown.subscribe();
    let reason = read_loop(&handle, &state, &mut shutdown).await;

    advance(&mut lifecycle, LifecycleState::Closing, conn_id);
    match &reason {
        CloseReason::PeerClosed => {
            tracing::debug!(%conn_id, "connection closed cleanly");
        }
        CloseReason::ReadFailed(e) => {
            tracing::debug!(%conn_id, error = %e, "link error or disconnect");
        }
        CloseReason::IdleTimeout => {
            tracing::debug!(%conn_id, "connection idle, closing");
        }
        CloseReason::Evicted => {
            tracing::debug!(%conn_id, "evicted during broadcast, closing");
        }
        CloseReason::Shutdown => {
            tracing::debug!(%conn_id, "server shutting down, closing");
        }
    }

    // --- Step 4: Release ---
    guard.release().await;
    advance(&mut lifecycle, LifecycleState::Closed, conn_id);
    Ok(())
}

/// Reads frames and broadcasts each one before reading the next.
async fn read_loop<A: Authenticator>(
    handle: &Handle,
    state: &ServerState<A>,
    shutdown: &mut watch::Receiver<bool>,
) -> CloseReason {
    let conn = handle.connection();
    loop {
        let next = tokio::select! {
            next = next_frame(conn, state.idle_timeout) => next,
            () = handle.evicted() => return CloseReason::Evicted,
            _ = shutdown_requested(shutdown) => return CloseReason::Shutdown,
        };

        match next {
            Some(Ok(Some(frame))) => {
                state
                    .registry
                    .broadcast(handle.channel(), &frame, handle)
                    .await;
            }
            Some(Ok(None)) => return CloseReason::PeerClosed,
            Some(Err(e)) => return CloseReason::ReadFailed(e),
            None => return CloseReason::IdleTimeout,
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender ends the connection as well.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Waits for the next frame. `None` means the idle timeout elapsed.
async fn next_frame(
    conn: &WebSocketConnection,
    idle_timeout: Option<Duration>,
) -> Option<Result<Option<Frame>, TransportError>> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, conn.recv()).await.ok(),
        None => Some(conn.recv().await),
    }
}
