//! The registry's view of one live connection.

use std::fmt;
use std::sync::Arc;

use dropcast_transport::{Connection, ConnectionId};
use tokio::sync::watch;

use crate::ChannelName;

/// A live connection bound to exactly one channel.
///
/// Identity is the connection's [`ConnectionId`], not the pointer. Cloning
/// a handle is cheap and yields the same identity, including its eviction
/// flag: once the registry evicts any clone, every clone reports it.
pub struct ConnectionHandle<C: Connection> {
    id: ConnectionId,
    channel: ChannelName,
    conn: Arc<C>,
    evicted: Arc<watch::Sender<bool>>,
}

impl<C: Connection> ConnectionHandle<C> {
    /// Wraps a connection. The channel is fixed for the handle's lifetime.
    pub fn new(conn: Arc<C>, channel: ChannelName) -> Self {
        Self {
            id: conn.id(),
            channel,
            conn,
            evicted: Arc::new(watch::channel(false).0),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    /// The underlying connection, for reads and writes.
    pub fn connection(&self) -> &Arc<C> {
        &self.conn
    }

    /// Returns `true` once the registry has evicted this connection.
    pub fn is_evicted(&self) -> bool {
        *self.evicted.borrow()
    }

    /// Resolves when the registry evicts this connection. Resolves
    /// immediately if that already happened.
    ///
    /// The connection's reader waits on this alongside its next read so a
    /// forced close ends the read loop even while the peer stays silent.
    pub async fn evicted(&self) {
        let mut rx = self.evicted.subscribe();
        // The sender lives in `self`, so this only returns once flagged.
        let _ = rx.wait_for(|evicted| *evicted).await;
    }

    pub(crate) fn mark_evicted(&self) {
        self.evicted.send_replace(true);
    }
}

impl<C: Connection> Clone for ConnectionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            channel: self.channel.clone(),
            conn: Arc::clone(&self.conn),
            evicted: Arc::clone(&self.evicted),
        }
    }
}

impl<C: Connection> PartialEq for ConnectionHandle<C> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<C: Connection> Eq for ConnectionHandle<C> {}

impl<C: Connection> fmt::Debug for ConnectionHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("evicted", &self.is_evicted())
            .finish_non_exhaustive()
    }
}
