//! Transport abstraction layer for Dropcast.
//!
//! Provides the [`Connection`] trait that the room layer writes through,
//! the [`Frame`] unit that travels over it, and the request metadata
//! ([`UpgradeRequest`]) captured when a client connects.
//!
//! # Feature Flags
//!
//! - `websocket` (default) — WebSocket transport via `tokio-tungstenite`

mod error;
mod request;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use request::UpgradeRequest;
#[cfg(feature = "websocket")]
pub use websocket::{PendingUpgrade, WebSocketConnection, WebSocketTransport};
#[cfg(feature = "websocket")]
pub use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use std::fmt;
use std::future::Future;

/// Opaque identifier for a connection.
///
/// Identifiers are handed out from a process-wide counter and never
/// reused, so they are safe to use as map keys after the connection
/// itself is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The transport-level type tag of a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// One message unit: an opaque payload plus its type tag.
///
/// The payload is relayed as-is. Nothing in Dropcast inspects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Returns the frame's type tag.
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Text(_) => FrameKind::Text,
            Self::Binary(_) => FrameKind::Binary,
        }
    }

    /// Returns the payload as raw bytes regardless of the tag.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => data,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single live connection that can send and receive frames.
///
/// Methods take `&self` so one task can block in [`recv`](Self::recv)
/// while other tasks write to the same connection through an `Arc`.
/// The returned futures are `Send` so code that is generic over the
/// connection type can still be spawned onto the runtime.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends a frame to the remote peer, keeping its type tag.
    fn send(
        &self,
        frame: &Frame,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Frame>, Self::Error>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
