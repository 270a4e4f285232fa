//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::{Connection, ConnectionId, Frame, TransportError, UpgradeRequest};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

fn io_error(kind: std::io::ErrorKind, e: WsError) -> std::io::Error {
    std::io::Error::new(kind, e)
}

/// Maps a write-side error; writing after either side closed is not a
/// link failure.
fn write_error(e: WsError) -> TransportError {
    match e {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::SendAfterClosing) => {
            TransportError::ConnectionClosed(e.to_string())
        }
        e => TransportError::SendFailed(io_error(std::io::ErrorKind::BrokenPipe, e)),
    }
}

/// A WebSocket listener that hands out raw TCP connections.
///
/// The upgrade handshake is deliberately not part of [`accept`](Self::accept):
/// callers run [`PendingUpgrade::upgrade`] inside the per-connection task
/// so one slow client cannot hold up the accept loop.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Waits for the next incoming TCP connection.
    pub async fn accept(&self) -> Result<PendingUpgrade, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::trace!(%addr, "accepted TCP connection");
        Ok(PendingUpgrade { stream, addr })
    }
}

/// A TCP connection that has not completed the WebSocket handshake yet.
pub struct PendingUpgrade {
    stream: TcpStream,
    addr: SocketAddr,
}

impl PendingUpgrade {
    /// Address of the remote peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Performs the WebSocket handshake, capturing the request target.
    pub async fn upgrade(
        self,
        timeout: Duration,
    ) -> Result<(WebSocketConnection, UpgradeRequest), TransportError> {
        let addr = self.addr;
        let mut captured: Option<UpgradeRequest> = None;

        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            captured = Some(UpgradeRequest::new(req.uri().path(), req.uri().query()));
            Ok(resp)
        };

        let ws = tokio::time::timeout(
            timeout,
            tokio_tungstenite::accept_hdr_async(self.stream, callback),
        )
        .await
        .map_err(|_| TransportError::Timeout("websocket handshake"))?
        .map_err(|e| {
            TransportError::HandshakeFailed(io_error(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;

        let request = captured.unwrap_or_default();
        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, %addr, path = request.path(), "accepted WebSocket connection");

        let (sink, stream) = ws.split();
        let conn = WebSocketConnection {
            id,
            addr,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        };
        Ok((conn, request))
    }
}

/// A single WebSocket connection.
///
/// The write and read halves sit behind separate locks: a task parked in
/// [`recv`](Connection::recv) never blocks writers.
pub struct WebSocketConnection {
    id: ConnectionId,
    addr: SocketAddr,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    /// Address of the remote peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Sends a close frame carrying `code` and `reason`, then flushes.
    pub async fn close_with(
        &self,
        code: CloseCode,
        reason: &str,
    ) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code,
            reason: reason.to_owned().into(),
        };
        self.sink
            .lock()
            .await
            .send(Message::Close(Some(frame)))
            .await
            .map_err(write_error)
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, frame: &Frame) -> Result<(), Self::Error> {
        let msg = match frame {
            Frame::Text(text) => Message::Text(text.clone().into()),
            Frame::Binary(data) => Message::Binary(data.clone().into()),
        };
        self.sink.lock().await.send(msg).await.map_err(write_error)
    }

    async fn recv(&self) -> Result<Option<Frame>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Frame::Text(text.as_str().to_owned())));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(Frame::Binary(data.to_vec())));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    return Ok(None);
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(io_error(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink.lock().await.close().await.map_err(write_error)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
