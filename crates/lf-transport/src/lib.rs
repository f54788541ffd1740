//! lf-transport
//!
//! Transport Session boundary: one WebSocket connection that sends and
//! receives whole text frames.
//!
//! - [`Connector`] opens a session for a URI and subprotocol.
//! - [`TransportSession`] sends text, yields complete inbound text frames
//!   until the peer closes, and closes on request.
//! - [`WsConnector`] is the production implementation (tokio-tungstenite).
//! - `ScriptedConnector` (feature `testkit`) is an in-memory session for
//!   protocol and client tests.
//!
//! A peer close ends the receive sequence (`None`); it is never surfaced as
//! an error. Reconnecting requires a new [`Connector::connect`] call.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

mod ws;

#[cfg(feature = "testkit")]
mod scripted;

pub use ws::WsConnector;

#[cfg(feature = "testkit")]
pub use scripted::{ScriptHandle, ScriptedConnector, ScriptedSession};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Opening the socket failed. Fatal to the attempt, never retried here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The URI or a handshake header could not be built.
    InvalidRequest(String),
    /// The server answered the upgrade with a non-101 HTTP status.
    Rejected { status: u16, body: String },
    /// DNS / TCP / TLS / handshake failure.
    Io(String),
    /// The connect deadline elapsed.
    Timeout(Duration),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::InvalidRequest(msg) => write!(f, "invalid websocket request: {msg}"),
            ConnectError::Rejected { status, body } if body.is_empty() => {
                write!(f, "websocket upgrade rejected: http {status}")
            }
            ConnectError::Rejected { status, body } => {
                write!(f, "websocket upgrade rejected: http {status}: {body}")
            }
            ConnectError::Io(msg) => write!(f, "websocket connect failed: {msg}"),
            ConnectError::Timeout(after) => write!(f, "websocket connect timed out after {after:?}"),
        }
    }
}

impl std::error::Error for ConnectError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The session was already closed (locally or by the peer).
    Closed,
    Io(String),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Closed => write!(f, "send on closed websocket"),
            SendError::Io(msg) => write!(f, "websocket send failed: {msg}"),
        }
    }
}

impl std::error::Error for SendError {}

/// The connection broke mid-stream (not a clean close).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveError {
    Io(String),
}

impl fmt::Display for ReceiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiveError::Io(msg) => write!(f, "websocket receive failed: {msg}"),
        }
    }
}

impl std::error::Error for ReceiveError {}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Opens transport sessions.
///
/// Object-safe so the client can hold an `Arc<dyn Connector>` and swap in a
/// scripted connector under test.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        uri: &str,
        subprotocol: &str,
    ) -> Result<Box<dyn TransportSession>, ConnectError>;
}

/// One open WebSocket connection.
#[async_trait]
pub trait TransportSession: Send {
    /// Send one complete text frame.
    async fn send(&mut self, text: String) -> Result<(), SendError>;

    /// Next complete inbound text frame.
    ///
    /// `None` once the peer has closed (after the close acknowledgment has
    /// been sent) or after [`TransportSession::close`]. Continuation frames
    /// are already coalesced; control frames are never yielded.
    async fn receive(&mut self) -> Option<Result<String, ReceiveError>>;

    /// Close the connection. Idempotent; errors are swallowed.
    async fn close(&mut self);
}
