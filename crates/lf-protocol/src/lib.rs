//! lf-protocol
//!
//! graphql-ws client protocol for the realtime market line feed.
//!
//! - [`ConnectionDescriptor`] derives the socket URI and HTTP endpoints.
//! - [`frame`] encodes the outbound frames and classifies inbound ones.
//! - [`ProtocolMachine`] is the pure handshake and subscription state
//!   machine: text in, outbound frames and [`ProtocolEvent`]s out. No IO.
//! - [`ProtocolSession`] drives a machine over a `lf_transport` session in a
//!   single receive loop, which is the only writer of protocol state.

use std::fmt;

mod descriptor;
pub mod frame;
mod machine;
mod session;

pub use descriptor::ConnectionDescriptor;
pub use frame::{FrameKind, InboundFrame, SubscriptionRequest, SUBPROTOCOL};
pub use machine::{DisconnectReason, ProtocolEvent, ProtocolMachine, ProtocolState, Step};
pub use session::{ProtocolSession, SessionError, SessionOptions};

/// A frame could not be encoded, or an inbound frame could not be classified.
///
/// Inbound variants are non-fatal: the session logs and skips the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Body is not JSON, not an object, or lacks a required field.
    Malformed(String),
    /// Object without a string `type`.
    MissingType,
    /// `type` is not one this client recognizes.
    UnexpectedType(String),
    /// Outbound serialization failed.
    Encode(String),
    /// Operation not valid in the machine's current state.
    InvalidState {
        op: &'static str,
        state: ProtocolState,
    },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Malformed(msg) => write!(f, "malformed frame: {msg}"),
            ProtocolError::MissingType => write!(f, "frame has no type"),
            ProtocolError::UnexpectedType(t) => write!(f, "unrecognized frame type '{t}'"),
            ProtocolError::Encode(msg) => write!(f, "frame encode failed: {msg}"),
            ProtocolError::InvalidState { op, state } => {
                write!(f, "{op} not allowed in state {state:?}")
            }
        }
    }
}

impl std::error::Error for ProtocolError {}
