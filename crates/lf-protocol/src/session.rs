//! Async driver: one receive loop per connection.
//!
//! The loop owns the [`ProtocolMachine`] and the transport session, so all
//! protocol state changes happen on one task in wire order. Events go out on
//! an unbounded channel in the same order.

use std::fmt;
use std::time::Duration;

use lf_config::{ErrorFramePolicy, FeedSettings};
use lf_transport::{ConnectError, Connector, SendError, TransportSession};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::descriptor::ConnectionDescriptor;
use crate::frame::{SubscriptionRequest, SUBPROTOCOL};
use crate::machine::{DisconnectReason, ProtocolEvent, ProtocolMachine, ProtocolState};
use crate::ProtocolError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub connect_timeout: Option<Duration>,
    pub send_timeout: Option<Duration>,
    /// Emit [`ProtocolEvent::Stalled`] after this long without any frame.
    pub stall_after: Option<Duration>,
    pub error_frames: ErrorFramePolicy,
}

impl SessionOptions {
    pub fn from_settings(settings: &FeedSettings) -> Self {
        Self {
            connect_timeout: settings.timeouts.connect,
            send_timeout: settings.timeouts.send,
            stall_after: settings.stall_after,
            error_frames: settings.error_frames,
        }
    }
}

/// Opening a session failed. Nothing is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    Connect(ConnectError),
    Send(SendError),
    SendTimeout(Duration),
    Protocol(ProtocolError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Connect(e) => write!(f, "{e}"),
            SessionError::Send(e) => write!(f, "connection_init: {e}"),
            SessionError::SendTimeout(after) => {
                write!(f, "connection_init: send timed out after {after:?}")
            }
            SessionError::Protocol(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ConnectError> for SessionError {
    fn from(e: ConnectError) -> Self {
        SessionError::Connect(e)
    }
}

impl From<ProtocolError> for SessionError {
    fn from(e: ProtocolError) -> Self {
        SessionError::Protocol(e)
    }
}

enum SendFailure {
    Send(SendError),
    Timeout(Duration),
}

impl From<SendFailure> for SessionError {
    fn from(f: SendFailure) -> Self {
        match f {
            SendFailure::Send(e) => SessionError::Send(e),
            SendFailure::Timeout(d) => SessionError::SendTimeout(d),
        }
    }
}

impl fmt::Display for SendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendFailure::Send(e) => write!(f, "{e}"),
            SendFailure::Timeout(after) => write!(f, "send timed out after {after:?}"),
        }
    }
}

enum Received {
    Text(String),
    Ended,
    Broken(String),
    Silent(Duration),
}

/// An open connection with `connection_init` already sent.
pub struct ProtocolSession {
    machine: ProtocolMachine,
    transport: Box<dyn TransportSession>,
    options: SessionOptions,
    pending: Vec<ProtocolEvent>,
}

impl ProtocolSession {
    /// `Idle -> Connecting -> AwaitingAck`.
    ///
    /// # Errors
    /// Connect failures (including the connect deadline) and a failed
    /// `connection_init` send. The socket is closed on the latter.
    pub async fn open(
        connector: &dyn Connector,
        descriptor: ConnectionDescriptor,
        request: SubscriptionRequest,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        debug!(host = descriptor.host(), region = ?descriptor.region(), "opening realtime socket");
        let mut machine = ProtocolMachine::new(descriptor, request, options.error_frames);
        let uri = machine.begin_connect()?;

        let connecting = connector.connect(&uri, SUBPROTOCOL);
        let connected = match options.connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, connecting).await {
                Ok(result) => result,
                Err(_) => Err(ConnectError::Timeout(limit)),
            },
            None => connecting.await,
        };
        let transport = match connected {
            Ok(t) => t,
            Err(e) => {
                machine.on_connect_failed();
                warn!(error = %e, "realtime connect failed");
                return Err(e.into());
            }
        };

        let mut session = Self {
            machine,
            transport,
            options,
            pending: Vec::new(),
        };
        let step = session.machine.on_open()?;
        for frame in step.outbound {
            if let Err(e) = session.send(frame).await {
                session.machine.on_connect_failed();
                session.transport.close().await;
                return Err(e.into());
            }
        }
        session.pending = step.events;
        info!("realtime socket open, connection_init sent");
        Ok(session)
    }

    pub fn state(&self) -> ProtocolState {
        self.machine.state()
    }

    /// Run the receive loop until the session terminates or `shutdown`
    /// flips to `true` (or its sender is dropped).
    ///
    /// On shutdown the socket is closed and no further events are emitted.
    /// Returns the final protocol state.
    pub async fn run(
        mut self,
        events: mpsc::UnboundedSender<ProtocolEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> ProtocolState {
        for event in std::mem::take(&mut self.pending) {
            let _ = events.send(event);
        }

        while !self.machine.state().is_terminal() {
            if *shutdown.borrow() {
                return self.cancel().await;
            }

            let received = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return self.cancel().await;
                    }
                    continue;
                }
                received = next_frame(self.transport.as_mut(), self.options.stall_after) => received,
            };

            let step = match received {
                Received::Text(text) => self.machine.on_text(&text),
                Received::Ended => self.machine.on_transport_closed(None),
                Received::Broken(message) => self.machine.on_transport_closed(Some(message)),
                Received::Silent(silent_for) => {
                    warn!(?silent_for, "no frames received; connection may be stalled");
                    let _ = events.send(ProtocolEvent::Stalled { silent_for });
                    continue;
                }
            };

            let mut step_events = step.events;
            for frame in step.outbound {
                if let Err(e) = self.send(frame).await {
                    warn!(error = %e, "realtime send failed");
                    let failed = self.machine.fail(DisconnectReason::SendFailed {
                        message: e.to_string(),
                    });
                    step_events.extend(failed.events);
                    break;
                }
            }
            for event in step_events {
                if events.send(event).is_err() {
                    debug!("event receiver dropped; stopping session");
                    return self.cancel().await;
                }
            }
        }

        self.transport.close().await;
        info!(state = ?self.machine.state(), "realtime session ended");
        self.machine.state()
    }

    async fn cancel(&mut self) -> ProtocolState {
        if let Some(stop) = self.machine.cancel() {
            if let Err(e) = self.send(stop).await {
                debug!(error = %e, "stop frame not sent");
            }
        }
        self.transport.close().await;
        info!("realtime session cancelled");
        self.machine.state()
    }

    async fn send(&mut self, frame: String) -> Result<(), SendFailure> {
        let sending = self.transport.send(frame);
        match self.options.send_timeout {
            Some(limit) => match tokio::time::timeout(limit, sending).await {
                Ok(result) => result.map_err(SendFailure::Send),
                Err(_) => Err(SendFailure::Timeout(limit)),
            },
            None => sending.await.map_err(SendFailure::Send),
        }
    }
}

async fn next_frame(transport: &mut dyn TransportSession, stall_after: Option<Duration>) -> Received {
    let receiving = transport.receive();
    let received = match stall_after {
        Some(window) => match tokio::time::timeout(window, receiving).await {
            Ok(r) => r,
            Err(_) => return Received::Silent(window),
        },
        None => receiving.await,
    };
    match received {
        Some(Ok(text)) => Received::Text(text),
        Some(Err(e)) => Received::Broken(e.to_string()),
        None => Received::Ended,
    }
}
