//! In-memory transport for tests (feature `testkit`).
//!
//! A [`ScriptedSession`] is paired with a [`ScriptHandle`] held by the test:
//! the test pushes inbound frames through the handle and reads back every
//! frame the code under test sent. Closing either side ends the session the
//! same way a real peer close would.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{ConnectError, Connector, ReceiveError, SendError, TransportSession};

enum Inbound {
    Text(String),
    Close,
    Error(String),
}

/// Test-side end of a scripted session.
pub struct ScriptHandle {
    to_client: mpsc::UnboundedSender<Inbound>,
    from_client: mpsc::UnboundedReceiver<String>,
    closed_by_client: Arc<AtomicBool>,
}

impl ScriptHandle {
    /// Queue one inbound text frame.
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.to_client.send(Inbound::Text(text.into()));
    }

    /// Queue a JSON value as an inbound text frame.
    pub fn push_json(&self, value: &impl std::fmt::Display) {
        self.push_text(value.to_string());
    }

    /// Queue a peer close; the receive sequence ends after earlier frames.
    pub fn push_close(&self) {
        let _ = self.to_client.send(Inbound::Close);
    }

    /// Queue a mid-stream receive failure.
    pub fn push_error(&self, message: impl Into<String>) {
        let _ = self.to_client.send(Inbound::Error(message.into()));
    }

    /// Next frame sent by the client, waiting for it. `None` once the
    /// session has been dropped.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Every frame sent so far, without waiting.
    pub fn drain_sent(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            out.push(frame);
        }
        out
    }

    /// `true` once the client called `close()`.
    pub fn closed_by_client(&self) -> bool {
        self.closed_by_client.load(Ordering::SeqCst)
    }
}

/// Client-side end of a scripted session.
pub struct ScriptedSession {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<String>,
    closed_by_client: Arc<AtomicBool>,
    ended: bool,
}

impl ScriptedSession {
    pub fn pair() -> (ScriptedSession, ScriptHandle) {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        (
            ScriptedSession {
                inbound,
                outbound,
                closed_by_client: Arc::clone(&closed),
                ended: false,
            },
            ScriptHandle {
                to_client,
                from_client,
                closed_by_client: closed,
            },
        )
    }
}

#[async_trait]
impl TransportSession for ScriptedSession {
    async fn send(&mut self, text: String) -> Result<(), SendError> {
        if self.ended {
            return Err(SendError::Closed);
        }
        self.outbound.send(text).map_err(|_| SendError::Closed)
    }

    async fn receive(&mut self) -> Option<Result<String, ReceiveError>> {
        if self.ended {
            return None;
        }
        match self.inbound.recv().await {
            Some(Inbound::Text(text)) => Some(Ok(text)),
            Some(Inbound::Error(msg)) => {
                self.ended = true;
                Some(Err(ReceiveError::Io(msg)))
            }
            Some(Inbound::Close) | None => {
                self.ended = true;
                None
            }
        }
    }

    async fn close(&mut self) {
        self.ended = true;
        self.closed_by_client.store(true, Ordering::SeqCst);
    }
}

/// Hands out pre-built sessions (or failures) in order, one per `connect`.
#[derive(Default)]
pub struct ScriptedConnector {
    queue: Mutex<VecDeque<Result<ScriptedSession, ConnectError>>>,
    attempts: Mutex<Vec<(String, String)>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a session for the next connect and return its test handle.
    pub fn expect_session(&self) -> ScriptHandle {
        let (session, handle) = ScriptedSession::pair();
        self.lock_queue().push_back(Ok(session));
        handle
    }

    /// Make the next connect fail with `err`.
    pub fn expect_failure(&self, err: ConnectError) {
        self.lock_queue().push_back(Err(err));
    }

    /// `(uri, subprotocol)` of every connect call so far.
    pub fn attempts(&self) -> Vec<(String, String)> {
        match self.attempts.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<ScriptedSession, ConnectError>>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        uri: &str,
        subprotocol: &str,
    ) -> Result<Box<dyn TransportSession>, ConnectError> {
        match self.attempts.lock() {
            Ok(mut guard) => guard.push((uri.to_string(), subprotocol.to_string())),
            Err(poisoned) => poisoned
                .into_inner()
                .push((uri.to_string(), subprotocol.to_string())),
        }
        let next = self.lock_queue().pop_front();
        match next {
            Some(Ok(session)) => Ok(Box::new(session)),
            Some(Err(err)) => Err(err),
            None => Err(ConnectError::Io("scripted connector: no session queued".to_string())),
        }
    }
}
