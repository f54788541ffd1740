//! lf-client
//!
//! Client facade for the realtime market line feed.
//!
//! [`RealtimeClient`] wires the pieces together:
//! - the first [`RealtimeClient::connect`] loads the odds snapshot (fatal on
//!   failure: there is no baseline to reconcile against),
//! - each connection runs one protocol session task and one reconciler task,
//! - every event is fanned out on a broadcast bus ([`RealtimeClient::subscribe`]).
//!
//! Reconnect is an explicit caller decision. The client never retries by
//! itself; a `Stalled` or `Disconnected` event is the hook to do so.

mod events;

pub use events::ClientEvent;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use lf_api::{FetchError, HttpMarketDataApi, MarketDataApi};
use lf_config::{FeedSettings, GapFillPolicy, GapFillTrigger, ResolvedSecrets};
use lf_protocol::{
    ConnectionDescriptor, ProtocolSession, ProtocolState, SessionError, SessionOptions,
    SubscriptionRequest,
};
use lf_reconcile::{LineStore, Reconciler};
use lf_schemas::{documents, LineKey, MarketLine};
use lf_transport::{Connector, WsConnector};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Bus capacity. Slow subscribers see `RecvError::Lagged`, never block the feed.
const EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientOptions {
    pub session: SessionOptions,
    pub gap_fill: GapFillPolicy,
    pub gap_fill_trigger: GapFillTrigger,
}

impl ClientOptions {
    pub fn from_settings(settings: &FeedSettings) -> Self {
        Self {
            session: SessionOptions::from_settings(settings),
            gap_fill: settings.gap_fill,
            gap_fill_trigger: settings.gap_fill_trigger,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// HTTP client construction failed.
    Setup(FetchError),
    /// The startup snapshot could not be loaded.
    Snapshot(FetchError),
    /// The socket could not be opened or `connection_init` not sent.
    Session(SessionError),
    AlreadyConnected,
    /// A connection task panicked; the reconciler state is gone.
    TaskFailed(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Setup(e) => write!(f, "client setup failed: {e}"),
            ClientError::Snapshot(e) => write!(f, "snapshot load failed: {e}"),
            ClientError::Session(e) => write!(f, "realtime session failed: {e}"),
            ClientError::AlreadyConnected => write!(f, "client is already connected"),
            ClientError::TaskFailed(msg) => write!(f, "connection task failed: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

struct Connection {
    number: u64,
    shutdown: watch::Sender<bool>,
    session: JoinHandle<ProtocolState>,
    reconciler: JoinHandle<Reconciler>,
}

enum Slot {
    Idle(Reconciler),
    Attached(Connection),
    Lost,
}

pub struct RealtimeClient {
    connector: Arc<dyn Connector>,
    descriptor: ConnectionDescriptor,
    request: SubscriptionRequest,
    options: ClientOptions,
    bus: broadcast::Sender<ClientEvent>,
    store: LineStore,
    cursor: watch::Receiver<Option<i64>>,
    slot: Slot,
    snapshot_loaded: bool,
    connections: u64,
}

impl RealtimeClient {
    pub fn new(
        connector: Arc<dyn Connector>,
        api: Arc<dyn MarketDataApi>,
        descriptor: ConnectionDescriptor,
        request: SubscriptionRequest,
        options: ClientOptions,
    ) -> Self {
        let (bus, _rx) = broadcast::channel(EVENT_BUS_CAPACITY);
        let store = LineStore::new();
        let reconciler = Reconciler::new(
            store.clone(),
            api,
            options.gap_fill,
            options.gap_fill_trigger,
        );
        Self {
            connector,
            descriptor,
            request,
            options,
            bus,
            store,
            cursor: reconciler.watch_cursor(),
            slot: Slot::Idle(reconciler),
            snapshot_loaded: false,
            connections: 0,
        }
    }

    /// Production wiring: tokio-tungstenite socket, reqwest HTTP, stock
    /// GraphQL documents unless the settings override them.
    pub fn from_settings(settings: &FeedSettings, secrets: &ResolvedSecrets) -> Result<Self, ClientError> {
        let descriptor = ConnectionDescriptor::from_settings(settings, secrets);
        let query = settings
            .subscription
            .query
            .clone()
            .unwrap_or_else(documents::market_line_subscription);
        let request =
            SubscriptionRequest::new(query).with_variables(settings.subscription.variables.clone());
        let gap_fill_query = settings
            .subscription
            .gap_fill_query
            .clone()
            .unwrap_or_else(documents::market_line_updates_since);

        let api = HttpMarketDataApi::from_descriptor(&descriptor, gap_fill_query, settings.timeouts.http)
            .map_err(ClientError::Setup)?;

        Ok(Self::new(
            Arc::new(WsConnector::new()),
            Arc::new(api),
            descriptor,
            request,
            ClientOptions::from_settings(settings),
        ))
    }

    /// Observe every event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.bus.subscribe()
    }

    pub fn store(&self) -> &LineStore {
        &self.store
    }

    /// Point-in-time copy of every reconciled line.
    pub async fn lines(&self) -> BTreeMap<LineKey, MarketLine> {
        self.store.snapshot().await
    }

    pub fn cursor_ms(&self) -> Option<i64> {
        *self.cursor.borrow()
    }

    /// `true` while a session task is running.
    pub fn is_connected(&self) -> bool {
        matches!(&self.slot, Slot::Attached(c) if !c.session.is_finished())
    }

    /// Open a connection and start streaming.
    ///
    /// The snapshot is fetched on the first successful call only; later
    /// calls reuse the store and cursor.
    ///
    /// # Errors
    /// [`ClientError::Snapshot`] and [`ClientError::Session`] leave the
    /// client idle, so `connect` may be called again.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if let Slot::Attached(conn) = &self.slot {
            if !conn.session.is_finished() {
                return Err(ClientError::AlreadyConnected);
            }
            self.detach(false).await?;
        }
        let mut reconciler = self.take_idle()?;

        if !self.snapshot_loaded {
            match reconciler.load_snapshot().await {
                Ok(summary) => {
                    self.snapshot_loaded = true;
                    let _ = self.bus.send(ClientEvent::snapshot_loaded(&summary));
                }
                Err(e) => {
                    error!(error = %e, "snapshot load failed");
                    self.slot = Slot::Idle(reconciler);
                    return Err(ClientError::Snapshot(e));
                }
            }
        }

        let opened = ProtocolSession::open(
            self.connector.as_ref(),
            self.descriptor.clone(),
            self.request.clone(),
            self.options.session,
        )
        .await;
        let session = match opened {
            Ok(session) => session,
            Err(e) => {
                self.slot = Slot::Idle(reconciler);
                return Err(ClientError::Session(e));
            }
        };

        self.connections += 1;
        let number = self.connections;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let bus = self.bus.clone();

        let session = tokio::spawn(session.run(events_tx, shutdown_rx.clone()));
        let reconciler = tokio::spawn(reconciler.run(events_rx, shutdown_rx, move |event| {
            if let Some(event) = ClientEvent::from_reconcile(event, number) {
                let _ = bus.send(event);
            }
        }));

        self.slot = Slot::Attached(Connection {
            number,
            shutdown,
            session,
            reconciler,
        });
        info!(connection = number, "realtime client connected");
        Ok(())
    }

    /// Wait for the current session to end on its own (`complete`,
    /// `connection_error`, peer close). Returns the final protocol state, or
    /// `None` when not connected.
    pub async fn wait_closed(&mut self) -> Result<Option<ProtocolState>, ClientError> {
        self.detach(false).await
    }

    /// Cancel the current session. The socket is closed, an in-flight
    /// gap-fill is abandoned (reported as `GapFillFailed`), and no further
    /// protocol events are published. No-op when not connected.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.detach(true).await.map(|_| ())
    }

    /// Close the current session (if any) and open a fresh one over the
    /// same store and cursor. Gap-fill follows the configured policy.
    pub async fn reconnect(&mut self) -> Result<(), ClientError> {
        self.close().await?;
        self.connect().await
    }

    fn take_idle(&mut self) -> Result<Reconciler, ClientError> {
        match std::mem::replace(&mut self.slot, Slot::Lost) {
            Slot::Idle(reconciler) => Ok(reconciler),
            Slot::Attached(conn) => {
                self.slot = Slot::Attached(conn);
                Err(ClientError::AlreadyConnected)
            }
            Slot::Lost => Err(ClientError::TaskFailed("reconciler lost".to_string())),
        }
    }

    async fn detach(&mut self, cancel: bool) -> Result<Option<ProtocolState>, ClientError> {
        let conn = match std::mem::replace(&mut self.slot, Slot::Lost) {
            Slot::Attached(conn) => conn,
            other => {
                self.slot = other;
                return Ok(None);
            }
        };
        if cancel {
            let _ = conn.shutdown.send(true);
        }

        let state = conn.session.await;
        match conn.reconciler.await {
            Ok(reconciler) => self.slot = Slot::Idle(reconciler),
            Err(e) => {
                error!(connection = conn.number, error = %e, "reconciler task failed");
                return Err(ClientError::TaskFailed(e.to_string()));
            }
        }
        let state = state.map_err(|e| {
            warn!(connection = conn.number, error = %e, "session task failed");
            ClientError::TaskFailed(e.to_string())
        })?;

        info!(connection = conn.number, ?state, cancelled = cancel, "realtime client detached");
        Ok(Some(state))
    }
}
