//! Async reconciler: snapshot load, then one event loop per connection.
//!
//! The loop is the only writer of the [`LineStore`]. Gap-fill runs as a
//! future polled by the same loop, so live batches that arrive meanwhile
//! are queued and merged strictly after the gap-fill result.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use lf_api::{FetchError, MarketDataApi, OddsSnapshot};
use lf_config::{GapFillPolicy, GapFillTrigger};
use lf_protocol::ProtocolEvent;
use lf_schemas::{updates_from_selection, KeyedLines, LineKey, MarketLineUpdate};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::cursor::SnapshotFreshness;
use crate::engine::{GapFillPlan, LiveDisposition, ReconcileEngine};
use crate::store::LineStore;

type GapFillFuture = Pin<Box<dyn Future<Output = Result<Vec<MarketLineUpdate>, FetchError>> + Send>>;

/// Where merged records came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineSource {
    GapFill,
    Live,
}

/// Result of a successful snapshot load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub lines: usize,
    pub skipped: usize,
    pub cursor_ms: i64,
    /// `true` when `lastUpdated` was absent and the load time was used.
    pub cursor_defaulted: bool,
}

/// Everything the reconciler reports, in processing order.
#[derive(Clone, Debug, PartialEq)]
pub enum ReconcileEvent {
    /// Forwarded protocol event, in wire order.
    Protocol(ProtocolEvent),
    LinesUpdated {
        source: LineSource,
        keys: Vec<LineKey>,
    },
    GapFillCompleted {
        since_ms: i64,
        updates: usize,
        lines: usize,
        cursor_ms: Option<i64>,
    },
    /// Recoverable: the live stream continues.
    GapFillFailed { since_ms: i64, error: FetchError },
}

pub struct Reconciler {
    store: LineStore,
    api: Arc<dyn MarketDataApi>,
    engine: ReconcileEngine,
    cursor_tx: watch::Sender<Option<i64>>,
}

impl Reconciler {
    pub fn new(
        store: LineStore,
        api: Arc<dyn MarketDataApi>,
        policy: GapFillPolicy,
        trigger: GapFillTrigger,
    ) -> Self {
        let (cursor_tx, _) = watch::channel(None);
        Self {
            store,
            api,
            engine: ReconcileEngine::new(policy, trigger),
            cursor_tx,
        }
    }

    pub fn store(&self) -> &LineStore {
        &self.store
    }

    pub fn cursor_ms(&self) -> Option<i64> {
        self.engine.cursor().get()
    }

    /// Follows the cursor across [`Reconciler::run`], while the reconciler
    /// itself is owned by a connection task.
    pub fn watch_cursor(&self) -> watch::Receiver<Option<i64>> {
        self.cursor_tx.subscribe()
    }

    fn publish_cursor(&self) {
        self.cursor_tx.send_replace(self.engine.cursor().get());
    }

    /// Fetch the snapshot and load it.
    ///
    /// # Errors
    /// Any fetch failure, an undecodable `odds` mapping, or a snapshot older
    /// than the current cursor. The store is untouched on error.
    pub async fn load_snapshot(&mut self) -> Result<SnapshotSummary, FetchError> {
        let source = self.api.source_name();
        debug!(source, "fetching snapshot");
        let snapshot = self.api.fetch_snapshot().await?;
        self.apply_snapshot(snapshot, Utc::now().timestamp_millis()).await
    }

    /// Replace the store with `snapshot` and set the cursor to its
    /// `lastUpdated` (or `now_ms` when absent).
    pub async fn apply_snapshot(
        &mut self,
        snapshot: OddsSnapshot,
        now_ms: i64,
    ) -> Result<SnapshotSummary, FetchError> {
        let cursor_defaulted = snapshot.last_updated_ms.is_none();
        let snapshot_ms = snapshot.last_updated_ms.unwrap_or(now_ms);

        if let SnapshotFreshness::Stale { cursor_ms, got_ms } =
            self.engine.cursor().check_snapshot(snapshot_ms)
        {
            warn!(cursor_ms, snapshot_ms = got_ms, "rejecting stale snapshot");
            return Err(FetchError::StaleSnapshot {
                snapshot_ms: got_ms,
                cursor_ms,
            });
        }

        let flat = snapshot
            .flatten()
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        if flat.skipped > 0 {
            warn!(skipped = flat.skipped, "snapshot entries without a usable key were dropped");
        }
        let lines = self.store.replace_all(flat.lines).await;
        self.engine.accept_snapshot(snapshot_ms);
        self.publish_cursor();

        info!(lines, cursor_ms = snapshot_ms, cursor_defaulted, "snapshot loaded");
        Ok(SnapshotSummary {
            lines,
            skipped: flat.skipped,
            cursor_ms: snapshot_ms,
            cursor_defaulted,
        })
    }

    /// Consume protocol events for one connection until the session's
    /// sender is dropped, then hand the reconciler back for the next one.
    ///
    /// An in-flight gap-fill is finished (and its queued live batches
    /// merged) before returning. Once `cancel` turns `true` the request is
    /// dropped instead and reported as [`FetchError::Cancelled`].
    pub async fn run<S>(
        mut self,
        mut events: mpsc::UnboundedReceiver<ProtocolEvent>,
        mut cancel: watch::Receiver<bool>,
        mut sink: S,
    ) -> Self
    where
        S: FnMut(ReconcileEvent) + Send,
    {
        self.engine.begin_connection();
        debug!(connection = self.engine.connections(), "reconciler attached to session");
        let mut gap_fill: Option<GapFillFuture> = None;
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;
                result = poll_in_flight(&mut gap_fill), if gap_fill.is_some() => {
                    gap_fill = None;
                    self.finish_gap_fill(result, &mut sink).await;
                }
                _ = cancel_requested(&mut cancel), if !cancelled => {
                    cancelled = true;
                    if gap_fill.take().is_some() {
                        self.finish_gap_fill(Err(FetchError::Cancelled), &mut sink).await;
                    }
                }
                event = events.recv() => match event {
                    Some(event) => {
                        if let Some(plan) = self.on_protocol_event(event, &mut sink).await {
                            if cancelled {
                                self.finish_gap_fill(Err(FetchError::Cancelled), &mut sink).await;
                            } else {
                                gap_fill = Some(self.spawn_gap_fill(plan));
                            }
                        }
                    }
                    None => break,
                },
            }
        }

        if let Some(pending) = gap_fill.take() {
            let result = tokio::select! {
                biased;
                result = pending => result,
                _ = cancel_requested(&mut cancel) => Err(FetchError::Cancelled),
            };
            self.finish_gap_fill(result, &mut sink).await;
        }
        debug!(cursor_ms = ?self.cursor_ms(), cancelled, "reconciler detached from session");
        self
    }

    async fn on_protocol_event<S>(&mut self, event: ProtocolEvent, sink: &mut S) -> Option<GapFillPlan>
    where
        S: FnMut(ReconcileEvent),
    {
        let plan = self.engine.on_protocol_event(&event);
        let live = match &event {
            ProtocolEvent::Data { payload, .. } => Some(keyed_from_payload(payload)),
            _ => None,
        };
        sink(ReconcileEvent::Protocol(event));

        if let Some(lines) = live {
            match self.engine.on_live(lines) {
                LiveDisposition::Apply(lines) => self.apply_live(lines, sink).await,
                LiveDisposition::Buffered { queued } => {
                    debug!(queued, "live batch queued behind gap-fill");
                }
            }
        }
        if let Some(plan) = plan {
            info!(since_ms = plan.since_ms, "gap-fill started");
        }
        plan
    }

    fn spawn_gap_fill(&self, plan: GapFillPlan) -> GapFillFuture {
        debug!(source = self.api.source_name(), since_ms = plan.since_ms, "requesting gap-fill");
        let api = Arc::clone(&self.api);
        Box::pin(async move { api.fetch_updates_since(plan.since_ms).await })
    }

    async fn finish_gap_fill<S>(
        &mut self,
        result: Result<Vec<MarketLineUpdate>, FetchError>,
        sink: &mut S,
    ) where
        S: FnMut(ReconcileEvent),
    {
        let since_ms = self
            .engine
            .in_flight()
            .map(|p| p.since_ms)
            .unwrap_or_default();

        let queued = match result {
            Ok(updates) => {
                let keyed = KeyedLines::from_updates(&updates);
                if keyed.skipped > 0 {
                    warn!(skipped = keyed.skipped, "gap-fill lines without a usable key were dropped");
                }
                let max_ts = keyed.max_timestamp_ms;
                let keys: Vec<LineKey> = keyed.lines.iter().map(|(k, _)| k.clone()).collect();
                let lines = self.store.merge_all(keyed.lines).await;
                let queued = self.engine.finish_gap_fill(true, max_ts);
                self.publish_cursor();
                let cursor_ms = self.cursor_ms();

                info!(since_ms, updates = updates.len(), lines, ?cursor_ms, "gap-fill applied");
                if !keys.is_empty() {
                    sink(ReconcileEvent::LinesUpdated {
                        source: LineSource::GapFill,
                        keys,
                    });
                }
                sink(ReconcileEvent::GapFillCompleted {
                    since_ms,
                    updates: updates.len(),
                    lines,
                    cursor_ms,
                });
                queued
            }
            Err(error) => {
                warn!(since_ms, error = %error, "gap-fill failed; continuing with live stream");
                let queued = self.engine.finish_gap_fill(false, None);
                sink(ReconcileEvent::GapFillFailed { since_ms, error });
                queued
            }
        };

        for lines in queued {
            self.apply_live(lines, sink).await;
        }
    }

    async fn apply_live<S>(&mut self, lines: KeyedLines, sink: &mut S)
    where
        S: FnMut(ReconcileEvent),
    {
        if lines.is_empty() {
            return;
        }
        let max_ts = lines.max_timestamp_ms;
        let keys: Vec<LineKey> = lines.lines.iter().map(|(k, _)| k.clone()).collect();
        self.store.merge_all(lines.lines).await;
        self.engine.applied_live(max_ts);
        self.publish_cursor();
        sink(ReconcileEvent::LinesUpdated {
            source: LineSource::Live,
            keys,
        });
    }
}

/// Flatten `payload.data` of a live frame. Undecodable payloads are logged
/// and yield an empty batch.
fn keyed_from_payload(payload: &Value) -> KeyedLines {
    match updates_from_selection(payload) {
        Ok(updates) => {
            let keyed = KeyedLines::from_updates(&updates);
            if keyed.skipped > 0 {
                warn!(skipped = keyed.skipped, "live lines without a usable key were dropped");
            }
            keyed
        }
        Err(e) => {
            warn!(error = %e, "undecodable live payload skipped");
            KeyedLines::default()
        }
    }
}

/// Resolves once the flag reads `true`. A dropped sender never cancels.
async fn cancel_requested(cancel: &mut watch::Receiver<bool>) {
    let sender_gone = cancel.wait_for(|stop| *stop).await.is_err();
    if sender_gone {
        std::future::pending::<()>().await;
    }
}

async fn poll_in_flight<F>(slot: &mut Option<F>) -> F::Output
where
    F: Future + Unpin,
{
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}
