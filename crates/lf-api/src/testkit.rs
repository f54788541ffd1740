//! Scripted [`MarketDataApi`] for tests (feature `testkit`).
//!
//! Replies are queued up front. A gated gap-fill reply is held until the
//! test fires (or drops) the returned sender, which lets a test deliver live
//! frames while the gap-fill request is still in flight.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use lf_schemas::MarketLineUpdate;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::{FetchError, MarketDataApi, OddsSnapshot};

struct GapFillReply {
    result: Result<Vec<MarketLineUpdate>, FetchError>,
    gate: Option<oneshot::Receiver<()>>,
}

#[derive(Default)]
pub struct ScriptedApi {
    snapshots: Mutex<VecDeque<Result<OddsSnapshot, FetchError>>>,
    gap_fills: Mutex<VecDeque<GapFillReply>>,
    snapshot_calls: Mutex<usize>,
    gap_fill_calls: Mutex<Vec<i64>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_snapshot(&self, result: Result<OddsSnapshot, FetchError>) {
        lock(&self.snapshots).push_back(result);
    }

    /// Queue a snapshot built from raw `odds` JSON.
    pub fn push_odds(&self, odds: Value, last_updated_ms: Option<i64>) {
        self.push_snapshot(Ok(OddsSnapshot {
            odds,
            last_updated_ms,
        }));
    }

    pub fn push_gap_fill(&self, result: Result<Vec<MarketLineUpdate>, FetchError>) {
        lock(&self.gap_fills).push_back(GapFillReply { result, gate: None });
    }

    /// Queue updates decoded from a JSON array of update containers.
    ///
    /// # Panics
    /// When `updates` does not decode; test input is expected to be valid.
    pub fn push_gap_fill_json(&self, updates: Value) {
        let decoded: Vec<MarketLineUpdate> =
            serde_json::from_value(updates).expect("gap-fill fixture must decode");
        self.push_gap_fill(Ok(decoded));
    }

    /// Queue a reply that is only released once the returned sender fires
    /// or is dropped.
    pub fn push_gated_gap_fill(
        &self,
        result: Result<Vec<MarketLineUpdate>, FetchError>,
    ) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        lock(&self.gap_fills).push_back(GapFillReply {
            result,
            gate: Some(rx),
        });
        tx
    }

    pub fn snapshot_calls(&self) -> usize {
        *lock(&self.snapshot_calls)
    }

    /// `since_ms` of every gap-fill request so far.
    pub fn gap_fill_calls(&self) -> Vec<i64> {
        lock(&self.gap_fill_calls).clone()
    }
}

#[async_trait]
impl MarketDataApi for ScriptedApi {
    fn source_name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch_snapshot(&self) -> Result<OddsSnapshot, FetchError> {
        *lock(&self.snapshot_calls) += 1;
        let next = lock(&self.snapshots).pop_front();
        next.unwrap_or_else(|| Err(FetchError::Transport("no snapshot scripted".to_string())))
    }

    async fn fetch_updates_since(&self, since_ms: i64) -> Result<Vec<MarketLineUpdate>, FetchError> {
        lock(&self.gap_fill_calls).push(since_ms);
        let reply = lock(&self.gap_fills).pop_front();
        let Some(reply) = reply else {
            return Ok(Vec::new());
        };
        if let Some(gate) = reply.gate {
            let _ = gate.await;
        }
        reply.result
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
