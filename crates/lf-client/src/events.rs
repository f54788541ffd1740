//! Events fanned out to facade subscribers.

use lf_protocol::{DisconnectReason, ProtocolEvent};
use lf_reconcile::{LineSource, ReconcileEvent, SnapshotSummary};
use lf_schemas::LineKey;
use serde::Serialize;
use serde_json::Value;

/// Messages broadcast on the client's event bus, in processing order.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    SnapshotLoaded {
        lines: usize,
        skipped: usize,
        cursor_ms: i64,
    },
    /// Socket open; `connection` counts from 1 per client.
    Connected { connection: u64 },
    Acknowledged,
    SubscriptionStarted { id: String },
    Streaming { id: String },
    LinesUpdated { source: LineSource, keys: Vec<LineKey> },
    GapFillCompleted {
        since_ms: i64,
        updates: usize,
        lines: usize,
        cursor_ms: Option<i64>,
    },
    /// Recoverable; live merging continues.
    GapFillFailed { since_ms: i64, error: String },
    SubscriptionError {
        id: Option<String>,
        payload: Option<Value>,
    },
    Stalled { silent_for_ms: u64 },
    Disconnected { reason: DisconnectReason },
}

impl ClientEvent {
    pub(crate) fn snapshot_loaded(summary: &SnapshotSummary) -> Self {
        ClientEvent::SnapshotLoaded {
            lines: summary.lines,
            skipped: summary.skipped,
            cursor_ms: summary.cursor_ms,
        }
    }

    /// Map a reconciler event. Raw `Data` frames are not republished; their
    /// merged keys arrive as `LinesUpdated`.
    pub(crate) fn from_reconcile(event: ReconcileEvent, connection: u64) -> Option<Self> {
        let mapped = match event {
            ReconcileEvent::Protocol(p) => match p {
                ProtocolEvent::Connected => ClientEvent::Connected { connection },
                ProtocolEvent::Acknowledged => ClientEvent::Acknowledged,
                ProtocolEvent::SubscriptionStarted { id } => ClientEvent::SubscriptionStarted { id },
                ProtocolEvent::Streaming { id } => ClientEvent::Streaming { id },
                ProtocolEvent::Data { .. } => return None,
                ProtocolEvent::SubscriptionError { id, payload } => {
                    ClientEvent::SubscriptionError { id, payload }
                }
                ProtocolEvent::Stalled { silent_for } => ClientEvent::Stalled {
                    silent_for_ms: u64::try_from(silent_for.as_millis()).unwrap_or(u64::MAX),
                },
                ProtocolEvent::Disconnected { reason } => ClientEvent::Disconnected { reason },
            },
            ReconcileEvent::LinesUpdated { source, keys } => ClientEvent::LinesUpdated { source, keys },
            ReconcileEvent::GapFillCompleted {
                since_ms,
                updates,
                lines,
                cursor_ms,
            } => ClientEvent::GapFillCompleted {
                since_ms,
                updates,
                lines,
                cursor_ms,
            },
            ReconcileEvent::GapFillFailed { since_ms, error } => ClientEvent::GapFillFailed {
                since_ms,
                error: error.to_string(),
            },
        };
        Some(mapped)
    }
}
