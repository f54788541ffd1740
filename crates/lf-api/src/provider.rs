//! Snapshot / gap-fill boundary.
//!
//! This module defines **only** the fetched types, the error type and the
//! [`MarketDataApi`] trait. The reqwest implementation lives in the crate
//! root; the reconciler only ever sees the trait.

use std::fmt;

use async_trait::async_trait;
use lf_schemas::{flatten_odds, KeyedLines, MarketLineUpdate, SchemaError};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time odds as returned by the snapshot endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct OddsSnapshot {
    /// Raw `data.odds` mapping, flat or nested by key segment. `Null` when absent.
    pub odds: Value,
    /// `data.lastUpdated` as epoch milliseconds, when the service sent one.
    pub last_updated_ms: Option<i64>,
}

impl OddsSnapshot {
    pub fn flatten(&self) -> Result<KeyedLines, SchemaError> {
        flatten_odds(&self.odds)
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Snapshot or gap-fill failure.
///
/// Snapshot failures at startup are fatal to `connect`; gap-fill failures are
/// reported as warnings and the live stream continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network / TLS / client construction failure.
    Transport(String),
    /// The request deadline elapsed.
    Timeout,
    /// Non-2xx HTTP status. `body` is truncated.
    Status { code: u16, body: String },
    /// Body was not the expected JSON shape.
    Decode(String),
    /// HTTP 200 with a GraphQL `errors` array.
    GraphQl(Vec<String>),
    /// Snapshot older than what the client has already reconciled.
    StaleSnapshot { snapshot_ms: i64, cursor_ms: i64 },
    /// The connection was closed while the request was in flight.
    Cancelled,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Transport(msg) => write!(f, "transport error: {msg}"),
            FetchError::Timeout => write!(f, "request timed out"),
            FetchError::Status { code, body } if body.is_empty() => write!(f, "http status {code}"),
            FetchError::Status { code, body } => write!(f, "http status {code}: {body}"),
            FetchError::Decode(msg) => write!(f, "decode error: {msg}"),
            FetchError::GraphQl(messages) => write!(f, "graphql errors: {}", messages.join("; ")),
            FetchError::StaleSnapshot {
                snapshot_ms,
                cursor_ms,
            } => write!(
                f,
                "stale snapshot: lastUpdated={snapshot_ms} is older than cursor={cursor_ms}"
            ),
            FetchError::Cancelled => write!(f, "request cancelled by close"),
        }
    }
}

impl std::error::Error for FetchError {}

// ---------------------------------------------------------------------------
// API trait
// ---------------------------------------------------------------------------

/// Out-of-band HTTP endpoints of the feed.
///
/// Object-safe and `Send + Sync` so the client can hold an
/// `Arc<dyn MarketDataApi>` across tasks.
#[async_trait]
pub trait MarketDataApi: Send + Sync {
    /// Short name for logs (e.g. `"http"`).
    fn source_name(&self) -> &'static str;

    /// Full point-in-time odds.
    async fn fetch_snapshot(&self) -> Result<OddsSnapshot, FetchError>;

    /// Every update produced after `since_ms`, in the order the service
    /// returned them.
    async fn fetch_updates_since(&self, since_ms: i64) -> Result<Vec<MarketLineUpdate>, FetchError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
