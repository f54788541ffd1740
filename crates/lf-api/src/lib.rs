//! lf-api
//!
//! HTTP side of the feed: the odds snapshot (GET, `x-api-key`) and the
//! gap-fill GraphQL query (POST, `Authorization`).
//!
//! Callers pick the implementation; the reconciler depends on
//! [`MarketDataApi`] only. The token is never logged.

pub mod provider;

#[cfg(feature = "testkit")]
pub mod testkit;

pub use provider::{FetchError, MarketDataApi, OddsSnapshot};

use std::fmt;
use std::time::Duration;

use lf_protocol::ConnectionDescriptor;
use lf_schemas::documents::SINCE_PLACEHOLDER;
use lf_schemas::{epoch_millis, updates_from_selection, MarketLineUpdate};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

/// Error bodies are cut to this many characters before they reach logs.
const MAX_ERROR_BODY: usize = 512;

/// reqwest-backed [`MarketDataApi`].
#[derive(Clone)]
pub struct HttpMarketDataApi {
    http: reqwest::Client,
    token: String,
    snapshot_url: String,
    graphql_url: String,
    gap_fill_query: String,
}

impl HttpMarketDataApi {
    /// Endpoints derived from `descriptor`.
    ///
    /// `gap_fill_query` must contain `{since}`; it is substituted with the
    /// cursor on every call.
    pub fn from_descriptor(
        descriptor: &ConnectionDescriptor,
        gap_fill_query: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, FetchError> {
        Self::with_endpoints(
            descriptor.token(),
            descriptor.snapshot_url(),
            descriptor.graphql_url(),
            gap_fill_query,
            timeout,
        )
    }

    pub fn with_endpoints(
        token: impl Into<String>,
        snapshot_url: impl Into<String>,
        graphql_url: impl Into<String>,
        gap_fill_query: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let http = builder
            .build()
            .map_err(|e| FetchError::Transport(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            token: token.into(),
            snapshot_url: snapshot_url.into(),
            graphql_url: graphql_url.into(),
            gap_fill_query: gap_fill_query.into(),
        })
    }

    fn gap_fill_body(&self, since_ms: i64) -> GraphQlRequest {
        GraphQlRequest {
            query: self
                .gap_fill_query
                .replace(SINCE_PLACEHOLDER, &since_ms.to_string()),
        }
    }
}

impl fmt::Debug for HttpMarketDataApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpMarketDataApi")
            .field("token", &"<REDACTED>")
            .field("snapshot_url", &self.snapshot_url)
            .field("graphql_url", &self.graphql_url)
            .finish()
    }
}

#[async_trait::async_trait]
impl MarketDataApi for HttpMarketDataApi {
    fn source_name(&self) -> &'static str {
        "http"
    }

    async fn fetch_snapshot(&self) -> Result<OddsSnapshot, FetchError> {
        debug!(url = %self.snapshot_url, "fetching odds snapshot");
        let resp = self
            .http
            .get(&self.snapshot_url)
            .header("x-api-key", &self.token)
            .send()
            .await
            .map_err(request_error)?;

        let text = read_success_body(resp).await?;
        let envelope: SnapshotEnvelope =
            serde_json::from_str(&text).map_err(|e| FetchError::Decode(format!("snapshot: {e}")))?;
        let data = envelope.data.unwrap_or_default();

        let snapshot = OddsSnapshot {
            odds: data.odds,
            last_updated_ms: data.last_updated.as_ref().and_then(epoch_millis),
        };
        info!(last_updated_ms = ?snapshot.last_updated_ms, "odds snapshot fetched");
        Ok(snapshot)
    }

    async fn fetch_updates_since(&self, since_ms: i64) -> Result<Vec<MarketLineUpdate>, FetchError> {
        debug!(url = %self.graphql_url, since_ms, "requesting gap-fill");
        let resp = self
            .http
            .post(&self.graphql_url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, &self.token)
            .json(&self.gap_fill_body(since_ms))
            .send()
            .await
            .map_err(request_error)?;

        let text = read_success_body(resp).await?;
        let body: GraphQlResponse =
            serde_json::from_str(&text).map_err(|e| FetchError::Decode(format!("gap-fill: {e}")))?;

        if let Some(errors) = body.errors.filter(|e| !e.is_empty()) {
            return Err(FetchError::GraphQl(
                errors.into_iter().map(|e| e.message).collect(),
            ));
        }

        let updates = match body.data {
            None | Some(Value::Null) => Vec::new(),
            Some(data) => updates_from_selection(&data)
                .map_err(|e| FetchError::Decode(format!("gap-fill: {e}")))?,
        };
        info!(since_ms, updates = updates.len(), "gap-fill fetched");
        Ok(updates)
    }
}

fn request_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(e.to_string())
    }
}

async fn read_success_body(resp: reqwest::Response) -> Result<String, FetchError> {
    let status = resp.status();
    let text = resp.text().await.map_err(request_error)?;
    if !status.is_success() {
        return Err(FetchError::Status {
            code: status.as_u16(),
            body: text.chars().take(MAX_ERROR_BODY).collect(),
        });
    }
    Ok(text)
}

#[derive(Debug, Serialize)]
struct GraphQlRequest {
    query: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlErrorMessage>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorMessage {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct SnapshotEnvelope {
    #[serde(default)]
    data: Option<SnapshotData>,
}

#[derive(Debug, Default, Deserialize)]
struct SnapshotData {
    #[serde(default)]
    odds: Value,
    #[serde(default, rename = "lastUpdated")]
    last_updated: Option<Value>,
}

// -----------------
// Tests (no network)
// -----------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_fill_body_substitutes_cursor() {
        let api = HttpMarketDataApi::with_endpoints(
            "tok",
            "http://localhost/snap",
            "http://localhost/graphql",
            "query { marketLineUpdates(since: {since}) { leagueId } }",
            None,
        )
        .unwrap();
        assert_eq!(
            api.gap_fill_body(1000).query,
            "query { marketLineUpdates(since: 1000) { leagueId } }"
        );
    }

    #[test]
    fn endpoints_follow_descriptor() {
        let d = ConnectionDescriptor::new("rt.example.com", "tok", "https://data.example.com");
        let api = HttpMarketDataApi::from_descriptor(&d, "{since}", None).unwrap();
        assert_eq!(api.graphql_url, "https://rt.example.com/graphql");
        assert_eq!(api.snapshot_url, "https://data.example.com/market/nba/props/odds");
        assert!(!format!("{api:?}").contains("\"tok\""));
    }

    #[test]
    fn snapshot_envelope_tolerates_missing_fields() {
        let env: SnapshotEnvelope = serde_json::from_str("{}").unwrap();
        let data = env.data.unwrap_or_default();
        assert!(data.odds.is_null());
        assert!(data.last_updated.is_none());
    }
}
