//! Connection Descriptor: where to connect and with which credentials.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use lf_config::{FeedSettings, ResolvedSecrets};
use serde::Serialize;
use url::Url;

use crate::ProtocolError;

/// Immutable connection parameters; every endpoint URL is derived from it.
///
/// `Debug` redacts the token.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    host: String,
    token: String,
    region: Option<String>,
    data_api_url: String,
    sport: String,
}

/// `{Authorization, host}` pair carried by the handshake and `connection_init`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct AuthHeader<'a> {
    #[serde(rename = "Authorization")]
    pub authorization: &'a str,
    pub host: &'a str,
}

impl ConnectionDescriptor {
    pub fn new(
        host: impl Into<String>,
        token: impl Into<String>,
        data_api_url: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into().trim().trim_end_matches('/').to_string(),
            token: token.into(),
            region: None,
            data_api_url: data_api_url.into().trim().trim_end_matches('/').to_string(),
            sport: lf_config::DEFAULT_SPORT.to_string(),
        }
    }

    pub fn from_settings(settings: &FeedSettings, secrets: &ResolvedSecrets) -> Self {
        Self::new(
            &settings.realtime_host,
            &secrets.realtime_api_key,
            &settings.data_api_url,
        )
        .with_region(settings.realtime_region.clone())
        .with_sport(&settings.sport)
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    pub fn with_sport(mut self, sport: impl Into<String>) -> Self {
        self.sport = sport.into();
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub(crate) fn auth(&self) -> AuthHeader<'_> {
        AuthHeader {
            authorization: &self.token,
            host: &self.host,
        }
    }

    /// `wss://{host}/graphql/realtime?header=..&payload=..` where `header` is
    /// base64 of `{"Authorization":..,"host":..}` and `payload` is base64 of `{}`.
    ///
    /// # Errors
    /// [`ProtocolError::Encode`] when the host does not form a valid URL.
    pub fn websocket_uri(&self) -> Result<String, ProtocolError> {
        let header_json =
            serde_json::to_string(&self.auth()).map_err(|e| ProtocolError::Encode(e.to_string()))?;
        let mut uri = Url::parse(&format!("wss://{}/graphql/realtime", self.host))
            .map_err(|e| ProtocolError::Encode(format!("realtime url for host '{}': {e}", self.host)))?;
        uri.query_pairs_mut()
            .append_pair("header", &STANDARD.encode(header_json.as_bytes()))
            .append_pair("payload", &STANDARD.encode(b"{}"));
        Ok(uri.into())
    }

    /// Realtime GraphQL HTTP endpoint used for gap-fill queries.
    pub fn graphql_url(&self) -> String {
        format!("https://{}/graphql", self.host)
    }

    /// Snapshot endpoint: `{data_api_url}/market/{sport}/props/odds`.
    pub fn snapshot_url(&self) -> String {
        format!("{}/market/{}/props/odds", self.data_api_url, self.sport)
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("token", &"<REDACTED>")
            .field("region", &self.region)
            .field("data_api_url", &self.data_api_url)
            .field("sport", &self.sport)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::new("rt.example.com/", "tok-1", "https://data.example.com/api/")
    }

    #[test]
    fn websocket_uri_embeds_base64_header_and_empty_payload() {
        let uri = descriptor().websocket_uri().unwrap();
        assert!(uri.starts_with("wss://rt.example.com/graphql/realtime?header="));
        assert!(uri.ends_with("&payload=e30%3D"), "base64('{{}}') = e30=, url-encoded: {uri}");

        let parsed = Url::parse(&uri).unwrap();
        let header_param = parsed
            .query_pairs()
            .find(|(k, _)| k == "header")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let decoded = STANDARD.decode(header_param).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(v["Authorization"], "tok-1");
        assert_eq!(v["host"], "rt.example.com");
    }

    #[test]
    fn http_endpoints_are_derived() {
        let d = descriptor().with_sport("nfl");
        assert_eq!(d.graphql_url(), "https://rt.example.com/graphql");
        assert_eq!(d.snapshot_url(), "https://data.example.com/api/market/nfl/props/odds");
    }

    #[test]
    fn debug_redacts_token() {
        let dbg = format!("{:?}", descriptor());
        assert!(!dbg.contains("tok-1"));
        assert!(dbg.contains("<REDACTED>"));
    }

    #[test]
    fn unusable_host_is_an_encode_error() {
        let d = ConnectionDescriptor::new("bad host:port", "tok", "https://data.example.com");
        assert!(matches!(d.websocket_uri(), Err(ProtocolError::Encode(_))));
    }
}
