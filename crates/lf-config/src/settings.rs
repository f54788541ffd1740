//! Typed feed settings read from the merged config JSON.
//!
//! Non-secret endpoint values (host, region, data API URL) may come from the
//! YAML or, when absent there, from the well-known env vars the upstream
//! vendor documents. Env access goes through the caller-supplied `lookup` so
//! tests never touch process state.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_HOST_ENV: &str = "REALTIME_API_HOST";
pub const DEFAULT_REGION_ENV: &str = "REALTIME_API_REGION";
pub const DEFAULT_DATA_API_URL_ENV: &str = "DATA_API_URL";
pub const DEFAULT_SPORT: &str = "nba";

/// What the protocol layer does when the server reports a per-operation `error` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorFramePolicy {
    /// Report the error and keep streaming.
    #[default]
    Continue,
    /// Report the error, then close the subscription.
    Close,
}

/// Whether gap-fill runs on each new connection of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapFillPolicy {
    #[default]
    EveryConnection,
    FirstConnectionOnly,
    Disabled,
}

/// Which protocol transition starts the gap-fill request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapFillTrigger {
    /// As soon as the `start` frame has been sent (after `connection_ack`).
    #[default]
    StartSent,
    /// When the server acknowledges the subscription with `start_ack`.
    StartAck,
}

/// Optional deadlines around each suspension point. `None` = wait forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timeouts {
    pub connect: Option<Duration>,
    pub send: Option<Duration>,
    pub http: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubscriptionSettings {
    /// Overrides the stock subscription document when set.
    pub query: Option<String>,
    pub variables: Map<String, Value>,
    /// Overrides the stock gap-fill template when set; must contain `{since}`.
    pub gap_fill_query: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    pub realtime_host: String,
    pub realtime_region: Option<String>,
    pub data_api_url: String,
    pub sport: String,
    pub subscription: SubscriptionSettings,
    pub error_frames: ErrorFramePolicy,
    pub gap_fill: GapFillPolicy,
    pub gap_fill_trigger: GapFillTrigger,
    pub timeouts: Timeouts,
    /// Silence window after which the session reports a stall.
    pub stall_after: Option<Duration>,
}

impl FeedSettings {
    pub fn from_config_json<F>(config: &Value, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let realtime_host = read_str_at(config, "/realtime/host")
            .or_else(|| env(DEFAULT_HOST_ENV))
            .ok_or_else(|| {
                anyhow!("SETTINGS_MISSING: realtime.host not configured and env var '{DEFAULT_HOST_ENV}' is not set")
            })?;
        let realtime_region =
            read_str_at(config, "/realtime/region").or_else(|| env(DEFAULT_REGION_ENV));
        let data_api_url = read_str_at(config, "/data_api_url")
            .or_else(|| env(DEFAULT_DATA_API_URL_ENV))
            .ok_or_else(|| {
                anyhow!("SETTINGS_MISSING: data_api_url not configured and env var '{DEFAULT_DATA_API_URL_ENV}' is not set")
            })?;

        let sport = read_str_at(config, "/sport").unwrap_or_else(|| DEFAULT_SPORT.to_string());

        let variables = match config.pointer("/subscription/variables") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(m)) => m.clone(),
            Some(_) => bail!("SETTINGS_INVALID: subscription.variables must be a mapping"),
        };
        let gap_fill_query = read_str_at(config, "/gap_fill/query");
        if let Some(q) = &gap_fill_query {
            if !q.contains("{since}") {
                bail!("SETTINGS_INVALID: gap_fill.query must contain the '{{since}}' placeholder");
            }
        }

        Ok(Self {
            realtime_host,
            realtime_region,
            data_api_url,
            sport,
            subscription: SubscriptionSettings {
                query: read_str_at(config, "/subscription/query"),
                variables,
                gap_fill_query,
            },
            error_frames: read_enum_at(config, "/policy/error_frames")?.unwrap_or_default(),
            gap_fill: read_enum_at(config, "/policy/gap_fill")?.unwrap_or_default(),
            gap_fill_trigger: read_enum_at(config, "/policy/gap_fill_trigger")?.unwrap_or_default(),
            timeouts: Timeouts {
                connect: read_millis_at(config, "/timeouts/connect_ms")?,
                send: read_millis_at(config, "/timeouts/send_ms")?,
                http: read_millis_at(config, "/timeouts/http_ms")?,
            },
            stall_after: read_millis_at(config, "/liveness/stall_after_ms")?,
        })
    }
}

/// Read a non-empty string value at `pointer`.
pub(crate) fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn read_enum_at<T: serde::de::DeserializeOwned>(config: &Value, pointer: &str) -> Result<Option<T>> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| anyhow!("SETTINGS_INVALID: {pointer}: {e}")),
    }
}

fn read_millis_at(config: &Value, pointer: &str) -> Result<Option<Duration>> {
    match config.pointer(pointer) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_u64() {
            Some(0) => Ok(None),
            Some(ms) => Ok(Some(Duration::from_millis(ms))),
            None => bail!("SETTINGS_INVALID: {pointer} must be a non-negative integer (milliseconds)"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn yaml_values_win_and_defaults_fill_the_rest() {
        let cfg = json!({
            "realtime": { "host": "rt.example.com" },
            "data_api_url": "https://data.example.com/api"
        });
        let s = FeedSettings::from_config_json(&cfg, no_env).unwrap();
        assert_eq!(s.realtime_host, "rt.example.com");
        assert_eq!(s.sport, "nba");
        assert_eq!(s.error_frames, ErrorFramePolicy::Continue);
        assert_eq!(s.gap_fill, GapFillPolicy::EveryConnection);
        assert_eq!(s.gap_fill_trigger, GapFillTrigger::StartSent);
        assert_eq!(s.timeouts, Timeouts::default());
        assert!(s.stall_after.is_none());
    }

    #[test]
    fn env_fallback_for_endpoints() {
        let lookup = |name: &str| match name {
            "REALTIME_API_HOST" => Some("env-host".to_string()),
            "DATA_API_URL" => Some("https://env-data".to_string()),
            "REALTIME_API_REGION" => Some("us-east-1".to_string()),
            _ => None,
        };
        let s = FeedSettings::from_config_json(&json!({}), lookup).unwrap();
        assert_eq!(s.realtime_host, "env-host");
        assert_eq!(s.data_api_url, "https://env-data");
        assert_eq!(s.realtime_region.as_deref(), Some("us-east-1"));
    }

    #[test]
    fn missing_host_names_the_env_var() {
        let err = FeedSettings::from_config_json(&json!({ "data_api_url": "x" }), no_env).unwrap_err();
        assert!(err.to_string().contains("REALTIME_API_HOST"));
    }

    #[test]
    fn policies_and_timeouts_parse() {
        let cfg = json!({
            "realtime": { "host": "h" },
            "data_api_url": "d",
            "policy": { "error_frames": "close", "gap_fill": "first_connection_only", "gap_fill_trigger": "start_ack" },
            "timeouts": { "connect_ms": 5000, "http_ms": 0 },
            "liveness": { "stall_after_ms": 30000 }
        });
        let s = FeedSettings::from_config_json(&cfg, no_env).unwrap();
        assert_eq!(s.error_frames, ErrorFramePolicy::Close);
        assert_eq!(s.gap_fill, GapFillPolicy::FirstConnectionOnly);
        assert_eq!(s.gap_fill_trigger, GapFillTrigger::StartAck);
        assert_eq!(s.timeouts.connect, Some(Duration::from_secs(5)));
        assert_eq!(s.timeouts.http, None);
        assert_eq!(s.stall_after, Some(Duration::from_secs(30)));
    }

    #[test]
    fn unknown_policy_value_is_rejected() {
        let cfg = json!({
            "realtime": { "host": "h" },
            "data_api_url": "d",
            "policy": { "error_frames": "explode" }
        });
        let err = FeedSettings::from_config_json(&cfg, no_env).unwrap_err();
        assert!(err.to_string().contains("/policy/error_frames"));
    }

    #[test]
    fn gap_fill_query_requires_placeholder() {
        let cfg = json!({
            "realtime": { "host": "h" },
            "data_api_url": "d",
            "gap_fill": { "query": "query { marketLineUpdates { leagueId } }" }
        });
        assert!(FeedSettings::from_config_json(&cfg, no_env).is_err());
    }

    #[test]
    fn subscription_variables_keep_their_order() {
        let cfg = json!({
            "realtime": { "host": "h" },
            "data_api_url": "d",
            "subscription": { "variables": { "zeta": 1, "alpha": [3] } }
        });
        let s = FeedSettings::from_config_json(&cfg, no_env).unwrap();
        let names: Vec<&String> = s.subscription.variables.keys().collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }
}
