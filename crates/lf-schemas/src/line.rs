use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::LineKey;

/// One priced market line as delivered by the snapshot, the gap-fill query,
/// or a live `data` frame.
///
/// Every field is optional on the wire. Fields this crate does not model are
/// preserved in `extra` so a stored record round-trips without loss.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_line_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_source_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_price: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_format: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_alt_points: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_alt_price: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_alt_edge: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_line_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_on: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternate_lines: Vec<AlternateLine>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MarketLine {
    /// Resolve the composite key for this line.
    ///
    /// `marketLineKey` wins when present; otherwise the key is derived from the
    /// enclosing update's `leagueId` plus this line's `marketId` and
    /// `marketLineId`.
    pub fn line_key(&self, league_id: Option<&Value>) -> Option<LineKey> {
        if let Some(k) = self.market_line_key.as_deref().and_then(LineKey::new) {
            return Some(k);
        }
        LineKey::derive(
            league_id?,
            self.market_id.as_ref()?,
            self.market_line_id.as_ref()?,
        )
    }
}

/// Alternate (off-the-main-number) line nested under a [`MarketLine`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlternateLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_line_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_source_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_price: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_format: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_number: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_on: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Update container: one upstream message carrying a batch of lines.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketLineUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub league_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_source_group: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_timestamp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Value>,
    #[serde(default)]
    pub market_lines: Vec<MarketLine>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MarketLineUpdate {
    /// `messageTimestamp` as epoch milliseconds.
    pub fn timestamp_ms(&self) -> Option<i64> {
        epoch_millis(self.message_timestamp.as_ref()?)
    }
}

/// Interpret a wire timestamp as epoch milliseconds.
///
/// Accepts an integer, an integral numeric string, or an RFC 3339 string.
pub fn epoch_millis(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ms) = s.parse::<i64>() {
                return Some(ms);
            }
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis())
        }
        _ => None,
    }
}
