//! Flattening of nested feed payloads into `(LineKey, MarketLine)` records.
//!
//! Three payload shapes reach the store:
//! - the snapshot `odds` mapping (flat by composite key, or nested by key segment),
//! - gap-fill batches (`[MarketLineUpdate]`),
//! - the GraphQL selection root of a live `data` frame.
//!
//! All three end up as the same [`KeyedLines`] shape, in payload order.

use serde_json::{Map, Value};

use crate::{LineKey, MarketLine, MarketLineUpdate};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The payload was expected to be a JSON object.
    NotAnObject { context: &'static str },
    /// A value could not be decoded into the expected record type.
    Decode {
        context: &'static str,
        message: String,
    },
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject { context } => write!(f, "{context}: expected a JSON object"),
            Self::Decode { context, message } => write!(f, "{context}: decode failed: {message}"),
        }
    }
}

impl std::error::Error for SchemaError {}

/// Records keyed by composite line key, in the order they were encountered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyedLines {
    pub lines: Vec<(LineKey, MarketLine)>,
    /// Entries that could not be keyed or decoded and were dropped.
    pub skipped: usize,
    /// Greatest `messageTimestamp` (epoch ms) among the source updates, if any.
    pub max_timestamp_ms: Option<i64>,
}

impl KeyedLines {
    /// Key every line of every update, preserving update order then line order.
    pub fn from_updates(updates: &[MarketLineUpdate]) -> Self {
        let mut out = KeyedLines::default();
        for update in updates {
            if let Some(ts) = update.timestamp_ms() {
                out.max_timestamp_ms = Some(out.max_timestamp_ms.map_or(ts, |m| m.max(ts)));
            }
            for line in &update.market_lines {
                match line.line_key(update.league_id.as_ref()) {
                    Some(key) => out.lines.push((key, line.clone())),
                    None => out.skipped += 1,
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Flatten the snapshot `odds` mapping.
///
/// A node is a record when at least one of its values is not an object;
/// otherwise it is a branch and its keys are appended as key segments.
/// `null` odds flatten to an empty set.
pub fn flatten_odds(odds: &Value) -> Result<KeyedLines, SchemaError> {
    let mut out = KeyedLines::default();
    match odds {
        Value::Null => Ok(out),
        Value::Object(map) => {
            walk_odds(map, &mut Vec::new(), &mut out);
            Ok(out)
        }
        _ => Err(SchemaError::NotAnObject { context: "odds" }),
    }
}

fn walk_odds<'a>(map: &'a Map<String, Value>, path: &mut Vec<&'a str>, out: &mut KeyedLines) {
    for (segment, node) in map {
        path.push(segment.as_str());
        match node {
            Value::Object(child) if is_record(child) => {
                let key = LineKey::from_segments(path.iter());
                let line = serde_json::from_value::<MarketLine>(node.clone()).ok();
                match (key, line) {
                    (Some(k), Some(l)) => out.lines.push((k, l)),
                    _ => out.skipped += 1,
                }
            }
            Value::Object(child) => walk_odds(child, path, out),
            _ => out.skipped += 1,
        }
        path.pop();
    }
}

fn is_record(map: &Map<String, Value>) -> bool {
    map.values().any(|v| !v.is_object())
}

/// Decode the GraphQL selection root of a `data` frame (`payload.data`).
///
/// Each root field holds either one update container, a list of them, or
/// `null`. Root fields are visited in payload order.
pub fn updates_from_selection(root: &Value) -> Result<Vec<MarketLineUpdate>, SchemaError> {
    let map = root.as_object().ok_or(SchemaError::NotAnObject {
        context: "selection root",
    })?;

    let mut updates = Vec::new();
    for field in map.values() {
        match field {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    updates.push(decode_update(item)?);
                }
            }
            other => updates.push(decode_update(other)?),
        }
    }
    Ok(updates)
}

fn decode_update(v: &Value) -> Result<MarketLineUpdate, SchemaError> {
    serde_json::from_value(v.clone()).map_err(|e| SchemaError::Decode {
        context: "market line update",
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Number};

    #[test]
    fn flat_odds_keep_their_keys() {
        let odds = json!({ "1.100.500": { "price": -110 } });
        let flat = flatten_odds(&odds).unwrap();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat.lines[0].0.as_str(), "1.100.500");
        assert_eq!(flat.lines[0].1.price, Some(Number::from(-110)));
    }

    #[test]
    fn nested_odds_flatten_to_composite_keys() {
        let odds = json!({
            "1": {
                "100": {
                    "500": { "price": -110 },
                    "501": { "price": 105, "alternateLines": [] }
                }
            }
        });
        let flat = flatten_odds(&odds).unwrap();
        let keys: Vec<&str> = flat.lines.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["1.100.500", "1.100.501"]);
        assert_eq!(flat.skipped, 0);
    }

    #[test]
    fn scalar_at_branch_level_is_skipped() {
        let odds = json!({ "1": 42, "2.3.4": { "price": 100 } });
        let flat = flatten_odds(&odds).unwrap();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat.skipped, 1);
    }

    #[test]
    fn null_odds_are_empty_and_arrays_are_rejected() {
        assert!(flatten_odds(&Value::Null).unwrap().is_empty());
        assert!(flatten_odds(&json!([1, 2])).is_err());
    }

    #[test]
    fn selection_root_accepts_object_and_list() {
        let single = json!({
            "marketLineUpdate": {
                "leagueId": 1,
                "marketLines": [{ "marketLineKey": "1.100.501", "price": 120 }]
            }
        });
        assert_eq!(updates_from_selection(&single).unwrap().len(), 1);

        let list = json!({
            "marketLineUpdates": [
                { "marketLines": [] },
                { "marketLines": [{ "marketLineKey": "a.b.c" }] }
            ]
        });
        assert_eq!(updates_from_selection(&list).unwrap().len(), 2);

        assert!(updates_from_selection(&json!({ "marketLineUpdate": null }))
            .unwrap()
            .is_empty());
        assert!(updates_from_selection(&json!("nope")).is_err());
    }

    #[test]
    fn keyed_lines_preserve_order_and_track_max_timestamp() {
        let updates: Vec<MarketLineUpdate> = serde_json::from_value(json!([
            {
                "leagueId": 1,
                "messageTimestamp": 2000,
                "marketLines": [
                    { "marketId": 100, "marketLineId": 500, "price": -105 },
                    { "price": 1 }
                ]
            },
            {
                "messageTimestamp": 1500,
                "marketLines": [{ "marketLineKey": "1.100.500", "price": -102 }]
            }
        ]))
        .unwrap();

        let keyed = KeyedLines::from_updates(&updates);
        assert_eq!(keyed.len(), 2);
        assert_eq!(keyed.skipped, 1);
        assert_eq!(keyed.max_timestamp_ms, Some(2000));
        assert_eq!(keyed.lines[0].1.price, Some(Number::from(-105)));
        assert_eq!(keyed.lines[1].1.price, Some(Number::from(-102)));
    }
}
