use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Composite, path-like identifier of one priced market line
/// (e.g. `"3.100.500"` = `leagueId.marketId.marketLineId`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineKey(String);

impl LineKey {
    pub const SEPARATOR: char = '.';

    /// Wrap an already-composed key. Surrounding whitespace is dropped;
    /// an empty key yields `None`.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    /// Join path segments with [`LineKey::SEPARATOR`].
    pub fn from_segments<I, S>(segments: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parts: Vec<String> = segments
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .collect();
        if parts.is_empty() || parts.iter().any(|p| p.is_empty()) {
            return None;
        }
        Some(Self(parts.join(".")))
    }

    /// Derive `leagueId.marketId.marketLineId` from scalar JSON values.
    ///
    /// Each component must be a string or a number; anything else (missing,
    /// null, object) makes the key underivable.
    pub fn derive(league_id: &Value, market_id: &Value, market_line_id: &Value) -> Option<Self> {
        let league = scalar_segment(league_id)?;
        let market = scalar_segment(market_id)?;
        let line = scalar_segment(market_line_id)?;
        Self::from_segments([league, market, line])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(Self::SEPARATOR)
    }
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LineKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn scalar_segment(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
