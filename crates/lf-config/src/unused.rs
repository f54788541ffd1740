//! Unused-key lint: leaves nothing in [`crate::FeedSettings`] reads.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::leaves;

/// JSON-pointer prefixes the settings loader reads. A prefix covers itself
/// and everything below it.
const CONSUMED_POINTERS: &[&str] = &[
    "/realtime/host",
    "/realtime/region",
    "/realtime/keys_env/api_key",
    "/data_api_url",
    "/sport",
    "/subscription/query",
    "/subscription/variables",
    "/gap_fill/query",
    "/policy/error_frames",
    "/policy/gap_fill",
    "/policy/gap_fill_trigger",
    "/timeouts/connect_ms",
    "/timeouts/send_ms",
    "/timeouts/http_ms",
    "/liveness/stall_after_ms",
];

/// How many pointers a failure message lists.
const PREVIEW: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    /// Leaf pointers no consumer reads, sorted and unique.
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// Report leaves that no setting reads. Misspelled keys otherwise fall back
/// to defaults silently.
///
/// # Errors
/// With [`UnusedKeyPolicy::Fail`], when the report is not clean.
pub fn report_unused_keys(config_json: &Value, policy: UnusedKeyPolicy) -> Result<UnusedKeyReport> {
    let mut unused: Vec<String> = leaves(config_json)
        .into_iter()
        .map(|(pointer, _)| pointer)
        .filter(|pointer| !CONSUMED_POINTERS.iter().any(|c| covers(c, pointer)))
        .collect();
    unused.sort();
    unused.dedup();

    let report = UnusedKeyReport {
        unused_leaf_pointers: unused,
    };
    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        let preview: Vec<&String> = report.unused_leaf_pointers.iter().take(PREVIEW).collect();
        bail!(
            "CONFIG_UNUSED_KEYS: {} unused config leaf key(s) detected. First few: {:?}",
            report.unused_leaf_pointers.len(),
            preview
        );
    }
    Ok(report)
}

/// "/a/b" covers "/a/b" and "/a/b/c" but not "/a/bc".
fn covers(prefix: &str, leaf: &str) -> bool {
    match leaf.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_respects_segment_boundary() {
        assert!(covers("/policy/gap_fill", "/policy/gap_fill"));
        assert!(covers("/subscription/variables", "/subscription/variables/leagueIds/0"));
        assert!(!covers("/policy/gap_fill", "/policy/gap_fill_trigger"));
    }
}
