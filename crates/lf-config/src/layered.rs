//! Layer merge, canonical hashing, and the literal-secret guard.

use std::collections::BTreeMap;
use std::fs;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::leaves;

/// A leaf string starting with one of these aborts the load with
/// CONFIG_SECRET_DETECTED.
const SECRET_PREFIXES: &[&str] = &[
    "da2-",       // AppSync API key
    "AKIA",       // AWS access key ID
    "sk-",        // OpenAI style
    "sk_live",    // Stripe live
    "sk_test",    // Stripe test
    "ghp_",       // GitHub PAT
    "glpat-",     // GitLab PAT
    "xoxb-",      // Slack bot token
    "-----BEGIN", // PEM private keys
];

/// Shorter values are never treated as credentials.
const MIN_SECRET_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Hex SHA-256 of `canonical_json`.
    pub config_hash: String,
    /// Merged document with object keys sorted at every level.
    pub canonical_json: String,
    /// Merged document in source key order.
    pub config_json: Value,
}

/// Read and merge YAML files, first path as base.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let docs = paths
        .iter()
        .map(|p| fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}")))
        .collect::<Result<Vec<String>>>()?;
    let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Map::new());
    for (layer, raw) in yaml_docs.iter().enumerate() {
        let doc: serde_yaml::Value =
            serde_yaml::from_str(raw).with_context(|| format!("invalid yaml in layer {layer}"))?;
        // An empty document parses as null; treat it as an empty overlay.
        if doc.is_null() {
            continue;
        }
        let doc = serde_json::to_value(doc).context("yaml->json conversion failed")?;
        overlay(&mut merged, doc);
    }

    reject_secret_literals(&merged)?;

    let canonical_json =
        serde_json::to_string(&sorted(&merged)).context("canonical json serialize failed")?;
    let config_hash = hex::encode(Sha256::digest(canonical_json.as_bytes()));
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

/// Objects merge key by key; any other value in `top` replaces `base`.
fn overlay(base: &mut Value, top: Value) {
    match top {
        Value::Object(top_map) if base.is_object() => {
            if let Value::Object(base_map) = base {
                for (k, v) in top_map {
                    match base_map.get_mut(&k) {
                        Some(existing) => overlay(existing, v),
                        None => {
                            base_map.insert(k, v);
                        }
                    }
                }
            }
        }
        other => *base = other,
    }
}

/// `serde_json` is built with `preserve_order` in this workspace, so key
/// order would otherwise follow the YAML source and leak into the hash.
fn sorted(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let by_key: BTreeMap<&String, &Value> = map.iter().collect();
            Value::Object(by_key.into_iter().map(|(k, v)| (k.clone(), sorted(v))).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

fn reject_secret_literals(v: &Value) -> Result<()> {
    for (pointer, leaf) in leaves(v) {
        let Some(s) = leaf.as_str().map(str::trim) else {
            continue;
        };
        if s.len() >= MIN_SECRET_LEN && SECRET_PREFIXES.iter().any(|p| s.starts_with(p)) {
            bail!("CONFIG_SECRET_DETECTED leaf={pointer} value=REDACTED");
        }
    }
    Ok(())
}
