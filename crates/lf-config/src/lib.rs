//! lf-config
//!
//! Layered YAML settings for the feed client.
//!
//! - YAML documents merge in order: earlier docs are base, later docs override.
//! - The merged document is hashed (SHA-256 over canonical JSON) so a running
//!   client can log exactly which settings it was started with.
//! - Secrets never live in YAML. Documents carry env var NAMES only; a leaf
//!   value that looks like a literal credential aborts the load.
//! - Typed views ([`FeedSettings`], [`ResolvedSecrets`]) are built once at
//!   startup and handed to constructors.

mod layered;
mod secrets;
mod settings;
mod unused;

pub use layered::{load_layered_yaml, load_layered_yaml_from_strings, LoadedConfig};
pub use secrets::{resolve_secrets, ResolvedSecrets, DEFAULT_API_KEY_ENV};
pub use settings::{
    ErrorFramePolicy, FeedSettings, GapFillPolicy, GapFillTrigger, SubscriptionSettings,
    Timeouts, DEFAULT_SPORT,
};
pub use unused::{report_unused_keys, UnusedKeyPolicy, UnusedKeyReport};

use serde_json::Value;

/// Every leaf of `v` as `(json_pointer, value)`, depth-first in document
/// order. Empty objects and arrays count as leaves.
pub(crate) fn leaves(v: &Value) -> Vec<(String, &Value)> {
    fn walk<'a>(v: &'a Value, at: &mut String, out: &mut Vec<(String, &'a Value)>) {
        let mark = at.len();
        match v {
            Value::Object(map) if !map.is_empty() => {
                for (k, child) in map {
                    at.push('/');
                    at.push_str(&k.replace('~', "~0").replace('/', "~1"));
                    walk(child, at, out);
                    at.truncate(mark);
                }
            }
            Value::Array(items) if !items.is_empty() => {
                for (i, child) in items.iter().enumerate() {
                    at.push('/');
                    at.push_str(&i.to_string());
                    walk(child, at, out);
                    at.truncate(mark);
                }
            }
            leaf => {
                let pointer = if at.is_empty() { "/".to_string() } else { at.clone() };
                out.push((pointer, leaf));
            }
        }
    }

    let mut out = Vec::new();
    walk(v, &mut String::new(), &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn leaves_escape_pointer_tokens() {
        let v = json!({ "a/b": { "c~d": 1 }, "list": [true], "empty": {} });
        let ptrs: Vec<String> = leaves(&v).into_iter().map(|(p, _)| p).collect();
        assert_eq!(ptrs, vec!["/a~1b/c~0d", "/list/0", "/empty"]);
    }

    #[test]
    fn scalar_root_is_a_single_leaf() {
        let v = json!(7);
        assert_eq!(leaves(&v), vec![("/".to_string(), &v)]);
    }
}
