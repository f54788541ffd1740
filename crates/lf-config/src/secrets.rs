//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"REALTIME_API_KEY"`).
//! - At startup, callers invoke [`resolve_secrets`] once and pass the result
//!   into constructors.
//! - `Debug` redacts values; error messages reference the env var NAME only.

use anyhow::{bail, Result};
use serde_json::Value;

use crate::settings::read_str_at;

pub const DEFAULT_API_KEY_ENV: &str = "REALTIME_API_KEY";

/// Secrets for one client instance. **Values are redacted in `Debug` output.**
#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Token sent as `Authorization` on the socket, the gap-fill POST and as
    /// `x-api-key` on the snapshot GET.
    pub realtime_api_key: String,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("realtime_api_key", &"<REDACTED>")
            .finish()
    }
}

/// Resolve every required secret named by `config_json`.
///
/// # Errors
/// Returns `Err` naming the **env var** of the first missing secret. The
/// value is never mentioned.
pub fn resolve_secrets<F>(config_json: &Value, lookup: F) -> Result<ResolvedSecrets>
where
    F: Fn(&str) -> Option<String>,
{
    let key_var = read_str_at(config_json, "/realtime/keys_env/api_key")
        .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string());

    let Some(realtime_api_key) = lookup(&key_var).filter(|v| !v.trim().is_empty()) else {
        bail!(
            "SECRETS_MISSING: required env var '{}' (realtime api key) is not set or empty",
            key_var
        );
    };

    Ok(ResolvedSecrets {
        realtime_api_key: realtime_api_key.trim().to_string(),
    })
}
