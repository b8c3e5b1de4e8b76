//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`WorkbenchSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `WB_*` environment variable overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::WorkbenchSettings;

/// Resolve the settings file path.
///
/// `WB_SETTINGS_PATH` wins; otherwise `~/.workbench/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = read_env_string("WB_SETTINGS_PATH") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".workbench").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<WorkbenchSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<WorkbenchSettings> {
    let defaults = serde_json::to_value(WorkbenchSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: WorkbenchSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `WB_*` environment variable overrides.
///
/// Invalid values are warned about and ignored.
pub fn apply_env_overrides(settings: &mut WorkbenchSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("WB_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("WB_PORT", 1, 65535) {
        settings.server.port = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("WB_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("WB_LOG_JSON") {
        settings.logging.json = v;
    }

    // ── Docker ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("WB_DOCKER_NETWORK") {
        settings.docker.network = v;
    }
    if let Some(v) = read_env_string("WB_EDITOR_IMAGE") {
        settings.docker.editor_image = v;
    }

    // ── Proxy ───────────────────────────────────────────────────────
    if let Some(v) = read_env_string("WB_PROXY_TEMPLATE") {
        settings.proxy.host_template = v;
    }
    if let Some(v) = read_env_string("WB_PROXY_SCHEME") {
        settings.proxy.scheme = v;
    }
    if let Some(v) = read_env_string("WB_TRAEFIK_API_URL") {
        settings.proxy.traefik_api_url = v;
    }
    if let Some(v) = read_env_string("WB_PROXY_HASH_SALT") {
        settings.proxy.hash_salt = v;
    }

    // ── Storage ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("WB_REDIS_URL") {
        settings.redis.url = v;
    }
    if let Some(v) = read_env_string("WB_REPOSITORIES_ROOT") {
        settings.repositories.root = v;
    }
}

/// Reject settings that cannot work together.
pub fn validate(settings: &WorkbenchSettings) -> Result<()> {
    if settings.proxy.port_range_start >= settings.proxy.port_range_end {
        return Err(SettingsError::InvalidValue(format!(
            "proxy port range {}..{} is empty",
            settings.proxy.port_range_start, settings.proxy.port_range_end
        )));
    }
    if !settings.proxy.host_template.contains("{hash}") {
        return Err(SettingsError::InvalidValue(format!(
            "proxy host template {:?} has no {{hash}} placeholder",
            settings.proxy.host_template
        )));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
