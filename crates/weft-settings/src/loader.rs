//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)
//!
//! Environment overrides parse strictly; invalid values are silently ignored
//! and the file/default value stands.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::WeftSettings;

/// Resolve the path to the settings file (`~/.weft/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".weft").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<WeftSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<WeftSettings> {
    let defaults = serde_json::to_value(WeftSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: WeftSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply environment variable overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut WeftSettings) {
    // ── Router ──────────────────────────────────────────────────────
    if let Some(v) = read_env_u32("WEFT_MAX_DEPTH", 1, 4096) {
        settings.router.max_depth = v;
    }
    if let Some(v) = read_env_u64("WEFT_HANDLER_TIMEOUT_MS", 1, 3_600_000) {
        settings.router.handler_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("WEFT_ASYNC_TRANSFORM_TIMEOUT_MS", 1, 3_600_000) {
        settings.router.async_transform_timeout_ms = v;
    }

    // ── Context ─────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("WEFT_HOT_RETENTION_SECS", 1, 31_536_000) {
        settings.context.hot_retention_secs = v;
    }
    if let Some(v) = read_env_u64("WEFT_MIGRATION_INTERVAL_SECS", 1, 86_400) {
        settings.context.migration_interval_secs = v;
    }

    // ── Rules ───────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("WEFT_RULE_SWEEP_INTERVAL_SECS", 1, 86_400) {
        settings.rules.sweep_interval_secs = v;
    }

    // ── Observation ─────────────────────────────────────────────────
    if let Some(v) = read_env_u64("WEFT_DELIVERY_TIMEOUT_MS", 1, 600_000) {
        settings.observe.delivery_timeout_ms = v;
    }

    // ── Storage / logging ───────────────────────────────────────────
    if let Some(v) = read_env_string("WEFT_DB_PATH") {
        settings.storage.db_path = v;
    }
    if let Some(v) = read_env_string("WEFT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("WEFT_LOG_JSON") {
        settings.logging.json = v;
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    let parsed: u32 = std::env::var(name).ok()?.parse().ok()?;
    (min..=max).contains(&parsed).then_some(parsed)
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let parsed: u64 = std::env::var(name).ok()?.parse().ok()?;
    (min..=max).contains(&parsed).then_some(parsed)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
