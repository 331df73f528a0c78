//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so partial JSON files work — missing fields get production defaults.

use serde::{Deserialize, Serialize};

/// Root settings type for the Weft event core.
///
/// Loaded from `~/.weft/settings.json` with defaults applied for missing
/// fields; `WEFT_*` environment variables override specific values.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WeftSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Event router settings.
    pub router: RouterSettings,
    /// Context manager settings.
    pub context: ContextSettings,
    /// Routing rule service settings.
    pub rules: RuleSettings,
    /// Observation manager settings.
    pub observe: ObserveSettings,
    /// Durable storage settings.
    pub storage: StorageSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for WeftSettings {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            name: "weft".to_string(),
            router: RouterSettings::default(),
            context: ContextSettings::default(),
            rules: RuleSettings::default(),
            observe: ObserveSettings::default(),
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Event router settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterSettings {
    /// Maximum context depth a transformer chain may reach. Generous but
    /// finite — deeper propagation is refused with a diagnostic event.
    pub max_depth: u32,
    /// Per-handler execution timeout in milliseconds.
    pub handler_timeout_ms: u64,
    /// Deadline for an async transform's response event in milliseconds.
    pub async_transform_timeout_ms: u64,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            max_depth: 32,
            handler_timeout_ms: 30_000,
            async_transform_timeout_ms: 30_000,
        }
    }
}

/// Context manager settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    /// How long a context stays in the hot tier before migration, in seconds.
    pub hot_retention_secs: u64,
    /// Interval between hot→cold migration sweeps, in seconds.
    pub migration_interval_secs: u64,
    /// Bound on the cold-tier writer queue.
    pub writer_queue_size: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            hot_retention_secs: 86_400,
            migration_interval_secs: 60,
            writer_queue_size: 256,
        }
    }
}

/// Routing rule service settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleSettings {
    /// Interval between TTL expiry sweeps, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
        }
    }
}

/// Observation manager settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObserveSettings {
    /// Per-notification delivery timeout in milliseconds.
    pub delivery_timeout_ms: u64,
    /// Delivery failures within the rolling window that open the breaker.
    pub breaker_failure_threshold: u32,
    /// Rolling failure window in seconds.
    pub breaker_window_secs: u64,
    /// Cooldown before an open breaker half-opens, in seconds.
    pub breaker_cooldown_secs: u64,
}

impl Default for ObserveSettings {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: 5_000,
            breaker_failure_threshold: 5,
            breaker_window_secs: 60,
            breaker_cooldown_secs: 30,
        }
    }
}

/// Durable storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Path to the SQLite database file.
    pub db_path: String,
    /// Maximum connection pool size.
    pub pool_size: u32,
    /// SQLite busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
    /// SQLite page cache size in KiB.
    pub cache_size_kib: i64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: "~/.weft/weft.db".to_string(),
            pool_size: 16,
            busy_timeout_ms: 30_000,
            cache_size_kib: 8192,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level persisted/printed (`trace`..`error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
