//! # weft-settings
//!
//! Configuration for the Weft event core.
//!
//! Loading flow:
//! 1. Start with compiled [`WeftSettings::default()`]
//! 2. If `~/.weft/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `WEFT_*` environment variable overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, settings_path};
pub use types::{
    ContextSettings, LoggingSettings, ObserveSettings, RouterSettings, RuleSettings,
    StorageSettings, WeftSettings,
};
