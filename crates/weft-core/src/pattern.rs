//! Event name patterns.
//!
//! A destination (handler, transformer, or subscription) matches events by an
//! [`EventPattern`]: an exact name, a `namespace:*` wildcard, or the global
//! `*`. Wildcards are only valid as the entire segment after the namespace
//! separator; anything else is rejected at parse time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error parsing a pattern string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    /// Empty pattern string.
    #[error("empty pattern")]
    Empty,
    /// Wildcard used anywhere other than a trailing `:*` segment.
    #[error("invalid wildcard placement in pattern: {0}")]
    InvalidWildcard(String),
}

/// A compiled event-name pattern.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventPattern {
    /// Matches one event name exactly.
    Exact(String),
    /// Matches every event in a namespace (`orders:*` — stored as `orders:`).
    Namespace(String),
    /// Matches every event (`*`).
    Any,
}

impl EventPattern {
    /// Parse a pattern string (`name`, `namespace:*`, or `*`).
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }
        if pattern == "*" {
            return Ok(Self::Any);
        }
        if let Some(namespace) = pattern.strip_suffix(":*") {
            if namespace.is_empty() || namespace.contains('*') {
                return Err(PatternError::InvalidWildcard(pattern.to_string()));
            }
            return Ok(Self::Namespace(format!("{namespace}:")));
        }
        if pattern.contains('*') {
            return Err(PatternError::InvalidWildcard(pattern.to_string()));
        }
        Ok(Self::Exact(pattern.to_string()))
    }

    /// Whether this pattern matches the given event name.
    #[must_use]
    pub fn matches(&self, event_name: &str) -> bool {
        match self {
            Self::Exact(name) => name == event_name,
            Self::Namespace(prefix) => event_name.starts_with(prefix.as_str()),
            Self::Any => true,
        }
    }

    /// Whether this pattern can only ever match a single name.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_))
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(name) => f.write_str(name),
            Self::Namespace(prefix) => write!(f, "{prefix}*"),
            Self::Any => f.write_str("*"),
        }
    }
}

impl FromStr for EventPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for EventPattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EventPattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
