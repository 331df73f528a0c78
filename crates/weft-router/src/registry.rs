//! Handler registry.
//!
//! Maintains the set of registered [`EventHandler`] destinations. The
//! registry is the source of truth for which handlers exist; matching is a
//! linear scan over patterns — the handler population is small and dispatch
//! is dominated by handler execution, not lookup.

use std::sync::Arc;

use tracing::debug;

use crate::handler::EventHandler;

/// Registry of event handlers, keyed by unique handler name.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register a handler.
    ///
    /// If a handler with the same name already exists, it is replaced.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        let name = handler.name().to_string();
        self.handlers.retain(|h| h.name() != name);
        debug!(name = %name, pattern = %handler.pattern(), "registering handler");
        self.handlers.push(handler);
    }

    /// Unregister a handler by name. Returns `true` if one was removed.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| h.name() != name);
        let removed = self.handlers.len() < before;
        if removed {
            debug!(name = %name, "unregistered handler");
        }
        removed
    }

    /// All handlers whose pattern matches the given event name, in
    /// registration order.
    #[must_use]
    pub fn matching(&self, event_name: &str) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .iter()
            .filter(|h| h.pattern().matches(event_name))
            .cloned()
            .collect()
    }

    /// Get a handler by name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.iter().find(|h| h.name() == name).cloned()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn count(&self) -> usize {
        self.handlers.len()
    }

    /// Names of all registered handlers, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|h| h.name().to_string()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handler_count", &self.count())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::HandlerError;
    use async_trait::async_trait;
    use serde_json::Value;
    use weft_core::pattern::EventPattern;
    use weft_core::{Event, EventContext};

    struct TestHandler {
        name: String,
        pattern: EventPattern,
    }

    #[async_trait]
    impl EventHandler for TestHandler {
        fn name(&self) -> &str {
            &self.name
        }
        fn pattern(&self) -> EventPattern {
            self.pattern.clone()
        }
        async fn handle(&self, _event: &Event, _ctx: &EventContext) -> Result<Value, HandlerError> {
            Ok(Value::Null)
        }
    }

    fn make_handler(name: &str, pattern: &str) -> Arc<dyn EventHandler> {
        Arc::new(TestHandler {
            name: name.to_string(),
            pattern: EventPattern::parse(pattern).unwrap(),
        })
    }

    #[test]
    fn new_registry_is_empty() {
        let registry = HandlerRegistry::new();
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn register_and_match_exact() {
        let mut registry = HandlerRegistry::new();
        registry.register(make_handler("a", "order:created"));
        assert_eq!(registry.matching("order:created").len(), 1);
        assert!(registry.matching("order:updated").is_empty());
    }

    #[test]
    fn match_is_fan_out() {
        let mut registry = HandlerRegistry::new();
        registry.register(make_handler("wildcard", "order:*"));
        registry.register(make_handler("exact", "order:created"));
        registry.register(make_handler("all", "*"));
        registry.register(make_handler("other", "task:*"));

        let matched = registry.matching("order:created");
        assert_eq!(matched.len(), 3, "all matching destinations fire");
    }

    #[test]
    fn register_replaces_duplicate_name() {
        let mut registry = HandlerRegistry::new();
        registry.register(make_handler("a", "order:*"));
        registry.register(make_handler("a", "task:*"));
        assert_eq!(registry.count(), 1);
        assert!(registry.matching("order:created").is_empty());
        assert_eq!(registry.matching("task:done").len(), 1);
    }

    #[test]
    fn unregister() {
        let mut registry = HandlerRegistry::new();
        registry.register(make_handler("a", "order:*"));
        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn get_by_name() {
        let mut registry = HandlerRegistry::new();
        registry.register(make_handler("a", "order:*"));
        assert!(registry.get_by_name("a").is_some());
        assert!(registry.get_by_name("b").is_none());
    }

    #[test]
    fn names_sorted() {
        let mut registry = HandlerRegistry::new();
        registry.register(make_handler("zed", "a:*"));
        registry.register(make_handler("alpha", "a:*"));
        assert_eq!(registry.names(), vec!["alpha".to_string(), "zed".to_string()]);
    }

    #[test]
    fn debug_impl() {
        let registry = HandlerRegistry::new();
        let debug = format!("{registry:?}");
        assert!(debug.contains("HandlerRegistry"));
    }
}
