//! Event-name → handler registry for one endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use super::handler::FrameHandler;

/// Registry mapping event names to handlers.
///
/// Built while the endpoint is being defined, immutable afterwards.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn FrameHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event name, replacing any earlier one.
    pub fn register(&mut self, event: &str, handler: impl FrameHandler) {
        if self
            .handlers
            .insert(event.to_owned(), Arc::new(handler))
            .is_some()
        {
            warn!(event, "handler replaced");
        }
    }

    /// Look up the handler for an event name.
    pub fn get(&self, event: &str) -> Option<&Arc<dyn FrameHandler>> {
        self.handlers.get(event)
    }

    /// Check whether an event has a handler.
    pub fn has_event(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// List all registered event names (sorted).
    pub fn events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered events.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("events", &self.events())
            .finish()
    }
}
