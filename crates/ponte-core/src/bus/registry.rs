use std::sync::Arc;

use dashmap::DashMap;

use super::handler::{MessageHandler, RequestMessage, TypedHandler, TypedMessageHandler};

/// Maps request-message types to their handler processors.
///
/// Append-only and concurrent-safe: the first registration constructs the
/// erased processor, lookups afterwards are lock-free reads. This is the
/// only process-wide mutable state in the core.
pub struct HandlerRegistry {
    processors: DashMap<String, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            processors: DashMap::new(),
        }
    }

    /// Register a typed handler for `M`. Re-registering a type replaces the
    /// previous processor (last registration wins).
    pub fn register<M, H>(&self, handler: H)
    where
        M: RequestMessage,
        H: TypedMessageHandler<M>,
    {
        self.processors.insert(
            M::MESSAGE_TYPE.to_string(),
            Arc::new(TypedHandler::<M, H>::new(handler)),
        );
    }

    /// Register an already type-erased handler under an explicit key.
    pub fn register_dyn(&self, message_type: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.processors.insert(message_type.into(), handler);
    }

    pub fn resolve(&self, message_type: &str) -> Option<Arc<dyn MessageHandler>> {
        self.processors
            .get(message_type)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, message_type: &str) -> bool {
        self.processors.contains_key(message_type)
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
