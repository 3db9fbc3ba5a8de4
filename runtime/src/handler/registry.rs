//! Subtype-keyed handler lookup (spec.md §4.4), grounded on the
//! name-to-`tcmu_handler` map built at startup in
//! `examples/original_source/main.c` (`open_handlers`/`handler_list`).

use std::collections::HashMap;
use std::sync::Arc;

use shared::errors::HandlerError;

use super::HandlerModule;

/// Read-only once built: registration happens at startup, lookups happen
/// on every device attach.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn HandlerModule>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder {
            handlers: HashMap::new(),
        }
    }

    pub fn lookup(&self, subtype: &str) -> Option<Arc<dyn HandlerModule>> {
        self.handlers.get(subtype).cloned()
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn HandlerModule>>,
}

impl HandlerRegistryBuilder {
    pub fn register(mut self, handler: Arc<dyn HandlerModule>) -> Result<Self, HandlerError> {
        let subtype = handler.subtype().to_string();
        if self.handlers.insert(subtype.clone(), handler).is_some() {
            return Err(HandlerError::DuplicateSubtype(subtype));
        }
        Ok(self)
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::file::FileHandler;

    #[test]
    fn lookup_finds_registered_subtype() {
        let registry = HandlerRegistry::builder()
            .register(Arc::new(FileHandler::new()))
            .unwrap()
            .build();
        assert!(registry.lookup("file").is_some());
        assert!(registry.lookup("nope").is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let result = HandlerRegistry::builder()
            .register(Arc::new(FileHandler::new()))
            .unwrap()
            .register(Arc::new(FileHandler::new()));
        assert!(result.is_err());
    }
}
