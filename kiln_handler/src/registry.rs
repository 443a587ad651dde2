//! `HandlerRegistry` — dispatch table from [`LanguageTag`] to the
//! registered [`Handler`] (`spec.md` §4.G).

use std::collections::HashMap;
use std::sync::Arc;

use kiln_core::LanguageTag;
use parking_lot::RwLock;

use crate::error::HandlerError;
use crate::handler::Handler;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<LanguageTag, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, handler: Arc<dyn Handler>) {
        self.handlers
            .write()
            .insert(handler.language_tag(), handler);
    }

    pub fn get(&self, tag: &LanguageTag) -> Result<Arc<dyn Handler>, HandlerError> {
        self.handlers
            .read()
            .get(tag)
            .cloned()
            .ok_or_else(|| HandlerError::NoHandler(tag.clone()))
    }

    pub fn registered_tags(&self) -> Vec<LanguageTag> {
        self.handlers.read().keys().cloned().collect()
    }
}
