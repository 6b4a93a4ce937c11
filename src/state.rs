//! Shared application state for request handlers.

use std::sync::Arc;

use crate::config::ServiceConfig;

/// Shared application state, cloneable across handlers via Arc-wrapped fields.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ServiceConfig>,
}

impl AppState {
    pub fn new(service: ServiceConfig) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}
