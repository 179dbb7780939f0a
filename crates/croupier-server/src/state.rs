//! Shared application state

use std::sync::Arc;

use croupier_gateway::Gateway;

/// State handed to every handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

impl AppState {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
        }
    }
}
