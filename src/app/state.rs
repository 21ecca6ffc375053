//! Application state management.

use std::sync::Arc;

use crate::domain::{AuthHooks, BrokerConfig, BrokerError, RecordRegistry};

use super::service::PairingService;

/// Shared broker state
pub struct AppState {
    pub config: BrokerConfig,
    pub service: Arc<PairingService>,
    pub registry: Arc<dyn RecordRegistry>,
}

impl AppState {
    /// Create a new application state
    pub fn new(
        config: BrokerConfig,
        registry: Arc<dyn RecordRegistry>,
        hooks: Arc<dyn AuthHooks>,
    ) -> Result<Self, BrokerError> {
        let service = Arc::new(PairingService::new(
            config.clone(),
            Arc::clone(&registry),
            hooks,
        )?);
        Ok(Self {
            config,
            service,
            registry,
        })
    }
}
