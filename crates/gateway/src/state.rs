use crate::config::GatewayConfig;
use pipeline::{SessionController, SourceOpener};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<SessionController>,
    pub opener: Arc<dyn SourceOpener>,
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    pub fn new(
        controller: Arc<SessionController>,
        opener: Arc<dyn SourceOpener>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            controller,
            opener,
            config: Arc::new(config),
        }
    }
}
