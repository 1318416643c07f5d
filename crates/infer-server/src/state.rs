//! Application state shared across handlers.

use std::sync::Arc;

use crate::catalog::ModelCatalog;
use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::dispatcher::GenerationDispatcher;
use crate::registry::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<ModelCatalog>,
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Arc<GenerationDispatcher>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire the registry and dispatcher around `catalog`. `config` is expected to be
    /// validated already.
    pub fn new(config: ServerConfig, catalog: ModelCatalog, clock: Arc<dyn Clock>) -> Self {
        let catalog = Arc::new(catalog);
        let registry = Arc::new(SessionRegistry::new(
            Arc::clone(&catalog),
            config.registry_limits(),
            clock,
        ));
        let dispatcher = Arc::new(GenerationDispatcher::new(
            Arc::clone(&catalog),
            Arc::clone(&registry),
        ));
        Self {
            catalog,
            registry,
            dispatcher,
            config: Arc::new(config),
        }
    }

    /// State backed by the reference models described in `config`.
    pub fn from_config(config: ServerConfig, clock: Arc<dyn Clock>) -> Self {
        let catalog = ModelCatalog::from_config(&config);
        Self::new(config, catalog, clock)
    }
}
