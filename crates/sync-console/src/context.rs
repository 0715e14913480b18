//! # Console Context
//!
//! The one object the rest of the console is wired through: configuration,
//! providers, the resource catalog, the service registry and the polling
//! orchestrator. Tests build isolated contexts with their own store
//! factory; the binary builds one from the bootstrap payload.

use crate::catalog::Catalog;
use crate::config::{Bootstrap, ConsoleConfig};
use crate::error::ConfigError;
use crate::polling::PollingOrchestrator;
use crate::provider::Providers;
use crate::registry::ServiceRegistry;
use crate::store_factory::{ProxyStoreFactory, StoreFactory};
use std::sync::Arc;
use sync_framework::Transport;
use tracing::info;

pub struct ConsoleContext {
    config: ConsoleConfig,
    catalog: Arc<Catalog>,
    registry: Arc<ServiceRegistry>,
    orchestrator: PollingOrchestrator,
}

impl ConsoleContext {
    pub fn new(
        config: ConsoleConfig,
        providers: Providers,
        catalog: Catalog,
        stores: Arc<dyn StoreFactory>,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let registry = Arc::new(ServiceRegistry::new(providers, catalog.clone(), stores));
        let orchestrator = PollingOrchestrator::new(registry.clone());
        Self {
            config,
            catalog,
            registry,
            orchestrator,
        }
    }

    /// Wires the standard catalog to proxy stores on `transport`.
    pub fn from_bootstrap(bootstrap: Bootstrap, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        let providers = Providers::from_records(bootstrap.providers)?;
        let catalog = Catalog::standard(bootstrap.config.poll_interval());
        let stores = Arc::new(ProxyStoreFactory::new(transport, bootstrap.config.clone()));
        info!(
            base_url = %bootstrap.config.base_url,
            providers = providers.len(),
            classes = catalog.classes().len(),
            "Console context ready"
        );
        Ok(Self::new(bootstrap.config, providers, catalog, stores))
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn providers(&self) -> &Providers {
        self.registry.providers()
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &PollingOrchestrator {
        &self.orchestrator
    }

    /// Stops polling, then disposes every service.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
        self.registry.dispose();
    }
}
