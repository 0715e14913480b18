//! # Service Registry
//!
//! Resolves a [`DependencyRequest`] to the live object behind it, creating
//! aggregate services lazily, one per service type. Views hand a batch of
//! requests to [`ServiceRegistry::require`] and get one joined outcome:
//!
//! | Settlements                 | Outcome                   |
//! |-----------------------------|---------------------------|
//! | every dependency loaded     | [`RequireOutcome::Loaded`]   |
//! | every dependency timed out  | [`RequireOutcome::TimedOut`] |
//! | anything else               | [`RequireOutcome::Errored`]  |
//!
//! [`ServiceRegistry::require_with`] runs the same join in the background
//! and calls exactly one callback, unless the requesting view has been
//! disposed by then.

use crate::aggregate_service::AggregateProviderService;
use crate::catalog::Catalog;
use crate::dependency::{Dependency, DependencyRequest, ServiceTarget, Settlement};
use crate::error::RegistryError;
use crate::provider::Providers;
use crate::store_factory::StoreFactory;
use futures::future::join_all;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use sync_framework::event::lock;
use sync_framework::{Disposable, StoreFailure};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// The joined result of a batch of dependencies.
#[derive(Debug, Clone, PartialEq)]
pub enum RequireOutcome {
    Loaded,
    TimedOut,
    /// Carries every failure seen; empty when loads and timeouts were mixed.
    Errored(Vec<StoreFailure>),
}

impl RequireOutcome {
    pub fn classify(settlements: Vec<Settlement>) -> Self {
        if settlements.iter().all(Settlement::is_loaded) {
            return RequireOutcome::Loaded;
        }
        if settlements.iter().all(|settlement| *settlement == Settlement::TimedOut) {
            return RequireOutcome::TimedOut;
        }
        RequireOutcome::Errored(
            settlements
                .into_iter()
                .filter_map(|settlement| match settlement {
                    Settlement::Failed(failure) => Some(failure),
                    _ => None,
                })
                .collect(),
        )
    }
}

type Callback = Box<dyn FnOnce() + Send>;
type ErrorCallback = Box<dyn FnOnce(Vec<StoreFailure>) + Send>;

/// One optional callback per [`RequireOutcome`].
#[derive(Default)]
pub struct RequireCallbacks {
    on_loaded: Option<Callback>,
    on_error: Option<ErrorCallback>,
    on_timeout: Option<Callback>,
}

impl RequireCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_loaded(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_loaded = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnOnce(Vec<StoreFailure>) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn on_timeout(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_timeout = Some(Box::new(callback));
        self
    }

    fn deliver(self, outcome: RequireOutcome) {
        match outcome {
            RequireOutcome::Loaded => self.on_loaded.map(|callback| callback()),
            RequireOutcome::TimedOut => self.on_timeout.map(|callback| callback()),
            RequireOutcome::Errored(failures) => self.on_error.map(|callback| callback(failures)),
        };
    }
}

pub struct ServiceRegistry {
    providers: Providers,
    catalog: Arc<Catalog>,
    stores: Arc<dyn StoreFactory>,
    aggregates: Mutex<HashMap<String, Arc<AggregateProviderService>>>,
}

impl ServiceRegistry {
    pub fn new(providers: Providers, catalog: Arc<Catalog>, stores: Arc<dyn StoreFactory>) -> Self {
        Self {
            providers,
            catalog,
            stores,
            aggregates: Mutex::new(HashMap::new()),
        }
    }

    pub fn providers(&self) -> &Providers {
        &self.providers
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// The aggregate service for `service_type`, created on first use. A
    /// type is known once a provider offers it or the catalog describes it.
    pub fn aggregate(&self, service_type: &str) -> Result<Arc<AggregateProviderService>, RegistryError> {
        if let Some(held) = lock(&self.aggregates).get(service_type) {
            return Ok(held.clone());
        }
        if self.providers.for_service_type(service_type).is_empty()
            && self.catalog.for_service_type(service_type).is_empty()
        {
            return Err(RegistryError::UnknownServiceType(service_type.to_string()));
        }
        let created = AggregateProviderService::new(
            service_type,
            self.providers.clone(),
            self.catalog.clone(),
            self.stores.clone(),
        )?;
        let mut aggregates = lock(&self.aggregates);
        match aggregates.entry(service_type.to_string()) {
            Entry::Occupied(held) => {
                let held = held.get().clone();
                drop(aggregates);
                created.dispose();
                Ok(held)
            }
            Entry::Vacant(slot) => Ok(slot.insert(created).clone()),
        }
    }

    pub fn aggregates(&self) -> Vec<Arc<AggregateProviderService>> {
        lock(&self.aggregates).values().cloned().collect()
    }

    pub fn get_dependency(&self, request: &DependencyRequest) -> Result<Dependency, RegistryError> {
        match request {
            DependencyRequest::Providers { id: None } => Ok(Dependency::Providers(self.providers.clone())),
            DependencyRequest::Providers { id: Some(id) } => self
                .providers
                .get(id)
                .map(|provider| Dependency::Model(provider.model().clone()))
                .ok_or_else(|| RegistryError::UnknownProvider(id.clone())),
            DependencyRequest::Provider { provider, class } => {
                let key = provider.key()?;
                let id = provider
                    .id()
                    .ok_or_else(|| RegistryError::IncompleteProvider(key.to_string()))?;
                let target = match class {
                    Some(class) => ServiceTarget::ProviderClass(id, class.clone()),
                    None => ServiceTarget::Provider(id),
                };
                self.aggregate(&key.service_type)?.get_dependency(&target)
            }
            DependencyRequest::Service {
                service_type,
                target,
            } => self.aggregate(service_type)?.get_dependency(target),
        }
    }

    fn resolve(&self, requests: &[DependencyRequest]) -> Result<Vec<Dependency>, RegistryError> {
        requests
            .iter()
            .map(|request| self.get_dependency(request))
            .collect()
    }

    /// Loads every requested dependency, joining requests already in
    /// flight, and classifies the joined result.
    pub async fn require(&self, requests: &[DependencyRequest]) -> Result<RequireOutcome, RegistryError> {
        let dependencies = self.resolve(requests)?;
        Ok(settle_all(dependencies).await)
    }

    /// Like [`require`](Self::require), in the background. Resolution
    /// errors are returned right away; after that exactly one callback runs,
    /// or none if `context` was disposed in the meantime. Aborting the
    /// returned handle cancels the callbacks as well.
    pub fn require_with<C>(
        &self,
        requests: &[DependencyRequest],
        callbacks: RequireCallbacks,
        context: C,
    ) -> Result<JoinHandle<()>, RegistryError>
    where
        C: Disposable + 'static,
    {
        let dependencies = self.resolve(requests)?;
        Ok(tokio::spawn(async move {
            let outcome = settle_all(dependencies).await;
            if context.is_disposed() {
                debug!(?outcome, "Requiring context disposed, dropping callbacks");
                return;
            }
            callbacks.deliver(outcome);
        }))
    }

    /// Disposes every aggregate service created so far.
    pub fn dispose(&self) {
        let aggregates: Vec<_> = lock(&self.aggregates).drain().map(|(_, held)| held).collect();
        info!(aggregates = aggregates.len(), "Disposing service registry");
        for aggregate in aggregates {
            aggregate.dispose();
        }
    }
}

async fn settle_all(dependencies: Vec<Dependency>) -> RequireOutcome {
    debug!(dependencies = dependencies.len(), "Requiring dependencies");
    let settlements = join_all(dependencies.iter().map(Dependency::settle)).await;
    RequireOutcome::classify(settlements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ResourceClass;
    use crate::provider::ProviderKey;
    use sync_framework::mock::MockStore;
    use sync_framework::{Operation, Store};

    #[test]
    fn classification() {
        let failure = StoreFailure::new(Operation::Fetch, 500, "");
        assert_eq!(RequireOutcome::classify(Vec::new()), RequireOutcome::Loaded);
        assert_eq!(
            RequireOutcome::classify(vec![Settlement::Loaded, Settlement::Loaded]),
            RequireOutcome::Loaded
        );
        assert_eq!(
            RequireOutcome::classify(vec![Settlement::TimedOut, Settlement::TimedOut]),
            RequireOutcome::TimedOut
        );
        assert_eq!(
            RequireOutcome::classify(vec![Settlement::Loaded, Settlement::TimedOut]),
            RequireOutcome::Errored(Vec::new())
        );
        assert_eq!(
            RequireOutcome::classify(vec![Settlement::Failed(failure.clone()), Settlement::Loaded]),
            RequireOutcome::Errored(vec![failure])
        );
    }

    #[test]
    fn unknown_service_types_are_rejected() {
        let stores = |_: &ProviderKey, _: &ResourceClass| -> Arc<dyn Store> { Arc::new(MockStore::new()) };
        let registry = ServiceRegistry::new(Providers::new(), Arc::new(Catalog::new()), Arc::new(stores));
        assert!(matches!(
            registry.get_dependency(&DependencyRequest::service("dns")),
            Err(RegistryError::UnknownServiceType(_))
        ));
        assert!(matches!(
            registry.get_dependency(&DependencyRequest::provider_record("compute:ORD")),
            Err(RegistryError::UnknownProvider(_))
        ));
    }
}
