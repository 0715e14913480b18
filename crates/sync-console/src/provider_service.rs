//! # Provider Service
//!
//! One provider's view of its service type: the models and listings of that
//! service, created on first use with a store from the [`StoreFactory`].
//! [`ProviderService::update`] refreshes every resource the service holds
//! in parallel and reports one combined outcome.

use crate::catalog::{Catalog, ResourceKind};
use crate::dependency::{Resource, Settlement};
use crate::error::RegistryError;
use crate::provider::{Provider, ProviderKey};
use crate::store_factory::StoreFactory;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use sync_framework::event::lock;
use sync_framework::{
    Collection, EventTarget, ListenerKey, Model, ModelId, StoreFailure, SyncStatus,
};
use tracing::{debug, info, warn};

/// Events dispatched by provider and aggregate services.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    Updated,
    Error(StoreFailure),
    Timeout,
}

struct ServiceState {
    resources: Vec<(String, Resource)>,
    status: SyncStatus,
}

pub struct ProviderService {
    provider: Provider,
    key: ProviderKey,
    catalog: Arc<Catalog>,
    stores: Arc<dyn StoreFactory>,
    state: Mutex<ServiceState>,
    events: EventTarget<ServiceEvent>,
    disposed: AtomicBool,
}

impl ProviderService {
    pub fn new(
        provider: Provider,
        catalog: Arc<Catalog>,
        stores: Arc<dyn StoreFactory>,
    ) -> Result<Arc<Self>, RegistryError> {
        let key = provider.key()?;
        debug!(provider = %key, "Creating provider service");
        Ok(Arc::new(Self {
            provider,
            key,
            catalog,
            stores,
            state: Mutex::new(ServiceState {
                resources: Vec::new(),
                status: SyncStatus::new(),
            }),
            events: EventTarget::new(),
            disposed: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> Option<ModelId> {
        self.provider.id()
    }

    pub fn key(&self) -> &ProviderKey {
        &self.key
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn service_type(&self) -> &str {
        &self.key.service_type
    }

    pub fn is_active(&self) -> bool {
        !self.is_disposed() && self.provider.is_active()
    }

    /// The service's resource of `class`, created and bound on first use.
    pub fn resource(&self, class: &str) -> Result<Resource, RegistryError> {
        if self.is_disposed() {
            return Err(RegistryError::UnknownProvider(self.describe_id()));
        }
        if let Some(resource) = self.held(class) {
            return Ok(resource);
        }
        let class = self.catalog.class(class)?;
        if class.service_type() != self.key.service_type {
            return Err(RegistryError::UnknownClass(format!(
                "{} for {}",
                class.name(),
                self.key.service_type
            )));
        }
        let store = self.stores.store_for(&self.key, &class);
        let resource = match class.kind() {
            ResourceKind::Model => {
                let model = Model::new(class.schema().clone())?;
                model.bind_store(store)?;
                Resource::Model(model)
            }
            ResourceKind::Collection => {
                let collection = Collection::new(class.schema().clone());
                collection.bind_store(store)?;
                Resource::Collection(collection)
            }
        };

        let mut state = lock(&self.state);
        // Another caller may have raced us here; the first one wins.
        if let Some((_, existing)) = state.resources.iter().find(|(name, _)| name == class.name()) {
            let existing = existing.clone();
            drop(state);
            resource.dispose();
            return Ok(existing);
        }
        state.resources.push((class.name().to_string(), resource.clone()));
        Ok(resource)
    }

    /// The resource of `class` if it has been created.
    pub fn held(&self, class: &str) -> Option<Resource> {
        lock(&self.state)
            .resources
            .iter()
            .find(|(name, _)| name == class)
            .map(|(_, resource)| resource.clone())
    }

    pub fn collection(&self, class: &str) -> Result<Collection, RegistryError> {
        match self.resource(class)? {
            Resource::Collection(collection) => Ok(collection),
            Resource::Model(_) => Err(RegistryError::WrongKind {
                class: class.to_string(),
                expected: "collection",
            }),
        }
    }

    pub fn model(&self, class: &str) -> Result<Model, RegistryError> {
        match self.resource(class)? {
            Resource::Model(model) => Ok(model),
            Resource::Collection(_) => Err(RegistryError::WrongKind {
                class: class.to_string(),
                expected: "model",
            }),
        }
    }

    /// Refreshes every held resource. Any failure fails the update, then
    /// any timeout times it out.
    pub async fn update(&self) -> Settlement {
        if self.is_disposed() {
            return Settlement::no_response("service disposed");
        }
        let resources: Vec<Resource> = {
            let mut state = lock(&self.state);
            state.status.begin_request();
            state.resources.iter().map(|(_, resource)| resource.clone()).collect()
        };
        debug!(provider = %self.key, resources = resources.len(), "Updating provider service");
        let settlement = Settlement::all_of(join_all(resources.iter().map(Resource::refresh)).await);
        self.report(&settlement);
        settlement
    }

    fn report(&self, settlement: &Settlement) {
        if self.is_disposed() {
            return;
        }
        lock(&self.state).status.apply(&settlement.to_outcome());
        let event = match settlement {
            Settlement::Loaded => ServiceEvent::Updated,
            Settlement::Failed(failure) => {
                warn!(provider = %self.key, %failure, "Provider service update failed");
                ServiceEvent::Error(failure.clone())
            }
            Settlement::TimedOut => {
                warn!(provider = %self.key, "Provider service update timed out");
                ServiceEvent::Timeout
            }
        };
        self.events.dispatch(&event);
    }

    pub fn status(&self) -> SyncStatus {
        lock(&self.state).status.clone()
    }

    pub fn is_loaded(&self) -> bool {
        lock(&self.state).status.is_loaded()
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.state).status.is_loading()
    }

    pub fn has_error(&self) -> bool {
        lock(&self.state).status.has_error()
    }

    pub fn has_timeout(&self) -> bool {
        lock(&self.state).status.has_timeout()
    }

    pub fn events(&self) -> EventTarget<ServiceEvent> {
        self.events.clone()
    }

    pub fn listen<F>(&self, listener: F) -> ListenerKey
    where
        F: Fn(&ServiceEvent) + Send + Sync + 'static,
    {
        self.events.listen(listener)
    }

    /// Disposes every resource the service created. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let resources = std::mem::take(&mut lock(&self.state).resources);
        info!(provider = %self.key, resources = resources.len(), "Disposing provider service");
        for (_, resource) in resources {
            resource.dispose();
        }
        self.events.clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn describe_id(&self) -> ModelId {
        self.id().unwrap_or_else(|| ModelId::from(self.key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ResourceClass;
    use crate::provider::Providers;
    use serde_json::json;
    use std::time::Duration;
    use sync_framework::mock::MockStore;
    use sync_framework::{FieldSpec, ModelSchema, Operation, Store};

    fn catalog() -> Arc<Catalog> {
        let server = ModelSchema::builder("server").field(FieldSpec::string("name")).build();
        let limits = ModelSchema::builder("limits").field(FieldSpec::number("ram")).build();
        Arc::new(
            Catalog::new()
                .with_class(ResourceClass::collection("compute", server, "servers"))
                .with_class(ResourceClass::model("compute", limits, "limits")),
        )
    }

    fn provider() -> Provider {
        let providers = Providers::from_records(vec![json!({
            "service_type": "compute", "service_name": "cloudServers", "service_region": "ORD"
        })])
        .unwrap();
        providers.all().remove(0)
    }

    fn service_with(servers: &MockStore, limits: &MockStore) -> Arc<ProviderService> {
        let servers = servers.clone();
        let limits = limits.clone();
        let factory = move |_: &ProviderKey, class: &ResourceClass| -> Arc<dyn Store> {
            match class.name() {
                "limits" => Arc::new(limits.clone()),
                _ => Arc::new(servers.clone()),
            }
        };
        ProviderService::new(provider(), catalog(), Arc::new(factory)).unwrap()
    }

    #[test]
    fn resources_are_created_once() {
        let store = MockStore::new();
        let service = service_with(&store, &store);
        let first = service.collection("server").unwrap();
        let second = service.collection("server").unwrap();
        assert!(first.ptr_eq(&second));
        assert!(matches!(
            service.collection("limits"),
            Err(RegistryError::WrongKind { expected: "collection", .. })
        ));
        assert!(matches!(service.resource("router"), Err(RegistryError::UnknownClass(_))));
    }

    #[tokio::test]
    async fn update_refreshes_held_resources() {
        let servers = MockStore::named("servers");
        let limits = MockStore::named("limits");
        servers.expect_fetch().return_sync(json!([{"id": 1, "name": "web"}]));
        limits.expect_fetch().return_sync(json!({"ram": 2048}));
        let service = service_with(&servers, &limits);
        let collection = service.collection("server").unwrap();
        let model = service.model("limits").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        service.listen(move |event| sink.lock().unwrap().push(event.clone()));

        assert_eq!(service.update().await, Settlement::Loaded);
        assert_eq!(collection.len(), 1);
        assert_eq!(model.get("ram").unwrap(), json!(2048));
        assert!(service.is_loaded());
        assert_eq!(*seen.lock().unwrap(), vec![ServiceEvent::Updated]);
        servers.verify();
        limits.verify();
    }

    #[tokio::test]
    async fn one_failed_resource_fails_the_update() {
        let servers = MockStore::named("servers");
        let limits = MockStore::named("limits");
        servers.expect_fetch().return_timeout();
        limits
            .expect_fetch()
            .delayed(Duration::from_millis(5))
            .return_error(500, "");
        let service = service_with(&servers, &limits);
        service.collection("server").unwrap();
        service.model("limits").unwrap();

        let settlement = service.update().await;
        assert_eq!(settlement.failure().map(|failure| failure.status), Some(500));
        assert!(service.has_error());
        assert!(!service.is_loading());
        assert_eq!(servers.calls(Operation::Fetch), 1);
    }

    #[test]
    fn dispose_tears_down_resources() {
        let store = MockStore::new();
        let service = service_with(&store, &store);
        let collection = service.collection("server").unwrap();
        service.dispose();
        assert!(collection.is_disposed());
        assert!(!service.is_active());
        assert!(service.resource("server").is_err());
    }
}
