//! # Aggregate Provider Service
//!
//! Every provider of one service type behind a single service. An update
//! fans out to the active provider services in parallel and succeeds when
//! **any** of them succeeds, so one healthy region is enough to render the
//! console. Providers that answer 403 or 404 are dropped for the rest of the
//! session.
//!
//! Resource classes are addressed two ways: per provider
//! ([`ServiceTarget::ProviderClass`]) or merged across providers through a
//! [`CollectionSyncer`] ([`ServiceTarget::Class`]). Providers added later
//! are back-filled into every merged class that already exists.

use crate::catalog::{Catalog, ResourceKind};
use crate::collection_syncer::CollectionSyncer;
use crate::dependency::{Dependency, Resource, ServiceTarget, Settlement};
use crate::error::RegistryError;
use crate::provider::{Provider, Providers};
use crate::provider_service::{ProviderService, ServiceEvent};
use crate::store_factory::StoreFactory;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use sync_framework::event::lock;
use sync_framework::{
    CollectionEvent, EventTarget, ListenerKey, Model, ModelId, StoreFailure, SyncStatus,
};
use tracing::{debug, info, instrument, warn};

struct AggregateState {
    services: Vec<Arc<ProviderService>>,
    syncers: Vec<(String, Arc<CollectionSyncer>)>,
    status: SyncStatus,
    providers_listener: Option<ListenerKey>,
}

pub struct AggregateProviderService {
    service_type: String,
    providers: Providers,
    catalog: Arc<Catalog>,
    stores: Arc<dyn StoreFactory>,
    state: Mutex<AggregateState>,
    events: EventTarget<ServiceEvent>,
    disposed: AtomicBool,
}

impl AggregateProviderService {
    /// Creates a service per provider of `service_type` and follows
    /// providers added later.
    pub fn new(
        service_type: impl Into<String>,
        providers: Providers,
        catalog: Arc<Catalog>,
        stores: Arc<dyn StoreFactory>,
    ) -> Result<Arc<Self>, RegistryError> {
        let service_type = service_type.into();
        let aggregate = Arc::new(Self {
            service_type,
            providers,
            catalog,
            stores,
            state: Mutex::new(AggregateState {
                services: Vec::new(),
                syncers: Vec::new(),
                status: SyncStatus::new(),
                providers_listener: None,
            }),
            events: EventTarget::new(),
            disposed: AtomicBool::new(false),
        });
        for provider in aggregate.providers.for_service_type(&aggregate.service_type) {
            aggregate.add_service(provider)?;
        }

        let weak: Weak<Self> = Arc::downgrade(&aggregate);
        let listener = aggregate.providers.collection().listen(move |event| {
            if let Some(aggregate) = weak.upgrade() {
                aggregate.on_providers_event(event);
            }
        });
        lock(&aggregate.state).providers_listener = Some(listener);
        info!(
            service_type = %aggregate.service_type,
            providers = aggregate.services().len(),
            "Created aggregate service"
        );
        Ok(aggregate)
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn services(&self) -> Vec<Arc<ProviderService>> {
        lock(&self.state).services.clone()
    }

    pub fn active_services(&self) -> Vec<Arc<ProviderService>> {
        self.services()
            .into_iter()
            .filter(|service| service.is_active())
            .collect()
    }

    pub fn service(&self, id: &ModelId) -> Result<Arc<ProviderService>, RegistryError> {
        self.services()
            .into_iter()
            .find(|service| service.id().as_ref() == Some(id))
            .ok_or_else(|| RegistryError::UnknownProvider(id.clone()))
    }

    /// Adds a provider's service, syncing its listings into every merged
    /// class already requested. A provider that already has a service gets
    /// that service back.
    pub fn add_service(self: &Arc<Self>, provider: Provider) -> Result<Arc<ProviderService>, RegistryError> {
        if let Some(existing) = self
            .services()
            .into_iter()
            .find(|service| service.provider().model().ptr_eq(provider.model()))
        {
            return Ok(existing);
        }
        let service = ProviderService::new(provider, self.catalog.clone(), self.stores.clone())?;
        let syncers = {
            let mut state = lock(&self.state);
            state.services.push(service.clone());
            state.syncers.clone()
        };
        for (class, syncer) in syncers {
            let collection = service.collection(&class)?;
            syncer.sync_collection(&collection)?;
        }
        debug!(provider = %service.key(), "Added provider service");
        Ok(service)
    }

    /// The merged collection of `class` across every provider, created on
    /// first use.
    pub fn syncer(&self, class: &str) -> Result<Arc<CollectionSyncer>, RegistryError> {
        if let Some(syncer) = self.held_syncer(class) {
            return Ok(syncer);
        }
        let resource_class = self.catalog.class(class)?;
        if resource_class.service_type() != self.service_type {
            return Err(RegistryError::UnknownClass(format!(
                "{} for {}",
                class, self.service_type
            )));
        }
        if resource_class.kind() != ResourceKind::Collection {
            return Err(RegistryError::WrongKind {
                class: class.to_string(),
                expected: "collection",
            });
        }

        let syncer = CollectionSyncer::new(resource_class.schema().clone());
        for service in self.services() {
            syncer.sync_collection(&service.collection(class)?)?;
        }
        let mut state = lock(&self.state);
        if let Some((_, existing)) = state.syncers.iter().find(|(name, _)| name == class) {
            let existing = existing.clone();
            drop(state);
            syncer.dispose();
            return Ok(existing);
        }
        state.syncers.push((class.to_string(), syncer.clone()));
        Ok(syncer)
    }

    fn held_syncer(&self, class: &str) -> Option<Arc<CollectionSyncer>> {
        lock(&self.state)
            .syncers
            .iter()
            .find(|(name, _)| name == class)
            .map(|(_, syncer)| syncer.clone())
    }

    /// Resolves one part of this service type.
    pub fn get_dependency(self: &Arc<Self>, target: &ServiceTarget) -> Result<Dependency, RegistryError> {
        match target {
            ServiceTarget::Aggregate => Ok(Dependency::Aggregate(self.clone())),
            ServiceTarget::Provider(id) => Ok(Dependency::Service(self.service(id)?)),
            ServiceTarget::ProviderClass(id, class) => Ok(self.service(id)?.resource(class)?.into()),
            ServiceTarget::Class(class) => Ok(Dependency::Aggregated(self.syncer(class)?)),
            ServiceTarget::ClassModel(class, id) => self
                .syncer(class)?
                .aggregate()
                .get_model_by_id(id)
                .map(Dependency::Model)
                .ok_or_else(|| RegistryError::ModelNotFound {
                    class: class.clone(),
                    id: id.clone(),
                }),
        }
    }

    /// Updates every active provider service and reports the combined
    /// outcome.
    #[instrument(skip(self), fields(service_type = %self.service_type))]
    pub async fn update(&self) -> Settlement {
        if self.is_disposed() {
            return Settlement::no_response("service disposed");
        }
        let services = self.active_services();
        lock(&self.state).status.begin_request();
        let settlements = join_all(services.iter().map(|service| service.update())).await;

        for (service, settlement) in services.iter().zip(&settlements) {
            if settlement.failure().is_some_and(StoreFailure::indicates_unavailable) {
                self.remove_unavailable_provider(service);
            }
        }
        let settlement = Self::combine(settlements);
        debug!(services = services.len(), ?settlement, "Aggregate update finished");
        self.report(&settlement);
        settlement
    }

    /// Any success wins. No participants counts as loaded. Only when every
    /// service timed out is the aggregate timed out.
    fn combine(settlements: Vec<Settlement>) -> Settlement {
        if settlements.is_empty() || settlements.iter().any(Settlement::is_loaded) {
            return Settlement::Loaded;
        }
        if settlements.iter().all(|settlement| *settlement == Settlement::TimedOut) {
            return Settlement::TimedOut;
        }
        settlements
            .into_iter()
            .find(|settlement| settlement.failure().is_some())
            .unwrap_or(Settlement::TimedOut)
    }

    fn report(&self, settlement: &Settlement) {
        if self.is_disposed() {
            return;
        }
        lock(&self.state).status.apply(&settlement.to_outcome());
        let event = match settlement {
            Settlement::Loaded => ServiceEvent::Updated,
            Settlement::Failed(failure) => ServiceEvent::Error(failure.clone()),
            Settlement::TimedOut => ServiceEvent::Timeout,
        };
        self.events.dispatch(&event);
    }

    /// Drops a provider whose endpoints refused us, together with its
    /// service and its contribution to every merged class.
    pub fn remove_unavailable_provider(&self, service: &Arc<ProviderService>) {
        warn!(provider = %service.key(), "Provider is unavailable");
        self.detach_service(service.provider().model());
        if let Some(id) = service.id() {
            if let Err(error) = self.providers.remove_unavailable(&id) {
                warn!(provider = %id, %error, "Could not remove provider");
            }
        }
    }

    fn detach_service(&self, provider: &Model) {
        let (service, syncers) = {
            let mut state = lock(&self.state);
            let Some(position) = state
                .services
                .iter()
                .position(|service| service.provider().model().ptr_eq(provider))
            else {
                return;
            };
            (state.services.remove(position), state.syncers.clone())
        };
        for (class, syncer) in syncers {
            if let Some(Resource::Collection(collection)) = service.held(&class) {
                syncer.unsync_collection(&collection);
            }
        }
        service.dispose();
    }

    fn on_providers_event(self: &Arc<Self>, event: &CollectionEvent) {
        match event {
            CollectionEvent::Added { model, .. } => {
                let Ok(provider) = Provider::from_model(model.clone()) else {
                    return;
                };
                if provider.service_type().as_deref() != Some(self.service_type.as_str()) {
                    return;
                }
                if let Err(error) = self.add_service(provider) {
                    warn!(service_type = %self.service_type, %error, "Could not add provider");
                }
            }
            CollectionEvent::Removed { model } => self.detach_service(model),
            _ => {}
        }
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

    pub fn error(&self) -> Option<StoreFailure> {
        lock(&self.state).status.error().cloned()
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

    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let (services, syncers, listener) = {
            let mut state = lock(&self.state);
            (
                std::mem::take(&mut state.services),
                std::mem::take(&mut state.syncers),
                state.providers_listener.take(),
            )
        };
        if let Some(listener) = listener {
            self.providers.collection().unlisten(listener);
        }
        for (_, syncer) in syncers {
            syncer.dispose();
        }
        for service in services {
            service.dispose();
        }
        self.events.clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}
