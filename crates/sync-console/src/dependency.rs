//! # Dependencies
//!
//! Anything a view can ask the registry for: a provider's model or
//! collection, a provider service, an aggregate service, an aggregated
//! collection or the providers themselves. Every dependency can be refreshed
//! and settled, and each has a stable identity while it is held.

use crate::aggregate_service::AggregateProviderService;
use crate::catalog::Catalog;
use crate::collection_syncer::CollectionSyncer;
use crate::provider::{Provider, Providers};
use crate::provider_service::{ProviderService, ServiceEvent};
use crate::strategy::UpdateStrategy;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::{Arc, Mutex};
use sync_framework::event::lock;
use sync_framework::{
    Collection, CollectionEvent, EventTarget, Model, ModelEvent, ModelId, Operation, RequestOutcome,
    StoreFailure, SyncError,
};
use tokio::sync::oneshot;
use tracing::warn;

/// The terminal state of one refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Loaded,
    Failed(StoreFailure),
    TimedOut,
}

impl Settlement {
    /// Aborted requests count as failures with status 0.
    pub fn from_outcome(outcome: &RequestOutcome) -> Self {
        match outcome {
            RequestOutcome::Synced | RequestOutcome::Success => Settlement::Loaded,
            RequestOutcome::Error(failure) => Settlement::Failed(failure.clone()),
            RequestOutcome::Timeout => Settlement::TimedOut,
            RequestOutcome::Aborted => Settlement::no_response("request aborted"),
        }
    }

    pub(crate) fn no_response(reason: impl Into<String>) -> Self {
        Settlement::Failed(StoreFailure::new(Operation::Fetch, 0, reason))
    }

    fn from_fetch(result: Result<RequestOutcome, SyncError>) -> Self {
        match result {
            Ok(outcome) => Settlement::from_outcome(&outcome),
            Err(error) => {
                warn!(%error, "Refresh rejected");
                Settlement::no_response(error.to_string())
            }
        }
    }

    pub fn to_outcome(&self) -> RequestOutcome {
        match self {
            Settlement::Loaded => RequestOutcome::Synced,
            Settlement::Failed(failure) => RequestOutcome::Error(failure.clone()),
            Settlement::TimedOut => RequestOutcome::Timeout,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Settlement::Loaded)
    }

    pub fn failure(&self) -> Option<&StoreFailure> {
        match self {
            Settlement::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Folds the settlements of one provider's resources: the first failure
    /// wins, then any timeout.
    pub(crate) fn all_of(settlements: Vec<Settlement>) -> Self {
        if let Some(failed) = settlements.iter().find(|settlement| settlement.failure().is_some()) {
            return failed.clone();
        }
        if settlements.contains(&Settlement::TimedOut) {
            return Settlement::TimedOut;
        }
        Settlement::Loaded
    }

    fn of_model_event(event: &ModelEvent) -> Option<Self> {
        match event {
            ModelEvent::Synced { .. } | ModelEvent::Success(_) => Some(Settlement::Loaded),
            ModelEvent::Error(failure) => Some(Settlement::Failed(failure.clone())),
            ModelEvent::Timeout => Some(Settlement::TimedOut),
            _ => None,
        }
    }

    fn of_collection_event(event: &CollectionEvent) -> Option<Self> {
        match event {
            CollectionEvent::Synced { .. } | CollectionEvent::Success(_) => Some(Settlement::Loaded),
            CollectionEvent::Error(failure) => Some(Settlement::Failed(failure.clone())),
            CollectionEvent::Timeout => Some(Settlement::TimedOut),
            _ => None,
        }
    }

    fn of_service_event(event: &ServiceEvent) -> Option<Self> {
        Some(match event {
            ServiceEvent::Updated => Settlement::Loaded,
            ServiceEvent::Error(failure) => Settlement::Failed(failure.clone()),
            ServiceEvent::Timeout => Settlement::TimedOut,
        })
    }
}

/// Identity of a held dependency: the address of its shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependencyId(usize);

impl DependencyId {
    fn of<T: ?Sized>(ptr: *const T) -> Self {
        DependencyId(ptr as *const () as usize)
    }
}

/// A provider-level resource: one model or one listing.
#[derive(Debug, Clone)]
pub enum Resource {
    Model(Model),
    Collection(Collection),
}

impl Resource {
    pub fn schema_name(&self) -> &str {
        match self {
            Resource::Model(model) => model.schema().name(),
            Resource::Collection(collection) => collection.schema().name(),
        }
    }

    pub async fn refresh(&self) -> Settlement {
        match self {
            Resource::Model(model) => Settlement::from_fetch(model.fetch(None).await),
            Resource::Collection(collection) => Settlement::from_fetch(collection.fetch(None).await),
        }
    }

    pub fn dispose(&self) {
        match self {
            Resource::Model(model) => model.dispose(),
            Resource::Collection(collection) => collection.dispose(),
        }
    }
}

impl From<Resource> for Dependency {
    fn from(resource: Resource) -> Self {
        match resource {
            Resource::Model(model) => Dependency::Model(model),
            Resource::Collection(collection) => Dependency::Collection(collection),
        }
    }
}

#[derive(Clone)]
pub enum Dependency {
    Model(Model),
    Collection(Collection),
    /// One resource class merged across every provider of a service type.
    Aggregated(Arc<CollectionSyncer>),
    Service(Arc<ProviderService>),
    Aggregate(Arc<AggregateProviderService>),
    Providers(Providers),
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl Dependency {
    pub fn describe(&self) -> String {
        match self {
            Dependency::Model(model) => format!("model {}", model.schema().name()),
            Dependency::Collection(collection) => format!("collection {}", collection.schema().name()),
            Dependency::Aggregated(syncer) => format!("aggregated {}", syncer.aggregate().schema().name()),
            Dependency::Service(service) => format!("service {}", service.key()),
            Dependency::Aggregate(aggregate) => format!("aggregate {}", aggregate.service_type()),
            Dependency::Providers(_) => "providers".to_string(),
        }
    }

    pub fn identity(&self) -> DependencyId {
        match self {
            Dependency::Model(model) => DependencyId::of(model.as_ptr()),
            Dependency::Collection(collection) => DependencyId::of(collection.as_ptr()),
            Dependency::Aggregated(syncer) => DependencyId::of(Arc::as_ptr(syncer)),
            Dependency::Service(service) => DependencyId::of(Arc::as_ptr(service)),
            Dependency::Aggregate(aggregate) => DependencyId::of(Arc::as_ptr(aggregate)),
            Dependency::Providers(providers) => DependencyId::of(providers.collection().as_ptr()),
        }
    }

    pub fn is_loading(&self) -> bool {
        match self {
            Dependency::Model(model) => model.is_loading(),
            Dependency::Collection(collection) => collection.is_loading(),
            Dependency::Aggregated(syncer) => syncer.aggregate().is_loading(),
            Dependency::Service(service) => service.is_loading(),
            Dependency::Aggregate(aggregate) => aggregate.is_loading(),
            Dependency::Providers(providers) => providers.collection().is_loading(),
        }
    }

    /// The refresh policy of the dependency's resource class. Services take
    /// the most frequent policy among their service type's classes.
    pub fn strategy(&self, catalog: &Catalog) -> UpdateStrategy {
        let of_class = |name: &str| {
            catalog
                .class(name)
                .map(|class| class.strategy())
                .unwrap_or_default()
        };
        let of_service_type = |service_type: &str| {
            catalog
                .for_service_type(service_type)
                .iter()
                .map(|class| class.strategy())
                .filter(UpdateStrategy::should_poll)
                .min_by_key(|strategy| strategy.delay_after(0))
                .unwrap_or_default()
        };
        match self {
            Dependency::Model(model) => of_class(model.schema().name()),
            Dependency::Collection(collection) => of_class(collection.schema().name()),
            Dependency::Aggregated(syncer) => of_class(syncer.aggregate().schema().name()),
            Dependency::Service(service) => of_service_type(&service.key().service_type),
            Dependency::Aggregate(aggregate) => of_service_type(aggregate.service_type()),
            Dependency::Providers(_) => UpdateStrategy::Manual,
        }
    }

    /// Issues a new request and waits for its terminal state. Local data
    /// with no store behind it counts as loaded.
    pub async fn refresh(&self) -> Settlement {
        match self {
            Dependency::Model(model) if model.store().is_none() => Settlement::Loaded,
            Dependency::Model(model) => Settlement::from_fetch(model.fetch(None).await),
            Dependency::Collection(collection) if collection.store().is_none() => Settlement::Loaded,
            Dependency::Collection(collection) => Settlement::from_fetch(collection.fetch(None).await),
            Dependency::Aggregated(syncer) => syncer.refresh().await,
            Dependency::Service(service) => service.update().await,
            Dependency::Aggregate(aggregate) => aggregate.update().await,
            Dependency::Providers(providers) => match providers.collection().store() {
                Some(_) => Settlement::from_fetch(providers.collection().fetch(None).await),
                None => Settlement::Loaded,
            },
        }
    }

    /// Waits for the request already in flight, or refreshes when idle.
    pub async fn settle(&self) -> Settlement {
        match self.in_flight() {
            Some(pending) => pending.await,
            None => self.refresh().await,
        }
    }

    fn in_flight(&self) -> Option<BoxFuture<'static, Settlement>> {
        match self {
            Dependency::Model(model) => {
                next_settlement(model.events(), || model.is_loading(), Settlement::of_model_event)
            }
            Dependency::Collection(collection) => next_settlement(
                collection.events(),
                || collection.is_loading(),
                Settlement::of_collection_event,
            ),
            Dependency::Aggregated(syncer) => next_settlement(
                syncer.aggregate().events(),
                || syncer.aggregate().is_loading(),
                Settlement::of_collection_event,
            ),
            Dependency::Service(service) => {
                next_settlement(service.events(), || service.is_loading(), Settlement::of_service_event)
            }
            Dependency::Aggregate(aggregate) => next_settlement(
                aggregate.events(),
                || aggregate.is_loading(),
                Settlement::of_service_event,
            ),
            Dependency::Providers(providers) => next_settlement(
                providers.collection().events(),
                || providers.collection().is_loading(),
                Settlement::of_collection_event,
            ),
        }
    }
}

/// Subscribes to `events`, then returns a future for the next terminal
/// event if `is_loading` still holds. Subscribing first means a request
/// finishing in between cannot be missed.
fn next_settlement<E, L, C>(
    events: EventTarget<E>,
    is_loading: L,
    classify: C,
) -> Option<BoxFuture<'static, Settlement>>
where
    E: 'static,
    L: FnOnce() -> bool,
    C: Fn(&E) -> Option<Settlement> + Send + Sync + 'static,
{
    let (sender, receiver) = oneshot::channel();
    let sender = Arc::new(Mutex::new(Some(sender)));
    let key = events.listen(move |event| {
        if let Some(settlement) = classify(event) {
            if let Some(sender) = lock(&sender).take() {
                let _ = sender.send(settlement);
            }
        }
    });
    if !is_loading() {
        events.unlisten(key);
        return None;
    }
    Some(Box::pin(async move {
        let settlement = receiver
            .await
            .unwrap_or_else(|_| Settlement::no_response("disposed while loading"));
        events.unlisten(key);
        settlement
    }))
}

/// Which part of a service type a request addresses.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceTarget {
    /// The aggregate service itself.
    Aggregate,
    /// One provider's service.
    Provider(ModelId),
    /// One provider's resource of a class.
    ProviderClass(ModelId, String),
    /// A class merged across providers.
    Class(String),
    /// One model of a merged class, by id.
    ClassModel(String, ModelId),
}

/// What a caller asks the registry for.
#[derive(Debug, Clone)]
pub enum DependencyRequest {
    /// The providers collection, or one provider record.
    Providers { id: Option<ModelId> },
    /// Redirects to the provider's service type and id.
    Provider {
        provider: Provider,
        class: Option<String>,
    },
    Service {
        service_type: String,
        target: ServiceTarget,
    },
}

impl DependencyRequest {
    pub fn providers() -> Self {
        DependencyRequest::Providers { id: None }
    }

    pub fn provider_record(id: impl Into<ModelId>) -> Self {
        DependencyRequest::Providers { id: Some(id.into()) }
    }

    pub fn service(service_type: impl Into<String>) -> Self {
        Self::targeting(service_type, ServiceTarget::Aggregate)
    }

    pub fn aggregate_class(service_type: impl Into<String>, class: impl Into<String>) -> Self {
        Self::targeting(service_type, ServiceTarget::Class(class.into()))
    }

    pub fn aggregate_model(
        service_type: impl Into<String>,
        class: impl Into<String>,
        id: impl Into<ModelId>,
    ) -> Self {
        Self::targeting(service_type, ServiceTarget::ClassModel(class.into(), id.into()))
    }

    pub fn provider_service(service_type: impl Into<String>, provider: impl Into<ModelId>) -> Self {
        Self::targeting(service_type, ServiceTarget::Provider(provider.into()))
    }

    pub fn provider_class(
        service_type: impl Into<String>,
        provider: impl Into<ModelId>,
        class: impl Into<String>,
    ) -> Self {
        Self::targeting(
            service_type,
            ServiceTarget::ProviderClass(provider.into(), class.into()),
        )
    }

    pub fn of_provider(provider: &Provider, class: Option<&str>) -> Self {
        DependencyRequest::Provider {
            provider: provider.clone(),
            class: class.map(str::to_string),
        }
    }

    fn targeting(service_type: impl Into<String>, target: ServiceTarget) -> Self {
        DependencyRequest::Service {
            service_type: service_type.into(),
            target,
        }
    }
}

impl From<&Provider> for DependencyRequest {
    fn from(provider: &Provider) -> Self {
        DependencyRequest::of_provider(provider, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use sync_framework::mock::MockStore;
    use sync_framework::{FieldSpec, ModelSchema};

    fn collection_with(store: &MockStore) -> Collection {
        let schema = ModelSchema::builder("server").field(FieldSpec::string("name")).build();
        let collection = Collection::new(schema);
        collection.bind_store(Arc::new(store.clone())).unwrap();
        collection
    }

    #[test]
    fn folding_prefers_failures_then_timeouts() {
        let failure = StoreFailure::new(Operation::Fetch, 500, "");
        assert_eq!(
            Settlement::all_of(vec![
                Settlement::TimedOut,
                Settlement::Failed(failure.clone()),
                Settlement::Loaded
            ]),
            Settlement::Failed(failure)
        );
        assert_eq!(
            Settlement::all_of(vec![Settlement::Loaded, Settlement::TimedOut]),
            Settlement::TimedOut
        );
        assert_eq!(Settlement::all_of(Vec::new()), Settlement::Loaded);
    }

    #[test]
    fn identity_follows_shared_state() {
        let store = MockStore::new();
        let collection = collection_with(&store);
        let first = Dependency::Collection(collection.clone());
        let second = Dependency::Collection(collection);
        assert_eq!(first.identity(), second.identity());

        let other = Dependency::Collection(collection_with(&store));
        assert_ne!(first.identity(), other.identity());
    }

    #[tokio::test]
    async fn settle_joins_the_request_in_flight() {
        let store = MockStore::new();
        store
            .expect_fetch()
            .delayed(Duration::from_millis(50))
            .return_sync(json!([{"id": 1, "name": "web"}]));
        let collection = collection_with(&store);
        let dependency = Dependency::Collection(collection.clone());

        let background = tokio::spawn({
            let collection = collection.clone();
            async move { collection.fetch(None).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(dependency.is_loading());

        assert_eq!(dependency.settle().await, Settlement::Loaded);
        background.await.unwrap().unwrap();
        assert_eq!(store.calls(Operation::Fetch), 1);
        assert_eq!(collection.len(), 1);
    }

    #[tokio::test]
    async fn settle_refreshes_when_idle() {
        let store = MockStore::new();
        store.expect_fetch().return_timeout();
        let dependency = Dependency::Collection(collection_with(&store));

        assert_eq!(dependency.settle().await, Settlement::TimedOut);
        store.verify();
    }
}
