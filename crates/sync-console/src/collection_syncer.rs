//! # Collection Syncer
//!
//! Merges the same resource class from several providers into one aggregate
//! collection. Each source moves from "not yet responded" to synced, errored
//! or timed out; the aggregate reports once every source has responded:
//!
//! - `Synced` when at least one source synced,
//! - `Timeout` when every source timed out,
//! - `Error` with the first failure otherwise.
//!
//! Models are shared with their sources, never copied. A model removed from
//! its source is disposed there and drops out of the aggregate with it.

use crate::dependency::Settlement;
use futures::future::join_all;
use std::sync::{Arc, Mutex, Weak};
use sync_framework::event::lock;
use sync_framework::{
    Collection, CollectionEvent, Disposal, ListenerKey, ModelRef, ModelSchema, ModelSource, Notify,
    RequestOutcome, SyncError,
};
use tracing::{debug, warn};

struct Source {
    collection: Collection,
    listener: ListenerKey,
}

pub struct CollectionSyncer {
    aggregate: Collection,
    sources: Mutex<Vec<Source>>,
}

impl CollectionSyncer {
    pub fn new(schema: Arc<ModelSchema>) -> Arc<Self> {
        Arc::new(Self {
            aggregate: Collection::new(schema),
            sources: Mutex::new(Vec::new()),
        })
    }

    pub fn aggregate(&self) -> &Collection {
        &self.aggregate
    }

    pub fn sources(&self) -> Vec<Collection> {
        lock(&self.sources)
            .iter()
            .map(|source| source.collection.clone())
            .collect()
    }

    pub fn source_count(&self) -> usize {
        lock(&self.sources).len()
    }

    /// Starts tracking `source`: its current models join the aggregate and
    /// later additions follow. Returns `false` if it was already tracked.
    pub fn sync_collection(self: &Arc<Self>, source: &Collection) -> Result<bool, SyncError> {
        if source.schema().name() != self.aggregate.schema().name() {
            return Err(SyncError::InvalidInput(format!(
                "{} collection cannot feed a {} aggregate",
                source.schema().name(),
                self.aggregate.schema().name()
            )));
        }
        if lock(&self.sources)
            .iter()
            .any(|held| held.collection.ptr_eq(source))
        {
            return Ok(false);
        }
        for model in source.models() {
            self.aggregate.add_model(ModelSource::Instance(model), Notify::Emit)?;
        }
        let syncer: Weak<Self> = Arc::downgrade(self);
        let listener = source.listen(move |event| {
            if let Some(syncer) = syncer.upgrade() {
                syncer.on_source_event(event);
            }
        });
        lock(&self.sources).push(Source {
            collection: source.clone(),
            listener,
        });
        debug!(
            class = self.aggregate.schema().name(),
            models = source.len(),
            sources = self.source_count(),
            "Syncing collection"
        );
        Ok(true)
    }

    /// Stops tracking `source` and drops its models from the aggregate
    /// without disposing them. Returns whether it was tracked.
    pub fn unsync_collection(&self, source: &Collection) -> bool {
        let removed = {
            let mut sources = lock(&self.sources);
            let position = sources.iter().position(|held| held.collection.ptr_eq(source));
            position.map(|position| sources.remove(position))
        };
        let Some(removed) = removed else {
            return false;
        };
        removed.collection.unlisten(removed.listener);
        for model in removed.collection.models() {
            if self.aggregate.contains(&model) {
                if let Err(error) =
                    self.aggregate
                        .remove_model(ModelRef::Instance(model), Notify::Emit, Disposal::Bypass)
                {
                    warn!(class = self.aggregate.schema().name(), %error, "Could not unsync model");
                }
            }
        }
        if self.aggregate.is_loading() {
            self.report_if_settled();
        }
        true
    }

    fn on_source_event(&self, event: &CollectionEvent) {
        match event {
            CollectionEvent::Added { model, .. } => {
                if let Err(error) = self
                    .aggregate
                    .add_model(ModelSource::Instance(model.clone()), Notify::Emit)
                {
                    warn!(class = self.aggregate.schema().name(), %error, "Could not aggregate model");
                }
            }
            CollectionEvent::Synced { .. } | CollectionEvent::Error(_) | CollectionEvent::Timeout => {
                self.report_if_settled();
            }
            _ => {}
        }
    }

    /// The aggregate verdict, or `None` while some source has not responded.
    pub fn verdict(&self) -> Option<Settlement> {
        let sources = self.sources();
        let responded = |source: &Collection| {
            !source.is_loading() && (source.has_synced() || source.has_timeout() || source.has_error())
        };
        if !sources.iter().all(responded) {
            return None;
        }
        let all_failed = sources
            .iter()
            .all(|source| source.has_error() || source.has_timeout());
        if sources.is_empty() || !all_failed {
            return Some(Settlement::Loaded);
        }
        if let Some(failure) = sources.iter().find_map(Collection::error) {
            return Some(Settlement::Failed(failure));
        }
        Some(Settlement::TimedOut)
    }

    fn report_if_settled(&self) {
        if let Some(settlement) = self.verdict() {
            debug!(class = self.aggregate.schema().name(), ?settlement, "Aggregate settled");
            self.aggregate.report(&settlement.to_outcome());
        }
    }

    /// Refetches every source and waits for the aggregate verdict.
    pub async fn refresh(&self) -> Settlement {
        if self.aggregate.is_disposed() {
            return Settlement::no_response("aggregate disposed");
        }
        let sources = self.sources();
        self.aggregate.begin_request();
        // Every source must read as loading before the first one answers,
        // or a stale status could settle the aggregate early.
        for source in &sources {
            source.begin_request();
        }
        let outcomes = join_all(sources.iter().map(|source| source.fetch(None))).await;
        for outcome in outcomes {
            if let Err(error) = outcome {
                warn!(class = self.aggregate.schema().name(), %error, "Source refused refresh");
            }
        }
        match self.verdict() {
            Some(settlement) => {
                if self.aggregate.is_loading() {
                    self.aggregate.report(&settlement.to_outcome());
                }
                settlement
            }
            None => {
                self.aggregate.report(&RequestOutcome::Aborted);
                Settlement::no_response("sources did not respond")
            }
        }
    }

    /// Untracks every source, then disposes the aggregate. Source models
    /// stay alive.
    pub fn dispose(&self) {
        let sources = std::mem::take(&mut *lock(&self.sources));
        for source in sources {
            source.collection.unlisten(source.listener);
        }
        self.aggregate.clear(Disposal::Bypass);
        self.aggregate.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sync_framework::mock::{MockStore, MockTransport};
    use sync_framework::transport::Response;
    use sync_framework::{FieldSpec, Method, ProxyStore};

    fn schema() -> Arc<ModelSchema> {
        ModelSchema::builder("server").field(FieldSpec::string("name")).build()
    }

    fn source(store: &MockStore) -> Collection {
        let collection = Collection::new(schema());
        collection.bind_store(Arc::new(store.clone())).unwrap();
        collection
    }

    #[test]
    fn existing_and_later_models_join_the_aggregate() {
        let syncer = CollectionSyncer::new(schema());
        let ord = Collection::new(schema());
        ord.set(vec![json!({"id": 1, "name": "a"})], Notify::Emit).unwrap();

        assert!(syncer.sync_collection(&ord).unwrap());
        assert!(!syncer.sync_collection(&ord).unwrap());
        assert_eq!(syncer.aggregate().len(), 1);

        let added = ord.add_model(json!({"id": 2, "name": "b"}), Notify::Emit).unwrap();
        assert_eq!(syncer.aggregate().len(), 2);
        assert!(syncer.aggregate().contains(&added));
    }

    #[test]
    fn removal_at_the_source_propagates() {
        let syncer = CollectionSyncer::new(schema());
        let ord = Collection::new(schema());
        ord.set(vec![json!({"id": 1}), json!({"id": 2})], Notify::Emit).unwrap();
        syncer.sync_collection(&ord).unwrap();

        ord.set(vec![json!({"id": 2})], Notify::Emit).unwrap();
        assert_eq!(syncer.aggregate().len(), 1);
    }

    #[test]
    fn unsync_keeps_models_alive() {
        let syncer = CollectionSyncer::new(schema());
        let ord = Collection::new(schema());
        let model = ord.add_model(json!({"id": 1}), Notify::Emit).unwrap();
        syncer.sync_collection(&ord).unwrap();

        assert!(syncer.unsync_collection(&ord));
        assert!(syncer.aggregate().is_empty());
        assert!(!model.is_disposed());
        assert!(!syncer.unsync_collection(&ord));
    }

    #[test]
    fn mismatched_schema_is_rejected() {
        let syncer = CollectionSyncer::new(schema());
        let other = Collection::new(ModelSchema::builder("flavor").build());
        assert!(matches!(syncer.sync_collection(&other), Err(SyncError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn all_timeouts_report_a_timeout() {
        let ord = MockStore::named("ord");
        let dfw = MockStore::named("dfw");
        ord.expect_fetch().return_timeout();
        dfw.expect_fetch().return_timeout();
        let syncer = CollectionSyncer::new(schema());
        syncer.sync_collection(&source(&ord)).unwrap();
        syncer.sync_collection(&source(&dfw)).unwrap();

        assert_eq!(syncer.refresh().await, Settlement::TimedOut);
        assert!(syncer.aggregate().has_timeout());
    }

    /// A cached proxy copy shows up early, but only the fresh answer
    /// settles the aggregate.
    #[tokio::test]
    async fn cached_proxy_copy_settles_once() {
        let url = "https://console/proxy/compute/ORD/servers";
        let transport = MockTransport::new();
        transport
            .expect(Method::Get, format!("{url}?useProxyCache=true"))
            .respond_with(
                Response::new(200, json!([{"id": 1, "name": "a"}]).to_string()).with_header("ETag", "\"v1\""),
            );
        transport
            .expect(Method::Get, url)
            .respond(200, json!([{"id": 1, "name": "a"}, {"id": 2, "name": "b"}]));
        let ord = Collection::new(schema());
        ord.bind_store(Arc::new(ProxyStore::new(Arc::new(transport.clone()), url)))
            .unwrap();

        let syncer = CollectionSyncer::new(schema());
        syncer.sync_collection(&ord).unwrap();
        let synced = Arc::new(Mutex::new(0));
        let sink = synced.clone();
        syncer.aggregate().listen(move |event| {
            if matches!(event, CollectionEvent::Synced { .. }) {
                *sink.lock().unwrap() += 1;
            }
        });

        assert_eq!(syncer.refresh().await, Settlement::Loaded);
        assert_eq!(*synced.lock().unwrap(), 1);
        assert_eq!(syncer.aggregate().len(), 2);
        transport.verify();
    }

    #[test]
    fn dispose_leaves_sources_intact() {
        let syncer = CollectionSyncer::new(schema());
        let ord = Collection::new(schema());
        let model = ord.add_model(json!({"id": 1}), Notify::Emit).unwrap();
        syncer.sync_collection(&ord).unwrap();

        syncer.dispose();
        assert!(syncer.aggregate().is_disposed());
        assert!(!model.is_disposed());
        assert_eq!(ord.len(), 1);
    }
}
