//! # Collection
//!
//! An ordered sequence of [`Model`]s of one schema, indexed by id and bound
//! to one [`Store`].
//!
//! ## Identity rules
//!
//! - At most one model per id. Adding a value whose id is already present
//!   updates that model in place.
//! - [`Collection::set`] is the authoritative replace: models whose id is
//!   absent from the new listing (or that have no id at all) are removed and
//!   disposed, the rest are updated in place, new ids are appended, and the
//!   listing's order is applied.
//! - [`Collection::update`] only adds and updates. It never removes.
//!
//! ## Events
//!
//! Structural changes dispatch `Added`/`Removed` per model and one trailing
//! `Changed` per top-level call, and only when something actually changed.
//! Child model events are re-dispatched at collection scope (`ModelUpdated`,
//! `ModelDeleted`), so observers only need to listen here.

use crate::error::SyncError;
use crate::event::{lock, Disposable, Disposal, EventTarget, ListenerKey, Notify, Origin};
use crate::model::{Model, ModelEvent, ModelId, Write};
use crate::schema::{ModelSchema, ID_KEY};
use crate::status::SyncStatus;
use crate::store::{Operation, RequestOutcome, Store, StoreEvent, StoreFailure};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// What to add: raw values or an existing model.
#[derive(Debug, Clone)]
pub enum ModelSource {
    Values(Value),
    Instance(Model),
}

impl From<Value> for ModelSource {
    fn from(values: Value) -> Self {
        ModelSource::Values(values)
    }
}

impl From<Model> for ModelSource {
    fn from(model: Model) -> Self {
        ModelSource::Instance(model)
    }
}

/// What to remove: a model handle or an id.
#[derive(Debug, Clone)]
pub enum ModelRef {
    Instance(Model),
    Id(ModelId),
}

impl From<Model> for ModelRef {
    fn from(model: Model) -> Self {
        ModelRef::Instance(model)
    }
}

impl From<&Model> for ModelRef {
    fn from(model: &Model) -> Self {
        ModelRef::Instance(model.clone())
    }
}

impl From<ModelId> for ModelRef {
    fn from(id: ModelId) -> Self {
        ModelRef::Id(id)
    }
}

pub type Comparator = Arc<dyn Fn(&Model, &Model) -> Ordering + Send + Sync>;

#[derive(Clone)]
pub enum SortKey {
    /// Orders by one property's value (null first, then booleans, numbers,
    /// strings).
    Property(String),
    Comparator(Comparator),
}

impl SortKey {
    pub fn property(name: impl Into<String>) -> Self {
        SortKey::Property(name.into())
    }

    pub fn comparator<F>(compare: F) -> Self
    where
        F: Fn(&Model, &Model) -> Ordering + Send + Sync + 'static,
    {
        SortKey::Comparator(Arc::new(compare))
    }
}

impl std::fmt::Debug for SortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortKey::Property(name) => f.debug_tuple("Property").field(name).finish(),
            SortKey::Comparator(_) => f.write_str("Comparator(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Builds the store for a model created by the collection.
pub type ModelStoreFactory = Arc<dyn Fn(&Model) -> Option<Arc<dyn Store>> + Send + Sync>;

#[derive(Debug, Clone)]
pub enum CollectionEvent {
    Changed,
    Sorted,
    Added { model: Model, index: usize },
    Removed { model: Model },
    ModelUpdated { model: Model, changed: Vec<String> },
    ModelDeleted { model: Model },
    Synced { data: Value },
    Error(StoreFailure),
    Timeout,
    Success(Operation),
}

struct Entry {
    model: Model,
    listener: ListenerKey,
}

struct CollectionState {
    entries: Vec<Entry>,
    index: HashMap<ModelId, Model>,
    status: SyncStatus,
    store: Option<(Arc<dyn Store>, ListenerKey)>,
    model_store: Option<ModelStoreFactory>,
}

struct CollectionInner {
    schema: Arc<ModelSchema>,
    state: Mutex<CollectionState>,
    events: EventTarget<CollectionEvent>,
    disposed: AtomicBool,
}

enum Placement {
    Added(Model),
    Updated(Model, bool),
}

/// Cloneable handle to one collection.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

impl Collection {
    pub fn new(schema: Arc<ModelSchema>) -> Self {
        Self {
            inner: Arc::new(CollectionInner {
                schema,
                state: Mutex::new(CollectionState {
                    entries: Vec::new(),
                    index: HashMap::new(),
                    status: SyncStatus::new(),
                    store: None,
                    model_store: None,
                }),
                events: EventTarget::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Gives every model the collection creates its own store.
    pub fn with_model_store<F>(self, factory: F) -> Self
    where
        F: Fn(&Model) -> Option<Arc<dyn Store>> + Send + Sync + 'static,
    {
        lock(&self.inner.state).model_store = Some(Arc::new(factory));
        self
    }

    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.inner.schema
    }

    pub fn ptr_eq(&self, other: &Collection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Address of the shared state; stable for as long as any handle lives.
    pub fn as_ptr(&self) -> *const () {
        Arc::as_ptr(&self.inner) as *const ()
    }

    fn ensure_live(&self) -> Result<(), SyncError> {
        if self.is_disposed() {
            Err(SyncError::Disposed(format!("{} collection", self.inner.schema.name())))
        } else {
            Ok(())
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn models(&self) -> Vec<Model> {
        lock(&self.inner.state)
            .entries
            .iter()
            .map(|entry| entry.model.clone())
            .collect()
    }

    pub fn get(&self, index: usize) -> Option<Model> {
        lock(&self.inner.state)
            .entries
            .get(index)
            .map(|entry| entry.model.clone())
    }

    pub fn get_model_by_id(&self, id: &ModelId) -> Option<Model> {
        lock(&self.inner.state).index.get(id).cloned()
    }

    pub fn contains(&self, model: &Model) -> bool {
        self.index_of(model).is_some()
    }

    pub fn index_of(&self, model: &Model) -> Option<usize> {
        lock(&self.inner.state)
            .entries
            .iter()
            .position(|entry| entry.model.ptr_eq(model))
    }

    pub fn filter<F>(&self, predicate: F) -> Vec<Model>
    where
        F: Fn(&Model) -> bool,
    {
        self.models().into_iter().filter(|model| predicate(model)).collect()
    }

    pub fn find<F>(&self, predicate: F) -> Option<Model>
    where
        F: Fn(&Model) -> bool,
    {
        self.models().into_iter().find(|model| predicate(model))
    }

    pub fn map<T, F>(&self, f: F) -> Vec<T>
    where
        F: FnMut(&Model) -> T,
    {
        self.models().iter().map(f).collect()
    }

    /// Snapshots of every model, in order.
    pub fn snapshot(&self) -> Result<Value, SyncError> {
        self.ensure_live()?;
        self.models()
            .iter()
            .map(Model::snapshot)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }

    pub fn add_model(&self, source: impl Into<ModelSource>, notify: Notify) -> Result<Model, SyncError> {
        let end = self.len();
        self.add_model_at(source, end, notify)
    }

    /// Inserts at `index`, or updates in place when the id is already held.
    pub fn add_model_at(
        &self,
        source: impl Into<ModelSource>,
        index: usize,
        notify: Notify,
    ) -> Result<Model, SyncError> {
        self.ensure_live()?;
        let len = self.len();
        if index > len {
            return Err(SyncError::IndexOutOfBounds { index, len });
        }
        match self.place(source.into(), Some(index), Write::Merge, notify)? {
            Placement::Added(model) => {
                if !notify.is_silent() {
                    self.inner.events.dispatch(&CollectionEvent::Changed);
                }
                Ok(model)
            }
            Placement::Updated(model, _) => Ok(model),
        }
    }

    fn place(
        &self,
        source: ModelSource,
        index: Option<usize>,
        write: Write,
        notify: Notify,
    ) -> Result<Placement, SyncError> {
        match source {
            ModelSource::Values(values) => {
                self.inner.schema.validate_record(&values)?;
                let id = values.get(ID_KEY).and_then(ModelId::from_value);
                if let Some(existing) = id.as_ref().and_then(|id| self.get_model_by_id(id)) {
                    let changed = existing.apply_values(&values, write, Origin::Direct, notify)?;
                    return Ok(Placement::Updated(existing, !changed.is_empty()));
                }
                let model = Model::with_values(self.inner.schema.clone(), &values)?;
                self.attach_model_store(&model)?;
                self.insert(model.clone(), index, notify);
                Ok(Placement::Added(model))
            }
            ModelSource::Instance(model) => {
                if model.schema().name() != self.inner.schema.name() {
                    return Err(SyncError::InvalidInput(format!(
                        "{} model cannot join a {} collection",
                        model.schema().name(),
                        self.inner.schema.name()
                    )));
                }
                if model.is_disposed() {
                    return Err(SyncError::Disposed(format!("{} model", model.schema().name())));
                }
                if self.contains(&model) {
                    return Ok(Placement::Updated(model, false));
                }
                if let Some(existing) = model.id().and_then(|id| self.get_model_by_id(&id)) {
                    let values = model.snapshot()?;
                    let changed = existing.apply_values(&values, write, Origin::Direct, notify)?;
                    return Ok(Placement::Updated(existing, !changed.is_empty()));
                }
                self.insert(model.clone(), index, notify);
                Ok(Placement::Added(model))
            }
        }
    }

    fn attach_model_store(&self, model: &Model) -> Result<(), SyncError> {
        let factory = lock(&self.inner.state).model_store.clone();
        if let Some(store) = factory.and_then(|factory| factory(model)) {
            model.bind_store(store)?;
        }
        Ok(())
    }

    fn insert(&self, model: Model, index: Option<usize>, notify: Notify) {
        let collection = Arc::downgrade(&self.inner);
        let child = model.downgrade();
        let listener = model.listen(move |event| {
            if let (Some(inner), Some(model)) = (collection.upgrade(), child.upgrade()) {
                Collection { inner }.on_model_event(&model, event);
            }
        });
        let id = model.id();
        let position = {
            let mut state = lock(&self.inner.state);
            let position = index
                .unwrap_or(state.entries.len())
                .min(state.entries.len());
            if let Some(id) = id {
                state.index.insert(id, model.clone());
            }
            state.entries.insert(
                position,
                Entry {
                    model: model.clone(),
                    listener,
                },
            );
            position
        };
        if !notify.is_silent() {
            self.inner.events.dispatch(&CollectionEvent::Added {
                model,
                index: position,
            });
        }
    }

    /// Removes a held model. Errors if the collection does not contain it.
    pub fn remove_model(
        &self,
        target: impl Into<ModelRef>,
        notify: Notify,
        disposal: Disposal,
    ) -> Result<Model, SyncError> {
        self.ensure_live()?;
        let model = match target.into() {
            ModelRef::Instance(model) => model,
            ModelRef::Id(id) => self
                .get_model_by_id(&id)
                .ok_or_else(|| SyncError::ModelNotFound(id.to_string()))?,
        };
        self.detach(&model, notify, disposal)?;
        if !notify.is_silent() {
            self.inner.events.dispatch(&CollectionEvent::Changed);
        }
        Ok(model)
    }

    pub fn remove_model_at(
        &self,
        index: usize,
        notify: Notify,
        disposal: Disposal,
    ) -> Result<Model, SyncError> {
        let model = self.get(index).ok_or(SyncError::IndexOutOfBounds {
            index,
            len: self.len(),
        })?;
        self.remove_model(model, notify, disposal)
    }

    fn detach(&self, model: &Model, notify: Notify, disposal: Disposal) -> Result<(), SyncError> {
        let entry = {
            let mut state = lock(&self.inner.state);
            let position = state
                .entries
                .iter()
                .position(|entry| entry.model.ptr_eq(model))
                .ok_or_else(|| SyncError::ModelNotFound(format!("{:?}", model)))?;
            state.index.retain(|_, held| !held.ptr_eq(model));
            state.entries.remove(position)
        };
        model.unlisten(entry.listener);
        if !notify.is_silent() {
            self.inner.events.dispatch(&CollectionEvent::Removed {
                model: model.clone(),
            });
        }
        if disposal == Disposal::Dispose && !model.is_disposed() {
            model.dispose();
        }
        Ok(())
    }

    /// Reconciles against an authoritative listing. Returns whether
    /// anything changed.
    pub fn set(&self, values: Vec<Value>, notify: Notify) -> Result<bool, SyncError> {
        self.apply_records(values, true, notify)
    }

    /// Adds or updates each record by id. Never removes.
    pub fn update(&self, values: Vec<Value>, notify: Notify) -> Result<bool, SyncError> {
        self.apply_records(values, false, notify)
    }

    pub(crate) fn apply_records(
        &self,
        records: Vec<Value>,
        reconcile: bool,
        notify: Notify,
    ) -> Result<bool, SyncError> {
        self.ensure_live()?;
        for record in &records {
            self.inner.schema.validate_record(record)?;
        }
        let count = records.len();
        let mut changed = false;
        let mut removed = 0usize;

        if reconcile {
            let keep: HashSet<ModelId> = records
                .iter()
                .filter_map(|record| record.get(ID_KEY).and_then(ModelId::from_value))
                .collect();
            let stale: Vec<Model> = self
                .models()
                .into_iter()
                .filter(|model| model.id().map_or(true, |id| !keep.contains(&id)))
                .collect();
            for model in stale {
                self.detach(&model, notify, Disposal::Dispose)?;
                removed += 1;
                changed = true;
            }
        }

        let write = if reconcile { Write::Assign } else { Write::Merge };
        let mut order = Vec::with_capacity(count);
        for record in records {
            match self.place(ModelSource::Values(record), None, write, notify)? {
                Placement::Added(model) => {
                    changed = true;
                    order.push(model);
                }
                Placement::Updated(model, updated) => {
                    changed |= updated;
                    order.push(model);
                }
            }
        }
        if reconcile && self.reorder(&order) {
            changed = true;
        }

        debug!(
            collection = self.inner.schema.name(),
            records = count,
            removed,
            reconcile,
            changed,
            "Applied records"
        );
        if changed && !notify.is_silent() {
            self.inner.events.dispatch(&CollectionEvent::Changed);
        }
        Ok(changed)
    }

    /// Moves the given models to the front in the given order. Returns
    /// whether any position changed.
    fn reorder(&self, order: &[Model]) -> bool {
        let mut state = lock(&self.inner.state);
        let before: Vec<Model> = state.entries.iter().map(|entry| entry.model.clone()).collect();
        let mut remaining = std::mem::take(&mut state.entries);
        let mut arranged = Vec::with_capacity(remaining.len());
        for model in order {
            if let Some(position) = remaining.iter().position(|entry| entry.model.ptr_eq(model)) {
                arranged.push(remaining.remove(position));
            }
        }
        arranged.extend(remaining);
        let moved = arranged
            .iter()
            .zip(before.iter())
            .any(|(entry, model)| !entry.model.ptr_eq(model));
        state.entries = arranged;
        moved
    }

    /// Stable-sorts in place. Returns `false`, firing nothing, when already
    /// sorted; otherwise fires `Changed` then `Sorted`.
    pub fn sort(&self, key: SortKey, order: SortOrder) -> bool {
        if self.is_disposed() {
            return false;
        }
        let current = self.models();
        let directed = |ordering: Ordering| match order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        };
        let sorted: Vec<Model> = match &key {
            SortKey::Property(name) => {
                let mut keyed: Vec<(Value, Model)> = current
                    .iter()
                    .map(|model| (model.get(name).unwrap_or(Value::Null), model.clone()))
                    .collect();
                keyed.sort_by(|(a, _), (b, _)| directed(compare_values(a, b)));
                keyed.into_iter().map(|(_, model)| model).collect()
            }
            SortKey::Comparator(compare) => {
                let mut models = current.clone();
                models.sort_by(|a, b| directed(compare(a, b)));
                models
            }
        };
        if sorted.iter().zip(current.iter()).all(|(a, b)| a.ptr_eq(b)) {
            return false;
        }
        self.reorder(&sorted);
        debug!(collection = self.inner.schema.name(), ?key, ?order, "Sorted");
        self.inner.events.dispatch(&CollectionEvent::Changed);
        self.inner.events.dispatch(&CollectionEvent::Sorted);
        true
    }

    /// Removes every model with a single trailing `Changed`.
    pub fn clear(&self, disposal: Disposal) {
        if self.is_disposed() {
            return;
        }
        for model in self.models() {
            if let Err(error) = self.detach(&model, Notify::Emit, disposal) {
                warn!(collection = self.inner.schema.name(), %error, "Model vanished during clear");
            }
        }
        self.inner.events.dispatch(&CollectionEvent::Changed);
    }

    fn reindex(&self, model: &Model) {
        let id = model.id();
        let mut state = lock(&self.inner.state);
        if !state.entries.iter().any(|entry| entry.model.ptr_eq(model)) {
            return;
        }
        state.index.retain(|_, held| !held.ptr_eq(model));
        if let Some(id) = id {
            if let Some(previous) = state.index.insert(id.clone(), model.clone()) {
                if !previous.ptr_eq(model) {
                    warn!(collection = self.inner.schema.name(), %id, "Duplicate id after sync");
                }
            }
        }
    }

    fn on_model_event(&self, model: &Model, event: &ModelEvent) {
        if self.is_disposed() {
            return;
        }
        match event {
            ModelEvent::Updated { changed, .. } => {
                if changed.iter().any(|key| key == ID_KEY) {
                    self.reindex(model);
                }
                self.inner.events.dispatch(&CollectionEvent::ModelUpdated {
                    model: model.clone(),
                    changed: changed.clone(),
                });
            }
            ModelEvent::Synced { new_id, old_id, .. } => {
                if new_id != old_id {
                    self.reindex(model);
                }
            }
            ModelEvent::Deleted => {
                self.inner.events.dispatch(&CollectionEvent::ModelDeleted {
                    model: model.clone(),
                });
                if self.contains(model) {
                    if let Err(error) = self.remove_model(model, Notify::Emit, Disposal::Dispose) {
                        warn!(collection = self.inner.schema.name(), %error, "Could not drop deleted model");
                    }
                }
            }
            ModelEvent::Disposed => {
                if self.contains(model) && self.detach(model, Notify::Emit, Disposal::Bypass).is_ok() {
                    self.inner.events.dispatch(&CollectionEvent::Changed);
                }
            }
            ModelEvent::Error(_) | ModelEvent::Timeout | ModelEvent::Success(_) => {}
        }
    }

    /// Binds the store, replacing any previous binding.
    pub fn bind_store(&self, store: Arc<dyn Store>) -> Result<(), SyncError> {
        self.ensure_live()?;
        let weak = Arc::downgrade(&self.inner);
        let key = store.events().listen(move |event: &StoreEvent| {
            if let Some(inner) = weak.upgrade() {
                Collection { inner }.handle_store_event(event);
            }
        });
        let previous = lock(&self.inner.state).store.replace((store, key));
        if let Some((previous, key)) = previous {
            previous.events().unlisten(key);
        }
        Ok(())
    }

    pub fn store(&self) -> Option<Arc<dyn Store>> {
        lock(&self.inner.state)
            .store
            .as_ref()
            .map(|(store, _)| store.clone())
    }

    fn handle_store_event(&self, event: &StoreEvent) {
        if self.is_disposed() {
            return;
        }
        match event {
            StoreEvent::Synced {
                data,
                with_removal,
                provisional,
                ..
            } => {
                let schema = self.inner.schema.clone();
                let raw: Vec<Value> = match data {
                    Value::Array(items) => items.iter().map(|item| schema.retain_known(item)).collect(),
                    Value::Object(_) => vec![schema.retain_known(data)],
                    _ => Vec::new(),
                };
                let records: Vec<Value> = raw
                    .into_iter()
                    .filter(|record| match schema.validate_record(record) {
                        Ok(()) => true,
                        Err(error) => {
                            warn!(collection = schema.name(), %error, "Skipping invalid record");
                            false
                        }
                    })
                    .collect();
                if let Err(error) = self.apply_records(records, *with_removal, Notify::Emit) {
                    warn!(collection = schema.name(), %error, "Failed to apply sync payload");
                }
                if *provisional {
                    return;
                }
                lock(&self.inner.state).status.apply(&RequestOutcome::Synced);
                self.inner.events.dispatch(&CollectionEvent::Synced { data: data.clone() });
            }
            StoreEvent::Error(failure) => self.report(&RequestOutcome::Error(failure.clone())),
            StoreEvent::Timeout { .. } => self.report(&RequestOutcome::Timeout),
            StoreEvent::Success { operation, .. } => {
                lock(&self.inner.state).status.apply(&RequestOutcome::Success);
                self.inner.events.dispatch(&CollectionEvent::Success(*operation));
            }
        }
    }

    /// Records a request outcome produced elsewhere (an aggregate of other
    /// collections) and dispatches the matching event. `Synced` carries a
    /// null payload.
    pub fn report(&self, outcome: &RequestOutcome) {
        if self.is_disposed() {
            return;
        }
        lock(&self.inner.state).status.apply(outcome);
        let event = match outcome {
            RequestOutcome::Synced => CollectionEvent::Synced { data: Value::Null },
            RequestOutcome::Error(failure) => CollectionEvent::Error(failure.clone()),
            RequestOutcome::Timeout => CollectionEvent::Timeout,
            RequestOutcome::Success => CollectionEvent::Success(Operation::Fetch),
            RequestOutcome::Aborted => return,
        };
        self.inner.events.dispatch(&event);
    }

    /// Marks a request as in flight without going through the store.
    pub fn begin_request(&self) {
        lock(&self.inner.state).status.begin_request();
    }

    pub async fn fetch(&self, args: Option<Value>) -> Result<RequestOutcome, SyncError> {
        self.ensure_live()?;
        let store = {
            let mut state = lock(&self.inner.state);
            let store = state
                .store
                .as_ref()
                .map(|(store, _)| store.clone())
                .ok_or_else(|| {
                    SyncError::NoStore(format!("{} collection", self.inner.schema.name()))
                })?;
            state.status.begin_request();
            store
        };
        debug!(collection = self.inner.schema.name(), store = %store.describe(), "Fetching collection");
        let outcome = store.fetch(args).await;
        if matches!(outcome, RequestOutcome::Aborted) {
            lock(&self.inner.state).status.apply(&outcome);
        }
        Ok(outcome)
    }

    pub fn status(&self) -> SyncStatus {
        lock(&self.inner.state).status.clone()
    }

    pub fn is_loaded(&self) -> bool {
        lock(&self.inner.state).status.is_loaded()
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.inner.state).status.is_loading()
    }

    pub fn has_synced(&self) -> bool {
        lock(&self.inner.state).status.has_synced()
    }

    pub fn has_timeout(&self) -> bool {
        lock(&self.inner.state).status.has_timeout()
    }

    pub fn has_error(&self) -> bool {
        lock(&self.inner.state).status.has_error()
    }

    pub fn error(&self) -> Option<StoreFailure> {
        lock(&self.inner.state).status.error().cloned()
    }

    /// Tears down the collection and every model it holds. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        let (store, entries) = {
            let mut state = lock(&self.inner.state);
            state.index.clear();
            (state.store.take(), std::mem::take(&mut state.entries))
        };
        if let Some((store, key)) = store {
            store.events().unlisten(key);
        }
        for entry in entries {
            entry.model.unlisten(entry.listener);
            entry.model.dispose();
        }
        self.inner.events.clear();
    }

    pub fn is_disposed(&self) -> bool {
        Disposable::is_disposed(self)
    }

    pub fn events(&self) -> EventTarget<CollectionEvent> {
        self.inner.events.clone()
    }

    pub fn listen<F>(&self, listener: F) -> ListenerKey
    where
        F: Fn(&CollectionEvent) + Send + Sync + 'static,
    {
        self.inner.events.listen(listener)
    }

    pub fn unlisten(&self, key: ListenerKey) -> bool {
        self.inner.events.unlisten(key)
    }
}

impl Disposable for Collection {
    fn is_disposed(&self) -> bool {
        self.inner.disposed.load(AtomicOrdering::SeqCst)
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("schema", &self.inner.schema.name())
            .field("len", &self.len())
            .finish()
    }
}

fn value_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values used by property sorts.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => value_rank(a).cmp(&value_rank(b)),
    }
}
