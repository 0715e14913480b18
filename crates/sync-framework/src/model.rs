//! # Model
//!
//! A [`Model`] is a typed, keyed bag of properties, child models and child
//! collections declared once by a [`ModelSchema`], optionally bound to one
//! [`Store`].
//!
//! ## Change notification
//!
//! Every top-level call (`set`, `update`, `set_value`, a list or dictionary
//! mutation) dispatches at most one [`ModelEvent::Updated`] listing the keys
//! that changed, deduplicated and in declaration order. Property-level
//! [`PropertyEvent`](crate::property::PropertyEvent)s still fire for each
//! property, carrying an [`Origin`].
//!
//! Children announce their own changes to the parent, which re-dispatches
//! them as `Updated { changed: [key] }`. While the parent is itself pushing
//! values into a child it ignores those announcements, so a bulk set still
//! yields one event.
//!
//! ## Sync protocol
//!
//! On the bound store's `Synced` event the model keeps the new id (or the
//! old one if the payload has none), merges the declared keys of the
//! payload, clears `loading` and re-dispatches [`ModelEvent::Synced`] with
//! both ids so owning collections can re-key their index.
//!
//! ## Disposal
//!
//! [`Model::dispose`] unbinds the store, disposes owned children and drops
//! every listener. Afterwards all accessors and mutators return
//! [`SyncError::Disposed`].

use crate::collection::{Collection, CollectionEvent};
use crate::error::SyncError;
use crate::event::{lock, Disposable, EventTarget, ListenerKey, Notify, Origin};
use crate::grouping::{DictionaryProperty, ListProperty};
use crate::property::{fire_unless_silent, PendingEvent, Property};
use crate::schema::{FieldKind, FieldSpec, ModelSchema, ID_KEY};
use crate::status::SyncStatus;
use crate::store::{Operation, RequestOutcome, Store, StoreEvent, StoreFailure};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

/// A model identifier: numeric or textual, as the server sends it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelId {
    Number(i64),
    Text(String),
}

impl ModelId {
    /// Reads an id from JSON. Null, empty strings and non-integral numbers
    /// are not ids.
    pub fn from_value(value: &Value) -> Option<ModelId> {
        match value {
            Value::Number(number) => number.as_i64().map(ModelId::Number),
            Value::String(text) if !text.is_empty() => Some(ModelId::Text(text.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            ModelId::Number(number) => Value::from(*number),
            ModelId::Text(text) => Value::String(text.clone()),
        }
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelId::Number(number) => write!(f, "{}", number),
            ModelId::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for ModelId {
    fn from(text: &str) -> Self {
        ModelId::Text(text.to_string())
    }
}

impl From<String> for ModelId {
    fn from(text: String) -> Self {
        ModelId::Text(text)
    }
}

impl From<i64> for ModelId {
    fn from(number: i64) -> Self {
        ModelId::Number(number)
    }
}

/// Events dispatched by a model.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    Updated {
        changed: Vec<String>,
        origin: Origin,
    },
    Synced {
        data: Value,
        new_id: Option<ModelId>,
        old_id: Option<ModelId>,
    },
    Error(StoreFailure),
    Timeout,
    Success(Operation),
    /// The store confirmed a destroy.
    Deleted,
    Disposed,
}

/// How a values object is written into the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Write {
    /// Absent keys reset to defaults, child collections reconcile.
    Replace,
    /// Only provided keys are written, child collections reconcile.
    Assign,
    /// Only provided keys are written, child collections merge.
    Merge,
}

impl Write {
    fn resets_absent(self) -> bool {
        matches!(self, Write::Replace)
    }

    fn reconciles(self) -> bool {
        !matches!(self, Write::Merge)
    }
}

#[derive(Debug, Clone)]
enum Child {
    Model(Model),
    Collection(Collection),
}

impl Child {
    fn snapshot(&self) -> Result<Value, SyncError> {
        match self {
            Child::Model(model) => model.snapshot(),
            Child::Collection(collection) => collection.snapshot(),
        }
    }

    fn dispose(&self) {
        match self {
            Child::Model(model) => model.dispose(),
            Child::Collection(collection) => collection.dispose(),
        }
    }
}

enum Slot {
    Scalar(Property),
    List(ListProperty),
    Dictionary(DictionaryProperty),
    Child(Child),
}

impl Slot {
    fn build(field: &FieldSpec) -> Result<Slot, SyncError> {
        let name = field.name();
        let slot = match field.kind() {
            FieldKind::Scalar(kind) => {
                let property = Property::new(name, kind.clone()).nullable(field.is_nullable());
                match field.default_value() {
                    Some(default) => Slot::Scalar(property.with_default(default.clone())?),
                    None => Slot::Scalar(property),
                }
            }
            FieldKind::List(inner) => {
                let list = ListProperty::new(name, inner.clone());
                match field.default_value() {
                    Some(Value::Array(items)) => Slot::List(list.with_default(items.clone())?),
                    Some(other) => {
                        return Err(SyncError::type_mismatch(name, list.kind().describe(), other))
                    }
                    None => Slot::List(list),
                }
            }
            FieldKind::Dictionary(inner) => {
                let dictionary = DictionaryProperty::new(name, inner.clone());
                match field.default_value() {
                    Some(Value::Object(entries)) => {
                        Slot::Dictionary(dictionary.with_default(entries.clone())?)
                    }
                    Some(other) => {
                        return Err(SyncError::type_mismatch(
                            name,
                            dictionary.kind().describe(),
                            other,
                        ))
                    }
                    None => Slot::Dictionary(dictionary),
                }
            }
            FieldKind::Model(schema) => {
                let child = Model::new(schema.clone())?;
                if let Some(default) = field.default_value() {
                    child.apply_values(default, Write::Assign, Origin::Direct, Notify::Silent)?;
                }
                Slot::Child(Child::Model(child))
            }
            FieldKind::Collection(schema) => Slot::Child(Child::Collection(Collection::new(schema.clone()))),
        };
        Ok(slot)
    }
}

struct ModelState {
    id: Option<ModelId>,
    slots: Vec<Slot>,
    status: SyncStatus,
    store: Option<(Arc<dyn Store>, ListenerKey)>,
}

struct ModelInner {
    schema: Arc<ModelSchema>,
    state: Mutex<ModelState>,
    events: EventTarget<ModelEvent>,
    disposed: AtomicBool,
    /// Non-zero while this model is writing into its own children.
    propagating: AtomicUsize,
}

/// Cloneable handle to one model instance. Clones share state; use
/// [`Model::ptr_eq`] for identity.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

#[derive(Clone)]
pub(crate) struct WeakModel(Weak<ModelInner>);

impl WeakModel {
    pub(crate) fn upgrade(&self) -> Option<Model> {
        self.0.upgrade().map(|inner| Model { inner })
    }
}

struct PropagationGuard<'a>(&'a AtomicUsize);

impl<'a> PropagationGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PropagationGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Model {
    /// Creates a model with every field at its default.
    pub fn new(schema: Arc<ModelSchema>) -> Result<Model, SyncError> {
        let slots = schema
            .fields()
            .iter()
            .map(Slot::build)
            .collect::<Result<Vec<_>, _>>()?;
        let model = Model {
            inner: Arc::new(ModelInner {
                schema,
                state: Mutex::new(ModelState {
                    id: None,
                    slots,
                    status: SyncStatus::new(),
                    store: None,
                }),
                events: EventTarget::new(),
                disposed: AtomicBool::new(false),
                propagating: AtomicUsize::new(0),
            }),
        };
        model.watch_children();
        Ok(model)
    }

    /// Creates a model holding initial (unsynced) values. No events fire.
    pub fn with_values(schema: Arc<ModelSchema>, values: &Value) -> Result<Model, SyncError> {
        let model = Model::new(schema)?;
        model.apply_values(values, Write::Assign, Origin::Direct, Notify::Silent)?;
        Ok(model)
    }

    fn watch_children(&self) {
        let children: Vec<(String, Child)> = {
            let state = lock(&self.inner.state);
            self.inner
                .schema
                .fields()
                .iter()
                .zip(state.slots.iter())
                .filter_map(|(field, slot)| match slot {
                    Slot::Child(child) => Some((field.name().to_string(), child.clone())),
                    _ => None,
                })
                .collect()
        };
        for (key, child) in children {
            let parent = self.downgrade();
            match child {
                Child::Model(model) => {
                    model.listen(move |event| {
                        if let ModelEvent::Updated { origin: Origin::Direct, .. } = event {
                            if let Some(parent) = parent.upgrade() {
                                parent.child_changed(&key);
                            }
                        }
                    });
                }
                Child::Collection(collection) => {
                    collection.listen(move |event| {
                        if matches!(
                            event,
                            CollectionEvent::Changed | CollectionEvent::ModelUpdated { .. }
                        ) {
                            if let Some(parent) = parent.upgrade() {
                                parent.child_changed(&key);
                            }
                        }
                    });
                }
            }
        }
    }

    fn child_changed(&self, key: &str) {
        if self.is_disposed() || self.inner.propagating.load(Ordering::SeqCst) > 0 {
            return;
        }
        self.inner.events.dispatch(&ModelEvent::Updated {
            changed: vec![key.to_string()],
            origin: Origin::Direct,
        });
    }

    pub(crate) fn downgrade(&self) -> WeakModel {
        WeakModel(Arc::downgrade(&self.inner))
    }

    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.inner.schema
    }

    pub fn ptr_eq(&self, other: &Model) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Address of the shared state; stable for as long as any handle lives.
    pub fn as_ptr(&self) -> *const () {
        Arc::as_ptr(&self.inner) as *const ()
    }

    fn ensure_live(&self) -> Result<(), SyncError> {
        if self.is_disposed() {
            Err(SyncError::Disposed(format!("{} model", self.inner.schema.name())))
        } else {
            Ok(())
        }
    }

    fn field_index(&self, key: &str) -> Result<usize, SyncError> {
        self.inner
            .schema
            .fields()
            .iter()
            .position(|field| field.name() == key)
            .ok_or_else(|| {
                SyncError::UnknownProperty(format!("{}.{}", self.inner.schema.name(), key))
            })
    }

    /// Replaces the model's values. Keys absent from `values` reset to their
    /// defaults and child collections reconcile. Returns the changed keys.
    ///
    /// Every key and value is validated before anything is applied.
    pub fn set(&self, values: &Value, notify: Notify) -> Result<Vec<String>, SyncError> {
        self.apply_values(values, Write::Replace, Origin::Direct, notify)
    }

    /// Sets a single key. Returns whether it changed.
    pub fn set_value(&self, key: &str, value: Value, notify: Notify) -> Result<bool, SyncError> {
        if key != ID_KEY {
            self.field_index(key)?;
        }
        let mut values = Map::new();
        values.insert(key.to_string(), value);
        let changed = self.apply_values(&Value::Object(values), Write::Assign, Origin::Direct, notify)?;
        Ok(!changed.is_empty())
    }

    /// Merges only the provided keys; child collections add and update but
    /// never remove.
    pub fn update(&self, values: &Value, notify: Notify) -> Result<Vec<String>, SyncError> {
        self.apply_values(values, Write::Merge, Origin::Direct, notify)
    }

    pub(crate) fn apply_values(
        &self,
        values: &Value,
        write: Write,
        origin: Origin,
        notify: Notify,
    ) -> Result<Vec<String>, SyncError> {
        self.ensure_live()?;
        let schema = self.inner.schema.clone();
        schema.validate_values(values)?;
        let Some(object) = values.as_object() else {
            return Err(SyncError::InvalidInput(format!(
                "{} values must be an object",
                schema.name()
            )));
        };
        schema.validate_resets(object, write.resets_absent())?;
        let new_id = match object.get(ID_KEY) {
            Some(Value::Null) | None => None,
            Some(raw) => Some(ModelId::from_value(raw).ok_or_else(|| {
                SyncError::InvalidInput(format!("{} is not a valid id", raw))
            })?),
        };

        let mut pending: Vec<PendingEvent> = Vec::new();
        let mut changed: Vec<usize> = Vec::new();
        let mut children: Vec<(usize, Child, Option<Value>)> = Vec::new();
        let id_changed = {
            let mut state = lock(&self.inner.state);
            for (position, (field, slot)) in schema.fields().iter().zip(state.slots.iter_mut()).enumerate() {
                let provided = object.get(field.name());
                if provided.is_none() && !write.resets_absent() {
                    continue;
                }
                let event = match slot {
                    Slot::Scalar(property) => match provided {
                        Some(value) => property.apply(value.clone(), origin)?,
                        None => property.apply_default(origin)?,
                    },
                    Slot::List(list) => match provided {
                        Some(value) => {
                            let items = list.validate(value)?;
                            list.apply_set(items, origin)?
                        }
                        None => list.apply_default(origin)?,
                    },
                    Slot::Dictionary(dictionary) => match provided {
                        Some(value) => {
                            let entries = dictionary.validate(value)?;
                            dictionary.apply_set(entries, origin)?
                        }
                        None => dictionary.apply_default(origin)?,
                    },
                    Slot::Child(child) => {
                        children.push((position, child.clone(), provided.cloned()));
                        None
                    }
                };
                if let Some(event) = event {
                    pending.push(event);
                    changed.push(position);
                }
            }
            match new_id {
                Some(id) if state.id.as_ref() != Some(&id) => {
                    state.id = Some(id);
                    true
                }
                _ => false,
            }
        };

        if !children.is_empty() {
            let _guard = PropagationGuard::enter(&self.inner.propagating);
            for (position, child, value) in children {
                let child_changed = match child {
                    Child::Model(model) => match value {
                        Some(values @ Value::Object(_)) => !model
                            .apply_values(&values, write, Origin::ParentPropagated, notify)?
                            .is_empty(),
                        _ => !model
                            .apply_values(
                                &Value::Object(Map::new()),
                                Write::Replace,
                                Origin::ParentPropagated,
                                notify,
                            )?
                            .is_empty(),
                    },
                    Child::Collection(collection) => match value {
                        Some(Value::Array(records)) => {
                            collection.apply_records(records, write.reconciles(), notify)?
                        }
                        _ => collection.apply_records(Vec::new(), true, notify)?,
                    },
                };
                if child_changed {
                    changed.push(position);
                }
            }
        }

        if !notify.is_silent() {
            for event in pending {
                event.fire();
            }
        }

        changed.sort_unstable();
        changed.dedup();
        let fields = schema.fields();
        let mut names: Vec<String> = Vec::with_capacity(changed.len() + 1);
        if id_changed {
            names.push(ID_KEY.to_string());
        }
        names.extend(changed.into_iter().map(|position| fields[position].name().to_string()));

        if !names.is_empty() && !notify.is_silent() {
            self.inner.events.dispatch(&ModelEvent::Updated {
                changed: names.clone(),
                origin,
            });
        }
        Ok(names)
    }

    /// Returns one value. `"id"` yields the id or null.
    pub fn get(&self, key: &str) -> Result<Value, SyncError> {
        self.ensure_live()?;
        if key == ID_KEY {
            return Ok(self.id().map(|id| id.to_value()).unwrap_or(Value::Null));
        }
        let index = self.field_index(key)?;
        let child = {
            let state = lock(&self.inner.state);
            match state.slots.get(index) {
                Some(Slot::Scalar(property)) => return Ok(property.get().clone()),
                Some(Slot::List(list)) => return Ok(list.to_value()),
                Some(Slot::Dictionary(dictionary)) => return Ok(dictionary.to_value()),
                Some(Slot::Child(child)) => child.clone(),
                None => return Err(SyncError::UnknownProperty(key.to_string())),
            }
        };
        child.snapshot()
    }

    /// Every field's value, plus `id` once assigned.
    pub fn snapshot(&self) -> Result<Value, SyncError> {
        self.ensure_live()?;
        let mut object = Map::new();
        let mut children = Vec::new();
        {
            let state = lock(&self.inner.state);
            if let Some(id) = &state.id {
                object.insert(ID_KEY.to_string(), id.to_value());
            }
            for (field, slot) in self.inner.schema.fields().iter().zip(state.slots.iter()) {
                let name = field.name().to_string();
                match slot {
                    Slot::Scalar(property) => {
                        object.insert(name, property.get().clone());
                    }
                    Slot::List(list) => {
                        object.insert(name, list.to_value());
                    }
                    Slot::Dictionary(dictionary) => {
                        object.insert(name, dictionary.to_value());
                    }
                    Slot::Child(child) => children.push((name, child.clone())),
                }
            }
        }
        for (name, child) in children {
            object.insert(name, child.snapshot()?);
        }
        Ok(Value::Object(object))
    }

    /// Deserializes the snapshot into a typed record.
    pub fn to_record<T: DeserializeOwned>(&self) -> Result<T, SyncError> {
        let snapshot = self.snapshot()?;
        serde_json::from_value(snapshot).map_err(|e| SyncError::InvalidInput(e.to_string()))
    }

    fn child(&self, key: &str) -> Result<Child, SyncError> {
        self.ensure_live()?;
        let index = self.field_index(key)?;
        let state = lock(&self.inner.state);
        match state.slots.get(index) {
            Some(Slot::Child(child)) => Ok(child.clone()),
            _ => Err(SyncError::InvalidInput(format!("{} is not a child field", key))),
        }
    }

    pub fn child_model(&self, key: &str) -> Result<Model, SyncError> {
        match self.child(key)? {
            Child::Model(model) => Ok(model),
            Child::Collection(_) => Err(SyncError::InvalidInput(format!("{} is a collection", key))),
        }
    }

    pub fn child_collection(&self, key: &str) -> Result<Collection, SyncError> {
        match self.child(key)? {
            Child::Collection(collection) => Ok(collection),
            Child::Model(_) => Err(SyncError::InvalidInput(format!("{} is a model", key))),
        }
    }

    fn mutate_slot<F>(&self, key: &str, notify: Notify, mutate: F) -> Result<bool, SyncError>
    where
        F: FnOnce(&mut Slot) -> Result<Option<PendingEvent>, SyncError>,
    {
        self.ensure_live()?;
        let index = self.field_index(key)?;
        let pending = {
            let mut state = lock(&self.inner.state);
            let slot = state
                .slots
                .get_mut(index)
                .ok_or_else(|| SyncError::UnknownProperty(key.to_string()))?;
            mutate(slot)?
        };
        let changed = fire_unless_silent(pending, notify);
        if changed && !notify.is_silent() {
            self.inner.events.dispatch(&ModelEvent::Updated {
                changed: vec![key.to_string()],
                origin: Origin::Direct,
            });
        }
        Ok(changed)
    }

    pub fn list_push(&self, key: &str, value: Value, notify: Notify) -> Result<bool, SyncError> {
        self.mutate_slot(key, notify, |slot| match slot {
            Slot::List(list) => {
                let end = list.len();
                list.apply_insert(end, value)
            }
            _ => Err(not_a(key, "list")),
        })
    }

    pub fn list_remove(&self, key: &str, value: &Value, notify: Notify) -> Result<bool, SyncError> {
        self.mutate_slot(key, notify, |slot| match slot {
            Slot::List(list) => Ok(list.apply_remove(value)),
            _ => Err(not_a(key, "list")),
        })
    }

    pub fn dictionary_set_entry(
        &self,
        key: &str,
        entry: &str,
        value: Value,
        notify: Notify,
    ) -> Result<bool, SyncError> {
        self.mutate_slot(key, notify, |slot| match slot {
            Slot::Dictionary(dictionary) => dictionary.apply_set_entry(entry.to_string(), value),
            _ => Err(not_a(key, "dictionary")),
        })
    }

    pub fn dictionary_remove_entry(&self, key: &str, entry: &str, notify: Notify) -> Result<bool, SyncError> {
        self.mutate_slot(key, notify, |slot| match slot {
            Slot::Dictionary(dictionary) => Ok(dictionary.apply_remove_entry(entry)),
            _ => Err(not_a(key, "dictionary")),
        })
    }

    pub fn id(&self) -> Option<ModelId> {
        lock(&self.inner.state).id.clone()
    }

    /// Assigns the id explicitly. Returns whether it changed.
    pub fn set_id(&self, id: ModelId, notify: Notify) -> Result<bool, SyncError> {
        self.set_value(ID_KEY, id.to_value(), notify)
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

    /// Binds the store, replacing any previous binding.
    pub fn bind_store(&self, store: Arc<dyn Store>) -> Result<(), SyncError> {
        self.ensure_live()?;
        let weak = self.downgrade();
        let key = store.events().listen(move |event: &StoreEvent| {
            if let Some(model) = weak.upgrade() {
                model.handle_store_event(event);
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

    fn begin_request(&self) -> Result<Arc<dyn Store>, SyncError> {
        self.ensure_live()?;
        let mut state = lock(&self.inner.state);
        let store = state
            .store
            .as_ref()
            .map(|(store, _)| store.clone())
            .ok_or_else(|| SyncError::NoStore(format!("{} model", self.inner.schema.name())))?;
        state.status.begin_request();
        Ok(store)
    }

    fn finish_aborted(&self, outcome: &RequestOutcome) {
        if matches!(outcome, RequestOutcome::Aborted) {
            lock(&self.inner.state).status.apply(outcome);
        }
    }

    pub async fn fetch(&self, args: Option<Value>) -> Result<RequestOutcome, SyncError> {
        let store = self.begin_request()?;
        debug!(model = self.inner.schema.name(), id = ?self.id(), "Fetching model");
        let outcome = store.fetch(args).await;
        self.finish_aborted(&outcome);
        Ok(outcome)
    }

    /// Saves the full snapshot, or a partial payload with the id merged in.
    pub async fn save(&self, data: Option<Value>) -> Result<RequestOutcome, SyncError> {
        let payload = match data {
            None => self.snapshot()?,
            Some(Value::Object(mut partial)) => {
                if !partial.contains_key(ID_KEY) {
                    if let Some(id) = self.id() {
                        partial.insert(ID_KEY.to_string(), id.to_value());
                    }
                }
                Value::Object(partial)
            }
            Some(other) => {
                return Err(SyncError::InvalidInput(format!(
                    "save payload must be an object, got {}",
                    other
                )))
            }
        };
        let store = self.begin_request()?;
        debug!(model = self.inner.schema.name(), id = ?self.id(), "Saving model");
        let outcome = store.save(payload).await;
        self.finish_aborted(&outcome);
        Ok(outcome)
    }

    pub async fn destroy(&self) -> Result<RequestOutcome, SyncError> {
        let store = self.begin_request()?;
        let id = self.id();
        debug!(model = self.inner.schema.name(), ?id, "Destroying model");
        let outcome = store.destroy(id).await;
        self.finish_aborted(&outcome);
        Ok(outcome)
    }

    fn handle_store_event(&self, event: &StoreEvent) {
        if self.is_disposed() {
            return;
        }
        match event {
            StoreEvent::Synced {
                data, provisional, ..
            } => self.on_synced(data, *provisional),
            StoreEvent::Error(failure) => {
                lock(&self.inner.state)
                    .status
                    .apply(&RequestOutcome::Error(failure.clone()));
                self.inner.events.dispatch(&ModelEvent::Error(failure.clone()));
            }
            StoreEvent::Timeout { .. } => {
                lock(&self.inner.state).status.apply(&RequestOutcome::Timeout);
                self.inner.events.dispatch(&ModelEvent::Timeout);
            }
            StoreEvent::Success { operation, .. } => {
                lock(&self.inner.state).status.apply(&RequestOutcome::Success);
                self.inner.events.dispatch(&ModelEvent::Success(*operation));
                if *operation == Operation::Destroy {
                    self.inner.events.dispatch(&ModelEvent::Deleted);
                }
            }
        }
    }

    /// A provisional payload only updates values; the id, status and
    /// `Synced` wait for the fresh answer.
    fn on_synced(&self, data: &Value, provisional: bool) {
        let old_id = self.id();
        let incoming = data.get(ID_KEY).and_then(ModelId::from_value);

        if data.is_object() {
            let mut known = self.inner.schema.retain_known(data);
            if let Some(object) = known.as_object_mut() {
                object.remove(ID_KEY);
            }
            if let Err(error) = self.apply_values(&known, Write::Merge, Origin::Direct, Notify::Emit) {
                warn!(model = self.inner.schema.name(), %error, "Discarding invalid sync payload");
            }
        }
        if provisional {
            return;
        }

        let new_id = incoming.or_else(|| old_id.clone());
        {
            let mut state = lock(&self.inner.state);
            state.id = new_id.clone();
            state.status.apply(&RequestOutcome::Synced);
        }
        debug!(model = self.inner.schema.name(), ?new_id, ?old_id, "Model synced");
        self.inner.events.dispatch(&ModelEvent::Synced {
            data: data.clone(),
            new_id,
            old_id,
        });
    }

    /// Tears the model down. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let (store, children) = {
            let mut state = lock(&self.inner.state);
            let children: Vec<Child> = state
                .slots
                .iter()
                .filter_map(|slot| match slot {
                    Slot::Child(child) => Some(child.clone()),
                    _ => None,
                })
                .collect();
            (state.store.take(), children)
        };
        if let Some((store, key)) = store {
            store.events().unlisten(key);
        }
        for child in children {
            child.dispose();
        }
        self.inner.events.dispatch(&ModelEvent::Disposed);
        self.inner.events.clear();
    }

    pub fn events(&self) -> EventTarget<ModelEvent> {
        self.inner.events.clone()
    }

    pub fn listen<F>(&self, listener: F) -> ListenerKey
    where
        F: Fn(&ModelEvent) + Send + Sync + 'static,
    {
        self.inner.events.listen(listener)
    }

    pub fn unlisten(&self, key: ListenerKey) -> bool {
        self.inner.events.unlisten(key)
    }
}

fn not_a(key: &str, kind: &str) -> SyncError {
    SyncError::InvalidInput(format!("{} is not a {}", key, kind))
}

impl Disposable for Model {
    fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl Model {
    pub fn is_disposed(&self) -> bool {
        Disposable::is_disposed(self)
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("schema", &self.inner.schema.name())
            .field("id", &self.id())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockStore;
    use crate::property::PropertyType;
    use crate::schema::FieldSpec;
    use serde_json::json;

    fn counter_schema() -> Arc<ModelSchema> {
        ModelSchema::builder("counter")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::number("count").with_default(json!(0)))
            .field(FieldSpec::list("tags").of(PropertyType::String))
            .build()
    }

    fn updates(model: &Model) -> Arc<Mutex<Vec<Vec<String>>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        model.listen(move |event| {
            if let ModelEvent::Updated { changed, .. } = event {
                sink.lock().unwrap().push(changed.clone());
            }
        });
        seen
    }

    #[test]
    fn fresh_model_snapshot_has_defaults_and_no_id() {
        let model = Model::new(counter_schema()).unwrap();
        assert_eq!(
            model.snapshot().unwrap(),
            json!({"name": null, "count": 0, "tags": []})
        );
        assert_eq!(model.id(), None);
    }

    #[test]
    fn set_then_update_emit_one_event_each() {
        let model = Model::new(counter_schema()).unwrap();
        let seen = updates(&model);

        model.set(&json!({"name": "x"}), Notify::Emit).unwrap();
        model.update(&json!({"count": 5}), Notify::Emit).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![vec!["name".to_string()], vec!["count".to_string()]]
        );
        assert_eq!(model.get("name").unwrap(), json!("x"));
        assert_eq!(model.get("count").unwrap(), json!(5));
    }

    #[test]
    fn set_resets_absent_keys() {
        let model = Model::with_values(counter_schema(), &json!({"name": "a", "count": 3})).unwrap();
        let changed = model.set(&json!({"name": "a"}), Notify::Emit).unwrap();
        assert_eq!(changed, vec!["count".to_string()]);
        assert_eq!(model.get("count").unwrap(), json!(0));
    }

    #[test]
    fn multi_key_set_lists_keys_in_declaration_order() {
        let model = Model::new(counter_schema()).unwrap();
        let seen = updates(&model);
        model
            .set(&json!({"tags": ["a"], "name": "n", "count": 1}), Notify::Emit)
            .unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![vec!["name".to_string(), "count".to_string(), "tags".to_string()]]
        );
    }

    #[test]
    fn invalid_entry_rejects_whole_set() {
        let model = Model::with_values(counter_schema(), &json!({"name": "keep"})).unwrap();
        let err = model
            .set(&json!({"name": "changed", "count": "many"}), Notify::Emit)
            .unwrap_err();
        assert!(matches!(err, SyncError::TypeMismatch { .. }));
        assert_eq!(model.get("name").unwrap(), json!("keep"));

        assert_eq!(
            model.set(&json!({"colour": "red"}), Notify::Emit),
            Err(SyncError::UnknownProperty("counter.colour".into()))
        );
    }

    #[test]
    fn silent_set_fires_nothing() {
        let model = Model::new(counter_schema()).unwrap();
        let seen = updates(&model);
        let changed = model.set(&json!({"name": "quiet"}), Notify::Silent).unwrap();
        assert_eq!(changed, vec!["name".to_string()]);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn list_mutation_emits_once() {
        let model = Model::new(counter_schema()).unwrap();
        let seen = updates(&model);
        assert!(model.list_push("tags", json!("web"), Notify::Emit).unwrap());
        assert!(model.list_remove("tags", &json!("web"), Notify::Emit).unwrap());
        assert!(!model.list_remove("tags", &json!("web"), Notify::Emit).unwrap());
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert!(model.list_push("tags", json!(1), Notify::Emit).is_err());
    }

    #[test]
    fn child_model_changes_bubble_to_parent() {
        let address = ModelSchema::builder("address")
            .field(FieldSpec::string("city"))
            .build();
        let person = ModelSchema::builder("person")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::model("address", address))
            .build();
        let model = Model::new(person).unwrap();
        let seen = updates(&model);

        model
            .set(&json!({"name": "ada", "address": {"city": "London"}}), Notify::Emit)
            .unwrap();
        model
            .child_model("address")
            .unwrap()
            .set_value("city", json!("Paris"), Notify::Emit)
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                vec!["name".to_string(), "address".to_string()],
                vec!["address".to_string()],
            ]
        );
        assert_eq!(model.get("address").unwrap(), json!({"city": "Paris"}));
    }

    #[tokio::test]
    async fn sync_assigns_id_and_keeps_old_when_absent() {
        let store = MockStore::new();
        store.expect_fetch().return_sync(json!({"id": 7, "name": "seven", "extra": true}));
        store.expect_fetch().return_sync(json!({"count": 2}));

        let model = Model::new(counter_schema()).unwrap();
        model.bind_store(Arc::new(store.clone())).unwrap();
        let synced = Arc::new(Mutex::new(Vec::new()));
        let sink = synced.clone();
        model.listen(move |event| {
            if let ModelEvent::Synced { new_id, old_id, .. } = event {
                sink.lock().unwrap().push((new_id.clone(), old_id.clone()));
            }
        });

        assert_eq!(model.fetch(None).await.unwrap(), RequestOutcome::Synced);
        assert_eq!(model.id(), Some(ModelId::Number(7)));
        assert!(model.is_loaded());
        assert!(!model.is_loading());

        model.fetch(None).await.unwrap();
        assert_eq!(model.id(), Some(ModelId::Number(7)));
        assert_eq!(model.get("count").unwrap(), json!(2));
        assert_eq!(
            *synced.lock().unwrap(),
            vec![
                (Some(ModelId::Number(7)), None),
                (Some(ModelId::Number(7)), Some(ModelId::Number(7))),
            ]
        );
        store.verify();
    }

    #[tokio::test]
    async fn partial_save_carries_id() {
        let store = MockStore::new();
        store.expect_save().return_success();
        let model = Model::with_values(counter_schema(), &json!({"id": "srv-1", "name": "a"})).unwrap();
        model.bind_store(Arc::new(store.clone())).unwrap();

        model.save(Some(json!({"name": "b"}))).await.unwrap();
        assert_eq!(store.saved(), vec![json!({"id": "srv-1", "name": "b"})]);
    }

    #[tokio::test]
    async fn errors_and_timeouts_update_status() {
        let store = MockStore::new();
        store.expect_fetch().return_error(500, "boom");
        store.expect_fetch().return_timeout();
        let model = Model::new(counter_schema()).unwrap();
        model.bind_store(Arc::new(store.clone())).unwrap();

        model.fetch(None).await.unwrap();
        assert!(model.has_error());
        assert_eq!(model.error().map(|e| e.status), Some(500));

        model.fetch(None).await.unwrap();
        assert!(model.has_timeout());
        assert!(!model.has_error());
    }

    #[tokio::test]
    async fn fetch_without_store_fails() {
        let model = Model::new(counter_schema()).unwrap();
        assert!(matches!(model.fetch(None).await, Err(SyncError::NoStore(_))));
    }

    #[tokio::test]
    async fn disposed_model_rejects_everything() {
        let model = Model::new(counter_schema()).unwrap();
        let disposed = Arc::new(AtomicBool::new(false));
        let flag = disposed.clone();
        model.listen(move |event| {
            if matches!(event, ModelEvent::Disposed) {
                flag.store(true, Ordering::SeqCst);
            }
        });

        model.dispose();
        assert!(disposed.load(Ordering::SeqCst));
        assert!(matches!(model.get("name"), Err(SyncError::Disposed(_))));
        assert!(matches!(
            model.set(&json!({"name": "x"}), Notify::Emit),
            Err(SyncError::Disposed(_))
        ));
        assert!(matches!(model.fetch(None).await, Err(SyncError::Disposed(_))));
        assert!(matches!(model.save(None).await, Err(SyncError::Disposed(_))));
    }

    #[test]
    fn typed_record_view() {
        #[derive(serde::Deserialize)]
        struct Counter {
            name: Option<String>,
            count: i64,
        }
        let model = Model::with_values(counter_schema(), &json!({"name": "c", "count": 4})).unwrap();
        let record: Counter = model.to_record().unwrap();
        assert_eq!(record.name.as_deref(), Some("c"));
        assert_eq!(record.count, 4);
    }
}
