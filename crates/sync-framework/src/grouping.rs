//! # Grouping Properties
//!
//! Ordered ([`ListProperty`]) and keyed ([`DictionaryProperty`]) observable
//! containers. They reuse the [`PropertyEvent`] contract: each logical
//! operation (a bulk replace, one push, one removal, one `extend`) emits
//! exactly one event carrying the whole container value.
//!
//! Entries may be constrained by an inner [`PropertyType`]. A violating entry
//! is rejected at the call that introduced it and the container is left
//! untouched.

use crate::error::SyncError;
use crate::event::{EventTarget, Notify, Origin};
use crate::property::{fire_unless_silent, PendingEvent, PropertyEvent, PropertyType};
use serde_json::{Map, Value};

fn check_entry(owner: &str, inner: &Option<PropertyType>, value: &Value) -> Result<(), SyncError> {
    match inner {
        Some(kind) if !kind.check(value) => Err(SyncError::type_mismatch(
            owner,
            kind.describe(),
            value,
        )),
        _ => Ok(()),
    }
}

/// An observable ordered list of scalar entries.
#[derive(Debug)]
pub struct ListProperty {
    name: String,
    inner: Option<PropertyType>,
    default: Vec<Value>,
    items: Vec<Value>,
    events: EventTarget<PropertyEvent>,
}

impl ListProperty {
    pub fn new(name: impl Into<String>, inner: Option<PropertyType>) -> Self {
        Self {
            name: name.into(),
            inner,
            default: Vec::new(),
            items: Vec::new(),
            events: EventTarget::new(),
        }
    }

    pub fn with_default(mut self, default: Vec<Value>) -> Result<Self, SyncError> {
        for item in &default {
            check_entry(&self.name, &self.inner, item)?;
        }
        self.items = default.clone();
        self.default = default;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PropertyType {
        PropertyType::List(self.inner.clone().map(Box::new))
    }

    pub fn events(&self) -> EventTarget<PropertyEvent> {
        self.events.clone()
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.items.contains(value)
    }

    pub fn to_value(&self) -> Value {
        Value::Array(self.items.clone())
    }

    /// Replaces every entry.
    pub fn set(&mut self, items: Vec<Value>, notify: Notify) -> Result<bool, SyncError> {
        let pending = self.apply_set(items, Origin::Direct)?;
        Ok(fire_unless_silent(pending, notify))
    }

    pub fn push(&mut self, value: Value, notify: Notify) -> Result<bool, SyncError> {
        let len = self.items.len();
        self.insert_at(len, value, notify)
    }

    pub fn insert_at(&mut self, index: usize, value: Value, notify: Notify) -> Result<bool, SyncError> {
        let pending = self.apply_insert(index, value)?;
        Ok(fire_unless_silent(pending, notify))
    }

    /// Appends several entries with a single event.
    pub fn extend(&mut self, values: Vec<Value>, notify: Notify) -> Result<bool, SyncError> {
        let pending = self.apply_extend(values)?;
        Ok(fire_unless_silent(pending, notify))
    }

    /// Removes the first entry equal to `value`.
    pub fn remove(&mut self, value: &Value, notify: Notify) -> bool {
        let pending = self.apply_remove(value);
        fire_unless_silent(pending, notify)
    }

    pub fn remove_at(&mut self, index: usize, notify: Notify) -> Result<Value, SyncError> {
        let (removed, pending) = self.apply_remove_at(index)?;
        fire_unless_silent(Some(pending), notify);
        Ok(removed)
    }

    pub fn clear(&mut self, notify: Notify) -> bool {
        let pending = self.apply_set(Vec::new(), Origin::Direct).unwrap_or(None);
        fire_unless_silent(pending, notify)
    }

    pub(crate) fn validate(&self, value: &Value) -> Result<Vec<Value>, SyncError> {
        match value {
            Value::Null => Ok(self.default.clone()),
            Value::Array(items) => {
                for item in items {
                    check_entry(&self.name, &self.inner, item)?;
                }
                Ok(items.clone())
            }
            other => Err(SyncError::type_mismatch(&self.name, self.kind().describe(), other)),
        }
    }

    pub(crate) fn apply_set(
        &mut self,
        items: Vec<Value>,
        origin: Origin,
    ) -> Result<Option<PendingEvent>, SyncError> {
        for item in &items {
            check_entry(&self.name, &self.inner, item)?;
        }
        if self.items == items {
            return Ok(None);
        }
        self.items = items;
        Ok(Some(self.pending(origin)))
    }

    pub(crate) fn apply_default(&mut self, origin: Origin) -> Result<Option<PendingEvent>, SyncError> {
        let default = self.default.clone();
        self.apply_set(default, origin)
    }

    pub(crate) fn apply_insert(
        &mut self,
        index: usize,
        value: Value,
    ) -> Result<Option<PendingEvent>, SyncError> {
        check_entry(&self.name, &self.inner, &value)?;
        if index > self.items.len() {
            return Err(SyncError::IndexOutOfBounds {
                index,
                len: self.items.len(),
            });
        }
        self.items.insert(index, value);
        Ok(Some(self.pending(Origin::Direct)))
    }

    pub(crate) fn apply_extend(&mut self, values: Vec<Value>) -> Result<Option<PendingEvent>, SyncError> {
        for value in &values {
            check_entry(&self.name, &self.inner, value)?;
        }
        if values.is_empty() {
            return Ok(None);
        }
        self.items.extend(values);
        Ok(Some(self.pending(Origin::Direct)))
    }

    pub(crate) fn apply_remove(&mut self, value: &Value) -> Option<PendingEvent> {
        let position = self.items.iter().position(|item| item == value)?;
        self.items.remove(position);
        Some(self.pending(Origin::Direct))
    }

    pub(crate) fn apply_remove_at(&mut self, index: usize) -> Result<(Value, PendingEvent), SyncError> {
        if index >= self.items.len() {
            return Err(SyncError::IndexOutOfBounds {
                index,
                len: self.items.len(),
            });
        }
        let removed = self.items.remove(index);
        Ok((removed, self.pending(Origin::Direct)))
    }

    fn pending(&self, origin: Origin) -> PendingEvent {
        PendingEvent::new(self.events.clone(), self.to_value(), origin)
    }
}

/// An observable string-keyed mapping of scalar entries.
#[derive(Debug)]
pub struct DictionaryProperty {
    name: String,
    inner: Option<PropertyType>,
    default: Map<String, Value>,
    entries: Map<String, Value>,
    events: EventTarget<PropertyEvent>,
}

impl DictionaryProperty {
    pub fn new(name: impl Into<String>, inner: Option<PropertyType>) -> Self {
        Self {
            name: name.into(),
            inner,
            default: Map::new(),
            entries: Map::new(),
            events: EventTarget::new(),
        }
    }

    pub fn with_default(mut self, default: Map<String, Value>) -> Result<Self, SyncError> {
        for value in default.values() {
            check_entry(&self.name, &self.inner, value)?;
        }
        self.entries = default.clone();
        self.default = default;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PropertyType {
        PropertyType::Dictionary(self.inner.clone().map(Box::new))
    }

    pub fn events(&self) -> EventTarget<PropertyEvent> {
        self.events.clone()
    }

    pub fn entry(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.entries.clone())
    }

    /// Replaces every entry.
    pub fn set(&mut self, entries: Map<String, Value>, notify: Notify) -> Result<bool, SyncError> {
        let pending = self.apply_set(entries, Origin::Direct)?;
        Ok(fire_unless_silent(pending, notify))
    }

    pub fn set_entry(
        &mut self,
        key: impl Into<String>,
        value: Value,
        notify: Notify,
    ) -> Result<bool, SyncError> {
        let pending = self.apply_set_entry(key.into(), value)?;
        Ok(fire_unless_silent(pending, notify))
    }

    pub fn remove_entry(&mut self, key: &str, notify: Notify) -> bool {
        let pending = self.apply_remove_entry(key);
        fire_unless_silent(pending, notify)
    }

    pub(crate) fn validate(&self, value: &Value) -> Result<Map<String, Value>, SyncError> {
        match value {
            Value::Null => Ok(self.default.clone()),
            Value::Object(entries) => {
                for entry in entries.values() {
                    check_entry(&self.name, &self.inner, entry)?;
                }
                Ok(entries.clone())
            }
            other => Err(SyncError::type_mismatch(&self.name, self.kind().describe(), other)),
        }
    }

    pub(crate) fn apply_set(
        &mut self,
        entries: Map<String, Value>,
        origin: Origin,
    ) -> Result<Option<PendingEvent>, SyncError> {
        for value in entries.values() {
            check_entry(&self.name, &self.inner, value)?;
        }
        if self.entries == entries {
            return Ok(None);
        }
        self.entries = entries;
        Ok(Some(self.pending(origin)))
    }

    pub(crate) fn apply_default(&mut self, origin: Origin) -> Result<Option<PendingEvent>, SyncError> {
        let default = self.default.clone();
        self.apply_set(default, origin)
    }

    pub(crate) fn apply_set_entry(
        &mut self,
        key: String,
        value: Value,
    ) -> Result<Option<PendingEvent>, SyncError> {
        check_entry(&self.name, &self.inner, &value)?;
        if self.entries.get(&key) == Some(&value) {
            return Ok(None);
        }
        self.entries.insert(key, value);
        Ok(Some(self.pending(Origin::Direct)))
    }

    pub(crate) fn apply_remove_entry(&mut self, key: &str) -> Option<PendingEvent> {
        self.entries.remove(key)?;
        Some(self.pending(Origin::Direct))
    }

    fn pending(&self, origin: Origin) -> PendingEvent {
        PendingEvent::new(self.events.clone(), self.to_value(), origin)
    }
}
