//! # Observable Properties
//!
//! A [`Property`] wraps one typed JSON value with a default and a nullability
//! flag. `set` is the only validation boundary in the framework: a value that
//! fails [`PropertyType::check`] is rejected with
//! [`SyncError::TypeMismatch`] and nothing is coerced.
//!
//! A set that does not change the value is a no-op and emits nothing.

use crate::error::{describe_value, SyncError};
use crate::event::{EventTarget, Notify, Origin};
use serde_json::Value;

/// The declared type of a property or of a grouping property's entries.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyType {
    Any,
    Number,
    String,
    Boolean,
    List(Option<Box<PropertyType>>),
    Dictionary(Option<Box<PropertyType>>),
}

impl PropertyType {
    pub fn list_of(inner: PropertyType) -> Self {
        PropertyType::List(Some(Box::new(inner)))
    }

    pub fn dictionary_of(inner: PropertyType) -> Self {
        PropertyType::Dictionary(Some(Box::new(inner)))
    }

    /// Returns whether a non-null value satisfies this type.
    ///
    /// Null handling is the owner's business (see [`Property::nullable`]).
    pub fn check(&self, value: &Value) -> bool {
        match (self, value) {
            (PropertyType::Any, _) => true,
            (PropertyType::Number, Value::Number(_)) => true,
            (PropertyType::String, Value::String(_)) => true,
            (PropertyType::Boolean, Value::Bool(_)) => true,
            (PropertyType::List(inner), Value::Array(items)) => match inner {
                Some(inner) => items.iter().all(|item| inner.check(item)),
                None => true,
            },
            (PropertyType::Dictionary(inner), Value::Object(entries)) => match inner {
                Some(inner) => entries.values().all(|entry| inner.check(entry)),
                None => true,
            },
            _ => false,
        }
    }

    /// Diagnostic type name used in error messages.
    pub fn describe(&self) -> String {
        match self {
            PropertyType::Any => "Any".to_string(),
            PropertyType::Number => "Number".to_string(),
            PropertyType::String => "String".to_string(),
            PropertyType::Boolean => "Boolean".to_string(),
            PropertyType::List(None) => "List".to_string(),
            PropertyType::List(Some(inner)) => format!("List<{}>", inner.describe()),
            PropertyType::Dictionary(None) => "Dictionary".to_string(),
            PropertyType::Dictionary(Some(inner)) => format!("Dictionary<{}>", inner.describe()),
        }
    }

    /// The empty value used when no explicit default is declared.
    pub(crate) fn empty_value(&self) -> Value {
        match self {
            PropertyType::List(_) => Value::Array(Vec::new()),
            PropertyType::Dictionary(_) => Value::Object(serde_json::Map::new()),
            _ => Value::Null,
        }
    }
}

/// Payload of a property change.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEvent {
    pub value: Value,
    pub origin: Origin,
}

/// A change computed under a lock and fired after the lock is released.
pub(crate) struct PendingEvent {
    target: EventTarget<PropertyEvent>,
    event: PropertyEvent,
}

impl PendingEvent {
    pub(crate) fn new(target: EventTarget<PropertyEvent>, value: Value, origin: Origin) -> Self {
        Self {
            target,
            event: PropertyEvent { value, origin },
        }
    }

    pub(crate) fn fire(self) {
        self.target.dispatch(&self.event);
    }
}

/// One observable, typed value.
#[derive(Debug)]
pub struct Property {
    name: String,
    kind: PropertyType,
    nullable: bool,
    default: Value,
    value: Value,
    events: EventTarget<PropertyEvent>,
}

impl Property {
    pub fn new(name: impl Into<String>, kind: PropertyType) -> Self {
        let default = kind.empty_value();
        Self {
            name: name.into(),
            value: default.clone(),
            default,
            kind,
            nullable: true,
            events: EventTarget::new(),
        }
    }

    /// Declares the default value; the current value is reset to it.
    pub fn with_default(mut self, default: Value) -> Result<Self, SyncError> {
        self.validate(&default)?;
        self.value = default.clone();
        self.default = default;
        Ok(self)
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &PropertyType {
        &self.kind
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    pub fn get(&self) -> &Value {
        &self.value
    }

    pub fn events(&self) -> EventTarget<PropertyEvent> {
        self.events.clone()
    }

    pub fn check_type(&self, value: &Value) -> bool {
        self.kind.check(value)
    }

    pub fn describe(&self) -> String {
        self.kind.describe()
    }

    /// Sets the value. Returns whether it actually changed.
    pub fn set(&mut self, value: Value, notify: Notify) -> Result<bool, SyncError> {
        let pending = self.apply(value, Origin::Direct)?;
        Ok(fire_unless_silent(pending, notify))
    }

    /// Restores the declared default.
    pub fn reset(&mut self, notify: Notify) -> Result<bool, SyncError> {
        let default = self.default.clone();
        self.set(default, notify)
    }

    /// Checks a candidate value without applying it.
    pub fn validate(&self, value: &Value) -> Result<(), SyncError> {
        if value.is_null() {
            if self.nullable {
                return Ok(());
            }
            return Err(SyncError::NotNullable(self.name.clone()));
        }
        if self.kind.check(value) {
            Ok(())
        } else {
            Err(SyncError::TypeMismatch {
                target: self.name.clone(),
                expected: self.describe(),
                actual: describe_value(value).to_string(),
            })
        }
    }

    /// Applies a value and returns the event to fire, if anything changed.
    pub(crate) fn apply(
        &mut self,
        value: Value,
        origin: Origin,
    ) -> Result<Option<PendingEvent>, SyncError> {
        self.validate(&value)?;
        if self.value == value {
            return Ok(None);
        }
        self.value = value.clone();
        Ok(Some(PendingEvent::new(self.events.clone(), value, origin)))
    }

    pub(crate) fn apply_default(&mut self, origin: Origin) -> Result<Option<PendingEvent>, SyncError> {
        let default = self.default.clone();
        self.apply(default, origin)
    }
}

pub(crate) fn fire_unless_silent(pending: Option<PendingEvent>, notify: Notify) -> bool {
    match pending {
        Some(pending) => {
            if !notify.is_silent() {
                pending.fire();
            }
            true
        }
        None => false,
    }
}
