//! # Model Schemas
//!
//! A [`ModelSchema`] is the declared shape of a model class: an ordered list
//! of [`FieldSpec`]s. The schema is also the class reference used by
//! registries and collections, keyed by [`ModelSchema::name`].
//!
//! ```
//! use sync_framework::schema::{FieldSpec, ModelSchema};
//! use sync_framework::property::PropertyType;
//! use serde_json::json;
//!
//! let schema = ModelSchema::builder("server")
//!     .field(FieldSpec::string("name").required())
//!     .field(FieldSpec::number("count").with_default(json!(0)))
//!     .field(FieldSpec::list("tags").of(PropertyType::String))
//!     .build();
//! assert_eq!(schema.field_names(), vec!["name", "count", "tags"]);
//! ```
//!
//! Validation here is instance-free, so a whole payload (nested models and
//! collections included) is checked before any model applies a single value.

use crate::error::SyncError;
use crate::model::ModelId;
use crate::property::PropertyType;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Reserved key carrying the model id in payloads and snapshots.
pub const ID_KEY: &str = "id";

#[derive(Debug, Clone)]
pub enum FieldKind {
    Scalar(PropertyType),
    List(Option<PropertyType>),
    Dictionary(Option<PropertyType>),
    Model(Arc<ModelSchema>),
    Collection(Arc<ModelSchema>),
}

/// One declared field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    name: String,
    kind: FieldKind,
    default: Option<Value>,
    nullable: bool,
}

impl FieldSpec {
    fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            nullable: true,
        }
    }

    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Scalar(PropertyType::Any))
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Scalar(PropertyType::Number))
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Scalar(PropertyType::String))
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Scalar(PropertyType::Boolean))
    }

    pub fn list(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::List(None))
    }

    pub fn dictionary(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Dictionary(None))
    }

    pub fn model(name: impl Into<String>, schema: Arc<ModelSchema>) -> Self {
        Self::new(name, FieldKind::Model(schema))
    }

    pub fn collection(name: impl Into<String>, schema: Arc<ModelSchema>) -> Self {
        Self::new(name, FieldKind::Collection(schema))
    }

    /// Sets the entry type of a list or dictionary field. Ignored otherwise.
    pub fn of(mut self, inner: PropertyType) -> Self {
        self.kind = match self.kind {
            FieldKind::List(_) => FieldKind::List(Some(inner)),
            FieldKind::Dictionary(_) => FieldKind::Dictionary(Some(inner)),
            other => other,
        };
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Rejects null for scalar fields.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Checks a candidate value for this field. Null always means "reset"
    /// for containers and child models.
    pub fn validate(&self, value: &Value) -> Result<(), SyncError> {
        match &self.kind {
            FieldKind::Scalar(kind) => {
                if value.is_null() {
                    return if self.nullable {
                        Ok(())
                    } else {
                        Err(SyncError::NotNullable(self.name.clone()))
                    };
                }
                if kind.check(value) {
                    Ok(())
                } else {
                    Err(SyncError::type_mismatch(&self.name, kind.describe(), value))
                }
            }
            FieldKind::List(inner) => {
                let kind = PropertyType::List(inner.clone().map(Box::new));
                if value.is_null() || kind.check(value) {
                    Ok(())
                } else {
                    Err(SyncError::type_mismatch(&self.name, kind.describe(), value))
                }
            }
            FieldKind::Dictionary(inner) => {
                let kind = PropertyType::Dictionary(inner.clone().map(Box::new));
                if value.is_null() || kind.check(value) {
                    Ok(())
                } else {
                    Err(SyncError::type_mismatch(&self.name, kind.describe(), value))
                }
            }
            FieldKind::Model(schema) => match value {
                Value::Null => Ok(()),
                Value::Object(_) => schema.validate_values(value),
                other => Err(SyncError::type_mismatch(&self.name, schema.name(), other)),
            },
            FieldKind::Collection(schema) => match value {
                Value::Null => Ok(()),
                Value::Array(items) => items.iter().try_for_each(|item| schema.validate_record(item)),
                other => Err(SyncError::type_mismatch(
                    &self.name,
                    format!("Collection<{}>", schema.name()),
                    other,
                )),
            },
        }
    }
}

/// The declared shape of one model class.
#[derive(Debug)]
pub struct ModelSchema {
    name: String,
    fields: Vec<FieldSpec>,
}

impl ModelSchema {
    pub fn builder(name: impl Into<String>) -> ModelSchemaBuilder {
        ModelSchemaBuilder {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|field| field.name.as_str()).collect()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Checks a values object: every key must be declared (or be the id key)
    /// and every value must fit its field. A non-null id must be a valid
    /// [`ModelId`].
    pub fn validate_values(&self, values: &Value) -> Result<(), SyncError> {
        let object = values.as_object().ok_or_else(|| {
            SyncError::InvalidInput(format!("{} values must be an object", self.name))
        })?;
        for (key, value) in object {
            if key == ID_KEY {
                if !value.is_null() && ModelId::from_value(value).is_none() {
                    return Err(SyncError::InvalidInput(format!("{} is not a valid id", value)));
                }
                continue;
            }
            let field = self
                .field(key)
                .ok_or_else(|| SyncError::UnknownProperty(format!("{}.{}", self.name, key)))?;
            field.validate(value)?;
        }
        Ok(())
    }

    /// Checks the fields a write leaves out. With `resets_absent`, each one
    /// falls back to its default, so a required scalar without a default
    /// fails here. Null or absent child models reset the same way.
    pub fn validate_resets(&self, values: &Map<String, Value>, resets_absent: bool) -> Result<(), SyncError> {
        for field in &self.fields {
            let provided = values.get(&field.name);
            match (&field.kind, provided) {
                (FieldKind::Scalar(_), None) if resets_absent => {
                    field.validate(field.default.as_ref().unwrap_or(&Value::Null))?
                }
                (FieldKind::Model(schema), Some(Value::Object(nested))) => {
                    schema.validate_resets(nested, resets_absent)?
                }
                (FieldKind::Model(schema), Some(_)) => schema.validate_resets(&Map::new(), true)?,
                (FieldKind::Model(schema), None) if resets_absent => {
                    schema.validate_resets(&Map::new(), true)?
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Checks one collection record, including the child models it resets.
    pub fn validate_record(&self, record: &Value) -> Result<(), SyncError> {
        self.validate_values(record)?;
        match record.as_object() {
            Some(object) => self.validate_resets(object, false),
            None => Ok(()),
        }
    }

    /// Drops undeclared keys (recursively through child models and
    /// collections). Used on server payloads, which carry more than the
    /// client declares.
    pub fn retain_known(&self, values: &Value) -> Value {
        let Some(object) = values.as_object() else {
            return values.clone();
        };
        let mut kept = Map::new();
        for (key, value) in object {
            if key == ID_KEY {
                kept.insert(key.clone(), value.clone());
                continue;
            }
            let Some(field) = self.field(key) else {
                continue;
            };
            let value = match (&field.kind, value) {
                (FieldKind::Model(schema), Value::Object(_)) => schema.retain_known(value),
                (FieldKind::Collection(schema), Value::Array(items)) => {
                    Value::Array(items.iter().map(|item| schema.retain_known(item)).collect())
                }
                _ => value.clone(),
            };
            kept.insert(key.clone(), value);
        }
        Value::Object(kept)
    }
}

pub struct ModelSchemaBuilder {
    name: String,
    fields: Vec<FieldSpec>,
}

impl ModelSchemaBuilder {
    /// Adds a field. Redeclaring a name replaces the earlier declaration in
    /// place.
    pub fn field(mut self, field_spec: FieldSpec) -> Self {
        match self.fields.iter_mut().find(|field| field.name == field_spec.name) {
            Some(existing) => *existing = field_spec,
            None => self.fields.push(field_spec),
        }
        self
    }

    pub fn build(self) -> Arc<ModelSchema> {
        Arc::new(ModelSchema {
            name: self.name,
            fields: self.fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn volume() -> Arc<ModelSchema> {
        ModelSchema::builder("volume")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::number("size").required())
            .build()
    }

    #[test]
    fn validate_rejects_unknown_keys_and_bad_types() {
        let schema = volume();
        assert!(schema.validate_values(&json!({"id": 3, "name": "data"})).is_ok());
        assert_eq!(
            schema.validate_values(&json!({"colour": "red"})),
            Err(SyncError::UnknownProperty("volume.colour".into()))
        );
        assert_eq!(
            schema.validate_values(&json!({"size": null})),
            Err(SyncError::NotNullable("size".into()))
        );
    }

    #[test]
    fn nested_collections_are_validated() {
        let server = ModelSchema::builder("server")
            .field(FieldSpec::collection("volumes", volume()))
            .build();
        let err = server
            .validate_values(&json!({"volumes": [{"size": 1}, {"size": "big"}]}))
            .unwrap_err();
        assert!(matches!(err, SyncError::TypeMismatch { target, .. } if target == "size"));
    }

    #[test]
    fn resets_and_ids_are_checked_up_front() {
        let schema = volume();
        assert_eq!(schema.validate_resets(&Map::new(), false), Ok(()));
        assert_eq!(
            schema.validate_resets(&Map::new(), true),
            Err(SyncError::NotNullable("size".into()))
        );

        let server = ModelSchema::builder("server")
            .field(FieldSpec::model("root", volume()))
            .build();
        assert_eq!(
            server.validate_record(&json!({"root": null})),
            Err(SyncError::NotNullable("size".into()))
        );
        assert!(server.validate_record(&json!({"root": {"size": 4}})).is_ok());
        assert!(matches!(
            server.validate_record(&json!({"id": true})),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(server.validate_record(&json!({"id": null})).is_ok());
    }

    #[test]
    fn retain_known_strips_server_extras() {
        let server = ModelSchema::builder("server")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::collection("volumes", volume()))
            .build();
        let raw = json!({
            "id": "abc",
            "name": "web",
            "links": [],
            "volumes": [{"id": 1, "size": 10, "bootable": true}]
        });
        assert_eq!(
            server.retain_known(&raw),
            json!({"id": "abc", "name": "web", "volumes": [{"id": 1, "size": 10}]})
        );
    }

    #[test]
    fn redeclared_field_replaces_in_place() {
        let schema = ModelSchema::builder("thing")
            .field(FieldSpec::string("a"))
            .field(FieldSpec::string("b"))
            .field(FieldSpec::number("a"))
            .build();
        assert_eq!(schema.field_names(), vec!["a", "b"]);
        assert!(matches!(
            schema.field("a").map(FieldSpec::kind),
            Some(FieldKind::Scalar(PropertyType::Number))
        ));
    }
}
