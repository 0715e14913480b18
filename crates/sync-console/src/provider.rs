//! # Providers
//!
//! A provider is one backend endpoint: a service type (`compute`,
//! `databases`, ...) offered under a name in one region. The console learns
//! its providers from the bootstrap payload and keeps them in a single
//! [`Providers`] collection that every service reads from.

use crate::error::RegistryError;
use serde_json::{json, Value};
use std::fmt;
use sync_framework::{define_model, Collection, Disposal, ModelId, ModelRef, Notify, SyncError};
use tracing::{info, warn};

define_model! {
    /// One addressable backend endpoint.
    pub struct Provider("provider") {
        service_type: String,
        service_name: String,
        service_region: String,
        access_allowed: Boolean = true,
        loaded: Boolean = true,
    }
}

/// The triple that addresses a provider's endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderKey {
    pub service_type: String,
    pub service_name: String,
    pub region: String,
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.service_type, self.service_name, self.region)
    }
}

impl Provider {
    pub fn id(&self) -> Option<ModelId> {
        self.model().id()
    }

    pub fn key(&self) -> Result<ProviderKey, RegistryError> {
        match (self.service_type(), self.service_name(), self.service_region()) {
            (Some(service_type), Some(service_name), Some(region)) => Ok(ProviderKey {
                service_type,
                service_name,
                region,
            }),
            _ => Err(RegistryError::IncompleteProvider(format!("{:?}", self.model().snapshot().ok()))),
        }
    }

    /// Whether the provider is usable right now: the user may reach it and
    /// its endpoints have loaded.
    pub fn is_active(&self) -> bool {
        self.access_allowed().unwrap_or(false) && self.loaded().unwrap_or(false)
    }
}

/// The shared collection of every known provider.
#[derive(Debug, Clone)]
pub struct Providers {
    collection: Collection,
}

impl Default for Providers {
    fn default() -> Self {
        Self::new()
    }
}

impl Providers {
    pub fn new() -> Self {
        Self {
            collection: Collection::new(Provider::schema()),
        }
    }

    /// Builds the collection from bootstrap records. Records without an id
    /// are keyed `<service_type>:<service_region>`.
    pub fn from_records(records: Vec<Value>) -> Result<Self, SyncError> {
        let providers = Self::new();
        let records = records.into_iter().map(with_derived_id).collect();
        providers.collection.set(records, Notify::Silent)?;
        info!(count = providers.len(), "Loaded providers");
        Ok(providers)
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn len(&self) -> usize {
        self.collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.is_empty()
    }

    pub fn all(&self) -> Vec<Provider> {
        self.collection
            .models()
            .into_iter()
            .filter_map(|model| Provider::from_model(model).ok())
            .collect()
    }

    pub fn get(&self, id: &ModelId) -> Option<Provider> {
        self.collection
            .get_model_by_id(id)
            .and_then(|model| Provider::from_model(model).ok())
    }

    pub fn for_service_type(&self, service_type: &str) -> Vec<Provider> {
        self.all()
            .into_iter()
            .filter(|provider| provider.service_type().as_deref() == Some(service_type))
            .collect()
    }

    /// Distinct service types in listing order.
    pub fn service_types(&self) -> Vec<String> {
        let mut types: Vec<String> = Vec::new();
        for provider in self.all() {
            if let Some(service_type) = provider.service_type() {
                if !types.contains(&service_type) {
                    types.push(service_type);
                }
            }
        }
        types
    }

    /// Drops a provider whose endpoints refused us. Returns whether it was
    /// still listed.
    pub fn remove_unavailable(&self, id: &ModelId) -> Result<bool, SyncError> {
        if self.collection.get_model_by_id(id).is_none() {
            return Ok(false);
        }
        warn!(provider = %id, "Removing unavailable provider");
        self.collection
            .remove_model(ModelRef::Id(id.clone()), Notify::Emit, Disposal::Dispose)?;
        Ok(true)
    }
}

fn with_derived_id(record: Value) -> Value {
    let Value::Object(mut object) = record else {
        return record;
    };
    if !object.contains_key("id") {
        let service_type = object.get("service_type").and_then(Value::as_str);
        let region = object.get("service_region").and_then(Value::as_str);
        if let (Some(service_type), Some(region)) = (service_type, region) {
            let id = json!(format!("{service_type}:{region}"));
            object.insert("id".to_string(), id);
        }
    }
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<Value> {
        vec![
            json!({"service_type": "compute", "service_name": "cloudServers", "service_region": "ORD"}),
            json!({"service_type": "compute", "service_name": "cloudServers", "service_region": "DFW"}),
            json!({"id": "files", "service_type": "files", "service_name": "cloudFiles",
                   "service_region": "ORD", "loaded": false}),
        ]
    }

    #[test]
    fn ids_are_derived_when_missing() {
        let providers = Providers::from_records(records()).unwrap();
        assert_eq!(providers.len(), 3);
        let ord = providers.get(&ModelId::from("compute:ORD")).unwrap();
        assert_eq!(
            ord.key().unwrap(),
            ProviderKey {
                service_type: "compute".into(),
                service_name: "cloudServers".into(),
                region: "ORD".into(),
            }
        );
    }

    #[test]
    fn filters_by_service_type() {
        let providers = Providers::from_records(records()).unwrap();
        assert_eq!(providers.for_service_type("compute").len(), 2);
        assert_eq!(providers.service_types(), vec!["compute", "files"]);
    }

    #[test]
    fn activity_follows_flags() {
        let providers = Providers::from_records(records()).unwrap();
        assert!(providers.get(&ModelId::from("compute:DFW")).unwrap().is_active());
        assert!(!providers.get(&ModelId::from("files")).unwrap().is_active());
    }

    #[test]
    fn removing_unavailable_disposes_the_provider() {
        let providers = Providers::from_records(records()).unwrap();
        let id = ModelId::from("compute:ORD");
        let held = providers.get(&id).unwrap();

        assert!(providers.remove_unavailable(&id).unwrap());
        assert!(!providers.remove_unavailable(&id).unwrap());
        assert_eq!(providers.len(), 2);
        assert!(held.model().is_disposed());
        assert!(!held.is_active());
    }
}
