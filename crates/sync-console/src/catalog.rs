//! # Resource Catalog
//!
//! Every kind of resource the console syncs, described once: its schema,
//! whether a provider exposes one of it or a listing, where it lives under
//! the provider's proxy path and how often it is refreshed. A
//! [`ResourceClass`] is addressed by its schema name.

use crate::error::RegistryError;
use crate::strategy::UpdateStrategy;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use sync_framework::{FieldSpec, ModelSchema, PropertyType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Model,
    Collection,
}

#[derive(Debug, Clone)]
pub struct ResourceClass {
    service_type: String,
    schema: Arc<ModelSchema>,
    kind: ResourceKind,
    path: String,
    root_key: Option<String>,
    page_limit: Option<usize>,
    strategy: UpdateStrategy,
    slow: bool,
}

impl ResourceClass {
    pub fn collection(service_type: impl Into<String>, schema: Arc<ModelSchema>, path: impl Into<String>) -> Self {
        Self::new(service_type.into(), schema, ResourceKind::Collection, path.into())
    }

    pub fn model(service_type: impl Into<String>, schema: Arc<ModelSchema>, path: impl Into<String>) -> Self {
        Self::new(service_type.into(), schema, ResourceKind::Model, path.into())
    }

    fn new(service_type: String, schema: Arc<ModelSchema>, kind: ResourceKind, path: String) -> Self {
        Self {
            service_type,
            schema,
            kind,
            path,
            root_key: None,
            page_limit: None,
            strategy: UpdateStrategy::Manual,
            slow: false,
        }
    }

    /// Payloads arrive wrapped under this key (`{"servers": [...]}`).
    pub fn with_root_key(mut self, key: impl Into<String>) -> Self {
        self.root_key = Some(key.into());
        self
    }

    /// Listings are paged by marker, `limit` records at a time. Needs a
    /// root key.
    pub fn paged(mut self, limit: usize) -> Self {
        self.page_limit = Some(limit);
        self
    }

    pub fn with_strategy(mut self, strategy: UpdateStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn slow(mut self) -> Self {
        self.slow = true;
        self
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn root_key(&self) -> Option<&str> {
        self.root_key.as_deref()
    }

    pub fn page_limit(&self) -> Option<usize> {
        self.page_limit
    }

    pub fn strategy(&self) -> UpdateStrategy {
        self.strategy
    }

    pub fn is_slow(&self) -> bool {
        self.slow
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    classes: Vec<Arc<ResourceClass>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a class. A class with the same name is replaced.
    pub fn with_class(mut self, class: ResourceClass) -> Self {
        self.classes.retain(|held| held.name() != class.name());
        self.classes.push(Arc::new(class));
        self
    }

    pub fn class(&self, name: &str) -> Result<Arc<ResourceClass>, RegistryError> {
        self.classes
            .iter()
            .find(|class| class.name() == name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownClass(name.to_string()))
    }

    pub fn classes(&self) -> &[Arc<ResourceClass>] {
        &self.classes
    }

    pub fn for_service_type(&self, service_type: &str) -> Vec<Arc<ResourceClass>> {
        self.classes
            .iter()
            .filter(|class| class.service_type() == service_type)
            .cloned()
            .collect()
    }

    /// The resources the console ships with. Listings that change under the
    /// user poll every `poll_interval`; reference data is fetched on demand.
    pub fn standard(poll_interval: Duration) -> Self {
        let poll = UpdateStrategy::Poll {
            interval: poll_interval,
        };
        let backoff = UpdateStrategy::Backoff {
            interval: poll_interval,
            max: poll_interval * 8,
        };

        let server = ModelSchema::builder("server")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::string("status").with_default(json!("BUILD")))
            .field(FieldSpec::number("progress").with_default(json!(0)))
            .field(FieldSpec::dictionary("flavor"))
            .field(FieldSpec::dictionary("addresses"))
            .field(FieldSpec::dictionary("metadata").of(PropertyType::String))
            .build();
        let flavor = ModelSchema::builder("flavor")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::number("ram"))
            .field(FieldSpec::number("vcpus"))
            .field(FieldSpec::number("disk"))
            .build();
        let image = ModelSchema::builder("image")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::string("status"))
            .field(FieldSpec::number("minDisk").with_default(json!(0)))
            .build();
        let limits = ModelSchema::builder("limits")
            .field(FieldSpec::dictionary("absolute").of(PropertyType::Number))
            .field(FieldSpec::list("rate"))
            .build();
        let instance = ModelSchema::builder("database_instance")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::string("status"))
            .field(FieldSpec::dictionary("volume"))
            .field(FieldSpec::list("links"))
            .build();
        let virtual_ip = ModelSchema::builder("virtual_ip")
            .field(FieldSpec::string("address"))
            .field(FieldSpec::string("type"))
            .field(FieldSpec::string("ipVersion"))
            .build();
        let load_balancer = ModelSchema::builder("load_balancer")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::string("status"))
            .field(FieldSpec::string("protocol"))
            .field(FieldSpec::number("port"))
            .field(FieldSpec::collection("virtualIps", virtual_ip))
            .build();
        let container = ModelSchema::builder("container")
            .field(FieldSpec::string("name"))
            .field(FieldSpec::number("count").with_default(json!(0)))
            .field(FieldSpec::number("bytes").with_default(json!(0)))
            .build();

        Catalog::new()
            .with_class(
                ResourceClass::collection("compute", server, "servers/detail")
                    .with_root_key("servers")
                    .paged(100)
                    .with_strategy(poll),
            )
            .with_class(ResourceClass::collection("compute", flavor, "flavors/detail").with_root_key("flavors"))
            .with_class(ResourceClass::collection("compute", image, "images/detail").with_root_key("images"))
            .with_class(ResourceClass::model("compute", limits, "limits").with_root_key("limits"))
            .with_class(
                ResourceClass::collection("databases", instance, "instances")
                    .with_root_key("instances")
                    .with_strategy(poll),
            )
            .with_class(
                ResourceClass::collection("load_balancers", load_balancer, "loadbalancers")
                    .with_root_key("loadBalancers")
                    .with_strategy(backoff),
            )
            .with_class(ResourceClass::collection("files", container, "").slow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalog_is_addressable_by_name() {
        let catalog = Catalog::standard(Duration::from_secs(60));
        let servers = catalog.class("server").unwrap();
        assert_eq!(servers.kind(), ResourceKind::Collection);
        assert_eq!(servers.root_key(), Some("servers"));
        assert!(servers.strategy().should_poll());
        assert!(!catalog.class("flavor").unwrap().strategy().should_poll());
        assert!(catalog.class("container").unwrap().is_slow());
        assert!(matches!(catalog.class("router"), Err(RegistryError::UnknownClass(_))));
    }

    #[test]
    fn classes_group_by_service_type() {
        let catalog = Catalog::standard(Duration::from_secs(60));
        let names: Vec<_> = catalog
            .for_service_type("compute")
            .iter()
            .map(|class| class.name().to_string())
            .collect();
        assert_eq!(names, vec!["server", "flavor", "image", "limits"]);
    }

    #[test]
    fn registering_twice_replaces() {
        let schema = ModelSchema::builder("widget").build();
        let catalog = Catalog::new()
            .with_class(ResourceClass::collection("a", schema.clone(), "widgets"))
            .with_class(ResourceClass::collection("b", schema, "widgets"));
        assert_eq!(catalog.classes().len(), 1);
        assert_eq!(catalog.class("widget").unwrap().service_type(), "b");
    }
}
