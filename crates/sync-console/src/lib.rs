//! # Sync Console
//!
//! The service layer of the console, built on [`sync_framework`]: which
//! providers exist, what each of them serves, and how their data is merged,
//! loaded on demand and kept fresh.
//!
//! ## 🚀 Core Components
//!
//! - **[provider]**: [`Provider`](provider::Provider) records and the shared [`Providers`](provider::Providers) collection.
//! - **[catalog]**: every [`ResourceClass`](catalog::ResourceClass) the console syncs, with its schema, path and [`UpdateStrategy`](strategy::UpdateStrategy).
//! - **[provider_service]** / **[aggregate_service]**: one provider's resources, and every provider of a service type behind one service.
//! - **[collection_syncer]**: one class merged across providers, with partial-failure semantics.
//! - **[registry]**: resolves [`DependencyRequest`](dependency::DependencyRequest)s and joins batches of them.
//! - **[polling]**: one background poller per watched dependency.
//! - **[context]**: the [`ConsoleContext`](context::ConsoleContext) everything is wired through.
//!
//! ## 📚 Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serde_json::json;
//! use sync_console::catalog::{Catalog, ResourceClass};
//! use sync_console::config::ConsoleConfig;
//! use sync_console::context::ConsoleContext;
//! use sync_console::dependency::DependencyRequest;
//! use sync_console::provider::{ProviderKey, Providers};
//! use sync_console::registry::RequireOutcome;
//! use sync_framework::mock::MockStore;
//! use sync_framework::Store;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let providers = Providers::from_records(vec![
//!     json!({"service_type": "compute", "service_name": "cloudServers", "service_region": "ORD"}),
//!     json!({"service_type": "compute", "service_name": "cloudServers", "service_region": "DFW"}),
//! ])
//! .unwrap();
//!
//! // Every provider answers with one server named after its region.
//! let stores = |key: &ProviderKey, _: &ResourceClass| -> Arc<dyn Store> {
//!     let store = MockStore::new();
//!     store
//!         .stub_fetch()
//!         .return_sync(json!([{"id": format!("web-{}", key.region), "name": "web"}]));
//!     Arc::new(store)
//! };
//!
//! let context = ConsoleContext::new(
//!     ConsoleConfig::default(),
//!     providers,
//!     Catalog::standard(Duration::from_secs(60)),
//!     Arc::new(stores),
//! );
//! let outcome = context
//!     .registry()
//!     .require(&[DependencyRequest::aggregate_class("compute", "server")])
//!     .await
//!     .unwrap();
//! assert_eq!(outcome, RequireOutcome::Loaded);
//!
//! let servers = context.registry().aggregate("compute").unwrap().syncer("server").unwrap();
//! assert_eq!(servers.aggregate().len(), 2);
//! # }
//! ```
//!
//! ## 🧪 Testing
//!
//! Hand [`ConsoleContext::new`](context::ConsoleContext::new) a closure
//! returning [`MockStore`](sync_framework::mock::MockStore)s to script every
//! provider's answers.

pub mod aggregate_service;
pub mod catalog;
pub mod collection_syncer;
pub mod config;
pub mod context;
pub mod dependency;
pub mod error;
pub mod polling;
pub mod provider;
pub mod provider_service;
pub mod registry;
pub mod store_factory;
pub mod strategy;
