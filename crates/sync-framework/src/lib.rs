//! # Sync Framework
//!
//! The reactive data layer of the console: typed observable properties,
//! schema-driven models, id-reconciled collections and the stores that keep
//! them in step with JSON resources over HTTP.
//!
//! ## Architecture Overview
//!
//! Four layers, leaves first:
//!
//! 1. **Property Layer** ([`Property`], [`ListProperty`], [`DictionaryProperty`]) - typed values
//!    that reject anything failing their type check and report whether a write changed anything
//! 2. **Model Layer** ([`Model`], [`ModelSchema`], [`define_model!`]) - a named set of properties
//!    plus an optional id, with one `Updated` event per top-level write
//! 3. **Collection Layer** ([`Collection`]) - ordered models indexed by id, reconciled against
//!    authoritative listings
//! 4. **Store Layer** ([`Store`], [`JsonStore`], [`ProxyStore`]) - fetch/save/destroy whose results
//!    arrive as events, never as errors
//!
//! Models and collections are cheap cloneable handles. Their events are delivered synchronously,
//! in listener registration order, and never while an internal lock is held, so a listener may
//! call straight back into the object that notified it.
//!
//! ## Two Kinds of Failure
//!
//! - **Programmer errors** (wrong type, unknown key, disposed object, missing model) return
//!   [`SyncError`] right away
//! - **Network outcomes** (error status, timeout, abort) are never `Err`: they come back as a
//!   [`RequestOutcome`] and are also dispatched as [`StoreEvent`]s, updating the
//!   [`SyncStatus`] of whoever owns the store
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use sync_framework::{Collection, FieldSpec, ModelSchema, Notify, RequestOutcome};
//! use sync_framework::mock::MockStore;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let schema = ModelSchema::builder("server")
//!     .field(FieldSpec::string("name"))
//!     .field(FieldSpec::string("status").with_default(json!("BUILD")))
//!     .build();
//!
//! let servers = Collection::new(schema);
//! let store = MockStore::new();
//! store
//!     .expect_fetch()
//!     .return_sync(json!([{"id": 1, "name": "web"}, {"id": 2, "name": "db"}]));
//! servers.bind_store(Arc::new(store.clone())).unwrap();
//!
//! assert_eq!(servers.fetch(None).await.unwrap(), RequestOutcome::Synced);
//! assert_eq!(servers.len(), 2);
//! assert!(servers.is_loaded());
//!
//! // Authoritative listings reconcile: id 2 is gone.
//! servers.set(vec![json!({"id": 1, "name": "web"})], Notify::Emit).unwrap();
//! assert_eq!(servers.len(), 1);
//! store.verify();
//! # }
//! ```
//!
//! ## Testing
//!
//! [`mock::MockTransport`] scripts HTTP exchanges for store tests and
//! [`mock::MockStore`] scripts store outcomes for model, collection and
//! service tests. Both panic from `verify()` when expectations remain.

pub mod collection;
pub mod error;
pub mod event;
pub mod grouping;
pub mod json_store;
pub mod macros;
pub mod mock;
pub mod model;
pub mod property;
pub mod proxy_store;
pub mod schema;
pub mod status;
pub mod store;
pub mod tracing;
pub mod transport;

// Re-export core types for convenience
pub use collection::{Collection, CollectionEvent, ModelRef, ModelSource, SortKey, SortOrder};
pub use error::SyncError;
pub use event::{Disposable, Disposal, EventTarget, Lifetime, ListenerKey, Notify, Origin};
pub use grouping::{DictionaryProperty, ListProperty};
pub use json_store::{JsonStore, JsonStoreOptions, MarkerPagination, MethodTimeouts, Pagination};
pub use model::{Model, ModelEvent, ModelId};
pub use property::{Property, PropertyEvent, PropertyType};
pub use proxy_store::ProxyStore;
pub use schema::{FieldKind, FieldSpec, ModelSchema};
pub use status::SyncStatus;
pub use store::{Operation, RequestOutcome, Store, StoreEvent, StoreFailure};
pub use transport::{HttpTransport, Method, Transport, TransportError};

#[doc(hidden)]
pub mod __private {
    pub use paste::paste;
    pub use serde_json;
}
