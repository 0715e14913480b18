//! # Mocks & Testing Guide
//!
//! Two in-memory doubles implement the framework's seams so tests never touch
//! the network:
//!
//! | Double | Seam | Use it to test |
//! |--------|------|----------------|
//! | [`MockTransport`] | [`Transport`] | `JsonStore`/`ProxyStore` wire behavior: URLs, verbs, CSRF, retries, paging |
//! | [`MockStore`] | [`Store`] | Models, collections and services *above* the store: sync, errors, timeouts |
//!
//! Both follow the same expectation-builder style: script the replies up
//! front, run the code under test, then call `verify()` to assert every
//! scripted reply was consumed. An unexpected call panics.
//!
//! ## Store-level test
//!
//! ```rust
//! use sync_framework::mock::MockStore;
//! use sync_framework::{FieldSpec, Model, ModelSchema, RequestOutcome};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let schema = ModelSchema::builder("server").field(FieldSpec::string("name")).build();
//!     let store = MockStore::new();
//!     store.expect_fetch().return_sync(json!({"id": "srv-1", "name": "web"}));
//!     store.expect_fetch().return_error(503, "");
//!
//!     let server = Model::new(schema).unwrap();
//!     server.bind_store(Arc::new(store.clone())).unwrap();
//!
//!     assert_eq!(server.fetch(None).await.unwrap(), RequestOutcome::Synced);
//!     assert_eq!(server.get("name").unwrap(), json!("web"));
//!
//!     server.fetch(None).await.unwrap();
//!     assert!(server.has_error());
//!     store.verify();
//! }
//! ```
//!
//! ## Wire-level test
//!
//! ```rust
//! use sync_framework::mock::MockTransport;
//! use sync_framework::transport::Method;
//! use sync_framework::{JsonStore, Store};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = MockTransport::new();
//!     transport.expect(Method::Delete, "https://api/volumes/7").respond(204, "");
//!
//!     let store = JsonStore::new(Arc::new(transport.clone()), "https://api/volumes");
//!     let outcome = store.destroy(Some(7.into())).await;
//!     assert!(outcome.is_ok());
//!     transport.verify();
//! }
//! ```
//!
//! ## Standing replies
//!
//! Polling tests call a store an unknown number of times. `stub_fetch()`
//! (and friends) install a reply used whenever no scripted expectation is
//! queued for that operation.

use crate::event::lock;
use crate::model::ModelId;
use crate::store::{Operation, RequestOutcome, Store, StoreCore, StoreFailure};
use crate::transport::{Method, Request, Response, Transport, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// =============================================================================
// TRANSPORT
// =============================================================================

/// A canned response body.
pub struct MockBody(String);

impl From<Value> for MockBody {
    fn from(value: Value) -> Self {
        MockBody(value.to_string())
    }
}

impl From<&str> for MockBody {
    fn from(text: &str) -> Self {
        MockBody(text.to_string())
    }
}

impl From<String> for MockBody {
    fn from(text: String) -> Self {
        MockBody(text)
    }
}

struct TransportExpectation {
    method: Method,
    url: String,
    reply: Result<Response, TransportError>,
}

#[derive(Default)]
struct TransportState {
    expectations: VecDeque<TransportExpectation>,
    requests: Vec<Request>,
}

/// In-memory [`Transport`] answering from a script of expected requests.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expects the next request to be `method url`.
    pub fn expect(&self, method: Method, url: impl Into<String>) -> TransportExpectationBuilder {
        TransportExpectationBuilder {
            state: self.state.clone(),
            method,
            url: url.into(),
        }
    }

    /// Every request sent so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        lock(&self.state).requests.clone()
    }

    /// Verifies that all expectations were met.
    pub fn verify(&self) {
        let state = lock(&self.state);
        if !state.expectations.is_empty() {
            panic!(
                "Not all expectations were met. {} remaining",
                state.expectations.len()
            );
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        let expectation = {
            let mut state = lock(&self.state);
            state.requests.push(request.clone());
            state.expectations.pop_front()
        };
        match expectation {
            Some(expected) if expected.method == request.method && expected.url == request.url => {
                expected.reply
            }
            Some(expected) => panic!(
                "Unexpected request {} {} (expected {} {})",
                request.method, request.url, expected.method, expected.url
            ),
            None => panic!("Unexpected request {} {}", request.method, request.url),
        }
    }
}

/// Builder for one expected request.
pub struct TransportExpectationBuilder {
    state: Arc<Mutex<TransportState>>,
    method: Method,
    url: String,
}

impl TransportExpectationBuilder {
    fn push(self, reply: Result<Response, TransportError>) {
        lock(&self.state).expectations.push_back(TransportExpectation {
            method: self.method,
            url: self.url,
            reply,
        });
    }

    pub fn respond(self, status: u16, body: impl Into<MockBody>) {
        let MockBody(body) = body.into();
        self.push(Ok(Response::new(status, body)));
    }

    pub fn respond_with(self, response: Response) {
        self.push(Ok(response));
    }

    pub fn timeout(self) {
        self.push(Err(TransportError::Timeout));
    }

    pub fn abort(self) {
        self.push(Err(TransportError::Aborted));
    }

    pub fn fail(self, message: impl Into<String>) {
        self.push(Err(TransportError::Network(message.into())));
    }
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Debug, Clone)]
enum Reply {
    Sync(Value),
    Error(u16, String),
    Timeout,
    Success,
    Abort,
}

#[derive(Debug, Clone)]
struct StoreExpectation {
    operation: Operation,
    reply: Reply,
    delay: Option<Duration>,
}

#[derive(Default)]
struct StoreScript {
    expectations: VecDeque<StoreExpectation>,
    stubs: HashMap<Operation, StoreExpectation>,
    calls: Vec<(Operation, Option<Value>)>,
}

struct MockStoreInner {
    label: String,
    core: StoreCore,
    script: Mutex<StoreScript>,
}

/// In-memory [`Store`] replaying scripted outcomes. Clones share the script
/// and the event target.
#[derive(Clone)]
pub struct MockStore {
    inner: Arc<MockStoreInner>,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self::named("mock")
    }

    pub fn named(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(MockStoreInner {
                label: label.into(),
                core: StoreCore::new(),
                script: Mutex::new(StoreScript::default()),
            }),
        }
    }

    fn builder(&self, operation: Operation, standing: bool) -> StoreExpectationBuilder {
        StoreExpectationBuilder {
            store: self.clone(),
            operation,
            delay: None,
            standing,
        }
    }

    pub fn expect_fetch(&self) -> StoreExpectationBuilder {
        self.builder(Operation::Fetch, false)
    }

    pub fn expect_save(&self) -> StoreExpectationBuilder {
        self.builder(Operation::Save, false)
    }

    pub fn expect_destroy(&self) -> StoreExpectationBuilder {
        self.builder(Operation::Destroy, false)
    }

    /// Reply used for every fetch once scripted expectations run out.
    pub fn stub_fetch(&self) -> StoreExpectationBuilder {
        self.builder(Operation::Fetch, true)
    }

    /// Number of calls made for `operation`.
    pub fn calls(&self, operation: Operation) -> usize {
        lock(&self.inner.script)
            .calls
            .iter()
            .filter(|(called, _)| *called == operation)
            .count()
    }

    /// Payloads passed to `save`, in order.
    pub fn saved(&self) -> Vec<Value> {
        lock(&self.inner.script)
            .calls
            .iter()
            .filter(|(operation, _)| *operation == Operation::Save)
            .filter_map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Arguments passed to `fetch`, in order.
    pub fn fetch_args(&self) -> Vec<Option<Value>> {
        lock(&self.inner.script)
            .calls
            .iter()
            .filter(|(operation, _)| *operation == Operation::Fetch)
            .map(|(_, args)| args.clone())
            .collect()
    }

    /// Verifies that all expectations were met.
    pub fn verify(&self) {
        let script = lock(&self.inner.script);
        if !script.expectations.is_empty() {
            panic!(
                "Not all expectations were met. {} remaining",
                script.expectations.len()
            );
        }
    }

    fn next(&self, operation: Operation, payload: Option<Value>) -> StoreExpectation {
        let mut script = lock(&self.inner.script);
        script.calls.push((operation, payload));
        match script.expectations.front().map(|expected| expected.operation) {
            Some(expected) if expected == operation => {
                if let Some(expected) = script.expectations.pop_front() {
                    return expected;
                }
            }
            Some(expected) => panic!(
                "Unexpected {:?} on {} (expected {:?})",
                operation, self.inner.label, expected
            ),
            None => {}
        }
        match script.stubs.get(&operation) {
            Some(stub) => stub.clone(),
            None => panic!("Unexpected {:?} on {}", operation, self.inner.label),
        }
    }

    async fn play(&self, expectation: StoreExpectation) -> RequestOutcome {
        if let Some(delay) = expectation.delay {
            tokio::time::sleep(delay).await;
        }
        let operation = expectation.operation;
        match expectation.reply {
            Reply::Sync(data) => self.publish(&data, operation, operation == Operation::Fetch),
            Reply::Error(status, body) => self.publish_outcome(
                operation,
                RequestOutcome::Error(StoreFailure::new(operation, status, body)),
            ),
            Reply::Timeout => self.publish_outcome(operation, RequestOutcome::Timeout),
            Reply::Success => self.publish_outcome(operation, RequestOutcome::Success),
            Reply::Abort => RequestOutcome::Aborted,
        }
    }
}

#[async_trait]
impl Store for MockStore {
    fn core(&self) -> &StoreCore {
        &self.inner.core
    }

    fn describe(&self) -> String {
        self.inner.label.clone()
    }

    async fn fetch(&self, args: Option<Value>) -> RequestOutcome {
        let expectation = self.next(Operation::Fetch, args);
        self.play(expectation).await
    }

    async fn save(&self, data: Value) -> RequestOutcome {
        let expectation = self.next(Operation::Save, Some(data));
        self.play(expectation).await
    }

    async fn destroy(&self, id: Option<ModelId>) -> RequestOutcome {
        let expectation = self.next(Operation::Destroy, id.map(|id| id.to_value()));
        self.play(expectation).await
    }
}

/// Builder for one scripted store reply.
pub struct StoreExpectationBuilder {
    store: MockStore,
    operation: Operation,
    delay: Option<Duration>,
    standing: bool,
}

impl StoreExpectationBuilder {
    /// Holds the reply back for `delay`, leaving the request in flight.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(self, reply: Reply) {
        let expectation = StoreExpectation {
            operation: self.operation,
            reply,
            delay: self.delay,
        };
        let mut script = lock(&self.store.inner.script);
        if self.standing {
            script.stubs.insert(self.operation, expectation);
        } else {
            script.expectations.push_back(expectation);
        }
    }

    pub fn return_sync(self, data: Value) {
        self.push(Reply::Sync(data));
    }

    pub fn return_error(self, status: u16, body: impl Into<String>) {
        self.push(Reply::Error(status, body.into()));
    }

    pub fn return_timeout(self) {
        self.push(Reply::Timeout);
    }

    pub fn return_success(self) {
        self.push(Reply::Success);
    }

    pub fn return_abort(self) {
        self.push(Reply::Abort);
    }
}
