//! # JSON/HTTP Store
//!
//! [`JsonStore`] implements the [`Store`] contract over a [`Transport`]:
//!
//! - `fetch` issues a GET (looping over pages when a [`Pagination`] is set,
//!   deep-merging every page before one terminal `Synced`);
//! - `save` POSTs a new resource or PUTs `<url>/<id>` for an existing one;
//! - `destroy` DELETEs `<url>/<id>`.
//!
//! Mutating verbs carry the CSRF token as `csrfmiddlewaretoken`. Timeouts are
//! retried up to `retries` times before `Timeout` is dispatched. A status 0
//! response or a transport abort is swallowed.

use crate::model::ModelId;
use crate::store::{Operation, RequestOutcome, Store, StoreCore, StoreFailure};
use crate::transport::{Method, Request, Response, Transport, TransportError};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub const CSRF_FIELD: &str = "csrfmiddlewaretoken";

/// Upper bound on pages followed by one fetch.
pub const MAX_PAGES: usize = 1000;

/// Characters left as-is in an id path segment.
const ID_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Per-method timeout thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MethodTimeouts {
    pub fetch: Duration,
    pub save: Duration,
    pub destroy: Duration,
}

impl MethodTimeouts {
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            fetch: timeout,
            save: timeout,
            destroy: timeout,
        }
    }

    pub fn for_method(&self, method: Method) -> Duration {
        match method {
            Method::Get => self.fetch,
            Method::Delete => self.destroy,
            Method::Post | Method::Put | Method::Patch => self.save,
        }
    }
}

impl Default for MethodTimeouts {
    fn default() -> Self {
        Self::uniform(Duration::from_secs(30))
    }
}

#[derive(Debug, Clone, Default)]
pub struct JsonStoreOptions {
    pub csrf_token: Option<String>,
    pub timeouts: MethodTimeouts,
    /// Extra attempts after a timeout.
    pub retries: u32,
    /// When set, `parse` extracts this key from object payloads.
    pub root_key: Option<String>,
}

/// Paging hooks for list endpoints.
pub trait Pagination: Send + Sync {
    /// Whether another page follows `body`.
    fn should_fetch_next_page(&self, body: &Value) -> bool;

    /// The marker identifying the next page, read from `body`.
    fn page_marker(&self, body: &Value) -> Option<String>;

    /// The URL of the page after `marker`.
    fn page_url(&self, base_url: &str, marker: &str) -> String;
}

/// Marker pagination: keeps paging while a page is full, using the `id` of
/// its last entry as the `marker` query parameter.
#[derive(Debug, Clone)]
pub struct MarkerPagination {
    pub list_key: String,
    pub limit: usize,
}

impl MarkerPagination {
    pub fn new(list_key: impl Into<String>, limit: usize) -> Self {
        Self {
            list_key: list_key.into(),
            limit,
        }
    }

    fn entries<'a>(&self, body: &'a Value) -> Option<&'a Vec<Value>> {
        body.get(&self.list_key).and_then(Value::as_array)
    }
}

impl Pagination for MarkerPagination {
    fn should_fetch_next_page(&self, body: &Value) -> bool {
        self.entries(body)
            .map(|entries| self.limit > 0 && entries.len() >= self.limit)
            .unwrap_or(false)
    }

    fn page_marker(&self, body: &Value) -> Option<String> {
        let last = self.entries(body)?.last()?;
        ModelId::from_value(last.get("id")?).map(|id| id.to_string())
    }

    fn page_url(&self, base_url: &str, marker: &str) -> String {
        with_query(base_url, &[("limit", &self.limit.to_string()), ("marker", marker)])
    }
}

/// Merges `page` into `target`: objects recursively, arrays by
/// concatenation, anything else by overwrite.
pub fn deep_merge(target: &mut Value, page: Value) {
    match (target, page) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(existing), Value::Array(incoming)) => existing.extend(incoming),
        (slot, value) => *slot = value,
    }
}

/// Appends an id as a path segment, keeping `/` in hierarchical ids.
pub fn append_id(url: &str, id: &ModelId) -> String {
    let encoded = utf8_percent_encode(&id.to_string(), ID_SEGMENT)
        .to_string()
        .replace("%2F", "/");
    format!("{}/{}", url.trim_end_matches('/'), encoded)
}

/// Appends query pairs to a URL, keeping any existing query.
pub fn with_query(url: &str, pairs: &[(&str, &str)]) -> String {
    if pairs.is_empty() {
        return url.to_string();
    }
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().extend_pairs(pairs.iter().copied());
            parsed.to_string()
        }
        // Relative URLs cannot be parsed on their own.
        Err(_) => {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            serializer.extend_pairs(pairs.iter().copied());
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{}{}{}", url, separator, serializer.finish())
        }
    }
}

/// Flattens fetch arguments (`{"status": "ACTIVE"}`) into query pairs.
pub(crate) fn query_pairs(args: &Option<Value>) -> Vec<(String, String)> {
    let Some(Value::Object(args)) = args else {
        return Vec::new();
    };
    args.iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Result of one transport exchange, after retries.
pub(crate) enum Exchange {
    Response(Response),
    Timeout,
    Aborted,
    Failed(String),
}

/// HTTP-backed JSON store.
pub struct JsonStore {
    core: StoreCore,
    transport: Arc<dyn Transport>,
    url: String,
    options: JsonStoreOptions,
    pagination: Option<Arc<dyn Pagination>>,
}

impl JsonStore {
    pub fn new(transport: Arc<dyn Transport>, url: impl Into<String>) -> Self {
        Self {
            core: StoreCore::new(),
            transport,
            url: url.into(),
            options: JsonStoreOptions::default(),
            pagination: None,
        }
    }

    pub fn with_options(mut self, options: JsonStoreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_pagination(mut self, pagination: Arc<dyn Pagination>) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn options(&self) -> &JsonStoreOptions {
        &self.options
    }

    pub(crate) fn options_mut(&mut self) -> &mut JsonStoreOptions {
        &mut self.options
    }

    /// Sends a request, retrying timeouts.
    pub(crate) async fn exchange(&self, method: Method, url: &str, body: Option<Value>) -> Exchange {
        let body = self.with_csrf(method, body);
        let attempts = self.options.retries + 1;
        for attempt in 1..=attempts {
            let mut request = Request::new(method, url, self.options.timeouts.for_method(method));
            if let Some(body) = &body {
                request = request.with_body(body.clone());
            }
            match self.transport.send(request).await {
                Ok(response) if response.status == 0 => {
                    debug!(%url, "Status 0 response, treating as abort");
                    return Exchange::Aborted;
                }
                Ok(response) => return Exchange::Response(response),
                Err(TransportError::Aborted) => return Exchange::Aborted,
                Err(TransportError::Timeout) => {
                    warn!(%url, attempt, attempts, "Request timed out");
                }
                Err(TransportError::Network(message)) => {
                    warn!(%url, error = %message, "Network failure");
                    return Exchange::Failed(message);
                }
            }
        }
        Exchange::Timeout
    }

    fn with_csrf(&self, method: Method, body: Option<Value>) -> Option<Value> {
        let token = match (&self.options.csrf_token, method.is_mutating()) {
            (Some(token), true) => token.clone(),
            _ => return body,
        };
        let mut object = match body {
            Some(Value::Object(object)) => object,
            Some(other) => {
                let mut wrapper = Map::new();
                wrapper.insert("data".to_string(), other);
                wrapper
            }
            None => Map::new(),
        };
        object.insert(CSRF_FIELD.to_string(), Value::String(token));
        Some(Value::Object(object))
    }

    /// GETs `url` and every following page, merged into one body. A marker
    /// seen twice, or more than [`MAX_PAGES`] pages, fails the fetch.
    pub(crate) async fn fetch_pages(&self, url: &str) -> Result<(Value, Response), Exchange> {
        let mut merged: Option<Value> = None;
        let mut next_url = url.to_string();
        let mut seen: HashSet<String> = HashSet::new();
        loop {
            let response = match self.exchange(Method::Get, &next_url, None).await {
                Exchange::Response(response) if response.is_success() => response,
                other => return Err(other),
            };
            let page = response.json().unwrap_or(Value::Null);
            let marker = self.pagination.as_ref().and_then(|pagination| {
                if pagination.should_fetch_next_page(&page) {
                    pagination.page_marker(&page)
                } else {
                    None
                }
            });
            match merged.as_mut() {
                Some(merged) => deep_merge(merged, page),
                None => merged = Some(page),
            }
            match (marker, &self.pagination) {
                (Some(marker), Some(pagination)) => {
                    if seen.len() + 1 >= MAX_PAGES {
                        return Err(Exchange::Failed(format!("more than {MAX_PAGES} pages")));
                    }
                    if !seen.insert(marker.clone()) {
                        return Err(Exchange::Failed(format!("page marker {marker} repeated")));
                    }
                    debug!(%url, %marker, "Fetching next page");
                    next_url = pagination.page_url(url, &marker);
                }
                _ => return Ok((merged.unwrap_or(Value::Null), response)),
            }
        }
    }

    /// Converts a failed exchange into the matching outcome and event.
    pub(crate) fn fail(&self, operation: Operation, exchange: Exchange) -> RequestOutcome {
        let outcome = match exchange {
            Exchange::Response(response) => RequestOutcome::Error(StoreFailure::new(
                operation,
                response.status,
                response.body,
            )),
            Exchange::Timeout => RequestOutcome::Timeout,
            Exchange::Aborted => RequestOutcome::Aborted,
            Exchange::Failed(message) => {
                RequestOutcome::Error(StoreFailure::new(operation, 0, message))
            }
        };
        if let RequestOutcome::Error(failure) = &outcome {
            warn!(store = %self.url, status = failure.status, "Request failed");
        }
        self.publish_outcome(operation, outcome)
    }

    pub(crate) fn fetch_url(&self, args: &Option<Value>) -> String {
        let pairs = query_pairs(args);
        let pairs: Vec<(&str, &str)> = pairs
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        with_query(&self.url, &pairs)
    }
}

#[async_trait]
impl Store for JsonStore {
    fn core(&self) -> &StoreCore {
        &self.core
    }

    fn describe(&self) -> String {
        self.url.clone()
    }

    #[instrument(skip(self), fields(store = %self.url))]
    async fn fetch(&self, args: Option<Value>) -> RequestOutcome {
        let url = self.fetch_url(&args);
        match self.fetch_pages(&url).await {
            Ok((body, _)) => {
                info!("Fetched");
                self.publish(&body, Operation::Fetch, true)
            }
            Err(exchange) => self.fail(Operation::Fetch, exchange),
        }
    }

    #[instrument(skip(self, data), fields(store = %self.url))]
    async fn save(&self, data: Value) -> RequestOutcome {
        let id = data.get("id").and_then(ModelId::from_value);
        let (method, url) = match &id {
            Some(id) => (Method::Put, append_id(&self.url, id)),
            None => (Method::Post, self.url.clone()),
        };
        debug!(%method, %url, "Saving");
        let response = match self.exchange(method, &url, Some(data)).await {
            Exchange::Response(response) if response.is_success() => response,
            other => return self.fail(Operation::Save, other),
        };
        match response.json() {
            Some(body) => self.publish(&body, Operation::Save, false),
            None => match response.header("location").and_then(last_segment) {
                Some(created) => {
                    let mut body = Map::new();
                    body.insert("id".to_string(), Value::String(created));
                    self.publish(&Value::Object(body), Operation::Save, false)
                }
                None => self.publish_outcome(Operation::Save, RequestOutcome::Success),
            },
        }
    }

    #[instrument(skip(self), fields(store = %self.url))]
    async fn destroy(&self, id: Option<ModelId>) -> RequestOutcome {
        let url = match &id {
            Some(id) => append_id(&self.url, id),
            None => self.url.clone(),
        };
        match self.exchange(Method::Delete, &url, None).await {
            Exchange::Response(response) if response.is_success() => {
                info!(%url, "Destroyed");
                self.publish_outcome(Operation::Destroy, RequestOutcome::Success)
            }
            other => self.fail(Operation::Destroy, other),
        }
    }

    fn parse(&self, raw: &Value, _with_removal: bool) -> Option<Value> {
        extract_root(raw, self.options.root_key.as_deref())
    }
}

pub(crate) fn extract_root(raw: &Value, root_key: Option<&str>) -> Option<Value> {
    match root_key {
        Some(key) => match raw.get(key) {
            Some(inner) => Some(inner.clone()),
            None => Some(raw.clone()),
        },
        None => Some(raw.clone()),
    }
}

fn last_segment(location: &str) -> Option<String> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::store::StoreEvent;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder(store: &dyn Store) -> Arc<Mutex<Vec<StoreEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        store
            .events()
            .listen(move |event: &StoreEvent| sink.lock().unwrap().push(event.clone()));
        events
    }

    #[test]
    fn deep_merge_concatenates_lists() {
        let mut target = json!({"servers": [{"id": 1}], "meta": {"page": 1, "total": 3}});
        deep_merge(
            &mut target,
            json!({"servers": [{"id": 2}], "meta": {"page": 2}}),
        );
        assert_eq!(
            target,
            json!({"servers": [{"id": 1}, {"id": 2}], "meta": {"page": 2, "total": 3}})
        );
    }

    #[test]
    fn append_id_keeps_slashes() {
        let id = ModelId::from("photos/2024/cat 1.jpg");
        assert_eq!(
            append_id("https://api/files/", &id),
            "https://api/files/photos/2024/cat%201.jpg"
        );
    }

    #[tokio::test]
    async fn fetch_publishes_root_key_payload() {
        let transport = MockTransport::new();
        transport
            .expect(Method::Get, "https://api/servers")
            .respond(200, json!({"servers": [{"id": "a"}]}));

        let store = JsonStore::new(Arc::new(transport.clone()), "https://api/servers").with_options(
            JsonStoreOptions {
                root_key: Some("servers".into()),
                ..Default::default()
            },
        );
        let events = recorder(&store);

        assert_eq!(store.fetch(None).await, RequestOutcome::Synced);
        assert_eq!(
            events.lock().unwrap()[0],
            StoreEvent::Synced {
                data: json!([{"id": "a"}]),
                operation: Operation::Fetch,
                with_removal: true,
                provisional: false,
            }
        );
        transport.verify();
    }

    #[tokio::test]
    async fn save_injects_csrf_and_routes_by_id() {
        let transport = MockTransport::new();
        transport
            .expect(Method::Post, "https://api/servers")
            .respond(202, "");
        transport
            .expect(Method::Put, "https://api/servers/7")
            .respond(200, json!({"id": 7, "name": "renamed"}));

        let store = JsonStore::new(Arc::new(transport.clone()), "https://api/servers").with_options(
            JsonStoreOptions {
                csrf_token: Some("tok".into()),
                ..Default::default()
            },
        );

        assert_eq!(store.save(json!({"name": "web"})).await, RequestOutcome::Success);
        assert_eq!(
            store.save(json!({"id": 7, "name": "renamed"})).await,
            RequestOutcome::Synced
        );

        let sent = transport.requests();
        assert_eq!(sent[0].body, Some(json!({"name": "web", "csrfmiddlewaretoken": "tok"})));
        assert_eq!(
            sent[1].body,
            Some(json!({"id": 7, "name": "renamed", "csrfmiddlewaretoken": "tok"}))
        );
        transport.verify();
    }

    #[tokio::test]
    async fn created_location_header_becomes_id() {
        let transport = MockTransport::new();
        transport.expect(Method::Post, "https://api/volumes").respond_with(
            Response::new(201, "").with_header("Location", "https://api/volumes/vol-9"),
        );
        let store = JsonStore::new(Arc::new(transport.clone()), "https://api/volumes");
        let events = recorder(&store);

        assert_eq!(store.save(json!({"size": 100})).await, RequestOutcome::Synced);
        assert!(matches!(
            &events.lock().unwrap()[0],
            StoreEvent::Synced { data, .. } if data == &json!({"id": "vol-9"})
        ));
    }

    #[tokio::test]
    async fn timeouts_are_retried_then_reported() {
        let transport = MockTransport::new();
        transport.expect(Method::Get, "https://api/servers").timeout();
        transport.expect(Method::Get, "https://api/servers").timeout();
        let store = JsonStore::new(Arc::new(transport.clone()), "https://api/servers").with_options(
            JsonStoreOptions {
                retries: 1,
                ..Default::default()
            },
        );
        let events = recorder(&store);

        assert_eq!(store.fetch(None).await, RequestOutcome::Timeout);
        assert_eq!(
            *events.lock().unwrap(),
            vec![StoreEvent::Timeout {
                operation: Operation::Fetch
            }]
        );
        transport.verify();
    }

    #[tokio::test]
    async fn aborted_requests_are_swallowed() {
        let transport = MockTransport::new();
        transport.expect(Method::Get, "https://api/servers").respond(0, "");
        transport.expect(Method::Delete, "https://api/servers/1").abort();
        let store = JsonStore::new(Arc::new(transport.clone()), "https://api/servers");
        let events = recorder(&store);

        assert_eq!(store.fetch(None).await, RequestOutcome::Aborted);
        assert_eq!(
            store.destroy(Some(ModelId::from(1))).await,
            RequestOutcome::Aborted
        );
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn error_status_dispatches_failure() {
        let transport = MockTransport::new();
        transport
            .expect(Method::Get, "https://api/servers")
            .respond(503, "down");
        let store = JsonStore::new(Arc::new(transport.clone()), "https://api/servers");

        let outcome = store.fetch(None).await;
        let failure = outcome.failure().expect("expected failure");
        assert_eq!(failure.status, 503);
        assert_eq!(failure.message(), crate::store::MESSAGE_SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn pages_are_merged_before_one_sync() {
        let transport = MockTransport::new();
        transport
            .expect(Method::Get, "https://api/servers")
            .respond(200, json!({"servers": [{"id": "a"}, {"id": "b"}]}));
        transport
            .expect(Method::Get, "https://api/servers?limit=2&marker=b")
            .respond(200, json!({"servers": [{"id": "c"}]}));

        let store = JsonStore::new(Arc::new(transport.clone()), "https://api/servers")
            .with_options(JsonStoreOptions {
                root_key: Some("servers".into()),
                ..Default::default()
            })
            .with_pagination(Arc::new(MarkerPagination::new("servers", 2)));
        let events = recorder(&store);

        assert_eq!(store.fetch(None).await, RequestOutcome::Synced);
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            StoreEvent::Synced { data, .. } if data == &json!([{"id": "a"}, {"id": "b"}, {"id": "c"}])
        ));
        transport.verify();
    }

    #[tokio::test]
    async fn repeated_marker_fails_the_fetch() {
        let transport = MockTransport::new();
        transport
            .expect(Method::Get, "https://api/servers")
            .respond(200, json!({"servers": [{"id": "a"}, {"id": "b"}]}));
        transport
            .expect(Method::Get, "https://api/servers?limit=2&marker=b")
            .respond(200, json!({"servers": [{"id": "a"}, {"id": "b"}]}));

        let store = JsonStore::new(Arc::new(transport.clone()), "https://api/servers")
            .with_pagination(Arc::new(MarkerPagination::new("servers", 2)));
        let events = recorder(&store);

        let outcome = store.fetch(None).await;
        let failure = outcome.failure().expect("expected failure");
        assert_eq!(failure.status, 0);
        assert!(failure.body.contains("repeated"));
        assert!(matches!(events.lock().unwrap().as_slice(), [StoreEvent::Error(_)]));
        transport.verify();
    }

    #[tokio::test]
    async fn fetch_args_become_query() {
        let transport = MockTransport::new();
        transport
            .expect(Method::Get, "https://api/servers?status=ACTIVE")
            .respond(200, json!([]));
        let store = JsonStore::new(Arc::new(transport.clone()), "https://api/servers");

        store.fetch(Some(json!({"status": "ACTIVE"}))).await;
        transport.verify();
    }
}
