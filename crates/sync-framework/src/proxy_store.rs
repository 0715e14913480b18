//! # Proxy Store
//!
//! A [`JsonStore`] talking to the console's caching proxy. The first GET asks
//! for the proxy's cached copy (`useProxyCache=true`). A cached answer is
//! marked with an `ETag`: its body is published right away as a provisional
//! sync so views can render, then the resource is refetched without the flag
//! and that fresh answer is the outcome of the call.

use crate::json_store::{with_query, JsonStore, JsonStoreOptions, MethodTimeouts, Pagination};
use crate::model::ModelId;
use crate::store::{Operation, RequestOutcome, Store, StoreCore};
use crate::transport::Transport;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

pub const PROXY_CACHE_PARAM: &str = "useProxyCache";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const SLOW_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ProxyStore {
    json: JsonStore,
}

impl ProxyStore {
    pub fn new(transport: Arc<dyn Transport>, url: impl Into<String>) -> Self {
        let json = JsonStore::new(transport, url).with_options(JsonStoreOptions {
            timeouts: MethodTimeouts::uniform(DEFAULT_TIMEOUT),
            ..Default::default()
        });
        Self { json }
    }

    /// Replaces every option, timeouts included.
    pub fn with_options(mut self, options: JsonStoreOptions) -> Self {
        *self.json.options_mut() = options;
        self
    }

    /// For endpoints known to answer slowly.
    pub fn slow(mut self) -> Self {
        self.json.options_mut().timeouts = MethodTimeouts::uniform(SLOW_TIMEOUT);
        self
    }

    pub fn with_pagination(mut self, pagination: Arc<dyn Pagination>) -> Self {
        self.json = self.json.with_pagination(pagination);
        self
    }

    pub fn url(&self) -> &str {
        self.json.url()
    }

    pub fn options(&self) -> &JsonStoreOptions {
        self.json.options()
    }
}

#[async_trait]
impl Store for ProxyStore {
    fn core(&self) -> &StoreCore {
        self.json.core()
    }

    fn describe(&self) -> String {
        self.json.describe()
    }

    #[instrument(skip(self), fields(store = %self.json.url()))]
    async fn fetch(&self, args: Option<Value>) -> RequestOutcome {
        let url = self.json.fetch_url(&args);
        let cached_url = with_query(&url, &[(PROXY_CACHE_PARAM, "true")]);
        let (cached, response) = match self.json.fetch_pages(&cached_url).await {
            Ok(page) => page,
            Err(exchange) => return self.json.fail(Operation::Fetch, exchange),
        };
        if response.header("etag").is_none() {
            return self.publish(&cached, Operation::Fetch, true);
        }

        debug!("Publishing cached copy before refetch");
        self.publish_provisional(&cached, Operation::Fetch, true);
        match self.json.fetch_pages(&url).await {
            Ok((fresh, _)) => self.publish(&fresh, Operation::Fetch, true),
            Err(exchange) => self.json.fail(Operation::Fetch, exchange),
        }
    }

    async fn save(&self, data: Value) -> RequestOutcome {
        self.json.save(data).await
    }

    async fn destroy(&self, id: Option<ModelId>) -> RequestOutcome {
        self.json.destroy(id).await
    }

    fn parse(&self, raw: &Value, with_removal: bool) -> Option<Value> {
        self.json.parse(raw, with_removal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::store::StoreEvent;
    use crate::transport::{Method, Response};
    use serde_json::json;
    use std::sync::Mutex;

    #[tokio::test]
    async fn etag_triggers_refetch_without_cache_flag() {
        let transport = MockTransport::new();
        transport
            .expect(Method::Get, "https://console/proxy/servers?useProxyCache=true")
            .respond_with(Response::new(200, json!([{"id": 1}]).to_string()).with_header("ETag", "\"v1\""));
        transport
            .expect(Method::Get, "https://console/proxy/servers")
            .respond(200, json!([{"id": 1}, {"id": 2}]));

        let store = ProxyStore::new(Arc::new(transport.clone()), "https://console/proxy/servers");
        let synced = Arc::new(Mutex::new(Vec::new()));
        let sink = synced.clone();
        store.events().listen(move |event: &StoreEvent| {
            if let StoreEvent::Synced {
                data, provisional, ..
            } = event
            {
                sink.lock().unwrap().push((data.clone(), *provisional));
            }
        });

        assert_eq!(store.fetch(None).await, RequestOutcome::Synced);
        assert_eq!(
            *synced.lock().unwrap(),
            vec![(json!([{"id": 1}]), true), (json!([{"id": 1}, {"id": 2}]), false)]
        );
        transport.verify();
    }

    #[tokio::test]
    async fn fresh_answer_is_published_once() {
        let transport = MockTransport::new();
        transport
            .expect(Method::Get, "https://console/proxy/servers?useProxyCache=true")
            .respond(200, json!([]));
        let store = ProxyStore::new(Arc::new(transport.clone()), "https://console/proxy/servers");

        assert_eq!(store.fetch(None).await, RequestOutcome::Synced);
        assert_eq!(transport.requests()[0].timeout, DEFAULT_TIMEOUT);
        transport.verify();
    }

    #[tokio::test]
    async fn slow_store_uses_longer_timeout_and_hierarchical_ids() {
        let transport = MockTransport::new();
        transport
            .expect(Method::Delete, "https://console/proxy/files/photos/cat.jpg")
            .respond(204, "");
        let store = ProxyStore::new(Arc::new(transport.clone()), "https://console/proxy/files").slow();

        let outcome = store.destroy(Some(ModelId::from("photos/cat.jpg"))).await;
        assert_eq!(outcome, RequestOutcome::Success);
        assert_eq!(transport.requests()[0].timeout, SLOW_TIMEOUT);
    }
}
