//! # Store Factory
//!
//! Decides which store backs a provider's resource. Production wiring goes
//! through the console's caching proxy; tests hand in a closure returning
//! [`MockStore`](sync_framework::mock::MockStore)s.

use crate::catalog::ResourceClass;
use crate::config::ConsoleConfig;
use crate::provider::ProviderKey;
use std::sync::Arc;
use sync_framework::json_store::MethodTimeouts;
use sync_framework::{JsonStoreOptions, MarkerPagination, ProxyStore, Store, Transport};
use tracing::debug;

pub trait StoreFactory: Send + Sync {
    fn store_for(&self, provider: &ProviderKey, class: &ResourceClass) -> Arc<dyn Store>;
}

impl<F> StoreFactory for F
where
    F: Fn(&ProviderKey, &ResourceClass) -> Arc<dyn Store> + Send + Sync,
{
    fn store_for(&self, provider: &ProviderKey, class: &ResourceClass) -> Arc<dyn Store> {
        self(provider, class)
    }
}

/// Builds [`ProxyStore`]s at `<base>/proxy/<type>/<region>/<path>`.
pub struct ProxyStoreFactory {
    transport: Arc<dyn Transport>,
    config: ConsoleConfig,
}

impl ProxyStoreFactory {
    pub fn new(transport: Arc<dyn Transport>, config: ConsoleConfig) -> Self {
        Self { transport, config }
    }

    pub fn url_for(&self, provider: &ProviderKey, class: &ResourceClass) -> String {
        let mut url = format!(
            "{}/proxy/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            provider.service_type,
            provider.region
        );
        let path = class.path().trim_matches('/');
        if !path.is_empty() {
            url.push('/');
            url.push_str(path);
        }
        url
    }
}

impl StoreFactory for ProxyStoreFactory {
    fn store_for(&self, provider: &ProviderKey, class: &ResourceClass) -> Arc<dyn Store> {
        let url = self.url_for(provider, class);
        let timeout = if class.is_slow() {
            self.config.slow_timeout()
        } else {
            self.config.fetch_timeout()
        };
        debug!(%provider, class = class.name(), %url, "Creating proxy store");
        let mut store = ProxyStore::new(self.transport.clone(), url).with_options(JsonStoreOptions {
            csrf_token: self.config.csrf_token.clone(),
            timeouts: MethodTimeouts::uniform(timeout),
            retries: self.config.retries,
            root_key: class.root_key().map(str::to_string),
        });
        if let (Some(limit), Some(root_key)) = (class.page_limit(), class.root_key()) {
            store = store.with_pagination(Arc::new(MarkerPagination::new(root_key, limit)));
        }
        Arc::new(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use std::time::Duration;
    use sync_framework::mock::MockTransport;

    fn key() -> ProviderKey {
        ProviderKey {
            service_type: "compute".into(),
            service_name: "cloudServers".into(),
            region: "ORD".into(),
        }
    }

    #[test]
    fn urls_follow_the_proxy_layout() {
        let config = ConsoleConfig {
            base_url: "https://console/".into(),
            ..Default::default()
        };
        let factory = ProxyStoreFactory::new(Arc::new(MockTransport::new()), config);
        let catalog = Catalog::standard(Duration::from_secs(60));

        let servers = catalog.class("server").unwrap();
        assert_eq!(
            factory.url_for(&key(), &servers),
            "https://console/proxy/compute/ORD/servers/detail"
        );
        let containers = catalog.class("container").unwrap();
        assert_eq!(factory.url_for(&key(), &containers), "https://console/proxy/compute/ORD");
    }

    #[test]
    fn store_describes_its_url() {
        let factory = ProxyStoreFactory::new(Arc::new(MockTransport::new()), ConsoleConfig::default());
        let catalog = Catalog::standard(Duration::from_secs(60));
        let store = factory.store_for(&key(), &catalog.class("flavor").unwrap());
        assert!(store.describe().ends_with("/proxy/compute/ORD/flavors/detail"));
    }
}
