// src/client.rs
//! Entry point for the data-fetching layer.
//!
//! A [`ResilientClient`] is built once at application startup and handed to
//! whatever performs remote calls. It checks the cache first and only goes
//! through the breaker and retry layers on a miss.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStats, CacheStore};
use crate::config::ResilienceConfig;
use crate::error::Result;
use crate::resilience::{HealthSnapshot, ResilienceRegistry, ServiceClient};

#[derive(Debug, Clone)]
pub struct ResilientClient {
    registry: Arc<ResilienceRegistry>,
    cache: CacheStore,
}

impl ResilientClient {
    /// Validate `config` and build the registry and cache it describes
    pub fn new(config: ResilienceConfig) -> Result<Self> {
        let cache = CacheStore::new(config.cache.clone());
        let registry = Arc::new(ResilienceRegistry::new(config)?);
        Ok(Self { registry, cache })
    }

    pub fn from_parts(registry: Arc<ResilienceRegistry>, cache: CacheStore) -> Self {
        Self { registry, cache }
    }

    pub fn registry(&self) -> &Arc<ResilienceRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Serve `key` from the cache, or fetch it through `service`'s breaker
    /// under retry `policy` and cache the result for `ttl`.
    pub async fn fetch<T, F, Fut>(
        &self,
        key: &str,
        ttl: impl Into<Duration>,
        service: &str,
        policy: &str,
        operation: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.cache
            .get_or_fetch(key, ttl, || {
                self.registry.resilient_call(service, policy, operation)
            })
            .await
    }

    pub fn service(&self, service: &str, policy: &str) -> ServiceClient {
        self.registry.service(service, policy)
    }

    pub fn health(&self) -> HealthSnapshot {
        self.registry.health_status()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear_all();
    }
}
