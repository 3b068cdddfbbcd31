//! Loaders used by the preloader to fetch absent keys.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::CacheError;

/// Fetches the value behind a cache key for speculative preloading.
///
/// Implemented by whichever subsystem owns the underlying data for a cache
/// namespace. `Ok(None)` means the key has nothing to preload.
#[async_trait]
pub trait PreloadLoader: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Bytes>, CacheError>;
}

/// Routes keys to the loader owning their namespace.
///
/// The namespace is the part of the key before the first `:`. Keys with no
/// registered namespace go to the fallback loader, if any.
#[derive(Default, Clone)]
pub struct LoaderRegistry {
    namespaces: HashMap<String, Arc<dyn PreloadLoader>>,
    fallback: Option<Arc<dyn PreloadLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(
        mut self,
        namespace: impl Into<String>,
        loader: Arc<dyn PreloadLoader>,
    ) -> Self {
        self.namespaces.insert(namespace.into(), loader);
        self
    }

    pub fn with_fallback(mut self, loader: Arc<dyn PreloadLoader>) -> Self {
        self.fallback = Some(loader);
        self
    }

    pub fn namespace_of(key: &str) -> Option<&str> {
        key.split_once(':').map(|(ns, _)| ns)
    }

    fn route(&self, key: &str) -> Option<&Arc<dyn PreloadLoader>> {
        Self::namespace_of(key)
            .and_then(|ns| self.namespaces.get(ns))
            .or(self.fallback.as_ref())
    }
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut namespaces: Vec<&String> = self.namespaces.keys().collect();
        namespaces.sort();
        f.debug_struct("LoaderRegistry")
            .field("namespaces", &namespaces)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

#[async_trait]
impl PreloadLoader for LoaderRegistry {
    async fn load(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        match self.route(key) {
            Some(loader) => loader.load(key).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl PreloadLoader for Fixed {
        async fn load(&self, _key: &str) -> Result<Option<Bytes>, CacheError> {
            Ok(Some(Bytes::from_static(self.0.as_bytes())))
        }
    }

    #[tokio::test]
    async fn test_routes_by_namespace() {
        let registry = LoaderRegistry::new()
            .with_namespace("forecast", Arc::new(Fixed("f")))
            .with_namespace("report", Arc::new(Fixed("r")));

        assert_eq!(registry.load("forecast:AAPL").await.unwrap(), Some(Bytes::from_static(b"f")));
        assert_eq!(registry.load("report:q3").await.unwrap(), Some(Bytes::from_static(b"r")));
        assert_eq!(registry.load("other:x").await.unwrap(), None);
        assert_eq!(registry.load("no-namespace").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fallback_used_for_unknown_namespace() {
        let registry = LoaderRegistry::new()
            .with_namespace("forecast", Arc::new(Fixed("f")))
            .with_fallback(Arc::new(Fixed("fallback")));

        assert_eq!(
            registry.load("other:x").await.unwrap(),
            Some(Bytes::from_static(b"fallback"))
        );
    }
}
