use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Read-only reference data describing one addressable model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub context_length: u64,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            context_length: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id)
    }

    pub fn with_context_length(mut self, context_length: u64) -> Self {
        self.context_length = context_length;
        self
    }
}

/// Where a catalog came from, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogOrigin {
    Live,
    Cached,
    Stale,
    Builtin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalog {
    pub models: Vec<ModelDescriptor>,
    pub origin: CatalogOrigin,
    /// Why a degraded origin was served.
    pub warning: Option<String>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelDescriptor>, origin: CatalogOrigin) -> Self {
        Self {
            models,
            origin,
            warning: None,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }
}

pub const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(60 * 60);

/// Last model list fetched from one endpoint.
///
/// Each transport owns its own, so two configurations never share entries
/// even when they use the same provider id.
pub struct CatalogCache {
    ttl: Duration,
    last: RwLock<Option<(Instant, Vec<ModelDescriptor>)>>,
}

impl CatalogCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last: RwLock::new(None),
        }
    }

    /// Models fetched within the TTL.
    pub async fn fresh(&self) -> Option<Vec<ModelDescriptor>> {
        let last = self.last.read().await;
        last.as_ref()
            .filter(|(fetched_at, _)| fetched_at.elapsed() < self.ttl)
            .map(|(_, models)| models.clone())
    }

    /// Whatever was fetched last, however old.
    pub async fn last_known(&self) -> Option<Vec<ModelDescriptor>> {
        self.last.read().await.as_ref().map(|(_, models)| models.clone())
    }

    pub async fn store(&self, models: Vec<ModelDescriptor>) {
        *self.last.write().await = Some((Instant::now(), models));
    }
}

/// Catalog served when no provider is reachable or configured.
pub fn static_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new("anthropic/claude-3-opus", "Claude 3 Opus").with_context_length(200_000),
        ModelDescriptor::new("anthropic/claude-3-sonnet", "Claude 3 Sonnet")
            .with_context_length(180_000),
        ModelDescriptor::new("google/gemini-1.5-pro", "Gemini 1.5 Pro")
            .with_context_length(1_000_000),
        ModelDescriptor::new("openai/gpt-4o", "GPT-4o").with_context_length(128_000),
        ModelDescriptor::new("meta-llama/llama-3-70b-instruct", "Llama 3 70B")
            .with_context_length(8_192),
        ModelDescriptor::new("mistralai/mistral-large", "Mistral Large").with_context_length(32_768),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_catalog_is_only_last_known() {
        let cache = CatalogCache::new(Duration::ZERO);
        assert_eq!(cache.last_known().await, None);

        cache.store(vec![ModelDescriptor::from_id("a/b")]).await;
        assert_eq!(cache.fresh().await, None);
        assert_eq!(
            cache.last_known().await,
            Some(vec![ModelDescriptor::from_id("a/b")])
        );
    }

    #[tokio::test]
    async fn store_replaces_previous_catalog() {
        let cache = CatalogCache::new(DEFAULT_CATALOG_TTL);
        cache.store(vec![ModelDescriptor::from_id("a/b")]).await;
        cache.store(static_models()).await;

        let models = cache.fresh().await.unwrap_or_default();
        assert_eq!(models, static_models());
    }

    #[test]
    fn builtin_catalog_matches_offline_list() {
        let models = static_models();
        assert_eq!(models.len(), 6);
        assert_eq!(models[0].id, "anthropic/claude-3-opus");
        assert!(models.iter().all(|model| model.context_length > 0));

        let catalog = ModelCatalog::new(models, CatalogOrigin::Builtin).with_warning("offline");
        assert_eq!(catalog.warning.as_deref(), Some("offline"));
    }
}
