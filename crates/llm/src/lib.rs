use std::sync::Arc;

mod mock;
mod model;
mod provider;
mod rig_adapter;

pub use mock::{MOCK_PROVIDER_ID, MockTransport};
pub use model::{
    CatalogCache, CatalogOrigin, DEFAULT_CATALOG_TTL, ModelCatalog, ModelDescriptor,
    static_models,
};
pub use provider::{
    BoxFuture, CompletionRequest, CompletionResponse, LlmProvider, ModelSource, ProviderConfig,
    Transport, TransportError, TransportResult,
};
pub use rig_adapter::{RIG_OPENAI_PROVIDER_ID, RigTransport};

/// Builds the provider named by `config.provider_id`.
///
/// A blank id selects the rig OpenAI-compatible transport.
pub fn create_provider(mut config: ProviderConfig) -> TransportResult<Arc<dyn LlmProvider>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "openai" | "openrouter" | "rig-openai" => {
            if config.provider_id == "rig-openai" {
                config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
            }
            Ok(Arc::new(RigTransport::new(config)?))
        }
        MOCK_PROVIDER_ID => Ok(Arc::new(MockTransport::new(static_models()))),
        _ => Err(TransportError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}

pub async fn fetch_models_for_provider(provider: &dyn LlmProvider) -> TransportResult<ModelCatalog> {
    provider.fetch_models().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_provider_by_id() {
        let provider = create_provider(ProviderConfig::new("", "sk-test", "")).unwrap();
        assert_eq!(provider.id(), RIG_OPENAI_PROVIDER_ID);

        let provider =
            create_provider(ProviderConfig::new("rig-openai", "sk-test", "")).unwrap();
        assert_eq!(provider.id(), RIG_OPENAI_PROVIDER_ID);

        let provider = create_provider(ProviderConfig::new(
            "openrouter",
            "sk-test",
            "https://openrouter.ai/api/v1",
        ))
        .unwrap();
        assert_eq!(provider.id(), "openrouter");

        let provider = create_provider(ProviderConfig::new("mock", "", "")).unwrap();
        assert_eq!(provider.id(), MOCK_PROVIDER_ID);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let result = create_provider(ProviderConfig::new("carrier-pigeon", "sk-test", ""));
        assert!(matches!(
            result,
            Err(TransportError::UnsupportedProvider { ref provider_id, .. }) if provider_id == "carrier-pigeon"
        ));
    }

    #[tokio::test]
    async fn mock_provider_serves_static_catalog() {
        let provider = create_provider(ProviderConfig::new("mock", "", "")).unwrap();
        let catalog = fetch_models_for_provider(provider.as_ref()).await.unwrap();

        assert_eq!(catalog.models.first().map(|model| model.id.as_str()), Some("anthropic/claude-3-opus"));
    }
}
