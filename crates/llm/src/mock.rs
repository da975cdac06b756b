use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use snafu::ensure;

use super::model::{CatalogOrigin, ModelCatalog, ModelDescriptor};
use super::provider::{
    BoxFuture, CompletionRequest, CompletionResponse, EmptyContentSnafu, LlmProvider, ModelSource,
    Transport, TransportResult,
};

pub const MOCK_PROVIDER_ID: &str = "mock";

/// Offline transport used when no API key is configured.
///
/// Replies after a simulated latency of `base_latency` plus a jitter derived from
/// the request, and reports the model's display name as the producing model.
pub struct MockTransport {
    models: Vec<ModelDescriptor>,
    base_latency: Duration,
    max_jitter: Duration,
}

impl MockTransport {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self {
            models,
            base_latency: Duration::from_millis(1_000),
            max_jitter: Duration::from_millis(2_000),
        }
    }

    pub fn with_latency(mut self, base_latency: Duration, max_jitter: Duration) -> Self {
        self.base_latency = base_latency;
        self.max_jitter = max_jitter;
        self
    }

    pub fn instant(models: Vec<ModelDescriptor>) -> Self {
        Self::new(models).with_latency(Duration::ZERO, Duration::ZERO)
    }

    fn display_name(&self, model_id: &str) -> String {
        self.models
            .iter()
            .find(|model| model.id == model_id)
            .map(|model| model.name.clone())
            .unwrap_or_else(|| model_id.to_string())
    }

    fn latency_for(&self, request: &CompletionRequest) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.base_latency;
        }

        let mut hasher = DefaultHasher::new();
        request.model_id.hash(&mut hasher);
        request.content.hash(&mut hasher);
        self.base_latency + Duration::from_millis(hasher.finish() % jitter_ms)
    }

    pub fn reply_text(model_name: &str, content: &str) -> String {
        format!("This is a response from {model_name}:\n\nAnswering about {content}. This is mock data.")
    }
}

impl Transport for MockTransport {
    fn complete<'a>(
        &'a self,
        request: CompletionRequest,
    ) -> BoxFuture<'a, TransportResult<CompletionResponse>> {
        Box::pin(async move {
            ensure!(
                !request.content.trim().is_empty(),
                EmptyContentSnafu {
                    stage: "mock-complete-validate",
                    model_id: request.model_id.clone(),
                }
            );

            let latency = self.latency_for(&request);
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            let model_name = self.display_name(&request.model_id);
            tracing::debug!(
                model_id = %request.model_id,
                latency_ms = latency.as_millis() as u64,
                has_system_prompt = request.system_prompt.is_some(),
                "serving mock completion"
            );

            Ok(CompletionResponse::new(
                Self::reply_text(&model_name, &request.content),
                model_name,
            ))
        })
    }
}

impl ModelSource for MockTransport {
    fn fetch_models<'a>(&'a self) -> BoxFuture<'a, TransportResult<ModelCatalog>> {
        Box::pin(async move {
            Ok(ModelCatalog::new(self.models.clone(), CatalogOrigin::Builtin)
                .with_warning("no API key configured; serving mock models"))
        })
    }
}

impl LlmProvider for MockTransport {
    fn id(&self) -> &str {
        MOCK_PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::static_models;
    use crate::provider::TransportError;

    #[tokio::test]
    async fn replies_with_display_name() {
        let transport = MockTransport::instant(static_models());

        let response = transport
            .complete(CompletionRequest::new("tea", "openai/gpt-4o"))
            .await
            .unwrap();

        assert_eq!(response.model_id, "GPT-4o");
        assert_eq!(response.content, MockTransport::reply_text("GPT-4o", "tea"));
    }

    #[tokio::test]
    async fn unknown_model_falls_back_to_id() {
        let transport = MockTransport::instant(Vec::new());

        let response = transport
            .complete(CompletionRequest::new("tea", "vendor/unlisted"))
            .await
            .unwrap();

        assert_eq!(response.model_id, "vendor/unlisted");
    }

    #[tokio::test]
    async fn rejects_blank_content() {
        let transport = MockTransport::instant(static_models());

        let error = transport
            .complete(CompletionRequest::new(" \n", "openai/gpt-4o"))
            .await
            .unwrap_err();

        assert!(matches!(error, TransportError::EmptyContent { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn latency_stays_within_configured_window() {
        let transport = MockTransport::new(static_models())
            .with_latency(Duration::from_millis(100), Duration::from_millis(50));
        let request = CompletionRequest::new("tea", "openai/gpt-4o");

        let latency = transport.latency_for(&request);
        assert!(latency >= Duration::from_millis(100));
        assert!(latency < Duration::from_millis(150));

        let started = tokio::time::Instant::now();
        transport.complete(request).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn catalog_is_builtin() {
        let catalog = MockTransport::instant(static_models())
            .fetch_models()
            .await
            .unwrap();

        assert_eq!(catalog.origin, CatalogOrigin::Builtin);
        assert_eq!(catalog.models, static_models());
    }
}
