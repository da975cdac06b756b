use rig::completion::{CompletionModel, Message as RigMessage};
use rig::http_client::{self, HttpClientExt, NoBody};
use rig::message::AssistantContent;
use rig::prelude::CompletionClient;
use rig::providers::openai;
use serde::Deserialize;
use snafu::{ResultExt, ensure};

use super::model::{CatalogCache, CatalogOrigin, ModelCatalog, ModelDescriptor, static_models};
use super::provider::{
    BoxFuture, CompletionRequest, CompletionResponse, CompletionsFailedSnafu,
    EmptyCompletionSnafu, EmptyContentSnafu, HttpClientSnafu, LlmProvider, MissingApiKeySnafu,
    ModelFetchStatusSnafu, ModelPayloadEmptySnafu, ModelPayloadParseSnafu, ModelSource,
    ProviderConfig, TimeoutSnafu, Transport, TransportError, TransportResult,
};

pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";

#[derive(Debug, Deserialize)]
struct ModelListPayload {
    data: Vec<ModelListEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelListEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    context_length: Option<u64>,
}

/// OpenAI-compatible transport (OpenAI, OpenRouter, local gateways) built on rig.
pub struct RigTransport {
    config: ProviderConfig,
    fallback_models: Vec<ModelDescriptor>,
    catalog: CatalogCache,
}

impl RigTransport {
    pub fn new(config: ProviderConfig) -> TransportResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-transport-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self {
            catalog: CatalogCache::new(config.catalog_ttl),
            config,
            fallback_models: static_models(),
        })
    }

    fn build_client(config: &ProviderConfig) -> TransportResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    async fn fetch_models_from_provider(&self) -> TransportResult<Vec<ModelDescriptor>> {
        let client = Self::build_client(&self.config)?;
        let request = client
            .get("/models")
            .context(HttpClientSnafu {
                stage: "build-model-request",
            })?
            .body(NoBody)
            .map_err(|source| TransportError::BuildHttpRequestBody {
                stage: "build-model-request-body",
                message: source.to_string(),
            })?;

        let response = client.send(request).await.context(HttpClientSnafu {
            stage: "send-model-request",
        })?;
        let status = response.status();
        let payload = http_client::text(response).await.context(HttpClientSnafu {
            stage: "read-model-response",
        })?;

        if !status.is_success() {
            return ModelFetchStatusSnafu {
                stage: "model-http-status",
                status: status.as_u16(),
                body: payload,
            }
            .fail();
        }

        parse_model_payload(&payload)
    }

    async fn send_completion(
        config: &ProviderConfig,
        request: &CompletionRequest,
    ) -> TransportResult<CompletionResponse> {
        ensure!(
            !request.content.trim().is_empty(),
            EmptyContentSnafu {
                stage: "send-completion-validate",
                model_id: request.model_id.clone(),
            }
        );

        let client = Self::build_client(config)?;
        let model = client.completion_model(request.model_id.clone());
        let mut builder = model.completion_request(RigMessage::user(request.content.clone()));

        if let Some(system_prompt) = &request.system_prompt
            && !system_prompt.trim().is_empty()
        {
            builder = builder.preamble(system_prompt.clone());
        }

        if let Some(temperature) = config.temperature {
            builder = builder.temperature(temperature);
        }

        if let Some(max_tokens) = config.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        let response = builder.send().await.context(CompletionsFailedSnafu {
            stage: "send-completion",
        })?;

        let content = response
            .choice
            .iter()
            .filter_map(|item| match item {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        ensure!(
            !content.trim().is_empty(),
            EmptyCompletionSnafu {
                stage: "collect-completion-text",
                model_id: request.model_id.clone(),
            }
        );

        Ok(CompletionResponse::new(content, request.model_id.clone()))
    }
}

/// Parses an OpenAI/OpenRouter style `GET /models` body.
///
/// Entries without a usable id are skipped, duplicates keep their first
/// occurrence, and provider order is preserved.
pub(crate) fn parse_model_payload(payload: &str) -> TransportResult<Vec<ModelDescriptor>> {
    let parsed: ModelListPayload = serde_json::from_str(payload).context(ModelPayloadParseSnafu {
        stage: "parse-model-response",
    })?;

    let mut models: Vec<ModelDescriptor> = Vec::with_capacity(parsed.data.len());
    for entry in parsed.data {
        let id = entry.id.trim();
        if id.is_empty() || models.iter().any(|model| model.id == id) {
            continue;
        }

        let name = entry
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| id.to_string());

        models.push(
            ModelDescriptor::new(id, name).with_context_length(entry.context_length.unwrap_or(0)),
        );
    }

    ensure!(
        !models.is_empty(),
        ModelPayloadEmptySnafu {
            stage: "parse-model-response",
        }
    );

    Ok(models)
}

impl Transport for RigTransport {
    fn complete<'a>(
        &'a self,
        request: CompletionRequest,
    ) -> BoxFuture<'a, TransportResult<CompletionResponse>> {
        Box::pin(async move {
            let Some(timeout) = self.config.request_timeout else {
                return Self::send_completion(&self.config, &request).await;
            };

            match tokio::time::timeout(timeout, Self::send_completion(&self.config, &request)).await
            {
                Ok(result) => result,
                Err(_) => TimeoutSnafu {
                    stage: "send-completion-timeout",
                    model_id: request.model_id.clone(),
                    timeout_secs: timeout.as_secs(),
                }
                .fail(),
            }
        })
    }
}

impl ModelSource for RigTransport {
    fn fetch_models<'a>(&'a self) -> BoxFuture<'a, TransportResult<ModelCatalog>> {
        Box::pin(async move {
            if let Some(models) = self.catalog.fresh().await {
                return Ok(ModelCatalog::new(models, CatalogOrigin::Cached));
            }

            // Availability wins over freshness: provider API, then stale cache, then static list.
            match self.fetch_models_from_provider().await {
                Ok(models) => {
                    self.catalog.store(models.clone()).await;
                    Ok(ModelCatalog::new(models, CatalogOrigin::Live))
                }
                Err(error) => {
                    let error_message = error.to_string();

                    if let Some(models) = self.catalog.last_known().await {
                        tracing::warn!(
                            provider_id = %self.id(),
                            cached_model_count = models.len(),
                            error = %error_message,
                            "model fetch failed; serving stale cached models"
                        );
                        return Ok(
                            ModelCatalog::new(models, CatalogOrigin::Stale).with_warning(error_message)
                        );
                    }

                    tracing::warn!(
                        provider_id = %self.id(),
                        fallback_model_count = self.fallback_models.len(),
                        error = %error_message,
                        "model fetch failed without cache; serving static fallback models"
                    );

                    Ok(ModelCatalog::new(self.fallback_models.clone(), CatalogOrigin::Builtin)
                        .with_warning(error_message))
                }
            }
        })
    }
}

impl LlmProvider for RigTransport {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Rig OpenAI-compatible"
    }
}
