use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use snafu::Snafu;

use super::model::{DEFAULT_CATALOG_TTL, ModelCatalog};

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub request_timeout: Option<Duration>,
    pub catalog_ttl: Duration,
}

impl ProviderConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
            temperature: None,
            max_tokens: None,
            request_timeout: None,
            catalog_ttl: DEFAULT_CATALOG_TTL,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u64>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_catalog_ttl(mut self, ttl: Duration) -> Self {
        self.catalog_ttl = ttl;
        self
    }
}

/// One single-turn completion addressed to a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub content: String,
    pub model_id: String,
    pub system_prompt: Option<String>,
}

impl CompletionRequest {
    pub fn new(content: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model_id: model_id.into(),
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }
}

/// Successful completion. `model_id` is whatever the transport reports as the
/// producing model, which may be a display name rather than the request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub content: String,
    pub model_id: String,
}

impl CompletionResponse {
    pub fn new(content: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model_id: model_id.into(),
        }
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("completion request for '{model_id}' has no content"))]
    EmptyContent {
        stage: &'static str,
        model_id: String,
    },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("failed to finalize HTTP request body: {message}"))]
    BuildHttpRequestBody {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("provider model endpoint returned status {status}: {body}"))]
    ModelFetchStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to parse provider model list: {source}"))]
    ModelPayloadParse {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("provider model list contained no usable model identifiers"))]
    ModelPayloadEmpty { stage: &'static str },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
    #[snafu(display("model '{model_id}' returned an empty completion"))]
    EmptyCompletion {
        stage: &'static str,
        model_id: String,
    },
    #[snafu(display("model '{model_id}' did not answer within {timeout_secs}s"))]
    Timeout {
        stage: &'static str,
        model_id: String,
        timeout_secs: u64,
    },
    /// Free-form failure reported by a transport that has no richer error type.
    #[snafu(display("{message}"))]
    Unavailable {
        stage: &'static str,
        message: String,
    },
}

impl TransportError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            stage: "transport-unavailable",
            message: message.into(),
        }
    }
}

/// Turns one `(content, model id, system prompt)` tuple into a model response.
pub trait Transport: Send + Sync {
    fn complete<'a>(
        &'a self,
        request: CompletionRequest,
    ) -> BoxFuture<'a, TransportResult<CompletionResponse>>;
}

pub trait ModelSource: Send + Sync {
    fn fetch_models<'a>(&'a self) -> BoxFuture<'a, TransportResult<ModelCatalog>>;
}

pub trait LlmProvider: Transport + ModelSource {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
}
