//! Translation: provider boundary, persisted cache, pipeline, and per-fragment
//! bindings. The provider sits behind `Translator` so the disabled passthrough
//! and a real HTTP backend are interchangeable.

pub mod binding;
pub mod cache;
pub mod http;
pub mod normalize;
pub mod pipeline;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One provider call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRequest {
    #[serde(skip)]
    pub request_id: String,
    pub text: String,
    pub target_language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
}

/// Provider answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse {
    pub translated_text: String,
    #[serde(default)]
    pub detected_source_language: Option<String>,
    #[serde(default)]
    pub provider: String,
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, request: &ProviderRequest) -> Result<ProviderResponse, TranslateError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("API error: {0}")]
    ApiError(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("translation timeout")]
    Timeout,
    #[error("translation cancelled")]
    Cancelled,
    #[error("malformed provider payload: {0}")]
    Malformed(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Disabled provider: echoes the input and reports the detected language.
pub struct PassthroughTranslator;

pub const PASSTHROUGH_PROVIDER: &str = "passthrough";

#[async_trait]
impl Translator for PassthroughTranslator {
    async fn translate(&self, request: &ProviderRequest) -> Result<ProviderResponse, TranslateError> {
        Ok(ProviderResponse {
            translated_text: request.text.clone(),
            detected_source_language: request
                .source_language
                .clone()
                .or_else(|| normalize::detect_language(&request.text)),
            provider: PASSTHROUGH_PROVIDER.to_string(),
        })
    }
}
