//! HTTP translation provider.
//! POSTs `{text, targetLanguage, sourceLanguage}` to a translation endpoint
//! and expects `{translatedText, detectedSourceLanguage, provider}` back.
//! Connection pooling via reqwest, simple token-bucket rate limiting, retries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::normalize::PlaceholderProtector;
use super::{ProviderRequest, ProviderResponse, TranslateError, Translator};
use crate::config::ProviderConfig;

const MAX_429_RETRIES: u32 = 3;
const MAX_5XX_RETRIES: u32 = 2;
/// Upper bound on a provider-requested `Retry-After` wait.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

pub struct HttpTranslator {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    /// Simple token-bucket: tracks the next allowed request time.
    next_allowed: Arc<tokio::sync::Mutex<Instant>>,
    min_interval: Duration,
    protector: PlaceholderProtector,
}

impl HttpTranslator {
    pub fn new(endpoint: impl Into<String>, config: &ProviderConfig) -> Result<Self, TranslateError> {
        let endpoint = endpoint.into();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(TranslateError::InvalidInput(format!(
                "translation endpoint must be http(s): {endpoint}"
            )));
        }

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| TranslateError::ApiError(e.to_string()))?;

        Ok(Self {
            http,
            endpoint,
            api_key: config.api_key.clone(),
            next_allowed: Arc::new(tokio::sync::Mutex::new(Instant::now())),
            min_interval: Duration::from_millis(config.min_interval_ms),
            protector: PlaceholderProtector::new(),
        })
    }

    /// Build from config; None when no endpoint is configured.
    pub fn from_config(config: &ProviderConfig) -> Option<Result<Self, TranslateError>> {
        config
            .endpoint
            .as_deref()
            .map(|endpoint| Self::new(endpoint, config))
    }

    async fn rate_limit_wait(&self) {
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep(*next - now).await;
        }
        *next = Instant::now() + self.min_interval;
    }

    /// Send with retry.
    /// 429: Retry-After or 1s/2s/4s (max 3).
    /// 5xx: exponential backoff (max 2).
    /// Timeout: immediate retry once.
    async fn send_with_retry(&self, body: &serde_json::Value) -> Result<reqwest::Response, TranslateError> {
        let mut attempt: u32 = 0;
        let mut timeout_retried = false;

        loop {
            let mut builder = self.http.post(self.endpoint.as_str()).json(body);
            if let Some(key) = &self.api_key {
                builder = builder.bearer_auth(key);
            }

            match builder.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().as_u16() == 429 => {
                    if attempt >= MAX_429_RETRIES {
                        return Err(TranslateError::RateLimited { retry_after_ms: 0 });
                    }
                    let wait = retry_after(&resp).unwrap_or_else(|| Duration::from_secs(1 << attempt));
                    warn!(attempt, wait_ms = wait.as_millis() as u64, "429 rate limited, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) if resp.status().is_server_error() => {
                    if attempt >= MAX_5XX_RETRIES {
                        return Err(TranslateError::ApiError(format!("server error: {}", resp.status())));
                    }
                    let wait = Duration::from_millis(500 * (1 << attempt));
                    warn!(
                        attempt,
                        status = resp.status().as_u16(),
                        wait_ms = wait.as_millis() as u64,
                        "5xx error, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body_text = resp.text().await.unwrap_or_default();
                    return Err(TranslateError::ApiError(format!(
                        "unexpected status {}: {}",
                        status,
                        body_text.chars().take(200).collect::<String>()
                    )));
                }
                Err(e) if e.is_timeout() => {
                    if timeout_retried {
                        return Err(TranslateError::Timeout);
                    }
                    warn!("request timeout, retrying once");
                    timeout_retried = true;
                }
                Err(e) => return Err(TranslateError::ApiError(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, request: &ProviderRequest) -> Result<ProviderResponse, TranslateError> {
        self.rate_limit_wait().await;

        let (protected, placeholders) = self.protector.protect(&request.text);
        let outbound = ProviderRequest {
            text: protected,
            ..request.clone()
        };
        let body = serde_json::to_value(&outbound).map_err(|e| TranslateError::InvalidInput(e.to_string()))?;

        let start = Instant::now();
        let response = self.send_with_retry(&body).await?;
        let raw = response
            .text()
            .await
            .map_err(|e| TranslateError::ApiError(e.to_string()))?;

        let mut parsed = parse_response(&raw)?;
        parsed.translated_text = self.protector.restore(&parsed.translated_text, &placeholders);
        debug!(
            request_id = %request.request_id,
            provider = %parsed.provider,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "provider_response"
        );
        Ok(parsed)
    }
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}

/// Seconds form only, capped at `MAX_RETRY_AFTER`.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

/// Decode a provider body. Missing or empty `translatedText` is malformed.
fn parse_response(raw: &str) -> Result<ProviderResponse, TranslateError> {
    let parsed: ProviderResponse =
        serde_json::from_str(raw).map_err(|e| TranslateError::Malformed(e.to_string()))?;
    if parsed.translated_text.trim().is_empty() {
        return Err(TranslateError::Malformed("empty translatedText".into()));
    }
    Ok(parsed)
}
