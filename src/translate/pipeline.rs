//! Translation pipeline: skip → cache → provider → fallback.
//! Never fails outward: any provider problem yields the original text.
//! Batches run in fixed-size groups so a page mounting many fragments
//! cannot fan out unbounded provider calls.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, warn};

use super::cache::TranslationCache;
use super::normalize::is_blank;
use super::{ProviderRequest, TranslateError, Translator};
use crate::language::{normalize_code, LanguageResolver};
use crate::metrics::{metric_names, MetricsRegistry};

pub const DEFAULT_BATCH_SIZE: usize = 3;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Language platform content is authored in; used when the caller names none.
    pub source_language: String,
    pub batch_size: usize,
    pub provider_timeout: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            source_language: "fr".into(),
            batch_size: DEFAULT_BATCH_SIZE,
            provider_timeout: None,
        }
    }
}

pub struct TranslationPipeline {
    resolver: Arc<LanguageResolver>,
    cache: Arc<TranslationCache>,
    translator: Arc<dyn Translator>,
    metrics: Arc<MetricsRegistry>,
    options: PipelineOptions,
}

impl TranslationPipeline {
    pub fn new(
        resolver: Arc<LanguageResolver>,
        cache: Arc<TranslationCache>,
        translator: Arc<dyn Translator>,
        metrics: Arc<MetricsRegistry>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            resolver,
            cache,
            translator,
            metrics,
            options: PipelineOptions {
                source_language: normalize_code(&options.source_language),
                batch_size: options.batch_size.max(1),
                ..options
            },
        }
    }

    /// Current session target language.
    pub fn target_language(&self) -> String {
        self.resolver.current_code()
    }

    /// True when `text` must be shown as-is: blank, or already in the target language.
    /// Codes compare case-insensitively.
    pub fn should_skip(&self, text: &str, source_lang: Option<&str>, target_lang: &str) -> bool {
        if is_blank(text) {
            return true;
        }
        let effective_source = source_lang
            .map(normalize_code)
            .unwrap_or_else(|| self.options.source_language.clone());
        effective_source == normalize_code(target_lang)
    }

    /// Translate into the current target language.
    pub async fn translate(&self, text: &str, source_lang: Option<&str>) -> String {
        let target = self.target_language();
        self.translate_to(text, source_lang, &target).await
    }

    /// Translate into an explicit target language.
    pub async fn translate_to(&self, text: &str, source_lang: Option<&str>, target_lang: &str) -> String {
        if self.should_skip(text, source_lang, target_lang) {
            self.metrics.incr(metric_names::TRANSLATE_SKIPPED);
            return text.to_string();
        }

        let span = self.metrics.span(metric_names::TRANSLATE_TOTAL);
        let source = source_lang.map(normalize_code);
        let source_lang = source.as_deref();
        let target = normalize_code(target_lang);
        let target_lang = target.as_str();

        if let Some(hit) = self.cache.get(text, source_lang, target_lang) {
            self.metrics.incr(metric_names::CACHE_HIT);
            span.finish();
            return hit;
        }
        self.metrics.incr(metric_names::CACHE_MISS);

        let request = ProviderRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            text: text.to_string(),
            target_language: target_lang.to_string(),
            source_language: source_lang.map(str::to_string),
        };

        let provider_span = self.metrics.span(metric_names::PROVIDER_CALL);
        let result = self.call_provider(&request).await;
        provider_span.finish();

        let out = match result {
            Ok(response) => {
                debug!(
                    request_id = %request.request_id,
                    provider = %response.provider,
                    detected = ?response.detected_source_language,
                    "translation fetched"
                );
                self.cache
                    .put(text, source_lang, target_lang, &response.translated_text);
                response.translated_text
            }
            Err(e) => {
                self.metrics.incr(metric_names::PROVIDER_FAILURE);
                warn!(request_id = %request.request_id, error = %e, "translation failed, keeping original text");
                text.to_string()
            }
        };
        span.finish();
        out
    }

    async fn call_provider(
        &self,
        request: &ProviderRequest,
    ) -> Result<super::ProviderResponse, TranslateError> {
        let call = self.translator.translate(request);
        match self.options.provider_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(TranslateError::Timeout)),
            None => call.await,
        }
    }

    /// Translate many texts, `batch_size` provider calls at a time.
    /// Output order always matches input order.
    pub async fn translate_batch<S: AsRef<str>>(&self, texts: &[S], source_lang: Option<&str>) -> Vec<String> {
        let target = self.target_language();
        let mut out = Vec::with_capacity(texts.len());
        for group in texts.chunks(self.options.batch_size) {
            let results = join_all(
                group
                    .iter()
                    .map(|text| self.translate_to(text.as_ref(), source_lang, &target)),
            )
            .await;
            out.extend(results);
        }
        out
    }

    pub fn resolver(&self) -> &Arc<LanguageResolver> {
        &self.resolver
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }
}
