//! Parlance: active-language resolution and cached on-demand translation for
//! the booking platform client.
//! Main library: composition root wiring storage, resolver, cache, provider.

pub mod cancellation;
pub mod config;
pub mod language;
pub mod metrics;
pub mod storage;
pub mod translate;

use std::sync::Arc;

use tracing::{info, warn};

use config::{Config, ConfigError};
use language::{LanguagePreference, LanguageResolver, SupportedLanguages};
use metrics::{MetricsRegistry, MetricsSummary};
use storage::{KeyValueStore, MemoryStore, SqliteStore};
use translate::binding::TextBinding;
use translate::cache::TranslationCache;
use translate::http::HttpTranslator;
use translate::pipeline::{PipelineOptions, TranslationPipeline};
use translate::{PassthroughTranslator, Translator};

/// Everything the rest of the application talks to. Owns the cache, so
/// `shutdown` is the only place it gets flushed.
pub struct TranslationContext {
    resolver: Arc<LanguageResolver>,
    cache: Arc<TranslationCache>,
    pipeline: Arc<TranslationPipeline>,
    metrics: Arc<MetricsRegistry>,
}

impl TranslationContext {
    /// Wire the context from explicit collaborators.
    /// `browser_languages` is the ordered list the client advertises.
    pub fn new(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        translator: Arc<dyn Translator>,
        browser_languages: Vec<String>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let supported = SupportedLanguages::new(
            config.supported_languages.iter().cloned(),
            &config.default_language,
        )
        .ok_or_else(|| ConfigError::Invalid("default_language is not supported".into()))?;

        let metrics = Arc::new(MetricsRegistry::new());
        let resolver = Arc::new(LanguageResolver::new(
            supported,
            Arc::clone(&store),
            browser_languages,
        ));
        let cache = Arc::new(TranslationCache::load(store, config.cache_ttl()));
        let pipeline = Arc::new(TranslationPipeline::new(
            Arc::clone(&resolver),
            Arc::clone(&cache),
            translator,
            Arc::clone(&metrics),
            PipelineOptions {
                source_language: config.source_language.clone(),
                batch_size: config.batch_size,
                provider_timeout: config.provider_timeout(),
            },
        ));

        info!(
            language = %resolver.current().code,
            origin = %resolver.current().origin,
            cached = cache.len(),
            "translation context ready"
        );

        Ok(Self {
            resolver,
            cache,
            pipeline,
            metrics,
        })
    }

    /// Wire the context from configuration alone. Storage or provider setup
    /// failures degrade to in-memory storage and the passthrough provider.
    pub fn from_config(config: &Config, browser_languages: Vec<String>) -> Result<Self, ConfigError> {
        let store: Arc<dyn KeyValueStore> = match &config.storage_path {
            Some(path) => match SqliteStore::open(path) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "durable storage unavailable, using memory");
                    Arc::new(MemoryStore::new())
                }
            },
            None => Arc::new(MemoryStore::new()),
        };

        let translator: Arc<dyn Translator> = match HttpTranslator::from_config(&config.provider) {
            Some(Ok(client)) => {
                info!("HTTP translation provider initialized");
                Arc::new(client)
            }
            Some(Err(e)) => {
                warn!(error = %e, "translation provider init failed, using passthrough");
                Arc::new(PassthroughTranslator)
            }
            None => {
                info!("no translation endpoint configured, using passthrough");
                Arc::new(PassthroughTranslator)
            }
        };

        Self::new(config, store, translator, browser_languages)
    }

    pub fn current_language(&self) -> LanguagePreference {
        self.resolver.current()
    }

    /// Explicit user selection. Unsupported codes are ignored (returns false).
    pub fn change_language(&self, code: &str) -> bool {
        self.resolver.set_language(code)
    }

    pub async fn translate(&self, text: &str, source_language: Option<&str>) -> String {
        self.pipeline.translate(text, source_language).await
    }

    pub async fn translate_batch<S: AsRef<str>>(
        &self,
        texts: &[S],
        source_language: Option<&str>,
    ) -> Vec<String> {
        self.pipeline.translate_batch(texts, source_language).await
    }

    /// Bind one fragment, activate it, and keep it following language changes.
    /// Outside a Tokio runtime the fragment shows its original text and does
    /// not follow language changes.
    pub fn bind(&self, text: impl Into<String>, source_language: Option<&str>) -> Arc<TextBinding> {
        let binding = Arc::new(TextBinding::new(
            Arc::clone(&self.pipeline),
            text,
            source_language.map(str::to_string),
        ));
        binding.activate();
        binding.follow_language();
        binding
    }

    pub fn resolver(&self) -> &Arc<LanguageResolver> {
        &self.resolver
    }

    pub fn pipeline(&self) -> &Arc<TranslationPipeline> {
        &self.pipeline
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    /// Teardown: persist the cache snapshot.
    pub fn shutdown(&self) {
        self.cache.flush();
        info!("translation context shut down");
    }
}

/// Install the fmt subscriber. `RUST_LOG` overrides the default filter;
/// `PARLANCE_LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("parlance=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);
    let format = std::env::var(config::ENV_LOG_FORMAT).ok();
    let _ = if wants_json_logs(format.as_deref()) {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn wants_json_logs(format: Option<&str>) -> bool {
    format.is_some_and(|f| f.trim().eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{LanguageOrigin, PREFERENCE_KEY};
    use crate::translate::cache::CACHE_STORAGE_KEY;
    use crate::translate::{ProviderRequest, ProviderResponse, TranslateError};
    use async_trait::async_trait;

    struct UppercaseTranslator;

    #[async_trait]
    impl Translator for UppercaseTranslator {
        async fn translate(&self, request: &ProviderRequest) -> Result<ProviderResponse, TranslateError> {
            Ok(ProviderResponse {
                translated_text: request.text.to_uppercase(),
                detected_source_language: request.source_language.clone(),
                provider: "upper".into(),
            })
        }
    }

    fn context(store: Arc<dyn KeyValueStore>, browser: &[&str]) -> TranslationContext {
        init_tracing();
        TranslationContext::new(
            &Config::default(),
            store,
            Arc::new(UppercaseTranslator),
            browser.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn consumer_api_end_to_end() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let ctx = context(Arc::clone(&store), &["en-US", "fr"]);
        assert_eq!(ctx.current_language().code, "en");
        assert_eq!(ctx.current_language().origin, LanguageOrigin::BrowserDetected);

        assert_eq!(ctx.translate("Bonjour", Some("fr")).await, "BONJOUR");
        assert_eq!(
            ctx.translate_batch(&["a", "b", "c", "d"], Some("fr")).await,
            vec!["A", "B", "C", "D"]
        );

        assert!(!ctx.change_language("xx"));
        assert!(ctx.change_language("fr"));
        assert_eq!(ctx.translate("Bonjour", Some("fr")).await, "Bonjour");
        assert_eq!(store.get(PREFERENCE_KEY).unwrap().as_deref(), Some("fr"));

        let summary = ctx.metrics_summary();
        assert_eq!(summary.counters["cache_miss"], 5);
    }

    #[tokio::test]
    async fn cache_survives_restart_through_shared_store() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        {
            let ctx = context(Arc::clone(&store), &["en"]);
            ctx.translate("Merci", Some("fr")).await;
            ctx.shutdown();
        }
        assert!(store.get(CACHE_STORAGE_KEY).unwrap().is_some());

        let ctx = context(store, &[]);
        assert_eq!(ctx.current_language().origin, LanguageOrigin::Persisted);
        assert_eq!(ctx.cache().len(), 1);
        assert_eq!(ctx.translate("Merci", Some("fr")).await, "MERCI");
        assert_eq!(ctx.metrics_summary().counters["cache_hit"], 1);
    }

    #[tokio::test]
    async fn bound_fragment_follows_language_changes() {
        let ctx = context(Arc::new(MemoryStore::new()), &["en"]);
        let binding = ctx.bind("Bonsoir", Some("fr"));
        let mut rx = binding.subscribe();
        rx.wait_for(|s| !s.is_loading && s.display_text == "BONSOIR")
            .await
            .unwrap();

        assert!(ctx.change_language("fr"));
        rx.wait_for(|s| s.display_text == "Bonsoir").await.unwrap();
        assert!(!binding.state().is_loading);
    }

    #[test]
    fn from_config_degrades_without_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            storage_path: Some(dir.path().join("parlance.db")),
            ..Config::default()
        };
        let ctx = TranslationContext::from_config(&config, vec!["de-CH".into()]).unwrap();
        assert_eq!(ctx.current_language().code, "de");

        let reopened = TranslationContext::from_config(&config, Vec::new()).unwrap();
        assert_eq!(reopened.current_language().code, "de");
        assert_eq!(reopened.current_language().origin, LanguageOrigin::Persisted);
    }

    #[test]
    fn bind_outside_runtime_shows_original() {
        let ctx = context(Arc::new(MemoryStore::new()), &["en"]);
        let binding = ctx.bind("Bonsoir", Some("fr"));
        assert_eq!(binding.state().display_text, "Bonsoir");
        assert!(!binding.state().is_loading);
        assert!(binding.follow_language().is_none());
    }

    #[test]
    fn json_logs_are_opt_in() {
        assert!(wants_json_logs(Some("json")));
        assert!(wants_json_logs(Some(" JSON ")));
        assert!(!wants_json_logs(Some("pretty")));
        assert!(!wants_json_logs(None));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = Config {
            default_language: "xx".into(),
            ..Config::default()
        };
        assert!(TranslationContext::from_config(&config, Vec::new()).is_err());
    }
}
