//! Per-fragment text binding.
//! Holds the best string available for one piece of source text in the
//! active language and re-resolves whenever the text or language changes.
//! Every activation takes a fresh generation; only the newest one may write
//! state, and teardown invalidates whatever is still in flight.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::pipeline::TranslationPipeline;
use crate::cancellation::TaskGeneration;
use crate::metrics::metric_names;

/// What a fragment currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingState {
    pub display_text: String,
    pub is_loading: bool,
}

pub struct TextBinding {
    pipeline: Arc<TranslationPipeline>,
    source_language: Option<String>,
    placeholder: Option<String>,
    text: Mutex<String>,
    generation: TaskGeneration,
    state_tx: Arc<watch::Sender<BindingState>>,
}

impl TextBinding {
    /// Create an inactive binding showing the original text.
    pub fn new(
        pipeline: Arc<TranslationPipeline>,
        text: impl Into<String>,
        source_language: Option<String>,
    ) -> Self {
        let text = text.into();
        let (state_tx, _) = watch::channel(BindingState {
            display_text: text.clone(),
            is_loading: false,
        });
        Self {
            pipeline,
            source_language,
            placeholder: None,
            text: Mutex::new(text),
            generation: TaskGeneration::new(),
            state_tx: Arc::new(state_tx),
        }
    }

    /// Render `placeholder` instead of the previous text while loading.
    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    /// Resolve the current text for the current target language.
    /// Supersedes any earlier activation.
    pub fn activate(&self) {
        let text = self.text.lock().clone();
        let target = self.pipeline.target_language();
        let source = self.source_language.clone();
        let guard = self.generation.cancel_and_advance();

        if self.pipeline.should_skip(&text, source.as_deref(), &target) {
            guard.commit(|| {
                self.state_tx.send_replace(BindingState {
                    display_text: text.clone(),
                    is_loading: false,
                });
            });
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime, showing original text");
            guard.commit(|| {
                self.state_tx.send_replace(BindingState {
                    display_text: text.clone(),
                    is_loading: false,
                });
            });
            return;
        };

        guard.commit(|| self.state_tx.send_modify(|state| state.is_loading = true));

        let pipeline = Arc::clone(&self.pipeline);
        let state_tx = Arc::clone(&self.state_tx);
        runtime.spawn(async move {
            // cancellation first: a torn-down binding must not reach the cache write
            let translated = tokio::select! {
                biased;
                _ = guard.token().cancelled() => {
                    debug!(generation = guard.my_generation(), "binding superseded mid-flight");
                    return;
                }
                translated = pipeline.translate_to(&text, source.as_deref(), &target) => translated,
            };

            // the target must still be the active language at the moment of writing
            let applied = pipeline.resolver().while_active(&target, || {
                guard.commit(|| {
                    state_tx.send_replace(BindingState {
                        display_text: translated,
                        is_loading: false,
                    });
                })
            });
            if !applied {
                pipeline.metrics().incr(metric_names::STALE_RESULT_DROPPED);
                debug!(generation = guard.my_generation(), "stale translation dropped");
            }
        });
    }

    /// Replace the source text and re-activate.
    pub fn set_text(&self, text: impl Into<String>) {
        *self.text.lock() = text.into();
        self.activate();
    }

    /// Teardown: anything still in flight becomes a no-op.
    pub fn deactivate(&self) {
        self.generation.invalidate();
    }

    pub fn state(&self) -> BindingState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BindingState> {
        self.state_tx.subscribe()
    }

    /// Text to draw right now, honoring the placeholder while loading.
    pub fn rendered(&self) -> String {
        let state = self.state_tx.borrow();
        match (&self.placeholder, state.is_loading) {
            (Some(placeholder), true) => placeholder.clone(),
            _ => state.display_text.clone(),
        }
    }

    /// Re-activate on every active-language change until the binding is dropped.
    /// None outside a Tokio runtime.
    pub fn follow_language(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime, binding will not follow language changes");
            return None;
        };
        let mut languages = self.pipeline.resolver().subscribe();
        let binding: Weak<Self> = Arc::downgrade(self);
        let handle = runtime.spawn(async move {
            while languages.changed().await.is_ok() {
                let Some(binding) = binding.upgrade() else {
                    break;
                };
                binding.activate();
            }
        });
        Some(handle)
    }
}

impl Drop for TextBinding {
    fn drop(&mut self) {
        self.generation.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::pipeline::tests::{pipeline_with, CountingTranslator};
    use crate::translate::pipeline::PipelineOptions;
    use crate::translate::{ProviderRequest, ProviderResponse, TranslateError, Translator};
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Blocks every call until released; signals when a call starts.
    #[derive(Default)]
    struct GatedTranslator {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Translator for GatedTranslator {
        async fn translate(&self, request: &ProviderRequest) -> Result<ProviderResponse, TranslateError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(ProviderResponse {
                translated_text: format!("[{}] {}", request.target_language, request.text),
                detected_source_language: None,
                provider: "gated".into(),
            })
        }
    }

    /// Slow for English, fast for everything else.
    struct LanguageDelayTranslator;

    #[async_trait]
    impl Translator for LanguageDelayTranslator {
        async fn translate(&self, request: &ProviderRequest) -> Result<ProviderResponse, TranslateError> {
            let delay = if request.target_language == "en" { 100 } else { 10 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(ProviderResponse {
                translated_text: format!("[{}] {}", request.target_language, request.text),
                detected_source_language: None,
                provider: "delay".into(),
            })
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn resolves_translation_and_clears_loading() {
        let pipeline = Arc::new(pipeline_with(
            Arc::new(CountingTranslator::default()),
            "en",
            PipelineOptions::default(),
        ));
        let binding = TextBinding::new(pipeline, "Bonjour", Some("fr".into()));
        let mut rx = binding.subscribe();

        binding.activate();
        assert!(binding.state().is_loading);
        assert_eq!(binding.state().display_text, "Bonjour");

        rx.wait_for(|s| !s.is_loading).await.unwrap();
        assert_eq!(binding.state().display_text, "[en] Bonjour");
    }

    #[tokio::test]
    async fn canonical_language_resolves_synchronously() {
        let translator = Arc::new(CountingTranslator::default());
        let pipeline = Arc::new(pipeline_with(translator.clone(), "fr", PipelineOptions::default()));
        let binding = TextBinding::new(pipeline, "Bonjour", Some("fr".into()));

        binding.activate();
        assert_eq!(
            binding.state(),
            BindingState {
                display_text: "Bonjour".into(),
                is_loading: false
            }
        );
        assert_eq!(translator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deactivated_binding_writes_nothing() {
        let translator = Arc::new(GatedTranslator::default());
        let pipeline = Arc::new(pipeline_with(translator.clone(), "en", PipelineOptions::default()));
        let binding = TextBinding::new(Arc::clone(&pipeline), "Hello", None);
        let mut rx = binding.subscribe();

        binding.activate();
        translator.started.notified().await;
        binding.deactivate();

        let after_teardown = binding.state();
        rx.borrow_and_update();
        translator.release.notify_waiters();
        settle().await;

        assert_eq!(binding.state(), after_teardown);
        assert!(!rx.has_changed().unwrap());
        assert!(pipeline.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn language_switch_mid_flight_keeps_newest_result() {
        let pipeline = Arc::new(pipeline_with(
            Arc::new(LanguageDelayTranslator),
            "en",
            PipelineOptions::default(),
        ));
        let binding = Arc::new(TextBinding::new(Arc::clone(&pipeline), "Bonjour", Some("fr".into())));
        let follower = binding.follow_language().unwrap();

        binding.activate();
        settle().await;
        assert!(pipeline.resolver().set_language("de"));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(binding.state().display_text, "[de] Bonjour");
        assert!(!binding.state().is_loading);

        drop(binding);
        // dropping the binding ends the follower on the next change
        assert!(pipeline.resolver().set_language("es"));
        follower.await.unwrap();
    }

    #[tokio::test]
    async fn result_for_a_replaced_language_is_never_shown() {
        let translator = Arc::new(GatedTranslator::default());
        let pipeline = Arc::new(pipeline_with(translator.clone(), "en", PipelineOptions::default()));
        let binding = TextBinding::new(Arc::clone(&pipeline), "Bonjour", Some("fr".into()));

        binding.activate();
        translator.started.notified().await;
        // the English result is ready before the switch is observed by anyone
        translator.release.notify_waiters();
        assert!(pipeline.resolver().set_language("de"));
        settle().await;

        assert_eq!(binding.state().display_text, "Bonjour");
        assert_eq!(pipeline.metrics().counter(metric_names::STALE_RESULT_DROPPED), 1);
    }

    #[tokio::test]
    async fn follower_replaces_result_for_a_replaced_language() {
        let translator = Arc::new(GatedTranslator::default());
        let pipeline = Arc::new(pipeline_with(translator.clone(), "en", PipelineOptions::default()));
        let binding = Arc::new(TextBinding::new(Arc::clone(&pipeline), "Bonjour", Some("fr".into())));
        binding.follow_language().unwrap();
        let mut rx = binding.subscribe();
        let mut seen = Vec::new();

        binding.activate();
        translator.started.notified().await;
        translator.release.notify_waiters();
        assert!(pipeline.resolver().set_language("de"));

        translator.started.notified().await;
        translator.release.notify_waiters();
        loop {
            rx.changed().await.unwrap();
            let state = rx.borrow_and_update().clone();
            seen.push(state.display_text.clone());
            if !state.is_loading {
                break;
            }
        }

        assert_eq!(binding.state().display_text, "[de] Bonjour");
        assert!(!seen.iter().any(|text| text.starts_with("[en]")), "saw {seen:?}");
    }

    #[tokio::test]
    async fn set_text_supersedes_previous_activation() {
        let translator = Arc::new(GatedTranslator::default());
        let pipeline = Arc::new(pipeline_with(translator.clone(), "en", PipelineOptions::default()));
        let binding = TextBinding::new(pipeline, "Salut", Some("fr".into()));
        let mut rx = binding.subscribe();

        binding.activate();
        translator.started.notified().await;
        binding.set_text("Merci");
        translator.started.notified().await;
        translator.release.notify_waiters();

        rx.wait_for(|s| !s.is_loading).await.unwrap();
        assert_eq!(binding.state().display_text, "[en] Merci");
    }

    #[tokio::test]
    async fn placeholder_shown_only_while_loading() {
        let translator = Arc::new(GatedTranslator::default());
        let pipeline = Arc::new(pipeline_with(translator.clone(), "en", PipelineOptions::default()));
        let binding = TextBinding::new(pipeline, "Bonjour", Some("fr".into())).with_placeholder("…");
        let mut rx = binding.subscribe();

        assert_eq!(binding.rendered(), "Bonjour");
        binding.activate();
        assert_eq!(binding.rendered(), "…");

        translator.started.notified().await;
        translator.release.notify_waiters();
        rx.wait_for(|s| !s.is_loading).await.unwrap();
        assert_eq!(binding.rendered(), "[en] Bonjour");
    }

    #[test]
    fn activation_without_runtime_shows_original() {
        let pipeline = Arc::new(pipeline_with(
            Arc::new(CountingTranslator::default()),
            "en",
            PipelineOptions::default(),
        ));
        let binding = TextBinding::new(pipeline, "Bonjour", Some("fr".into()));
        binding.activate();
        assert_eq!(binding.state().display_text, "Bonjour");
        assert!(!binding.state().is_loading);
    }
}
