//! Active display language: persisted preference → browser-negotiated
//! language → default. Resolved once at bootstrap, changed only by an
//! explicit user selection. Storage failures never escape this module.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::storage::KeyValueStore;

/// Storage key holding the persisted language code.
pub const PREFERENCE_KEY: &str = "preferred-language";

/// Canonical form of a language code: trimmed, ASCII-lowercased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_lowercase()
}

/// Where the active language came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageOrigin {
    Persisted,
    BrowserDetected,
    Default,
}

impl std::fmt::Display for LanguageOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LanguageOrigin::Persisted => write!(f, "persisted"),
            LanguageOrigin::BrowserDetected => write!(f, "browser-detected"),
            LanguageOrigin::Default => write!(f, "default"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguagePreference {
    pub code: String,
    pub origin: LanguageOrigin,
}

/// The closed set of language codes the platform renders.
#[derive(Debug, Clone)]
pub struct SupportedLanguages {
    codes: Vec<String>,
    default: String,
}

impl SupportedLanguages {
    /// Returns None if `default` is not in `codes`.
    pub fn new<I, S>(codes: I, default: &str) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let codes: Vec<String> = codes
            .into_iter()
            .map(|c| normalize_code(&c.into()))
            .collect();
        let default = normalize_code(default);
        if !codes.contains(&default) {
            return None;
        }
        Some(Self { codes, default })
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c == code)
    }

    pub fn default_code(&self) -> &str {
        &self.default
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    /// First advertised language whose primary subtag is supported.
    pub fn negotiate<S: AsRef<str>>(&self, advertised: &[S]) -> Option<String> {
        advertised
            .iter()
            .map(|tag| primary_subtag(tag.as_ref()))
            .find(|code| self.contains(code))
    }
}

/// Strip region, script and encoding: "en-US" → "en", "pt_BR.UTF-8" → "pt".
pub fn primary_subtag(tag: &str) -> String {
    tag.trim()
        .split(['-', '_', '.', '@'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Parse an `Accept-Language` header into tags ordered by quality.
/// Ties keep header order; `*` and q=0 entries are dropped.
pub fn parse_accept_language(header: &str) -> Vec<String> {
    let mut weighted: Vec<(String, f32)> = header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let tag = pieces.next()?.trim();
            if tag.is_empty() || tag == "*" {
                return None;
            }
            let q = pieces
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            (q > 0.0).then(|| (tag.to_string(), q))
        })
        .collect();
    // stable sort keeps header order for equal weights
    weighted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    weighted.into_iter().map(|(tag, _)| tag).collect()
}

/// Locale tags advertised by the process environment, most specific first.
pub fn system_locales() -> Vec<String> {
    locales_from_env(|key| std::env::var(key).ok())
}

pub fn locales_from_env(lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    let mut out = Vec::new();
    for key in ["LC_ALL", "LC_MESSAGES", "LANGUAGE", "LANG"] {
        let Some(value) = lookup(key) else { continue };
        for tag in value.split(':') {
            let tag = tag.trim();
            if tag.is_empty() || tag == "C" || tag == "POSIX" || tag.starts_with("C.") {
                continue;
            }
            let tag = tag.split('.').next().unwrap_or(tag).to_string();
            if !out.contains(&tag) {
                out.push(tag);
            }
        }
    }
    out
}

/// Resolves and holds the session's active language.
pub struct LanguageResolver {
    supported: SupportedLanguages,
    store: Arc<dyn KeyValueStore>,
    browser_languages: Vec<String>,
    current: RwLock<LanguagePreference>,
    pref_tx: watch::Sender<LanguagePreference>,
}

impl LanguageResolver {
    /// Create the resolver and run the bootstrap resolution.
    pub fn new(
        supported: SupportedLanguages,
        store: Arc<dyn KeyValueStore>,
        browser_languages: Vec<String>,
    ) -> Self {
        let initial = LanguagePreference {
            code: supported.default_code().to_string(),
            origin: LanguageOrigin::Default,
        };
        let (pref_tx, _) = watch::channel(initial.clone());
        let resolver = Self {
            supported,
            store,
            browser_languages,
            current: RwLock::new(initial),
            pref_tx,
        };
        resolver.resolve();
        resolver
    }

    /// Run resolution against storage and the advertised languages, making
    /// the result the active preference.
    pub fn resolve(&self) -> LanguagePreference {
        let pref = self.resolve_uncommitted();
        if pref.origin != LanguageOrigin::Persisted {
            self.persist(&pref.code);
        }
        info!(code = %pref.code, origin = %pref.origin, "language_resolved");
        self.publish(pref.clone());
        pref
    }

    fn resolve_uncommitted(&self) -> LanguagePreference {
        match self.store.get(PREFERENCE_KEY) {
            Ok(Some(stored)) => {
                let code = normalize_code(&stored);
                if self.supported.contains(&code) {
                    return LanguagePreference {
                        code,
                        origin: LanguageOrigin::Persisted,
                    };
                }
                debug!(stored = %stored, "persisted language unsupported, ignoring");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "language preference read failed, detecting instead");
            }
        }

        if let Some(code) = self.supported.negotiate(&self.browser_languages) {
            return LanguagePreference {
                code,
                origin: LanguageOrigin::BrowserDetected,
            };
        }

        LanguagePreference {
            code: self.supported.default_code().to_string(),
            origin: LanguageOrigin::Default,
        }
    }

    /// Explicit user selection. Returns false (and changes nothing) for an
    /// unsupported code.
    pub fn set_language(&self, code: &str) -> bool {
        let code = normalize_code(code);
        if !self.supported.contains(&code) {
            warn!(code = %code, "ignoring unsupported language");
            return false;
        }
        self.persist(&code);
        let pref = LanguagePreference {
            code,
            origin: LanguageOrigin::Persisted,
        };
        info!(code = %pref.code, "language_changed");
        self.publish(pref);
        true
    }

    pub fn current(&self) -> LanguagePreference {
        self.current.read().clone()
    }

    pub fn current_code(&self) -> String {
        self.current.read().code.clone()
    }

    /// Run `apply` only while `code` is the active language. The language
    /// cannot change until `apply` returns. Returns false without running
    /// `apply` when another language is active.
    pub fn while_active(&self, code: &str, apply: impl FnOnce() -> bool) -> bool {
        let current = self.current.read();
        if current.code != code {
            return false;
        }
        apply()
    }

    pub fn supported(&self) -> &SupportedLanguages {
        &self.supported
    }

    /// Subscribe to active-language changes.
    pub fn subscribe(&self) -> watch::Receiver<LanguagePreference> {
        self.pref_tx.subscribe()
    }

    fn persist(&self, code: &str) {
        if let Err(e) = self.store.set(PREFERENCE_KEY, code) {
            warn!(error = %e, code, "language preference write failed");
        }
    }

    fn publish(&self, pref: LanguagePreference) {
        let mut current = self.current.write();
        *current = pref.clone();
        self.pref_tx.send_if_modified(|old| {
            if *old == pref {
                return false;
            }
            *old = pref;
            true
        });
    }
}
