//! Runtime configuration: TOML file + environment overrides.
//! Every field has a default, so an empty file (or no file) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::language::normalize_code;

pub const ENV_DEFAULT_LANGUAGE: &str = "PARLANCE_DEFAULT_LANGUAGE";
pub const ENV_TRANSLATE_ENDPOINT: &str = "PARLANCE_TRANSLATE_ENDPOINT";
pub const ENV_TRANSLATE_API_KEY: &str = "PARLANCE_TRANSLATE_API_KEY";
pub const ENV_STORAGE_PATH: &str = "PARLANCE_STORAGE_PATH";
pub const ENV_LOG_FORMAT: &str = "PARLANCE_LOG_FORMAT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Language used when neither a persisted nor a browser language matches.
    pub default_language: String,
    /// Language platform content is authored in.
    pub source_language: String,
    pub supported_languages: Vec<String>,
    pub cache_ttl_secs: u64,
    /// Concurrent provider calls per batch group.
    pub batch_size: usize,
    /// Provider calls exceeding this are treated as failures. None = wait forever.
    pub provider_timeout_ms: Option<u64>,
    /// SQLite file for durable storage. None keeps everything in memory.
    pub storage_path: Option<PathBuf>,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Translation endpoint. None selects the passthrough provider.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub min_interval_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_language: "fr".into(),
            source_language: "fr".into(),
            supported_languages: ["fr", "en", "es", "de", "it", "pt", "nl"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            cache_ttl_secs: 24 * 3600,
            batch_size: 3,
            provider_timeout_ms: None,
            storage_path: None,
            provider: ProviderConfig::default(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            min_interval_ms: 100,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load from an optional TOML file, apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// `load` with an explicit variable lookup in place of the process environment.
    pub fn load_with_env(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_toml_str(&std::fs::read_to_string(p)?)?,
            None => Self::default(),
        };
        config.apply_env(lookup);
        config.normalize_languages();
        config.validate()?;
        Ok(config)
    }

    /// Bring every language code to its canonical form.
    pub fn normalize_languages(&mut self) {
        self.default_language = normalize_code(&self.default_language);
        self.source_language = normalize_code(&self.source_language);
        for code in &mut self.supported_languages {
            *code = normalize_code(code);
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from a variable lookup (the process environment in `load`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(lang) = lookup(ENV_DEFAULT_LANGUAGE) {
            self.default_language = normalize_code(&lang);
        }
        if let Some(endpoint) = lookup(ENV_TRANSLATE_ENDPOINT) {
            self.provider.endpoint = Some(endpoint);
        }
        if let Some(key) = lookup(ENV_TRANSLATE_API_KEY) {
            self.provider.api_key = Some(key);
        }
        if let Some(path) = lookup(ENV_STORAGE_PATH) {
            self.storage_path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.supported_languages.is_empty() {
            return Err(ConfigError::Invalid("supported_languages is empty".into()));
        }
        for (field, lang) in [
            ("default_language", &self.default_language),
            ("source_language", &self.source_language),
        ] {
            let lang = normalize_code(lang);
            if !self.supported_languages.iter().any(|l| normalize_code(l) == lang) {
                return Err(ConfigError::Invalid(format!(
                    "{field} {lang:?} is not a supported language"
                )));
            }
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be > 0".into()));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn provider_timeout(&self) -> Option<Duration> {
        self.provider_timeout_ms.map(Duration::from_millis)
    }
}
