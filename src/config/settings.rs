// Configuration schema
//
// One TOML document covers the whole pipeline: expansion, translation,
// dataset splitting and fine-tuning. Every field has a default so a missing
// config file means "run with defaults", not an error.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::dataset::SplitRatios;
use crate::error::Result;
use crate::expand::ExpanderConfig;
use crate::locale::Locale;
use crate::translate::{HttpTranslator, IdentityTranslator, RetryPolicy, TranslationBackend, Translator};
use crate::train::FineTuneConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BackendKind {
    /// Pass text through unchanged. Useful for monolingual runs and tests.
    Identity,
    Http {
        endpoint: String,
        #[serde(default)]
        api_key: Option<String>,
    },
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::Identity
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    #[serde(flatten)]
    pub kind: BackendKind,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl TranslatorConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }

    pub fn build(&self) -> Result<Translator> {
        let backend: Arc<dyn TranslationBackend> = match &self.kind {
            BackendKind::Identity => Arc::new(IdentityTranslator),
            BackendKind::Http { endpoint, api_key } => {
                Arc::new(HttpTranslator::new(endpoint.clone(), api_key.clone())?)
            }
        };
        Ok(Translator::new(backend, self.retry_policy()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_base_locale")]
    pub base_locale: String,
    #[serde(default = "default_target_locales")]
    pub target_locales: Vec<String>,
    #[serde(default = "default_max_examples_per_pair")]
    pub max_examples_per_pair: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub translator: TranslatorConfig,
    #[serde(default)]
    pub split: SplitRatios,
    #[serde(default)]
    pub train: FineTuneConfig,
}

fn default_seed() -> u64 {
    42
}
fn default_base_locale() -> String {
    "en".to_string()
}
fn default_target_locales() -> Vec<String> {
    vec!["en".to_string()]
}
fn default_max_examples_per_pair() -> usize {
    50
}
fn default_workers() -> usize {
    4
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            base_locale: default_base_locale(),
            target_locales: default_target_locales(),
            max_examples_per_pair: default_max_examples_per_pair(),
            workers: default_workers(),
            translator: TranslatorConfig::default(),
            split: SplitRatios::default(),
            train: FineTuneConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn expander_config(&self) -> ExpanderConfig {
        ExpanderConfig {
            base_locale: Locale::new(&self.base_locale),
            target_locales: self
                .target_locales
                .iter()
                .map(|tag| Locale::new(tag.as_str()))
                .collect(),
            max_examples_per_pair: self.max_examples_per_pair,
            workers: self.workers.max(1),
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!(config.target_locales, vec!["en".to_string()]);
        assert!(matches!(config.translator.kind, BackendKind::Identity));
        assert_eq!(config.split.train, 0.8);
    }

    #[test]
    fn test_http_backend_parses_from_toml() {
        let config: PipelineConfig = toml::from_str(
            r#"
            target_locales = ["en", "de", "fr"]

            [translator]
            backend = "http"
            endpoint = "https://translate.example/translate"
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.target_locales.len(), 3);
        assert_eq!(config.translator.max_attempts, 5);
        match &config.translator.kind {
            BackendKind::Http { endpoint, api_key } => {
                assert_eq!(endpoint, "https://translate.example/translate");
                assert!(api_key.is_none());
            }
            other => panic!("expected http backend, got {other:?}"),
        }
    }

    #[test]
    fn test_expander_config_lowercases_locales() {
        let config = PipelineConfig {
            base_locale: "EN".to_string(),
            target_locales: vec!["De".to_string()],
            ..PipelineConfig::default()
        };
        let expander = config.expander_config();
        assert_eq!(expander.base_locale, Locale::new("en"));
        assert_eq!(expander.target_locales, vec![Locale::new("de")]);
    }

    #[test]
    fn test_identity_translator_builds() {
        let translator = TranslatorConfig::default().build().unwrap();
        assert_eq!(translator.backend_name(), "identity");
    }
}
