// Translation adapter
//
// Wraps a translation backend behind a capability trait, with deterministic
// caching, in-flight de-duplication, bounded retry, and output normalization
// so translated phrasing lines up with templated text.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::locale::Locale;

pub mod cache;
pub mod http;
pub mod identity;
pub mod retry;

pub use cache::TranslationCache;
pub use http::HttpTranslator;
pub use identity::IdentityTranslator;
pub use retry::RetryPolicy;

/// A translation backend. Implementations map their own failure modes to
/// `PipelineError::TranslationUnavailable`.
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    async fn translate(&self, text: &str, source: &Locale, target: &Locale) -> Result<String>;

    /// Backend name, recorded in example provenance.
    fn name(&self) -> &str;
}

/// Normalize backend output for consistency with templated text: lowercase,
/// collapsed whitespace, no trailing sentence punctuation.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(['.', '!', '?', '…'])
        .trim()
        .to_string()
}

/// The adapter the expander talks to: backend + cache + retry policy.
pub struct Translator {
    backend: Arc<dyn TranslationBackend>,
    cache: Arc<TranslationCache>,
    retry: RetryPolicy,
}

impl Translator {
    pub fn new(backend: Arc<dyn TranslationBackend>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            cache: Arc::new(TranslationCache::new()),
            retry,
        }
    }

    /// Share an existing cache (warm-cache reruns).
    pub fn with_cache(mut self, cache: Arc<TranslationCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn cache(&self) -> Arc<TranslationCache> {
        Arc::clone(&self.cache)
    }

    /// Translate with caching and retry. Repeated calls with identical inputs
    /// return the cached result without re-invoking the backend.
    pub async fn translate(&self, text: &str, source: &Locale, target: &Locale) -> Result<String> {
        let key = (
            text.to_string(),
            source.as_str().to_string(),
            target.as_str().to_string(),
        );
        let backend = Arc::clone(&self.backend);
        let retry = self.retry.clone();

        self.cache
            .get_or_translate(key, || async move {
                let raw = retry
                    .run(|| backend.translate(text, source, target))
                    .await?;
                Ok(normalize(&raw))
            })
            .await
    }
}
