// Expansion under a partially failing translation backend: pairs targeting
// the broken locale are skipped and reported once, everything else expands.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use voiceforge::error::{PipelineError, Result};
use voiceforge::expand::{ExpanderConfig, IntentTemplate, SkipReason, TemplateExpander};
use voiceforge::locale::{Locale, LocaleResources};
use voiceforge::translate::{RetryPolicy, TranslationBackend, Translator};

/// Echoes text for every locale except French, which always fails.
struct FrenchOutage {
    calls: AtomicUsize,
}

#[async_trait]
impl TranslationBackend for FrenchOutage {
    async fn translate(&self, text: &str, source: &Locale, target: &Locale) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if target.as_str() == "fr" {
            return Err(PipelineError::TranslationUnavailable {
                source_locale: source.as_str().to_string(),
                target_locale: target.as_str().to_string(),
                reason: "service outage".to_string(),
            });
        }
        Ok(text.to_string())
    }

    fn name(&self) -> &str {
        "french-outage"
    }
}

fn templates() -> Vec<IntentTemplate> {
    vec![
        IntentTemplate {
            id: "light-on".to_string(),
            intent: "turn_on".to_string(),
            phrases: vec!["turn on the {color} light".to_string()],
            weight: 1,
        },
        IntentTemplate {
            id: "light-off".to_string(),
            intent: "turn_off".to_string(),
            phrases: vec!["turn off the {color} light".to_string()],
            weight: 1,
        },
    ]
}

fn expander(backend: Arc<dyn TranslationBackend>, locales: &[&str]) -> TemplateExpander {
    let translator = Translator::new(
        backend,
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
        },
    );
    TemplateExpander::new(
        Arc::new(LocaleResources::builtin()),
        Arc::new(translator),
        ExpanderConfig {
            base_locale: Locale::new("en"),
            target_locales: locales.iter().map(|l| Locale::new(*l)).collect(),
            max_examples_per_pair: 10,
            workers: 3,
            seed: 1,
        },
    )
}

#[tokio::test]
async fn test_unavailable_locale_is_skipped_not_fatal() {
    let backend = Arc::new(FrenchOutage {
        calls: AtomicUsize::new(0),
    });
    let report = expander(backend, &["en", "de", "fr"])
        .expand(&templates())
        .await
        .unwrap();

    // Both templates expanded for en and de.
    for locale in ["en", "de"] {
        for template_id in ["light-on", "light-off"] {
            assert!(
                report
                    .examples
                    .iter()
                    .any(|e| e.locale.as_str() == locale
                        && e.provenance.template_id == template_id),
                "missing examples for ({template_id}, {locale})"
            );
        }
    }
    assert!(report.examples.iter().all(|e| e.locale.as_str() != "fr"));

    // Exactly one skip record per French pair, each naming the outage.
    assert_eq!(report.skipped.len(), 2);
    for skip in &report.skipped {
        assert_eq!(skip.locale.as_str(), "fr");
        assert!(matches!(
            skip.reason,
            SkipReason::TranslationUnavailable { .. }
        ));
    }
}

#[tokio::test]
async fn test_retry_exhaustion_precedes_the_skip() {
    let backend = Arc::new(FrenchOutage {
        calls: AtomicUsize::new(0),
    });
    let report = expander(backend.clone(), &["fr"])
        .expand(&templates())
        .await
        .unwrap();

    assert!(report.examples.is_empty());
    assert_eq!(report.skipped.len(), 2);
    // Two attempts per phrase before giving up; failures are never cached.
    assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
}
