// Template expander
//
// Expands every (template, locale) pair into labeled training examples.
// Translation calls run concurrently through a bounded worker pool; results
// are merged in (template id, locale) order so output is reproducible
// regardless of completion order. A pair whose locale resolution or
// translation fails is skipped and reported, never fatal.

use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

use super::{anchor, anchors_survived, slot_refs, substitute, validate_templates, IntentTemplate};
use crate::dataset::{IntentLabel, Provenance, TrainingExample};
use crate::error::Result;
use crate::locale::{Locale, LocaleResources};
use crate::translate::{normalize, Translator};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpanderConfig {
    pub base_locale: Locale,
    pub target_locales: Vec<Locale>,
    /// Cap on examples per (template, locale) pair, before the template's
    /// weight multiplier. Prevents combinatorial blowup on multi-slot
    /// templates.
    pub max_examples_per_pair: usize,
    pub workers: usize,
    pub seed: u64,
}

impl Default for ExpanderConfig {
    fn default() -> Self {
        Self {
            base_locale: Locale::new("en"),
            target_locales: vec![Locale::new("en")],
            max_examples_per_pair: 50,
            workers: 4,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnsupportedLocale { slot_type: String },
    TranslationUnavailable { reason: String },
    AnchorLost { phrase: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedLocale { slot_type } => {
                write!(f, "no vocabulary for slot '{slot_type}'")
            }
            Self::TranslationUnavailable { reason } => {
                write!(f, "translation unavailable: {reason}")
            }
            Self::AnchorLost { phrase } => {
                write!(f, "slot anchor lost in translation of '{phrase}'")
            }
        }
    }
}

/// A (template, locale) pair that was dropped, and why.
#[derive(Debug, Clone)]
pub struct SkippedPair {
    pub template_id: String,
    pub intent: String,
    pub locale: Locale,
    pub reason: SkipReason,
}

#[derive(Debug, Default)]
pub struct ExpansionReport {
    pub examples: Vec<TrainingExample>,
    pub skipped: Vec<SkippedPair>,
}

pub struct TemplateExpander {
    resources: Arc<LocaleResources>,
    translator: Arc<Translator>,
    config: ExpanderConfig,
}

impl TemplateExpander {
    pub fn new(
        resources: Arc<LocaleResources>,
        translator: Arc<Translator>,
        config: ExpanderConfig,
    ) -> Self {
        Self {
            resources,
            translator,
            config,
        }
    }

    /// Expand all templates across all target locales.
    ///
    /// Idempotent: with identical resources and a warm translation cache the
    /// produced example set is byte-identical between runs.
    pub async fn expand(&self, templates: &[IntentTemplate]) -> Result<ExpansionReport> {
        validate_templates(templates, &self.resources)?;

        let pairs: Vec<(&IntentTemplate, &Locale)> = templates
            .iter()
            .flat_map(|t| self.config.target_locales.iter().map(move |l| (t, l)))
            .collect();

        let mut outcomes = stream::iter(pairs.into_iter().map(|(template, locale)| async move {
            let outcome = self.expand_pair(template, locale).await;
            (template, locale.clone(), outcome)
        }))
        .buffer_unordered(self.config.workers.max(1))
        .collect::<Vec<_>>()
        .await;

        // Deterministic merge regardless of completion order.
        outcomes.sort_by(|a, b| (&a.0.id, &a.1).cmp(&(&b.0.id, &b.1)));

        let mut report = ExpansionReport::default();
        for (template, locale, outcome) in outcomes {
            match outcome {
                Ok(examples) => report.examples.extend(examples),
                Err(reason) => {
                    tracing::warn!(
                        template_id = %template.id,
                        intent = %template.intent,
                        locale = %locale,
                        %reason,
                        "Skipping (template, locale) pair"
                    );
                    report.skipped.push(SkippedPair {
                        template_id: template.id.clone(),
                        intent: template.intent.clone(),
                        locale,
                        reason,
                    });
                }
            }
        }

        tracing::info!(
            examples = report.examples.len(),
            skipped = report.skipped.len(),
            "Expansion finished"
        );
        Ok(report)
    }

    async fn expand_pair(
        &self,
        template: &IntentTemplate,
        locale: &Locale,
    ) -> std::result::Result<Vec<TrainingExample>, SkipReason> {
        let mut rng = StdRng::seed_from_u64(pair_seed(self.config.seed, &template.id, locale));
        let mut budget = self
            .config
            .max_examples_per_pair
            .saturating_mul(template.weight.max(1) as usize);
        let mut examples = Vec::new();

        for phrase in &template.phrases {
            if budget == 0 {
                break;
            }

            let slots = slot_refs(phrase);
            let mut candidates: Vec<&[String]> = Vec::with_capacity(slots.len());
            for slot in &slots {
                match self.resources.resolve(slot, locale) {
                    Ok(values) => candidates.push(values),
                    Err(_) => {
                        return Err(SkipReason::UnsupportedLocale {
                            slot_type: slot.clone(),
                        })
                    }
                }
            }

            let anchored = anchor(phrase, &slots);
            let localized = if locale == &self.config.base_locale {
                normalize(&anchored)
            } else {
                match self
                    .translator
                    .translate(&anchored, &self.config.base_locale, locale)
                    .await
                {
                    Ok(text) => text,
                    Err(e) => {
                        return Err(SkipReason::TranslationUnavailable {
                            reason: e.to_string(),
                        })
                    }
                }
            };

            if !slots.is_empty() && !anchors_survived(&anchored, &localized, slots.len()) {
                return Err(SkipReason::AnchorLost {
                    phrase: phrase.clone(),
                });
            }

            // The cross-product can exceed usize for many-slot templates;
            // combinations past the budget are unreachable anyway.
            let total = candidates
                .iter()
                .try_fold(1usize, |acc, c| acc.checked_mul(c.len()))
                .unwrap_or(budget);
            let take = total.min(budget);
            let chosen: Vec<usize> = if take == total {
                (0..total).collect()
            } else {
                // Uniform sample without replacement instead of enumerating
                // the full cross-product.
                let mut sampled = rand::seq::index::sample(&mut rng, total, take).into_vec();
                sampled.sort_unstable();
                sampled
            };

            for combo in chosen {
                let values = decode_combo(combo, &candidates);
                let utterance = substitute(&localized, &values);
                let mut slot_values = std::collections::BTreeMap::new();
                for (slot, value) in slots.iter().zip(&values) {
                    slot_values.insert(slot.clone(), (*value).to_string());
                }
                examples.push(TrainingExample {
                    utterance,
                    label: IntentLabel {
                        intent: template.intent.clone(),
                        slots: slot_values,
                    },
                    locale: locale.clone(),
                    provenance: Provenance {
                        template_id: template.id.clone(),
                        backend: self.translator.backend_name().to_string(),
                    },
                });
            }
            budget -= take;
        }

        Ok(examples)
    }
}

/// Mixed-radix decode of a combination index into one value per slot.
fn decode_combo<'a>(mut index: usize, candidates: &[&'a [String]]) -> Vec<&'a str> {
    let mut values = Vec::with_capacity(candidates.len());
    for slot_values in candidates.iter().rev() {
        let len = slot_values.len();
        values.push(slot_values[index % len].as_str());
        index /= len;
    }
    values.reverse();
    values
}

/// Stable per-(template, locale) RNG seed, so re-running the expander with
/// identical state reproduces the same samples.
fn pair_seed(seed: u64, template_id: &str, locale: &Locale) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(template_id.as_bytes());
    hasher.update(locale.as_str().as_bytes());
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[..8].try_into().expect("digest is long enough"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::{IdentityTranslator, RetryPolicy};

    fn expander(resources: LocaleResources, config: ExpanderConfig) -> TemplateExpander {
        let translator = Arc::new(Translator::new(
            Arc::new(IdentityTranslator),
            RetryPolicy::default(),
        ));
        TemplateExpander::new(Arc::new(resources), translator, config)
    }

    fn color_template() -> IntentTemplate {
        IntentTemplate {
            id: "light_on_color".to_string(),
            intent: "turn_on".to_string(),
            phrases: vec!["turn on the {color} light".to_string()],
            weight: 1,
        }
    }

    #[tokio::test]
    async fn test_two_colors_expand_to_exactly_two_examples() {
        let mut resources = LocaleResources::default();
        resources.register(
            "color",
            &Locale::new("en"),
            vec!["red".to_string(), "blue".to_string()],
        );
        let expander = expander(resources, ExpanderConfig::default());

        let report = expander.expand(&[color_template()]).await.unwrap();

        assert!(report.skipped.is_empty());
        let utterances: Vec<_> = report.examples.iter().map(|e| e.utterance.as_str()).collect();
        assert_eq!(utterances, vec!["turn on the red light", "turn on the blue light"]);
        for example in &report.examples {
            assert_eq!(example.label.intent, "turn_on");
            let color = example.label.slots.get("color").unwrap();
            assert!(example.utterance.contains(color.as_str()));
        }
    }

    #[tokio::test]
    async fn test_cap_limits_combinations_without_replacement() {
        let mut resources = LocaleResources::default();
        resources.register(
            "color",
            &Locale::new("en"),
            (0..20).map(|i| format!("c{i}")).collect(),
        );
        resources.register(
            "room",
            &Locale::new("en"),
            (0..20).map(|i| format!("r{i}")).collect(),
        );
        let config = ExpanderConfig {
            max_examples_per_pair: 10,
            ..ExpanderConfig::default()
        };
        let expander = expander(resources, config);

        let template = IntentTemplate {
            id: "t".to_string(),
            intent: "turn_on".to_string(),
            phrases: vec!["turn on the {color} light in the {room}".to_string()],
            weight: 1,
        };
        let report = expander.expand(std::slice::from_ref(&template)).await.unwrap();

        assert_eq!(report.examples.len(), 10);
        let unique: std::collections::HashSet<_> =
            report.examples.iter().map(|e| &e.utterance).collect();
        assert_eq!(unique.len(), 10);
    }

    #[tokio::test]
    async fn test_cross_product_overflow_is_clamped_to_the_budget() {
        // 300^8 combinations overflow usize; expansion must still yield
        // exactly the budgeted number of examples.
        let slot_names: Vec<String> = (0..8).map(|i| format!("part{i}")).collect();
        let mut resources = LocaleResources::default();
        for name in &slot_names {
            resources.register(
                name,
                &Locale::new("en"),
                (0..300).map(|i| format!("v{i}")).collect(),
            );
        }
        let config = ExpanderConfig {
            max_examples_per_pair: 4,
            ..ExpanderConfig::default()
        };
        let expander = expander(resources, config);

        let phrase = slot_names
            .iter()
            .map(|name| format!("{{{name}}}"))
            .collect::<Vec<_>>()
            .join(" ");
        let template = IntentTemplate {
            id: "t".to_string(),
            intent: "configure".to_string(),
            phrases: vec![phrase],
            weight: 1,
        };

        let report = expander.expand(std::slice::from_ref(&template)).await.unwrap();
        assert_eq!(report.examples.len(), 4);
        for example in &report.examples {
            assert_eq!(example.label.slots.len(), 8);
        }
    }

    #[tokio::test]
    async fn test_expansion_is_idempotent() {
        let config = ExpanderConfig {
            max_examples_per_pair: 5,
            ..ExpanderConfig::default()
        };

        let template = color_template();
        let mut runs = Vec::new();
        for _ in 0..2 {
            let mut resources = LocaleResources::default();
            resources.register(
                "color",
                &Locale::new("en"),
                (0..30).map(|i| format!("c{i}")).collect(),
            );
            let expander = expander(resources, config.clone());
            let report = expander.expand(std::slice::from_ref(&template)).await.unwrap();
            runs.push(report.examples);
        }

        assert_eq!(runs[0], runs[1]);
    }

    #[tokio::test]
    async fn test_unsupported_locale_is_skipped_not_fatal() {
        let mut resources = LocaleResources::default();
        resources.register(
            "color",
            &Locale::new("en"),
            vec!["red".to_string()],
        );
        let config = ExpanderConfig {
            target_locales: vec![Locale::new("en"), Locale::new("de")],
            ..ExpanderConfig::default()
        };
        let expander = expander(resources, config);

        let report = expander.expand(&[color_template()]).await.unwrap();

        assert_eq!(report.examples.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        let skip = &report.skipped[0];
        assert_eq!(skip.locale, Locale::new("de"));
        assert!(matches!(
            skip.reason,
            SkipReason::UnsupportedLocale { ref slot_type } if slot_type == "color"
        ));
    }

    #[tokio::test]
    async fn test_weight_multiplies_the_cap() {
        let mut resources = LocaleResources::default();
        resources.register(
            "color",
            &Locale::new("en"),
            (0..12).map(|i| format!("c{i}")).collect(),
        );
        let config = ExpanderConfig {
            max_examples_per_pair: 4,
            ..ExpanderConfig::default()
        };
        let expander = expander(resources, config);

        let template = IntentTemplate {
            weight: 2,
            ..color_template()
        };
        let report = expander.expand(std::slice::from_ref(&template)).await.unwrap();
        assert_eq!(report.examples.len(), 8);
    }

    #[test]
    fn test_decode_combo_covers_the_cross_product() {
        let colors = vec!["red".to_string(), "blue".to_string()];
        let rooms = vec!["kitchen".to_string(), "office".to_string(), "garage".to_string()];
        let candidates: Vec<&[String]> = vec![&colors, &rooms];

        let mut seen = std::collections::HashSet::new();
        for index in 0..6 {
            seen.insert(decode_combo(index, &candidates));
        }
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn test_pair_seed_differs_per_template_and_locale() {
        let en = Locale::new("en");
        let de = Locale::new("de");
        assert_ne!(pair_seed(42, "a", &en), pair_seed(42, "a", &de));
        assert_ne!(pair_seed(42, "a", &en), pair_seed(42, "b", &en));
        assert_eq!(pair_seed(42, "a", &en), pair_seed(42, "a", &en));
    }
}
