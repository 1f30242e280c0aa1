// Intent templates and slot anchoring
//
// Templates carry phrases with named slots ("turn on the {color} light").
// Before a phrase is sent through translation, each slot is replaced by an
// opaque anchor token ("[[0]]") that survives the backend untouched; after
// translation the anchors are verified and slot values substituted in place.
// Labels are keyed by slot name, so a backend reordering the anchors is
// harmless.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::locale::LocaleResources;

pub mod expander;

pub use expander::{ExpanderConfig, ExpansionReport, SkipReason, SkippedPair, TemplateExpander};

static SLOT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z][a-z0-9_]*)\}").expect("slot pattern is valid"));

/// An intent template: one target label, one or more phrasings with named
/// slots, and a weight multiplier controlling how many examples it may yield.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentTemplate {
    pub id: String,
    pub intent: String,
    pub phrases: Vec<String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl IntentTemplate {
    pub fn load_all(path: &std::path::Path) -> Result<Vec<Self>> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Slot names referenced by a phrase, in first-occurrence order, deduplicated.
pub fn slot_refs(phrase: &str) -> Vec<String> {
    let mut refs = Vec::new();
    for capture in SLOT_PATTERN.captures_iter(phrase) {
        let name = capture[1].to_string();
        if !refs.contains(&name) {
            refs.push(name);
        }
    }
    refs
}

fn anchor_token(index: usize) -> String {
    format!("[[{index}]]")
}

/// Replace every `{slot}` occurrence with its anchor token.
pub fn anchor(phrase: &str, slots: &[String]) -> String {
    let mut anchored = phrase.to_string();
    for (index, slot) in slots.iter().enumerate() {
        anchored = anchored.replace(&format!("{{{slot}}}"), &anchor_token(index));
    }
    anchored
}

/// True when every anchor occurs in `translated` exactly as often as in
/// `source`; a backend that drops or duplicates an anchor loses the slot
/// alignment guarantee.
pub fn anchors_survived(source: &str, translated: &str, slot_count: usize) -> bool {
    (0..slot_count).all(|index| {
        let token = anchor_token(index);
        source.matches(&token).count() == translated.matches(&token).count()
            && translated.matches(&token).count() > 0
    })
}

/// Substitute slot values for anchors.
pub fn substitute(anchored: &str, values: &[&str]) -> String {
    let mut utterance = anchored.to_string();
    for (index, value) in values.iter().enumerate() {
        utterance = utterance.replace(&anchor_token(index), value);
    }
    utterance
}

/// Invariant check: every slot referenced in any template phrase must have a
/// registered resolver.
pub fn validate_templates(templates: &[IntentTemplate], resources: &LocaleResources) -> Result<()> {
    for template in templates {
        if template.phrases.is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "template '{}' has no phrases",
                template.id
            )));
        }
        for phrase in &template.phrases {
            for slot in slot_refs(phrase) {
                if !resources.knows(&slot) {
                    return Err(PipelineError::InvalidConfig(format!(
                        "template '{}' references slot '{slot}' with no registered resolver",
                        template.id
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locale::Locale;

    #[test]
    fn test_slot_refs_in_order_without_duplicates() {
        assert_eq!(
            slot_refs("set the {room} light to {color} in the {room}"),
            vec!["room".to_string(), "color".to_string()]
        );
        assert!(slot_refs("turn everything off").is_empty());
    }

    #[test]
    fn test_anchor_and_substitute_round_trip() {
        let slots = slot_refs("turn on the {color} light");
        let anchored = anchor("turn on the {color} light", &slots);
        assert_eq!(anchored, "turn on the [[0]] light");
        assert_eq!(substitute(&anchored, &["red"]), "turn on the red light");
    }

    #[test]
    fn test_anchor_survival_detects_dropped_anchor() {
        let slots = vec!["color".to_string()];
        let anchored = anchor("turn on the {color} light", &slots);
        assert!(anchors_survived(&anchored, "schalte das [[0]] licht ein", slots.len()));
        assert!(!anchors_survived(&anchored, "schalte das licht ein", slots.len()));
        assert!(!anchors_survived(&anchored, "[[0]] und [[0]]", slots.len()));
    }

    #[test]
    fn test_reordered_anchors_still_survive() {
        let slots = vec!["color".to_string(), "room".to_string()];
        let anchored = anchor("turn the {room} light {color}", &slots);
        assert!(anchors_survived(&anchored, "mets [[0]] la lumière de [[1]]", slots.len()));
    }

    #[test]
    fn test_validate_rejects_unresolvable_slot() {
        let resources = crate::locale::LocaleResources::builtin();
        let template = IntentTemplate {
            id: "t1".to_string(),
            intent: "turn_on".to_string(),
            phrases: vec!["turn on the {gadget}".to_string()],
            weight: 1,
        };
        assert!(validate_templates(std::slice::from_ref(&template), &resources).is_err());

        let ok = IntentTemplate {
            phrases: vec!["turn on the {color} light".to_string()],
            ..template
        };
        assert!(validate_templates(std::slice::from_ref(&ok), &resources).is_ok());
        // sanity: the resolver the valid template relies on exists
        assert!(resources.resolve("color", &Locale::new("en")).is_ok());
    }
}
