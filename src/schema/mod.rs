// Intent schema input
//
// The home-automation host exposes its intent/entity definitions as a JSON
// mapping from intent name to required slot types. The schema is read-only
// input here; a snapshot of it travels with the exported artifact so the
// consuming integration can reject incompatible adapters at load time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{PipelineError, Result};

/// Bumped whenever the label format changes in a way the voice integration
/// must know about.
pub const SCHEMA_VERSION: u32 = 2;

/// How a slot's values are constrained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotSpec {
    /// Closed set of admissible values (e.g. device entity ids).
    Enumeration { values: Vec<String> },
    /// Free-text classification; any non-empty string is admissible.
    FreeText,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentDef {
    /// Slot type name -> value constraint.
    #[serde(default)]
    pub slots: BTreeMap<String, SlotSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSchema {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub intents: BTreeMap<String, IntentDef>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl IntentSchema {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn intent(&self, name: &str) -> Option<&IntentDef> {
        self.intents.get(name)
    }

    /// Check one (intent, slot-value map) label against the schema.
    pub fn check_label(&self, intent: &str, slots: &BTreeMap<String, String>) -> Result<()> {
        let def = self.intent(intent).ok_or_else(|| {
            PipelineError::SchemaMismatch(format!("unknown intent '{intent}'"))
        })?;

        for (slot, value) in slots {
            match def.slots.get(slot) {
                None => {
                    return Err(PipelineError::SchemaMismatch(format!(
                        "intent '{intent}' does not declare slot type '{slot}'"
                    )));
                }
                Some(SlotSpec::Enumeration { values }) => {
                    if !values.iter().any(|v| v == value) {
                        return Err(PipelineError::SchemaMismatch(format!(
                            "value '{value}' is outside the enumeration for slot \
                             '{slot}' of intent '{intent}'"
                        )));
                    }
                }
                Some(SlotSpec::FreeText) => {
                    if value.trim().is_empty() {
                        return Err(PipelineError::SchemaMismatch(format!(
                            "empty value for free-text slot '{slot}' of intent '{intent}'"
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}
