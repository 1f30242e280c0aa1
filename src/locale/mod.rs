// Locale resource provider
//
// Resolves locale-specific slot vocabularies (color names, room names) and
// merges in locale-independent enumerations from the host intent schema.
// Pure lookup: the merged tables are built once at construction.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{PipelineError, Result};
use crate::schema::{IntentSchema, SlotSpec};

/// Language/region tag ("en", "de", "fr", ...). Stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locale(String);

impl Locale {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locale {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Built-in color vocabulary. Mirrors the CSS basic color set the upstream
/// entity registry exposes for lights.
const COLORS: &[(&str, &[&str])] = &[
    ("en", &["red", "blue", "green", "white", "yellow", "orange", "purple", "pink", "brown"]),
    ("de", &["rot", "blau", "grün", "weiß", "gelb", "orange", "lila", "rosa", "braun"]),
    ("fr", &["rouge", "bleu", "vert", "blanc", "jaune", "orange", "violet", "rose", "marron"]),
    ("es", &["rojo", "azul", "verde", "blanco", "amarillo", "naranja", "morado", "rosa", "marrón"]),
    ("nl", &["rood", "blauw", "groen", "wit", "geel", "oranje", "paars", "roze", "bruin"]),
];

const ROOMS: &[(&str, &[&str])] = &[
    ("en", &["kitchen", "living room", "bedroom", "bathroom", "office", "garage"]),
    ("de", &["küche", "wohnzimmer", "schlafzimmer", "badezimmer", "büro", "garage"]),
    ("fr", &["cuisine", "salon", "chambre", "salle de bain", "bureau", "garage"]),
    ("es", &["cocina", "salón", "dormitorio", "baño", "oficina", "garaje"]),
    ("nl", &["keuken", "woonkamer", "slaapkamer", "badkamer", "kantoor", "garage"]),
];

/// Resolves slot type + locale to a set of candidate values.
#[derive(Debug, Default)]
pub struct LocaleResources {
    /// (slot type, locale) -> candidates, for locale-sensitive vocab.
    localized: HashMap<(String, String), Vec<String>>,
    /// slot type -> candidates, for locale-independent enumerations
    /// (entity ids from the host schema are the same in every language).
    universal: HashMap<String, Vec<String>>,
}

impl LocaleResources {
    /// Provider with the built-in color and room vocabularies.
    pub fn builtin() -> Self {
        let mut provider = Self::default();
        for (slot, table) in [("color", COLORS), ("room", ROOMS)] {
            for (locale, values) in table {
                provider.register(
                    slot,
                    &Locale::new(*locale),
                    values.iter().map(|v| (*v).to_string()).collect(),
                );
            }
        }
        provider
    }

    /// Import every enumeration slot of the schema as a universal vocabulary.
    pub fn with_schema(mut self, schema: &IntentSchema) -> Self {
        for def in schema.intents.values() {
            for (slot, spec) in &def.slots {
                if let SlotSpec::Enumeration { values } = spec {
                    self.universal
                        .entry(slot.clone())
                        .or_default()
                        .extend(values.iter().cloned());
                }
            }
        }
        // Registering the same enumeration from two intents must not
        // duplicate candidates.
        for values in self.universal.values_mut() {
            values.sort();
            values.dedup();
        }
        self
    }

    /// Register (or extend) a locale-sensitive vocabulary.
    pub fn register(&mut self, slot_type: &str, locale: &Locale, values: Vec<String>) {
        self.localized
            .entry((slot_type.to_string(), locale.as_str().to_string()))
            .or_default()
            .extend(values);
    }

    /// Whether any resolver exists for this slot type, in any locale.
    pub fn knows(&self, slot_type: &str) -> bool {
        self.universal.contains_key(slot_type)
            || self.localized.keys().any(|(slot, _)| slot == slot_type)
    }

    /// Candidate values for `slot_type` in `locale`.
    ///
    /// Fails with `UnsupportedLocaleError` when no non-empty resource exists;
    /// the caller decides whether to skip the locale or fall back.
    pub fn resolve(&self, slot_type: &str, locale: &Locale) -> Result<&[String]> {
        let key = (slot_type.to_string(), locale.as_str().to_string());
        let values = self
            .localized
            .get(&key)
            .or_else(|| self.universal.get(slot_type))
            .filter(|values| !values.is_empty());

        values.map(Vec::as_slice).ok_or_else(|| PipelineError::UnsupportedLocale {
            slot_type: slot_type.to_string(),
            locale: locale.as_str().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_builtin_colors_resolve_per_locale() {
        let resources = LocaleResources::builtin();
        let en = resources.resolve("color", &Locale::new("en")).unwrap();
        let de = resources.resolve("color", &Locale::new("de")).unwrap();
        assert!(en.contains(&"red".to_string()));
        assert!(de.contains(&"rot".to_string()));
        assert_ne!(en, de);
    }

    #[test]
    fn test_unsupported_locale_is_an_error() {
        let resources = LocaleResources::builtin();
        let err = resources.resolve("color", &Locale::new("xx")).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedLocale { .. }));
    }

    #[test]
    fn test_unknown_slot_type_is_an_error() {
        let resources = LocaleResources::builtin();
        assert!(resources.resolve("flavor", &Locale::new("en")).is_err());
        assert!(!resources.knows("flavor"));
        assert!(resources.knows("color"));
    }

    #[test]
    fn test_schema_enumerations_resolve_in_every_locale() {
        let mut intents = BTreeMap::new();
        let mut slots = BTreeMap::new();
        slots.insert(
            "entity".to_string(),
            SlotSpec::Enumeration {
                values: vec!["light.kitchen".to_string(), "light.desk".to_string()],
            },
        );
        intents.insert("turn_on".to_string(), crate::schema::IntentDef { slots });
        let schema = IntentSchema { schema_version: 2, intents };

        let resources = LocaleResources::builtin().with_schema(&schema);
        for tag in ["en", "de", "fr"] {
            let values = resources.resolve("entity", &Locale::new(tag)).unwrap();
            assert_eq!(values, &["light.desk".to_string(), "light.kitchen".to_string()]);
        }
    }

    #[test]
    fn test_locale_tag_is_lowercased() {
        assert_eq!(Locale::new("EN").as_str(), "en");
    }
}
