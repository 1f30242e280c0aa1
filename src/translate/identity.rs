// Identity backend
//
// Returns the input unchanged. Used for the base locale (no translation
// needed) and as the deterministic backend in tests.

use async_trait::async_trait;

use super::TranslationBackend;
use crate::error::Result;
use crate::locale::Locale;

#[derive(Debug, Default)]
pub struct IdentityTranslator;

#[async_trait]
impl TranslationBackend for IdentityTranslator {
    async fn translate(&self, text: &str, _source: &Locale, _target: &Locale) -> Result<String> {
        Ok(text.to_string())
    }

    fn name(&self) -> &str {
        "identity"
    }
}
