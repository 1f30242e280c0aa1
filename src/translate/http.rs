// HTTP translation backend
//
// Speaks the LibreTranslate-style JSON API: POST /translate with
// {q, source, target} returning {"translatedText": ...}. Any transport or
// server failure maps to TranslationUnavailableError so the expander can
// skip the affected (template, locale) pair instead of aborting.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::TranslationBackend;
use crate::error::{PipelineError, Result};
use crate::locale::Locale;

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

pub struct HttpTranslator {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTranslator {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    fn unavailable(&self, source: &Locale, target: &Locale, reason: String) -> PipelineError {
        PipelineError::TranslationUnavailable {
            source_locale: source.as_str().to_string(),
            target_locale: target.as_str().to_string(),
            reason,
        }
    }
}

#[async_trait]
impl TranslationBackend for HttpTranslator {
    async fn translate(&self, text: &str, source: &Locale, target: &Locale) -> Result<String> {
        let request = TranslateRequest {
            q: text,
            source: source.as_str(),
            target: target.as_str(),
            format: "text",
            api_key: self.api_key.as_deref(),
        };

        tracing::debug!(source = %source, target = %target, "Sending translation request");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.unavailable(source, target, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.unavailable(source, target, format!("status {status}: {body}")));
        }

        let parsed: TranslateResponse = response
            .json()
            .await
            .map_err(|e| self.unavailable(source, target, format!("bad response body: {e}")))?;

        Ok(parsed.translated_text)
    }

    fn name(&self) -> &str {
        "http"
    }
}
