// HuggingFace Hub fetch
//
// Thin wrapper over hf-hub's sync API: files land in the shared hub cache
// and repeated fetches are no-ops.

use hf_hub::api::sync::Api;
use std::path::PathBuf;

use crate::error::{PipelineError, Result};

/// Download (or reuse from cache) one file from a Hub model repo.
pub fn fetch(repo_id: &str, filename: &str) -> Result<PathBuf> {
    tracing::info!(repo = repo_id, file = filename, "Fetching from HuggingFace Hub");
    let unavailable = |reason: String| PipelineError::HubUnavailable {
        repo: repo_id.to_string(),
        resource: filename.to_string(),
        reason,
    };
    let api = Api::new().map_err(|e| unavailable(format!("api initialization failed: {e}")))?;
    let path = api
        .model(repo_id.to_string())
        .get(filename)
        .map_err(|e| unavailable(e.to_string()))?;
    Ok(path)
}

pub fn fetch_tokenizer(repo_id: &str) -> Result<PathBuf> {
    fetch(repo_id, "tokenizer.json")
}

pub fn fetch_base_weights(repo_id: &str) -> Result<PathBuf> {
    fetch(repo_id, "model.safetensors")
}
