// Configuration loading
//
// Resolution order: explicit path, then ~/.voiceforge/config.toml, then
// built-in defaults. Environment variables override the translation
// endpoint last, so deployments can point at a different service without
// editing the file.

use std::path::{Path, PathBuf};

use super::settings::{BackendKind, PipelineConfig};
use crate::error::{PipelineError, Result};

pub const ENV_TRANSLATE_ENDPOINT: &str = "VOICEFORGE_TRANSLATE_ENDPOINT";
pub const ENV_TRANSLATE_API_KEY: &str = "VOICEFORGE_TRANSLATE_API_KEY";

pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".voiceforge").join("config.toml"))
}

/// Load configuration, falling back to the default location and then to
/// defaults when no file exists.
pub fn load(explicit: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = match explicit {
        Some(path) => load_from(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => load_from(&path)?,
            _ => PipelineConfig::default(),
        },
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

pub fn load_from(path: &Path) -> Result<PipelineConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: PipelineConfig = toml::from_str(&contents).map_err(|e| {
        PipelineError::InvalidConfig(format!("failed to parse {}: {e}", path.display()))
    })?;
    tracing::debug!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

fn apply_env_overrides(config: &mut PipelineConfig) {
    if let Ok(endpoint) = std::env::var(ENV_TRANSLATE_ENDPOINT) {
        let api_key = match &config.translator.kind {
            BackendKind::Http { api_key, .. } => api_key.clone(),
            BackendKind::Identity => None,
        };
        config.translator.kind = BackendKind::Http { endpoint, api_key };
    }
    if let Ok(api_key) = std::env::var(ENV_TRANSLATE_API_KEY) {
        if let BackendKind::Http { endpoint, .. } = &config.translator.kind {
            config.translator.kind = BackendKind::Http {
                endpoint: endpoint.clone(),
                api_key: Some(api_key),
            };
        }
    }
}
