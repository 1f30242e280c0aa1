// Model export
//
// Packages the best checkpoint of a finished run into a self-describing
// artifact directory: adapter weights, the intent schema the model was
// trained against, and a manifest tying both to the run.

use chrono::{DateTime, Utc};
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::schema::{IntentSchema, SCHEMA_VERSION};
use crate::train::checkpoint::{read_manifest, WEIGHTS_FILE};
use crate::train::{FineTuneRun, LoraConfig};

pub const ARTIFACT_FILE: &str = "artifact.json";
pub const SCHEMA_FILE: &str = "schema.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub schema_version: u32,
    pub run_id: String,
    pub base_model: Option<String>,
    pub lora: LoraConfig,
    pub best_step: usize,
    pub metrics: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub dir: PathBuf,
    pub manifest: ArtifactManifest,
}

pub struct Exporter {
    out_dir: PathBuf,
}

impl Exporter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    /// Export the checkpoint with the lowest validation loss.
    pub fn export(&self, run: &FineTuneRun, schema: &IntentSchema) -> Result<ModelArtifact> {
        let best = run
            .best_checkpoint()
            .ok_or_else(|| PipelineError::NoCheckpoint {
                run_id: run.id.to_string(),
            })?;

        let weights_path = best.dir.join(WEIGHTS_FILE);
        let weights = std::fs::read(&weights_path).map_err(|_| PipelineError::NoCheckpoint {
            run_id: run.id.to_string(),
        })?;
        verify_weights(&weights, &run.id.to_string())?;

        if schema.schema_version != SCHEMA_VERSION {
            return Err(PipelineError::SchemaMismatch(format!(
                "schema version {} does not match supported version {SCHEMA_VERSION}",
                schema.schema_version
            )));
        }

        let checkpoint_manifest = read_manifest(&best.dir)?;
        std::fs::create_dir_all(&self.out_dir)?;
        std::fs::write(self.out_dir.join(WEIGHTS_FILE), &weights)?;
        std::fs::write(
            self.out_dir.join(SCHEMA_FILE),
            serde_json::to_string_pretty(schema)?,
        )?;

        let manifest = ArtifactManifest {
            schema_version: schema.schema_version,
            run_id: run.id.to_string(),
            base_model: run.config.base_model.clone(),
            lora: run.config.lora.clone(),
            best_step: best.step,
            metrics: checkpoint_manifest.metrics,
            created_at: Utc::now(),
        };
        std::fs::write(
            self.out_dir.join(ARTIFACT_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        tracing::info!(
            run = %run.id,
            step = best.step,
            out = %self.out_dir.display(),
            "Exported model artifact"
        );
        Ok(ModelArtifact {
            dir: self.out_dir.clone(),
            manifest,
        })
    }
}

/// Reject empty or structurally invalid safetensors payloads before they
/// land in an artifact.
fn verify_weights(data: &[u8], run_id: &str) -> Result<()> {
    let tensors = SafeTensors::deserialize(data).map_err(|e| {
        PipelineError::SchemaMismatch(format!("corrupt adapter weights for run {run_id}: {e}"))
    })?;
    if tensors.names().is_empty() {
        return Err(PipelineError::NoCheckpoint {
            run_id: run_id.to_string(),
        });
    }
    Ok(())
}

pub fn load_manifest(artifact_dir: &Path) -> Result<ArtifactManifest> {
    let contents = std::fs::read_to_string(artifact_dir.join(ARTIFACT_FILE))?;
    Ok(serde_json::from_str(&contents)?)
}
