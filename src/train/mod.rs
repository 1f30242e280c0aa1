// Fine-tuning driver
//
// A FineTuneRun is the explicit mutable training state: configuration,
// lifecycle state machine, produced checkpoints, and evaluation history.
// The trainer mutates it by reference; there are no process-wide singletons.

use candle_core::DType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{PipelineError, Result};

pub mod checkpoint;
pub mod hub;
pub mod lora;
pub mod model;
pub mod trainer;

pub use checkpoint::{CheckpointManifest, CheckpointStore};
pub use lora::{LoraConfig, LoraLayer};
pub use model::IntentLm;
pub use trainer::Trainer;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Storage dtype of the model during training. Candle's CPU path has no
/// int8 linear, so reduced precision is the quantization knob offered here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantMode {
    F32,
    F16,
    Bf16,
}

impl Default for QuantMode {
    fn default() -> Self {
        Self::F32
    }
}

impl QuantMode {
    pub fn dtype(self) -> DType {
        match self {
            Self::F32 => DType::F32,
            Self::F16 => DType::F16,
            Self::Bf16 => DType::BF16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FineTuneConfig {
    /// HuggingFace Hub repo id used to fetch the tokenizer and base weights
    /// when no local paths are given.
    #[serde(default)]
    pub base_model: Option<String>,
    #[serde(default)]
    pub tokenizer_path: Option<PathBuf>,
    #[serde(default)]
    pub base_weights: Option<PathBuf>,

    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
    #[serde(default = "default_blocks")]
    pub blocks: usize,
    #[serde(default)]
    pub lora: LoraConfig,
    #[serde(default)]
    pub quant: QuantMode,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Evaluate on the validation partition (and checkpoint) every N steps.
    #[serde(default = "default_eval_every")]
    pub eval_every: usize,
    /// Stop when validation loss has not improved by `min_delta` over this
    /// many consecutive evaluations.
    #[serde(default = "default_patience")]
    pub early_stop_patience: usize,
    #[serde(default = "default_min_delta")]
    pub min_delta: f64,
    #[serde(default = "default_max_seq_len")]
    pub max_seq_len: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_hidden_size() -> usize {
    64
}
fn default_blocks() -> usize {
    2
}
fn default_learning_rate() -> f64 {
    1e-3
}
fn default_batch_size() -> usize {
    8
}
fn default_max_steps() -> usize {
    200
}
fn default_eval_every() -> usize {
    20
}
fn default_patience() -> usize {
    3
}
fn default_min_delta() -> f64 {
    1e-3
}
fn default_max_seq_len() -> usize {
    64
}
fn default_seed() -> u64 {
    42
}

impl Default for FineTuneConfig {
    fn default() -> Self {
        Self {
            base_model: None,
            tokenizer_path: None,
            base_weights: None,
            hidden_size: default_hidden_size(),
            blocks: default_blocks(),
            lora: LoraConfig::default(),
            quant: QuantMode::default(),
            learning_rate: default_learning_rate(),
            batch_size: default_batch_size(),
            max_steps: default_max_steps(),
            eval_every: default_eval_every(),
            early_stop_patience: default_patience(),
            min_delta: default_min_delta(),
            max_seq_len: default_max_seq_len(),
            seed: default_seed(),
        }
    }
}

impl FineTuneConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(PipelineError::InvalidConfig(
                "learning_rate must be > 0".to_string(),
            ));
        }
        if self.batch_size == 0 || self.max_steps == 0 || self.eval_every == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch_size, max_steps and eval_every must be >= 1".to_string(),
            ));
        }
        if self.early_stop_patience == 0 {
            return Err(PipelineError::InvalidConfig(
                "early_stop_patience must be >= 1".to_string(),
            ));
        }
        if self.hidden_size < 8 || self.blocks == 0 {
            return Err(PipelineError::InvalidConfig(
                "hidden_size must be >= 8 and blocks >= 1".to_string(),
            ));
        }
        if self.max_seq_len < 2 {
            return Err(PipelineError::InvalidConfig(
                "max_seq_len must be >= 2".to_string(),
            ));
        }
        self.lora.validate()?;
        if self.tokenizer_path.is_none() && self.base_model.is_none() {
            return Err(PipelineError::InvalidConfig(
                "either tokenizer_path or base_model is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reference to a durably written checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub step: usize,
    pub dir: PathBuf,
    pub val_loss: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EvalRecord {
    pub step: usize,
    pub train_loss: f64,
    pub val_loss: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunState {
    Configured,
    Running,
    Completed,
    Failed {
        reason: String,
        last_checkpoint: Option<CheckpointRef>,
    },
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FineTuneRun {
    pub id: RunId,
    pub config: FineTuneConfig,
    pub state: RunState,
    pub checkpoints: Vec<CheckpointRef>,
    pub evals: Vec<EvalRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl FineTuneRun {
    pub fn new(config: FineTuneConfig) -> Self {
        Self {
            id: RunId::new(),
            config,
            state: RunState::Configured,
            checkpoints: Vec::new(),
            evals: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Best checkpoint by tracked validation loss, which is not necessarily
    /// the last one written.
    pub fn best_checkpoint(&self) -> Option<&CheckpointRef> {
        self.checkpoints
            .iter()
            .min_by(|a, b| a.val_loss.total_cmp(&b.val_loss))
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.state, RunState::Configured | RunState::Running)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}
