// Intent language model
//
// Compact causal next-token model: token embedding, a stack of frozen
// projection blocks with LoRA adapters, and a vocabulary head. The frozen
// base either comes from a safetensors file (downloaded base model) or is
// randomly initialized; in both cases only the adapters train.

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Embedding, Linear, VarBuilder, VarMap};
use std::path::Path;

use super::lora::LoraLayer;
use super::FineTuneConfig;
use crate::error::{PipelineError, Result};

pub struct IntentLm {
    embed: Embedding,
    blocks: Vec<Linear>,
    head: Linear,
    adapters: Vec<LoraLayer>,
}

impl IntentLm {
    pub fn new(
        config: &FineTuneConfig,
        vocab_size: usize,
        base_vb: VarBuilder,
        lora_vb: VarBuilder,
    ) -> Result<Self> {
        let hidden = config.hidden_size;
        let embed = candle_nn::embedding(vocab_size, hidden, base_vb.pp("embed"))?;

        let mut blocks = Vec::with_capacity(config.blocks);
        let mut adapters = Vec::with_capacity(config.blocks);
        for index in 0..config.blocks {
            blocks.push(candle_nn::linear(
                hidden,
                hidden,
                base_vb.pp(format!("blocks.{index}")),
            )?);
            adapters.push(LoraLayer::new(
                hidden,
                &config.lora,
                lora_vb.pp(format!("blocks.{index}")),
            )?);
        }

        let head = candle_nn::linear(hidden, vocab_size, base_vb.pp("head"))?;

        Ok(Self {
            embed,
            blocks,
            head,
            adapters,
        })
    }

    /// Logits over the vocabulary for every position: [batch, seq, vocab].
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        let mut hidden = self.embed.forward(token_ids)?;
        for (block, adapter) in self.blocks.iter().zip(&self.adapters) {
            let base_output = block.forward(&hidden)?;
            hidden = adapter.forward(&hidden, &base_output)?.gelu()?;
        }
        Ok(self.head.forward(&hidden)?)
    }

    /// Next-token cross-entropy over one sequence [1, seq].
    pub fn loss(&self, token_ids: &Tensor) -> Result<Tensor> {
        let (_batch, seq_len) = token_ids.dims2()?;
        if seq_len < 2 {
            return Err(PipelineError::InvalidConfig(
                "sequences must contain at least two tokens".to_string(),
            ));
        }

        let logits = self.forward(token_ids)?;
        let logits = logits
            .narrow(1, 0, seq_len - 1)?
            .flatten(0, 1)?
            .to_dtype(DType::F32)?;
        let targets = token_ids.narrow(1, 1, seq_len - 1)?.flatten_all()?;

        Ok(candle_nn::loss::cross_entropy(&logits, &targets)?)
    }
}

/// Frozen base parameters: loaded from safetensors when a base-weights file
/// is configured, freshly initialized otherwise. The returned VarMap (if
/// any) must never be handed to the optimizer.
pub fn base_var_builder<'a>(
    base_weights: Option<&Path>,
    dtype: DType,
    device: &Device,
) -> Result<(Option<VarMap>, VarBuilder<'a>)> {
    match base_weights {
        Some(path) => {
            let data = std::fs::read(path)?;
            let vb = VarBuilder::from_buffered_safetensors(data, dtype, device)?;
            tracing::info!(path = %path.display(), "Loaded frozen base weights");
            Ok((None, vb))
        }
        None => {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, dtype, device);
            Ok((Some(varmap), vb))
        }
    }
}

/// Sanity bound used when validating adapter dimensions against a config.
pub fn adapter_parameter_count(config: &FineTuneConfig) -> usize {
    config.blocks * 2 * config.lora.rank * config.hidden_size
}
