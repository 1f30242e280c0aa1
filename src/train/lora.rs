// LoRA layers
//
// Low-rank adapter pair per projection: output = base(x) + B(A(x)) * scaling
// with A randomly initialized and B zeroed so the adapter starts as a no-op.
// Only these parameters are handed to the optimizer; the base stays frozen.

use candle_core::{Module, Tensor};
use candle_nn::{Init, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoraConfig {
    pub rank: usize,
    pub alpha: f64,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self { rank: 8, alpha: 16.0 }
    }
}

impl LoraConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rank == 0 {
            return Err(PipelineError::InvalidConfig(
                "lora rank must be >= 1".to_string(),
            ));
        }
        if !self.alpha.is_finite() || self.alpha <= 0.0 {
            return Err(PipelineError::InvalidConfig(
                "lora alpha must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scaling(&self) -> f64 {
        self.alpha / self.rank as f64
    }
}

#[derive(Debug)]
pub struct LoraLayer {
    lora_a: Linear,
    lora_b: Linear,
    scaling: f64,
}

impl LoraLayer {
    pub fn new(dim: usize, config: &LoraConfig, vb: VarBuilder) -> Result<Self> {
        let lora_a = candle_nn::linear_no_bias(dim, config.rank, vb.pp("lora_a"))?;

        // Zero-initialized B so training starts from the frozen base output.
        let b_weight =
            vb.pp("lora_b")
                .get_with_hints((dim, config.rank), "weight", Init::Const(0.0))?;
        let lora_b = Linear::new(b_weight, None);

        Ok(Self {
            lora_a,
            lora_b,
            scaling: config.scaling(),
        })
    }

    /// Adapter-corrected output for a layer.
    pub fn forward(&self, input: &Tensor, base_output: &Tensor) -> Result<Tensor> {
        let delta = self.lora_b.forward(&self.lora_a.forward(input)?)?;
        Ok((base_output + (delta * self.scaling)?)?)
    }
}
