// Voiceforge - multilingual voice-intent dataset synthesis and LoRA fine-tuning
// Library exports

pub mod config;
pub mod dataset;
pub mod error;
pub mod expand;
pub mod export;
pub mod locale;
pub mod schema;
pub mod train;
pub mod translate;

pub use error::{PipelineError, Result};
