// Pipeline error taxonomy

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no vocabulary for slot type '{slot_type}' in locale '{locale}'")]
    UnsupportedLocale { slot_type: String, locale: String },

    #[error("translation backend unavailable ({source_locale} -> {target_locale}): {reason}")]
    TranslationUnavailable {
        source_locale: String,
        target_locale: String,
        reason: String,
    },

    #[error("intent '{intent}' cannot fill the {partition} partition")]
    InsufficientData { intent: String, partition: String },

    #[error("label does not conform to the intent schema: {0}")]
    SchemaMismatch(String),

    #[error("run '{run_id}' produced no valid checkpoint")]
    NoCheckpoint { run_id: String },

    #[error("utterance '{utterance}' appears in more than one partition")]
    PartitionLeak { utterance: String },

    #[error("failed to fetch '{resource}' from hub repo '{repo}': {reason}")]
    HubUnavailable {
        repo: String,
        resource: String,
        reason: String,
    },

    #[error("invalid fine-tune configuration: {0}")]
    InvalidConfig(String),

    #[error("training step {step} failed after retry: {reason}")]
    StepFailed { step: usize, reason: String },

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Translation failures are recovered locally by skipping the affected
    /// (template, locale) pair; everything else aborts the expansion.
    pub fn is_translation_unavailable(&self) -> bool {
        matches!(self, Self::TranslationUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_offender() {
        let err = PipelineError::UnsupportedLocale {
            slot_type: "color".to_string(),
            locale: "xx".to_string(),
        };
        assert!(err.to_string().contains("color"));
        assert!(err.to_string().contains("xx"));

        let err = PipelineError::InsufficientData {
            intent: "turn_on".to_string(),
            partition: "validation".to_string(),
        };
        assert!(err.to_string().contains("turn_on"));
        assert!(err.to_string().contains("validation"));

        let err = PipelineError::HubUnavailable {
            repo: "acme/tiny-lm".to_string(),
            resource: "tokenizer.json".to_string(),
            reason: "connection reset".to_string(),
        };
        assert!(err.to_string().contains("acme/tiny-lm"));
        assert!(err.to_string().contains("tokenizer.json"));

        let err = PipelineError::PartitionLeak {
            utterance: "turn on the light".to_string(),
        };
        assert!(err.to_string().contains("turn on the light"));
    }
}
