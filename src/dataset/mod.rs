// Dataset types
//
// A TrainingExample is immutable once created: the utterance, its structured
// label, the locale it was generated for, and provenance for auditability.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::error::Result;
use crate::locale::Locale;

pub mod builder;

pub use builder::{DatasetBuilder, SplitRatios};

/// Structured target label: intent plus slot-value map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntentLabel {
    pub intent: String,
    /// BTreeMap keeps slot order stable, so serialized labels are
    /// byte-identical across runs.
    #[serde(default)]
    pub slots: BTreeMap<String, String>,
}

/// Where an example came from: which template and which translation backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    pub template_id: String,
    pub backend: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainingExample {
    pub utterance: String,
    pub label: IntentLabel,
    pub locale: Locale,
    pub provenance: Provenance,
}

impl TrainingExample {
    /// Render the example for LM consumption: the utterance is the prompt,
    /// the compact label JSON is the completion.
    pub fn to_prompt(&self) -> String {
        self.utterance.clone()
    }

    pub fn to_target(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.label)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Train,
    Validation,
    Test,
}

impl Partition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Validation => "validation",
            Self::Test => "test",
        }
    }
}

/// Partitioned dataset with disjoint membership on utterance string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub train: Vec<TrainingExample>,
    pub validation: Vec<TrainingExample>,
    pub test: Vec<TrainingExample>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.train.len() + self.validation.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn partition(&self, partition: Partition) -> &[TrainingExample] {
        match partition {
            Partition::Train => &self.train,
            Partition::Validation => &self.validation,
            Partition::Test => &self.test,
        }
    }

    /// Content hash over all partitions, stable across runs with the same
    /// seed and resources.
    pub fn content_id(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        for partition in [Partition::Train, Partition::Validation, Partition::Test] {
            for example in self.partition(partition) {
                hasher.update(serde_json::to_vec(example)?);
                hasher.update(b"\n");
            }
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Write one JSONL file per partition into `dir`.
    pub fn write_jsonl(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        for partition in [Partition::Train, Partition::Validation, Partition::Test] {
            let path = dir.join(format!("{}.jsonl", partition.as_str()));
            let mut file = std::fs::File::create(&path)?;
            for example in self.partition(partition) {
                serde_json::to_writer(&mut file, example)?;
                file.write_all(b"\n")?;
            }
        }
        tracing::info!(
            dir = %dir.display(),
            train = self.train.len(),
            validation = self.validation.len(),
            test = self.test.len(),
            "Wrote dataset"
        );
        Ok(())
    }

    pub fn read_jsonl(dir: &Path) -> Result<Self> {
        let read_partition = |name: &str| -> Result<Vec<TrainingExample>> {
            let file = std::fs::File::open(dir.join(format!("{name}.jsonl")))?;
            let mut examples = Vec::new();
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                examples.push(serde_json::from_str(&line)?);
            }
            Ok(examples)
        };

        Ok(Self {
            train: read_partition("train")?,
            validation: read_partition("validation")?,
            test: read_partition("test")?,
        })
    }
}
