// Dataset builder
//
// Aggregates expanded examples into train/validation/test partitions:
// exact-duplicate removal, schema conformance checks, and a seeded
// stratified split by intent label so class balance survives partitioning.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::{Dataset, IntentLabel, TrainingExample};
use crate::error::{PipelineError, Result};
use crate::schema::IntentSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SplitRatios {
    pub train: f64,
    pub validation: f64,
    pub test: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.8,
            validation: 0.1,
            test: 0.1,
        }
    }
}

impl SplitRatios {
    pub fn validate(&self) -> Result<()> {
        let sum = self.train + self.validation + self.test;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(PipelineError::InvalidConfig(format!(
                "split ratios must sum to 1.0, got {sum}"
            )));
        }
        if self.train <= 0.0 || self.validation <= 0.0 || self.test <= 0.0 {
            return Err(PipelineError::InvalidConfig(
                "every split ratio must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct DatasetBuilder {
    schema: IntentSchema,
    ratios: SplitRatios,
    seed: u64,
}

impl DatasetBuilder {
    pub fn new(schema: IntentSchema, ratios: SplitRatios, seed: u64) -> Self {
        Self { schema, ratios, seed }
    }

    /// Build a partitioned dataset. Fails with `SchemaMismatch` when a
    /// label references undeclared slot types, and `InsufficientData` when
    /// an intent cannot populate every partition.
    pub fn build(&self, examples: Vec<TrainingExample>) -> Result<Dataset> {
        self.ratios.validate()?;

        for example in &examples {
            self.schema
                .check_label(&example.label.intent, &example.label.slots)?;
        }

        let unique = dedup(examples);

        // Group by intent, preserving first-seen order inside each group.
        let mut by_intent: BTreeMap<String, Vec<TrainingExample>> = BTreeMap::new();
        for example in unique {
            by_intent
                .entry(example.label.intent.clone())
                .or_default()
                .push(example);
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut dataset = Dataset::default();

        for (intent, mut group) in by_intent {
            group.shuffle(&mut rng);

            let n = group.len();
            let n_test = ((n as f64 * self.ratios.test).round() as usize).max(1);
            let n_validation = ((n as f64 * self.ratios.validation).round() as usize).max(1);

            if n_test + n_validation >= n {
                let partition = if n <= 1 { "validation" } else { "train" };
                return Err(PipelineError::InsufficientData {
                    intent,
                    partition: partition.to_string(),
                });
            }

            let mut rest = group.split_off(n_test);
            let train = rest.split_off(n_validation);
            dataset.test.extend(group);
            dataset.validation.extend(rest);
            dataset.train.extend(train);
        }

        verify_disjoint(&dataset)?;
        tracing::info!(
            train = dataset.train.len(),
            validation = dataset.validation.len(),
            test = dataset.test.len(),
            "Built dataset"
        );
        Ok(dataset)
    }
}

/// Drop exact (utterance, label) duplicates, keeping the first occurrence.
/// An utterance surviving under two different labels would leak across
/// partitions, so later conflicting labels are dropped too.
fn dedup(examples: Vec<TrainingExample>) -> Vec<TrainingExample> {
    let mut seen_pairs: HashSet<(String, IntentLabel)> = HashSet::new();
    let mut seen_utterances: HashSet<String> = HashSet::new();
    let mut unique = Vec::with_capacity(examples.len());

    for example in examples {
        let pair = (example.utterance.clone(), example.label.clone());
        if seen_pairs.contains(&pair) {
            continue;
        }
        if !seen_utterances.insert(example.utterance.clone()) {
            tracing::warn!(
                utterance = %example.utterance,
                intent = %example.label.intent,
                "Dropping utterance with conflicting label"
            );
            continue;
        }
        seen_pairs.insert(pair);
        unique.push(example);
    }

    unique
}

fn verify_disjoint(dataset: &Dataset) -> Result<()> {
    let mut seen = HashSet::new();
    for partition in [&dataset.train, &dataset.validation, &dataset.test] {
        for example in partition {
            if !seen.insert(example.utterance.as_str()) {
                return Err(PipelineError::PartitionLeak {
                    utterance: example.utterance.clone(),
                });
            }
        }
    }
    Ok(())
}
