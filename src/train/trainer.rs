// Training loop
//
// Drives a FineTuneRun from Configured to a terminal state. Steps retry
// once before the run is marked Failed; evaluation and checkpointing happen
// every `eval_every` steps and at every exit path, so a run that produced
// any progress always leaves at least one durable checkpoint behind.

use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokenizers::Tokenizer;
use tokio_util::sync::CancellationToken;

use super::checkpoint::CheckpointStore;
use super::model::{base_var_builder, IntentLm};
use super::{hub, EvalRecord, FineTuneRun, RunState};
use crate::dataset::{Dataset, Partition, TrainingExample};
use crate::error::{PipelineError, Result};

/// Validation sequences scored per evaluation; keeps eval cost bounded on
/// large datasets.
const EVAL_SAMPLE: usize = 64;

pub struct Trainer {
    device: Device,
}

impl Default for Trainer {
    fn default() -> Self {
        Self::new()
    }
}

impl Trainer {
    pub fn new() -> Self {
        Self { device: Device::Cpu }
    }

    /// Train the adapters described by `run.config` on `dataset`, writing
    /// checkpoints into `store`. Mutates `run` through to a terminal state.
    pub fn run(
        &self,
        run: &mut FineTuneRun,
        dataset: &Dataset,
        store: &CheckpointStore,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.run_with(run, dataset, store, cancel, |model, optimizer, batch| {
            self.train_step(model, optimizer, batch)
        })
    }

    /// Same as `run`, with the per-batch optimizer step supplied by the
    /// caller.
    fn run_with<F>(
        &self,
        run: &mut FineTuneRun,
        dataset: &Dataset,
        store: &CheckpointStore,
        cancel: &CancellationToken,
        mut step_fn: F,
    ) -> Result<()>
    where
        F: FnMut(&IntentLm, &mut AdamW, &[&Vec<u32>]) -> Result<f64>,
    {
        if !matches!(run.state, RunState::Configured) {
            return Err(PipelineError::InvalidConfig(format!(
                "run {} is not in the configured state",
                run.id
            )));
        }
        run.config.validate()?;

        let tokenizer = self.load_tokenizer(run)?;
        let vocab_size = tokenizer.get_vocab_size(true);

        let config = run.config.clone();
        let train_seqs = encode_partition(&tokenizer, dataset, Partition::Train, config.max_seq_len)?;
        let val_seqs =
            encode_partition(&tokenizer, dataset, Partition::Validation, config.max_seq_len)?;
        if train_seqs.is_empty() || val_seqs.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "training requires non-empty train and validation partitions".to_string(),
            ));
        }

        let dtype = config.quant.dtype();
        let base_weights = match (&config.base_weights, &config.base_model) {
            (Some(path), _) => Some(path.clone()),
            (None, Some(repo)) => Some(hub::fetch_base_weights(repo)?),
            (None, None) => None,
        };
        let (_base_varmap, base_vb) =
            base_var_builder(base_weights.as_deref(), dtype, &self.device)?;
        let lora_varmap = VarMap::new();
        let lora_vb = VarBuilder::from_varmap(&lora_varmap, dtype, &self.device);
        let model = IntentLm::new(&config, vocab_size, base_vb, lora_vb)?;

        let mut optimizer = AdamW::new(
            lora_varmap.all_vars(),
            ParamsAdamW {
                lr: config.learning_rate,
                ..ParamsAdamW::default()
            },
        )?;

        run.state = RunState::Running;
        run.started_at = Some(Utc::now());
        store.save_run(run)?;
        tracing::info!(
            run = %run.id,
            train = train_seqs.len(),
            validation = val_seqs.len(),
            vocab = vocab_size,
            "Training started"
        );

        let progress = ProgressBar::new(config.max_steps as u64);
        progress.set_style(
            ProgressStyle::with_template("{bar:30} {pos}/{len} steps {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut order: Vec<usize> = Vec::new();
        let mut best_val = f64::INFINITY;
        let mut evals_since_improvement = 0usize;
        // Starts at zero so a cancellation before the first step still writes
        // finite metrics.
        let mut last_train_loss = 0.0f64;

        for step in 1..=config.max_steps {
            if cancel.is_cancelled() {
                tracing::info!(run = %run.id, step, "Cancellation requested");
                self.evaluate_and_checkpoint(
                    run, store, &model, &lora_varmap, &val_seqs, step, last_train_loss,
                )?;
                run.state = RunState::Cancelled;
                run.finished_at = Some(Utc::now());
                store.save_run(run)?;
                progress.finish_with_message("cancelled");
                return Ok(());
            }

            let batch = next_batch(&train_seqs, &mut order, &mut rng, config.batch_size);
            let mut outcome = step_fn(&model, &mut optimizer, &batch);
            if let Err(err) = &outcome {
                tracing::warn!(step, error = %err, "Training step failed, retrying once");
                outcome = step_fn(&model, &mut optimizer, &batch);
            }
            last_train_loss = match outcome {
                Ok(loss) => loss,
                Err(err) => {
                    let reason = err.to_string();
                    run.state = RunState::Failed {
                        reason: reason.clone(),
                        last_checkpoint: run.checkpoints.last().cloned(),
                    };
                    run.finished_at = Some(Utc::now());
                    store.save_run(run)?;
                    progress.abandon_with_message("failed");
                    return Err(PipelineError::StepFailed { step, reason });
                }
            };
            progress.set_position(step as u64);

            let at_end = step == config.max_steps;
            if step % config.eval_every == 0 || at_end {
                let val_loss = self.evaluate_and_checkpoint(
                    run, store, &model, &lora_varmap, &val_seqs, step, last_train_loss,
                )?;
                progress.set_message(format!("val_loss {val_loss:.4}"));

                if best_val - val_loss > config.min_delta {
                    best_val = val_loss;
                    evals_since_improvement = 0;
                } else {
                    evals_since_improvement += 1;
                    if evals_since_improvement >= config.early_stop_patience {
                        tracing::info!(
                            run = %run.id,
                            step,
                            best_val,
                            "Early stopping, validation loss plateaued"
                        );
                        break;
                    }
                }
            }
        }

        if run.checkpoints.is_empty() {
            self.evaluate_and_checkpoint(
                run,
                store,
                &model,
                &lora_varmap,
                &val_seqs,
                config.max_steps,
                last_train_loss,
            )?;
        }

        run.state = RunState::Completed;
        run.finished_at = Some(Utc::now());
        store.save_run(run)?;
        progress.finish_with_message("done");
        tracing::info!(
            run = %run.id,
            checkpoints = run.checkpoints.len(),
            best_val = run.best_checkpoint().map(|c| c.val_loss).unwrap_or(f64::NAN),
            "Training completed"
        );
        Ok(())
    }

    fn load_tokenizer(&self, run: &FineTuneRun) -> Result<Tokenizer> {
        let path: PathBuf = match (&run.config.tokenizer_path, &run.config.base_model) {
            (Some(path), _) => path.clone(),
            (None, Some(repo)) => hub::fetch_tokenizer(repo)?,
            (None, None) => unreachable!("rejected by FineTuneConfig::validate"),
        };
        Tokenizer::from_file(&path).map_err(|e| {
            PipelineError::InvalidConfig(format!(
                "failed to load tokenizer from {}: {e}",
                path.display()
            ))
        })
    }

    /// One optimizer step over a batch of variable-length sequences. Each
    /// sequence contributes its own scalar loss; the batch loss is their mean.
    fn train_step(
        &self,
        model: &IntentLm,
        optimizer: &mut AdamW,
        batch: &[&Vec<u32>],
    ) -> Result<f64> {
        let mut losses = Vec::with_capacity(batch.len());
        for ids in batch {
            let input = Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?;
            losses.push(model.loss(&input)?);
        }
        let loss = Tensor::stack(&losses, 0)?.mean_all()?;
        optimizer.backward_step(&loss)?;
        Ok(loss.to_dtype(DType::F32)?.to_scalar::<f32>()? as f64)
    }

    fn evaluate(&self, model: &IntentLm, val_seqs: &[Vec<u32>]) -> Result<f64> {
        let mut total = 0.0f64;
        let mut count = 0usize;
        for ids in val_seqs.iter().take(EVAL_SAMPLE) {
            let input = Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?;
            let loss = model.loss(&input)?;
            total += loss.to_dtype(DType::F32)?.to_scalar::<f32>()? as f64;
            count += 1;
        }
        Ok(total / count as f64)
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_and_checkpoint(
        &self,
        run: &mut FineTuneRun,
        store: &CheckpointStore,
        model: &IntentLm,
        lora_varmap: &VarMap,
        val_seqs: &[Vec<u32>],
        step: usize,
        train_loss: f64,
    ) -> Result<f64> {
        let val_loss = self.evaluate(model, val_seqs)?;
        let mut metrics = BTreeMap::new();
        metrics.insert("train_loss".to_string(), train_loss);
        metrics.insert("val_loss".to_string(), val_loss);

        let checkpoint = store.write(step, lora_varmap, metrics)?;
        run.checkpoints.push(checkpoint);
        run.evals.push(EvalRecord {
            step,
            train_loss,
            val_loss,
        });
        store.save_run(run)?;
        tracing::info!(step, train_loss, val_loss, "Evaluated and checkpointed");
        Ok(val_loss)
    }
}

/// Tokenize one partition into id sequences. A training text is the prompt
/// and the serialized label on separate lines, truncated to `max_seq_len`.
/// Sequences that tokenize to fewer than two ids are skipped.
fn encode_partition(
    tokenizer: &Tokenizer,
    dataset: &Dataset,
    partition: Partition,
    max_seq_len: usize,
) -> Result<Vec<Vec<u32>>> {
    let mut sequences = Vec::new();
    for example in dataset.partition(partition) {
        let ids = encode_example(tokenizer, example, max_seq_len)?;
        if ids.len() < 2 {
            tracing::warn!(
                utterance = %example.utterance,
                "Skipping example that tokenizes to fewer than two ids"
            );
            continue;
        }
        sequences.push(ids);
    }
    Ok(sequences)
}

fn encode_example(
    tokenizer: &Tokenizer,
    example: &TrainingExample,
    max_seq_len: usize,
) -> Result<Vec<u32>> {
    let text = format!("{}\n{}", example.to_prompt(), example.to_target()?);
    let encoding = tokenizer
        .encode(text, false)
        .map_err(|e| PipelineError::InvalidConfig(format!("tokenization failed: {e}")))?;
    let mut ids = encoding.get_ids().to_vec();
    ids.truncate(max_seq_len);
    Ok(ids)
}

/// Deterministic batch cycling: a shuffled pass over all sequences, reshuffled
/// once exhausted.
fn next_batch<'a>(
    sequences: &'a [Vec<u32>],
    order: &mut Vec<usize>,
    rng: &mut StdRng,
    batch_size: usize,
) -> Vec<&'a Vec<u32>> {
    let mut batch = Vec::with_capacity(batch_size);
    while batch.len() < batch_size {
        if order.is_empty() {
            let mut indices: Vec<usize> = (0..sequences.len()).collect();
            indices.shuffle(rng);
            *order = indices;
        }
        let index = order.pop().unwrap_or(0);
        batch.push(&sequences[index]);
    }
    batch
}
