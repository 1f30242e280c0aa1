// Voiceforge CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use voiceforge::config;
use voiceforge::dataset::{Dataset, DatasetBuilder};
use voiceforge::expand::{IntentTemplate, TemplateExpander};
use voiceforge::export::Exporter;
use voiceforge::locale::LocaleResources;
use voiceforge::schema::IntentSchema;
use voiceforge::train::{CheckpointStore, FineTuneRun, Trainer};

#[derive(Parser)]
#[command(name = "voiceforge")]
#[command(about = "Multilingual voice-intent dataset synthesis and LoRA fine-tuning")]
#[command(version)]
struct Cli {
    /// Path to a pipeline config file (defaults to ~/.voiceforge/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand templates into a partitioned training dataset
    Generate {
        /// Intent template file (JSON)
        #[arg(long)]
        templates: PathBuf,
        /// Intent schema file (JSON)
        #[arg(long)]
        schema: PathBuf,
        /// Output directory for the JSONL partitions
        #[arg(long, default_value = "dataset")]
        out: PathBuf,
    },
    /// Fine-tune LoRA adapters on a generated dataset
    Train {
        /// Dataset directory produced by `generate`
        #[arg(long)]
        dataset: PathBuf,
        /// Checkpoint directory for this run
        #[arg(long, default_value = "checkpoints")]
        checkpoints: PathBuf,
    },
    /// Package the best checkpoint of a finished run
    Export {
        /// Checkpoint directory of the run to export
        #[arg(long)]
        checkpoints: PathBuf,
        /// Intent schema file (JSON)
        #[arg(long)]
        schema: PathBuf,
        /// Output directory for the artifact
        #[arg(long, default_value = "artifact")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Generate {
            templates,
            schema,
            out,
        } => generate(&config, &templates, &schema, &out).await,
        Commands::Train {
            dataset,
            checkpoints,
        } => train(&config, &dataset, &checkpoints).await,
        Commands::Export {
            checkpoints,
            schema,
            out,
        } => export(&checkpoints, &schema, &out),
    }
}

async fn generate(
    config: &config::PipelineConfig,
    templates: &PathBuf,
    schema: &PathBuf,
    out: &PathBuf,
) -> Result<()> {
    let schema = IntentSchema::load(schema).context("loading intent schema")?;
    let templates = IntentTemplate::load_all(templates).context("loading templates")?;
    tracing::info!(
        templates = templates.len(),
        intents = schema.intents.len(),
        "Expanding templates"
    );

    let resources = Arc::new(LocaleResources::builtin().with_schema(&schema));
    let translator = Arc::new(config.translator.build()?);
    let expander = TemplateExpander::new(resources, translator, config.expander_config());

    let report = expander.expand(&templates).await?;

    let builder = DatasetBuilder::new(schema, config.split, config.seed);
    let dataset = builder.build(report.examples)?;
    dataset.write_jsonl(out)?;
    tracing::info!(
        out = %out.display(),
        train = dataset.train.len(),
        validation = dataset.validation.len(),
        test = dataset.test.len(),
        content_id = %dataset.content_id()?,
        "Dataset written"
    );
    Ok(())
}

async fn train(
    config: &config::PipelineConfig,
    dataset_dir: &PathBuf,
    checkpoints: &PathBuf,
) -> Result<()> {
    let dataset = Dataset::read_jsonl(dataset_dir).context("loading dataset")?;
    let store = CheckpointStore::new(checkpoints)?;
    let mut run = FineTuneRun::new(config.train.clone());
    tracing::info!(run = %run.id, examples = dataset.len(), "Starting fine-tune run");

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing current step");
            signal_cancel.cancel();
        }
    });

    let outcome = tokio::task::spawn_blocking(move || {
        let result = Trainer::new().run(&mut run, &dataset, &store, &cancel);
        (run, result)
    })
    .await?;
    let (run, result) = outcome;
    result?;
    tracing::info!(run = %run.id, "Run finished, state saved alongside checkpoints");
    Ok(())
}

fn export(checkpoints: &PathBuf, schema: &PathBuf, out: &PathBuf) -> Result<()> {
    let schema = IntentSchema::load(schema).context("loading intent schema")?;
    let store = CheckpointStore::new(checkpoints)?;
    let run = store.load_run().context("loading run state")?;

    let artifact = Exporter::new(out).export(&run, &schema)?;
    tracing::info!(
        dir = %artifact.dir.display(),
        step = artifact.manifest.best_step,
        "Artifact ready"
    );
    Ok(())
}
