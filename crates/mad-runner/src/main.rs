use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use debate::{FileCheckpointStore, Question};
use tracing::info;

use mad_runner::{
    BatchConfig, BatchRunner, DebateDriver, HttpGenerateClient, RetryingCaller, RunnerConfig,
};

/// Run multi-agent debates over a set of legal exam questions.
#[derive(Debug, Parser)]
#[command(name = "mad-runner", version, about)]
struct Args {
    /// JSON file with the question set (array of question objects).
    #[arg(long)]
    questions: PathBuf,

    /// Batch identifier; names the checkpoint and the result file.
    #[arg(long)]
    batch_id: String,

    /// Debate rounds: 0 = single debater, 1 = openings, 2 = openings + rebuttals.
    #[arg(long, default_value_t = 2)]
    rounds: u8,

    /// Run only the first N questions.
    #[arg(long)]
    sample: Option<usize>,

    /// Directory for results and checkpoints.
    #[arg(long, default_value = "results")]
    output_dir: PathBuf,

    /// Override the configured model.
    #[arg(long)]
    model: Option<String>,

    /// Override the configured API base url.
    #[arg(long)]
    base_url: Option<String>,

    /// Save a checkpoint after every N completed questions.
    #[arg(long, default_value_t = 10)]
    checkpoint_every: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = RunnerConfig::from_env()?;
    config.driver.rounds = args.rounds;
    config.checkpoint_every = args.checkpoint_every;
    config.output_dir = args.output_dir;
    if let Some(model) = args.model {
        config.client.model = model;
    }
    if let Some(base_url) = args.base_url {
        config.client.base_url = base_url;
    }
    config.validate()?;

    let mut questions = load_questions(&args.questions)?;
    if let Some(n) = args.sample {
        questions.truncate(n);
    }
    info!(
        batch_id = %args.batch_id,
        questions = questions.len(),
        rounds = config.driver.rounds,
        model = %config.client.model,
        "starting debate batch"
    );

    let client = HttpGenerateClient::new(config.client.clone())
        .map_err(|e| anyhow::anyhow!("could not build http client: {e}"))?;
    let caller = RetryingCaller::new(Arc::new(client), config.retry);
    let driver = DebateDriver::new(caller, config.driver);
    let store = FileCheckpointStore::new(config.output_dir.clone());
    let mut runner = BatchRunner::new(
        driver,
        store,
        BatchConfig {
            batch_id: args.batch_id.clone(),
            checkpoint_every: config.checkpoint_every,
        },
    );

    let (summary, records) = runner
        .run(&questions)
        .await
        .map_err(|e| anyhow::anyhow!("batch failed: {e}"))?;

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("could not create {}", config.output_dir.display()))?;
    let out_path = config.output_dir.join(format!("mad_{}.json", args.batch_id));
    let output: Vec<_> = records.iter().map(|r| r.to_output_json()).collect();
    std::fs::write(&out_path, serde_json::to_string_pretty(&output)?)
        .with_context(|| format!("could not write {}", out_path.display()))?;

    info!(
        results = %out_path.display(),
        complete = summary.complete,
        partial = summary.partial,
        failed = summary.failed,
        parse_errors = summary.parse_errors,
        "batch complete"
    );
    if let Some(accuracy) = summary.accuracy() {
        info!(accuracy = %format!("{:.1}%", accuracy * 100.0), "mcq accuracy");
    }
    Ok(())
}

fn load_questions(path: &PathBuf) -> Result<Vec<Question>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("could not read question file {}", path.display()))?;
    let questions: Vec<Question> = serde_json::from_str(&raw)
        .with_context(|| format!("question file {} is not a JSON array of questions", path.display()))?;
    anyhow::ensure!(!questions.is_empty(), "question file is empty");
    Ok(questions)
}
