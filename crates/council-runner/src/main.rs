mod scenario;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use deliberation::{
    DeliberationConfig, DeliberationController, JsonlSink, NullSink, SessionRecord, SharedSink,
};
use scenario::Scenario;
use tracing::{info, warn};

/// Replay a scripted specialist council through the deliberation engine.
#[derive(Debug, Parser)]
#[command(name = "council-runner", version)]
struct Args {
    /// TOML deliberation config. Defaults plus DELIBERATION_* overrides when absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON scenario scripting every specialist turn and the arbiter verdict.
    #[arg(long)]
    scenario: PathBuf,

    /// Append session events to this JSONL file.
    #[arg(long)]
    events: Option<PathBuf>,

    /// Write the session record here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DeliberationConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => DeliberationConfig::from_env().context("loading config from environment")?,
    };
    let scenario = Scenario::load(&args.scenario)?;
    scenario.apply_to(&mut config);

    let sink: SharedSink = match &args.events {
        Some(path) => Arc::new(
            JsonlSink::open(path)
                .await
                .with_context(|| format!("opening event log {}", path.display()))?,
        ),
        None => Arc::new(NullSink),
    };

    info!(
        topic = %scenario.topic,
        specialists = scenario.specialists.len(),
        max_rounds = config.max_rounds,
        "Council session starting"
    );

    let controller = DeliberationController::new(
        config,
        Arc::new(scenario.council()),
        Arc::new(scenario.arbiter()),
        sink,
    )?;
    let outcome = controller.run(scenario.request()).await;
    info!("{}", outcome.session().status_line());

    let record = SessionRecord::new(outcome.session());
    match &args.output {
        Some(path) => {
            record
                .save(path)
                .await
                .with_context(|| format!("writing record {}", path.display()))?;
            info!(path = %path.display(), "Session record written");
        }
        None => println!("{}", record.to_json()?),
    }

    if let Some(error) = outcome.error() {
        warn!(error = %error, "Session failed");
        anyhow::bail!("deliberation failed: {error}");
    }
    Ok(())
}
