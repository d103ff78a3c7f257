//! Vocalis CLI - runs the speech-synthesis training pipeline
//!
//! Every training unit under `<input_dir>/data/train/` is segmented,
//! transcribed, preprocessed and trained in turn; trained models land in
//! `--model_dir`.

mod commands;
mod config;

use clap::Parser;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::train;

/// Vocalis - speech-synthesis training orchestrator
#[derive(Parser, Debug)]
#[command(name = "vocalis", author, version, about = "Vocalis - speech-synthesis training orchestrator")]
struct Args {
    /// Input root containing `config/hyperparameters.json` and `data/train/<unit>/`
    #[arg(long = "input_dir")]
    input_dir: PathBuf,

    /// Directory the training stage writes trained models into
    #[arg(long = "model_dir")]
    model_dir: PathBuf,

    /// Settings file (defaults to ./vocalis.toml merged over ~/.vocalis/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

fn parse_level(level: &str) -> Level {
    match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings = config::load_settings(args.config.as_deref())?;

    // Initialize tracing
    let level = args.log_level.as_deref().or(settings.log_level.as_deref()).map_or(Level::INFO, parse_level);
    let subscriber =
        FmtSubscriber::builder().with_max_level(level).without_time().with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    train::execute(train::TrainArgs {
        input_dir: args.input_dir,
        model_dir: args.model_dir,
        json: args.json,
        settings,
    })
    .await
}
