//! Training run command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use vocalis_training::{Pipeline, PipelineSettings, RunReport, UnitState};

pub struct TrainArgs {
    pub input_dir: PathBuf,
    pub model_dir: PathBuf,
    pub json: bool,
    pub settings: PipelineSettings,
}

pub async fn execute(args: TrainArgs) -> Result<()> {
    // Stages run in the settings workdir, so hand them absolute paths.
    let input_dir = std::path::absolute(&args.input_dir)
        .with_context(|| format!("Invalid input directory: {}", args.input_dir.display()))?;
    std::fs::create_dir_all(&args.model_dir)
        .with_context(|| format!("Failed to create model directory: {}", args.model_dir.display()))?;
    let model_dir = std::path::absolute(&args.model_dir)
        .with_context(|| format!("Invalid model directory: {}", args.model_dir.display()))?;

    let pipeline = Pipeline::from_settings(&args.settings, input_dir, model_dir);
    let report = pipeline.run().await.context("Training run aborted")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    let failed = report.failed().count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} training units failed", report.units.len());
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!();
    println!("{}", format!("Training run {} ({} units)", report.run_id, report.units.len()).bold().cyan());
    println!();

    if report.units.is_empty() {
        println!("  {}", "No training units found.".dimmed());
        println!();
        return;
    }

    println!("{:<24} {:<8} {}", "Unit", "State", "Details");
    println!("{}", "─".repeat(72));
    for unit in &report.units {
        let (state, details) = match unit.state {
            UnitState::Done => (
                "done".green(),
                unit.manifest_path.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
            ),
            _ => ("failed".red(), unit.message.clone().unwrap_or_default()),
        };
        println!("{:<24} {:<8} {}", unit.unit.cyan(), state, details.dimmed());
    }
    println!();
}
