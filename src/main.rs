//! ChurnForge: runs the churn pipeline stages from the command line
//!
//! Each stage reads the previous stage's artifact from disk, so stages can be
//! run one at a time or all together.

use anyhow::{Context, Result};
use churnforge::{data, evaluate, features, logging, train, Args, PipelineConfig, Stage};
use clap::Parser;
use std::time::Instant;

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let config = args.to_config();
    config.check().context("invalid configuration")?;

    let start_time = Instant::now();
    run_stage(args.stage, &config)?;

    tracing::info!(
        "Total processing time: {:.2}s",
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

fn run_stage(stage: Stage, config: &PipelineConfig) -> Result<()> {
    let stage_start = Instant::now();
    match stage {
        Stage::All => {
            for stage in Stage::All.expand() {
                run_stage(stage, config)?;
            }
            return Ok(());
        }
        Stage::Preprocess => {
            let cleaned = data::clean(&config.raw_path, &config.cleaned_path).with_context(|| {
                format!("preprocessing {} failed", config.raw_path.display())
            })?;
            println!(
                "✓ Cleaned {} of {} rows ({} dropped)",
                cleaned.frame.height(),
                cleaned.rows_in,
                cleaned.rows_dropped
            );
        }
        Stage::Features => {
            let table = features::build(&config.cleaned_path, &config.features_path)
                .with_context(|| {
                    format!("feature building from {} failed", config.cleaned_path.display())
                })?;
            println!(
                "✓ Feature table: {} rows x {} columns",
                table.frame.height(),
                table.frame.width()
            );
        }
        Stage::Train => {
            let artifact =
                train::train_with(&config.features_path, &config.model_path, &config.train)
                    .with_context(|| {
                        format!("training on {} failed", config.features_path.display())
                    })?;
            println!(
                "✓ Best model ({}) cross-validated AUC {:.3}",
                artifact.params, artifact.cv_auc
            );
        }
        Stage::Evaluate => {
            let report =
                evaluate::evaluate_with(&config.features_path, &config.model_path, &config.eval)
                    .with_context(|| {
                        format!("evaluating {} failed", config.model_path.display())
                    })?;
            println!("\n=== Evaluation ===");
            println!("{report}");
        }
    }
    tracing::debug!(
        "{:?} finished in {:.2}s",
        stage,
        stage_start.elapsed().as_secs_f64()
    );
    Ok(())
}
