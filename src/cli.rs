//! Command-line interface definitions and argument parsing

use crate::config::{
    PipelineConfig, DEFAULT_CLEANED_PATH, DEFAULT_FEATURES_PATH, DEFAULT_MODEL_PATH,
    DEFAULT_RAW_PATH,
};
use crate::evaluate::{EvalConfig, EvalScope};
use crate::server::DEFAULT_ADDR;
use crate::train::TrainConfig;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Pipeline stage to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Stage {
    /// Clean the raw customer table
    Preprocess,
    /// Build the encoded feature table
    Features,
    /// Grid-search and save the best model
    Train,
    /// Score the saved model
    Evaluate,
    /// Every stage, in order
    All,
}

impl Stage {
    /// Stages this selection runs, in execution order
    pub fn expand(self) -> Vec<Stage> {
        match self {
            Stage::All => vec![Stage::Preprocess, Stage::Features, Stage::Train, Stage::Evaluate],
            stage => vec![stage],
        }
    }
}

/// Telecom customer churn pipeline: clean, encode, train, evaluate
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Stage to run
    #[arg(value_enum)]
    pub stage: Stage,

    /// Raw customer CSV
    #[arg(long, env = "CHURN_RAW_PATH", default_value = DEFAULT_RAW_PATH)]
    pub raw: PathBuf,

    /// Cleaned table (parquet or csv, by extension)
    #[arg(long, env = "CHURN_CLEANED_PATH", default_value = DEFAULT_CLEANED_PATH)]
    pub cleaned: PathBuf,

    /// Feature table (parquet or csv, by extension)
    #[arg(long, env = "CHURN_FEATURES_PATH", default_value = DEFAULT_FEATURES_PATH)]
    pub features: PathBuf,

    /// Model artifact (JSON)
    #[arg(long, env = "CHURN_MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
    pub model: PathBuf,

    /// Probability at or above which a customer is labelled churn
    #[arg(long, default_value = "0.5")]
    pub threshold: f64,

    /// Seed for the train/test split and the forests
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Number of cross-validation folds
    #[arg(long, default_value = "5")]
    pub cv_folds: usize,

    /// Fraction of rows held out for evaluation
    #[arg(long, default_value = "0.2")]
    pub test_ratio: f64,

    /// Evaluate on every row instead of the held-out split
    #[arg(long)]
    pub full: bool,

    /// Write a ROC curve PNG here during evaluation
    #[arg(long)]
    pub roc_plot: Option<PathBuf>,

    /// Write a score histogram PNG here during evaluation
    #[arg(long)]
    pub score_plot: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn to_config(&self) -> PipelineConfig {
        PipelineConfig {
            raw_path: self.raw.clone(),
            cleaned_path: self.cleaned.clone(),
            features_path: self.features.clone(),
            model_path: self.model.clone(),
            train: TrainConfig {
                test_ratio: self.test_ratio,
                seed: self.seed,
                cv_folds: self.cv_folds,
                ..TrainConfig::default()
            },
            eval: EvalConfig {
                threshold: self.threshold,
                scope: if self.full {
                    EvalScope::Full
                } else {
                    EvalScope::HeldOut
                },
                roc_plot: self.roc_plot.clone(),
                score_plot: self.score_plot.clone(),
            },
        }
    }
}

/// Churn prediction form server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct FormArgs {
    /// Model artifact written by `churnforge train`
    #[arg(long, env = "CHURN_MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
    pub model: PathBuf,

    /// Listen address
    #[arg(long, env = "CHURN_FORM_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: SocketAddr,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_parse_stage_and_defaults() {
        let args = Args::try_parse_from(["churnforge", "train"]).unwrap();
        assert_eq!(args.stage, Stage::Train);

        let config = args.to_config();
        assert_eq!(config.train, TrainConfig::default());
        assert_eq!(config.eval, EvalConfig::default());
    }

    #[test]
    fn test_parse_overrides() {
        let args = Args::try_parse_from([
            "churnforge",
            "evaluate",
            "--features",
            "/tmp/f.csv",
            "--threshold",
            "0.3",
            "--full",
            "--roc-plot",
            "roc.png",
            "--cv-folds",
            "3",
        ])
        .unwrap();

        let config = args.to_config();
        assert_eq!(config.features_path, Path::new("/tmp/f.csv"));
        assert_eq!(config.eval.threshold, 0.3);
        assert_eq!(config.eval.scope, EvalScope::Full);
        assert_eq!(config.eval.roc_plot.as_deref(), Some(Path::new("roc.png")));
        assert_eq!(config.train.cv_folds, 3);
    }

    #[test]
    fn test_unknown_stage_rejected() {
        assert!(Args::try_parse_from(["churnforge", "deploy"]).is_err());
    }

    #[test]
    fn test_stage_expand() {
        assert_eq!(Stage::All.expand().len(), 4);
        assert_eq!(Stage::All.expand()[0], Stage::Preprocess);
        assert_eq!(Stage::Evaluate.expand(), vec![Stage::Evaluate]);
    }

    #[test]
    fn test_form_args() {
        let args =
            FormArgs::try_parse_from(["churnforge-form", "--addr", "0.0.0.0:9000"]).unwrap();
        assert_eq!(args.addr.port(), 9000);
        assert_eq!(args.model, Path::new(DEFAULT_MODEL_PATH));
    }
}
