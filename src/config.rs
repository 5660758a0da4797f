//! Pipeline configuration carried from the command line into the stages

use crate::evaluate::EvalConfig;
use crate::train::TrainConfig;
use std::path::PathBuf;

pub const DEFAULT_RAW_PATH: &str = "data/raw/WA_Fn-UseC_-Telco-Customer-Churn.csv";
pub const DEFAULT_CLEANED_PATH: &str = "data/processed/cleaned.parquet";
pub const DEFAULT_FEATURES_PATH: &str = "data/processed/features.parquet";
pub const DEFAULT_MODEL_PATH: &str = "models/best_model.json";

/// Artifact locations and tuning values for a pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub raw_path: PathBuf,
    pub cleaned_path: PathBuf,
    pub features_path: PathBuf,
    pub model_path: PathBuf,
    pub train: TrainConfig,
    pub eval: EvalConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            raw_path: PathBuf::from(DEFAULT_RAW_PATH),
            cleaned_path: PathBuf::from(DEFAULT_CLEANED_PATH),
            features_path: PathBuf::from(DEFAULT_FEATURES_PATH),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            train: TrainConfig::default(),
            eval: EvalConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn check(&self) -> crate::Result<()> {
        self.train.check()?;
        self.eval.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_default_paths() {
        let config = PipelineConfig::default();
        assert_eq!(config.cleaned_path, Path::new("data/processed/cleaned.parquet"));
        assert_eq!(config.model_path, Path::new("models/best_model.json"));
        assert!(config.check().is_ok());
    }
}
