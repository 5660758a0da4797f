//! Persisted model artifact: the fitted forest plus everything needed to
//! rebuild its input rows

use crate::error::ChurnError;
use crate::features::EncodingSpec;
use crate::model::{ForestParams, RandomForest};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Artifact layout version.
pub const FORMAT_VERSION: u32 = 1;

/// Train/test split settings, stored so evaluation can rebuild the held-out rows
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitSettings {
    pub test_ratio: f64,
    pub seed: u64,
}

/// Cross-validated score of one grid candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub params: ForestParams,
    pub fold_aucs: Vec<f64>,
    pub mean_auc: f64,
    pub std_auc: f64,
}

/// Trained model bound to the exact ordered feature schema it was fit on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub trained_at: DateTime<Utc>,
    pub label: String,
    /// Model input columns, in the order the forest expects them
    pub feature_names: Vec<String>,
    pub encoding: EncodingSpec,
    pub params: ForestParams,
    /// Mean cross-validated AUC of the chosen configuration
    pub cv_auc: f64,
    pub candidates: Vec<CandidateScore>,
    pub split: SplitSettings,
    pub forest: RandomForest,
}

impl ModelArtifact {
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }

    /// Load and sanity-check an artifact
    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.is_file() {
            return Err(ChurnError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let artifact: Self = serde_json::from_slice(&fs::read(path)?)?;

        if artifact.format_version != FORMAT_VERSION {
            return Err(ChurnError::invalid_config(format!(
                "model format version {} is not supported (expected {})",
                artifact.format_version, FORMAT_VERSION
            )));
        }
        if artifact.feature_names.len() != artifact.forest.n_features() {
            return Err(ChurnError::schema(format!(
                "model lists {} feature names but the forest takes {}",
                artifact.feature_names.len(),
                artifact.forest.n_features()
            )));
        }
        artifact.encoding.validate()?;

        tracing::debug!(
            path = %path.display(),
            features = artifact.feature_names.len(),
            trees = artifact.forest.trees().len(),
            "loaded model"
        );
        Ok(artifact)
    }

    /// Churn probability per row; columns must follow `feature_names`
    pub fn predict_proba(&self, x: &Array2<f64>) -> crate::Result<Array1<f64>> {
        self.forest.predict_proba(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linfa::Dataset;
    use ndarray::array;

    fn create_test_artifact() -> ModelArtifact {
        let dataset = Dataset::new(
            array![[0.0, 1.0], [1.0, 0.0], [0.0, 0.5], [1.0, 0.2]],
            array![0, 1, 0, 1],
        );
        let params = ForestParams::new(3, Some(2), 1);
        ModelArtifact {
            format_version: FORMAT_VERSION,
            trained_at: Utc::now(),
            label: "Churn".to_string(),
            feature_names: vec!["a".to_string(), "b".to_string()],
            encoding: EncodingSpec::telco(),
            params,
            cv_auc: 0.9,
            candidates: Vec::new(),
            split: SplitSettings {
                test_ratio: 0.2,
                seed: 42,
            },
            forest: RandomForest::fit(&dataset, &params).unwrap(),
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("best_model.json");
        let artifact = create_test_artifact();

        artifact.save(&path).unwrap();
        let loaded = ModelArtifact::load(&path).unwrap();
        assert_eq!(loaded, artifact);
    }

    #[test]
    fn test_load_missing_model() {
        let result = ModelArtifact::load(Path::new("/no/such/model.json"));
        assert!(matches!(result, Err(ChurnError::NotFound { .. })));
    }

    #[test]
    fn test_load_rejects_feature_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let mut artifact = create_test_artifact();
        artifact.feature_names.push("c".to_string());
        artifact.save(&path).unwrap();

        assert!(matches!(
            ModelArtifact::load(&path),
            Err(ChurnError::Schema(_))
        ));
    }

    #[test]
    fn test_load_rejects_future_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let mut artifact = create_test_artifact();
        artifact.format_version = FORMAT_VERSION + 1;
        artifact.save(&path).unwrap();

        assert!(matches!(
            ModelArtifact::load(&path),
            Err(ChurnError::InvalidConfig(_))
        ));
    }
}
