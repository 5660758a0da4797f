//! Model evaluation: AUC, confusion matrix and classification report at a
//! decision threshold

use crate::artifact::ModelArtifact;
use crate::error::ChurnError;
use crate::metrics::{apply_threshold, roc_auc, roc_curve, ClassificationReport, ConfusionMatrix};
use crate::table::{self, read_table};
use crate::train::stratified_split;
use crate::viz;
use ndarray::{Array2, Axis};
use polars::prelude::DataFrame;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Rows an evaluation scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EvalScope {
    /// The test split recorded in the model artifact
    HeldOut,
    /// Every row of the feature table
    Full,
}

impl fmt::Display for EvalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalScope::HeldOut => write!(f, "held-out split"),
            EvalScope::Full => write!(f, "all rows"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvalConfig {
    pub threshold: f64,
    pub scope: EvalScope,
    pub roc_plot: Option<PathBuf>,
    pub score_plot: Option<PathBuf>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            scope: EvalScope::HeldOut,
            roc_plot: None,
            score_plot: None,
        }
    }
}

impl EvalConfig {
    pub fn check(&self) -> crate::Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ChurnError::invalid_config(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Evaluation results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub scope: EvalScope,
    pub rows: usize,
    pub threshold: f64,
    pub auc: f64,
    pub confusion: ConfusionMatrix,
    pub classification: ClassificationReport,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Evaluated {} rows ({})", self.rows, self.scope)?;
        writeln!(f, "ROC AUC: {:.3}", self.auc)?;
        writeln!(f)?;
        writeln!(f, "Confusion Matrix (threshold {}):", self.threshold)?;
        writeln!(f, "{}", self.confusion)?;
        writeln!(f, "Classification Report:")?;
        write!(f, "{}", self.classification)
    }
}

/// Evaluate a saved model on the held-out split of a feature table
///
/// # Arguments
/// * `features_path` - Feature table written by the feature builder
/// * `model_path` - Model artifact written by the trainer
/// * `threshold` - Probability at or above which a row is labelled churn
pub fn evaluate(features_path: &Path, model_path: &Path, threshold: f64) -> crate::Result<Report> {
    let config = EvalConfig {
        threshold,
        ..EvalConfig::default()
    };
    evaluate_with(features_path, model_path, &config)
}

/// [`evaluate`] with an explicit configuration
pub fn evaluate_with(
    features_path: &Path,
    model_path: &Path,
    config: &EvalConfig,
) -> crate::Result<Report> {
    config.check()?;

    let artifact = ModelArtifact::load(model_path)?;
    tracing::info!("Loading features from {}", features_path.display());
    let df = read_table(features_path)?;
    if df.get_column_index(&artifact.label).is_none() {
        return Err(ChurnError::schema(format!("{} column missing", artifact.label)));
    }

    let x = align_features(&df, &artifact)?;
    let y = table::labels(&df, &artifact.label)?.to_vec();

    let (x, y) = match config.scope {
        EvalScope::Full => (x, y),
        EvalScope::HeldOut => {
            let (_, test_rows) = stratified_split(&y, artifact.split);
            let y_test = test_rows.iter().map(|&i| y[i]).collect();
            (x.select(Axis(0), &test_rows), y_test)
        }
    };
    tracing::debug!("Scoring {} rows ({})", y.len(), config.scope);

    let scores = artifact.predict_proba(&x)?.to_vec();
    let auc = roc_auc(&y, &scores)?;
    let predictions = apply_threshold(&scores, config.threshold);
    let confusion = ConfusionMatrix::from_predictions(&y, &predictions)?;
    let classification = ClassificationReport::from_confusion(&confusion);

    if let Some(path) = &config.roc_plot {
        viz::plot_roc_curve(&roc_curve(&y, &scores)?, auc, path)?;
    }
    if let Some(path) = &config.score_plot {
        viz::plot_score_histogram(&scores, &y, path)?;
    }

    tracing::info!("ROC AUC: {:.3}", auc);
    Ok(Report {
        scope: config.scope,
        rows: y.len(),
        threshold: config.threshold,
        auc,
        confusion,
        classification,
    })
}

/// Feature matrix in the model's column order
///
/// Columns the model needs but the table lacks are an error; columns the
/// model does not use are dropped with a warning.
pub fn align_features(df: &DataFrame, artifact: &ModelArtifact) -> crate::Result<Array2<f64>> {
    let columns = table::column_names(df);

    let missing: Vec<String> = artifact
        .feature_names
        .iter()
        .filter(|name| !columns.contains(name))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(ChurnError::SchemaMismatch { missing });
    }

    let extra: Vec<&str> = columns
        .iter()
        .map(String::as_str)
        .filter(|name| *name != artifact.label && !artifact.feature_names.iter().any(|f| f == name))
        .collect();
    if !extra.is_empty() {
        tracing::warn!("Ignoring columns not used by the model: {}", extra.join(", "));
    }

    table::matrix(df, &artifact.feature_names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{SplitSettings, FORMAT_VERSION};
    use crate::features::EncodingSpec;
    use crate::model::{ForestParams, RandomForest};
    use chrono::Utc;
    use linfa::Dataset;
    use ndarray::array;
    use polars::prelude::*;

    fn create_test_artifact() -> ModelArtifact {
        let dataset = Dataset::new(
            array![[0.0, 1.0], [1.0, 0.0], [0.0, 0.9], [1.0, 0.1]],
            array![0, 1, 0, 1],
        );
        let params = ForestParams::new(5, None, 3);
        ModelArtifact {
            format_version: FORMAT_VERSION,
            trained_at: Utc::now(),
            label: "Churn".to_string(),
            feature_names: vec!["a".to_string(), "b".to_string()],
            encoding: EncodingSpec::telco(),
            params,
            cv_auc: 1.0,
            candidates: Vec::new(),
            split: SplitSettings {
                test_ratio: 0.5,
                seed: 42,
            },
            forest: RandomForest::fit(&dataset, &params).unwrap(),
        }
    }

    #[test]
    fn test_align_features_reorders_and_ignores_extras() {
        let df = df!(
            "b" => [10.0, 20.0],
            "extra" => [0.0, 0.0],
            "Churn" => [0i64, 1],
            "a" => [1.0, 2.0]
        )
        .unwrap();
        let x = align_features(&df, &create_test_artifact()).unwrap();
        assert_eq!(x, array![[1.0, 10.0], [2.0, 20.0]]);
    }

    #[test]
    fn test_align_features_missing_column() {
        let df = df!("a" => [1.0], "Churn" => [0i64]).unwrap();
        match align_features(&df, &create_test_artifact()) {
            Err(ChurnError::SchemaMismatch { missing }) => assert_eq!(missing, vec!["b"]),
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_threshold_out_of_range() {
        let config = EvalConfig {
            threshold: 1.5,
            ..EvalConfig::default()
        };
        assert!(matches!(config.check(), Err(ChurnError::InvalidConfig(_))));
        assert!(EvalConfig::default().check().is_ok());
    }

    fn write_fixture(dir: &Path) -> (PathBuf, PathBuf) {
        let model_path = dir.join("model.json");
        create_test_artifact().save(&model_path).unwrap();

        let features_path = dir.join("features.csv");
        let mut df = df!(
            "a" => [0.0, 1.0, 0.0, 1.0, 0.0, 1.0],
            "b" => [1.0, 0.0, 0.8, 0.2, 0.9, 0.1],
            "Churn" => [0i64, 1, 0, 1, 0, 1]
        )
        .unwrap();
        table::write_table(&mut df, &features_path).unwrap();
        (features_path, model_path)
    }

    #[test]
    fn test_evaluate_full_scope() {
        let dir = tempfile::tempdir().unwrap();
        let (features_path, model_path) = write_fixture(dir.path());
        let config = EvalConfig {
            scope: EvalScope::Full,
            ..EvalConfig::default()
        };

        let report = evaluate_with(&features_path, &model_path, &config).unwrap();
        assert_eq!(report.rows, 6);
        assert_eq!(report.confusion.total(), 6);
        assert!((0.0..=1.0).contains(&report.auc));
        assert!(report.to_string().contains("ROC AUC"));
    }

    #[test]
    fn test_evaluate_held_out_scope() {
        let dir = tempfile::tempdir().unwrap();
        let (features_path, model_path) = write_fixture(dir.path());

        let report = evaluate(&features_path, &model_path, 0.5).unwrap();
        assert_eq!(report.scope, EvalScope::HeldOut);
        assert_eq!(report.rows, 4);
    }

    #[test]
    fn test_evaluate_missing_label() {
        let dir = tempfile::tempdir().unwrap();
        let (_, model_path) = write_fixture(dir.path());
        let features_path = dir.path().join("unlabelled.csv");
        let mut df = df!("a" => [0.0], "b" => [1.0]).unwrap();
        table::write_table(&mut df, &features_path).unwrap();

        let result = evaluate(&features_path, &model_path, 0.5);
        assert!(matches!(result, Err(ChurnError::Schema(_))));
    }
}
