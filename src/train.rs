//! Model training: stratified split, cross-validated grid search over the
//! forest hyperparameters, persistence of the best model

use crate::artifact::{CandidateScore, ModelArtifact, SplitSettings, FORMAT_VERSION};
use crate::error::ChurnError;
use crate::features::FeatureSchema;
use crate::metrics::roc_auc;
use crate::model::{ForestParams, RandomForest};
use crate::table::{self, read_table};
use chrono::Utc;
use linfa::Dataset;
use ndarray::{Axis, Ix1};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::path::Path;

/// Hyperparameter grid; candidates are the cartesian product in
/// `max_depth`-major order
#[derive(Debug, Clone, PartialEq)]
pub struct ParamGrid {
    pub n_estimators: Vec<usize>,
    pub max_depth: Vec<Option<usize>>,
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            n_estimators: vec![100, 200],
            max_depth: vec![None, Some(10), Some(20)],
        }
    }
}

impl ParamGrid {
    pub fn candidates(&self, seed: u64) -> Vec<ForestParams> {
        self.max_depth
            .iter()
            .flat_map(|&depth| {
                self.n_estimators
                    .iter()
                    .map(move |&trees| ForestParams::new(trees, depth, seed))
            })
            .collect()
    }
}

/// Training configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    /// Fraction of rows held out for evaluation
    pub test_ratio: f64,
    pub seed: u64,
    pub cv_folds: usize,
    pub grid: ParamGrid,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            test_ratio: 0.2,
            seed: 42,
            cv_folds: 5,
            grid: ParamGrid::default(),
        }
    }
}

impl TrainConfig {
    pub fn check(&self) -> crate::Result<()> {
        if !(self.test_ratio > 0.0 && self.test_ratio < 1.0) {
            return Err(ChurnError::invalid_config(format!(
                "test ratio must be in (0, 1), got {}",
                self.test_ratio
            )));
        }
        if self.cv_folds < 2 {
            return Err(ChurnError::invalid_config("cv_folds must be at least 2"));
        }
        if self.grid.n_estimators.is_empty() || self.grid.max_depth.is_empty() {
            return Err(ChurnError::invalid_config("parameter grid is empty"));
        }
        self.grid
            .candidates(self.seed)
            .iter()
            .try_for_each(ForestParams::check)
    }

    pub fn split(&self) -> SplitSettings {
        SplitSettings {
            test_ratio: self.test_ratio,
            seed: self.seed,
        }
    }
}

/// Split row indices into `(train, test)`, preserving the class ratio.
///
/// Each class contributes `round(n_class * test_ratio)` rows to the test
/// side. Both index lists are returned sorted.
pub fn stratified_split(y: &[usize], split: SplitSettings) -> (Vec<usize>, Vec<usize>) {
    let mut rng = ChaCha8Rng::seed_from_u64(split.seed);
    let mut train = Vec::with_capacity(y.len());
    let mut test = Vec::new();

    for class in 0..2 {
        let mut members: Vec<usize> = (0..y.len()).filter(|&i| y[i] == class).collect();
        members.shuffle(&mut rng);
        let n_test = (members.len() as f64 * split.test_ratio).round() as usize;
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// Held-out indices for `k` stratified folds
///
/// Rows of each class are dealt round-robin in index order, so the folds are
/// deterministic and every class appears in every fold.
pub fn stratified_folds(y: &[usize], k: usize) -> crate::Result<Vec<Vec<usize>>> {
    let mut folds = vec![Vec::new(); k];
    for class in 0..2 {
        let members: Vec<usize> = (0..y.len()).filter(|&i| y[i] == class).collect();
        if members.len() < k {
            return Err(ChurnError::invalid_input(format!(
                "class {class} has {} rows, fewer than {k} folds",
                members.len()
            )));
        }
        for (position, row) in members.into_iter().enumerate() {
            folds[position % k].push(row);
        }
    }
    for fold in &mut folds {
        fold.sort_unstable();
    }
    Ok(folds)
}

fn subset(dataset: &Dataset<f64, usize, Ix1>, rows: &[usize]) -> Dataset<f64, usize, Ix1> {
    Dataset::new(
        dataset.records().select(Axis(0), rows),
        dataset.targets().select(Axis(0), rows),
    )
}

/// AUC of `params` fit on every fold but `held_out` and scored on `held_out`
fn fold_auc(
    dataset: &Dataset<f64, usize, Ix1>,
    params: &ForestParams,
    folds: &[Vec<usize>],
    held_out: usize,
) -> crate::Result<f64> {
    let train_rows: Vec<usize> = folds
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != held_out)
        .flat_map(|(_, fold)| fold.iter().copied())
        .collect();

    let forest = RandomForest::fit(&subset(dataset, &train_rows), params)?;
    let test = subset(dataset, &folds[held_out]);
    let scores = forest.predict_proba(test.records())?;
    roc_auc(&test.targets().to_vec(), &scores.to_vec())
}

/// Result of a grid search
#[derive(Debug, Clone)]
pub struct GridSearchOutcome {
    /// Every candidate, in grid order
    pub candidates: Vec<CandidateScore>,
    /// Index of the highest mean AUC; ties go to the earlier candidate
    pub best: usize,
}

impl GridSearchOutcome {
    pub fn best(&self) -> &CandidateScore {
        &self.candidates[self.best]
    }
}

/// Exhaustive grid search scored by stratified k-fold ROC AUC
///
/// Every (candidate, fold) pair is an independent task run on the rayon
/// pool; the scores are gathered in grid order and reduced by a single
/// max selection, so the outcome does not depend on the number of threads.
pub fn grid_search(
    dataset: &Dataset<f64, usize, Ix1>,
    config: &TrainConfig,
) -> crate::Result<GridSearchOutcome> {
    config.check()?;
    let folds = stratified_folds(&dataset.targets().to_vec(), config.cv_folds)?;
    let candidates = config.grid.candidates(config.seed);

    let tasks: Vec<(usize, usize)> = (0..candidates.len())
        .flat_map(|c| (0..folds.len()).map(move |f| (c, f)))
        .collect();

    let scores = tasks
        .par_iter()
        .map(|&(candidate, fold)| fold_auc(dataset, &candidates[candidate], &folds, fold))
        .collect::<crate::Result<Vec<f64>>>()?;

    let candidates: Vec<CandidateScore> = candidates
        .into_iter()
        .zip(scores.chunks(folds.len()))
        .map(|(params, fold_aucs)| {
            let n = fold_aucs.len() as f64;
            let mean_auc = fold_aucs.iter().sum::<f64>() / n;
            let variance = fold_aucs.iter().map(|a| (a - mean_auc).powi(2)).sum::<f64>() / n;
            tracing::debug!(
                "{params}: mean AUC {mean_auc:.4} (+/- {:.4})",
                variance.sqrt()
            );
            CandidateScore {
                params,
                fold_aucs: fold_aucs.to_vec(),
                mean_auc,
                std_auc: variance.sqrt(),
            }
        })
        .collect();

    let best = (0..candidates.len())
        .reduce(|best, i| {
            if candidates[i].mean_auc > candidates[best].mean_auc {
                i
            } else {
                best
            }
        })
        .ok_or_else(|| ChurnError::invalid_config("parameter grid is empty"))?;

    Ok(GridSearchOutcome { candidates, best })
}

/// Train with the default configuration and persist the best model
///
/// # Arguments
/// * `features_path` - Feature table written by the feature builder
/// * `out_model_path` - Model artifact destination (JSON)
pub fn train(features_path: &Path, out_model_path: &Path) -> crate::Result<ModelArtifact> {
    train_with(features_path, out_model_path, &TrainConfig::default())
}

/// [`train`] with an explicit configuration
pub fn train_with(
    features_path: &Path,
    out_model_path: &Path,
    config: &TrainConfig,
) -> crate::Result<ModelArtifact> {
    config.check()?;

    tracing::info!("Loading features from {}", features_path.display());
    let df = read_table(features_path)?;
    let schema = FeatureSchema::load(&FeatureSchema::path_for(features_path))?;
    let label = schema.label().to_string();
    if df.get_column_index(&label).is_none() {
        return Err(ChurnError::schema(format!("{label} column missing")));
    }

    let columns = table::column_names(&df);
    let missing: Vec<String> = schema
        .columns
        .iter()
        .filter(|c| !columns.contains(c))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(ChurnError::SchemaMismatch { missing });
    }
    if columns != schema.columns {
        return Err(ChurnError::schema(
            "feature table columns are not in schema order",
        ));
    }

    let feature_names = schema.feature_columns();
    let dataset = Dataset::new(
        table::matrix(&df, &feature_names)?,
        table::labels(&df, &label)?,
    );

    let split = config.split();
    let (train_rows, test_rows) = stratified_split(&dataset.targets().to_vec(), split);
    tracing::info!(
        "Split data: train size = {}, test size = {}",
        train_rows.len(),
        test_rows.len()
    );
    let train_set = subset(&dataset, &train_rows);

    let outcome = grid_search(&train_set, config)?;
    let best = outcome.best().clone();
    tracing::info!(
        "Best parameters {} with cross-validated AUC {:.3}",
        best.params,
        best.mean_auc
    );

    let forest = RandomForest::fit(&train_set, &best.params)?;
    let artifact = ModelArtifact {
        format_version: FORMAT_VERSION,
        trained_at: Utc::now(),
        label,
        feature_names,
        encoding: schema.encoding,
        params: best.params,
        cv_auc: best.mean_auc,
        candidates: outcome.candidates,
        split,
        forest,
    };

    artifact.save(out_model_path)?;
    tracing::info!(
        "Best model (AUC={:.3}) saved to {}",
        artifact.cv_auc,
        out_model_path.display()
    );
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn labels(n_neg: usize, n_pos: usize) -> Vec<usize> {
        let mut y = vec![0; n_neg];
        y.extend(vec![1; n_pos]);
        y
    }

    /// Two informative features with overlapping classes
    fn create_test_dataset() -> Dataset<f64, usize, Ix1> {
        let n = 60;
        let records = Array2::from_shape_fn((n, 3), |(i, j)| match j {
            0 => (i % 30) as f64 + if i >= 30 { 8.0 } else { 0.0 },
            1 => ((i * 7) % 11) as f64,
            _ => ((i / 30) * (i % 3)) as f64,
        });
        let targets = Array1::from_iter((0..n).map(|i| usize::from(i >= 30)));
        Dataset::new(records, targets)
    }

    #[test]
    fn test_stratified_split_preserves_ratio() {
        let y = labels(80, 20);
        let split = SplitSettings {
            test_ratio: 0.2,
            seed: 42,
        };
        let (train, test) = stratified_split(&y, split);

        assert_eq!(train.len(), 80);
        assert_eq!(test.len(), 20);
        assert_eq!(test.iter().filter(|&&i| y[i] == 1).count(), 4);

        let mut all: Vec<usize> = train.iter().chain(&test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());

        assert_eq!(stratified_split(&y, split), (train, test));
    }

    #[test]
    fn test_stratified_split_depends_on_seed() {
        let y = labels(50, 50);
        let a = stratified_split(&y, SplitSettings { test_ratio: 0.2, seed: 1 });
        let b = stratified_split(&y, SplitSettings { test_ratio: 0.2, seed: 2 });
        assert_ne!(a.1, b.1);
    }

    #[test]
    fn test_stratified_folds_cover_rows_once() {
        let y = labels(12, 8);
        let folds = stratified_folds(&y, 4).unwrap();

        assert_eq!(folds.len(), 4);
        for fold in &folds {
            assert_eq!(fold.iter().filter(|&&i| y[i] == 0).count(), 3);
            assert_eq!(fold.iter().filter(|&&i| y[i] == 1).count(), 2);
        }
        let mut all: Vec<usize> = folds.concat();
        all.sort_unstable();
        assert_eq!(all, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_stratified_folds_too_few_members() {
        let y = labels(10, 2);
        assert!(stratified_folds(&y, 3).is_err());
    }

    #[test]
    fn test_grid_candidates_order() {
        let candidates = ParamGrid::default().candidates(42);
        assert_eq!(candidates.len(), 6);
        assert_eq!(candidates[0], ForestParams::new(100, None, 42));
        assert_eq!(candidates[1], ForestParams::new(200, None, 42));
        assert_eq!(candidates[5], ForestParams::new(200, Some(20), 42));
    }

    #[test]
    fn test_config_check() {
        assert!(TrainConfig::default().check().is_ok());

        let config = TrainConfig {
            test_ratio: 1.0,
            ..TrainConfig::default()
        };
        assert!(config.check().is_err());

        let config = TrainConfig {
            cv_folds: 1,
            ..TrainConfig::default()
        };
        assert!(config.check().is_err());

        let config = TrainConfig {
            grid: ParamGrid {
                n_estimators: vec![],
                max_depth: vec![None],
            },
            ..TrainConfig::default()
        };
        assert!(config.check().is_err());
    }

    fn small_config() -> TrainConfig {
        TrainConfig {
            cv_folds: 3,
            grid: ParamGrid {
                n_estimators: vec![5, 10],
                max_depth: vec![None, Some(2)],
            },
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_grid_search_selects_max_mean_auc() {
        let dataset = create_test_dataset();
        let outcome = grid_search(&dataset, &small_config()).unwrap();

        assert_eq!(outcome.candidates.len(), 4);
        let best = outcome.best().mean_auc;
        assert!(outcome.candidates.iter().all(|c| c.mean_auc <= best));
        assert!(outcome.candidates.iter().all(|c| c.fold_aucs.len() == 3));
        let first_best = outcome
            .candidates
            .iter()
            .position(|c| c.mean_auc == best)
            .unwrap();
        assert_eq!(outcome.best, first_best);
    }

    #[test]
    fn test_grid_search_independent_of_thread_count() {
        let dataset = create_test_dataset();
        let config = small_config();

        let single = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .unwrap()
            .install(|| grid_search(&dataset, &config))
            .unwrap();
        let many = rayon::ThreadPoolBuilder::new()
            .num_threads(4)
            .build()
            .unwrap()
            .install(|| grid_search(&dataset, &config))
            .unwrap();

        assert_eq!(single.best, many.best);
        assert_eq!(single.candidates, many.candidates);
    }

    #[test]
    fn test_train_requires_feature_table() {
        let dir = tempfile::tempdir().unwrap();
        let result = train(
            &dir.path().join("features.parquet"),
            &dir.path().join("model.json"),
        );
        assert!(matches!(result, Err(ChurnError::NotFound { .. })));
    }
}
