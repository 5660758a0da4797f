//! Binary classification metrics: ROC AUC, ROC curve, confusion matrix and a
//! per-class precision/recall/F1 report

use crate::error::ChurnError;
use serde::Serialize;
use std::fmt;

/// Area under the ROC curve via the rank-sum statistic.
///
/// Tied scores receive their average rank, so a constant scorer yields 0.5.
/// Fails when `y_true` holds a single class.
pub fn roc_auc(y_true: &[usize], scores: &[f64]) -> crate::Result<f64> {
    check_lengths(y_true, scores)?;
    let positives = y_true.iter().filter(|&&y| y == 1).count();
    let negatives = y_true.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(ChurnError::invalid_input(
            "ROC AUC is undefined when only one class is present",
        ));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based; a tie group shares the mean of its ranks
        let average_rank = (start + 1 + end) as f64 / 2.0;
        let tied_positives = order[start..end].iter().filter(|&&i| y_true[i] == 1).count();
        positive_rank_sum += average_rank * tied_positives as f64;
        start = end;
    }

    let p = positives as f64;
    Ok((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64))
}

/// ROC curve points `(false positive rate, true positive rate)` from
/// `(0, 0)` to `(1, 1)`, one point per distinct score threshold.
pub fn roc_curve(y_true: &[usize], scores: &[f64]) -> crate::Result<Vec<(f64, f64)>> {
    check_lengths(y_true, scores)?;
    let positives = y_true.iter().filter(|&&y| y == 1).count() as f64;
    let negatives = y_true.len() as f64 - positives;
    if positives == 0.0 || negatives == 0.0 {
        return Err(ChurnError::invalid_input(
            "ROC curve is undefined when only one class is present",
        ));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut points = vec![(0.0, 0.0)];
    let (mut tp, mut fp) = (0.0, 0.0);
    for (position, &i) in order.iter().enumerate() {
        if y_true[i] == 1 {
            tp += 1.0;
        } else {
            fp += 1.0;
        }
        let last_of_threshold = order
            .get(position + 1)
            .map_or(true, |&next| scores[next] != scores[i]);
        if last_of_threshold {
            points.push((fp / negatives, tp / positives));
        }
    }
    Ok(points)
}

fn check_lengths(y_true: &[usize], scores: &[f64]) -> crate::Result<()> {
    if y_true.len() != scores.len() {
        return Err(ChurnError::invalid_input(format!(
            "{} labels but {} scores",
            y_true.len(),
            scores.len()
        )));
    }
    if y_true.is_empty() {
        return Err(ChurnError::invalid_input("no samples to score"));
    }
    Ok(())
}

/// Hard labels from probabilities: `1` when `p >= threshold`
pub fn apply_threshold(scores: &[f64], threshold: f64) -> Vec<usize> {
    scores.iter().map(|&p| usize::from(p >= threshold)).collect()
}

/// 2x2 confusion matrix; `matrix[true][predicted]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    matrix: [[usize; 2]; 2],
}

impl ConfusionMatrix {
    pub fn from_predictions(y_true: &[usize], y_pred: &[usize]) -> crate::Result<Self> {
        if y_true.len() != y_pred.len() {
            return Err(ChurnError::invalid_input(format!(
                "{} labels but {} predictions",
                y_true.len(),
                y_pred.len()
            )));
        }
        let mut matrix = [[0; 2]; 2];
        for (&truth, &pred) in y_true.iter().zip(y_pred) {
            if truth > 1 || pred > 1 {
                return Err(ChurnError::invalid_input("labels must be 0 or 1"));
            }
            matrix[truth][pred] += 1;
        }
        Ok(Self { matrix })
    }

    pub fn get(&self, truth: usize, predicted: usize) -> usize {
        self.matrix[truth][predicted]
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.matrix[0][0] + self.matrix[1][1], self.total())
    }

    /// Rows the model labelled `class` that truly are `class`
    pub fn precision(&self, class: usize) -> f64 {
        ratio(
            self.matrix[class][class],
            self.matrix[0][class] + self.matrix[1][class],
        )
    }

    /// Rows of `class` the model labelled `class`
    pub fn recall(&self, class: usize) -> f64 {
        ratio(self.matrix[class][class], self.support(class))
    }

    pub fn f1(&self, class: usize) -> f64 {
        let (p, r) = (self.precision(class), self.recall(class));
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    pub fn support(&self, class: usize) -> usize {
        self.matrix[class][0] + self.matrix[class][1]
    }
}

/// Zero when the denominator is zero.
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>8} {:>8} {:>8}", "", "Pred 0", "Pred 1")?;
        for truth in 0..2 {
            writeln!(
                f,
                "{:>8} {:>8} {:>8}",
                format!("True {truth}"),
                self.matrix[truth][0],
                self.matrix[truth][1]
            )?;
        }
        Ok(())
    }
}

/// Precision, recall, F1 and support for one class
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class metrics with macro and support-weighted averages
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub classes: [ClassMetrics; 2],
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

impl ClassificationReport {
    pub fn from_confusion(cm: &ConfusionMatrix) -> Self {
        let class = |c: usize| ClassMetrics {
            precision: cm.precision(c),
            recall: cm.recall(c),
            f1: cm.f1(c),
            support: cm.support(c),
        };
        let classes = [class(0), class(1)];
        let total = cm.total();

        Self {
            classes,
            accuracy: cm.accuracy(),
            macro_avg: weighted_mean(&classes, [1.0, 1.0], total),
            weighted_avg: weighted_mean(
                &classes,
                [classes[0].support as f64, classes[1].support as f64],
                total,
            ),
        }
    }
}

fn weighted_mean(classes: &[ClassMetrics; 2], weights: [f64; 2], support: usize) -> ClassMetrics {
    let norm = weights[0] + weights[1];
    let mean = |value: fn(&ClassMetrics) -> f64| {
        if norm == 0.0 {
            0.0
        } else {
            (weights[0] * value(&classes[0]) + weights[1] * value(&classes[1])) / norm
        }
    };
    ClassMetrics {
        precision: mean(|c| c.precision),
        recall: mean(|c| c.recall),
        f1: mean(|c| c.f1),
        support,
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>12} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        for (class, metrics) in self.classes.iter().enumerate() {
            write_row(f, &class.to_string(), metrics)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>12} {:>10} {:>10} {:>10.2} {:>10}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        write_row(f, "macro avg", &self.macro_avg)?;
        write_row(f, "weighted avg", &self.weighted_avg)
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, name: &str, m: &ClassMetrics) -> fmt::Result {
    writeln!(
        f,
        "{:>12} {:>10.2} {:>10.2} {:>10.2} {:>10}",
        name, m.precision, m.recall, m.f1, m.support
    )
}
