//! Evaluation charts using Plotters

use crate::error::ChurnError;
use plotters::prelude::*;
use std::fs;
use std::path::Path;

/// Bar colors for the retained and churned classes
const CLASS_COLORS: [RGBColor; 2] = [BLUE, RED];

const SCORE_BINS: usize = 20;

fn plot_error(err: impl std::fmt::Display) -> ChurnError {
    ChurnError::Plot(err.to_string())
}

fn ensure_parent(path: &Path) -> crate::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Draw the ROC curve with the chance diagonal
///
/// # Arguments
/// * `points` - `(false positive rate, true positive rate)` pairs from
///   [`crate::metrics::roc_curve`]
/// * `auc` - Area under the curve, shown in the legend
/// * `output_path` - PNG destination
pub fn plot_roc_curve(points: &[(f64, f64)], auc: f64, output_path: &Path) -> crate::Result<()> {
    ensure_parent(output_path)?;

    let root = BitMapBackend::new(output_path, (640, 640)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("ROC Curve", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..1f64, 0f64..1f64)
        .map_err(plot_error)?;

    chart
        .configure_mesh()
        .x_desc("False Positive Rate")
        .y_desc("True Positive Rate")
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(plot_error)?;

    chart
        .draw_series(LineSeries::new(vec![(0.0, 0.0), (1.0, 1.0)], BLACK.mix(0.4)))
        .map_err(plot_error)?;

    chart
        .draw_series(LineSeries::new(points.iter().copied(), RED.stroke_width(2)))
        .map_err(plot_error)?
        .label(format!("AUC = {auc:.3}"))
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .position(SeriesLabelPosition::LowerRight)
        .draw()
        .map_err(plot_error)?;

    root.present().map_err(plot_error)?;
    tracing::info!("ROC curve saved to {}", output_path.display());
    Ok(())
}

/// Count scores per class into `bins` equal-width bins over `[0, 1]`
pub(crate) fn score_histogram(scores: &[f64], labels: &[usize], bins: usize) -> [Vec<usize>; 2] {
    let mut counts = [vec![0; bins], vec![0; bins]];
    for (&score, &label) in scores.iter().zip(labels) {
        let bin = ((score.clamp(0.0, 1.0) * bins as f64) as usize).min(bins - 1);
        counts[label.min(1)][bin] += 1;
    }
    counts
}

/// Draw overlaid per-class histograms of predicted churn probability
pub fn plot_score_histogram(
    scores: &[f64],
    labels: &[usize],
    output_path: &Path,
) -> crate::Result<()> {
    if scores.len() != labels.len() {
        return Err(ChurnError::invalid_input(format!(
            "{} scores but {} labels",
            scores.len(),
            labels.len()
        )));
    }
    ensure_parent(output_path)?;

    let counts = score_histogram(scores, labels, SCORE_BINS);
    let max_count = counts.iter().flatten().copied().max().unwrap_or(1).max(1) as f64;
    let width = 1.0 / SCORE_BINS as f64;

    let root = BitMapBackend::new(output_path, (800, 500)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Predicted Churn Probability", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0f64..1f64, 0f64..(max_count * 1.1))
        .map_err(plot_error)?;

    chart
        .configure_mesh()
        .x_desc("Probability")
        .y_desc("Number of Customers")
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(plot_error)?;

    for (class, (name, color)) in ["Retained", "Churned"]
        .into_iter()
        .zip(CLASS_COLORS)
        .enumerate()
    {
        chart
            .draw_series(counts[class].iter().enumerate().map(|(bin, &count)| {
                let left = bin as f64 * width;
                Rectangle::new([(left, 0.0), (left + width, count as f64)], color.mix(0.5).filled())
            }))
            .map_err(plot_error)?
            .label(name)
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_error)?;

    root.present().map_err(plot_error)?;
    tracing::info!("Score histogram saved to {}", output_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_histogram_bins() {
        let scores = [0.0, 0.04, 0.5, 0.99, 1.0, 0.51];
        let labels = [0, 0, 0, 1, 1, 1];
        let counts = score_histogram(&scores, &labels, 10);

        assert_eq!(counts[0][0], 2);
        assert_eq!(counts[0][5], 1);
        assert_eq!(counts[1][5], 1);
        assert_eq!(counts[1][9], 2);
        assert_eq!(counts.iter().flatten().sum::<usize>(), scores.len());
    }

    #[test]
    fn test_score_histogram_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let result = plot_score_histogram(&[0.1, 0.2], &[0], &dir.path().join("scores.png"));
        assert!(matches!(result, Err(ChurnError::InvalidInput(_))));
    }
}
