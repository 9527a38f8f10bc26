//! Binary classification metrics for mortality scores.
//!
//! Curves follow the usual conventions: ROC thresholds are the distinct
//! scores in decreasing order preceded by `+inf`, and a sample is predicted
//! positive when its score is `>=` the threshold.

pub mod plot;

use crate::error::{PipelineError, Result};
use ndarray::{Array1, ArrayView2};
use crate::utils::ensure_dir;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::info;

/// Decision threshold used by [`Classifier::predict`]
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// A fitted model producing mortality probabilities for flattened windows
pub trait Classifier {
    /// Probability of the positive class for every row of `x`
    fn predict_proba(&self, x: ArrayView2<'_, f32>) -> anyhow::Result<Array1<f64>>;

    /// Hard labels at [`DEFAULT_THRESHOLD`]
    fn predict(&self, x: ArrayView2<'_, f32>) -> anyhow::Result<Array1<u8>> {
        Ok(self
            .predict_proba(x)?
            .mapv(|p| u8::from(p >= DEFAULT_THRESHOLD)))
    }
}

fn check_lengths(y_true: &[u8], other: usize) -> Result<()> {
    if y_true.len() != other {
        return Err(PipelineError::InvalidParameter {
            name: "y_score",
            reason: format!("expected {} values, got {}", y_true.len(), other),
        });
    }
    if y_true.is_empty() {
        return Err(PipelineError::InvalidParameter {
            name: "y_true",
            reason: "no samples".to_string(),
        });
    }
    if let Some(label) = y_true.iter().find(|&&t| t > 1) {
        return Err(PipelineError::InvalidParameter {
            name: "y_true",
            reason: format!("labels must be 0 or 1, got {}", label),
        });
    }
    Ok(())
}

fn check_scores(y_true: &[u8], y_score: &[f64]) -> Result<()> {
    check_lengths(y_true, y_score.len())?;
    if let Some(score) = y_score.iter().find(|s| !s.is_finite()) {
        return Err(PipelineError::InvalidParameter {
            name: "y_score",
            reason: format!("scores must be finite, got {}", score),
        });
    }
    Ok(())
}

/// Cumulative false and true positives at each distinct score, highest score first
fn binary_clf_curve(y_true: &[u8], y_score: &[f64]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let mut order: Vec<usize> = (0..y_score.len()).collect();
    order.sort_by(|&a, &b| y_score[b].total_cmp(&y_score[a]));

    let mut fps = Vec::new();
    let mut tps = Vec::new();
    let mut thresholds = Vec::new();
    let mut tp = 0.0;

    for (k, &i) in order.iter().enumerate() {
        tp += f64::from(y_true[i]);
        let last_of_run = order
            .get(k + 1)
            .map_or(true, |&next| y_score[next] != y_score[i]);
        if last_of_run {
            tps.push(tp);
            fps.push((k + 1) as f64 - tp);
            thresholds.push(y_score[i]);
        }
    }
    (fps, tps, thresholds)
}

/// Receiver operating characteristic
#[derive(Debug, Clone, PartialEq)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    /// Decreasing; the first entry is `+inf`
    pub thresholds: Vec<f64>,
}

/// ROC curve with collinear intermediate points dropped
pub fn roc_curve(y_true: &[u8], y_score: &[f64]) -> Result<RocCurve> {
    check_scores(y_true, y_score)?;
    let (mut fps, mut tps, mut thresholds) = binary_clf_curve(y_true, y_score);

    if fps.len() > 2 {
        let n = fps.len();
        let keep: Vec<usize> = (0..n)
            .filter(|&i| {
                i == 0
                    || i == n - 1
                    || fps[i + 1] - 2.0 * fps[i] + fps[i - 1] != 0.0
                    || tps[i + 1] - 2.0 * tps[i] + tps[i - 1] != 0.0
            })
            .collect();
        fps = keep.iter().map(|&i| fps[i]).collect();
        tps = keep.iter().map(|&i| tps[i]).collect();
        thresholds = keep.iter().map(|&i| thresholds[i]).collect();
    }

    fps.insert(0, 0.0);
    tps.insert(0, 0.0);
    thresholds.insert(0, f64::INFINITY);

    let negatives = fps[fps.len() - 1];
    let positives = tps[tps.len() - 1];
    if negatives == 0.0 {
        return Err(PipelineError::UndefinedMetric("ROC curve needs at least one negative sample"));
    }
    if positives == 0.0 {
        return Err(PipelineError::UndefinedMetric("ROC curve needs at least one positive sample"));
    }

    Ok(RocCurve {
        fpr: fps.iter().map(|f| f / negatives).collect(),
        tpr: tps.iter().map(|t| t / positives).collect(),
        thresholds,
    })
}

/// Precision-recall pairs for every distinct threshold
#[derive(Debug, Clone, PartialEq)]
pub struct PrCurve {
    /// Ends with 1
    pub precision: Vec<f64>,
    /// Decreasing; ends with 0
    pub recall: Vec<f64>,
    /// Increasing; one shorter than `precision`
    pub thresholds: Vec<f64>,
}

pub fn precision_recall_curve(y_true: &[u8], y_score: &[f64]) -> Result<PrCurve> {
    check_scores(y_true, y_score)?;
    let (fps, tps, thresholds) = binary_clf_curve(y_true, y_score);

    let positives = tps[tps.len() - 1];
    if positives == 0.0 {
        return Err(PipelineError::UndefinedMetric("recall needs at least one positive sample"));
    }

    let mut precision: Vec<f64> = tps
        .iter()
        .zip(&fps)
        .rev()
        .map(|(tp, fp)| tp / (tp + fp))
        .collect();
    let mut recall: Vec<f64> = tps.iter().rev().map(|tp| tp / positives).collect();
    precision.push(1.0);
    recall.push(0.0);

    Ok(PrCurve {
        precision,
        recall,
        thresholds: thresholds.into_iter().rev().collect(),
    })
}

/// Area under a curve by the trapezoidal rule. `x` must be monotonic.
pub fn auc(x: &[f64], y: &[f64]) -> Result<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return Err(PipelineError::InvalidParameter {
            name: "x",
            reason: format!("need at least 2 points of equal length, got {} and {}", x.len(), y.len()),
        });
    }

    let direction = if x.windows(2).all(|w| w[1] >= w[0]) {
        1.0
    } else if x.windows(2).all(|w| w[1] <= w[0]) {
        -1.0
    } else {
        return Err(PipelineError::InvalidParameter {
            name: "x",
            reason: "is neither increasing nor decreasing".to_string(),
        });
    };

    let area: f64 = x
        .windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]) * (ys[0] + ys[1]) / 2.0)
        .sum();
    Ok(direction * area)
}

pub fn roc_auc_score(y_true: &[u8], y_score: &[f64]) -> Result<f64> {
    let roc = roc_curve(y_true, y_score)?;
    auc(&roc.fpr, &roc.tpr)
}

/// Step-wise area under the precision-recall curve
pub fn average_precision_score(y_true: &[u8], y_score: &[f64]) -> Result<f64> {
    let pr = precision_recall_curve(y_true, y_score)?;
    Ok(-pr
        .recall
        .windows(2)
        .zip(&pr.precision)
        .map(|(r, p)| (r[1] - r[0]) * p)
        .sum::<f64>())
}

/// Threshold where sensitivity and specificity are closest.
///
/// Returns the first ROC threshold minimizing `|tpr - (1 - fpr)|`.
pub fn find_optimal_cutoff(y_true: &[u8], y_score: &[f64]) -> Result<f64> {
    let roc = roc_curve(y_true, y_score)?;
    let mut best = 0;
    let mut best_gap = f64::INFINITY;
    for (i, (tpr, fpr)) in roc.tpr.iter().zip(&roc.fpr).enumerate() {
        let gap = (tpr - (1.0 - fpr)).abs();
        if gap < best_gap {
            best = i;
            best_gap = gap;
        }
    }
    Ok(roc.thresholds[best])
}

/// Hard labels from scores
pub fn apply_threshold(y_score: &[f64], threshold: f64) -> Vec<u8> {
    y_score.iter().map(|&s| u8::from(s >= threshold)).collect()
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn harmonic_mean(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

/// Counts of a binary classification; displayed as `[[tn fp] [fn tp]]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tn: usize,
    pub fp: usize,
    pub fn_: usize,
    pub tp: usize,
}

impl ConfusionMatrix {
    pub fn new(y_true: &[u8], y_pred: &[u8]) -> Result<Self> {
        check_lengths(y_true, y_pred.len())?;
        let mut matrix = Self::default();
        for (&t, &p) in y_true.iter().zip(y_pred) {
            match (t, p >= 1) {
                (1, true) => matrix.tp += 1,
                (1, false) => matrix.fn_ += 1,
                (_, true) => matrix.fp += 1,
                (_, false) => matrix.tn += 1,
            }
        }
        Ok(matrix)
    }

    pub fn total(&self) -> usize {
        self.tn + self.fp + self.fn_ + self.tp
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }

    /// Precision, recall and support for `class` (0 or 1)
    fn class_counts(&self, class: u8) -> (f64, f64, usize) {
        if class == 1 {
            (
                ratio(self.tp, self.tp + self.fp),
                ratio(self.tp, self.tp + self.fn_),
                self.tp + self.fn_,
            )
        } else {
            (
                ratio(self.tn, self.tn + self.fn_),
                ratio(self.tn, self.tn + self.fp),
                self.tn + self.fp,
            )
        }
    }

    /// F1 of the positive class
    pub fn f1_score(&self) -> f64 {
        let (precision, recall, _) = self.class_counts(1);
        harmonic_mean(precision, recall)
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = [self.tn, self.fp, self.fn_, self.tp]
            .iter()
            .map(|c| c.to_string().len())
            .max()
            .unwrap_or(1);
        writeln!(f, "[[{:>w$} {:>w$}]", self.tn, self.fp, w = width)?;
        write!(f, " [{:>w$} {:>w$}]]", self.fn_, self.tp, w = width)
    }
}

pub fn accuracy(y_true: &[u8], y_pred: &[u8]) -> Result<f64> {
    Ok(ConfusionMatrix::new(y_true, y_pred)?.accuracy())
}

/// F1 of the positive class
pub fn f1_score(y_true: &[u8], y_pred: &[u8]) -> Result<f64> {
    Ok(ConfusionMatrix::new(y_true, y_pred)?.f1_score())
}

/// Precision, recall, F1 and support of one row of a classification report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class metrics with accuracy and macro/weighted averages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub survived: ClassMetrics,
    pub died: ClassMetrics,
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

impl ClassificationReport {
    pub fn new(y_true: &[u8], y_pred: &[u8]) -> Result<Self> {
        Ok(Self::from_confusion(&ConfusionMatrix::new(y_true, y_pred)?))
    }

    pub fn from_confusion(matrix: &ConfusionMatrix) -> Self {
        let class = |label| {
            let (precision, recall, support) = matrix.class_counts(label);
            ClassMetrics {
                precision,
                recall,
                f1: harmonic_mean(precision, recall),
                support,
            }
        };
        let (survived, died) = (class(0), class(1));
        let total = matrix.total();

        let macro_avg = ClassMetrics {
            precision: (survived.precision + died.precision) / 2.0,
            recall: (survived.recall + died.recall) / 2.0,
            f1: (survived.f1 + died.f1) / 2.0,
            support: total,
        };
        let weight = |a: f64, b: f64| {
            if total == 0 {
                0.0
            } else {
                (a * survived.support as f64 + b * died.support as f64) / total as f64
            }
        };
        let weighted_avg = ClassMetrics {
            precision: weight(survived.precision, died.precision),
            recall: weight(survived.recall, died.recall),
            f1: weight(survived.f1, died.f1),
            support: total,
        };

        Self {
            survived,
            died,
            accuracy: matrix.accuracy(),
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let row = |f: &mut fmt::Formatter<'_>, name: &str, m: &ClassMetrics| {
            writeln!(
                f,
                "{:>12}  {:>9.2} {:>9.2} {:>9.2} {:>9}",
                name, m.precision, m.recall, m.f1, m.support
            )
        };

        writeln!(f, "{:>12}  {:>9} {:>9} {:>9} {:>9}", "", "precision", "recall", "f1-score", "support")?;
        writeln!(f)?;
        row(f, "0", &self.survived)?;
        row(f, "1", &self.died)?;
        writeln!(f)?;
        writeln!(
            f,
            "{:>12}  {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        row(f, "macro avg", &self.macro_avg)?;
        row(f, "weighted avg", &self.weighted_avg)
    }
}

/// Everything reported for one set of test scores
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub n_samples: usize,
    /// Threshold used for hard labels; absent when a model supplied them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    pub accuracy: f64,
    pub confusion_matrix: ConfusionMatrix,
    pub classification_report: ClassificationReport,
    pub roc_auc: f64,
    pub average_precision: f64,
    pub f1: f64,
    /// Trapezoidal area under the precision-recall curve
    pub auprc: f64,
    pub optimal_cutoff: f64,
    #[serde(skip)]
    pub roc: RocCurve,
    #[serde(skip)]
    pub pr: PrCurve,
}

impl EvaluationReport {
    /// Hard labels are `y_score >= threshold`
    pub fn from_scores(y_true: &[u8], y_score: &[f64], threshold: f64) -> Result<Self> {
        let y_pred = apply_threshold(y_score, threshold);
        let mut report = Self::from_predictions(y_true, y_score, &y_pred)?;
        report.threshold = Some(threshold);
        Ok(report)
    }

    /// Curves come from `y_score`, the confusion matrix and derived counts from `y_pred`
    pub fn from_predictions(y_true: &[u8], y_score: &[f64], y_pred: &[u8]) -> Result<Self> {
        check_lengths(y_true, y_score.len())?;
        let confusion_matrix = ConfusionMatrix::new(y_true, y_pred)?;
        let roc = roc_curve(y_true, y_score)?;
        let pr = precision_recall_curve(y_true, y_score)?;

        Ok(Self {
            n_samples: y_true.len(),
            threshold: None,
            accuracy: confusion_matrix.accuracy(),
            classification_report: ClassificationReport::from_confusion(&confusion_matrix),
            confusion_matrix,
            roc_auc: auc(&roc.fpr, &roc.tpr)?,
            average_precision: average_precision_score(y_true, y_score)?,
            f1: confusion_matrix.f1_score(),
            auprc: auc(&pr.recall, &pr.precision)?,
            optimal_cutoff: find_optimal_cutoff(y_true, y_score)?,
            roc,
            pr,
        })
    }

    /// Print report to stdout
    pub fn print(&self) {
        println!("\n=== Evaluation Report ===");
        println!("Samples: {}", self.n_samples);
        println!("Accuracy: {:.4}", self.accuracy);
        println!("\n---Confusion Matrix---");
        println!("{}", self.confusion_matrix);
        println!("\n---Classification Report---");
        println!("{}", self.classification_report);
        println!("ROC AUC: {:.4}", self.roc_auc);
        println!("Avg. Precision: {:.4}", self.average_precision);
        println!("F1: {:.4}", self.f1);
        println!("PR AUC: {:.4}", self.auprc);
        println!("Optimal cutoff: {:.4}", self.optimal_cutoff);
        println!("=========================\n");
    }

    /// Write `roc_curve.svg` and `pr_curve.svg` into `dir`
    pub fn render_plots<P: AsRef<Path>>(&self, dir: P) -> anyhow::Result<()> {
        let dir = dir.as_ref();
        ensure_dir(dir)?;
        plot::render_roc_curve(&self.roc, self.roc_auc, dir.join("roc_curve.svg"))
            .context("Failed to render ROC curve")?;
        plot::render_pr_curve(&self.pr, self.auprc, dir.join("pr_curve.svg"))
            .context("Failed to render PR curve")?;
        Ok(())
    }
}

/// ROC AUC of `model` on test data
pub fn get_auc_score<C: Classifier + ?Sized>(
    model: &C,
    x_test: ArrayView2<'_, f32>,
    y_test: &[u8],
) -> anyhow::Result<f64> {
    let y_score = model.predict_proba(x_test)?;
    let score = roc_auc_score(y_test, &y_score.to_vec())?;
    info!("AUC Score: {:.4}", score);
    Ok(score)
}

/// Score `model` on test data, optionally rendering its curves into `plot_dir`.
///
/// Hard labels come from [`Classifier::predict`], curves from
/// [`Classifier::predict_proba`].
pub fn roc_and_prc<C: Classifier + ?Sized>(
    model: &C,
    x_test: ArrayView2<'_, f32>,
    y_test: &[u8],
    plot_dir: Option<&Path>,
) -> anyhow::Result<EvaluationReport> {
    let y_score = model.predict_proba(x_test)?;
    let y_pred = model.predict(x_test)?;
    let report = EvaluationReport::from_predictions(y_test, &y_score.to_vec(), &y_pred.to_vec())?;

    if let Some(dir) = plot_dir {
        report.render_plots(dir)?;
        info!("Curves saved to {:?}", dir);
    }
    Ok(report)
}
