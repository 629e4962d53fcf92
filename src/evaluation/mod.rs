//! Thresholded decisions and confusion-matrix metrics.

pub mod predictor;

use serde::{Deserialize, Serialize};

use crate::error::EvalError;

/// Decision threshold used unless a deployment picks its own
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Turn scores into binary decisions: below `threshold` is negative
pub fn decide(scores: &[f32], threshold: f64) -> Vec<u8> {
    scores
        .iter()
        .map(|&score| if (score as f64) < threshold { 0 } else { 1 })
        .collect()
}

/// 2x2 confusion matrix, rows = ground truth, columns = decision, both
/// ordered `(negative, positive)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_positive: usize,
}

impl ConfusionMatrix {
    /// Count `(label, decision)` pairs; both slices must be binary and
    /// equally long
    pub fn from_decisions(labels: &[u8], decisions: &[u8]) -> Result<Self, EvalError> {
        if labels.len() != decisions.len() {
            return Err(EvalError::LengthMismatch {
                predictions: decisions.len(),
                labels: labels.len(),
            });
        }
        if labels.is_empty() {
            return Err(EvalError::EmptyDataset);
        }

        let mut matrix = Self::default();
        for (index, (&label, &decision)) in labels.iter().zip(decisions).enumerate() {
            match (label, decision) {
                (0, 0) => matrix.true_negative += 1,
                (0, 1) => matrix.false_positive += 1,
                (1, 0) => matrix.false_negative += 1,
                (1, 1) => matrix.true_positive += 1,
                (0 | 1, other) => return Err(EvalError::InvalidLabel { index, label: other }),
                (other, _) => return Err(EvalError::InvalidLabel { index, label: other }),
            }
        }
        Ok(matrix)
    }

    pub fn total(&self) -> usize {
        self.true_negative + self.false_positive + self.false_negative + self.true_positive
    }

    /// `[[tn, fp], [fn, tp]]`
    pub fn as_rows(&self) -> [[usize; 2]; 2] {
        [
            [self.true_negative, self.false_positive],
            [self.false_negative, self.true_positive],
        ]
    }
}

/// `numerator / denominator`, undefined when the denominator is zero
fn ratio(numerator: usize, denominator: usize) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

/// Evaluation outcome of one model on one dataset
///
/// A metric whose denominator is zero is `None`; the others are still
/// reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub examples: usize,
    pub threshold: f64,
    pub true_positive: usize,
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    /// TP / (TP + FP)
    pub precision: Option<f64>,
    /// TP / (TP + FN)
    pub recall: Option<f64>,
    /// Mean recall over the classes present in the ground truth
    pub balanced_accuracy: Option<f64>,
    pub accuracy: Option<f64>,
    pub f1: Option<f64>,
}

impl EvaluationReport {
    /// Metrics from ground truth and already thresholded decisions
    pub fn from_decisions(labels: &[u8], decisions: &[u8], threshold: f64) -> Result<Self, EvalError> {
        let matrix = ConfusionMatrix::from_decisions(labels, decisions)?;
        Ok(Self::from_matrix(&matrix, threshold))
    }

    /// Threshold `scores` and compute metrics against `labels`
    pub fn from_scores(labels: &[u8], scores: &[f32], threshold: f64) -> Result<Self, EvalError> {
        if labels.len() != scores.len() {
            return Err(EvalError::LengthMismatch {
                predictions: scores.len(),
                labels: labels.len(),
            });
        }
        Self::from_decisions(labels, &decide(scores, threshold), threshold)
    }

    pub fn from_matrix(matrix: &ConfusionMatrix, threshold: f64) -> Self {
        let ConfusionMatrix {
            true_negative: tn,
            false_positive: fp,
            false_negative: fn_,
            true_positive: tp,
        } = *matrix;

        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let specificity = ratio(tn, tn + fp);

        let class_recalls: Vec<f64> = [recall, specificity].into_iter().flatten().collect();
        let balanced_accuracy = (!class_recalls.is_empty())
            .then(|| class_recalls.iter().sum::<f64>() / class_recalls.len() as f64);

        let f1 = match (precision, recall) {
            (Some(p), Some(r)) if p + r > 0.0 => Some(2.0 * p * r / (p + r)),
            (Some(_), Some(_)) => Some(0.0),
            _ => None,
        };

        Self {
            examples: matrix.total(),
            threshold,
            true_positive: tp,
            true_negative: tn,
            false_positive: fp,
            false_negative: fn_,
            precision,
            recall,
            balanced_accuracy,
            accuracy: ratio(tp + tn, matrix.total()),
            f1,
        }
    }

    pub fn confusion_matrix(&self) -> ConfusionMatrix {
        ConfusionMatrix {
            true_negative: self.true_negative,
            false_positive: self.false_positive,
            false_negative: self.false_negative,
            true_positive: self.true_positive,
        }
    }

    /// Print summary to stdout
    pub fn print(&self) {
        let rows = self.confusion_matrix().as_rows();
        let show = |metric: Option<f64>| match metric {
            Some(value) => format!("{value:.4}"),
            None => "undefined".to_string(),
        };

        println!("\n=== Evaluation Report ===");
        println!("Examples: {} (threshold {})", self.examples, self.threshold);
        println!("Confusion matrix (rows: truth, cols: decision; negative, positive)");
        println!("  [[{:>6} {:>6}]", rows[0][0], rows[0][1]);
        println!("   [{:>6} {:>6}]]", rows[1][0], rows[1][1]);
        println!("True Positive: {}", self.true_positive);
        println!("True Negative: {}", self.true_negative);
        println!("False Positive: {}", self.false_positive);
        println!("False Negative: {}", self.false_negative);
        println!("Precision: {}", show(self.precision));
        println!("Recall: {}", show(self.recall));
        println!("Balanced Accuracy: {}", show(self.balanced_accuracy));
        println!("Accuracy: {}", show(self.accuracy));
        println!("F1: {}", show(self.f1));
        println!("=========================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_reference_example() {
        let labels = [0, 0, 1, 1];
        let scores = [0.1, 0.6, 0.4, 0.9];

        assert_eq!(decide(&scores, DEFAULT_THRESHOLD), vec![0, 1, 0, 1]);

        let report = EvaluationReport::from_scores(&labels, &scores, DEFAULT_THRESHOLD).unwrap();
        assert_eq!(
            (report.true_negative, report.false_positive, report.false_negative, report.true_positive),
            (1, 1, 1, 1)
        );
        assert_eq!(report.precision, Some(0.5));
        assert_eq!(report.recall, Some(0.5));
        assert_eq!(report.balanced_accuracy, Some(0.5));
        assert_eq!(report.accuracy, Some(0.5));
    }

    #[test]
    fn test_threshold_boundary_is_positive() {
        assert_eq!(decide(&[0.5, 0.4999, 1.0, 0.0], 0.5), vec![1, 0, 1, 0]);
        assert_eq!(decide(&[0.5, 0.7], 0.8), vec![0, 0]);
    }

    #[test]
    fn test_all_negative_decisions_on_positive_labels() {
        let n = 7;
        let labels = vec![1u8; n];
        let decisions = vec![0u8; n];

        let report = EvaluationReport::from_decisions(&labels, &decisions, DEFAULT_THRESHOLD).unwrap();
        assert_eq!(report.true_positive, 0);
        assert_eq!(report.false_negative, n);
        assert_eq!(report.recall, Some(0.0));
        assert_eq!(report.precision, None);
        assert_eq!(report.f1, None);
        // only the positive class is present
        assert_eq!(report.balanced_accuracy, Some(0.0));
    }

    #[test]
    fn test_counts_sum_to_examples() {
        let mut rng = ChaCha8Rng::seed_from_u64(2026);
        for n in [1, 2, 17, 256] {
            let labels: Vec<u8> = (0..n).map(|_| rng.gen_range(0..=1)).collect();
            let scores: Vec<f32> = (0..n).map(|_| rng.gen::<f32>()).collect();

            let report = EvaluationReport::from_scores(&labels, &scores, DEFAULT_THRESHOLD).unwrap();
            assert_eq!(report.examples, n);
            assert_eq!(report.confusion_matrix().total(), n);
        }
    }

    #[test]
    fn test_joint_permutation_invariance() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let labels: Vec<u8> = (0..64).map(|_| rng.gen_range(0..=1)).collect();
        let scores: Vec<f32> = (0..64).map(|_| rng.gen::<f32>()).collect();
        let reference = EvaluationReport::from_scores(&labels, &scores, DEFAULT_THRESHOLD).unwrap();

        for _ in 0..5 {
            let mut pairs: Vec<(u8, f32)> = labels.iter().copied().zip(scores.iter().copied()).collect();
            pairs.shuffle(&mut rng);
            let (shuffled_labels, shuffled_scores): (Vec<u8>, Vec<f32>) = pairs.into_iter().unzip();

            let report =
                EvaluationReport::from_scores(&shuffled_labels, &shuffled_scores, DEFAULT_THRESHOLD).unwrap();
            assert_eq!(report, reference);
        }
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            EvaluationReport::from_scores(&[], &[], DEFAULT_THRESHOLD),
            Err(EvalError::EmptyDataset)
        ));
        assert!(matches!(
            EvaluationReport::from_scores(&[0, 1], &[0.3], DEFAULT_THRESHOLD),
            Err(EvalError::LengthMismatch { predictions: 1, labels: 2 })
        ));
        assert!(matches!(
            ConfusionMatrix::from_decisions(&[0, 3], &[0, 1]),
            Err(EvalError::InvalidLabel { index: 1, label: 3 })
        ));
    }

    #[test]
    fn test_perfect_detector() {
        let report = EvaluationReport::from_scores(&[0, 1, 1, 0], &[0.0, 0.9, 0.8, 0.2], 0.5).unwrap();
        assert_eq!(report.precision, Some(1.0));
        assert_eq!(report.recall, Some(1.0));
        assert_eq!(report.balanced_accuracy, Some(1.0));
        assert_eq!(report.f1, Some(1.0));
    }
}
