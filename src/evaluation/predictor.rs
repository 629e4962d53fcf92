use burn::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::data::LabeledDataset;
use crate::error::EvalError;
use crate::evaluation::{EvaluationReport, DEFAULT_THRESHOLD};
use crate::model::architecture::CrnnModel;

/// Runs a trained detector over a labeled dataset
#[derive(Debug, Clone)]
pub struct Evaluator {
    threshold: f64,
    batch_size: usize,
    show_progress: bool,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            batch_size: 64,
            show_progress: false,
        }
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Batch size; zero is treated as one
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Positive-class score for every example, in dataset order
    pub fn predict_scores<B: Backend, D: LabeledDataset>(
        &self,
        model: &CrnnModel<B>,
        dataset: &D,
        device: &B::Device,
    ) -> Result<Vec<f32>, EvalError> {
        let expected = model.encoder().input_features();
        if dataset.num_features() != expected {
            return Err(EvalError::FeatureMismatch {
                expected,
                found: dataset.num_features(),
            });
        }
        let expected = model.encoder().input_frames();
        if dataset.num_frames() != expected {
            return Err(EvalError::FrameMismatch {
                expected,
                found: dataset.num_frames(),
            });
        }
        if !model.is_classifier() {
            return Err(EvalError::UnsupportedVariant("sequence_labeler".to_string()));
        }

        let total = dataset.len();
        let features = dataset.num_features();
        let frames = dataset.num_frames();
        let progress = self.progress_bar(total as u64);

        let mut scores = Vec::with_capacity(total);

        for start in (0..total).step_by(self.batch_size) {
            let end = (start + self.batch_size).min(total);

            let mut buffer = Vec::with_capacity((end - start) * features * frames);
            for index in start..end {
                let example = dataset.features(index).ok_or_else(|| {
                    EvalError::Prediction(format!("example {index} missing from dataset"))
                })?;
                buffer.extend_from_slice(example);
            }

            let input = Tensor::<B, 3>::from_data(
                TensorData::new(buffer, [end - start, features, frames]),
                device,
            );
            let batch_scores = model
                .positive_scores(input)
                .ok_or_else(|| EvalError::UnsupportedVariant("sequence_labeler".to_string()))?
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .map_err(|err| EvalError::Prediction(format!("{err:?}")))?;

            debug!("Scored examples {}..{}", start, end);
            scores.extend(batch_scores);
            progress.inc((end - start) as u64);
        }

        progress.finish_and_clear();
        Ok(scores)
    }

    /// Score every example and compare thresholded decisions with labels
    pub fn evaluate<B: Backend, D: LabeledDataset>(
        &self,
        model: &CrnnModel<B>,
        dataset: &D,
        device: &B::Device,
    ) -> Result<EvaluationReport, EvalError> {
        if dataset.is_empty() {
            return Err(EvalError::EmptyDataset);
        }

        info!(
            "Evaluating {} examples (batch size {}, threshold {})",
            dataset.len(),
            self.batch_size,
            self.threshold
        );
        let scores = self.predict_scores(model, dataset, device)?;
        let report = EvaluationReport::from_scores(&dataset.labels(), &scores, self.threshold)?;

        info!(
            "tp={} tn={} fp={} fn={}",
            report.true_positive, report.true_negative, report.false_positive, report.false_negative
        );
        Ok(report)
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} examples")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar
    }
}
