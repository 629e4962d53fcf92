//! # wakecrnn: CRNN wake-word detectors
//!
//! Builds convolutional-recurrent networks for keyword spotting from a
//! hyperparameter configuration, names them, stores them and measures them.
//!
//! ## Features
//!
//! - Encoder builder: strided "same" convolution, time/frequency transposition
//!   and a stack of bidirectional GRU or LSTM blocks
//! - Utterance classifier head and per-frame labeling head
//! - Deterministic identity strings used as artifact keys
//! - Separate encoder/detector artifacts, full and half precision
//! - Thresholded evaluation with confusion-matrix metrics
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use wakecrnn::data::loader::DatasetLoader;
//! use wakecrnn::evaluation::predictor::Evaluator;
//! use wakecrnn::model::{CrnnConfig, architecture::init_model, artifacts::ArtifactStore};
//! use wakecrnn::DefaultBackend;
//!
//! let device = Default::default();
//! let config = CrnnConfig::classifier();
//! let (spec, model) = init_model::<DefaultBackend>(&config, &device).unwrap();
//!
//! // Store encoder and detector under the model identity
//! let store = ArtifactStore::new("models").unwrap();
//! store.export(&model, &spec).unwrap();
//!
//! // Evaluate on a labeled feature file
//! let dataset = DatasetLoader::new(config.input_features).load("test.csv").unwrap();
//! let report = Evaluator::new().evaluate(&model, &dataset, &device).unwrap();
//! report.print();
//! ```

pub mod cli;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod model;
pub mod utils;

use burn_ndarray::NdArray;

/// Default backend type
pub type DefaultBackend = NdArray<f32>;

/// Re-export commonly used types
pub use data::{FeatureDataset, LabeledDataset};
pub use error::{EvalError, ExportError, ModelError};
pub use evaluation::EvaluationReport;
pub use model::{CrnnConfig, architecture::CrnnModel};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn info() -> String {
    format!(
        "{} v{} - CRNN wake-word model builder and evaluator",
        NAME, VERSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_info() {
        let info_str = info();
        assert!(info_str.contains("wakecrnn"));
        assert!(info_str.contains(VERSION));
    }
}
