use std::path::PathBuf;

/// Errors raised while validating a configuration or building a model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Convolution geometry yields a zero-sized or undefined feature map
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Recurrent cell kind outside {gru, lstm}
    #[error("unsupported recurrent type '{0}' (expected 'gru' or 'lstm')")]
    InvalidRecurrentType(String),

    /// Activation name not known to the encoder
    #[error("unsupported activation '{0}'")]
    InvalidActivation(String),

    /// Non-geometric hyperparameter out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Encoder output does not fit the requested head
    #[error("shape mismatch: head expects {expected}, encoder produces {found}")]
    ShapeMismatch { expected: String, found: String },
}

/// Errors raised by the evaluation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("cannot evaluate on an empty dataset")]
    EmptyDataset,

    #[error("{predictions} predictions for {labels} labels")]
    LengthMismatch { predictions: usize, labels: usize },

    #[error("label {label} at index {index} is not binary")]
    InvalidLabel { index: usize, label: u8 },

    #[error("dataset has {found} features per frame, model expects {expected}")]
    FeatureMismatch { expected: usize, found: usize },

    /// Convolution padding is fixed for the configured frame count
    #[error("dataset has {found} frames per example, model expects {expected}")]
    FrameMismatch { expected: usize, found: usize },

    /// Only utterance-level classifiers produce a single detection score
    #[error("model variant '{0}' does not produce utterance scores")]
    UnsupportedVariant(String),

    #[error("prediction failed: {0}")]
    Prediction(String),
}

/// Errors raised while writing or reading model artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("recorder failed on {path:?}: {message}")]
    Recorder { path: PathBuf, message: String },

    #[error("bad metadata in {path:?}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("artifact not found: {0:?}")]
    Missing(PathBuf),

    #[error(transparent)]
    Model(#[from] ModelError),

    /// Some files were written before the failure; they are left in place
    #[error("export interrupted after writing {} file(s): {source}", written.len())]
    Partial {
        written: Vec<PathBuf>,
        #[source]
        source: Box<ExportError>,
    },
}
