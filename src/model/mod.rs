pub mod architecture;
pub mod artifacts;
pub mod encoder;
pub mod head;
pub mod identity;

use std::fmt;
use std::str::FromStr;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Recurrent cell used inside every bidirectional block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RecurrentType {
    Gru,
    Lstm,
}

impl RecurrentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrentType::Gru => "gru",
            RecurrentType::Lstm => "lstm",
        }
    }
}

impl FromStr for RecurrentType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gru" => Ok(RecurrentType::Gru),
            "lstm" => Ok(RecurrentType::Lstm),
            _ => Err(ModelError::InvalidRecurrentType(s.to_string())),
        }
    }
}

impl TryFrom<String> for RecurrentType {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RecurrentType> for String {
    fn from(value: RecurrentType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for RecurrentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nonlinearity applied after the convolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Activation {
    Relu,
    Tanh,
    Sigmoid,
    Gelu,
    Linear,
}

impl Activation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::Tanh => "tanh",
            Activation::Sigmoid => "sigmoid",
            Activation::Gelu => "gelu",
            Activation::Linear => "linear",
        }
    }

    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        use burn::tensor::activation;

        match self {
            Activation::Relu => activation::relu(x),
            Activation::Tanh => activation::tanh(x),
            Activation::Sigmoid => activation::sigmoid(x),
            Activation::Gelu => activation::gelu(x),
            Activation::Linear => x,
        }
    }
}

impl FromStr for Activation {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "relu" => Ok(Activation::Relu),
            "tanh" => Ok(Activation::Tanh),
            "sigmoid" => Ok(Activation::Sigmoid),
            "gelu" => Ok(Activation::Gelu),
            "linear" | "identity" | "none" => Ok(Activation::Linear),
            _ => Err(ModelError::InvalidActivation(s.to_string())),
        }
    }
}

impl TryFrom<String> for Activation {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Activation> for String {
    fn from(value: Activation) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Architecture variant sharing the CRNN encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// One wake/no-wake decision per utterance
    Classifier,
    /// Per-frame label distribution for a CTC-style objective
    SequenceLabeler { num_labels: usize },
}

impl Variant {
    pub fn name(&self) -> &'static str {
        match self {
            Variant::Classifier => "classifier",
            Variant::SequenceLabeler { .. } => "sequence_labeler",
        }
    }

    /// Whether the last recurrent block keeps one output per time step
    pub fn returns_sequences(&self) -> bool {
        matches!(self, Variant::SequenceLabeler { .. })
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// CRNN hyperparameters
///
/// Kernel and stride are given per axis. The input feature map is laid out
/// as `(features, frames)`, so every 2-D pair below is ordered
/// `[frequency, time]` when handed to the convolution.
#[derive(Config, Debug)]
pub struct CrnnConfig {
    /// Number of frequency bins per frame
    #[config(default = "40")]
    pub input_features: usize,

    /// Number of frames per example
    #[config(default = "151")]
    pub input_frames: usize,

    /// Number of convolution filters
    #[config(default = "32")]
    pub conv_filters: usize,

    /// Kernel extent along time
    #[config(default = "20")]
    pub kernel_time: usize,

    /// Kernel extent along frequency
    #[config(default = "5")]
    pub kernel_freq: usize,

    /// Stride along time
    #[config(default = "8")]
    pub stride_time: usize,

    /// Stride along frequency
    #[config(default = "2")]
    pub stride_freq: usize,

    /// Number of stacked bidirectional recurrent blocks
    #[config(default = "2")]
    pub recurrent_layers: usize,

    /// Hidden units per direction
    #[config(default = "32")]
    pub recurrent_units: usize,

    #[config(default = "RecurrentType::Gru")]
    pub recurrent_type: RecurrentType,

    /// Hidden units of the classifier head
    #[config(default = "64")]
    pub head_units: usize,

    /// Dropout rate in the classifier head
    #[config(default = "0.0")]
    pub dropout: f64,

    #[config(default = "Activation::Relu")]
    pub activation: Activation,

    /// Share of positive examples the training sampler drew
    #[config(default = "1.0")]
    pub positive_sample_ratio: f64,

    /// Whether training data went through augmentation
    #[config(default = "false")]
    pub data_augmented: bool,

    #[config(default = "Variant::Classifier")]
    pub variant: Variant,
}

impl CrnnConfig {
    /// Utterance classifier with the stock geometry
    pub fn classifier() -> Self {
        Self::new()
    }

    /// Per-frame labeler for CTC-style training
    pub fn sequence_labeler(num_labels: usize) -> Self {
        Self::new().with_variant(Variant::SequenceLabeler { num_labels })
    }

    /// Small geometry for quick experiments
    pub fn small() -> Self {
        Self::new()
            .with_input_features(16)
            .with_input_frames(24)
            .with_conv_filters(4)
            .with_kernel_time(3)
            .with_kernel_freq(3)
            .with_stride_time(2)
            .with_stride_freq(2)
            .with_recurrent_layers(1)
            .with_recurrent_units(8)
            .with_head_units(8)
    }

    /// Spatial extents `(freq, time)` after the strided "same" convolution
    pub fn conv_output_extent(&self) -> (usize, usize) {
        (
            self.input_features.div_ceil(self.stride_freq.max(1)),
            self.input_frames.div_ceil(self.stride_time.max(1)),
        )
    }

    /// Check every hyperparameter before anything is built
    pub fn validate(&self) -> Result<(), ModelError> {
        let geometry = [
            ("input_features", self.input_features),
            ("input_frames", self.input_frames),
            ("conv_filters", self.conv_filters),
            ("kernel_time", self.kernel_time),
            ("kernel_freq", self.kernel_freq),
            ("stride_time", self.stride_time),
            ("stride_freq", self.stride_freq),
        ];
        for (name, value) in geometry {
            if value == 0 {
                return Err(ModelError::InvalidGeometry(format!("{name} must be positive")));
            }
        }

        if self.stride_freq > self.input_features {
            return Err(ModelError::InvalidGeometry(format!(
                "frequency stride {} exceeds input extent {}",
                self.stride_freq, self.input_features
            )));
        }
        if self.stride_time > self.input_frames {
            return Err(ModelError::InvalidGeometry(format!(
                "time stride {} exceeds input extent {}",
                self.stride_time, self.input_frames
            )));
        }

        if self.recurrent_layers == 0 {
            return Err(ModelError::InvalidConfig(
                "recurrent_layers must be at least 1".to_string(),
            ));
        }
        if self.recurrent_units == 0 {
            return Err(ModelError::InvalidConfig(
                "recurrent_units must be positive".to_string(),
            ));
        }
        if self.head_units == 0 {
            return Err(ModelError::InvalidConfig("head_units must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.dropout) {
            return Err(ModelError::InvalidConfig(format!(
                "dropout must be within [0, 1], got {}",
                self.dropout
            )));
        }
        if !(self.positive_sample_ratio > 0.0 && self.positive_sample_ratio <= 1.0) {
            return Err(ModelError::InvalidConfig(format!(
                "positive_sample_ratio must be within (0, 1], got {}",
                self.positive_sample_ratio
            )));
        }
        if let Variant::SequenceLabeler { num_labels } = self.variant {
            if num_labels < 2 {
                return Err(ModelError::InvalidConfig(format!(
                    "sequence labeler needs at least 2 labels, got {num_labels}"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CrnnConfig::classifier().validate().is_ok());
        assert!(CrnnConfig::sequence_labeler(4).validate().is_ok());
        assert!(CrnnConfig::small().validate().is_ok());
    }

    #[test]
    fn test_conv_output_extent_rounds_up() {
        let config = CrnnConfig::new()
            .with_input_features(40)
            .with_input_frames(101)
            .with_stride_freq(3)
            .with_stride_time(8);
        assert_eq!(config.conv_output_extent(), (14, 13));
    }

    #[test]
    fn test_stride_larger_than_input_is_rejected() {
        let config = CrnnConfig::small().with_stride_time(25);
        assert!(matches!(config.validate(), Err(ModelError::InvalidGeometry(_))));

        let config = CrnnConfig::small().with_stride_freq(17);
        assert!(matches!(config.validate(), Err(ModelError::InvalidGeometry(_))));

        let config = CrnnConfig::small().with_kernel_freq(0);
        assert!(matches!(config.validate(), Err(ModelError::InvalidGeometry(_))));
    }

    #[test]
    fn test_out_of_range_metadata_is_rejected() {
        assert!(CrnnConfig::small().with_dropout(1.5).validate().is_err());
        assert!(CrnnConfig::small().with_positive_sample_ratio(0.0).validate().is_err());
        assert!(CrnnConfig::small().with_recurrent_layers(0).validate().is_err());
        assert!(CrnnConfig::sequence_labeler(1).validate().is_err());
    }

    #[test]
    fn test_parse_recurrent_type() {
        assert_eq!("GRU".parse::<RecurrentType>().unwrap(), RecurrentType::Gru);
        assert_eq!("lstm".parse::<RecurrentType>().unwrap(), RecurrentType::Lstm);
        assert!(matches!(
            "rnn".parse::<RecurrentType>(),
            Err(ModelError::InvalidRecurrentType(_))
        ));
    }

    #[test]
    fn test_parse_activation() {
        assert_eq!("relu".parse::<Activation>().unwrap(), Activation::Relu);
        assert_eq!("identity".parse::<Activation>().unwrap(), Activation::Linear);
        assert!("swishy".parse::<Activation>().is_err());
    }

    #[test]
    fn test_config_json_round_trip_rejects_unknown_cell() {
        let json = serde_json::to_string(&CrnnConfig::small()).unwrap();
        assert!(json.contains("\"gru\""));

        let broken = json.replace("\"gru\"", "\"rnn\"");
        let err = serde_json::from_str::<CrnnConfig>(&broken).unwrap_err();
        assert!(err.to_string().contains("rnn"));
    }
}
