use std::fmt;

use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::{relu, softmax};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::model::encoder::FeatureShape;
use crate::model::{CrnnConfig, Variant};

/// Number of classes of the utterance classifier: `[negative, positive]`
pub const NUM_CLASSES: usize = 2;

/// Index of the positive (wake-word) class in classifier output
pub const POSITIVE_CLASS: usize = 1;

/// Head description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "head", rename_all = "snake_case")]
pub enum HeadSpec {
    /// dense(hidden, relu) -> dropout -> dense(2, softmax)
    Classifier {
        input_size: usize,
        hidden_units: usize,
        dropout: f64,
    },
    /// dense(num_labels, softmax) shared across every time step
    FrameLabeler {
        steps: usize,
        input_size: usize,
        num_labels: usize,
    },
}

impl HeadSpec {
    pub fn input_shape(&self) -> FeatureShape {
        match *self {
            HeadSpec::Classifier { input_size, .. } => FeatureShape::Vector {
                features: input_size,
            },
            HeadSpec::FrameLabeler {
                steps, input_size, ..
            } => FeatureShape::Sequence {
                steps,
                features: input_size,
            },
        }
    }

    pub fn output_shape(&self) -> FeatureShape {
        match *self {
            HeadSpec::Classifier { .. } => FeatureShape::Vector {
                features: NUM_CLASSES,
            },
            HeadSpec::FrameLabeler {
                steps, num_labels, ..
            } => FeatureShape::Sequence {
                steps,
                features: num_labels,
            },
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Head<B> {
        match *self {
            HeadSpec::Classifier {
                input_size,
                hidden_units,
                dropout,
            } => Head::Classifier(ClassifierHead {
                hidden: LinearConfig::new(input_size, hidden_units).init(device),
                dropout: DropoutConfig::new(dropout).init(),
                output: LinearConfig::new(hidden_units, NUM_CLASSES).init(device),
            }),
            HeadSpec::FrameLabeler {
                input_size,
                num_labels,
                ..
            } => Head::FrameLabeler(FrameLabelerHead {
                output: LinearConfig::new(input_size, num_labels).init(device),
            }),
        }
    }
}

impl fmt::Display for HeadSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeadSpec::Classifier {
                hidden_units,
                dropout,
                ..
            } => {
                writeln!(f, "detector input {}", self.input_shape())?;
                writeln!(f, "   0 dense          -> ({hidden_units})")?;
                writeln!(f, "   1 dropout({dropout}) -> ({hidden_units})")?;
                writeln!(f, "   2 dense+softmax  -> {}", self.output_shape())
            }
            HeadSpec::FrameLabeler { .. } => {
                writeln!(f, "detector input {}", self.input_shape())?;
                writeln!(f, "   0 per-frame dense+softmax -> {}", self.output_shape())
            }
        }
    }
}

/// Describe the head that sits on an encoder producing `encoder_output`
pub fn build_head(encoder_output: FeatureShape, config: &CrnnConfig) -> Result<HeadSpec, ModelError> {
    match (config.variant, encoder_output) {
        (Variant::Classifier, FeatureShape::Vector { features }) => Ok(HeadSpec::Classifier {
            input_size: features,
            hidden_units: config.head_units,
            dropout: config.dropout,
        }),
        (Variant::SequenceLabeler { num_labels }, FeatureShape::Sequence { steps, features }) => {
            Ok(HeadSpec::FrameLabeler {
                steps,
                input_size: features,
                num_labels,
            })
        }
        (Variant::Classifier, found) => Err(ModelError::ShapeMismatch {
            expected: "a pooled vector".to_string(),
            found: found.to_string(),
        }),
        (Variant::SequenceLabeler { .. }, found) => Err(ModelError::ShapeMismatch {
            expected: "a feature sequence".to_string(),
            found: found.to_string(),
        }),
    }
}

#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    hidden: Linear<B>,
    dropout: Dropout,
    output: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    /// `[batch, features]` to `[batch, 2]` class probabilities
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = relu(self.hidden.forward(x));
        let x = self.dropout.forward(x);
        softmax(self.output.forward(x), 1)
    }
}

#[derive(Module, Debug)]
pub struct FrameLabelerHead<B: Backend> {
    output: Linear<B>,
}

impl<B: Backend> FrameLabelerHead<B> {
    /// `[batch, steps, features]` to `[batch, steps, num_labels]`
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        softmax(self.output.forward(x), 2)
    }
}

/// Detector head module
#[derive(Module, Debug)]
pub enum Head<B: Backend> {
    Classifier(ClassifierHead<B>),
    FrameLabeler(FrameLabelerHead<B>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::encoder::build_encoder;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_classifier_head_on_pooled_encoder() {
        let config = CrnnConfig::classifier();
        let encoder = build_encoder(&config).unwrap();
        let head = build_head(encoder.output_shape(), &config).unwrap();

        assert_eq!(head.input_shape(), encoder.output_shape());
        assert_eq!(head.output_shape(), FeatureShape::Vector { features: 2 });
    }

    #[test]
    fn test_labeler_head_keeps_time_steps() {
        let config = CrnnConfig::sequence_labeler(5);
        let encoder = build_encoder(&config).unwrap();
        let head = build_head(encoder.output_shape(), &config).unwrap();

        assert_eq!(head.input_shape(), encoder.output_shape());
        assert_eq!(
            head.output_shape(),
            FeatureShape::Sequence {
                steps: encoder.time_steps(),
                features: 5
            }
        );
    }

    #[test]
    fn test_variant_shape_mismatch() {
        let sequence = FeatureShape::Sequence { steps: 10, features: 64 };
        let vector = FeatureShape::Vector { features: 64 };

        assert!(matches!(
            build_head(sequence, &CrnnConfig::classifier()),
            Err(ModelError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            build_head(vector, &CrnnConfig::sequence_labeler(4)),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_heads_output_distributions() {
        let device = Default::default();

        let classifier = HeadSpec::Classifier {
            input_size: 6,
            hidden_units: 4,
            dropout: 0.5,
        };
        let Head::Classifier(head) = classifier.init::<TestBackend>(&device) else {
            panic!("expected classifier head");
        };
        let probs = head.forward(Tensor::ones([3, 6], &device));
        assert_eq!(probs.dims(), [3, 2]);
        let sums = probs.sum_dim(1).into_data().convert::<f32>().to_vec::<f32>().unwrap();
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));

        let labeler = HeadSpec::FrameLabeler {
            steps: 7,
            input_size: 6,
            num_labels: 4,
        };
        let Head::FrameLabeler(head) = labeler.init::<TestBackend>(&device) else {
            panic!("expected frame labeler head");
        };
        let probs = head.forward(Tensor::ones([2, 7, 6], &device));
        assert_eq!(probs.dims(), [2, 7, 4]);
        let sums = probs.sum_dim(2).into_data().convert::<f32>().to_vec::<f32>().unwrap();
        assert_eq!(sums.len(), 14);
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
    }
}
