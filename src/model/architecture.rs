use std::fmt;

use burn::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ModelError;
use crate::model::encoder::{build_encoder, Encoder, EncoderSpec};
use crate::model::head::{build_head, Head, HeadSpec, POSITIVE_CLASS};
use crate::model::identity::derive_identity;
use crate::model::CrnnConfig;

/// Complete architecture description: encoder, head and the key naming them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub identity: String,
    pub config: CrnnConfig,
    pub encoder: EncoderSpec,
    pub head: HeadSpec,
}

impl ModelSpec {
    /// Describe the model for `config`; nothing is returned on any error
    pub fn build(config: &CrnnConfig) -> Result<Self, ModelError> {
        let encoder = build_encoder(config)?;
        let head = build_head(encoder.output_shape(), config)?;

        if head.input_shape() != encoder.output_shape() {
            return Err(ModelError::ShapeMismatch {
                expected: head.input_shape().to_string(),
                found: encoder.output_shape().to_string(),
            });
        }

        Ok(Self {
            identity: derive_identity(config),
            config: config.clone(),
            encoder,
            head,
        })
    }

    /// Initialize fresh weights for this architecture
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<CrnnModel<B>, ModelError> {
        let encoder = self.encoder.init(device)?;
        let head = self.head.init(device);
        Ok(CrnnModel { encoder, head })
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "model {}", self.identity)?;
        write!(f, "{}", self.encoder)?;
        write!(f, "{}", self.head)
    }
}

/// Model output, one form per variant
#[derive(Debug, Clone)]
pub enum ModelOutput<B: Backend> {
    /// `[batch, 2]` probabilities `(negative, positive)`
    Utterance(Tensor<B, 2>),
    /// `[batch, steps, num_labels]` per-frame label probabilities
    Frames(Tensor<B, 3>),
}

/// CRNN wake-word model
#[derive(Module, Debug)]
pub struct CrnnModel<B: Backend> {
    encoder: Encoder<B>,
    head: Head<B>,
}

impl<B: Backend> CrnnModel<B> {
    /// Assemble a model from separately loaded parts
    pub fn from_parts(encoder: Encoder<B>, head: Head<B>) -> Self {
        Self { encoder, head }
    }

    pub fn encoder(&self) -> &Encoder<B> {
        &self.encoder
    }

    pub fn head(&self) -> &Head<B> {
        &self.head
    }

    pub fn is_classifier(&self) -> bool {
        matches!(self.head, Head::Classifier(_))
    }

    /// Forward pass over `[batch, features, frames]` feature maps
    pub fn forward(&self, input: Tensor<B, 3>) -> ModelOutput<B> {
        match &self.head {
            Head::Classifier(head) => {
                ModelOutput::Utterance(head.forward(self.encoder.forward_pooled(input)))
            }
            Head::FrameLabeler(head) => {
                ModelOutput::Frames(head.forward(self.encoder.forward_sequence(input)))
            }
        }
    }

    /// `P(positive)` per example; `None` for a per-frame labeler
    pub fn positive_scores(&self, input: Tensor<B, 3>) -> Option<Tensor<B, 1>> {
        match self.forward(input) {
            ModelOutput::Utterance(probs) => {
                let [batch, _] = probs.dims();
                Some(
                    probs
                        .slice([0..batch, POSITIVE_CLASS..POSITIVE_CLASS + 1])
                        .reshape([batch]),
                )
            }
            ModelOutput::Frames(_) => None,
        }
    }
}

/// Build and initialize the model described by `config`
pub fn init_model<B: Backend>(
    config: &CrnnConfig,
    device: &B::Device,
) -> Result<(ModelSpec, CrnnModel<B>), ModelError> {
    let spec = ModelSpec::build(config)?;
    let model = spec.init(device)?;
    info!(
        "Initialized {} with {} parameters",
        spec.identity,
        model.num_params()
    );
    Ok((spec, model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::encoder::FeatureShape;
    use crate::model::RecurrentType;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_spec_shapes_agree_for_valid_configs() {
        let mut configs = Vec::new();
        for layers in 1..=3 {
            for cell in [RecurrentType::Gru, RecurrentType::Lstm] {
                configs.push(
                    CrnnConfig::classifier()
                        .with_recurrent_layers(layers)
                        .with_recurrent_type(cell),
                );
                configs.push(
                    CrnnConfig::sequence_labeler(4)
                        .with_recurrent_layers(layers)
                        .with_recurrent_type(cell),
                );
            }
        }

        for config in &configs {
            let spec = ModelSpec::build(config).unwrap();
            assert_eq!(spec.head.input_shape(), spec.encoder.output_shape());
        }
    }

    #[test]
    fn test_classifier_forward() {
        let device = Default::default();
        let (_, model) = init_model::<TestBackend>(&CrnnConfig::small(), &device).unwrap();
        assert!(model.is_classifier());

        let input = Tensor::<TestBackend, 3>::zeros([2, 16, 24], &device);
        match model.forward(input.clone()) {
            ModelOutput::Utterance(probs) => assert_eq!(probs.dims(), [2, 2]),
            ModelOutput::Frames(_) => panic!("classifier produced frames"),
        }

        let scores = model.positive_scores(input).unwrap();
        assert_eq!(scores.dims(), [2]);
    }

    #[test]
    fn test_labeler_steps_follow_input_length() {
        let device = Default::default();
        for frames in [8, 13, 24, 31] {
            let config = CrnnConfig::small()
                .with_input_frames(frames)
                .with_recurrent_type(RecurrentType::Lstm)
                .with_variant(crate::model::Variant::SequenceLabeler { num_labels: 4 });
            let (spec, model) = init_model::<TestBackend>(&config, &device).unwrap();
            let steps = spec.encoder.time_steps();
            assert_eq!(steps, frames.div_ceil(2));
            assert_eq!(
                spec.head.output_shape(),
                FeatureShape::Sequence { steps, features: 4 }
            );

            let input = Tensor::<TestBackend, 3>::zeros([1, 16, frames], &device);
            match model.forward(input.clone()) {
                ModelOutput::Frames(probs) => assert_eq!(probs.dims(), [1, steps, 4]),
                ModelOutput::Utterance(_) => panic!("labeler produced utterance scores"),
            }
            assert!(model.positive_scores(input).is_none());
        }
    }

    #[test]
    fn test_invalid_config_builds_nothing() {
        let config = CrnnConfig::small().with_stride_freq(64);
        assert!(matches!(
            ModelSpec::build(&config),
            Err(ModelError::InvalidGeometry(_))
        ));
    }
}
