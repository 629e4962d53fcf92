//! Convolutional-recurrent feature encoder.
//!
//! [`build_encoder`] turns a [`CrnnConfig`] into an [`EncoderSpec`], a plain
//! description of every layer and the shape it produces. [`EncoderSpec::init`]
//! then materializes the description as a [`burn`] module.
//!
//! Shape walk for an input of `F` frequency bins and `T` frames with `C`
//! filters and strides `(s_f, s_t)`:
//!
//! ```text
//! (F, T, 1) -conv-> (F', T', C) -permute-> (T', F', C) -reshape-> (T', F' * C)
//!           -> [bidirectional x N] -> (T', 2 * units) or (2 * units)
//! ```
//!
//! with `F' = ceil(F / s_f)` and `T' = ceil(T / s_t)`. Row `t` of the
//! reshaped map is the frequency column at time `t` taken across every
//! filter, which is what the recurrent stack consumes as one step.

use std::fmt;

use burn::module::Ignored;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::gru::{Gru, GruConfig};
use burn::nn::lstm::{Lstm, LstmConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ModelError;
use crate::model::{Activation, CrnnConfig, RecurrentType};

/// Shape of one example flowing out of a layer (batch axis omitted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureShape {
    /// 2-D map with channels, `[height, width, channels]`
    Map { dims: [usize; 3] },
    /// One feature vector per time step
    Sequence { steps: usize, features: usize },
    /// Single pooled vector
    Vector { features: usize },
}

impl FeatureShape {
    /// Size of the innermost axis
    pub fn features(&self) -> usize {
        match *self {
            FeatureShape::Map { dims } => dims[2],
            FeatureShape::Sequence { features, .. } => features,
            FeatureShape::Vector { features } => features,
        }
    }
}

impl fmt::Display for FeatureShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureShape::Map { dims } => write!(f, "({}, {}, {})", dims[0], dims[1], dims[2]),
            FeatureShape::Sequence { steps, features } => write!(f, "({steps}, {features})"),
            FeatureShape::Vector { features } => write!(f, "({features})"),
        }
    }
}

/// Zero padding around one spatial axis so that a strided valid convolution
/// yields `ceil(extent / stride)` outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamePadding {
    pub before: usize,
    pub after: usize,
}

impl SamePadding {
    /// Padding for one axis; the odd cell goes after, as in TensorFlow
    pub fn for_axis(extent: usize, kernel: usize, stride: usize) -> Self {
        let out = extent.div_ceil(stride);
        let total = ((out - 1) * stride + kernel).saturating_sub(extent);
        let before = total / 2;

        Self {
            before,
            after: total - before,
        }
    }
}

/// Description of a single encoder layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layer", rename_all = "snake_case")]
pub enum LayerSpec {
    Conv2d {
        filters: usize,
        /// `[freq, time]`
        kernel: [usize; 2],
        /// `[freq, time]`
        stride: [usize; 2],
        /// `[freq, time]`
        padding: [SamePadding; 2],
        activation: Activation,
        output: FeatureShape,
    },
    Permute {
        /// Axis order applied to the `(freq, time, channel)` map
        order: [usize; 3],
        output: FeatureShape,
    },
    Reshape {
        output: FeatureShape,
    },
    Bidirectional {
        cell: RecurrentType,
        input_size: usize,
        units: usize,
        return_sequences: bool,
        output: FeatureShape,
    },
}

impl LayerSpec {
    pub fn name(&self) -> &'static str {
        match self {
            LayerSpec::Conv2d { .. } => "conv2d",
            LayerSpec::Permute { .. } => "permute",
            LayerSpec::Reshape { .. } => "reshape",
            LayerSpec::Bidirectional { .. } => "bidirectional",
        }
    }

    pub fn output(&self) -> FeatureShape {
        match self {
            LayerSpec::Conv2d { output, .. }
            | LayerSpec::Permute { output, .. }
            | LayerSpec::Reshape { output }
            | LayerSpec::Bidirectional { output, .. } => *output,
        }
    }
}

/// Ordered encoder description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderSpec {
    /// `(features, frames)` of one example
    pub input: [usize; 2],
    pub layers: Vec<LayerSpec>,
}

impl EncoderSpec {
    pub fn output_shape(&self) -> FeatureShape {
        self.layers
            .last()
            .map(LayerSpec::output)
            .unwrap_or(FeatureShape::Map {
                dims: [self.input[0], self.input[1], 1],
            })
    }

    /// Number of time steps handed to the recurrent stack
    pub fn time_steps(&self) -> usize {
        self.layers
            .iter()
            .find_map(|layer| match layer {
                LayerSpec::Reshape {
                    output: FeatureShape::Sequence { steps, .. },
                } => Some(*steps),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn recurrent_blocks(&self) -> impl Iterator<Item = &LayerSpec> {
        self.layers
            .iter()
            .filter(|layer| matches!(layer, LayerSpec::Bidirectional { .. }))
    }

    /// Materialize the description as a burn module
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Encoder<B>, ModelError> {
        let mut conv = None;
        let mut activation = Activation::Linear;
        let mut pad_freq = [0, 0];
        let mut pad_time = [0, 0];
        let mut blocks = Vec::new();

        for layer in &self.layers {
            match layer {
                LayerSpec::Conv2d {
                    filters,
                    kernel,
                    stride,
                    padding,
                    activation: act,
                    ..
                } => {
                    conv = Some(
                        Conv2dConfig::new([1, *filters], *kernel)
                            .with_stride(*stride)
                            .with_padding(PaddingConfig2d::Valid)
                            .init(device),
                    );
                    activation = *act;
                    pad_freq = [padding[0].before, padding[0].after];
                    pad_time = [padding[1].before, padding[1].after];
                }
                LayerSpec::Bidirectional {
                    cell,
                    input_size,
                    units,
                    ..
                } => {
                    blocks.push(BiRecurrent::new(*cell, *input_size, *units, device));
                }
                LayerSpec::Permute { .. } | LayerSpec::Reshape { .. } => {}
            }
        }

        let Some(conv) = conv else {
            return Err(ModelError::InvalidConfig(
                "encoder description has no convolution".to_string(),
            ));
        };
        if blocks.is_empty() {
            return Err(ModelError::InvalidConfig(
                "encoder description has no recurrent block".to_string(),
            ));
        }

        Ok(Encoder {
            input_features: self.input[0],
            input_frames: self.input[1],
            conv,
            activation: Ignored(activation),
            pad_freq,
            pad_time,
            blocks,
        })
    }
}

impl fmt::Display for EncoderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "encoder  input ({}, {}, 1)", self.input[0], self.input[1])?;
        for (i, layer) in self.layers.iter().enumerate() {
            writeln!(f, "  {:>2} {:<14} -> {}", i, layer.name(), layer.output())?;
        }
        Ok(())
    }
}

/// Describe the encoder for `config`
///
/// The geometry is validated first; no layer is described for a
/// configuration that would collapse the feature map.
pub fn build_encoder(config: &CrnnConfig) -> Result<EncoderSpec, ModelError> {
    config.validate()?;

    let (freq_out, time_out) = config.conv_output_extent();
    if freq_out == 0 || time_out == 0 {
        return Err(ModelError::InvalidGeometry(format!(
            "feature map collapses to {freq_out}x{time_out}"
        )));
    }

    let filters = config.conv_filters;
    let mut layers = Vec::with_capacity(3 + config.recurrent_layers);

    layers.push(LayerSpec::Conv2d {
        filters,
        kernel: [config.kernel_freq, config.kernel_time],
        stride: [config.stride_freq, config.stride_time],
        padding: [
            SamePadding::for_axis(config.input_features, config.kernel_freq, config.stride_freq),
            SamePadding::for_axis(config.input_frames, config.kernel_time, config.stride_time),
        ],
        activation: config.activation,
        output: FeatureShape::Map {
            dims: [freq_out, time_out, filters],
        },
    });

    layers.push(LayerSpec::Permute {
        order: [1, 0, 2],
        output: FeatureShape::Map {
            dims: [time_out, freq_out, filters],
        },
    });

    let step_features = freq_out * filters;
    layers.push(LayerSpec::Reshape {
        output: FeatureShape::Sequence {
            steps: time_out,
            features: step_features,
        },
    });

    let units = config.recurrent_units;
    let mut input_size = step_features;
    for index in 0..config.recurrent_layers {
        let is_last = index + 1 == config.recurrent_layers;
        let return_sequences = !is_last || config.variant.returns_sequences();
        let output = if return_sequences {
            FeatureShape::Sequence {
                steps: time_out,
                features: 2 * units,
            }
        } else {
            FeatureShape::Vector { features: 2 * units }
        };

        layers.push(LayerSpec::Bidirectional {
            cell: config.recurrent_type,
            input_size,
            units,
            return_sequences,
            output,
        });
        input_size = 2 * units;
    }

    let spec = EncoderSpec {
        input: [config.input_features, config.input_frames],
        layers,
    };
    debug!("Built encoder with output {}", spec.output_shape());

    Ok(spec)
}

/// Recurrent cell of one direction
#[derive(Module, Debug)]
pub enum RecurrentCell<B: Backend> {
    Gru(Gru<B>),
    Lstm(Lstm<B>),
}

impl<B: Backend> RecurrentCell<B> {
    fn new(cell: RecurrentType, input_size: usize, units: usize, device: &B::Device) -> Self {
        match cell {
            RecurrentType::Gru => {
                RecurrentCell::Gru(GruConfig::new(input_size, units, true).init(device))
            }
            RecurrentType::Lstm => {
                RecurrentCell::Lstm(LstmConfig::new(input_size, units, true).init(device))
            }
        }
    }

    /// `[batch, steps, input]` to `[batch, steps, units]`
    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        match self {
            RecurrentCell::Gru(gru) => gru.forward(x, None),
            RecurrentCell::Lstm(lstm) => {
                let (output, _state) = lstm.forward(x, None);
                output
            }
        }
    }
}

/// Forward and backward pass over the sequence, hidden states concatenated
#[derive(Module, Debug)]
pub struct BiRecurrent<B: Backend> {
    forward: RecurrentCell<B>,
    backward: RecurrentCell<B>,
}

impl<B: Backend> BiRecurrent<B> {
    pub fn new(cell: RecurrentType, input_size: usize, units: usize, device: &B::Device) -> Self {
        Self {
            forward: RecurrentCell::new(cell, input_size, units, device),
            backward: RecurrentCell::new(cell, input_size, units, device),
        }
    }

    /// Both directions aligned on the input time axis
    fn directions(&self, x: Tensor<B, 3>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let forward = self.forward.forward(x.clone());
        let backward = self.backward.forward(x.flip([1])).flip([1]);
        (forward, backward)
    }

    /// `[batch, steps, input]` to `[batch, steps, 2 * units]`
    pub fn forward_sequence(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let (forward, backward) = self.directions(x);
        Tensor::cat(vec![forward, backward], 2)
    }

    /// `[batch, steps, input]` to `[batch, 2 * units]`
    ///
    /// Each direction contributes the state it holds after reading the
    /// whole sequence: step `T - 1` forward, step `0` backward.
    pub fn forward_pooled(&self, x: Tensor<B, 3>) -> Tensor<B, 2> {
        let (forward, backward) = self.directions(x);
        let [batch, steps, units] = forward.dims();

        let last = forward
            .slice([0..batch, steps - 1..steps, 0..units])
            .reshape([batch, units]);
        let first = backward
            .slice([0..batch, 0..1, 0..units])
            .reshape([batch, units]);

        Tensor::cat(vec![last, first], 1)
    }
}

/// CRNN encoder module
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    /// Frequency bins the convolution was sized for
    input_features: usize,
    /// Frames the "same" padding was computed for
    input_frames: usize,
    conv: Conv2d<B>,
    activation: Ignored<Activation>,
    /// Zero padding `[before, after]` along frequency
    pad_freq: [usize; 2],
    /// Zero padding `[before, after]` along time
    pad_time: [usize; 2],
    blocks: Vec<BiRecurrent<B>>,
}

impl<B: Backend> Encoder<B> {
    /// `[batch, features, frames]` to `[batch, steps, freq' * filters]`
    pub fn feature_sequence(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, features, frames] = input.dims();

        let x = input.reshape([batch, 1, features, frames]);
        let x = pad_axis(x, 2, self.pad_freq);
        let x = pad_axis(x, 3, self.pad_time);
        let x = self.activation.0.apply(self.conv.forward(x));

        // [batch, filters, freq', time'] -> [batch, time', freq', filters]
        let x = x.permute([0, 3, 2, 1]);
        let [batch, steps, freq, filters] = x.dims();
        x.reshape([batch, steps, freq * filters])
    }

    /// Every recurrent block keeps its full sequence
    pub fn forward_sequence(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        self.blocks
            .iter()
            .fold(self.feature_sequence(input), |x, block| block.forward_sequence(x))
    }

    /// The last recurrent block pools to its final states
    pub fn forward_pooled(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        let x = self.feature_sequence(input);
        let Some((last, inner)) = self.blocks.split_last() else {
            // unreachable through `EncoderSpec::init`, which rejects an empty stack
            let [batch, steps, features] = x.dims();
            return x
                .slice([0..batch, steps - 1..steps, 0..features])
                .reshape([batch, features]);
        };

        let x = inner.iter().fold(x, |x, block| block.forward_sequence(x));
        last.forward_pooled(x)
    }

    pub fn input_features(&self) -> usize {
        self.input_features
    }

    pub fn input_frames(&self) -> usize {
        self.input_frames
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

/// Zero-pad `dim` of a 4-D tensor by `[before, after]` cells
fn pad_axis<B: Backend>(x: Tensor<B, 4>, dim: usize, pad: [usize; 2]) -> Tensor<B, 4> {
    let [before, after] = pad;
    if before == 0 && after == 0 {
        return x;
    }

    let device = x.device();
    let mut dims = x.dims();
    let mut parts = Vec::with_capacity(3);

    if before > 0 {
        dims[dim] = before;
        parts.push(Tensor::zeros(dims, &device));
    }
    parts.push(x);
    if after > 0 {
        dims[dim] = after;
        parts.push(Tensor::zeros(dims, &device));
    }

    Tensor::cat(parts, dim)
}
