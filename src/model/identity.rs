//! Deterministic artifact names derived from a [`CrnnConfig`].
//!
//! Every field becomes a `key_value` token in a fixed order. Keys are fixed
//! strings and every value is either a number, a boolean or a closed
//! vocabulary name, so no two configurations share an identity.

use crate::model::{CrnnConfig, Variant};

/// Separator between tokens and between a key and its value
pub const DELIMITER: &str = "_";

/// Artifact key for `config`
pub fn derive_identity(config: &CrnnConfig) -> String {
    let num_labels = match config.variant {
        Variant::Classifier => None,
        Variant::SequenceLabeler { num_labels } => Some(num_labels),
    };

    let mut tokens = vec![
        token("variant", config.variant.name()),
        token("input", format!("{}x{}", config.input_features, config.input_frames)),
        token("conv_filt", config.conv_filters),
        token("filt_size", format!("{}x{}", config.kernel_freq, config.kernel_time)),
        token("stride", format!("{}x{}", config.stride_freq, config.stride_time)),
        token("rnn_layers", config.recurrent_layers),
        token("rnn_units", config.recurrent_units),
        token("rnn_type", config.recurrent_type),
        token("head_units", config.head_units),
        token("dropout", float(config.dropout)),
        token("activation", config.activation),
        token("augmented", config.data_augmented),
        token("pos_ratio", float(config.positive_sample_ratio)),
    ];
    if let Some(num_labels) = num_labels {
        tokens.push(token("labels", num_labels));
    }

    tokens.join(DELIMITER)
}

fn token(key: &str, value: impl ToString) -> String {
    format!("{key}{DELIMITER}{}", value.to_string())
}

/// Shortest decimal form that reads back to the same value
fn float(value: f64) -> String {
    if value == 0.0 {
        // -0.0 and 0.0 compare equal and must name the same model
        return "0".to_string();
    }
    format!("{value}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Activation, RecurrentType};

    #[test]
    fn test_identity_is_stable() {
        let a = derive_identity(&CrnnConfig::classifier());
        let b = derive_identity(&CrnnConfig::classifier());
        assert_eq!(a, b);
        assert_eq!(
            a,
            "variant_classifier_input_40x151_conv_filt_32_filt_size_5x20_stride_2x8\
             _rnn_layers_2_rnn_units_32_rnn_type_gru_head_units_64_dropout_0\
             _activation_relu_augmented_false_pos_ratio_1"
        );
    }

    #[test]
    fn test_identity_distinguishes_single_field_changes() {
        let base = CrnnConfig::small();
        let variants = vec![
            base.clone().with_input_features(17),
            base.clone().with_input_frames(25),
            base.clone().with_conv_filters(5),
            base.clone().with_kernel_time(4),
            base.clone().with_kernel_freq(4),
            base.clone().with_stride_time(3),
            base.clone().with_stride_freq(3),
            base.clone().with_recurrent_layers(2),
            base.clone().with_recurrent_units(9),
            base.clone().with_recurrent_type(RecurrentType::Lstm),
            base.clone().with_head_units(9),
            base.clone().with_dropout(0.25),
            base.clone().with_activation(Activation::Tanh),
            base.clone().with_positive_sample_ratio(0.5),
            base.clone().with_data_augmented(true),
            base.clone().with_variant(Variant::SequenceLabeler { num_labels: 3 }),
            base.clone().with_variant(Variant::SequenceLabeler { num_labels: 4 }),
        ];

        let mut seen = std::collections::HashSet::new();
        assert!(seen.insert(derive_identity(&base)));
        for config in &variants {
            assert!(seen.insert(derive_identity(config)), "collision for {config:?}");
        }
    }

    #[test]
    fn test_transposed_geometry_differs() {
        let a = CrnnConfig::small().with_kernel_time(3).with_kernel_freq(5);
        let b = CrnnConfig::small().with_kernel_time(5).with_kernel_freq(3);
        assert_ne!(derive_identity(&a), derive_identity(&b));
    }

    #[test]
    fn test_negative_zero_dropout() {
        let a = CrnnConfig::small().with_dropout(0.0);
        let b = CrnnConfig::small().with_dropout(-0.0);
        assert_eq!(derive_identity(&a), derive_identity(&b));
    }
}
