pub mod loader;

use serde::{Deserialize, Serialize};

/// Labeled feature maps in a stable order
///
/// Examples are read by index and labels are retrieved as a whole, so a
/// prediction pass and a label pass over the same dataset always line up.
pub trait LabeledDataset {
    /// Number of examples
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frequency bins per frame
    fn num_features(&self) -> usize;

    /// Frames per example
    fn num_frames(&self) -> usize;

    /// Feature map of example `index`, feature-major (`features x frames`)
    fn features(&self, index: usize) -> Option<&[f32]>;

    /// Binary ground truth, same order as [`LabeledDataset::features`]
    fn labels(&self) -> Vec<u8>;
}

/// In-memory dataset of fixed-size feature maps
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureDataset {
    num_features: usize,
    num_frames: usize,
    /// Row-major `[examples, features, frames]`
    values: Vec<f32>,
    labels: Vec<u8>,
}

impl FeatureDataset {
    /// Create an empty dataset for `features x frames` maps
    pub fn new(num_features: usize, num_frames: usize) -> Self {
        Self {
            num_features,
            num_frames,
            values: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// Size of one flattened feature map
    pub fn example_size(&self) -> usize {
        self.num_features * self.num_frames
    }

    /// Append one example; the map must have `features x frames` values
    pub fn push(&mut self, features: &[f32], label: u8) -> anyhow::Result<()> {
        if features.len() != self.example_size() {
            anyhow::bail!(
                "example has {} values, expected {} ({} features x {} frames)",
                features.len(),
                self.example_size(),
                self.num_features,
                self.num_frames
            );
        }
        self.values.extend_from_slice(features);
        self.labels.push(label);
        Ok(())
    }

    /// Number of positive examples
    pub fn positive_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l == 1).count()
    }
}

impl LabeledDataset for FeatureDataset {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn num_features(&self) -> usize {
        self.num_features
    }

    fn num_frames(&self) -> usize {
        self.num_frames
    }

    fn features(&self, index: usize) -> Option<&[f32]> {
        let size = self.example_size();
        let start = index.checked_mul(size)?;
        self.values.get(start..start + size)
    }

    fn labels(&self) -> Vec<u8> {
        self.labels.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_index() {
        let mut dataset = FeatureDataset::new(2, 3);
        dataset.push(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0], 0).unwrap();
        dataset.push(&[6.0, 7.0, 8.0, 9.0, 10.0, 11.0], 1).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.positive_count(), 1);
        assert_eq!(dataset.features(1).unwrap()[0], 6.0);
        assert!(dataset.features(2).is_none());
        assert_eq!(dataset.labels(), vec![0, 1]);
    }

    #[test]
    fn test_push_rejects_wrong_size() {
        let mut dataset = FeatureDataset::new(2, 3);
        assert!(dataset.push(&[0.0; 5], 0).is_err());
        assert!(dataset.is_empty());
    }
}
