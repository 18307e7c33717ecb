//! # Preprocessing Metadata
//!
//! [`ModelDataConfig`] describes how inputs to a model are expected to
//! be prepared: input geometry, normalization statistics, crop ratio.
//! It is built once per architecture and attached to the constructed
//! model; it carries no learnable state.

use serde::{Deserialize, Serialize};

/// ImageNet channel means.
pub const IMAGENET_DEFAULT_MEAN: [f64; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations.
pub const IMAGENET_DEFAULT_STD: [f64; 3] = [0.229, 0.224, 0.225];

/// Resize interpolation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    /// Bilinear interpolation.
    Bilinear,

    /// Bicubic interpolation.
    Bicubic,
}

/// Preprocessing metadata for a named architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDataConfig {
    /// Source location of pretrained weights, if any.
    pub url: Option<String>,

    /// The number of classifier outputs.
    pub num_classes: usize,

    /// Expected input geometry, ``[channels, height, width]``.
    pub input_size: [usize; 3],

    /// Feature map geometry entering the classifier pool.
    pub pool_size: [usize; 2],

    /// Center crop ratio for evaluation.
    pub crop_pct: f64,

    /// Resize interpolation mode.
    pub interpolation: Interpolation,

    /// Input channel means.
    pub mean: [f64; 3],

    /// Input channel standard deviations.
    pub std: [f64; 3],

    /// Module path of the first convolution.
    pub first_conv: String,

    /// Module path of the classifier head.
    pub classifier: String,
}

impl Default for ModelDataConfig {
    fn default() -> Self {
        Self {
            url: None,
            num_classes: 1000,
            input_size: [3, 224, 224],
            pool_size: [7, 7],
            crop_pct: 0.875,
            interpolation: Interpolation::Bilinear,
            mean: IMAGENET_DEFAULT_MEAN,
            std: IMAGENET_DEFAULT_STD,
            first_conv: "stem.cna1.conv".to_string(),
            classifier: "fc".to_string(),
        }
    }
}

impl ModelDataConfig {
    /// Set the weight source location.
    pub fn with_url(
        self,
        url: impl Into<String>,
    ) -> Self {
        Self {
            url: Some(url.into()),
            ..self
        }
    }

    /// Set the number of classifier outputs.
    pub fn with_num_classes(
        self,
        num_classes: usize,
    ) -> Self {
        Self {
            num_classes,
            ..self
        }
    }

    /// Set the number of input channels.
    pub fn with_in_channels(
        self,
        in_channels: usize,
    ) -> Self {
        let mut input_size = self.input_size;
        input_size[0] = in_channels;
        Self { input_size, ..self }
    }
}
