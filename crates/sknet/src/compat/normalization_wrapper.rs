//! # Normalization Wrapper
//!
//! Provides support for built-in ``burn::nn`` norm layers:
//! * [`NormalizationConfig::Batch`] - [`BatchNorm`]
//! * [`NormalizationConfig::Group`] - [`GroupNorm`]
//! * [`NormalizationConfig::Layer`] - [`LayerNorm`]
//!
//! The enum is non-exhaustive, to prepare for future additions.

use burn::nn::{
    BatchNorm, BatchNormConfig, GroupNorm, GroupNormConfig, LayerNorm, LayerNormConfig,
};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`Normalization`] Configuration.
#[derive(Config, Debug)]
#[non_exhaustive]
pub enum NormalizationConfig {
    /// [`BatchNorm`] Configuration.
    Batch(BatchNormConfig),

    /// [`GroupNorm`] Configuration.
    Group(GroupNormConfig),

    /// [`LayerNorm`] Configuration.
    Layer(LayerNormConfig),
}

impl From<BatchNormConfig> for NormalizationConfig {
    fn from(config: BatchNormConfig) -> Self {
        Self::Batch(config)
    }
}

impl From<GroupNormConfig> for NormalizationConfig {
    fn from(config: GroupNormConfig) -> Self {
        Self::Group(config)
    }
}

impl From<LayerNormConfig> for NormalizationConfig {
    fn from(config: LayerNormConfig) -> Self {
        Self::Layer(config)
    }
}

impl NormalizationConfig {
    /// Initialize a [`Normalization`] layer.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Normalization<B> {
        match self {
            NormalizationConfig::Batch(config) => config.init(device).into(),
            NormalizationConfig::Group(config) => config.init(device).into(),
            NormalizationConfig::Layer(config) => config.init(device).into(),
        }
    }

    /// Adjust a norm config to the feature size.
    pub fn with_num_features(
        self,
        num_features: usize,
    ) -> Self {
        match self {
            NormalizationConfig::Batch(config) => BatchNormConfig {
                num_features,
                ..config
            }
            .into(),
            NormalizationConfig::Group(config) => GroupNormConfig {
                num_channels: num_features,
                ..config
            }
            .into(),
            NormalizationConfig::Layer(config) => LayerNormConfig {
                d_model: num_features,
                ..config
            }
            .into(),
        }
    }

    /// Get the number of features.
    pub fn num_features(&self) -> usize {
        match self {
            NormalizationConfig::Batch(config) => config.num_features,
            NormalizationConfig::Group(config) => config.num_channels,
            NormalizationConfig::Layer(config) => config.d_model,
        }
    }
}

/// Normalization Layer Wrapper.
///
/// The enum is non-exhaustive, to prepare for future additions.
#[derive(Module, Debug)]
#[non_exhaustive]
pub enum Normalization<B: Backend> {
    /// [`BatchNorm`] layer; restricted to `BatchNorm<2>`.
    Batch(BatchNorm<B, 2>),

    /// [`GroupNorm`] layer.
    Group(GroupNorm<B>),

    /// [`LayerNorm`] layer.
    Layer(LayerNorm<B>),
}

impl<B: Backend> From<BatchNorm<B, 2>> for Normalization<B> {
    fn from(layer: BatchNorm<B, 2>) -> Self {
        Self::Batch(layer)
    }
}

impl<B: Backend> From<GroupNorm<B>> for Normalization<B> {
    fn from(layer: GroupNorm<B>) -> Self {
        Self::Group(layer)
    }
}

impl<B: Backend> From<LayerNorm<B>> for Normalization<B> {
    fn from(layer: LayerNorm<B>) -> Self {
        Self::Layer(layer)
    }
}

impl<B: Backend> Normalization<B> {
    /// Applies normalization to a tensor.
    ///
    /// The normalization contract depends upon the wrapped norm layer;
    /// but all norm layers assume an input of at least rank 2,
    /// and produce an output of the same rank and shape.
    pub fn forward<const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Normalization::Batch(norm) => norm.forward(input),
            Normalization::Group(norm) => norm.forward(input),
            Normalization::Layer(norm) => norm.forward(input),
        }
    }

    /// Get the number of features.
    pub fn num_features(&self) -> usize {
        match self {
            Normalization::Batch(norm) => norm.gamma.shape().dims[0],
            Normalization::Group(norm) => norm.num_channels,
            Normalization::Layer(norm) => norm.gamma.shape().dims[0],
        }
    }

    /// Zero the norm scale (gamma) parameter.
    ///
    /// Residual stages use this at construction time so each block starts
    /// as an identity mapping.
    ///
    /// # Panics
    ///
    /// For [`Normalization::Group`], whose scale is optional.
    pub fn zero_init_gamma(&mut self) {
        match self {
            Normalization::Batch(norm) => {
                norm.gamma = norm.gamma.clone().map(|g| g.slice_fill([..], 0.0));
            }
            Normalization::Layer(norm) => {
                norm.gamma = norm.gamma.clone().map(|g| g.slice_fill([..], 0.0));
            }
            _ => panic!("zero_init_gamma is not supported for {self:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_batch_norm() {
        let device = Default::default();

        let num_features = 12;
        let input: Tensor<TestBackend, 4> = Tensor::ones([2, num_features, 3, 4], &device);

        let config: NormalizationConfig = BatchNormConfig::new(12).into();
        assert_eq!(config.num_features(), 12);

        let layer: Normalization<TestBackend> = config.init(&device);
        assert_eq!(layer.num_features(), 12);

        let expected = match &layer {
            Normalization::Batch(inner) => inner.forward(input.clone()),
            _ => panic!("Unexpected layer type"),
        };

        let output = layer.forward(input);

        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_group_norm() {
        let device = Default::default();

        let num_features = 12;
        let input: Tensor<TestBackend, 4> = Tensor::ones([2, num_features, 3, 4], &device);

        let config: NormalizationConfig = GroupNormConfig::new(3, num_features).into();

        let layer: Normalization<TestBackend> = config.init(&device);

        let expected = match &layer {
            Normalization::Group(inner) => inner.forward(input.clone()),
            _ => panic!("Unexpected layer type"),
        };

        let output = layer.forward(input);

        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    fn test_with_num_features() {
        let config: NormalizationConfig = BatchNormConfig::new(0).into();
        let config = config.with_num_features(8);
        assert_eq!(config.num_features(), 8);

        let config: NormalizationConfig = GroupNormConfig::new(2, 4).into();
        let config = config.with_num_features(8);
        assert_eq!(config.num_features(), 8);

        let config: NormalizationConfig = LayerNormConfig::new(4).into();
        let config = config.with_num_features(8);
        assert_eq!(config.num_features(), 8);
    }

    #[test]
    fn test_zero_init_gamma() {
        let device = Default::default();

        let num_features = 6;
        let config: NormalizationConfig = BatchNormConfig::new(num_features).into();
        let mut layer: Normalization<TestBackend> = config.init(&device);

        layer.zero_init_gamma();

        let gamma = match &layer {
            Normalization::Batch(norm) => norm.gamma.val(),
            _ => panic!("Unexpected layer type"),
        };
        let total: f32 = gamma.abs().sum().into_scalar();
        assert_eq!(total, 0.0);
    }
}
