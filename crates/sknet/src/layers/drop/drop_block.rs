//! # DropBlock / Spatial Dropout
//!
//! [`DropBlock2d`] zeroes contiguous ``block_size x block_size`` regions of
//! the feature map, rather than independent units; see
//! "DropBlock: A regularization method for convolutional networks".
//!
//! The layer is inert when the backend does not have autodiff enabled,
//! so inference is unaffected.

use crate::utility::probability::expect_probability;
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::tensor::Distribution;
use burn::tensor::module::max_pool2d;

/// Portable [`DropBlock2d`] options.
///
/// A norm-layer-agnostic description of drop block behavior, used by
/// block and model configs to thread drop block settings through
/// without committing to a concrete layer config.
#[derive(Config, Debug, PartialEq)]
pub struct DropBlockOptions {
    /// The probability of dropping a block.
    #[config(default = "0.1")]
    pub drop_prob: f64,

    /// The edge size of the square drop region.
    #[config(default = "7")]
    pub block_size: usize,

    /// Scaling factor applied to the seed rate.
    #[config(default = "1.0")]
    pub gamma_scale: f64,
}

impl Default for DropBlockOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// [`DropBlock2d`] Config.
#[derive(Config, Debug)]
pub struct DropBlock2dConfig {
    /// The probability of dropping a block.
    #[config(default = "0.1")]
    pub drop_prob: f64,

    /// The edge size of the square drop region.
    #[config(default = "7")]
    pub block_size: usize,

    /// Scaling factor applied to the seed rate.
    #[config(default = "1.0")]
    pub gamma_scale: f64,
}

impl From<DropBlockOptions> for DropBlock2dConfig {
    fn from(options: DropBlockOptions) -> Self {
        Self::new()
            .with_drop_prob(options.drop_prob)
            .with_block_size(options.block_size)
            .with_gamma_scale(options.gamma_scale)
    }
}

impl DropBlock2dConfig {
    /// Initialize a [`DropBlock2d`] layer.
    pub fn init(&self) -> DropBlock2d {
        assert!(self.block_size > 0, "block_size must be > 0");
        DropBlock2d {
            drop_prob: expect_probability(self.drop_prob),
            block_size: self.block_size,
            gamma_scale: self.gamma_scale,
        }
    }
}

/// DropBlock layer for 4-d feature maps.
#[derive(Module, Clone, Debug)]
pub struct DropBlock2d {
    /// The probability of dropping a block.
    pub drop_prob: f64,

    /// The edge size of the square drop region.
    pub block_size: usize,

    /// Scaling factor applied to the seed rate.
    pub gamma_scale: f64,
}

impl DropBlock2d {
    /// Forward Pass.
    ///
    /// Seeds drop centers at a rate tuned so the expected fraction of
    /// dropped units matches `drop_prob`, grows each seed to a
    /// ``block_size x block_size`` region, and renormalizes the kept
    /// units to preserve the activation scale.
    ///
    /// # Arguments
    ///
    /// - `input`: a ``[batch, channels, height, width]`` tensor.
    ///
    /// # Returns
    ///
    /// A tensor with the same shape as the input.
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        if self.drop_prob == 0.0 || !B::ad_enabled() {
            return input;
        }

        let [batch, channels, height, width] = input.dims();
        let device = input.device();

        let block_size = self.block_size.min(height).min(width);
        let total_size = (height * width) as f64;
        let clipped_area =
            (((height - block_size + 1) * (width - block_size + 1)) as f64).max(1.0);

        let gamma = self.gamma_scale * self.drop_prob * total_size
            / (block_size * block_size) as f64
            / clipped_area;

        let seeds = Tensor::<B, 4>::random(
            [batch, channels, height, width],
            Distribution::Bernoulli(gamma.clamp(0.0, 1.0)),
            &device,
        );

        // Grow each seed into a block_size x block_size drop region.
        let block_mask = max_pool2d(
            seeds,
            [block_size, block_size],
            [1, 1],
            [block_size / 2, block_size / 2],
            [1, 1],
        )
        .slice([0..batch, 0..channels, 0..height, 0..width]);

        let keep_mask = block_mask.mul_scalar(-1.0).add_scalar(1.0);

        let keep_fraction = keep_mask
            .clone()
            .mean()
            .add_scalar(1e-7)
            .reshape([1, 1, 1, 1]);

        input * keep_mask / keep_fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_drop_block_options() {
        let options = DropBlockOptions::default();
        assert_eq!(options.drop_prob, 0.1);
        assert_eq!(options.block_size, 7);
        assert_eq!(options.gamma_scale, 1.0);

        let options = options
            .with_drop_prob(0.2)
            .with_block_size(5)
            .with_gamma_scale(0.25);

        let config = DropBlock2dConfig::from(options);
        assert_eq!(config.drop_prob, 0.2);
        assert_eq!(config.block_size, 5);
        assert_eq!(config.gamma_scale, 0.25);
    }

    #[test]
    fn test_drop_block_inert_without_autodiff() {
        let device = Default::default();

        let layer = DropBlock2dConfig::new().with_drop_prob(0.5).init();

        let input: Tensor<TestBackend, 4> = Tensor::ones([2, 3, 8, 8], &device);
        let output = layer.forward(input.clone());

        output.to_data().assert_eq(&input.to_data(), true);
    }

    #[test]
    fn test_drop_block_shape_preserved() {
        type B = burn::backend::Autodiff<NdArray<f32>>;
        let device = Default::default();

        let layer = DropBlock2dConfig::new()
            .with_drop_prob(0.3)
            .with_block_size(3)
            .init();

        let input: Tensor<B, 4> = Tensor::ones([2, 4, 8, 8], &device);
        let output = layer.forward(input);

        assert_eq!(output.dims(), [2, 4, 8, 8]);
    }

    #[test]
    fn test_drop_block_larger_than_input() {
        type B = burn::backend::Autodiff<NdArray<f32>>;
        let device = Default::default();

        // block_size clamps to the input resolution.
        let layer = DropBlock2dConfig::new()
            .with_drop_prob(0.3)
            .with_block_size(7)
            .init();

        let input: Tensor<B, 4> = Tensor::ones([2, 4, 4, 4], &device);
        let output = layer.forward(input);

        assert_eq!(output.dims(), [2, 4, 4, 4]);
    }
}
