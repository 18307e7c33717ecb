//! # Drop Path / Stochastic Depth
//!
//! [`DropPath`] zeroes an entire sample's residual-branch contribution
//! with probability `drop_prob`, and rescales kept samples by
//! ``1 / (1 - drop_prob)``.
//!
//! The layer is inert when the backend does not have autodiff enabled,
//! so inference is unaffected.

use crate::utility::probability::expect_probability;
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::tensor::Distribution;

/// [`DropPath`] Config.
#[derive(Config, Debug)]
pub struct DropPathConfig {
    /// The probability of dropping a sample's branch.
    #[config(default = "0.0")]
    pub drop_prob: f64,
}

impl DropPathConfig {
    /// Initialize a [`DropPath`] layer.
    pub fn init(&self) -> DropPath {
        DropPath {
            drop_prob: expect_probability(self.drop_prob),
        }
    }
}

/// Drop Path / Stochastic Depth layer.
#[derive(Module, Clone, Debug)]
pub struct DropPath {
    /// The probability of dropping a sample's branch.
    pub drop_prob: f64,
}

impl DropPath {
    /// Forward Pass.
    ///
    /// Samples a per-sample keep mask over the batch dimension.
    ///
    /// # Arguments
    ///
    /// - `input`: a ``[batch, ...]`` tensor.
    ///
    /// # Returns
    ///
    /// A tensor with the same shape as the input.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        if self.drop_prob == 0.0 || !B::ad_enabled() {
            return input;
        }

        let keep_prob = 1.0 - self.drop_prob;

        let mut mask_shape = [1; D];
        mask_shape[0] = input.dims()[0];

        let mask = Tensor::<B, D>::random(
            mask_shape,
            Distribution::Bernoulli(keep_prob),
            &input.device(),
        );

        input * mask.div_scalar(keep_prob)
    }
}
