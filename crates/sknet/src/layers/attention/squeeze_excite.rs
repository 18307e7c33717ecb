//! # Squeeze-and-Excite Channel Gate
//!
//! [`SqueezeExcite`] rescales feature-map channels by a learned gating
//! signal computed from globally pooled features.

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::Sigmoid;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::module::adaptive_avg_pool2d;

/// [`SqueezeExcite`] Meta trait.
pub trait SqueezeExciteMeta {
    /// The number of gated feature channels.
    fn channels(&self) -> usize;

    /// The bottleneck width of the gate.
    fn reduction_channels(&self) -> usize;
}

/// [`SqueezeExcite`] Config.
///
/// Implements [`SqueezeExciteMeta`].
#[derive(Config, Debug)]
pub struct SqueezeExciteConfig {
    /// The number of gated feature channels.
    pub channels: usize,

    /// The bottleneck width of the gate.
    pub reduction_channels: usize,

    /// The [`Activation`] config for the bottleneck.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,
}

impl SqueezeExciteMeta for SqueezeExciteConfig {
    fn channels(&self) -> usize {
        self.channels
    }

    fn reduction_channels(&self) -> usize {
        self.reduction_channels
    }
}

impl SqueezeExciteConfig {
    /// Initialize a [`SqueezeExcite`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> SqueezeExcite<B> {
        assert!(self.reduction_channels > 0, "reduction_channels must be > 0");

        SqueezeExcite {
            fc_reduce: Conv2dConfig::new([self.channels, self.reduction_channels], [1, 1])
                .init(device),
            act: self.activation.init(device),
            fc_expand: Conv2dConfig::new([self.reduction_channels, self.channels], [1, 1])
                .init(device),
            gate: Sigmoid,
        }
    }
}

/// Squeeze-and-Excite channel attention.
///
/// Implements [`SqueezeExciteMeta`].
#[derive(Module, Debug)]
pub struct SqueezeExcite<B: Backend> {
    /// Bottleneck reduction conv.
    pub fc_reduce: Conv2d<B>,

    /// Bottleneck activation.
    pub act: Activation<B>,

    /// Bottleneck expansion conv.
    pub fc_expand: Conv2d<B>,

    /// Gate activation.
    pub gate: Sigmoid,
}

impl<B: Backend> SqueezeExciteMeta for SqueezeExcite<B> {
    fn channels(&self) -> usize {
        self.fc_reduce.weight.shape().dims[1]
    }

    fn reduction_channels(&self) -> usize {
        self.fc_reduce.weight.shape().dims[0]
    }
}

impl<B: Backend> SqueezeExcite<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: a ``[batch, channels, height, width]`` tensor.
    ///
    /// # Returns
    ///
    /// The input, rescaled per-channel; same shape.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, height, width] = unpack_shape_contract!(
            ["batch", "channels", "height", "width"],
            &input,
            &["batch", "height", "width"],
            &[("channels", self.channels())]
        );

        let gate = adaptive_avg_pool2d(input.clone(), [1, 1]);
        let gate = self.fc_reduce.forward(gate);
        let gate = self.act.forward(gate);
        let gate = self.fc_expand.forward(gate);
        let gate = self.gate.forward(gate);

        let out = input * gate;

        assert_shape_contract_periodically!(
            ["batch", "channels", "height", "width"],
            &out,
            &[
                ("batch", batch),
                ("channels", self.channels()),
                ("height", height),
                ("width", width)
            ]
        );

        out
    }
}
