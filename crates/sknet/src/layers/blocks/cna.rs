//! # `CNA2d` - conv/norm/activation block.
//!
//! The workhorse convolution stage of the model family: a [`Conv2d`]
//! followed by a [`Normalization`] and an [`Activation`].
//!
//! Residual blocks need to splice work (attention gates, drop layers,
//! the residual add itself) between the norm and the activation; see
//! [`CNA2d::hook_forward`].

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::normalization_wrapper::{Normalization, NormalizationConfig};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Tensor};

/// [`CNA2d`] Meta.
pub trait CNA2dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of groups.
    fn groups(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Get the stride.
    fn stride(&self) -> [usize; 2];
}

/// [`CNA2d`] Config.
///
/// Implements [`CNA2dMeta`].
#[derive(Config, Debug)]
pub struct CNA2dConfig {
    /// The [`Conv2d`] config.
    pub conv: Conv2dConfig,

    /// The [`Normalization`] config.
    pub norm: NormalizationConfig,

    /// The [`Activation`] config.
    #[config(default = "ActivationConfig::Relu")]
    pub act: ActivationConfig,
}

impl CNA2dMeta for CNA2dConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn groups(&self) -> usize {
        self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride.clone()
    }
}

impl CNA2dConfig {
    /// Adjust the norm features to match the conv output size.
    ///
    /// [`CNA2dConfig::init`] does this automatically.
    pub fn match_norm_features(self) -> Self {
        let features = self.out_channels();
        let norm = self.norm.with_num_features(features);
        Self { norm, ..self }
    }

    /// Initialize a [`CNA2d`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> CNA2d<B> {
        let cfg = self.match_norm_features();
        CNA2d {
            conv: cfg.conv.init(device),
            norm: cfg.norm.init(device),
            act: cfg.act.init(device),
        }
    }
}

/// Sequenced conv/norm/activation block.
///
/// Implements [`CNA2dMeta`].
#[derive(Module, Debug)]
pub struct CNA2d<B: Backend> {
    /// Internal Conv2d layer.
    pub conv: Conv2d<B>,

    /// Internal Norm Layer.
    pub norm: Normalization<B>,

    /// Activation layer.
    pub act: Activation<B>,
}

impl<B: Backend> CNA2dMeta for CNA2d<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1] * self.groups()
    }

    fn groups(&self) -> usize {
        self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride.clone()
    }
}

impl<B: Backend> CNA2d<B> {
    /// Forward Pass.
    ///
    /// Applies the conv/norm/act layers in sequence.
    ///
    /// # Arguments
    ///
    /// - `input`: \
    ///   ``[batch, in_channels, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.hook_forward(input, |x| x)
    }

    /// Hooked Forward Pass.
    ///
    /// Applies the hook after normalization but before activation:
    ///
    /// ```rust,ignore
    /// let x = self.conv.forward(input);
    /// let x = self.norm.forward(x);
    /// let x = hook(x);
    /// let x = self.act.forward(x);
    /// ```
    ///
    /// # Arguments
    ///
    /// - `input`: \
    ///   ``[batch, in_channels, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn hook_forward<F>(
        &self,
        input: Tensor<B, 4>,
        hook: F,
    ) -> Tensor<B, 4>
    where
        F: FnOnce(Tensor<B, 4>) -> Tensor<B, 4>,
    {
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_channels",
                "in_height" = "out_height" * "height_stride",
                "in_width" = "out_width" * "width_stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[
                ("in_channels", self.in_channels()),
                ("height_stride", self.stride()[0]),
                ("width_stride", self.stride()[1]),
            ]
        );

        let x = self.conv.forward(input);

        let x = self.norm.forward(x);

        let x = hook(x);

        let x = self.act.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }

    /// Zero the norm layer's scale parameter.
    pub fn zero_init_norm(&mut self) {
        self.norm.zero_init_gamma();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::{BatchNormConfig, PaddingConfig2d};
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    fn small_config() -> CNA2dConfig {
        CNA2dConfig::new(
            Conv2dConfig::new([2, 4], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false),
            NormalizationConfig::Batch(BatchNormConfig::new(0)),
        )
    }

    #[test]
    fn test_cna_config() {
        let config = small_config();

        assert_eq!(config.in_channels(), 2);
        assert_eq!(config.out_channels(), 4);
        assert_eq!(config.groups(), 1);
        assert_eq!(config.stride(), [2, 2]);

        // The norm config starts unsized; init auto-matches it.
        assert_eq!(config.norm.num_features(), 0);
        assert_eq!(config.match_norm_features().norm.num_features(), 4);
    }

    #[test]
    fn test_cna_forward() {
        let device = Default::default();

        let layer: CNA2d<TestBackend> = small_config().init(&device);
        assert_eq!(layer.in_channels(), 2);
        assert_eq!(layer.out_channels(), 4);
        assert_eq!(layer.groups(), 1);
        assert_eq!(layer.stride(), [2, 2]);

        let input = Tensor::random([2, 2, 10, 10], Distribution::Default, &device);

        {
            let output = layer.forward(input.clone());
            let expected = {
                let x = layer.conv.forward(input.clone());
                let x = layer.norm.forward(x);
                let x = layer.act.forward(x);
                x
            };
            output.to_data().assert_eq(&expected.to_data(), true);
        }

        {
            let hook = |x| x * 2.0;

            let output = layer.hook_forward(input.clone(), hook);
            let expected = {
                let x = layer.conv.forward(input.clone());
                let x = layer.norm.forward(x);
                let x = hook(x);
                let x = layer.act.forward(x);
                x
            };
            output.to_data().assert_eq(&expected.to_data(), true);
        }
    }

    #[test]
    fn test_cna_zero_init_norm() {
        let device = Default::default();

        let mut layer: CNA2d<TestBackend> = CNA2dConfig::new(
            Conv2dConfig::new([2, 4], [3, 3]).with_bias(false),
            NormalizationConfig::Batch(BatchNormConfig::new(0)),
        )
        .init(&device);

        layer.zero_init_norm();

        let gamma = match &layer.norm {
            Normalization::Batch(norm) => norm.gamma.val(),
            _ => panic!("Unexpected norm type"),
        };
        let total: f32 = gamma.abs().sum().into_scalar();
        assert_eq!(total, 0.0);
    }
}
