//! # Residual-Path Downsample
//!
//! [`SkDownsample`] adapts the identity branch of a residual block when
//! the main branch changes stride or channel count.
//!
//! Two forms exist:
//! * conv form: a strided conv (1x1 by default) followed by a norm;
//! * avg form: a 2x2 average pool carrying the stride, followed by a
//!   stride-1 1x1 conv and a norm.

use crate::compat::normalization_wrapper::{Normalization, NormalizationConfig};
use crate::models::sknet::util::{scalar_to_array, stride_div_output_resolution};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::nn::{BatchNormConfig, PaddingConfig2d};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`SkDownsample`] Meta trait.
pub trait SkDownsampleMeta {
    /// The size of the in channels dimension.
    fn in_channels(&self) -> usize;

    /// The size of the out channels dimension.
    fn out_channels(&self) -> usize;

    /// The effective stride of the downsample layer.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// The input must be a multiple of the stride.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// ``[out_height, out_width]``
    ///
    /// # Panics
    ///
    /// If the input resolution is not a multiple of the stride.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_div_output_resolution(input_resolution, self.stride())
    }
}

/// [`SkDownsample`] configuration.
///
/// Implements [`SkDownsampleMeta`].
#[derive(Config, Debug)]
pub struct SkDownsampleConfig {
    /// The size of the in channels dimension.
    pub in_channels: usize,

    /// The size of the out channels dimension.
    pub out_channels: usize,

    /// The kernel size of the conv (conv form only).
    #[config(default = "1")]
    pub kernel_size: usize,

    /// The stride of the downsample layer.
    #[config(default = "1")]
    pub stride: usize,

    /// The dilation of the conv; applies when the kernel is larger than 1.
    #[config(default = "1")]
    pub dilation: usize,

    /// Carry the stride on an average pool instead of the conv.
    #[config(default = "false")]
    pub avg: bool,

    /// The [`Normalization`] config; the feature size is auto-matched.
    #[config(default = "NormalizationConfig::Batch(BatchNormConfig::new(0))")]
    pub normalization: NormalizationConfig,
}

impl SkDownsampleMeta for SkDownsampleConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl SkDownsampleConfig {
    /// Initialize a [`SkDownsample`] `Module`.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> SkDownsample<B> {
        let norm = self.normalization.clone().with_num_features(self.out_channels);

        if self.avg {
            let pool = if self.stride == 1 && self.dilation == 1 {
                None
            } else {
                let avg_stride = if self.dilation == 1 { self.stride } else { 1 };
                Some(
                    AvgPool2dConfig::new([2, 2])
                        .with_strides([avg_stride, avg_stride])
                        .init(),
                )
            };

            SkDownsample {
                stride: self.stride,
                pool,
                conv: Conv2dConfig::new([self.in_channels, self.out_channels], [1, 1])
                    .with_bias(false)
                    .init(device),
                norm: norm.init(device),
            }
        } else {
            let dilation = if self.kernel_size > 1 { self.dilation } else { 1 };
            let padding = dilation * (self.kernel_size - 1) / 2;

            SkDownsample {
                stride: self.stride,
                pool: None,
                conv: Conv2dConfig::new(
                    [self.in_channels, self.out_channels],
                    scalar_to_array(self.kernel_size),
                )
                .with_stride(scalar_to_array(self.stride))
                .with_dilation(scalar_to_array(dilation))
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .with_bias(false)
                .init(device),
                norm: norm.init(device),
            }
        }
    }
}

/// Residual-path downsample layer.
///
/// Maps ``[batch, in_channels, in_height, in_width]`` to
/// ``[batch, out_channels, out_height, out_width]`` tensors.
///
/// Implements [`SkDownsampleMeta`].
#[derive(Module, Debug)]
pub struct SkDownsample<B: Backend> {
    /// The effective stride.
    pub stride: usize,

    /// Optional strided average pool (avg form).
    pub pool: Option<AvgPool2d>,

    /// Channel-adapting conv.
    pub conv: Conv2d<B>,

    /// Norm layer.
    pub norm: Normalization<B>,
}

impl<B: Backend> SkDownsampleMeta for SkDownsample<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1]
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl<B: Backend> SkDownsample<B> {
    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: \
    ///   ``[batch, in_channels, in_height=out_height*stride, in_width=out_width*stride]``
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_channels",
                "in_height" = "out_height" * "stride",
                "in_width" = "out_width" * "stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[
                ("in_channels", self.in_channels()),
                ("stride", self.stride())
            ]
        );

        let x = match &self.pool {
            Some(pool) => pool.forward(input),
            None => input,
        };
        let x = self.conv.forward(x);
        let out = self.norm.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &out,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_downsample_config() {
        let config = SkDownsampleConfig::new(2, 4);
        assert_eq!(config.in_channels(), 2);
        assert_eq!(config.out_channels(), 4);
        assert_eq!(config.stride(), 1);
        assert_eq!(config.output_resolution([8, 8]), [8, 8]);

        let config = config.with_stride(2);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.output_resolution([8, 8]), [4, 4]);
    }

    #[test]
    #[should_panic(expected = "7 !~ in_height=(out_height*stride)")]
    fn test_downsample_config_panics() {
        let config = SkDownsampleConfig::new(2, 4).with_stride(2);
        config.output_resolution([7, 7]);
    }

    #[test]
    fn test_conv_downsample() {
        let device = Default::default();

        let batch_size = 2;
        let in_channels = 2;
        let out_channels = 4;
        let in_height = 8;
        let in_width = 8;

        let downsample: SkDownsample<TestBackend> =
            SkDownsampleConfig::new(in_channels, out_channels)
                .with_stride(2)
                .init(&device);

        assert!(downsample.pool.is_none());
        assert_eq!(downsample.in_channels(), in_channels);
        assert_eq!(downsample.out_channels(), out_channels);

        let tensor = Tensor::ones([batch_size, in_channels, in_height, in_width], &device);
        let out = downsample.forward(tensor);

        assert_shape_contract!(
            ["batch", "out_channels", "out_height", "out_width"],
            &out,
            &[
                ("batch", batch_size),
                ("out_channels", out_channels),
                ("out_height", in_height / 2),
                ("out_width", in_width / 2)
            ]
        );
    }

    #[test]
    fn test_avg_downsample() {
        let device = Default::default();

        let downsample: SkDownsample<TestBackend> = SkDownsampleConfig::new(2, 4)
            .with_stride(2)
            .with_avg(true)
            .init(&device);

        assert!(downsample.pool.is_some());
        // The stride rides on the pool; the conv stays 1x1 stride 1.
        assert_eq!(downsample.conv.stride, [1, 1]);

        let tensor = Tensor::ones([2, 2, 8, 8], &device);
        let out = downsample.forward(tensor);

        assert_eq!(out.dims(), [2, 4, 4, 4]);
    }

    #[test]
    fn test_avg_downsample_stride_one_skips_pool() {
        let device = Default::default();

        let downsample: SkDownsample<TestBackend> =
            SkDownsampleConfig::new(2, 4).with_avg(true).init(&device);

        assert!(downsample.pool.is_none());

        let tensor = Tensor::ones([2, 2, 8, 8], &device);
        let out = downsample.forward(tensor);

        assert_eq!(out.dims(), [2, 4, 8, 8]);
    }
}
