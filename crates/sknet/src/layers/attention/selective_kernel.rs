//! # Selective Kernel Convolution
//!
//! [`SelectiveKernel2d`] computes several parallel convolution branches
//! with different receptive fields, and fuses them with a learned,
//! input-dependent attention weighting over branches; see
//! "Selective Kernel Networks".
//!
//! [`SelectiveKernelConfig`] is the portable branch/attention policy that
//! model configs thread through to their blocks; it carries everything
//! except the channel dimensions.

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::normalization_wrapper::{Normalization, NormalizationConfig};
use crate::layers::blocks::cna::{CNA2d, CNA2dConfig, CNA2dMeta};
use crate::models::sknet::util::stride_div_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNormConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::softmax;
use burn::tensor::module::adaptive_avg_pool2d;

/// Portable selective kernel policy.
///
/// Carries the branch and attention settings of a [`SelectiveKernel2d`]
/// without the channel dimensions, so one policy can configure every
/// selective kernel stage of a model.
#[derive(Config, Debug, PartialEq)]
pub struct SelectiveKernelConfig {
    /// Kernel size per branch; each must be odd and at least 3.
    #[config(default = "vec![3, 5]")]
    pub kernel_sizes: Vec<usize>,

    /// Reduction ratio from `out_channels` to the attention bottleneck.
    #[config(default = "16")]
    pub attn_reduction: usize,

    /// Lower bound on the attention bottleneck width.
    #[config(default = "32")]
    pub min_attn_channels: usize,

    /// Express larger receptive fields as dilated 3x3 branches instead of
    /// larger kernels.
    #[config(default = "true")]
    pub keep_3x3: bool,

    /// Split input channels evenly across branches instead of feeding each
    /// branch the full input.
    #[config(default = "false")]
    pub split_input: bool,
}

impl SelectiveKernelConfig {
    /// Resolve per-branch `(kernel_size, dilation)` pairs.
    ///
    /// With `keep_3x3`, a branch of kernel size `k` becomes a 3x3 branch
    /// of dilation ``dilation * (k - 1) / 2``, preserving its receptive
    /// field.
    ///
    /// # Panics
    ///
    /// If the kernel list is empty, or any kernel is even or below 3.
    pub fn resolve_branches(
        &self,
        dilation: usize,
    ) -> Vec<(usize, usize)> {
        assert!(!self.kernel_sizes.is_empty(), "kernel_sizes is empty");
        for &k in &self.kernel_sizes {
            assert!(k >= 3 && k % 2 == 1, "invalid branch kernel size: {k}");
        }

        if self.keep_3x3 {
            self.kernel_sizes
                .iter()
                .map(|&k| (3, dilation * (k - 1) / 2))
                .collect()
        } else {
            self.kernel_sizes
                .iter()
                .map(|&k| (k, dilation))
                .collect()
        }
    }

    /// The number of branches.
    pub fn num_paths(&self) -> usize {
        self.kernel_sizes.len()
    }

    /// The attention bottleneck width for a given output channel count.
    pub fn attn_channels(
        &self,
        out_channels: usize,
    ) -> usize {
        (out_channels / self.attn_reduction).max(self.min_attn_channels)
    }
}

/// [`SelectiveKernelAttn`] Config.
#[derive(Config, Debug)]
pub struct SelectiveKernelAttnConfig {
    /// The number of fused feature channels.
    pub channels: usize,

    /// The number of branches to weight.
    #[config(default = "2")]
    pub num_paths: usize,

    /// The attention bottleneck width.
    #[config(default = "32")]
    pub attn_channels: usize,

    /// The [`Normalization`] config for the bottleneck.
    #[config(default = "NormalizationConfig::Batch(BatchNormConfig::new(0))")]
    pub normalization: NormalizationConfig,

    /// The [`Activation`] config for the bottleneck.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,
}

impl SelectiveKernelAttnConfig {
    /// Initialize a [`SelectiveKernelAttn`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> SelectiveKernelAttn<B> {
        SelectiveKernelAttn {
            num_paths: self.num_paths,
            fc_reduce: Conv2dConfig::new([self.channels, self.attn_channels], [1, 1])
                .with_bias(false)
                .init(device),
            norm: self
                .normalization
                .clone()
                .with_num_features(self.attn_channels)
                .init(device),
            act: self.activation.init(device),
            fc_select: Conv2dConfig::new(
                [self.attn_channels, self.channels * self.num_paths],
                [1, 1],
            )
            .with_bias(false)
            .init(device),
        }
    }
}

/// Branch attention for [`SelectiveKernel2d`].
///
/// Produces a softmax weighting over branches, per channel.
#[derive(Module, Debug)]
pub struct SelectiveKernelAttn<B: Backend> {
    /// The number of branches to weight.
    pub num_paths: usize,

    /// Bottleneck reduction conv.
    pub fc_reduce: Conv2d<B>,

    /// Bottleneck norm.
    pub norm: Normalization<B>,

    /// Bottleneck activation.
    pub act: Activation<B>,

    /// Branch-selection conv.
    pub fc_select: Conv2d<B>,
}

impl<B: Backend> SelectiveKernelAttn<B> {
    /// The number of fused feature channels.
    pub fn channels(&self) -> usize {
        self.fc_reduce.weight.shape().dims[1]
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: a ``[batch, num_paths, channels, height, width]`` stack
    ///   of branch outputs.
    ///
    /// # Returns
    ///
    /// A ``[batch, num_paths, channels, 1, 1]`` attention tensor; the
    /// weights across branches sum to one per channel.
    pub fn forward(
        &self,
        input: Tensor<B, 5>,
    ) -> Tensor<B, 5> {
        let [batch, num_paths, channels, height, width] = input.dims();
        assert_eq!(num_paths, self.num_paths, "branch count mismatch");
        assert_eq!(channels, self.channels(), "channel count mismatch");

        let x = input.sum_dim(1).reshape([batch, channels, height, width]);
        let x = adaptive_avg_pool2d(x, [1, 1]);

        let x = self.fc_reduce.forward(x);
        let x = self.norm.forward(x);
        let x = self.act.forward(x);
        let x = self.fc_select.forward(x);

        let x = x.reshape([batch, num_paths, channels, 1, 1]);
        softmax(x, 1)
    }
}

/// [`SelectiveKernel2d`] Meta trait.
pub trait SelectiveKernel2dMeta {
    /// The size of the in channels dimension.
    fn in_channels(&self) -> usize;

    /// The size of the out channels dimension.
    fn out_channels(&self) -> usize;

    /// The number of branches.
    fn num_paths(&self) -> usize;

    /// The stride of the branch convolutions.
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

/// [`SelectiveKernel2d`] Config.
///
/// Implements [`SelectiveKernel2dMeta`].
#[derive(Config, Debug)]
pub struct SelectiveKernel2dConfig {
    /// The size of the in channels dimension.
    pub in_channels: usize,

    /// The size of the out channels dimension.
    pub out_channels: usize,

    /// The stride of the branch convolutions.
    #[config(default = "1")]
    pub stride: usize,

    /// The base dilation rate.
    #[config(default = "1")]
    pub dilation: usize,

    /// Groups of the branch conv filters.
    #[config(default = "1")]
    pub groups: usize,

    /// The branch/attention policy.
    #[config(default = "SelectiveKernelConfig::new()")]
    pub sk: SelectiveKernelConfig,

    /// The [`Normalization`] config for branch convolutions.
    #[config(default = "NormalizationConfig::Batch(BatchNormConfig::new(0))")]
    pub normalization: NormalizationConfig,

    /// The [`Activation`] config for branch convolutions.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,
}

impl SelectiveKernel2dMeta for SelectiveKernel2dConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn num_paths(&self) -> usize {
        self.sk.num_paths()
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl SelectiveKernel2dConfig {
    /// Initialize a [`SelectiveKernel2d`].
    ///
    /// # Panics
    ///
    /// If `split_input` is set and `in_channels` is not divisible by the
    /// branch count.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> SelectiveKernel2d<B> {
        let branches = self.sk.resolve_branches(self.dilation);
        let num_paths = branches.len();

        let path_in_channels = if self.sk.split_input {
            assert_eq!(
                self.in_channels % num_paths,
                0,
                "split_input requires in_channels ({}) divisible by the branch count ({})",
                self.in_channels,
                num_paths,
            );
            self.in_channels / num_paths
        } else {
            self.in_channels
        };

        let groups = self.groups.min(self.out_channels);

        let paths = branches
            .iter()
            .map(|&(kernel_size, dilation)| {
                let padding = dilation * (kernel_size - 1) / 2;
                CNA2dConfig::new(
                    Conv2dConfig::new(
                        [path_in_channels, self.out_channels],
                        [kernel_size, kernel_size],
                    )
                    .with_stride([self.stride, self.stride])
                    .with_dilation([dilation, dilation])
                    .with_padding(PaddingConfig2d::Explicit(padding, padding))
                    .with_groups(groups)
                    .with_bias(false),
                    self.normalization.clone(),
                )
                .with_act(self.activation.clone())
                .init(device)
            })
            .collect();

        let attn = SelectiveKernelAttnConfig::new(self.out_channels)
            .with_num_paths(num_paths)
            .with_attn_channels(self.sk.attn_channels(self.out_channels))
            .with_normalization(self.normalization.clone())
            .with_activation(self.activation.clone())
            .init(device);

        SelectiveKernel2d {
            split_input: self.sk.split_input,
            paths,
            attn,
        }
    }
}

/// Selective kernel convolution.
///
/// Implements [`SelectiveKernel2dMeta`].
#[derive(Module, Debug)]
pub struct SelectiveKernel2d<B: Backend> {
    /// Whether input channels are split across branches.
    pub split_input: bool,

    /// The branch convolutions.
    pub paths: Vec<CNA2d<B>>,

    /// The branch attention.
    pub attn: SelectiveKernelAttn<B>,
}

impl<B: Backend> SelectiveKernel2dMeta for SelectiveKernel2d<B> {
    fn in_channels(&self) -> usize {
        let path_in = self.paths[0].in_channels();
        if self.split_input {
            path_in * self.num_paths()
        } else {
            path_in
        }
    }

    fn out_channels(&self) -> usize {
        self.paths[0].out_channels()
    }

    fn num_paths(&self) -> usize {
        self.paths.len()
    }

    fn stride(&self) -> usize {
        self.paths[0].stride()[0]
    }
}

impl<B: Backend> SelectiveKernel2d<B> {
    /// Forward Pass.
    ///
    /// Runs every branch, stacks the branch outputs, weights them with
    /// the branch attention, and sums over branches.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_channels, out_height, out_width]`` tensor.
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

        let branch_outputs: Vec<Tensor<B, 4>> = if self.split_input {
            let splits = input.chunk(self.num_paths(), 1);
            self.paths
                .iter()
                .zip(splits)
                .map(|(path, x)| path.forward(x))
                .collect()
        } else {
            self.paths
                .iter()
                .map(|path| path.forward(input.clone()))
                .collect()
        };

        let stacked: Tensor<B, 5> = Tensor::stack(branch_outputs, 1);

        let attn = self.attn.forward(stacked.clone());

        let fused = (stacked * attn).sum_dim(1);

        let channels = self.out_channels();
        let out = fused.reshape([batch, channels, out_height, out_width]);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &out,
            &[
                ("batch", batch),
                ("out_channels", channels),
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
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_selective_kernel_config() {
        let config = SelectiveKernelConfig::new();
        assert_eq!(config.kernel_sizes, vec![3, 5]);
        assert_eq!(config.num_paths(), 2);
        assert!(config.keep_3x3);
        assert!(!config.split_input);

        // keep_3x3 folds receptive field into dilation.
        assert_eq!(config.resolve_branches(1), vec![(3, 1), (3, 2)]);
        assert_eq!(config.resolve_branches(2), vec![(3, 2), (3, 4)]);

        let config = config.with_keep_3x3(false);
        assert_eq!(config.resolve_branches(1), vec![(3, 1), (5, 1)]);

        assert_eq!(config.attn_channels(512), 32);
        assert_eq!(config.attn_channels(1024), 64);
        let config = config.with_min_attn_channels(16);
        assert_eq!(config.attn_channels(64), 16);
    }

    #[test]
    #[should_panic(expected = "invalid branch kernel size: 4")]
    fn test_selective_kernel_config_even_kernel() {
        SelectiveKernelConfig::new()
            .with_kernel_sizes(vec![3, 4])
            .resolve_branches(1);
    }

    #[test]
    fn test_selective_kernel_attn_softmax() {
        let device = Default::default();

        let channels = 8;
        let num_paths = 2;

        let attn: SelectiveKernelAttn<TestBackend> = SelectiveKernelAttnConfig::new(channels)
            .with_num_paths(num_paths)
            .with_attn_channels(4)
            .init(&device);

        assert_eq!(attn.channels(), channels);

        let input = Tensor::random(
            [2, num_paths, channels, 4, 4],
            Distribution::Default,
            &device,
        );
        let weights = attn.forward(input);

        assert_eq!(weights.dims(), [2, num_paths, channels, 1, 1]);

        // Per channel, the branch weights sum to one.
        let sums = weights.sum_dim(1);
        let max_err: f32 = sums.sub_scalar(1.0).abs().max().into_scalar();
        assert!(max_err < 1e-5, "branch weights do not sum to 1: {max_err}");
    }

    #[test]
    fn test_selective_kernel_forward() {
        let device = Default::default();

        let layer: SelectiveKernel2d<TestBackend> = SelectiveKernel2dConfig::new(8, 16)
            .with_stride(2)
            .init(&device);

        assert_eq!(layer.in_channels(), 8);
        assert_eq!(layer.out_channels(), 16);
        assert_eq!(layer.num_paths(), 2);
        assert_eq!(layer.stride(), 2);
        assert_eq!(layer.output_resolution([8, 8]), [4, 4]);

        let input = Tensor::random([2, 8, 8, 8], Distribution::Default, &device);
        let output = layer.forward(input);

        assert_eq!(output.dims(), [2, 16, 4, 4]);
    }

    #[test]
    fn test_selective_kernel_forward_split_input() {
        let device = Default::default();

        let layer: SelectiveKernel2d<TestBackend> = SelectiveKernel2dConfig::new(8, 16)
            .with_sk(SelectiveKernelConfig::new().with_split_input(true))
            .init(&device);

        assert_eq!(layer.in_channels(), 8);
        assert_eq!(layer.paths[0].in_channels(), 4);

        let input = Tensor::random([2, 8, 6, 6], Distribution::Default, &device);
        let output = layer.forward(input);

        assert_eq!(output.dims(), [2, 16, 6, 6]);
    }

    #[test]
    fn test_selective_kernel_forward_wide_kernels() {
        let device = Default::default();

        let layer: SelectiveKernel2d<TestBackend> = SelectiveKernel2dConfig::new(4, 8)
            .with_sk(SelectiveKernelConfig::new().with_keep_3x3(false))
            .init(&device);

        // 3x3 and 5x5 branches, both padding to the same resolution.
        assert_eq!(layer.paths[0].conv.kernel_size, [3, 3]);
        assert_eq!(layer.paths[1].conv.kernel_size, [5, 5]);

        let input = Tensor::random([1, 4, 6, 6], Distribution::Default, &device);
        let output = layer.forward(input);

        assert_eq!(output.dims(), [1, 8, 6, 6]);
    }

    #[test]
    #[should_panic(expected = "split_input requires in_channels")]
    fn test_selective_kernel_split_divisibility() {
        let device = Default::default();

        let _layer: SelectiveKernel2d<TestBackend> = SelectiveKernel2dConfig::new(9, 16)
            .with_sk(SelectiveKernelConfig::new().with_split_input(true))
            .init(&device);
    }
}
