//! # Residual Block Wrapper

use crate::layers::drop::drop_block::DropBlockOptions;
use crate::models::sknet::basic_block::{SkBasicBlock, SkBasicBlockConfig, SkBasicBlockMeta};
use crate::models::sknet::bottleneck_block::{
    SkBottleneckBlock, SkBottleneckBlockConfig, SkBottleneckBlockMeta,
};
use crate::models::sknet::util::stride_div_output_resolution;
use crate::utility::probability::expect_probability;
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// [`SkResidualBlock`] Meta API.
pub trait SkResidualBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// The stride of convolution.
    ///
    /// Affects downsample behavior.
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

/// [`SkResidualBlock`] Config.
#[derive(Config, Debug)]
pub enum SkResidualBlockConfig {
    /// A [`SkBasicBlock`].
    Basic(SkBasicBlockConfig),

    /// A [`SkBottleneckBlock`].
    Bottleneck(SkBottleneckBlockConfig),
}

impl From<SkBasicBlockConfig> for SkResidualBlockConfig {
    fn from(config: SkBasicBlockConfig) -> Self {
        Self::Basic(config)
    }
}

impl From<SkBottleneckBlockConfig> for SkResidualBlockConfig {
    fn from(config: SkBottleneckBlockConfig) -> Self {
        Self::Bottleneck(config)
    }
}

impl SkResidualBlockMeta for SkResidualBlockConfig {
    fn in_planes(&self) -> usize {
        match self {
            Self::Basic(config) => config.in_planes(),
            Self::Bottleneck(config) => config.in_planes(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Self::Basic(config) => config.out_planes(),
            Self::Bottleneck(config) => config.out_planes(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            Self::Basic(config) => config.stride(),
            Self::Bottleneck(config) => config.stride(),
        }
    }
}

impl SkResidualBlockConfig {
    /// Initialize a [`SkResidualBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> SkResidualBlock<B> {
        match self {
            Self::Basic(config) => SkResidualBlock::Basic(config.clone().init(device)),
            Self::Bottleneck(config) => SkResidualBlock::Bottleneck(config.clone().init(device)),
        }
    }

    /// Set drop block options.
    pub fn with_drop_block(
        self,
        options: Option<DropBlockOptions>,
    ) -> Self {
        match self {
            Self::Basic(config) => config.with_drop_block(options).into(),
            Self::Bottleneck(config) => config.with_drop_block(options).into(),
        }
    }

    /// Set the drop path probability.
    pub fn with_drop_path_prob(
        self,
        drop_path_prob: f64,
    ) -> Self {
        let drop_path_prob = expect_probability(drop_path_prob);
        match self {
            Self::Basic(config) => config.with_drop_path_prob(drop_path_prob).into(),
            Self::Bottleneck(config) => config.with_drop_path_prob(drop_path_prob).into(),
        }
    }
}

/// A [`SkBasicBlock`] or [`SkBottleneckBlock`] wrapper.
#[derive(Module, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum SkResidualBlock<B: Backend> {
    /// A [`SkBasicBlock`].
    Basic(SkBasicBlock<B>),

    /// A [`SkBottleneckBlock`].
    Bottleneck(SkBottleneckBlock<B>),
}

impl<B: Backend> From<SkBasicBlock<B>> for SkResidualBlock<B> {
    fn from(block: SkBasicBlock<B>) -> Self {
        Self::Basic(block)
    }
}

impl<B: Backend> From<SkBottleneckBlock<B>> for SkResidualBlock<B> {
    fn from(block: SkBottleneckBlock<B>) -> Self {
        Self::Bottleneck(block)
    }
}

impl<B: Backend> SkResidualBlockMeta for SkResidualBlock<B> {
    fn in_planes(&self) -> usize {
        match self {
            Self::Basic(block) => block.in_planes(),
            Self::Bottleneck(block) => block.in_planes(),
        }
    }

    fn out_planes(&self) -> usize {
        match self {
            Self::Basic(block) => block.out_planes(),
            Self::Bottleneck(block) => block.out_planes(),
        }
    }

    fn stride(&self) -> usize {
        match self {
            Self::Basic(block) => block.stride(),
            Self::Bottleneck(block) => block.stride(),
        }
    }
}

impl<B: Backend> SkResidualBlock<B> {
    /// Apply the wrapped block to the input.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match self {
            Self::Basic(block) => block.forward(input),
            Self::Bottleneck(block) => block.forward(input),
        }
    }

    /// Zero the final norm layer's scale parameter.
    pub fn zero_init_last_norm(&mut self) {
        match self {
            Self::Basic(block) => block.zero_init_last_norm(),
            Self::Bottleneck(block) => block.zero_init_last_norm(),
        }
    }

    /// Set the drop path probability.
    pub fn with_drop_path_prob(
        self,
        drop_path_prob: f64,
    ) -> Self {
        let drop_path_prob = expect_probability(drop_path_prob);
        match self {
            Self::Basic(block) => block.with_drop_path_prob(drop_path_prob).into(),
            Self::Bottleneck(block) => block.with_drop_path_prob(drop_path_prob).into(),
        }
    }

    /// Set drop block options.
    pub fn with_drop_block(
        self,
        options: Option<DropBlockOptions>,
    ) -> Self {
        match self {
            Self::Basic(block) => block.with_drop_block(options).into(),
            Self::Bottleneck(block) => block.with_drop_block(options).into(),
        }
    }
}
