//! # Selective Kernel Bottleneck Block
//!
//! [`SkBottleneckBlock`] is the three-stage residual unit of the
//! SKNet-26/50 family: a 1x1 reduce, a selective kernel convolution at
//! the bottleneck width, and a 1x1 expand, with the shared activation
//! applied after the residual add.
//!
//! [`SkBottleneckBlockMeta`] defines a common meta API for
//! [`SkBottleneckBlock`] and [`SkBottleneckBlockConfig`].

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::attention::selective_kernel::{
    SelectiveKernel2d, SelectiveKernel2dConfig, SelectiveKernel2dMeta, SelectiveKernelConfig,
};
use crate::layers::attention::squeeze_excite::{SqueezeExcite, SqueezeExciteConfig};
use crate::layers::blocks::cna::{CNA2d, CNA2dConfig, CNA2dMeta};
use crate::layers::drop::drop_block::{DropBlock2d, DropBlock2dConfig, DropBlockOptions};
use crate::layers::drop::drop_path::{DropPath, DropPathConfig};
use crate::models::sknet::downsample::{SkDownsample, SkDownsampleConfig};
use crate::models::sknet::util::stride_div_output_resolution;
use crate::utility::probability::expect_probability;
use bimm_contracts::{
    assert_shape_contract_periodically, define_shape_contract, unpack_shape_contract,
};
use burn::nn::BatchNormConfig;
use burn::nn::conv::Conv2dConfig;
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`SkBottleneckBlock`] expansion factor.
pub const BOTTLENECK_EXPANSION: usize = 4;

/// [`SkBottleneckBlock`] Meta trait.
pub trait SkBottleneckBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// Configures the size of `width` and `out_planes`.
    fn planes(&self) -> usize;

    /// Groups of the selective kernel conv filters.
    fn cardinality(&self) -> usize;

    /// Control factor for `width()`.
    fn base_width(&self) -> usize;

    /// Control factor for `out_planes()`.
    fn expansion_factor(&self) -> usize {
        BOTTLENECK_EXPANSION
    }

    /// Control factor for `first_planes()`.
    fn reduction_factor(&self) -> usize;

    /// The bottleneck width.
    ///
    /// ``width = floor(planes * base_width / 64) * cardinality``
    fn width(&self) -> usize {
        (self.planes() * self.base_width() / 64) * self.cardinality()
    }

    /// First stage output channels.
    ///
    /// ``first_planes = width // reduction_factor``
    fn first_planes(&self) -> usize {
        self.width() / self.reduction_factor()
    }

    /// The number of output feature planes.
    ///
    /// ``out_planes = planes * expansion_factor``
    fn out_planes(&self) -> usize {
        self.planes() * self.expansion_factor()
    }

    /// The stride of convolution.
    ///
    /// Affects downsample behavior.
    fn stride(&self) -> usize;

    /// Dilation rate for conv layers.
    fn dilation(&self) -> usize;

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

/// [`SkBottleneckBlock`] Config.
///
/// Implements [`SkBottleneckBlockMeta`].
#[derive(Config, Debug)]
pub struct SkBottleneckBlockConfig {
    /// The number of input feature planes.
    pub in_planes: usize,

    /// Configures the size of `width` and `out_planes`.
    pub planes: usize,

    /// The stride of the selective kernel stage.
    #[config(default = "1")]
    pub stride: usize,

    /// Dilation rate for conv layers.
    #[config(default = "1")]
    pub dilation: usize,

    /// Optional dilation rate for the selective kernel stage.
    #[config(default = "None")]
    pub first_dilation: Option<usize>,

    /// Groups of the selective kernel conv filters.
    #[config(default = "1")]
    pub cardinality: usize,

    /// Base width used to determine the bottleneck width.
    #[config(default = "64")]
    pub base_width: usize,

    /// Control factor for `first_planes()`.
    #[config(default = "1")]
    pub reduction_factor: usize,

    /// The selective kernel branch/attention policy.
    #[config(default = "SelectiveKernelConfig::new()")]
    pub sk: SelectiveKernelConfig,

    /// Apply a squeeze-excite gate before the residual add.
    #[config(default = "false")]
    pub use_se: bool,

    /// Use the avg-pool downsample form on the residual path.
    #[config(default = "false")]
    pub avg_down: bool,

    /// Kernel size of the conv downsample form.
    #[config(default = "1")]
    pub down_kernel_size: usize,

    /// Drop path probability.
    #[config(default = "0.0")]
    pub drop_path_prob: f64,

    /// The drop block options.
    #[config(default = "None")]
    pub drop_block: Option<DropBlockOptions>,

    /// The [`crate::compat::normalization_wrapper::Normalization`] config.
    ///
    /// The feature size of this config will be replaced with the
    /// appropriate feature size at each layer.
    #[config(default = "NormalizationConfig::Batch(BatchNormConfig::new(0))")]
    pub normalization: NormalizationConfig,

    /// The [`crate::compat::activation_wrapper::Activation`] config.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,
}

impl SkBottleneckBlockMeta for SkBottleneckBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn planes(&self) -> usize {
        self.planes
    }

    fn cardinality(&self) -> usize {
        self.cardinality
    }

    fn base_width(&self) -> usize {
        self.base_width
    }

    fn reduction_factor(&self) -> usize {
        self.reduction_factor
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn dilation(&self) -> usize {
        self.dilation
    }
}

impl SkBottleneckBlockConfig {
    /// Effective selective-kernel-stage dilation.
    pub fn effective_first_dilation(&self) -> usize {
        self.first_dilation.unwrap_or(self.dilation)
    }

    /// Initialize a [`SkBottleneckBlock`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> SkBottleneckBlock<B> {
        let drop_path_prob = expect_probability(self.drop_path_prob);

        let in_planes = self.in_planes();
        let width = self.width();
        let first_planes = self.first_planes();
        let out_planes = self.out_planes();

        let first_dilation = self.effective_first_dilation();
        let stride = self.stride();

        let downsample = if stride != 1 || in_planes != out_planes {
            SkDownsampleConfig::new(in_planes, out_planes)
                .with_kernel_size(self.down_kernel_size)
                .with_stride(stride)
                .with_dilation(first_dilation)
                .with_avg(self.avg_down)
                .with_normalization(self.normalization.clone())
                .into()
        } else {
            None
        };

        let cna1 = CNA2dConfig::new(
            Conv2dConfig::new([in_planes, first_planes], [1, 1]).with_bias(false),
            self.normalization.clone(),
        )
        .with_act(self.activation.clone());

        let sk = SelectiveKernel2dConfig::new(first_planes, width)
            .with_stride(stride)
            .with_dilation(first_dilation)
            .with_groups(self.cardinality)
            .with_sk(self.sk.clone())
            .with_normalization(self.normalization.clone())
            .with_activation(self.activation.clone());

        let cna3 = CNA2dConfig::new(
            Conv2dConfig::new([width, out_planes], [1, 1]).with_bias(false),
            self.normalization.clone(),
        )
        .with_act(self.activation.clone());

        SkBottleneckBlock {
            base_width: self.base_width,
            reduction_factor: self.reduction_factor,

            downsample: downsample.map(|cfg: SkDownsampleConfig| cfg.init(device)),

            cna1: cna1.init(device),
            sk: sk.init(device),
            cna3: cna3.init(device),

            se: if self.use_se {
                SqueezeExciteConfig::new(out_planes, (self.planes / 4).max(1))
                    .init(device)
                    .into()
            } else {
                None
            },

            drop_block: self
                .drop_block
                .as_ref()
                .map(|options| DropBlock2dConfig::from(options.clone()).init()),
            drop_path: if drop_path_prob != 0.0 {
                DropPathConfig::new()
                    .with_drop_prob(drop_path_prob)
                    .init()
                    .into()
            } else {
                None
            },
        }
    }
}

/// Selective Kernel Bottleneck Block.
///
/// Implements [`SkBottleneckBlockMeta`].
#[derive(Module, Debug)]
pub struct SkBottleneckBlock<B: Backend> {
    /// Base width.
    pub base_width: usize,

    /// Reduction factor.
    pub reduction_factor: usize,

    /// Optional downsample layer for the residual connection.
    pub downsample: Option<SkDownsample<B>>,

    /// First stage; 1x1 reduce.
    pub cna1: CNA2d<B>,

    /// Second stage; selective kernel convolution at the bottleneck width.
    pub sk: SelectiveKernel2d<B>,

    /// Third stage; 1x1 expand, activation after the residual add.
    pub cna3: CNA2d<B>,

    /// Optional squeeze-excite gate.
    pub se: Option<SqueezeExcite<B>>,

    /// Optional `DropBlock` layer.
    pub drop_block: Option<DropBlock2d>,

    /// Optional `DropPath` layer.
    pub drop_path: Option<DropPath>,
}

impl<B: Backend> SkBottleneckBlockMeta for SkBottleneckBlock<B> {
    fn in_planes(&self) -> usize {
        self.cna1.in_channels()
    }

    fn planes(&self) -> usize {
        self.out_planes() / self.expansion_factor()
    }

    fn cardinality(&self) -> usize {
        self.sk.paths[0].groups()
    }

    fn base_width(&self) -> usize {
        self.base_width
    }

    fn reduction_factor(&self) -> usize {
        self.reduction_factor
    }

    fn first_planes(&self) -> usize {
        self.cna1.out_channels()
    }

    fn width(&self) -> usize {
        self.cna3.in_channels()
    }

    fn out_planes(&self) -> usize {
        self.cna3.out_channels()
    }

    fn stride(&self) -> usize {
        self.sk.stride()
    }

    fn dilation(&self) -> usize {
        self.cna3.conv.dilation[0]
    }
}

impl<B: Backend> SkBottleneckBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height=out_height*stride, in_width=out_width*stride]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes=planes*expansion_factor, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_planes",
                "in_height" = "out_height" * "stride",
                "in_width" = "out_width" * "stride"
            ],
            &input,
            &["batch", "in_height", "in_width", "out_height", "out_width"],
            &[("in_planes", self.in_planes()), ("stride", self.stride())],
        );
        define_shape_contract!(
            OUT_CONTRACT,
            ["batch", "out_planes", "out_height", "out_width"]
        );
        let out_bindings = [
            ("batch", batch),
            ("out_planes", self.out_planes()),
            ("out_height", out_height),
            ("out_width", out_width),
        ];

        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };
        assert_shape_contract_periodically!(OUT_CONTRACT, &identity, &out_bindings);

        let x = self.cna1.forward(input);

        assert_shape_contract_periodically!(
            ["batch", "first_planes", "in_height", "in_width"],
            &x,
            &[
                ("batch", batch),
                ("first_planes", self.first_planes()),
                ("in_height", in_height),
                ("in_width", in_width),
            ]
        );

        let x = self.sk.forward(x);

        let x = self.cna3.hook_forward(x, |x| {
            let x = match &self.drop_block {
                Some(drop_block) => drop_block.forward(x),
                None => x,
            };
            let x = match &self.se {
                Some(se) => se.forward(x),
                None => x,
            };
            let x = match &self.drop_path {
                Some(drop_path) => drop_path.forward(x),
                None => x,
            };

            x + identity
        });

        assert_shape_contract_periodically!(OUT_CONTRACT, &x, &out_bindings);

        x
    }

    /// Zero the final norm layer's scale parameter.
    ///
    /// Leaves every other parameter unchanged; the block starts as an
    /// identity mapping of its residual path.
    pub fn zero_init_last_norm(&mut self) {
        self.cna3.zero_init_norm();
    }

    /// Set the drop path probability.
    pub fn with_drop_path_prob(
        self,
        drop_path_prob: f64,
    ) -> Self {
        let drop_path_prob = expect_probability(drop_path_prob);
        Self {
            drop_path: if drop_path_prob == 0.0 {
                None
            } else {
                DropPathConfig::new()
                    .with_drop_prob(drop_path_prob)
                    .init()
                    .into()
            },
            ..self
        }
    }

    /// Set the drop block behavior.
    pub fn with_drop_block(
        self,
        drop_block: Option<DropBlockOptions>,
    ) -> Self {
        Self {
            drop_block: drop_block.map(|options| DropBlock2dConfig::from(options).init()),
            ..self
        }
    }
}
