//! # Input Stems
//!
//! The stem is the initial downsampling stage preceding the residual
//! layers. All forms reduce the input resolution by 4:
//!
//! * [`SkStemContractConfig::Default`] - a single 7x7 stride-2
//!   conv/norm/act into a stride-2 max pool.
//! * [`SkStemContractConfig::Deep`] - three 3x3 conv/norm/act stages
//!   (``in -> w`` stride 2, ``w -> w``, ``w -> 2w``) into the max pool.
//! * [`SkStemContractConfig::DeepTiered`] - the deep form with a narrower
//!   first stage (``3 * w / 4``).

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::blocks::cna::{CNA2d, CNA2dConfig, CNA2dMeta};
use crate::models::sknet::util::stride_div_output_resolution;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::conv::Conv2dConfig;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::prelude::{Backend, Config, Tensor};
use serde::{Deserialize, Serialize};

/// Overall stem stride; two stride-2 stages.
pub const STEM_STRIDE: usize = 4;

/// Stem contract configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkStemContractConfig {
    /// Single 7x7 convolution with stride 2, into the stem pool.
    Default,

    /// Three 3x3 convolutions, into the stem pool:
    /// 1. ``stem_width, stride=2``
    /// 2. ``stem_width, stride=1``
    /// 3. ``stem_width * 2, stride=1``
    Deep {
        /// The width of the stem convolutions.
        stem_width: usize,
    },

    /// Three 3x3 convolutions, into the stem pool:
    /// 1. ``3 * (stem_width // 4), stride=2``
    /// 2. ``stem_width, stride=1``
    /// 3. ``stem_width * 2, stride=1``
    DeepTiered {
        /// The width of the stem convolutions.
        stem_width: usize,
    },
}

impl Default for SkStemContractConfig {
    fn default() -> Self {
        SkStemContractConfig::Default
    }
}

impl SkStemContractConfig {
    /// The number of channels produced by the stem.
    pub fn out_channels(&self) -> usize {
        match self {
            SkStemContractConfig::Default => 64,
            SkStemContractConfig::Deep { stem_width }
            | SkStemContractConfig::DeepTiered { stem_width } => stem_width * 2,
        }
    }

    /// Convert to a [`SkStemStructureConfig`].
    pub fn to_structure(
        &self,
        in_channels: usize,
        normalization: NormalizationConfig,
        activation: ActivationConfig,
    ) -> SkStemStructureConfig {
        let cna = |channels: [usize; 2], kernel: usize, stride: usize| {
            let padding = (kernel - 1) / 2;
            CNA2dConfig::new(
                Conv2dConfig::new(channels, [kernel, kernel])
                    .with_stride([stride, stride])
                    .with_padding(PaddingConfig2d::Explicit(padding, padding))
                    .with_bias(false),
                normalization.clone(),
            )
            .with_act(activation.clone())
        };

        let (cna1, cna2, cna3) = match *self {
            SkStemContractConfig::Default => (cna([in_channels, 64], 7, 2), None, None),
            SkStemContractConfig::Deep { stem_width } => (
                cna([in_channels, stem_width], 3, 2),
                Some(cna([stem_width, stem_width], 3, 1)),
                Some(cna([stem_width, stem_width * 2], 3, 1)),
            ),
            SkStemContractConfig::DeepTiered { stem_width } => (
                cna([in_channels, 3 * (stem_width / 4)], 3, 2),
                Some(cna([3 * (stem_width / 4), stem_width], 3, 1)),
                Some(cna([stem_width, stem_width * 2], 3, 1)),
            ),
        };

        let pool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1));

        SkStemStructureConfig {
            cna1,
            cna2,
            cna3,
            pool,
        }
    }
}

/// Stem structure configuration.
#[derive(Config, Debug)]
pub struct SkStemStructureConfig {
    /// The first convolution.
    pub cna1: CNA2dConfig,

    /// The second convolution.
    pub cna2: Option<CNA2dConfig>,

    /// The third convolution.
    pub cna3: Option<CNA2dConfig>,

    /// The pooling layer.
    pub pool: MaxPool2dConfig,
}

impl SkStemStructureConfig {
    /// The number of channels consumed by the stem.
    pub fn in_channels(&self) -> usize {
        self.cna1.in_channels()
    }

    /// The number of channels produced by the stem.
    pub fn out_channels(&self) -> usize {
        match (&self.cna3, &self.cna2) {
            (Some(cna3), _) => cna3.out_channels(),
            (None, Some(cna2)) => cna2.out_channels(),
            (None, None) => self.cna1.out_channels(),
        }
    }

    /// Initialize a [`SkResNetStem`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> SkResNetStem<B> {
        SkResNetStem {
            cna1: self.cna1.init(device),
            cna2: self.cna2.map(|c| c.init(device)),
            cna3: self.cna3.map(|c| c.init(device)),
            pool: self.pool.init(),
        }
    }
}

/// Stem module.
#[derive(Module, Debug)]
pub struct SkResNetStem<B: Backend> {
    /// The first convolution.
    pub cna1: CNA2d<B>,
    /// The second convolution.
    pub cna2: Option<CNA2d<B>>,
    /// The third convolution.
    pub cna3: Option<CNA2d<B>>,
    /// The pooling layer.
    pub pool: MaxPool2d,
}

impl<B: Backend> SkResNetStem<B> {
    /// The number of channels consumed by the stem.
    pub fn in_channels(&self) -> usize {
        self.cna1.in_channels()
    }

    /// The number of channels produced by the stem.
    pub fn out_channels(&self) -> usize {
        match (&self.cna3, &self.cna2) {
            (Some(cna3), _) => cna3.out_channels(),
            (None, Some(cna2)) => cna2.out_channels(),
            (None, None) => self.cna1.out_channels(),
        }
    }

    /// Get the output resolution for a given input resolution.
    ///
    /// The input must be a multiple of [`STEM_STRIDE`].
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        stride_div_output_resolution(input_resolution, STEM_STRIDE)
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``; the
    ///   resolution must be a multiple of [`STEM_STRIDE`].
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, in_height / 4, in_width / 4]``
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
            &[("in_channels", self.in_channels()), ("stride", STEM_STRIDE)]
        );

        let mut x = self.cna1.forward(input);
        if let Some(cna2) = &self.cna2 {
            x = cna2.forward(x);
        }
        if let Some(cna3) = &self.cna3 {
            x = cna3.forward(x);
        }
        let out = self.pool.forward(x);

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
    use burn::backend::NdArray;
    use burn::nn::BatchNormConfig;

    type TestBackend = NdArray<f32>;

    fn make_structure(contract: SkStemContractConfig) -> SkStemStructureConfig {
        contract.to_structure(
            3,
            NormalizationConfig::Batch(BatchNormConfig::new(0)),
            ActivationConfig::Relu,
        )
    }

    #[test]
    fn test_default_stem() {
        let contract = SkStemContractConfig::default();
        assert_eq!(contract.out_channels(), 64);

        let structure = make_structure(contract);
        assert_eq!(structure.in_channels(), 3);
        assert_eq!(structure.out_channels(), 64);
        assert!(structure.cna2.is_none());
        assert!(structure.cna3.is_none());

        let device = Default::default();
        let stem: SkResNetStem<TestBackend> = structure.init(&device);
        assert_eq!(stem.out_channels(), 64);
        assert_eq!(stem.output_resolution([32, 32]), [8, 8]);

        let input = Tensor::ones([1, 3, 32, 32], &device);
        let output = stem.forward(input);

        assert_eq!(output.dims(), [1, 64, 8, 8]);
    }

    #[test]
    fn test_deep_stem() {
        let contract = SkStemContractConfig::Deep { stem_width: 32 };
        assert_eq!(contract.out_channels(), 64);

        let structure = make_structure(contract);
        assert_eq!(structure.out_channels(), 64);

        let device = Default::default();
        let stem: SkResNetStem<TestBackend> = structure.init(&device);

        assert_eq!(stem.cna1.out_channels(), 32);
        assert_eq!(stem.cna2.as_ref().unwrap().out_channels(), 32);
        assert_eq!(stem.cna3.as_ref().unwrap().out_channels(), 64);

        let input = Tensor::ones([1, 3, 32, 32], &device);
        let output = stem.forward(input);

        assert_eq!(output.dims(), [1, 64, 8, 8]);
    }

    #[test]
    fn test_deep_tiered_stem() {
        let contract = SkStemContractConfig::DeepTiered { stem_width: 32 };
        let structure = make_structure(contract);

        let device = Default::default();
        let stem: SkResNetStem<TestBackend> = structure.init(&device);

        assert_eq!(stem.cna1.out_channels(), 24);
        assert_eq!(stem.cna2.as_ref().unwrap().out_channels(), 32);
        assert_eq!(stem.cna3.as_ref().unwrap().out_channels(), 64);

        let input = Tensor::ones([1, 3, 32, 32], &device);
        let output = stem.forward(input);

        assert_eq!(output.dims(), [1, 64, 8, 8]);
    }
}
