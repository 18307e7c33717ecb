//! # Selective Kernel `ResNet` Model
//!
//! [`SkResNetContractConfig`] is the high-level, semantic configuration:
//! stage depths, block kind, stem form, and the selective kernel policy.
//! It lowers to a [`SkResNetStructureConfig`] which spells out every
//! stage, and which [`SkResNetStructureConfig::init`] turns into a
//! [`SkResNet`] module.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::compat::normalization_wrapper::NormalizationConfig;
use crate::layers::attention::selective_kernel::SelectiveKernelConfig;
use crate::layers::drop::drop_block::DropBlockOptions;
use crate::models::sknet::basic_block::{BASIC_EXPANSION, SkBasicBlockConfig};
use crate::models::sknet::bottleneck_block::{BOTTLENECK_EXPANSION, SkBottleneckBlockConfig};
use crate::models::sknet::data_config::ModelDataConfig;
use crate::models::sknet::layer_block::{SkLayerBlock, SkLayerBlockConfig, SkLayerBlockMeta};
use crate::models::sknet::residual_block::SkResidualBlockConfig;
use crate::models::sknet::stem::{SkResNetStem, SkStemContractConfig, SkStemStructureConfig};
use crate::utility::probability::expect_probability;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::module::Ignored;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::{BatchNormConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Config, Module, Tensor};

/// Feature planes per residual stage.
pub const SKNET_STAGE_PLANES: [usize; 4] = [64, 128, 256, 512];

/// Stride per residual stage.
pub const SKNET_STAGE_STRIDES: [usize; 4] = [1, 2, 2, 2];

/// High-level [`SkResNet`] model configuration.
#[derive(Config, Debug)]
pub struct SkResNetContractConfig {
    /// Residual stage depths.
    pub layers: [usize; 4],

    /// Number of classification classes.
    pub num_classes: usize,

    /// Number of input channels.
    #[config(default = "3")]
    pub in_channels: usize,

    /// Use bottleneck blocks.
    #[config(default = "false")]
    pub bottleneck: bool,

    /// Groups of the selective kernel conv filters.
    ///
    /// Basic blocks only accept 1.
    #[config(default = "1")]
    pub cardinality: usize,

    /// Bottleneck width control factor.
    ///
    /// Basic blocks only accept 64.
    #[config(default = "64")]
    pub base_width: usize,

    /// Control factor for each block's first stage width.
    #[config(default = "1")]
    pub reduction_factor: usize,

    /// The selective kernel branch/attention policy.
    #[config(default = "SelectiveKernelConfig::new()")]
    pub sk: SelectiveKernelConfig,

    /// The stem form.
    #[config(default = "SkStemContractConfig::Default")]
    pub stem: SkStemContractConfig,

    /// Use the avg-pool downsample form on residual paths.
    #[config(default = "false")]
    pub avg_down: bool,

    /// Apply squeeze-excite gates before each residual add.
    #[config(default = "false")]
    pub use_se: bool,

    /// Stochastic depth rate; distributed over blocks with linear decay.
    #[config(default = "0.0")]
    pub drop_path_rate: f64,

    /// Zero every block's final norm scale after construction.
    #[config(default = "true")]
    pub zero_init_last: bool,

    /// The [`crate::compat::normalization_wrapper::Normalization`] config.
    #[config(default = "NormalizationConfig::Batch(BatchNormConfig::new(0))")]
    pub normalization: NormalizationConfig,

    /// The [`crate::compat::activation_wrapper::Activation`] config.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,
}

impl SkResNetContractConfig {
    /// The per-block expansion factor.
    pub fn expansion(&self) -> usize {
        if self.bottleneck {
            BOTTLENECK_EXPANSION
        } else {
            BASIC_EXPANSION
        }
    }

    fn block_config(
        &self,
        in_planes: usize,
        planes: usize,
        stride: usize,
    ) -> SkResidualBlockConfig {
        if self.bottleneck {
            SkBottleneckBlockConfig::new(in_planes, planes)
                .with_stride(stride)
                .with_cardinality(self.cardinality)
                .with_base_width(self.base_width)
                .with_reduction_factor(self.reduction_factor)
                .with_sk(self.sk.clone())
                .with_use_se(self.use_se)
                .with_avg_down(self.avg_down)
                .with_normalization(self.normalization.clone())
                .with_activation(self.activation.clone())
                .into()
        } else {
            SkBasicBlockConfig::new(in_planes, planes)
                .with_stride(stride)
                .with_cardinality(self.cardinality)
                .with_base_width(self.base_width)
                .with_reduction_factor(self.reduction_factor)
                .with_sk(self.sk.clone())
                .with_use_se(self.use_se)
                .with_avg_down(self.avg_down)
                .with_normalization(self.normalization.clone())
                .with_activation(self.activation.clone())
                .into()
        }
    }

    /// Lower to a [`SkResNetStructureConfig`].
    pub fn to_structure(self) -> SkResNetStructureConfig {
        let expansion = self.expansion();

        let stem = self.stem.to_structure(
            self.in_channels,
            self.normalization.clone(),
            self.activation.clone(),
        );

        let mut in_planes = self.stem.out_channels();
        let mut layers = Vec::with_capacity(self.layers.len());
        for stage in 0..self.layers.len() {
            let depth = self.layers[stage];
            let planes = SKNET_STAGE_PLANES[stage];
            let stride = SKNET_STAGE_STRIDES[stage];

            let blocks = (0..depth)
                .map(|b| {
                    if b == 0 {
                        self.block_config(in_planes, planes, stride)
                    } else {
                        self.block_config(planes * expansion, planes, 1)
                    }
                })
                .collect::<Vec<_>>();

            in_planes = planes * expansion;
            layers.push(SkLayerBlockConfig::from(blocks));
        }

        let structure = SkResNetStructureConfig::new(stem, layers, self.num_classes)
            .with_zero_init_last(self.zero_init_last);

        if self.drop_path_rate > 0.0 {
            structure.with_stochastic_depth_drop_path_rate(self.drop_path_rate)
        } else {
            structure
        }
    }

    /// Lower and initialize a [`SkResNet`] model.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> SkResNet<B> {
        self.to_structure().init(device)
    }
}

/// [`SkResNet`] Structure Config.
///
/// This config defines the structure of a lowered [`SkResNet`] model.
/// It is not a semantic configuration and does not check the validity
/// of the internal sizes before or during construction.
#[derive(Config, Debug)]
pub struct SkResNetStructureConfig {
    /// The stem configuration.
    pub stem: SkStemStructureConfig,

    /// The residual stage configurations.
    pub layers: Vec<SkLayerBlockConfig>,

    /// The number of classes.
    pub num_classes: usize,

    /// Zero every block's final norm scale after construction.
    #[config(default = "true")]
    pub zero_init_last: bool,
}

impl SkResNetStructureConfig {
    /// Update the config with stochastic depth.
    ///
    /// Distributes `drop_path_rate` over blocks with the linear decay
    /// rule; earlier blocks get lower drop probabilities.
    pub fn with_stochastic_depth_drop_path_rate(
        self,
        drop_path_rate: f64,
    ) -> Self {
        let drop_path_rate = expect_probability(drop_path_rate);

        let net_num_blocks = self.layers.iter().map(|b| b.len()).sum::<usize>();
        let mut net_block_idx = 0;
        let mut update_drop_path = |_idx: usize, block: SkResidualBlockConfig| {
            // stochastic depth linear decay rule
            let block_dpr = drop_path_rate * (net_block_idx as f64) / ((net_num_blocks - 1) as f64);
            net_block_idx += 1;
            if block_dpr > 0.0 {
                block.with_drop_path_prob(block_dpr)
            } else {
                block
            }
        };

        Self {
            layers: self
                .layers
                .into_iter()
                .map(|b| b.map_blocks(&mut update_drop_path))
                .collect(),
            ..self
        }
    }

    /// Update the config with the given drop block options.
    ///
    /// # Arguments
    ///
    /// - `options`: a vector of options, one for each layer.
    pub fn with_drop_block_options(
        self,
        options: Vec<Option<DropBlockOptions>>,
    ) -> Self {
        assert_eq!(options.len(), self.layers.len());
        Self {
            layers: self
                .layers
                .into_iter()
                .zip(options)
                .map(|(b, o)| b.with_drop_block(o))
                .collect(),
            ..self
        }
    }

    /// Apply the standard drop block probability scheme.
    ///
    /// The last two stages get drop blocks; the deeper stage uses a
    /// smaller block size and a full gamma scale.
    pub fn with_standard_drop_block_prob(
        self,
        drop_prob: f64,
    ) -> Self {
        let drop_prob = expect_probability(drop_prob);
        let k = self.layers.len();
        let mut blocks = vec![None; k];
        if drop_prob > 0.0 {
            blocks[k - 2] = DropBlockOptions::default()
                .with_drop_prob(drop_prob)
                .with_block_size(5)
                .with_gamma_scale(0.25)
                .into();
            blocks[k - 1] = DropBlockOptions::default()
                .with_drop_prob(drop_prob)
                .with_block_size(3)
                .with_gamma_scale(1.0)
                .into();
        }
        self.with_drop_block_options(blocks)
    }

    /// Initialize a [`SkResNet`] model.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> SkResNet<B> {
        let head_planes = self.layers.last().unwrap().out_planes();

        let mut layers = self
            .layers
            .into_iter()
            .map(|c| c.init(device))
            .collect::<Vec<_>>();

        if self.zero_init_last {
            for layer in &mut layers {
                for block in &mut layer.blocks {
                    block.zero_init_last_norm();
                }
            }
        }

        SkResNet {
            stem: self.stem.init(device),
            layers,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(head_planes, self.num_classes).init(device),
            default_cfg: None,
        }
    }
}

/// Selective Kernel `ResNet` model.
#[derive(Module, Debug)]
pub struct SkResNet<B: Backend> {
    /// Input stem.
    pub stem: SkResNetStem<B>,

    /// Residual stages.
    pub layers: Vec<SkLayerBlock<B>>,

    /// Head pooling.
    pub pool: AdaptiveAvgPool2d,

    /// Head classifier.
    pub fc: Linear<B>,

    /// Attached preprocessing metadata.
    pub default_cfg: Option<Ignored<ModelDataConfig>>,
}

impl<B: Backend> SkResNet<B> {
    /// The number of input channels.
    pub fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    /// The number of classifier outputs.
    pub fn num_classes(&self) -> usize {
        self.fc.weight.dims()[1]
    }

    /// Attach preprocessing metadata.
    pub fn with_default_cfg(
        self,
        cfg: ModelDataConfig,
    ) -> Self {
        Self {
            default_cfg: Some(Ignored(cfg)),
            ..self
        }
    }

    /// Get the attached preprocessing metadata.
    pub fn default_cfg(&self) -> Option<&ModelDataConfig> {
        self.default_cfg.as_ref().map(|cfg| &cfg.0)
    }

    /// Re-initialize the classifier head with a new class count.
    ///
    /// Attached preprocessing metadata is updated to match.
    pub fn with_classes(
        mut self,
        num_classes: usize,
    ) -> Self {
        let [d_input, _d_output] = self.fc.weight.dims();
        self.fc = LinearConfig::new(d_input, num_classes).init(&self.fc.weight.device());
        self.default_cfg = self
            .default_cfg
            .map(|cfg| Ignored(cfg.0.with_num_classes(num_classes)));
        self
    }

    /// `SkResNet` forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``; the resolution
    ///   must be a multiple of the total stage stride.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` class logits.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let [batch] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch"],
            &[("in_channels", self.in_channels())]
        );

        let x = self.stem.forward(input);

        let x = self.layers.iter().fold(x, |x, layer| layer.forward(x));

        let x = self.pool.forward(x);
        // Reshape [B, C, 1, 1] -> [B, C]
        let x = x.flatten(1, 3);
        let out = self.fc.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "num_classes"],
            &out,
            &[("batch", batch), ("num_classes", self.num_classes())]
        );

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::normalization_wrapper::Normalization;
    use crate::models::sknet::residual_block::{SkResidualBlock, SkResidualBlockConfig};
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_contract_lowering_basic() {
        let config = SkResNetContractConfig::new([2, 2, 2, 2], 1000);
        assert_eq!(config.expansion(), 1);

        let structure = config.to_structure();
        assert_eq!(structure.layers.len(), 4);

        for (idx, layer) in structure.layers.iter().enumerate() {
            layer.expect_valid();
            assert_eq!(layer.len(), 2);
            assert_eq!(layer.out_planes(), SKNET_STAGE_PLANES[idx]);
            assert_eq!(layer.stride(), SKNET_STAGE_STRIDES[idx]);
        }

        assert_eq!(structure.layers[0].in_planes(), 64);
        assert_eq!(structure.layers[3].out_planes(), 512);
    }

    #[test]
    fn test_contract_lowering_bottleneck() {
        let config = SkResNetContractConfig::new([2, 2, 2, 2], 1000).with_bottleneck(true);
        assert_eq!(config.expansion(), 4);

        let structure = config.to_structure();

        for (idx, layer) in structure.layers.iter().enumerate() {
            layer.expect_valid();
            assert_eq!(layer.out_planes(), SKNET_STAGE_PLANES[idx] * 4);
        }

        assert_eq!(structure.layers[3].out_planes(), 2048);
    }

    #[test]
    fn test_stochastic_depth_schedule() {
        let rate = 0.2;
        let structure = SkResNetContractConfig::new([2, 2, 2, 2], 10)
            .with_drop_path_rate(rate)
            .to_structure();

        let drop_prob = |block: &SkResidualBlockConfig| -> f64 {
            match block {
                SkResidualBlockConfig::Basic(cfg) => cfg.drop_path_prob,
                SkResidualBlockConfig::Bottleneck(cfg) => cfg.drop_path_prob,
            }
        };

        // Linear decay: first block keeps 0, last block reaches the rate.
        assert_eq!(drop_prob(&structure.layers[0].blocks[0]), 0.0);
        let last = structure.layers[3].blocks.last().unwrap();
        assert!((drop_prob(last) - rate).abs() < 1e-9);
    }

    #[test]
    fn test_model_forward_tiny() {
        let device = Default::default();

        let model: SkResNet<TestBackend> = SkResNetContractConfig::new([1, 1, 1, 1], 5)
            .init(&device);

        assert_eq!(model.in_channels(), 3);
        assert_eq!(model.num_classes(), 5);

        let input = Tensor::ones([1, 3, 64, 64], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [1, 5]);
    }

    #[test]
    fn test_model_zero_init_last() {
        let device = Default::default();

        let gamma_sum = |block: &SkResidualBlock<TestBackend>| -> f32 {
            let norm = match block {
                SkResidualBlock::Basic(block) => &block.cna2.norm,
                SkResidualBlock::Bottleneck(block) => &block.cna3.norm,
            };
            match norm {
                Normalization::Batch(norm) => norm.gamma.val().sum().into_scalar(),
                _ => panic!("Unexpected norm type"),
            }
        };

        let model: SkResNet<TestBackend> =
            SkResNetContractConfig::new([1, 1, 1, 1], 5).init(&device);
        for layer in &model.layers {
            for block in &layer.blocks {
                assert_eq!(gamma_sum(block), 0.0);
            }
        }

        let model: SkResNet<TestBackend> = SkResNetContractConfig::new([1, 1, 1, 1], 5)
            .with_zero_init_last(false)
            .init(&device);
        assert_ne!(gamma_sum(&model.layers[0].blocks[0]), 0.0);
    }

    #[test]
    fn test_model_with_classes() {
        let device = Default::default();

        let model: SkResNet<TestBackend> = SkResNetContractConfig::new([1, 1, 1, 1], 5)
            .init(&device)
            .with_default_cfg(ModelDataConfig::default().with_num_classes(5));

        let model = model.with_classes(7);
        assert_eq!(model.num_classes(), 7);
        assert_eq!(model.default_cfg().unwrap().num_classes, 7);
    }
}
