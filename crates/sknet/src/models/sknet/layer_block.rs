//! # Residual Layer Block
//!
//! A [`SkLayerBlock`] is a sequence of [`SkResidualBlock`]s; one
//! residual stage of the model. The first block of a stage carries the
//! stage stride and any channel change; the rest are stride-1,
//! same-channel blocks.

use crate::layers::drop::drop_block::DropBlockOptions;
use crate::models::sknet::residual_block::{
    SkResidualBlock, SkResidualBlockConfig, SkResidualBlockMeta,
};
use crate::models::sknet::util::stride_div_output_resolution;
use crate::utility::probability::expect_probability;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// [`SkLayerBlock`] Meta API.
pub trait SkLayerBlockMeta {
    /// The number of blocks.
    fn len(&self) -> usize;

    /// Check if the layer block is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// Get the effective stride of the layers.
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

/// [`SkLayerBlock`] Configuration.
#[derive(Config, Debug)]
pub struct SkLayerBlockConfig {
    /// The component blocks.
    pub blocks: Vec<SkResidualBlockConfig>,
}

impl From<Vec<SkResidualBlockConfig>> for SkLayerBlockConfig {
    fn from(blocks: Vec<SkResidualBlockConfig>) -> Self {
        Self { blocks }
    }
}

impl SkLayerBlockMeta for SkLayerBlockConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl SkLayerBlockConfig {
    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("blocks is empty".to_string());
        }

        for idx in 1..self.blocks.len() {
            let prev = &self.blocks[idx - 1];
            let curr = &self.blocks[idx];
            if prev.out_planes() != curr.in_planes() {
                return Err(format!(
                    "block[{}].out_planes({}) != block[{}].in_planes({})",
                    idx - 1,
                    prev.out_planes(),
                    idx,
                    curr.in_planes(),
                ));
            }
        }
        Ok(())
    }

    /// Panic if [`SkLayerBlockConfig::try_validate`] returns an error.
    pub fn expect_valid(&self) {
        match self.try_validate() {
            Ok(_) => (),
            Err(err) => panic!("{}", err),
        }
    }

    /// Initialize a new [`SkLayerBlock`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> SkLayerBlock<B> {
        self.expect_valid();

        SkLayerBlock {
            blocks: self
                .blocks
                .iter()
                .map(|block| block.init(device))
                .collect(),
        }
    }

    /// Apply a mapping over the blocks.
    pub fn map_blocks<F>(
        self,
        f: &mut F,
    ) -> Self
    where
        F: FnMut(usize, SkResidualBlockConfig) -> SkResidualBlockConfig,
    {
        Self {
            blocks: self
                .blocks
                .into_iter()
                .enumerate()
                .map(|(idx, block)| f(idx, block))
                .collect(),
        }
    }

    /// Update the drop block options.
    pub fn with_drop_block<O>(
        self,
        options: O,
    ) -> Self
    where
        O: Into<Option<DropBlockOptions>>,
    {
        let options = options.into();
        self.map_blocks(&mut |_, block| block.with_drop_block(options.clone()))
    }

    /// Update the drop path probability.
    pub fn with_drop_path_prob(
        self,
        prob: f64,
    ) -> Self {
        let prob = expect_probability(prob);
        self.map_blocks(&mut |_, block| block.with_drop_path_prob(prob))
    }
}

/// Layer block.
#[derive(Module, Debug)]
pub struct SkLayerBlock<B: Backend> {
    /// Internal blocks.
    pub blocks: Vec<SkResidualBlock<B>>,
}

impl<B: Backend> SkLayerBlockMeta for SkLayerBlock<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        self.blocks
            .iter()
            .fold(1, |acc, block| acc * block.stride())
    }
}

impl<B: Backend> SkLayerBlock<B> {
    /// Apply the layer block.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, out_height, out_width] = unpack_shape_contract!(
            [
                "batch",
                "in_planes",
                "in_height" = "out_height" * "stride",
                "in_width" = "out_width" * "stride"
            ],
            &input,
            &["batch", "out_height", "out_width"],
            &[("in_planes", self.in_planes()), ("stride", self.stride())],
        );

        let x = self.blocks.iter().fold(input, |x, block| block.forward(x));

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        x
    }

    /// Apply a mapping over the blocks.
    pub fn map_blocks<F>(
        self,
        f: &mut F,
    ) -> Self
    where
        F: FnMut(usize, SkResidualBlock<B>) -> SkResidualBlock<B>,
    {
        Self {
            blocks: self
                .blocks
                .into_iter()
                .enumerate()
                .map(|(idx, block)| f(idx, block))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sknet::basic_block::SkBasicBlockConfig;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_layer_block_config() {
        let a_planes = 8;
        let b_planes = 16;

        let config = SkLayerBlockConfig::from(vec![
            SkBasicBlockConfig::new(a_planes, b_planes)
                .with_stride(2)
                .into(),
            SkBasicBlockConfig::new(b_planes, b_planes).into(),
        ]);

        config.expect_valid();

        assert_eq!(config.len(), 2);
        assert_eq!(config.in_planes(), a_planes);
        assert_eq!(config.out_planes(), b_planes);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.output_resolution([12, 24]), [6, 12]);
    }

    #[test]
    fn test_layer_block_config_invalid_chain() {
        let config = SkLayerBlockConfig::from(vec![
            SkBasicBlockConfig::new(8, 16).into(),
            SkBasicBlockConfig::new(8, 16).into(),
        ]);

        let err = config.try_validate().unwrap_err();
        assert!(err.contains("block[0].out_planes(16) != block[1].in_planes(8)"));
    }

    #[test]
    fn test_layer_block_forward() {
        let device = Default::default();

        let a_planes = 4;
        let b_planes = 8;

        let config = SkLayerBlockConfig::from(vec![
            SkBasicBlockConfig::new(a_planes, b_planes)
                .with_stride(2)
                .into(),
            SkBasicBlockConfig::new(b_planes, b_planes).into(),
        ]);

        let block: SkLayerBlock<TestBackend> = config.init(&device);

        assert_eq!(block.len(), 2);
        assert_eq!(block.in_planes(), a_planes);
        assert_eq!(block.out_planes(), b_planes);
        assert_eq!(block.stride(), 2);

        let batch_size = 2;
        let input = Tensor::ones([batch_size, a_planes, 8, 8], &device);

        let output = block.forward(input.clone());
        assert_shape_contract!(
            ["batch", "out_planes", "out_height", "out_width"],
            &output,
            &[
                ("batch", batch_size),
                ("out_planes", b_planes),
                ("out_height", 4),
                ("out_width", 4)
            ],
        );

        let mut expected = input;
        for block in block.blocks.iter() {
            expected = block.forward(expected);
        }
        output.to_data().assert_eq(&expected.to_data(), true);
    }
}
