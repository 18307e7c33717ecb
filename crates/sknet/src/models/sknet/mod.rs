//! # Selective Kernel `ResNet`

pub mod basic_block;
pub mod bottleneck_block;
pub mod data_config;
pub mod downsample;
pub mod factory;
pub mod layer_block;
pub mod model;
pub mod pretrained;
pub mod residual_block;
pub mod stem;
pub mod util;

pub use data_config::{IMAGENET_DEFAULT_MEAN, IMAGENET_DEFAULT_STD, ModelDataConfig};
pub use factory::{
    skresnet18, skresnet18_config, skresnet26d, skresnet26d_config, sksresnet18,
    sksresnet18_config,
};
pub use model::{SkResNet, SkResNetContractConfig, SkResNetStructureConfig};
pub use pretrained::{PREFAB_SKRESNET_MAP, load_pretrained_weights};
