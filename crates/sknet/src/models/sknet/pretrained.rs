//! # Pretrained `SkResNet` Models and Configs
//!
//! [`PREFAB_SKRESNET_MAP`] publishes the well-known Selective Kernel
//! `ResNet` configurations by name. No pretrained weight sets are
//! published for this family upstream, so every entry currently carries
//! an empty weights directory and [`load_pretrained_weights`] reports
//! the missing weights as an error.

use crate::cache::disk::DiskCacheConfig;
use crate::cache::prefabs::{StaticPreFabConfig, StaticPreFabMap};
use crate::cache::weights::PretrainedWeightsDescriptor;
use crate::models::sknet::factory::{skresnet18_config, skresnet26d_config, sksresnet18_config};
use crate::models::sknet::model::{SkResNet, SkResNetContractConfig};
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};

/// Well-known [`SkResNet`] configs and weights.
pub static PREFAB_SKRESNET_MAP: StaticPreFabMap<SkResNetContractConfig> = StaticPreFabMap {
    name: "sknet",
    description: "Well-known Selective Kernel ResNet configs",

    items: &[
        &StaticPreFabConfig {
            name: "skresnet18",
            description: "SKResNet-18 [2, 2, 2, 2] basic blocks",
            builder: || skresnet18_config(1000, 3),
            weights: None,
        },
        &StaticPreFabConfig {
            name: "sksresnet18",
            description: "SKResNet-18 with split-input branches",
            builder: || sksresnet18_config(1000, 3),
            weights: None,
        },
        &StaticPreFabConfig {
            name: "skresnet26d",
            description: "SKResNet-26-D [2, 2, 2, 2] bottlenecks, deep stem, avg-pool downsample",
            builder: || skresnet26d_config(1000, 3),
            weights: None,
        },
    ],
};

/// Load pretrained weights onto a [`SkResNet`] model.
///
/// Fetches the descriptor's weights through the disk cache and loads
/// them as a named-mpk burn record. All failure reporting (missing
/// URLs, download failures, record mismatches) is owned here.
pub fn load_pretrained_weights<B: Backend>(
    model: SkResNet<B>,
    weights: &PretrainedWeightsDescriptor,
    device: &B::Device,
) -> anyhow::Result<SkResNet<B>> {
    let path = weights.fetch_weights_to_disk_cache(&DiskCacheConfig::default())?;

    let record = NamedMpkFileRecorder::<FullPrecisionSettings>::new().load(path, device)?;

    Ok(model.load_record(record))
}
