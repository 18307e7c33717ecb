//! # Named Model Factories
//!
//! Each architecture ships as a pair:
//! * a `*_config` function returning the [`SkResNetContractConfig`],
//!   for callers who want to override settings before `init`;
//! * a factory taking ``(pretrained, num_classes, in_chans, device)``
//!   and returning a constructed model with its preprocessing metadata
//!   attached.

use crate::layers::attention::selective_kernel::SelectiveKernelConfig;
use crate::models::sknet::data_config::ModelDataConfig;
use crate::models::sknet::model::{SkResNet, SkResNetContractConfig};
use crate::models::sknet::pretrained::{PREFAB_SKRESNET_MAP, load_pretrained_weights};
use crate::models::sknet::stem::SkStemContractConfig;
use burn::prelude::Backend;

/// Build the [`SkResNetContractConfig`] for `skresnet18`.
///
/// Basic blocks, depths ``[2, 2, 2, 2]``, default stem, and a reduced
/// attention floor suited to the narrow 18-layer widths.
pub fn skresnet18_config(
    num_classes: usize,
    in_chans: usize,
) -> SkResNetContractConfig {
    SkResNetContractConfig::new([2, 2, 2, 2], num_classes)
        .with_in_channels(in_chans)
        .with_sk(SelectiveKernelConfig::new().with_min_attn_channels(16))
}

/// Build the [`SkResNetContractConfig`] for `sksresnet18`.
///
/// Identical to [`skresnet18_config`] except input channels are split
/// across the selective kernel branches.
pub fn sksresnet18_config(
    num_classes: usize,
    in_chans: usize,
) -> SkResNetContractConfig {
    SkResNetContractConfig::new([2, 2, 2, 2], num_classes)
        .with_in_channels(in_chans)
        .with_sk(
            SelectiveKernelConfig::new()
                .with_min_attn_channels(16)
                .with_split_input(true),
        )
}

/// Build the [`SkResNetContractConfig`] for `skresnet26d`.
///
/// Bottleneck blocks, depths ``[2, 2, 2, 2]``, deep stem, avg-pool
/// downsamples, and true wide-kernel branches.
pub fn skresnet26d_config(
    num_classes: usize,
    in_chans: usize,
) -> SkResNetContractConfig {
    SkResNetContractConfig::new([2, 2, 2, 2], num_classes)
        .with_in_channels(in_chans)
        .with_bottleneck(true)
        .with_stem(SkStemContractConfig::Deep { stem_width: 32 })
        .with_avg_down(true)
        .with_sk(SelectiveKernelConfig::new().with_keep_3x3(false))
}

fn build_model<B: Backend>(
    name: &str,
    config: SkResNetContractConfig,
    pretrained: bool,
    device: &B::Device,
) -> anyhow::Result<SkResNet<B>> {
    let data_cfg = ModelDataConfig::default()
        .with_num_classes(config.num_classes)
        .with_in_channels(config.in_channels);

    let model = config.init(device).with_default_cfg(data_cfg);

    if pretrained {
        let prefab = PREFAB_SKRESNET_MAP.try_lookup_by_name(name)?;
        let weights = prefab.try_default_weights()?;
        return load_pretrained_weights(model, &weights, device);
    }

    Ok(model)
}

/// Construct a `skresnet18` model.
pub fn skresnet18<B: Backend>(
    pretrained: bool,
    num_classes: usize,
    in_chans: usize,
    device: &B::Device,
) -> anyhow::Result<SkResNet<B>> {
    build_model(
        "skresnet18",
        skresnet18_config(num_classes, in_chans),
        pretrained,
        device,
    )
}

/// Construct a `sksresnet18` model.
pub fn sksresnet18<B: Backend>(
    pretrained: bool,
    num_classes: usize,
    in_chans: usize,
    device: &B::Device,
) -> anyhow::Result<SkResNet<B>> {
    build_model(
        "sksresnet18",
        sksresnet18_config(num_classes, in_chans),
        pretrained,
        device,
    )
}

/// Construct a `skresnet26d` model.
pub fn skresnet26d<B: Backend>(
    pretrained: bool,
    num_classes: usize,
    in_chans: usize,
    device: &B::Device,
) -> anyhow::Result<SkResNet<B>> {
    build_model(
        "skresnet26d",
        skresnet26d_config(num_classes, in_chans),
        pretrained,
        device,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::prelude::Tensor;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_factory_data_configs() {
        let device = Default::default();

        let model: SkResNet<TestBackend> = skresnet18(false, 10, 3, &device).unwrap();
        let cfg = model.default_cfg().unwrap();
        assert_eq!(cfg.num_classes, 10);
        assert_eq!(cfg.input_size, [3, 224, 224]);

        let model: SkResNet<TestBackend> = sksresnet18(false, 100, 1, &device).unwrap();
        let cfg = model.default_cfg().unwrap();
        assert_eq!(cfg.num_classes, 100);
        assert_eq!(cfg.input_size, [1, 224, 224]);

        let model: SkResNet<TestBackend> = skresnet26d(false, 10, 3, &device).unwrap();
        let cfg = model.default_cfg().unwrap();
        assert_eq!(cfg.num_classes, 10);
        assert_eq!(cfg.input_size, [3, 224, 224]);
    }

    #[test]
    fn test_sksresnet18_differs_only_in_split_input() {
        let a = skresnet18_config(1000, 3);
        let b = sksresnet18_config(1000, 3);

        assert!(!a.sk.split_input);
        assert!(b.sk.split_input);

        // Everything else matches.
        assert_eq!(a.layers, b.layers);
        assert_eq!(a.bottleneck, b.bottleneck);
        assert_eq!(a.stem, b.stem);
        assert_eq!(a.avg_down, b.avg_down);
        assert_eq!(a.cardinality, b.cardinality);
        assert_eq!(a.base_width, b.base_width);
        assert_eq!(a.sk.clone().with_split_input(true), b.sk);
    }

    #[test]
    fn test_skresnet18_forward() {
        let device = Default::default();

        let num_classes = 10;
        let model: SkResNet<TestBackend> = skresnet18(false, num_classes, 3, &device).unwrap();

        let input = Tensor::ones([1, 3, 224, 224], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [1, num_classes]);
    }

    #[test]
    fn test_sksresnet18_forward() {
        let device = Default::default();

        let model: SkResNet<TestBackend> = sksresnet18(false, 7, 3, &device).unwrap();

        let input = Tensor::ones([1, 3, 96, 96], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [1, 7]);
    }

    #[test]
    fn test_skresnet26d_forward() {
        let device = Default::default();

        let model: SkResNet<TestBackend> = skresnet26d(false, 7, 3, &device).unwrap();

        // Deep stem, avg-pool downsamples, bottleneck stages.
        assert!(model.stem.cna3.is_some());

        let input = Tensor::ones([1, 3, 96, 96], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [1, 7]);
    }

    #[test]
    fn test_pretrained_reports_missing_weights() {
        let device = Default::default();

        let err = skresnet18::<TestBackend>(true, 1000, 3, &device).unwrap_err();
        assert!(
            err.to_string()
                .contains("no pretrained weights registered for 'skresnet18'")
        );
    }
}
