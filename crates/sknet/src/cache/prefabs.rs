//! # Config Prefabs for Well-Known Model Configurations
//!
//! A prefab is a named, described builder for a well-known model
//! configuration, with an optional directory of pretrained weight sets.

use crate::cache::weights::{
    PretrainedWeightsDescriptor, PretrainedWeightsMap, StaticPretrainedWeightsMap,
};
use anyhow::bail;
use burn::config::Config;
use std::fmt::Debug;
use std::sync::Arc;

/// Static builder for a [`PreFabConfig`].
pub struct StaticPreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Name of the model config pre-fab.
    pub name: &'static str,

    /// Description of the model config pre-fab.
    pub description: &'static str,

    /// Builder function for the config.
    pub builder: fn() -> C,

    /// Optional pretrained weight sets for this config.
    pub weights: Option<&'static StaticPretrainedWeightsMap<'static>>,
}

impl<C> StaticPreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Convert to a [`PreFabConfig<C>`].
    pub fn to_prefab(&self) -> PreFabConfig<C> {
        let builder = self.builder;
        PreFabConfig {
            name: self.name.to_string(),
            description: self.description.to_string(),
            builder: Arc::new(builder),
            weights: self.weights.map(|w| w.to_directory()),
        }
    }
}

impl<C> From<&StaticPreFabConfig<C>> for PreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    fn from(config: &StaticPreFabConfig<C>) -> Self {
        config.to_prefab()
    }
}

impl<C> Debug for StaticPreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        self.to_prefab().fmt(f)
    }
}

/// A [`Config`] Well-Known Pre-Fab.
pub struct PreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Name of the model config pre-fab.
    pub name: String,

    /// Description of the model config pre-fab.
    pub description: String,

    /// Builder function for the config.
    pub builder: Arc<dyn Fn() -> C + Send + Sync>,

    /// Optional pretrained weight sets for this config.
    pub weights: Option<PretrainedWeightsMap>,
}

impl<C> Debug for PreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let pretty = f.alternate();

        let type_name = std::any::type_name::<C>();
        let mut handle = f.debug_struct(&format!("PreFabConfig<{}>", type_name));

        handle
            .field("name", &self.name)
            .field("description", &self.description);

        if pretty {
            handle.field("config", &self.new_config());
        }

        handle.finish()
    }
}

impl<C> PreFabConfig<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Build a new config.
    pub fn new_config(&self) -> C {
        (self.builder)()
    }

    /// Lookup the default (first registered) pretrained weight set.
    pub fn try_default_weights(&self) -> anyhow::Result<PretrainedWeightsDescriptor> {
        match self
            .weights
            .as_ref()
            .and_then(|w| w.items.values().next().cloned())
        {
            Some(descriptor) => Ok(descriptor),
            None => bail!("no pretrained weights registered for '{}'", self.name),
        }
    }
}

/// Static directory of [`StaticPreFabConfig`]s.
#[derive(Debug)]
pub struct StaticPreFabMap<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// Name of the map.
    pub name: &'static str,

    /// Description of the map.
    pub description: &'static str,

    /// The member prefabs.
    pub items: &'static [&'static StaticPreFabConfig<C>],
}

impl<C> StaticPreFabMap<C>
where
    C: 'static + Config + Debug + Clone,
{
    /// The registered prefab names, in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.items.iter().map(|item| item.name).collect()
    }

    /// Lookup a prefab by name.
    pub fn lookup_by_name(
        &self,
        name: &str,
    ) -> Option<PreFabConfig<C>> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .map(|item| item.to_prefab())
    }

    /// Lookup a prefab.
    pub fn try_lookup_by_name(
        &self,
        name: &str,
    ) -> anyhow::Result<PreFabConfig<C>> {
        match self.lookup_by_name(name) {
            Some(prefab) => Ok(prefab),
            None => bail!("Prefab not found in '{}': {}", self.name, name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::weights::StaticPretrainedWeightsDescriptor;
    use burn::nn::LinearConfig;

    static TEST_WEIGHTS: StaticPretrainedWeightsMap = StaticPretrainedWeightsMap {
        items: &[&StaticPretrainedWeightsDescriptor {
            name: "tv_in1k",
            description: "test weights",
            license: None,
            origin: None,
            urls: &["https://example.test/w.mpk"],
        }],
    };

    static TEST_MAP: StaticPreFabMap<LinearConfig> = StaticPreFabMap {
        name: "test",
        description: "test prefabs",
        items: &[
            &StaticPreFabConfig {
                name: "small",
                description: "a small linear",
                builder: || LinearConfig::new(2, 4),
                weights: Some(&TEST_WEIGHTS),
            },
            &StaticPreFabConfig {
                name: "large",
                description: "a large linear",
                builder: || LinearConfig::new(128, 256),
                weights: None,
            },
        ],
    };

    #[test]
    fn test_prefab_map_lookup() {
        assert_eq!(TEST_MAP.names(), vec!["small", "large"]);

        let prefab = TEST_MAP.try_lookup_by_name("small").unwrap();
        let config = prefab.new_config();
        assert_eq!(config.d_input, 2);
        assert_eq!(config.d_output, 4);

        assert!(TEST_MAP.try_lookup_by_name("missing").is_err());
    }

    #[test]
    fn test_prefab_default_weights() {
        let prefab = TEST_MAP.lookup_by_name("small").unwrap();
        let weights = prefab.try_default_weights().unwrap();
        assert_eq!(weights.name, "tv_in1k");

        let prefab = TEST_MAP.lookup_by_name("large").unwrap();
        let err = prefab.try_default_weights().unwrap_err();
        assert!(
            err.to_string()
                .contains("no pretrained weights registered for 'large'")
        );
    }
}
