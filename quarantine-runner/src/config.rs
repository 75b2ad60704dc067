// Copyright (c) The quarantine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pipeline configuration.
//!
//! Configuration is read from an embedded default file, overlaid with an
//! optional user file (by default `.config/quarantine.toml` within the store
//! directory).

use crate::{
    errors::{ConfigParseError, ConfigParseErrorKind, UnknownPublisherError},
    quarantine::PropagationOptions,
    registry::{self, PublisherDescriptor},
};
use camino::Utf8Path;
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::{collections::BTreeSet, num::NonZero};
use tracing::warn;

/// Trait for handling configuration warnings.
///
/// The default implementation, [`DefaultConfigWarnings`], logs them.
pub trait ConfigWarnings {
    /// Handle unknown configuration keys found in a config file.
    fn unknown_config_keys(&mut self, config_file: &Utf8Path, unknown: &BTreeSet<String>);
}

/// Logs configuration warnings.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultConfigWarnings;

impl ConfigWarnings for DefaultConfigWarnings {
    fn unknown_config_keys(&mut self, config_file: &Utf8Path, unknown: &BTreeSet<String>) {
        let mut unknown_str = String::new();
        if unknown.len() == 1 {
            unknown_str.push_str("key: ");
            unknown_str.push_str(unknown.iter().next().expect("len is 1"));
        } else {
            unknown_str.push_str("keys:\n");
            for ignored_key in unknown {
                unknown_str.push('\n');
                unknown_str.push_str("  - ");
                unknown_str.push_str(ignored_key);
            }
        }

        warn!("in config file {config_file}, ignoring unknown configuration {unknown_str}");
    }
}

/// The configuration of a pipeline.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    name: String,
    publishers: Vec<&'static PublisherDescriptor>,
    propagation: PropagationOptions,
}

impl PipelineConfig {
    /// The path of the user config file, relative to the store directory.
    pub const CONFIG_PATH: &'static str = ".config/quarantine.toml";

    /// The default configuration, embedded at build time.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the configuration for a store.
    ///
    /// If `config_file` is `None`, `.config/quarantine.toml` within
    /// `store_dir` is read if it exists.
    pub fn from_sources(
        store_dir: &Utf8Path,
        config_file: Option<&Utf8Path>,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = store_dir.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (deserialized, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;
        if !unknown.is_empty() {
            warnings.unknown_config_keys(&config_file, &unknown);
        }

        deserialized
            .into_config()
            .map_err(|error| ConfigParseError::new(&config_file, error.into()))
    }

    /// Returns the default configuration.
    pub fn default_config() -> Self {
        let (deserialized, _) = Self::build_and_deserialize_config(&Self::make_default_config())
            .expect("default config is always valid");
        deserialized
            .into_config()
            .expect("default config only names known publishers")
    }

    /// Returns the pipeline's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the publishers configured for this pipeline.
    pub fn publishers(&self) -> &[&'static PublisherDescriptor] {
        &self.publishers
    }

    /// Returns true if a quarantine-aware consumer is configured.
    ///
    /// Quarantine records are only shown for such pipelines.
    pub fn is_quarantine_consumer_configured(&self) -> bool {
        self.publishers
            .iter()
            .any(|descriptor| descriptor.is_quarantine_consumer())
    }

    /// Returns the options for quarantine propagation.
    pub fn propagation_options(&self) -> PropagationOptions {
        self.propagation
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(PipelineConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: PipelineConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // The config crate also reports the key, so drop it to avoid
                // printing it twice.
                let path = error.path().clone();
                let config_error = error.into_inner();
                let error = match config_error {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PipelineConfigDeserialize {
    pipeline: PipelineDeserialize,
    #[serde(default)]
    quarantine: QuarantineDeserialize,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PipelineDeserialize {
    name: String,
    publishers: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct QuarantineDeserialize {
    #[serde(default)]
    max_history_hops: Option<NonZero<usize>>,
}

impl PipelineConfigDeserialize {
    fn into_config(self) -> Result<PipelineConfig, UnknownPublisherError> {
        let publishers = self
            .pipeline
            .publishers
            .iter()
            .map(|id| {
                registry::find_publisher(id).ok_or_else(|| {
                    UnknownPublisherError::new(id.clone(), registry::known_publisher_ids())
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PipelineConfig {
            name: self.pipeline.name,
            publishers,
            propagation: PropagationOptions {
                max_history_hops: self.quarantine.max_history_hops,
            },
        })
    }
}
