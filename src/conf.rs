//! Configuration for the server binary

use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::{net, storage};

/// Prefix of the environment variables that override the configuration, nested keys are
/// separated by `__`, e.g. `REDIS_LITE__SERVER__PORT=7000`.
pub const ENV_PREFIX: &str = "REDIS_LITE";

/// All configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Network configuration.
    pub server: net::Config,
    /// Storage configuration.
    pub storage: storage::Config,
}

impl Configuration {
    /// Read the configuration from an optional file, then from the environment.
    ///
    /// Missing values take their defaults. The file format is picked from its extension.
    pub fn get(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(File::from(file));
        }
        builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()
    }
}
