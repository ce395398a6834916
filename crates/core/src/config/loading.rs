//! Settings loading from files and environment variables

use crate::error::{Error, Result};
use config::{Config as ConfigLib, ConfigBuilder as LibConfigBuilder, Environment, File};
use std::path::Path;
use tracing::{debug, info};

use super::defaults::*;
use super::{default_settings_path, StreamSettings};

/// Helper to set a config default with consistent error mapping
fn set_config_default<T: Into<config::Value>>(
    builder: LibConfigBuilder<config::builder::DefaultState>,
    key: &str,
    value: T,
) -> Result<LibConfigBuilder<config::builder::DefaultState>> {
    builder
        .set_default(key, value)
        .map_err(|e| Error::config(format!("Failed to set {key} default: {e}")))
}

impl StreamSettings {
    /// Loads settings from a TOML file with environment variable overrides
    ///
    /// Environment variables are prefixed with `FSSTREAM_`; list values are
    /// comma separated. For example:
    /// - `FSSTREAM_LATENCY_SECS=0.5`
    /// - `FSSTREAM_EXCLUDED_PATHS=/tmp/a/cache,/tmp/a/logs`
    pub fn from_file(path: &Path) -> Result<Self> {
        let builder = ConfigLib::builder();

        let builder = set_config_default(
            builder,
            "ignore_sub_directories",
            default_ignore_sub_directories(),
        )?;
        let builder = set_config_default(builder, "latency_secs", default_latency_secs())?;
        let mut builder =
            set_config_default(builder, "creation_flags", default_creation_flags())?;

        // Add the settings file if it exists
        if path.exists() {
            info!("Loading settings from {:?}", path);
            builder = builder.add_source(File::from(path));
        } else {
            debug!("No settings file at {:?}; using defaults", path);
        }

        builder = builder.add_source(
            Environment::with_prefix("FSSTREAM")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("watched_paths")
                .with_list_parse_key("excluded_paths")
                .with_list_parse_key("creation_flags"),
        );

        let settings = builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build config: {e}")))?;

        let settings: Self = settings
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize config: {e}")))?;
        debug!(
            "Settings: {} watched path(s), {} exclusion(s), latency {}s",
            settings.watched_paths.len(),
            settings.excluded_paths.len(),
            settings.latency_secs
        );
        Ok(settings)
    }

    /// Creates settings from a TOML string (useful for testing)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("Failed to parse TOML: {e}")))
    }

    /// Load settings from a single file
    ///
    /// Precedence (lowest to highest):
    /// 1. Hardcoded defaults
    /// 2. Settings file (~/.fsstream/config.toml or custom --config path)
    /// 3. Environment variables (FSSTREAM_*)
    pub fn load(settings_path: Option<&Path>) -> Result<Self> {
        let path = match settings_path {
            Some(p) => p.to_path_buf(),
            None => default_settings_path()?,
        };
        Self::from_file(&path)
    }
}
