//! Stream configuration
//!
//! [`StreamConfig`] is the immutable snapshot a subscription is opened with.
//! [`StreamSettings`] is its file/environment form, loaded from TOML and
//! `FSSTREAM_*` variables and converted with
//! [`StreamSettings::into_stream_config`].

mod defaults;
mod loading;


use crate::error::{Error, Result};
use crate::event::{EventIdentifier, StreamCreationFlags};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use defaults::DEFAULT_NOTIFICATION_LATENCY;

use defaults::*;

/// Returns the path to the default settings file
///
/// Settings are stored at `~/.fsstream/config.toml`.
pub fn default_settings_path() -> Result<PathBuf> {
    let home_dir = dirs::home_dir()
        .ok_or_else(|| Error::config("Unable to determine home directory".to_string()))?;
    Ok(home_dir.join(".fsstream").join("config.toml"))
}

/// Immutable snapshot of what a subscription watches and how
///
/// Changing any of it on a live manager means rebuilding the subscription;
/// the `with_*` methods return a new snapshot for that purpose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    watched_paths: Vec<PathBuf>,
    excluded_paths: Vec<PathBuf>,
    ignore_sub_directories: bool,
    notification_latency: Duration,
    since_event_identifier: EventIdentifier,
    creation_flags: StreamCreationFlags,
}

impl StreamConfig {
    /// Start a configuration for the given watch roots
    pub fn builder<I, P>(watched_paths: I) -> StreamConfigBuilder
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        StreamConfigBuilder::new(watched_paths)
    }

    pub fn watched_paths(&self) -> &[PathBuf] {
        &self.watched_paths
    }

    pub fn excluded_paths(&self) -> &[PathBuf] {
        &self.excluded_paths
    }

    pub fn ignore_sub_directories(&self) -> bool {
        self.ignore_sub_directories
    }

    pub fn notification_latency(&self) -> Duration {
        self.notification_latency
    }

    pub fn since_event_identifier(&self) -> EventIdentifier {
        self.since_event_identifier
    }

    pub fn creation_flags(&self) -> StreamCreationFlags {
        self.creation_flags
    }

    /// Whether `path` is one of the watch roots or lies under one
    pub fn is_watching(&self, path: &Path) -> bool {
        self.watched_paths.iter().any(|root| path.starts_with(root))
    }

    /// Same configuration with a different exclusion set
    pub fn with_excluded_paths<I, P>(&self, excluded_paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            excluded_paths: dedup_paths(excluded_paths),
            ..self.clone()
        }
    }

    pub fn with_ignore_sub_directories(&self, ignore: bool) -> Self {
        Self {
            ignore_sub_directories: ignore,
            ..self.clone()
        }
    }

    /// Same configuration resuming after `since`
    pub fn with_since_event_identifier(&self, since: EventIdentifier) -> Self {
        Self {
            since_event_identifier: since,
            ..self.clone()
        }
    }

    /// Check the contract a subscription needs before any native resource
    /// is requested
    pub fn validate(&self) -> Result<()> {
        if self.watched_paths.is_empty() {
            return Err(Error::invalid_configuration(
                "watched paths must not be empty",
            ));
        }

        if let Some(path) = self.watched_paths.iter().find(|p| !p.is_absolute()) {
            return Err(Error::invalid_configuration(format!(
                "watched path must be absolute: {}",
                path.display()
            )));
        }

        if let Some(path) = self.excluded_paths.iter().find(|p| !p.is_absolute()) {
            return Err(Error::invalid_configuration(format!(
                "excluded path must be absolute: {}",
                path.display()
            )));
        }

        Ok(())
    }
}

/// Builder for StreamConfig
#[derive(Debug)]
pub struct StreamConfigBuilder {
    watched_paths: Vec<PathBuf>,
    excluded_paths: Vec<PathBuf>,
    ignore_sub_directories: bool,
    notification_latency: Duration,
    since_event_identifier: EventIdentifier,
    creation_flags: StreamCreationFlags,
}

impl StreamConfigBuilder {
    fn new<I, P>(watched_paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            watched_paths: watched_paths.into_iter().map(Into::into).collect(),
            excluded_paths: Vec::new(),
            ignore_sub_directories: DEFAULT_IGNORE_SUB_DIRECTORIES,
            notification_latency: DEFAULT_NOTIFICATION_LATENCY,
            since_event_identifier: EventIdentifier::SINCE_NOW,
            creation_flags: StreamCreationFlags::default(),
        }
    }

    /// Replace the exclusion set
    pub fn excluded_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.excluded_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Add one excluded path or subtree
    pub fn exclude(mut self, path: impl Into<PathBuf>) -> Self {
        self.excluded_paths.push(path.into());
        self
    }

    /// Restrict reporting to direct changes of the watch roots
    pub fn ignore_sub_directories(mut self, ignore: bool) -> Self {
        self.ignore_sub_directories = ignore;
        self
    }

    /// Set the coalescing window
    pub fn notification_latency(mut self, latency: Duration) -> Self {
        self.notification_latency = latency;
        self
    }

    /// Resume after a previously delivered identifier
    pub fn since_event_identifier(mut self, since: EventIdentifier) -> Self {
        self.since_event_identifier = since;
        self
    }

    pub fn creation_flags(mut self, flags: StreamCreationFlags) -> Self {
        self.creation_flags = flags;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<StreamConfig> {
        let config = StreamConfig {
            watched_paths: dedup_paths(self.watched_paths),
            excluded_paths: dedup_paths(self.excluded_paths),
            ignore_sub_directories: self.ignore_sub_directories,
            notification_latency: self.notification_latency,
            since_event_identifier: self.since_event_identifier,
            creation_flags: self.creation_flags,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Drop repeated paths, keeping first-seen order
fn dedup_paths<I, P>(paths: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    let mut unique: Vec<PathBuf> = Vec::new();
    for path in paths.into_iter().map(Into::into) {
        if !unique.contains(&path) {
            unique.push(path);
        }
    }
    unique
}

/// File and environment form of a stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Roots to watch
    #[serde(default)]
    pub watched_paths: Vec<PathBuf>,

    /// Paths or subtrees whose changes are suppressed
    #[serde(default)]
    pub excluded_paths: Vec<PathBuf>,

    /// Restrict reporting to direct changes of the watch roots
    #[serde(default = "default_ignore_sub_directories")]
    pub ignore_sub_directories: bool,

    /// Coalescing window in seconds
    #[serde(default = "default_latency_secs")]
    pub latency_secs: f64,

    /// Identifier to resume after; absent means "since now"
    #[serde(default)]
    pub since: Option<u64>,

    /// Creation flag names, e.g. `FILE_EVENTS`
    #[serde(default = "default_creation_flags")]
    pub creation_flags: Vec<String>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            watched_paths: Vec::new(),
            excluded_paths: Vec::new(),
            ignore_sub_directories: default_ignore_sub_directories(),
            latency_secs: default_latency_secs(),
            since: None,
            creation_flags: default_creation_flags(),
        }
    }
}

impl StreamSettings {
    /// Parse the creation flag names
    pub fn parsed_creation_flags(&self) -> Result<StreamCreationFlags> {
        self.creation_flags
            .iter()
            .try_fold(StreamCreationFlags::empty(), |acc, name| {
                let normalized = name.trim().to_ascii_uppercase();
                StreamCreationFlags::from_name(&normalized)
                    .map(|flag| acc | flag)
                    .ok_or_else(|| {
                        Error::config(format!(
                            "Unknown creation flag '{name}'. Must be one of: {:?}",
                            StreamCreationFlags::all()
                                .iter_names()
                                .map(|(n, _)| n)
                                .collect::<Vec<_>>()
                        ))
                    })
            })
    }

    /// The coalescing window as a duration
    pub fn notification_latency(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.latency_secs).map_err(|_| {
            Error::config(format!(
                "latency_secs must be a non-negative number of seconds, got {}",
                self.latency_secs
            ))
        })
    }

    /// Convert into a validated stream configuration
    pub fn into_stream_config(self) -> Result<StreamConfig> {
        let creation_flags = self.parsed_creation_flags()?;
        let latency = self.notification_latency()?;
        let since = self
            .since
            .map(EventIdentifier::new)
            .unwrap_or(EventIdentifier::SINCE_NOW);

        StreamConfig::builder(self.watched_paths)
            .excluded_paths(self.excluded_paths)
            .ignore_sub_directories(self.ignore_sub_directories)
            .notification_latency(latency)
            .since_event_identifier(since)
            .creation_flags(creation_flags)
            .build()
    }
}
