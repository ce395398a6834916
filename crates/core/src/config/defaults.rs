//! Default values and functions for configuration

use std::time::Duration;

/// Coalescing window used when none is given
pub const DEFAULT_NOTIFICATION_LATENCY: Duration = Duration::from_secs(3);

pub(crate) const DEFAULT_IGNORE_SUB_DIRECTORIES: bool = false;

pub(crate) fn default_ignore_sub_directories() -> bool {
    DEFAULT_IGNORE_SUB_DIRECTORIES
}

pub(crate) fn default_latency_secs() -> f64 {
    DEFAULT_NOTIFICATION_LATENCY.as_secs_f64()
}

pub(crate) fn default_creation_flags() -> Vec<String> {
    vec!["USE_CF_TYPES".to_string(), "WATCH_ROOT".to_string()]
}
