//! Download settings.
//!
//! The download cache lives in the OS temp directory unless
//! `REZBUILD_UTILS_DOWNLOAD_CACHE_DIR` points somewhere else, and can be
//! switched off for a whole process with `REZBUILD_UTILS_DISABLE_DOWNLOAD_CACHE`.

use std::path::PathBuf;

use super::context::{ENV_PROJECT_NAME, ENV_PROJECT_VERSION};
use crate::download::paths;

/// Any non-empty value disables the download cache, whatever callers request.
pub const ENV_DISABLE_CACHE: &str = "REZBUILD_UTILS_DISABLE_DOWNLOAD_CACHE";
/// Overrides the download cache root directory.
pub const ENV_CACHE_DIR: &str = "REZBUILD_UTILS_DOWNLOAD_CACHE_DIR";

/// Placeholder used in cache container names outside of a build.
const UNKNOWN_LABEL_PART: &str = "none";

/// Settings for the fetcher and its content cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    /// Root directory of the download cache.
    pub cache_root: PathBuf,
    /// When true the cache is never read nor written.
    pub cache_disabled: bool,
    /// Human readable suffix for cache containers (`<name>-<version>`).
    pub cache_label: String,
}

impl DownloadSettings {
    /// Reads the settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let cache_root = lookup(ENV_CACHE_DIR)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(paths::default_cache_root);

        let cache_disabled = lookup(ENV_DISABLE_CACHE).is_some_and(|v| !v.is_empty());

        let name = lookup(ENV_PROJECT_NAME).unwrap_or_else(|| UNKNOWN_LABEL_PART.to_string());
        let version =
            lookup(ENV_PROJECT_VERSION).unwrap_or_else(|| UNKNOWN_LABEL_PART.to_string());

        Self {
            cache_root,
            cache_disabled,
            cache_label: format!("{name}-{version}"),
        }
    }

    /// Settings with an explicit cache root and the cache enabled.
    pub fn with_cache_root(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            cache_disabled: false,
            cache_label: format!("{UNKNOWN_LABEL_PART}-{UNKNOWN_LABEL_PART}"),
        }
    }

    /// Sets the cache container label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.cache_label = label.into();
        self
    }

    /// Forces the cache off, as the environment kill-switch does.
    pub fn disable_cache(mut self) -> Self {
        self.cache_disabled = true;
        self
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self::from_env()
    }
}
