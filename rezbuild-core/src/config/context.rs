//! The rez build environment context.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{BuildError, Result};

/// Name of the package being built.
pub const ENV_PROJECT_NAME: &str = "REZ_BUILD_PROJECT_NAME";
/// Version of the package being built.
pub const ENV_PROJECT_VERSION: &str = "REZ_BUILD_PROJECT_VERSION";
/// Directory holding the package sources.
pub const ENV_SOURCE_PATH: &str = "REZ_BUILD_SOURCE_PATH";
/// Directory the package is installed to.
pub const ENV_INSTALL_PATH: &str = "REZ_BUILD_INSTALL_PATH";
/// Set to `1` by rez when the build is an install.
pub const ENV_BUILD_INSTALL: &str = "REZ_BUILD_INSTALL";

/// Identity and paths of the package currently being built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    pub project_name: String,
    pub project_version: String,
    pub source_dir: PathBuf,
    pub install_dir: PathBuf,
    /// True when rez runs the build with `--install`.
    pub installing: bool,
}

impl BuildContext {
    /// Reads the context from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::MissingEnv`] when called outside of a rez build.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the context through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or(BuildError::MissingEnv(key))
        };

        Ok(Self {
            project_name: require(ENV_PROJECT_NAME)?,
            project_version: require(ENV_PROJECT_VERSION)?,
            source_dir: PathBuf::from(require(ENV_SOURCE_PATH)?),
            install_dir: PathBuf::from(require(ENV_INSTALL_PATH)?),
            installing: lookup(ENV_BUILD_INSTALL).as_deref() == Some("1"),
        })
    }

    /// Creates a context from explicit values.
    pub fn new(
        project_name: impl Into<String>,
        project_version: impl Into<String>,
        source_dir: impl Into<PathBuf>,
        install_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            project_name: project_name.into(),
            project_version: project_version.into(),
            source_dir: source_dir.into(),
            install_dir: install_dir.into(),
            installing: false,
        }
    }

    /// `<name>-<version>`, used to label temporary and cache directories.
    pub fn label(&self) -> String {
        format!("{}-{}", self.project_name, self.project_version)
    }

    /// Resolves a path relative to the build source directory.
    ///
    /// Absolute paths are returned unchanged.
    pub fn source_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.source_dir.join(path)
        }
    }
}

impl fmt::Display for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.project_name, self.project_version)
    }
}
