//! Error types shared by the build helpers.
//!
//! Every operation in this crate is terminal on failure: errors bubble up to
//! the build script, which is expected to abort the build.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Boxed error used for the underlying cause of transport and archive failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the build helpers.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A build environment variable is missing; the helper was called outside
    /// of a rez build.
    #[error("Build environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The remote resource could not be fetched (connection, DNS, HTTP status
    /// or unreadable local source).
    #[error("Failed to fetch {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to extract {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("Reference pattern {pattern:?} matched nothing under {}", root.display())]
    ReferenceNotFound { pattern: String, root: PathBuf },

    /// A directory that should have been emptied by a relocation still holds
    /// entries.
    #[error("{} still has content after relocation: {source}", path.display())]
    Integrity {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Path already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("Cache entry for {url} was not written to {}", path.display())]
    CacheWrite { url: String, path: PathBuf },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, BuildError>;

impl BuildError {
    /// Wraps an I/O error with a short description of what was attempted.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Builds a transport error from any underlying cause.
    pub fn transport(url: &str, source: impl Into<BoxError>) -> Self {
        Self::Transport {
            url: url.to_string(),
            source: source.into(),
        }
    }

    /// Builds an archive error for the given archive path.
    pub fn archive(path: &Path, source: impl Into<BoxError>) -> Self {
        Self::Archive {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }

    /// Returns true when the error reports an existing destination.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::AlreadyExists { .. } => true,
            Self::Io { source, .. } => source.kind() == io::ErrorKind::AlreadyExists,
            _ => false,
        }
    }
}

/// `with_context`-style helper for `std::io` results.
pub trait IoResultExt<T> {
    /// Attaches a lazily built context message to an I/O error.
    fn with_path_context<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn with_path_context<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| BuildError::io(context(), err))
    }
}
