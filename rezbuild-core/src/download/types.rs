//! Core types for the download subsystem.

use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// Archive Formats
// ============================================================================

/// Archive formats that can be extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    /// ZIP archive (.zip)
    Zip,
    /// Gzip-compressed tar archive (.tar.gz, .tgz)
    TarGz,
    /// XZ-compressed tar archive (.tar.xz, .txz)
    TarXz,
}

impl ArchiveFormat {
    /// Infers the archive format from a URL or file name.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
            Some(Self::TarXz)
        } else {
            None
        }
    }

    /// Infers the archive format from a file path.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(Self::from_name)
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
            Self::TarXz => "tar.xz",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Fetch Outcome
// ============================================================================

/// How a fetch was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Copied from the download cache; no transfer happened.
    Cached {
        /// The cache file the destination was copied from.
        cache_file: PathBuf,
    },
    /// Transferred from the source.
    Downloaded {
        /// Number of bytes written to the destination.
        bytes: u64,
        /// The cache file created from this download, if caching was on.
        cache_file: Option<PathBuf>,
    },
}

impl FetchOutcome {
    /// True when the destination came from the cache.
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached { .. })
    }
}
