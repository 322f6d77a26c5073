//! rezbuild Core Library
//!
//! Helpers for the build step of rez packages. It includes:
//!
//! - Build context and download settings read from the build environment
//! - Copying build files to the install directory
//! - Cached, progress-reporting downloads
//! - Archive extraction with payload relocation
//! - A download-and-install pipeline for third-party payloads
//! - Read-only locking of installed trees
//! - A thin wrapper over the `rez` command line

pub mod build_files;
pub mod config;
pub mod download;
pub mod error;
pub mod fs;
pub mod logging;
pub mod rez;

// Re-exports for convenience
pub use build_files::{copy_build_files, move_directory_content, set_path_read_only, set_path_writable};
pub use config::{BuildContext, DownloadSettings};
pub use error::{BuildError, Result};

// Re-export downloads
pub use download::{
    clear_download_cache, download_and_install_build, download_file, extract_archive,
    extract_archive_with_reference, ArchiveFormat, ContentCache, FetchOutcome, Fetcher, Installer,
    ProgressReporter, TerminalProgress,
};

pub use logging::init_logging;
pub use rez::{python_short_version, RezCli};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
