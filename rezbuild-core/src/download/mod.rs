//! Cached downloads and archive installs for rez builds.
//!
//! # Architecture
//!
//! - `types`: Core types (ArchiveFormat, FetchOutcome)
//! - `paths`: Cache root and download file name resolution
//! - `cache`: Content cache keyed by URL hash
//! - `progress`: Progress reporters (terminal bar/spinner, silent)
//! - `fetcher`: Blocking streamed downloads through the cache
//! - `extractor`: Archive extraction and payload relocation
//! - `installer`: Download-and-install pipeline for build scripts
//!
//! # Example
//!
//! ```ignore
//! use rezbuild::download::Installer;
//!
//! // Inside a rez build: REZ_BUILD_* variables are set.
//! let installer = Installer::from_env()?;
//! let ffmpeg_dir = installer.download_and_install_build(
//!     "https://example.com/ffmpeg-6.1-win64.zip",
//!     "ffmpeg",
//!     true,
//!     true,
//! )?;
//! ```

pub mod cache;
pub mod extractor;
pub mod fetcher;
pub mod installer;
pub mod paths;
pub mod progress;
pub mod types;

// Re-export commonly used types
pub use cache::{hash_url, ContentCache};
pub use extractor::{
    extract_archive, extract_archive_to, extract_archive_with_reference, relocate_payload,
};
pub use fetcher::Fetcher;
pub use installer::{download_and_install_build, Installer};
pub use paths::default_cache_root;
pub use progress::{NoProgress, ProgressReporter, ProgressState, ProgressTracker, TerminalProgress};
pub use types::{ArchiveFormat, FetchOutcome};

use crate::config::DownloadSettings;
use crate::error::Result;

/// Downloads `url` to `target_file` with a terminal progress bar.
///
/// Uses the download settings of the process environment.
pub fn download_file(url: &str, target_file: &std::path::Path, use_cache: bool) -> Result<FetchOutcome> {
    let fetcher = Fetcher::new(DownloadSettings::from_env());
    let mut progress = TerminalProgress::new("downloading");
    fetcher.fetch(url, target_file, use_cache, &mut progress)
}

/// Deletes every file cached by previous downloads.
pub fn clear_download_cache() -> Result<()> {
    ContentCache::new(DownloadSettings::from_env().cache_root).clear()
}
