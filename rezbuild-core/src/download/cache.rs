//! Content cache for downloaded files.
//!
//! Each cached download lives in its own container directory under the cache
//! root. Container names start with the SHA-256 of the source URL, followed by
//! a random part and the `<name>-<version>` label of the build that created
//! it, so concurrent builds fetching the same URL never write into the same
//! container. Containers hold exactly one file. A container is filled under a
//! dot-prefixed staging name and renamed into place once its file is complete.
//!
//! ```text
//! {cache_root}/
//!   3f5a...c2e1k8Jd0qffmpeg-6.1.0/
//!     ffmpeg-6.1.zip
//! ```

use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{BuildError, IoResultExt, Result};
use crate::fs::copy_file_with_metadata;

/// Name prefix of containers still being written.
const STAGING_PREFIX: &str = ".";

/// Download cache rooted at a directory shared by every build on the host.
#[derive(Debug, Clone)]
pub struct ContentCache {
    root: PathBuf,
}

impl ContentCache {
    /// Creates a cache handle. Nothing is touched on disk until [`store`](Self::store).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Finds the cached copy of `url`, if any.
    ///
    /// Containers are tried in sorted order; the first one holding a file
    /// wins. Never fails: an unreadable cache is reported as a miss.
    pub fn lookup(&self, url: &str) -> Option<PathBuf> {
        if !self.root.is_dir() {
            return None;
        }

        let prefix = hash_url(url);
        let containers = match sorted_entries(&self.root) {
            Ok(entries) => entries
                .into_iter()
                .filter(|path| path.is_dir() && file_name_starts_with(path, &prefix))
                .collect::<Vec<_>>(),
            Err(err) => {
                debug!("Cannot scan cache root {}: {}", self.root.display(), err);
                return None;
            }
        };

        if containers.len() > 1 {
            // Concurrent builds each store their own container.
            warn!(
                "Found {} download caches for {}: {:?}",
                containers.len(),
                url,
                containers
            );
        }

        containers
            .iter()
            .find_map(|container| first_cached_file(container))
    }

    /// Stores a copy of `file`, downloaded from `url`, and returns the cached path.
    ///
    /// `label` is appended to the container name to tell builds apart.
    ///
    /// # Errors
    ///
    /// Fails when the cache root or container cannot be created, or when the
    /// copy did not produce the cache file.
    pub fn store(&self, file: &Path, url: &str, label: &str) -> Result<PathBuf> {
        if !self.root.exists() {
            debug!("Creating download cache root {}", self.root.display());
            fs::create_dir_all(&self.root).with_path_context(|| {
                format!("Failed to create cache root {}", self.root.display())
            })?;
        }

        let file_name = file.file_name().ok_or_else(|| {
            let context = format!("Cannot cache {}: no file name", file.display());
            BuildError::io(context, std::io::ErrorKind::InvalidInput.into())
        })?;

        // Filled under a hidden name, so lookups never see a partial container.
        let staging = tempfile::Builder::new()
            .prefix(&format!("{STAGING_PREFIX}{}", hash_url(url)))
            .suffix(&sanitize_label(label))
            .tempdir_in(&self.root)
            .with_path_context(|| {
                format!("Failed to create cache container in {}", self.root.display())
            })?;

        let staged_file = staging.path().join(file_name);
        debug!("Creating cache copy {}", staged_file.display());
        copy_file_with_metadata(file, &staged_file)?;

        if !staged_file.is_file() {
            return Err(BuildError::CacheWrite {
                url: url.to_string(),
                path: staged_file,
            });
        }

        let container = published_container(staging.path())?;
        let staged = staging.keep();
        if let Err(err) = fs::rename(&staged, &container) {
            let _ = fs::remove_dir_all(&staged);
            return Err(BuildError::io(
                format!("Failed to publish cache container {}", container.display()),
                err,
            ));
        }

        Ok(container.join(file_name))
    }

    /// Deletes every cached download. Does nothing if the cache does not exist.
    pub fn clear(&self) -> Result<()> {
        if !self.root.exists() {
            return Ok(());
        }
        info!("Removing download cache {} ...", self.root.display());
        fs::remove_dir_all(&self.root)
            .with_path_context(|| format!("Failed to remove {}", self.root.display()))
    }

    /// True when the cache root is missing or holds no container.
    pub fn is_empty(&self) -> bool {
        match fs::read_dir(&self.root) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }
}

/// Stable hash of a URL: lowercase hex SHA-256 of its UTF-8 bytes.
pub fn hash_url(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format_sha256_hex(&digest)
}

/// Formats a SHA256 hash as lowercase hex.
fn format_sha256_hex(hash: &[u8]) -> String {
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

fn file_name_starts_with(path: &Path, prefix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(prefix))
}

/// Final name of a staging container: the staging name without its prefix.
fn published_container(staging: &Path) -> Result<PathBuf> {
    staging
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix(STAGING_PREFIX))
        .zip(staging.parent())
        .map(|(name, root)| root.join(name))
        .ok_or_else(|| {
            let context = format!("Unexpected cache staging path {}", staging.display());
            BuildError::io(context, std::io::ErrorKind::InvalidInput.into())
        })
}

/// First regular file of a container, `None` for empty or unreadable ones.
fn first_cached_file(container: &Path) -> Option<PathBuf> {
    let files = match sorted_entries(container) {
        Ok(entries) => entries
            .into_iter()
            .filter(|path| path.is_file())
            .collect::<Vec<_>>(),
        Err(err) => {
            debug!("Cannot scan cache container {}: {}", container.display(), err);
            return None;
        }
    };

    if files.is_empty() {
        debug!("Skipping empty cache container {}", container.display());
    } else if files.len() > 1 {
        warn!(
            "Cache container {} holds {} files, using the first",
            container.display(),
            files.len()
        );
    }

    files.into_iter().next()
}

fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}
