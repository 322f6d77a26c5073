//! Build file operations.
//!
//! Helpers a rez `build.py`-style script needs besides downloads: copying
//! source files to the install location, moving directory content around and
//! locking installed trees.

use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::BuildContext;
use crate::error::{BuildError, IoResultExt, Result};
use crate::fs::{copy_file_exclusive, copy_tree_exclusive, set_tree_writable};

/// Copies files and directories from the build source directory to the
/// install directory.
///
/// Relative paths are resolved against the source directory. Files land
/// directly in the install directory, directories are copied recursively to
/// `install_dir/<dir name>`.
///
/// # Errors
///
/// Returns [`BuildError::AlreadyExists`] if a destination already exists;
/// installed content is never overwritten.
pub fn copy_build_files<P: AsRef<Path>>(context: &BuildContext, files: &[P]) -> Result<()> {
    let target_dir = &context.install_dir;

    for file in files {
        let source = context.source_path(file.as_ref());
        let name = source.file_name().ok_or_else(|| {
            let context = format!("Cannot copy {}: no file name", source.display());
            BuildError::io(context, std::io::ErrorKind::InvalidInput.into())
        })?;
        let destination = target_dir.join(name);

        debug!("Copying {} to {} ...", source.display(), destination.display());
        let metadata = fs::metadata(&source)
            .with_path_context(|| format!("Failed to read {}", source.display()))?;

        if metadata.is_dir() {
            copy_tree_exclusive(&source, &destination)?;
        } else {
            copy_file_exclusive(&source, &destination)?;
        }
    }

    Ok(())
}

/// Moves every direct child of `src_dir` into `dst_dir`.
///
/// When a child's destination already exists it is left in `src_dir` with a
/// warning if `exists_ok`, and is an error otherwise. Returns the number of
/// moved entries.
pub fn move_directory_content(src_dir: &Path, dst_dir: &Path, exists_ok: bool) -> Result<usize> {
    let mut children = fs::read_dir(src_dir)
        .with_path_context(|| format!("Failed to read {}", src_dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_path_context(|| format!("Failed to read {}", src_dir.display()))?;
    children.sort();

    let mut moved = 0;
    for child in children {
        let Some(name) = child.file_name() else {
            continue;
        };
        let destination = dst_dir.join(name);

        if destination.symlink_metadata().is_ok() {
            if exists_ok {
                warn!(
                    "Not moving {}: {} already exists",
                    child.display(),
                    destination.display()
                );
                continue;
            }
            return Err(BuildError::AlreadyExists { path: destination });
        }

        fs::rename(&child, &destination).with_path_context(|| {
            format!("Failed to move {} to {}", child.display(), destination.display())
        })?;
        moved += 1;
    }

    Ok(moved)
}

/// Removes write permissions from `path` and, for directories, everything below it.
pub fn set_path_read_only(path: &Path) -> Result<()> {
    debug!("Setting {} read-only", path.display());
    set_tree_writable(path, false)
}

/// Gives write permission back to the owner of `path` and everything below it.
pub fn set_path_writable(path: &Path) -> Result<()> {
    debug!("Setting {} writable", path.display());
    set_tree_writable(path, true)
}
