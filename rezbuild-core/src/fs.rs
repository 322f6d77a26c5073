//! Filesystem helpers shared by the build helpers.
//!
//! All copies preserve permissions and timestamps, like `shutil.copy2` does
//! for rez build scripts written in Python.

use std::fs;
use std::path::Path;

use filetime::FileTime;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{BuildError, IoResultExt, Result};

/// Copies a single file, keeping its permissions, access and modification times.
///
/// An existing `dest` is overwritten; callers needing exclusivity check first.
pub fn copy_file_with_metadata(src: &Path, dest: &Path) -> Result<u64> {
    let bytes = fs::copy(src, dest).with_path_context(|| {
        format!("Failed to copy {} to {}", src.display(), dest.display())
    })?;
    copy_times(src, dest)?;
    Ok(bytes)
}

/// Copies `src` to `dest` and fails if `dest` already exists.
pub fn copy_file_exclusive(src: &Path, dest: &Path) -> Result<u64> {
    if dest.symlink_metadata().is_ok() {
        return Err(BuildError::AlreadyExists {
            path: dest.to_path_buf(),
        });
    }
    copy_file_with_metadata(src, dest)
}

/// Recursively copies the directory `src` to `dest`, which must not exist yet.
///
/// Symlinks are followed; the copy contains regular files and directories only.
pub fn copy_tree_exclusive(src: &Path, dest: &Path) -> Result<()> {
    if dest.symlink_metadata().is_ok() {
        return Err(BuildError::AlreadyExists {
            path: dest.to_path_buf(),
        });
    }

    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|err| {
            let context = format!("Failed to walk {}", src.display());
            BuildError::io(context, err.into())
        })?;

        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir(&target)
                .with_path_context(|| format!("Failed to create {}", target.display()))?;
        } else {
            copy_file_with_metadata(entry.path(), &target)?;
        }
    }

    // Directory times last, creating children touches them.
    for entry in WalkDir::new(src).follow_links(true).contents_first(true) {
        let Ok(entry) = entry else { continue };
        if entry.file_type().is_dir() {
            let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
            copy_times(entry.path(), &dest.join(relative))?;
        }
    }

    debug!("Copied tree {} to {}", src.display(), dest.display());
    Ok(())
}

/// Sets or clears the write permission bits on every file and directory of a tree.
///
/// Directories are handled after their content so a read-only directory never
/// blocks updating its children.
pub fn set_tree_writable(root: &Path, writable: bool) -> Result<()> {
    for entry in WalkDir::new(root).contents_first(!writable) {
        let entry = entry.map_err(|err| {
            let context = format!("Failed to walk {}", root.display());
            BuildError::io(context, err.into())
        })?;

        if entry.path_is_symlink() {
            continue;
        }

        let path = entry.path();
        let metadata = entry.metadata().map_err(|err| {
            let context = format!("Failed to read metadata of {}", path.display());
            BuildError::io(context, err.into())
        })?;

        let permissions = writable_permissions(metadata.permissions(), writable);
        fs::set_permissions(path, permissions)
            .with_path_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }
    Ok(())
}

#[cfg(unix)]
fn writable_permissions(permissions: fs::Permissions, writable: bool) -> fs::Permissions {
    use std::os::unix::fs::PermissionsExt;

    let mode = permissions.mode();
    let mode = if writable { mode | 0o200 } else { mode & !0o222 };
    fs::Permissions::from_mode(mode)
}

#[cfg(not(unix))]
fn writable_permissions(mut permissions: fs::Permissions, writable: bool) -> fs::Permissions {
    permissions.set_readonly(!writable);
    permissions
}

fn copy_times(src: &Path, dest: &Path) -> Result<()> {
    let metadata = fs::metadata(src)
        .with_path_context(|| format!("Failed to read metadata of {}", src.display()))?;
    let atime = FileTime::from_last_access_time(&metadata);
    let mtime = FileTime::from_last_modification_time(&metadata);
    filetime::set_file_times(dest, atime, mtime)
        .with_path_context(|| format!("Failed to set times on {}", dest.display()))
}
