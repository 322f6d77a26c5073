//! Archive extraction for downloaded payloads.
//!
//! Archives are extracted next to themselves. Many upstream archives wrap
//! their content in one or more superfluous directories (`tool-1.2.3/`,
//! `dist/linux/`); [`extract_archive_with_reference`] finds the real payload
//! through a reference glob and hoists it to the extraction root.

use glob::{MatchOptions, Pattern};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use super::types::ArchiveFormat;
use crate::build_files::move_directory_content;
use crate::error::{BuildError, IoResultExt, Result};

// ============================================================================
// In-place Extraction
// ============================================================================

/// Extracts `archive_path` into its parent directory and deletes the archive.
///
/// Returns the directory the archive was extracted into.
///
/// # Errors
///
/// Returns [`BuildError::Archive`] when the format is unknown or the archive
/// is malformed.
pub fn extract_archive(archive_path: &Path) -> Result<PathBuf> {
    let format = ArchiveFormat::from_path(archive_path).ok_or_else(|| {
        BuildError::archive(archive_path, "unsupported archive format")
    })?;

    let root = match archive_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    extract_archive_to(archive_path, &root, format)?;

    debug!("Removing archive {}", archive_path.display());
    fs::remove_file(archive_path)
        .with_path_context(|| format!("Failed to remove {}", archive_path.display()))?;

    Ok(root)
}

/// Extracts `archive_path` in place, then hoists the payload located by
/// `reference` up to the extraction root.
///
/// `reference` is a glob matched recursively below the extraction root, for
/// example `ffmpeg.exe` or `*.dll`. The directory holding the first match is
/// the payload root, and its children land directly in the extraction root:
/// with `bin/ffmpeg`, the content of `bin/` is hoisted and the `bin` level
/// itself disappears.
pub fn extract_archive_with_reference(archive_path: &Path, reference: &str) -> Result<PathBuf> {
    let root = extract_archive(archive_path)?;
    relocate_payload(&root, reference)?;
    Ok(root)
}

// ============================================================================
// Payload Relocation
// ============================================================================

/// Moves the payload located by `reference` up to `root`.
///
/// Every direct child of the payload root moves into `root`, then the payload
/// root is removed without recursion: if anything was left behind the removal
/// fails with [`BuildError::Integrity`]. Wrapper directories emptied by the
/// move are removed as well.
///
/// Matches are sorted; when several exist the first one is used.
pub fn relocate_payload(root: &Path, reference: &str) -> Result<PathBuf> {
    let matches = find_reference(root, reference)?;
    if matches.len() > 1 {
        warn!(
            "Reference {:?} matched {} paths under {}, using {}",
            reference,
            matches.len(),
            root.display(),
            matches[0].display()
        );
    }

    let reference_path = matches.into_iter().next().ok_or_else(|| {
        BuildError::ReferenceNotFound {
            pattern: reference.to_string(),
            root: root.to_path_buf(),
        }
    })?;

    let payload_root = match reference_path.parent() {
        Some(parent) if parent != root => parent.to_path_buf(),
        _ => {
            debug!("Payload already at {}", root.display());
            return Ok(root.to_path_buf());
        }
    };

    info!(
        "Moving content of {} to {} ...",
        payload_root.display(),
        root.display()
    );
    move_directory_content(&payload_root, root, true)?;

    fs::remove_dir(&payload_root).map_err(|source| BuildError::Integrity {
        path: payload_root.clone(),
        source,
    })?;

    remove_empty_wrappers(root, &payload_root)?;
    Ok(root.to_path_buf())
}

fn find_reference(root: &Path, reference: &str) -> Result<Vec<PathBuf>> {
    let root_str = root.to_str().ok_or_else(|| {
        BuildError::archive(root, "extraction root is not valid UTF-8")
    })?;

    let reference = reference.trim_start_matches("./").trim_start_matches('/');
    let pattern = format!("{}/**/{}", Pattern::escape(root_str), reference);

    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let mut matches: Vec<PathBuf> = glob::glob_with(&pattern, options)
        .map_err(|err| BuildError::archive(root, err))?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(err) => {
                debug!("Skipping unreadable path while matching {}: {}", pattern, err);
                None
            }
        })
        .collect();

    matches.sort();
    Ok(matches)
}

/// Removes the now-empty directories between `root` and `removed`.
fn remove_empty_wrappers(root: &Path, removed: &Path) -> Result<()> {
    let mut current = removed.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        let is_empty = fs::read_dir(dir)
            .with_path_context(|| format!("Failed to read {}", dir.display()))?
            .next()
            .is_none();
        if !is_empty {
            break;
        }
        debug!("Removing empty wrapper directory {}", dir.display());
        fs::remove_dir(dir).with_path_context(|| format!("Failed to remove {}", dir.display()))?;
        current = dir.parent();
    }
    Ok(())
}

// ============================================================================
// Archive Extraction
// ============================================================================

/// Extracts an archive to a destination directory.
///
/// Entries escaping `dest_dir` (absolute paths, `..`, links) are skipped.
pub fn extract_archive_to(archive_path: &Path, dest_dir: &Path, format: ArchiveFormat) -> Result<()> {
    info!(
        "Extracting {} archive {} to {}",
        format,
        archive_path.display(),
        dest_dir.display()
    );

    fs::create_dir_all(dest_dir)
        .with_path_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;

    match format {
        ArchiveFormat::Zip => extract_zip(archive_path, dest_dir),
        ArchiveFormat::TarGz => {
            let reader = open_archive(archive_path)?;
            extract_tar(archive_path, flate2::read::GzDecoder::new(reader), dest_dir)
        }
        ArchiveFormat::TarXz => {
            let reader = open_archive(archive_path)?;
            extract_tar(archive_path, xz2::read::XzDecoder::new(reader), dest_dir)
        }
    }
}

fn open_archive(archive_path: &Path) -> Result<BufReader<File>> {
    let file = File::open(archive_path)
        .with_path_context(|| format!("Failed to open archive: {}", archive_path.display()))?;
    Ok(BufReader::new(file))
}

fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_path_context(|| format!("Failed to open zip: {}", archive_path.display()))?;

    let mut archive =
        zip::ZipArchive::new(file).map_err(|err| BuildError::archive(archive_path, err))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| BuildError::archive(archive_path, err))?;

        let entry_path = match entry.enclosed_name() {
            Some(path) => path.to_owned(),
            None => {
                warn!("Skipping unsafe path in zip: {}", entry.name());
                continue;
            }
        };

        let dest_path = dest_dir.join(&entry_path);

        if entry.is_dir() {
            fs::create_dir_all(&dest_path)
                .with_path_context(|| format!("Failed to create {}", dest_path.display()))?;
            continue;
        }

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)
                .with_path_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut outfile = File::create(&dest_path)
            .with_path_context(|| format!("Failed to create: {}", dest_path.display()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| BuildError::archive(archive_path, err))?;

        #[cfg(unix)]
        set_unix_permissions(&dest_path, entry.unix_mode())?;
    }

    debug!("ZIP extraction complete");
    Ok(())
}

fn extract_tar<R: Read>(archive_path: &Path, reader: R, dest_dir: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|err| BuildError::archive(archive_path, err))?;

    for entry_result in entries {
        let mut entry = entry_result.map_err(|err| BuildError::archive(archive_path, err))?;
        let entry_type = entry.header().entry_type();

        if entry_type.is_symlink() || entry_type.is_hard_link() {
            warn!("Skipping link entry in tar archive {}", archive_path.display());
            continue;
        }

        let path = entry
            .path()
            .map_err(|err| BuildError::archive(archive_path, err))?
            .into_owned();

        if !is_enclosed(&path) {
            warn!("Skipping unsafe path in tar: {}", path.display());
            continue;
        }

        let dest_path = dest_dir.join(&path);

        if entry_type.is_dir() {
            fs::create_dir_all(&dest_path)
                .with_path_context(|| format!("Failed to create {}", dest_path.display()))?;
        } else if entry_type.is_file() {
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent)
                    .with_path_context(|| format!("Failed to create {}", parent.display()))?;
            }

            let mut outfile = File::create(&dest_path)
                .with_path_context(|| format!("Failed to create: {}", dest_path.display()))?;
            io::copy(&mut entry, &mut outfile)
                .map_err(|err| BuildError::archive(archive_path, err))?;
            outfile
                .flush()
                .with_path_context(|| format!("Failed to write {}", dest_path.display()))?;

            #[cfg(unix)]
            set_unix_permissions(&dest_path, entry.header().mode().ok())?;
        }
    }

    debug!("TAR extraction complete");
    Ok(())
}

/// True for relative paths that stay below the extraction directory.
fn is_enclosed(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(unix)]
fn set_unix_permissions(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        if mode & 0o111 != 0 {
            let permissions = fs::Permissions::from_mode(mode | 0o755);
            fs::set_permissions(path, permissions)
                .with_path_context(|| format!("Failed to set permissions on {}", path.display()))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);

        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_extract_zip_in_place() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("test.zip");
        write_zip(
            &archive_path,
            &[("hello.txt", b"Hello, World!"), ("subdir/nested.txt", b"Nested content")],
        );

        let root = extract_archive(&archive_path).unwrap();

        assert_eq!(root, temp_dir.path());
        assert!(!archive_path.exists());
        assert_eq!(
            fs::read_to_string(root.join("hello.txt")).unwrap(),
            "Hello, World!"
        );
        assert!(root.join("subdir/nested.txt").exists());
    }

    #[test]
    fn test_extract_tar_gz_simple() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("test.tar.gz");

        {
            let file = File::create(&archive_path).unwrap();
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);

            let data = b"Hello from tar.gz!";
            let mut header = tar::Header::new_gnu();
            header.set_path("greetings.txt").unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();

            builder.append(&header, &data[..]).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let root = extract_archive(&archive_path).unwrap();
        assert_eq!(
            fs::read_to_string(root.join("greetings.txt")).unwrap(),
            "Hello from tar.gz!"
        );
        assert!(!archive_path.exists());
    }

    #[test]
    fn test_extract_tar_xz_simple() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("test.tar.xz");
        let extract_dir = temp_dir.path().join("extracted");

        {
            let file = File::create(&archive_path).unwrap();
            let encoder = xz2::write::XzEncoder::new(file, 6);
            let mut builder = tar::Builder::new(encoder);

            let data = b"Hello from tar.xz!";
            let mut header = tar::Header::new_gnu();
            header.set_path("greetings.txt").unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();

            builder.append(&header, &data[..]).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        extract_archive_to(&archive_path, &extract_dir, ArchiveFormat::TarXz).unwrap();
        assert_eq!(
            fs::read_to_string(extract_dir.join("greetings.txt")).unwrap(),
            "Hello from tar.xz!"
        );
    }

    #[test]
    fn test_malformed_archive_is_archive_error() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("broken.zip");
        fs::write(&archive_path, b"this is not a zip file").unwrap();

        let err = extract_archive(&archive_path).unwrap_err();
        assert!(matches!(err, BuildError::Archive { .. }));
    }

    #[test]
    fn test_unknown_format_is_archive_error() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("payload.bin");
        fs::write(&archive_path, b"data").unwrap();

        let err = extract_archive(&archive_path).unwrap_err();
        assert!(matches!(err, BuildError::Archive { .. }));
        assert!(archive_path.exists());
    }

    #[test]
    fn test_reference_relocates_nested_payload() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("install");
        fs::create_dir(&root).unwrap();
        let archive_path = root.join("payload.zip");
        write_zip(
            &archive_path,
            &[
                ("a/b/c/target.bin", b"target"),
                ("a/b/c/sibling.txt", b"sibling"),
                ("a/b/c/lib/libfoo.so", b"lib"),
            ],
        );

        let result = extract_archive_with_reference(&archive_path, "target.bin").unwrap();

        assert_eq!(result, root);
        assert_eq!(fs::read(root.join("target.bin")).unwrap(), b"target");
        assert_eq!(fs::read(root.join("sibling.txt")).unwrap(), b"sibling");
        assert!(root.join("lib/libfoo.so").exists());
        assert!(!root.join("a").exists());
        assert!(!archive_path.exists());
    }

    #[test]
    fn test_reference_with_path_components() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("tool-1.2/bin")).unwrap();
        fs::write(root.join("tool-1.2/bin/tool"), b"exe").unwrap();
        fs::write(root.join("tool-1.2/README"), b"readme").unwrap();

        relocate_payload(root, "bin/tool").unwrap();

        // The directory holding the match is the payload root, not its parent.
        assert_eq!(fs::read(root.join("tool")).unwrap(), b"exe");
        assert!(!root.join("bin").exists());
        assert!(root.join("tool-1.2/README").exists());
        assert!(!root.join("tool-1.2/bin").exists());
    }

    #[test]
    fn test_reference_at_root_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("target.bin"), b"x").unwrap();

        assert_eq!(relocate_payload(root, "target.bin").unwrap(), root);
        assert!(root.join("target.bin").exists());
    }

    #[test]
    fn test_reference_without_match() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("a/b")).unwrap();

        let err = relocate_payload(root, "missing.bin").unwrap_err();
        assert!(matches!(err, BuildError::ReferenceNotFound { .. }));
    }

    #[test]
    fn test_multiple_matches_use_first_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("x/one")).unwrap();
        fs::create_dir_all(root.join("y/two")).unwrap();
        fs::write(root.join("x/one/lib.dll"), b"1").unwrap();
        fs::write(root.join("y/two/lib.dll"), b"2").unwrap();

        relocate_payload(root, "*.dll").unwrap();

        assert_eq!(fs::read(root.join("lib.dll")).unwrap(), b"1");
        assert!(!root.join("x").exists());
        assert!(root.join("y/two/lib.dll").exists());
    }

    #[test]
    fn test_leftover_sibling_fails_integrity_check() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("a/b/c/target.bin"), b"target").unwrap();
        // Its destination is taken by the wrapper directory itself, so it cannot move.
        fs::write(root.join("a/b/c/a"), b"blocked").unwrap();

        let err = relocate_payload(root, "target.bin").unwrap_err();

        assert!(matches!(err, BuildError::Integrity { .. }));
        assert!(root.join("target.bin").exists());
        assert!(root.join("a/b/c/a").exists());
    }

    #[test]
    fn test_tar_link_entries_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("malicious.tar.gz");
        let extract_dir = temp_dir.path().join("extracted");
        let escape_target = temp_dir.path().join("escaped_file.txt");

        {
            let file = File::create(&archive_path).unwrap();
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);

            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            header.set_mode(0o777);
            builder
                .append_link(&mut header, "escape_link", "../escaped_file.txt")
                .unwrap();

            let data = b"This should NOT appear outside extraction dir!";
            let mut file_header = tar::Header::new_gnu();
            file_header.set_path("escape_link").unwrap();
            file_header.set_size(data.len() as u64);
            file_header.set_mode(0o644);
            file_header.set_cksum();

            builder.append(&file_header, &data[..]).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        extract_archive_to(&archive_path, &extract_dir, ArchiveFormat::TarGz).unwrap();

        assert!(!escape_target.exists());
        assert!(extract_dir.join("escape_link").is_file());
    }

    #[test]
    fn test_is_enclosed() {
        assert!(is_enclosed(Path::new("a/b/c.txt")));
        assert!(is_enclosed(Path::new("./a")));
        assert!(!is_enclosed(Path::new("../a")));
        assert!(!is_enclosed(Path::new("/etc/passwd")));
        assert!(!is_enclosed(Path::new("a/../../b")));
    }
}
