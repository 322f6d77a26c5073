//! Download-and-install orchestration for build scripts.
//!
//! The [`Installer`] is the main entry point of the download subsystem. It
//! coordinates the fetcher and the extractor inside a scoped temporary
//! directory that is removed on every exit path.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

use super::extractor::extract_archive;
use super::fetcher::Fetcher;
use super::paths::file_name_from_url;
use super::progress::TerminalProgress;
use super::types::ArchiveFormat;
use crate::config::{BuildContext, DownloadSettings};
use crate::error::{BuildError, IoResultExt, Result};
use crate::fs::copy_file_with_metadata;

/// Downloads third-party payloads into the install directory of a build.
#[derive(Debug, Clone)]
pub struct Installer {
    context: BuildContext,
    fetcher: Fetcher,
    show_progress: bool,
}

impl Installer {
    pub fn new(context: BuildContext, fetcher: Fetcher) -> Self {
        Self {
            context,
            fetcher,
            show_progress: true,
        }
    }

    /// Creates an installer for the rez build running in this process.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::MissingEnv`] outside of a rez build.
    pub fn from_env() -> Result<Self> {
        let context = BuildContext::from_env()?;
        Ok(Self::new(context, Fetcher::new(DownloadSettings::from_env())))
    }

    /// Turns the terminal progress bar on or off.
    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Downloads `url` into a new `install_dir_name` directory of the install path.
    ///
    /// The file is first downloaded into a private temporary directory, then
    /// copied into the new directory. With `extract_if_archive`, a zip or tar
    /// archive is extracted in place and removed.
    ///
    /// Returns the new directory.
    ///
    /// # Errors
    ///
    /// - [`BuildError::AlreadyExists`] if the target directory exists.
    /// - Any fetch, copy or extraction error. The temporary directory is
    ///   removed before the error is returned.
    ///
    /// The target directory is created before the download starts and is not
    /// removed on failure: delete it before retrying, or the retry fails with
    /// [`BuildError::AlreadyExists`].
    pub fn download_and_install_build(
        &self,
        url: &str,
        install_dir_name: &str,
        extract_if_archive: bool,
        use_cache: bool,
    ) -> Result<PathBuf> {
        let parsed = Url::parse(url).map_err(|err| BuildError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;

        // Dropped on every exit path, which deletes the directory.
        let workdir = tempfile::Builder::new()
            .prefix(&format!("{}-", self.context.label()))
            .tempdir()
            .with_path_context(|| "Failed to create a temporary download directory".to_string())?;
        debug!("Using temporary directory {}", workdir.path().display());

        let target_dir = self.create_target_dir(install_dir_name)?;

        let download_path = workdir.path().join(file_name_from_url(&parsed));
        let mut progress = if self.show_progress {
            TerminalProgress::new("downloading")
        } else {
            TerminalProgress::hidden("downloading")
        };
        self.fetcher
            .fetch(url, &download_path, use_cache, &mut progress)?;

        let installed = target_dir.join(download_path.file_name().unwrap_or_default());
        info!("Copying {} to {} ...", download_path.display(), installed.display());
        copy_file_with_metadata(&download_path, &installed)?;

        debug!("Removing temporary directory {}", workdir.path().display());
        workdir
            .close()
            .with_path_context(|| "Failed to remove the temporary download directory".to_string())?;

        if extract_if_archive && ArchiveFormat::from_path(&installed).is_some() {
            info!("Extracting {} ...", installed.display());
            extract_archive(&installed)?;
        }

        Ok(target_dir)
    }

    fn create_target_dir(&self, install_dir_name: &str) -> Result<PathBuf> {
        let name = Path::new(install_dir_name);
        if name.as_os_str().is_empty() || name.is_absolute() {
            return Err(BuildError::io(
                format!("Invalid install directory name {install_dir_name:?}"),
                std::io::ErrorKind::InvalidInput.into(),
            ));
        }

        let target_dir = self.context.install_dir.join(name);
        match fs::create_dir(&target_dir) {
            Ok(()) => Ok(target_dir),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(BuildError::AlreadyExists { path: target_dir })
            }
            Err(err) => Err(BuildError::io(
                format!("Failed to create {}", target_dir.display()),
                err,
            )),
        }
    }
}

/// Downloads `url` into `install_dir_name` under the install path of the
/// current rez build, reading the build context from the environment.
///
/// See [`Installer::download_and_install_build`].
pub fn download_and_install_build(
    url: &str,
    install_dir_name: &str,
    extract_if_archive: bool,
    use_cache: bool,
) -> Result<PathBuf> {
    Installer::from_env()?.download_and_install_build(
        url,
        install_dir_name,
        extract_if_archive,
        use_cache,
    )
}
