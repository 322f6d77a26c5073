//! Blocking file fetcher with caching and progress reporting.
//!
//! Resources are streamed block by block into a temporary file next to the
//! destination, which is renamed onto the destination only once the transfer
//! completed. `http(s)://` URLs go through reqwest's blocking client and
//! `file://` URLs are read from disk through the same streaming path.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};
use url::Url;

use super::cache::ContentCache;
use super::progress::{known_total, ProgressReporter};
use super::types::FetchOutcome;
use crate::config::DownloadSettings;
use crate::error::{BuildError, IoResultExt, Result};
use crate::fs::copy_file_with_metadata;

/// Size of the blocks a transfer is read in; progress is reported per block.
pub const BLOCK_SIZE: usize = 8 * 1024;

// ============================================================================
// Fetcher
// ============================================================================

/// Downloads files, optionally through the [`ContentCache`].
#[derive(Debug, Clone)]
pub struct Fetcher {
    settings: DownloadSettings,
    cache: ContentCache,
}

impl Fetcher {
    pub fn new(settings: DownloadSettings) -> Self {
        let cache = ContentCache::new(settings.cache_root.clone());
        Self { settings, cache }
    }

    /// Creates a fetcher configured from the process environment.
    pub fn from_env() -> Self {
        Self::new(DownloadSettings::from_env())
    }

    pub fn settings(&self) -> &DownloadSettings {
        &self.settings
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Deletes every cached download.
    pub fn clear_cache(&self) -> Result<()> {
        self.cache.clear()
    }

    /// Fetches `url` into `destination`.
    ///
    /// With `use_cache`, a previously cached copy is reused without any
    /// transfer, and a fresh download is added to the cache. The
    /// `REZBUILD_UTILS_DISABLE_DOWNLOAD_CACHE` kill-switch captured in the
    /// settings overrides `use_cache`.
    ///
    /// # Errors
    ///
    /// - [`BuildError::InvalidUrl`] for unparsable URLs or unsupported schemes.
    /// - [`BuildError::Transport`] when the source cannot be read.
    /// - [`BuildError::Io`] when the destination cannot be written.
    pub fn fetch(
        &self,
        url: &str,
        destination: &Path,
        use_cache: bool,
        progress: &mut dyn ProgressReporter,
    ) -> Result<FetchOutcome> {
        let use_cache = if use_cache && self.settings.cache_disabled {
            debug!("Download cache disabled by environment, ignoring it for {}", url);
            false
        } else {
            use_cache
        };

        if use_cache {
            if let Some(cache_file) = self.cache.lookup(url) {
                info!(
                    "Cache found, copying {} to {} ...",
                    cache_file.display(),
                    destination.display()
                );
                copy_file_with_metadata(&cache_file, destination)?;
                return Ok(FetchOutcome::Cached { cache_file });
            }
        }

        info!("Downloading {} to {}", url, destination.display());
        let result = transfer(url, destination, progress);
        // The bar is closed before anything else is logged.
        match &result {
            Ok(bytes) => {
                progress.finish();
                info!(
                    "Download complete: {} bytes written to {}",
                    bytes,
                    destination.display()
                );
            }
            Err(_) => progress.abandon(),
        }
        let bytes = result?;

        let cache_file = if use_cache {
            info!("Caching {} downloaded as {} ...", url, destination.display());
            let cache_file = self
                .cache
                .store(destination, url, &self.settings.cache_label)?;
            debug!("Cache file created at {}", cache_file.display());
            Some(cache_file)
        } else {
            None
        };

        Ok(FetchOutcome::Downloaded { bytes, cache_file })
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::from_env()
    }
}

// ============================================================================
// Transfers
// ============================================================================

fn transfer(url: &str, destination: &Path, progress: &mut dyn ProgressReporter) -> Result<u64> {
    let parsed = Url::parse(url).map_err(|err| BuildError::InvalidUrl {
        url: url.to_string(),
        reason: err.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => transfer_http(url, destination, progress),
        "file" => transfer_file(url, &parsed, destination, progress),
        other => Err(BuildError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}

fn transfer_http(url: &str, destination: &Path, progress: &mut dyn ProgressReporter) -> Result<u64> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("rezbuild/", env!("CARGO_PKG_VERSION")))
        .timeout(None)
        .build()
        .map_err(|err| BuildError::transport(url, err))?;

    let response = client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .map_err(|err| BuildError::transport(url, err))?;

    let total = known_total(response.content_length());
    debug!("Content-Length: {:?}", total);

    Transfer::begin(url, destination, total)?.stream(response, progress)
}

fn transfer_file(
    url: &str,
    parsed: &Url,
    destination: &Path,
    progress: &mut dyn ProgressReporter,
) -> Result<u64> {
    let source = parsed.to_file_path().map_err(|()| BuildError::InvalidUrl {
        url: url.to_string(),
        reason: "not a local file path".to_string(),
    })?;

    let file = File::open(&source).map_err(|err| BuildError::transport(url, err))?;
    let total = file
        .metadata()
        .map_err(|err| BuildError::transport(url, err))?
        .len();

    Transfer::begin(url, destination, known_total(Some(total)))?.stream(file, progress)
}

/// One in-flight transfer. The partial file is removed unless the transfer completes.
struct Transfer<'a> {
    url: &'a str,
    destination: &'a Path,
    partial: NamedTempFile,
    downloaded: u64,
    total: Option<u64>,
}

impl<'a> Transfer<'a> {
    fn begin(url: &'a str, destination: &'a Path, total: Option<u64>) -> Result<Self> {
        let parent = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let partial = partial_file_builder()
            .prefix(".rezbuild-partial-")
            .tempfile_in(&parent)
            .with_path_context(|| {
                format!("Failed to create a temporary file in {}", parent.display())
            })?;

        Ok(Self {
            url,
            destination,
            partial,
            downloaded: 0,
            total,
        })
    }

    fn stream<R: Read>(mut self, mut reader: R, progress: &mut dyn ProgressReporter) -> Result<u64> {
        let mut block = vec![0u8; BLOCK_SIZE];
        progress.report(0, self.total);

        loop {
            let read = match reader.read(&mut block) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(BuildError::transport(self.url, err)),
            };

            self.partial
                .write_all(&block[..read])
                .with_path_context(|| format!("Failed to write {}", self.partial.path().display()))?;

            self.downloaded += read as u64;
            progress.report(self.downloaded, self.total);
        }

        self.complete()
    }

    fn complete(self) -> Result<u64> {
        let Self {
            destination,
            mut partial,
            downloaded,
            ..
        } = self;

        partial
            .flush()
            .with_path_context(|| format!("Failed to flush {}", partial.path().display()))?;

        partial
            .persist(destination)
            .map_err(|err| {
                let context = format!("Failed to move download to {}", destination.display());
                BuildError::io(context, err.error)
            })?;

        Ok(downloaded)
    }
}

#[cfg(unix)]
fn partial_file_builder() -> tempfile::Builder<'static, 'static> {
    use std::os::unix::fs::PermissionsExt;

    // Downloads get regular file permissions, not the private 0600 of temp files.
    let mut builder = tempfile::Builder::new();
    builder.permissions(std::fs::Permissions::from_mode(0o644));
    builder
}

#[cfg(not(unix))]
fn partial_file_builder() -> tempfile::Builder<'static, 'static> {
    tempfile::Builder::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::progress::{NoProgress, ProgressState, ProgressTracker};
    use std::fs;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Records every update it receives.
    #[derive(Default)]
    struct RecordingProgress {
        tracker: ProgressTracker,
        updates: Vec<(u64, Option<u64>)>,
        finished: Option<bool>,
    }

    impl ProgressReporter for RecordingProgress {
        fn report(&mut self, downloaded: u64, total: Option<u64>) {
            self.tracker.update(downloaded, total);
            self.updates.push((downloaded, total));
        }

        fn finish(&mut self) {
            self.tracker.finish(true);
            self.finished = Some(true);
        }

        fn abandon(&mut self) {
            self.tracker.finish(false);
            self.finished = Some(false);
        }
    }

    struct Fixture {
        temp: TempDir,
        fetcher: Fetcher,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let settings = DownloadSettings::with_cache_root(temp.path().join("cache"));
            Self {
                fetcher: Fetcher::new(settings),
                temp,
            }
        }

        fn with_settings(f: impl FnOnce(DownloadSettings) -> DownloadSettings) -> Self {
            let temp = TempDir::new().unwrap();
            let settings = f(DownloadSettings::with_cache_root(temp.path().join("cache")));
            Self {
                fetcher: Fetcher::new(settings),
                temp,
            }
        }

        /// Writes a source file and returns its `file://` URL.
        fn source(&self, name: &str, content: &[u8]) -> (PathBuf, String) {
            let dir = self.temp.path().join("source");
            fs::create_dir_all(&dir).unwrap();
            let path = dir.join(name);
            fs::write(&path, content).unwrap();
            let url = Url::from_file_path(&path).unwrap().to_string();
            (path, url)
        }

        fn target(&self, name: &str) -> PathBuf {
            let dir = self.temp.path().join("targets");
            fs::create_dir_all(&dir).unwrap();
            dir.join(name)
        }
    }

    #[test]
    fn test_fetch_file_url_without_cache() {
        let fixture = Fixture::new();
        let (_, url) = fixture.source("avatar.png", b"not really a png");
        let target = fixture.target("avatar1");

        let outcome = fixture
            .fetcher
            .fetch(&url, &target, false, &mut NoProgress)
            .unwrap();

        assert_eq!(
            outcome,
            FetchOutcome::Downloaded {
                bytes: 16,
                cache_file: None
            }
        );
        assert_eq!(fs::read(&target).unwrap(), b"not really a png");
        assert!(fixture.fetcher.cache().is_empty());
    }

    #[test]
    fn test_cache_round_trip_skips_transfer() {
        let fixture = Fixture::new();
        let (source, url) = fixture.source("payload.bin", b"cached payload");

        let first = fixture.target("first.bin");
        let outcome = fixture
            .fetcher
            .fetch(&url, &first, true, &mut NoProgress)
            .unwrap();
        assert!(!outcome.is_cached());
        assert!(!fixture.fetcher.cache().is_empty());

        // The source is gone: only the cache can satisfy the second fetch.
        fs::remove_file(&source).unwrap();

        let second = fixture.target("second.bin");
        let mut progress = RecordingProgress::default();
        let outcome = fixture
            .fetcher
            .fetch(&url, &second, true, &mut progress)
            .unwrap();
        assert!(outcome.is_cached());
        assert!(progress.updates.is_empty());
        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());

        fixture.fetcher.clear_cache().unwrap();
        assert!(fixture.fetcher.cache().is_empty());
    }

    #[test]
    fn test_repeated_uncached_fetches_leave_no_cache() {
        let fixture = Fixture::new();
        let (_, url) = fixture.source("payload.bin", b"payload");
        let target = fixture.target("payload.bin");

        for _ in 0..3 {
            fixture
                .fetcher
                .fetch(&url, &target, false, &mut NoProgress)
                .unwrap();
        }
        assert!(!fixture.fetcher.cache().root().exists());
    }

    #[test]
    fn test_disabled_cache_overrides_request() {
        let fixture = Fixture::with_settings(|settings| settings.disable_cache());
        let (source, url) = fixture.source("payload.bin", b"payload");

        let target = fixture.target("first.bin");
        let outcome = fixture
            .fetcher
            .fetch(&url, &target, true, &mut NoProgress)
            .unwrap();
        assert_eq!(
            outcome,
            FetchOutcome::Downloaded {
                bytes: 7,
                cache_file: None
            }
        );
        assert!(!fixture.fetcher.cache().root().exists());

        // A pre-existing cache entry is not read either.
        fixture
            .fetcher
            .cache()
            .store(&target, &url, "seeded-1.0")
            .unwrap();
        fs::remove_file(&source).unwrap();
        let err = fixture
            .fetcher
            .fetch(&url, &fixture.target("second.bin"), true, &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, BuildError::Transport { .. }));
    }

    /// Ordered record of progress events and log output.
    #[derive(Clone, Default)]
    struct EventLog(Arc<Mutex<Vec<String>>>);

    impl EventLog {
        fn position(&self, needle: &str) -> Option<usize> {
            self.0.lock().unwrap().iter().position(|line| line.contains(needle))
        }
    }

    impl io::Write for EventLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(buf).into_owned());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ProgressReporter for EventLog {
        fn report(&mut self, _downloaded: u64, _total: Option<u64>) {
            self.0.lock().unwrap().push("progress: report".to_string());
        }

        fn finish(&mut self) {
            self.0.lock().unwrap().push("progress: finish".to_string());
        }

        fn abandon(&mut self) {
            self.0.lock().unwrap().push("progress: abandon".to_string());
        }
    }

    #[test]
    fn test_completion_is_logged_after_progress_finishes() {
        let fixture = Fixture::new();
        let (_, url) = fixture.source("payload.bin", b"payload");
        let target = fixture.target("payload.bin");

        let events = EventLog::default();
        let writer = events.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();

        let mut progress = events.clone();
        tracing::subscriber::with_default(subscriber, || {
            fixture
                .fetcher
                .fetch(&url, &target, false, &mut progress)
                .unwrap();
        });

        let last_report = events.0.lock().unwrap().iter().rposition(|l| l == "progress: report");
        let finished = events.position("progress: finish").unwrap();
        let completed = events.position("Download complete").unwrap();
        assert!(last_report.unwrap() < finished);
        assert!(finished < completed);
    }

    #[test]
    fn test_progress_is_reported_per_block() {
        let fixture = Fixture::new();
        let content = vec![7u8; BLOCK_SIZE * 2 + 100];
        let (_, url) = fixture.source("big.bin", &content);
        let mut progress = RecordingProgress::default();

        fixture
            .fetcher
            .fetch(&url, &fixture.target("big.bin"), false, &mut progress)
            .unwrap();

        let total = Some(content.len() as u64);
        assert_eq!(progress.updates.first(), Some(&(0, total)));
        assert_eq!(
            progress.updates.last(),
            Some(&(content.len() as u64, total))
        );
        assert!(progress.updates.len() >= 4);
        assert_eq!(progress.finished, Some(true));
    }

    #[test]
    fn test_empty_source_reports_indeterminate() {
        let fixture = Fixture::new();
        let (_, url) = fixture.source("empty.bin", b"");
        let mut progress = RecordingProgress::default();

        fixture
            .fetcher
            .fetch(&url, &fixture.target("empty.bin"), false, &mut progress)
            .unwrap();

        assert_eq!(progress.updates, vec![(0, None)]);
        assert_eq!(progress.tracker.percent(), None);
        assert_eq!(
            progress.tracker.state(),
            ProgressState::Finished { succeeded: true }
        );
    }

    #[test]
    fn test_missing_source_is_transport_error() {
        let fixture = Fixture::new();
        let (source, url) = fixture.source("gone.bin", b"x");
        fs::remove_file(source).unwrap();
        let target = fixture.target("gone.bin");

        let err = fixture
            .fetcher
            .fetch(&url, &target, false, &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, BuildError::Transport { .. }));
        assert!(!target.exists());
    }

    #[test]
    fn test_unsupported_scheme() {
        let fixture = Fixture::new();
        let err = fixture
            .fetcher
            .fetch(
                "ftp://example.com/file.zip",
                &fixture.target("file.zip"),
                false,
                &mut NoProgress,
            )
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidUrl { .. }));

        let err = fixture
            .fetcher
            .fetch("not a url", &fixture.target("x"), false, &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidUrl { .. }));
    }

    #[test]
    fn test_failed_transfer_leaves_no_partial_file() {
        let fixture = Fixture::new();
        let (source, url) = fixture.source("dir-as-file", b"");
        fs::remove_file(&source).unwrap();
        fs::create_dir(&source).unwrap();

        let target = fixture.target("out.bin");
        let mut progress = RecordingProgress::default();
        let result = fixture.fetcher.fetch(&url, &target, false, &mut progress);

        assert!(result.is_err());
        assert_eq!(progress.finished, Some(false));
        assert!(!target.exists());
        let leftovers: Vec<_> = fs::read_dir(target.parent().unwrap())
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }
}
