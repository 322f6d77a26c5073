//! Logging setup for build scripts.

use anyhow::Result;
use indicatif::MultiProgress;
use std::io;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::download::progress::global_multi_progress;

/// Default filter when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "rezbuild=info";

/// Writes to stderr with the progress bars suspended, so a log record is
/// never glued to or erased by a bar redraw.
#[derive(Clone)]
pub struct IndicatifWriter {
    progress_bars: MultiProgress,
}

impl IndicatifWriter {
    pub fn new(progress_bars: MultiProgress) -> Self {
        Self { progress_bars }
    }
}

impl io::Write for IndicatifWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.progress_bars.suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.progress_bars.suspend(|| io::stderr().flush())
    }
}

impl<'a> MakeWriter<'a> for IndicatifWriter {
    type Writer = IndicatifWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Installs a stderr `tracing` subscriber honouring `RUST_LOG`.
///
/// Records are written around the download progress bars. Calling it again
/// once a subscriber is installed does nothing.
pub fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(IndicatifWriter::new(global_multi_progress()))
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Logging initialised");
    }
    Ok(())
}
