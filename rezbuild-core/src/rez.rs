//! Thin wrapper around the `rez` command line.
//!
//! Used by build scripts that need an interpreter package from the local
//! repository, for example to install pip packages against a given Python.

use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Runs `rez` subcommands.
#[derive(Debug, Clone)]
pub struct RezCli {
    program: PathBuf,
}

impl RezCli {
    /// Uses the `rez` executable found on `PATH`.
    pub fn new() -> Self {
        Self::with_program("rez")
    }

    /// Uses a specific executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Returns the latest package matching `request`, e.g. `python-3.9` → `python-3.9.13`.
    pub fn search_latest(&self, request: &str) -> Result<String> {
        let package = self.output(["search", request, "--latest"])?;
        if package.is_empty() {
            anyhow::bail!("No package found for request {}", request);
        }
        Ok(package)
    }

    /// Returns the configured local packages repository.
    pub fn local_packages_path(&self) -> Result<PathBuf> {
        self.output(["config", "local_packages_path"])
            .map(PathBuf::from)
    }

    /// Copies `package` to `dest_path` under a new version.
    pub fn copy_package(&self, package: &str, reversion: &str, dest_path: &Path) -> Result<()> {
        info!(
            "Copying {} to {} as version {} ...",
            package,
            dest_path.display(),
            reversion
        );
        self.output([
            OsStr::new("cp"),
            OsStr::new(package),
            OsStr::new("--reversion"),
            OsStr::new(reversion),
            OsStr::new("--dest-path"),
            dest_path.as_os_str(),
        ])
        .map(|_| ())
    }

    fn output<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        debug!("Running {:?}", cmd);

        let output = cmd
            .output()
            .with_context(|| format!("Failed to execute {}", self.program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{:?} failed ({}): {}", cmd, output.status, stderr.trim());
        }

        let stdout = String::from_utf8(output.stdout)
            .with_context(|| format!("{:?} printed invalid UTF-8", cmd))?;
        Ok(stdout.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl Default for RezCli {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the `major.minor` version of a full python package name.
///
/// `python-3.9.13` gives `3.9`; the last version token is dropped.
pub fn python_short_version(package: &str) -> Result<String> {
    let version = package
        .split_once('-')
        .map(|(_, version)| version)
        .unwrap_or(package);

    let tokens: Vec<&str> = version.split('.').collect();
    if tokens.len() < 2 || tokens.iter().any(|t| t.is_empty()) {
        anyhow::bail!("Cannot shorten version of package {:?}", package);
    }
    Ok(tokens[..tokens.len() - 1].join("."))
}
