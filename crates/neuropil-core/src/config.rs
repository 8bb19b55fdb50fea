use crate::pkg::install::InstallOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory packages are installed into, relative to the working directory.
pub const DEFAULT_INSTALL_DIR: &str = "neuropil_modules";

/// Runtime configuration for the neuropil CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Resolve an install directory against the working directory.
    ///
    /// `None` means [`DEFAULT_INSTALL_DIR`].
    #[must_use]
    pub fn install_dir(&self, dir: Option<&Path>) -> PathBuf {
        let dir = dir.unwrap_or(Path::new(DEFAULT_INSTALL_DIR));
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.cwd.join(dir)
        }
    }

    /// Start install options rooted at this config's working directory.
    #[must_use]
    pub fn install_options<I, S>(&self, packages: I, dir: Option<&Path>) -> InstallOptions
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        InstallOptions::new(packages, self.install_dir(dir))
    }
}
