//! Error handling for the memserve CLI.
//!
//! `CliError` is the top-level type every command returns. Library failures
//! arrive through `ServerError`, config problems through `ConfigError`, and
//! `main` turns whatever is left into a miette report.
//!
//! ```rust,no_run
//! use memserve_cli::error::{Result, ResultExt};
//! use std::path::Path;
//!
//! fn read_config(path: &Path) -> Result<String> {
//!     std::fs::read_to_string(path)
//!         .with_path(path)
//!         .with_hint("Pass --config <path> or create memserve.config.json")
//! }
//! ```

use memserve::ServerError;
use miette::Report;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup or store failure reported by the server library
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("{0}")]
    Custom(String),
}

/// Errors while locating, reading and layering configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {}\n\nHint: Create memserve.config.json or pass --config <path>", .0.display())]
    NotFound(PathBuf),

    #[error("Unsupported config format: {}\n\nHint: Use a .json or .toml file", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Invalid config file {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for '{field}': {value}\n\nHint: {hint}")]
    InvalidValue {
        field: String,
        value: String,
        hint: String,
    },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;

/// Attach context to any error that converts into `CliError`.
pub trait ResultExt<T> {
    /// Turn a not-found I/O error into `FileNotFound(path)`.
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T>;

    /// Append a hint line to the message.
    fn with_hint(self, hint: impl std::fmt::Display) -> Result<T>;

    /// Prefix the message.
    fn context(self, msg: impl std::fmt::Display) -> Result<T>;
}

impl<T, E: Into<CliError>> ResultExt<T> for std::result::Result<T, E> {
    fn with_path(self, path: impl AsRef<std::path::Path>) -> Result<T> {
        self.map_err(|e| match e.into() {
            CliError::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {
                CliError::FileNotFound(path.as_ref().to_path_buf())
            }
            other => other,
        })
    }

    fn with_hint(self, hint: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            CliError::Custom(format!("{}\n\nHint: {}", err, hint))
        })
    }

    fn context(self, msg: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| {
            let err: CliError = e.into();
            CliError::Custom(format!("{}: {}", msg, err))
        })
    }
}

/// Convert a `CliError` into a miette report for `main`.
pub fn cli_error_to_miette(err: CliError) -> Report {
    match err {
        CliError::Server(ServerError::BindFailure { addr, source }) => miette::miette!(
            "Could not listen on {}: {}\n\nHint: Pick another --port or stop the process holding it",
            addr,
            source
        ),
        CliError::Server(ServerError::TlsMaterialMissing { path, source }) => miette::miette!(
            "Cannot read TLS material {}: {}\n\nHint: Check --https-key and --https-cert",
            path.display(),
            source
        ),
        CliError::Config(e) => miette::miette!("{}", e),
        other => miette::miette!("{}", other),
    }
}
