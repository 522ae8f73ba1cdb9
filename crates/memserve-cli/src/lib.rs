//! memserve CLI - serve a build directory from memory with live reload.
//!
//! The binary is a thin producer around the [`memserve`] library: it
//! mirrors a directory on disk into the server's in-memory store, keeps the
//! store in sync as files change, and runs the server until Ctrl+C.
//!
//! - [`cli`] - argument parsing
//! - [`config`] - layered configuration (file, `MEMSERVE_*`, flags)
//! - [`mirror`] / [`watcher`] - disk to store synchronization
//! - [`serve`] - the command itself
//! - [`error`], [`logger`], [`ui`] - ambient plumbing

pub mod cli;
pub mod config;
pub mod error;
pub mod logger;
pub mod mirror;
pub mod serve;
pub mod ui;
pub mod watcher;

pub use error::{CliError, ConfigError, Result, ResultExt};
