//! Command-line interface for memserve.
//!
//! One command: mirror a build output directory into memory and serve it.
//!
//! ```text
//! memserve [SOURCE] [--dir /dist] [--port 7777] [--reload] ...
//! ```

mod validation;

use clap::Parser;
use std::path::PathBuf;

pub use validation::parse_port;

/// memserve - serve a build directory from memory with live reload
#[derive(Parser, Debug)]
#[command(
    name = "memserve",
    version,
    about = "Serve a build directory from memory with live reload",
    long_about = "memserve mirrors a build output directory into an in-memory store and serves it\n\
                  over HTTP(S). Changed files are picked up by a watcher and connected browsers\n\
                  reload automatically. Mock routes and proxy rules come from memserve.config.json."
)]
pub struct Cli {
    /// Directory on disk to mirror
    ///
    /// Every file below it is loaded at startup and kept in sync while the
    /// server runs. Defaults to `dist`, or `source` from the config file.
    #[arg(value_name = "SOURCE")]
    pub source: Option<PathBuf>,

    /// Virtual serving root the mirrored files are written under
    #[arg(short, long, value_name = "DIR")]
    pub dir: Option<String>,

    /// Preferred port; the next free one within +10 is used if it is taken
    #[arg(short, long, value_name = "PORT", value_parser = parse_port)]
    pub port: Option<u16>,

    /// Interface to listen on
    #[arg(long, value_name = "HOST")]
    pub host: Option<std::net::IpAddr>,

    /// Inject the reload client and push reloads on every change
    #[arg(long, overrides_with = "no_reload")]
    pub reload: bool,

    /// Disable live reload, even if the config file enables it
    #[arg(long, overrides_with = "reload")]
    pub no_reload: bool,

    /// Debounce window for browser reloads, in milliseconds
    #[arg(long, value_name = "MS")]
    pub reload_time: Option<u64>,

    /// Private key (PEM) for HTTPS
    #[arg(long, value_name = "FILE", requires = "https_cert")]
    pub https_key: Option<PathBuf>,

    /// Certificate chain (PEM) for HTTPS
    #[arg(long, value_name = "FILE", requires = "https_key")]
    pub https_cert: Option<PathBuf>,

    /// Config file (default: memserve.config.json or memserve.config.toml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

impl Cli {
    /// Reload setting from the flags, `None` when neither was given.
    pub fn reload_flag(&self) -> Option<bool> {
        match (self.reload, self.no_reload) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}
