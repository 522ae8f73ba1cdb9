//! Logging setup for the memserve CLI.
//!
//! Installs a `tracing` subscriber that formats events from the `memserve`
//! library and this binary. Verbosity comes from `--verbose` / `--quiet`,
//! falling back to `RUST_LOG`, then to INFO.
//!
//! ```rust,no_run
//! use memserve_cli::logger::init_logger;
//!
//! init_logger(false, false, false);
//! tracing::info!("mirroring dist");
//! ```

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const VERBOSE_DIRECTIVES: &str = "memserve=debug,memserve_cli=debug";
const QUIET_DIRECTIVES: &str = "memserve=error,memserve_cli=error";
const DEFAULT_DIRECTIVES: &str = "memserve=info,memserve_cli=info";

/// Initialize the global subscriber. Call once, before anything logs.
///
/// Precedence: `verbose` (DEBUG) over `quiet` (ERROR) over `RUST_LOG` over
/// the INFO default.
pub fn init_logger(verbose: bool, quiet: bool, no_color: bool) {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color)
        .compact();

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter_for(verbose, quiet))
        .with(fmt_layer)
        .try_init();
}

/// The filter `init_logger` would install.
pub fn filter_for(verbose: bool, quiet: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new(VERBOSE_DIRECTIVES)
    } else if quiet {
        EnvFilter::new(QUIET_DIRECTIVES)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
    }
}

/// Should terminal output be coloured?
///
/// `NO_COLOR` disables, `FORCE_COLOR` forces, otherwise stdout's
/// capabilities decide.
pub fn should_use_colors() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }

    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }

    console::Term::stdout().features().colors_supported()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_verbose_wins_over_quiet() {
        assert_eq!(filter_for(true, true).to_string(), EnvFilter::new(VERBOSE_DIRECTIVES).to_string());
    }

    #[test]
    fn test_quiet_filter() {
        assert_eq!(filter_for(false, true).to_string(), EnvFilter::new(QUIET_DIRECTIVES).to_string());
    }

    #[test]
    #[serial]
    fn test_no_color_disables_colors() {
        unsafe {
            std::env::set_var("NO_COLOR", "1");
            std::env::set_var("FORCE_COLOR", "1");
        }
        assert!(!should_use_colors());
        unsafe {
            std::env::remove_var("NO_COLOR");
            std::env::remove_var("FORCE_COLOR");
        }
    }

    #[test]
    #[serial]
    fn test_force_color_enables_colors() {
        unsafe {
            std::env::remove_var("NO_COLOR");
            std::env::set_var("FORCE_COLOR", "1");
        }
        assert!(should_use_colors());
        unsafe {
            std::env::remove_var("FORCE_COLOR");
        }
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logger(false, true, true);
        init_logger(true, false, true);
    }
}
