//! Status lines for the terminal.
//!
//! Everything goes to stderr so stdout stays clean. Colors follow
//! `--no-color`, `NO_COLOR` and `FORCE_COLOR` via [`init_colors`].

use owo_colors::OwoColorize;
use std::sync::atomic::{AtomicBool, Ordering};

static COLORS: AtomicBool = AtomicBool::new(true);

/// Decide once whether status lines are colored.
///
/// ```no_run
/// memserve_cli::ui::init_colors(false);
/// memserve_cli::ui::success("Mirrored 12 files");
/// ```
pub fn init_colors(no_color: bool) {
    COLORS.store(!no_color && crate::logger::should_use_colors(), Ordering::Relaxed);
}

fn colors() -> bool {
    COLORS.load(Ordering::Relaxed)
}

pub fn success(message: &str) {
    if colors() {
        eprintln!("{} {}", "✓".green().bold(), message);
    } else {
        eprintln!("✓ {}", message);
    }
}

pub fn info(message: &str) {
    if colors() {
        eprintln!("{} {}", "ℹ".blue().bold(), message);
    } else {
        eprintln!("ℹ {}", message);
    }
}

pub fn warning(message: &str) {
    if colors() {
        eprintln!("{} {}", "⚠".yellow().bold(), message.yellow());
    } else {
        eprintln!("⚠ {}", message);
    }
}

pub fn error(message: &str) {
    if colors() {
        eprintln!("{} {}", "✗".red().bold(), message.red());
    } else {
        eprintln!("✗ {}", message);
    }
}

/// The address the server answers on, highlighted.
pub fn serving(url: &str) {
    if colors() {
        eprintln!("{} {}", "➜".cyan().bold(), format!("Serving {}", url).cyan());
    } else {
        eprintln!("➜ Serving {}", url);
    }
}

/// `1 file`, `3 files`.
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_messages() {
        init_colors(true);
        success("Success message");
        info("Info message");
        warning("Warning message");
        error("Error message");
        serving("http://127.0.0.1:7777");
    }

    #[test]
    fn test_plural() {
        assert_eq!(plural(0, "file"), "0 files");
        assert_eq!(plural(1, "file"), "1 file");
        assert_eq!(plural(2, "mock route"), "2 mock routes");
    }
}
