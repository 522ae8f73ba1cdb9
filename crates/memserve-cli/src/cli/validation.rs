//! Value parsers for CLI arguments.

/// Parse a listening port. `0` lets the OS choose.
pub fn parse_port(s: &str) -> Result<u16, String> {
    s.trim()
        .parse::<u16>()
        .map_err(|_| format!("'{}' is not a valid port (0-65535)", s))
}
