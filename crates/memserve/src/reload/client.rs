//! Browser side of the reload channel.

use super::{CLIENT_PATH, SOCKET_PATH};

const CLIENT_SOURCE: &str = include_str!("../../assets/reload-client.js");

/// Build the client script served at [`CLIENT_PATH`].
///
/// The embedded client is wrapped in an IIFE and started with the
/// debounce window: every reload event resets one pending timer, so a burst
/// of writes inside `reload_time_ms` turns into a single page reload.
pub fn client_script(reload_time_ms: u64) -> String {
    format!(
        "(function() {{\n{CLIENT_SOURCE}\n\n  client({{\n    reloadTime: {reload_time_ms},\n    socketPath: '{SOCKET_PATH}'\n  }});\n}})();"
    )
}

/// Markup appended to every HTML document when reload is on.
pub fn injection_snippet() -> String {
    format!(
        "\n\n<!-- memserve injection scripts start -->\n<script src=\"{CLIENT_PATH}\"></script>\n<!-- memserve injection scripts end -->"
    )
}
