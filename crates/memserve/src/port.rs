//! Port selection.
//!
//! Tries the preferred port first, then the next ten, by binding a
//! throwaway listener on each candidate. The probe is not atomic: another
//! process may take the port before the real bind, which then fails with
//! `BindFailure`.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};

/// How many ports past the preferred one are probed.
pub const PROBE_WINDOW: u16 = 10;

/// Pick a free port on all interfaces.
///
/// See [`allocate_on`].
pub fn allocate(preferred: u16, excluded: &HashSet<u16>) -> u16 {
    allocate_on(IpAddr::V4(Ipv4Addr::UNSPECIFIED), preferred, excluded)
}

/// Pick a free port on `host`.
///
/// Probes `preferred..=min(preferred + 10, 65535)` in order and returns
/// the first candidate that is not excluded and binds. Falls back to
/// `preferred` when the whole window is taken.
pub fn allocate_on(host: IpAddr, preferred: u16, excluded: &HashSet<u16>) -> u16 {
    let last = preferred.saturating_add(PROBE_WINDOW);

    for port in preferred..=last {
        if excluded.contains(&port) {
            continue;
        }

        if TcpListener::bind(SocketAddr::new(host, port)).is_ok() {
            if port != preferred {
                tracing::warn!(preferred, port, "port is busy, using the next free one");
            }
            return port;
        }
    }

    tracing::warn!(
        preferred,
        last,
        "no free port in the probe window, keeping the preferred one"
    );
    preferred
}
