//! Port forwarding policy.
//!
//! The gateway is a shell endpoint, never a tunnel: both local (`ssh -L`) and
//! reverse (`ssh -R`) forwarding are refused. Not configurable.

use std::net::SocketAddr;

use tracing::warn;

/// Decide a local (direct-tcpip) forwarding request. Always denied.
pub fn allow_local_forward(peer: SocketAddr, destination_host: &str, destination_port: u32) -> bool {
    warn!(
        %peer,
        destination_host, destination_port, "Denied local port forwarding request"
    );
    false
}

/// Decide a reverse (tcpip-forward) forwarding request. Always denied.
pub fn allow_reverse_forward(peer: SocketAddr, bind_host: &str, bind_port: u32) -> bool {
    warn!(%peer, bind_host, bind_port, "Denied reverse port forwarding request");
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "192.0.2.10:50022".parse().unwrap()
    }

    #[test]
    fn local_forwarding_is_always_denied() {
        for (host, port) in [("localhost", 80), ("127.0.0.1", 22), ("example.com", 443), ("", 0)] {
            assert!(!allow_local_forward(peer(), host, port));
        }
    }

    #[test]
    fn reverse_forwarding_is_always_denied() {
        for (host, port) in [("0.0.0.0", 8080), ("127.0.0.1", 0), ("*", 2222), ("::1", u32::MAX)] {
            assert!(!allow_reverse_forward(peer(), host, port));
        }
    }
}
