//! Liveness probing for proxy servers
//!
//! The pool never decides on its own whether a proxy is dead; it asks a
//! `LivenessProbe`. The default probe is a plain TCP connect with a short
//! timeout. Classification policy:
//!
//! - address does not resolve, or connection refused => `Gone` (the server
//!   is not there; recovery will drop the record)
//! - connect timeout or any other I/O error => `Transient` (keep the record
//!   in the unavailable set for a later re-check)
//! - successful connect => `Alive`

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

/// Outcome of one liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The proxy answered; safe to hand out
    Alive,
    /// The proxy did not answer but may come back
    Transient,
    /// The proxy is permanently gone and should be dropped
    Gone,
}

impl ProbeOutcome {
    #[must_use]
    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Alive)
    }

    #[must_use]
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone)
    }
}

/// A pluggable liveness predicate for proxy servers.
///
/// Implementations must be cheap enough to call from `recover` in bulk and
/// must never panic; a check that fails internally reports `Transient`.
pub trait LivenessProbe: Send + Sync {
    fn probe(&self, host: &str, port: u16) -> ProbeOutcome;
}

/// Default probe: TCP connect with a bounded timeout
pub struct TcpProbe {
    connect_timeout: Duration,
}

impl TcpProbe {
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl LivenessProbe for TcpProbe {
    fn probe(&self, host: &str, port: u16) -> ProbeOutcome {
        let mut addrs = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!("Proxy {host}:{port} does not resolve: {e}");
                return ProbeOutcome::Gone;
            }
        };

        let Some(addr) = addrs.next() else {
            debug!("Proxy {host}:{port} resolved to no addresses");
            return ProbeOutcome::Gone;
        };

        match TcpStream::connect_timeout(&addr, self.connect_timeout) {
            Ok(_) => ProbeOutcome::Alive,
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                debug!("Proxy {host}:{port} refused connection");
                ProbeOutcome::Gone
            }
            Err(e) => {
                debug!("Proxy {host}:{port} probe failed: {e}");
                ProbeOutcome::Transient
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_connection_is_gone() {
        // Bind a listener to reserve a port, then drop it so nothing is
        // listening there; a connect on loopback then gets refused.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let probe = TcpProbe::new(Duration::from_millis(500));
        assert_eq!(probe.probe("127.0.0.1", port), ProbeOutcome::Gone);
    }

    #[test]
    fn listening_socket_is_alive() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let probe = TcpProbe::new(Duration::from_millis(500));
        assert_eq!(probe.probe("127.0.0.1", port), ProbeOutcome::Alive);
    }

    #[test]
    fn unresolvable_host_is_gone() {
        let probe = TcpProbe::new(Duration::from_millis(500));
        assert_eq!(
            probe.probe("no-such-host.invalid", 8080),
            ProbeOutcome::Gone
        );
    }
}
