//! Proxy record: one outbound proxy server's address plus liveness state

use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use super::probe::ProbeOutcome;

/// Identity and liveness state of one proxy server.
///
/// Identity is the `(host, port)` pair; all timing state is excluded from
/// equality and hashing so duplicate lines across list files collapse to one
/// record.
#[derive(Debug, Clone)]
pub struct ProxyEntry {
    pub host: String,
    pub port: u16,
    /// When this record was first parsed from a list file
    pub created_at: Instant,
    /// Last time the record passed a probe or was released healthy
    pub refreshed_at: Instant,
    /// Records older than `refreshed_at + ttl` are re-probed before reuse
    pub ttl: Duration,
    /// Result of the most recent liveness check, if any
    pub last_probe: Option<ProbeOutcome>,
}

impl ProxyEntry {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            host: host.into(),
            port,
            created_at: now,
            refreshed_at: now,
            ttl,
            last_probe: None,
        }
    }

    /// Parse one `host:port` line from a proxy list file.
    ///
    /// Returns `None` for anything that does not parse; callers skip bad
    /// lines without failing the file.
    #[must_use]
    pub fn parse(line: &str, ttl: Duration) -> Option<Self> {
        let line = line.trim();
        let (host, port) = line.rsplit_once(':')?;
        let host = host.trim();
        if host.is_empty() || host.contains(char::is_whitespace) {
            return None;
        }
        let port: u16 = port.trim().parse().ok()?;
        Some(Self::new(host, port, ttl))
    }

    /// The `host:port` address, the unit the driver pool binds by value
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn key(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.refreshed_at.elapsed() > self.ttl
    }

    /// Mark the record healthy now, restarting its TTL window
    pub fn refresh(&mut self) {
        self.refreshed_at = Instant::now();
    }
}

impl fmt::Display for ProxyEntry {
    /// Same format the list files use, so archives round-trip through `parse`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl PartialEq for ProxyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for ProxyEntry {}

impl Hash for ProxyEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(120);

    #[test]
    fn parse_accepts_host_port() {
        let entry = ProxyEntry::parse("1.2.3.4:8080", TTL).expect("valid line");
        assert_eq!(entry.host, "1.2.3.4");
        assert_eq!(entry.port, 8080);
        assert_eq!(entry.addr(), "1.2.3.4:8080");
    }

    #[test]
    fn parse_trims_whitespace() {
        let entry = ProxyEntry::parse("  proxy.example.com:3128  ", TTL).expect("valid line");
        assert_eq!(entry.host, "proxy.example.com");
        assert_eq!(entry.port, 3128);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ProxyEntry::parse("", TTL).is_none());
        assert!(ProxyEntry::parse("no-port-here", TTL).is_none());
        assert!(ProxyEntry::parse("host:notaport", TTL).is_none());
        assert!(ProxyEntry::parse("host:99999", TTL).is_none());
        assert!(ProxyEntry::parse(":8080", TTL).is_none());
        assert!(ProxyEntry::parse("two words:8080", TTL).is_none());
    }

    #[test]
    fn identity_ignores_timing_state() {
        let a = ProxyEntry::parse("1.2.3.4:8080", TTL).expect("valid");
        let mut b = ProxyEntry::parse("1.2.3.4:8080", Duration::from_secs(1)).expect("valid");
        b.refresh();
        assert_eq!(a, b);
    }

    #[test]
    fn expiry_follows_ttl() {
        let mut entry = ProxyEntry::new("1.2.3.4", 8080, Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert!(entry.is_expired());
        entry.ttl = Duration::from_secs(3600);
        entry.refresh();
        assert!(!entry.is_expired());
    }
}
