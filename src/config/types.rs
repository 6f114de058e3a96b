//! Core configuration types for the fetch resource pools
//!
//! This module contains the main `FetchConfig` struct holding every tunable
//! the proxy pool, driver pool, host tracker and background refresher read.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Supported browser-automation backends.
///
/// A closed enumeration selected by configuration at pool construction time.
/// `Http` is a JS-less fallback that fetches through a plain HTTP client; it
/// is much cheaper than a Chromium session but renders nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    Chromium,
    Http,
}

/// Main configuration struct for the fetch resource pools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Base directory for proxy lists, archives and host files.
    ///
    /// **INVARIANT:** Always an absolute path (normalized in builder).
    pub(crate) base_dir: PathBuf,

    /// Which driver backend new sessions use
    pub(crate) browser: BrowserKind,

    /// Run browser sessions headless. In non-headless (debug) mode the
    /// driver pool skips disposal on shutdown so open windows stay up.
    pub(crate) headless: bool,

    /// Skip proxy binding entirely when constructing driver sessions
    pub(crate) proxy_disabled: bool,

    /// Timeout for page navigation in a driver session
    pub(crate) page_load_timeout_secs: Option<u64>,

    /// Timeout for script evaluation in a driver session
    pub(crate) script_timeout_secs: Option<u64>,

    /// Implicit element-wait timeout in a driver session
    pub(crate) implicit_wait_timeout_secs: Option<u64>,

    /// How long one `ProxyPool::acquire` attempt waits on an empty free set
    pub(crate) proxy_poll_wait_secs: Option<u64>,

    /// A proxy list file is re-read once its mtime advances by more than this
    pub(crate) proxy_reload_period_secs: Option<u64>,

    /// Time-to-live given to a proxy record on load/refresh; expired records
    /// are re-probed before being handed out
    pub(crate) proxy_expiry_secs: Option<u64>,

    /// Base period of the background pool refresher
    pub(crate) refresher_period_secs: Option<u64>,

    /// How many unavailable proxies one refresher tick re-checks
    pub(crate) recover_batch: usize,

    /// Hard ceiling on live driver sessions.
    /// Default: 1.5 x available CPU cores.
    pub(crate) max_drivers: Option<usize>,

    /// URL of the master node's proxy list, pulled periodically by the
    /// refresher. None means no master synchronization.
    pub(crate) master_list_url: Option<String>,

    /// This process is the master; never pull the list from itself
    pub(crate) is_master: bool,

    /// URLs longer than this are counted in the over-length bucket
    pub(crate) max_url_length: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./fetchpool"),
            browser: BrowserKind::Chromium,
            headless: true,
            proxy_disabled: false,
            page_load_timeout_secs: Some(30),
            script_timeout_secs: Some(5),
            implicit_wait_timeout_secs: Some(20),
            proxy_poll_wait_secs: Some(1),
            proxy_reload_period_secs: Some(120),
            proxy_expiry_secs: Some(120),
            refresher_period_secs: Some(10),
            recover_batch: 100,
            max_drivers: None, // computed from core count
            master_list_url: None,
            is_master: false,
            max_url_length: 1024,
        }
    }
}

/// The three timeouts applied to every new driver session, each
/// independently configurable per acquire call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    pub page_load: Duration,
    pub script: Duration,
    pub implicit_wait: Duration,
}

impl FetchConfig {
    /// Snapshot the per-session timeouts from this configuration
    #[must_use]
    pub fn session_timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            page_load: self.page_load_timeout(),
            script: self.script_timeout(),
            implicit_wait: self.implicit_wait_timeout(),
        }
    }

    /// Load a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse.
    pub fn load_json(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        use anyhow::Context;
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Write this configuration to a JSON file, pretty-printed.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_json(&self, path: impl AsRef<std::path::Path>) -> anyhow::Result<()> {
        use anyhow::Context;
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("fetch.json");

        let config = FetchConfig {
            browser: BrowserKind::Http,
            proxy_disabled: true,
            max_drivers: Some(4),
            ..FetchConfig::default()
        };
        config.save_json(&path).expect("save");

        let loaded = FetchConfig::load_json(&path).expect("load");
        assert_eq!(loaded.browser, BrowserKind::Http);
        assert!(loaded.proxy_disabled);
        assert_eq!(loaded.max_drivers, Some(4));
        assert_eq!(loaded.max_url_length, 1024);
    }
}
