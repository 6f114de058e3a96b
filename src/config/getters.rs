//! Getter methods for `FetchConfig`
//!
//! Accessors for configuration values, applying defaults where the
//! underlying field is optional, plus the derived directory layout.

use std::path::PathBuf;
use std::time::Duration;

use super::types::{BrowserKind, FetchConfig};

impl FetchConfig {
    #[must_use]
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    #[must_use]
    pub fn browser(&self) -> BrowserKind {
        self.browser
    }

    #[must_use]
    pub fn headless(&self) -> bool {
        self.headless
    }

    #[must_use]
    pub fn proxy_disabled(&self) -> bool {
        self.proxy_disabled
    }

    #[must_use]
    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs.unwrap_or(30))
    }

    #[must_use]
    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs.unwrap_or(5))
    }

    #[must_use]
    pub fn implicit_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.implicit_wait_timeout_secs.unwrap_or(20))
    }

    #[must_use]
    pub fn proxy_poll_wait(&self) -> Duration {
        Duration::from_secs(self.proxy_poll_wait_secs.unwrap_or(1))
    }

    #[must_use]
    pub fn proxy_reload_period(&self) -> Duration {
        Duration::from_secs(self.proxy_reload_period_secs.unwrap_or(120))
    }

    #[must_use]
    pub fn proxy_expiry(&self) -> Duration {
        Duration::from_secs(self.proxy_expiry_secs.unwrap_or(120))
    }

    #[must_use]
    pub fn refresher_period(&self) -> Duration {
        Duration::from_secs(self.refresher_period_secs.unwrap_or(10))
    }

    #[must_use]
    pub fn recover_batch(&self) -> usize {
        self.recover_batch
    }

    /// The hard ceiling on live driver sessions.
    ///
    /// Driver processes are expensive (memory, CPU, one OS process each) so
    /// the default is tied to host capacity: 1.5 x available cores.
    #[must_use]
    pub fn max_drivers(&self) -> usize {
        self.max_drivers
            .unwrap_or_else(|| num_cpus::get() * 3 / 2)
            .max(1)
    }

    #[must_use]
    pub fn master_list_url(&self) -> Option<&str> {
        self.master_list_url.as_deref()
    }

    #[must_use]
    pub fn is_master(&self) -> bool {
        self.is_master
    }

    #[must_use]
    pub fn max_url_length(&self) -> usize {
        self.max_url_length
    }

    // Directory layout under the base directory.

    #[must_use]
    pub fn proxy_dir(&self) -> PathBuf {
        self.base_dir.join("proxy")
    }

    /// Proxy list files dropped here are candidates, not yet live
    #[must_use]
    pub fn available_proxy_dir(&self) -> PathBuf {
        self.proxy_dir().join("available-proxies")
    }

    /// Every regular file here is loaded into the pool
    #[must_use]
    pub fn enabled_proxy_dir(&self) -> PathBuf {
        self.proxy_dir().join("enabled-proxies")
    }

    /// Pool state is archived here on shutdown, one timestamped subdir per run
    #[must_use]
    pub fn archive_dir(&self) -> PathBuf {
        self.proxy_dir().join("archive")
    }

    /// Breadcrumb holding the most recently handed-out proxy address
    #[must_use]
    pub fn latest_proxy_file(&self) -> PathBuf {
        self.proxy_dir().join("latest-available-proxy")
    }

    /// One hostname per line, read at startup and rewritten on report
    #[must_use]
    pub fn unreachable_hosts_file(&self) -> PathBuf {
        self.base_dir.join("unreachable-hosts.txt")
    }
}
