//! Builder for `FetchConfig` with validation and sensible defaults
//!
//! Every field has a working default; `build()` validates timeouts and
//! normalizes the base directory to an absolute path so all later path
//! operations agree on the layout.

use anyhow::{Result, anyhow};
use std::path::PathBuf;

use super::types::{BrowserKind, FetchConfig};

pub struct FetchConfigBuilder {
    inner: FetchConfig,
}

impl Default for FetchConfigBuilder {
    fn default() -> Self {
        Self {
            inner: FetchConfig::default(),
        }
    }
}

impl FetchConfig {
    /// Create a builder for configuring a `FetchConfig` with a fluent interface
    #[must_use]
    pub fn builder() -> FetchConfigBuilder {
        FetchConfigBuilder::default()
    }
}

impl FetchConfigBuilder {
    #[must_use]
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.inner.base_dir = dir.into();
        self
    }

    #[must_use]
    pub fn browser(mut self, kind: BrowserKind) -> Self {
        self.inner.browser = kind;
        self
    }

    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.inner.headless = headless;
        self
    }

    #[must_use]
    pub fn proxy_disabled(mut self, disabled: bool) -> Self {
        self.inner.proxy_disabled = disabled;
        self
    }

    #[must_use]
    pub fn page_load_timeout_secs(mut self, secs: u64) -> Self {
        self.inner.page_load_timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn script_timeout_secs(mut self, secs: u64) -> Self {
        self.inner.script_timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn implicit_wait_timeout_secs(mut self, secs: u64) -> Self {
        self.inner.implicit_wait_timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn proxy_poll_wait_secs(mut self, secs: u64) -> Self {
        self.inner.proxy_poll_wait_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn proxy_reload_period_secs(mut self, secs: u64) -> Self {
        self.inner.proxy_reload_period_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn proxy_expiry_secs(mut self, secs: u64) -> Self {
        self.inner.proxy_expiry_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn refresher_period_secs(mut self, secs: u64) -> Self {
        self.inner.refresher_period_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn recover_batch(mut self, n: usize) -> Self {
        self.inner.recover_batch = n;
        self
    }

    #[must_use]
    pub fn max_drivers(mut self, n: usize) -> Self {
        self.inner.max_drivers = Some(n);
        self
    }

    #[must_use]
    pub fn master_list_url(mut self, url: impl Into<String>) -> Self {
        self.inner.master_list_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn is_master(mut self, is_master: bool) -> Self {
        self.inner.is_master = is_master;
        self
    }

    #[must_use]
    pub fn max_url_length(mut self, len: usize) -> Self {
        self.inner.max_url_length = len;
        self
    }

    /// Validate and finalize the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero page-load timeout, a zero poll wait,
    /// or a zero driver ceiling, all of which would deadlock acquisition.
    pub fn build(mut self) -> Result<FetchConfig> {
        if self.inner.page_load_timeout_secs == Some(0) {
            return Err(anyhow!("page_load_timeout must be non-zero"));
        }
        if self.inner.proxy_poll_wait_secs == Some(0) {
            return Err(anyhow!("proxy_poll_wait must be non-zero"));
        }
        if self.inner.max_drivers == Some(0) {
            return Err(anyhow!("max_drivers must be non-zero"));
        }

        // Normalize to an absolute path so the directory layout is stable
        // regardless of the caller's working directory.
        if self.inner.base_dir.is_relative() {
            let cwd = std::env::current_dir()
                .map_err(|e| anyhow!("cannot resolve current directory: {e}"))?;
            self.inner.base_dir = cwd.join(&self.inner.base_dir);
        }

        Ok(self.inner)
    }
}
