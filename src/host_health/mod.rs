//! Host reachability tracking and fetch-task backlogs
//!
//! The tracker answers one hot-path question (is this host worth fetching
//! from?) and keeps the bookkeeping around it: per-host failure strikes, a
//! persistent blacklist of unreachable hosts, per-host success statistics,
//! and durable backlogs of deferred, failed, timed-out and dead URLs.
//!
//! Nothing in here is fatal to a crawl. Persistence errors are logged and
//! the in-memory state is kept, so a later flush can still succeed.

pub mod store;

pub use store::{StoreError, StoreResult, TaskStore};

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::FetchConfig;
use store::{
    DEAD_URLS_PAGE, FAILED_URLS_PAGE, LAZY_FETCH_URLS_PAGE_BASE, TIMEOUT_URLS_PAGE,
};

/// Consecutive failures a host may accumulate before being blacklisted
const MAX_HOST_FAILURES: u32 = 3;

/// How a page was (or should be) fetched. The ordinal is part of the
/// persistent page-number scheme, so variant order is load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    Native,
    Proxy,
    Browser,
    Unknown,
}

impl FetchMode {
    #[must_use]
    pub fn ordinal(self) -> i64 {
        match self {
            Self::Native => 0,
            Self::Proxy => 1,
            Self::Browser => 2,
            Self::Unknown => 3,
        }
    }

    /// The store page holding this mode's deferred-fetch backlog
    #[must_use]
    pub fn lazy_page(self) -> i64 {
        LAZY_FETCH_URLS_PAGE_BASE + self.ordinal()
    }
}

/// Coarse page classification, used only for per-host statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageCategory {
    Index,
    Detail,
    Search,
    Media,
    Forum,
    Blog,
    Unknown,
}

/// What a successful fetch reports back to the tracker
#[derive(Debug, Clone)]
pub struct PageInfo {
    pub url: String,
    pub category: PageCategory,
    pub from_seed: bool,
}

impl PageInfo {
    #[must_use]
    pub fn new(url: impl Into<String>, category: PageCategory, from_seed: bool) -> Self {
        Self {
            url: url.into(),
            category,
            from_seed,
        }
    }
}

/// Per-host success counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchStats {
    pub urls: u64,
    pub index_urls: u64,
    pub detail_urls: u64,
    pub search_urls: u64,
    pub media_urls: u64,
    pub forum_urls: u64,
    pub blog_urls: u64,
    pub unknown_urls: u64,
    pub urls_from_seed: u64,
    pub urls_too_long: u64,
}

impl std::fmt::Display for FetchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "urls: {}, index: {}, detail: {}, search: {}, media: {}, forum: {}, blog: {}, unknown: {}, from seed: {}, too long: {}",
            self.urls,
            self.index_urls,
            self.detail_urls,
            self.search_urls,
            self.media_urls,
            self.forum_urls,
            self.blog_urls,
            self.unknown_urls,
            self.urls_from_seed,
            self.urls_too_long
        )
    }
}

/// Tracks host reachability and the durable fetch-task backlogs
pub struct HostHealthTracker {
    store: Arc<TaskStore>,
    unreachable_file: PathBuf,
    max_url_length: usize,

    unreachable: RwLock<BTreeSet<String>>,
    strikes: DashMap<String, u32>,
    stats: Mutex<BTreeMap<String, FetchStats>>,

    failed_urls: RwLock<HashSet<String>>,
    timeout_urls: RwLock<HashSet<String>>,
    dead_urls: RwLock<HashSet<String>>,

    closed: AtomicBool,
}

impl HostHealthTracker {
    /// Build a tracker over the shared store, seeding in-memory state from
    /// the previous run: the timeout page is drained (those URLs get
    /// retried), the failed and dead pages are read but left in place, and
    /// the unreachable-host blacklist comes from its flat file.
    pub async fn new(config: &FetchConfig, store: Arc<TaskStore>) -> Self {
        let timeout_urls = match store.take_all(TIMEOUT_URLS_PAGE).await {
            Ok(urls) => urls.into_iter().collect(),
            Err(e) => {
                warn!("Failed to load timeout backlog: {e}");
                HashSet::new()
            }
        };
        let failed_urls = match store.get_all(FAILED_URLS_PAGE).await {
            Ok(urls) => urls.into_iter().collect(),
            Err(e) => {
                warn!("Failed to load failed backlog: {e}");
                HashSet::new()
            }
        };
        let dead_urls = match store.get_all(DEAD_URLS_PAGE).await {
            Ok(urls) => urls.into_iter().collect(),
            Err(e) => {
                warn!("Failed to load dead backlog: {e}");
                HashSet::new()
            }
        };

        let unreachable_file = config.unreachable_hosts_file();
        if let Some(parent) = unreachable_file.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Failed to create {}: {}", parent.display(), e);
            }
        }
        let unreachable: BTreeSet<String> = match std::fs::read_to_string(&unreachable_file) {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                warn!(
                    "Failed to read {}: {}",
                    unreachable_file.display(),
                    e
                );
                BTreeSet::new()
            }
        };

        let tracker = Self {
            store,
            unreachable_file,
            max_url_length: config.max_url_length(),
            unreachable: RwLock::new(unreachable),
            strikes: DashMap::new(),
            stats: Mutex::new(BTreeMap::new()),
            failed_urls: RwLock::new(failed_urls),
            timeout_urls: RwLock::new(timeout_urls),
            dead_urls: RwLock::new(dead_urls),
            closed: AtomicBool::new(false),
        };

        info!(
            "Host health tracker ready: {} unreachable hosts, {} timeout, {} failed, {} dead URLs",
            tracker.unreachable.read().len(),
            tracker.timeout_urls.read().len(),
            tracker.failed_urls.read().len(),
            tracker.dead_urls.read().len()
        );

        tracker
    }

    // Host reachability.

    #[must_use]
    pub fn is_reachable(&self, host: &str) -> bool {
        !self.unreachable.read().contains(host)
    }

    #[must_use]
    pub fn is_gone(&self, host: &str) -> bool {
        !self.is_reachable(host)
    }

    /// Record one failed fetch against the URL's host. Returns `true`
    /// exactly once per host: on the strike that crosses the threshold and
    /// blacklists it. Hosts already blacklisted accumulate nothing.
    pub fn log_failure_host(&self, url: &str) -> bool {
        let Some(host) = host_of(url) else {
            debug!("No host in url, failure not counted: {url}");
            return false;
        };

        if self.unreachable.read().contains(&host) {
            return false;
        }

        let count = {
            let mut entry = self.strikes.entry(host.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        if count > MAX_HOST_FAILURES {
            self.strikes.remove(&host);
            self.unreachable.write().insert(host.clone());
            warn!("Host {host} is unreachable after {count} failures");
            return true;
        }

        false
    }

    /// Record a successful fetch: bump the host's category counters and
    /// forgive any accumulated failures, including a blacklisting.
    pub fn log_success_host(&self, page: &PageInfo) {
        let Some(host) = host_of(&page.url) else {
            debug!("No host in url, success not counted: {}", page.url);
            return;
        };

        {
            let mut stats = self.stats.lock();
            let entry = stats.entry(host.clone()).or_default();
            entry.urls += 1;
            match page.category {
                PageCategory::Index => entry.index_urls += 1,
                PageCategory::Detail => entry.detail_urls += 1,
                PageCategory::Search => entry.search_urls += 1,
                PageCategory::Media => entry.media_urls += 1,
                PageCategory::Forum => entry.forum_urls += 1,
                PageCategory::Blog => entry.blog_urls += 1,
                PageCategory::Unknown => entry.unknown_urls += 1,
            }
            if page.from_seed {
                entry.urls_from_seed += 1;
            }
            if page.url.len() > self.max_url_length {
                entry.urls_too_long += 1;
            }
        }

        self.strikes.remove(&host);
        if self.unreachable.write().remove(&host) {
            info!("Host {host} is reachable again");
        }
    }

    // Per-URL status sets.

    #[must_use]
    pub fn is_failed(&self, url: &str) -> bool {
        self.failed_urls.read().contains(url)
    }

    pub fn track_failed(&self, url: &str) {
        self.failed_urls.write().insert(url.to_string());
    }

    pub fn track_failed_all<I, S>(&self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut failed = self.failed_urls.write();
        for url in urls {
            failed.insert(url.into());
        }
    }

    #[must_use]
    pub fn is_timeout(&self, url: &str) -> bool {
        self.timeout_urls.read().contains(url)
    }

    pub fn track_timeout(&self, url: &str) {
        self.timeout_urls.write().insert(url.to_string());
    }

    #[must_use]
    pub fn is_dead(&self, url: &str) -> bool {
        self.dead_urls.read().contains(url)
    }

    pub fn track_dead(&self, url: &str) {
        self.dead_urls.write().insert(url.to_string());
    }

    // Durable backlogs.

    /// Queue URLs for a later fetch under the given mode's backlog
    pub async fn commit_lazy_tasks<I, S>(&self, mode: FetchMode, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if let Err(e) = self.store.index_all(mode.lazy_page(), urls).await {
            warn!("Failed to commit lazy tasks ({mode:?}): {e}");
            return;
        }
        if let Err(e) = self.store.flush().await {
            warn!("Failed to flush task store: {e}");
        }
    }

    /// Peek at a mode's backlog without consuming it
    pub async fn get_lazy_tasks(&self, mode: FetchMode) -> Vec<String> {
        match self.store.get_all(mode.lazy_page()).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!("Failed to read lazy tasks ({mode:?}): {e}");
                Vec::new()
            }
        }
    }

    /// Consume up to `n` URLs from a mode's backlog
    pub async fn take_lazy_tasks(&self, mode: FetchMode, n: usize) -> Vec<String> {
        match self.store.take_n(mode.lazy_page(), n).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!("Failed to take lazy tasks ({mode:?}): {e}");
                Vec::new()
            }
        }
    }

    /// Persist URLs into the shared timeout backlog
    pub async fn commit_timeout_tasks<I, S>(&self, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if let Err(e) = self.store.index_all(TIMEOUT_URLS_PAGE, urls).await {
            warn!("Failed to commit timeout tasks: {e}");
        }
    }

    /// Drain the persisted timeout backlog
    pub async fn take_timeout_tasks(&self) -> Vec<String> {
        match self.store.take_all(TIMEOUT_URLS_PAGE).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!("Failed to take timeout tasks: {e}");
                Vec::new()
            }
        }
    }

    // Reporting and teardown.

    /// Log the per-host statistics table and rewrite the unreachable-hosts
    /// file so the blacklist survives a restart even without `shutdown`.
    pub fn report(&self) {
        let unreachable = self.unreachable.read();
        info!("Unreachable hosts: {}", unreachable.len());

        let mut content = String::new();
        for host in unreachable.iter() {
            content.push_str(host);
            content.push('\n');
        }
        drop(unreachable);

        if let Err(e) = std::fs::write(&self.unreachable_file, content) {
            warn!(
                "Failed to write {}: {}",
                self.unreachable_file.display(),
                e
            );
        }

        let stats = self.stats.lock();
        info!("Fetched from {} hosts", stats.len());
        for (host, s) in stats.iter() {
            info!("{host} - {s}");
        }
    }

    /// Flush every non-empty in-memory URL set to its persistent page and
    /// checkpoint the store. Idempotent.
    pub async fn shutdown(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        self.report();

        let timeout: Vec<String> = self.timeout_urls.read().iter().cloned().collect();
        let failed: Vec<String> = self.failed_urls.read().iter().cloned().collect();
        let dead: Vec<String> = self.dead_urls.read().iter().cloned().collect();

        for (page, urls, label) in [
            (TIMEOUT_URLS_PAGE, timeout, "timeout"),
            (FAILED_URLS_PAGE, failed, "failed"),
            (DEAD_URLS_PAGE, dead, "dead"),
        ] {
            if urls.is_empty() {
                continue;
            }
            debug!("Persisting {} {label} URLs", urls.len());
            if let Err(e) = self.store.index_all(page, &urls).await {
                warn!("Failed to persist {label} URLs: {e}");
            }
        }

        if let Err(e) = self.store.flush().await {
            warn!("Failed to flush task store at shutdown: {e}");
        }
        info!("Host health tracker shutdown complete");
    }
}

/// Host component of a URL, if it has one
fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(String::from))
}
