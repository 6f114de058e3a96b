//! Proxy pool: loads proxy servers from disk, hands them out under
//! concurrent demand, retires unhealthy ones and recovers them later.
//!
//! Every record the pool knows about is in exactly one of three sets:
//! *free* (available), *working* (held by a fetch attempt) or *unavailable*
//! (failed, pending a recovery check). Records move between the sets by
//! value, so the partition is structural rather than enforced by flags.
//!
//! Acquisition never errors; an exhausted pool returns `None` after a
//! bounded wait and the caller retries or skips the URL.

pub mod entry;
pub mod probe;

pub use entry::ProxyEntry;
pub use probe::{LivenessProbe, ProbeOutcome, TcpProbe};

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use rand::seq::SliceRandom;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::config::FetchConfig;

/// The disjoint free/working/unavailable partition, guarded as one unit
#[derive(Default)]
struct ProxySets {
    free: VecDeque<ProxyEntry>,
    working: HashMap<(String, u16), ProxyEntry>,
    unavailable: Vec<ProxyEntry>,
}

impl ProxySets {
    fn contains(&self, key: &(String, u16)) -> bool {
        self.working.contains_key(key)
            || self.free.iter().any(|e| e.key() == *key)
            || self.unavailable.iter().any(|e| e.key() == *key)
    }

    fn total(&self) -> usize {
        self.free.len() + self.working.len() + self.unavailable.len()
    }
}

/// Pool of outbound proxy servers shared by all fetch workers
pub struct ProxyPool {
    enabled_dir: PathBuf,
    archive_dir: PathBuf,
    latest_file: PathBuf,
    poll_wait: Duration,
    reload_period: Duration,
    entry_ttl: Duration,
    probe: Arc<dyn LivenessProbe>,
    sets: Mutex<ProxySets>,
    /// Wakes one acquire waiter per release/load
    free_notify: Notify,
    /// Last observed modification time per list file
    mtimes: DashMap<PathBuf, SystemTime>,
    closed: AtomicBool,
}

impl ProxyPool {
    /// Create a pool with the default TCP liveness probe.
    ///
    /// Creates the proxy directory layout under the configured base
    /// directory; directory creation failures are logged and the pool starts
    /// empty rather than failing construction.
    pub fn new(config: &FetchConfig) -> Arc<Self> {
        Self::with_probe(config, Arc::new(TcpProbe::default()))
    }

    /// Create a pool with a caller-supplied liveness probe
    pub fn with_probe(config: &FetchConfig, probe: Arc<dyn LivenessProbe>) -> Arc<Self> {
        for dir in [
            config.available_proxy_dir(),
            config.enabled_proxy_dir(),
            config.archive_dir(),
        ] {
            if let Err(e) = std::fs::create_dir_all(&dir) {
                warn!("Failed to create proxy directory {}: {}", dir.display(), e);
            }
        }

        Arc::new(Self {
            enabled_dir: config.enabled_proxy_dir(),
            archive_dir: config.archive_dir(),
            latest_file: config.latest_proxy_file(),
            poll_wait: config.proxy_poll_wait(),
            reload_period: config.proxy_reload_period(),
            entry_ttl: config.proxy_expiry(),
            probe,
            sets: Mutex::new(ProxySets::default()),
            free_notify: Notify::new(),
            mtimes: DashMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Load every regular file in the enabled-proxies directory.
    ///
    /// Returns the number of new records added to the free set. I/O errors
    /// leave the pool in its prior state.
    pub async fn load(&self) -> usize {
        let files = match list_regular_files(&self.enabled_dir) {
            Ok(files) => files,
            Err(e) => {
                warn!(
                    "Failed to list proxy directory {}: {}",
                    self.enabled_dir.display(),
                    e
                );
                return 0;
            }
        };

        let mut added = 0;
        for path in files {
            added += self.load_file(&path).await;
        }
        added
    }

    /// Load one proxy list file: non-blank, non-comment, de-duplicated,
    /// shuffled. Parse failures on individual lines are skipped.
    ///
    /// Shuffling avoids correlated load across many crawler processes that
    /// read the same file concurrently.
    async fn load_file(&self, path: &Path) -> usize {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to read proxy file {}: {}", path.display(), e);
                return 0;
            }
        };

        if let Ok(modified) = std::fs::metadata(path).and_then(|m| m.modified()) {
            self.mtimes.insert(path.to_path_buf(), modified);
        }

        let mut seen = HashSet::new();
        let mut entries: Vec<ProxyEntry> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| ProxyEntry::parse(line, self.entry_ttl))
            .filter(|entry| seen.insert(entry.key()))
            .collect();
        entries.shuffle(&mut rand::rng());

        let mut added = 0;
        {
            let mut sets = self.sets.lock().await;
            for entry in entries {
                if !sets.contains(&entry.key()) {
                    sets.free.push_back(entry);
                    added += 1;
                }
            }
        }

        if added > 0 {
            info!("Loaded {} proxies from {}", added, path.display());
            self.free_notify.notify_waiters();
        }
        added
    }

    /// Pop a proxy from the free set, waiting up to the polling interval
    /// when the set is empty.
    ///
    /// An expired record is re-probed before being handed out: if it still
    /// answers its TTL is refreshed, otherwise it moves to the unavailable
    /// set and the loop continues until the free set drains. Returns `None`
    /// once no proxy becomes available within the bounded wait.
    pub async fn acquire(&self) -> Option<ProxyEntry> {
        loop {
            if self.is_closed() {
                return None;
            }

            let candidate = self.sets.lock().await.free.pop_front();

            let Some(mut entry) = candidate else {
                // Bounded wait for a release or reload to repopulate the set.
                let waited =
                    tokio::time::timeout(self.poll_wait, self.free_notify.notified()).await;
                if waited.is_err() {
                    return None;
                }
                continue;
            };

            if entry.is_expired() {
                let outcome = self.probe_entry(&entry).await;
                entry.last_probe = Some(outcome);
                if !outcome.is_alive() {
                    debug!("Expired proxy {} failed re-check, retiring", entry);
                    self.sets.lock().await.unavailable.push(entry);
                    continue;
                }
                entry.refresh();
            }

            let handed = entry.clone();
            self.sets.lock().await.working.insert(entry.key(), entry);
            self.write_latest(&handed);
            return Some(handed);
        }
    }

    /// Return a proxy to the free set with a refreshed TTL.
    ///
    /// Safe under unbounded concurrent callers; releasing into a closed
    /// pool is a silent no-op.
    pub async fn release(&self, entry: ProxyEntry) {
        if self.is_closed() {
            return;
        }

        let mut sets = self.sets.lock().await;
        let mut entry = match sets.working.remove(&entry.key()) {
            Some(owned) => owned,
            None => {
                // Already released or retired; a second report must not
                // duplicate the record.
                let key = entry.key();
                if sets.free.iter().any(|e| e.key() == key)
                    || sets.unavailable.iter().any(|e| e.key() == key)
                {
                    return;
                }
                entry
            }
        };
        entry.refresh();
        sets.free.push_back(entry);
        drop(sets);

        self.free_notify.notify_one();
    }

    /// Move a proxy from working (or free) to the unavailable set.
    ///
    /// Deliberately cheap: no liveness test, so failure reporting never
    /// blocks a fetch worker. Recovery happens later, off the critical path.
    pub async fn retire(&self, entry: ProxyEntry) {
        let mut sets = self.sets.lock().await;
        let key = entry.key();
        let entry = match sets.working.remove(&key) {
            Some(owned) => owned,
            None => match sets.free.iter().position(|e| e.key() == key) {
                Some(pos) => sets.free.remove(pos).unwrap_or(entry),
                // Repeated failure reports for the same proxy are expected;
                // only the first moves the record.
                None if sets.unavailable.iter().any(|e| e.key() == key) => return,
                None => entry,
            },
        };
        sets.unavailable.push(entry);
    }

    /// Re-check unavailable proxies until `limit` have been recovered or
    /// the set is exhausted.
    ///
    /// Records whose probe reports permanently gone are dropped; passing
    /// records return to the free set with a refreshed TTL; transiently
    /// failing records stay unavailable. This is the only bulk network
    /// probing the pool does and is meant for the background refresher.
    pub async fn recover(&self, limit: usize) -> usize {
        let batch: Vec<ProxyEntry> = {
            let mut sets = self.sets.lock().await;
            std::mem::take(&mut sets.unavailable)
        };

        let mut recovered = 0;
        let mut keep = Vec::new();
        let mut revived = Vec::new();

        for mut entry in batch {
            if self.is_closed() || recovered >= limit {
                keep.push(entry);
                continue;
            }

            let outcome = self.probe_entry(&entry).await;
            entry.last_probe = Some(outcome);
            match outcome {
                ProbeOutcome::Gone => {
                    info!("Dropping dead proxy {}", entry);
                }
                ProbeOutcome::Alive => {
                    entry.refresh();
                    revived.push(entry);
                    recovered += 1;
                }
                ProbeOutcome::Transient => keep.push(entry),
            }
        }

        let mut sets = self.sets.lock().await;
        sets.unavailable.extend(keep);
        for entry in revived {
            sets.free.push_back(entry);
        }
        drop(sets);

        if recovered > 0 {
            info!("Recovered {} proxies", recovered);
            self.free_notify.notify_waiters();
        }
        recovered
    }

    /// Re-read any enabled-proxies file whose modification time has advanced
    /// by more than the reload period since last observed. New records merge
    /// into the free set via set semantics.
    pub async fn reload_if_modified(&self) {
        let files = match list_regular_files(&self.enabled_dir) {
            Ok(files) => files,
            Err(e) => {
                debug!(
                    "Failed to list proxy directory {}: {}",
                    self.enabled_dir.display(),
                    e
                );
                return;
            }
        };

        for path in files {
            let Ok(modified) = std::fs::metadata(&path).and_then(|m| m.modified()) else {
                continue;
            };
            let last = self
                .mtimes
                .get(&path)
                .map(|m| *m.value())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let advanced = modified
                .duration_since(last)
                .unwrap_or(Duration::ZERO);

            if advanced > self.reload_period {
                info!(
                    "Proxy file {} modified (advanced {:?}), reloading",
                    path.display(),
                    advanced
                );
                self.load_file(&path).await;
            }
        }
    }

    /// Archive the full record set and mark the pool closed.
    ///
    /// Idempotent: concurrent close calls produce at most one archive write.
    /// Archive failures are logged; they never propagate.
    pub async fn shutdown(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let sets = self.sets.lock().await;
        let stamp = chrono::Local::now().format("%m%d.%H%M").to_string();
        let dir = self.archive_dir.join(stamp);
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!("Failed to create archive dir {}: {}", dir.display(), e);
            return;
        }

        let all: Vec<&ProxyEntry> = sets
            .free
            .iter()
            .chain(sets.working.values())
            .chain(sets.unavailable.iter())
            .collect();

        archive_file(&dir.join("proxies.all.txt"), all.iter().copied());
        archive_file(&dir.join("proxies.working.txt"), sets.working.values());
        archive_file(&dir.join("proxies.free.txt"), sets.free.iter());
        archive_file(&dir.join("proxies.unavailable.txt"), sets.unavailable.iter());
        drop(sets);

        // Release anyone still parked in acquire
        self.free_notify.notify_waiters();
        info!("Proxy pool archived to {}", dir.display());
    }

    pub async fn free_count(&self) -> usize {
        self.sets.lock().await.free.len()
    }

    pub async fn working_count(&self) -> usize {
        self.sets.lock().await.working.len()
    }

    pub async fn unavailable_count(&self) -> usize {
        self.sets.lock().await.unavailable.len()
    }

    pub async fn total_count(&self) -> usize {
        self.sets.lock().await.total()
    }

    /// One-line pool summary for logs
    pub async fn status(&self) -> PoolStatus {
        let sets = self.sets.lock().await;
        PoolStatus {
            total: sets.total(),
            free: sets.free.len(),
            working: sets.working.len(),
            unavailable: sets.unavailable.len(),
        }
    }

    /// Run the probe off the async runtime; a panicking or failed probe
    /// counts as a transient failure.
    async fn probe_entry(&self, entry: &ProxyEntry) -> ProbeOutcome {
        let probe = Arc::clone(&self.probe);
        let host = entry.host.clone();
        let port = entry.port;
        tokio::task::spawn_blocking(move || probe.probe(&host, port))
            .await
            .unwrap_or(ProbeOutcome::Transient)
    }

    /// Breadcrumb so operators can see the most recently handed-out proxy
    fn write_latest(&self, entry: &ProxyEntry) {
        if let Err(e) = std::fs::write(&self.latest_file, entry.addr()) {
            debug!(
                "Failed to write {}: {}",
                self.latest_file.display(),
                e
            );
        }
    }
}

/// Snapshot of the pool's set sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub total: usize,
    pub free: usize,
    pub working: usize,
    pub unavailable: usize,
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total {}, free: {}, working: {}, unavailable: {}",
            self.total, self.free, self.working, self.unavailable
        )
    }
}

fn list_regular_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for dent in std::fs::read_dir(dir)? {
        let dent = dent?;
        if dent.file_type()?.is_file() {
            files.push(dent.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Full rewrite of one archive file, one proxy address per line
fn archive_file<'a>(path: &Path, entries: impl Iterator<Item = &'a ProxyEntry>) {
    let content = entries
        .map(ProxyEntry::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    if let Err(e) = std::fs::write(path, content) {
        warn!("Failed to archive {}: {}", path.display(), e);
    }
}
