//! Background maintenance loop for the proxy pool
//!
//! One task owns all periodic proxy work: recovering retired records,
//! re-reading modified list files, and (on worker nodes) pulling the master
//! proxy list over HTTP. Keeping it in one loop means the pool itself never
//! does bulk network probing on a fetch worker's critical path.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::proxy_pool::ProxyPool;

/// Master-list pulls happen once every this many maintenance rounds
const MASTER_PULL_EVERY: u64 = 20;

/// Periodic proxy-pool maintainer. Construct, grab the stop flag, then
/// `spawn` it onto the runtime.
pub struct PoolRefresher {
    pool: Arc<ProxyPool>,
    http: reqwest::Client,
    enabled_dir: PathBuf,
    master_list_url: Option<String>,
    is_master: bool,
    recover_batch: usize,
    /// Configured cadence; never changes
    base_period: Duration,
    /// Effective cadence; backs off when a round overruns
    period: Duration,
    tick_no: u64,
    stop: Arc<AtomicBool>,
}

impl PoolRefresher {
    pub fn new(config: &FetchConfig, pool: Arc<ProxyPool>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let base_period = config.refresher_period();
        Self {
            pool,
            http,
            enabled_dir: config.enabled_proxy_dir(),
            master_list_url: config.master_list_url().map(String::from),
            is_master: config.is_master(),
            recover_batch: config.recover_batch(),
            base_period,
            period: base_period,
            tick_no: 0,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the loop after its current round. Clone before
    /// `spawn`; setting it is the cooperative half of teardown, aborting
    /// the returned handle is the impatient half.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run the maintenance loop until the stop flag is set or the pool
    /// closes.
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Proxy refresher running every {:?} (recover batch {})",
                self.base_period, self.recover_batch
            );
            loop {
                if self.stop.load(Ordering::Relaxed) || self.pool.is_closed() {
                    break;
                }
                self.tick().await;
                tokio::time::sleep(self.period).await;
            }
            info!("Proxy refresher stopped");
        })
    }

    /// One maintenance round: occasional master-list pull, bounded
    /// recovery, then a reload check. When recovery alone overruns the
    /// cadence the loop backs off tenfold rather than running hot, and
    /// returns to the configured cadence once rounds are fast again.
    pub async fn tick(&mut self) {
        self.tick_no += 1;

        if self.tick_no % MASTER_PULL_EVERY == 0 {
            self.pull_master_list().await;
        }

        let started = Instant::now();
        let recovered = self.pool.recover(self.recover_batch).await;
        let elapsed = started.elapsed();

        if elapsed > self.base_period {
            self.period = self.base_period * 10;
            warn!(
                "Recovery round took {:?} (recovered {recovered}), backing off to {:?}",
                elapsed, self.period
            );
        } else if self.period != self.base_period {
            self.period = self.base_period;
            debug!("Recovery round back under cadence, resuming {:?}", self.period);
        }

        self.pool.reload_if_modified().await;
    }

    /// Fetch the master node's proxy list into the enabled directory, where
    /// the next reload check picks it up. Master nodes serve the list, they
    /// do not pull it.
    async fn pull_master_list(&self) {
        if self.is_master {
            return;
        }
        let Some(url) = self.master_list_url.as_deref() else {
            return;
        };

        let body = match self.http.get(url).send().await {
            Ok(response) => match response.error_for_status() {
                Ok(response) => match response.text().await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("Failed to read master proxy list body: {e}");
                        return;
                    }
                },
                Err(e) => {
                    warn!("Master proxy list request rejected: {e}");
                    return;
                }
            },
            Err(e) => {
                warn!("Failed to pull master proxy list from {url}: {e}");
                return;
            }
        };

        if body.trim().is_empty() {
            debug!("Master proxy list is empty, keeping current files");
            return;
        }

        let path = self.enabled_dir.join("master-proxies.txt");
        if let Err(e) = std::fs::write(&path, body) {
            warn!("Failed to write {}: {}", path.display(), e);
        } else {
            debug!("Master proxy list written to {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy_pool::{LivenessProbe, ProbeOutcome};

    struct AlwaysAlive;

    impl LivenessProbe for AlwaysAlive {
        fn probe(&self, _host: &str, _port: u16) -> ProbeOutcome {
            ProbeOutcome::Alive
        }
    }

    fn test_config(base: &std::path::Path) -> FetchConfig {
        FetchConfig::builder()
            .base_dir(base)
            .refresher_period_secs(10)
            .recover_batch(5)
            .build()
            .expect("config")
    }

    #[tokio::test]
    async fn tick_recovers_retired_proxies() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = test_config(tmp.path());

        let enabled = config.enabled_proxy_dir();
        std::fs::create_dir_all(&enabled).expect("enabled dir");
        std::fs::write(enabled.join("proxies.txt"), "1.2.3.4:8080\n").expect("list");

        let pool = ProxyPool::with_probe(&config, Arc::new(AlwaysAlive));
        pool.load().await;
        let entry = pool.acquire().await.expect("loaded");
        pool.retire(entry).await;

        let mut refresher = PoolRefresher::new(&config, Arc::clone(&pool));
        refresher.tick().await;

        assert_eq!(pool.unavailable_count().await, 0);
        assert_eq!(pool.free_count().await, 1);
    }

    #[tokio::test]
    async fn spawned_loop_ticks_before_its_first_sleep() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = FetchConfig::builder()
            .base_dir(tmp.path())
            .refresher_period_secs(60)
            .build()
            .expect("config");

        let enabled = config.enabled_proxy_dir();
        std::fs::create_dir_all(&enabled).expect("enabled dir");
        std::fs::write(enabled.join("proxies.txt"), "1.2.3.4:8080\n").expect("list");

        let pool = ProxyPool::with_probe(&config, Arc::new(AlwaysAlive));
        pool.load().await;
        let entry = pool.acquire().await.expect("loaded");
        pool.retire(entry).await;

        let refresher = PoolRefresher::new(&config, Arc::clone(&pool));
        let stop = refresher.stop_flag();
        let handle = refresher.spawn();

        // The period is a minute; only an immediate first round can have
        // recovered the proxy this quickly.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(pool.unavailable_count().await, 0);
        assert_eq!(pool.free_count().await, 1);

        stop.store(true, Ordering::Relaxed);
        handle.abort();
    }

    #[tokio::test]
    async fn tick_without_master_url_touches_no_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = test_config(tmp.path());
        let pool = ProxyPool::with_probe(&config, Arc::new(AlwaysAlive));

        let mut refresher = PoolRefresher::new(&config, Arc::clone(&pool));
        for _ in 0..MASTER_PULL_EVERY + 1 {
            refresher.tick().await;
        }

        assert!(!config.enabled_proxy_dir().join("master-proxies.txt").exists());
    }
}
