//! Browser-driver pool with per-priority holding areas
//!
//! Driver processes are expensive (memory, CPU, one OS process each), so a
//! single hard ceiling of 1.5 x available cores applies across all
//! priorities. Priority classes exist only to stop one workload from
//! head-of-line blocking another under that shared ceiling; each class gets
//! its own holding area, created lazily on first demand.

pub mod session;

pub use session::DriverSession;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::config::{FetchConfig, SessionTimeouts};
use crate::proxy_pool::{ProxyEntry, ProxyPool};

/// A pooled driver: one live automation session plus its pool metadata
#[derive(Debug)]
pub struct DriverInstance {
    /// Creation order, unique within the pool
    pub id: u64,
    /// The priority class this instance was allocated under
    pub priority: i32,
    /// The proxy this session is bound to, if any. Held by value so the
    /// fetch worker can report its health back to the proxy pool.
    pub proxy: Option<ProxyEntry>,
    /// Timeouts the session was configured with
    pub timeouts: SessionTimeouts,
    session: DriverSession,
}

impl DriverInstance {
    #[must_use]
    pub fn session(&self) -> &DriverSession {
        &self.session
    }

    async fn close(self) {
        self.session.close().await;
    }
}

/// One priority class's holding area
struct PriorityBay {
    queue: Mutex<VecDeque<DriverInstance>>,
    notify: Notify,
}

impl PriorityBay {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        })
    }
}

/// Pool of browser-driver sessions, bounded by host CPU capacity
pub struct DriverPool {
    proxy_pool: Arc<ProxyPool>,
    bays: DashMap<i32, Arc<PriorityBay>>,
    /// All instances ever created and not yet destroyed, free or held
    live_count: AtomicUsize,
    next_id: AtomicU64,
    max_drivers: usize,
    headless: bool,
    closed: AtomicBool,
}

impl DriverPool {
    pub fn new(config: &FetchConfig, proxy_pool: Arc<ProxyPool>) -> Arc<Self> {
        Arc::new(Self {
            proxy_pool,
            bays: DashMap::new(),
            live_count: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
            max_drivers: config.max_drivers(),
            headless: config.headless(),
            closed: AtomicBool::new(false),
        })
    }

    /// Number of instances currently parked in holding areas
    pub async fn free_count(&self) -> usize {
        let mut n = 0;
        for bay in self.bays.iter() {
            n += bay.value().queue.lock().await.len();
        }
        n
    }

    /// Number of live instances, free or held
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.live_count.load(Ordering::Relaxed)
    }

    /// Acquire a driver for the given priority class.
    ///
    /// Allocates a fresh session when the class's holding area is empty and
    /// the global ceiling permits, then waits up to `2 x page_load_timeout`
    /// for an instance to become available. Returns `None` on timeout or on
    /// a closed pool; allocation failures are logged, never propagated.
    pub async fn acquire(&self, priority: i32, config: &FetchConfig) -> Option<DriverInstance> {
        if self.closed.load(Ordering::Relaxed) {
            return None;
        }

        let bay = self
            .bays
            .entry(priority)
            .or_insert_with(PriorityBay::new)
            .clone();

        if bay.queue.lock().await.is_empty() {
            self.allocate(priority, &bay, config).await;
        }

        let deadline = Instant::now() + 2 * config.page_load_timeout();
        loop {
            if let Some(instance) = bay.queue.lock().await.pop_front() {
                debug!("Acquired driver {} (priority {})", instance.id, priority);
                return Some(instance);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("Timed out waiting for a driver at priority {priority}");
                return None;
            }
            let _ = tokio::time::timeout(remaining, bay.notify.notified()).await;

            if self.closed.load(Ordering::Relaxed) {
                return None;
            }
        }
    }

    /// Return an instance to its priority's holding area. No liveness
    /// validation; a broken session will fail its next fetch and be
    /// reported through the usual channels.
    pub async fn release(&self, priority: i32, instance: DriverInstance) {
        let bay = self
            .bays
            .entry(priority)
            .or_insert_with(PriorityBay::new)
            .clone();
        bay.queue.lock().await.push_back(instance);
        bay.notify.notify_one();
    }

    /// Construct one new session into the bay, respecting the global
    /// ceiling. Over-ceiling demand is not an error; callers wait on
    /// existing instances cycling back through `release`.
    async fn allocate(&self, priority: i32, bay: &PriorityBay, config: &FetchConfig) {
        // Reserve the slot up front: the proxy wait and session launch below
        // both suspend, and a plain check-then-increment would let
        // concurrent acquires overshoot the ceiling in that window.
        if self
            .live_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live < self.max_drivers).then_some(live + 1)
            })
            .is_err()
        {
            warn!(
                "Driver ceiling reached ({}/{}), waiting on recycling",
                self.live_count.load(Ordering::Relaxed),
                self.max_drivers
            );
            return;
        }

        let proxy = if config.proxy_disabled() {
            None
        } else {
            self.proxy_pool.acquire().await
        };

        let timeouts = config.session_timeouts();
        let session = match DriverSession::launch(
            config.browser(),
            config.headless(),
            proxy.as_ref().map(|p| p.addr()).as_deref(),
            timeouts,
        )
        .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!("Failed to launch driver session: {e:#}");
                // The proxy was never used; hand it straight back.
                if let Some(entry) = proxy {
                    self.proxy_pool.release(entry).await;
                }
                self.live_count.fetch_sub(1, Ordering::SeqCst);
                return;
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let instance = DriverInstance {
            id,
            priority,
            proxy,
            timeouts,
            session,
        };

        info!(
            "Driver {} is online at priority {} ({}/{} live)",
            id,
            priority,
            self.live_count.load(Ordering::Relaxed),
            self.max_drivers
        );

        bay.queue.lock().await.push_back(instance);
        bay.notify.notify_one();
    }

    /// Dispose of every live instance and clear the holding areas.
    ///
    /// In non-headless (interactive/debug) mode this is a no-op so a human
    /// can keep inspecting open browser windows. Idempotent.
    pub async fn shutdown(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if !self.headless {
            info!("Driver pool shutdown skipped in non-headless mode");
            return;
        }

        for bay in self.bays.iter() {
            let mut queue = bay.value().queue.lock().await;
            while let Some(instance) = queue.pop_front() {
                debug!("Closing driver {}", instance.id);
                instance.close().await;
                self.live_count.fetch_sub(1, Ordering::Relaxed);
            }
            bay.value().notify.notify_waiters();
        }
        self.bays.clear();
        info!("Driver pool shutdown complete");
    }
}
