//! Tests for the driver pool
//!
//! All tests run on the HTTP driver backend so no browser executable is
//! required; the pooling behavior under test is backend-independent.

use std::path::Path;
use std::sync::Arc;

use fetchpool::proxy_pool::ProxyPool;
use fetchpool::{BrowserKind, DriverPool, FetchConfig};

fn http_config(base: &Path) -> FetchConfig {
    FetchConfig::builder()
        .base_dir(base)
        .browser(BrowserKind::Http)
        .proxy_disabled(true)
        .page_load_timeout_secs(1)
        .max_drivers(1)
        .build()
        .expect("config")
}

fn pool_for(config: &FetchConfig) -> Arc<DriverPool> {
    DriverPool::new(config, ProxyPool::new(config))
}

#[tokio::test]
async fn acquire_allocates_lazily_up_to_the_ceiling() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = http_config(tmp.path());
    let pool = pool_for(&config);

    assert_eq!(pool.total_count(), 0);

    let instance = pool.acquire(0, &config).await.expect("under ceiling");
    assert_eq!(instance.priority, 0);
    assert!(instance.proxy.is_none());
    assert_eq!(pool.total_count(), 1);
    assert_eq!(pool.free_count().await, 0);

    // Ceiling of one: a second acquire finds the bay empty, cannot
    // allocate, and times out after 2 x page-load timeout.
    assert!(pool.acquire(0, &config).await.is_none());
    assert_eq!(pool.total_count(), 1);

    pool.release(0, instance).await;
    assert_eq!(pool.free_count().await, 1);
}

#[tokio::test]
async fn concurrent_acquires_never_overshoot_the_ceiling() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = FetchConfig::builder()
        .base_dir(tmp.path())
        .browser(BrowserKind::Http)
        .page_load_timeout_secs(1)
        .max_drivers(1)
        .build()
        .expect("config");
    let pool = pool_for(&config);

    // Proxying stays enabled over an empty proxy pool, so every allocation
    // parks in the proxy wait for about a second and the three acquires
    // fully overlap before any session launches.
    let mut tasks = Vec::new();
    for priority in 0..3 {
        let pool = Arc::clone(&pool);
        let config = config.clone();
        tasks.push(tokio::spawn(
            async move { pool.acquire(priority, &config).await },
        ));
    }

    let mut granted = 0;
    for task in tasks {
        if task.await.expect("join").is_some() {
            granted += 1;
        }
    }

    assert_eq!(granted, 1);
    assert_eq!(pool.total_count(), 1);
}

#[tokio::test]
async fn waiter_is_unblocked_by_release() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = http_config(tmp.path());
    let pool = pool_for(&config);

    let held = pool.acquire(0, &config).await.expect("first");
    let held_id = held.id;

    let waiter = {
        let pool = Arc::clone(&pool);
        let config = config.clone();
        tokio::spawn(async move { pool.acquire(0, &config).await })
    };

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    pool.release(0, held).await;

    let got = waiter.await.expect("join").expect("woken by release");
    assert_eq!(got.id, held_id);
    assert_eq!(pool.total_count(), 1);
}

#[tokio::test]
async fn priorities_do_not_share_instances() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = http_config(tmp.path());
    let pool = pool_for(&config);

    let instance = pool.acquire(1, &config).await.expect("priority 1");
    pool.release(1, instance).await;

    // The only live instance is parked at priority 1; priority 2 cannot
    // take it and the ceiling blocks a second allocation.
    assert!(pool.acquire(2, &config).await.is_none());

    let again = pool.acquire(1, &config).await.expect("still at priority 1");
    assert_eq!(again.priority, 1);
}

#[tokio::test]
async fn headless_shutdown_disposes_everything() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = http_config(tmp.path());
    let pool = pool_for(&config);

    let instance = pool.acquire(0, &config).await.expect("allocated");
    pool.release(0, instance).await;
    assert_eq!(pool.total_count(), 1);

    pool.shutdown().await;
    pool.shutdown().await; // idempotent

    assert_eq!(pool.total_count(), 0);
    assert_eq!(pool.free_count().await, 0);
    assert!(pool.acquire(0, &config).await.is_none());
}

#[tokio::test]
async fn non_headless_shutdown_leaves_sessions_open() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = FetchConfig::builder()
        .base_dir(tmp.path())
        .browser(BrowserKind::Http)
        .proxy_disabled(true)
        .page_load_timeout_secs(1)
        .max_drivers(1)
        .headless(false)
        .build()
        .expect("config");
    let pool = pool_for(&config);

    let instance = pool.acquire(0, &config).await.expect("allocated");
    pool.release(0, instance).await;

    pool.shutdown().await;

    // Sessions stay up for inspection; only new acquisition stops.
    assert_eq!(pool.total_count(), 1);
    assert_eq!(pool.free_count().await, 1);
    assert!(pool.acquire(0, &config).await.is_none());
}

#[tokio::test]
async fn instances_carry_configured_timeouts() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = FetchConfig::builder()
        .base_dir(tmp.path())
        .browser(BrowserKind::Http)
        .proxy_disabled(true)
        .page_load_timeout_secs(7)
        .script_timeout_secs(3)
        .implicit_wait_timeout_secs(11)
        .max_drivers(1)
        .build()
        .expect("config");
    let pool = pool_for(&config);

    let instance = pool.acquire(0, &config).await.expect("allocated");
    assert_eq!(instance.timeouts.page_load.as_secs(), 7);
    assert_eq!(instance.timeouts.script.as_secs(), 3);
    assert_eq!(instance.timeouts.implicit_wait.as_secs(), 11);
    assert_eq!(instance.session().kind(), BrowserKind::Http);
}
