//! Tests for host health tracking and the durable task backlogs
//!
//! Trackers are recreated over the same store within a test to exercise
//! what survives a process restart.

use std::path::Path;
use std::sync::Arc;

use fetchpool::host_health::{HostHealthTracker, TaskStore};
use fetchpool::{FetchConfig, FetchMode, PageCategory, PageInfo};

fn config(base: &Path) -> FetchConfig {
    FetchConfig::builder()
        .base_dir(base)
        .build()
        .expect("config")
}

async fn store(base: &Path) -> Arc<TaskStore> {
    Arc::new(
        TaskStore::open(&base.join("tasks.sqlite"))
            .await
            .expect("open store"),
    )
}

#[tokio::test]
async fn three_strikes_are_forgiven_the_fourth_blacklists() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = config(tmp.path());
    let tracker = HostHealthTracker::new(&config, store(tmp.path()).await).await;

    let url = "https://flaky.example.com/page";
    assert!(tracker.is_reachable("flaky.example.com"));

    assert!(!tracker.log_failure_host(url));
    assert!(!tracker.log_failure_host(url));
    assert!(!tracker.log_failure_host(url));
    assert!(tracker.is_reachable("flaky.example.com"));

    // Fourth failure crosses the threshold, exactly once.
    assert!(tracker.log_failure_host(url));
    assert!(tracker.is_gone("flaky.example.com"));
    assert!(!tracker.log_failure_host(url));
}

#[tokio::test]
async fn success_forgives_failures_and_a_blacklisting() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = config(tmp.path());
    let tracker = HostHealthTracker::new(&config, store(tmp.path()).await).await;

    let url = "https://flaky.example.com/page";
    for _ in 0..4 {
        tracker.log_failure_host(url);
    }
    assert!(tracker.is_gone("flaky.example.com"));

    tracker.log_success_host(&PageInfo::new(url, PageCategory::Detail, false));
    assert!(tracker.is_reachable("flaky.example.com"));

    // Strikes were cleared too: the next run of failures starts from zero.
    assert!(!tracker.log_failure_host(url));
    assert!(!tracker.log_failure_host(url));
    assert!(!tracker.log_failure_host(url));
    assert!(tracker.log_failure_host(url));
}

#[tokio::test]
async fn urls_without_hosts_are_ignored() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = config(tmp.path());
    let tracker = HostHealthTracker::new(&config, store(tmp.path()).await).await;

    for _ in 0..10 {
        assert!(!tracker.log_failure_host("not a url at all"));
    }
}

#[tokio::test]
async fn blacklist_survives_restart_through_the_hosts_file() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = config(tmp.path());
    let store = store(tmp.path()).await;

    let tracker = HostHealthTracker::new(&config, Arc::clone(&store)).await;
    for _ in 0..4 {
        tracker.log_failure_host("https://dead.example.com/");
    }
    tracker.shutdown().await;

    let content =
        std::fs::read_to_string(config.unreachable_hosts_file()).expect("hosts file written");
    assert!(content.lines().any(|l| l == "dead.example.com"));

    let restarted = HostHealthTracker::new(&config, store).await;
    assert!(restarted.is_gone("dead.example.com"));
    assert!(restarted.is_reachable("other.example.com"));
}

#[tokio::test]
async fn lazy_backlogs_are_durable_and_per_mode() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = config(tmp.path());
    let store = store(tmp.path()).await;

    {
        let tracker = HostHealthTracker::new(&config, Arc::clone(&store)).await;
        tracker
            .commit_lazy_tasks(
                FetchMode::Browser,
                ["https://a.example.com/", "https://b.example.com/"],
            )
            .await;
        tracker
            .commit_lazy_tasks(FetchMode::Native, ["https://c.example.com/"])
            .await;
    }

    let tracker = HostHealthTracker::new(&config, store).await;
    assert_eq!(
        tracker.get_lazy_tasks(FetchMode::Browser).await,
        vec!["https://a.example.com/", "https://b.example.com/"]
    );
    assert_eq!(
        tracker.get_lazy_tasks(FetchMode::Native).await,
        vec!["https://c.example.com/"]
    );
    assert!(tracker.get_lazy_tasks(FetchMode::Proxy).await.is_empty());

    let taken = tracker.take_lazy_tasks(FetchMode::Browser, 1).await;
    assert_eq!(taken, vec!["https://a.example.com/"]);
    assert_eq!(
        tracker.get_lazy_tasks(FetchMode::Browser).await,
        vec!["https://b.example.com/"]
    );
}

#[tokio::test]
async fn timeout_backlog_is_drained_by_exactly_one_restart() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = config(tmp.path());
    let store = store(tmp.path()).await;

    {
        let tracker = HostHealthTracker::new(&config, Arc::clone(&store)).await;
        tracker.track_timeout("https://slow.example.com/");
        tracker.shutdown().await;
    }

    // First restart inherits the timeout set by draining its page.
    let second = HostHealthTracker::new(&config, Arc::clone(&store)).await;
    assert!(second.is_timeout("https://slow.example.com/"));

    // The page is now empty; a tracker built before `second` shuts down
    // sees nothing.
    let third = HostHealthTracker::new(&config, store).await;
    assert!(!third.is_timeout("https://slow.example.com/"));
}

#[tokio::test]
async fn failed_and_dead_backlogs_are_read_without_draining() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = config(tmp.path());
    let store = store(tmp.path()).await;

    {
        let tracker = HostHealthTracker::new(&config, Arc::clone(&store)).await;
        tracker.track_failed("https://broken.example.com/");
        tracker.track_dead("https://gone.example.com/");
        tracker.shutdown().await;
    }

    let second = HostHealthTracker::new(&config, Arc::clone(&store)).await;
    assert!(second.is_failed("https://broken.example.com/"));
    assert!(second.is_dead("https://gone.example.com/"));

    // Unlike the timeout page, these stay in the store after being read.
    let third = HostHealthTracker::new(&config, store).await;
    assert!(third.is_failed("https://broken.example.com/"));
    assert!(third.is_dead("https://gone.example.com/"));
}

#[tokio::test]
async fn timeout_tasks_round_trip_through_the_store() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = config(tmp.path());
    let tracker = HostHealthTracker::new(&config, store(tmp.path()).await).await;

    tracker
        .commit_timeout_tasks(["https://x.example.com/", "https://y.example.com/"])
        .await;

    let drained = tracker.take_timeout_tasks().await;
    assert_eq!(drained, vec!["https://x.example.com/", "https://y.example.com/"]);
    assert!(tracker.take_timeout_tasks().await.is_empty());
}

#[tokio::test]
async fn track_failed_all_accepts_batches() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = config(tmp.path());
    let tracker = HostHealthTracker::new(&config, store(tmp.path()).await).await;

    tracker.track_failed_all(vec![
        "https://one.example.com/".to_string(),
        "https://two.example.com/".to_string(),
    ]);
    assert!(tracker.is_failed("https://one.example.com/"));
    assert!(tracker.is_failed("https://two.example.com/"));
    assert!(!tracker.is_failed("https://three.example.com/"));
}
