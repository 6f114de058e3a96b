//! Driver sessions: the closed set of browser-automation backends
//!
//! Each variant is one backend, selected by `BrowserKind` at construction
//! time. `Chromium` is a full browser process driven over CDP; `Http` is a
//! JS-less client for pages that do not need rendering.

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use futures::StreamExt;
use std::path::PathBuf;
use std::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{BrowserKind, SessionTimeouts};

/// One running browser-automation session
#[derive(Debug)]
pub enum DriverSession {
    Chromium {
        browser: Browser,
        handler: JoinHandle<()>,
        profile_dir: Option<PathBuf>,
    },
    Http {
        client: reqwest::Client,
    },
}

impl DriverSession {
    /// Launch a new session of the given kind, optionally bound to an
    /// upstream proxy address (`host:port`). The binding happens here, at
    /// construction, because a browser process cannot cheaply change its
    /// proxy once started.
    pub async fn launch(
        kind: BrowserKind,
        headless: bool,
        proxy: Option<&str>,
        timeouts: SessionTimeouts,
    ) -> Result<Self> {
        match kind {
            BrowserKind::Chromium => launch_chromium(headless, proxy, timeouts).await,
            BrowserKind::Http => launch_http(proxy, timeouts),
        }
    }

    #[must_use]
    pub fn kind(&self) -> BrowserKind {
        match self {
            Self::Chromium { .. } => BrowserKind::Chromium,
            Self::Http { .. } => BrowserKind::Http,
        }
    }

    /// Close the session, best-effort. Failures are logged; the caller
    /// cannot do anything useful with them at disposal time.
    pub async fn close(self) {
        match self {
            Self::Chromium {
                mut browser,
                handler,
                profile_dir,
            } => {
                if let Err(e) = browser.close().await {
                    warn!("Failed to close browser session: {e}");
                }
                let _ = browser.wait().await;
                handler.abort();
                if let Some(dir) = profile_dir {
                    if let Err(e) = std::fs::remove_dir_all(&dir) {
                        warn!("Failed to remove profile dir {}: {}", dir.display(), e);
                    }
                }
            }
            Self::Http { .. } => {}
        }
    }
}

/// Locate a Chromium executable: `CHROMIUM_PATH` overrides everything,
/// then well-known install paths, then `which`.
fn find_chromium() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
        warn!(
            "CHROMIUM_PATH points to non-existent file: {}",
            path.display()
        );
    }

    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    for candidate in candidates {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Ok(path);
        }
    }

    for cmd in ["chromium", "chromium-browser", "google-chrome", "chrome"] {
        if let Ok(output) = Command::new("which").arg(cmd).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Ok(PathBuf::from(path));
                }
            }
        }
    }

    Err(anyhow::anyhow!("no Chromium executable found"))
}

/// Launch a Chromium session with the fixed capability baseline:
/// JavaScript on, screenshots off, 1920x1080 viewport, image loading
/// disabled in headless mode.
///
/// Only the page-load timeout has a session-level home here (the CDP
/// request timeout). CDP has no per-session script or implicit-wait
/// setting, so those two ride on the `DriverInstance` and the fetch
/// executor applies them per evaluate/poll call.
async fn launch_chromium(
    headless: bool,
    proxy: Option<&str>,
    timeouts: SessionTimeouts,
) -> Result<DriverSession> {
    let executable = find_chromium()?;

    let profile = tempfile::Builder::new()
        .prefix("fetchpool_driver_")
        .tempdir()
        .context("Failed to create driver profile directory")?;
    let profile_dir = profile.into_path();

    let mut builder = BrowserConfigBuilder::default()
        .request_timeout(timeouts.page_load)
        .window_size(1920, 1080)
        .user_data_dir(profile_dir.clone())
        .chrome_executable(executable)
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-notifications")
        .arg("--mute-audio");

    if headless {
        builder = builder
            .headless_mode(HeadlessMode::default())
            // No point downloading images nobody will see
            .arg("--blink-settings=imagesEnabled=false");
    } else {
        builder = builder.with_head();
    }

    if let Some(addr) = proxy {
        builder = builder.arg(format!("--proxy-server={addr}"));
        debug!("Binding new browser session to proxy {addr}");
    }

    let config = builder
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .context("Failed to launch browser")?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!("Browser handler event error: {e}");
            }
        }
        info!("Browser handler task completed");
    });

    Ok(DriverSession::Chromium {
        browser,
        handler: handler_task,
        profile_dir: Some(profile_dir),
    })
}

/// Build a plain HTTP client session. The page-load timeout becomes the
/// request timeout; script and implicit-wait timeouts do not apply but are
/// carried on the instance for uniformity.
fn launch_http(proxy: Option<&str>, timeouts: SessionTimeouts) -> Result<DriverSession> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeouts.page_load)
        .connect_timeout(timeouts.page_load);

    if let Some(addr) = proxy {
        let proxy = reqwest::Proxy::all(format!("http://{addr}"))
            .with_context(|| format!("Invalid proxy address {addr}"))?;
        builder = builder.proxy(proxy);
    }

    let client = builder.build().context("Failed to build HTTP client")?;
    Ok(DriverSession::Http { client })
}
