//! A single Chrome instance: child process, DevTools connection, idle timer.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::error::BrowserError;
use super::timeout::IdleTimer;
use crate::cdp::protocol::int_at;
use crate::cdp::{Connection, EventMessage};

/// User agent reported to origin servers while rendering.
const USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 4.4.4; XT1034 Build/KXB21.14-L1.61) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/59.0.3071.125 Mobile Safari/537.36 \
     PTST/170721.190705";

const VIEWPORT_WIDTH: u32 = 360;
const VIEWPORT_HEIGHT: u32 = 640;
const VIEWPORT_PIXEL_DENSITY: u32 = 2;

/// Virtual-time budget granted to a page before it counts as stabilized.
pub const PAGE_STABLE_BUDGET_MS: u64 = 5_000;

/// An instance is torn down after this long without events.
const IDLE_TIMEOUT: Duration = Duration::from_secs(25);

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BACKOFF: Duration = Duration::from_secs(2);
const LIVENESS_POLL: Duration = Duration::from_millis(250);

/// Instance construction options.
#[derive(Debug, Clone, Default)]
pub struct InstanceConfig {
    /// Run Chrome with its GUI instead of headless.
    pub visible: bool,
    /// Browser binary override; defaults to `google-chrome`.
    pub browser_path: Option<PathBuf>,
}

/// One pooled Chrome process with its DevTools connection.
///
/// Lifecycle: spawned, liveness-waited, dialed, connected, assigned to a
/// request with the idle timer armed, then disconnected, killed, and its
/// user-data directory removed. Every exit path goes through
/// [`disconnect_and_terminate`](Instance::disconnect_and_terminate), so the
/// directory never outlives the instance.
pub struct Instance {
    port: u16,
    child: tokio::sync::Mutex<Option<Child>>,
    user_dir: parking_lot::Mutex<Option<TempDir>>,
    conn: parking_lot::Mutex<Option<Arc<Connection>>>,
    ready_tx: watch::Sender<bool>,
    page_load_tx: watch::Sender<bool>,
    torn_down_tx: watch::Sender<bool>,
    timer: OnceLock<IdleTimer>,
    terminating: AtomicBool,
}

impl Instance {
    /// Spawns Chrome with remote debugging on `port`. Returns without
    /// blocking; callers must [`wait_ready`](Instance::wait_ready) before
    /// issuing protocol calls.
    pub fn launch(port: u16, config: &InstanceConfig) -> Result<Arc<Self>, BrowserError> {
        let user_dir = tempfile::Builder::new()
            .prefix("chrome-profile-")
            .tempdir()
            .map_err(|e| {
                BrowserError::LaunchFailed(format!("failed to create user data directory: {e}"))
            })?;

        let browser = config
            .browser_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("google-chrome"));
        let mut cmd = Command::new(&browser);
        cmd.arg(format!("--remote-debugging-port={port}"))
            .arg(format!("--user-data-dir={}", user_dir.path().display()))
            .arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if !config.visible {
            cmd.arg("--headless");
        }

        let child = cmd
            .spawn()
            .map_err(|e| BrowserError::LaunchFailed(format!("{}: {e}", browser.display())))?;
        debug!("launched chrome on port {port} (pid {:?})", child.id());

        Ok(Arc::new(Self {
            port,
            child: tokio::sync::Mutex::new(Some(child)),
            user_dir: parking_lot::Mutex::new(Some(user_dir)),
            conn: parking_lot::Mutex::new(None),
            ready_tx: watch::channel(false).0,
            page_load_tx: watch::channel(false).0,
            torn_down_tx: watch::channel(false).0,
            timer: OnceLock::new(),
            terminating: AtomicBool::new(false),
        }))
    }

    /// Polls process liveness until the browser is up or `deadline` passes.
    pub async fn wait_ready(&self, deadline: Duration) -> Result<(), BrowserError> {
        let give_up = tokio::time::Instant::now() + deadline;
        loop {
            let exit = {
                let mut child = self.child.lock().await;
                match child.as_mut() {
                    Some(child) => child.try_wait()?,
                    None => return Err(BrowserError::NotConnected),
                }
            };
            match exit {
                None => return Ok(()),
                Some(status) => {
                    if tokio::time::Instant::now() >= give_up {
                        return Err(BrowserError::Timeout(format!(
                            "chrome did not come up before the deadline (exit: {status})"
                        )));
                    }
                }
            }
            tokio::time::sleep(LIVENESS_POLL).await;
        }
    }

    /// Dials the DevTools endpoint, retrying a few times while Chrome boots.
    /// On success the one-shot ready gate closes; on final failure the
    /// subprocess is killed and its directory removed.
    pub async fn connect(&self) -> Result<(), BrowserError> {
        let hostport = format!("127.0.0.1:{}", self.port);
        let mut last_error = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match Connection::dial(&hostport).await {
                Ok(conn) => {
                    *self.conn.lock() = Some(Arc::new(conn));
                    self.ready_tx.send_replace(true);
                    return Ok(());
                }
                Err(e) => {
                    debug!("devtools dial attempt {attempt}/{CONNECT_ATTEMPTS} failed: {e}");
                    last_error = Some(e);
                    tokio::time::sleep(CONNECT_BACKOFF).await;
                }
            }
        }
        warn!("giving up connecting to devtools on port {}", self.port);
        self.kill_process().await;
        Err(last_error
            .map(BrowserError::Cdp)
            .unwrap_or(BrowserError::NotConnected))
    }

    /// Arms the idle timer. Expiry tears the instance down. Must be called
    /// at most once; the timer task only holds a weak reference, so an
    /// instance released elsewhere is not kept alive by its own timer.
    pub fn init_timeout(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let timer = IdleTimer::arm(IDLE_TIMEOUT, move || async move {
            if let Some(instance) = weak.upgrade() {
                instance.disconnect_and_terminate().await;
            }
        });
        if self.timer.set(timer).is_err() {
            warn!("idle timeout initialized twice for port {}", self.port);
        }
    }

    /// Stop-and-rearm of the idle timer. `false` means the timer already
    /// fired and the instance is gone (or going).
    pub fn reset_timeout(&self) -> bool {
        match self.timer.get() {
            Some(timer) => timer.reset(),
            None => true,
        }
    }

    /// Invokes `<Name>.enable` for each listed domain.
    pub async fn enable_domains(&self, domains: &[&str]) -> Result<(), BrowserError> {
        let conn = self.connection()?;
        for domain in domains {
            conn.invoke(&format!("{domain}.enable"), json!({})).await?;
        }
        Ok(())
    }

    /// Navigates the tab: fixed mobile user agent, fixed viewport, a
    /// virtual-time budget whose expiry signals stabilization, then
    /// `Page.navigate`. A failure arming virtual time is logged and
    /// tolerated.
    pub async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        info!("navigating to {url}");
        let conn = self.connection()?;

        conn.invoke(
            "Network.setUserAgentOverride",
            json!({"userAgent": USER_AGENT}),
        )
        .await?;
        conn.invoke(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": VIEWPORT_WIDTH,
                "height": VIEWPORT_HEIGHT,
                "deviceScaleFactor": VIEWPORT_PIXEL_DENSITY,
                "mobile": true,
            }),
        )
        .await?;

        if let Err(e) = conn
            .invoke_and_wait(
                "Emulation.setVirtualTimePolicy",
                json!({
                    "policy": "pauseIfNetworkFetchesPending",
                    "budget": PAGE_STABLE_BUDGET_MS,
                }),
            )
            .await
        {
            warn!("setVirtualTimePolicy failed: {e}");
        }

        conn.invoke("Page.navigate", json!({"url": url})).await?;
        Ok(())
    }

    /// Returns the next protocol event, resetting the idle timer. `None`
    /// once the connection has drained.
    pub async fn next_event(&self) -> Option<EventMessage> {
        self.reset_timeout();
        let conn = self.conn.lock().clone()?;
        conn.next_event().await
    }

    /// Fetches the full document tree (`DOM.getDocument`, depth -1).
    pub async fn get_dom_root(&self) -> Result<Value, BrowserError> {
        let conn = self.connection()?;
        let reply = conn
            .invoke_and_wait("DOM.getDocument", json!({"depth": -1}))
            .await?;
        reply.get("root").cloned().ok_or_else(|| {
            BrowserError::MalformedResponse("DOM.getDocument reply missing \"root\"".into())
        })
    }

    /// Serializes the document to HTML via `DOM.getOuterHTML` on the root.
    pub async fn get_outer_html(&self) -> Result<String, BrowserError> {
        let conn = self.connection()?;
        let root = self.get_dom_root().await?;
        let node_id = int_at(&root, "nodeId").ok_or_else(|| {
            BrowserError::MalformedResponse("document root missing \"nodeId\"".into())
        })?;
        let reply = conn
            .invoke_and_wait("DOM.getOuterHTML", json!({"nodeId": node_id}))
            .await?;
        reply
            .get("outerHTML")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                BrowserError::MalformedResponse("DOM.getOuterHTML reply missing \"outerHTML\"".into())
            })
    }

    /// Asks the browser to report children of `node_id` (and changes to
    /// them) through `DOM.setChildNodes` events.
    pub async fn request_child_nodes(&self, node_id: i64) -> Result<(), BrowserError> {
        let conn = self.connection()?;
        conn.invoke(
            "DOM.requestChildNodes",
            json!({"nodeId": node_id, "depth": -1}),
        )
        .await?;
        Ok(())
    }

    /// Blocks until the page-load gate closes (it closes during teardown).
    pub async fn await_page_load(&self) {
        let mut rx = self.page_load_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Blocks until the DevTools connection has been established.
    pub async fn wait_until_ready(&self) -> Result<(), BrowserError> {
        let mut rx = self.ready_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.connection().map(|_| ())
    }

    /// Tears the instance down: closes the page-load gate, closes the
    /// connection, kills the subprocess, removes the user-data directory,
    /// and reaps the child. Idempotent; concurrent callers block until the
    /// first teardown completes.
    pub async fn disconnect_and_terminate(&self) {
        if self.terminating.swap(true, Ordering::SeqCst) {
            let mut rx = self.torn_down_tx.subscribe();
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
            return;
        }

        if let Some(timer) = self.timer.get() {
            timer.cancel();
        }
        self.page_load_tx.send_replace(true);
        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            conn.close().await;
        }
        self.kill_process().await;
        self.torn_down_tx.send_replace(true);
    }

    /// Kills and reaps the subprocess and removes the user-data directory.
    async fn kill_process(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!("failed to kill chrome on port {}: {e}", self.port);
            }
        }
        let dir = self.user_dir.lock().take();
        if let Some(dir) = dir {
            if let Err(e) = dir.close() {
                warn!("failed to remove user data directory: {e}");
            }
        }
    }

    fn connection(&self) -> Result<Arc<Connection>, BrowserError> {
        self.conn.lock().clone().ok_or(BrowserError::NotConnected)
    }

    #[cfg(test)]
    pub(crate) fn user_dir_path(&self) -> Option<PathBuf> {
        self.user_dir.lock().as_ref().map(|d| d.path().to_path_buf())
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
