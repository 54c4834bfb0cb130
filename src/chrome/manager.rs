//! Warm pool of initialized Chrome instances.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::error::BrowserError;
use super::instance::{Instance, InstanceConfig};

/// Number of ready instances kept warm. The ready queue is bounded at this
/// capacity, so a full pool blocks the producer instead of spawning more
/// browsers.
pub const POOL_CAPACITY: usize = 15;

/// How long the producer waits for a fresh process to come up.
const READY_DEADLINE: Duration = Duration::from_secs(5);

/// Pause before retrying after a failed spawn, so a broken Chrome install
/// does not spin the producer.
const SPAWN_RETRY_BACKOFF: Duration = Duration::from_secs(1);

struct PoolState {
    next_id: u64,
    instances: HashMap<u64, Arc<Instance>>,
    urls: HashMap<u64, String>,
}

/// Maintains a pipeline of fully initialized instances so request handlers
/// never wait on a cold browser. A single background producer loops forever:
/// allocate an ID, pick a free port, launch, wait for liveness, connect —
/// and only then publish the instance. Failed instances are torn down and
/// never enter the pool.
pub struct InstanceManager {
    state: parking_lot::Mutex<PoolState>,
    ready_rx: tokio::sync::Mutex<mpsc::Receiver<u64>>,
}

impl InstanceManager {
    /// Creates the manager and starts the pool producer.
    pub fn new(config: InstanceConfig) -> Arc<Self> {
        let (ready_tx, ready_rx) = mpsc::channel(POOL_CAPACITY);
        let manager = Arc::new(Self {
            state: parking_lot::Mutex::new(PoolState {
                next_id: 0,
                instances: HashMap::new(),
                urls: HashMap::new(),
            }),
            ready_rx: tokio::sync::Mutex::new(ready_rx),
        });

        let producer = manager.clone();
        tokio::spawn(async move { producer.produce(ready_tx, config).await });
        manager
    }

    /// Producer loop; exits only when the manager is gone.
    async fn produce(self: Arc<Self>, ready_tx: mpsc::Sender<u64>, config: InstanceConfig) {
        loop {
            let id = {
                let mut state = self.state.lock();
                let id = state.next_id;
                state.next_id += 1;
                id
            };

            let port = match free_port().await {
                Ok(port) => port,
                Err(e) => {
                    warn!("failed to pick a free port: {e}");
                    tokio::time::sleep(SPAWN_RETRY_BACKOFF).await;
                    continue;
                }
            };

            let instance = match Instance::launch(port, &config) {
                Ok(instance) => instance,
                Err(e) => {
                    warn!("failed to launch chrome: {e}");
                    tokio::time::sleep(SPAWN_RETRY_BACKOFF).await;
                    continue;
                }
            };

            if let Err(e) = instance.wait_ready(READY_DEADLINE).await {
                warn!("chrome {id} never came up: {e}");
                instance.disconnect_and_terminate().await;
                continue;
            }
            if let Err(e) = instance.connect().await {
                // connect() already killed the process and removed its
                // directory on final failure.
                warn!("chrome {id} failed to connect to devtools: {e}");
                continue;
            }

            self.state.lock().instances.insert(id, instance);
            debug!("chrome {id} ready on port {port}");
            if ready_tx.send(id).await.is_err() {
                return;
            }
        }
    }

    /// Hands out the next ready instance, records the URL it will serve,
    /// and arms its idle timer. Blocks until an instance is available.
    pub async fn acquire(&self, url: &str) -> Result<u64, BrowserError> {
        let id = self
            .ready_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(BrowserError::PoolClosed)?;

        let instance = {
            let mut state = self.state.lock();
            state.urls.insert(id, url.to_string());
            state.instances.get(&id).cloned()
        };
        if let Some(instance) = instance {
            instance.init_timeout();
        }
        Ok(id)
    }

    /// Looks up a pooled instance.
    pub fn get(&self, id: u64) -> Result<Arc<Instance>, BrowserError> {
        self.state
            .lock()
            .instances
            .get(&id)
            .cloned()
            .ok_or(BrowserError::InstanceNotFound(id))
    }

    /// Looks up the URL recorded for an instance.
    pub fn get_url(&self, id: u64) -> Result<String, BrowserError> {
        self.state
            .lock()
            .urls
            .get(&id)
            .cloned()
            .ok_or(BrowserError::UrlNotFound(id))
    }

    /// Removes the instance from the pool. Termination is the caller's
    /// responsibility. Idempotent.
    pub fn release(&self, id: u64) {
        let mut state = self.state.lock();
        state.instances.remove(&id);
        state.urls.remove(&id);
    }
}

/// Picks a free local port by binding port 0 and reading the assignment.
async fn free_port() -> std::io::Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
