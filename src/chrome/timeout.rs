//! Single-shot idle timer with atomic stop-and-rearm.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// An idle timer that runs an expiry action once, unless it is reset or
/// cancelled first. [`reset`](IdleTimer::reset) is an atomic stop-and-rearm:
/// it returns `false` iff the timer already fired, in which case the expiry
/// action is running (or has run) and the owner is going away.
pub struct IdleTimer {
    period: Duration,
    fired: Arc<Mutex<bool>>,
    deadline_tx: watch::Sender<Instant>,
}

impl IdleTimer {
    /// Arms the timer. `on_expiry` runs on a background task when the
    /// deadline passes without a reset.
    pub fn arm<F, Fut>(period: Duration, on_expiry: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fired = Arc::new(Mutex::new(false));
        let (deadline_tx, mut deadline_rx) = watch::channel(Instant::now() + period);

        let task_fired = fired.clone();
        tokio::spawn(async move {
            let mut on_expiry = Some(on_expiry);
            loop {
                let deadline = *deadline_rx.borrow_and_update();
                tokio::select! {
                    changed = deadline_rx.changed() => {
                        // A reset pushed the deadline out; cancelled when the
                        // owner dropped the timer.
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        {
                            let mut fired = task_fired.lock();
                            if *fired {
                                return;
                            }
                            // A reset may have landed while we slept.
                            if *deadline_rx.borrow() > Instant::now() {
                                continue;
                            }
                            *fired = true;
                        }
                        debug!("idle timeout expired");
                        if let Some(expire) = on_expiry.take() {
                            expire().await;
                        }
                        return;
                    }
                }
            }
        });

        Self {
            period,
            fired,
            deadline_tx,
        }
    }

    /// Stop-and-rearm. Returns `false` iff the timer already fired.
    pub fn reset(&self) -> bool {
        let fired = self.fired.lock();
        if *fired {
            return false;
        }
        self.deadline_tx.send_replace(Instant::now() + self.period);
        true
    }

    /// Marks the timer as fired without running the expiry action. Later
    /// resets return `false`.
    pub fn cancel(&self) {
        *self.fired.lock() = true;
        // Wake the task so it notices and exits.
        self.deadline_tx.send_replace(Instant::now());
    }
}
