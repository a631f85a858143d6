//! The bidirectional keep-alive driver: a pair of timers plus an
//! `isExpectingHeartbeat` flag.
//!
//! On interval tick: set the flag, invoke `on_tick` (the transport sends a
//! ping). On timeout (interval + timeout elapsed with no `reset()`), invoke
//! `on_timeout`. `reset()` clears the flag and restarts both timers. The
//! whole thing lives inside one supervisor task so it can be cancelled as a
//! unit when the owning transport is disposed - no fire-and-forget tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct Heart {
    expecting_heartbeat: Arc<AtomicBool>,
    reset_tx: mpsc::UnboundedSender<()>,
    task: Option<JoinHandle<()>>,
}

impl Heart {
    /// Spawn the supervisor task. `on_tick` fires once per interval;
    /// `on_timeout` fires once if `interval + timeout` elapses with no
    /// intervening `reset()`, after which the heart stops ticking.
    pub fn spawn<F, G>(interval: Duration, timeout: Duration, on_tick: F, on_timeout: G) -> Self
    where
        F: Fn() + Send + Sync + 'static,
        G: Fn() + Send + Sync + 'static,
    {
        let expecting_heartbeat = Arc::new(AtomicBool::new(false));
        let (reset_tx, mut reset_rx) = mpsc::unbounded_channel::<()>();
        let flag = expecting_heartbeat.clone();

        let task = tokio::spawn(async move {
            loop {
                // Wait out the interval, but bail early if reset() fires.
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    recv = reset_rx.recv() => {
                        if recv.is_none() {
                            return;
                        }
                        flag.store(false, Ordering::SeqCst);
                        continue;
                    }
                }

                flag.store(true, Ordering::SeqCst);
                on_tick();

                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        on_timeout();
                        return;
                    }
                    recv = reset_rx.recv() => {
                        if recv.is_none() {
                            return;
                        }
                        flag.store(false, Ordering::SeqCst);
                    }
                }
            }
        });

        Self {
            expecting_heartbeat,
            reset_tx,
            task: Some(task),
        }
    }

    pub fn is_expecting_heartbeat(&self) -> bool {
        self.expecting_heartbeat.load(Ordering::SeqCst)
    }

    /// Clears the flag and restarts both timers.
    pub fn reset(&self) {
        // A closed receiver means the task already exited (e.g. on
        // timeout); reset is then simply a no-op.
        let _ = self.reset_tx.send(());
    }

    /// Cancel the supervisor task. Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Heart {
    fn drop(&mut self) {
        self.stop();
    }
}
