//! Cancellable periodic background tasks.
//!
//! Health monitoring and auto-discovery both run as a [`PeriodicTask`]: a
//! spawned tokio loop that ticks on an interval until asked to stop. Stopping
//! interrupts the loop whether it is sleeping or mid-tick, then joins it.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How long `stop` waits for the loop to exit before aborting it.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Handle to a running periodic loop.
///
/// Dropping the handle without calling [`stop`](Self::stop) aborts the loop.
pub struct PeriodicTask {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn `tick` every `interval`. The first tick fires after one full
    /// interval. Returning `false` from a tick ends the loop.
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::debug!(
                task = name,
                interval_ms = interval.as_millis() as u64,
                "periodic task started"
            );

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                let keep_going = tokio::select! {
                    _ = stop_rx.changed() => false,
                    keep = tick() => keep,
                };
                if !keep_going {
                    break;
                }
            }

            tracing::debug!(task = name, "periodic task stopped");
        });

        Self {
            name,
            stop_tx,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the loop has exited on its own.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    /// Signal the loop to stop and wait for it, aborting after a grace period.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        match tokio::time::timeout(STOP_GRACE, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_cancelled() => {}
            Ok(Err(e)) => {
                tracing::warn!(task = self.name, error = %e, "periodic task panicked");
            }
            Err(_) => {
                tracing::warn!(task = self.name, "periodic task did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
