//! Write Throttle
//!
//! Conflates a high-frequency stream of brightness values (a slider drag)
//! into at most one forwarded write per sampling window. The GATT link
//! processes writes serially; without conflation a fast drag would queue an
//! ever-growing backlog of stale brightness commands.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

/// Sampling window between forwarded brightness writes.
pub const SAMPLE_WINDOW: Duration = Duration::from_millis(250);

/// A conflating sampler, not a queueing rate limiter: each window forwards
/// the most recent value observed in it, and values superseded within a
/// window are discarded outright. A forward rejected downstream (session
/// not connected) is dropped too; the next window starts fresh.
pub struct WriteThrottle {
    latest: watch::Sender<Option<i32>>,
    worker: JoinHandle<()>,
}

impl WriteThrottle {
    /// Spawn the sampling worker. `forward` is invoked with the conflated
    /// value at most once per `window`.
    pub fn spawn<F>(window: Duration, mut forward: F) -> Self
    where
        F: FnMut(i32) + Send + 'static,
    {
        let (latest, mut rx) = watch::channel(None::<i32>);

        let worker = tokio::spawn(async move {
            let mut tick = tokio::time::interval(window);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tick.tick().await;
                match rx.has_changed() {
                    Ok(true) => {
                        if let Some(value) = *rx.borrow_and_update() {
                            trace!(value, "forwarding sampled brightness");
                            forward(value);
                        }
                    }
                    Ok(false) => {}
                    // Throttle handle dropped; nothing left to sample.
                    Err(_) => break,
                }
            }
        });

        Self { latest, worker }
    }

    /// Record the newest value. Supersedes anything submitted earlier in the
    /// current window.
    pub fn submit(&self, value: i32) {
        let _ = self.latest.send(Some(value));
    }
}

impl Drop for WriteThrottle {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_throttle() -> (WriteThrottle, Arc<Mutex<Vec<i32>>>) {
        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&forwarded);
        let throttle = WriteThrottle::spawn(SAMPLE_WINDOW, move |v| {
            sink.lock().unwrap().push(v);
        });
        (throttle, forwarded)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn conflates_to_the_latest_value_in_a_window() {
        let (throttle, forwarded) = recording_throttle();
        settle().await;

        throttle.submit(10);
        throttle.submit(20);
        throttle.submit(30);

        tokio::time::advance(SAMPLE_WINDOW).await;
        settle().await;

        assert_eq!(*forwarded.lock().unwrap(), vec![30]);
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_at_most_once_per_window() {
        let (throttle, forwarded) = recording_throttle();
        settle().await;

        throttle.submit(10);
        tokio::time::advance(SAMPLE_WINDOW).await;
        settle().await;

        throttle.submit(20);
        throttle.submit(25);
        tokio::time::advance(SAMPLE_WINDOW).await;
        settle().await;

        assert_eq!(*forwarded.lock().unwrap(), vec![10, 25]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_windows_forward_nothing() {
        let (throttle, forwarded) = recording_throttle();
        settle().await;

        throttle.submit(42);
        tokio::time::advance(SAMPLE_WINDOW).await;
        settle().await;

        // No new submissions: later windows stay silent, the old value is
        // never replayed.
        for _ in 0..4 {
            tokio::time::advance(SAMPLE_WINDOW).await;
            settle().await;
        }

        assert_eq!(*forwarded.lock().unwrap(), vec![42]);
    }
}
