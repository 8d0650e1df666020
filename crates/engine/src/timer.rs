//! Process-local timer registry.
//!
//! Maps a job id to an armed, cancellable delay. This is the only component
//! that triggers delivery, and it holds no business data, so the restore
//! coordinator can rebuild it from scratch after a restart. Injected
//! explicitly everywhere so tests can observe and fake it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

struct TimerHandle {
    task: JoinHandle<()>,
    delay: Duration,
    generation: u64,
}

/// Registry of armed timers, keyed by job id.
#[derive(Default)]
pub struct TimerRegistry {
    timers: Mutex<HashMap<String, TimerHandle>>,
    next_generation: AtomicU64,
}

impl TimerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Schedule `fire` to run once after `delay`.
    ///
    /// Replace semantics: an existing timer for the same id is cancelled
    /// first, never queued alongside. The firing task removes its own handle
    /// before running `fire`, so a cancel arriving after the timer elapsed
    /// cannot abort the delivery in flight.
    pub fn arm<F>(self: &Arc<Self>, id: &str, delay: Duration, fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(self);
        let job_id = id.to_string();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.disarm(&job_id, generation);
            fire.await;
        });

        let previous = self.timers.lock().unwrap().insert(
            id.to_string(),
            TimerHandle {
                task,
                delay,
                generation,
            },
        );
        if let Some(handle) = previous {
            handle.task.abort();
            tracing::debug!(job_id = id, "Replaced existing timer");
        }
    }

    /// Drop a handle without aborting, but only if it still belongs to the
    /// task that elapsed (a replacement may have been armed since).
    fn disarm(&self, id: &str, generation: u64) {
        let mut timers = self.timers.lock().unwrap();
        if timers.get(id).is_some_and(|h| h.generation == generation) {
            timers.remove(id);
        }
    }

    /// Cancel and remove the timer for `id`. Returns whether one was armed.
    pub fn cancel(&self, id: &str) -> bool {
        match self.timers.lock().unwrap().remove(id) {
            Some(handle) => {
                handle.task.abort();
                tracing::debug!(job_id = id, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every outstanding timer (graceful shutdown). Returns how many
    /// were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut timers = self.timers.lock().unwrap();
        let count = timers.len();
        for (_, handle) in timers.drain() {
            handle.task.abort();
        }
        count
    }

    /// The delay a timer was armed with, if it is still armed.
    pub fn armed_delay(&self, id: &str) -> Option<Duration> {
        self.timers.lock().unwrap().get(id).map(|h| h.delay)
    }

    pub fn len(&self) -> usize {
        self.timers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_armed_timer_fires_once_after_delay() {
        let registry = TimerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        registry.arm("job-1", Duration::from_secs(5), async move {
            tx.send("fired").unwrap();
        });
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.armed_delay("job-1"), Some(Duration::from_secs(5)));

        assert_eq!(rx.recv().await, Some("fired"));
        // Handle removed itself before firing
        assert!(registry.is_empty());
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let registry = TimerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        registry.arm("job-1", Duration::from_secs(5), async move {
            tx.send("fired").unwrap();
        });
        assert!(registry.cancel("job-1"));
        assert!(registry.is_empty());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_missing_timer_is_noop() {
        let registry = TimerRegistry::new();
        assert!(!registry.cancel("nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous_timer() {
        let registry = TimerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let tx_a = tx.clone();
        registry.arm("job-1", Duration::from_secs(60), async move {
            tx_a.send("a").unwrap();
        });
        registry.arm("job-1", Duration::from_secs(3), async move {
            tx.send("b").unwrap();
        });
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.armed_delay("job-1"), Some(Duration::from_secs(3)));

        assert_eq!(rx.recv().await, Some("b"));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_clears_everything() {
        let registry = TimerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for i in 0..3 {
            let tx = tx.clone();
            registry.arm(&format!("job-{i}"), Duration::from_secs(5), async move {
                tx.send(i).unwrap();
            });
        }
        drop(tx);

        assert_eq!(registry.cancel_all(), 3);
        assert!(registry.is_empty());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(rx.recv().await, None);
    }
}
