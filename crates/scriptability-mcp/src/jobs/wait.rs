//! Bounded waits on in-flight jobs.
//!
//! Each spawned runner holds a [`CompletionGuard`]. Dropping the guard flips
//! a `watch` channel, which is what waiters race against their timer. The
//! guard fires on every exit path, panics included.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

use super::{Job, JobId, JobRegistry};

type Signals = HashMap<JobId, watch::Receiver<bool>>;

/// Lets callers block for a job without touching the job itself.
#[derive(Clone)]
pub struct WaitCoordinator {
    registry: Arc<JobRegistry>,
    in_flight: Arc<Mutex<Signals>>,
}

impl WaitCoordinator {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self {
            registry,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn signals(&self) -> MutexGuard<'_, Signals> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark `id` as in flight. Must be called before the runner is spawned so
    /// that an immediate `wait_for` sees the job.
    pub fn track(&self, id: &JobId) -> CompletionGuard {
        let (tx, rx) = watch::channel(false);
        self.signals().insert(id.clone(), rx);
        CompletionGuard {
            id: id.clone(),
            tx,
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    pub fn is_in_flight(&self, id: &JobId) -> bool {
        self.signals().contains_key(id)
    }

    /// Current record of `id` once its runner finishes or `max` elapses,
    /// whichever comes first.
    ///
    /// Returns immediately when `max` is zero or the job is not in flight
    /// (already finished, or unknown to this process). Timing out is not an
    /// error; the caller gets whatever state the job is in.
    #[tracing::instrument(name = "job.wait", skip(self), fields(job.id = %id, wait.ms = max.as_millis() as u64, wait.timed_out = tracing::field::Empty))]
    pub async fn wait_for(&self, id: &JobId, max: Duration) -> Option<Job> {
        if max.is_zero() {
            return self.registry.get(id);
        }

        let signal = self.signals().get(id).cloned();
        let Some(mut rx) = signal else {
            return self.registry.get(id);
        };

        // The watch `Ref` is !Send; reduce it to a bool inside the branch.
        let finished = async move { rx.wait_for(|done| *done).await.is_ok() };
        let timed_out = tokio::select! {
            _ = finished => false,
            _ = tokio::time::sleep(max) => true,
        };
        tracing::Span::current().record("wait.timed_out", timed_out);

        self.registry.get(id)
    }
}

/// Completion signal for one runner. Fires on drop.
pub struct CompletionGuard {
    id: JobId,
    tx: watch::Sender<bool>,
    in_flight: Arc<Mutex<Signals>>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.id);
        // send_replace never fails, even with no receivers left.
        self.tx.send_replace(true);
    }
}
