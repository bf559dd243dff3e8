//! Background execution of podcast jobs.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::{MedcastClient, MedcastSources};
use crate::jobs::{JobId, JobPatch, JobRegistry, WaitCoordinator};
use crate::storage::ArtifactStore;

/// Drives one job from `pending` to a terminal state.
#[derive(Clone)]
pub struct JobRunner {
    registry: Arc<JobRegistry>,
    waits: WaitCoordinator,
    store: Arc<ArtifactStore>,
    client: MedcastClient,
}

impl JobRunner {
    pub fn new(
        registry: Arc<JobRegistry>,
        waits: WaitCoordinator,
        store: Arc<ArtifactStore>,
        client: MedcastClient,
    ) -> Self {
        Self {
            registry,
            waits,
            store,
            client,
        }
    }

    /// Start the job in the background. Returns without waiting.
    ///
    /// Every exit path, a panic included, leaves the job terminal and fires
    /// its completion signal.
    pub fn spawn(&self, job_id: JobId, sources: MedcastSources) -> JoinHandle<()> {
        let guard = self.waits.track(&job_id);
        let runner = self.clone();
        let span = tracing::info_span!("medcast.job", job.id = %job_id);

        tokio::spawn(
            async move {
                let _guard = guard;
                let outcome = AssertUnwindSafe(runner.run(&job_id, sources))
                    .catch_unwind()
                    .await;

                if let Err(panic) = outcome {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(job.id = %job_id, panic = %message, "Podcast job panicked");
                    runner
                        .registry
                        .update(&job_id, JobPatch::failed(format!("internal error: {}", message)));
                }
            }
            .instrument(span),
        )
    }

    async fn run(&self, job_id: &JobId, sources: MedcastSources) {
        self.registry.update(job_id, JobPatch::running());

        let audio = match self.client.generate(&sources).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(
                    job.id = %job_id,
                    medcast.endpoint = self.client.endpoint(),
                    error = %e,
                    "Podcast generation failed"
                );
                self.registry.update(job_id, JobPatch::failed(e.to_string()));
                return;
            }
        };

        match self.store.save(job_id, audio, sources.output_dir.as_deref()).await {
            Ok(stored) => {
                self.registry.update(job_id, JobPatch::succeeded(&stored));
            }
            Err(e) => {
                self.registry
                    .update(job_id, JobPatch::failed(format!("Failed to store podcast: {}", e)));
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
