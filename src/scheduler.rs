//! Delayed-job sweep: moves due `Scheduled` jobs to `Enqueued`.
//!
//! The sweep proposes the client's default queue; the queue-routing filter
//! swaps in whatever queue the job requested at creation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::BackgroundJobClient;
use crate::error::ClientError;
use crate::state_machine::{JobId, State, StateName};
use crate::storage::JobStorage;

#[derive(Debug, Clone)]
pub struct DelayedJobScheduler {
    poll_interval: Duration,
}

impl DelayedJobScheduler {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Enqueues every job scheduled at or before `now`. Returns the jobs
    /// this sweep moved; jobs moved concurrently by someone else are skipped.
    pub fn sweep<S: JobStorage>(
        &self,
        client: &BackgroundJobClient<S>,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, ClientError> {
        let due = client
            .storage()
            .connection()
            .and_then(|c| c.scheduled_due(now))
            .map_err(ClientError::Read)?;

        let mut moved = Vec::with_capacity(due.len());
        for job_id in due {
            let state = State::Enqueued {
                queue: client.default_queue().to_string(),
                reason: Some("Triggered by DelayedJobScheduler".into()),
            };
            match client.change_state_guarded(&job_id, state, &[StateName::Scheduled])? {
                Some(_) => moved.push(job_id),
                None => debug!(%job_id, "scheduled job already moved"),
            }
        }
        if !moved.is_empty() {
            info!(count = moved.len(), "scheduled jobs enqueued");
        }
        Ok(moved)
    }

    /// Sweeps every poll interval until `shutdown` turns true or its sender
    /// goes away. A failed sweep is logged and retried on the next tick.
    /// Returns how many jobs were enqueued in total.
    pub async fn run_until<S: JobStorage>(
        &self,
        client: &BackgroundJobClient<S>,
        mut shutdown: watch::Receiver<bool>,
    ) -> usize {
        let mut ticker = tokio::time::interval(self.poll_interval.max(Duration::from_millis(1)));
        let mut total = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => match self.sweep(client, Utc::now()) {
                    Ok(moved) => total += moved.len(),
                    Err(e) => warn!(error = %e, "delayed-job sweep failed"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        total
    }
}
