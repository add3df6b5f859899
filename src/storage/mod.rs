//! Storage-facing traits.
//!
//! The dispatch core never owns persistence: a [`JobStorage`] hands out
//! scoped connections, and every mutation of a job record goes through
//! [`StorageConnection::create_job`], [`StorageConnection::create_continuation`]
//! or the guarded [`StorageConnection::commit_state`]. All three must be
//! atomic per job.

mod memory;

pub use memory::InMemoryStorage;

use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::state_machine::{
    HistoryEntry, Invocation, Job, JobId, ParameterBag, State, StateName,
};

/// A storage backend able to open connections.
pub trait JobStorage: Send + Sync {
    fn connection(&self) -> Result<Box<dyn StorageConnection + '_>, StorageError>;
}

/// Everything needed to create a record together with its first state.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub invocation: Invocation,
    pub state: State,
    pub parameters: ParameterBag,
    pub created_at: DateTime<Utc>,
}

/// A snapshot of a stored job, as seen at load time.
#[derive(Debug, Clone)]
pub struct JobData {
    pub job: Job,
    pub state: State,
    pub parameters: ParameterBag,
}

/// A guarded state commit.
///
/// Applied only when `expected` is empty or contains the persisted current
/// state name. The guard check, the history append, the current-state
/// update and the parameter writes happen as one atomic step.
#[derive(Debug, Clone, Copy)]
pub struct StateCommit<'a> {
    pub job_id: &'a JobId,
    pub state: &'a State,
    pub expected: &'a [StateName],
    pub parameters: &'a ParameterBag,
    pub at: DateTime<Utc>,
}

impl StateCommit<'_> {
    /// Whether a job currently in `current` passes the guard.
    pub fn admits(&self, current: StateName) -> bool {
        self.expected.is_empty() || self.expected.contains(&current)
    }
}

/// A scoped handle on storage.
pub trait StorageConnection {
    /// Atomically creates a record with its first committed state.
    fn create_job(&self, new_job: NewJob) -> Result<JobId, StorageError>;

    /// Creates an `Awaiting` record only while its parent exists and is not
    /// final. The parent check and the insert happen under one lock, so a
    /// parent finishing concurrently either sees the child or makes this
    /// return `None` with nothing stored.
    fn create_continuation(&self, new_job: NewJob) -> Result<Option<JobId>, StorageError>;

    fn get_job_data(&self, job_id: &JobId) -> Result<Option<JobData>, StorageError>;

    fn get_job_state(&self, job_id: &JobId) -> Result<Option<State>, StorageError>;

    fn get_job_parameters(&self, job_id: &JobId) -> Result<Option<ParameterBag>, StorageError>;

    fn get_job_parameter(&self, job_id: &JobId, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .get_job_parameters(job_id)?
            .and_then(|bag| bag.get(key).map(str::to_string)))
    }

    fn set_job_parameter(&self, job_id: &JobId, key: &str, value: &str)
    -> Result<(), StorageError>;

    /// Returns `false` without mutating anything when the job is missing or
    /// the guard rejects its current state.
    fn commit_state(&self, commit: StateCommit<'_>) -> Result<bool, StorageError>;

    fn get_history(&self, job_id: &JobId) -> Result<Option<Vec<HistoryEntry>>, StorageError>;

    /// Scheduled jobs whose `enqueue_at` is at or before `now`.
    fn scheduled_due(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, StorageError>;

    /// Jobs currently awaiting `parent_id`.
    fn awaiting_continuations(&self, parent_id: &JobId) -> Result<Vec<JobId>, StorageError>;
}
