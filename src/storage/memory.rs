//! In-memory storage for tests, demos and embedding.
//!
//! - No IO
//! - One mutex over all records, so commits are totally ordered

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{JobData, JobStorage, NewJob, StateCommit, StorageConnection};
use crate::error::StorageError;
use crate::state_machine::{HistoryEntry, Job, JobId, JobRecord, ParameterBag, State};

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    records: Mutex<HashMap<JobId, JobRecord>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<JobId, JobRecord>>, StorageError> {
        self.records.lock().map_err(|_| StorageError::Poisoned)
    }

    /// A full copy of the stored record.
    pub fn record(&self, job_id: &JobId) -> Option<JobRecord> {
        self.lock().ok()?.get(job_id).cloned()
    }

    /// Jobs a worker listening on `queue` would see, oldest enqueue first.
    pub fn enqueued_in(&self, queue: &str) -> Vec<JobId> {
        let Ok(records) = self.lock() else {
            return Vec::new();
        };
        let mut found: Vec<(DateTime<Utc>, JobId)> = records
            .values()
            .filter(|r| r.current.queue() == Some(queue))
            .map(|r| {
                let at = r.history.last().map(|e| e.created_at).unwrap_or(r.job.created_at);
                (at, r.job.id.clone())
            })
            .collect();
        found.sort();
        found.into_iter().map(|(_, id)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn insert(records: &mut HashMap<JobId, JobRecord>, new_job: NewJob) -> JobId {
    let id = JobId::generate();
    let job = Job {
        id: id.clone(),
        invocation: new_job.invocation,
        created_at: new_job.created_at,
    };
    let record = JobRecord::new(job, new_job.state, new_job.parameters, new_job.created_at);
    records.insert(id.clone(), record);
    id
}

impl JobStorage for InMemoryStorage {
    fn connection(&self) -> Result<Box<dyn StorageConnection + '_>, StorageError> {
        Ok(Box::new(InMemoryConnection { storage: self }))
    }
}

struct InMemoryConnection<'a> {
    storage: &'a InMemoryStorage,
}

impl StorageConnection for InMemoryConnection<'_> {
    fn create_job(&self, new_job: NewJob) -> Result<JobId, StorageError> {
        Ok(insert(&mut *self.storage.lock()?, new_job))
    }

    fn create_continuation(&self, new_job: NewJob) -> Result<Option<JobId>, StorageError> {
        let mut records = self.storage.lock()?;
        if let State::Awaiting { parent_id, .. } = &new_job.state {
            let parent_running = records
                .get(parent_id)
                .is_some_and(|parent| !parent.current.is_final());
            if !parent_running {
                return Ok(None);
            }
        }
        Ok(Some(insert(&mut records, new_job)))
    }

    fn get_job_data(&self, job_id: &JobId) -> Result<Option<JobData>, StorageError> {
        Ok(self.storage.lock()?.get(job_id).map(|r| JobData {
            job: r.job.clone(),
            state: r.current.clone(),
            parameters: r.parameters.clone(),
        }))
    }

    fn get_job_state(&self, job_id: &JobId) -> Result<Option<State>, StorageError> {
        Ok(self.storage.lock()?.get(job_id).map(|r| r.current.clone()))
    }

    fn get_job_parameters(&self, job_id: &JobId) -> Result<Option<ParameterBag>, StorageError> {
        Ok(self.storage.lock()?.get(job_id).map(|r| r.parameters.clone()))
    }

    fn set_job_parameter(
        &self,
        job_id: &JobId,
        key: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        if let Some(record) = self.storage.lock()?.get_mut(job_id) {
            record.parameters.set(key, value);
        }
        Ok(())
    }

    fn commit_state(&self, commit: StateCommit<'_>) -> Result<bool, StorageError> {
        let mut records = self.storage.lock()?;
        let Some(record) = records.get_mut(commit.job_id) else {
            return Ok(false);
        };
        if !commit.admits(record.current.name()) {
            return Ok(false);
        }
        record.parameters.extend(commit.parameters.clone());
        record.apply(commit.state.clone(), commit.at);
        Ok(true)
    }

    fn get_history(&self, job_id: &JobId) -> Result<Option<Vec<HistoryEntry>>, StorageError> {
        Ok(self.storage.lock()?.get(job_id).map(|r| r.history.clone()))
    }

    fn scheduled_due(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, StorageError> {
        let records = self.storage.lock()?;
        let mut due: Vec<(DateTime<Utc>, JobId)> = records
            .values()
            .filter_map(|r| match &r.current {
                State::Scheduled { enqueue_at, .. } if *enqueue_at <= now => {
                    Some((*enqueue_at, r.job.id.clone()))
                }
                _ => None,
            })
            .collect();
        due.sort();
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    fn awaiting_continuations(&self, parent_id: &JobId) -> Result<Vec<JobId>, StorageError> {
        let records = self.storage.lock()?;
        let mut children: Vec<(DateTime<Utc>, JobId)> = records
            .values()
            .filter(|r| {
                matches!(&r.current, State::Awaiting { parent_id: p, .. } if p == parent_id)
            })
            .map(|r| (r.job.created_at, r.job.id.clone()))
            .collect();
        children.sort();
        Ok(children.into_iter().map(|(_, id)| id).collect())
    }
}
