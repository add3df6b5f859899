//! The public entry point for creating and moving background jobs.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::changer::{StateChangeContext, StateChanger};
use crate::config::QrouteConfig;
use crate::election::FilterPipeline;
use crate::error::{ClientError, DispatchError};
use crate::factory::{CreateContext, JobFactory};
use crate::state_machine::{
    ContinuationOptions, DEFAULT_QUEUE, Invocation, JobId, QUEUE_PARAM, State, StateName,
    is_valid_queue_name,
};
use crate::storage::JobStorage;

/// Creates jobs and changes their states against one storage.
///
/// The filter pipeline is fixed at construction and shared by creation and
/// state changes, so every transition sees the same policies.
pub struct BackgroundJobClient<S: JobStorage> {
    storage: Arc<S>,
    factory: JobFactory,
    state_changer: StateChanger,
    default_queue: String,
}

impl<S: JobStorage> BackgroundJobClient<S> {
    pub fn new(storage: Arc<S>, pipeline: Arc<FilterPipeline>) -> Self {
        Self {
            storage,
            factory: JobFactory::new(pipeline.clone()),
            state_changer: StateChanger::new(pipeline),
            default_queue: DEFAULT_QUEUE.to_string(),
        }
    }

    /// Standard pipeline and default queue taken from `config`.
    pub fn from_config(storage: Arc<S>, config: &QrouteConfig) -> Self {
        Self::new(storage, Arc::new(config.filter_pipeline()))
            .with_default_queue(config.default_queue.clone())
    }

    pub fn with_default_queue(mut self, queue: impl Into<String>) -> Self {
        self.default_queue = queue.into();
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }

    /// Creates a job with `state` as its candidate initial state.
    ///
    /// `Ok(None)` means a filter cancelled the creation.
    pub fn create(
        &self,
        invocation: Invocation,
        state: State,
    ) -> Result<Option<JobId>, ClientError> {
        self.create_with(None, invocation, state)
    }

    /// Like [`create`](Self::create), remembering `queue` as the job's
    /// requested queue. A blank `queue` means no request.
    pub fn create_in_queue(
        &self,
        queue: &str,
        invocation: Invocation,
        state: State,
    ) -> Result<Option<JobId>, ClientError> {
        let queue = queue.trim();
        if queue.is_empty() {
            return self.create(invocation, state);
        }
        if !is_valid_queue_name(queue) {
            return Err(ClientError::Validation(format!(
                "queue name `{queue}` must consist of lowercase letters, digits, underscores and dashes"
            )));
        }
        self.create_with(Some(queue), invocation, state)
    }

    fn create_with(
        &self,
        queue: Option<&str>,
        invocation: Invocation,
        state: State,
    ) -> Result<Option<JobId>, ClientError> {
        if !invocation.is_complete() {
            return Err(ClientError::Validation(
                "invocation needs a target and a method".into(),
            ));
        }

        let mut context = CreateContext::new(invocation, state);
        if let Some(queue) = queue {
            context = context.with_parameter(QUEUE_PARAM, queue);
        }

        let connection = self
            .storage
            .connection()
            .map_err(|e| ClientError::Creation(e.into()))?;
        self.factory
            .create(connection.as_ref(), context)
            .map_err(ClientError::Creation)
    }

    /// Fire-and-forget: enqueue now, in `queue` if given.
    pub fn enqueue(&self, queue: &str, invocation: Invocation) -> Result<Option<JobId>, ClientError> {
        let state = State::enqueued(self.default_queue.clone());
        self.create_in_queue(queue, invocation, state)
    }

    /// Enqueue after `delay`, in `queue` if given.
    pub fn schedule(
        &self,
        queue: &str,
        invocation: Invocation,
        delay: Duration,
    ) -> Result<Option<JobId>, ClientError> {
        self.create_in_queue(queue, invocation, State::scheduled_in(delay))
    }

    /// Enqueue at or after `enqueue_at`, in `queue` if given.
    pub fn schedule_at(
        &self,
        queue: &str,
        invocation: Invocation,
        enqueue_at: DateTime<Utc>,
    ) -> Result<Option<JobId>, ClientError> {
        self.create_in_queue(queue, invocation, State::scheduled_at(enqueue_at))
    }

    /// Creates a continuation of `parent_id`.
    ///
    /// `next_state` defaults to enqueued in the default queue; the queue
    /// request in `queue` still wins once the continuation is activated.
    pub fn continue_job_with(
        &self,
        parent_id: &JobId,
        queue: &str,
        invocation: Invocation,
        next_state: Option<State>,
        options: ContinuationOptions,
    ) -> Result<Option<JobId>, ClientError> {
        if parent_id.as_str().trim().is_empty() {
            return Err(ClientError::Validation("parent job id is required".into()));
        }
        let next_state = next_state.unwrap_or_else(|| State::enqueued(self.default_queue.clone()));
        let state = State::awaiting(parent_id.clone(), next_state, options);
        self.create_in_queue(queue, invocation, state)
    }

    /// Moves `job_id` to `state`, optionally only from `expected_state`.
    ///
    /// True only when a state with the requested name was applied; filters
    /// may have elected something else (e.g. a retry instead of a failure).
    pub fn change_state(
        &self,
        job_id: &JobId,
        state: State,
        expected_state: Option<StateName>,
    ) -> Result<bool, ClientError> {
        let requested = state.name();
        let expected: Vec<StateName> = expected_state.into_iter().collect();
        let applied = self.change_state_guarded(job_id, state, &expected)?;
        Ok(applied.is_some_and(|s| s.name() == requested))
    }

    /// Moves `job_id` to `state` if its current state is in `expected`
    /// (any state when empty). Returns the state actually committed.
    pub fn change_state_guarded(
        &self,
        job_id: &JobId,
        state: State,
        expected: &[StateName],
    ) -> Result<Option<State>, ClientError> {
        if job_id.as_str().trim().is_empty() {
            return Err(ClientError::Validation("job id is required".into()));
        }
        let run = || -> Result<Option<State>, DispatchError> {
            let connection = self.storage.connection()?;
            self.state_changer.change_state(
                connection.as_ref(),
                StateChangeContext {
                    job_id,
                    new_state: state,
                    expected_states: expected,
                },
            )
        };
        run().map_err(ClientError::StateChange)
    }

    /// Puts a job back into its queue.
    pub fn requeue(&self, job_id: &JobId, from_state: Option<StateName>) -> Result<bool, ClientError> {
        let state = State::Enqueued {
            queue: self.default_queue.clone(),
            reason: Some("Requeued".into()),
        };
        self.change_state(job_id, state, from_state)
    }

    pub fn delete(&self, job_id: &JobId, from_state: Option<StateName>) -> Result<bool, ClientError> {
        self.change_state(job_id, State::deleted(), from_state)
    }

    /// Current state, as a worker pool would read it.
    pub fn get_state(&self, job_id: &JobId) -> Result<Option<State>, ClientError> {
        let connection = self.storage.connection().map_err(ClientError::Read)?;
        connection.get_job_state(job_id).map_err(ClientError::Read)
    }

    pub fn get_parameter(&self, job_id: &JobId, key: &str) -> Result<Option<String>, ClientError> {
        let connection = self.storage.connection().map_err(ClientError::Read)?;
        connection.get_job_parameter(job_id, key).map_err(ClientError::Read)
    }
}
