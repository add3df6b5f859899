//! Guarded state changes of existing jobs.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::election::{ElectStateContext, ElectionOutcome, FilterPipeline};
use crate::error::DispatchError;
use crate::state_machine::{JobId, State, StateName};
use crate::storage::{StateCommit, StorageConnection};

/// One requested transition.
#[derive(Debug, Clone)]
pub struct StateChangeContext<'a> {
    pub job_id: &'a JobId,
    pub new_state: State,
    /// Empty means "from any state".
    pub expected_states: &'a [StateName],
}

/// Elects and commits state changes.
#[derive(Debug, Clone)]
pub struct StateChanger {
    pipeline: Arc<FilterPipeline>,
}

impl StateChanger {
    pub fn new(pipeline: Arc<FilterPipeline>) -> Self {
        Self { pipeline }
    }

    /// Run election for `request` and commit the result.
    ///
    /// Returns `Ok(None)` without touching the record when the job does not
    /// exist, the current state is not one of `expected_states`, a filter
    /// aborts, or another commit wins the race in between.
    pub fn change_state(
        &self,
        connection: &dyn StorageConnection,
        request: StateChangeContext<'_>,
    ) -> Result<Option<State>, DispatchError> {
        let StateChangeContext {
            job_id,
            new_state,
            expected_states,
        } = request;

        if job_id.as_str().trim().is_empty() {
            return Err(DispatchError::Validation("job id is required"));
        }

        let Some(data) = connection.get_job_data(job_id)? else {
            debug!(%job_id, "state change skipped, job not found");
            return Ok(None);
        };

        let current = data.state.name();
        if !expected_states.is_empty() && !expected_states.contains(&current) {
            debug!(
                %job_id,
                %current,
                expected = ?expected_states,
                "state change skipped, unexpected current state"
            );
            return Ok(None);
        }

        let now = Utc::now();
        let mut context = ElectStateContext::new(
            connection,
            &data.job.invocation,
            new_state,
            data.parameters.clone(),
            now,
        )
        .for_existing(&data.job.id, &data.state);
        self.pipeline.elect(&mut context)?;

        let (elected, parameter_updates) = match context.into_outcome() {
            ElectionOutcome::Elected {
                state,
                parameter_updates,
            } => (state, parameter_updates),
            ElectionOutcome::Aborted { reason } => {
                info!(%job_id, %reason, "state change aborted by filter");
                return Ok(None);
            }
        };

        let applied = connection.commit_state(StateCommit {
            job_id,
            state: &elected,
            expected: expected_states,
            parameters: &parameter_updates,
            at: now,
        })?;
        if !applied {
            debug!(%job_id, "state change lost a concurrent commit");
            return Ok(None);
        }

        info!(%job_id, from = %current, to = %elected, "state changed");
        Ok(Some(elected))
    }
}
