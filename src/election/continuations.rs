use tracing::debug;

use super::{ElectStateContext, ElectStateFilter};
use crate::error::FilterError;
use crate::state_machine::State;

/// Resolves an `Awaiting` candidate whose parent is already settled.
///
/// - missing parent: the continuation is deleted
/// - final parent matching the options: `next_state` is elected instead
/// - final parent not matching: the continuation is deleted
/// - parent still running: `Awaiting` is kept for the trigger to resolve
#[derive(Debug, Clone, Copy, Default)]
pub struct ContinuationsFilter;

impl ElectStateFilter for ContinuationsFilter {
    fn name(&self) -> &'static str {
        "continuations"
    }

    fn order(&self) -> i32 {
        30
    }

    fn on_state_election(&self, context: &mut ElectStateContext<'_>) -> Result<(), FilterError> {
        let State::Awaiting {
            parent_id,
            next_state,
            options,
        } = context.candidate_state()
        else {
            return Ok(());
        };
        let (parent_id, next_state, options) = (parent_id.clone(), next_state.clone(), *options);

        let parent = context
            .connection()
            .get_job_state(&parent_id)
            .map_err(|e| FilterError::new(self.name(), e.to_string()))?;

        let replacement = match parent {
            None => State::deleted_because(format!(
                "Can not add a continuation: parent background job `{parent_id}` does not exist"
            )),
            Some(parent) if parent.is_final() => {
                if options.is_satisfied_by(&parent) {
                    *next_state
                } else {
                    State::deleted_because("Continuation condition was not satisfied")
                }
            }
            Some(_) => return Ok(()),
        };

        debug!(%parent_id, elected = %replacement, "continuation resolved at election");
        context.set_candidate_state(replacement);
        Ok(())
    }
}
