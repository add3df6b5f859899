use tracing::debug;

use super::{ElectStateContext, ElectStateFilter};
use crate::error::FilterError;
use crate::state_machine::{ParameterBag, QUEUE_PARAM, State};

/// Sends an `Enqueued` candidate to the queue requested at creation time.
///
/// The request lives in the job's parameter bag under [`QUEUE_PARAM`], so it
/// survives intermediate states: a job scheduled or awaiting today lands in
/// the requested queue whenever it is finally enqueued.
///
/// Registered with the maximal order so that default queues chosen by any
/// other filter can still be overridden. Filters registered later with the
/// same order run after it.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueRoutingFilter;

impl ElectStateFilter for QueueRoutingFilter {
    fn name(&self) -> &'static str {
        "queue-routing"
    }

    fn order(&self) -> i32 {
        i32::MAX
    }

    fn on_state_election(&self, context: &mut ElectStateContext<'_>) -> Result<(), FilterError> {
        let parameters = context.parameters().clone();
        let job_id = context.job_id().map(ToString::to_string);
        if apply_requested_queue(context.candidate_state_mut(), &parameters) {
            debug!(
                job_id = job_id.as_deref().unwrap_or("<new>"),
                queue = parameters.get(QUEUE_PARAM).unwrap_or_default(),
                "routed to requested queue"
            );
        }
        Ok(())
    }
}

/// Rewrite `candidate`'s queue from the bag. Returns whether it changed.
///
/// Non-`Enqueued` candidates and blank requests leave `candidate` alone.
pub fn apply_requested_queue(candidate: &mut State, parameters: &ParameterBag) -> bool {
    let State::Enqueued { queue, .. } = candidate else {
        return false;
    };
    let Some(requested) = parameters
        .get(QUEUE_PARAM)
        .map(str::trim)
        .filter(|q| !q.is_empty())
    else {
        return false;
    };
    if queue.as_str() == requested {
        return false;
    }
    *queue = requested.to_string();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn bag(queue: &str) -> ParameterBag {
        let mut bag = ParameterBag::new();
        bag.set(QUEUE_PARAM, queue);
        bag
    }

    #[test]
    fn overrides_enqueued_queue() {
        let mut state = State::enqueued("default");
        assert!(apply_requested_queue(&mut state, &bag("hello")));
        assert_eq!(state, State::enqueued("hello"));
    }

    #[test]
    fn keeps_default_without_request() {
        let mut state = State::enqueued("default");
        assert!(!apply_requested_queue(&mut state, &ParameterBag::new()));
        assert_eq!(state, State::enqueued("default"));
    }

    #[test]
    fn blank_request_is_ignored() {
        let mut state = State::enqueued("default");
        assert!(!apply_requested_queue(&mut state, &bag("   ")));
        assert_eq!(state.queue(), Some("default"));
    }

    #[test]
    fn non_enqueued_candidates_are_untouched() {
        let mut state = State::scheduled_in(Duration::seconds(5));
        let before = state.clone();
        assert!(!apply_requested_queue(&mut state, &bag("hello")));
        assert_eq!(state, before);

        let mut state = State::succeeded();
        assert!(!apply_requested_queue(&mut state, &bag("hello")));
    }

    #[test]
    fn reason_survives_rewrite() {
        let mut state = State::Enqueued {
            queue: "default".into(),
            reason: Some("requeued".into()),
        };
        apply_requested_queue(&mut state, &bag("hello"));
        assert_eq!(state.queue(), Some("hello"));
        assert_eq!(state.reason(), Some("requeued"));
    }
}
