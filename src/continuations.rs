//! Activation of continuations once their parent has finished.
//!
//! Called by whatever commits the parent's final state (usually the worker
//! pool's completion path). Calling it again is harmless: every move is
//! guarded on the child still being `Awaiting`.

use tracing::{debug, info};

use crate::client::BackgroundJobClient;
use crate::error::ClientError;
use crate::state_machine::{JobId, State, StateName};
use crate::storage::JobStorage;

/// Result of resolving one awaiting child.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuationOutcome {
    pub job_id: JobId,
    /// `None` when another caller resolved the child first.
    pub applied: Option<State>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContinuationResolver;

impl ContinuationResolver {
    pub fn new() -> Self {
        Self
    }

    /// Moves every job awaiting `parent_id` to its next state, or deletes it
    /// when the parent's final state does not satisfy its options.
    ///
    /// Does nothing while the parent is missing or not yet final.
    pub fn trigger<S: JobStorage>(
        &self,
        client: &BackgroundJobClient<S>,
        parent_id: &JobId,
    ) -> Result<Vec<ContinuationOutcome>, ClientError> {
        let Some(parent) = client.get_state(parent_id)? else {
            return Ok(Vec::new());
        };
        if !parent.is_final() {
            debug!(%parent_id, state = %parent.name(), "parent not finished, continuations wait");
            return Ok(Vec::new());
        }

        let children = client
            .storage()
            .connection()
            .and_then(|c| c.awaiting_continuations(parent_id))
            .map_err(ClientError::Read)?;

        let mut outcomes = Vec::with_capacity(children.len());
        for child in children {
            let Some(State::Awaiting {
                next_state,
                options,
                ..
            }) = client.get_state(&child)?
            else {
                continue;
            };

            let target = if options.is_satisfied_by(&parent) {
                *next_state
            } else {
                State::deleted_because("Continuation condition was not satisfied")
            };
            let applied = client.change_state_guarded(&child, target, &[StateName::Awaiting])?;
            if let Some(state) = &applied {
                info!(%parent_id, job_id = %child, %state, "continuation activated");
            }
            outcomes.push(ContinuationOutcome {
                job_id: child,
                applied,
            });
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::FilterPipeline;
    use crate::state_machine::{ContinuationOptions, Invocation, RetryConfig};
    use crate::storage::InMemoryStorage;
    use std::sync::Arc;

    fn client() -> BackgroundJobClient<InMemoryStorage> {
        BackgroundJobClient::new(
            Arc::new(InMemoryStorage::new()),
            Arc::new(FilterPipeline::standard(RetryConfig {
                max_retries: 0,
                base_delay_ms: 1000,
            })),
        )
    }

    fn hello() -> Invocation {
        Invocation::new("HelloService", "hello").arg("jack")
    }

    fn running_parent(client: &BackgroundJobClient<InMemoryStorage>) -> JobId {
        let parent = client.enqueue("", hello()).unwrap().unwrap();
        assert!(client
            .change_state(&parent, State::processing("srv"), Some(StateName::Enqueued))
            .unwrap());
        parent
    }

    #[test]
    fn succeeded_parent_activates_continuation_in_requested_queue() {
        let client = client();
        let parent = running_parent(&client);
        let child = client
            .continue_job_with(&parent, "hello", hello(), None, ContinuationOptions::OnlyOnSucceeded)
            .unwrap()
            .unwrap();
        assert_eq!(client.get_state(&child).unwrap().unwrap().name(), StateName::Awaiting);

        // Nothing happens while the parent runs.
        assert!(ContinuationResolver::new().trigger(&client, &parent).unwrap().is_empty());

        client
            .change_state(&parent, State::succeeded(), Some(StateName::Processing))
            .unwrap();
        let outcomes = ContinuationResolver::new().trigger(&client, &parent).unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].applied, Some(State::enqueued("hello")));
        assert_eq!(client.storage().enqueued_in("hello"), vec![child]);
    }

    #[test]
    fn failed_parent_deletes_success_only_continuation() {
        let client = client();
        let parent = running_parent(&client);
        let child = client
            .continue_job_with(&parent, "hello", hello(), None, ContinuationOptions::OnlyOnSucceeded)
            .unwrap()
            .unwrap();

        client
            .change_state(&parent, State::failed("Error testing"), Some(StateName::Processing))
            .unwrap();
        ContinuationResolver::new().trigger(&client, &parent).unwrap();

        assert_eq!(client.get_state(&child).unwrap().unwrap().name(), StateName::Deleted);
    }

    #[test]
    fn any_finished_state_follows_failure() {
        let client = client();
        let parent = running_parent(&client);
        let child = client
            .continue_job_with(
                &parent,
                "",
                hello(),
                None,
                ContinuationOptions::OnAnyFinishedState,
            )
            .unwrap()
            .unwrap();

        client
            .change_state(&parent, State::failed("Error testing"), Some(StateName::Processing))
            .unwrap();
        ContinuationResolver::new().trigger(&client, &parent).unwrap();

        assert_eq!(client.get_state(&child).unwrap().unwrap(), State::enqueued("default"));
    }

    #[test]
    fn repeated_trigger_is_harmless() {
        let client = client();
        let parent = running_parent(&client);
        let child = client
            .continue_job_with(&parent, "hello", hello(), None, ContinuationOptions::OnlyOnSucceeded)
            .unwrap()
            .unwrap();
        client.change_state(&parent, State::succeeded(), None).unwrap();

        let resolver = ContinuationResolver::new();
        assert_eq!(resolver.trigger(&client, &parent).unwrap().len(), 1);
        assert!(resolver.trigger(&client, &parent).unwrap().is_empty());
        assert_eq!(client.storage().record(&child).unwrap().history.len(), 2);
    }
}
