//! Creation of new job records.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::election::{ElectStateContext, ElectionOutcome, FilterPipeline};
use crate::error::DispatchError;
use crate::state_machine::{Invocation, JobId, ParameterBag, State, StateName};
use crate::storage::{NewJob, StorageConnection};

// Elections per create when an awaited parent settles mid-insert.
const MAX_ELECTIONS: usize = 3;

/// Everything a new job starts with.
#[derive(Debug, Clone)]
pub struct CreateContext {
    pub invocation: Invocation,
    pub initial_state: State,
    pub parameters: ParameterBag,
}

impl CreateContext {
    pub fn new(invocation: Invocation, initial_state: State) -> Self {
        Self {
            invocation,
            initial_state,
            parameters: ParameterBag::new(),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<String>) -> Self {
        self.parameters.set(key, value.into());
        self
    }
}

/// Elects the initial state of a job and creates its record.
#[derive(Debug, Clone)]
pub struct JobFactory {
    pipeline: Arc<FilterPipeline>,
}

impl JobFactory {
    pub fn new(pipeline: Arc<FilterPipeline>) -> Self {
        Self { pipeline }
    }

    /// Returns `Ok(None)` when a filter aborted the creation.
    pub fn create(
        &self,
        connection: &dyn StorageConnection,
        context: CreateContext,
    ) -> Result<Option<JobId>, DispatchError> {
        let CreateContext {
            invocation,
            initial_state,
            parameters,
        } = context;

        if !invocation.is_complete() {
            return Err(DispatchError::Validation(
                "invocation needs a target and a method",
            ));
        }

        let now = Utc::now();
        for _ in 0..MAX_ELECTIONS {
            let mut election = ElectStateContext::new(
                connection,
                &invocation,
                initial_state.clone(),
                parameters.clone(),
                now,
            );
            self.pipeline.elect(&mut election)?;

            let (state, parameter_updates) = match election.into_outcome() {
                ElectionOutcome::Elected {
                    state,
                    parameter_updates,
                } => (state, parameter_updates),
                ElectionOutcome::Aborted { reason } => {
                    info!(%invocation, %reason, "job creation aborted by filter");
                    return Ok(None);
                }
            };
            let mut stored = parameters.clone();
            stored.extend(parameter_updates);

            let summary = state.to_string();
            let new_job = NewJob {
                invocation: invocation.clone(),
                state,
                parameters: stored,
                created_at: now,
            };
            let created = if new_job.state.name() == StateName::Awaiting {
                connection.create_continuation(new_job)?
            } else {
                Some(connection.create_job(new_job)?)
            };
            if let Some(job_id) = created {
                info!(%job_id, state = %summary, "job created");
                return Ok(Some(job_id));
            }
            debug!(%invocation, "awaited parent settled during creation, electing again");
        }

        let parent = match &initial_state {
            State::Awaiting { parent_id, .. } => parent_id.to_string(),
            _ => String::new(),
        };
        Err(DispatchError::UnsettledParent(parent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::{ElectStateFilter, QueueRoutingFilter};
    use crate::error::FilterError;
    use crate::state_machine::{ContinuationOptions, QUEUE_PARAM, RetryConfig};
    use crate::storage::{InMemoryStorage, JobStorage};

    struct RejectAll;

    impl ElectStateFilter for RejectAll {
        fn on_state_election(&self, context: &mut ElectStateContext<'_>) -> Result<(), FilterError> {
            context.abort("creation disabled");
            Ok(())
        }
    }

    struct Exploding;

    impl ElectStateFilter for Exploding {
        fn on_state_election(&self, _: &mut ElectStateContext<'_>) -> Result<(), FilterError> {
            Err(FilterError::new("exploding", "boom"))
        }
    }

    fn hello() -> Invocation {
        Invocation::new("HelloService", "hello").arg("jack")
    }

    fn routing_factory() -> JobFactory {
        JobFactory::new(Arc::new(
            FilterPipeline::builder().register(QueueRoutingFilter).build(),
        ))
    }

    #[test]
    fn creates_record_with_routed_queue() {
        let storage = InMemoryStorage::new();
        let conn = storage.connection().unwrap();
        let context = CreateContext::new(hello(), State::enqueued("default"))
            .with_parameter(QUEUE_PARAM, "hello");

        let id = routing_factory().create(conn.as_ref(), context).unwrap().unwrap();
        let record = storage.record(&id).unwrap();
        assert_eq!(record.current, State::enqueued("hello"));
        assert_eq!(record.history.len(), 1);
        assert_eq!(record.parameters.get(QUEUE_PARAM), Some("hello"));
        assert_eq!(record.job.invocation, hello());
    }

    #[test]
    fn creates_with_default_queue_without_request() {
        let storage = InMemoryStorage::new();
        let conn = storage.connection().unwrap();
        let context = CreateContext::new(hello(), State::enqueued("default"));

        let id = routing_factory().create(conn.as_ref(), context).unwrap().unwrap();
        assert_eq!(storage.record(&id).unwrap().current.queue(), Some("default"));
    }

    #[test]
    fn aborted_creation_stores_nothing() {
        let storage = InMemoryStorage::new();
        let conn = storage.connection().unwrap();
        let factory = JobFactory::new(Arc::new(FilterPipeline::builder().register(RejectAll).build()));

        let id = factory
            .create(conn.as_ref(), CreateContext::new(hello(), State::enqueued("default")))
            .unwrap();
        assert!(id.is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn filter_fault_aborts_creation() {
        let storage = InMemoryStorage::new();
        let conn = storage.connection().unwrap();
        let factory = JobFactory::new(Arc::new(
            FilterPipeline::builder()
                .register(Exploding)
                .register(QueueRoutingFilter)
                .build(),
        ));

        let err = factory
            .create(
                conn.as_ref(),
                CreateContext::new(hello(), State::enqueued("default"))
                    .with_parameter(QUEUE_PARAM, "hello"),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Filter(ref e) if e.filter == "exploding"));
        assert!(storage.is_empty());
    }

    #[test]
    fn continuation_of_finished_parent_is_resolved_at_creation() {
        let storage = InMemoryStorage::new();
        let conn = storage.connection().unwrap();
        let parent = conn
            .create_job(NewJob {
                invocation: hello(),
                state: State::succeeded(),
                parameters: ParameterBag::new(),
                created_at: Utc::now(),
            })
            .unwrap();
        let factory = JobFactory::new(Arc::new(FilterPipeline::standard(RetryConfig::default())));
        let context = CreateContext::new(
            hello(),
            State::awaiting(
                parent,
                State::enqueued("default"),
                ContinuationOptions::OnlyOnSucceeded,
            ),
        )
        .with_parameter(QUEUE_PARAM, "hello");

        let id = factory.create(conn.as_ref(), context).unwrap().unwrap();
        assert_eq!(storage.record(&id).unwrap().current, State::enqueued("hello"));
    }

    #[test]
    fn incomplete_invocation_is_rejected_before_storage() {
        let storage = InMemoryStorage::new();
        let conn = storage.connection().unwrap();
        let err = routing_factory()
            .create(
                conn.as_ref(),
                CreateContext::new(Invocation::new("", "hello"), State::enqueued("default")),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
        assert!(storage.is_empty());
    }

    #[test]
    fn scheduled_creation_keeps_request_in_bag() {
        let storage = InMemoryStorage::new();
        let conn = storage.connection().unwrap();
        let context = CreateContext::new(hello(), State::scheduled_in(chrono::Duration::seconds(5)))
            .with_parameter(QUEUE_PARAM, "hello");

        let id = routing_factory().create(conn.as_ref(), context).unwrap().unwrap();
        let record = storage.record(&id).unwrap();
        assert_eq!(record.current.name(), StateName::Scheduled);
        assert_eq!(record.parameters.get(QUEUE_PARAM), Some("hello"));
    }
}
