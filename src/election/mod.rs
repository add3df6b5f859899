//! State election: filters that see a candidate state before it is committed.
//!
//! A [`FilterPipeline`] is assembled once at startup and shared by the job
//! factory and the state changer. Filters run in ascending [`order`], ties
//! broken by registration order. Each call gets exclusive `&mut` access to
//! the [`ElectStateContext`], so later filters observe earlier mutations.
//!
//! [`order`]: ElectStateFilter::order

mod continuations;
mod queue;
mod retry;

pub use continuations::ContinuationsFilter;
pub use queue::{QueueRoutingFilter, apply_requested_queue};
pub use retry::{AttemptsExceededAction, AutomaticRetryFilter};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::error::{DispatchError, FilterError};
use crate::state_machine::{Invocation, JobId, ParameterBag, RetryConfig, State};
use crate::storage::StorageConnection;

/// A policy consulted whenever a state is about to be committed.
pub trait ElectStateFilter: Send + Sync {
    /// Used in logs and in [`FilterError`]s.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Lower orders run first.
    fn order(&self) -> i32 {
        0
    }

    /// Inspect or rewrite the candidate. Returning an error aborts the whole
    /// create or state-change call; nothing is committed.
    fn on_state_election(&self, context: &mut ElectStateContext<'_>) -> Result<(), FilterError>;
}

/// The mutable view handed to each filter during one election.
pub struct ElectStateContext<'a> {
    connection: &'a dyn StorageConnection,
    invocation: &'a Invocation,
    job_id: Option<&'a JobId>,
    current_state: Option<&'a State>,
    candidate: State,
    parameters: ParameterBag,
    updates: ParameterBag,
    aborted: Option<String>,
    now: DateTime<Utc>,
}

/// What an election produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ElectionOutcome {
    /// Commit `state` and persist `parameter_updates` with it.
    Elected {
        state: State,
        parameter_updates: ParameterBag,
    },
    /// A filter vetoed the transition; nothing is applied.
    Aborted { reason: String },
}

impl<'a> ElectStateContext<'a> {
    pub fn new(
        connection: &'a dyn StorageConnection,
        invocation: &'a Invocation,
        candidate: State,
        parameters: ParameterBag,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            connection,
            invocation,
            job_id: None,
            current_state: None,
            candidate,
            parameters,
            updates: ParameterBag::new(),
            aborted: None,
            now,
        }
    }

    /// Attach the stored job this election is for (absent during creation).
    pub fn for_existing(mut self, job_id: &'a JobId, current_state: &'a State) -> Self {
        self.job_id = Some(job_id);
        self.current_state = Some(current_state);
        self
    }

    pub fn connection(&self) -> &'a dyn StorageConnection {
        self.connection
    }

    pub fn invocation(&self) -> &Invocation {
        self.invocation
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id
    }

    /// `None` while the job is being created.
    pub fn current_state(&self) -> Option<&State> {
        self.current_state
    }

    pub fn candidate_state(&self) -> &State {
        &self.candidate
    }

    pub fn candidate_state_mut(&mut self) -> &mut State {
        &mut self.candidate
    }

    pub fn set_candidate_state(&mut self, state: State) {
        self.candidate = state;
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key)
    }

    pub fn parameters(&self) -> &ParameterBag {
        &self.parameters
    }

    /// Visible to later filters immediately, persisted with the commit.
    pub fn set_parameter(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        self.parameters.set(key, value.clone());
        self.updates.set(key, value);
    }

    /// Veto the transition. Remaining filters are skipped.
    pub fn abort(&mut self, reason: impl Into<String>) {
        self.aborted = Some(reason.into());
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn into_outcome(self) -> ElectionOutcome {
        match self.aborted {
            Some(reason) => ElectionOutcome::Aborted { reason },
            None => ElectionOutcome::Elected {
                state: self.candidate,
                parameter_updates: self.updates,
            },
        }
    }
}

/// Ordered, immutable set of election filters.
#[derive(Clone, Default)]
pub struct FilterPipeline {
    filters: Vec<Arc<dyn ElectStateFilter>>,
}

impl FilterPipeline {
    pub fn builder() -> FilterPipelineBuilder {
        FilterPipelineBuilder::default()
    }

    /// A pipeline with no filters: candidates are committed as proposed.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Retries, continuation checks, then queue routing last.
    pub fn standard(retry: RetryConfig) -> Self {
        Self::builder()
            .register(AutomaticRetryFilter::new(retry))
            .register(ContinuationsFilter)
            .register(QueueRoutingFilter)
            .build()
    }

    pub fn filter_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.filters.iter().map(|f| f.name())
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run every filter over `context` in order.
    pub fn elect(&self, context: &mut ElectStateContext<'_>) -> Result<(), DispatchError> {
        for filter in &self.filters {
            if context.is_aborted() {
                break;
            }
            let before = context.candidate_state().name();
            filter.on_state_election(context)?;
            trace!(filter = filter.name(), "filter ran");
            let after = context.candidate_state().name();
            if before != after {
                debug!(
                    filter = filter.name(),
                    from = %before,
                    to = %after,
                    "candidate state replaced"
                );
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.filter_names()).finish()
    }
}

/// Collects filters during startup.
#[derive(Default)]
pub struct FilterPipelineBuilder {
    filters: Vec<Arc<dyn ElectStateFilter>>,
}

impl FilterPipelineBuilder {
    pub fn register(self, filter: impl ElectStateFilter + 'static) -> Self {
        self.register_shared(Arc::new(filter))
    }

    pub fn register_shared(mut self, filter: Arc<dyn ElectStateFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn build(mut self) -> FilterPipeline {
        // Stable: equal orders keep registration order.
        self.filters.sort_by_key(|f| f.order());
        FilterPipeline {
            filters: self.filters,
        }
    }
}
