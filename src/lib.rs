//! Background-job dispatch core.
//!
//! Jobs are created through a [`BackgroundJobClient`]. Every state a job
//! enters, including its first, is proposed to a [`FilterPipeline`] whose
//! filters may rewrite or veto it before the [`StateChanger`] commits it.
//! The [`QueueRoutingFilter`] uses that hook to send a job to the queue its
//! creator asked for, whenever the job is finally enqueued.
//!
//! ```no_run
//! use std::sync::Arc;
//! use qroute::{BackgroundJobClient, FilterPipeline, InMemoryStorage, Invocation, RetryConfig};
//!
//! let client = BackgroundJobClient::new(
//!     Arc::new(InMemoryStorage::new()),
//!     Arc::new(FilterPipeline::standard(RetryConfig::default())),
//! );
//! let id = client.enqueue("hello", Invocation::new("HelloService", "hello").arg("jack"));
//! ```

pub mod changer;
pub mod client;
pub mod config;
pub mod continuations;
pub mod election;
pub mod error;
pub mod factory;
pub mod logging;
pub mod scheduler;
pub mod state_machine;
pub mod storage;

pub use changer::{StateChangeContext, StateChanger};
pub use client::BackgroundJobClient;
pub use config::QrouteConfig;
pub use continuations::{ContinuationOutcome, ContinuationResolver};
pub use election::{
    AutomaticRetryFilter, ContinuationsFilter, ElectStateContext, ElectStateFilter,
    ElectionOutcome, FilterPipeline, QueueRoutingFilter,
};
pub use error::{ClientError, DispatchError, FilterError, StorageError};
pub use factory::{CreateContext, JobFactory};
pub use scheduler::DelayedJobScheduler;
pub use state_machine::{
    AuditRecord, ContinuationOptions, Invocation, Job, JobId, JobRecord, ParameterBag,
    RetryConfig, State, StateName,
};
pub use storage::{InMemoryStorage, JobStorage, StorageConnection};
