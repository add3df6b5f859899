mod job;
mod state;

pub use job::{
    AuditRecord, HistoryEntry, Invocation, Job, JobId, JobRecord, ParameterBag, QUEUE_PARAM,
    RETRY_COUNT_PARAM, RetryConfig,
};
pub use state::{ContinuationOptions, DEFAULT_QUEUE, State, StateName, is_valid_queue_name};
