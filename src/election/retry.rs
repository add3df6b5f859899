use chrono::Duration;
use tracing::warn;

use super::{ElectStateContext, ElectStateFilter};
use crate::error::FilterError;
use crate::state_machine::{RETRY_COUNT_PARAM, RetryConfig, State};

/// What happens to a job once its retries are used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttemptsExceededAction {
    /// Let the `Failed` state through.
    #[default]
    Fail,
    /// Replace it with `Deleted`.
    Delete,
}

/// Turns a `Failed` candidate into a delayed retry while attempts remain.
///
/// The attempt counter lives in the `RetryCount` parameter. The retry is a
/// `Scheduled` state, so the job comes back through the delayed-job sweep
/// and keeps any queue it was routed to.
#[derive(Debug, Clone)]
pub struct AutomaticRetryFilter {
    config: RetryConfig,
    on_attempts_exceeded: AttemptsExceededAction,
}

impl AutomaticRetryFilter {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            on_attempts_exceeded: AttemptsExceededAction::default(),
        }
    }

    pub fn on_attempts_exceeded(mut self, action: AttemptsExceededAction) -> Self {
        self.on_attempts_exceeded = action;
        self
    }
}

impl ElectStateFilter for AutomaticRetryFilter {
    fn name(&self) -> &'static str {
        "automatic-retry"
    }

    fn order(&self) -> i32 {
        20
    }

    fn on_state_election(&self, context: &mut ElectStateContext<'_>) -> Result<(), FilterError> {
        let State::Failed { error, .. } = context.candidate_state() else {
            return Ok(());
        };
        let error = error.clone();

        let retried: u32 = match context.parameter(RETRY_COUNT_PARAM) {
            None => 0,
            Some(raw) => raw.parse().map_err(|_| {
                FilterError::new(
                    self.name(),
                    format!("invalid {RETRY_COUNT_PARAM} parameter `{raw}`"),
                )
            })?,
        };
        let attempt = retried + 1;
        let max = self.config.max_retries;

        if attempt <= max {
            let delay_ms = self.config.delay_for_attempt(attempt);
            let now = context.now();
            let enqueue_at = i64::try_from(delay_ms)
                .ok()
                .and_then(Duration::try_milliseconds)
                .and_then(|delay| now.checked_add_signed(delay))
                .ok_or_else(|| {
                    FilterError::new(self.name(), format!("retry delay {delay_ms}ms out of range"))
                })?;

            warn!(
                job_id = ?context.job_id(),
                attempt,
                max,
                delay_ms,
                %error,
                "job failed, scheduling retry"
            );
            context.set_parameter(RETRY_COUNT_PARAM, attempt.to_string());
            context.set_candidate_state(State::Scheduled {
                enqueue_at,
                scheduled_at: now,
                reason: Some(format!("Retry attempt {attempt} of {max}: {error}")),
            });
            return Ok(());
        }

        match self.on_attempts_exceeded {
            AttemptsExceededAction::Fail => {
                warn!(%error, max, "retry attempts exhausted");
            }
            AttemptsExceededAction::Delete => {
                context.set_candidate_state(State::deleted_because(
                    "Exceeded the maximum number of retry attempts",
                ));
            }
        }
        Ok(())
    }
}
