use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::job::JobId;

/// Queue used when neither the caller nor the parameter bag names one.
pub const DEFAULT_QUEUE: &str = "default";

/// When an awaiting continuation may leave the `Awaiting` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContinuationOptions {
    /// Only a `Succeeded` parent activates the continuation.
    #[default]
    OnlyOnSucceeded,
    /// Any final parent state activates the continuation.
    OnAnyFinishedState,
}

impl ContinuationOptions {
    /// Whether a parent sitting in `parent` satisfies these options.
    ///
    /// Non-final parents never satisfy anything.
    pub fn is_satisfied_by(self, parent: &State) -> bool {
        match self {
            ContinuationOptions::OnlyOnSucceeded => matches!(parent, State::Succeeded { .. }),
            ContinuationOptions::OnAnyFinishedState => parent.is_final(),
        }
    }
}

/// Lifecycle stage of a background job.
///
/// Flow: (none) → Enqueued | Scheduled | Awaiting → Processing →
/// Succeeded | Failed | Deleted. The last three are absorbing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum State {
    /// Ready for immediate dequeue from `queue`.
    Enqueued {
        queue: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Eligible to become `Enqueued` at or after `enqueue_at`.
    Scheduled {
        enqueue_at: DateTime<Utc>,
        scheduled_at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Waiting for `parent_id` to reach a final state matching `options`.
    Awaiting {
        parent_id: JobId,
        next_state: Box<State>,
        options: ContinuationOptions,
    },
    /// Picked up by a worker.
    Processing {
        server_id: String,
        started_at: DateTime<Utc>,
    },
    Succeeded {
        succeeded_at: DateTime<Utc>,
    },
    Failed {
        error: String,
        failed_at: DateTime<Utc>,
    },
    Deleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl State {
    pub fn enqueued(queue: impl Into<String>) -> Self {
        State::Enqueued {
            queue: queue.into(),
            reason: None,
        }
    }

    pub fn scheduled_at(enqueue_at: DateTime<Utc>) -> Self {
        State::Scheduled {
            enqueue_at,
            scheduled_at: Utc::now(),
            reason: None,
        }
    }

    pub fn scheduled_in(delay: Duration) -> Self {
        let now = Utc::now();
        State::Scheduled {
            enqueue_at: now + delay,
            scheduled_at: now,
            reason: None,
        }
    }

    pub fn awaiting(parent_id: JobId, next_state: State, options: ContinuationOptions) -> Self {
        State::Awaiting {
            parent_id,
            next_state: Box::new(next_state),
            options,
        }
    }

    pub fn processing(server_id: impl Into<String>) -> Self {
        State::Processing {
            server_id: server_id.into(),
            started_at: Utc::now(),
        }
    }

    pub fn succeeded() -> Self {
        State::Succeeded {
            succeeded_at: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        State::Failed {
            error: error.into(),
            failed_at: Utc::now(),
        }
    }

    pub fn deleted() -> Self {
        State::Deleted { reason: None }
    }

    pub fn deleted_because(reason: impl Into<String>) -> Self {
        State::Deleted {
            reason: Some(reason.into()),
        }
    }

    pub fn name(&self) -> StateName {
        match self {
            State::Enqueued { .. } => StateName::Enqueued,
            State::Scheduled { .. } => StateName::Scheduled,
            State::Awaiting { .. } => StateName::Awaiting,
            State::Processing { .. } => StateName::Processing,
            State::Succeeded { .. } => StateName::Succeeded,
            State::Failed { .. } => StateName::Failed,
            State::Deleted { .. } => StateName::Deleted,
        }
    }

    /// Final states accept no further transitions once committed.
    pub fn is_final(&self) -> bool {
        self.name().is_final()
    }

    /// The queue a worker pool should dequeue this job from, if any.
    pub fn queue(&self) -> Option<&str> {
        match self {
            State::Enqueued { queue, .. } => Some(queue),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            State::Enqueued { reason, .. }
            | State::Scheduled { reason, .. }
            | State::Deleted { reason } => reason.as_deref(),
            State::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Enqueued { queue, .. } => write!(f, "ENQUEUED({queue})"),
            State::Scheduled { enqueue_at, .. } => {
                write!(f, "SCHEDULED({})", enqueue_at.to_rfc3339())
            }
            State::Awaiting { parent_id, .. } => write!(f, "AWAITING({parent_id})"),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// The tag of a [`State`], used for optimistic-concurrency guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateName {
    Enqueued,
    Scheduled,
    Awaiting,
    Processing,
    Succeeded,
    Failed,
    Deleted,
}

impl StateName {
    pub fn is_final(self) -> bool {
        matches!(
            self,
            StateName::Succeeded | StateName::Failed | StateName::Deleted
        )
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateName::Enqueued => write!(f, "ENQUEUED"),
            StateName::Scheduled => write!(f, "SCHEDULED"),
            StateName::Awaiting => write!(f, "AWAITING"),
            StateName::Processing => write!(f, "PROCESSING"),
            StateName::Succeeded => write!(f, "SUCCEEDED"),
            StateName::Failed => write!(f, "FAILED"),
            StateName::Deleted => write!(f, "DELETED"),
        }
    }
}

/// Queue names are limited to lowercase letters, digits, `_` and `-`.
pub fn is_valid_queue_name(queue: &str) -> bool {
    !queue.is_empty()
        && queue
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_states_are_absorbing_kinds() {
        assert!(State::succeeded().is_final());
        assert!(State::failed("boom").is_final());
        assert!(State::deleted().is_final());
        assert!(!State::enqueued("hello").is_final());
        assert!(!State::scheduled_in(Duration::seconds(5)).is_final());
        assert!(!State::processing("srv-1").is_final());
        let awaiting = State::awaiting(
            JobId::from("parent"),
            State::enqueued(DEFAULT_QUEUE),
            ContinuationOptions::default(),
        );
        assert!(!awaiting.is_final());
    }

    #[test]
    fn queue_is_only_exposed_for_enqueued() {
        assert_eq!(State::enqueued("hello").queue(), Some("hello"));
        assert_eq!(State::succeeded().queue(), None);
        assert_eq!(State::scheduled_in(Duration::seconds(1)).queue(), None);
    }

    #[test]
    fn continuation_options_against_parent_states() {
        let only = ContinuationOptions::OnlyOnSucceeded;
        let any = ContinuationOptions::OnAnyFinishedState;

        assert!(only.is_satisfied_by(&State::succeeded()));
        assert!(!only.is_satisfied_by(&State::failed("x")));
        assert!(!only.is_satisfied_by(&State::deleted()));

        assert!(any.is_satisfied_by(&State::succeeded()));
        assert!(any.is_satisfied_by(&State::failed("x")));
        assert!(any.is_satisfied_by(&State::deleted()));
        assert!(!any.is_satisfied_by(&State::processing("srv")));
    }

    #[test]
    fn queue_name_validation() {
        assert!(is_valid_queue_name("hello"));
        assert!(is_valid_queue_name("critical_1"));
        assert!(is_valid_queue_name("low-priority"));
        assert!(!is_valid_queue_name(""));
        assert!(!is_valid_queue_name("Hello"));
        assert!(!is_valid_queue_name("with space"));
    }

    #[test]
    fn state_display() {
        assert_eq!(State::enqueued("hello").to_string(), "ENQUEUED(hello)");
        assert_eq!(State::succeeded().to_string(), "SUCCEEDED");
        assert_eq!(StateName::Awaiting.to_string(), "AWAITING");
        assert_eq!(StateName::Processing.to_string(), "PROCESSING");
    }

    #[test]
    fn state_serializes_with_name_tag() {
        let json = serde_json::to_value(State::enqueued("hello")).unwrap();
        assert_eq!(json["name"], "Enqueued");
        assert_eq!(json["queue"], "hello");
        assert!(json.get("reason").is_none());
    }
}
