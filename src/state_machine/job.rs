use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::state::{State, StateName};

/// Parameter key holding the caller-requested queue.
pub const QUEUE_PARAM: &str = "QueueName";

/// Parameter key holding the number of automatic retries already made.
pub const RETRY_COUNT_PARAM: &str = "RetryCount";

/// Opaque identifier assigned by storage when a job record is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What to run: a target type, a method on it, and its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub target: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Invocation {
    pub fn new(target: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Target and method must both be named.
    pub fn is_complete(&self) -> bool {
        !self.target.trim().is_empty() && !self.method.trim().is_empty()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(Value::to_string).collect();
        write!(f, "{}.{}({})", self.target, self.method, args.join(", "))
    }
}

/// An immutable unit of deferred work, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub invocation: Invocation,
    pub created_at: DateTime<Utc>,
}

/// Job-scoped string parameters. Keys are unique; the last write wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterBag(BTreeMap<String, String>);

impl ParameterBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Merges `other` into this bag, overwriting existing keys.
    pub fn extend(&mut self, other: ParameterBag) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// One committed transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub state: State,
    pub created_at: DateTime<Utc>,
}

/// The durable owner of a job's state and parameters.
///
/// `history` is append-only; its last entry always equals `current`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: Job,
    pub current: State,
    pub history: Vec<HistoryEntry>,
    pub parameters: ParameterBag,
}

impl JobRecord {
    pub fn new(job: Job, state: State, parameters: ParameterBag, at: DateTime<Utc>) -> Self {
        Self {
            job,
            current: state.clone(),
            history: vec![HistoryEntry {
                state,
                created_at: at,
            }],
            parameters,
        }
    }

    pub fn apply(&mut self, state: State, at: DateTime<Utc>) {
        self.history.push(HistoryEntry {
            state: state.clone(),
            created_at: at,
        });
        self.current = state;
    }
}

/// Configuration for automatic retries of failed jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries before a failure sticks.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    /// Calculate the delay for a given retry attempt using exponential backoff.
    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Flat summary of a job record for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub job_id: JobId,
    pub invocation: String,
    pub current: State,
    pub state_transitions: Vec<StateName>,
    pub parameters: ParameterBag,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn from_record(record: &JobRecord) -> Self {
        let updated_at = record
            .history
            .last()
            .map(|entry| entry.created_at)
            .unwrap_or(record.job.created_at);

        Self {
            job_id: record.job.id.clone(),
            invocation: record.job.invocation.to_string(),
            current: record.current.clone(),
            state_transitions: record.history.iter().map(|e| e.state.name()).collect(),
            parameters: record.parameters.clone(),
            created_at: record.job.created_at,
            updated_at,
        }
    }
}
