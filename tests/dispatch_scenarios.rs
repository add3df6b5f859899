//! Black-box scenarios against the public client API.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use chrono::{DateTime, Duration, Utc};
use qroute::state_machine::HistoryEntry;
use qroute::storage::{JobData, NewJob, StateCommit};
use qroute::{
    BackgroundJobClient, ContinuationOptions, ContinuationResolver, DelayedJobScheduler,
    FilterPipeline, InMemoryStorage, Invocation, JobId, JobStorage, ParameterBag, QrouteConfig,
    RetryConfig, State, StateName, StorageConnection, StorageError,
};

fn client() -> BackgroundJobClient<InMemoryStorage> {
    BackgroundJobClient::from_config(Arc::new(InMemoryStorage::new()), &QrouteConfig::default())
}

fn hello_jack() -> Invocation {
    Invocation::new("HelloService", "hello").arg("jack")
}

#[test]
fn enqueue_in_named_queue() {
    let client = client();
    let id = client
        .create_in_queue("hello", hello_jack(), State::enqueued("default"))
        .unwrap()
        .unwrap();

    assert_eq!(client.get_state(&id).unwrap(), Some(State::enqueued("hello")));
}

#[test]
fn scheduled_job_is_enqueued_in_named_queue_after_sweep() {
    let client = client();
    let t0 = Utc::now();
    let id = client
        .create_in_queue("hello", hello_jack(), State::scheduled_at(t0 + Duration::seconds(5)))
        .unwrap()
        .unwrap();
    assert_eq!(
        client.get_state(&id).unwrap().map(|s| s.name()),
        Some(StateName::Scheduled)
    );

    let scheduler = DelayedJobScheduler::new(std::time::Duration::from_secs(15));
    scheduler.sweep(&client, t0 + Duration::seconds(5)).unwrap();

    let state = client.get_state(&id).unwrap().unwrap();
    assert_eq!(state.queue(), Some("hello"));
    let history = client.storage().record(&id).unwrap().history;
    assert_eq!(
        history.iter().map(|e| e.state.name()).collect::<Vec<_>>(),
        vec![StateName::Scheduled, StateName::Enqueued]
    );
}

#[test]
fn continuation_waits_for_parent_then_enqueues_in_named_queue() {
    let client = client();
    let j1 = client.enqueue("", hello_jack()).unwrap().unwrap();
    assert!(client
        .change_state(&j1, State::processing("srv-1"), Some(StateName::Enqueued))
        .unwrap());

    let child = client
        .continue_job_with(
            &j1,
            "hello",
            hello_jack(),
            Some(State::enqueued("default")),
            ContinuationOptions::OnlyOnSucceeded,
        )
        .unwrap()
        .unwrap();
    match client.get_state(&child).unwrap().unwrap() {
        State::Awaiting { parent_id, .. } => assert_eq!(parent_id, j1),
        other => panic!("expected awaiting continuation, got {other:?}"),
    }

    assert!(client
        .change_state(&j1, State::succeeded(), Some(StateName::Processing))
        .unwrap());
    ContinuationResolver::new().trigger(&client, &j1).unwrap();

    assert_eq!(client.get_state(&child).unwrap(), Some(State::enqueued("hello")));
}

#[test]
fn racing_completions_commit_exactly_once() {
    let client = Arc::new(BackgroundJobClient::new(
        Arc::new(InMemoryStorage::new()),
        Arc::new(FilterPipeline::standard(RetryConfig::default())),
    ));
    let id = client.enqueue("hello", hello_jack()).unwrap().unwrap();
    client
        .change_state(&id, State::processing("srv-1"), Some(StateName::Enqueued))
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let client = client.clone();
            let id = id.clone();
            thread::spawn(move || {
                let state = if i % 2 == 0 {
                    State::succeeded()
                } else {
                    State::deleted()
                };
                client
                    .change_state_guarded(&id, state, &[StateName::Processing])
                    .unwrap()
                    .is_some()
            })
        })
        .collect();
    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();

    assert_eq!(winners, 1);
    let record = client.storage().record(&id).unwrap();
    assert_eq!(record.history.len(), 3);
    assert!(record.current.is_final());
}

/// Storage whose first continuation insert is preceded by a worker finishing
/// the parent and running the continuation trigger.
struct ParentFinishesMidCreate {
    inner: Arc<InMemoryStorage>,
    worker: BackgroundJobClient<InMemoryStorage>,
    parent: JobId,
    fired: AtomicBool,
}

impl JobStorage for ParentFinishesMidCreate {
    fn connection(&self) -> Result<Box<dyn StorageConnection + '_>, StorageError> {
        Ok(Box::new(MidCreateConnection {
            outer: self,
            inner: self.inner.connection()?,
        }))
    }
}

struct MidCreateConnection<'a> {
    outer: &'a ParentFinishesMidCreate,
    inner: Box<dyn StorageConnection + 'a>,
}

impl StorageConnection for MidCreateConnection<'_> {
    fn create_job(&self, new_job: NewJob) -> Result<JobId, StorageError> {
        self.inner.create_job(new_job)
    }

    fn create_continuation(&self, new_job: NewJob) -> Result<Option<JobId>, StorageError> {
        if !self.outer.fired.swap(true, Ordering::SeqCst) {
            let worker = &self.outer.worker;
            let parent = &self.outer.parent;
            let finished = worker
                .change_state(parent, State::succeeded(), Some(StateName::Processing))
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            assert!(finished);
            let resolved = ContinuationResolver::new()
                .trigger(worker, parent)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            assert!(resolved.is_empty());
        }
        self.inner.create_continuation(new_job)
    }

    fn get_job_data(&self, job_id: &JobId) -> Result<Option<JobData>, StorageError> {
        self.inner.get_job_data(job_id)
    }

    fn get_job_state(&self, job_id: &JobId) -> Result<Option<State>, StorageError> {
        self.inner.get_job_state(job_id)
    }

    fn get_job_parameters(&self, job_id: &JobId) -> Result<Option<ParameterBag>, StorageError> {
        self.inner.get_job_parameters(job_id)
    }

    fn set_job_parameter(&self, job_id: &JobId, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.set_job_parameter(job_id, key, value)
    }

    fn commit_state(&self, commit: StateCommit<'_>) -> Result<bool, StorageError> {
        self.inner.commit_state(commit)
    }

    fn get_history(&self, job_id: &JobId) -> Result<Option<Vec<HistoryEntry>>, StorageError> {
        self.inner.get_history(job_id)
    }

    fn scheduled_due(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, StorageError> {
        self.inner.scheduled_due(now)
    }

    fn awaiting_continuations(&self, parent_id: &JobId) -> Result<Vec<JobId>, StorageError> {
        self.inner.awaiting_continuations(parent_id)
    }
}

#[test]
fn continuation_created_while_parent_finishes_is_not_stranded() {
    let config = QrouteConfig::default();
    let inner = Arc::new(InMemoryStorage::new());
    let worker = BackgroundJobClient::from_config(inner.clone(), &config);
    let parent = worker.enqueue("", hello_jack()).unwrap().unwrap();
    assert!(worker
        .change_state(&parent, State::processing("srv-1"), Some(StateName::Enqueued))
        .unwrap());

    let storage = Arc::new(ParentFinishesMidCreate {
        inner: inner.clone(),
        worker,
        parent: parent.clone(),
        fired: AtomicBool::new(false),
    });
    let client = BackgroundJobClient::from_config(storage.clone(), &config);

    let child = client
        .continue_job_with(
            &parent,
            "hello",
            hello_jack(),
            Some(State::enqueued("default")),
            ContinuationOptions::OnlyOnSucceeded,
        )
        .unwrap()
        .unwrap();

    assert!(storage.fired.load(Ordering::SeqCst));
    assert_eq!(
        client.get_state(&parent).unwrap().map(|s| s.name()),
        Some(StateName::Succeeded)
    );
    assert_eq!(client.get_state(&child).unwrap(), Some(State::enqueued("hello")));
    assert_eq!(inner.record(&child).unwrap().history.len(), 1);
}
