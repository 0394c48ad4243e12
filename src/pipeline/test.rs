use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{Pipeline, PipelineOptions, MIN_SLEEP_SECONDS};
use crate::error::{Error, ErrorKind, Result};
use crate::observer::Observer;
use crate::storage::MemoryStorage;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct StubState {
    calls: u64,
}

/// Scripted observer: succeeds unless told to fail on a given call, reports
/// `should_resume` from a plan (false once the plan runs dry) and journals
/// every invocation and restore into shared cells.
struct StubObserver {
    name: String,
    state: StubState,
    resume_plan: VecDeque<bool>,
    fail_on_call: Option<u64>,
    log: Arc<Mutex<Vec<String>>>,
    restored: Arc<Mutex<Option<StubState>>>,
}

impl StubObserver {
    fn new(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_owned(),
            state: StubState::default(),
            resume_plan: VecDeque::new(),
            fail_on_call: None,
            log: log.clone(),
            restored: Arc::new(Mutex::new(None)),
        }
    }

    fn with_resume_plan(mut self, plan: &[bool]) -> Self {
        self.resume_plan = plan.iter().copied().collect();
        self
    }

    fn failing_on_call(mut self, call: u64) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    fn restored_cell(&self) -> Arc<Mutex<Option<StubState>>> {
        self.restored.clone()
    }
}

#[async_trait]
impl Observer for StubObserver {
    async fn call(&mut self) -> Result<()> {
        self.state.calls += 1;
        self.log
            .lock()
            .unwrap()
            .push(format!("{}#{}", self.name, self.state.calls));
        if self.fail_on_call == Some(self.state.calls) {
            return Err(Error::fetch("boom"));
        }
        Ok(())
    }

    async fn should_resume(&mut self) -> Result<bool> {
        Ok(self.resume_plan.pop_front().unwrap_or(false))
    }

    fn unique_key(&self) -> String {
        format!("StubObserver/{}", self.name)
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.state)?)
    }

    fn restore(&mut self, snapshot: &[u8]) -> Result<()> {
        self.state = serde_json::from_slice(snapshot)?;
        *self.restored.lock().unwrap() = Some(self.state.clone());
        Ok(())
    }
}

fn calls_for(log: &Arc<Mutex<Vec<String>>>, name: &str) -> usize {
    let prefix = format!("{name}#");
    log.lock()
        .unwrap()
        .iter()
        .filter(|entry| entry.starts_with(&prefix))
        .count()
}

#[tokio::test]
async fn run_without_observers_fails() {
    let pipeline = Pipeline::new(PipelineOptions::default());
    let error = pipeline.run().await.unwrap_err();
    assert!(matches!(*error.kind, ErrorKind::InvalidArgument { .. }));
}

#[tokio::test]
async fn duplicate_registration_is_ignored() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut pipeline = Pipeline::new(PipelineOptions::default());
    pipeline.register(StubObserver::new("a", &log));
    pipeline.register(StubObserver::new("a", &log));
    assert_eq!(pipeline.observer_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn quiescent_observers_terminate_after_check_pass() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let storage = Arc::new(MemoryStorage::new());
    let mut pipeline =
        Pipeline::new(PipelineOptions::default()).with_storage(storage.clone());
    pipeline.register(StubObserver::new("a", &log));
    pipeline.register(StubObserver::new("b", &log));
    let pipeline_key = pipeline.unique_key();

    let start = Instant::now();
    pipeline.run().await.unwrap();

    // One normal iteration plus the verification pass.
    assert_eq!(calls_for(&log, "a"), 2);
    assert_eq!(calls_for(&log, "b"), 2);
    assert!(start.elapsed() >= Duration::from_secs(MIN_SLEEP_SECONDS));
    // Checkpoints are removed on clean shutdown.
    assert!(storage.entries(&pipeline_key).is_empty());
}

#[tokio::test(start_paused = true)]
async fn pipeline_without_storage_still_terminates() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut pipeline = Pipeline::new(PipelineOptions::default());
    pipeline.register(StubObserver::new("a", &log));
    pipeline.run().await.unwrap();
    assert_eq!(calls_for(&log, "a"), 2);
}

#[tokio::test(start_paused = true)]
async fn resuming_observer_defers_termination() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut pipeline = Pipeline::new(PipelineOptions::default());
    pipeline.register(StubObserver::new("a", &log).with_resume_plan(&[true]));

    let start = Instant::now();
    pipeline.run().await.unwrap();

    // Resumed once, quiesced, then verified: three invocations, two periods.
    assert_eq!(calls_for(&log, "a"), 3);
    assert!(start.elapsed() >= Duration::from_secs(120));
}

#[tokio::test(start_paused = true)]
async fn partial_failure_checkpoints_successes_and_aggregates() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let storage = Arc::new(MemoryStorage::new());
    let mut pipeline =
        Pipeline::new(PipelineOptions::default()).with_storage(storage.clone());
    pipeline.register(StubObserver::new("a", &log));
    pipeline.register(StubObserver::new("b", &log).failing_on_call(1));
    let pipeline_key = pipeline.unique_key();

    let error = pipeline.run().await.unwrap_err();
    let aggregated = error.aggregated().expect("aggregate error");
    assert_eq!(aggregated.len(), 1);
    assert!(matches!(*aggregated[0].kind, ErrorKind::Fetch { .. }));

    // The healthy worker was checkpointed, the failed one was not.
    let entries = storage.entries(&pipeline_key);
    assert!(entries.contains_key("StubObserver/a"));
    assert!(!entries.contains_key("StubObserver/b"));

    // A restart loads the checkpoint back into a fresh observer set.
    let fresh_a = StubObserver::new("a", &log);
    let fresh_b = StubObserver::new("b", &log);
    let (restored_a, restored_b) = (fresh_a.restored_cell(), fresh_b.restored_cell());
    let mut restarted =
        Pipeline::new(PipelineOptions::default()).with_storage(storage.clone());
    restarted.register(fresh_a);
    restarted.register(fresh_b);
    restarted.run().await.unwrap();

    assert_eq!(*restored_a.lock().unwrap(), Some(StubState { calls: 1 }));
    assert_eq!(*restored_b.lock().unwrap(), None);
}
