//! Periodic scheduler driving a registered set of observers.
//!
//! The pipeline runs its observers cooperatively on the caller's runtime,
//! checkpointing their state to optional [`Storage`] after every successful
//! step and terminating once the whole system reaches quiescence:
//!
//! ```rust,ignore
//! let mut observer = AssignmentsObserver::new(client.clone(), "123");
//! observer.on_submitted(handle_submitted);
//!
//! let mut pipeline = Pipeline::new(PipelineOptions::default())
//!     .with_storage(storage);
//! pipeline.register(observer);
//! pipeline.run().await?;
//! ```
//!
//! Quiescence is verified before shutdown: when no observer wants to resume,
//! every observer is run once more to completion (the check pass); only if
//! all of them still report no further work does the pipeline clean up its
//! checkpoints and return.

#[cfg(test)]
mod test;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_core::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use tokio::time::{self, Instant};
use tracing::{error, info, warn};
use typed_builder::TypedBuilder;

use crate::error::{Error, Result};
use crate::observer::Observer;
use crate::storage::{Storage, StorageLock};

/// Floor on the sleep between scheduler iterations, in seconds.
///
/// The floor exists so that concurrent pipeline instances sharing a storage
/// key get a fair chance to take the advisory lock.
pub const MIN_SLEEP_SECONDS: u64 = 10;

/// Configuration for a [`Pipeline`].
#[derive(Clone, Debug, TypedBuilder)]
#[non_exhaustive]
pub struct PipelineOptions {
    /// Base polling period between invocations of the same observer.
    #[builder(default = Duration::from_secs(60))]
    pub period: Duration,

    /// Disambiguates pipelines sharing an identical observer set.
    #[builder(default, setter(into, strip_option))]
    pub name: Option<String>,

    /// Floor on the inter-iteration sleep. Tunable, but must not be set so
    /// low that peer pipelines are starved of the storage lock.
    #[builder(default = Duration::from_secs(MIN_SLEEP_SECONDS))]
    pub min_sleep: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

struct Worker {
    name: String,
    slot: Option<Box<dyn Observer>>,
    should_resume: bool,
}

struct WorkerOutcome {
    index: usize,
    observer: Box<dyn Observer>,
    result: Result<()>,
    should_resume: bool,
    started_at: Instant,
}

async fn drive(index: usize, mut observer: Box<dyn Observer>, started_at: Instant) -> WorkerOutcome {
    let mut result = observer.call().await;
    let mut should_resume = false;
    if result.is_ok() {
        match observer.should_resume().await {
            Ok(resume) => should_resume = resume,
            Err(e) => result = Err(e),
        }
    }
    WorkerOutcome {
        index,
        observer,
        result,
        should_resume,
        started_at,
    }
}

/// The entry point for streaming pipelines.
///
/// Observers are registered up front and then driven periodically by
/// [`run`](Pipeline::run). Several observers may be in flight at once, but
/// they share the caller's task: scheduling is cooperative and observers
/// surrender control at their I/O points.
pub struct Pipeline {
    options: PipelineOptions,
    storage: Option<Arc<dyn Storage>>,
    observers: Vec<Box<dyn Observer>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("options", &self.options)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline with the given options and no storage.
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            options,
            storage: None,
            observers: Vec::new(),
        }
    }

    /// Attaches a checkpoint storage backend.
    ///
    /// State is saved after each iteration and reloaded on the first one, so
    /// a restarted pipeline resumes from where its predecessor left off.
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Registers an observer.
    ///
    /// Observers are identity-keyed by their unique key: registering a
    /// second observer with a key that is already present is a no-op.
    pub fn register(&mut self, observer: impl Observer + 'static) -> &mut Self {
        let key = observer.unique_key();
        if self.observers.iter().any(|existing| existing.unique_key() == key) {
            warn!(key = key.as_str(), "observer already registered; ignoring duplicate");
            return self;
        }
        self.observers.push(Box::new(observer));
        self
    }

    /// The number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn unique_key(&self) -> String {
        let mut keys: Vec<String> = self
            .observers
            .iter()
            .map(|observer| observer.unique_key())
            .collect();
        keys.sort();
        format!(
            "Pipeline/{}/[{}]",
            self.options.name.as_deref().unwrap_or(""),
            keys.join(",")
        )
    }

    /// Runs the pipeline until quiescence or the first failed iteration.
    ///
    /// Fails immediately with
    /// [`ErrorKind::InvalidArgument`](crate::error::ErrorKind::InvalidArgument)
    /// if no observers are registered. Any observer failure aborts the run
    /// with an [`ErrorKind::Aggregate`](crate::error::ErrorKind::Aggregate)
    /// carrying every error of the iteration; workers that succeeded in the
    /// same iteration are checkpointed before the abort.
    pub async fn run(mut self) -> Result<()> {
        if self.observers.is_empty() {
            return Err(Error::invalid_argument("no observers registered"));
        }
        let pipeline_key = self.unique_key();

        let mut workers: Vec<Worker> = self
            .observers
            .drain(..)
            .map(|observer| {
                let name = observer.unique_key();
                Worker {
                    name,
                    slot: Some(observer),
                    should_resume: false,
                }
            })
            .collect();

        let mut waiting: FuturesUnordered<BoxFuture<'static, WorkerOutcome>> =
            FuturesUnordered::new();
        let started = Instant::now();
        let mut pending: HashMap<usize, Instant> =
            (0..workers.len()).map(|index| (index, started)).collect();
        let mut check_mode = false;
        let mut iteration: u64 = 0;

        loop {
            iteration += 1;
            info!(iteration, "pipeline iteration");

            let lock = match &self.storage {
                Some(storage) => Some(storage.lock(&pipeline_key).await?),
                None => None,
            };

            if iteration == 1 {
                self.load_states(&pipeline_key, &mut workers).await?;
            }

            let iteration_start = Instant::now();
            let mut to_start = Vec::new();
            for index in 0..workers.len() {
                let Some(due) = pending.get(&index).copied() else {
                    continue;
                };
                if due <= iteration_start || check_mode {
                    pending.remove(&index);
                    to_start.push(index);
                }
            }
            info!(count = to_start.len(), "observers to run");
            for index in to_start {
                if let Some(observer) = workers[index].slot.take() {
                    waiting.push(Box::pin(drive(index, observer, iteration_start)));
                }
            }

            let mut done = Vec::new();
            if check_mode {
                info!("verifying quiescence: running all observers to completion");
                while let Some(outcome) = waiting.next().await {
                    done.push(outcome);
                }
            } else if let Some(outcome) = waiting.next().await {
                done.push(outcome);
                // Pick up everything else that is already finished.
                while let Some(Some(outcome)) = waiting.next().now_or_never() {
                    done.push(outcome);
                }
            }
            self.process_done(&pipeline_key, done, &mut workers, &mut pending)
                .await?;

            let next_wake;
            if workers.iter().all(|worker| !worker.should_resume) {
                if check_mode {
                    self.cleanup_storage(&pipeline_key, &workers, lock.as_deref())
                        .await;
                    info!("pipeline finished");
                    return Ok(());
                }
                info!("no observer wants to resume; waiting for in-flight tasks");
                let mut done = Vec::new();
                while let Some(outcome) = waiting.next().await {
                    done.push(outcome);
                }
                self.process_done(&pipeline_key, done, &mut workers, &mut pending)
                    .await?;
                if workers.iter().all(|worker| !worker.should_resume) {
                    check_mode = true;
                }
                next_wake = pending.values().max().copied();
            } else {
                check_mode = false;
                next_wake = pending.values().min().copied();
            }

            drop(lock);

            let until_due = next_wake
                .map_or(Duration::ZERO, |at| at.saturating_duration_since(Instant::now()));
            let sleep_for = until_due.max(self.options.min_sleep);
            info!(seconds = sleep_for.as_secs_f64(), "sleeping");
            time::sleep(sleep_for).await;
        }
    }

    async fn process_done(
        &self,
        pipeline_key: &str,
        done: Vec<WorkerOutcome>,
        workers: &mut [Worker],
        pending: &mut HashMap<usize, Instant>,
    ) -> Result<()> {
        if done.is_empty() {
            return Ok(());
        }
        info!(count = done.len(), "observer tasks completed");
        let mut to_save = Vec::new();
        let mut errors = Vec::new();
        for outcome in done {
            let worker = &mut workers[outcome.index];
            worker.should_resume = outcome.should_resume;
            worker.slot = Some(outcome.observer);
            match outcome.result {
                Ok(()) => {
                    pending.insert(outcome.index, outcome.started_at + self.options.period);
                    to_save.push(outcome.index);
                }
                Err(e) => {
                    error!(worker = worker.name.as_str(), error = %e, "observer task failed");
                    errors.push(e);
                }
            }
        }
        self.save_states(pipeline_key, &to_save, workers).await?;
        if !errors.is_empty() {
            return Err(Error::aggregate(errors));
        }
        Ok(())
    }

    async fn load_states(&self, pipeline_key: &str, workers: &mut [Worker]) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        info!("loading persisted observer states");
        let names: Vec<String> = workers.iter().map(|worker| worker.name.clone()).collect();
        let saved = storage.load(pipeline_key, &names).await?;
        if saved.is_empty() {
            info!("no saved states found");
            return Ok(());
        }
        info!(found = saved.len(), total = workers.len(), "found saved states");
        for worker in workers.iter_mut() {
            if let Some(snapshot) = saved.get(&worker.name) {
                if let Some(observer) = worker.slot.as_mut() {
                    observer.restore(snapshot)?;
                }
            }
        }
        Ok(())
    }

    async fn save_states(
        &self,
        pipeline_key: &str,
        indices: &[usize],
        workers: &[Worker],
    ) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        if indices.is_empty() {
            return Ok(());
        }
        let mut states = HashMap::new();
        for &index in indices {
            let worker = &workers[index];
            if let Some(observer) = &worker.slot {
                states.insert(worker.name.clone(), observer.snapshot()?);
            }
        }
        info!(count = states.len(), "saving observer states");
        storage.save(pipeline_key, &states).await
    }

    async fn cleanup_storage(
        &self,
        pipeline_key: &str,
        workers: &[Worker],
        lock: Option<&dyn StorageLock>,
    ) {
        let (Some(storage), Some(lock)) = (&self.storage, lock) else {
            return;
        };
        let names: Vec<String> = workers.iter().map(|worker| worker.name.clone()).collect();
        info!(count = names.len(), "cleaning up persisted states");
        if let Err(e) = storage.cleanup(pipeline_key, &names, lock).await {
            warn!(error = %e, "storage cleanup failed");
        }
    }
}
