//! Observers bind cursors to handler callbacks and declare whether further
//! polling is warranted.
//!
//! An observer performs one unit of work per [`call`](Observer::call),
//! typically driving its cursors through one transactional pass and fanning
//! the collected events out to registered handlers, and is idempotent with
//! respect to restart from its persisted snapshot. The
//! [`Pipeline`](crate::pipeline::Pipeline) invokes observers periodically and
//! checkpoints their snapshots after every successful step.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use derive_where::derive_where;
use futures_core::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::client::RemoteClient;
use crate::cursor::{AssignmentCursor, CursorState};
use crate::error::Result;
use crate::event::{AssignmentEvent, AssignmentEventType};
use crate::model::{Assignment, Pool, PoolStatus};
use crate::request::SearchRequest;

type BoxHandler<T> = Box<dyn FnMut(T) -> BoxFuture<'static, Result<()>> + Send>;

/// A unit of user logic driven periodically by the pipeline.
///
/// Implementations must not swallow errors: anything that fails in `call` or
/// `should_resume` propagates to the pipeline, which checkpoints the workers
/// that succeeded and aborts with an aggregate.
#[async_trait]
pub trait Observer: Send {
    /// Performs one unit of work.
    async fn call(&mut self) -> Result<()>;

    /// Whether another invocation could yield more work.
    async fn should_resume(&mut self) -> Result<bool>;

    /// Deterministic identity, used as the persistence key.
    fn unique_key(&self) -> String;

    /// Serializes the observer's resumable state.
    fn snapshot(&self) -> Result<Vec<u8>>;

    /// Overwrites the observer's resumable state from a snapshot.
    fn restore(&mut self, snapshot: &[u8]) -> Result<()>;

    /// Copies another observer's persisted state into this one.
    fn inject(&mut self, other: &dyn Observer) -> Result<()> {
        self.restore(&other.snapshot()?)
    }
}

#[derive_where(Debug)]
struct AssignmentTarget {
    cursor: AssignmentCursor,
    #[derive_where(skip)]
    handlers: Vec<BoxHandler<Vec<AssignmentEvent>>>,
}

/// Watches one pool's assignments and feeds new events to handlers.
///
/// A cursor is kept per registered event type; each `call` drives every
/// cursor through one transactional pass, so a failing handler leaves the
/// cursor where it was and the events are redelivered on the next call.
/// Polling is worthwhile while the pool is open.
#[derive_where(Debug)]
pub struct AssignmentsObserver {
    #[derive_where(skip)]
    client: Arc<dyn RemoteClient>,
    pool_id: String,
    targets: BTreeMap<AssignmentEventType, AssignmentTarget>,
}

impl AssignmentsObserver {
    /// Creates an observer over the given pool's assignments.
    pub fn new(client: Arc<dyn RemoteClient>, pool_id: impl Into<String>) -> Self {
        Self {
            client,
            pool_id: pool_id.into(),
            targets: BTreeMap::new(),
        }
    }

    /// Registers a handler for the given event type, creating the backing
    /// cursor on first registration. Several handlers may share one type;
    /// each receives every event of that type.
    pub fn register<F, Fut>(&mut self, event_type: AssignmentEventType, handler: F)
    where
        F: FnMut(Vec<AssignmentEvent>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        let pool_id = self.pool_id.clone();
        let target = self.targets.entry(event_type).or_insert_with(|| AssignmentTarget {
            cursor: AssignmentCursor::new(client, SearchRequest::for_pool(pool_id), event_type),
            handlers: Vec::new(),
        });
        let mut handler = handler;
        target.handlers.push(Box::new(move |events| handler(events).boxed()));
    }

    /// Registers a handler for newly created assignments.
    pub fn on_created<F, Fut>(&mut self, handler: F)
    where
        F: FnMut(Vec<AssignmentEvent>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(AssignmentEventType::Created, handler);
    }

    /// Registers a handler for submitted assignments.
    pub fn on_submitted<F, Fut>(&mut self, handler: F)
    where
        F: FnMut(Vec<AssignmentEvent>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(AssignmentEventType::Submitted, handler);
    }

    /// Registers a handler for accepted assignments.
    pub fn on_accepted<F, Fut>(&mut self, handler: F)
    where
        F: FnMut(Vec<AssignmentEvent>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(AssignmentEventType::Accepted, handler);
    }

    /// Registers a handler for rejected assignments.
    pub fn on_rejected<F, Fut>(&mut self, handler: F)
    where
        F: FnMut(Vec<AssignmentEvent>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(AssignmentEventType::Rejected, handler);
    }

    /// Registers a handler for skipped assignments.
    pub fn on_skipped<F, Fut>(&mut self, handler: F)
    where
        F: FnMut(Vec<AssignmentEvent>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(AssignmentEventType::Skipped, handler);
    }

    /// Registers a handler for expired assignments.
    pub fn on_expired<F, Fut>(&mut self, handler: F)
    where
        F: FnMut(Vec<AssignmentEvent>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(AssignmentEventType::Expired, handler);
    }
}

#[async_trait]
impl Observer for AssignmentsObserver {
    async fn call(&mut self) -> Result<()> {
        for (event_type, target) in self.targets.iter_mut() {
            let AssignmentTarget { cursor, handlers } = target;
            let batch = cursor.try_fetch_all().await?;
            let events = batch.events().to_vec();
            if events.is_empty() {
                batch.commit();
                continue;
            }
            debug!(
                pool_id = self.pool_id.as_str(),
                event_type = %event_type,
                count = events.len(),
                "dispatching assignment events"
            );
            for handler in handlers.iter_mut() {
                (handler)(events.clone()).await?;
            }
            batch.commit();
        }
        Ok(())
    }

    async fn should_resume(&mut self) -> Result<bool> {
        let pool = self.client.get_pool(&self.pool_id).await?;
        Ok(pool.status.is_open())
    }

    fn unique_key(&self) -> String {
        format!("AssignmentsObserver/{}", self.pool_id)
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        let states: BTreeMap<&AssignmentEventType, &CursorState<Assignment>> = self
            .targets
            .iter()
            .map(|(event_type, target)| (event_type, target.cursor.state()))
            .collect();
        Ok(serde_json::to_vec(&states)?)
    }

    fn restore(&mut self, snapshot: &[u8]) -> Result<()> {
        let states: BTreeMap<AssignmentEventType, CursorState<Assignment>> =
            deserialize_snapshot(snapshot)?;
        for (event_type, state) in states {
            match self.targets.get_mut(&event_type) {
                Some(target) => target.cursor.restore_state(state),
                None => debug!(
                    event_type = %event_type,
                    "ignoring saved state for unregistered event type"
                ),
            }
        }
        Ok(())
    }
}

/// Watches one pool's lifecycle state and fires handlers on transitions.
///
/// The first `call` only records a baseline; handlers run when a later call
/// observes a different status.
#[derive_where(Debug)]
pub struct PoolStatusObserver {
    #[derive_where(skip)]
    client: Arc<dyn RemoteClient>,
    pool_id: String,
    last_status: Option<PoolStatus>,
    #[derive_where(skip)]
    handlers: BTreeMap<PoolStatus, Vec<BoxHandler<Pool>>>,
}

impl PoolStatusObserver {
    /// Creates an observer over the given pool's status.
    pub fn new(client: Arc<dyn RemoteClient>, pool_id: impl Into<String>) -> Self {
        Self {
            client,
            pool_id: pool_id.into(),
            last_status: None,
            handlers: BTreeMap::new(),
        }
    }

    /// Registers a handler fired when the pool transitions into `status`.
    pub fn register<F, Fut>(&mut self, status: PoolStatus, handler: F)
    where
        F: FnMut(Pool) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut handler = handler;
        self.handlers
            .entry(status)
            .or_default()
            .push(Box::new(move |pool| handler(pool).boxed()));
    }

    /// Registers a handler fired when the pool opens.
    pub fn on_open<F, Fut>(&mut self, handler: F)
    where
        F: FnMut(Pool) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(PoolStatus::Open, handler);
    }

    /// Registers a handler fired when the pool closes.
    pub fn on_closed<F, Fut>(&mut self, handler: F)
    where
        F: FnMut(Pool) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(PoolStatus::Closed, handler);
    }
}

#[async_trait]
impl Observer for PoolStatusObserver {
    async fn call(&mut self) -> Result<()> {
        let pool = self.client.get_pool(&self.pool_id).await?;
        if let Some(previous) = self.last_status {
            if previous != pool.status {
                info!(
                    pool_id = self.pool_id.as_str(),
                    from = ?previous,
                    to = ?pool.status,
                    "pool status changed"
                );
                if let Some(handlers) = self.handlers.get_mut(&pool.status) {
                    for handler in handlers.iter_mut() {
                        (handler)(pool.clone()).await?;
                    }
                }
            }
        }
        self.last_status = Some(pool.status);
        Ok(())
    }

    async fn should_resume(&mut self) -> Result<bool> {
        // `call` ran just before; the recorded status is current enough.
        Ok(self.last_status.map_or(true, PoolStatus::is_open))
    }

    fn unique_key(&self) -> String {
        format!("PoolStatusObserver/{}", self.pool_id)
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.last_status)?)
    }

    fn restore(&mut self, snapshot: &[u8]) -> Result<()> {
        self.last_status = deserialize_snapshot(snapshot)?;
        Ok(())
    }
}

fn deserialize_snapshot<T: DeserializeOwned>(snapshot: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(snapshot)?)
}
