//! Contracts for the remote platform client and the sync-to-async bridge.
//!
//! The wire client itself lives outside this crate; cursors and observers
//! only depend on the [`RemoteClient`] trait. Blocking client
//! implementations are adapted with [`AsyncBridge`], which dispatches each
//! call to a worker thread so that callers see a normal suspending call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{self, Instant};

use crate::error::{Error, Result};
use crate::model::{
    AnalyticsRequest, Assignment, MessageThread, Operation, Pool, Task, UserBonus,
    UserRestriction, UserSkill,
};
use crate::request::{SearchPage, SearchRequest, SortKey};
use crate::runtime;

/// Asynchronous platform client surface used by cursors and observers.
///
/// Every `find_*` operation returns one page of records matching all of the
/// request's predicates simultaneously, sorted ascending by `sort`. Transient
/// transport failures are the implementation's concern; errors surfaced here
/// propagate unchanged through cursors up to the pipeline.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Searches assignments.
    async fn find_assignments(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<Assignment>>;

    /// Searches tasks.
    async fn find_tasks(&self, request: &SearchRequest, sort: SortKey)
        -> Result<SearchPage<Task>>;

    /// Searches user bonuses.
    async fn find_user_bonuses(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserBonus>>;

    /// Searches user skills.
    async fn find_user_skills(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserSkill>>;

    /// Searches user restrictions.
    async fn find_user_restrictions(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserRestriction>>;

    /// Searches message threads.
    async fn find_message_threads(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<MessageThread>>;

    /// Reads a pool by id.
    async fn get_pool(&self, pool_id: &str) -> Result<Pool>;

    /// Requests an analytics item; returns the operation computing it.
    async fn get_analytics(&self, request: &AnalyticsRequest) -> Result<Operation>;

    /// Reads a long-running operation by id.
    async fn get_operation(&self, operation_id: &str) -> Result<Operation>;
}

/// Blocking variant of [`RemoteClient`].
///
/// Implementations must be safe for concurrent invocation from multiple
/// threads; [`AsyncBridge`] calls them from the runtime's blocking pool.
pub trait SyncClient: Send + Sync {
    /// Searches assignments.
    fn find_assignments(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<Assignment>>;

    /// Searches tasks.
    fn find_tasks(&self, request: &SearchRequest, sort: SortKey) -> Result<SearchPage<Task>>;

    /// Searches user bonuses.
    fn find_user_bonuses(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserBonus>>;

    /// Searches user skills.
    fn find_user_skills(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserSkill>>;

    /// Searches user restrictions.
    fn find_user_restrictions(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserRestriction>>;

    /// Searches message threads.
    fn find_message_threads(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<MessageThread>>;

    /// Reads a pool by id.
    fn get_pool(&self, pool_id: &str) -> Result<Pool>;

    /// Requests an analytics item; returns the operation computing it.
    fn get_analytics(&self, request: &AnalyticsRequest) -> Result<Operation>;

    /// Reads a long-running operation by id.
    fn get_operation(&self, operation_id: &str) -> Result<Operation>;
}

/// Adapts a [`SyncClient`] into a [`RemoteClient`].
///
/// Each call clones the shared inner client, dispatches the blocking call to
/// a worker thread and awaits its completion, surfacing the result unchanged.
/// Cursors query the bridge exactly like a native asynchronous client.
pub struct AsyncBridge<C> {
    inner: Arc<C>,
}

impl<C> AsyncBridge<C> {
    /// Wraps a blocking client.
    pub fn new(client: C) -> Self {
        Self {
            inner: Arc::new(client),
        }
    }

    /// Wraps an already shared blocking client.
    pub fn from_arc(client: Arc<C>) -> Self {
        Self { inner: client }
    }
}

impl<C> Clone for AsyncBridge<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for AsyncBridge<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncBridge").finish_non_exhaustive()
    }
}

#[async_trait]
impl<C: SyncClient + 'static> RemoteClient for AsyncBridge<C> {
    async fn find_assignments(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<Assignment>> {
        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        runtime::spawn_blocking(move || inner.find_assignments(&request, sort)).await?
    }

    async fn find_tasks(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<Task>> {
        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        runtime::spawn_blocking(move || inner.find_tasks(&request, sort)).await?
    }

    async fn find_user_bonuses(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserBonus>> {
        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        runtime::spawn_blocking(move || inner.find_user_bonuses(&request, sort)).await?
    }

    async fn find_user_skills(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserSkill>> {
        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        runtime::spawn_blocking(move || inner.find_user_skills(&request, sort)).await?
    }

    async fn find_user_restrictions(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserRestriction>> {
        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        runtime::spawn_blocking(move || inner.find_user_restrictions(&request, sort)).await?
    }

    async fn find_message_threads(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<MessageThread>> {
        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        runtime::spawn_blocking(move || inner.find_message_threads(&request, sort)).await?
    }

    async fn get_pool(&self, pool_id: &str) -> Result<Pool> {
        let inner = Arc::clone(&self.inner);
        let pool_id = pool_id.to_owned();
        runtime::spawn_blocking(move || inner.get_pool(&pool_id)).await?
    }

    async fn get_analytics(&self, request: &AnalyticsRequest) -> Result<Operation> {
        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        runtime::spawn_blocking(move || inner.get_analytics(&request)).await?
    }

    async fn get_operation(&self, operation_id: &str) -> Result<Operation> {
        let inner = Arc::clone(&self.inner);
        let operation_id = operation_id.to_owned();
        runtime::spawn_blocking(move || inner.get_operation(&operation_id)).await?
    }
}

const WAIT_INITIAL_DELAY: Duration = Duration::from_millis(500);
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polls a long-running operation until it reaches a terminal state.
///
/// A short initial delay is observed before the first poll unless the
/// operation has already been running at least that long. Returns the
/// terminal operation, or
/// [`ErrorKind::Timeout`](crate::error::ErrorKind::Timeout) once `timeout`
/// has passed without the operation completing.
pub async fn wait_operation(
    client: &dyn RemoteClient,
    operation: Operation,
    timeout: Duration,
) -> Result<Operation> {
    if operation.status.is_terminal() {
        return Ok(operation);
    }
    let deadline = Instant::now() + timeout;
    let recently_started = operation.started.map_or(true, |started| {
        Utc::now()
            .signed_duration_since(started)
            .to_std()
            .map_or(true, |elapsed| elapsed < WAIT_INITIAL_DELAY)
    });
    if recently_started {
        time::sleep(WAIT_INITIAL_DELAY).await;
    }
    loop {
        let operation = client.get_operation(&operation.id).await?;
        if operation.status.is_terminal() {
            return Ok(operation);
        }
        if Instant::now() >= deadline {
            return Err(Error::timeout(format!(
                "operation {} did not complete",
                operation.id
            )));
        }
        time::sleep(WAIT_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    use super::{wait_operation, AsyncBridge, RemoteClient};
    use crate::error::ErrorKind;
    use crate::model::{Assignment, Operation, OperationStatus};
    use crate::request::{SearchRequest, SortKey, TimeField};
    use crate::test_util::{ts, InMemoryPlatform};

    fn assignment(id: &str, submitted: i64) -> Assignment {
        Assignment {
            id: id.into(),
            pool_id: "p1".into(),
            submitted: Some(ts(submitted)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn bridge_preserves_results() {
        let platform = Arc::new(InMemoryPlatform::new(10));
        platform.add_assignment(assignment("a1", 1));
        platform.add_assignment(assignment("a2", 2));
        let bridge = AsyncBridge::from_arc(platform);

        let page = bridge
            .find_assignments(
                &SearchRequest::for_pool("p1"),
                SortKey::Time(TimeField::Submitted),
            )
            .await
            .unwrap();
        let ids: Vec<_> = page.items.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2"]);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn bridge_surfaces_errors_unchanged() {
        let platform = Arc::new(InMemoryPlatform::new(10));
        platform.fail_next_find();
        let bridge = AsyncBridge::from_arc(platform);

        let error = bridge
            .find_assignments(
                &SearchRequest::for_pool("p1"),
                SortKey::Time(TimeField::Submitted),
            )
            .await
            .unwrap_err();
        assert!(matches!(*error.kind, ErrorKind::Fetch { .. }));
    }

    #[tokio::test]
    async fn wait_operation_returns_terminal_operation_immediately() {
        let platform = Arc::new(InMemoryPlatform::new(10));
        let operation = Operation {
            id: "op1".into(),
            status: OperationStatus::Success,
            started: None,
            details: None,
        };

        let done = wait_operation(platform.as_ref(), operation.clone(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(done, operation);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_operation_polls_until_completion() {
        let platform = Arc::new(InMemoryPlatform::new(10));
        platform.set_operation(Operation {
            id: "op1".into(),
            status: OperationStatus::Running,
            started: None,
            details: None,
        });

        let background = Arc::clone(&platform);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            background.set_operation(Operation {
                id: "op1".into(),
                status: OperationStatus::Success,
                started: None,
                details: None,
            });
        });

        let pending = Operation {
            id: "op1".into(),
            status: OperationStatus::Running,
            started: None,
            details: None,
        };
        let done = wait_operation(platform.as_ref(), pending, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(done.status, OperationStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_operation_skips_initial_delay_when_already_running() {
        let platform = Arc::new(InMemoryPlatform::new(10));
        let started = Some(Utc::now() - chrono::Duration::seconds(10));
        platform.set_operation(Operation {
            id: "op1".into(),
            status: OperationStatus::Success,
            started,
            details: None,
        });

        let pending = Operation {
            id: "op1".into(),
            status: OperationStatus::Running,
            started,
            details: None,
        };
        let begin = Instant::now();
        let done = wait_operation(platform.as_ref(), pending, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(done.status, OperationStatus::Success);
        // The operation started long ago, so the first poll happens at once.
        assert!(begin.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_operation_times_out() {
        let platform = Arc::new(InMemoryPlatform::new(10));
        platform.set_operation(Operation {
            id: "op1".into(),
            status: OperationStatus::Running,
            started: None,
            details: None,
        });

        let pending = Operation {
            id: "op1".into(),
            status: OperationStatus::Running,
            started: None,
            details: None,
        };
        let error = wait_operation(platform.as_ref(), pending, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(*error.kind, ErrorKind::Timeout { .. }));
    }
}
