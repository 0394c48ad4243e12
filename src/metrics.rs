//! Metric helpers gathering named time series from the platform.
//!
//! Metrics return their lines as `(timestamp, value)` pairs keyed by line
//! name. A line absent from one sweep means nothing was gathered on that
//! step, not a zero value. Remote sweeps are throttled through a
//! [`Cooldown`] so a tight collection loop cannot hammer the platform.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_where::derive_where;
use lru::LruCache;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::client::{wait_operation, RemoteClient};
use crate::cursor::AssignmentCursor;
use crate::error::{Error, Result};
use crate::event::AssignmentEventType;
use crate::model::{AnalyticsRequest, OperationStatus, Pool};
use crate::request::SearchRequest;

/// Named time series produced by metrics.
pub type MetricLines = HashMap<String, Vec<(DateTime<Utc>, f64)>>;

const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// A source of metric lines gathered from the platform.
#[async_trait]
pub trait Metric: Send {
    /// The names of every line this metric can produce.
    fn line_names(&self) -> Vec<String>;

    /// Gathers fresh points for this metric's lines.
    async fn get_lines(&mut self) -> Result<MetricLines>;
}

/// Enforces a minimum interval between successive acquisitions.
#[derive(Debug)]
pub struct Cooldown {
    min_interval: Duration,
    last_touch: Option<Instant>,
}

impl Cooldown {
    /// Creates a cooldown with the given minimum interval.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_touch: None,
        }
    }

    /// Waits until the interval has passed since the previous call, then
    /// stamps the current time.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last_touch {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                time::sleep(self.min_interval - elapsed).await;
            }
        }
        self.last_touch = Some(Instant::now());
    }
}

/// Gathers several metrics as one unit.
pub struct MetricCollector {
    metrics: Vec<Box<dyn Metric>>,
}

impl fmt::Debug for MetricCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricCollector")
            .field("metrics", &self.metrics.len())
            .finish()
    }
}

impl MetricCollector {
    /// Creates a collector, rejecting duplicate line names across metrics.
    pub fn new(metrics: Vec<Box<dyn Metric>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for metric in &metrics {
            for name in metric.line_names() {
                if !seen.insert(name.clone()) {
                    return Err(Error::invalid_argument(format!(
                        "duplicate metric line name: {name}"
                    )));
                }
            }
        }
        Ok(Self { metrics })
    }

    /// The names of every line the collector can produce.
    pub fn line_names(&self) -> Vec<String> {
        self.metrics
            .iter()
            .flat_map(|metric| metric.line_names())
            .collect()
    }

    /// Runs every metric once and merges the results.
    pub async fn gather(&mut self) -> Result<MetricLines> {
        let mut lines = MetricLines::new();
        for metric in self.metrics.iter_mut() {
            for (name, points) in metric.get_lines().await? {
                lines.entry(name).or_default().extend(points);
            }
        }
        Ok(lines)
    }
}

fn event_line_name(pool_id: &str, event_type: AssignmentEventType) -> String {
    format!(
        "{}_events_in_pool_{pool_id}",
        event_type.as_str().to_ascii_lowercase()
    )
}

/// Counts new assignment events in a pool, one line per event type.
///
/// Cursors start at the metric's creation time, so only events that happen
/// after construction are counted; every event contributes a `(event_time,
/// 1)` point to its type's line.
#[derive(Debug)]
pub struct AssignmentEventsInPool {
    pool_id: String,
    cursors: BTreeMap<AssignmentEventType, AssignmentCursor>,
    cooldown: Cooldown,
}

impl AssignmentEventsInPool {
    /// Creates the metric for the given pool and event types.
    pub fn new(
        client: Arc<dyn RemoteClient>,
        pool_id: impl Into<String>,
        event_types: &[AssignmentEventType],
    ) -> Self {
        let pool_id = pool_id.into();
        let now = Utc::now();
        let cursors = event_types
            .iter()
            .map(|&event_type| {
                let request =
                    SearchRequest::for_pool(pool_id.clone()).with_gte(event_type.time_field(), now);
                (
                    event_type,
                    AssignmentCursor::new(client.clone(), request, event_type),
                )
            })
            .collect();
        Self {
            pool_id,
            cursors,
            cooldown: Cooldown::new(DEFAULT_COOLDOWN),
        }
    }
}

#[async_trait]
impl Metric for AssignmentEventsInPool {
    fn line_names(&self) -> Vec<String> {
        self.cursors
            .keys()
            .map(|&event_type| event_line_name(&self.pool_id, event_type))
            .collect()
    }

    async fn get_lines(&mut self) -> Result<MetricLines> {
        self.cooldown.wait().await;
        let pool_id = self.pool_id.clone();
        let mut lines = MetricLines::new();
        for (&event_type, cursor) in self.cursors.iter_mut() {
            let batch = cursor.try_fetch_all().await?;
            let points = batch
                .events()
                .iter()
                .map(|event| (event.event_time, 1.0))
                .collect();
            batch.commit();
            lines.insert(event_line_name(&pool_id, event_type), points);
        }
        Ok(lines)
    }
}

/// Completion percentage of a pool, computed by a platform analytics
/// operation.
#[derive_where(Debug)]
pub struct PoolCompletedPercentage {
    #[derive_where(skip)]
    client: Arc<dyn RemoteClient>,
    pool_id: String,
    operation_timeout: Duration,
    cooldown: Cooldown,
}

impl PoolCompletedPercentage {
    /// Creates the metric for the given pool.
    pub fn new(client: Arc<dyn RemoteClient>, pool_id: impl Into<String>) -> Self {
        Self {
            client,
            pool_id: pool_id.into(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            cooldown: Cooldown::new(DEFAULT_COOLDOWN),
        }
    }

    /// Overrides how long to wait for the analytics operation.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    fn line_name(&self) -> String {
        format!("completion_percentage_{}", self.pool_id)
    }
}

#[async_trait]
impl Metric for PoolCompletedPercentage {
    fn line_names(&self) -> Vec<String> {
        vec![self.line_name()]
    }

    async fn get_lines(&mut self) -> Result<MetricLines> {
        self.cooldown.wait().await;
        let pool = get_pool_cached(self.client.as_ref(), &self.pool_id).await?;
        debug!(
            pool = pool.private_name.as_deref().unwrap_or(&pool.id),
            "computing completion percentage"
        );
        let operation = self
            .client
            .get_analytics(&AnalyticsRequest::new("completion_percentage", &self.pool_id))
            .await?;
        let operation =
            wait_operation(self.client.as_ref(), operation, self.operation_timeout).await?;
        if operation.status != OperationStatus::Success {
            return Err(Error::fetch(format!(
                "analytics operation {} failed",
                operation.id
            )));
        }
        let value = operation
            .details
            .as_ref()
            .and_then(|details| details.get("value"))
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| Error::fetch("analytics operation completed without a value"))?;
        Ok(MetricLines::from([(
            self.line_name(),
            vec![(Utc::now(), value)],
        )]))
    }
}

/// Reads a pool's metadata through a per-process memoization.
///
/// The cache holds up to 128 pools with least-recently-used eviction; it is
/// meant for metadata that does not change over a pool's lifetime, not for
/// status checks.
pub async fn get_pool_cached(client: &dyn RemoteClient, pool_id: &str) -> Result<Pool> {
    static CACHE: OnceLock<Mutex<LruCache<String, Pool>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| {
        Mutex::new(LruCache::new(
            NonZeroUsize::new(128).expect("capacity is nonzero"),
        ))
    });
    if let Some(pool) = cache
        .lock()
        .expect("pool cache poisoned")
        .get(pool_id)
        .cloned()
    {
        return Ok(pool);
    }
    let pool = client.get_pool(pool_id).await?;
    cache
        .lock()
        .expect("pool cache poisoned")
        .put(pool_id.to_owned(), pool.clone());
    Ok(pool)
}
