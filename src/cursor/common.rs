use std::collections::{HashSet, VecDeque};
use std::fmt::{self, Debug};
use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::SearchItem;
use crate::request::{SearchPage, SearchRequest, SortKey, TimeField};

/// Supplies page fetching and event construction for one remote collection.
///
/// A typed cursor is a [`Cursor`] over a concrete provider; implement this
/// trait to point a cursor at a new collection.
#[async_trait]
pub trait FetchProvider: Send + Sync {
    /// Record type returned by the collection's search operation.
    type Item: SearchItem + Clone + Debug + Send + Sync + Serialize + DeserializeOwned;

    /// Event type handed to callers.
    type Event: Clone + Send;

    /// The time field this cursor orders and filters by.
    fn time_field(&self) -> TimeField;

    /// Issues one search call against the remote collection.
    async fn fetch(&self, request: &SearchRequest, sort: SortKey)
        -> Result<SearchPage<Self::Item>>;

    /// Wraps a fetched item into an event.
    fn make_event(&self, item: Self::Item, event_time: DateTime<Utc>) -> Self::Event;
}

/// Persistable position of a cursor within its collection.
///
/// Holds the next request to issue, the last page received (kept for
/// diagnostics; not required for correctness) and the ids whose
/// deduplication is still live. The set never grows unbounded: after a page
/// is processed it is replaced with the ids of that page, which is safe
/// because the request's lower time bound has advanced past everything
/// trimmed out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CursorState<T> {
    pub(crate) request: SearchRequest,
    pub(crate) prev_page: Option<SearchPage<T>>,
    pub(crate) seen_ids: HashSet<String>,
}

impl<T> CursorState<T> {
    fn new(request: SearchRequest) -> Self {
        Self {
            request,
            prev_page: None,
            seen_ids: HashSet::new(),
        }
    }

    /// The request the cursor will issue next.
    pub fn request(&self) -> &SearchRequest {
        &self.request
    }

    /// The ids currently deduplicated against.
    pub fn seen_ids(&self) -> &HashSet<String> {
        &self.seen_ids
    }
}

/// Drains a fixed-timestamp bucket in ascending id order.
///
/// The request carries matching lower and upper bounds on the time field;
/// paging advances through `id_gt`, so a failed fetch can be retried by
/// re-entering with the retained request.
struct ByIdCursor<T> {
    request: SearchRequest,
    buffer: VecDeque<T>,
    exhausted: bool,
}

impl<T: SearchItem + Clone> ByIdCursor<T> {
    fn new(request: SearchRequest) -> Self {
        Self {
            request,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    async fn next<P>(&mut self, provider: &P) -> Option<Result<T>>
    where
        P: FetchProvider<Item = T>,
    {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            if self.exhausted {
                return None;
            }
            let page = match provider.fetch(&self.request, SortKey::Id).await {
                Ok(page) => page,
                Err(e) => return Some(Err(e)),
            };
            if let Some(last) = page.items.last() {
                self.request = self.request.with_id_gt(last.id());
            }
            if !page.has_more {
                self.exhausted = true;
            }
            self.buffer.extend(page.items);
        }
    }
}

struct PageStage<T> {
    items: VecDeque<T>,
    page_ids: HashSet<String>,
    first_time: DateTime<Utc>,
    max_time: DateTime<Utc>,
    has_more: bool,
}

struct DrainStage<T> {
    by_id: ByIdCursor<T>,
    page_ids: HashSet<String>,
    max_time: DateTime<Utc>,
}

enum Stage<T> {
    Idle,
    Paging(PageStage<T>),
    DrainBucket(DrainStage<T>),
    Done,
}

impl<T> Stage<T> {
    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Paging(_) => "paging",
            Self::DrainBucket(_) => "drain-bucket",
            Self::Done => "done",
        }
    }
}

/// A restartable, lazy, time-ordered stream of events over one remote
/// collection.
///
/// One call to [`Cursor::next`] suspends on at most one platform round trip
/// and yields the next unseen event; `None` ends the current iteration pass.
/// A later call begins a new pass that yields exactly the items that have
/// appeared in the collection since the previous pass, with no item yielded
/// twice per cursor instance.
///
/// The cursor tolerates the platform's weak consistency: items arriving
/// slightly out of order near the tail are deduplicated by id under the
/// inclusive lower time bound, and timestamp buckets larger than one page
/// are drained through a secondary id-ordered scan before the frontier
/// advances past them.
pub struct Cursor<P: FetchProvider> {
    provider: P,
    state: CursorState<P::Item>,
    stage: Stage<P::Item>,
}

impl<P: FetchProvider> Debug for Cursor<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("state", &self.state)
            .field("stage", &self.stage.name())
            .finish()
    }
}

impl<P: FetchProvider> Cursor<P> {
    /// Creates a cursor from a provider, ensuring the request carries a lower
    /// bound on the provider's time field.
    pub fn with_provider(provider: P, request: SearchRequest) -> Self {
        let request = request.normalized(provider.time_field());
        Self {
            state: CursorState::new(request),
            provider,
            stage: Stage::Idle,
        }
    }

    /// The cursor's persistable state.
    pub fn state(&self) -> &CursorState<P::Item> {
        &self.state
    }

    /// Overwrites the cursor's state, resetting any in-flight pass.
    pub fn restore_state(&mut self, state: CursorState<P::Item>) {
        self.state = state;
        self.stage = Stage::Idle;
    }

    /// Overwrites this cursor's state with a deep copy of another's.
    pub fn inject(&mut self, other: &Self) {
        self.restore_state(other.state.clone());
    }

    fn time_of(&self, item: &P::Item) -> Result<DateTime<Utc>> {
        let field = self.provider.time_field();
        item.time(field).ok_or_else(|| {
            Error::internal(format!("item {} is missing its {field} time", item.id()))
        })
    }

    /// Yields the next unseen event, or `None` when the current pass is
    /// exhausted. Fetch errors propagate without losing the cursor's
    /// position; calling `next` again retries from the same spot.
    pub async fn next(&mut self) -> Option<Result<P::Event>> {
        let field = self.provider.time_field();
        loop {
            match std::mem::replace(&mut self.stage, Stage::Idle) {
                Stage::Idle => {
                    let page = match self
                        .provider
                        .fetch(&self.state.request, SortKey::Time(field))
                        .await
                    {
                        Ok(page) => page,
                        Err(e) => return Some(Err(e)),
                    };
                    let (first, last) = match (page.items.first(), page.items.last()) {
                        (Some(first), Some(last)) => (first, last),
                        _ => {
                            self.stage = Stage::Done;
                            return None;
                        }
                    };
                    let first_time = match self.time_of(first) {
                        Ok(time) => time,
                        Err(e) => return Some(Err(e)),
                    };
                    let max_time = match self.time_of(last) {
                        Ok(time) => time,
                        Err(e) => return Some(Err(e)),
                    };
                    self.state.prev_page = Some(page.clone());
                    let page_ids = page.items.iter().map(|item| item.id().to_owned()).collect();
                    self.stage = Stage::Paging(PageStage {
                        items: page.items.into(),
                        page_ids,
                        first_time,
                        max_time,
                        has_more: page.has_more,
                    });
                }
                Stage::Paging(mut paging) => {
                    while let Some(item) = paging.items.pop_front() {
                        if self.state.seen_ids.contains(item.id()) {
                            continue;
                        }
                        let time = match self.time_of(&item) {
                            Ok(time) => time,
                            Err(e) => {
                                paging.items.push_front(item);
                                self.stage = Stage::Paging(paging);
                                return Some(Err(e));
                            }
                        };
                        self.state.request = self.state.request.with_gte(field, time);
                        self.state.seen_ids.insert(item.id().to_owned());
                        let event = self.provider.make_event(item, time);
                        self.stage = Stage::Paging(paging);
                        return Some(Ok(event));
                    }
                    if !paging.has_more {
                        self.stage = Stage::Done;
                        return None;
                    }
                    if paging.first_time == paging.max_time {
                        // The whole page shares one timestamp: the bucket may
                        // exceed the page size, so drain it by id before
                        // moving the frontier strictly past it.
                        let fixed = self.state.request.with_lte(field, paging.max_time);
                        self.stage = Stage::DrainBucket(DrainStage {
                            by_id: ByIdCursor::new(fixed),
                            page_ids: paging.page_ids,
                            max_time: paging.max_time,
                        });
                    } else {
                        // Ids older than the advanced lower bound can no
                        // longer reappear; keep only the current page's.
                        self.state.seen_ids = paging.page_ids;
                    }
                }
                Stage::DrainBucket(mut drain) => match drain.by_id.next(&self.provider).await {
                    Some(Ok(item)) => {
                        if self.state.seen_ids.contains(item.id()) {
                            self.stage = Stage::DrainBucket(drain);
                            continue;
                        }
                        let time = match self.time_of(&item) {
                            Ok(time) => time,
                            Err(e) => {
                                drain.by_id.buffer.push_front(item);
                                self.stage = Stage::DrainBucket(drain);
                                return Some(Err(e));
                            }
                        };
                        self.state.seen_ids.insert(item.id().to_owned());
                        let event = self.provider.make_event(item, time);
                        self.stage = Stage::DrainBucket(drain);
                        return Some(Ok(event));
                    }
                    Some(Err(e)) => {
                        self.stage = Stage::DrainBucket(drain);
                        return Some(Err(e));
                    }
                    None => {
                        self.state.request = self.state.request.with_gt(field, drain.max_time);
                        self.state.seen_ids = drain.page_ids;
                    }
                },
                Stage::Done => {}
            }
        }
    }

    /// Runs one full pass, buffering every event, without advancing the
    /// externally visible state.
    ///
    /// The returned batch exposes the buffered events; the cursor stays at
    /// its entry state until [`FetchedBatch::commit`] installs the
    /// post-iteration state. Dropping the batch (or calling
    /// [`FetchedBatch::abort`]) leaves the entry state in place, as does a
    /// fetch error during collection, so a caller whose processing fails can
    /// simply fetch again.
    pub async fn try_fetch_all(&mut self) -> Result<FetchedBatch<'_, P>> {
        let entry = self.state.clone();
        let mut events = Vec::new();
        loop {
            match self.next().await {
                Some(Ok(event)) => events.push(event),
                Some(Err(e)) => {
                    self.restore_state(entry);
                    return Err(e);
                }
                None => break,
            }
        }
        let finish = self.state.clone();
        self.restore_state(entry);
        Ok(FetchedBatch {
            cursor: self,
            events,
            finish,
        })
    }

    /// Fetches one full pass and hands the events to `handler`, committing
    /// the advanced state only if the handler succeeds.
    pub async fn process_all<F, Fut>(&mut self, handler: F) -> Result<()>
    where
        F: FnOnce(Vec<P::Event>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let batch = self.try_fetch_all().await?;
        let events = batch.events().to_vec();
        handler(events).await?;
        batch.commit();
        Ok(())
    }
}

/// Buffered result of [`Cursor::try_fetch_all`].
///
/// Holds the events of a completed pass together with the state the cursor
/// will advance to on commit.
#[must_use = "dropping the batch discards the pass; call commit() to advance the cursor"]
pub struct FetchedBatch<'a, P: FetchProvider> {
    cursor: &'a mut Cursor<P>,
    events: Vec<P::Event>,
    finish: CursorState<P::Item>,
}

impl<'a, P: FetchProvider> FetchedBatch<'a, P> {
    /// The events collected by the pass, in emission order.
    pub fn events(&self) -> &[P::Event] {
        &self.events
    }

    /// Installs the post-iteration state, consuming the batch.
    pub fn commit(self) {
        let Self { cursor, finish, .. } = self;
        cursor.restore_state(finish);
    }

    /// Discards the pass, leaving the cursor at its entry state.
    pub fn abort(self) {}
}

impl<'a, P: FetchProvider> fmt::Debug for FetchedBatch<'a, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedBatch")
            .field("events", &self.events.len())
            .field("finish", &self.finish)
            .finish()
    }
}
