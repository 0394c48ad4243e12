//! Incremental cursors over the platform's search collections.
//!
//! A cursor scans one paginated, time-ordered remote collection exactly once
//! per item and can be resumed across process restarts from its persisted
//! [`CursorState`]. Re-iterating a cursor after a pass has finished yields
//! only the items that appeared since the previous pass:
//!
//! ```rust,ignore
//! let mut cursor = AssignmentCursor::new(
//!     client.clone(),
//!     SearchRequest::for_pool("123"),
//!     AssignmentEventType::Accepted,
//! );
//! while let Some(event) = cursor.next().await {
//!     println!("accepted: {}", event?.assignment.id);
//! }
//! // ... new assignments may be accepted ...
//! while let Some(event) = cursor.next().await {
//!     // only the newly accepted assignments are yielded here
//! }
//! ```
//!
//! Batch consumers should prefer [`Cursor::try_fetch_all`] or
//! [`Cursor::process_all`], which make one pass transactional: the cursor
//! does not advance unless the batch is committed.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use common::{Cursor, CursorState, FetchProvider, FetchedBatch};

use crate::client::RemoteClient;
use crate::error::Result;
use crate::event::{
    AssignmentEvent, AssignmentEventType, MessageThreadEvent, TaskEvent, UserBonusEvent,
    UserRestrictionEvent, UserSkillEvent, UserSkillEventType,
};
use crate::model::{Assignment, MessageThread, Task, UserBonus, UserRestriction, UserSkill};
use crate::request::{SearchPage, SearchRequest, SortKey, TimeField};

/// Provider fetching assignments for one lifecycle event type.
pub struct AssignmentFetch {
    client: Arc<dyn RemoteClient>,
    event_type: AssignmentEventType,
}

#[async_trait]
impl FetchProvider for AssignmentFetch {
    type Item = Assignment;
    type Event = AssignmentEvent;

    fn time_field(&self) -> TimeField {
        self.event_type.time_field()
    }

    async fn fetch(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<Assignment>> {
        self.client.find_assignments(request, sort).await
    }

    fn make_event(&self, item: Assignment, event_time: DateTime<Utc>) -> AssignmentEvent {
        AssignmentEvent {
            assignment: item,
            event_type: self.event_type,
            event_time,
        }
    }
}

/// Cursor over assignment events of a selected type.
///
/// The event type determines which time field the cursor orders by:
/// `Submitted` scans by submission time, `Accepted` by acceptance time, and
/// so on.
pub type AssignmentCursor = Cursor<AssignmentFetch>;

impl Cursor<AssignmentFetch> {
    /// Creates a cursor yielding `event_type` events for assignments
    /// matching `request`.
    pub fn new(
        client: Arc<dyn RemoteClient>,
        request: SearchRequest,
        event_type: AssignmentEventType,
    ) -> Self {
        Cursor::with_provider(AssignmentFetch { client, event_type }, request)
    }
}

/// Provider fetching tasks by creation time.
pub struct TaskFetch {
    client: Arc<dyn RemoteClient>,
}

#[async_trait]
impl FetchProvider for TaskFetch {
    type Item = Task;
    type Event = TaskEvent;

    fn time_field(&self) -> TimeField {
        TimeField::Created
    }

    async fn fetch(&self, request: &SearchRequest, sort: SortKey) -> Result<SearchPage<Task>> {
        self.client.find_tasks(request, sort).await
    }

    fn make_event(&self, item: Task, event_time: DateTime<Utc>) -> TaskEvent {
        TaskEvent {
            task: item,
            event_time,
        }
    }
}

/// Cursor over tasks by creation time.
pub type TaskCursor = Cursor<TaskFetch>;

impl Cursor<TaskFetch> {
    /// Creates a cursor yielding new tasks matching `request`.
    pub fn new(client: Arc<dyn RemoteClient>, request: SearchRequest) -> Self {
        Cursor::with_provider(TaskFetch { client }, request)
    }
}

/// Provider fetching user bonuses by creation time.
pub struct UserBonusFetch {
    client: Arc<dyn RemoteClient>,
}

#[async_trait]
impl FetchProvider for UserBonusFetch {
    type Item = UserBonus;
    type Event = UserBonusEvent;

    fn time_field(&self) -> TimeField {
        TimeField::Created
    }

    async fn fetch(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserBonus>> {
        self.client.find_user_bonuses(request, sort).await
    }

    fn make_event(&self, item: UserBonus, event_time: DateTime<Utc>) -> UserBonusEvent {
        UserBonusEvent {
            user_bonus: item,
            event_time,
        }
    }
}

/// Cursor over user bonuses by creation time.
pub type UserBonusCursor = Cursor<UserBonusFetch>;

impl Cursor<UserBonusFetch> {
    /// Creates a cursor yielding new user bonuses matching `request`.
    pub fn new(client: Arc<dyn RemoteClient>, request: SearchRequest) -> Self {
        Cursor::with_provider(UserBonusFetch { client }, request)
    }
}

/// Provider fetching user skills for one event type.
pub struct UserSkillFetch {
    client: Arc<dyn RemoteClient>,
    event_type: UserSkillEventType,
}

#[async_trait]
impl FetchProvider for UserSkillFetch {
    type Item = UserSkill;
    type Event = UserSkillEvent;

    fn time_field(&self) -> TimeField {
        self.event_type.time_field()
    }

    async fn fetch(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserSkill>> {
        self.client.find_user_skills(request, sort).await
    }

    fn make_event(&self, item: UserSkill, event_time: DateTime<Utc>) -> UserSkillEvent {
        UserSkillEvent {
            user_skill: item,
            event_type: self.event_type,
            event_time,
        }
    }
}

/// Cursor over user skill events of a selected type.
pub type UserSkillCursor = Cursor<UserSkillFetch>;

impl Cursor<UserSkillFetch> {
    /// Creates a cursor yielding `event_type` events for user skills
    /// matching `request`.
    pub fn new(
        client: Arc<dyn RemoteClient>,
        request: SearchRequest,
        event_type: UserSkillEventType,
    ) -> Self {
        Cursor::with_provider(UserSkillFetch { client, event_type }, request)
    }
}

/// Provider fetching user restrictions by creation time.
pub struct UserRestrictionFetch {
    client: Arc<dyn RemoteClient>,
}

#[async_trait]
impl FetchProvider for UserRestrictionFetch {
    type Item = UserRestriction;
    type Event = UserRestrictionEvent;

    fn time_field(&self) -> TimeField {
        TimeField::Created
    }

    async fn fetch(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserRestriction>> {
        self.client.find_user_restrictions(request, sort).await
    }

    fn make_event(&self, item: UserRestriction, event_time: DateTime<Utc>) -> UserRestrictionEvent {
        UserRestrictionEvent {
            user_restriction: item,
            event_time,
        }
    }
}

/// Cursor over user restrictions by creation time.
pub type UserRestrictionCursor = Cursor<UserRestrictionFetch>;

impl Cursor<UserRestrictionFetch> {
    /// Creates a cursor yielding new user restrictions matching `request`.
    pub fn new(client: Arc<dyn RemoteClient>, request: SearchRequest) -> Self {
        Cursor::with_provider(UserRestrictionFetch { client }, request)
    }
}

/// Provider fetching message threads by creation time.
pub struct MessageThreadFetch {
    client: Arc<dyn RemoteClient>,
}

#[async_trait]
impl FetchProvider for MessageThreadFetch {
    type Item = MessageThread;
    type Event = MessageThreadEvent;

    fn time_field(&self) -> TimeField {
        TimeField::Created
    }

    async fn fetch(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<MessageThread>> {
        self.client.find_message_threads(request, sort).await
    }

    fn make_event(&self, item: MessageThread, event_time: DateTime<Utc>) -> MessageThreadEvent {
        MessageThreadEvent {
            message_thread: item,
            event_time,
        }
    }
}

/// Cursor over message threads by creation time.
pub type MessageThreadCursor = Cursor<MessageThreadFetch>;

impl Cursor<MessageThreadFetch> {
    /// Creates a cursor yielding new message threads matching `request`.
    pub fn new(client: Arc<dyn RemoteClient>, request: SearchRequest) -> Self {
        Cursor::with_provider(MessageThreadFetch { client }, request)
    }
}
