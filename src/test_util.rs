//! In-memory platform double shared by the crate's tests.
//!
//! Honors every request predicate simultaneously and paginates with a
//! configurable page size, so tests exercise cursor semantics against the
//! same contract the real platform exposes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::client::{RemoteClient, SyncClient};
use crate::error::{Error, Result};
use crate::model::{
    AnalyticsRequest, Assignment, MessageThread, Operation, Pool, PoolStatus, SearchItem, Task,
    UserBonus, UserRestriction, UserSkill,
};
use crate::request::{SearchPage, SearchRequest, SortKey};

pub(crate) fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
}

#[derive(Debug, Default)]
struct PlatformData {
    assignments: Vec<Assignment>,
    tasks: Vec<Task>,
    user_bonuses: Vec<UserBonus>,
    user_skills: Vec<UserSkill>,
    user_restrictions: Vec<UserRestriction>,
    message_threads: Vec<MessageThread>,
    pools: HashMap<String, Pool>,
    operations: HashMap<String, Operation>,
    fail_next_find: bool,
}

#[derive(Debug)]
pub(crate) struct InMemoryPlatform {
    data: Mutex<PlatformData>,
    page_size: usize,
}

impl InMemoryPlatform {
    pub(crate) fn new(page_size: usize) -> Self {
        Self {
            data: Mutex::new(PlatformData::default()),
            page_size,
        }
    }

    fn data(&self) -> MutexGuard<'_, PlatformData> {
        self.data.lock().expect("platform mutex poisoned")
    }

    pub(crate) fn add_assignment(&self, assignment: Assignment) {
        self.data().assignments.push(assignment);
    }

    pub(crate) fn add_task(&self, task: Task) {
        self.data().tasks.push(task);
    }

    pub(crate) fn add_user_bonus(&self, bonus: UserBonus) {
        self.data().user_bonuses.push(bonus);
    }

    pub(crate) fn add_user_skill(&self, skill: UserSkill) {
        self.data().user_skills.push(skill);
    }

    pub(crate) fn add_message_thread(&self, thread: MessageThread) {
        self.data().message_threads.push(thread);
    }

    pub(crate) fn set_pool(&self, pool: Pool) {
        self.data().pools.insert(pool.id.clone(), pool);
    }

    pub(crate) fn set_pool_status(&self, pool_id: &str, status: PoolStatus) {
        if let Some(pool) = self.data().pools.get_mut(pool_id) {
            pool.status = status;
        }
    }

    pub(crate) fn set_operation(&self, operation: Operation) {
        self.data()
            .operations
            .insert(operation.id.clone(), operation);
    }

    /// Makes the next `find_*` call fail once with a fetch error.
    pub(crate) fn fail_next_find(&self) {
        self.data().fail_next_find = true;
    }

    fn check_find(&self) -> Result<()> {
        let mut data = self.data();
        if data.fail_next_find {
            data.fail_next_find = false;
            return Err(Error::fetch("injected failure"));
        }
        Ok(())
    }

    fn satisfies<T: SearchItem>(item: &T, request: &SearchRequest) -> bool {
        for (field, bound) in &request.gte {
            match item.time(*field) {
                Some(time) if time >= *bound => {}
                _ => return false,
            }
        }
        for (field, bound) in &request.gt {
            match item.time(*field) {
                Some(time) if time > *bound => {}
                _ => return false,
            }
        }
        for (field, bound) in &request.lte {
            match item.time(*field) {
                Some(time) if time <= *bound => {}
                _ => return false,
            }
        }
        if let Some(id_gt) = &request.id_gt {
            if item.id() <= id_gt.as_str() {
                return false;
            }
        }
        true
    }

    fn page_of<T, S>(
        &self,
        items: &[T],
        request: &SearchRequest,
        sort: SortKey,
        scope: S,
    ) -> SearchPage<T>
    where
        T: SearchItem + Clone,
        S: Fn(&T) -> bool,
    {
        let mut matches: Vec<T> = items
            .iter()
            .filter(|&item| scope(item) && Self::satisfies(item, request))
            .cloned()
            .collect();
        match sort {
            SortKey::Time(field) => matches.sort_by(|a, b| {
                (a.time(field), a.id()).cmp(&(b.time(field), b.id()))
            }),
            SortKey::Id => matches.sort_by(|a, b| a.id().cmp(b.id())),
        }
        let has_more = matches.len() > self.page_size;
        matches.truncate(self.page_size);
        SearchPage {
            items: matches,
            has_more,
        }
    }

    fn find_assignments_inner(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<Assignment>> {
        self.check_find()?;
        let data = self.data();
        Ok(self.page_of(&data.assignments, request, sort, |a| {
            request.pool_id.as_deref().map_or(true, |p| a.pool_id == p)
        }))
    }

    fn find_tasks_inner(&self, request: &SearchRequest, sort: SortKey) -> Result<SearchPage<Task>> {
        self.check_find()?;
        let data = self.data();
        Ok(self.page_of(&data.tasks, request, sort, |t| {
            request.pool_id.as_deref().map_or(true, |p| t.pool_id == p)
        }))
    }

    fn find_user_bonuses_inner(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserBonus>> {
        self.check_find()?;
        let data = self.data();
        Ok(self.page_of(&data.user_bonuses, request, sort, |_| true))
    }

    fn find_user_skills_inner(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserSkill>> {
        self.check_find()?;
        let data = self.data();
        Ok(self.page_of(&data.user_skills, request, sort, |_| true))
    }

    fn find_user_restrictions_inner(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserRestriction>> {
        self.check_find()?;
        let data = self.data();
        Ok(self.page_of(&data.user_restrictions, request, sort, |_| true))
    }

    fn find_message_threads_inner(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<MessageThread>> {
        self.check_find()?;
        let data = self.data();
        Ok(self.page_of(&data.message_threads, request, sort, |_| true))
    }

    fn get_pool_inner(&self, pool_id: &str) -> Result<Pool> {
        self.data()
            .pools
            .get(pool_id)
            .cloned()
            .ok_or_else(|| Error::fetch(format!("pool {pool_id} not found")))
    }

    fn get_analytics_inner(&self, request: &AnalyticsRequest) -> Result<Operation> {
        let key = format!("analytics-{}", request.subject_id);
        self.data()
            .operations
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::fetch(format!("no analytics operation for {}", request.subject_id)))
    }

    fn get_operation_inner(&self, operation_id: &str) -> Result<Operation> {
        self.data()
            .operations
            .get(operation_id)
            .cloned()
            .ok_or_else(|| Error::fetch(format!("operation {operation_id} not found")))
    }
}

#[async_trait]
impl RemoteClient for InMemoryPlatform {
    async fn find_assignments(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<Assignment>> {
        self.find_assignments_inner(request, sort)
    }

    async fn find_tasks(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<Task>> {
        self.find_tasks_inner(request, sort)
    }

    async fn find_user_bonuses(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserBonus>> {
        self.find_user_bonuses_inner(request, sort)
    }

    async fn find_user_skills(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserSkill>> {
        self.find_user_skills_inner(request, sort)
    }

    async fn find_user_restrictions(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserRestriction>> {
        self.find_user_restrictions_inner(request, sort)
    }

    async fn find_message_threads(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<MessageThread>> {
        self.find_message_threads_inner(request, sort)
    }

    async fn get_pool(&self, pool_id: &str) -> Result<Pool> {
        self.get_pool_inner(pool_id)
    }

    async fn get_analytics(&self, request: &AnalyticsRequest) -> Result<Operation> {
        self.get_analytics_inner(request)
    }

    async fn get_operation(&self, operation_id: &str) -> Result<Operation> {
        self.get_operation_inner(operation_id)
    }
}

impl SyncClient for InMemoryPlatform {
    fn find_assignments(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<Assignment>> {
        self.find_assignments_inner(request, sort)
    }

    fn find_tasks(&self, request: &SearchRequest, sort: SortKey) -> Result<SearchPage<Task>> {
        self.find_tasks_inner(request, sort)
    }

    fn find_user_bonuses(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserBonus>> {
        self.find_user_bonuses_inner(request, sort)
    }

    fn find_user_skills(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserSkill>> {
        self.find_user_skills_inner(request, sort)
    }

    fn find_user_restrictions(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<UserRestriction>> {
        self.find_user_restrictions_inner(request, sort)
    }

    fn find_message_threads(
        &self,
        request: &SearchRequest,
        sort: SortKey,
    ) -> Result<SearchPage<MessageThread>> {
        self.find_message_threads_inner(request, sort)
    }

    fn get_pool(&self, pool_id: &str) -> Result<Pool> {
        self.get_pool_inner(pool_id)
    }

    fn get_analytics(&self, request: &AnalyticsRequest) -> Result<Operation> {
        self.get_analytics_inner(request)
    }

    fn get_operation(&self, operation_id: &str) -> Result<Operation> {
        self.get_operation_inner(operation_id)
    }
}
