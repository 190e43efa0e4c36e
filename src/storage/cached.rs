use crate::models::{Event, Goal, GoalKind, NewEvent, NewGoalCompletion, NewSession, Session, Website};
use crate::storage::{Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Read-through cache over the goal and website lookups made on every beacon.
///
/// Writes go straight to the inner storage. Goal mutations made through this
/// wrapper invalidate the affected entries; mutations made elsewhere (another
/// process) must call [`CachedStorage::invalidate_goal_cache`] or wait for the TTL.
pub struct CachedStorage {
    inner: Arc<dyn Storage>,
    goal_cache: Cache<Uuid, Arc<Vec<Goal>>>,
    website_cache: Cache<Uuid, Option<Website>>,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn Storage>, max_cache_entries: u64, ttl_secs: u64) -> Self {
        let goal_cache = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        let website_cache = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self {
            inner,
            goal_cache,
            website_cache,
        }
    }

    /// Goals of a website, served from cache when present
    pub async fn cached_goals(&self, website_id: &Uuid) -> Result<Arc<Vec<Goal>>> {
        if let Some(cached) = self.goal_cache.get(website_id).await {
            return Ok(cached);
        }

        let goals = Arc::new(self.inner.goals_for_website(website_id).await?);
        self.goal_cache.insert(*website_id, Arc::clone(&goals)).await;

        Ok(goals)
    }

    /// Must be called after any goal mutation for `website_id`
    pub async fn invalidate_goal_cache(&self, website_id: &Uuid) {
        self.goal_cache.invalidate(website_id).await;
    }

    pub async fn invalidate_website(&self, website_id: &Uuid) {
        self.website_cache.invalidate(website_id).await;
    }
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn create_website(
        &self,
        id: &Uuid,
        name: &str,
        domain: Option<&str>,
    ) -> StorageResult<Website> {
        let website = self.inner.create_website(id, name, domain).await?;

        // A negative lookup may have been cached before the website existed
        self.website_cache.insert(*id, Some(website.clone())).await;

        Ok(website)
    }

    async fn get_website(&self, id: &Uuid) -> Result<Option<Website>> {
        if let Some(cached) = self.website_cache.get(id).await {
            return Ok(cached);
        }

        let website = self.inner.get_website(id).await?;
        self.website_cache.insert(*id, website.clone()).await;

        Ok(website)
    }

    async fn upsert_session(&self, session: &NewSession) -> Result<()> {
        self.inner.upsert_session(session).await
    }

    async fn identify_session(&self, session: &NewSession) -> Result<()> {
        self.inner.identify_session(session).await
    }

    async fn get_session(&self, id: &Uuid) -> Result<Option<Session>> {
        self.inner.get_session(id).await
    }

    async fn insert_event(&self, event: &NewEvent) -> Result<()> {
        self.inner.insert_event(event).await
    }

    async fn set_event_goal(&self, event_id: &Uuid, goal_id: &str) -> Result<()> {
        self.inner.set_event_goal(event_id, goal_id).await
    }

    async fn get_event(&self, id: &Uuid) -> Result<Option<Event>> {
        self.inner.get_event(id).await
    }

    async fn count_events(&self, website_id: &Uuid) -> Result<i64> {
        self.inner.count_events(website_id).await
    }

    async fn idempotency_key_exists(&self, event_id: &Uuid, website_id: &Uuid) -> Result<bool> {
        self.inner.idempotency_key_exists(event_id, website_id).await
    }

    async fn record_idempotency_key(&self, event_id: &Uuid, website_id: &Uuid) -> Result<()> {
        self.inner.record_idempotency_key(event_id, website_id).await
    }

    async fn create_goal(&self, website_id: &Uuid, kind: GoalKind, target: &str) -> Result<Goal> {
        let goal = self.inner.create_goal(website_id, kind, target).await?;
        self.invalidate_goal_cache(website_id).await;
        Ok(goal)
    }

    async fn delete_goal(&self, goal_id: &str) -> Result<bool> {
        let deleted = self.inner.delete_goal(goal_id).await?;

        // The owning website is not known here
        if deleted {
            self.goal_cache.invalidate_all();
        }

        Ok(deleted)
    }

    async fn goals_for_website(&self, website_id: &Uuid) -> Result<Vec<Goal>> {
        let goals = self.cached_goals(website_id).await?;
        Ok(goals.as_ref().clone())
    }

    async fn goal_completion_exists(&self, goal_id: &str, session_id: &Uuid) -> Result<bool> {
        self.inner.goal_completion_exists(goal_id, session_id).await
    }

    async fn insert_goal_completion(&self, completion: &NewGoalCompletion) -> Result<bool> {
        self.inner.insert_goal_completion(completion).await
    }

    async fn count_goal_completions(&self, goal_id: &str) -> Result<i64> {
        self.inner.count_goal_completions(goal_id).await
    }
}
