use crate::models::{Event, Goal, GoalKind, NewEvent, NewGoalCompletion, NewSession, Session, Website};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Other(err.into())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Register a tracked website
    async fn create_website(
        &self,
        id: &Uuid,
        name: &str,
        domain: Option<&str>,
    ) -> StorageResult<Website>;

    async fn get_website(&self, id: &Uuid) -> Result<Option<Website>>;

    /// Insert the session, or on id conflict replace only `exit_page`.
    /// `entry_page` is filled once: by the insert, or by the first upsert
    /// after an identify-only session was created without a page.
    async fn upsert_session(&self, session: &NewSession) -> Result<()>;

    /// Insert the session, or on id conflict replace only `distinct_id`
    async fn identify_session(&self, session: &NewSession) -> Result<()>;

    async fn get_session(&self, id: &Uuid) -> Result<Option<Session>>;

    async fn insert_event(&self, event: &NewEvent) -> Result<()>;

    /// Attach a matched goal to an already written event
    async fn set_event_goal(&self, event_id: &Uuid, goal_id: &str) -> Result<()>;

    async fn get_event(&self, id: &Uuid) -> Result<Option<Event>>;

    async fn count_events(&self, website_id: &Uuid) -> Result<i64>;

    async fn idempotency_key_exists(&self, event_id: &Uuid, website_id: &Uuid) -> Result<bool>;

    /// Record an accepted client event id; recording twice is a no-op
    async fn record_idempotency_key(&self, event_id: &Uuid, website_id: &Uuid) -> Result<()>;

    async fn create_goal(&self, website_id: &Uuid, kind: GoalKind, target: &str) -> Result<Goal>;

    async fn delete_goal(&self, goal_id: &str) -> Result<bool>;

    /// Goals of a website, oldest first
    async fn goals_for_website(&self, website_id: &Uuid) -> Result<Vec<Goal>>;

    async fn goal_completion_exists(&self, goal_id: &str, session_id: &Uuid) -> Result<bool>;

    /// Insert a completion, ignoring a (goal_id, session_id) conflict.
    /// Returns whether a row was written.
    async fn insert_goal_completion(&self, completion: &NewGoalCompletion) -> Result<bool>;

    async fn count_goal_completions(&self, goal_id: &str) -> Result<i64>;
}
