use crate::models::{Event, Goal, GoalKind, NewEvent, NewGoalCompletion, NewSession, Session, Website};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, website_id, browser, os, device, screen, language, country, \
     region, city, distinct_id, entry_page, exit_page, created_at";

const EVENT_COLUMNS: &str = "id, website_id, session_id, visit_id, created_at, event_type, \
     url_path, url_query, hostname, referrer_path, referrer_query, referrer_domain, page_title, \
     event_name, tag, properties, utm_source, utm_medium, utm_campaign, utm_term, utm_content, \
     goal_id";

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Shared pool, also used for `pg_notify` publishing
    pub fn pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS websites (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                domain TEXT,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                website_id TEXT NOT NULL,
                browser TEXT,
                os TEXT,
                device TEXT,
                screen TEXT,
                language TEXT,
                country TEXT,
                region TEXT,
                city TEXT,
                distinct_id TEXT,
                entry_page TEXT,
                exit_page TEXT,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_website ON sessions(website_id, created_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                website_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                visit_id TEXT NOT NULL,
                created_at BIGINT NOT NULL,
                event_type INTEGER NOT NULL,
                url_path TEXT NOT NULL,
                url_query TEXT,
                hostname TEXT,
                referrer_path TEXT,
                referrer_query TEXT,
                referrer_domain TEXT,
                page_title TEXT,
                event_name TEXT,
                tag TEXT,
                properties TEXT,
                utm_source TEXT,
                utm_medium TEXT,
                utm_campaign TEXT,
                utm_term TEXT,
                utm_content TEXT,
                goal_id TEXT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_website ON events(website_id, created_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS idempotency_keys (
                event_id TEXT NOT NULL,
                website_id TEXT NOT NULL,
                created_at BIGINT NOT NULL,
                PRIMARY KEY (event_id, website_id)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS goals (
                id TEXT PRIMARY KEY,
                website_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                target TEXT NOT NULL,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_goals_website ON goals(website_id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS goal_completions (
                id TEXT PRIMARY KEY,
                goal_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                website_id TEXT NOT NULL,
                completed_at BIGINT NOT NULL,
                UNIQUE (goal_id, session_id)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create_website(
        &self,
        id: &Uuid,
        name: &str,
        domain: Option<&str>,
    ) -> StorageResult<Website> {
        let website = sqlx::query_as::<_, Website>(
            r#"
            INSERT INTO websites (id, name, domain, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            RETURNING id, name, domain, created_at
            "#,
        )
        .bind(id.to_string())
        .bind(name)
        .bind(domain)
        .bind(now_secs())
        .fetch_optional(self.pool.as_ref())
        .await?;

        website.ok_or(StorageError::Conflict)
    }

    async fn get_website(&self, id: &Uuid) -> Result<Option<Website>> {
        let website = sqlx::query_as::<_, Website>(
            "SELECT id, name, domain, created_at FROM websites WHERE id = $1",
        )
        .bind(id.to_string())
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(website)
    }

    async fn upsert_session(&self, session: &NewSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, website_id, browser, os, device, screen, language,
                country, region, city, distinct_id, entry_page, exit_page, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                entry_page = COALESCE(sessions.entry_page, EXCLUDED.entry_page),
                exit_page = EXCLUDED.exit_page
            "#,
        )
        .bind(session.id.to_string())
        .bind(session.website_id.to_string())
        .bind(&session.browser)
        .bind(&session.os)
        .bind(&session.device)
        .bind(&session.screen)
        .bind(&session.language)
        .bind(&session.country)
        .bind(&session.region)
        .bind(&session.city)
        .bind(&session.distinct_id)
        .bind(&session.page)
        .bind(session.created_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn identify_session(&self, session: &NewSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, website_id, browser, os, device, screen, language,
                country, region, city, distinct_id, entry_page, exit_page, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                distinct_id = COALESCE(EXCLUDED.distinct_id, sessions.distinct_id)
            "#,
        )
        .bind(session.id.to_string())
        .bind(session.website_id.to_string())
        .bind(&session.browser)
        .bind(&session.os)
        .bind(&session.device)
        .bind(&session.screen)
        .bind(&session.language)
        .bind(&session.country)
        .bind(&session.region)
        .bind(&session.city)
        .bind(&session.distinct_id)
        .bind(&session.page)
        .bind(session.created_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn get_session(&self, id: &Uuid) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(session)
    }

    async fn insert_event(&self, event: &NewEvent) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO events ({EVENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, \
             $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, NULL)"
        ))
        .bind(event.id.to_string())
        .bind(event.website_id.to_string())
        .bind(event.session_id.to_string())
        .bind(event.visit_id.to_string())
        .bind(event.created_at)
        .bind(event.event_type.as_i32())
        .bind(&event.url_path)
        .bind(&event.url_query)
        .bind(&event.hostname)
        .bind(&event.referrer_path)
        .bind(&event.referrer_query)
        .bind(&event.referrer_domain)
        .bind(&event.page_title)
        .bind(&event.event_name)
        .bind(&event.tag)
        .bind(&event.properties)
        .bind(&event.utm.source)
        .bind(&event.utm.medium)
        .bind(&event.utm.campaign)
        .bind(&event.utm.term)
        .bind(&event.utm.content)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn set_event_goal(&self, event_id: &Uuid, goal_id: &str) -> Result<()> {
        sqlx::query("UPDATE events SET goal_id = $1 WHERE id = $2")
            .bind(goal_id)
            .bind(event_id.to_string())
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn get_event(&self, id: &Uuid) -> Result<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(event)
    }

    async fn count_events(&self, website_id: &Uuid) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM events WHERE website_id = $1")
                .bind(website_id.to_string())
                .fetch_one(self.pool.as_ref())
                .await?;

        Ok(count)
    }

    async fn idempotency_key_exists(&self, event_id: &Uuid, website_id: &Uuid) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM idempotency_keys WHERE event_id = $1 AND website_id = $2)",
        )
        .bind(event_id.to_string())
        .bind(website_id.to_string())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(exists)
    }

    async fn record_idempotency_key(&self, event_id: &Uuid, website_id: &Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (event_id, website_id, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id, website_id) DO NOTHING
            "#,
        )
        .bind(event_id.to_string())
        .bind(website_id.to_string())
        .bind(now_secs())
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create_goal(&self, website_id: &Uuid, kind: GoalKind, target: &str) -> Result<Goal> {
        let goal = sqlx::query_as::<_, Goal>(
            r#"
            INSERT INTO goals (id, website_id, kind, target, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, website_id, kind, target, created_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(website_id.to_string())
        .bind(kind.as_str())
        .bind(target)
        .bind(now_secs())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(goal)
    }

    async fn delete_goal(&self, goal_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM goals WHERE id = $1")
            .bind(goal_id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn goals_for_website(&self, website_id: &Uuid) -> Result<Vec<Goal>> {
        let goals = sqlx::query_as::<_, Goal>(
            r#"
            SELECT id, website_id, kind, target, created_at
            FROM goals
            WHERE website_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(website_id.to_string())
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(goals)
    }

    async fn goal_completion_exists(&self, goal_id: &str, session_id: &Uuid) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM goal_completions WHERE goal_id = $1 AND session_id = $2)",
        )
        .bind(goal_id)
        .bind(session_id.to_string())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(exists)
    }

    async fn insert_goal_completion(&self, completion: &NewGoalCompletion) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO goal_completions (id, goal_id, session_id, event_id, website_id, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (goal_id, session_id) DO NOTHING
            "#,
        )
        .bind(completion.id.to_string())
        .bind(&completion.goal_id)
        .bind(completion.session_id.to_string())
        .bind(completion.event_id.to_string())
        .bind(completion.website_id.to_string())
        .bind(completion.completed_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_goal_completions(&self, goal_id: &str) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM goal_completions WHERE goal_id = $1")
                .bind(goal_id)
                .fetch_one(self.pool.as_ref())
                .await?;

        Ok(count)
    }
}
