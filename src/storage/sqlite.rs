use crate::models::{Event, Goal, GoalKind, NewEvent, NewGoalCompletion, NewSession, Session, Website};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, website_id, browser, os, device, screen, language, country, \
     region, city, distinct_id, entry_page, exit_page, created_at";

const EVENT_COLUMNS: &str = "id, website_id, session_id, visit_id, created_at, event_type, \
     url_path, url_query, hostname, referrer_path, referrer_query, referrer_domain, page_title, \
     event_name, tag, properties, utm_source, utm_medium, utm_campaign, utm_term, utm_content, \
     goal_id";

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        // Each connection to `:memory:` opens its own empty database
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            max_connections
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS websites (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                domain TEXT,
                created_at INTEGER NOT NULL
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
                created_at INTEGER NOT NULL
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
                created_at INTEGER NOT NULL,
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
                created_at INTEGER NOT NULL,
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
                created_at INTEGER NOT NULL
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
                completed_at INTEGER NOT NULL,
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
        let created_at = now_secs();

        let result = sqlx::query(
            r#"
            INSERT INTO websites (id, name, domain, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(id.to_string())
        .bind(name)
        .bind(domain)
        .bind(created_at)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        Ok(Website {
            id: id.to_string(),
            name: name.to_string(),
            domain: domain.map(str::to_string),
            created_at,
        })
    }

    async fn get_website(&self, id: &Uuid) -> Result<Option<Website>> {
        let website = sqlx::query_as::<_, Website>(
            "SELECT id, name, domain, created_at FROM websites WHERE id = ?",
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
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                entry_page = COALESCE(sessions.entry_page, excluded.entry_page),
                exit_page = excluded.exit_page
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
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                distinct_id = COALESCE(excluded.distinct_id, sessions.distinct_id)
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
        .bind(&session.page)
        .bind(session.created_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn get_session(&self, id: &Uuid) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(session)
    }

    async fn insert_event(&self, event: &NewEvent) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO events ({EVENT_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)"
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
        sqlx::query("UPDATE events SET goal_id = ? WHERE id = ?")
            .bind(goal_id)
            .bind(event_id.to_string())
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn get_event(&self, id: &Uuid) -> Result<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(event)
    }

    async fn count_events(&self, website_id: &Uuid) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM events WHERE website_id = ?")
            .bind(website_id.to_string())
            .fetch_one(self.pool.as_ref())
            .await?;

        Ok(count)
    }

    async fn idempotency_key_exists(&self, event_id: &Uuid, website_id: &Uuid) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM idempotency_keys WHERE event_id = ? AND website_id = ?",
        )
        .bind(event_id.to_string())
        .bind(website_id.to_string())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count > 0)
    }

    async fn record_idempotency_key(&self, event_id: &Uuid, website_id: &Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (event_id, website_id, created_at)
            VALUES (?, ?, ?)
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
        let goal = Goal {
            id: Uuid::new_v4().to_string(),
            website_id: website_id.to_string(),
            kind: kind.as_str().to_string(),
            target: target.to_string(),
            created_at: now_secs(),
        };

        sqlx::query(
            "INSERT INTO goals (id, website_id, kind, target, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&goal.id)
        .bind(&goal.website_id)
        .bind(&goal.kind)
        .bind(&goal.target)
        .bind(goal.created_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(goal)
    }

    async fn delete_goal(&self, goal_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM goals WHERE id = ?")
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
            WHERE website_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(website_id.to_string())
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(goals)
    }

    async fn goal_completion_exists(&self, goal_id: &str, session_id: &Uuid) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM goal_completions WHERE goal_id = ? AND session_id = ?",
        )
        .bind(goal_id)
        .bind(session_id.to_string())
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count > 0)
    }

    async fn insert_goal_completion(&self, completion: &NewGoalCompletion) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO goal_completions (id, goal_id, session_id, event_id, website_id, completed_at)
            VALUES (?, ?, ?, ?, ?, ?)
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
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM goal_completions WHERE goal_id = ?")
                .bind(goal_id)
                .fetch_one(self.pool.as_ref())
                .await?;

        Ok(count)
    }
}
