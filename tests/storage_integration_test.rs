//! Storage invariants, exercised against every backend.
//!
//! Tests can be filtered by database backend using the DATABASE_BACKEND environment variable:
//! - `DATABASE_BACKEND=sqlite cargo test` - Run only SQLite tests
//! - `DATABASE_BACKEND=postgres cargo test` - Run only PostgreSQL tests (needs DATABASE_URL)
//! - By default, both backends are tested

use chrono::Utc;
use pulse::models::{EventType, GoalKind, NewEvent, NewGoalCompletion, NewSession, Utm};
use pulse::storage::{PostgresStorage, SqliteStorage, Storage, StorageError};
use std::sync::Arc;
use uuid::Uuid;

fn should_test_backend(backend: &str) -> bool {
    match std::env::var("DATABASE_BACKEND") {
        Ok(val) => val.to_lowercase() == backend.to_lowercase(),
        Err(_) => true,
    }
}

async fn create_sqlite_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 5).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

async fn create_postgres_storage() -> Option<Arc<dyn Storage>> {
    let db_url = std::env::var("DATABASE_URL").ok()?;
    if !db_url.starts_with("postgres") {
        return None;
    }
    let storage = PostgresStorage::new(&db_url, 5).await.ok()?;
    storage.init().await.ok()?;
    Some(Arc::new(storage))
}

async fn backends() -> Vec<(&'static str, Arc<dyn Storage>)> {
    let mut backends = Vec::new();
    if should_test_backend("sqlite") {
        backends.push(("sqlite", create_sqlite_storage().await));
    }
    if should_test_backend("postgres") {
        match create_postgres_storage().await {
            Some(storage) => backends.push(("postgres", storage)),
            None => println!("SKIPPED postgres: DATABASE_URL not set"),
        }
    }
    backends
}

fn session(id: Uuid, website_id: Uuid, page: Option<&str>) -> NewSession {
    NewSession {
        id,
        website_id,
        browser: Some("Firefox".to_string()),
        page: page.map(str::to_string),
        created_at: Utc::now().timestamp(),
        ..Default::default()
    }
}

fn event(website_id: Uuid, session_id: Uuid, path: &str) -> NewEvent {
    NewEvent {
        id: Uuid::new_v4(),
        website_id,
        session_id,
        visit_id: Uuid::new_v4(),
        created_at: Utc::now().timestamp(),
        event_type: EventType::Pageview,
        url_path: path.to_string(),
        url_query: None,
        hostname: Some("example.com".to_string()),
        referrer_path: None,
        referrer_query: None,
        referrer_domain: None,
        page_title: None,
        event_name: None,
        tag: None,
        properties: Some(r#"{"plan":"pro"}"#.to_string()),
        utm: Utm {
            source: Some("news".to_string()),
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn test_entry_page_set_once_exit_page_follows() {
    for (backend, storage) in backends().await {
        let website = Uuid::new_v4();
        let id = Uuid::new_v4();

        storage.upsert_session(&session(id, website, Some("/a"))).await.unwrap();
        let mut second = session(id, website, Some("/b"));
        second.browser = Some("Chrome".to_string());
        storage.upsert_session(&second).await.unwrap();

        let stored = storage.get_session(&id).await.unwrap().unwrap();
        assert_eq!(stored.entry_page.as_deref(), Some("/a"), "{backend}");
        assert_eq!(stored.exit_page.as_deref(), Some("/b"), "{backend}");
        assert_eq!(stored.browser.as_deref(), Some("Firefox"), "{backend}");
    }
}

#[tokio::test]
async fn test_identify_then_pageview_fills_entry_page() {
    for (backend, storage) in backends().await {
        let website = Uuid::new_v4();
        let id = Uuid::new_v4();

        let mut identify = session(id, website, None);
        identify.distinct_id = Some("user-1".to_string());
        storage.identify_session(&identify).await.unwrap();
        storage.upsert_session(&session(id, website, Some("/landing"))).await.unwrap();
        storage.upsert_session(&session(id, website, Some("/next"))).await.unwrap();

        // A later identify without a distinct id keeps the existing one
        storage.identify_session(&session(id, website, None)).await.unwrap();

        let stored = storage.get_session(&id).await.unwrap().unwrap();
        assert_eq!(stored.entry_page.as_deref(), Some("/landing"), "{backend}");
        assert_eq!(stored.exit_page.as_deref(), Some("/next"), "{backend}");
        assert_eq!(stored.distinct_id.as_deref(), Some("user-1"), "{backend}");
    }
}

#[tokio::test]
async fn test_event_round_trip_and_goal_tag() {
    for (backend, storage) in backends().await {
        let website = Uuid::new_v4();
        let new_event = event(website, Uuid::new_v4(), "/pricing");

        storage.insert_event(&new_event).await.unwrap();
        storage.set_event_goal(&new_event.id, "goal-1").await.unwrap();

        let stored = storage.get_event(&new_event.id).await.unwrap().unwrap();
        assert_eq!(stored.url_path, "/pricing", "{backend}");
        assert_eq!(stored.utm_source.as_deref(), Some("news"), "{backend}");
        assert_eq!(stored.properties.as_deref(), Some(r#"{"plan":"pro"}"#), "{backend}");
        assert_eq!(stored.goal_id.as_deref(), Some("goal-1"), "{backend}");
        assert_eq!(storage.count_events(&website).await.unwrap(), 1, "{backend}");
    }
}

#[tokio::test]
async fn test_idempotency_keys() {
    for (backend, storage) in backends().await {
        let website = Uuid::new_v4();
        let event_id = Uuid::new_v4();

        assert!(!storage.idempotency_key_exists(&event_id, &website).await.unwrap());
        storage.record_idempotency_key(&event_id, &website).await.unwrap();
        storage.record_idempotency_key(&event_id, &website).await.unwrap();

        assert!(storage.idempotency_key_exists(&event_id, &website).await.unwrap(), "{backend}");
        assert!(
            !storage.idempotency_key_exists(&event_id, &Uuid::new_v4()).await.unwrap(),
            "{backend}"
        );
    }
}

#[tokio::test]
async fn test_concurrent_goal_completions_insert_once() {
    for (backend, storage) in backends().await {
        let website = Uuid::new_v4();
        let goal = storage
            .create_goal(&website, GoalKind::PageView, "/signup")
            .await
            .unwrap();
        let session_id = Uuid::new_v4();

        let mut handles = vec![];
        for _ in 0..10 {
            let storage = Arc::clone(&storage);
            let completion = NewGoalCompletion {
                id: Uuid::new_v4(),
                goal_id: goal.id.clone(),
                session_id,
                event_id: Uuid::new_v4(),
                website_id: website,
                completed_at: Utc::now().timestamp(),
            };
            handles.push(tokio::spawn(async move {
                storage.insert_goal_completion(&completion).await
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1, "{backend}");
        assert_eq!(storage.count_goal_completions(&goal.id).await.unwrap(), 1, "{backend}");
        assert!(storage.goal_completion_exists(&goal.id, &session_id).await.unwrap());
    }
}

#[tokio::test]
async fn test_goals_listing_and_deletion() {
    for (backend, storage) in backends().await {
        let website = Uuid::new_v4();
        let first = storage.create_goal(&website, GoalKind::PageView, "/a").await.unwrap();
        let second = storage
            .create_goal(&website, GoalKind::CustomEvent, "signup")
            .await
            .unwrap();
        storage.create_goal(&Uuid::new_v4(), GoalKind::PageView, "/a").await.unwrap();

        let goals = storage.goals_for_website(&website).await.unwrap();
        let ids: Vec<_> = goals.iter().map(|g| g.id.clone()).collect();
        assert_eq!(ids.len(), 2, "{backend}");
        assert!(ids.contains(&first.id) && ids.contains(&second.id), "{backend}");

        // Order is stable across reads
        let again: Vec<_> = storage
            .goals_for_website(&website)
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.id)
            .collect();
        assert_eq!(ids, again, "{backend}");

        assert!(storage.delete_goal(&first.id).await.unwrap(), "{backend}");
        assert!(!storage.delete_goal(&first.id).await.unwrap(), "{backend}");
        assert_eq!(storage.goals_for_website(&website).await.unwrap().len(), 1, "{backend}");
    }
}

#[tokio::test]
async fn test_duplicate_website_conflicts() {
    for (backend, storage) in backends().await {
        let id = Uuid::new_v4();
        let website = storage.create_website(&id, "Docs", Some("docs.example.com")).await.unwrap();
        assert_eq!(website.domain.as_deref(), Some("docs.example.com"), "{backend}");

        assert!(matches!(
            storage.create_website(&id, "Docs again", None).await,
            Err(StorageError::Conflict)
        ));

        let stored = storage.get_website(&id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Docs", "{backend}");
        assert!(storage.get_website(&Uuid::new_v4()).await.unwrap().is_none());
    }
}
