use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub website_id: String,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device: Option<String>,
    pub screen: Option<String>,
    pub language: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub distinct_id: Option<String>,
    pub entry_page: Option<String>,
    pub exit_page: Option<String>,
    pub created_at: i64,
}

/// Values written by a session upsert.
///
/// `page` becomes both `entry_page` and `exit_page` on insert; on conflict only
/// `exit_page` is replaced.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub id: Uuid,
    pub website_id: Uuid,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device: Option<String>,
    pub screen: Option<String>,
    pub language: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub distinct_id: Option<String>,
    pub page: Option<String>,
    pub created_at: i64,
}
