//! Realtime wire record.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::EventType;

/// Projection of a stored event pushed to live dashboards.
///
/// Fields are added over time; consumers ignore what they don't know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub website_id: String,
    pub session_id: String,
    pub visit_id: String,
    pub path: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Unix seconds
    pub created_at: i64,
}

impl EventEnvelope {
    pub fn new(
        event_type: EventType,
        website_id: &Uuid,
        session_id: &Uuid,
        visit_id: &Uuid,
        path: &str,
        title: Option<&str>,
        created_at: i64,
    ) -> Self {
        Self {
            kind: event_type.as_str().to_string(),
            website_id: website_id.to_string(),
            session_id: session_id.to_string(),
            visit_id: visit_id.to_string(),
            path: path.to_string(),
            title: title.map(str::to_string),
            created_at,
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Bytes> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}
