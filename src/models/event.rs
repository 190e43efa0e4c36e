use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Pageview,
    Custom,
}

impl EventType {
    pub const fn as_i32(self) -> i32 {
        match self {
            EventType::Pageview => 1,
            EventType::Custom => 2,
        }
    }

    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(EventType::Pageview),
            2 => Some(EventType::Custom),
            _ => None,
        }
    }

    /// Name used in the realtime envelope
    pub const fn as_str(self) -> &'static str {
        match self {
            EventType::Pageview => "pageview",
            EventType::Custom => "event",
        }
    }
}

/// Stored event row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: String,
    pub website_id: String,
    pub session_id: String,
    pub visit_id: String,
    pub created_at: i64,
    pub event_type: i32,
    pub url_path: String,
    pub url_query: Option<String>,
    pub hostname: Option<String>,
    pub referrer_path: Option<String>,
    pub referrer_query: Option<String>,
    pub referrer_domain: Option<String>,
    pub page_title: Option<String>,
    pub event_name: Option<String>,
    pub tag: Option<String>,
    pub properties: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_term: Option<String>,
    pub utm_content: Option<String>,
    pub goal_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utm {
    pub source: Option<String>,
    pub medium: Option<String>,
    pub campaign: Option<String>,
    pub term: Option<String>,
    pub content: Option<String>,
}

impl Utm {
    /// Fill fields the caller left empty from `other`
    pub fn or(self, other: Utm) -> Utm {
        Utm {
            source: self.source.or(other.source),
            medium: self.medium.or(other.medium),
            campaign: self.campaign.or(other.campaign),
            term: self.term.or(other.term),
            content: self.content.or(other.content),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub id: Uuid,
    pub website_id: Uuid,
    pub session_id: Uuid,
    pub visit_id: Uuid,
    pub created_at: i64,
    pub event_type: EventType,
    pub url_path: String,
    pub url_query: Option<String>,
    pub hostname: Option<String>,
    pub referrer_path: Option<String>,
    pub referrer_query: Option<String>,
    pub referrer_domain: Option<String>,
    pub page_title: Option<String>,
    pub event_name: Option<String>,
    pub tag: Option<String>,
    pub properties: Option<String>,
    pub utm: Utm,
}
