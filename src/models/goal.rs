use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalKind {
    PageView,
    CustomEvent,
}

impl GoalKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            GoalKind::PageView => "page_view",
            GoalKind::CustomEvent => "custom_event",
        }
    }
}

impl fmt::Display for GoalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GoalKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "page_view" | "pageview" => Ok(GoalKind::PageView),
            "custom_event" | "event" => Ok(GoalKind::CustomEvent),
            other => Err(anyhow::anyhow!("unknown goal kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Goal {
    pub id: String,
    pub website_id: String,
    pub kind: String,
    /// Exact URL path (page_view) or exact event name (custom_event)
    pub target: String,
    pub created_at: i64,
}

impl Goal {
    /// Rows with an unrecognised kind never match anything
    pub fn kind(&self) -> Option<GoalKind> {
        self.kind.parse().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GoalCompletion {
    pub id: String,
    pub goal_id: String,
    pub session_id: String,
    pub event_id: String,
    pub website_id: String,
    pub completed_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewGoalCompletion {
    pub id: Uuid,
    pub goal_id: String,
    pub session_id: Uuid,
    pub event_id: Uuid,
    pub website_id: Uuid,
    pub completed_at: i64,
}
