//! Conversion goal matching.
//!
//! Goals are evaluated in the order the goal source returns them and the first
//! exact match wins. Completions are deduplicated per (goal, session) by the
//! storage layer's insert-or-ignore, so concurrent matches in one session
//! still produce a single row.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{EventType, Goal, GoalKind, NewGoalCompletion};
use crate::storage::Storage;

use super::collaborators::GoalSource;

/// The event being matched
#[derive(Debug, Clone)]
pub struct GoalCandidate<'a> {
    pub website_id: Uuid,
    pub session_id: Uuid,
    pub event_id: Uuid,
    pub event_type: EventType,
    pub path: &'a str,
    pub name: Option<&'a str>,
    pub at: DateTime<Utc>,
}

/// First goal whose kind fits the event and whose target equals the path
/// (page views) or the event name (custom events)
pub fn first_match<'g>(
    goals: &'g [Goal],
    event_type: EventType,
    path: &str,
    name: Option<&str>,
) -> Option<&'g Goal> {
    goals.iter().find(|goal| match (goal.kind(), event_type) {
        (Some(GoalKind::PageView), EventType::Pageview) => goal.target == path,
        (Some(GoalKind::CustomEvent), EventType::Custom) => name == Some(goal.target.as_str()),
        _ => false,
    })
}

#[derive(Clone)]
pub struct GoalMatcher {
    goals: Arc<dyn GoalSource>,
    storage: Arc<dyn Storage>,
}

impl GoalMatcher {
    pub fn new(goals: Arc<dyn GoalSource>, storage: Arc<dyn Storage>) -> Self {
        Self { goals, storage }
    }

    /// Returns the matched goal id, whether or not this event was the
    /// session's first completion. Any bookkeeping failure yields `None`.
    pub async fn evaluate(&self, candidate: &GoalCandidate<'_>) -> Option<String> {
        let goals = match self.goals.goals_for_website(&candidate.website_id).await {
            Ok(goals) => goals,
            Err(e) => {
                warn!(website_id = %candidate.website_id, error = %e, "failed to load goals");
                return None;
            }
        };

        let goal = first_match(&goals, candidate.event_type, candidate.path, candidate.name)?;

        match self
            .storage
            .goal_completion_exists(&goal.id, &candidate.session_id)
            .await
        {
            Ok(true) => {
                debug!(goal_id = %goal.id, session_id = %candidate.session_id, "goal already completed in session");
            }
            Ok(false) => {
                let completion = NewGoalCompletion {
                    id: Uuid::new_v4(),
                    goal_id: goal.id.clone(),
                    session_id: candidate.session_id,
                    event_id: candidate.event_id,
                    website_id: candidate.website_id,
                    completed_at: candidate.at.timestamp(),
                };

                match self.storage.insert_goal_completion(&completion).await {
                    Ok(inserted) => {
                        debug!(goal_id = %goal.id, session_id = %candidate.session_id, inserted, "goal completion");
                    }
                    Err(e) => {
                        warn!(goal_id = %goal.id, error = %e, "failed to record goal completion");
                        return None;
                    }
                }
            }
            Err(e) => {
                warn!(goal_id = %goal.id, error = %e, "goal completion lookup failed");
                return None;
            }
        }

        Some(goal.id.clone())
    }
}
