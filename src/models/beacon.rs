//! Inbound tracking payloads.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BeaconKind {
    /// Pageview or custom event
    #[default]
    Event,
    /// Attach a caller-supplied identity to the session; writes no event
    Identify,
}

/// Body of `POST /api/send`
#[derive(Debug, Clone, Deserialize)]
pub struct Beacon {
    #[serde(rename = "type", default)]
    pub kind: BeaconKind,
    pub payload: BeaconPayload,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BeaconPayload {
    /// Website id (UUID)
    pub website: String,
    #[serde(default)]
    pub hostname: Option<String>,
    /// Absolute URL or path plus query
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// `WIDTHxHEIGHT`
    #[serde(default)]
    pub screen: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Custom event name; its presence makes the event a custom event
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// Client-supplied event id used for idempotent retries
    #[serde(default)]
    pub id: Option<String>,
    /// Explicit session token pinned by server-side SDKs
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub distinct_id: Option<String>,
    /// Unix seconds; defaults to receipt time
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub utm_source: Option<String>,
    #[serde(default)]
    pub utm_medium: Option<String>,
    #[serde(default)]
    pub utm_campaign: Option<String>,
    #[serde(default)]
    pub utm_term: Option<String>,
    #[serde(default)]
    pub utm_content: Option<String>,
}

impl Beacon {
    pub fn event(payload: BeaconPayload) -> Self {
        Self {
            kind: BeaconKind::Event,
            payload,
        }
    }

    pub fn identify(payload: BeaconPayload) -> Self {
        Self {
            kind: BeaconKind::Identify,
            payload,
        }
    }
}
