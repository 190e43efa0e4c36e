//! Beacon ingestion pipeline.
//!
//! validate -> filter -> resolve identity -> idempotency check -> session
//! upsert -> event insert -> goal matching -> realtime publish.
//!
//! The session and event writes are never abandoned once started. Goal
//! matching and publishing run only while the request deadline allows.

use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::TrackingConfig;
use crate::models::{Beacon, BeaconKind, BeaconPayload, EventType, NewEvent, NewSession, Utm};
use crate::realtime::{EventEnvelope, Publisher};
use crate::storage::Storage;

use super::client_ip::anonymize_ip;
use super::collaborators::{
    BotScorer, GeoLocator, GoalSource, NoGeoLocator, OriginValidator, UserAgentBotScorer,
    WebsiteOriginValidator,
};
use super::enrichment::UserAgentEnricher;
use super::filter::{self, DropReason};
use super::goals::{GoalCandidate, GoalMatcher};
use super::idempotency::IdempotencyGuard;
use super::identity::{Fingerprint, IdentityResolver};
use super::limits::{
    clean_field, MAX_EVENT_NAME_LEN, MAX_FUTURE_SKEW_SECS, MAX_PROPERTIES_BYTES,
    MAX_SHORT_FIELD_LEN, MAX_TAG_LEN, MAX_TITLE_LEN, MAX_URL_LEN,
};
use super::normalize::{normalize_referrer, normalize_url, utm_from_query};

/// Who sent the beacon
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub ip: IpAddr,
    pub user_agent: String,
    pub origin: Option<String>,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid website id")]
    InvalidWebsiteId,
    #[error("origin not allowed for this website")]
    OriginNotAllowed,
    #[error("{field} exceeds {max} characters")]
    UrlTooLong { field: &'static str, max: usize },
    #[error("invalid event id")]
    InvalidEventId,
    #[error("event data exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("storage failure: {0}")]
    Storage(#[source] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub session_id: Uuid,
    /// Absent for identify beacons
    pub visit_id: Option<Uuid>,
    /// Id of the stored event; absent for identify and duplicate beacons
    pub event_id: Option<Uuid>,
    pub goal_id: Option<String>,
    /// The client event id was already processed; nothing was written
    pub idempotent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted(Accepted),
    /// Acknowledged to the client, but nothing stored or published
    Dropped(DropReason),
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub remove_trailing_slash: bool,
    pub ignore_bots: bool,
    pub timeout: Duration,
    /// Truncate the client IP before geolocation. Identity always uses the full address.
    pub anonymize_ip: bool,
}

impl From<&TrackingConfig> for IngestSettings {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            remove_trailing_slash: config.remove_trailing_slash,
            ignore_bots: config.ignore_bots,
            timeout: config.ingest_timeout(),
            anonymize_ip: false,
        }
    }
}

pub struct Ingestor {
    storage: Arc<dyn Storage>,
    identity: IdentityResolver,
    idempotency: IdempotencyGuard,
    goals: GoalMatcher,
    bots: Arc<dyn BotScorer>,
    origins: Arc<dyn OriginValidator>,
    geo: Arc<dyn GeoLocator>,
    enricher: UserAgentEnricher,
    publisher: Publisher,
    settings: IngestSettings,
}

impl Ingestor {
    /// Pipeline with the default collaborators: User-Agent bot scoring,
    /// website-domain origin checks and no geolocation
    pub fn new(
        storage: Arc<dyn Storage>,
        goal_source: Arc<dyn GoalSource>,
        publisher: Publisher,
        config: &TrackingConfig,
    ) -> Self {
        Self {
            identity: IdentityResolver::new(config.app_secret.clone()),
            idempotency: IdempotencyGuard::new(Arc::clone(&storage)),
            goals: GoalMatcher::new(goal_source, Arc::clone(&storage)),
            bots: Arc::new(UserAgentBotScorer::new()),
            origins: Arc::new(WebsiteOriginValidator::new(Arc::clone(&storage))),
            geo: Arc::new(NoGeoLocator),
            enricher: UserAgentEnricher::new(),
            publisher,
            settings: IngestSettings::from(config),
            storage,
        }
    }

    pub fn with_bot_scorer(mut self, bots: Arc<dyn BotScorer>) -> Self {
        self.bots = bots;
        self
    }

    pub fn with_origin_validator(mut self, origins: Arc<dyn OriginValidator>) -> Self {
        self.origins = origins;
        self
    }

    pub fn with_geo_locator(mut self, geo: Arc<dyn GeoLocator>) -> Self {
        self.geo = geo;
        self
    }

    pub fn with_ip_anonymization(mut self, anonymize: bool) -> Self {
        self.settings.anonymize_ip = anonymize;
        self
    }

    pub async fn ingest(
        &self,
        beacon: Beacon,
        client: ClientContext,
    ) -> Result<IngestOutcome, IngestError> {
        let deadline = Instant::now() + self.settings.timeout;
        let payload = beacon.payload;

        let website_id =
            Uuid::parse_str(payload.website.trim()).map_err(|_| IngestError::InvalidWebsiteId)?;

        // Fail closed: an unreachable validator rejects the beacon
        match self
            .origins
            .validate(&website_id, client.origin.as_deref())
            .await
        {
            Ok(true) => {}
            Ok(false) => return Err(IngestError::OriginNotAllowed),
            Err(e) => {
                warn!(website_id = %website_id, error = %e, "origin validation failed");
                return Err(IngestError::OriginNotAllowed);
            }
        }

        check_len("url", payload.url.as_deref())?;
        check_len("referrer", payload.referrer.as_deref())?;

        let client_event_id = match payload.id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(Uuid::parse_str(raw).map_err(|_| IngestError::InvalidEventId)?),
            None => None,
        };

        let properties = match &payload.data {
            Some(data) if !data.is_null() => {
                let encoded = data.to_string();
                if encoded.len() > MAX_PROPERTIES_BYTES {
                    return Err(IngestError::PayloadTooLarge(MAX_PROPERTIES_BYTES));
                }
                Some(encoded)
            }
            _ => None,
        };

        let at = event_time(payload.timestamp);
        let page = normalize_url(
            payload.url.as_deref(),
            payload.hostname.as_deref(),
            self.settings.remove_trailing_slash,
        );
        let referrer = normalize_referrer(payload.referrer.as_deref(), page.hostname.as_deref());

        if let Some(referrer) = &referrer {
            if filter::is_spam_referrer(&referrer.domain) {
                debug!(website_id = %website_id, referrer = %referrer.domain, "spam referrer dropped");
                return Ok(IngestOutcome::Dropped(DropReason::SpamReferrer));
            }
        }

        if self.settings.ignore_bots
            && filter::is_bot(self.bots.as_ref(), client.ip, &client.user_agent).await
        {
            return Ok(IngestOutcome::Dropped(DropReason::Bot));
        }

        let fingerprint = Fingerprint {
            ip: client.ip,
            user_agent: client.user_agent.clone(),
        };
        let identity =
            self.identity
                .resolve(&website_id, &fingerprint, at, payload.session_id.as_deref());

        if self
            .idempotency
            .seen(client_event_id.as_ref(), &website_id)
            .await
        {
            let visit_id = match beacon.kind {
                BeaconKind::Identify => None,
                BeaconKind::Event => Some(identity.visit_id),
            };
            return Ok(IngestOutcome::Accepted(Accepted {
                session_id: identity.session_id,
                visit_id,
                event_id: None,
                goal_id: None,
                idempotent: true,
            }));
        }

        let mut session = self.new_session(&payload, &client, website_id, identity.session_id, at);

        if beacon.kind == BeaconKind::Identify {
            self.storage
                .identify_session(&session)
                .await
                .map_err(IngestError::Storage)?;
            self.idempotency
                .record(client_event_id.as_ref(), &website_id)
                .await;

            return Ok(IngestOutcome::Accepted(Accepted {
                session_id: identity.session_id,
                visit_id: None,
                event_id: None,
                goal_id: None,
                idempotent: false,
            }));
        }

        session.page = Some(page.path.clone());
        self.storage
            .upsert_session(&session)
            .await
            .map_err(IngestError::Storage)?;

        let event_name = clean_field(payload.name.as_deref(), MAX_EVENT_NAME_LEN);
        let event_type = if event_name.is_some() {
            EventType::Custom
        } else {
            EventType::Pageview
        };
        let page_title = clean_field(payload.title.as_deref(), MAX_TITLE_LEN);

        let explicit_utm = Utm {
            source: clean_field(payload.utm_source.as_deref(), MAX_SHORT_FIELD_LEN),
            medium: clean_field(payload.utm_medium.as_deref(), MAX_SHORT_FIELD_LEN),
            campaign: clean_field(payload.utm_campaign.as_deref(), MAX_SHORT_FIELD_LEN),
            term: clean_field(payload.utm_term.as_deref(), MAX_SHORT_FIELD_LEN),
            content: clean_field(payload.utm_content.as_deref(), MAX_SHORT_FIELD_LEN),
        };

        let (referrer_path, referrer_query, referrer_domain) = match referrer {
            Some(r) => (r.path, r.query, Some(r.domain)),
            None => (None, None, None),
        };

        let event = NewEvent {
            id: Uuid::new_v4(),
            website_id,
            session_id: identity.session_id,
            visit_id: identity.visit_id,
            created_at: at.timestamp(),
            event_type,
            utm: explicit_utm.or(utm_from_query(page.query.as_deref())),
            url_path: page.path,
            url_query: page.query,
            hostname: page.hostname,
            referrer_path,
            referrer_query,
            referrer_domain,
            page_title,
            event_name,
            tag: clean_field(payload.tag.as_deref(), MAX_TAG_LEN),
            properties,
        };

        self.storage
            .insert_event(&event)
            .await
            .map_err(IngestError::Storage)?;
        self.idempotency
            .record(client_event_id.as_ref(), &website_id)
            .await;

        let goal_id = self.follow_up(&event, at, deadline).await;

        Ok(IngestOutcome::Accepted(Accepted {
            session_id: identity.session_id,
            visit_id: Some(identity.visit_id),
            event_id: Some(event.id),
            goal_id,
            idempotent: false,
        }))
    }

    /// Goal matching and realtime emission, skipped once the deadline passes
    async fn follow_up(
        &self,
        event: &NewEvent,
        at: DateTime<Utc>,
        deadline: Instant,
    ) -> Option<String> {
        if Instant::now() >= deadline {
            warn!(event_id = %event.id, "ingest deadline exceeded, skipping goals and realtime");
            return None;
        }

        let candidate = GoalCandidate {
            website_id: event.website_id,
            session_id: event.session_id,
            event_id: event.id,
            event_type: event.event_type,
            path: &event.url_path,
            name: event.event_name.as_deref(),
            at,
        };

        let matched = timeout_at(deadline, async {
            let goal_id = self.goals.evaluate(&candidate).await?;
            if let Err(e) = self.storage.set_event_goal(&event.id, &goal_id).await {
                warn!(event_id = %event.id, goal_id = %goal_id, error = %e, "failed to tag event with goal");
            }
            Some(goal_id)
        })
        .await;

        let goal_id = match matched {
            Ok(goal_id) => goal_id,
            Err(_) => {
                warn!(event_id = %event.id, "ingest deadline exceeded during goal matching");
                return None;
            }
        };

        if Instant::now() < deadline {
            self.publisher.publish(EventEnvelope::new(
                event.event_type,
                &event.website_id,
                &event.session_id,
                &event.visit_id,
                &event.url_path,
                event.page_title.as_deref(),
                event.created_at,
            ));
        }

        goal_id
    }

    fn new_session(
        &self,
        payload: &BeaconPayload,
        client: &ClientContext,
        website_id: Uuid,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> NewSession {
        let screen = clean_field(payload.screen.as_deref(), MAX_SHORT_FIELD_LEN);
        let device = self.enricher.enrich(&client.user_agent, screen.as_deref());
        let geo_ip = if self.settings.anonymize_ip {
            anonymize_ip(client.ip)
        } else {
            client.ip
        };
        let location = self.geo.locate(geo_ip);

        NewSession {
            id: session_id,
            website_id,
            browser: device.browser,
            os: device.os,
            device: device.device,
            screen,
            language: clean_field(payload.language.as_deref(), MAX_SHORT_FIELD_LEN),
            country: location.country,
            region: location.region,
            city: location.city,
            distinct_id: clean_field(payload.distinct_id.as_deref(), MAX_SHORT_FIELD_LEN),
            page: None,
            created_at: at.timestamp(),
        }
    }
}

fn check_len(field: &'static str, value: Option<&str>) -> Result<(), IngestError> {
    match value {
        Some(v) if v.chars().count() > MAX_URL_LEN => Err(IngestError::UrlTooLong {
            field,
            max: MAX_URL_LEN,
        }),
        _ => Ok(()),
    }
}

/// Client timestamp when positive and no more than a day ahead of receipt,
/// receipt time otherwise
fn event_time(timestamp: Option<i64>) -> DateTime<Utc> {
    let now = Utc::now();
    timestamp
        .filter(|ts| *ts > 0 && *ts <= now.timestamp() + MAX_FUTURE_SKEW_SECS)
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingConfig;
    use crate::realtime::{MemoryPubSub, PubSub, REALTIME_CHANNEL};
    use crate::storage::{CachedStorage, SqliteStorage};

    struct Harness {
        ingestor: Ingestor,
        storage: Arc<dyn Storage>,
        pubsub: Arc<MemoryPubSub>,
        website_id: Uuid,
    }

    async fn harness() -> Harness {
        let sqlite = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        sqlite.init().await.unwrap();
        let storage: Arc<dyn Storage> = Arc::new(sqlite);
        let website_id = Uuid::new_v4();
        storage
            .create_website(&website_id, "Example", Some("example.com"))
            .await
            .unwrap();

        let cached = Arc::new(CachedStorage::new(Arc::clone(&storage), 100, 60));
        let pubsub = Arc::new(MemoryPubSub::new());
        let config = TrackingConfig {
            app_secret: "test-secret".to_string(),
            ..TrackingConfig::default()
        };
        let ingestor = Ingestor::new(
            Arc::clone(&storage),
            cached,
            Publisher::new(pubsub.clone()),
            &config,
        );

        Harness {
            ingestor,
            storage,
            pubsub,
            website_id,
        }
    }

    fn client() -> ClientContext {
        ClientContext {
            ip: "203.0.113.10".parse().unwrap(),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            origin: Some("https://example.com".to_string()),
        }
    }

    fn pageview(website_id: &Uuid, url: &str) -> Beacon {
        Beacon::event(BeaconPayload {
            website: website_id.to_string(),
            hostname: Some("example.com".to_string()),
            url: Some(url.to_string()),
            ..Default::default()
        })
    }

    fn accepted(outcome: IngestOutcome) -> Accepted {
        match outcome {
            IngestOutcome::Accepted(accepted) => accepted,
            other => panic!("expected accepted beacon, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pageview_writes_session_and_event() {
        let h = harness().await;

        let result = accepted(
            h.ingestor
                .ingest(pageview(&h.website_id, "/pricing?utm_source=news"), client())
                .await
                .unwrap(),
        );

        let event = h.storage.get_event(&result.event_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(event.url_path, "/pricing");
        assert_eq!(event.event_type, EventType::Pageview.as_i32());
        assert_eq!(event.utm_source.as_deref(), Some("news"));
        assert_eq!(event.session_id, result.session_id.to_string());

        let session = h.storage.get_session(&result.session_id).await.unwrap().unwrap();
        assert_eq!(session.entry_page.as_deref(), Some("/pricing"));
        assert_eq!(session.browser.as_deref(), Some("Chrome"));
    }

    #[tokio::test]
    async fn test_rejections() {
        let h = harness().await;

        let bad_site = pageview(&Uuid::nil(), "/").payload;
        let beacon = Beacon::event(BeaconPayload {
            website: "not-a-uuid".to_string(),
            ..bad_site
        });
        assert!(matches!(
            h.ingestor.ingest(beacon, client()).await,
            Err(IngestError::InvalidWebsiteId)
        ));

        let mut foreign = client();
        foreign.origin = Some("https://attacker.test".to_string());
        assert!(matches!(
            h.ingestor.ingest(pageview(&h.website_id, "/"), foreign).await,
            Err(IngestError::OriginNotAllowed)
        ));

        let long = format!("/{}", "a".repeat(MAX_URL_LEN));
        assert!(matches!(
            h.ingestor.ingest(pageview(&h.website_id, &long), client()).await,
            Err(IngestError::UrlTooLong { field: "url", .. })
        ));

        let mut beacon = pageview(&h.website_id, "/");
        beacon.payload.id = Some("retry-1".to_string());
        assert!(matches!(
            h.ingestor.ingest(beacon, client()).await,
            Err(IngestError::InvalidEventId)
        ));

        let mut beacon = pageview(&h.website_id, "/");
        beacon.payload.data = Some(serde_json::json!({ "blob": "x".repeat(MAX_PROPERTIES_BYTES) }));
        assert!(matches!(
            h.ingestor.ingest(beacon, client()).await,
            Err(IngestError::PayloadTooLarge(_))
        ));

        assert_eq!(h.storage.count_events(&h.website_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bot_is_soft_dropped() {
        let h = harness().await;
        let mut bot = client();
        bot.user_agent =
            "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)".to_string();

        let outcome = h
            .ingestor
            .ingest(pageview(&h.website_id, "/"), bot)
            .await
            .unwrap();

        assert_eq!(outcome, IngestOutcome::Dropped(DropReason::Bot));
        assert_eq!(h.storage.count_events(&h.website_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_identify_sets_distinct_id_without_event() {
        let h = harness().await;
        let first = accepted(
            h.ingestor
                .ingest(pageview(&h.website_id, "/"), client())
                .await
                .unwrap(),
        );

        let identify = Beacon::identify(BeaconPayload {
            website: h.website_id.to_string(),
            distinct_id: Some("user-42".to_string()),
            ..Default::default()
        });
        let result = accepted(h.ingestor.ingest(identify, client()).await.unwrap());

        assert_eq!(result.session_id, first.session_id);
        assert_eq!(result.visit_id, None);
        assert_eq!(h.storage.count_events(&h.website_id).await.unwrap(), 1);

        let session = h.storage.get_session(&first.session_id).await.unwrap().unwrap();
        assert_eq!(session.distinct_id.as_deref(), Some("user-42"));
        assert_eq!(session.entry_page.as_deref(), Some("/"));
    }

    #[tokio::test]
    async fn test_retried_identify_reply_has_no_visit() {
        let h = harness().await;
        let identify = || {
            Beacon::identify(BeaconPayload {
                website: h.website_id.to_string(),
                distinct_id: Some("user-7".to_string()),
                id: Some("7f1c1c8e-5d0a-4d53-9a55-2f5e1f0f7b11".to_string()),
                ..Default::default()
            })
        };

        let first = accepted(h.ingestor.ingest(identify(), client()).await.unwrap());
        let retry = accepted(h.ingestor.ingest(identify(), client()).await.unwrap());

        assert!(!first.idempotent);
        assert!(retry.idempotent);
        assert_eq!(first.visit_id, None);
        assert_eq!(retry.visit_id, None);
        assert_eq!(retry.session_id, first.session_id);
    }

    #[derive(Default)]
    struct RecordingGeo {
        seen: std::sync::Mutex<Vec<IpAddr>>,
    }

    impl GeoLocator for RecordingGeo {
        fn locate(&self, ip: IpAddr) -> crate::tracking::GeoLocation {
            self.seen.lock().unwrap().push(ip);
            crate::tracking::GeoLocation::default()
        }
    }

    #[tokio::test]
    async fn test_anonymization_applies_to_geo_only() {
        let h = harness().await;
        let geo = Arc::new(RecordingGeo::default());
        let config = TrackingConfig {
            app_secret: "test-secret".to_string(),
            ..TrackingConfig::default()
        };
        let ingestor = Ingestor::new(
            Arc::clone(&h.storage),
            Arc::new(CachedStorage::new(Arc::clone(&h.storage), 100, 60)),
            Publisher::new(h.pubsub.clone()),
            &config,
        )
        .with_geo_locator(geo.clone())
        .with_ip_anonymization(true);

        let mut first_client = client();
        first_client.ip = "203.0.113.5".parse().unwrap();
        let mut second_client = client();
        second_client.ip = "203.0.113.99".parse().unwrap();

        let a = accepted(
            ingestor
                .ingest(pageview(&h.website_id, "/"), first_client)
                .await
                .unwrap(),
        );
        let b = accepted(
            ingestor
                .ingest(pageview(&h.website_id, "/"), second_client)
                .await
                .unwrap(),
        );

        assert_ne!(a.session_id, b.session_id);

        let truncated: IpAddr = "203.0.113.0".parse().unwrap();
        assert_eq!(*geo.seen.lock().unwrap(), vec![truncated, truncated]);
    }

    #[tokio::test]
    async fn test_accepted_event_is_published() {
        let h = harness().await;
        let mut subscription = h.pubsub.subscribe(REALTIME_CHANNEL).await.unwrap();

        let mut beacon = pageview(&h.website_id, "/docs");
        beacon.payload.title = Some("Docs".to_string());
        let result = accepted(h.ingestor.ingest(beacon, client()).await.unwrap());

        let payload = subscription.recv().await.unwrap().unwrap();
        let envelope: EventEnvelope = serde_json::from_slice(&payload).unwrap();
        assert_eq!(envelope.kind, "pageview");
        assert_eq!(envelope.path, "/docs");
        assert_eq!(envelope.title.as_deref(), Some("Docs"));
        assert_eq!(envelope.session_id, result.session_id.to_string());
    }

    #[tokio::test]
    async fn test_custom_event_fields_are_truncated() {
        let h = harness().await;
        let beacon = Beacon::event(BeaconPayload {
            website: h.website_id.to_string(),
            url: Some("/".to_string()),
            name: Some("n".repeat(80)),
            title: Some("t".repeat(600)),
            ..Default::default()
        });

        let result = accepted(h.ingestor.ingest(beacon, client()).await.unwrap());
        let event = h.storage.get_event(&result.event_id.unwrap()).await.unwrap().unwrap();

        assert_eq!(event.event_type, EventType::Custom.as_i32());
        assert_eq!(event.event_name.map(|n| n.len()), Some(MAX_EVENT_NAME_LEN));
        assert_eq!(event.page_title.map(|t| t.len()), Some(MAX_TITLE_LEN));
    }

    #[test]
    fn test_event_time_falls_back_to_now() {
        assert_eq!(event_time(Some(1_760_000_000)).timestamp(), 1_760_000_000);
        let now = Utc::now().timestamp();
        assert!(event_time(None).timestamp() >= now);
        assert!(event_time(Some(-5)).timestamp() >= now);
    }

    #[test]
    fn test_far_future_timestamp_uses_receipt_time() {
        let now = Utc::now().timestamp();

        let soon = now + 3600;
        assert_eq!(event_time(Some(soon)).timestamp(), soon);

        let next_year = now + 365 * 86_400;
        let at = event_time(Some(next_year)).timestamp();
        assert!(at >= now && at < now + 60);
    }
}
