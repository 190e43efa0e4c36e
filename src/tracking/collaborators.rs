//! Interfaces to services the ingest pipeline consumes but does not own,
//! plus the default implementations wired up by `main`.

use anyhow::Result;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;
use woothee::parser::Parser;

use crate::models::Goal;
use crate::storage::{CachedStorage, Storage};

use super::geoip::GeoLocation;
use super::normalize::strip_www;

/// Classifies a client as automated traffic
#[async_trait]
pub trait BotScorer: Send + Sync {
    async fn is_bot(&self, ip: IpAddr, user_agent: &str) -> Result<bool>;
}

/// Decides whether a website accepts beacons from an `Origin`.
/// An error is treated as a rejection.
#[async_trait]
pub trait OriginValidator: Send + Sync {
    async fn validate(&self, website_id: &Uuid, origin: Option<&str>) -> Result<bool>;
}

/// Read-mostly source of a website's goal definitions
#[async_trait]
pub trait GoalSource: Send + Sync {
    async fn goals_for_website(&self, website_id: &Uuid) -> Result<Arc<Vec<Goal>>>;

    async fn invalidate_goal_cache(&self, website_id: &Uuid);
}

/// Best-effort IP geolocation
pub trait GeoLocator: Send + Sync {
    fn locate(&self, ip: IpAddr) -> GeoLocation;
}

#[async_trait]
impl GoalSource for CachedStorage {
    async fn goals_for_website(&self, website_id: &Uuid) -> Result<Arc<Vec<Goal>>> {
        self.cached_goals(website_id).await
    }

    async fn invalidate_goal_cache(&self, website_id: &Uuid) {
        CachedStorage::invalidate_goal_cache(self, website_id).await
    }
}

/// Flags User-Agents that woothee categorizes as crawlers, plus empty ones
pub struct UserAgentBotScorer {
    parser: Parser,
}

impl UserAgentBotScorer {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
        }
    }
}

impl Default for UserAgentBotScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BotScorer for UserAgentBotScorer {
    async fn is_bot(&self, _ip: IpAddr, user_agent: &str) -> Result<bool> {
        if user_agent.trim().is_empty() {
            return Ok(true);
        }

        let is_crawler = self
            .parser
            .parse(user_agent)
            .map(|result| result.category == "crawler")
            .unwrap_or(false);

        Ok(is_crawler)
    }
}

/// Accepts origins whose host is the website's domain or a subdomain of it.
///
/// Unknown websites are rejected. Websites without a domain, and requests
/// without an `Origin` header (server-side SDKs), are accepted.
pub struct WebsiteOriginValidator {
    storage: Arc<dyn Storage>,
}

impl WebsiteOriginValidator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

fn origin_host(origin: &str) -> Option<String> {
    let url = url::Url::parse(origin).ok()?;
    url.host_str().map(strip_www)
}

#[async_trait]
impl OriginValidator for WebsiteOriginValidator {
    async fn validate(&self, website_id: &Uuid, origin: Option<&str>) -> Result<bool> {
        let Some(website) = self.storage.get_website(website_id).await? else {
            return Ok(false);
        };

        let (Some(domain), Some(origin)) = (website.domain.as_deref(), origin) else {
            return Ok(true);
        };

        let domain = strip_www(domain);
        let Some(host) = origin_host(origin) else {
            return Ok(false);
        };

        Ok(host == domain
            || host
                .strip_suffix(&domain)
                .is_some_and(|prefix| prefix.ends_with('.')))
    }
}

/// Used when no GeoIP database is configured
pub struct NoGeoLocator;

impl GeoLocator for NoGeoLocator {
    fn locate(&self, _ip: IpAddr) -> GeoLocation {
        GeoLocation::default()
    }
}
