//! Beacon ingestion: identity, filtering, deduplication, persistence and goals.

pub mod client_ip;
pub mod collaborators;
pub mod enrichment;
pub mod filter;
pub mod geoip;
pub mod goals;
pub mod idempotency;
pub mod identity;
pub mod ingest;
pub mod limits;
pub mod normalize;

pub use client_ip::{anonymize_ip, ClientIpExtractor};
pub use collaborators::{
    BotScorer, GeoLocator, GoalSource, NoGeoLocator, OriginValidator, UserAgentBotScorer,
    WebsiteOriginValidator,
};
pub use filter::DropReason;
pub use geoip::{GeoIpService, GeoLocation};
pub use goals::GoalMatcher;
pub use idempotency::IdempotencyGuard;
pub use identity::{Fingerprint, IdentityResolver, ResolvedIdentity};
pub use ingest::{Accepted, ClientContext, IngestError, IngestOutcome, Ingestor};
