//! Cookieless visitor identity.
//!
//! Session and visit ids are derived by hashing the client fingerprint
//! together with a *time salt*: a hash of the event time truncated to a
//! period. The session salt rotates monthly, the visit salt hourly, so ids are
//! stable inside a bucket and unlinkable across buckets.
//!
//! Two visitors sharing an IP and User-Agent inside one month collapse into a
//! single session. The session id is also the session upsert key, so this only
//! lowers analytic precision.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use uuid::{Builder, Uuid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaltPeriod {
    Month,
    Hour,
}

/// Client characteristics hashed into the session id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub ip: IpAddr,
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub session_id: Uuid,
    pub visit_id: Uuid,
}

/// Truncate a timestamp to the start of its period
pub fn truncate(at: DateTime<Utc>, period: SaltPeriod) -> DateTime<Utc> {
    match period {
        SaltPeriod::Month => Utc
            .with_ymd_and_hms(at.year(), at.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(at),
        SaltPeriod::Hour => {
            let secs = at.timestamp();
            DateTime::from_timestamp(secs - secs.rem_euclid(3600), 0).unwrap_or(at)
        }
    }
}

/// Hash of the truncated timestamp, hex encoded
pub fn time_salt(at: DateTime<Utc>, period: SaltPeriod) -> String {
    let bucket = truncate(at, period).to_rfc3339();
    let digest = Sha256::digest(bucket.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Deterministic 128-bit id from an ordered list of parts.
///
/// Parts are length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn hash_uuid(parts: &[&str]) -> Uuid {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Builder::from_custom_bytes(bytes).into_uuid()
}

#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    secret: String,
}

impl IdentityResolver {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Resolve the session id.
    ///
    /// An explicit session token wins over the fingerprint: a well-formed UUID
    /// is used as-is, anything else is hashed with the website id.
    pub fn session_id(
        &self,
        website_id: &Uuid,
        fingerprint: &Fingerprint,
        at: DateTime<Utc>,
        explicit_token: Option<&str>,
    ) -> Uuid {
        let website = website_id.to_string();

        if let Some(token) = explicit_token.map(str::trim).filter(|t| !t.is_empty()) {
            if let Ok(id) = Uuid::parse_str(token) {
                return id;
            }
            return hash_uuid(&[&self.secret, &website, token]);
        }

        let ip = fingerprint.ip.to_string();
        let salt = time_salt(at, SaltPeriod::Month);
        hash_uuid(&[&self.secret, &website, &ip, &fingerprint.user_agent, &salt])
    }

    /// Visit id: the session id re-hashed with the hourly salt
    pub fn visit_id(&self, session_id: &Uuid, at: DateTime<Utc>) -> Uuid {
        let session = session_id.to_string();
        let salt = time_salt(at, SaltPeriod::Hour);
        hash_uuid(&[&self.secret, &session, &salt])
    }

    pub fn resolve(
        &self,
        website_id: &Uuid,
        fingerprint: &Fingerprint,
        at: DateTime<Utc>,
        explicit_token: Option<&str>,
    ) -> ResolvedIdentity {
        let session_id = self.session_id(website_id, fingerprint, at, explicit_token);
        ResolvedIdentity {
            session_id,
            visit_id: self.visit_id(&session_id, at),
        }
    }
}
