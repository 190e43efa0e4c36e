//! Duplicate suppression for retried beacons carrying a client event id.
//!
//! The guard favors availability: a key store that cannot be reached never
//! blocks ingestion, it only weakens deduplication for that request.

use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::storage::Storage;

#[derive(Clone)]
pub struct IdempotencyGuard {
    storage: Arc<dyn Storage>,
}

impl IdempotencyGuard {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// True when this event id was already accepted for the website.
    /// Lookup failures are logged and reported as "not seen".
    pub async fn seen(&self, event_id: Option<&Uuid>, website_id: &Uuid) -> bool {
        let Some(event_id) = event_id else {
            return false;
        };

        match self.storage.idempotency_key_exists(event_id, website_id).await {
            Ok(true) => {
                debug!(event_id = %event_id, website_id = %website_id, "duplicate beacon");
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(
                    event_id = %event_id,
                    website_id = %website_id,
                    error = %e,
                    "idempotency lookup failed, processing beacon"
                );
                false
            }
        }
    }

    /// Record an accepted event id. Called only after the event write succeeded.
    pub async fn record(&self, event_id: Option<&Uuid>, website_id: &Uuid) {
        let Some(event_id) = event_id else {
            return;
        };

        if let Err(e) = self.storage.record_idempotency_key(event_id, website_id).await {
            warn!(
                event_id = %event_id,
                website_id = %website_id,
                error = %e,
                "failed to record idempotency key"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    async fn guard() -> IdempotencyGuard {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        IdempotencyGuard::new(Arc::new(storage))
    }

    #[tokio::test]
    async fn test_absent_event_id_is_never_seen() {
        let guard = guard().await;
        let website = Uuid::new_v4();

        guard.record(None, &website).await;
        assert!(!guard.seen(None, &website).await);
    }

    #[tokio::test]
    async fn test_recorded_key_is_seen_per_website() {
        let guard = guard().await;
        let website = Uuid::new_v4();
        let event = Uuid::new_v4();

        assert!(!guard.seen(Some(&event), &website).await);
        guard.record(Some(&event), &website).await;
        guard.record(Some(&event), &website).await;

        assert!(guard.seen(Some(&event), &website).await);
        assert!(!guard.seen(Some(&event), &Uuid::new_v4()).await);
    }
}
