//! Postgres `LISTEN/NOTIFY` transport.

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::postgres::{PgListener, PgPool};
use std::sync::Arc;

use super::pubsub::{PubSub, PubSubError, Subscription};

/// `NOTIFY` payloads must be shorter than 8000 bytes
const MAX_NOTIFY_PAYLOAD: usize = 7999;

pub struct PgPubSub {
    pool: Arc<PgPool>,
}

impl PgPubSub {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PubSub for PgPubSub {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), PubSubError> {
        if payload.len() > MAX_NOTIFY_PAYLOAD {
            return Err(PubSubError::PayloadTooLarge(payload.len()));
        }
        let payload = std::str::from_utf8(payload).map_err(|_| PubSubError::InvalidPayload)?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, PubSubError> {
        let mut listener = PgListener::connect_with(self.pool.as_ref()).await?;
        listener.listen(channel).await?;

        Ok(Box::new(PgSubscription { listener }))
    }
}

struct PgSubscription {
    listener: PgListener,
}

#[async_trait]
impl Subscription for PgSubscription {
    async fn recv(&mut self) -> Result<Option<Bytes>, PubSubError> {
        // try_recv yields None when the connection drops; the caller resubscribes
        let notification = self.listener.try_recv().await?;
        Ok(notification.map(|n| Bytes::copy_from_slice(n.payload().as_bytes())))
    }

    async fn ping(&mut self) -> Result<(), PubSubError> {
        sqlx::query("SELECT 1").execute(&mut self.listener).await?;
        Ok(())
    }
}
