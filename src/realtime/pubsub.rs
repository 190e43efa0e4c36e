//! Pub/sub transport between ingest processes and realtime listeners.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Channel carrying [`EventEnvelope`](super::EventEnvelope) payloads
pub const REALTIME_CHANNEL: &str = "pulse_realtime";

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("pub/sub connection lost")]
    Disconnected,
    #[error("payload of {0} bytes exceeds the transport limit")]
    PayloadTooLarge(usize),
    #[error("payload is not valid UTF-8")]
    InvalidPayload,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait PubSub: Send + Sync {
    /// Send a payload once. Delivery is at-most-once.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), PubSubError>;

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, PubSubError>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Next payload. `Ok(None)` means the subscription ended and must be
    /// re-established.
    async fn recv(&mut self) -> Result<Option<Bytes>, PubSubError>;

    /// Verify the subscription is still alive
    async fn ping(&mut self) -> Result<(), PubSubError>;
}
