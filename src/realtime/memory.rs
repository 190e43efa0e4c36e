//! In-process pub/sub for single-node deployments (SQLite) and tests.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::warn;

use super::pubsub::{PubSub, PubSubError, Subscription};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
pub struct MemoryPubSub {
    channels: DashMap<String, broadcast::Sender<Bytes>>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Bytes> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Drop every subscription on `channel`, as a lost database connection would
    pub fn disconnect(&self, channel: &str) {
        self.channels.remove(channel);
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), PubSubError> {
        // No subscribers is not an error: NOTIFY without LISTEN succeeds too
        let _ = self.sender(channel).send(Bytes::copy_from_slice(payload));
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, PubSubError> {
        Ok(Box::new(MemorySubscription {
            channel: channel.to_string(),
            rx: self.sender(channel).subscribe(),
            closed: false,
        }))
    }
}

struct MemorySubscription {
    channel: String,
    rx: broadcast::Receiver<Bytes>,
    closed: bool,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn recv(&mut self) -> Result<Option<Bytes>, PubSubError> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Ok(Some(payload)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.closed = true;
                    return Ok(None);
                }
            }
        }
    }

    async fn ping(&mut self) -> Result<(), PubSubError> {
        if self.closed {
            Err(PubSubError::Disconnected)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let pubsub = MemoryPubSub::new();
        let mut a = pubsub.subscribe("ch").await.unwrap();
        let mut b = pubsub.subscribe("ch").await.unwrap();

        pubsub.publish("ch", b"hello").await.unwrap();

        assert_eq!(a.recv().await.unwrap(), Some(Bytes::from_static(b"hello")));
        assert_eq!(b.recv().await.unwrap(), Some(Bytes::from_static(b"hello")));
        assert_eq!(pubsub.subscriber_count("ch"), 2);
    }

    #[tokio::test]
    async fn test_disconnect_ends_subscription() {
        let pubsub = MemoryPubSub::new();
        let mut sub = pubsub.subscribe("ch").await.unwrap();

        pubsub.disconnect("ch");

        assert_eq!(sub.recv().await.unwrap(), None);
        assert!(sub.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let pubsub = MemoryPubSub::new();
        assert!(pubsub.publish("nobody", b"x").await.is_ok());
    }
}
