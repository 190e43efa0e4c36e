//! Fire-and-forget emission of written events.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::envelope::EventEnvelope;
use super::pubsub::{PubSub, REALTIME_CHANNEL};

#[derive(Clone)]
pub struct Publisher {
    pubsub: Arc<dyn PubSub>,
    channel: String,
}

impl Publisher {
    pub fn new(pubsub: Arc<dyn PubSub>) -> Self {
        Self::with_channel(pubsub, REALTIME_CHANNEL)
    }

    pub fn with_channel(pubsub: Arc<dyn PubSub>, channel: impl Into<String>) -> Self {
        Self {
            pubsub,
            channel: channel.into(),
        }
    }

    /// Publish once in the background. Failures are logged and never retried.
    pub fn publish(&self, envelope: EventEnvelope) -> JoinHandle<()> {
        let pubsub = Arc::clone(&self.pubsub);
        let channel = self.channel.clone();

        tokio::spawn(async move {
            let payload = match envelope.to_bytes() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "failed to encode realtime envelope");
                    return;
                }
            };

            match pubsub.publish(&channel, &payload).await {
                Ok(()) => debug!(website_id = %envelope.website_id, "realtime event published"),
                Err(e) => warn!(
                    website_id = %envelope.website_id,
                    error = %e,
                    "realtime publish failed"
                ),
            }
        })
    }
}
