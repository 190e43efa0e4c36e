//! Long-lived subscription that feeds pub/sub payloads into the Hub.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::hub::Hub;
use super::pubsub::{PubSub, Subscription};

/// Exponential reconnect delay with up to 50% random jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.max(Duration::from_millis(1));
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);

        let half = (base.as_millis() / 2) as u64;
        let jitter = Duration::from_millis(rand::rng().random_range(0..=half));
        (base + jitter).min(self.max)
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub channel: String,
    pub keepalive: Duration,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

enum Exit {
    Shutdown,
    Dropped,
}

pub struct Listener {
    pubsub: Arc<dyn PubSub>,
    hub: Hub,
    config: ListenerConfig,
}

impl Listener {
    pub fn new(pubsub: Arc<dyn PubSub>, hub: Hub, mut config: ListenerConfig) -> Self {
        config.keepalive = config.keepalive.max(Duration::from_millis(1));
        Self {
            pubsub,
            hub,
            config,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Subscribe, forward, and resubscribe after any failure until `shutdown` flips
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.config.backoff_min, self.config.backoff_max);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let subscribed = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.pubsub.subscribe(&self.config.channel) => result,
            };

            match subscribed {
                Ok(subscription) => {
                    info!(channel = %self.config.channel, "realtime listener subscribed");
                    backoff.reset();
                    if let Exit::Shutdown = self.forward(subscription, &mut shutdown).await {
                        break;
                    }
                    warn!(channel = %self.config.channel, "realtime subscription dropped");
                }
                Err(e) => {
                    warn!(channel = %self.config.channel, error = %e, "realtime subscribe failed");
                }
            }

            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "realtime listener reconnecting");
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep(delay) => {}
            }
        }

        info!(channel = %self.config.channel, "realtime listener stopped");
    }

    async fn forward(
        &self,
        mut subscription: Box<dyn Subscription>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Exit {
        let period = self.config.keepalive;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => return Exit::Shutdown,
                _ = keepalive.tick() => {
                    if let Err(e) = subscription.ping().await {
                        warn!(error = %e, "realtime keepalive failed");
                        return Exit::Dropped;
                    }
                }
                received = subscription.recv() => match received {
                    Ok(Some(payload)) => {
                        self.hub.broadcast(payload);
                    }
                    Ok(None) => return Exit::Dropped,
                    Err(e) => {
                        warn!(error = %e, "realtime receive failed");
                        return Exit::Dropped;
                    }
                },
            }
        }
    }
}
