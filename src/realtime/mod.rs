//! Realtime fan-out: ingest publishes envelopes to a pub/sub channel, a
//! listener feeds them into the in-process [`Hub`], and the Hub pushes them to
//! every connected WebSocket [`client`].

pub mod client;
pub mod envelope;
pub mod hub;
pub mod listener;
pub mod memory;
pub mod postgres;
pub mod publisher;
pub mod pubsub;

pub use client::ClientConfig;
pub use envelope::EventEnvelope;
pub use hub::{ClientHandle, ClientId, Hub, HubRunner};
pub use listener::{Backoff, Listener, ListenerConfig};
pub use memory::MemoryPubSub;
pub use postgres::PgPubSub;
pub use publisher::Publisher;
pub use pubsub::{PubSub, PubSubError, Subscription, REALTIME_CHANNEL};
