//! Per-socket reader/writer pair.
//!
//! The reader only watches for the peer going away; there is no inbound
//! protocol. The writer forwards Hub broadcasts and pings on a timer, and
//! closes the socket once the Hub drops the client's outbound channel.

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use super::hub::{ClientHandle, ClientId, Hub};

#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    /// Outbound messages buffered before the Hub evicts the client
    pub buffer: usize,
    pub heartbeat: Duration,
}

/// Register the socket with the Hub and pump messages until either side goes away
pub async fn serve(socket: WebSocket, hub: Hub, config: ClientConfig) {
    let (handle, outbound) = ClientHandle::channel(config.buffer);
    let id = handle.id();

    if !hub.register(handle).await {
        debug!(client_id = id, "hub stopped, refusing realtime client");
        return;
    }
    debug!(client_id = id, "realtime client connected");

    let (sink, stream) = socket.split();
    let reader = tokio::spawn(read_loop(stream, id, hub.clone()));
    let writer = tokio::spawn(write_loop(sink, outbound, config.heartbeat));

    let _ = writer.await;
    hub.unregister(id).await;
    reader.abort();

    debug!(client_id = id, "realtime client closed");
}

fn frame(payload: Bytes) -> Message {
    match std::str::from_utf8(&payload) {
        Ok(text) => Message::Text(text.to_owned().into()),
        Err(_) => Message::Binary(payload),
    }
}

/// Forward outbound payloads and heartbeats to the socket.
/// Returns when the outbound channel closes or a write fails.
pub async fn write_loop<S>(mut sink: S, mut outbound: mpsc::Receiver<Bytes>, heartbeat: Duration)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let heartbeat = heartbeat.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            payload = outbound.recv() => match payload {
                Some(payload) => {
                    if let Err(e) = sink.send(frame(payload)).await {
                        debug!(error = %e, "realtime write failed");
                        break;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                    debug!(error = %e, "realtime heartbeat failed");
                    break;
                }
            }
        }
    }
}

/// Drain inbound frames until the peer closes or errors, then unregister
pub async fn read_loop<S, E>(mut stream: S, id: ClientId, hub: Hub)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(client_id = id, error = %e, "realtime read failed");
                break;
            }
        }
    }

    hub.unregister(id).await;
}
