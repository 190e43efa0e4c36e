//! Live dashboard endpoints

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::realtime::client;

use super::handlers::AppState;

#[derive(Debug, Serialize)]
pub struct RealtimeStats {
    pub clients: usize,
}

/// Upgrade to a WebSocket that receives every published event envelope
pub async fn realtime_ws(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hub = state.hub.clone();
    let config = state.realtime;
    ws.on_upgrade(move |socket| client::serve(socket, hub, config))
}

pub async fn realtime_stats(State(state): State<Arc<AppState>>) -> Json<RealtimeStats> {
    Json(RealtimeStats {
        clients: state.hub.client_count().await,
    })
}
