use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{health_check, send_beacon, AppState};
use super::realtime::{realtime_stats, realtime_ws};

pub fn create_api_router(state: Arc<AppState>) -> Router {
    // Beacons arrive from every tracked site; origins are checked per website
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/send", post(send_beacon))
        .route("/api/realtime", get(realtime_ws))
        .route("/api/realtime/stats", get(realtime_stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
