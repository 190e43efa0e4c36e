use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::models::Beacon;
use crate::realtime::{ClientConfig, Hub};
use crate::tracking::{ClientContext, ClientIpExtractor, IngestError, IngestOutcome, Ingestor};

pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub hub: Hub,
    pub client_ip: ClientIpExtractor,
    pub realtime: ClientConfig,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visit_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub idempotent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropped: Option<&'static str>,
}

impl From<IngestOutcome> for SendResponse {
    fn from(outcome: IngestOutcome) -> Self {
        match outcome {
            IngestOutcome::Accepted(accepted) => SendResponse {
                accepted: true,
                session_id: Some(accepted.session_id),
                visit_id: accepted.visit_id,
                goal_id: accepted.goal_id,
                idempotent: accepted.idempotent,
                dropped: None,
            },
            IngestOutcome::Dropped(reason) => SendResponse {
                accepted: true,
                session_id: None,
                visit_id: None,
                goal_id: None,
                idempotent: false,
                dropped: Some(reason.as_str()),
            },
        }
    }
}

impl IngestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::InvalidWebsiteId | IngestError::InvalidEventId => StatusCode::BAD_REQUEST,
            IngestError::OriginNotAllowed => StatusCode::FORBIDDEN,
            IngestError::UrlTooLong { .. } | IngestError::PayloadTooLarge(_) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            IngestError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Accept a tracking beacon
pub async fn send_beacon(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    beacon: Result<Json<Beacon>, JsonRejection>,
) -> Result<Json<SendResponse>, (StatusCode, Json<ErrorResponse>)> {
    let Json(beacon) =
        beacon.map_err(|e| error_response(StatusCode::BAD_REQUEST, e.body_text()))?;

    let client = ClientContext {
        ip: state.client_ip.extract(&headers, addr.ip()),
        user_agent: header_str(&headers, header::USER_AGENT).unwrap_or_default(),
        origin: header_str(&headers, header::ORIGIN),
    };

    match state.ingestor.ingest(beacon, client).await {
        Ok(outcome) => Ok(Json(outcome.into())),
        Err(IngestError::Storage(e)) => {
            error!(error = %e, "failed to store beacon");
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to store event",
            ))
        }
        Err(e) => Err(error_response(e.status_code(), e.to_string())),
    }
}

/// Health check endpoint
pub async fn health_check() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        message: "OK".to_string(),
    })
}
