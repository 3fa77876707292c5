//! Signup endpoint handlers.
//!
//! The handler takes the raw body so malformed JSON is reported by the gate
//! with the same response shape as every other rejection.

use std::sync::Arc;

use axum::{body::Bytes, extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::IntakeError;
use crate::intake::IntakeGate;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<IntakeGate>,
}

impl AppState {
    pub fn new(gate: IntakeGate) -> Self {
        Self {
            gate: Arc::new(gate),
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Signup
// =============================================================================

/// Signup response.
#[derive(Serialize)]
pub struct SignupResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Signup endpoint.
///
/// 200 when the submission is queued, 400 when the caller sent something
/// unusable, 503 when the queue could not take it.
pub async fn signup(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    info!(body_length = body.len(), "signup_request_received");

    match state.gate.submit(&body).await {
        Ok(accepted) => {
            info!(
                message_id = %accepted.message_id,
                "signup_request_accepted"
            );
            (
                StatusCode::OK,
                Json(SignupResponse {
                    status: "accepted",
                    message: Some("Signup received and queued".to_string()),
                    error: None,
                }),
            )
        }
        Err(e @ IntakeError::ServiceUnavailable(_)) => {
            warn!(error = %e, "signup_request_unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(SignupResponse {
                    status: "unavailable",
                    message: None,
                    error: Some(e.to_string()),
                }),
            )
        }
        Err(e) => {
            warn!(error = %e, "signup_request_rejected");
            (
                StatusCode::BAD_REQUEST,
                Json(SignupResponse {
                    status: "rejected",
                    message: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}
