//! Web server module for the signup intake endpoint.
//!
//! This module provides a thin web server that:
//! - Receives signup submissions
//! - Hands the raw body to the intake gate
//! - Maps the gate's outcome to a status code and JSON body

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{health, signup, AppState, HealthResponse, SignupResponse};

/// Build the intake router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/signup", post(signup))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
