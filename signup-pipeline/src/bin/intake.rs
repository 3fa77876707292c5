//! Signup Intake - HTTP front for the signup queue.
//!
//! This binary provides a thin web server that:
//! - Receives signup submissions on `POST /signup`
//! - Validates and normalizes them
//! - Enqueues one work item per accepted submission
//!
//! Notification delivery happens in the worker.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use signup_pipeline::web::{router, AppState};
use signup_pipeline::{shutdown_signal, AmqpQueue, Broker, Config, IntakeGate, Topology};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("intake_server_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        signup_queue = %config.signup_queue,
        operation_timeout_ms = config.operation_timeout_ms,
        "config_loaded"
    );

    let broker = Broker::new(config.amqp_url.clone(), Topology::from(&config));
    let queue = Arc::new(AmqpQueue::new(broker.clone(), config.operation_timeout()));
    let state = AppState::new(IntakeGate::new(queue, config.operation_timeout()));

    let app = router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "intake_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("intake_server_shutting_down");
        })
        .await
        .context("Server error")?;

    broker.close().await;

    info!("intake_server_shutdown_complete");

    Ok(())
}
