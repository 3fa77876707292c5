//! Signup Worker - publishes welcome notifications for queued signups.
//!
//! Leases batches from the signup queue, publishes one welcome notification
//! per item to the fan-out exchange and settles each item on its own.

mod consumer;

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use signup_pipeline::{AmqpFanout, AmqpQueue, Broker, Config, NotificationWorker, Topology};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("worker_starting");

    // Load configuration from environment
    let config = Config::from_env();
    tracing::info!(
        amqp_url_set = !config.amqp_url.is_empty(),
        signup_queue = %config.signup_queue,
        welcome_topic = %config.welcome_topic,
        batch_size = config.batch_size,
        max_receive_count = config.max_receive_count,
        operation_timeout_ms = config.operation_timeout_ms,
        "config_loaded"
    );

    let broker = Broker::new(config.amqp_url.clone(), Topology::from(&config));
    let worker = NotificationWorker::new(
        Arc::new(AmqpQueue::new(broker.clone(), config.operation_timeout())),
        Arc::new(AmqpFanout::new(broker.clone())),
        (&config).into(),
    );

    let result = consumer::run(&worker, config.poll_interval()).await;

    broker.close().await;
    tracing::info!("worker_shutdown_complete");

    result
}
