//! Shared AMQP connection handle.
//!
//! One `Broker` is created per process in `main`, cloned into the queue and
//! channel bindings, and closed explicitly on shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use lapin::{
    options::{ConfirmSelectOptions, ExchangeDeclareOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongString, ShortString},
    Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::Config;

/// Names and limits of the broker topology this process relies on.
#[derive(Debug, Clone)]
pub struct Topology {
    pub signup_queue: String,
    pub dead_letter_queue: String,
    pub welcome_topic: String,
    pub max_receive_count: u32,
}

impl From<&Config> for Topology {
    fn from(config: &Config) -> Self {
        Self {
            signup_queue: config.signup_queue.clone(),
            dead_letter_queue: config.dead_letter_queue.clone(),
            welcome_topic: config.welcome_topic.clone(),
            max_receive_count: config.max_receive_count,
        }
    }
}

/// AMQP connection and channel with lazy connect and reconnect.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    url: String,
    topology: Topology,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl Broker {
    /// Create a broker handle; no connection is made until first use.
    pub fn new(url: String, topology: Topology) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                url,
                topology,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.inner.topology
    }

    /// Return a connected channel, reconnecting if the previous one dropped.
    pub async fn channel(&self) -> Result<Channel> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Another task may have reconnected while we waited for the lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        let conn = match connection.take() {
            Some(conn) if conn.status().connected() => conn,
            _ => {
                info!("amqp_connecting");

                let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
                    .await
                    .context("Failed to connect to AMQP broker")?;

                info!("amqp_connected");
                conn
            }
        };

        let ch = conn
            .create_channel()
            .await
            .context("Failed to create channel")?;

        ch.confirm_select(ConfirmSelectOptions::default())
            .await
            .context("Failed to enable publisher confirms")?;

        declare_topology(&ch, &self.inner.topology).await?;

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Close the current channel so the broker requeues every unacked
    /// delivery on it. The next [`Broker::channel`] call opens a fresh one.
    pub async fn discard_channel(&self) {
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Releasing unsettled deliveries").await {
                warn!(error = %e, "amqp_channel_discard_error");
            }
            info!("amqp_channel_discarded");
        }
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "amqp_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "amqp_connection_close_error");
            }
        }

        info!("amqp_broker_closed");
    }
}

/// Declare queues and the fan-out exchange (idempotent).
async fn declare_topology(ch: &Channel, topology: &Topology) -> Result<()> {
    ch.queue_declare(
        &topology.dead_letter_queue,
        QueueDeclareOptions {
            durable: true,
            ..Default::default()
        },
        FieldTable::default(),
    )
    .await
    .context("Failed to declare dead-letter queue")?;

    ch.queue_declare(
        &topology.signup_queue,
        QueueDeclareOptions {
            durable: true,
            ..Default::default()
        },
        signup_queue_arguments(topology),
    )
    .await
    .context("Failed to declare signup queue")?;

    ch.exchange_declare(
        &topology.welcome_topic,
        ExchangeKind::Fanout,
        ExchangeDeclareOptions {
            durable: true,
            ..Default::default()
        },
        FieldTable::default(),
    )
    .await
    .context("Failed to declare welcome exchange")?;

    info!(
        signup_queue = %topology.signup_queue,
        dead_letter_queue = %topology.dead_letter_queue,
        welcome_topic = %topology.welcome_topic,
        max_receive_count = topology.max_receive_count,
        "amqp_topology_declared"
    );

    Ok(())
}

/// Quorum queues dead-letter once `x-delivery-count` exceeds the limit, and
/// the count excludes the first delivery.
fn delivery_limit(max_receive_count: u32) -> i32 {
    i32::try_from(max_receive_count.saturating_sub(1)).unwrap_or(i32::MAX)
}

/// Quorum queue arguments: bounded redelivery, then route to the dead-letter queue.
fn signup_queue_arguments(topology: &Topology) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        ShortString::from("x-queue-type"),
        AMQPValue::LongString(LongString::from("quorum")),
    );
    args.insert(
        ShortString::from("x-delivery-limit"),
        AMQPValue::LongInt(delivery_limit(topology.max_receive_count)),
    );
    args.insert(
        ShortString::from("x-dead-letter-exchange"),
        AMQPValue::LongString(LongString::from("")),
    );
    args.insert(
        ShortString::from("x-dead-letter-routing-key"),
        AMQPValue::LongString(LongString::from(topology.dead_letter_queue.as_str())),
    );
    args
}
