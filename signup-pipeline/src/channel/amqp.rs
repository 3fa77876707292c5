//! AMQP fan-out exchange binding of the notification channel.

use async_trait::async_trait;
use lapin::{
    options::BasicPublishOptions,
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties,
};
use tracing::info;

use super::{NotificationChannel, PublishId};
use crate::broker::Broker;
use crate::error::PublishError;
use crate::signup::NotificationMessage;

/// Publishes notifications to a durable fanout exchange named by the topic.
#[derive(Clone)]
pub struct AmqpFanout {
    broker: Broker,
}

impl AmqpFanout {
    pub fn new(broker: Broker) -> Self {
        Self { broker }
    }
}

fn properties(message: &NotificationMessage) -> BasicProperties {
    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from("subject"),
        AMQPValue::LongString(LongString::from(message.subject.as_str())),
    );

    BasicProperties::default()
        .with_delivery_mode(2) // Persistent
        .with_content_type("application/json".into())
        .with_message_id(message.idempotency_key.as_str().into())
        .with_headers(headers)
}

#[async_trait]
impl NotificationChannel for AmqpFanout {
    async fn publish(
        &self,
        topic: &str,
        message: &NotificationMessage,
    ) -> Result<PublishId, PublishError> {
        // Encoding failures are permanent
        let body = serde_json::to_vec(message)
            .map_err(|e| PublishError::Permanent(format!("Failed to serialize notification: {e}")))?;

        let channel = self
            .broker
            .channel()
            .await
            .map_err(|e| PublishError::Transient(format!("{e:#}")))?;

        let confirmation = channel
            .basic_publish(
                topic,
                "",
                BasicPublishOptions::default(),
                &body,
                properties(message),
            )
            .await
            .map_err(|e| PublishError::Transient(e.to_string()))?
            .await
            .map_err(|e| PublishError::Transient(e.to_string()))?;

        if confirmation.is_nack() {
            return Err(PublishError::Transient(format!(
                "broker rejected publish to {topic}"
            )));
        }

        info!(
            topic = %topic,
            message_id = %message.idempotency_key,
            body_length = body.len(),
            "amqp_notification_published"
        );

        Ok(PublishId(message.idempotency_key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_carry_key_and_subject() {
        let message = NotificationMessage {
            subject: "Welcome to Our Platform!".to_string(),
            body: "Hello Ana, welcome to our platform!".to_string(),
            recipient_email: "ana@x.com".to_string(),
            idempotency_key: "k1".to_string(),
        };

        let props = properties(&message);

        assert_eq!(
            props.message_id().as_ref().map(|s| s.as_str()),
            Some("k1")
        );
        assert_eq!(props.delivery_mode(), &Some(2));

        let subject = props
            .headers()
            .as_ref()
            .and_then(|h| h.inner().iter().find(|(k, _)| k.as_str() == "subject"))
            .map(|(_, v)| v.clone());
        assert_eq!(
            subject,
            Some(AMQPValue::LongString(LongString::from(
                "Welcome to Our Platform!"
            )))
        );
    }
}
