//! Payload types flowing through the pipeline.

use serde::{Deserialize, Serialize};

use super::email::{idempotency_key, normalize_email};

/// Subject line of every welcome notification.
pub const WELCOME_SUBJECT: &str = "Welcome to Our Platform!";

/// Validated signup submission, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
}

/// Queue payload produced by the intake gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub name: String,
    /// Normalized (trimmed, lower-cased) address
    pub email: String,
    /// Content-derived key shared by every redelivery of the same signup
    pub idempotency_key: String,
}

impl WorkItem {
    /// Normalize a request into a keyed work item.
    pub fn from_request(request: &SignupRequest) -> Self {
        let email = normalize_email(&request.email);
        let idempotency_key = idempotency_key(&email);
        Self {
            name: request.name.trim().to_string(),
            email,
            idempotency_key,
        }
    }

    /// Whether the carried key still matches the carried address.
    pub fn key_matches(&self) -> bool {
        idempotency_key(&normalize_email(&self.email)) == self.idempotency_key
    }
}

/// Welcome notification published to the fan-out channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub subject: String,
    pub body: String,
    pub recipient_email: String,
    pub idempotency_key: String,
}

impl NotificationMessage {
    /// Build the welcome notification for a work item.
    pub fn welcome(item: &WorkItem) -> Self {
        Self {
            subject: WELCOME_SUBJECT.to_string(),
            body: format!("Hello {}, welcome to our platform!", item.name),
            recipient_email: item.email.clone(),
            idempotency_key: item.idempotency_key.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_item_from_request() {
        let request = SignupRequest {
            name: " Ana ".to_string(),
            email: "Ana@X.com ".to_string(),
        };

        let item = WorkItem::from_request(&request);

        assert_eq!(item.name, "Ana");
        assert_eq!(item.email, "ana@x.com");
        assert_eq!(item.idempotency_key, idempotency_key("ana@x.com"));
        assert!(item.key_matches());
    }

    #[test]
    fn test_tampered_work_item_fails_key_check() {
        let mut item = WorkItem::from_request(&SignupRequest {
            name: "Ana".to_string(),
            email: "ana@x.com".to_string(),
        });
        item.email = "mallory@x.com".to_string();
        assert!(!item.key_matches());
    }

    #[test]
    fn test_welcome_notification() {
        let item = WorkItem::from_request(&SignupRequest {
            name: "Ana".to_string(),
            email: "Ana@X.com ".to_string(),
        });

        let message = NotificationMessage::welcome(&item);

        assert_eq!(message.subject, "Welcome to Our Platform!");
        assert_eq!(message.body, "Hello Ana, welcome to our platform!");
        assert_eq!(message.recipient_email, "ana@x.com");
        assert_eq!(message.idempotency_key, item.idempotency_key);
    }

    #[test]
    fn test_work_item_wire_format() {
        let json = r#"{"name":"Ana","email":"ana@x.com","idempotency_key":"abc"}"#;
        let item: WorkItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.name, "Ana");
        assert_eq!(item.idempotency_key, "abc");
    }
}
