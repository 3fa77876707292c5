//! Intake gate: validate a signup submission and enqueue one work item.
//!
//! The gate never retries an enqueue. A failed enqueue surfaces as
//! `ServiceUnavailable` and the caller decides whether to submit again; the
//! content-derived key makes such a resubmission recognisable downstream.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::IntakeError;
use crate::queue::{bounded, MessageId, WorkQueue};
use crate::signup::{is_valid_email, normalize_email, SignupRequest, WorkItem};

/// Acknowledgement of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub message_id: MessageId,
    pub idempotency_key: String,
}

pub struct IntakeGate {
    queue: Arc<dyn WorkQueue>,
    timeout: Duration,
}

impl IntakeGate {
    pub fn new(queue: Arc<dyn WorkQueue>, timeout: Duration) -> Self {
        Self { queue, timeout }
    }

    /// Validate `raw_payload` and enqueue exactly one work item for it.
    pub async fn submit(&self, raw_payload: &[u8]) -> Result<Accepted, IntakeError> {
        let request = parse_signup(raw_payload)?;
        let item = WorkItem::from_request(&request);

        let body = serde_json::to_vec(&item)
            .map_err(|e| IntakeError::MalformedInput(format!("unencodable work item: {e}")))?;

        let message_id = bounded(
            self.timeout,
            self.queue.enqueue(&item.idempotency_key, &body),
        )
        .await
        .map_err(|e| {
            warn!(error = %e, idempotency_key = %item.idempotency_key, "intake_enqueue_failed");
            IntakeError::ServiceUnavailable(e.to_string())
        })?;

        info!(
            message_id = %message_id,
            idempotency_key = %item.idempotency_key,
            "intake_signup_enqueued"
        );

        Ok(Accepted {
            message_id,
            idempotency_key: item.idempotency_key,
        })
    }
}

/// Parse and validate a raw JSON signup payload.
pub fn parse_signup(raw_payload: &[u8]) -> Result<SignupRequest, IntakeError> {
    let value: Value = serde_json::from_slice(raw_payload)
        .map_err(|e| IntakeError::MalformedInput(e.to_string()))?;

    let Value::Object(fields) = value else {
        return Err(IntakeError::MalformedInput(
            "expected a JSON object".to_string(),
        ));
    };

    let field = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let name = field("name");
    let email = field("email");

    let mut missing_fields = Vec::new();
    if name.is_none() {
        missing_fields.push("name");
    }
    if email.is_none() {
        missing_fields.push("email");
    }

    let mut invalid_fields = Vec::new();
    if let Some(email) = &email {
        if !is_valid_email(&normalize_email(email)) {
            invalid_fields.push("email");
        }
    }

    match (name, email) {
        (Some(name), Some(email)) if invalid_fields.is_empty() => Ok(SignupRequest { name, email }),
        _ => Err(IntakeError::ValidationError {
            missing_fields,
            invalid_fields,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::signup::idempotency_key;

    fn gate() -> (IntakeGate, Arc<MemoryQueue>) {
        let queue = Arc::new(MemoryQueue::new(5, Duration::from_secs(30)));
        let gate = IntakeGate::new(queue.clone(), Duration::from_secs(1));
        (gate, queue)
    }

    #[tokio::test]
    async fn test_submit_enqueues_normalized_item() {
        let (gate, queue) = gate();

        let accepted = gate
            .submit(br#"{"name": "Ana", "email": "Ana@X.com "}"#)
            .await
            .unwrap();

        assert_eq!(accepted.idempotency_key, idempotency_key("ana@x.com"));
        assert_eq!(accepted.message_id.0, accepted.idempotency_key);

        let bodies = queue.bodies().await;
        assert_eq!(bodies.len(), 1);
        let item: WorkItem = serde_json::from_slice(&bodies[0]).unwrap();
        assert_eq!(
            item,
            WorkItem {
                name: "Ana".to_string(),
                email: "ana@x.com".to_string(),
                idempotency_key: idempotency_key("ana@x.com"),
            }
        );
    }

    #[tokio::test]
    async fn test_submit_twice_yields_identical_keys() {
        let (gate, queue) = gate();
        let payload = br#"{"name": "Ana", "email": "ana@x.com"}"#;

        let first = gate.submit(payload).await.unwrap();
        let second = gate.submit(payload).await.unwrap();

        assert_eq!(first.idempotency_key, second.idempotency_key);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_missing_fields_are_rejected() {
        let (gate, queue) = gate();

        let payloads: [&[u8]; 5] = [
            br#"{"email": "ana@x.com"}"#,
            br#"{"name": "Ana"}"#,
            br#"{"name": "   ", "email": "ana@x.com"}"#,
            br#"{"name": "Ana", "email": 42}"#,
            br#"{}"#,
        ];

        for payload in payloads {
            let err = gate.submit(payload).await.unwrap_err();
            assert!(
                matches!(err, IntakeError::ValidationError { .. }),
                "unexpected error for {}: {err:?}",
                String::from_utf8_lossy(payload)
            );
        }

        assert!(queue.is_empty().await);
    }

    #[test]
    fn test_missing_fields_are_listed() {
        let err = parse_signup(b"{}").unwrap_err();
        match err {
            IntakeError::ValidationError {
                missing_fields,
                invalid_fields,
            } => {
                assert_eq!(missing_fields, vec!["name", "email"]);
                assert!(invalid_fields.is_empty());
            }
            other => panic!("Expected ValidationError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_email_is_rejected() {
        let (gate, queue) = gate();

        let err = gate
            .submit(br#"{"name": "Ana", "email": "not-an-address"}"#)
            .await
            .unwrap_err();

        match err {
            IntakeError::ValidationError { invalid_fields, .. } => {
                assert_eq!(invalid_fields, vec!["email"]);
            }
            other => panic!("Expected ValidationError, got {other:?}"),
        }
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_rejected() {
        let (gate, queue) = gate();

        let payloads: [&[u8]; 4] = [b"not json", b"[1, 2]", b"\"ana@x.com\"", b""];

        for payload in payloads {
            let err = gate.submit(payload).await.unwrap_err();
            assert!(matches!(err, IntakeError::MalformedInput(_)));
        }

        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_queue_outage_is_service_unavailable() {
        let (gate, queue) = gate();
        queue.set_unavailable(true);

        let err = gate
            .submit(br#"{"name": "Ana", "email": "ana@x.com"}"#)
            .await
            .unwrap_err();

        assert!(matches!(err, IntakeError::ServiceUnavailable(_)));
        assert!(!err.is_client_error());

        queue.set_unavailable(false);
        assert!(queue.is_empty().await);
    }
}
