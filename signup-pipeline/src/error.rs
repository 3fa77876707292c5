//! Error types shared by the intake gate, the worker and their collaborators.

use thiserror::Error;

/// Why a signup submission was not accepted.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// The payload is not a JSON object.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Required fields are absent/empty, or present but not well-formed.
    #[error("{}", describe_validation(.missing_fields, .invalid_fields))]
    ValidationError {
        missing_fields: Vec<&'static str>,
        invalid_fields: Vec<&'static str>,
    },

    /// The queue could not take the item; the caller may retry.
    #[error("signup queue unavailable: {0}")]
    ServiceUnavailable(String),
}

impl IntakeError {
    /// Whether the caller is at fault (as opposed to the infrastructure).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, IntakeError::ServiceUnavailable(_))
    }
}

fn describe_validation(missing: &[&'static str], invalid: &[&'static str]) -> String {
    let mut parts = Vec::new();
    match missing {
        [] => {}
        [one] => parts.push(format!("{one} is required")),
        many => parts.push(format!("{} are required", many.join(" and "))),
    }
    for field in invalid {
        parts.push(format!("{field} is not valid"));
    }
    parts.join("; ")
}

/// Why a leased work item could not be turned into a published notification.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("malformed work item: {0}")]
    MalformedInput(String),

    #[error("idempotency key does not match recipient {email}")]
    IntegrityError { email: String },

    #[error("transient publish failure: {0}")]
    PublishTransient(String),

    #[error("permanent publish failure: {0}")]
    PublishPermanent(String),
}

impl ProcessError {
    /// Terminal errors are dead-lettered; the rest are left for redelivery.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessError::PublishTransient(_))
    }
}

/// Failures talking to the durable queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("queue operation timed out after {0}ms")]
    Timeout(u64),

    /// The lease was lost (expired or already settled).
    #[error("no active lease {0}")]
    UnknownLease(u64),
}

/// Failures publishing to the notification channel.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),
}

impl From<PublishError> for ProcessError {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::Transient(msg) => ProcessError::PublishTransient(msg),
            PublishError::Permanent(msg) => ProcessError::PublishPermanent(msg),
        }
    }
}
