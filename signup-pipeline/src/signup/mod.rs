//! Signup domain types and the pure functions that derive them.
//!
//! ```text
//! SignupRequest → WorkItem (normalized, keyed) → NotificationMessage
//! ```

pub mod email;
pub mod types;

pub use email::{idempotency_key, is_valid_email, normalize_email};
pub use types::{NotificationMessage, SignupRequest, WorkItem, WELCOME_SUBJECT};
