//! Signup pipeline - queue-decoupled signup intake and welcome notifications.
//!
//! This library provides shared modules for the two binaries:
//! - `signup-intake`: Thin web server that validates and enqueues signups
//! - `signup-worker`: Consumer that publishes welcome notifications
//!
//! ## Architecture
//!
//! ```text
//! POST /signup → Intake Gate → signup queue → Worker → welcome exchange → subscribers
//!                                                 └→ dead-letter queue
//! ```

pub mod broker;
pub mod channel;
pub mod config;
pub mod error;
pub mod intake;
pub mod queue;
pub mod shutdown;
pub mod signup;
pub mod web;
pub mod worker;

// Re-export commonly used types
pub use broker::{Broker, Topology};
pub use channel::{AmqpFanout, MemoryChannel, NotificationChannel};
pub use config::Config;
pub use error::{IntakeError, ProcessError, PublishError, QueueError};
pub use intake::{Accepted, IntakeGate};
pub use queue::{AmqpQueue, DeadLetter, LeasedMessage, MemoryQueue, MessageId, WorkQueue};
pub use shutdown::shutdown_signal;
pub use signup::{NotificationMessage, SignupRequest, WorkItem};
pub use web::AppState;
pub use worker::{BatchReport, NotificationWorker, WorkerSettings};
