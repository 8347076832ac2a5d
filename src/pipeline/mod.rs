//! Cycle-level stages built on top of the fetch services.
//!
//! - `diff`: classify extracted records against the store
//! - `notify`: subscriber digests and delivery
//! - `lock`: cross-process run lock
//! - `orchestrator`: one full cycle over all sources

pub mod diff;
pub mod lock;
pub mod notify;
pub mod orchestrator;

pub use diff::{AppliedChanges, ChangeDetector, ChangeSet};
pub use lock::RunLock;
#[cfg(feature = "email")]
pub use notify::SmtpTransport;
pub use notify::{DispatchReport, Digest, LogTransport, NotificationDispatcher, Transport};
pub use orchestrator::FetchOrchestrator;
