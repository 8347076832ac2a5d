//! Storage abstractions for announcement persistence.
//!
//! Records are JSON documents kept in a blob store, local or S3.
//!
//! ## Directory Structure
//!
//! ```text
//! data/
//! ├── announcements/
//! │   └── {source_id}.json      # Records of one source, keyed by id
//! ├── outbox.json               # Changed ids not yet fully notified
//! ├── subscribers.json          # Subscribers, keyed by email
//! ├── notifications/
//! │   └── {sha256(email)}.json  # Ids already sent to one subscriber
//! └── runs/
//!     ├── {run_id}.json         # One FetchRun per cycle
//!     └── latest.json
//! ```

pub mod json;
pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Announcement, FetchRun, Subscriber};

// Re-export for convenience
pub use json::DocumentStore;
pub use local::LocalBlobs;
#[cfg(feature = "s3")]
pub use s3::S3Blobs;

/// Raw key/value byte storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read an object, returning `None` if it does not exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replace an object as a whole.
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Human-readable location, for logs.
    fn location(&self, key: &str) -> String;
}

/// Durable announcement records and run audit records.
#[async_trait]
pub trait AnnouncementStore: Send + Sync {
    /// Insert or replace a record by id.
    async fn upsert(&self, announcement: &Announcement) -> Result<()>;

    /// All records of one source.
    async fn get_all(&self, source_id: &str) -> Result<Vec<Announcement>>;

    /// Stored content hash for an id, if the record exists.
    async fn get_content_hash(&self, id: &str) -> Result<Option<String>>;

    /// Persist a run record; never overwrites an earlier run.
    async fn append_run(&self, run: &FetchRun) -> Result<()>;

    async fn last_run(&self) -> Result<Option<FetchRun>>;

    /// Queue ids of changed records for notification.
    async fn enqueue_pending(&self, ids: &[String]) -> Result<()>;

    /// Stored records whose ids are still queued.
    async fn pending(&self) -> Result<Vec<Announcement>>;

    /// Drop ids from the queue once every interested subscriber has them.
    async fn clear_pending(&self, ids: &[String]) -> Result<()>;
}

/// Subscribers and their per-subscriber notification ledgers.
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn list_active(&self) -> Result<Vec<Subscriber>>;

    /// Create or reactivate a subscriber; the stored filter is replaced.
    async fn subscribe(&self, subscriber: Subscriber) -> Result<Subscriber>;

    /// Deactivate a subscriber. Returns `false` when the email is unknown.
    async fn unsubscribe(&self, email: &str) -> Result<bool>;

    /// Announcement ids already delivered to this address.
    async fn notified_ids(&self, email: &str) -> Result<HashSet<String>>;

    /// Extend the ledger after a confirmed delivery.
    async fn record_notified(&self, email: &str, ids: &[String]) -> Result<()>;
}
