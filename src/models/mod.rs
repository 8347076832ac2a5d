// src/models/mod.rs

//! Domain models for the harvester.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod announcement;
mod config;
mod run;
mod selectors;
mod source;
mod subscriber;

// Re-export all public types
pub use announcement::{
    Announcement, AnnouncementStatus, Attachment, ExtractionStatus, PublishedDate,
    announcement_id, content_hash, normalize_text,
};
pub use config::{
    ChallengeConfig, Config, ExtractionConfig, FetchConfig, NotifyConfig, PathsConfig,
    RenderConfig,
};
pub use run::{FetchRun, SourceOutcome, SourceReport};
pub use selectors::{CompiledProfile, SelectorProfile, parse_selector};
pub use source::{PacingOverride, Source, SourceRegistry};
pub use subscriber::{Subscriber, SubscriberFilter, normalize_email};
