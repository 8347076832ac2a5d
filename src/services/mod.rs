//! Service layer for the harvester.
//!
//! This module contains the fetching and extraction logic:
//! - Request pacing (`PacingController`)
//! - Page retrieval strategies (`DirectFetcher`, `RenderedFetcher`)
//! - Challenge heuristics (`ChallengeDetector`)
//! - Direct-then-rendered fallback (`FallbackFetcher`)
//! - Listing link discovery and detail extraction (`DetailFetcher`, `HtmlExtractor`)
//! - Attachment download and text extraction (`AttachmentExtractor`)

mod attachments;
mod challenge;
mod detail;
mod direct;
mod extract;
mod fallback;
mod listing;
mod pacing;
mod rendered;
mod strategy;

pub use attachments::{AttachmentExtractor, DocumentText, TextExtractor};
pub use challenge::ChallengeDetector;
pub use detail::{DetailBatch, DetailFetcher, assemble};
pub use direct::DirectFetcher;
pub use extract::{ContentExtractor, DetailPage, ExtractedPage, HtmlExtractor};
pub use fallback::{FallbackFetcher, FetchOutcome, FetchState};
pub use listing::detail_links;
pub use pacing::PacingController;
pub use rendered::RenderedFetcher;
pub use strategy::{
    ChallengeSignal, FetchContext, FetchResponse, FetchStrategy, PageKind, StatusSignal,
};
