// src/services/strategy.rs

//! The "retrieve a page" capability shared by direct and rendered fetching.

use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// What kind of page is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Listing,
    Detail,
    Attachment,
}

/// Per-request context passed to every strategy.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub source_id: String,
    pub kind: PageKind,
    pub cancel: CancellationToken,
}

impl FetchContext {
    pub fn new(source_id: impl Into<String>, kind: PageKind, cancel: CancellationToken) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            cancel,
        }
    }

    pub fn with_kind(&self, kind: PageKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }
}

/// Why a response was classified as a bot challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeSignal {
    /// Body contained a known challenge marker
    Marker(String),
    /// Request was redirected to an interstitial
    Redirect(String),
    /// Anti-bot status code
    Status(u16),
}

impl fmt::Display for ChallengeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Marker(m) => write!(f, "marker '{m}'"),
            Self::Redirect(u) => write!(f, "redirected to {u}"),
            Self::Status(s) => write!(f, "status {s}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSignal {
    /// HTTP status, when the strategy sees one
    pub http_status: Option<u16>,
    pub challenge: Option<ChallengeSignal>,
}

impl StatusSignal {
    pub fn ok(http_status: Option<u16>) -> Self {
        Self {
            http_status,
            challenge: None,
        }
    }

    pub fn challenge_detected(&self) -> bool {
        self.challenge.is_some()
    }
}

/// A retrieved page or document.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    /// URL after redirects
    pub final_url: String,
    pub signal: StatusSignal,
}

impl FetchResponse {
    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// MIME type without parameters, lower-cased.
    pub fn mime(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_lowercase())
            .filter(|ct| !ct.is_empty())
    }
}

/// Retrieves a page. Implementations must honour `ctx.cancel` and their
/// own timeouts; they never retry.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, url: &str, ctx: &FetchContext) -> Result<FetchResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_strips_parameters() {
        let resp = FetchResponse {
            body: b"<html></html>".to_vec(),
            content_type: Some("Text/HTML; charset=UTF-8".into()),
            final_url: "https://a.example/".into(),
            signal: StatusSignal::ok(Some(200)),
        };
        assert_eq!(resp.mime().as_deref(), Some("text/html"));
        assert!(!resp.signal.challenge_detected());
    }

    #[test]
    fn test_signal_display() {
        assert_eq!(ChallengeSignal::Status(429).to_string(), "status 429");
    }
}
