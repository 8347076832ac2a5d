//! Announcement data structures, identity and content hashing.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Publication date, or an explicit marker that none could be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PublishedDate {
    #[default]
    Unknown,
    Known(NaiveDate),
}

impl PublishedDate {
    pub const UNKNOWN: &'static str = "unknown";

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Known(d) => Some(*d),
            Self::Unknown => None,
        }
    }
}

impl From<Option<NaiveDate>> for PublishedDate {
    fn from(value: Option<NaiveDate>) -> Self {
        value.map_or(Self::Unknown, Self::Known)
    }
}

impl fmt::Display for PublishedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Unknown => f.write_str(Self::UNKNOWN),
        }
    }
}

impl Serialize for PublishedDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PublishedDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == Self::UNKNOWN {
            return Ok(Self::Unknown);
        }
        NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map(Self::Known)
            .map_err(serde::de::Error::custom)
    }
}

/// Status derived from the announcement's own text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnnouncementStatus {
    /// A call whose deadline has not passed
    Open,
    /// A call whose deadline has passed
    Closed,
    /// Informational item without a deadline
    #[default]
    Published,
}

/// Outcome of text extraction for one attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Ok,
    Empty,
    Failed,
}

/// A document linked from an announcement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,

    /// Canonical URL of the document
    pub url: String,

    pub mime_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    pub extraction_status: ExtractionStatus,

    #[serde(default)]
    pub size_bytes: u64,
}

/// A normalized announcement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Announcement {
    /// Stable identifier, see [`announcement_id`]
    pub id: String,

    pub source_id: String,

    pub source_name: String,

    pub title: String,

    pub date: PublishedDate,

    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub status: AnnouncementStatus,

    #[serde(default)]
    pub highlight: bool,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub body: String,

    #[serde(default)]
    pub attachments: Vec<Attachment>,

    /// Digest over title, body and attachment URLs
    pub content_hash: String,

    pub first_seen_at: DateTime<Utc>,

    pub fetched_at: DateTime<Utc>,

    /// Detail page URL
    pub source_url: String,
}

impl Announcement {
    /// Recompute the content hash from the current fields.
    pub fn compute_content_hash(&self) -> String {
        let urls: Vec<&str> = self.attachments.iter().map(|a| a.url.as_str()).collect();
        content_hash(&self.title, &self.body, &urls)
    }

    /// Case-insensitive keyword search over the visible text.
    pub fn mentions(&self, keyword: &str) -> bool {
        let needle = keyword.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        [&self.title, &self.summary, &self.body]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle))
            || self
                .attachments
                .iter()
                .filter_map(|a| a.text.as_deref())
                .any(|text| text.to_lowercase().contains(&needle))
    }

    /// Format announcement for display using a template.
    ///
    /// Supported placeholders:
    /// - `{id}`, `{source_id}`, `{source}`, `{category}`
    /// - `{title}`, `{date}`, `{status}`, `{link}`
    pub fn format(&self, template: &str) -> String {
        let status = match self.status {
            AnnouncementStatus::Open => "open",
            AnnouncementStatus::Closed => "closed",
            AnnouncementStatus::Published => "published",
        };
        template
            .replace("{id}", &self.id)
            .replace("{source_id}", &self.source_id)
            .replace("{source}", &self.source_name)
            .replace("{category}", &self.category)
            .replace("{title}", &self.title)
            .replace("{date}", &self.date.to_string())
            .replace("{status}", status)
            .replace("{link}", &self.source_url)
    }
}

/// Collapse runs of whitespace so formatting-only changes hash identically.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Digest over normalized title, body and sorted attachment identifiers.
pub fn content_hash(title: &str, body: &str, attachment_urls: &[&str]) -> String {
    let mut urls: Vec<&str> = attachment_urls.to_vec();
    urls.sort_unstable();
    urls.dedup();

    let mut hasher = Sha256::new();
    hasher.update(normalize_text(title).as_bytes());
    hasher.update([0x1f]);
    hasher.update(normalize_text(body).as_bytes());
    for url in urls {
        hasher.update([0x1e]);
        hasher.update(url.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Stable announcement id.
///
/// Derived from the source id and canonical detail URL. When the URL
/// cannot serve as identity (`canonical_url` is `None`), the normalized
/// title and date are hashed instead.
pub fn announcement_id(
    source_id: &str,
    canonical_url: Option<&str>,
    title: &str,
    date: PublishedDate,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0x1f]);
    match canonical_url {
        Some(url) => {
            hasher.update(b"url:");
            hasher.update(url.as_bytes());
        }
        None => {
            hasher.update(b"content:");
            hasher.update(normalize_text(title).to_lowercase().as_bytes());
            hasher.update([0x1f]);
            hasher.update(date.to_string().as_bytes());
        }
    }
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}", source_id, &digest[..16])
}
