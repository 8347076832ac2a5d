// src/models/subscriber.rs

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Announcement;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// Lower-case and validate an email address.
pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    if !EMAIL_RE.is_match(&email) {
        return Err(AppError::validation(format!("invalid email '{email}'")));
    }
    Ok(email)
}

/// What a subscriber wants to hear about. Empty sets mean "all".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriberFilter {
    #[serde(default)]
    pub sources: BTreeSet<String>,

    #[serde(default)]
    pub categories: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
}

impl SubscriberFilter {
    pub fn matches(&self, announcement: &Announcement) -> bool {
        if !self.sources.is_empty() && !self.sources.contains(&announcement.source_id) {
            return false;
        }
        if !self.categories.is_empty()
            && !self
                .categories
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&announcement.category))
        {
            return false;
        }
        match &self.keyword {
            Some(keyword) => announcement.mentions(keyword),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscriber {
    pub email: String,

    #[serde(default)]
    pub filter: SubscriberFilter,

    #[serde(default = "default_active")]
    pub active: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Subscriber {
    /// A new, active subscriber. The email is validated and lower-cased.
    pub fn new(email: &str, filter: SubscriberFilter) -> Result<Self> {
        let now = Utc::now();
        Ok(Self {
            email: normalize_email(email)?,
            filter,
            active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn wants(&self, announcement: &Announcement) -> bool {
        self.active && self.filter.matches(announcement)
    }
}
