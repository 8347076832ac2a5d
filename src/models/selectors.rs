// src/models/selectors.rs

//! Structural extraction profile for a source.

use scraper::Selector;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// CSS selectors used to pick fields out of a source's pages.
///
/// Every field selector is optional; extraction falls back to page
/// metadata (`og:*` tags, `<time>`, paragraphs) when one is absent or
/// matches nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorProfile {
    /// Selector for candidate detail links on the listing page
    #[serde(default = "default_link_selector")]
    pub link_selector: String,

    /// HTML attribute holding the link target (usually "href")
    #[serde(default = "default_attr_name")]
    pub attr_name: String,

    /// Selector for the title on the detail page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_selector: Option<String>,

    /// Selector for the publication date on the detail page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_selector: Option<String>,

    /// Selector for the category label on the detail page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_selector: Option<String>,

    /// Selector for the main body container on the detail page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_selector: Option<String>,
}

fn default_link_selector() -> String {
    "a[href]".to_string()
}

fn default_attr_name() -> String {
    "href".to_string()
}

impl Default for SelectorProfile {
    fn default() -> Self {
        Self {
            link_selector: default_link_selector(),
            attr_name: default_attr_name(),
            title_selector: None,
            date_selector: None,
            category_selector: None,
            body_selector: None,
        }
    }
}

impl SelectorProfile {
    /// Parse every configured selector, reporting the first invalid one.
    pub fn compile(&self) -> Result<CompiledProfile> {
        Ok(CompiledProfile {
            link: parse_selector(&self.link_selector)?,
            attr_name: self.attr_name.clone(),
            title: parse_optional(self.title_selector.as_deref())?,
            date: parse_optional(self.date_selector.as_deref())?,
            category: parse_optional(self.category_selector.as_deref())?,
            body: parse_optional(self.body_selector.as_deref())?,
        })
    }
}

/// Selectors parsed once per source per cycle.
#[derive(Debug, Clone)]
pub struct CompiledProfile {
    pub link: Selector,
    pub attr_name: String,
    pub title: Option<Selector>,
    pub date: Option<Selector>,
    pub category: Option<Selector>,
    pub body: Option<Selector>,
}

pub fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

fn parse_optional(s: Option<&str>) -> Result<Option<Selector>> {
    s.map(parse_selector).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selector_valid() {
        assert!(parse_selector("div.class").is_ok());
        assert!(parse_selector("article .entry-content p").is_ok());
    }

    #[test]
    fn test_parse_selector_invalid() {
        assert!(parse_selector("[[invalid").is_err());
    }

    #[test]
    fn test_compile_reports_bad_optional_selector() {
        let profile = SelectorProfile {
            body_selector: Some("div[".to_string()),
            ..SelectorProfile::default()
        };
        assert!(matches!(
            profile.compile(),
            Err(AppError::Selector { .. })
        ));
    }
}
