// src/services/extract.rs

//! Field extraction from announcement detail pages.
//!
//! Every field degrades on its own: a missing selector match falls back
//! to page metadata, then to generic markup, then to a neutral value.

use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::Result;
use crate::models::{
    AnnouncementStatus, CompiledProfile, ExtractionConfig, PublishedDate, Source, parse_selector,
};
use crate::utils::date::{find_date, parse_date};
use crate::utils::text::{clean, contains_any, truncate};
use crate::utils::url::{canonicalize, extension, resolve_url};

const SUMMARY_GRAPHEMES: usize = 400;

/// Fields pulled out of one detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    pub title: String,
    pub summary: String,
    pub date: PublishedDate,
    pub category: String,
    pub body: String,
    pub status: AnnouncementStatus,
    pub highlight: bool,
    /// Document links found on the page, resolved and de-duplicated
    pub attachment_links: Vec<Url>,
}

/// Input to a [`ContentExtractor`].
pub struct DetailPage<'a> {
    pub html: &'a str,
    pub url: &'a Url,
    pub source: &'a Source,
    pub profile: &'a CompiledProfile,
}

/// Turns a fetched detail page into structured fields.
pub trait ContentExtractor: Send + Sync {
    fn extract(&self, page: &DetailPage<'_>) -> Result<ExtractedPage>;
}

/// Generic selectors parsed once.
struct Markup {
    og_title: Selector,
    title: Selector,
    og_description: Selector,
    meta_description: Selector,
    published_time: Selector,
    date_published: Selector,
    time: Selector,
    paragraph: Selector,
    anchor: Selector,
}

impl Markup {
    fn new() -> Result<Self> {
        Ok(Self {
            og_title: parse_selector(r#"meta[property="og:title"]"#)?,
            title: parse_selector("title")?,
            og_description: parse_selector(r#"meta[property="og:description"]"#)?,
            meta_description: parse_selector(r#"meta[name="description"]"#)?,
            published_time: parse_selector(r#"meta[property="article:published_time"]"#)?,
            date_published: parse_selector(r#"[itemprop="datePublished"]"#)?,
            time: parse_selector("time[datetime]")?,
            paragraph: parse_selector("p")?,
            anchor: parse_selector("a[href]")?,
        })
    }
}

/// `scraper`-based extractor driven by a source's selector profile.
pub struct HtmlExtractor {
    config: ExtractionConfig,
    markup: Markup,
}

impl HtmlExtractor {
    pub fn new(config: ExtractionConfig) -> Result<Self> {
        Ok(Self {
            config,
            markup: Markup::new()?,
        })
    }

    /// Extract with an explicit reference date for deadline status.
    pub fn extract_at(&self, page: &DetailPage<'_>, today: NaiveDate) -> ExtractedPage {
        let document = Html::parse_document(page.html);
        let profile = page.profile;

        let title = self.title(&document, profile, page.url);
        let paragraphs = self.paragraphs(&document);
        let summary = self.summary(&document, &paragraphs);
        let date = self.date(&document, profile);
        let category = profile
            .category
            .as_ref()
            .and_then(|sel| first_text(&document, sel))
            .unwrap_or_else(|| page.source.default_category.clone());
        let body = profile
            .body
            .as_ref()
            .and_then(|sel| document.select(sel).next())
            .map(block_text)
            .filter(|b| !b.is_empty())
            .or_else(|| {
                let kept: Vec<&str> = paragraphs
                    .iter()
                    .take(self.config.max_paragraphs)
                    .map(String::as_str)
                    .collect();
                (!kept.is_empty()).then(|| kept.join("\n\n"))
            })
            .unwrap_or_else(|| summary.clone());

        let status = self.status(&title, &body, today);
        let highlight = contains_any(&title, &self.config.highlight_keywords);
        let attachment_links = self.attachment_links(&document, page.url);

        ExtractedPage {
            title,
            summary,
            date,
            category,
            body,
            status,
            highlight,
            attachment_links,
        }
    }

    fn title(&self, document: &Html, profile: &CompiledProfile, url: &Url) -> String {
        profile
            .title
            .as_ref()
            .and_then(|sel| first_text(document, sel))
            .or_else(|| first_attr(document, &self.markup.og_title, "content"))
            .or_else(|| first_text(document, &self.markup.title))
            .unwrap_or_else(|| url.to_string())
    }

    fn paragraphs(&self, document: &Html) -> Vec<String> {
        document
            .select(&self.markup.paragraph)
            .map(|p| clean(&p.text().collect::<String>()))
            .filter(|p| !p.is_empty())
            .collect()
    }

    fn summary(&self, document: &Html, paragraphs: &[String]) -> String {
        let raw = first_attr(document, &self.markup.og_description, "content")
            .or_else(|| first_attr(document, &self.markup.meta_description, "content"))
            .or_else(|| paragraphs.first().cloned())
            .unwrap_or_default();
        truncate(&raw, SUMMARY_GRAPHEMES)
    }

    fn date(&self, document: &Html, profile: &CompiledProfile) -> PublishedDate {
        let from_selector = profile.date.as_ref().and_then(|sel| {
            let el = document.select(sel).next()?;
            el.value()
                .attr("datetime")
                .and_then(parse_date)
                .or_else(|| parse_date(&el.text().collect::<String>()))
        });
        from_selector
            .or_else(|| {
                first_attr(document, &self.markup.published_time, "content")
                    .and_then(|v| parse_date(&v))
            })
            .or_else(|| {
                let el = document.select(&self.markup.date_published).next()?;
                el.value()
                    .attr("content")
                    .or_else(|| el.value().attr("datetime"))
                    .and_then(parse_date)
                    .or_else(|| parse_date(&el.text().collect::<String>()))
            })
            .or_else(|| {
                first_attr(document, &self.markup.time, "datetime").and_then(|v| parse_date(&v))
            })
            .into()
    }

    /// Deadline phrases decide open/closed; otherwise call keywords mean open.
    fn status(&self, title: &str, body: &str, today: NaiveDate) -> AnnouncementStatus {
        let text = format!("{title}\n{body}").to_lowercase();
        for phrase in &self.config.deadline_phrases {
            let phrase = phrase.to_lowercase();
            if phrase.is_empty() {
                continue;
            }
            for (idx, _) in text.match_indices(&phrase) {
                let window: String = text[idx + phrase.len()..].chars().take(60).collect();
                if let Some((deadline, _)) = find_date(&window) {
                    return if deadline >= today {
                        AnnouncementStatus::Open
                    } else {
                        AnnouncementStatus::Closed
                    };
                }
            }
        }
        if contains_any(title, &self.config.call_keywords) {
            AnnouncementStatus::Open
        } else {
            AnnouncementStatus::Published
        }
    }

    fn attachment_links(&self, document: &Html, page_url: &Url) -> Vec<Url> {
        let mut seen = HashSet::new();
        document
            .select(&self.markup.anchor)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| resolve_url(page_url, href))
            .filter(|url| {
                extension(url).is_some_and(|ext| {
                    self.config
                        .attachment_extensions
                        .iter()
                        .any(|allowed| allowed.eq_ignore_ascii_case(&ext))
                })
            })
            .filter(|url| seen.insert(canonicalize(url.as_str()).unwrap_or_else(|| url.to_string())))
            .collect()
    }
}

impl ContentExtractor for HtmlExtractor {
    fn extract(&self, page: &DetailPage<'_>) -> Result<ExtractedPage> {
        Ok(self.extract_at(page, Utc::now().date_naive()))
    }
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .map(|el| clean(&el.text().collect::<String>()))
        .find(|t| !t.is_empty())
}

fn first_attr(document: &Html, selector: &Selector, attr: &str) -> Option<String> {
    document
        .select(selector)
        .filter_map(|el| el.value().attr(attr))
        .map(clean)
        .find(|v| !v.is_empty())
}

/// Text of a container, one line per paragraph-like child.
fn block_text(el: ElementRef<'_>) -> String {
    let blocks: Vec<String> = el
        .children()
        .filter_map(ElementRef::wrap)
        .map(|child| clean(&child.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .collect();
    if blocks.is_empty() {
        clean(&el.text().collect::<String>())
    } else {
        blocks.join("\n\n")
    }
}
