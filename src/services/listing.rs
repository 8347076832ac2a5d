// src/services/listing.rs

//! Detail-link discovery on a source's listing page.

use std::collections::HashSet;

use regex::Regex;
use scraper::Html;
use url::Url;

use crate::error::Result;
use crate::models::{CompiledProfile, Source};
use crate::utils::url::{canonicalize, resolve_url, same_origin};

/// Candidate detail links, in page order, de-duplicated and capped.
///
/// A link is kept when it shares the source's origin, is not the listing
/// page itself, and either matches the detail pattern or, with no pattern
/// configured, lives under the base URL.
pub fn detail_links(
    html: &str,
    page_url: &Url,
    source: &Source,
    profile: &CompiledProfile,
    cap: usize,
) -> Result<Vec<Url>> {
    let pattern = source.detail_regex()?;
    let base = source.base()?;
    let listing_canonical = canonicalize(&source.listing_url);
    let page_canonical = canonicalize(page_url.as_str());

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&profile.link) {
        if links.len() >= cap {
            break;
        }
        let Some(href) = element.value().attr(&profile.attr_name) else {
            continue;
        };
        let Some(url) = resolve_url(page_url, href) else {
            continue;
        };
        let Some(canonical) = canonicalize(url.as_str()) else {
            continue;
        };
        if Some(&canonical) == listing_canonical.as_ref()
            || Some(&canonical) == page_canonical.as_ref()
        {
            continue;
        }
        if !accepts(&url, pattern.as_ref(), &base) {
            continue;
        }
        if seen.insert(canonical) {
            links.push(url);
        }
    }

    Ok(links)
}

fn accepts(url: &Url, pattern: Option<&Regex>, base: &Url) -> bool {
    if !same_origin(url, base) {
        return false;
    }
    match pattern {
        Some(re) => re.is_match(url.as_str()),
        None => url.as_str().starts_with(base.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceRegistry;

    const LISTING: &str = r##"
        <html><body>
          <nav><a href="/">Home</a><a href="/pnrr/">PNRR</a></nav>
          <ul>
            <li><a href="/pnrr/bando-tutor/">Bando tutor</a></li>
            <li><a href="/pnrr/bando-tutor/#allegati">Bando tutor (allegati)</a></li>
            <li><a href="avviso-esperti">Avviso esperti</a></li>
            <li><a href="https://altro.example.org/pnrr/x">Esterno</a></li>
            <li><a href="mailto:segreteria@scuola.it">Scrivici</a></li>
            <li><a href="/pnrr/selezione-interna?utm_source=fb">Selezione</a></li>
          </ul>
        </body></html>
    "##;

    fn source(pattern: Option<&str>) -> Source {
        let mut toml = String::from(
            "[sources.ic]\nname = \"IC\"\nlisting_url = \"https://scuola.it/pnrr/\"\n",
        );
        if let Some(p) = pattern {
            toml.push_str(&format!("detail_pattern = '{p}'\n"));
        }
        SourceRegistry::from_toml_str(&toml).unwrap().all()[0].clone()
    }

    fn links(source: &Source, cap: usize) -> Vec<String> {
        let profile = source.selectors.compile().unwrap();
        let page = Url::parse(&source.listing_url).unwrap();
        detail_links(LISTING, &page, source, &profile, cap)
            .unwrap()
            .into_iter()
            .map(|u| u.to_string())
            .collect()
    }

    #[test]
    fn test_pattern_filter_and_dedupe() {
        let src = source(Some("/pnrr/[a-z-]+/?(\\?.*)?$"));
        assert_eq!(
            links(&src, 10),
            vec![
                "https://scuola.it/pnrr/bando-tutor/",
                "https://scuola.it/pnrr/avviso-esperti",
                "https://scuola.it/pnrr/selezione-interna?utm_source=fb",
            ]
        );
    }

    #[test]
    fn test_same_origin_without_pattern() {
        let src = source(None);
        let found = links(&src, 10);
        assert!(found.contains(&"https://scuola.it/".to_string()));
        assert!(!found.iter().any(|u| u.contains("altro.example.org")));
        assert!(!found.contains(&"https://scuola.it/pnrr/".to_string()));
    }

    #[test]
    fn test_cap() {
        let src = source(Some("/pnrr/[a-z-]+"));
        assert_eq!(links(&src, 1).len(), 1);
    }
}
