// src/utils/url.rs

//! URL manipulation utilities.

use url::Url;

/// Query parameters that never identify a page.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid",
    "gclid",
    "mc_cid",
    "mc_eid",
    "jsessionid",
    "phpsessid",
    "sid",
];

/// Resolve a potentially relative URL against a base URL.
///
/// # Examples
/// ```
/// use harvester::utils::url::resolve;
///
/// assert_eq!(
///     resolve("https://example.com/path/", "page.html").as_deref(),
///     Some("https://example.com/path/page.html")
/// );
/// ```
pub fn resolve(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    resolve_url(&base, href).map(|u| u.to_string())
}

/// Resolve `href` against `base`, dropping the fragment.
///
/// Non-navigational links (`mailto:`, `javascript:`, `tel:`) yield `None`.
pub fn resolve_url(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// Canonical form used for identity and deduplication.
///
/// Lower-cases the host, drops the fragment, tracking and session
/// parameters, sorts the remaining query pairs and trims a trailing
/// slash from non-root paths. Returns `None` for non-HTTP URLs.
pub fn canonicalize(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let key = k.to_lowercase();
            !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Some(url.to_string())
}

/// Extract the domain from a URL.
///
/// # Examples
/// ```
/// use harvester::utils::url::get_domain;
///
/// assert_eq!(
///     get_domain("https://Example.COM/path"),
///     Some("example.com".to_string())
/// );
/// ```
pub fn get_domain(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Whether two URLs share scheme, host and port.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

/// Last non-empty path segment, percent-decoded.
pub fn filename(url: &Url) -> Option<String> {
    let last = url
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))?;
    let decoded = url::form_urlencoded::parse(last.as_bytes())
        .next()
        .map(|(k, _)| k.into_owned())
        .unwrap_or_else(|| last.to_string());
    Some(decoded)
}

/// Lower-cased file extension of the URL path, if any.
pub fn extension(url: &Url) -> Option<String> {
    let name = url.path_segments()?.next_back()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}
