// src/services/challenge.rs

//! Heuristics that recognise anti-bot interstitials.

use url::Url;

use crate::models::ChallengeConfig;
use crate::services::ChallengeSignal;

/// Only the head of a page is scanned for markers.
const SCAN_LIMIT: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ChallengeDetector {
    markers: Vec<String>,
    statuses: Vec<u16>,
    redirect_markers: Vec<String>,
}

impl ChallengeDetector {
    pub fn new(config: &ChallengeConfig) -> Self {
        let lower = |v: &[String]| {
            v.iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };
        Self {
            markers: lower(&config.markers),
            statuses: config.statuses.clone(),
            redirect_markers: lower(&config.redirect_markers),
        }
    }

    /// Classify a direct response. `body` is `None` for binary content.
    pub fn classify(
        &self,
        requested: &Url,
        final_url: &Url,
        status: u16,
        body: Option<&str>,
    ) -> Option<ChallengeSignal> {
        if self.statuses.contains(&status) {
            return Some(ChallengeSignal::Status(status));
        }
        if let Some(signal) = self.classify_redirect(requested, final_url) {
            return Some(signal);
        }
        body.and_then(|b| self.classify_body(b))
    }

    /// Redirects to another site, or to a path that looks like an interstitial.
    pub fn classify_redirect(&self, requested: &Url, final_url: &Url) -> Option<ChallengeSignal> {
        if requested == final_url {
            return None;
        }
        let host = |u: &Url| {
            u.host_str()
                .map(|h| h.trim_start_matches("www.").to_lowercase())
        };
        if host(requested) != host(final_url) {
            return Some(ChallengeSignal::Redirect(final_url.to_string()));
        }
        let target = format!(
            "{}?{}",
            final_url.path(),
            final_url.query().unwrap_or_default()
        )
        .to_lowercase();
        self.redirect_markers
            .iter()
            .any(|m| target.contains(m.as_str()))
            .then(|| ChallengeSignal::Redirect(final_url.to_string()))
    }

    /// Look for challenge markers in page markup.
    pub fn classify_body(&self, body: &str) -> Option<ChallengeSignal> {
        let mut end = body.len().min(SCAN_LIMIT);
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        let head = body[..end].to_lowercase();
        self.markers
            .iter()
            .find(|m| head.contains(m.as_str()))
            .map(|m| ChallengeSignal::Marker(m.clone()))
    }
}

impl Default for ChallengeDetector {
    fn default() -> Self {
        Self::new(&ChallengeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_marker_in_body() {
        let d = ChallengeDetector::default();
        let page = "<html><title>Just a moment...</title><div id=\"cf-chl-widget\"></div>";
        assert!(matches!(d.classify_body(page), Some(ChallengeSignal::Marker(_))));
        assert!(d.classify_body("<html><h1>Albo online</h1></html>").is_none());
    }

    #[test]
    fn test_anomalous_status() {
        let d = ChallengeDetector::default();
        let u = url("https://scuola.it/albo");
        assert_eq!(
            d.classify(&u, &u, 429, Some("")),
            Some(ChallengeSignal::Status(429))
        );
        assert_eq!(d.classify(&u, &u, 200, Some("ok")), None);
        assert_eq!(d.classify(&u, &u, 404, None), None);
    }

    #[test]
    fn test_redirects() {
        let d = ChallengeDetector::default();
        let requested = url("https://scuola.it/albo");
        assert!(
            d.classify_redirect(&requested, &url("https://www.scuola.it/albo/"))
                .is_none()
        );
        assert!(
            d.classify_redirect(&requested, &url("https://scuola.it/cdn-cgi/challenge?x=1"))
                .is_some()
        );
        assert!(
            d.classify_redirect(&requested, &url("https://guard.example.net/check"))
                .is_some()
        );
    }
}
