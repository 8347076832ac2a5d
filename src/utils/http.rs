// src/utils/http.rs

//! HTTP client utilities.

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};

use crate::error::{AppError, Result};
use crate::models::FetchConfig;

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Create an asynchronous client that presents itself like a desktop browser.
///
/// Cookies set by a source persist for the client's lifetime, so later
/// requests in the same cycle look like a returning visitor.
pub fn create_async_client(config: &FetchConfig) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_str(&config.accept_language)
            .map_err(|e| AppError::config(format!("fetch.accept_language: {e}")))?,
    );
    headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));

    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(headers)
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::limited(10))
        .timeout(config.timeout())
        .build()?;
    Ok(client)
}
