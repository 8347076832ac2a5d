// src/services/direct.rs

//! Plain HTTP fetching.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::FetchConfig;
use crate::services::{
    ChallengeDetector, FetchContext, FetchResponse, FetchStrategy, PageKind, StatusSignal,
};
use crate::utils::http::create_async_client;

/// Upper bound on a listing or detail page body.
const MAX_PAGE_BYTES: u64 = 8 * 1024 * 1024;

/// Fetches over HTTP with a browser-like identity and a cookie jar.
pub struct DirectFetcher {
    client: Client,
    detector: Arc<ChallengeDetector>,
    max_attachment_bytes: u64,
}

impl DirectFetcher {
    pub fn new(config: &FetchConfig, detector: Arc<ChallengeDetector>) -> Result<Self> {
        Ok(Self {
            client: create_async_client(config)?,
            detector,
            max_attachment_bytes: config.max_attachment_bytes,
        })
    }

    /// Download raw bytes, failing once the body grows past `cap`.
    pub async fn fetch_bytes(
        &self,
        url: &str,
        cap: u64,
        ctx: &FetchContext,
    ) -> Result<FetchResponse> {
        let requested = Url::parse(url)?;
        let request = self.client.get(requested.clone()).send();
        let mut response = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(AppError::Cancelled),
            r = request => r?,
        };

        let status = response.status();
        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(len) = response.content_length() {
            if len > cap {
                return Err(AppError::fetch(
                    url,
                    format!("body of {len} bytes exceeds limit of {cap}"),
                ));
            }
        }

        let mut body = Vec::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(AppError::Cancelled),
                c = response.chunk() => c?,
            };
            let Some(chunk) = chunk else { break };
            if (body.len() + chunk.len()) as u64 > cap {
                return Err(AppError::fetch(
                    url,
                    format!("body exceeds limit of {cap} bytes"),
                ));
            }
            body.extend_from_slice(&chunk);
        }

        let textual = content_type
            .as_deref()
            .map(|ct| ct.contains("html") || ct.starts_with("text/"))
            .unwrap_or(true);
        let text = textual.then(|| String::from_utf8_lossy(&body));
        let challenge =
            self.detector
                .classify(&requested, &final_url, status.as_u16(), text.as_deref());

        if challenge.is_none() && !status.is_success() {
            return Err(AppError::fetch(url, format!("HTTP {status}")));
        }
        if let Some(signal) = &challenge {
            log::info!("[{}] Challenge on {}: {}", ctx.source_id, url, signal);
        }

        Ok(FetchResponse {
            body,
            content_type,
            final_url: final_url.to_string(),
            signal: StatusSignal {
                http_status: Some(status.as_u16()),
                challenge,
            },
        })
    }
}

#[async_trait]
impl FetchStrategy for DirectFetcher {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn fetch(&self, url: &str, ctx: &FetchContext) -> Result<FetchResponse> {
        let cap = match ctx.kind {
            PageKind::Attachment => self.max_attachment_bytes,
            PageKind::Listing | PageKind::Detail => MAX_PAGE_BYTES,
        };
        log::debug!("[{}] GET {} ({:?})", ctx.source_id, url, ctx.kind);
        self.fetch_bytes(url, cap, ctx).await
    }
}
