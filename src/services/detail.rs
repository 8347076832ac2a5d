// src/services/detail.rs

//! Detail page fetching and announcement assembly.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Announcement, Attachment, CompiledProfile, Source, announcement_id};
use crate::services::{
    AttachmentExtractor, ContentExtractor, DetailPage, ExtractedPage, FallbackFetcher, FetchContext,
    FetchState, PacingController, PageKind,
};
use crate::utils::url::canonicalize;

/// Announcements built for one source, plus the pages that failed.
#[derive(Debug, Default)]
pub struct DetailBatch {
    pub announcements: Vec<Announcement>,
    pub failed: usize,
}

/// Fetches detail pages through a bounded worker pool.
pub struct DetailFetcher {
    fetcher: Arc<FallbackFetcher>,
    extractor: Arc<dyn ContentExtractor>,
    attachments: AttachmentExtractor,
    concurrency: usize,
}

impl DetailFetcher {
    pub fn new(
        fetcher: Arc<FallbackFetcher>,
        extractor: Arc<dyn ContentExtractor>,
        attachments: AttachmentExtractor,
        concurrency: usize,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            attachments,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch every link, each worker pacing before its own requests.
    ///
    /// `start` is `RenderedFallback` when the source's listing only
    /// succeeded through rendering. Output order follows `links`.
    pub async fn fetch_all(
        &self,
        source: &Source,
        profile: &CompiledProfile,
        links: Vec<Url>,
        start: FetchState,
        pacing: &PacingController,
        ctx: &FetchContext,
    ) -> Result<DetailBatch> {
        let ctx = ctx.with_kind(PageKind::Detail);
        let ctx = &ctx;
        let mut results = stream::iter(links)
            .map(|link| async move {
                let result = self
                    .fetch_one(source, profile, &link, start, pacing, ctx)
                    .await;
                (link, result)
            })
            .buffered(self.concurrency);

        let mut batch = DetailBatch::default();
        while let Some((link, result)) = results.next().await {
            match result {
                Ok(announcement) => batch.announcements.push(announcement),
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(error) => {
                    batch.failed += 1;
                    log::warn!("[{}] Failed to fetch detail {}: {}", source.id, link, error);
                }
            }
        }
        Ok(batch)
    }

    async fn fetch_one(
        &self,
        source: &Source,
        profile: &CompiledProfile,
        link: &Url,
        start: FetchState,
        pacing: &PacingController,
        ctx: &FetchContext,
    ) -> Result<Announcement> {
        pacing.pause(&ctx.cancel).await?;
        let outcome = self.fetcher.fetch(link.as_str(), ctx, start).await;
        log::debug!("[{}] {} -> {:?}", source.id, link, outcome.trace);
        let response = outcome.result?;

        let page_url = Url::parse(&response.final_url).unwrap_or_else(|_| link.clone());
        let html = response.text();
        let extracted = self.extractor.extract(&DetailPage {
            html: &html,
            url: &page_url,
            source,
            profile,
        })?;

        let attachments = self
            .attachments
            .collect(&extracted.attachment_links, pacing, ctx)
            .await?;

        Ok(assemble(source, link, extracted, attachments, Utc::now()))
    }
}

/// Build the announcement record, deriving its id and content hash.
pub fn assemble(
    source: &Source,
    link: &Url,
    page: ExtractedPage,
    attachments: Vec<Attachment>,
    fetched_at: DateTime<Utc>,
) -> Announcement {
    let canonical = canonicalize(link.as_str());
    let identity = if source.stable_urls {
        canonical.as_deref()
    } else {
        None
    };
    let id = announcement_id(&source.id, identity, &page.title, page.date);

    let mut announcement = Announcement {
        id,
        source_id: source.id.clone(),
        source_name: source.name.clone(),
        title: page.title,
        date: page.date,
        category: page.category,
        status: page.status,
        highlight: page.highlight,
        summary: page.summary,
        body: page.body,
        attachments,
        content_hash: String::new(),
        first_seen_at: fetched_at,
        fetched_at,
        source_url: canonical.unwrap_or_else(|| link.to_string()),
    };
    announcement.content_hash = announcement.compute_content_hash();
    announcement
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::models::{AnnouncementStatus, ExtractionConfig, PublishedDate, SourceRegistry};
    use crate::services::{DocumentText, FetchResponse, FetchStrategy, HtmlExtractor, StatusSignal};

    struct Site {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FetchStrategy for Site {
        fn name(&self) -> &'static str {
            "site"
        }

        async fn fetch(&self, url: &str, _ctx: &FetchContext) -> Result<FetchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.ends_with("/broken") {
                return Err(AppError::fetch(url, "HTTP 500"));
            }
            let slug = url.rsplit('/').next().unwrap_or_default();
            let html = format!(
                "<html><head><title>Avviso {slug}</title></head>\
                 <body><p>Testo {slug}</p><a href=\"/files/{slug}.txt\">allegato</a></body></html>"
            );
            let (body, ct) = if url.ends_with(".txt") {
                (format!("contenuto {slug}"), "text/plain")
            } else {
                (html, "text/html")
            };
            Ok(FetchResponse {
                body: body.into_bytes(),
                content_type: Some(ct.into()),
                final_url: url.to_string(),
                signal: StatusSignal::ok(Some(200)),
            })
        }
    }

    fn source(stable: bool) -> Source {
        let toml = format!(
            "[sources.ic]\nname = \"IC\"\nlisting_url = \"https://scuola.it/albo\"\nstable_urls = {stable}\n"
        );
        SourceRegistry::from_toml_str(&toml).unwrap().all()[0].clone()
    }

    fn fetcher() -> (DetailFetcher, Arc<Site>) {
        let site = Arc::new(Site {
            calls: AtomicUsize::new(0),
        });
        let fallback = Arc::new(FallbackFetcher::new(site.clone(), None));
        let extractor = Arc::new(HtmlExtractor::new(ExtractionConfig::default()).unwrap());
        let attachments = AttachmentExtractor::new(site.clone(), Arc::new(DocumentText));
        (DetailFetcher::new(fallback, extractor, attachments, 2), site)
    }

    #[tokio::test]
    async fn test_fetch_all_counts_failures_and_keeps_order() {
        let (detail, site) = fetcher();
        let src = source(true);
        let profile = src.selectors.compile().unwrap();
        let links = ["uno", "broken", "due"]
            .iter()
            .map(|s| Url::parse(&format!("https://scuola.it/albo/{s}")).unwrap())
            .collect();
        let ctx = FetchContext::new("ic", PageKind::Listing, CancellationToken::new());

        let batch = detail
            .fetch_all(
                &src,
                &profile,
                links,
                FetchState::DirectAttempt,
                &PacingController::disabled(),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(batch.failed, 1);
        let titles: Vec<_> = batch.announcements.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["Avviso uno", "Avviso due"]);

        let first = &batch.announcements[0];
        assert!(first.id.starts_with("ic-"));
        assert_eq!(first.status, AnnouncementStatus::Open);
        assert_eq!(first.attachments.len(), 1);
        assert_eq!(first.attachments[0].text.as_deref(), Some("contenuto uno.txt"));
        assert_eq!(first.content_hash, first.compute_content_hash());
        // 3 pages + 2 attachments
        assert_eq!(site.calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_assemble_identity() {
        let page = ExtractedPage {
            title: "Avviso".into(),
            summary: String::new(),
            date: PublishedDate::Unknown,
            category: String::new(),
            body: "b".into(),
            status: AnnouncementStatus::Published,
            highlight: false,
            attachment_links: vec![],
        };
        let a = Url::parse("https://scuola.it/albo/1?utm_source=x").unwrap();
        let b = Url::parse("https://scuola.it/albo/1/").unwrap();
        let c = Url::parse("https://scuola.it/albo/2").unwrap();

        let stable = source(true);
        let now = Utc::now();
        let id_a = assemble(&stable, &a, page.clone(), vec![], now).id;
        let id_b = assemble(&stable, &b, page.clone(), vec![], now).id;
        let id_c = assemble(&stable, &c, page.clone(), vec![], now).id;
        assert_eq!(id_a, id_b);
        assert_ne!(id_a, id_c);

        let unstable = source(false);
        let id_x = assemble(&unstable, &a, page.clone(), vec![], now).id;
        let id_y = assemble(&unstable, &c, page, vec![], now).id;
        assert_eq!(id_x, id_y);
    }
}
