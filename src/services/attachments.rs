// src/services/attachments.rs

//! Attachment download and best-effort text extraction.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use scraper::Html;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Attachment, ExtractionStatus};
use crate::services::{FetchContext, FetchStrategy, PacingController, PageKind};
use crate::utils::text::clean;
use crate::utils::url::{canonicalize, extension, filename};

/// Pulls plain text out of a downloaded document.
///
/// `Ok(None)` means the format carries no extractable text (images,
/// unsupported office formats); errors are parse failures.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, bytes: &[u8], mime: &str, ext: Option<&str>) -> Result<Option<String>>;
}

/// PDF through `pdf-extract`, plain text and HTML directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentText;

impl TextExtractor for DocumentText {
    fn extract_text(&self, bytes: &[u8], mime: &str, ext: Option<&str>) -> Result<Option<String>> {
        let is = |m: &str, e: &str| mime == m || ext == Some(e);

        if is("application/pdf", "pdf") {
            let text = catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes)))
                .map_err(|_| AppError::validation("pdf parser panicked"))?
                .map_err(|e| AppError::validation(format!("pdf: {e}")))?;
            return Ok(Some(text));
        }
        if is("text/html", "html") || is("application/xhtml+xml", "htm") {
            let html = String::from_utf8_lossy(bytes);
            let document = Html::parse_document(&html);
            return Ok(Some(document.root_element().text().collect::<Vec<_>>().join(" ")));
        }
        if mime.starts_with("text/") || ext == Some("txt") {
            return Ok(Some(String::from_utf8_lossy(bytes).into_owned()));
        }
        Ok(None)
    }
}

fn guess_mime(ext: Option<&str>) -> &'static str {
    match ext {
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("html" | "htm") => "text/html",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("odt") => "application/vnd.oasis.opendocument.text",
        Some("rtf") => "application/rtf",
        Some("p7m") => "application/pkcs7-mime",
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

/// Downloads attachments over the direct strategy and extracts their text.
pub struct AttachmentExtractor {
    fetcher: Arc<dyn FetchStrategy>,
    text: Arc<dyn TextExtractor>,
}

impl AttachmentExtractor {
    pub fn new(fetcher: Arc<dyn FetchStrategy>, text: Arc<dyn TextExtractor>) -> Self {
        Self { fetcher, text }
    }

    /// Fetch and process every link in order, pacing before each download.
    ///
    /// Only cancellation is an error; every other failure is recorded on
    /// the attachment itself.
    pub async fn collect(
        &self,
        links: &[Url],
        pacing: &PacingController,
        ctx: &FetchContext,
    ) -> Result<Vec<Attachment>> {
        let ctx = ctx.with_kind(PageKind::Attachment);
        let mut attachments = Vec::with_capacity(links.len());
        for link in links {
            pacing.pause(&ctx.cancel).await?;
            attachments.push(self.process(link, &ctx).await?);
        }
        Ok(attachments)
    }

    async fn process(&self, link: &Url, ctx: &FetchContext) -> Result<Attachment> {
        let ext = extension(link);
        let mut attachment = Attachment {
            filename: filename(link).unwrap_or_else(|| link.to_string()),
            url: canonicalize(link.as_str()).unwrap_or_else(|| link.to_string()),
            mime_type: guess_mime(ext.as_deref()).to_string(),
            text: None,
            extraction_status: ExtractionStatus::Failed,
            size_bytes: 0,
        };

        let response = match self.fetcher.fetch(link.as_str(), ctx).await {
            Ok(resp) if resp.signal.challenge_detected() => {
                log::warn!("[{}] Attachment {} is behind a challenge", ctx.source_id, link);
                return Ok(attachment);
            }
            Ok(resp) => resp,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                log::warn!("[{}] Attachment {} download failed: {}", ctx.source_id, link, e);
                return Ok(attachment);
            }
        };

        if let Some(mime) = response.mime() {
            if mime != "application/octet-stream" {
                attachment.mime_type = mime;
            }
        }
        attachment.size_bytes = response.body.len() as u64;

        let text = Arc::clone(&self.text);
        let mime = attachment.mime_type.clone();
        let body = response.body;
        let extracted = tokio::task::spawn_blocking(move || {
            text.extract_text(&body, &mime, ext.as_deref())
        })
        .await;

        match extracted {
            Ok(Ok(Some(text))) => {
                let text = clean(&text);
                if text.is_empty() {
                    attachment.extraction_status = ExtractionStatus::Empty;
                } else {
                    attachment.text = Some(text);
                    attachment.extraction_status = ExtractionStatus::Ok;
                }
            }
            Ok(Ok(None)) => attachment.extraction_status = ExtractionStatus::Empty,
            Ok(Err(e)) => {
                log::warn!("[{}] Text extraction failed for {}: {}", ctx.source_id, link, e);
            }
            Err(e) => {
                log::warn!("[{}] Text extraction aborted for {}: {}", ctx.source_id, link, e);
            }
        }
        Ok(attachment)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::services::{FetchResponse, StatusSignal};

    struct Files;

    #[async_trait]
    impl FetchStrategy for Files {
        fn name(&self) -> &'static str {
            "files"
        }

        async fn fetch(&self, url: &str, _ctx: &FetchContext) -> Result<FetchResponse> {
            let (body, ct): (&[u8], &str) = if url.ends_with("avviso.txt") {
                (b"  Avviso   pubblico  ", "text/plain; charset=utf-8")
            } else if url.ends_with("scan.pdf") {
                (b"not really a pdf", "application/pdf")
            } else if url.ends_with("modulo.docx") {
                (b"PK\x03\x04", "application/octet-stream")
            } else {
                return Err(AppError::fetch(url, "HTTP 404 Not Found"));
            };
            Ok(FetchResponse {
                body: body.to_vec(),
                content_type: Some(ct.to_string()),
                final_url: url.to_string(),
                signal: StatusSignal::ok(Some(200)),
            })
        }
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_document_text_formats() {
        let t = DocumentText;
        assert_eq!(
            t.extract_text(b"ciao", "text/plain", Some("txt")).unwrap().as_deref(),
            Some("ciao")
        );
        let html = t
            .extract_text(b"<p>Uno</p><p>Due</p>", "text/html", None)
            .unwrap()
            .unwrap();
        assert!(html.contains("Uno") && html.contains("Due"));
        assert_eq!(t.extract_text(b"\x89PNG", "image/png", Some("png")).unwrap(), None);
        assert!(t.extract_text(b"garbage", "application/pdf", Some("pdf")).is_err());
    }

    #[tokio::test]
    async fn test_collect_records_each_outcome() {
        let extractor = AttachmentExtractor::new(Arc::new(Files), Arc::new(DocumentText));
        let ctx = FetchContext::new("ic", PageKind::Detail, CancellationToken::new());
        let links = vec![
            url("https://scuola.it/doc/avviso.txt"),
            url("https://scuola.it/doc/scan.pdf"),
            url("https://scuola.it/doc/modulo.docx"),
            url("https://scuola.it/doc/missing.pdf"),
        ];
        let found = extractor
            .collect(&links, &PacingController::disabled(), &ctx)
            .await
            .unwrap();

        assert_eq!(found.len(), 4);
        assert_eq!(found[0].extraction_status, ExtractionStatus::Ok);
        assert_eq!(found[0].text.as_deref(), Some("Avviso pubblico"));
        assert_eq!(found[0].mime_type, "text/plain");
        assert_eq!(found[1].extraction_status, ExtractionStatus::Failed);
        assert_eq!(found[2].extraction_status, ExtractionStatus::Empty);
        assert!(found[2].mime_type.contains("wordprocessingml"));
        assert_eq!(found[3].extraction_status, ExtractionStatus::Failed);
        assert_eq!(found[3].size_bytes, 0);
        assert_eq!(found[3].filename, "missing.pdf");
    }

    #[tokio::test]
    async fn test_collect_stops_on_cancel() {
        let extractor = AttachmentExtractor::new(Arc::new(Files), Arc::new(DocumentText));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = FetchContext::new("ic", PageKind::Detail, cancel);
        let result = extractor
            .collect(&[url("https://scuola.it/a.txt")], &PacingController::disabled(), &ctx)
            .await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }
}
