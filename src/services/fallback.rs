// src/services/fallback.rs

//! Direct fetch with a single rendered fallback.

use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::services::{FetchContext, FetchResponse, FetchStrategy};

/// States of one page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    DirectAttempt,
    RenderedFallback,
    Succeeded,
    Failed,
}

/// Result of one page fetch plus the states it went through.
#[derive(Debug)]
pub struct FetchOutcome {
    pub result: Result<FetchResponse>,
    pub trace: Vec<FetchState>,
}

impl FetchOutcome {
    /// Whether the page was obtained through the rendered fallback.
    pub fn rendered(&self) -> bool {
        self.result.is_ok() && self.trace.contains(&FetchState::RenderedFallback)
    }
}

/// Drives `DirectAttempt -> RenderedFallback -> {Succeeded, Failed}`.
///
/// There is exactly one fallback per page and no further escalation.
pub struct FallbackFetcher {
    direct: Arc<dyn FetchStrategy>,
    rendered: Option<Arc<dyn FetchStrategy>>,
}

impl FallbackFetcher {
    /// `rendered` is `None` when rendering is disabled.
    pub fn new(direct: Arc<dyn FetchStrategy>, rendered: Option<Arc<dyn FetchStrategy>>) -> Self {
        Self { direct, rendered }
    }

    /// The strategy used for attachments, which are never rendered.
    pub fn direct(&self) -> Arc<dyn FetchStrategy> {
        Arc::clone(&self.direct)
    }

    /// Fetch `url` starting in `start` (`DirectAttempt` or `RenderedFallback`).
    pub async fn fetch(&self, url: &str, ctx: &FetchContext, start: FetchState) -> FetchOutcome {
        let mut state = start;
        let mut trace = vec![state];
        let mut response = None;
        let mut last_error = None;

        loop {
            state = match state {
                FetchState::DirectAttempt => match self.direct.fetch(url, ctx).await {
                    Ok(resp) => match resp.signal.challenge.clone() {
                        None => {
                            response = Some(resp);
                            FetchState::Succeeded
                        }
                        Some(signal) => {
                            last_error = Some(AppError::challenge(url, signal));
                            self.after_direct()
                        }
                    },
                    Err(e) if e.is_cancelled() => {
                        last_error = Some(e);
                        FetchState::Failed
                    }
                    Err(e) => {
                        log::debug!("[{}] Direct fetch of {} failed: {}", ctx.source_id, url, e);
                        last_error = Some(e);
                        self.after_direct()
                    }
                },
                FetchState::RenderedFallback => match &self.rendered {
                    None => {
                        last_error.get_or_insert_with(|| {
                            AppError::render(url, "rendering is disabled")
                        });
                        FetchState::Failed
                    }
                    Some(rendered) => {
                        log::info!("[{}] Falling back to rendering for {}", ctx.source_id, url);
                        match rendered.fetch(url, ctx).await {
                            Ok(resp) => match resp.signal.challenge.clone() {
                                None => {
                                    response = Some(resp);
                                    FetchState::Succeeded
                                }
                                Some(signal) => {
                                    last_error = Some(AppError::challenge(url, signal));
                                    FetchState::Failed
                                }
                            },
                            Err(e) => {
                                last_error = Some(e);
                                FetchState::Failed
                            }
                        }
                    }
                },
                FetchState::Succeeded | FetchState::Failed => break,
            };
            trace.push(state);
        }

        let result = match (state, response) {
            (FetchState::Succeeded, Some(resp)) => Ok(resp),
            _ => Err(last_error.unwrap_or_else(|| AppError::fetch(url, "fetch failed"))),
        };
        FetchOutcome { result, trace }
    }

    fn after_direct(&self) -> FetchState {
        if self.rendered.is_some() {
            FetchState::RenderedFallback
        } else {
            FetchState::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::services::{ChallengeSignal, PageKind, StatusSignal};

    enum Script {
        Page,
        Challenge,
        Error,
    }

    struct Scripted {
        script: Script,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FetchStrategy for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch(&self, url: &str, _ctx: &FetchContext) -> Result<FetchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let challenge = match self.script {
                Script::Error => return Err(AppError::fetch(url, "connection reset")),
                Script::Challenge => Some(ChallengeSignal::Marker("cf-chl".into())),
                Script::Page => None,
            };
            Ok(FetchResponse {
                body: b"<html>ok</html>".to_vec(),
                content_type: Some("text/html".into()),
                final_url: url.to_string(),
                signal: StatusSignal {
                    http_status: Some(200),
                    challenge,
                },
            })
        }
    }

    fn ctx() -> FetchContext {
        FetchContext::new("src", PageKind::Listing, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_direct_success() {
        let direct = Scripted::new(Script::Page);
        let rendered = Scripted::new(Script::Page);
        let f = FallbackFetcher::new(direct.clone(), Some(rendered.clone()));
        let out = f.fetch("https://a/", &ctx(), FetchState::DirectAttempt).await;
        assert!(out.result.is_ok());
        assert_eq!(out.trace, vec![FetchState::DirectAttempt, FetchState::Succeeded]);
        assert_eq!(rendered.calls.load(Ordering::SeqCst), 0);
        assert!(!out.rendered());
    }

    #[tokio::test]
    async fn test_challenge_falls_back_once() {
        let direct = Scripted::new(Script::Challenge);
        let rendered = Scripted::new(Script::Page);
        let f = FallbackFetcher::new(direct.clone(), Some(rendered.clone()));
        let out = f.fetch("https://a/", &ctx(), FetchState::DirectAttempt).await;
        assert!(out.rendered());
        assert_eq!(
            out.trace,
            vec![
                FetchState::DirectAttempt,
                FetchState::RenderedFallback,
                FetchState::Succeeded
            ]
        );
        assert_eq!(direct.calls.load(Ordering::SeqCst), 1);
        assert_eq!(rendered.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_both_fail_no_escalation() {
        let direct = Scripted::new(Script::Error);
        let rendered = Scripted::new(Script::Error);
        let f = FallbackFetcher::new(direct.clone(), Some(rendered.clone()));
        let out = f.fetch("https://a/", &ctx(), FetchState::DirectAttempt).await;
        assert!(out.result.is_err());
        assert_eq!(out.trace.last(), Some(&FetchState::Failed));
        assert_eq!(direct.calls.load(Ordering::SeqCst), 1);
        assert_eq!(rendered.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rendering_disabled() {
        let f = FallbackFetcher::new(Scripted::new(Script::Challenge), None);
        let out = f.fetch("https://a/", &ctx(), FetchState::DirectAttempt).await;
        assert!(matches!(out.result, Err(AppError::Challenge { .. })));
        assert_eq!(out.trace, vec![FetchState::DirectAttempt, FetchState::Failed]);
    }

    #[tokio::test]
    async fn test_start_rendered_skips_direct() {
        let direct = Scripted::new(Script::Page);
        let rendered = Scripted::new(Script::Page);
        let f = FallbackFetcher::new(direct.clone(), Some(rendered.clone()));
        let out = f.fetch("https://a/", &ctx(), FetchState::RenderedFallback).await;
        assert!(out.result.is_ok());
        assert_eq!(direct.calls.load(Ordering::SeqCst), 0);
    }
}
