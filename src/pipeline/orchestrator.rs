//! One fetch cycle over every active source.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Config, FetchRun, Source, SourceOutcome, SourceRegistry, SourceReport};
use crate::pipeline::{ChangeDetector, NotificationDispatcher, RunLock};
use crate::services::{
    AttachmentExtractor, ChallengeDetector, ContentExtractor, DetailFetcher, DirectFetcher,
    DocumentText, FallbackFetcher, FetchContext, FetchState, FetchStrategy, HtmlExtractor,
    PacingController, PageKind, RenderedFetcher, TextExtractor, detail_links,
};
use crate::storage::AnnouncementStore;

/// Drives listing, detail, diff and notification for all sources in turn.
pub struct FetchOrchestrator {
    config: Config,
    registry: SourceRegistry,
    pacing: Arc<PacingController>,
    fetcher: Arc<FallbackFetcher>,
    details: DetailFetcher,
    detector: ChangeDetector,
    store: Arc<dyn AnnouncementStore>,
    dispatcher: Option<NotificationDispatcher>,
    lock: Option<(PathBuf, Duration)>,
}

impl FetchOrchestrator {
    /// Assemble an orchestrator from explicit collaborators.
    pub fn new(
        config: Config,
        registry: SourceRegistry,
        fetcher: Arc<FallbackFetcher>,
        extractor: Arc<dyn ContentExtractor>,
        text: Arc<dyn TextExtractor>,
        store: Arc<dyn AnnouncementStore>,
    ) -> Result<Self> {
        let pacing = Arc::new(PacingController::from_config(&config.fetch)?);
        let attachments = AttachmentExtractor::new(fetcher.direct(), text);
        let details = DetailFetcher::new(
            Arc::clone(&fetcher),
            extractor,
            attachments,
            config.fetch.detail_concurrency,
        );

        Ok(Self {
            config,
            registry,
            pacing,
            fetcher,
            details,
            detector: ChangeDetector::new(),
            store,
            dispatcher: None,
            lock: None,
        })
    }

    /// Wire the HTTP, browser and extraction stack described by `config`.
    ///
    /// The run lock lives under `data_dir`.
    pub fn from_config(
        config: Config,
        registry: SourceRegistry,
        store: Arc<dyn AnnouncementStore>,
    ) -> Result<Self> {
        let detector = Arc::new(ChallengeDetector::new(&config.challenge));
        let direct: Arc<dyn FetchStrategy> =
            Arc::new(DirectFetcher::new(&config.fetch, Arc::clone(&detector))?);
        let rendered: Option<Arc<dyn FetchStrategy>> = if config.render.enabled {
            Some(Arc::new(RenderedFetcher::new(
                config.render.clone(),
                config.fetch.user_agent.clone(),
                detector,
            )))
        } else {
            log::info!("Rendered fallback disabled");
            None
        };

        let fetcher = Arc::new(FallbackFetcher::new(direct, rendered));
        let extractor = Arc::new(HtmlExtractor::new(config.extraction.clone())?);
        let lock_path = config.paths.data_dir.join(&config.paths.lock_file);
        let stale = Duration::from_secs(config.paths.lock_stale_secs);

        Ok(Self::new(
            config,
            registry,
            fetcher,
            extractor,
            Arc::new(DocumentText),
            store,
        )?
        .with_lock(lock_path, stale))
    }

    pub fn with_dispatcher(mut self, dispatcher: NotificationDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_pacing(mut self, pacing: PacingController) -> Self {
        self.pacing = Arc::new(pacing);
        self
    }

    pub fn with_lock(mut self, path: impl Into<PathBuf>, stale: Duration) -> Self {
        self.lock = Some((path.into(), stale));
        self
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Run one cycle and record it.
    ///
    /// Source failures are recorded and the cycle moves on. Cancellation
    /// stops the cycle; the partial run is still persisted with
    /// `cancelled` set and no notifications are sent. Changes stored
    /// without being announced stay queued for the next cycle.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<FetchRun> {
        let lock = match &self.lock {
            Some((path, stale)) => Some(RunLock::acquire(path, *stale)?),
            None => None,
        };

        let mut run = FetchRun::start();
        let sources = self.registry.active();
        log::info!("Cycle {} starting over {} sources", run.run_id, sources.len());

        for source in sources {
            if cancel.is_cancelled() {
                run.cancelled = true;
                break;
            }
            if let Some(lock) = &lock {
                if let Err(e) = lock.refresh() {
                    log::warn!("Could not refresh {}: {}", lock.path().display(), e);
                }
            }
            match self.run_source(source, cancel).await {
                Ok(report) => run.sources.push(report),
                Err(AppError::Cancelled) => {
                    log::warn!("[{}] Cycle cancelled", source.id);
                    run.sources
                        .push(SourceReport::failed(&source.id, AppError::Cancelled));
                    run.cancelled = true;
                    break;
                }
                Err(e) => {
                    log::warn!("[{}] Source failed: {}", source.id, e);
                    run.sources.push(SourceReport::failed(&source.id, e));
                }
            }
        }

        if let Some(dispatcher) = &self.dispatcher {
            if run.cancelled {
                log::info!("Skipping notifications for cancelled cycle");
            } else {
                run.notifications_sent = self.notify(dispatcher).await;
            }
        }

        run.finish();
        if let Err(e) = self.store.append_run(&run).await {
            log::error!("Failed to record run {}: {}", run.run_id, e);
        }
        log::info!("{}", run.summary());

        Ok(run)
    }

    /// Dispatch everything still queued and drop what was settled.
    async fn notify(&self, dispatcher: &NotificationDispatcher) -> usize {
        let candidates = match self.store.pending().await {
            Ok(candidates) => candidates,
            Err(e) => {
                log::error!("Cannot read notification queue: {}", e);
                return 0;
            }
        };
        if candidates.is_empty() {
            return 0;
        }

        let report = match dispatcher.dispatch(&candidates).await {
            Ok(report) => report,
            Err(e) => {
                log::error!("Notification dispatch failed: {}", e);
                return 0;
            }
        };
        log::info!(
            "Notifications: {} sent, {} failed, {} skipped, {} of {} settled",
            report.sent,
            report.failed,
            report.skipped,
            report.settled.len(),
            candidates.len()
        );
        if let Err(e) = self.store.clear_pending(&report.settled).await {
            log::warn!("Could not clear settled notifications: {}", e);
        }
        report.sent
    }

    async fn run_source(&self, source: &Source, cancel: &CancellationToken) -> Result<SourceReport> {
        let profile = source.selectors.compile()?;
        let pacing = self.pacing.for_source(source.pacing)?;
        let ctx = FetchContext::new(&source.id, PageKind::Listing, cancel.clone());

        pacing.pause(cancel).await?;
        let listing = self
            .fetcher
            .fetch(&source.listing_url, &ctx, FetchState::DirectAttempt)
            .await;
        log::debug!("[{}] Listing -> {:?}", source.id, listing.trace);
        let rendered = listing.rendered();
        let response = listing.result?;

        let page_url = Url::parse(&response.final_url).or_else(|_| Url::parse(&source.listing_url))?;
        let cap = source.cap(self.config.fetch.detail_cap);
        let links = detail_links(&response.text(), &page_url, source, &profile, cap)?;
        log::info!(
            "[{}] {} detail links{}",
            source.id,
            links.len(),
            if rendered { " (rendered)" } else { "" }
        );

        // Details go straight to rendering when the listing needed it.
        let start = if rendered {
            FetchState::RenderedFallback
        } else {
            FetchState::DirectAttempt
        };
        let batch = self
            .details
            .fetch_all(source, &profile, links, start, &pacing, &ctx)
            .await?;

        let applied = self
            .detector
            .apply(self.store.as_ref(), &source.id, batch.announcements)
            .await?;
        let changes = applied.changes;

        let mut report = SourceReport {
            source_id: source.id.clone(),
            outcome: if rendered {
                SourceOutcome::FellBack
            } else {
                SourceOutcome::Succeeded
            },
            new: changes.new.len(),
            updated: changes.updated.len(),
            unchanged: changes.unchanged.len(),
            failed: batch.failed,
            error: None,
        };
        if let Some(e) = applied.write_error {
            log::error!("[{}] Persistence stopped: {}", source.id, e);
            report.outcome = SourceOutcome::Failed;
            report.error = Some(e.to_string());
        }

        Ok(report)
    }
}
