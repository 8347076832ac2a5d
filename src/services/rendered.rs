// src/services/rendered.rs

//! Fetching through a headless Chromium-family browser.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout};

use crate::error::{AppError, Result};
use crate::models::RenderConfig;
use crate::services::{ChallengeDetector, FetchContext, FetchResponse, FetchStrategy, StatusSignal};

const SIGNAL_POLL: Duration = Duration::from_secs(1);

/// Renders pages in a real browser on a persistent profile.
///
/// Only one browser runs at a time; the profile directory cannot be
/// shared between instances.
pub struct RenderedFetcher {
    config: RenderConfig,
    user_agent: String,
    detector: Arc<ChallengeDetector>,
    gate: Mutex<()>,
}

impl RenderedFetcher {
    pub fn new(config: RenderConfig, user_agent: String, detector: Arc<ChallengeDetector>) -> Self {
        Self {
            config,
            user_agent,
            detector,
            gate: Mutex::new(()),
        }
    }

    fn profile_arg(&self) -> String {
        format!("--user-data-dir={}", self.config.profile_dir.display())
    }

    /// Run the browser headless and capture the serialized DOM.
    async fn dump_dom(&self, url: &str) -> Result<String> {
        let mut cmd = Command::new(&self.config.browser);
        cmd.arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-blink-features=AutomationControlled")
            .arg(self.profile_arg())
            .arg(format!("--user-agent={}", self.user_agent))
            .arg(format!(
                "--virtual-time-budget={}",
                self.config.virtual_time_budget_ms
            ))
            .arg("--dump-dom")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let limit = Duration::from_secs(self.config.render_timeout_secs);
        let output = timeout(limit, cmd.output())
            .await
            .map_err(|_| AppError::render(url, format!("timed out after {}s", limit.as_secs())))?
            .map_err(|e| AppError::render(url, format!("failed to start {}: {e}", self.config.browser)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::render(
                url,
                format!("browser exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        let html = String::from_utf8_lossy(&output.stdout).into_owned();
        if html.trim().is_empty() {
            return Err(AppError::render(url, "empty DOM"));
        }
        Ok(html)
    }

    /// Open a visible window on the shared profile and wait for the operator.
    ///
    /// The operator solves the challenge in that window and then creates
    /// the signal file. The window is closed before returning.
    async fn await_operator(&self, url: &str, ctx: &FetchContext) -> Result<()> {
        let signal_file: &PathBuf = &self.config.signal_file;
        let _ = tokio::fs::remove_file(signal_file).await;

        let mut window = Command::new(&self.config.browser)
            .arg(self.profile_arg())
            .arg("--new-window")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::render(url, format!("failed to open browser window: {e}")))?;

        log::warn!(
            "[{}] Challenge needs a human: solve it in the opened browser window, then create {}",
            ctx.source_id,
            signal_file.display()
        );

        let wait = Duration::from_secs(self.config.manual_solve_timeout_secs);
        let deadline = Instant::now() + wait;
        let result = loop {
            if tokio::fs::try_exists(signal_file).await.unwrap_or(false) {
                log::info!("[{}] Operator signalled, re-rendering {}", ctx.source_id, url);
                break Ok(());
            }
            if Instant::now() >= deadline {
                break Err(AppError::ManualSolveTimeout {
                    url: url.to_string(),
                    timeout_secs: wait.as_secs(),
                });
            }
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break Err(AppError::Cancelled),
                _ = tokio::time::sleep(SIGNAL_POLL) => {}
            }
        };

        let _ = window.kill().await;
        let _ = tokio::fs::remove_file(signal_file).await;
        result
    }

    async fn render_cancellable(&self, url: &str, ctx: &FetchContext) -> Result<String> {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(AppError::Cancelled),
            r = self.dump_dom(url) => r,
        }
    }
}

#[async_trait]
impl FetchStrategy for RenderedFetcher {
    fn name(&self) -> &'static str {
        "rendered"
    }

    async fn fetch(&self, url: &str, ctx: &FetchContext) -> Result<FetchResponse> {
        let _guard = self.gate.lock().await;
        log::debug!("[{}] Rendering {}", ctx.source_id, url);

        let mut html = self.render_cancellable(url, ctx).await?;
        if let Some(signal) = self.detector.classify_body(&html) {
            if !self.config.observe {
                return Err(AppError::challenge(url, signal));
            }
            self.await_operator(url, ctx).await?;
            html = self.render_cancellable(url, ctx).await?;
            if let Some(signal) = self.detector.classify_body(&html) {
                return Err(AppError::challenge(url, signal));
            }
        }

        Ok(FetchResponse {
            body: html.into_bytes(),
            content_type: Some("text/html; charset=utf-8".to_string()),
            final_url: url.to_string(),
            signal: StatusSignal::ok(None),
        })
    }
}
