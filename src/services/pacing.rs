// src/services/pacing.rs

//! Randomized delays between outbound requests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{FetchConfig, PacingOverride};

/// Draws a uniformly random delay from `[min, max]` before each request.
#[derive(Debug)]
pub struct PacingController {
    min: Duration,
    max: Duration,
    rng: Mutex<StdRng>,
}

impl PacingController {
    /// Create a controller; `min` must not exceed `max`.
    pub fn new(min: Duration, max: Duration) -> Result<Self> {
        if min > max {
            return Err(AppError::validation(format!(
                "pacing min {}ms exceeds max {}ms",
                min.as_millis(),
                max.as_millis()
            )));
        }
        Ok(Self {
            min,
            max,
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        Self::new(
            Duration::from_millis(config.min_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Deterministic controller for reproducible runs.
    pub fn with_seed(min: Duration, max: Duration, seed: u64) -> Result<Self> {
        let controller = Self::new(min, max)?;
        *controller.rng.lock().unwrap_or_else(|e| e.into_inner()) = StdRng::seed_from_u64(seed);
        Ok(controller)
    }

    /// No delay at all.
    pub fn disabled() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
            rng: Mutex::new(StdRng::seed_from_u64(0)),
        }
    }

    pub fn bounds(&self) -> (Duration, Duration) {
        (self.min, self.max)
    }

    /// Controller for one source: the shared one unless the source overrides its bounds.
    pub fn for_source(self: &Arc<Self>, pacing: Option<PacingOverride>) -> Result<Arc<Self>> {
        match pacing {
            Some(p) => Ok(Arc::new(Self::new(
                Duration::from_millis(p.min_delay_ms),
                Duration::from_millis(p.max_delay_ms),
            )?)),
            None => Ok(Arc::clone(self)),
        }
    }

    pub fn next_delay(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        self.rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .gen_range(self.min..=self.max)
    }

    /// Sleep for [`next_delay`](Self::next_delay), returning early if cancelled.
    pub async fn pause(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let delay = self.next_delay();
        if delay.is_zero() {
            return Ok(());
        }
        log::debug!("Pacing for {}ms", delay.as_millis());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
