// src/error.rs

//! Unified error handling for the harvester.

use std::fmt;

use thiserror::Error;

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A bot challenge was served instead of the page
    #[error("Challenge detected at {url}: {reason}")]
    Challenge { url: String, reason: String },

    /// The rendering browser failed or timed out
    #[error("Render error for {url}: {message}")]
    Render { url: String, message: String },

    /// Nobody solved the challenge within the allowed window
    #[error("Manual solve for {url} timed out after {timeout_secs}s")]
    ManualSolveTimeout { url: String, timeout_secs: u64 },

    /// Fetch error with context
    #[error("Fetch error for {url}: {message}")]
    Fetch { url: String, message: String },

    /// Persistence backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Notification transport error
    #[error("Notification error: {0}")]
    Notify(String),

    /// Run lock could not be acquired
    #[error("Lock error: {0}")]
    Lock(String),

    /// The cycle was aborted by the caller
    #[error("Operation cancelled")]
    Cancelled,
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a challenge error.
    pub fn challenge(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Challenge {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a render error.
    pub fn render(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Render {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a fetch error with context.
    pub fn fetch(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }

    /// Create a notification error.
    pub fn notify(message: impl fmt::Display) -> Self {
        Self::Notify(message.to_string())
    }

    /// Create a lock error.
    pub fn lock(message: impl Into<String>) -> Self {
        Self::Lock(message.into())
    }

    /// Whether this error means the caller aborted the cycle.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
