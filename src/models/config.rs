//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP, pacing and per-cycle limits
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Rendered-browser fallback settings
    #[serde(default)]
    pub render: RenderConfig,

    /// Bot-challenge heuristics
    #[serde(default)]
    pub challenge: ChallengeConfig,

    /// Field extraction rules
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Notification delivery settings
    #[serde(default)]
    pub notify: NotifyConfig,

    /// File locations, relative to the storage directory
    #[serde(default)]
    pub paths: PathsConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Apply environment-style overrides for the runtime tunables.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`; tests pass a map.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let fetch = &mut self.fetch;
        override_parsed(&lookup, "HARVESTER_MIN_DELAY_MS", &mut fetch.min_delay_ms)?;
        override_parsed(&lookup, "HARVESTER_MAX_DELAY_MS", &mut fetch.max_delay_ms)?;
        override_parsed(&lookup, "HARVESTER_TIMEOUT_SECS", &mut fetch.timeout_secs)?;
        override_parsed(&lookup, "HARVESTER_DETAIL_CAP", &mut fetch.detail_cap)?;
        override_parsed(
            &lookup,
            "HARVESTER_DETAIL_CONCURRENCY",
            &mut fetch.detail_concurrency,
        )?;

        let render = &mut self.render;
        override_flag(&lookup, "HARVESTER_RENDER_ENABLED", &mut render.enabled)?;
        override_flag(&lookup, "HARVESTER_RENDER_OBSERVE", &mut render.observe)?;
        override_string(&lookup, "HARVESTER_BROWSER", &mut render.browser);
        override_parsed(
            &lookup,
            "HARVESTER_MANUAL_SOLVE_TIMEOUT_SECS",
            &mut render.manual_solve_timeout_secs,
        )?;

        let notify = &mut self.notify;
        override_flag(&lookup, "EMAIL_NOTIFICATIONS_ENABLED", &mut notify.enabled)?;
        override_string(&lookup, "SMTP_HOST", &mut notify.smtp_host);
        override_parsed(&lookup, "SMTP_PORT", &mut notify.smtp_port)?;
        override_string(&lookup, "SMTP_USERNAME", &mut notify.smtp_username);
        override_string(&lookup, "SMTP_PASSWORD", &mut notify.smtp_password);
        override_flag(&lookup, "SMTP_USE_TLS", &mut notify.smtp_use_tls)?;
        override_string(&lookup, "EMAIL_FROM", &mut notify.from);
        override_string(&lookup, "EMAIL_REPLY_TO", &mut notify.reply_to);
        override_string(&lookup, "EMAIL_SUBJECT_PREFIX", &mut notify.subject_prefix);
        override_string(&lookup, "APP_BASE_URL", &mut notify.app_base_url);

        Ok(())
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.fetch.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetch.user_agent is empty"));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(AppError::validation("fetch.timeout_secs must be > 0"));
        }
        if self.fetch.min_delay_ms > self.fetch.max_delay_ms {
            return Err(AppError::validation(
                "fetch.min_delay_ms must not exceed fetch.max_delay_ms",
            ));
        }
        if self.fetch.detail_concurrency == 0 {
            return Err(AppError::validation(
                "fetch.detail_concurrency must be > 0",
            ));
        }
        if self.render.enabled && self.render.browser.trim().is_empty() {
            return Err(AppError::validation(
                "render.browser is required when rendering is enabled",
            ));
        }
        if self.render.render_timeout_secs == 0 {
            return Err(AppError::validation(
                "render.render_timeout_secs must be > 0",
            ));
        }
        if self.notify.enabled
            && (self.notify.smtp_host.trim().is_empty() || self.notify.from.trim().is_empty())
        {
            return Err(AppError::validation(
                "notify.smtp_host and notify.from are required when email is enabled",
            ));
        }
        if self.notify.max_digest_items == 0 {
            return Err(AppError::validation("notify.max_digest_items must be > 0"));
        }
        Ok(())
    }
}

fn override_string<F>(lookup: &F, key: &str, target: &mut String)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(key) {
        *target = value;
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| AppError::config(format!("{key} has an invalid value: '{raw}'")))?;
    }
    Ok(())
}

fn override_flag<F>(lookup: &F, key: &str, target: &mut bool) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *target = match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "t" | "yes" | "on" => true,
            "0" | "false" | "f" | "no" | "off" | "" => false,
            _ => {
                return Err(AppError::config(format!(
                    "{key} has an invalid value: '{raw}'"
                )));
            }
        };
    }
    Ok(())
}

/// HTTP client, pacing and per-cycle limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// User-Agent header; a current desktop browser string
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Accept-Language header
    #[serde(default = "defaults::accept_language")]
    pub accept_language: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Lower bound of the randomized inter-request delay
    #[serde(default = "defaults::min_delay")]
    pub min_delay_ms: u64,

    /// Upper bound of the randomized inter-request delay
    #[serde(default = "defaults::max_delay")]
    pub max_delay_ms: u64,

    /// Detail pages fetched per source per cycle
    #[serde(default = "defaults::detail_cap")]
    pub detail_cap: usize,

    /// Detail pages fetched in parallel within one source
    #[serde(default = "defaults::detail_concurrency")]
    pub detail_concurrency: usize,

    /// Attachments larger than this are not downloaded
    #[serde(default = "defaults::max_attachment_bytes")]
    pub max_attachment_bytes: u64,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            accept_language: defaults::accept_language(),
            timeout_secs: defaults::timeout(),
            min_delay_ms: defaults::min_delay(),
            max_delay_ms: defaults::max_delay(),
            detail_cap: defaults::detail_cap(),
            detail_concurrency: defaults::detail_concurrency(),
            max_attachment_bytes: defaults::max_attachment_bytes(),
        }
    }
}

/// Rendered-browser fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Whether the rendered fallback may be used at all
    #[serde(default = "defaults::render_enabled")]
    pub enabled: bool,

    /// Chromium-family executable
    #[serde(default = "defaults::browser")]
    pub browser: String,

    /// Persistent browser profile directory
    #[serde(default = "defaults::profile_dir")]
    pub profile_dir: PathBuf,

    /// Open a visible window and wait for an operator on challenges
    #[serde(default)]
    pub observe: bool,

    /// Upper bound for one render
    #[serde(default = "defaults::render_timeout")]
    pub render_timeout_secs: u64,

    /// Time given to page scripts before the DOM is dumped
    #[serde(default = "defaults::virtual_time_budget")]
    pub virtual_time_budget_ms: u64,

    /// How long to wait for the operator signal
    #[serde(default = "defaults::manual_solve_timeout")]
    pub manual_solve_timeout_secs: u64,

    /// File the operator creates once the challenge is solved
    #[serde(default = "defaults::signal_file")]
    pub signal_file: PathBuf,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::render_enabled(),
            browser: defaults::browser(),
            profile_dir: defaults::profile_dir(),
            observe: false,
            render_timeout_secs: defaults::render_timeout(),
            virtual_time_budget_ms: defaults::virtual_time_budget(),
            manual_solve_timeout_secs: defaults::manual_solve_timeout(),
            signal_file: defaults::signal_file(),
        }
    }
}

/// Heuristics that classify a response as a bot challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeConfig {
    /// Case-insensitive substrings of challenge pages
    #[serde(default = "defaults::challenge_markers")]
    pub markers: Vec<String>,

    /// Status codes that anti-bot layers answer with
    #[serde(default = "defaults::challenge_statuses")]
    pub statuses: Vec<u16>,

    /// Substrings of redirect targets that indicate an interstitial
    #[serde(default = "defaults::redirect_markers")]
    pub redirect_markers: Vec<String>,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            markers: defaults::challenge_markers(),
            statuses: defaults::challenge_statuses(),
            redirect_markers: defaults::redirect_markers(),
        }
    }
}

/// Field extraction rules shared by all sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Title keywords that set the highlight flag
    #[serde(default = "defaults::highlight_keywords")]
    pub highlight_keywords: Vec<String>,

    /// Title keywords that mark a call without a parsed deadline as open
    #[serde(default = "defaults::call_keywords")]
    pub call_keywords: Vec<String>,

    /// Phrases that precede a deadline date in body text
    #[serde(default = "defaults::deadline_phrases")]
    pub deadline_phrases: Vec<String>,

    /// File extensions treated as downloadable documents
    #[serde(default = "defaults::attachment_extensions")]
    pub attachment_extensions: Vec<String>,

    /// Paragraphs kept for the body when no body selector matches
    #[serde(default = "defaults::max_paragraphs")]
    pub max_paragraphs: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            highlight_keywords: defaults::highlight_keywords(),
            call_keywords: defaults::call_keywords(),
            deadline_phrases: defaults::deadline_phrases(),
            attachment_extensions: defaults::attachment_extensions(),
            max_paragraphs: defaults::max_paragraphs(),
        }
    }
}

/// Notification delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Send email digests
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub smtp_host: String,

    #[serde(default = "defaults::smtp_port")]
    pub smtp_port: u16,

    #[serde(default)]
    pub smtp_username: String,

    #[serde(default)]
    pub smtp_password: String,

    #[serde(default = "defaults::smtp_use_tls")]
    pub smtp_use_tls: bool,

    /// Sender address
    #[serde(default)]
    pub from: String,

    #[serde(default)]
    pub reply_to: String,

    #[serde(default = "defaults::subject_prefix")]
    pub subject_prefix: String,

    /// Public dashboard URL used for the unsubscribe line
    #[serde(default)]
    pub app_base_url: String,

    /// Entries listed in one digest
    #[serde(default = "defaults::max_digest_items")]
    pub max_digest_items: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: defaults::smtp_port(),
            smtp_username: String::new(),
            smtp_password: String::new(),
            smtp_use_tls: defaults::smtp_use_tls(),
            from: String::new(),
            reply_to: String::new(),
            subject_prefix: defaults::subject_prefix(),
            app_base_url: String::new(),
            max_digest_items: defaults::max_digest_items(),
        }
    }
}

/// File locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Source registry file
    #[serde(default = "defaults::sources_file")]
    pub sources_file: PathBuf,

    /// Root of the JSON document store
    #[serde(default = "defaults::data_dir")]
    pub data_dir: PathBuf,

    /// Run lock guarding the browser profile
    #[serde(default = "defaults::lock_file")]
    pub lock_file: PathBuf,

    /// A lock older than this is considered abandoned
    #[serde(default = "defaults::lock_stale")]
    pub lock_stale_secs: u64,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            sources_file: defaults::sources_file(),
            data_dir: defaults::data_dir(),
            lock_file: defaults::lock_file(),
            lock_stale_secs: defaults::lock_stale(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Fetch defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/124.0.0.0 Safari/537.36"
            .into()
    }
    pub fn accept_language() -> String {
        "it-IT,it;q=0.9,en-US;q=0.8,en;q=0.7".into()
    }
    pub fn timeout() -> u64 {
        20
    }
    pub fn min_delay() -> u64 {
        1_500
    }
    pub fn max_delay() -> u64 {
        4_500
    }
    pub fn detail_cap() -> usize {
        10
    }
    pub fn detail_concurrency() -> usize {
        2
    }
    pub fn max_attachment_bytes() -> u64 {
        20 * 1024 * 1024
    }

    // Render defaults
    pub fn render_enabled() -> bool {
        true
    }
    pub fn browser() -> String {
        "chromium".into()
    }
    pub fn profile_dir() -> PathBuf {
        PathBuf::from("browser-profile")
    }
    pub fn render_timeout() -> u64 {
        60
    }
    pub fn virtual_time_budget() -> u64 {
        8_000
    }
    pub fn manual_solve_timeout() -> u64 {
        180
    }
    pub fn signal_file() -> PathBuf {
        PathBuf::from("browser-profile/SOLVED")
    }

    // Challenge defaults
    pub fn challenge_markers() -> Vec<String> {
        [
            "cf-chl",
            "challenge-platform",
            "cf-browser-verification",
            "just a moment...",
            "attention required! | cloudflare",
            "checking your browser before accessing",
            "ddos-guard",
            "px-captcha",
            "incapsula incident id",
            "sucuri website firewall",
            "hcaptcha-challenge",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
    pub fn challenge_statuses() -> Vec<u16> {
        vec![403, 429, 503]
    }
    pub fn redirect_markers() -> Vec<String> {
        ["/cdn-cgi/", "captcha", "challenge", "__cf_chl"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    // Extraction defaults
    pub fn highlight_keywords() -> Vec<String> {
        ["avviso", "selezione", "tutor", "bando"]
            .into_iter()
            .map(String::from)
            .collect()
    }
    pub fn call_keywords() -> Vec<String> {
        ["bando", "avviso", "selezione"]
            .into_iter()
            .map(String::from)
            .collect()
    }
    pub fn deadline_phrases() -> Vec<String> {
        [
            "scadenza",
            "entro il",
            "entro e non oltre il",
            "termine ultimo",
            "deadline",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
    pub fn attachment_extensions() -> Vec<String> {
        ["pdf", "txt", "doc", "docx", "odt", "rtf", "p7m", "xls", "xlsx"]
            .into_iter()
            .map(String::from)
            .collect()
    }
    pub fn max_paragraphs() -> usize {
        6
    }

    // Notify defaults
    pub fn smtp_port() -> u16 {
        587
    }
    pub fn smtp_use_tls() -> bool {
        true
    }
    pub fn subject_prefix() -> String {
        "[Alliance] ".into()
    }
    pub fn max_digest_items() -> usize {
        50
    }

    // Path defaults
    pub fn sources_file() -> PathBuf {
        PathBuf::from("sources.toml")
    }
    pub fn data_dir() -> PathBuf {
        PathBuf::from("data")
    }
    pub fn lock_file() -> PathBuf {
        PathBuf::from("run.lock")
    }
    pub fn lock_stale() -> u64 {
        6 * 60 * 60
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_inverted_delay_bounds() {
        let mut config = Config::default();
        config.fetch.min_delay_ms = 5_000;
        config.fetch.max_delay_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.fetch.detail_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_requires_smtp_when_enabled() {
        let mut config = Config::default();
        config.notify.enabled = true;
        assert!(config.validate().is_err());
        config.notify.smtp_host = "smtp.example.org".into();
        config.notify.from = "alerts@example.org".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config
            .apply_env_overrides(lookup(&[
                ("HARVESTER_MIN_DELAY_MS", "100"),
                ("HARVESTER_MAX_DELAY_MS", "250"),
                ("HARVESTER_DETAIL_CAP", "3"),
                ("HARVESTER_RENDER_ENABLED", "false"),
                ("HARVESTER_RENDER_OBSERVE", "yes"),
                ("SMTP_HOST", "smtp.example.org"),
            ]))
            .unwrap();

        assert_eq!(config.fetch.min_delay_ms, 100);
        assert_eq!(config.fetch.max_delay_ms, 250);
        assert_eq!(config.fetch.detail_cap, 3);
        assert!(!config.render.enabled);
        assert!(config.render.observe);
        assert_eq!(config.notify.smtp_host, "smtp.example.org");
    }

    #[test]
    fn env_override_rejects_garbage() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(lookup(&[("HARVESTER_TIMEOUT_SECS", "soon")]));
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [fetch]
            min_delay_ms = 10
            max_delay_ms = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.fetch.min_delay_ms, 10);
        assert_eq!(config.fetch.detail_cap, 10);
        assert!(config.render.enabled);
        assert_eq!(config.notify.max_digest_items, 50);
    }
}
