//! Subscriber notification digests.
//!
//! Each active subscriber receives at most one digest per cycle listing
//! the queued announcements that match their filter and that were not
//! already delivered to them. The per-subscriber ledger is extended only
//! after the transport confirms delivery. An announcement leaves the
//! queue once no matching subscriber is still owed it.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Announcement, NotifyConfig, PublishedDate};
use crate::storage::SubscriberStore;

/// One composed email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub subject: String,
    pub body: String,
    /// Announcement ids listed in the body
    pub ids: Vec<String>,
}

/// Delivers a digest to one address.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, address: &str, digest: &Digest) -> Result<()>;
}

/// Writes digests to the log instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, address: &str, digest: &Digest) -> Result<()> {
        log::info!("Digest for {}: {}\n{}", address, digest.subject, digest.body);
        Ok(())
    }
}

#[cfg(feature = "email")]
pub use smtp::SmtpTransport;

#[cfg(feature = "email")]
mod smtp {
    use async_trait::async_trait;
    use lettre::message::{Mailbox, Message, header};
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

    use super::{Digest, Transport};
    use crate::error::{AppError, Result};
    use crate::models::NotifyConfig;

    /// SMTP delivery through `lettre`.
    pub struct SmtpTransport {
        mailer: AsyncSmtpTransport<Tokio1Executor>,
        from: Mailbox,
        reply_to: Option<Mailbox>,
    }

    impl SmtpTransport {
        pub fn new(config: &NotifyConfig) -> Result<Self> {
            let host = config.smtp_host.trim();
            let builder = if !config.smtp_use_tls {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            } else if config.smtp_port == 465 {
                AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                    .map_err(|e| AppError::config(format!("SMTP_HOST: {e}")))?
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                    .map_err(|e| AppError::config(format!("SMTP_HOST: {e}")))?
            };
            let mut builder = builder.port(config.smtp_port);
            if !config.smtp_username.is_empty() {
                builder = builder.credentials(Credentials::new(
                    config.smtp_username.clone(),
                    config.smtp_password.clone(),
                ));
            }

            let from = config
                .from
                .parse()
                .map_err(|e| AppError::config(format!("EMAIL_FROM: {e}")))?;
            let reply_to = if config.reply_to.trim().is_empty() {
                None
            } else {
                Some(
                    config
                        .reply_to
                        .parse()
                        .map_err(|e| AppError::config(format!("EMAIL_REPLY_TO: {e}")))?,
                )
            };

            Ok(Self {
                mailer: builder.build(),
                from,
                reply_to,
            })
        }
    }

    #[async_trait]
    impl Transport for SmtpTransport {
        fn name(&self) -> &'static str {
            "smtp"
        }

        async fn send(&self, address: &str, digest: &Digest) -> Result<()> {
            let to: Mailbox = address
                .parse()
                .map_err(|e| AppError::notify(format!("bad recipient {address}: {e}")))?;

            let mut builder = Message::builder()
                .from(self.from.clone())
                .to(to)
                .subject(digest.subject.clone())
                .header(header::ContentType::TEXT_PLAIN);
            if let Some(reply_to) = &self.reply_to {
                builder = builder.reply_to(reply_to.clone());
            }
            let message = builder
                .body(digest.body.clone())
                .map_err(|e| AppError::notify(format!("build email: {e}")))?;

            self.mailer
                .send(message)
                .await
                .map_err(|e| AppError::notify(format!("send to {address}: {e}")))?;
            Ok(())
        }
    }
}

/// Outcome of one dispatch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Digests confirmed by the transport
    pub sent: usize,
    /// Digests that could not be sent
    pub failed: usize,
    /// Subscribers whose matches had all been delivered already
    pub skipped: usize,
    /// Ledger writes that failed after a successful send
    pub ledger_errors: usize,
    /// Candidate ids every matching subscriber now has
    pub settled: Vec<String>,
}

/// Matches changes against subscribers and sends digests.
pub struct NotificationDispatcher {
    transport: Arc<dyn Transport>,
    subscribers: Arc<dyn SubscriberStore>,
    config: NotifyConfig,
}

impl NotificationDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        subscribers: Arc<dyn SubscriberStore>,
        config: NotifyConfig,
    ) -> Self {
        Self {
            transport,
            subscribers,
            config,
        }
    }

    /// Send one digest per active subscriber with undelivered matches.
    ///
    /// Ids matched by a subscriber whose digest failed, or that did not
    /// fit in the digest, are left out of `settled`.
    pub async fn dispatch(&self, candidates: &[Announcement]) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        if candidates.is_empty() {
            return Ok(report);
        }

        let subscribers = self.subscribers.list_active().await?;
        log::info!(
            "Dispatching {} pending announcements to {} subscribers via {}",
            candidates.len(),
            subscribers.len(),
            self.transport.name()
        );

        let mut owed: HashSet<&str> = HashSet::new();
        for subscriber in subscribers {
            let matching: Vec<&Announcement> =
                candidates.iter().filter(|a| subscriber.wants(a)).collect();
            if matching.is_empty() {
                continue;
            }

            let delivered = match self.subscribers.notified_ids(&subscriber.email).await {
                Ok(ids) => ids,
                Err(e) => {
                    log::warn!("Cannot read ledger for {}: {}", subscriber.email, e);
                    report.failed += 1;
                    owed.extend(matching.into_iter().map(|a| a.id.as_str()));
                    continue;
                }
            };

            let mut seen = HashSet::new();
            let pending: Vec<&Announcement> = matching
                .into_iter()
                .filter(|a| !delivered.contains(&a.id) && seen.insert(a.id.as_str()))
                .collect();
            if pending.is_empty() {
                report.skipped += 1;
                continue;
            }

            let digest = self.compose(&subscriber.email, pending.clone());
            match self.transport.send(&subscriber.email, &digest).await {
                Ok(()) => {
                    report.sent += 1;
                    owed.extend(
                        pending
                            .into_iter()
                            .map(|a| a.id.as_str())
                            .filter(|id| !digest.ids.iter().any(|sent| sent == id)),
                    );
                    if let Err(e) = self
                        .subscribers
                        .record_notified(&subscriber.email, &digest.ids)
                        .await
                    {
                        report.ledger_errors += 1;
                        log::error!(
                            "Sent digest to {} but could not update its ledger: {}",
                            subscriber.email,
                            e
                        );
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    owed.extend(pending.into_iter().map(|a| a.id.as_str()));
                    log::warn!("Failed to send digest to {}: {}", subscriber.email, e);
                }
            }
        }

        let mut seen = HashSet::new();
        report.settled = candidates
            .iter()
            .map(|a| a.id.as_str())
            .filter(|id| !owed.contains(id) && seen.insert(*id))
            .map(str::to_string)
            .collect();
        Ok(report)
    }

    /// Build the digest, newest first, capped at `max_digest_items` entries.
    pub fn compose(&self, address: &str, mut items: Vec<&Announcement>) -> Digest {
        items.sort_by(|a, b| b.date.cmp(&a.date));
        items.truncate(self.config.max_digest_items);

        let mut lines = vec!["New announcements are available:".to_string(), String::new()];
        for a in &items {
            let mut line = format!("- {} ({})", a.title.trim(), a.source_name.trim());
            if let PublishedDate::Known(date) = a.date {
                line.push_str(&format!(" {}", date.format("%Y-%m-%d")));
            }
            lines.push(line);
            if !a.source_url.is_empty() {
                lines.push(format!("  {}", a.source_url));
            }
        }
        lines.push(String::new());

        let base = self.config.app_base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            lines.push("Unsubscribe: reply to this email asking to be removed.".to_string());
        } else {
            let email: String = url::form_urlencoded::byte_serialize(address.as_bytes()).collect();
            lines.push(format!("Unsubscribe: {base}/unsubscribe?email={email}"));
        }

        Digest {
            subject: format!(
                "{}{} new announcement(s)",
                self.config.subject_prefix,
                items.len()
            ),
            body: lines.join("\n"),
            ids: items.iter().map(|a| a.id.clone()).collect(),
        }
    }
}
