//! JSON document store over a [`BlobStore`].

use std::collections::{BTreeMap, BTreeSet, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{Announcement, FetchRun, Subscriber, normalize_email};
use crate::storage::{AnnouncementStore, BlobStore, SubscriberStore};

const SUBSCRIBERS_KEY: &str = "subscribers.json";
const LATEST_RUN_KEY: &str = "runs/latest.json";
const OUTBOX_KEY: &str = "outbox.json";

#[derive(Debug, Serialize, Deserialize)]
struct AnnouncementsDoc {
    last_updated: DateTime<Utc>,
    #[serde(default)]
    announcements: BTreeMap<String, Announcement>,
}

impl Default for AnnouncementsDoc {
    fn default() -> Self {
        Self {
            last_updated: Utc::now(),
            announcements: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SubscribersDoc {
    last_updated: DateTime<Utc>,
    #[serde(default)]
    subscribers: BTreeMap<String, Subscriber>,
}

impl Default for SubscribersDoc {
    fn default() -> Self {
        Self {
            last_updated: Utc::now(),
            subscribers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerDoc {
    email: String,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    notified: BTreeSet<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OutboxDoc {
    updated_at: DateTime<Utc>,
    #[serde(default)]
    pending: BTreeSet<String>,
}

impl Default for OutboxDoc {
    fn default() -> Self {
        Self {
            updated_at: Utc::now(),
            pending: BTreeSet::new(),
        }
    }
}

/// Announcements, subscribers, ledgers and runs as JSON documents.
///
/// Every read-modify-write cycle holds one store-wide async lock, so
/// concurrent upserts cannot lose each other's updates.
pub struct DocumentStore<B> {
    blobs: B,
    write_lock: Mutex<()>,
}

impl<B: BlobStore> DocumentStore<B> {
    pub fn new(blobs: B) -> Self {
        Self {
            blobs,
            write_lock: Mutex::new(()),
        }
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    fn announcements_key(source_id: &str) -> String {
        format!("announcements/{source_id}.json")
    }

    fn ledger_key(email: &str) -> String {
        let digest = hex::encode(Sha256::digest(email.as_bytes()));
        format!("notifications/{digest}.json")
    }

    fn run_key(run_id: &str) -> String {
        format!("runs/{run_id}.json")
    }

    /// Source id encoded in an announcement id (`{source_id}-{hex}`).
    fn source_of(id: &str) -> Option<&str> {
        id.rsplit_once('-').map(|(source, _)| source)
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.blobs.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
                AppError::storage(format!("corrupt document {}: {e}", self.blobs.location(key)))
            })?)),
            None => Ok(None),
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.blobs.write_bytes(key, &bytes).await
    }

    async fn load_announcements(&self, source_id: &str) -> Result<AnnouncementsDoc> {
        Ok(self
            .read_json(&Self::announcements_key(source_id))
            .await?
            .unwrap_or_default())
    }

    async fn load_subscribers(&self) -> Result<SubscribersDoc> {
        Ok(self.read_json(SUBSCRIBERS_KEY).await?.unwrap_or_default())
    }

    async fn load_outbox(&self) -> Result<OutboxDoc> {
        Ok(self.read_json(OUTBOX_KEY).await?.unwrap_or_default())
    }
}

#[async_trait]
impl<B: BlobStore> AnnouncementStore for DocumentStore<B> {
    async fn upsert(&self, announcement: &Announcement) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load_announcements(&announcement.source_id).await?;
        doc.announcements
            .insert(announcement.id.clone(), announcement.clone());
        doc.last_updated = Utc::now();
        self.write_json(&Self::announcements_key(&announcement.source_id), &doc)
            .await
    }

    async fn get_all(&self, source_id: &str) -> Result<Vec<Announcement>> {
        let doc = self.load_announcements(source_id).await?;
        Ok(doc.announcements.into_values().collect())
    }

    async fn get_content_hash(&self, id: &str) -> Result<Option<String>> {
        let Some(source_id) = Self::source_of(id) else {
            return Ok(None);
        };
        let doc = self.load_announcements(source_id).await?;
        Ok(doc.announcements.get(id).map(|a| a.content_hash.clone()))
    }

    async fn append_run(&self, run: &FetchRun) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = Self::run_key(&run.run_id);
        if self.blobs.read_bytes(&key).await?.is_some() {
            return Err(AppError::storage(format!(
                "run {} already recorded",
                run.run_id
            )));
        }
        self.write_json(&key, run).await?;
        self.write_json(LATEST_RUN_KEY, run).await
    }

    async fn last_run(&self) -> Result<Option<FetchRun>> {
        self.read_json(LATEST_RUN_KEY).await
    }

    async fn enqueue_pending(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut outbox = self.load_outbox().await?;
        outbox.pending.extend(ids.iter().cloned());
        outbox.updated_at = Utc::now();
        self.write_json(OUTBOX_KEY, &outbox).await
    }

    async fn pending(&self) -> Result<Vec<Announcement>> {
        let outbox = self.load_outbox().await?;
        let mut by_source: BTreeMap<&str, Vec<&String>> = BTreeMap::new();
        for id in &outbox.pending {
            match Self::source_of(id) {
                Some(source_id) => by_source.entry(source_id).or_default().push(id),
                None => log::warn!("Ignoring malformed queued id {}", id),
            }
        }

        let mut records = Vec::new();
        for (source_id, ids) in by_source {
            let mut doc = self.load_announcements(source_id).await?;
            // Ids whose record was never written stay queued until it is.
            records.extend(ids.into_iter().filter_map(|id| doc.announcements.remove(id)));
        }
        Ok(records)
    }

    async fn clear_pending(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut outbox = self.load_outbox().await?;
        let before = outbox.pending.len();
        for id in ids {
            outbox.pending.remove(id);
        }
        if outbox.pending.len() == before {
            return Ok(());
        }
        outbox.updated_at = Utc::now();
        self.write_json(OUTBOX_KEY, &outbox).await
    }
}

#[async_trait]
impl<B: BlobStore> SubscriberStore for DocumentStore<B> {
    async fn list_active(&self) -> Result<Vec<Subscriber>> {
        let doc = self.load_subscribers().await?;
        Ok(doc.subscribers.into_values().filter(|s| s.active).collect())
    }

    async fn subscribe(&self, subscriber: Subscriber) -> Result<Subscriber> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load_subscribers().await?;
        let now = Utc::now();
        let stored = match doc.subscribers.remove(&subscriber.email) {
            Some(existing) => Subscriber {
                created_at: existing.created_at,
                updated_at: now,
                active: true,
                ..subscriber
            },
            None => Subscriber {
                active: true,
                ..subscriber
            },
        };
        doc.subscribers.insert(stored.email.clone(), stored.clone());
        doc.last_updated = now;
        self.write_json(SUBSCRIBERS_KEY, &doc).await?;
        Ok(stored)
    }

    async fn unsubscribe(&self, email: &str) -> Result<bool> {
        let email = normalize_email(email)?;
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load_subscribers().await?;
        let Some(subscriber) = doc.subscribers.get_mut(&email) else {
            return Ok(false);
        };
        subscriber.active = false;
        subscriber.updated_at = Utc::now();
        doc.last_updated = Utc::now();
        self.write_json(SUBSCRIBERS_KEY, &doc).await?;
        Ok(true)
    }

    async fn notified_ids(&self, email: &str) -> Result<HashSet<String>> {
        let ledger: Option<LedgerDoc> = self.read_json(&Self::ledger_key(email)).await?;
        Ok(ledger
            .map(|l| l.notified.into_iter().collect())
            .unwrap_or_default())
    }

    async fn record_notified(&self, email: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let key = Self::ledger_key(email);
        let mut ledger: LedgerDoc = self.read_json(&key).await?.unwrap_or_else(|| LedgerDoc {
            email: email.to_string(),
            updated_at: Utc::now(),
            notified: BTreeSet::new(),
        });
        ledger.notified.extend(ids.iter().cloned());
        ledger.updated_at = Utc::now();
        self.write_json(&key, &ledger).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::models::{AnnouncementStatus, PublishedDate, SubscriberFilter};
    use crate::storage::LocalBlobs;

    fn announcement(source_id: &str, n: u32) -> Announcement {
        let now = Utc::now();
        Announcement {
            id: format!("{source_id}-{n:016x}"),
            source_id: source_id.into(),
            source_name: source_id.into(),
            title: format!("Avviso {n}"),
            date: PublishedDate::Unknown,
            category: String::new(),
            status: AnnouncementStatus::Published,
            highlight: false,
            summary: String::new(),
            body: String::new(),
            attachments: vec![],
            content_hash: format!("hash-{n}"),
            first_seen_at: now,
            fetched_at: now,
            source_url: format!("https://{source_id}.example/{n}"),
        }
    }

    fn store(tmp: &TempDir) -> DocumentStore<LocalBlobs> {
        DocumentStore::new(LocalBlobs::new(tmp.path()))
    }

    #[tokio::test]
    async fn test_upsert_and_lookup() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        store.upsert(&announcement("ic-nord", 1)).await.unwrap();
        store.upsert(&announcement("ic-nord", 2)).await.unwrap();
        store.upsert(&announcement("liceo", 1)).await.unwrap();

        let mut changed = announcement("ic-nord", 1);
        changed.content_hash = "hash-new".into();
        store.upsert(&changed).await.unwrap();

        assert_eq!(store.get_all("ic-nord").await.unwrap().len(), 2);
        assert_eq!(
            store.get_content_hash(&changed.id).await.unwrap().as_deref(),
            Some("hash-new")
        );
        assert_eq!(store.get_content_hash("ic-nord-ffff").await.unwrap(), None);
        assert!(store.get_all("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_upserts_not_lost() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(store(&tmp));

        let tasks: Vec<_> = (0..16)
            .map(|n| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.upsert(&announcement("ic", n)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.get_all("ic").await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_runs_append_only() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        assert!(store.last_run().await.unwrap().is_none());

        let mut run = FetchRun::start();
        run.finish();
        store.append_run(&run).await.unwrap();
        assert!(store.append_run(&run).await.is_err());
        assert_eq!(store.last_run().await.unwrap(), Some(run));
    }

    #[tokio::test]
    async fn test_subscriber_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let sub = Subscriber::new("Ada@Example.org", SubscriberFilter::default()).unwrap();
        let created = store.subscribe(sub).await.unwrap();
        assert_eq!(store.list_active().await.unwrap().len(), 1);

        assert!(store.unsubscribe("ADA@example.org").await.unwrap());
        assert!(store.list_active().await.unwrap().is_empty());
        assert!(!store.unsubscribe("nobody@example.org").await.unwrap());

        let again = Subscriber::new("ada@example.org", SubscriberFilter::default()).unwrap();
        let restored = store.subscribe(again).await.unwrap();
        assert!(restored.active);
        assert_eq!(restored.created_at, created.created_at);
    }

    #[tokio::test]
    async fn test_outbox_resolves_and_clears() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let stored = announcement("ic-nord", 1);
        store.upsert(&stored).await.unwrap();

        let unwritten = announcement("ic-nord", 2).id;
        store
            .enqueue_pending(&[stored.id.clone(), unwritten.clone()])
            .await
            .unwrap();
        store.enqueue_pending(&[stored.id.clone()]).await.unwrap();
        assert_eq!(store.pending().await.unwrap(), vec![stored.clone()]);

        store.clear_pending(&[stored.id.clone()]).await.unwrap();
        assert!(store.pending().await.unwrap().is_empty());

        store.upsert(&announcement("ic-nord", 2)).await.unwrap();
        let pending = store.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, unwritten);
    }

    #[tokio::test]
    async fn test_ledger_per_email() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        store
            .record_notified("a@example.org", &["x-1".to_string(), "x-2".to_string()])
            .await
            .unwrap();
        store
            .record_notified("a@example.org", &["x-2".to_string(), "x-3".to_string()])
            .await
            .unwrap();

        let ids = store.notified_ids("a@example.org").await.unwrap();
        assert_eq!(ids.len(), 3);
        assert!(store.notified_ids("b@example.org").await.unwrap().is_empty());
    }
}
