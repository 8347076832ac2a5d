//! Change detection against persisted announcements.
//!
//! Computes which extracted records are new, which changed since the
//! last cycle, and which are unchanged. Records missing from the current
//! fetch are left alone; absence never means deletion.
//!
//! Changed ids are queued for notification before their records are
//! written, so a change stored in one cycle is still announced when that
//! cycle never reaches the dispatcher.

use std::collections::{HashMap, HashSet};

use crate::error::{AppError, Result};
use crate::models::Announcement;
use crate::storage::AnnouncementStore;

/// Disjoint classification of one source's extracted records.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Ids never seen before
    pub new: Vec<Announcement>,
    /// Known ids whose content hash changed
    pub updated: Vec<Announcement>,
    /// Ids whose content hash is unchanged
    pub unchanged: Vec<String>,
    /// Unchanged records whose derived status moved, e.g. a call whose
    /// deadline passed. Rewritten, never notified.
    pub refreshed: Vec<Announcement>,
}

impl ChangeSet {
    /// Check if there are any changes.
    pub fn has_changes(&self) -> bool {
        !self.new.is_empty() || !self.updated.is_empty()
    }

    /// New and updated records, in that order.
    pub fn changed(&self) -> impl Iterator<Item = &Announcement> {
        self.new.iter().chain(self.updated.iter())
    }
}

/// Result of persisting a change set.
#[derive(Debug)]
pub struct AppliedChanges {
    /// Only the records that were actually written, plus the unchanged ids
    pub changes: ChangeSet,
    /// The write that stopped persistence, if any
    pub write_error: Option<AppError>,
}

/// Classifies extracted records and upserts the ones that changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector;

impl ChangeDetector {
    pub fn new() -> Self {
        Self
    }

    /// Classify `current` against `previous`.
    ///
    /// Duplicate ids within `current` collapse to their first occurrence.
    /// Updated records keep the stored `first_seen_at`.
    pub fn classify(&self, previous: &[Announcement], current: Vec<Announcement>) -> ChangeSet {
        let prev_map: HashMap<&str, &Announcement> =
            previous.iter().map(|a| (a.id.as_str(), a)).collect();

        let mut seen = HashSet::new();
        let mut changes = ChangeSet::default();

        for mut announcement in current {
            if !seen.insert(announcement.id.clone()) {
                log::debug!("Dropping duplicate id {} within batch", announcement.id);
                continue;
            }
            match prev_map.get(announcement.id.as_str()) {
                None => changes.new.push(announcement),
                Some(prev) if prev.content_hash != announcement.content_hash => {
                    announcement.first_seen_at = prev.first_seen_at;
                    changes.updated.push(announcement);
                }
                Some(prev) => {
                    changes.unchanged.push(announcement.id.clone());
                    if prev.status != announcement.status {
                        announcement.first_seen_at = prev.first_seen_at;
                        changes.refreshed.push(announcement);
                    }
                }
            }
        }

        changes
    }

    /// Load the stored records of `source_id`, classify, and upsert New,
    /// Updated and refreshed records.
    ///
    /// New and Updated ids enter the notification outbox first. A failed
    /// read is an error. A failed write stops the remaining writes; what
    /// was written before it is still reported.
    pub async fn apply(
        &self,
        store: &dyn AnnouncementStore,
        source_id: &str,
        current: Vec<Announcement>,
    ) -> Result<AppliedChanges> {
        let previous = store.get_all(source_id).await?;
        let classified = self.classify(&previous, current);

        log::info!(
            "[{}] {} new, {} updated, {} unchanged",
            source_id,
            classified.new.len(),
            classified.updated.len(),
            classified.unchanged.len()
        );

        let mut written = ChangeSet {
            unchanged: classified.unchanged,
            ..ChangeSet::default()
        };

        let queued: Vec<String> = classified
            .new
            .iter()
            .chain(&classified.updated)
            .map(|a| a.id.clone())
            .collect();
        if let Err(e) = store.enqueue_pending(&queued).await {
            return Ok(AppliedChanges {
                changes: written,
                write_error: Some(e),
            });
        }

        for announcement in classified.new {
            if let Err(e) = store.upsert(&announcement).await {
                return Ok(AppliedChanges {
                    changes: written,
                    write_error: Some(e),
                });
            }
            written.new.push(announcement);
        }
        for announcement in classified.updated {
            if let Err(e) = store.upsert(&announcement).await {
                return Ok(AppliedChanges {
                    changes: written,
                    write_error: Some(e),
                });
            }
            written.updated.push(announcement);
        }
        for announcement in classified.refreshed {
            if let Err(e) = store.upsert(&announcement).await {
                return Ok(AppliedChanges {
                    changes: written,
                    write_error: Some(e),
                });
            }
            log::debug!("[{}] {} is now {:?}", source_id, announcement.id, announcement.status);
            written.refreshed.push(announcement);
        }

        Ok(AppliedChanges {
            changes: written,
            write_error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::{AnnouncementStatus, FetchRun, PublishedDate};

    fn make(id: &str, hash: &str) -> Announcement {
        let now = Utc::now();
        Announcement {
            id: id.to_string(),
            source_id: "s".into(),
            source_name: "S".into(),
            title: format!("Titolo {id}"),
            date: PublishedDate::Unknown,
            category: String::new(),
            status: AnnouncementStatus::Published,
            highlight: false,
            summary: String::new(),
            body: String::new(),
            attachments: vec![],
            content_hash: hash.to_string(),
            first_seen_at: now,
            fetched_at: now,
            source_url: format!("https://s.example/{id}"),
        }
    }

    /// In-memory store that can be told to fail writes after a number of upserts.
    #[derive(Default)]
    struct MemStore {
        records: Mutex<Vec<Announcement>>,
        outbox: Mutex<Vec<String>>,
        fail_after: Option<usize>,
        fail_outbox: bool,
        writes: Mutex<usize>,
    }

    #[async_trait]
    impl AnnouncementStore for MemStore {
        async fn upsert(&self, announcement: &Announcement) -> Result<()> {
            let mut writes = self.writes.lock().unwrap();
            if self.fail_after.is_some_and(|n| *writes >= n) {
                return Err(AppError::storage("disk full"));
            }
            *writes += 1;
            let mut records = self.records.lock().unwrap();
            records.retain(|a| a.id != announcement.id);
            records.push(announcement.clone());
            Ok(())
        }

        async fn get_all(&self, source_id: &str) -> Result<Vec<Announcement>> {
            let records = self.records.lock().unwrap();
            Ok(records
                .iter()
                .filter(|a| a.source_id == source_id)
                .cloned()
                .collect())
        }

        async fn get_content_hash(&self, id: &str) -> Result<Option<String>> {
            let records = self.records.lock().unwrap();
            Ok(records
                .iter()
                .find(|a| a.id == id)
                .map(|a| a.content_hash.clone()))
        }

        async fn append_run(&self, _run: &FetchRun) -> Result<()> {
            Ok(())
        }

        async fn last_run(&self) -> Result<Option<FetchRun>> {
            Ok(None)
        }

        async fn enqueue_pending(&self, ids: &[String]) -> Result<()> {
            if self.fail_outbox {
                return Err(AppError::storage("outbox unavailable"));
            }
            let mut outbox = self.outbox.lock().unwrap();
            for id in ids {
                if !outbox.contains(id) {
                    outbox.push(id.clone());
                }
            }
            Ok(())
        }

        async fn pending(&self) -> Result<Vec<Announcement>> {
            let outbox = self.outbox.lock().unwrap();
            let records = self.records.lock().unwrap();
            Ok(records
                .iter()
                .filter(|a| outbox.contains(&a.id))
                .cloned()
                .collect())
        }

        async fn clear_pending(&self, ids: &[String]) -> Result<()> {
            self.outbox.lock().unwrap().retain(|id| !ids.contains(id));
            Ok(())
        }
    }

    #[test]
    fn test_classify_counts() {
        let previous = vec![make("1", "a"), make("2", "b"), make("3", "c"), make("9", "z")];
        let current = vec![
            make("1", "a"),
            make("2", "b-changed"),
            make("3", "c"),
            make("4", "d"),
            make("5", "e"),
        ];
        let changes = ChangeDetector::new().classify(&previous, current);

        assert_eq!(changes.new.len(), 2);
        assert_eq!(changes.updated.len(), 1);
        assert_eq!(changes.unchanged.len(), 2);
        assert!(changes.has_changes());

        let ids: HashSet<_> = changes.changed().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["2", "4", "5"]));
    }

    #[test]
    fn test_updated_keeps_first_seen() {
        let mut old = make("1", "a");
        old.first_seen_at = Utc::now() - Duration::days(30);
        let changes = ChangeDetector::new().classify(&[old.clone()], vec![make("1", "b")]);
        assert_eq!(changes.updated[0].first_seen_at, old.first_seen_at);
    }

    #[test]
    fn test_batch_duplicates_collapse_to_first() {
        let changes =
            ChangeDetector::new().classify(&[], vec![make("1", "first"), make("1", "second")]);
        assert_eq!(changes.new.len(), 1);
        assert_eq!(changes.new[0].content_hash, "first");
    }

    #[tokio::test]
    async fn test_apply_is_idempotent_and_never_deletes() {
        let store = MemStore::default();
        let detector = ChangeDetector::new();

        let first = detector
            .apply(&store, "s", vec![make("1", "a"), make("2", "b")])
            .await
            .unwrap();
        assert_eq!(first.changes.new.len(), 2);

        let second = detector
            .apply(&store, "s", vec![make("1", "a"), make("2", "b")])
            .await
            .unwrap();
        assert!(!second.changes.has_changes());
        assert_eq!(second.changes.unchanged.len(), 2);

        let third = detector.apply(&store, "s", vec![make("1", "a")]).await.unwrap();
        assert!(!third.changes.has_changes());
        assert_eq!(store.get_all("s").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_write_failure_stops_remaining_writes() {
        let store = MemStore {
            fail_after: Some(1),
            ..MemStore::default()
        };
        let applied = ChangeDetector::new()
            .apply(&store, "s", vec![make("1", "a"), make("2", "b"), make("3", "c")])
            .await
            .unwrap();

        assert!(applied.write_error.is_some());
        assert_eq!(applied.changes.new.len(), 1);
        assert_eq!(store.get_all("s").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_changed_ids_are_queued() {
        let store = MemStore::default();
        let detector = ChangeDetector::new();
        detector
            .apply(&store, "s", vec![make("1", "a"), make("2", "b")])
            .await
            .unwrap();
        store.clear_pending(&["1".to_string(), "2".to_string()]).await.unwrap();

        detector
            .apply(&store, "s", vec![make("1", "a"), make("2", "b-changed")])
            .await
            .unwrap();
        assert_eq!(*store.outbox.lock().unwrap(), vec!["2".to_string()]);
    }

    #[tokio::test]
    async fn test_outbox_failure_writes_nothing() {
        let store = MemStore {
            fail_outbox: true,
            ..MemStore::default()
        };
        let applied = ChangeDetector::new()
            .apply(&store, "s", vec![make("1", "a")])
            .await
            .unwrap();

        assert!(applied.write_error.is_some());
        assert!(applied.changes.new.is_empty());
        assert!(store.get_all("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_change_rewrites_without_notifying() {
        let store = MemStore::default();
        let detector = ChangeDetector::new();

        let mut open = make("1", "a");
        open.status = AnnouncementStatus::Open;
        open.first_seen_at = Utc::now() - Duration::days(10);
        detector.apply(&store, "s", vec![open.clone()]).await.unwrap();
        store.clear_pending(&["1".to_string()]).await.unwrap();

        let mut closed = make("1", "a");
        closed.status = AnnouncementStatus::Closed;
        let applied = detector.apply(&store, "s", vec![closed]).await.unwrap();

        assert!(!applied.changes.has_changes());
        assert_eq!(applied.changes.unchanged, vec!["1".to_string()]);
        assert_eq!(applied.changes.refreshed.len(), 1);
        assert!(store.outbox.lock().unwrap().is_empty());

        let stored = store.get_all("s").await.unwrap();
        assert_eq!(stored[0].status, AnnouncementStatus::Closed);
        assert_eq!(stored[0].first_seen_at, open.first_seen_at);
    }
}
