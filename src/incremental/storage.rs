//! Persistence of incremental items on host nodes
//!
//! Each item lives in the `incremental` property of its node, and the node
//! carries the `incremental` tag so the whole set can be listed in one call.
//! Dismissed items move their history to the `dismissedIncremental`
//! property.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::models::{
    DismissedRecord, HistoryEntry, HistoryEvent, IncrementalItem, LifecycleMarker,
    RescheduleOrigin,
};
use super::scheduler::{self, ReviewContext, ReviewResult};
use crate::config::clamp_priority;
use crate::error::{EngineError, Result};
use crate::host::{KnowledgeBase, INCREMENTAL_MARKER, PROP_DISMISSED, PROP_INCREMENTAL};

pub struct IncrementalStore {
    kb: Arc<dyn KnowledgeBase>,
    /// One lock per item so concurrent reviews of the same node serialize
    review_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl IncrementalStore {
    pub fn new(kb: Arc<dyn KnowledgeBase>) -> Self {
        Self {
            kb,
            review_locks: Mutex::new(HashMap::new()),
        }
    }

    fn review_lock(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.review_locks.lock().unwrap();
        Arc::clone(locks.entry(id).or_default())
    }

    fn release_review_lock(&self, id: Uuid) {
        self.review_locks.lock().unwrap().remove(&id);
    }

    #[cfg(test)]
    fn review_lock_count(&self) -> usize {
        self.review_locks.lock().unwrap().len()
    }

    // ==================== Reads ====================

    /// Load an item. Nodes that are gone or whose data does not parse are
    /// reported as not incremental.
    pub async fn get(&self, id: Uuid) -> Result<Option<IncrementalItem>> {
        match self.load(id).await {
            Ok(item) => Ok(item),
            Err(EngineError::MissingEntity(_)) => Ok(None),
            Err(EngineError::MalformedPersistedData { id, reason }) => {
                log::warn!("Incremental: ignoring malformed item {}: {}", id, reason);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Load an item, surfacing missing nodes and malformed data as errors
    pub async fn load(&self, id: Uuid) -> Result<Option<IncrementalItem>> {
        if !self.kb.exists(id).await? {
            return Err(EngineError::MissingEntity(id));
        }
        match self.kb.get_property(id, PROP_INCREMENTAL).await? {
            Some(value) => parse_item(id, value).map(Some),
            None => Ok(None),
        }
    }

    /// Load an item or fail with `NotIncremental`
    pub async fn require(&self, id: Uuid) -> Result<IncrementalItem> {
        self.load(id)
            .await?
            .ok_or(EngineError::NotIncremental(id))
    }

    /// Every readable incremental item, in document order
    pub async fn list_all(&self) -> Result<Vec<IncrementalItem>> {
        let ids = self.kb.tagged_with(INCREMENTAL_MARKER).await?;
        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(item) = self.get(id).await? {
                items.push(item);
            }
        }
        Ok(items)
    }

    pub async fn dismissed(&self, id: Uuid) -> Result<Option<DismissedRecord>> {
        match self.kb.get_property(id, PROP_DISMISSED).await? {
            Some(value) => match serde_json::from_value(value) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    log::warn!("Incremental: unreadable dismissed archive on {}: {}", id, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    // ==================== Writes ====================

    pub async fn save(&self, item: &IncrementalItem) -> Result<()> {
        let value = serde_json::to_value(item)?;
        self.kb
            .set_property(item.id, PROP_INCREMENTAL, Some(value))
            .await?;
        Ok(())
    }

    /// Turn a node into an incremental item
    ///
    /// If the node was dismissed before, its archived history comes back
    /// with a made-incremental marker appended.
    pub async fn create(&self, id: Uuid, priority: u8, now: DateTime<Utc>) -> Result<IncrementalItem> {
        if !self.kb.exists(id).await? {
            return Err(EngineError::MissingEntity(id));
        }
        if let Some(existing) = self.get(id).await? {
            log::debug!("Incremental: {} is already incremental", id);
            return Ok(existing);
        }

        let mut item = IncrementalItem::new(id, priority, now);
        if let Some(archive) = self.dismissed(id).await? {
            item.history = archive.history;
            item.history
                .push(HistoryEntry::marker(now, now, LifecycleMarker::MadeIncremental));
            self.kb.set_property(id, PROP_DISMISSED, None).await?;
            log::info!(
                "Incremental: restored {} history entries for {}",
                item.history.len() - 1,
                id
            );
        }

        self.save(&item).await?;
        self.kb.add_tag(id, INCREMENTAL_MARKER).await?;
        Ok(item)
    }

    /// Stop scheduling a node and forget its history
    pub async fn remove(&self, id: Uuid) -> Result<bool> {
        let existed = self.get(id).await?.is_some();
        self.kb.set_property(id, PROP_INCREMENTAL, None).await?;
        self.kb.remove_tag(id, INCREMENTAL_MARKER).await?;
        self.release_review_lock(id);
        Ok(existed)
    }

    /// Stop scheduling a node and archive its history
    pub async fn dismiss(&self, id: Uuid, now: DateTime<Utc>) -> Result<DismissedRecord> {
        let lock = self.review_lock(id);
        let guard = lock.lock().await;

        let item = self.require(id).await?;
        let mut history = item.history;
        history.push(HistoryEntry::marker(now, item.next_rep_date, LifecycleMarker::Dismissed));
        let record = DismissedRecord {
            id,
            dismissed_at: now,
            history,
        };

        self.kb
            .set_property(id, PROP_DISMISSED, Some(serde_json::to_value(&record)?))
            .await?;
        self.kb.set_property(id, PROP_INCREMENTAL, None).await?;
        self.kb.remove_tag(id, INCREMENTAL_MARKER).await?;
        drop(guard);
        self.release_review_lock(id);
        Ok(record)
    }

    /// Schedule the next repetition after a review
    pub async fn record_review(&self, id: Uuid, ctx: &ReviewContext) -> Result<ReviewResult> {
        let lock = self.review_lock(id);
        let _guard = lock.lock().await;

        let mut item = self.require(id).await?;
        let result = scheduler::calculate_next_review(&item, ctx);
        item.next_rep_date = result.next_rep_date;
        item.history = result.history.clone();
        self.save(&item).await?;

        log::info!(
            "Incremental: reviewed {} -> next in {} day(s) ({})",
            id,
            result.interval,
            result.next_rep_date.format("%Y-%m-%d")
        );
        Ok(result)
    }

    /// Attach the measured review time to the latest repetition
    pub async fn set_review_time(&self, id: Uuid, seconds: u32) -> Result<()> {
        let lock = self.review_lock(id);
        let _guard = lock.lock().await;

        let mut item = self.require(id).await?;
        if scheduler::set_review_time(&mut item.history, seconds) {
            self.save(&item).await?;
        }
        Ok(())
    }

    pub async fn set_priority(&self, id: Uuid, priority: i64) -> Result<IncrementalItem> {
        let lock = self.review_lock(id);
        let _guard = lock.lock().await;

        let mut item = self.require(id).await?;
        item.priority = clamp_priority(priority);
        self.save(&item).await?;
        Ok(item)
    }

    /// Push the next repetition `days` out from now without reviewing
    pub async fn reschedule(
        &self,
        id: Uuid,
        days: u32,
        origin: RescheduleOrigin,
        now: DateTime<Utc>,
    ) -> Result<IncrementalItem> {
        let lock = self.review_lock(id);
        let _guard = lock.lock().await;

        let mut item = self.require(id).await?;
        item.history.push(HistoryEntry {
            date: now,
            scheduled: item.next_rep_date,
            priority: Some(item.priority),
            event: HistoryEvent::Reschedule {
                origin,
                interval: Some(days),
            },
        });
        item.next_rep_date = super::models::add_days(now, days);
        self.save(&item).await?;
        Ok(item)
    }

    /// Set the next repetition date by hand. May move it earlier.
    pub async fn reset_next_date(
        &self,
        id: Uuid,
        date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<IncrementalItem> {
        let lock = self.review_lock(id);
        let _guard = lock.lock().await;

        let mut item = self.require(id).await?;
        item.history.push(HistoryEntry {
            date: now,
            scheduled: item.next_rep_date,
            priority: Some(item.priority),
            event: HistoryEvent::ManualReset,
        });
        item.next_rep_date = date;
        self.save(&item).await?;
        Ok(item)
    }
}

/// Parse and validate a stored item
pub fn parse_item(id: Uuid, value: Value) -> Result<IncrementalItem> {
    let item: IncrementalItem =
        serde_json::from_value(value).map_err(|e| EngineError::MalformedPersistedData {
            id,
            reason: e.to_string(),
        })?;
    if item.id != id {
        return Err(EngineError::MalformedPersistedData {
            id,
            reason: format!("stored id {} does not match node", item.id),
        });
    }
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::millis_to_datetime;
    use crate::host::MemoryHost;
    use crate::incremental::models::{QueueMode, MS_PER_DAY};
    use chrono::Duration;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        millis_to_datetime(1_700_000_000_000)
    }

    fn setup() -> (Arc<MemoryHost>, IncrementalStore, Uuid) {
        let host = Arc::new(MemoryHost::new());
        let node = host.add_node("Article", None).unwrap();
        let store = IncrementalStore::new(host.clone());
        (host, store, node)
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let (_host, store, node) = setup();
        let item = store.create(node, 30, now()).await.unwrap();
        assert_eq!(item.priority, 30);
        assert!(item.history.is_empty());

        let all = store.list_all().await.unwrap();
        assert_eq!(all, vec![item]);
    }

    #[tokio::test]
    async fn test_create_on_missing_node_fails() {
        let (_host, store, _node) = setup();
        let result = store.create(Uuid::new_v4(), 30, now()).await;
        assert!(matches!(result, Err(EngineError::MissingEntity(_))));
    }

    #[tokio::test]
    async fn test_malformed_item_is_not_incremental() {
        let (host, store, node) = setup();
        host.set_property(node, PROP_INCREMENTAL, Some(json!({"id": node, "priority": "high"})))
            .await
            .unwrap();
        host.add_tag(node, INCREMENTAL_MARKER).await.unwrap();

        assert_eq!(store.get(node).await.unwrap(), None);
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_review_locks_released_when_item_leaves() {
        let (host, store, node) = setup();
        let other = host.add_node("Other", None).unwrap();
        store.create(node, 30, now()).await.unwrap();
        store.create(other, 30, now()).await.unwrap();
        store
            .record_review(node, &ReviewContext::execute(now(), false))
            .await
            .unwrap();
        store
            .record_review(other, &ReviewContext::execute(now(), false))
            .await
            .unwrap();
        assert_eq!(store.review_lock_count(), 2);

        store.dismiss(node, now()).await.unwrap();
        assert_eq!(store.review_lock_count(), 1);
        store.remove(other).await.unwrap();
        assert_eq!(store.review_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_priority_is_clamped() {
        let (host, store, node) = setup();
        host.set_property(
            node,
            PROP_INCREMENTAL,
            Some(json!({"id": node, "nextRepDate": 0, "priority": 180, "history": []})),
        )
        .await
        .unwrap();
        assert_eq!(store.get(node).await.unwrap().unwrap().priority, 100);

        for (stored, expected) in [(300, 100), (-5, 0)] {
            host.set_property(
                node,
                PROP_INCREMENTAL,
                Some(json!({"id": node, "nextRepDate": 0, "priority": stored, "history": []})),
            )
            .await
            .unwrap();
            assert_eq!(store.get(node).await.unwrap().unwrap().priority, expected);
        }
    }

    #[tokio::test]
    async fn test_record_review_persists_history() {
        let (_host, store, node) = setup();
        store.create(node, 10, now()).await.unwrap();

        let result = store
            .record_review(node, &ReviewContext::queue(now(), QueueMode::Srs))
            .await
            .unwrap();
        assert_eq!(result.interval, 2);

        store.set_review_time(node, 12).await.unwrap();
        let item = store.require(node).await.unwrap();
        assert_eq!(item.history.len(), 1);
        assert_eq!(item.next_rep_date, now() + Duration::milliseconds(2 * MS_PER_DAY));
        let json = serde_json::to_value(&item.history[0]).unwrap();
        assert_eq!(json["reviewTimeSeconds"], json!(12));
    }

    #[tokio::test]
    async fn test_concurrent_reviews_serialize() {
        let (_host, store, node) = setup();
        store.create(node, 10, now()).await.unwrap();
        let ctx = ReviewContext::queue(now(), QueueMode::Srs);

        let (a, b) = tokio::join!(store.record_review(node, &ctx), store.record_review(node, &ctx));
        a.unwrap();
        b.unwrap();

        let item = store.require(node).await.unwrap();
        assert_eq!(item.history.len(), 2);
    }

    #[tokio::test]
    async fn test_dismiss_archives_and_retag_restores() {
        let (_host, store, node) = setup();
        store.create(node, 10, now()).await.unwrap();
        store
            .record_review(node, &ReviewContext::queue(now(), QueueMode::Srs))
            .await
            .unwrap();

        let record = store.dismiss(node, now()).await.unwrap();
        assert_eq!(record.history.len(), 2);
        assert_eq!(store.get(node).await.unwrap(), None);
        assert!(store.dismissed(node).await.unwrap().is_some());

        let restored = store.create(node, 40, now()).await.unwrap();
        assert_eq!(restored.history.len(), 3);
        assert_eq!(
            restored.history.last().unwrap().event,
            HistoryEvent::Lifecycle(LifecycleMarker::MadeIncremental)
        );
        assert!(store.dismissed(node).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reschedule_and_manual_reset() {
        let (_host, store, node) = setup();
        store.create(node, 10, now()).await.unwrap();

        let item = store
            .reschedule(node, 5, RescheduleOrigin::Queue, now())
            .await
            .unwrap();
        assert_eq!(item.next_rep_date, now() + Duration::milliseconds(5 * MS_PER_DAY));
        assert_eq!(item.history[0].interval(), Some(5));

        let earlier = now() - Duration::days(1);
        let item = store.reset_next_date(node, earlier, now()).await.unwrap();
        assert_eq!(item.next_rep_date, earlier);
        assert_eq!(item.history[1].event, HistoryEvent::ManualReset);
    }

    #[tokio::test]
    async fn test_remove_untags() {
        let (_host, store, node) = setup();
        store.create(node, 10, now()).await.unwrap();
        assert!(store.remove(node).await.unwrap());
        assert!(store.list_all().await.unwrap().is_empty());
        assert!(store.dismissed(node).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_priority_clamps() {
        let (_host, store, node) = setup();
        store.create(node, 10, now()).await.unwrap();
        assert_eq!(store.set_priority(node, -20).await.unwrap().priority, 0);
        assert_eq!(store.set_priority(node, 500).await.unwrap().priority, 100);
    }
}
