//! Per-session cache of due lists and percentile maps
//!
//! Built once when the learner enters a queue so every step can answer
//! "what is due here and how urgent is it" without touching the host. The
//! cache is derived state: throw it away and rebuild whenever in doubt.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use uuid::Uuid;

use super::scope::{ResolvedScopes, Scope};
use super::shield::{pick_shield, ShieldKind, ShieldStatus};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::host::{FlashcardSource, KnowledgeBase};
use crate::incremental::IncrementalItem;
use crate::priority::kb_cache::{build_card_priority_cache, load_card_priority_cache};
use crate::priority::{percentile_map, CardPriorityInfo, PriorityEntry};

/// The parts of an incremental item the queue needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalSummary {
    pub id: Uuid,
    pub priority: u8,
    pub next_rep_date: DateTime<Utc>,
}

impl IncrementalSummary {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_rep_date <= now
    }
}

impl From<&IncrementalItem> for IncrementalSummary {
    fn from(item: &IncrementalItem) -> Self {
        Self {
            id: item.id,
            priority: item.priority,
            next_rep_date: item.next_rep_date,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionCache {
    pub selection_scope: Scope,
    pub priority_scope: Scope,
    pub built_at: DateTime<Utc>,
    /// Card priority percentiles within the priority scope
    pub doc_percentiles: HashMap<Uuid, u8>,
    pub kb_card_percentiles: HashMap<Uuid, u8>,
    /// Sorted by ascending priority
    pub due_cards_in_scope: Vec<CardPriorityInfo>,
    pub due_cards_in_kb: Vec<CardPriorityInfo>,
    pub due_inc_items_in_scope: Vec<IncrementalSummary>,
    pub due_inc_items_in_kb: Vec<IncrementalSummary>,
    pub inc_item_doc_percentiles: HashMap<Uuid, u8>,
    pub inc_item_kb_percentiles: HashMap<Uuid, u8>,
    /// Every incremental item, in document order
    pub all_inc_items: Vec<IncrementalSummary>,
    reviewed: HashSet<Uuid>,
}

impl SessionCache {
    /// Compute every list and map from already loaded data
    pub fn compute(
        scopes: ResolvedScopes,
        card_infos: Vec<CardPriorityInfo>,
        items: &[IncrementalItem],
        now: DateTime<Utc>,
    ) -> Self {
        let ResolvedScopes { selection, priority } = scopes;

        let card_entries: Vec<PriorityEntry> = card_infos.iter().map(PriorityEntry::from).collect();
        let kb_card_percentiles = percentile_map(&card_entries);
        let scoped_card_entries: Vec<PriorityEntry> = card_entries
            .iter()
            .filter(|e| priority.contains(e.id))
            .copied()
            .collect();
        let doc_percentiles = percentile_map(&scoped_card_entries);

        let mut due_cards_in_kb: Vec<CardPriorityInfo> =
            card_infos.into_iter().filter(|c| c.has_due_cards()).collect();
        due_cards_in_kb.sort_by_key(|c| c.priority);
        let due_cards_in_scope = due_cards_in_kb
            .iter()
            .filter(|c| selection.contains(c.id))
            .cloned()
            .collect();

        let all_inc_items: Vec<IncrementalSummary> = items.iter().map(IncrementalSummary::from).collect();
        let item_entries: Vec<PriorityEntry> = items.iter().map(PriorityEntry::from).collect();
        let inc_item_kb_percentiles = percentile_map(&item_entries);
        let scoped_item_entries: Vec<PriorityEntry> = item_entries
            .iter()
            .filter(|e| priority.contains(e.id))
            .copied()
            .collect();
        let inc_item_doc_percentiles = percentile_map(&scoped_item_entries);

        let mut due_inc_items_in_kb: Vec<IncrementalSummary> =
            all_inc_items.iter().filter(|i| i.is_due(now)).copied().collect();
        due_inc_items_in_kb.sort_by_key(|i| i.priority);
        let due_inc_items_in_scope = due_inc_items_in_kb
            .iter()
            .filter(|i| selection.contains(i.id))
            .copied()
            .collect();

        Self {
            selection_scope: selection,
            priority_scope: priority,
            built_at: now,
            doc_percentiles,
            kb_card_percentiles,
            due_cards_in_scope,
            due_cards_in_kb,
            due_inc_items_in_scope,
            due_inc_items_in_kb,
            inc_item_doc_percentiles,
            inc_item_kb_percentiles,
            all_inc_items,
            reviewed: HashSet::new(),
        }
    }

    pub fn mark_reviewed(&mut self, id: Uuid) {
        self.reviewed.insert(id);
    }

    pub fn is_reviewed(&self, id: Uuid) -> bool {
        self.reviewed.contains(&id)
    }

    /// Percentile of an item within the priority scope, else the whole base
    pub fn item_percentile(&self, id: Uuid) -> Option<u8> {
        self.inc_item_doc_percentiles
            .get(&id)
            .or_else(|| self.inc_item_kb_percentiles.get(&id))
            .copied()
    }

    pub fn card_percentile(&self, id: Uuid) -> Option<u8> {
        self.doc_percentiles
            .get(&id)
            .or_else(|| self.kb_card_percentiles.get(&id))
            .copied()
    }

    /// Reflect a changed item (after a review or priority change)
    pub fn update_item(&mut self, item: &IncrementalItem, now: DateTime<Utc>) {
        let summary = IncrementalSummary::from(item);
        match self.all_inc_items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => *existing = summary,
            None => self.all_inc_items.push(summary),
        }

        self.due_inc_items_in_kb.retain(|i| i.id != item.id);
        self.due_inc_items_in_scope.retain(|i| i.id != item.id);
        if summary.is_due(now) {
            insert_sorted(&mut self.due_inc_items_in_kb, summary);
            if self.selection_scope.contains(item.id) {
                insert_sorted(&mut self.due_inc_items_in_scope, summary);
            }
        }
        self.recompute_item_percentiles();
    }

    /// Forget an item that stopped being incremental
    pub fn remove_item(&mut self, id: Uuid) {
        self.all_inc_items.retain(|i| i.id != id);
        self.due_inc_items_in_kb.retain(|i| i.id != id);
        self.due_inc_items_in_scope.retain(|i| i.id != id);
        self.recompute_item_percentiles();
    }

    /// Rerank every item from `all_inc_items`
    fn recompute_item_percentiles(&mut self) {
        let entries: Vec<PriorityEntry> = self
            .all_inc_items
            .iter()
            .map(|i| PriorityEntry::new(i.id, i.priority))
            .collect();
        self.inc_item_kb_percentiles = percentile_map(&entries);
        let scoped: Vec<PriorityEntry> = entries
            .into_iter()
            .filter(|e| self.priority_scope.contains(e.id))
            .collect();
        self.inc_item_doc_percentiles = percentile_map(&scoped);
    }

    pub fn shield(&self, kind: ShieldKind) -> ShieldStatus {
        match kind {
            ShieldKind::IncrementalItems => ShieldStatus {
                in_scope: pick_shield(
                    self.due_inc_items_in_scope.iter().map(|i| (i.id, i.priority)),
                    &self.reviewed,
                    &self.inc_item_doc_percentiles,
                ),
                in_kb: pick_shield(
                    self.due_inc_items_in_kb.iter().map(|i| (i.id, i.priority)),
                    &self.reviewed,
                    &self.inc_item_kb_percentiles,
                ),
            },
            ShieldKind::Flashcards => ShieldStatus {
                in_scope: pick_shield(
                    self.due_cards_in_scope.iter().map(|c| (c.id, c.priority)),
                    &self.reviewed,
                    &self.doc_percentiles,
                ),
                in_kb: pick_shield(
                    self.due_cards_in_kb.iter().map(|c| (c.id, c.priority)),
                    &self.reviewed,
                    &self.kb_card_percentiles,
                ),
            },
        }
    }
}

/// Insert after every entry with the same or lower priority
fn insert_sorted(list: &mut Vec<IncrementalSummary>, summary: IncrementalSummary) {
    let at = list.partition_point(|i| i.priority <= summary.priority);
    list.insert(at, summary);
}

pub struct SessionCacheBuilder<'a> {
    kb: &'a dyn KnowledgeBase,
    cards: &'a dyn FlashcardSource,
    config: &'a EngineConfig,
}

impl<'a> SessionCacheBuilder<'a> {
    pub fn new(kb: &'a dyn KnowledgeBase, cards: &'a dyn FlashcardSource, config: &'a EngineConfig) -> Self {
        Self { kb, cards, config }
    }

    pub async fn build(
        &self,
        scopes: ResolvedScopes,
        items: &[IncrementalItem],
        now: DateTime<Utc>,
    ) -> Result<SessionCache> {
        let card_infos = match self.cached_card_infos(now).await {
            Ok(infos) => infos,
            Err(EngineError::CacheUnavailable) => {
                log::info!("Session cache: no card priority cache, computing directly");
                build_card_priority_cache(self.kb, self.cards, self.config, now).await?
            }
            Err(e) => return Err(e),
        };

        let cache = SessionCache::compute(scopes, card_infos, items, now);
        log::info!(
            "Session cache: {} due item(s) in scope ({} in base), {} due card node(s) in scope ({} in base)",
            cache.due_inc_items_in_scope.len(),
            cache.due_inc_items_in_kb.len(),
            cache.due_cards_in_scope.len(),
            cache.due_cards_in_kb.len()
        );
        Ok(cache)
    }

    /// Card priorities from the stored cache, with due counts refreshed
    async fn cached_card_infos(&self, now: DateTime<Utc>) -> Result<Vec<CardPriorityInfo>> {
        let cached = load_card_priority_cache(self.kb)
            .await?
            .ok_or(EngineError::CacheUnavailable)?;

        let mut infos = Vec::with_capacity(cached.len());
        for (index, batch) in cached.chunks(self.config.propagation_batch_size.max(1)).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.batch_delay()).await;
            }
            let refreshed = join_all(batch.iter().map(|info| self.refresh_due(info, now))).await;
            for result in refreshed {
                if let Some(info) = result? {
                    infos.push(info);
                }
            }
        }
        Ok(infos)
    }

    async fn refresh_due(&self, info: &CardPriorityInfo, now: DateTime<Utc>) -> Result<Option<CardPriorityInfo>> {
        match self.cards.cards_of(info.id).await {
            Ok(cards) => Ok(Some(CardPriorityInfo {
                card_count: cards.len(),
                due_cards: cards.iter().filter(|c| c.is_due(now)).count(),
                ..info.clone()
            })),
            Err(crate::host::HostError::NodeNotFound(id)) => {
                log::debug!("Session cache: cached node {} is gone", id);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::millis_to_datetime;
    use crate::host::MemoryHost;
    use crate::priority::kb_cache::store_card_priority_cache;
    use crate::priority::PrioritySource;
    use crate::session::scope::resolve_scopes;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        millis_to_datetime(1_700_000_000_000)
    }

    fn item(id: Uuid, priority: u8, due_in_days: i64) -> IncrementalItem {
        IncrementalItem::new(id, priority, now() + Duration::days(due_in_days))
    }

    fn config() -> EngineConfig {
        EngineConfig {
            batch_delay_ms: 0,
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_due_lists_and_percentiles() {
        let host = MemoryHost::new();
        let doc = host.add_node("Doc", None).unwrap();
        let a = host.add_node("A", Some(doc)).unwrap();
        let b = host.add_node("B", Some(doc)).unwrap();
        let outside = host.add_node("Outside", None).unwrap();
        let later = host.add_node("Later", Some(doc)).unwrap();

        let items = vec![
            item(a, 40, 0),
            item(b, 20, -2),
            item(outside, 10, -1),
            item(later, 5, 3),
        ];
        let scopes = resolve_scopes(&host, Some(doc)).await.unwrap();
        let cache = SessionCacheBuilder::new(&host, &host, &config())
            .build(scopes, &items, now())
            .await
            .unwrap();

        let ids = |list: &[IncrementalSummary]| list.iter().map(|i| i.id).collect::<Vec<_>>();
        assert_eq!(ids(&cache.due_inc_items_in_scope), vec![b, a]);
        assert_eq!(ids(&cache.due_inc_items_in_kb), vec![outside, b, a]);
        assert_eq!(cache.inc_item_doc_percentiles[&later], 33);
        assert_eq!(cache.inc_item_doc_percentiles[&a], 100);
        assert_eq!(cache.inc_item_kb_percentiles[&outside], 50);
        assert_eq!(cache.item_percentile(outside), Some(50));
    }

    #[tokio::test]
    async fn test_shields_skip_reviewed_items() {
        let host = MemoryHost::new();
        let doc = host.add_node("Doc", None).unwrap();
        let a = host.add_node("A", Some(doc)).unwrap();
        let b = host.add_node("B", Some(doc)).unwrap();
        let items = vec![item(a, 10, 0), item(b, 30, 0)];
        let scopes = resolve_scopes(&host, Some(doc)).await.unwrap();
        let mut cache = SessionCacheBuilder::new(&host, &host, &config())
            .build(scopes, &items, now())
            .await
            .unwrap();

        let shield = cache.shield(ShieldKind::IncrementalItems);
        assert_eq!(shield.in_scope.unwrap().id, a);
        assert_eq!(shield.in_scope.unwrap().percentile, Some(50));

        cache.mark_reviewed(a);
        let shield = cache.shield(ShieldKind::IncrementalItems);
        assert_eq!(shield.in_scope.unwrap().id, b);
        assert_eq!(shield.in_kb.unwrap().id, b);

        cache.mark_reviewed(b);
        assert_eq!(cache.shield(ShieldKind::IncrementalItems), ShieldStatus::default());
    }

    #[tokio::test]
    async fn test_stored_cache_is_used_with_fresh_due_counts() {
        let host = MemoryHost::new();
        let doc = host.add_node("Doc", None).unwrap();
        let cards = host.add_node("Cards", Some(doc)).unwrap();
        host.add_card(cards, now() - Duration::hours(1)).unwrap();
        store_card_priority_cache(
            &host,
            &[CardPriorityInfo {
                id: cards,
                priority: 77,
                source: PrioritySource::Manual,
                card_count: 0,
                due_cards: 0,
                kb_percentile: None,
            }],
        )
        .await
        .unwrap();

        let scopes = resolve_scopes(&host, Some(doc)).await.unwrap();
        let cache = SessionCacheBuilder::new(&host, &host, &config())
            .build(scopes, &[], now())
            .await
            .unwrap();

        assert_eq!(cache.due_cards_in_scope.len(), 1);
        assert_eq!(cache.due_cards_in_scope[0].priority, 77);
        assert_eq!(cache.due_cards_in_scope[0].due_cards, 1);
        let shield = cache.shield(ShieldKind::Flashcards);
        assert_eq!(shield.in_scope.unwrap().percentile, Some(100));
    }

    #[tokio::test]
    async fn test_missing_cache_falls_back_to_direct_build() {
        let host = MemoryHost::new();
        let cards = host.add_node("Cards", None).unwrap();
        host.add_card(cards, now()).unwrap();

        let scopes = resolve_scopes(&host, None).await.unwrap();
        let cache = SessionCacheBuilder::new(&host, &host, &config())
            .build(scopes, &[], now())
            .await
            .unwrap();
        assert_eq!(cache.due_cards_in_kb.len(), 1);
        assert_eq!(cache.due_cards_in_kb[0].source, PrioritySource::Default);
    }

    #[test]
    fn test_update_item_moves_between_lists() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut items = vec![item(a, 10, 0), item(b, 20, 0)];
        let mut cache = SessionCache::compute(
            ResolvedScopes {
                selection: Scope::knowledge_base(),
                priority: Scope::knowledge_base(),
            },
            Vec::new(),
            &items,
            now(),
        );

        items[0].next_rep_date = now() + Duration::days(2);
        cache.update_item(&items[0], now());
        assert_eq!(cache.due_inc_items_in_scope.len(), 1);
        assert_eq!(cache.due_inc_items_in_scope[0].id, b);

        items[0].next_rep_date = now();
        items[0].priority = 30;
        cache.update_item(&items[0], now());
        assert_eq!(cache.due_inc_items_in_kb[1].id, a);

        cache.remove_item(b);
        assert_eq!(cache.all_inc_items.len(), 1);
        assert_eq!(cache.item_percentile(b), None);
        assert_eq!(cache.item_percentile(a), Some(100));
    }

    #[test]
    fn test_priority_change_reranks_percentiles() {
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let mut items: Vec<IncrementalItem> = ids
            .iter()
            .zip([30, 60, 90])
            .map(|(id, priority)| item(*id, priority, 0))
            .collect();
        let mut cache = SessionCache::compute(
            ResolvedScopes {
                selection: Scope::knowledge_base(),
                priority: Scope::knowledge_base(),
            },
            Vec::new(),
            &items,
            now(),
        );
        assert_eq!(cache.item_percentile(ids[2]), Some(100));

        items[2].priority = 0;
        cache.update_item(&items[2], now());
        assert_eq!(cache.item_percentile(ids[2]), Some(33));
        assert_eq!(cache.item_percentile(ids[0]), Some(67));
        assert_eq!(cache.inc_item_kb_percentiles[&ids[1]], 100);

        let fresh = Uuid::new_v4();
        cache.update_item(&item(fresh, 10, 0), now());
        assert_eq!(cache.item_percentile(fresh), Some(50));
    }
}
