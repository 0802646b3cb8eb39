//! Engine facade
//!
//! [`IncrementalEngine`] owns the scheduler, priority machinery, session
//! cache and interleaver for one host, and exposes the operations the host
//! UI and the queue call. Queue sessions follow an explicit lifecycle:
//! [`IncrementalEngine::enter_queue`] builds the session cache and resets the
//! interleaver, [`IncrementalEngine::exit_queue`] flushes pending priority
//! writes and drops all session state.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{clamp_priority, EngineConfig, PerformanceMode};
use crate::error::{EngineError, Result};
use crate::host::{FlashcardSource, KnowledgeBase};
use crate::incremental::{
    DismissedRecord, HistoryEntry, IncrementalItem, IncrementalStore, QueueMode, RescheduleOrigin,
    ReviewContext, ReviewResult,
};
use crate::priority::inheritance::write_card_priority_attribute;
use crate::priority::kb_cache::card_priority_info;
use crate::priority::{
    fine_percentile, percentile, propagate_to_subtree, rebuild_card_priority_cache,
    resolve_inherited_priority, CardPriorityAttribute, CardPriorityInfo, PriorityCacheWriter,
    PriorityEntry, PrioritySource, PropagationReport,
};
use crate::queue::{Candidate, CandidateSource, QueueDecision, QueueInterleaver, StepRequest};
use crate::session::{
    descendants_scope, expand_scope, resolve_scopes, Scope, SessionCache, SessionCacheBuilder,
    ShieldKind, ShieldStatus,
};

/// The queue session currently open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveQueue {
    pub scope: Option<Uuid>,
    pub mode: QueueMode,
}

pub struct IncrementalEngine {
    kb: Arc<dyn KnowledgeBase>,
    cards: Arc<dyn FlashcardSource>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    store: IncrementalStore,
    cache_writer: Arc<PriorityCacheWriter>,
    session: Option<SessionCache>,
    interleaver: QueueInterleaver,
    active: Option<ActiveQueue>,
}

impl IncrementalEngine {
    pub fn new(
        kb: Arc<dyn KnowledgeBase>,
        cards: Arc<dyn FlashcardSource>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let config = config.normalized();
        let cache_writer = Arc::new(PriorityCacheWriter::new(
            Arc::clone(&kb),
            Arc::clone(&clock),
            config.debounce_period(),
        ));
        Self {
            store: IncrementalStore::new(Arc::clone(&kb)),
            interleaver: QueueInterleaver::new(&config),
            kb,
            cards,
            clock,
            config,
            cache_writer,
            session: None,
            active: None,
        }
    }

    /// Use a seeded random source for queue shuffling
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.interleaver = QueueInterleaver::with_seed(&self.config, seed);
        self
    }

    /// Run the debounced cache writer on the current tokio runtime
    pub fn start_background_flush(&self) {
        self.cache_writer.start();
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session(&self) -> Option<&SessionCache> {
        self.session.as_ref()
    }

    pub fn active_queue(&self) -> Option<ActiveQueue> {
        self.active
    }

    pub fn pending_priority_writes(&self) -> usize {
        self.cache_writer.pending_len()
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ==================== Queue lifecycle ====================

    /// Open a queue session on `scope` (`None` for the whole base)
    pub async fn enter_queue(&mut self, scope: Option<Uuid>, mode: QueueMode) -> Result<()> {
        if self.active.is_some() {
            self.exit_queue().await?;
        }

        self.interleaver.reset();
        self.cache_writer.flush_now().await?;

        self.session = match self.config.performance_mode {
            PerformanceMode::Full => Some(self.build_session_cache(scope).await?),
            PerformanceMode::Light => None,
        };
        self.active = Some(ActiveQueue { scope, mode });

        log::info!(
            "Engine: entered {:?} queue on {}",
            mode,
            scope.map_or_else(|| "knowledge base".to_string(), |id| id.to_string())
        );
        Ok(())
    }

    /// Close the queue session: flush pending writes and drop session state
    pub async fn exit_queue(&mut self) -> Result<()> {
        let flushed = self.cache_writer.flush_now().await?;
        self.session = None;
        self.interleaver.reset();
        if self.active.take().is_some() {
            log::info!("Engine: left queue ({} pending priority write(s) flushed)", flushed);
        }
        Ok(())
    }

    /// Flush everything and stop the background writer
    pub async fn close(&mut self) -> Result<()> {
        self.exit_queue().await?;
        self.cache_writer.flush().await?;
        self.cache_writer.shutdown();
        Ok(())
    }

    async fn build_session_cache(&self, scope: Option<Uuid>) -> Result<SessionCache> {
        let scopes = resolve_scopes(self.kb.as_ref(), scope).await?;
        let items = self.store.list_all().await?;
        SessionCacheBuilder::new(self.kb.as_ref(), self.cards.as_ref(), &self.config)
            .build(scopes, &items, self.now())
            .await
    }

    // ==================== Queue steps ====================

    /// Decide the next queue step for the open session
    pub async fn get_next_item(&mut self, remaining_flashcards: usize) -> QueueDecision {
        let active = self.active.unwrap_or_else(|| {
            log::debug!("Engine: queue step outside a session, using the whole base");
            ActiveQueue {
                scope: None,
                mode: QueueMode::Srs,
            }
        });
        self.next_decision(StepRequest {
            remaining_flashcards,
            mode: active.mode,
            scope: active.scope,
        })
        .await
    }

    /// One interleaver step for an explicit request
    pub async fn next_decision(&mut self, request: StepRequest) -> QueueDecision {
        let now = self.clock.now();
        let source = EngineCandidates {
            kb: self.kb.as_ref(),
            store: &self.store,
            session: self.session.as_ref(),
            mode: self.config.performance_mode,
        };
        self.interleaver.next_item(request, &source, now).await
    }

    /// Record the review of the item currently shown and move on
    ///
    /// Returns `None` when no item is shown or the item disappeared.
    pub async fn remove_current_item_from_queue(&mut self) -> Result<Option<ReviewResult>> {
        let now = self.now();
        let Some((id, seconds)) = self.interleaver.take_current(now) else {
            return Ok(None);
        };
        let mode = self.active.map_or(QueueMode::Srs, |a| a.mode);

        let result = match self.store.record_review(id, &ReviewContext::queue(now, mode)).await {
            Ok(result) => result,
            Err(EngineError::MissingEntity(_)) | Err(EngineError::NotIncremental(_)) => {
                log::warn!("Engine: current item {} disappeared before its review was saved", id);
                if let Some(session) = self.session.as_mut() {
                    session.remove_item(id);
                }
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        self.store.set_review_time(id, seconds).await?;
        self.refresh_session_item(id).await?;
        if let Some(session) = self.session.as_mut() {
            session.mark_reviewed(id);
        }
        Ok(Some(result))
    }

    /// Show only flashcards for the next `minutes`
    pub fn pause_incremental_items(&mut self, minutes: i64) {
        let until = self.now() + Duration::minutes(minutes.max(0));
        self.interleaver.pause_until(until);
    }

    pub fn resume_incremental_items(&mut self) {
        self.interleaver.resume();
    }

    // ==================== Accessors ====================

    pub async fn item(&self, id: Uuid) -> Result<Option<IncrementalItem>> {
        self.store.get(id).await
    }

    pub async fn list_items(&self) -> Result<Vec<IncrementalItem>> {
        self.store.list_all().await
    }

    /// Due items within `scope`, most urgent first
    pub async fn due_items(&self, scope: Option<Uuid>) -> Result<Vec<IncrementalItem>> {
        let scope = match scope {
            Some(anchor) => expand_scope(self.kb.as_ref(), anchor).await?,
            None => Scope::knowledge_base(),
        };
        let now = self.now();
        let mut due: Vec<IncrementalItem> = self
            .store
            .list_all()
            .await?
            .into_iter()
            .filter(|item| item.is_due(now) && scope.contains(item.id))
            .collect();
        due.sort_by_key(|item| item.priority);
        Ok(due)
    }

    pub async fn priority(&self, id: Uuid) -> Result<Option<u8>> {
        Ok(self.store.get(id).await?.map(|item| item.priority))
    }

    /// Whole-number percentile of an item, within the session scope when a
    /// session is open, else across the base
    pub async fn percentile(&self, id: Uuid) -> Result<Option<u8>> {
        if let Some(session) = &self.session {
            if let Some(value) = session.item_percentile(id) {
                return Ok(Some(value));
            }
        }
        let entries = self.item_entries().await?;
        Ok(percentile(&entries, id))
    }

    /// One-decimal percentile of an item across the base
    pub async fn fine_percentile(&self, id: Uuid) -> Result<Option<f64>> {
        let entries = self.item_entries().await?;
        Ok(fine_percentile(&entries, id))
    }

    async fn item_entries(&self) -> Result<Vec<PriorityEntry>> {
        Ok(self
            .store
            .list_all()
            .await?
            .iter()
            .map(PriorityEntry::from)
            .collect())
    }

    pub async fn history(&self, id: Uuid) -> Result<Option<Vec<HistoryEntry>>> {
        Ok(self.store.get(id).await?.map(|item| item.history))
    }

    pub async fn next_due_date(&self, id: Uuid) -> Result<Option<DateTime<Utc>>> {
        Ok(self.store.get(id).await?.map(|item| item.next_rep_date))
    }

    /// Card priority of a node, including writes not flushed yet
    pub async fn card_priority(&self, id: Uuid) -> Result<CardPriorityInfo> {
        let mut info = match self.cache_writer.pending_value(id) {
            Some(Some(pending)) => pending,
            _ => {
                card_priority_info(
                    self.kb.as_ref(),
                    self.cards.as_ref(),
                    id,
                    &self.config,
                    self.now(),
                )
                .await?
            }
        };
        if info.kb_percentile.is_none() {
            info.kb_percentile = self.session.as_ref().and_then(|s| s.card_percentile(id));
        }
        Ok(info)
    }

    /// Shields for the open session, computed on demand when no session
    /// cache exists
    pub async fn shield(&self, kind: ShieldKind) -> Result<ShieldStatus> {
        if let Some(session) = &self.session {
            return Ok(session.shield(kind));
        }
        let scope = self.active.and_then(|a| a.scope);
        let cache = self.build_session_cache(scope).await?;
        Ok(cache.shield(kind))
    }

    // ==================== Mutations ====================

    /// Make a node an incremental item, inheriting its priority
    pub async fn tag(&mut self, id: Uuid) -> Result<IncrementalItem> {
        if let Some(existing) = self.store.get(id).await? {
            return Ok(existing);
        }
        let resolved = resolve_inherited_priority(
            self.kb.as_ref(),
            id,
            self.config.default_priority(),
            self.config.max_ancestor_depth,
        )
        .await?;
        let item = self.store.create(id, resolved.priority, self.now()).await?;
        log::info!(
            "Engine: {} is now incremental with priority {} ({:?})",
            id,
            item.priority,
            resolved.source
        );

        let now = self.now();
        if let Some(session) = self.session.as_mut() {
            session.update_item(&item, now);
        }
        Ok(item)
    }

    /// Stop scheduling a node and drop its history
    pub async fn untag(&mut self, id: Uuid) -> Result<bool> {
        let removed = self.store.remove(id).await?;
        if let Some(session) = self.session.as_mut() {
            session.remove_item(id);
        }
        Ok(removed)
    }

    /// Stop scheduling a node and archive its history
    pub async fn dismiss(&mut self, id: Uuid) -> Result<DismissedRecord> {
        let record = self.store.dismiss(id, self.now()).await?;
        if let Some(session) = self.session.as_mut() {
            session.remove_item(id);
        }
        log::info!("Engine: dismissed {} ({} history entries archived)", id, record.history.len());
        Ok(record)
    }

    /// Change an item's priority and push it down the subtree
    pub async fn set_priority(&mut self, id: Uuid, priority: i64) -> Result<IncrementalItem> {
        let item = self.store.set_priority(id, priority).await?;
        self.refresh_session_item(id).await?;
        self.propagate(id, item.priority).await?;
        Ok(item)
    }

    /// Set a manual card priority on a node and push it down the subtree
    pub async fn set_card_priority(&mut self, id: Uuid, priority: i64) -> Result<CardPriorityInfo> {
        let now = self.now();
        let attr = CardPriorityAttribute {
            priority: clamp_priority(priority),
            source: PrioritySource::Manual,
        };
        write_card_priority_attribute(self.kb.as_ref(), id, &attr).await?;

        let node_cards = self.cards.cards_of(id).await?;
        let info = CardPriorityInfo {
            id,
            priority: attr.priority,
            source: attr.source,
            card_count: node_cards.len(),
            due_cards: node_cards.iter().filter(|c| c.is_due(now)).count(),
            kb_percentile: None,
        };
        if info.card_count > 0 {
            self.cache_writer.schedule(id, Some(info.clone()));
        }

        self.propagate(id, attr.priority).await?;
        Ok(info)
    }

    async fn propagate(&self, id: Uuid, priority: u8) -> Result<PropagationReport> {
        propagate_to_subtree(
            self.kb.as_ref(),
            self.cards.as_ref(),
            &self.cache_writer,
            &self.config,
            id,
            priority,
            self.now(),
        )
        .await
    }

    /// Record a repetition outside the queue
    pub async fn record_review(&mut self, id: Uuid, lookback: bool) -> Result<ReviewResult> {
        let result = self
            .store
            .record_review(id, &ReviewContext::execute(self.now(), lookback))
            .await?;
        self.refresh_session_item(id).await?;
        Ok(result)
    }

    pub async fn reschedule(
        &mut self,
        id: Uuid,
        days: u32,
        origin: RescheduleOrigin,
    ) -> Result<IncrementalItem> {
        let item = self.store.reschedule(id, days, origin, self.now()).await?;
        self.refresh_session_item(id).await?;
        Ok(item)
    }

    /// Set the next repetition date by hand
    pub async fn reset_next_date(&mut self, id: Uuid, date: DateTime<Utc>) -> Result<IncrementalItem> {
        let item = self.store.reset_next_date(id, date, self.now()).await?;
        self.refresh_session_item(id).await?;
        Ok(item)
    }

    /// Recompute the knowledge-base card priority cache from scratch
    pub async fn rebuild_priority_cache(&self) -> Result<Vec<CardPriorityInfo>> {
        self.cache_writer.flush_now().await?;
        rebuild_card_priority_cache(self.kb.as_ref(), self.cards.as_ref(), &self.config, self.now())
            .await
    }

    /// Write pending card priority updates now
    pub async fn flush_priority_cache(&self) -> Result<usize> {
        self.cache_writer.flush_now().await
    }

    async fn refresh_session_item(&mut self, id: Uuid) -> Result<()> {
        if self.session.is_none() {
            return Ok(());
        }
        let item = self.store.get(id).await?;
        let now = self.now();
        if let Some(session) = self.session.as_mut() {
            match item {
                Some(item) => session.update_item(&item, now),
                None => session.remove_item(id),
            }
        }
        Ok(())
    }
}

/// Candidates from the session cache, or straight from the host in light
/// mode
struct EngineCandidates<'a> {
    kb: &'a dyn KnowledgeBase,
    store: &'a IncrementalStore,
    session: Option<&'a SessionCache>,
    mode: PerformanceMode,
}

#[async_trait]
impl<'a> CandidateSource for EngineCandidates<'a> {
    async fn scope(&self, anchor: Uuid) -> Result<Scope> {
        match (self.session, self.mode) {
            (Some(session), _) => Ok(session.selection_scope.clone()),
            (None, PerformanceMode::Light) => expand_scope(self.kb, anchor).await,
            // Session cache not built yet
            (None, PerformanceMode::Full) => descendants_scope(self.kb, anchor).await,
        }
    }

    async fn candidates(&self) -> Result<Vec<Candidate>> {
        let to_candidate = |id, priority, next_rep_date| Candidate {
            id,
            priority,
            next_rep_date,
        };
        match self.session {
            Some(session) => Ok(session
                .all_inc_items
                .iter()
                .map(|i| to_candidate(i.id, i.priority, i.next_rep_date))
                .collect()),
            None => Ok(self
                .store
                .list_all()
                .await?
                .iter()
                .map(|i| to_candidate(i.id, i.priority, i.next_rep_date))
                .collect()),
        }
    }

    async fn still_resolves(&self, id: Uuid) -> Result<bool> {
        Ok(self.store.get(id).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{millis_to_datetime, ManualClock};
    use crate::config::InterleaveRatio;
    use crate::host::MemoryHost;
    use crate::incremental::{HistoryEvent, LifecycleMarker};
    use crate::priority::load_card_priority_cache;

    fn start() -> DateTime<Utc> {
        millis_to_datetime(1_700_000_000_000)
    }

    struct Fixture {
        host: Arc<MemoryHost>,
        clock: Arc<ManualClock>,
        engine: IncrementalEngine,
    }

    fn fixture(config: EngineConfig) -> Fixture {
        let host = Arc::new(MemoryHost::new());
        let clock = Arc::new(ManualClock::new(start()));
        let engine = IncrementalEngine::new(host.clone(), host.clone(), clock.clone(), config).with_seed(3);
        Fixture { host, clock, engine }
    }

    fn items_only() -> EngineConfig {
        EngineConfig {
            interleave: InterleaveRatio::ItemsOnly,
            randomness: 0.0,
            batch_delay_ms: 0,
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_tag_inherits_from_incremental_parent() {
        let mut f = fixture(items_only());
        let book = f.host.add_node("Book", None).unwrap();
        let chapter = f.host.add_node("Chapter", Some(book)).unwrap();

        f.engine.tag(book).await.unwrap();
        f.engine.set_priority(book, 12).await.unwrap();
        let item = f.engine.tag(chapter).await.unwrap();
        assert_eq!(item.priority, 12);

        let orphan = f.host.add_node("Orphan", None).unwrap();
        assert_eq!(f.engine.tag(orphan).await.unwrap().priority, 50);
    }

    #[tokio::test]
    async fn test_queue_review_cycle() {
        let mut f = fixture(items_only());
        let doc = f.host.add_node("Doc", None).unwrap();
        let a = f.host.add_node("A", Some(doc)).unwrap();
        let b = f.host.add_node("B", Some(doc)).unwrap();
        f.engine.tag(a).await.unwrap();
        f.engine.tag(b).await.unwrap();
        f.engine.set_priority(b, 5).await.unwrap();

        f.engine.enter_queue(Some(doc), QueueMode::Srs).await.unwrap();
        assert_eq!(f.engine.get_next_item(0).await, QueueDecision::ShowIncrementalItem(b));

        f.clock.advance(Duration::seconds(30));
        let result = f.engine.remove_current_item_from_queue().await.unwrap().unwrap();
        assert_eq!(result.interval, 2);

        let history = f.engine.history(b).await.unwrap().unwrap();
        let HistoryEvent::Repetition(rep) = &history.last().unwrap().event else {
            panic!("expected a repetition");
        };
        assert_eq!(rep.review_time_seconds, Some(30));

        let session = f.engine.session().unwrap();
        assert_eq!(session.due_inc_items_in_scope.len(), 1);
        assert_eq!(session.due_inc_items_in_scope[0].id, a);

        let shield = f.engine.shield(ShieldKind::IncrementalItems).await.unwrap();
        assert_eq!(shield.in_scope.unwrap().id, a);

        assert_eq!(f.engine.get_next_item(0).await, QueueDecision::ShowIncrementalItem(a));
        f.engine.remove_current_item_from_queue().await.unwrap();
        assert_eq!(f.engine.get_next_item(0).await, QueueDecision::ShowFlashcard);

        f.engine.exit_queue().await.unwrap();
        assert!(f.engine.session().is_none());
        assert!(f.engine.active_queue().is_none());
    }

    #[tokio::test]
    async fn test_light_mode_queries_on_demand() {
        let mut f = fixture(EngineConfig {
            performance_mode: PerformanceMode::Light,
            ..items_only()
        });
        let doc = f.host.add_node("Doc", None).unwrap();
        let a = f.host.add_node("A", Some(doc)).unwrap();
        f.engine.tag(a).await.unwrap();

        f.engine.enter_queue(Some(doc), QueueMode::Srs).await.unwrap();
        assert!(f.engine.session().is_none());
        assert_eq!(f.engine.get_next_item(3).await, QueueDecision::ShowIncrementalItem(a));

        let shield = f.engine.shield(ShieldKind::IncrementalItems).await.unwrap();
        assert_eq!(shield.in_scope.unwrap().id, a);
    }

    #[tokio::test]
    async fn test_light_mode_serves_portal_members() {
        let mut f = fixture(EngineConfig {
            performance_mode: PerformanceMode::Light,
            ..items_only()
        });
        let doc = f.host.add_node("Doc", None).unwrap();
        let elsewhere = f.host.add_node("Elsewhere", None).unwrap();
        f.host.add_portal_member(doc, elsewhere).unwrap();
        f.engine.tag(elsewhere).await.unwrap();

        f.engine.enter_queue(Some(doc), QueueMode::Srs).await.unwrap();
        let shield = f.engine.shield(ShieldKind::IncrementalItems).await.unwrap();
        assert_eq!(shield.in_scope.unwrap().id, elsewhere);
        assert_eq!(
            f.engine.get_next_item(3).await,
            QueueDecision::ShowIncrementalItem(elsewhere)
        );
    }

    #[tokio::test]
    async fn test_priority_change_in_session_updates_percentiles() {
        let mut f = fixture(items_only());
        let mut ids = Vec::new();
        for priority in [30, 60, 90] {
            let id = f.host.add_node(&format!("Item {}", priority), None).unwrap();
            f.engine.tag(id).await.unwrap();
            f.engine.set_priority(id, priority).await.unwrap();
            ids.push(id);
        }

        f.engine.enter_queue(None, QueueMode::Srs).await.unwrap();
        assert_eq!(f.engine.percentile(ids[2]).await.unwrap(), Some(100));

        f.engine.set_priority(ids[2], 0).await.unwrap();
        assert_eq!(f.engine.percentile(ids[2]).await.unwrap(), Some(33));
        assert_eq!(f.engine.percentile(ids[0]).await.unwrap(), Some(67));
        let shield = f.engine.shield(ShieldKind::IncrementalItems).await.unwrap();
        let top = shield.in_scope.unwrap();
        assert_eq!(top.id, ids[2]);
        assert_eq!(top.percentile, Some(33));

        f.engine.exit_queue().await.unwrap();
        assert_eq!(f.engine.percentile(ids[2]).await.unwrap(), Some(33));
    }

    #[tokio::test]
    async fn test_untagged_item_is_skipped() {
        let mut f = fixture(items_only());
        let a = f.host.add_node("A", None).unwrap();
        f.engine.tag(a).await.unwrap();
        f.engine.enter_queue(None, QueueMode::Srs).await.unwrap();

        f.host.remove_node(a).unwrap();
        assert_eq!(f.engine.get_next_item(0).await, QueueDecision::NoItemAvailable);
    }

    #[tokio::test]
    async fn test_pause_shows_flashcards() {
        let mut f = fixture(items_only());
        let a = f.host.add_node("A", None).unwrap();
        f.engine.tag(a).await.unwrap();
        f.engine.enter_queue(None, QueueMode::Srs).await.unwrap();

        f.engine.pause_incremental_items(10);
        assert_eq!(f.engine.get_next_item(0).await, QueueDecision::ShowFlashcard);
        f.clock.advance(Duration::minutes(11));
        assert_eq!(f.engine.get_next_item(0).await, QueueDecision::ShowIncrementalItem(a));
    }

    #[tokio::test]
    async fn test_card_priority_propagates_and_flushes_on_exit() {
        let mut f = fixture(items_only());
        let deck = f.host.add_node("Deck", None).unwrap();
        let pinned = f.host.add_node("Pinned", Some(deck)).unwrap();
        let topic = f.host.add_node("Topic", Some(deck)).unwrap();
        f.host.add_card(topic, start()).unwrap();
        f.host.add_card(pinned, start()).unwrap();

        f.engine.set_card_priority(pinned, 80).await.unwrap();
        f.engine.set_card_priority(deck, 20).await.unwrap();
        assert_eq!(f.engine.card_priority(topic).await.unwrap().priority, 20);
        assert_eq!(f.engine.card_priority(pinned).await.unwrap().priority, 80);
        assert_eq!(f.host.durable_write_count(), 0);

        f.engine.enter_queue(None, QueueMode::Srs).await.unwrap();
        assert_eq!(f.host.durable_write_count(), 1);
        f.engine.exit_queue().await.unwrap();

        let cache = load_card_priority_cache(f.host.as_ref()).await.unwrap().unwrap();
        let topic_info = cache.iter().find(|c| c.id == topic).unwrap();
        assert_eq!(topic_info.priority, 20);
        assert_eq!(topic_info.source, PrioritySource::Inherited);
        let pinned_info = cache.iter().find(|c| c.id == pinned).unwrap();
        assert_eq!(pinned_info.source, PrioritySource::Manual);
    }

    #[tokio::test]
    async fn test_dismiss_and_retag_keeps_history() {
        let mut f = fixture(items_only());
        let a = f.host.add_node("A", None).unwrap();
        f.engine.tag(a).await.unwrap();
        f.engine.record_review(a, false).await.unwrap();

        f.engine.dismiss(a).await.unwrap();
        assert_eq!(f.engine.item(a).await.unwrap(), None);

        let item = f.engine.tag(a).await.unwrap();
        assert_eq!(item.history.len(), 3);
        assert_eq!(
            item.history.last().unwrap().event,
            HistoryEvent::Lifecycle(LifecycleMarker::MadeIncremental)
        );
    }

    #[tokio::test]
    async fn test_percentiles_and_due_listing() {
        let mut f = fixture(items_only());
        let ids: Vec<Uuid> = (0..4)
            .map(|i| f.host.add_node(&format!("Item {}", i), None).unwrap())
            .collect();
        for (i, id) in ids.iter().enumerate() {
            f.engine.tag(*id).await.unwrap();
            f.engine.set_priority(*id, (i as i64 + 1) * 10).await.unwrap();
        }
        f.engine
            .reschedule(ids[3], 3, RescheduleOrigin::Editor)
            .await
            .unwrap();

        assert_eq!(f.engine.percentile(ids[0]).await.unwrap(), Some(25));
        assert_eq!(f.engine.fine_percentile(ids[2]).await.unwrap(), Some(75.0));
        let due = f.engine.due_items(None).await.unwrap();
        assert_eq!(due.len(), 3);
        assert_eq!(due[0].id, ids[0]);
        assert_eq!(
            f.engine.next_due_date(ids[3]).await.unwrap(),
            Some(start() + Duration::days(3))
        );
    }

    #[tokio::test]
    async fn test_operations_on_missing_nodes() {
        let mut f = fixture(items_only());
        let ghost = Uuid::new_v4();
        assert!(matches!(f.engine.tag(ghost).await, Err(EngineError::MissingEntity(_))));
        assert_eq!(f.engine.priority(ghost).await.unwrap(), None);
        assert!(matches!(
            f.engine.record_review(ghost, false).await,
            Err(EngineError::MissingEntity(_))
        ));
        assert_eq!(f.engine.remove_current_item_from_queue().await.unwrap(), None);
    }
}
