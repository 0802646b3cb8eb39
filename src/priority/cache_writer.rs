//! Debounced writer for the card priority cache
//!
//! Priority recomputations tend to arrive in bursts (a subtree propagation
//! touches hundreds of nodes). Each one is recorded here as a pending write
//! keyed by node id; a later write for the same id replaces the earlier one.
//! Once nothing new has been scheduled for the quiet period, every pending
//! entry is applied to the cache in a single storage write:
//! replace by id, append if new, remove if the pending value is `None`.
//!
//! [`PriorityCacheWriter::flush`] writes immediately and must be called on
//! session teardown so nothing pending is lost.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::kb_cache::{load_card_priority_cache, store_card_priority_cache};
use super::models::CardPriorityInfo;
use crate::clock::Clock;
use crate::error::Result;
use crate::host::KnowledgeBase;

/// How long the flush loop sleeps when nothing is pending
const IDLE_WAIT: StdDuration = StdDuration::from_secs(3600);

/// Messages to control the flush loop
#[derive(Debug)]
pub enum FlushMessage {
    /// A write was scheduled, start (or keep) the quiet-period timer
    Scheduled,
    /// Flush right away and report how many entries were written
    FlushNow(oneshot::Sender<usize>),
    /// Flush and stop the loop
    Shutdown,
}

/// What a [`PriorityCacheWriter::flush_due`] call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing pending
    Idle,
    /// Writes pending but the quiet period has not elapsed
    Waiting(Duration),
    /// This many entries were written
    Flushed(usize),
}

#[derive(Debug, Default)]
struct PendingWrites {
    entries: HashMap<Uuid, Option<CardPriorityInfo>>,
    /// First-scheduled order, so appends are deterministic
    order: Vec<Uuid>,
    last_scheduled: Option<DateTime<Utc>>,
}

impl PendingWrites {
    fn insert(&mut self, id: Uuid, info: Option<CardPriorityInfo>) {
        if self.entries.insert(id, info).is_none() {
            self.order.push(id);
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct PriorityCacheWriter {
    kb: Arc<dyn KnowledgeBase>,
    clock: Arc<dyn Clock>,
    quiet_period: Duration,
    pending: Mutex<PendingWrites>,
    sender: Mutex<Option<mpsc::Sender<FlushMessage>>>,
}

impl PriorityCacheWriter {
    pub fn new(kb: Arc<dyn KnowledgeBase>, clock: Arc<dyn Clock>, quiet_period: Duration) -> Self {
        Self {
            kb,
            clock,
            quiet_period,
            pending: Mutex::new(PendingWrites::default()),
            sender: Mutex::new(None),
        }
    }

    /// Record a pending write. `None` removes the node from the cache.
    pub fn schedule(&self, id: Uuid, info: Option<CardPriorityInfo>) {
        {
            let mut pending = self.pending.lock().unwrap();
            pending.insert(id, info);
            pending.last_scheduled = Some(self.clock.now());
        }

        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.try_send(FlushMessage::Scheduled);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().entries.len()
    }

    /// Pending value for a node, if a write is queued for it
    pub fn pending_value(&self, id: Uuid) -> Option<Option<CardPriorityInfo>> {
        self.pending.lock().unwrap().entries.get(&id).cloned()
    }

    fn remaining_quiet_time(&self) -> Option<Duration> {
        let pending = self.pending.lock().unwrap();
        if pending.is_empty() {
            return None;
        }
        let elapsed = pending
            .last_scheduled
            .map(|at| self.clock.now() - at)
            .unwrap_or(self.quiet_period);
        Some((self.quiet_period - elapsed).max(Duration::zero()))
    }

    /// Flush only if the quiet period has elapsed since the last schedule
    pub async fn flush_due(&self) -> Result<FlushOutcome> {
        match self.remaining_quiet_time() {
            None => Ok(FlushOutcome::Idle),
            Some(left) if left > Duration::zero() => Ok(FlushOutcome::Waiting(left)),
            Some(_) => Ok(FlushOutcome::Flushed(self.flush().await?)),
        }
    }

    /// Write every pending entry now
    pub async fn flush(&self) -> Result<usize> {
        let batch = std::mem::take(&mut *self.pending.lock().unwrap());
        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.entries.len();
        match self.write_batch(&batch).await {
            Ok(()) => {
                log::debug!("Priority cache writer: flushed {} pending write(s)", count);
                Ok(count)
            }
            Err(e) => {
                self.requeue(batch);
                Err(e)
            }
        }
    }

    async fn write_batch(&self, batch: &PendingWrites) -> Result<()> {
        let mut cache = load_card_priority_cache(self.kb.as_ref())
            .await?
            .unwrap_or_default();
        apply_pending(&mut cache, &batch.order, &batch.entries);
        store_card_priority_cache(self.kb.as_ref(), &cache).await
    }

    /// Put a failed batch back, without clobbering anything scheduled since
    fn requeue(&self, batch: PendingWrites) {
        let mut pending = self.pending.lock().unwrap();
        let PendingWrites {
            mut entries, order, ..
        } = batch;
        for id in order {
            if pending.entries.contains_key(&id) {
                continue;
            }
            if let Some(info) = entries.remove(&id) {
                pending.insert(id, info);
            }
        }
        if pending.last_scheduled.is_none() {
            pending.last_scheduled = Some(self.clock.now());
        }
    }

    /// Start the background flush loop
    pub fn start(self: &Arc<Self>) {
        let (tx, rx) = mpsc::channel(32);
        *self.sender.lock().unwrap() = Some(tx.clone());

        let writer = Arc::clone(self);
        tokio::spawn(async move {
            flush_loop(writer, rx).await;
        });

        if self.pending_len() > 0 {
            let _ = tx.try_send(FlushMessage::Scheduled);
        }
    }

    /// Ask the background loop to flush, or flush inline when no loop runs
    pub async fn flush_now(&self) -> Result<usize> {
        let sender = self.sender.lock().unwrap().clone();
        if let Some(sender) = sender {
            let (reply_tx, reply_rx) = oneshot::channel();
            if sender.send(FlushMessage::FlushNow(reply_tx)).await.is_ok() {
                if let Ok(count) = reply_rx.await {
                    return Ok(count);
                }
            }
        }
        self.flush().await
    }

    /// Stop the background loop after a final flush
    pub fn shutdown(&self) {
        if let Some(sender) = self.sender.lock().unwrap().take() {
            let _ = sender.try_send(FlushMessage::Shutdown);
        }
    }
}

/// Apply pending writes to the cache: replace by id, append if new, remove
/// if `None`
pub fn apply_pending(
    cache: &mut Vec<CardPriorityInfo>,
    order: &[Uuid],
    entries: &HashMap<Uuid, Option<CardPriorityInfo>>,
) {
    for id in order {
        let Some(update) = entries.get(id) else {
            continue;
        };
        let position = cache.iter().position(|c| c.id == *id);
        match (update, position) {
            (Some(info), Some(pos)) => cache[pos] = info.clone(),
            (Some(info), None) => cache.push(info.clone()),
            (None, Some(pos)) => {
                cache.remove(pos);
            }
            (None, None) => {}
        }
    }
}

async fn flush_loop(writer: Arc<PriorityCacheWriter>, mut receiver: mpsc::Receiver<FlushMessage>) {
    log::debug!("Priority cache writer: flush loop started");
    let mut armed = writer.pending_len() > 0;

    loop {
        let wait = if armed {
            writer
                .remaining_quiet_time()
                .and_then(|d| d.to_std().ok())
                .unwrap_or(StdDuration::ZERO)
        } else {
            IDLE_WAIT
        };

        tokio::select! {
            _ = tokio::time::sleep(wait), if armed => {
                match writer.flush_due().await {
                    Ok(FlushOutcome::Flushed(_)) => armed = writer.pending_len() > 0,
                    Ok(FlushOutcome::Waiting(_)) => {}
                    Ok(FlushOutcome::Idle) => armed = false,
                    Err(e) => {
                        log::error!("Priority cache writer: flush failed: {}", e);
                        armed = false;
                    }
                }
            }

            msg = receiver.recv() => {
                match msg {
                    Some(FlushMessage::Scheduled) => armed = true,
                    Some(FlushMessage::FlushNow(reply)) => {
                        let count = writer.flush().await.unwrap_or_else(|e| {
                            log::error!("Priority cache writer: flush failed: {}", e);
                            0
                        });
                        let _ = reply.send(count);
                        armed = writer.pending_len() > 0;
                    }
                    Some(FlushMessage::Shutdown) | None => {
                        if let Err(e) = writer.flush().await {
                            log::error!("Priority cache writer: final flush failed: {}", e);
                        }
                        log::debug!("Priority cache writer: flush loop stopped");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{millis_to_datetime, ManualClock};
    use crate::host::MemoryHost;
    use crate::priority::models::PrioritySource;

    fn info(id: Uuid, priority: u8) -> CardPriorityInfo {
        CardPriorityInfo {
            id,
            priority,
            source: PrioritySource::Inherited,
            card_count: 1,
            due_cards: 0,
            kb_percentile: None,
        }
    }

    fn setup() -> (Arc<MemoryHost>, Arc<ManualClock>, PriorityCacheWriter) {
        let host = Arc::new(MemoryHost::new());
        let clock = Arc::new(ManualClock::new(millis_to_datetime(1_700_000_000_000)));
        let writer = PriorityCacheWriter::new(host.clone(), clock.clone(), Duration::milliseconds(200));
        (host, clock, writer)
    }

    #[tokio::test]
    async fn test_rapid_updates_yield_one_write_with_last_value() {
        let (host, clock, writer) = setup();
        let id = Uuid::new_v4();

        for priority in 1..=10 {
            writer.schedule(id, Some(info(id, priority)));
            clock.advance(Duration::milliseconds(50));
            assert!(matches!(writer.flush_due().await.unwrap(), FlushOutcome::Waiting(_)));
        }
        assert_eq!(host.durable_write_count(), 0);

        clock.advance(Duration::milliseconds(150));
        assert_eq!(writer.flush_due().await.unwrap(), FlushOutcome::Flushed(1));
        assert_eq!(host.durable_write_count(), 1);

        let cache = load_card_priority_cache(host.as_ref()).await.unwrap().unwrap();
        assert_eq!(cache, vec![info(id, 10)]);
        assert_eq!(writer.flush_due().await.unwrap(), FlushOutcome::Idle);
    }

    #[tokio::test]
    async fn test_flush_replaces_appends_and_removes() {
        let (host, _clock, writer) = setup();
        let keep = Uuid::new_v4();
        let replace = Uuid::new_v4();
        let remove = Uuid::new_v4();
        let append = Uuid::new_v4();
        store_card_priority_cache(
            host.as_ref(),
            &[info(keep, 1), info(replace, 2), info(remove, 3)],
        )
        .await
        .unwrap();

        writer.schedule(replace, Some(info(replace, 20)));
        writer.schedule(remove, None);
        writer.schedule(append, Some(info(append, 40)));
        assert_eq!(writer.flush().await.unwrap(), 3);

        let cache = load_card_priority_cache(host.as_ref()).await.unwrap().unwrap();
        assert_eq!(cache, vec![info(keep, 1), info(replace, 20), info(append, 40)]);
    }

    #[tokio::test]
    async fn test_explicit_flush_ignores_quiet_period() {
        let (host, _clock, writer) = setup();
        let id = Uuid::new_v4();
        writer.schedule(id, Some(info(id, 5)));
        assert_eq!(writer.flush().await.unwrap(), 1);
        assert_eq!(writer.pending_len(), 0);
        assert_eq!(host.durable_write_count(), 1);
        assert_eq!(writer.flush().await.unwrap(), 0);
        assert_eq!(host.durable_write_count(), 1);
    }

    #[tokio::test]
    async fn test_pending_value_is_visible_before_flush() {
        let (_host, _clock, writer) = setup();
        let id = Uuid::new_v4();
        writer.schedule(id, None);
        assert_eq!(writer.pending_value(id), Some(None));
        assert_eq!(writer.pending_value(Uuid::new_v4()), None);
    }

    #[tokio::test]
    async fn test_background_loop_flushes_after_quiet_period() {
        let host = Arc::new(MemoryHost::new());
        let writer = Arc::new(PriorityCacheWriter::new(
            host.clone(),
            Arc::new(crate::clock::SystemClock),
            Duration::milliseconds(20),
        ));
        writer.start();

        let id = Uuid::new_v4();
        writer.schedule(id, Some(info(id, 1)));
        writer.schedule(id, Some(info(id, 2)));

        tokio::time::sleep(StdDuration::from_millis(300)).await;
        assert_eq!(writer.pending_len(), 0);
        assert_eq!(host.durable_write_count(), 1);

        writer.schedule(id, Some(info(id, 3)));
        assert_eq!(writer.flush_now().await.unwrap(), 1);
        writer.shutdown();

        let cache = load_card_priority_cache(host.as_ref()).await.unwrap().unwrap();
        assert_eq!(cache, vec![info(id, 3)]);
    }
}
