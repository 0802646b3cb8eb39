//! Interleaving incremental items into the flashcard queue
//!
//! Each call to [`QueueInterleaver::next_item`] is one queue step. On most
//! steps the host shows a flashcard; every `flashcards-per-item + 1` steps
//! (or on every step once no flashcards are left) the most urgent due item
//! in scope takes the slot instead.
//!
//! All state here lives for one queue session and is reset on enter/exit.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{EngineConfig, InterleaveRatio};
use crate::error::Result;
use crate::incremental::QueueMode;
use crate::session::Scope;

/// What the queue should show next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "decision", content = "id")]
pub enum QueueDecision {
    ShowFlashcard,
    ShowIncrementalItem(Uuid),
    NoItemAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRequest {
    pub remaining_flashcards: usize,
    pub mode: QueueMode,
    /// Node the queue was opened on, `None` for the whole base
    pub scope: Option<Uuid>,
}

/// An incremental item the queue may pick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub id: Uuid,
    pub priority: u8,
    pub next_rep_date: DateTime<Utc>,
}

impl Candidate {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_rep_date <= now
    }
}

/// Where the interleaver gets its scope and candidates from
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Ids the queue may select from for the given anchor
    async fn scope(&self, anchor: Uuid) -> Result<Scope>;

    /// Every incremental item, in document order
    async fn candidates(&self) -> Result<Vec<Candidate>>;

    /// Whether the item still exists and is still incremental
    async fn still_resolves(&self, id: Uuid) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CurrentReview {
    id: Uuid,
    started_at: DateTime<Utc>,
}

pub struct QueueInterleaver {
    ratio: InterleaveRatio,
    randomness: f64,
    step: u64,
    seen: HashSet<Uuid>,
    paused_until: Option<DateTime<Utc>>,
    current: Option<CurrentReview>,
    rng: StdRng,
}

impl QueueInterleaver {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic shuffling for tests and replays
    pub fn with_seed(config: &EngineConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &EngineConfig, rng: StdRng) -> Self {
        Self {
            ratio: config.interleave,
            randomness: config.randomness.clamp(0.0, 1.0),
            step: 0,
            seen: HashSet::new(),
            paused_until: None,
            current: None,
            rng,
        }
    }

    /// Forget everything about the current session
    pub fn reset(&mut self) {
        self.step = 0;
        self.seen.clear();
        self.paused_until = None;
        self.current = None;
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// Show only flashcards until `until`
    pub fn pause_until(&mut self, until: DateTime<Utc>) {
        log::info!("Queue: incremental items paused until {}", until);
        self.paused_until = Some(until);
    }

    pub fn resume(&mut self) {
        self.paused_until = None;
    }

    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.paused_until.map_or(false, |until| now < until)
    }

    /// Whether the current step goes to an incremental item
    pub fn should_interleave(&self, remaining_flashcards: usize) -> bool {
        match self.ratio {
            InterleaveRatio::ItemsOnly => true,
            InterleaveRatio::FlashcardsOnly => false,
            InterleaveRatio::FlashcardsPerItem(per_item) => {
                remaining_flashcards == 0 || (self.step + 1) % (u64::from(per_item) + 1) == 0
            }
        }
    }

    /// Filter, sort and lightly shuffle the candidates for one step
    ///
    /// Items already shown this session are skipped until every eligible
    /// item has been shown, then a new round starts.
    pub fn order_candidates(
        &mut self,
        candidates: Vec<Candidate>,
        scope: &Scope,
        mode: QueueMode,
        now: DateTime<Utc>,
    ) -> Vec<Candidate> {
        let eligible: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| scope.contains(c.id))
            .filter(|c| mode != QueueMode::Srs || c.is_due(now))
            .collect();

        let mut ordered: Vec<Candidate> = eligible
            .iter()
            .filter(|c| !self.seen.contains(&c.id))
            .copied()
            .collect();
        if ordered.is_empty() && !eligible.is_empty() {
            log::debug!("Queue: every eligible item shown, starting a new round");
            for c in &eligible {
                self.seen.remove(&c.id);
            }
            ordered = eligible;
        }

        match mode {
            QueueMode::InOrder => {
                ordered.sort_by_key(|c| scope.position(c.id).unwrap_or(usize::MAX));
            }
            QueueMode::Srs | QueueMode::PracticeAll => {
                ordered.sort_by_key(|c| c.priority);
                self.shuffle(&mut ordered);
            }
        }
        ordered
    }

    /// floor(randomness x len) random pairwise swaps
    fn shuffle(&mut self, list: &mut [Candidate]) {
        let len = list.len();
        if len < 2 {
            return;
        }
        let swaps = (self.randomness * len as f64).floor() as usize;
        for _ in 0..swaps {
            let a = self.rng.gen_range(0..len);
            let b = self.rng.gen_range(0..len);
            list.swap(a, b);
        }
    }

    /// Decide what the queue shows on this step
    ///
    /// Never fails: host errors are logged and degrade to a flashcard.
    pub async fn next_item(
        &mut self,
        request: StepRequest,
        source: &dyn CandidateSource,
        now: DateTime<Utc>,
    ) -> QueueDecision {
        if self.is_paused(now) {
            return QueueDecision::ShowFlashcard;
        }

        let trigger = self.should_interleave(request.remaining_flashcards);
        self.step += 1;
        if !trigger {
            return QueueDecision::ShowFlashcard;
        }

        let scope = match request.scope {
            Some(anchor) => match source.scope(anchor).await {
                Ok(scope) => scope,
                Err(e) => {
                    log::warn!("Queue: could not resolve scope of {}: {}", anchor, e);
                    return QueueDecision::ShowFlashcard;
                }
            },
            None => Scope::knowledge_base(),
        };

        let candidates = match source.candidates().await {
            Ok(candidates) => candidates,
            Err(e) => {
                log::warn!("Queue: could not load incremental items: {}", e);
                return QueueDecision::ShowFlashcard;
            }
        };

        let ordered = self.order_candidates(candidates, &scope, request.mode, now);
        if ordered.is_empty() {
            return QueueDecision::ShowFlashcard;
        }

        for candidate in ordered {
            match source.still_resolves(candidate.id).await {
                Ok(true) => {
                    self.seen.insert(candidate.id);
                    self.current = Some(CurrentReview {
                        id: candidate.id,
                        started_at: now,
                    });
                    log::debug!("Queue: step {} shows {}", self.step - 1, candidate.id);
                    return QueueDecision::ShowIncrementalItem(candidate.id);
                }
                Ok(false) => log::debug!("Queue: {} no longer resolves, skipping", candidate.id),
                Err(e) => log::warn!("Queue: could not check {}: {}", candidate.id, e),
            }
        }

        QueueDecision::NoItemAvailable
    }

    /// Item currently shown, if any
    pub fn current(&self) -> Option<Uuid> {
        self.current.map(|c| c.id)
    }

    /// Finish the current review: its id and the seconds spent on it
    pub fn take_current(&mut self, now: DateTime<Utc>) -> Option<(Uuid, u32)> {
        self.current.take().map(|c| {
            let seconds = (now - c.started_at).num_seconds().clamp(0, i64::from(u32::MAX));
            (c.id, seconds as u32)
        })
    }
}
