//! Priority models shared by incremental items and flashcard-bearing nodes

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a node's card priority came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrioritySource {
    /// Set by the learner. Never overwritten by propagation.
    Manual,
    /// Copied from the nearest ancestor carrying a priority
    Inherited,
    /// Configured default, no ancestor had a priority
    Default,
}

impl PrioritySource {
    pub fn is_manual(self) -> bool {
        matches!(self, Self::Manual)
    }
}

/// Card priority as stored on the node itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPriorityAttribute {
    pub priority: u8,
    pub source: PrioritySource,
}

/// Entry of the knowledge-base wide card priority cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPriorityInfo {
    pub id: Uuid,
    pub priority: u8,
    pub source: PrioritySource,
    #[serde(default)]
    pub card_count: usize,
    #[serde(default)]
    pub due_cards: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kb_percentile: Option<u8>,
}

impl CardPriorityInfo {
    pub fn has_due_cards(&self) -> bool {
        self.due_cards > 0
    }
}

/// Minimal `{id, priority}` pair the percentile ranker works on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityEntry {
    pub id: Uuid,
    pub priority: u8,
}

impl PriorityEntry {
    pub fn new(id: Uuid, priority: u8) -> Self {
        Self { id, priority }
    }
}

impl From<&CardPriorityInfo> for PriorityEntry {
    fn from(info: &CardPriorityInfo) -> Self {
        Self::new(info.id, info.priority)
    }
}

impl From<&crate::incremental::IncrementalItem> for PriorityEntry {
    fn from(item: &crate::incremental::IncrementalItem) -> Self {
        Self::new(item.id, item.priority)
    }
}
