//! Shields: the most urgent due item the learner has not got to yet

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

/// Which kind of due work a shield watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShieldKind {
    IncrementalItems,
    Flashcards,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Shield {
    pub id: Uuid,
    pub priority: u8,
    pub percentile: Option<u8>,
}

/// Shield within the current scope and across the knowledge base
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShieldStatus {
    pub in_scope: Option<Shield>,
    pub in_kb: Option<Shield>,
}

/// First unreviewed entry of a list sorted by ascending priority
pub(crate) fn pick_shield(
    due: impl IntoIterator<Item = (Uuid, u8)>,
    reviewed: &HashSet<Uuid>,
    percentiles: &HashMap<Uuid, u8>,
) -> Option<Shield> {
    due.into_iter()
        .find(|(id, _)| !reviewed.contains(id))
        .map(|(id, priority)| Shield {
            id,
            priority,
            percentile: percentiles.get(&id).copied(),
        })
}
