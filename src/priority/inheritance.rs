//! Priority inheritance along the node hierarchy
//!
//! A node without a priority of its own takes the priority of its nearest
//! ancestor that has one, either as an incremental item or through a card
//! priority attribute. Setting a priority on a node pushes it down to every
//! descendant that has not been set by hand.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use uuid::Uuid;

use super::cache_writer::PriorityCacheWriter;
use super::models::{CardPriorityAttribute, CardPriorityInfo, PrioritySource};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::host::{FlashcardSource, HostError, KnowledgeBase, PROP_CARD_PRIORITY, PROP_INCREMENTAL};
use crate::incremental::storage::parse_item;

/// Outcome of an ancestor walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPriority {
    pub priority: u8,
    pub source: PrioritySource,
    /// Ancestor the priority was taken from
    pub inherited_from: Option<Uuid>,
}

impl ResolvedPriority {
    fn default_value(priority: u8) -> Self {
        Self {
            priority,
            source: PrioritySource::Default,
            inherited_from: None,
        }
    }
}

/// Read the card priority attribute of a node. Unreadable values count as
/// absent.
pub async fn read_card_priority_attribute(
    kb: &dyn KnowledgeBase,
    id: Uuid,
) -> Result<Option<CardPriorityAttribute>> {
    match kb.get_property(id, PROP_CARD_PRIORITY).await? {
        Some(value) => match serde_json::from_value(value) {
            Ok(attr) => Ok(Some(attr)),
            Err(e) => {
                log::warn!("Priority: unreadable card priority on {}: {}", id, e);
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

pub async fn write_card_priority_attribute(
    kb: &dyn KnowledgeBase,
    id: Uuid,
    attr: &CardPriorityAttribute,
) -> Result<()> {
    kb.set_property(id, PROP_CARD_PRIORITY, Some(serde_json::to_value(attr)?))
        .await?;
    Ok(())
}

/// Priority of the incremental item stored on a node, skipping malformed data
async fn incremental_priority(kb: &dyn KnowledgeBase, id: Uuid) -> Result<Option<u8>> {
    let Some(value) = kb.get_property(id, PROP_INCREMENTAL).await? else {
        return Ok(None);
    };
    match parse_item(id, value) {
        Ok(item) => Ok(Some(item.priority)),
        Err(EngineError::MalformedPersistedData { reason, .. }) => {
            log::debug!("Priority: skipping malformed item on {}: {}", id, reason);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// A priority the node carries itself, item priority first
async fn own_priority(kb: &dyn KnowledgeBase, id: Uuid) -> Result<Option<u8>> {
    if let Some(priority) = incremental_priority(kb, id).await? {
        return Ok(Some(priority));
    }
    Ok(read_card_priority_attribute(kb, id)
        .await?
        .map(|attr| attr.priority))
}

/// Walk from the parent of `id` towards the root and return the first
/// priority found, or `default` when no ancestor has one.
///
/// The walk stops after `max_depth` ancestors and treats a parent that no
/// longer resolves as the root.
pub async fn resolve_inherited_priority(
    kb: &dyn KnowledgeBase,
    id: Uuid,
    default: u8,
    max_depth: usize,
) -> Result<ResolvedPriority> {
    let mut current = kb.parent_of(id).await?;
    let mut depth = 0;

    while let Some(ancestor) = current {
        if depth >= max_depth {
            log::warn!(
                "Priority: ancestor walk from {} stopped after {} levels",
                id,
                max_depth
            );
            break;
        }
        depth += 1;

        match own_priority(kb, ancestor).await {
            Ok(Some(priority)) => {
                return Ok(ResolvedPriority {
                    priority,
                    source: PrioritySource::Inherited,
                    inherited_from: Some(ancestor),
                })
            }
            Ok(None) => {}
            Err(EngineError::MissingEntity(_)) => break,
            Err(e) => return Err(e),
        }

        current = match kb.parent_of(ancestor).await {
            Ok(parent) => parent,
            Err(HostError::NodeNotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
    }

    Ok(ResolvedPriority::default_value(default))
}

/// Counters from one subtree propagation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropagationReport {
    pub examined: usize,
    pub updated: usize,
    pub skipped_manual: usize,
    pub skipped_incremental: usize,
}

#[derive(Debug, Clone)]
struct NodeSnapshot {
    id: Uuid,
    parent: Option<Uuid>,
    incremental: Option<u8>,
    attribute: Option<CardPriorityAttribute>,
    card_count: usize,
    due_cards: usize,
}

async fn load_snapshot(
    kb: &dyn KnowledgeBase,
    cards: &dyn FlashcardSource,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<NodeSnapshot> {
    let parent = kb.parent_of(id).await?;
    let incremental = incremental_priority(kb, id).await?;
    let attribute = read_card_priority_attribute(kb, id).await?;
    let node_cards = cards.cards_of(id).await?;
    Ok(NodeSnapshot {
        id,
        parent,
        incremental,
        attribute,
        card_count: node_cards.len(),
        due_cards: node_cards.iter().filter(|c| c.is_due(now)).count(),
    })
}

/// Push `root_priority` down to every descendant of `root`
///
/// Manual priorities are never overwritten, and incremental items keep
/// their own priority. Both still pass their value on to their own
/// descendants. Nodes are read and written in batches of
/// `config.propagation_batch_size`, concurrently within a batch.
pub async fn propagate_to_subtree(
    kb: &dyn KnowledgeBase,
    cards: &dyn FlashcardSource,
    writer: &PriorityCacheWriter,
    config: &EngineConfig,
    root: Uuid,
    root_priority: u8,
    now: DateTime<Utc>,
) -> Result<PropagationReport> {
    let descendants = kb.descendants_of(root).await?;
    let batch_size = config.propagation_batch_size.max(1);
    let mut report = PropagationReport::default();

    let mut snapshots = Vec::with_capacity(descendants.len());
    for (index, batch) in descendants.chunks(batch_size).enumerate() {
        if index > 0 {
            tokio::time::sleep(config.batch_delay()).await;
        }
        let loaded = join_all(batch.iter().map(|id| load_snapshot(kb, cards, *id, now))).await;
        for result in loaded {
            match result {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(EngineError::MissingEntity(id)) => {
                    log::debug!("Priority: {} vanished during propagation", id)
                }
                Err(e) => return Err(e),
            }
        }
    }

    // Descendants come in document order, so a parent is settled before
    // its children.
    let mut effective: HashMap<Uuid, u8> = HashMap::with_capacity(snapshots.len() + 1);
    effective.insert(root, root_priority);
    let mut updates = Vec::new();

    for snapshot in &snapshots {
        report.examined += 1;
        let inherited = snapshot
            .parent
            .and_then(|p| effective.get(&p).copied())
            .unwrap_or(root_priority);

        if let Some(priority) = snapshot.incremental {
            report.skipped_incremental += 1;
            effective.insert(snapshot.id, priority);
            continue;
        }
        if let Some(attr) = snapshot.attribute.filter(|a| a.source.is_manual()) {
            report.skipped_manual += 1;
            effective.insert(snapshot.id, attr.priority);
            continue;
        }

        effective.insert(snapshot.id, inherited);
        let target = CardPriorityAttribute {
            priority: inherited,
            source: PrioritySource::Inherited,
        };
        if snapshot.attribute != Some(target) {
            updates.push((snapshot, target));
        }
    }

    for (index, batch) in updates.chunks(batch_size).enumerate() {
        if index > 0 {
            tokio::time::sleep(config.batch_delay()).await;
        }
        let written = join_all(
            batch
                .iter()
                .map(|(snapshot, attr)| write_card_priority_attribute(kb, snapshot.id, attr)),
        )
        .await;

        for (result, (snapshot, attr)) in written.into_iter().zip(batch) {
            match result {
                Ok(()) => {
                    report.updated += 1;
                    if snapshot.card_count > 0 {
                        writer.schedule(
                            snapshot.id,
                            Some(CardPriorityInfo {
                                id: snapshot.id,
                                priority: attr.priority,
                                source: attr.source,
                                card_count: snapshot.card_count,
                                due_cards: snapshot.due_cards,
                                kb_percentile: None,
                            }),
                        );
                    }
                }
                Err(EngineError::MissingEntity(id)) => {
                    log::debug!("Priority: {} vanished during propagation", id)
                }
                Err(e) => return Err(e),
            }
        }
    }

    log::info!(
        "Priority: propagated {} from {} ({} examined, {} updated, {} manual kept, {} incremental kept)",
        root_priority,
        root,
        report.examined,
        report.updated,
        report.skipped_manual,
        report.skipped_incremental
    );
    Ok(report)
}
