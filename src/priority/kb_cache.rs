//! Knowledge-base wide card priority cache
//!
//! One durable value holding a [`CardPriorityInfo`] for every node that owns
//! flashcards. Session cache builds read it instead of walking the whole
//! hierarchy; [`build_card_priority_cache`] recreates it from scratch.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use uuid::Uuid;

use super::inheritance::{read_card_priority_attribute, resolve_inherited_priority};
use super::models::{CardPriorityInfo, PriorityEntry};
use super::percentile::percentile_map;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::host::{FlashcardSource, KnowledgeBase, StoreKind, CARD_PRIORITY_CACHE_KEY};

/// Read the stored cache. `None` when it was never written or does not parse.
pub async fn load_card_priority_cache(
    kb: &dyn KnowledgeBase,
) -> Result<Option<Vec<CardPriorityInfo>>> {
    let Some(value) = kb.get_value(StoreKind::Durable, CARD_PRIORITY_CACHE_KEY).await? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(cache) => Ok(Some(cache)),
        Err(e) => {
            log::warn!("Priority cache: stored cache is unreadable, ignoring: {}", e);
            Ok(None)
        }
    }
}

pub async fn store_card_priority_cache(
    kb: &dyn KnowledgeBase,
    cache: &[CardPriorityInfo],
) -> Result<()> {
    let value = serde_json::to_value(cache)?;
    kb.set_value(StoreKind::Durable, CARD_PRIORITY_CACHE_KEY, Some(value))
        .await?;
    Ok(())
}

/// Card priority of one node: its own attribute if present, otherwise the
/// inherited or default priority
pub async fn card_priority_info(
    kb: &dyn KnowledgeBase,
    cards: &dyn FlashcardSource,
    id: Uuid,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<CardPriorityInfo> {
    let node_cards = cards.cards_of(id).await?;
    let (priority, source) = match read_card_priority_attribute(kb, id).await? {
        Some(attr) => (attr.priority, attr.source),
        None => {
            let resolved = resolve_inherited_priority(
                kb,
                id,
                config.default_priority(),
                config.max_ancestor_depth,
            )
            .await?;
            (resolved.priority, resolved.source)
        }
    };

    Ok(CardPriorityInfo {
        id,
        priority,
        source,
        card_count: node_cards.len(),
        due_cards: node_cards.iter().filter(|c| c.is_due(now)).count(),
        kb_percentile: None,
    })
}

/// Compute card priority info for every node with cards
///
/// Nodes are processed in batches, concurrently within a batch, with a short
/// pause between batches. Nodes that disappear mid-build are skipped.
pub async fn build_card_priority_cache(
    kb: &dyn KnowledgeBase,
    cards: &dyn FlashcardSource,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<Vec<CardPriorityInfo>> {
    let nodes = cards.nodes_with_cards().await?;
    let mut infos = Vec::with_capacity(nodes.len());

    for (index, batch) in nodes.chunks(config.propagation_batch_size.max(1)).enumerate() {
        if index > 0 {
            tokio::time::sleep(config.batch_delay()).await;
        }
        let results = join_all(
            batch
                .iter()
                .map(|id| card_priority_info(kb, cards, *id, config, now)),
        )
        .await;
        for result in results {
            match result {
                Ok(info) => infos.push(info),
                Err(EngineError::MissingEntity(id)) => {
                    log::debug!("Priority cache: {} vanished during build", id)
                }
                Err(e) => return Err(e),
            }
        }
    }

    fill_kb_percentiles(&mut infos);
    Ok(infos)
}

/// Recompute `kb_percentile` for every entry
pub fn fill_kb_percentiles(infos: &mut [CardPriorityInfo]) {
    let entries: Vec<PriorityEntry> = infos.iter().map(PriorityEntry::from).collect();
    let percentiles = percentile_map(&entries);
    for info in infos.iter_mut() {
        info.kb_percentile = percentiles.get(&info.id).copied();
    }
}

/// Rebuild the stored cache from scratch
pub async fn rebuild_card_priority_cache(
    kb: &dyn KnowledgeBase,
    cards: &dyn FlashcardSource,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<Vec<CardPriorityInfo>> {
    let infos = build_card_priority_cache(kb, cards, config, now).await?;
    store_card_priority_cache(kb, &infos).await?;
    log::info!("Priority cache: rebuilt with {} node(s)", infos.len());
    Ok(infos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::millis_to_datetime;
    use crate::host::MemoryHost;
    use crate::priority::inheritance::write_card_priority_attribute;
    use crate::priority::models::{CardPriorityAttribute, PrioritySource};
    use chrono::Duration;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        millis_to_datetime(1_700_000_000_000)
    }

    #[tokio::test]
    async fn test_missing_cache_is_none() {
        let host = MemoryHost::new();
        assert_eq!(load_card_priority_cache(&host).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_cache_is_none() {
        let host = MemoryHost::new();
        host.set_value(StoreKind::Durable, CARD_PRIORITY_CACHE_KEY, Some(json!({"not": "a list"})))
            .await
            .unwrap();
        assert_eq!(load_card_priority_cache(&host).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_build_uses_attribute_then_inheritance() {
        let host = MemoryHost::new();
        let root = host.add_node("Root", None).unwrap();
        let manual = host.add_node("Manual", Some(root)).unwrap();
        let inherited = host.add_node("Inherited", Some(manual)).unwrap();
        let orphan = host.add_node("Orphan", None).unwrap();
        write_card_priority_attribute(
            &host,
            manual,
            &CardPriorityAttribute {
                priority: 10,
                source: PrioritySource::Manual,
            },
        )
        .await
        .unwrap();
        host.add_card(manual, now() - Duration::days(1)).unwrap();
        host.add_card(inherited, now() + Duration::days(3)).unwrap();
        host.add_card(orphan, now()).unwrap();

        let config = EngineConfig {
            propagation_batch_size: 1,
            batch_delay_ms: 0,
            ..EngineConfig::default()
        };
        let infos = rebuild_card_priority_cache(&host, &host, &config, now())
            .await
            .unwrap();

        assert_eq!(infos.len(), 3);
        let by_id = |id| infos.iter().find(|i| i.id == id).unwrap();
        assert_eq!(by_id(manual).source, PrioritySource::Manual);
        assert_eq!(by_id(manual).due_cards, 1);
        assert_eq!(by_id(inherited).priority, 10);
        assert_eq!(by_id(inherited).source, PrioritySource::Inherited);
        assert_eq!(by_id(inherited).due_cards, 0);
        assert_eq!(by_id(orphan).priority, 50);
        assert_eq!(by_id(orphan).source, PrioritySource::Default);

        // Two nodes tie at 10, the orphan ranks last
        assert_eq!(by_id(orphan).kb_percentile, Some(100));
        assert_eq!(by_id(manual).kb_percentile, Some(33));

        let stored = load_card_priority_cache(&host).await.unwrap().unwrap();
        assert_eq!(stored, infos);
    }
}
